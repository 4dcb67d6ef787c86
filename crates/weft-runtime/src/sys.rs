//! Raw socket and poll syscalls
//!
//! Thin wrappers over libc returning `nix` errno values. Every socket this
//! module creates is non-blocking and close-on-exec, and writes to a socket
//! never raise SIGPIPE.

use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;

type SysResult<T> = Result<T, Errno>;

#[inline]
fn check(ret: libc::c_int) -> SysResult<libc::c_int> {
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret)
    }
}

#[inline]
fn check_len(ret: libc::ssize_t) -> SysResult<usize> {
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret as usize)
    }
}

fn to_sockaddr(addr: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is plain old data; all-zero is a valid value
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr.s_addr = u32::from(*addr.ip()).to_be();
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        sa.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
    }
    sa
}

fn from_sockaddr(sa: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr)),
        u16::from_be(sa.sin_port),
    )
}

fn set_int_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> SysResult<()> {
    // SAFETY: value outlives the call and the length matches its type
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    check(ret).map(|_| ())
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

        fn new_socket() -> SysResult<OwnedFd> {
            // SAFETY: plain syscall; the returned fd is fresh and owned here
            let fd = check(unsafe {
                libc::socket(
                    libc::AF_INET,
                    libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                    0,
                )
            })?;
            Ok(unsafe { OwnedFd::from_raw_fd(fd) })
        }

        fn accept_raw(listener: RawFd, sa: &mut libc::sockaddr_in) -> SysResult<OwnedFd> {
            let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            // SAFETY: sa and len describe a valid sockaddr_in buffer
            let fd = check(unsafe {
                libc::accept4(
                    listener,
                    sa as *mut libc::sockaddr_in as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            })?;
            Ok(unsafe { OwnedFd::from_raw_fd(fd) })
        }
    } else {
        const SEND_FLAGS: libc::c_int = 0;

        fn prepare(fd: &OwnedFd) -> SysResult<()> {
            let raw = fd.as_raw_fd();
            // SAFETY: fcntl on an fd we own
            unsafe {
                let flags = check(libc::fcntl(raw, libc::F_GETFL))?;
                check(libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
                check(libc::fcntl(raw, libc::F_SETFD, libc::FD_CLOEXEC))?;
            }
            #[cfg(any(target_os = "macos", target_os = "ios"))]
            set_int_opt(raw, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;
            Ok(())
        }

        fn new_socket() -> SysResult<OwnedFd> {
            // SAFETY: plain syscall; the returned fd is fresh and owned here
            let fd = check(unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) })?;
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            prepare(&fd)?;
            Ok(fd)
        }

        fn accept_raw(listener: RawFd, sa: &mut libc::sockaddr_in) -> SysResult<OwnedFd> {
            let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            // SAFETY: sa and len describe a valid sockaddr_in buffer
            let fd = check(unsafe {
                libc::accept(listener, sa as *mut libc::sockaddr_in as *mut libc::sockaddr, &mut len)
            })?;
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            prepare(&fd)?;
            Ok(fd)
        }
    }
}

/// Create a listening socket bound to `addr`
pub(crate) fn listen(addr: SocketAddrV4, backlog: i32) -> SysResult<OwnedFd> {
    let fd = new_socket()?;
    set_int_opt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;

    let sa = to_sockaddr(addr);
    // SAFETY: sa is a valid sockaddr_in for the duration of the call
    check(unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &sa as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    })?;
    check(unsafe { libc::listen(fd.as_raw_fd(), backlog) })?;
    Ok(fd)
}

/// Accept one pending connection
pub(crate) fn accept(listener: RawFd) -> SysResult<(OwnedFd, SocketAddrV4)> {
    // SAFETY: zeroed sockaddr_in is valid
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    let fd = accept_raw(listener, &mut sa)?;
    Ok((fd, from_sockaddr(&sa)))
}

/// Start a non-blocking connect
///
/// Returns the socket and whether the connection already completed. When it
/// did not, completion is signalled by writability and checked with
/// `take_socket_error`.
pub(crate) fn connect_start(addr: SocketAddrV4) -> SysResult<(OwnedFd, bool)> {
    let fd = new_socket()?;
    let sa = to_sockaddr(addr);
    // SAFETY: sa is a valid sockaddr_in for the duration of the call
    let ret = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &sa as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    match check(ret) {
        Ok(_) => Ok((fd, true)),
        Err(Errno::EINPROGRESS) => Ok((fd, false)),
        Err(e) => Err(e),
    }
}

/// Fetch and clear the pending error on a socket (SO_ERROR)
pub(crate) fn take_socket_error(fd: RawFd) -> SysResult<()> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: value and len describe a c_int buffer
    check(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut value as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    })?;
    if value == 0 {
        Ok(())
    } else {
        Err(Errno::from_raw(value))
    }
}

fn name_of(
    fd: RawFd,
    f: unsafe extern "C" fn(libc::c_int, *mut libc::sockaddr, *mut libc::socklen_t) -> libc::c_int,
) -> SysResult<SocketAddrV4> {
    // SAFETY: zeroed sockaddr_in is valid; f writes at most len bytes
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    check(unsafe { f(fd, &mut sa as *mut libc::sockaddr_in as *mut libc::sockaddr, &mut len) })?;
    Ok(from_sockaddr(&sa))
}

/// Local address of a bound socket
pub(crate) fn local_addr(fd: RawFd) -> SysResult<SocketAddrV4> {
    name_of(fd, libc::getsockname)
}

/// Remote address of a connected socket
pub(crate) fn peer_addr(fd: RawFd) -> SysResult<SocketAddrV4> {
    name_of(fd, libc::getpeername)
}

/// Receive up to `size` bytes; an empty vector means orderly shutdown
pub(crate) fn recv(fd: RawFd, size: usize) -> SysResult<Vec<u8>> {
    let mut buf = vec![0u8; size];
    // SAFETY: buf has room for size bytes
    let n = check_len(unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, size, 0) })?;
    buf.truncate(n);
    Ok(buf)
}

/// Send as many bytes as the socket accepts
pub(crate) fn send(fd: RawFd, data: &[u8]) -> SysResult<usize> {
    // SAFETY: data is a valid slice for its length
    check_len(unsafe {
        libc::send(fd, data.as_ptr() as *const libc::c_void, data.len(), SEND_FLAGS)
    })
}

/// read(2) up to `size` bytes from any descriptor
pub(crate) fn read(fd: RawFd, size: usize) -> SysResult<Vec<u8>> {
    let mut buf = vec![0u8; size];
    // SAFETY: buf has room for size bytes
    let n = check_len(unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, size) })?;
    buf.truncate(n);
    Ok(buf)
}

/// write(2) to any descriptor
pub(crate) fn write(fd: RawFd, data: &[u8]) -> SysResult<usize> {
    // SAFETY: data is a valid slice for its length
    check_len(unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) })
}

/// poll(2) over `fds`; `timeout_ms < 0` waits forever
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout_ms: libc::c_int) -> SysResult<usize> {
    // SAFETY: fds is a valid, exclusively borrowed pollfd array
    let n = check(unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) })?;
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[test]
    fn test_sockaddr_conversion() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 8080);
        assert_eq!(from_sockaddr(&to_sockaddr(addr)), addr);
    }

    #[test]
    fn test_listen_and_local_addr() {
        let fd = listen(loopback(), 16).unwrap();
        let addr = local_addr(fd.as_raw_fd()).unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_accept_would_block() {
        let fd = listen(loopback(), 16).unwrap();
        assert_eq!(accept(fd.as_raw_fd()).unwrap_err(), Errno::EAGAIN);
    }

    #[test]
    fn test_connect_send_recv() {
        let listener = listen(loopback(), 16).unwrap();
        let addr = local_addr(listener.as_raw_fd()).unwrap();

        let (client, _) = connect_start(addr).unwrap();
        let mut fds = [libc::pollfd { fd: client.as_raw_fd(), events: libc::POLLOUT, revents: 0 }];
        assert_eq!(poll(&mut fds, 1000).unwrap(), 1);
        take_socket_error(client.as_raw_fd()).unwrap();

        let mut fds = [libc::pollfd { fd: listener.as_raw_fd(), events: libc::POLLIN, revents: 0 }];
        assert_eq!(poll(&mut fds, 1000).unwrap(), 1);
        let (server, peer) = accept(listener.as_raw_fd()).unwrap();
        assert_eq!(peer, local_addr(client.as_raw_fd()).unwrap());
        assert_eq!(peer_addr(server.as_raw_fd()).unwrap(), peer);

        assert_eq!(send(client.as_raw_fd(), b"ping").unwrap(), 4);
        let mut fds = [libc::pollfd { fd: server.as_raw_fd(), events: libc::POLLIN, revents: 0 }];
        assert_eq!(poll(&mut fds, 1000).unwrap(), 1);
        assert_eq!(recv(server.as_raw_fd(), 16).unwrap(), b"ping");

        drop(client);
        let mut fds = [libc::pollfd { fd: server.as_raw_fd(), events: libc::POLLIN, revents: 0 }];
        assert_eq!(poll(&mut fds, 1000).unwrap(), 1);
        assert!(recv(server.as_raw_fd(), 16).unwrap().is_empty());
    }

    #[test]
    fn test_poll_timeout_empty() {
        assert_eq!(poll(&mut [], 1).unwrap(), 0);
    }
}
