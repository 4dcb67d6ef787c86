//! poll(2) readiness wait
//!
//! The descriptor set is rebuilt before every wait from the tasks holding
//! waitable events; the buffers are reused across waits.

use std::time::Duration;

use nix::errno::Errno;
use weft_core::TaskId;

use crate::event::Interest;
use crate::{sys, RawFd};

#[derive(Default)]
pub(crate) struct Poller {
    fds: Vec<libc::pollfd>,
    owners: Vec<TaskId>,
}

impl Poller {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.fds.clear();
        self.owners.clear();
    }

    pub(crate) fn register(&mut self, task: TaskId, fd: RawFd, interest: Interest) {
        self.fds.push(libc::pollfd {
            fd,
            events: interest.poll_events(),
            revents: 0,
        });
        self.owners.push(task);
    }

    pub(crate) fn len(&self) -> usize {
        self.fds.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Wait until a descriptor is ready or `timeout` passes; `None` waits
    /// forever. Returns the number of ready descriptors; an interrupted wait
    /// reports zero.
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> Result<usize, Errno> {
        match sys::poll(&mut self.fds, timeout_ms(timeout)) {
            Ok(n) => Ok(n),
            Err(Errno::EINTR) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Tasks whose descriptor reported any event in the last wait, in
    /// registration order
    pub(crate) fn ready(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.fds
            .iter()
            .zip(&self.owners)
            .filter(|(pfd, _)| pfd.revents != 0)
            .map(|(_, task)| *task)
    }
}

/// Milliseconds for poll(2), rounded up so a short sleep never becomes a
/// zero-timeout spin
fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(ms as u64) < d {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(7))), 7);
        assert_eq!(timeout_ms(Some(Duration::from_micros(7001))), 8);
        assert_eq!(timeout_ms(Some(Duration::from_secs(u64::MAX))), libc::c_int::MAX);
    }

    #[test]
    fn test_poller_reports_ready_owner() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let (c, _d) = UnixStream::pair().unwrap();

        let mut poller = Poller::new();
        poller.register(TaskId::from_raw(1), a.as_raw_fd(), Interest::Readable);
        poller.register(TaskId::from_raw(2), c.as_raw_fd(), Interest::Readable);
        assert_eq!(poller.len(), 2);

        assert_eq!(poller.wait(Some(Duration::from_millis(1))).unwrap(), 0);
        b.write_all(b"!").unwrap();
        assert_eq!(poller.wait(Some(Duration::from_secs(1))).unwrap(), 1);

        let ready: Vec<_> = poller.ready().collect();
        assert_eq!(ready, vec![TaskId::from_raw(1)]);

        poller.clear();
        assert!(poller.is_empty());
    }
}
