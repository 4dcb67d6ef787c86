//! Line echo server
//!
//! Reads newline-terminated lines from each client and sends them back
//! upper-cased. One task per connection, all on one thread.
//!
//! Usage:
//!     cargo run --release -p weft-echo -- [port] [host]
//!
//! Port falls back to `WEFT_ECHO_PORT`, then 9999. An empty host binds all
//! interfaces.
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9999

use weft::{kinfo, server, Connection, Runtime, TaskResult};

const DEFAULT_PORT: u16 = 9999;

async fn upper_echo(conn: Connection) -> TaskResult<()> {
    let peer = conn.peer_addr();
    loop {
        let line = conn.readline(b"\n", weft::constants::DEFAULT_RECV_SIZE).await?;
        if line.is_empty() {
            kinfo!("{} disconnected", peer);
            return Ok(());
        }
        conn.sendall(&line.to_ascii_uppercase()).await?;
    }
}

fn main() {
    weft::init_logging();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args
        .get(1)
        .and_then(|s| s.parse().ok())
        .or_else(|| std::env::var("WEFT_ECHO_PORT").ok()?.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let host = args.get(2).map(String::as_str).unwrap_or("");

    let accept_loop = match server(host, port, upper_echo) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("cannot listen on {}:{}: {}", host, port, e);
            std::process::exit(1);
        }
    };
    println!("weft-echo listening on port {}", port);

    if let Err(e) = Runtime::from_env().run(accept_loop) {
        eprintln!("server stopped: {}", e);
        std::process::exit(1);
    }
}
