//! Accept loop spawning one task per connection

use std::future::Future;

use weft_core::{kdebug, kinfo, kwarn, TaskError, TaskResult};
use weft_runtime::{Connection, Listener, Task};

use crate::spawn;

/// Bind `host:port` now and return the accept loop to run as a task
///
/// Binding eagerly surfaces address errors before the run starts. Each
/// accepted connection is handed to `handler` in a task of its own; the
/// connection closes when that task ends.
pub fn server<H, F, T>(
    host: &str,
    port: u16,
    handler: H,
) -> TaskResult<impl Future<Output = TaskResult<()>> + 'static>
where
    H: Fn(Connection) -> F + 'static,
    F: Future<Output = TaskResult<T>> + 'static,
    T: 'static,
{
    let listener = Listener::bind(host, port)?;
    Ok(serve(listener, handler))
}

/// Accept connections from `listener` forever, one handler task each
///
/// When the task limit is reached the new connection is closed and the loop
/// keeps accepting. Returns only when accepting itself fails with an OS
/// error.
pub async fn serve<H, F, T>(listener: Listener, handler: H) -> TaskResult<()>
where
    H: Fn(Connection) -> F + 'static,
    F: Future<Output = TaskResult<T>> + 'static,
    T: 'static,
{
    kinfo!("serving on {}", listener.local_addr());
    loop {
        let conn = listener.accept().await?;
        let peer = conn.peer_addr();
        // a refused task is dropped with its connection
        match spawn(Task::new(handler(conn)).with_name(peer.to_string())).await {
            Ok(id) => kdebug!("connection from {} handled by {}", peer, id),
            Err(TaskError::TooManyTasks(limit)) => {
                kwarn!("refusing {}: {} tasks running", peer, limit)
            }
            Err(e) => return Err(e),
        }
    }
}
