use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use crate::readiness::ReadyWatcher;

/// Reads one of the tail process's pipes line-by-line, feeding the shared
/// watcher until the stream closes. Read errors end the task the same way
/// EOF does: completing as many lines as possible beats surfacing a
/// transient pipe error, and a leftover capturer dies harmlessly once the
/// tail process is killed and its pipes close.
pub(crate) fn spawn_capture<R>(stream: R, watcher: ReadyWatcher) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            watcher.observe(line).await;
        }
    })
}
