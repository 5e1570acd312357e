use std::future::Future;

use tokio::task::JoinHandle;

/// Single seam for spawning background work, so a different runtime can be
/// swapped in without touching call sites.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}
