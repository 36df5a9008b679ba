use tokio::task::spawn_blocking;

use crate::error::HandlerError;

/// Runs CPU-bound work on the blocking pool so the connection task keeps
/// servicing its queues. The closure's panic surfaces as an internal error
/// instead of taking the connection down.
pub async fn offload<T, F>(work: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(work)
        .await
        .map_err(|err| HandlerError::Internal(anyhow::anyhow!(err)))
}
