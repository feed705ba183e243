use crate::core::{Result, StoreError};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run an adapter future unless `token` is cancelled first.
///
/// A future that settles after its store or record was torn down has its
/// output dropped: the caller gets `Cancelled` and applies nothing.
pub(crate) async fn guard<F, T>(token: &CancellationToken, operation: &str, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    let output = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = future => Some(output),
    };
    match output {
        Some(output) if !token.is_cancelled() => Ok(output),
        _ => {
            log::debug!("discarding '{}' result: owner was destroyed", operation);
            Err(StoreError::Cancelled(operation.to_string()))
        }
    }
}
