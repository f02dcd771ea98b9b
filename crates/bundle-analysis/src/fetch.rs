//! A bounded, cancellable fetch coordinator.
//!
//! One task per item, admitted by a semaphore so at most `limit` workers run
//! at once, reporting over a shared completion channel to a single
//! collector. Results carry the item's submission index so callers can
//! restore the original order; completion order is not meaningful.

use crate::error::AnalysisError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs `worker` over every item with at most `limit` in flight.
///
/// Failure policy: an item failure is collected, not propagated, and the
/// rest of the batch keeps running. The call as a whole fails only when it
/// was cancelled ([`AnalysisError::Cancelled`]) or when every item failed
/// ([`AnalysisError::Aggregate`], carrying one cause per item). Cancelled
/// items never pollute the aggregate.
///
/// Successes come back as `(index, output)` pairs in completion order.
pub async fn fetch_all<T, U, W, F>(
    items: Vec<T>,
    limit: usize,
    cancel: CancellationToken,
    worker: W,
) -> Result<Vec<(usize, U)>, AnalysisError>
where
    T: Send + 'static,
    U: Send + 'static,
    W: Fn(T) -> F + Clone + Send + 'static,
    F: Future<Output = Result<U, AnalysisError>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(limit));
    let (tx, mut rx) = mpsc::channel(total);

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let tx = tx.clone();
        let worker = worker.clone();

        tokio::spawn(async move {
            if cancel.is_cancelled() {
                let _ = tx.send((index, Err(AnalysisError::Cancelled))).await;
                return;
            }

            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    let _ = tx.send((index, Err(AnalysisError::Cancelled))).await;
                    return;
                }
            };
            // The semaphore is never closed while senders are alive.
            let _permit = match permit {
                Ok(p) => p,
                Err(_) => return,
            };

            let result = tokio::select! {
                result = worker(item) => result,
                _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
            };
            let _ = tx.send((index, result)).await;
        });
    }
    // The collector loop ends when the last worker's clone drops.
    drop(tx);

    let mut successes = Vec::new();
    let mut causes = Vec::new();
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(output) => successes.push((index, output)),
            Err(AnalysisError::Cancelled) => (),
            Err(err) => {
                debug!(index, %err, "Fetch item failed");
                causes.push(err.to_string());
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }
    if successes.is_empty() && !causes.is_empty() {
        return Err(AnalysisError::Aggregate { causes });
    }

    Ok(successes)
}
