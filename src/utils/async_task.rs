use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, at most `policy.max_retries` times.
///
/// Each attempt is bounded by `policy.timeout_ms`. The delay between attempts
/// starts at `base_delay_ms` and doubles up to `max_delay_ms`. Terminal errors
/// (see [`Error::is_terminal`]) are returned immediately.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    mut task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: FnMut() -> T,
    T: std::future::Future<Output = Result<P>>,
{
    let mut retries = 0;
    let mut current_delay = Duration::from_millis(policy.base_delay_ms);
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let max_retries = policy.max_retries;

    let mut last_error = Error::RetryTaskFailed("Task failed after max retries".to_string());
    while retries < max_retries {
        debug!("Attempt {} of {}", retries + 1, max_retries);
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => {
                return Ok(r);
            }
            Ok(Err(e)) if e.is_terminal() => {
                debug!("terminal error, giving up: {}", e);
                return Err(e);
            }
            Ok(Err(e)) => {
                warn!("attempt failed: {}", e);
                last_error = e;
            }
            Err(_) => {
                warn!("Task timed out after {:?}", timeout_duration);
                last_error = Error::RetryTimeoutError;
            }
        };

        retries += 1;
        if retries < max_retries {
            debug!("Retrying in {:?}...", current_delay);
            sleep(current_delay).await;
            current_delay = (current_delay * 2).min(max_delay);
        } else {
            warn!("Task failed after {} retries", retries);
        }
    }
    Err(last_error)
}

/// Spawns a named background task, logging its failure.
pub fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<tokio::task::JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
