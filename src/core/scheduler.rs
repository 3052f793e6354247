//! Write-back scheduler
//!
//! One task per bank. It sleeps until a wallet is queued, then waits for a
//! quiet period with no further saves before flushing. Continuous activity
//! cannot postpone the flush past the max-wait ceiling measured from the first
//! save of the cycle. With caching disabled there is no quiet period: every
//! save triggers an immediate flush.
//!
//! A failed flush is retried with bounded exponential backoff. Once the retry
//! budget is spent the data stays queued until the next save or shutdown.

use super::bank::Bank;
use crate::config::RetryPolicy;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) async fn run(bank: Bank, cancel: CancellationToken) {
    let config = bank.config().clone();
    let queue = bank.save_queue();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = queue.notified() => {}
        }

        if config.caching_enabled() {
            let deadline = Instant::now() + config.max_flush_wait();
            loop {
                let wake = (Instant::now() + config.flush_interval()).min(deadline);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = queue.notified() => {
                        if Instant::now() >= deadline {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(wake) => break,
                }
            }
        }

        if !flush_with_retry(&bank, &config.retry, &cancel).await {
            return;
        }
    }
}

/// Flush until it succeeds or the retry budget is spent
///
/// Returns `false` when cancelled during a backoff.
async fn flush_with_retry(bank: &Bank, policy: &RetryPolicy, cancel: &CancellationToken) -> bool {
    let mut attempt = 0;
    loop {
        match bank.flush_queue().await {
            Ok(report) => {
                if report.wallets > 0 {
                    tracing::debug!(
                        wallets = report.wallets,
                        entries = report.entries,
                        "flushed save queue"
                    );
                }
                return true;
            }
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "flush failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    attempts = attempt + 1,
                    queued = bank.save_queue().len(),
                    "flush failed, keeping data queued until the next save"
                );
                return true;
            }
        }
    }
}
