//! Cooperative polling loop.
//!
//! Shutdown is observed between items only: a `process` call that has started
//! always runs to completion.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emit;
use crate::metrics::events::{IterationCompleted, IterationDuration, IterationResultType};

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// An item was processed; poll again immediately.
    ProcessedItems,
    /// Nothing to do; wait for the poll interval.
    NoItems,
    /// The processor asked the loop to stop.
    Shutdown,
}

/// A unit of work driven by [`run_polling_loop`].
#[async_trait]
pub trait PollingProcessor {
    /// State handed from `prepare` to `process`.
    type State: Send;
    type Error: std::error::Error + Send;

    /// Look for work. `None` means idle.
    ///
    /// `cold_start` is true on the first iteration only.
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error>;

    /// Handle the prepared item.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;
}

/// Drive `processor` until `shutdown` is cancelled or it returns an error.
///
/// After an idle iteration the loop waits `poll_interval`; after a productive
/// one it polls again straight away. Waiting and `prepare` are both abandoned
/// on shutdown; `process` is not.
pub async fn run_polling_loop<P: PollingProcessor + Send>(
    processor: &mut P,
    poll_interval: Duration,
    shutdown: CancellationToken,
    name: &str,
    service: &'static str,
) -> Result<(), P::Error> {
    let mut cold_start = true;

    while !shutdown.is_cancelled() {
        let iteration_start = Instant::now();

        let state = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(target = name, "Shutdown requested while polling");
                break;
            }

            result = processor.prepare(cold_start) => result?,
        };
        cold_start = false;

        let result = match state {
            Some(state) => processor.process(state).await?,
            None => IterationResult::NoItems,
        };

        let result_type = match result {
            IterationResult::Shutdown => break,
            IterationResult::ProcessedItems => IterationResultType::Processed,
            IterationResult::NoItems => IterationResultType::NoItems,
        };
        emit!(IterationCompleted {
            service,
            result: result_type,
            target: name.to_string(),
        });
        emit!(IterationDuration {
            service,
            duration: iteration_start.elapsed(),
            target: name.to_string(),
        });

        if result == IterationResult::NoItems {
            debug!(
                target = name,
                "Nothing to do, waiting {}s before next poll",
                poll_interval.as_secs()
            );
            if shutdown
                .run_until_cancelled(tokio::time::sleep(poll_interval))
                .await
                .is_none()
            {
                info!(target = name, "Shutdown requested during poll wait");
                break;
            }
        }
    }

    Ok(())
}
