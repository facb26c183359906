/// Periodic task runner with a consecutive-failure breaker
///
/// Runs one iteration per tick until shutdown is signalled or the task fails
/// too many times in a row. The caller decides what to do when the breaker
/// trips; the loop itself never panics.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Time between iteration starts; the first iteration runs immediately
    pub interval: Duration,
    /// Consecutive failures that stop the loop
    pub max_consecutive_failures: u32,
}

/// Why the loop returned
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    Shutdown,
    TooManyFailures { failures: u32, last_error: String },
}

#[derive(Debug, Default)]
struct FailureCounter {
    consecutive_failures: u32,
}

impl FailureCounter {
    fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    fn reset(&mut self) -> u32 {
        std::mem::take(&mut self.consecutive_failures)
    }
}

/// Run `task_fn` on every tick until `shutdown` flips to true.
pub async fn run_polling_loop<F, Fut>(
    task_name: &str,
    config: PollingConfig,
    mut shutdown: watch::Receiver<bool>,
    mut task_fn: F,
) -> LoopExit
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut counter = FailureCounter::default();

    loop {
        if *shutdown.borrow() {
            info!(task = task_name, "Task stopping on shutdown signal");
            return LoopExit::Shutdown;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                // A dropped sender also means stop
                if changed.is_err() || *shutdown.borrow() {
                    info!(task = task_name, "Task stopping on shutdown signal");
                    return LoopExit::Shutdown;
                }
                continue;
            }
        }

        match task_fn().await {
            Ok(()) => {
                let recovered_from = counter.reset();
                if recovered_from > 0 {
                    warn!(
                        task = task_name,
                        failures = recovered_from,
                        "Task recovered after failures"
                    );
                }
            }
            Err(e) => {
                let failures = counter.record_failure();
                error!(
                    task = task_name,
                    attempt = failures,
                    max = config.max_consecutive_failures,
                    error = %e,
                    "Task iteration failed"
                );

                if failures >= config.max_consecutive_failures {
                    error!(
                        task = task_name,
                        failures,
                        "Task exceeded maximum consecutive failures, stopping"
                    );
                    return LoopExit::TooManyFailures {
                        failures,
                        last_error: e,
                    };
                }
            }
        }
    }
}
