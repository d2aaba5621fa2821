//! Background poll loop.
//!
//! Polls the session on a fixed interval. Transport failures back off
//! exponentially up to a ceiling; the first success resets the delay.
//! Paging through large backlogs happens inside a single poll.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actor::SessionHandle;
use crate::config::SyncConfig;
use crate::session::{PollOutcome, SessionError};

/// Delay before the next poll after `failures` consecutive transport failures.
pub fn backoff_delay(failures: u32, interval: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return interval;
    }
    let factor = 1u32.checked_shl(failures.min(16)).unwrap_or(u32::MAX);
    interval.saturating_mul(factor).min(max)
}

/// A running poll loop. Dropping it also stops the loop, without waiting.
pub struct PollLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollLoop {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

pub fn spawn_poll_loop(handle: SessionHandle, config: &SyncConfig) -> PollLoop {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let interval = config.poll_interval();
    let max = config.poll_backoff_max();

    let task = tokio::spawn(async move {
        let mut failures = 0u32;
        loop {
            let delay = backoff_delay(failures, interval, max);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => break,
            }

            match handle.poll_remote().await {
                Ok(outcome) => {
                    if failures > 0 {
                        info!("poll recovered after {} failures", failures);
                    }
                    failures = 0;
                    match outcome {
                        PollOutcome::Merged { version, applied, skipped } => {
                            debug!("poll merged {} ops ({} skipped), now at {}", applied, skipped, version);
                        }
                        PollOutcome::Resynced { version } => {
                            info!("poll resynced to version {}", version);
                        }
                        PollOutcome::UpToDate | PollOutcome::Paused => {}
                    }
                }
                Err(SessionError::Transport(err)) => {
                    failures = failures.saturating_add(1);
                    warn!(
                        "poll failed ({} in a row), next in {:?}: {}",
                        failures,
                        backoff_delay(failures, interval, max),
                        err
                    );
                }
                Err(SessionError::Shutdown) => break,
                Err(err) => warn!("poll failed: {}", err),
            }
        }
        debug!("poll loop stopped");
    });

    PollLoop { shutdown, task }
}
