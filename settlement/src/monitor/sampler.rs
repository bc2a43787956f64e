//! Per-session sampling task

use super::Inner;
use crate::{config::MonitorConfig, types::SessionId};
use std::sync::Weak;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to a running sampler
#[derive(Debug)]
pub(super) struct SamplerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Signal the task to finish after its current tick
    pub(super) fn stop(self) {
        if self.stop.send(()).is_err() {
            // Task already gone
            self.task.abort();
        }
    }

    /// Whether the task is still running
    pub(super) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Spawn the sampling loop for one session.
///
/// The task holds only a weak reference to the monitor and exits when the
/// monitor is dropped, when stopped, or when its handle is dropped.
pub(super) fn spawn(monitor: Weak<Inner>, session_id: SessionId, config: MonitorConfig) -> SamplerHandle {
    let (stop, mut stop_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        info!("Sampling session {} every {}ms", session_id, config.sampling_interval_ms);

        let mut interval = tokio::time::interval(config.sampling_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    debug!("Sampler for session {} stopped", session_id);
                    break;
                }
                _ = interval.tick() => {
                    let Some(inner) = monitor.upgrade() else {
                        break;
                    };
                    // Failures are retried on the next tick
                    if let Err(e) = inner.sample(&session_id, &config).await {
                        warn!("Sampling session {} failed: {}", session_id, e);
                    }
                }
            }
        }
    });

    SamplerHandle { stop, task }
}
