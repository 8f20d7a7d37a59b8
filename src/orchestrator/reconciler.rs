//! Status reconciler.
//!
//! Polls `/status` on a fixed period and pushes the server's answer into the
//! controller, so the local phase recovers from missed stream endings and
//! picks up jobs started before this client attached.

use crate::engine::JobApi;
use crate::orchestrator::controller::ControllerHandle;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Owns the poll task; dropping it (or calling [`PollHandle::cancel`]) stops
/// further ticks.
pub(crate) struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        // Dropping a JoinHandle does not stop the task; abort it explicitly.
        self.task.abort();
    }
}

/// Poll `/status` every `period` and feed the answer to the controller.
///
/// Each tick issues its own query; a slow or hung one never holds back the
/// next tick. Replies are numbered by tick and an answer older than one
/// already applied is dropped.
pub(crate) fn spawn_status_reconciler<A: JobApi>(
    api: Arc<A>,
    controller: ControllerHandle,
    period: Duration,
) -> PollHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = FuturesUnordered::new();
        let mut next_seq: u64 = 0;
        let mut applied: Option<u64> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let seq = next_seq;
                    next_seq += 1;
                    let query = api.status();
                    in_flight.push(async move { (seq, query.await) });
                    if in_flight.len() > 1 {
                        tracing::debug!(outstanding = in_flight.len(), "status polls overlapping");
                    }
                }
                Some((seq, res)) = in_flight.next(), if !in_flight.is_empty() => match res {
                    Ok(reply) => {
                        if applied.is_some_and(|last| seq < last) {
                            tracing::trace!(seq, "dropping out-of-date status reply");
                            continue;
                        }
                        applied = Some(seq);
                        tracing::trace!(seq, running = reply.running, "status poll");
                        if controller.reconcile(reply.running).is_err() {
                            tracing::debug!("controller gone, stopping status polls");
                            break;
                        }
                    }
                    // Unknown is not "not running": leave the phase alone.
                    Err(e) => {
                        tracing::warn!(seq, error = %e, transport = e.is_transport(), "status poll failed");
                    }
                },
            }
        }
    });
    PollHandle { task }
}
