//! Run-window session.
//!
//! Translates presentation-layer commands into controller operations and
//! reports their outcomes back as short notices. Every operation runs as its
//! own future so a stop can overlap a start that is still connecting.

use crate::context::JobContext;
use crate::errors::JobError;
use crate::model::{StartOutcome, StopOutcome};
use crate::orchestrator::controller::ControllerHandle;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by UI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UiCommand {
    Run,
    Stop,
    /// Stop (if running), then close the run window.
    Cancel,
    ClearOutput,
}

/// Messages for the UI that are not part of the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionNotice {
    Info(String),
    /// The stop attempt of a cancel has finished; the view should close.
    Close,
}

enum Finished {
    Op(String),
    Cancelled,
}

pub(crate) async fn run_session(
    controller: ControllerHandle,
    ctx: &JobContext,
    notice_tx: UnboundedSender<SessionNotice>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut in_flight: FuturesUnordered<BoxFuture<'static, Finished>> = FuturesUnordered::new();
    let mut closing = false;
    // Stop can hang on a wedged server; keep the user informed meanwhile.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    let info = |msg: String| {
        let _ = notice_tx.send(SessionNotice::Info(msg));
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !closing => {
                match cmd {
                    Some(UiCommand::Run) => {
                        let c = controller.clone();
                        let descriptor = ctx.descriptor();
                        info(format!("Starting {descriptor}…"));
                        in_flight.push(async move {
                            Finished::Op(match c.start(descriptor.clone()).await {
                                Ok(StartOutcome::Started) => format!("Running {descriptor}"),
                                Ok(StartOutcome::AlreadyRunning) => "A job is already running".into(),
                                Err(e) => format!("Start failed: {e}"),
                            })
                        }.boxed());
                    }
                    Some(UiCommand::Stop) => {
                        let c = controller.clone();
                        in_flight.push(async move {
                            Finished::Op(describe_stop(c.stop().await))
                        }.boxed());
                    }
                    Some(UiCommand::Cancel) | None => {
                        closing = true;
                        info("Stopping…".into());
                        cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        let c = controller.clone();
                        let close_tx = notice_tx.clone();
                        in_flight.push(async move {
                            let res = c.cancel(|| {
                                let _ = close_tx.send(SessionNotice::Close);
                            }).await;
                            if let Err(e) = res {
                                tracing::warn!(error = %e, "stop before close failed");
                            }
                            Finished::Cancelled
                        }.boxed());
                    }
                    Some(UiCommand::ClearOutput) => {
                        if controller.clear_output().is_err() {
                            info("Controller is gone".into());
                        }
                    }
                }
            }
            Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                match done {
                    Finished::Op(msg) => info(msg),
                    Finished::Cancelled => break,
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline {
                        info("Still stopping…".into());
                        cancel_deadline = None;
                    }
                }
            }
        }
    }

    Ok(())
}

fn describe_stop(res: Result<StopOutcome, JobError>) -> String {
    match res {
        Ok(StopOutcome::Stopped { message }) => format!("Stopped: {}", message.trim()),
        Ok(StopOutcome::NotRunning) => "Nothing is running".into(),
        Err(e) => format!("Stop failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeJobApi;
    use crate::model::RunPhase;
    use crate::orchestrator::controller::spawn_controller;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn cancel_stops_the_job_then_closes() {
        let api = FakeJobApi::new();
        let _live = api.script_live_run();
        let (handle, _events, _task) = spawn_controller(api.clone(), false);
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctx = JobContext::default();

        let session_handle = handle.clone();
        let session = tokio::spawn(async move {
            run_session(session_handle, &ctx, notice_tx, cmd_rx).await
        });

        cmd_tx.send(UiCommand::Run).unwrap();
        let mut rx = handle.subscribe();
        timeout(Duration::from_secs(2), rx.wait_for(|s| s.phase() == RunPhase::Running))
            .await
            .unwrap()
            .unwrap();
        cmd_tx.send(UiCommand::Cancel).unwrap();

        timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let mut notices = Vec::new();
        while let Ok(n) = notice_rx.try_recv() {
            notices.push(n);
        }
        assert!(notices.contains(&SessionNotice::Close));
        assert_eq!(api.stops(), 1);
        assert_eq!(handle.phase(), RunPhase::Stopped);
    }

    #[tokio::test]
    async fn cancel_while_idle_closes_without_stop_request() {
        let api = FakeJobApi::new();
        let (handle, _events, _task) = spawn_controller(api.clone(), false);
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctx = JobContext::default();

        cmd_tx.send(UiCommand::Cancel).unwrap();
        timeout(
            Duration::from_secs(2),
            run_session(handle, &ctx, notice_tx, cmd_rx),
        )
        .await
        .unwrap()
        .unwrap();

        let mut saw_close = false;
        while let Ok(n) = notice_rx.try_recv() {
            saw_close |= n == SessionNotice::Close;
        }
        assert!(saw_close);
        assert_eq!(api.stops(), 0);
    }

    #[test]
    fn stop_outcomes_read_naturally() {
        assert_eq!(
            describe_stop(Ok(StopOutcome::Stopped {
                message: "Process terminated\n".into()
            })),
            "Stopped: Process terminated"
        );
        assert_eq!(describe_stop(Ok(StopOutcome::NotRunning)), "Nothing is running");
        assert_eq!(
            describe_stop(Err(JobError::Transport("refused".into()))),
            "Stop failed: refused"
        );
    }
}
