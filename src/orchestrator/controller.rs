//! Execution controller.
//!
//! One task owns the run phase and the transcript. Start/stop requests, the
//! chunks of every open `/run` stream and status reconciliations all arrive
//! at that task and are applied one at a time, so there is never more than a
//! single writer. Callers hold a cloneable [`ControllerHandle`].

use crate::engine::{ChunkStream, JobApi, Utf8ChunkDecoder};
use crate::errors::JobError;
use crate::model::{
    ControllerEvent, JobDescriptor, RunOutcome, RunPhase, RunSnapshot, StartOutcome, StopOutcome,
};
use crate::orchestrator::state::RunState;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, FuturesUnordered, SelectAll};
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};

type RunId = u64;

enum ControlCommand {
    Start {
        descriptor: JobDescriptor,
        reply: oneshot::Sender<Result<StartOutcome, JobError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<StopOutcome, JobError>>,
    },
    Reconcile {
        running: bool,
    },
    ClearOutput,
}

enum StreamItem {
    Chunk(Result<Bytes, JobError>),
    End,
}

/// A request issued by the controller that has come back.
enum Completion {
    Opened {
        run_id: RunId,
        result: Result<ChunkStream, JobError>,
        reply: oneshot::Sender<Result<StartOutcome, JobError>>,
    },
    StopReplied {
        /// The run that was current when the stop was issued.
        target: Option<RunId>,
        result: Result<String, JobError>,
        reply: oneshot::Sender<Result<StopOutcome, JobError>>,
    },
}

/// Caller side of the controller. Cheap to clone.
#[derive(Clone)]
pub(crate) struct ControllerHandle {
    cmd_tx: UnboundedSender<ControlCommand>,
    state_rx: watch::Receiver<RunState>,
}

impl ControllerHandle {
    /// Start `descriptor` unless a run is already active.
    ///
    /// Resolves once the server has accepted the request (or refused it);
    /// output keeps streaming into the transcript afterwards.
    pub async fn start(&self, descriptor: JobDescriptor) -> Result<StartOutcome, JobError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::Start { descriptor, reply })?;
        rx.await.map_err(|_| JobError::ControllerClosed)?
    }

    /// Ask the server to stop the running job. No request is made when
    /// nothing is running.
    pub async fn stop(&self) -> Result<StopOutcome, JobError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlCommand::Stop { reply })?;
        rx.await.map_err(|_| JobError::ControllerClosed)?
    }

    /// Attempt a stop, then close the view whatever the stop returned.
    pub async fn cancel<F: FnOnce()>(&self, close: F) -> Result<StopOutcome, JobError> {
        let res = self.stop().await;
        close();
        res
    }

    pub fn clear_output(&self) -> Result<(), JobError> {
        self.send(ControlCommand::ClearOutput)
    }

    pub(crate) fn reconcile(&self, running: bool) -> Result<(), JobError> {
        self.send(ControlCommand::Reconcile { running })
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.state_rx.borrow().snapshot()
    }

    pub fn phase(&self) -> RunPhase {
        self.state_rx.borrow().phase()
    }

    /// Watch the phase and transcript; `borrow()` reads without copying.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_rx.clone()
    }

    fn send(&self, cmd: ControlCommand) -> Result<(), JobError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| JobError::ControllerClosed)
    }
}

pub(crate) struct ExecutionController<A: JobApi> {
    api: Arc<A>,
    clear_on_start: bool,
    state_tx: watch::Sender<RunState>,
    event_tx: UnboundedSender<ControllerEvent>,
    streams: SelectAll<BoxStream<'static, (RunId, StreamItem)>>,
    decoders: HashMap<RunId, Utf8ChunkDecoder>,
    completions: FuturesUnordered<BoxFuture<'static, Completion>>,
    next_run_id: RunId,
    current_run: Option<RunId>,
}

/// Spawn the controller task.
///
/// The task exits once every [`ControllerHandle`] has been dropped.
pub(crate) fn spawn_controller<A: JobApi>(
    api: Arc<A>,
    clear_on_start: bool,
) -> (
    ControllerHandle,
    UnboundedReceiver<ControllerEvent>,
    tokio::task::JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(RunState::default());

    let controller = ExecutionController {
        api,
        clear_on_start,
        state_tx,
        event_tx,
        streams: SelectAll::new(),
        decoders: HashMap::new(),
        completions: FuturesUnordered::new(),
        next_run_id: 1,
        current_run: None,
    };
    let handle = tokio::spawn(controller.run(cmd_rx));

    (ControllerHandle { cmd_tx, state_rx }, event_rx, handle)
}

impl<A: JobApi> ExecutionController<A> {
    async fn run(mut self, mut cmd_rx: UnboundedReceiver<ControlCommand>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(done) = self.completions.next(), if !self.completions.is_empty() => {
                    self.handle_completion(done);
                }
                Some((run_id, item)) = self.streams.next(), if !self.streams.is_empty() => {
                    self.handle_stream_item(run_id, item);
                }
            }
        }
        tracing::debug!(
            open_streams = self.streams.len(),
            "execution controller shutting down"
        );
    }

    fn handle_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Start { descriptor, reply } => self.start(descriptor, reply),
            ControlCommand::Stop { reply } => self.stop(reply),
            ControlCommand::Reconcile { running } => self.reconcile(running),
            ControlCommand::ClearOutput => self.state_tx.send_modify(RunState::clear_output),
        }
    }

    fn start(
        &mut self,
        descriptor: JobDescriptor,
        reply: oneshot::Sender<Result<StartOutcome, JobError>>,
    ) {
        let clear = self.clear_on_start;
        if !self.state_tx.send_if_modified(|s| s.begin_run(clear)) {
            tracing::debug!(job = %descriptor, "start ignored, a run is already active");
            let _ = reply.send(Ok(StartOutcome::AlreadyRunning));
            return;
        }
        self.emit(ControllerEvent::PhaseChanged {
            phase: RunPhase::Running,
        });

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        self.current_run = Some(run_id);
        tracing::info!(job = %descriptor, run_id, "starting job");

        let open = self.api.run(&descriptor);
        self.completions.push(
            async move {
                Completion::Opened {
                    run_id,
                    result: open.await,
                    reply,
                }
            }
            .boxed(),
        );
    }

    fn stop(&mut self, reply: oneshot::Sender<Result<StopOutcome, JobError>>) {
        if !self.state_tx.borrow().phase().is_running() {
            let _ = reply.send(Ok(StopOutcome::NotRunning));
            return;
        }
        let target = self.current_run;
        tracing::info!(run_id = ?target, "requesting stop");
        let request = self.api.stop();
        self.completions.push(
            async move {
                Completion::StopReplied {
                    target,
                    result: request.await,
                    reply,
                }
            }
            .boxed(),
        );
    }

    fn reconcile(&mut self, server_running: bool) {
        let mut changed = None;
        self.state_tx.send_if_modified(|s| {
            changed = s.reconcile(server_running);
            changed.is_some()
        });
        if let Some(phase) = changed {
            tracing::info!(server_running, phase = phase.label(), "phase reconciled with server");
            self.emit(ControllerEvent::PhaseChanged { phase });
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Opened {
                run_id,
                result: Ok(stream),
                reply,
            } => {
                tracing::debug!(run_id, "output stream opened");
                self.decoders.insert(run_id, Utf8ChunkDecoder::new());
                let tagged = stream
                    .map(StreamItem::Chunk)
                    .chain(futures::stream::once(async { StreamItem::End }))
                    .map(move |item| (run_id, item))
                    .boxed();
                self.streams.push(tagged);
                let _ = reply.send(Ok(StartOutcome::Started));
            }
            Completion::Opened {
                run_id,
                result: Err(e),
                reply,
            } => {
                tracing::warn!(run_id, error = %e, "start request failed");
                if self.current_run == Some(run_id) {
                    self.current_run = None;
                    self.fail_run(&e);
                }
                let _ = reply.send(Err(e));
            }
            Completion::StopReplied {
                target,
                result: Ok(message),
                reply,
            } => {
                let applies = target == self.current_run
                    && self.state_tx.borrow().phase().is_running();
                tracing::info!(reply = %message.trim(), run_id = ?target, applies, "stop acknowledged");
                let mut text = String::new();
                if applies {
                    self.state_tx
                        .send_modify(|s| text = s.apply_stop_success(&message));
                } else {
                    // The run it targeted is already over; record the reply only.
                    self.state_tx
                        .send_modify(|s| text = s.append_stop_reply(&message));
                }
                self.emit(ControllerEvent::Output(text));
                if applies {
                    self.emit(ControllerEvent::PhaseChanged {
                        phase: RunPhase::Stopped,
                    });
                }
                let _ = reply.send(Ok(StopOutcome::Stopped { message }));
            }
            Completion::StopReplied {
                target: _,
                result: Err(e),
                reply,
            } => {
                tracing::warn!(error = %e, "stop request failed");
                let mut line = String::new();
                self.state_tx
                    .send_modify(|s| line = s.record_stop_failure(&e));
                self.emit(ControllerEvent::Output(line));
                self.emit(ControllerEvent::Alert(e.to_string()));
                let _ = reply.send(Err(e));
            }
        }
    }

    fn handle_stream_item(&mut self, run_id: RunId, item: StreamItem) {
        match item {
            StreamItem::Chunk(Ok(bytes)) => {
                let Some(decoder) = self.decoders.get_mut(&run_id) else {
                    tracing::debug!(run_id, "dropping chunk from a failed stream");
                    return;
                };
                let text = decoder.decode(&bytes);
                self.append(text);
            }
            StreamItem::Chunk(Err(e)) => {
                let Some(mut decoder) = self.decoders.remove(&run_id) else {
                    return;
                };
                self.append(decoder.finish());
                tracing::warn!(run_id, error = %e, "output stream failed");
                let is_current = self.current_run == Some(run_id);
                if is_current && self.state_tx.borrow().phase().is_running() {
                    self.current_run = None;
                    self.fail_run(&e);
                    self.emit(ControllerEvent::RunFinished {
                        outcome: RunOutcome::Failed(e.to_string()),
                    });
                } else {
                    // Stream of a run the controller already left behind.
                    let mut line = String::new();
                    self.state_tx
                        .send_modify(|s| line = s.append_diagnostic(&e));
                    self.emit(ControllerEvent::Output(line));
                    if is_current {
                        self.current_run = None;
                        self.emit(ControllerEvent::RunFinished {
                            outcome: RunOutcome::Failed(e.to_string()),
                        });
                    }
                }
            }
            StreamItem::End => {
                let Some(mut decoder) = self.decoders.remove(&run_id) else {
                    return;
                };
                if decoder.has_pending() {
                    tracing::debug!(run_id, "stream ended inside a multi-byte character");
                }
                self.append(decoder.finish());
                tracing::info!(run_id, "output stream closed");
                if self.current_run == Some(run_id) {
                    self.current_run = None;
                    if self.state_tx.send_if_modified(RunState::finish_stream) {
                        self.emit(ControllerEvent::PhaseChanged {
                            phase: RunPhase::Stopped,
                        });
                    }
                    self.emit(ControllerEvent::RunFinished {
                        outcome: RunOutcome::Completed,
                    });
                }
            }
        }
    }

    fn append(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.state_tx.send_modify(|s| s.append_output(&text));
        self.emit(ControllerEvent::Output(text));
    }

    fn fail_run(&mut self, err: &JobError) {
        let mut line = String::new();
        self.state_tx.send_modify(|s| line = s.fail_run(err));
        self.emit(ControllerEvent::Output(line));
        self.emit(ControllerEvent::PhaseChanged {
            phase: RunPhase::Failed,
        });
        self.emit(ControllerEvent::Alert(err.to_string()));
    }

    fn emit(&self, ev: ControllerEvent) {
        let _ = self.event_tx.send(ev);
    }
}
