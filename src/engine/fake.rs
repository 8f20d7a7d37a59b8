//! Scripted in-memory `JobApi` for tests.

use crate::engine::{ChunkStream, JobApi};
use crate::errors::JobError;
use crate::model::{JobDescriptor, StatusReply};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// How the next `/run` call should answer.
pub(crate) enum RunScript {
    /// Reply immediately with these chunks, then close the stream.
    Chunks(Vec<Result<Bytes, JobError>>),
    /// Reply with a stream fed by the test through the returned sender.
    Live(mpsc::UnboundedReceiver<Result<Bytes, JobError>>),
    /// Fail before any response arrives.
    Fail(JobError),
}

/// How the next `/stop` or `/status` call should answer.
pub(crate) enum Reply<T> {
    Now(Result<T, JobError>),
    /// Answer once the test sends through the paired sender.
    Held(oneshot::Receiver<Result<T, JobError>>),
    /// Never answer.
    Hang,
}

impl<T: Send + 'static> Reply<T> {
    fn into_future(self) -> BoxFuture<'static, Result<T, JobError>> {
        match self {
            Reply::Now(reply) => async move { reply }.boxed(),
            Reply::Held(rx) => async move {
                rx.await
                    .unwrap_or_else(|_| Err(JobError::Transport("reply dropped".into())))
            }
            .boxed(),
            Reply::Hang => futures::future::pending().boxed(),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeJobApi {
    runs: Mutex<VecDeque<RunScript>>,
    stops: Mutex<VecDeque<Reply<String>>>,
    statuses: Mutex<VecDeque<Reply<StatusReply>>>,
    pub run_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub descriptors: Mutex<Vec<String>>,
}

impl FakeJobApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_run(&self, script: RunScript) {
        self.runs.lock().unwrap().push_back(script);
    }

    /// Script a run whose chunks the test pushes by hand.
    pub fn script_live_run(&self) -> mpsc::UnboundedSender<Result<Bytes, JobError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script_run(RunScript::Live(rx));
        tx
    }

    pub fn script_stop(&self, reply: Result<String, JobError>) {
        self.stops.lock().unwrap().push_back(Reply::Now(reply));
    }

    /// Script a stop whose reply the test releases by hand.
    pub fn script_held_stop(&self) -> oneshot::Sender<Result<String, JobError>> {
        let (tx, rx) = oneshot::channel();
        self.stops.lock().unwrap().push_back(Reply::Held(rx));
        tx
    }

    pub fn script_status(&self, reply: Result<StatusReply, JobError>) {
        self.statuses.lock().unwrap().push_back(Reply::Now(reply));
    }

    /// Script a status query that never completes.
    pub fn script_hung_status(&self) {
        self.statuses.lock().unwrap().push_back(Reply::Hang);
    }

    pub fn runs(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl JobApi for FakeJobApi {
    fn run(&self, descriptor: &JobDescriptor) -> BoxFuture<'static, Result<ChunkStream, JobError>> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        self.descriptors
            .lock()
            .unwrap()
            .push(descriptor.as_str().to_string());
        let script = self
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunScript::Chunks(Vec::new()));
        async move {
            match script {
                RunScript::Chunks(chunks) => Ok(futures::stream::iter(chunks).boxed()),
                RunScript::Live(mut rx) => Ok(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()),
                RunScript::Fail(e) => Err(e),
            }
        }
        .boxed()
    }

    fn stop(&self) -> BoxFuture<'static, Result<String, JobError>> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .stops
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Now(Ok("Process terminated".to_string())));
        reply.into_future()
    }

    fn status(&self) -> BoxFuture<'static, Result<StatusReply, JobError>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Now(Err(JobError::Transport("no scripted status".into()))));
        reply.into_future()
    }
}
