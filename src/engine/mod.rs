//! Job-server contract.
//!
//! The controller only ever talks to a [`JobApi`]; production uses
//! [`HttpJobApi`], tests substitute a scripted fake.

mod decode;
#[cfg(test)]
pub(crate) mod fake;
mod http;

use crate::errors::JobError;
use crate::model::{JobDescriptor, StatusReply};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

pub use decode::Utf8ChunkDecoder;
pub use http::HttpJobApi;

/// Live body of a `/run` reply, one item per received chunk.
pub type ChunkStream = BoxStream<'static, Result<Bytes, JobError>>;

/// Operations offered by the job-execution server.
///
/// Futures are `'static` so callers can keep several requests in flight
/// without borrowing the API object.
pub trait JobApi: Send + Sync + 'static {
    /// Start `descriptor` and hand back the streaming output.
    fn run(&self, descriptor: &JobDescriptor) -> BoxFuture<'static, Result<ChunkStream, JobError>>;

    /// Ask the server to terminate the current job; yields its reply text.
    fn stop(&self) -> BoxFuture<'static, Result<String, JobError>>;

    /// Query whether a job is currently running on the server.
    fn status(&self) -> BoxFuture<'static, Result<StatusReply, JobError>>;
}
