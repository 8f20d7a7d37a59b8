//! Failures of the job-server operations.
//!
//! Each variant maps onto one class of the error taxonomy: the request never
//! completed (`Transport`), the server answered but said no (`Protocol`), or
//! the reply could not be understood (`MalformedStatus`, handled like a
//! transport failure).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("{0}")]
    Transport(String),

    #[error("{endpoint} rejected with status {status}: {body}")]
    Protocol {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("malformed status reply: {0}")]
    MalformedStatus(String),

    #[error("execution controller is no longer running")]
    ControllerClosed,
}

impl JobError {
    /// True for the failures that mean "the server could not be asked",
    /// as opposed to "the server answered with a refusal".
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            JobError::Transport(_) | JobError::MalformedStatus(_) | JobError::ControllerClosed
        )
    }
}

impl From<reqwest::Error> for JobError {
    fn from(e: reqwest::Error) -> Self {
        JobError::Transport(e.to_string())
    }
}
