use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_JOB_FILE: &str = "graph.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Clear the transcript whenever a new run starts instead of appending to it.
    #[serde(default)]
    pub clear_on_start: bool,
    pub user_agent: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(1),
            clear_on_start: false,
            user_agent: format!("job-runner/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Opaque name of the job to run (a filename on the server side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDescriptor(String);

impl JobDescriptor {
    pub fn new(file: impl Into<String>) -> Self {
        Self(file.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Stopped,
    Failed,
}

impl RunPhase {
    pub fn is_running(self) -> bool {
        self == RunPhase::Running
    }

    pub fn label(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Stopped => "stopped",
            RunPhase::Failed => "failed",
        }
    }
}

/// Body of `POST /run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest<'a> {
    pub file: &'a str,
}

/// Body of a successful `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub running: bool,
}

/// What observers can read at any time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    pub phase: RunPhase,
    pub output: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run is already believed active; no request was issued.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { message: String },
    /// Nothing was running; no request was issued.
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
}

/// Events emitted by the controller for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    PhaseChanged { phase: RunPhase },
    /// Text appended to the transcript, in append order.
    Output(String),
    /// User-visible failure description (start or stop failure).
    Alert(String),
    /// The current run's output stream ended.
    RunFinished { outcome: RunOutcome },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_serializes_file_field() {
        let body = serde_json::to_string(&RunRequest { file: "graph.json" }).unwrap();
        assert_eq!(body, r#"{"file":"graph.json"}"#);
    }

    #[test]
    fn status_reply_requires_running_flag() {
        let ok: StatusReply = serde_json::from_str(r#"{"running": true}"#).unwrap();
        assert!(ok.running);
        assert!(serde_json::from_str::<StatusReply>(r#"{"state": "up"}"#).is_err());
    }

    #[test]
    fn config_reads_humantime_interval() {
        let cfg: ControllerConfig = serde_json::from_str(
            r#"{"base_url":"http://localhost:5000","poll_interval":"250ms","user_agent":"t"}"#,
        )
        .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert!(!cfg.clear_on_start);
    }
}
