//! Run phase and transcript, with every allowed transition.
//!
//! No I/O happens here; the controller task decides *when* a transition
//! fires, this type decides *what* it does to the phase and the transcript.

use crate::errors::JobError;
use crate::model::{RunPhase, RunSnapshot};

#[derive(Debug, Default)]
pub(crate) struct RunState {
    phase: RunPhase,
    output: String,
    last_error: Option<String>,
    /// Bumped whenever the transcript is emptied, so readers caching a
    /// prefix of it know to start over.
    clears: u64,
}

fn diagnostic_line(err: &JobError) -> String {
    format!("\nError: {err}")
}

impl RunState {
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    #[cfg_attr(not(feature = "tui"), allow(dead_code))]
    pub fn clears(&self) -> u64 {
        self.clears
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            phase: self.phase,
            output: self.output.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Enter `Running` for a new start request.
    ///
    /// Returns false (and changes nothing) when a run is already active.
    pub fn begin_run(&mut self, clear_output: bool) -> bool {
        if self.phase.is_running() {
            return false;
        }
        if clear_output {
            self.clear_output();
        }
        self.last_error = None;
        self.phase = RunPhase::Running;
        true
    }

    pub fn append_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// The run's stream closed normally.
    pub fn finish_stream(&mut self) -> bool {
        if !self.phase.is_running() {
            return false;
        }
        self.phase = RunPhase::Stopped;
        true
    }

    /// The start request or its stream failed. Returns the transcript line added.
    pub fn fail_run(&mut self, err: &JobError) -> String {
        let line = diagnostic_line(err);
        self.output.push_str(&line);
        self.last_error = Some(err.to_string());
        self.phase = RunPhase::Failed;
        line
    }

    /// Server confirmed the stop. Returns the transcript text added.
    pub fn apply_stop_success(&mut self, message: &str) -> String {
        let text = self.append_stop_reply(message);
        self.phase = RunPhase::Stopped;
        text
    }

    /// Record a stop reply without touching the phase.
    pub fn append_stop_reply(&mut self, message: &str) -> String {
        let text = format!("\n{message}");
        self.output.push_str(&text);
        text
    }

    /// Stop did not succeed; the job may still be alive, so the phase stays.
    pub fn record_stop_failure(&mut self, err: &JobError) -> String {
        self.last_error = Some(err.to_string());
        self.append_diagnostic(err)
    }

    /// Note a failure in the transcript without any phase change.
    pub fn append_diagnostic(&mut self, err: &JobError) -> String {
        let line = diagnostic_line(err);
        self.output.push_str(&line);
        line
    }

    /// Align the phase with the server's view. Returns the new phase if it changed.
    pub fn reconcile(&mut self, server_running: bool) -> Option<RunPhase> {
        let next = match (server_running, self.phase.is_running()) {
            (true, false) => RunPhase::Running,
            // Completed and crashed look the same from `/status`.
            (false, true) => RunPhase::Stopped,
            _ => return None,
        };
        self.phase = next;
        Some(next)
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
        self.clears += 1;
    }
}
