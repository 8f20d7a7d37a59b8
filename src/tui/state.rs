use crate::model::{ControllerEvent, RunOutcome, RunPhase};
use ratatui::style::Color;
use std::ops::Range;

pub struct UiState {
    pub filename: String,
    pub base_url: String,
    pub info: String,
    /// Last failure shown to the user; cleared by the next successful start.
    pub alert: Option<String>,
    pub show_help: bool,
    pub closing: bool,
    // Transcript scrolling: lines scrolled back from the tail. 0 = follow output.
    pub scroll_back: usize,
    // Sanitized transcript, split into lines, mirroring the controller's.
    lines: Vec<String>,
    synced_len: usize,
    synced_clears: u64,
}

impl UiState {
    pub fn new(filename: String, base_url: String) -> Self {
        Self {
            filename,
            base_url,
            info: "Press r to run, ? for help".into(),
            alert: None,
            show_help: false,
            closing: false,
            scroll_back: 0,
            lines: vec![String::new()],
            synced_len: 0,
            synced_clears: 0,
        }
    }

    /// Catch the cached transcript up with `raw`.
    ///
    /// The transcript only grows between clears, so only the unseen tail is
    /// sanitized.
    pub fn sync_transcript(&mut self, clears: u64, raw: &str) {
        let tail = if clears != self.synced_clears || raw.len() < self.synced_len {
            None
        } else {
            raw.get(self.synced_len..)
        };
        let tail = match tail {
            Some(tail) => tail,
            None => {
                self.lines = vec![String::new()];
                self.synced_clears = clears;
                raw
            }
        };
        push_sanitized(&mut self.lines, tail);
        self.synced_len = raw.len();
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines worth showing; a trailing newline does not open an empty line.
    pub fn line_count(&self) -> usize {
        match self.lines.last() {
            Some(last) if last.is_empty() && self.lines.len() > 1 => self.lines.len() - 1,
            _ => self.lines.len(),
        }
    }

    /// Index range of the lines that fit in `height` rows.
    pub fn visible_range(&mut self, height: usize) -> Range<usize> {
        let total = self.line_count();
        let top = self.scroll_offset(total, height);
        top..(top + height).min(total)
    }

    pub fn apply_event(&mut self, ev: ControllerEvent) {
        match ev {
            ControllerEvent::PhaseChanged { phase } => {
                if phase == RunPhase::Running {
                    self.alert = None;
                }
                self.info = format!("Phase: {}", phase.label());
            }
            ControllerEvent::Alert(msg) => {
                self.alert = Some(format!("Error: {msg}"));
            }
            ControllerEvent::RunFinished { outcome } => {
                self.info = match outcome {
                    RunOutcome::Completed => "Run finished".into(),
                    RunOutcome::Failed(reason) => format!("Run failed: {reason}"),
                };
            }
            // Transcript text is read straight from the controller state.
            ControllerEvent::Output(_) => {}
        }
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_back = self.scroll_back.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_back = self.scroll_back.saturating_sub(lines);
    }

    pub fn follow_tail(&mut self) {
        self.scroll_back = 0;
    }

    /// Top line to show so that `height` lines fit, honoring `scroll_back`.
    pub fn scroll_offset(&mut self, total_lines: usize, height: usize) -> usize {
        let max_top = total_lines.saturating_sub(height);
        self.scroll_back = self.scroll_back.min(max_top);
        max_top - self.scroll_back
    }
}

pub fn phase_color(phase: RunPhase) -> Color {
    match phase {
        RunPhase::Idle => Color::Gray,
        RunPhase::Running => Color::Green,
        RunPhase::Stopped => Color::Yellow,
        RunPhase::Failed => Color::Red,
    }
}

/// Append server output to `lines`, made safe to put on screen.
///
/// The transcript is untrusted text: escape sequences and other control
/// characters are replaced so nothing the job prints can drive the terminal.
fn push_sanitized(lines: &mut Vec<String>, raw: &str) {
    if lines.is_empty() {
        lines.push(String::new());
    }
    for c in raw.chars() {
        if c == '\n' {
            lines.push(String::new());
            continue;
        }
        let Some(line) = lines.last_mut() else {
            continue;
        };
        match c {
            '\t' => line.push_str("    "),
            '\r' => {}
            c if c.is_control() => line.push(char::REPLACEMENT_CHARACTER),
            c => line.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> UiState {
        UiState::new("graph.json".into(), "http://127.0.0.1:5000".into())
    }

    #[test]
    fn escape_sequences_are_neutralized() {
        let mut st = state();
        st.sync_transcript(0, "ok\x1b[31mred\x1b[0m\r\n<b>bold</b>\tx");
        assert_eq!(st.lines().len(), 2);
        assert!(!st.lines()[0].contains('\x1b'));
        assert!(!st.lines()[0].contains('\r'));
        assert_eq!(st.lines()[1], "<b>bold</b>    x");
    }

    #[test]
    fn transcript_sync_appends_only_the_new_tail() {
        let mut st = state();
        st.sync_transcript(0, "step1\nste");
        st.sync_transcript(0, "step1\nstep2\n");
        assert_eq!(st.lines(), ["step1", "step2", ""]);
        assert_eq!(st.line_count(), 2);

        // A clear followed by more output than before still starts over.
        st.sync_transcript(1, "fresh run output\n");
        assert_eq!(st.lines(), ["fresh run output", ""]);
        st.sync_transcript(1, "");
        assert_eq!(st.line_count(), 1);
    }

    #[test]
    fn long_transcripts_still_follow_the_tail() {
        let mut st = state();
        let raw: String = (0..70_000).map(|i| format!("line {i}\n")).collect();
        st.sync_transcript(0, &raw);
        let range = st.visible_range(20);
        assert_eq!(range, 69_980..70_000);
        assert_eq!(st.lines()[range.end - 1], "line 69999");
    }

    #[test]
    fn scroll_back_is_clamped_to_transcript() {
        let mut st = UiState::new("graph.json".into(), "http://127.0.0.1:5000".into());
        assert_eq!(st.scroll_offset(100, 20), 80);
        st.scroll_up(500);
        assert_eq!(st.scroll_offset(100, 20), 0);
        assert_eq!(st.scroll_back, 80);
        st.scroll_down(10);
        assert_eq!(st.scroll_offset(100, 20), 10);
        st.follow_tail();
        assert_eq!(st.scroll_offset(5, 20), 0);
    }

    #[test]
    fn alerts_clear_when_a_new_run_starts() {
        let mut st = UiState::new("graph.json".into(), String::new());
        st.apply_event(ControllerEvent::Alert("connection refused".into()));
        assert_eq!(st.alert.as_deref(), Some("Error: connection refused"));
        st.apply_event(ControllerEvent::PhaseChanged {
            phase: RunPhase::Running,
        });
        assert_eq!(st.alert, None);
        assert_eq!(st.info, "Phase: running");
    }
}
