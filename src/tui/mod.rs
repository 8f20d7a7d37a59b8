mod help;
mod state;

use crate::context::JobContext;
use crate::engine::HttpJobApi;
use crate::model::{ControllerConfig, ControllerEvent, RunPhase};
use crate::orchestrator::{
    self, spawn_controller, spawn_status_reconciler, RunState, SessionNotice, UiCommand,
};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use state::{phase_color, UiState};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

/// Open the run window and drive it until the user cancels.
pub async fn run(cfg: &ControllerConfig, api: Arc<HttpJobApi>, ctx: &JobContext) -> Result<()> {
    let (controller, event_rx, _task) = spawn_controller(api.clone(), cfg.clear_on_start);
    // Mounted with the window, cancelled when it closes.
    let poll = spawn_status_reconciler(api, controller.clone(), cfg.poll_interval);

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel::<SessionNotice>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_state = UiState::new(ctx.filename().to_string(), cfg.base_url.clone());
    let state_rx = controller.subscribe();
    let ui_handle = std::thread::spawn(move || {
        run_threaded(ui_state, state_rx, event_rx, notice_rx, cmd_tx)
    });

    let res = orchestrator::run_session(controller, ctx, notice_tx, cmd_rx).await;
    poll.cancel();

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

fn run_threaded(
    mut state: UiState,
    mut run_rx: watch::Receiver<RunState>,
    mut event_rx: UnboundedReceiver<ControllerEvent>,
    mut notice_rx: UnboundedReceiver<SessionNotice>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    let mut page = 10usize;

    let res = 'ui: loop {
        // Drain without blocking; the controller never waits on the UI.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }
        while let Ok(notice) = notice_rx.try_recv() {
            match notice {
                SessionNotice::Info(msg) => state.info = msg,
                SessionNotice::Close => break 'ui Ok(()),
            }
        }

        if last_tick.elapsed() >= tick_rate {
            // Hold the state lock only long enough to copy out what changed.
            let phase = {
                let run = run_rx.borrow_and_update();
                state.sync_transcript(run.clears(), run.output());
                run.phase()
            };
            terminal
                .draw(|f| {
                    page = draw(f.area(), f, &mut state, phase);
                })
                .ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                let cmd = match (k.modifiers, k.code) {
                    (_, KeyCode::Char('c'))
                    | (_, KeyCode::Char('q'))
                    | (_, KeyCode::Esc) => {
                        if state.show_help && k.code == KeyCode::Esc {
                            state.show_help = false;
                            None
                        } else {
                            state.closing = true;
                            Some(UiCommand::Cancel)
                        }
                    }
                    (_, KeyCode::Char('r')) if !state.closing => {
                        state.follow_tail();
                        Some(UiCommand::Run)
                    }
                    (_, KeyCode::Char('s')) if !state.closing => Some(UiCommand::Stop),
                    (_, KeyCode::Char('x')) => {
                        state.follow_tail();
                        Some(UiCommand::ClearOutput)
                    }
                    (_, KeyCode::Char('?')) => {
                        state.show_help = !state.show_help;
                        None
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
                        state.scroll_up(1);
                        None
                    }
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
                        state.scroll_down(1);
                        None
                    }
                    (_, KeyCode::PageUp) => {
                        state.scroll_up(page);
                        None
                    }
                    (_, KeyCode::PageDown) => {
                        state.scroll_down(page);
                        None
                    }
                    (_, KeyCode::End) | (_, KeyCode::Char('G')) => {
                        state.follow_tail();
                        None
                    }
                    _ => None,
                };
                if let Some(cmd) = cmd {
                    if cmd_tx.send(cmd).is_err() {
                        break 'ui Ok(());
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

/// Draw the run window; returns the transcript's visible height.
fn draw(area: Rect, f: &mut ratatui::Frame, state: &mut UiState, phase: RunPhase) -> usize {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(area);

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" {} ", phase.label().to_uppercase()),
            Style::default()
                .fg(Color::Black)
                .bg(phase_color(phase))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled("Job: ", Style::default().fg(Color::Gray)),
        Span::raw(state.filename.clone()),
        Span::raw("  "),
        Span::styled("Server: ", Style::default().fg(Color::Gray)),
        Span::raw(state.base_url.clone()),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Run Script"));
    f.render_widget(header, chunks[0]);

    // Untrusted server text: plain spans only, never markup or raw escapes.
    let height = chunks[1].height.saturating_sub(2) as usize;
    let range = state.visible_range(height);
    let title = if state.scroll_back == 0 {
        "Output".to_string()
    } else {
        format!("Output (scrolled back {} lines)", state.scroll_back)
    };
    let visible: Vec<Line> = state.lines()[range]
        .iter()
        .map(|l| Line::raw(l.as_str()))
        .collect();
    let body = Paragraph::new(Text::from(visible))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(body, chunks[1]);

    let status_line = match &state.alert {
        Some(alert) => Line::from(vec![
            Span::styled(alert.clone(), Style::default().fg(Color::Red)),
            Span::raw("  "),
            Span::styled(state.info.clone(), Style::default().fg(Color::Gray)),
        ]),
        None => Line::from(Span::raw(state.info.clone())),
    };
    let keys = if state.closing {
        "Closing…"
    } else {
        "r run  s stop  c cancel  x clear  ? help"
    };
    let footer = Paragraph::new(status_line)
        .block(Block::default().borders(Borders::ALL).title(keys));
    f.render_widget(footer, chunks[2]);

    if state.show_help {
        let w = area.width.min(50);
        let h = area.height.min(14);
        let popup = Rect {
            x: area.x + (area.width - w) / 2,
            y: area.y + (area.height - h) / 2,
            width: w,
            height: h,
        };
        help::draw_help(popup, f);
    }

    height.max(1)
}
