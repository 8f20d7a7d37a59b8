use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        key_line("r", 11, "Run job"),
        key_line("s", 11, "Stop job"),
        key_line("c", 11, "Cancel: stop job, then close"),
        key_line("q / Esc", 5, "Same as cancel"),
        key_line("x", 11, "Clear transcript"),
        key_line("↑/↓ j/k", 5, "Scroll one line"),
        key_line("PgUp/PgDn", 3, "Scroll one page"),
        key_line("End / G", 5, "Follow output"),
        key_line("?", 11, "Toggle this help"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}
