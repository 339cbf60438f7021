use crate::shared::{DisplayState, SourceKind};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use super::grid::draw_step_grid;

const HELP: &str = "space play  arrows move  enter step  +/- bpm  i source  r render  s save  esc quit";

pub fn render(frame: &mut Frame, area: Rect, state: &DisplayState, blink_on: bool) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // screen: project, song, transport
            Constraint::Length(2), // step ruler
            Constraint::Min(8),    // step grid
            Constraint::Length(3), // banner / status
            Constraint::Length(1), // key help
        ])
        .split(area);

    draw_screen(frame, sections[0], state);
    draw_ruler(frame, sections[1], state);
    draw_step_grid(frame, sections[2], &state.leds, blink_on);
    draw_message(frame, sections[3], state);
    frame.render_widget(
        Paragraph::new(HELP).style(Style::default().fg(Color::DarkGray)),
        sections[4],
    );
}

fn draw_screen(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let title = if state.song_title.is_empty() { "(no song)" } else { state.song_title.as_str() };
    let source = match state.source {
        SourceKind::None => "no source",
        SourceKind::Sequencer => "sequencer",
        SourceKind::Instrumental => "instrumental",
    };
    let transport = match (state.playing, state.ready) {
        (true, _) => Span::styled("PLAYING", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        (false, true) => Span::styled("STOPPED", Style::default().fg(Color::Yellow)),
        (false, false) => Span::styled("NOT READY", Style::default().fg(Color::DarkGray)),
    };
    let mut line2 = vec![
        transport,
        Span::raw(format!("  {:.0} BPM  {source}", state.bpm)),
    ];
    if state.busy {
        line2.push(Span::styled("  rendering", Style::default().fg(Color::Cyan)));
    }

    let text = vec![
        Line::from(vec![
            Span::styled(state.project_name.clone(), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(format!("  {title}")),
        ]),
        Line::from(line2),
    ];
    let block = Block::default().borders(Borders::ALL).title(" hitgrid ");
    frame.render_widget(Paragraph::new(text).block(block), area);
}

// step numbers above the grid, playhead marked
fn draw_ruler(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(area);
    let cells = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 16); 16])
        .split(cols[1]);
    for (step, cell) in cells.iter().enumerate() {
        let here = state.playing_step == Some(step as u8);
        let style = if here {
            Style::default().fg(Color::Black).bg(Color::Green)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        frame.render_widget(Paragraph::new(format!("{}", step + 1)).style(style), *cell);
    }
}

fn draw_message(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let paragraph = match &state.banner {
        Some(banner) => {
            let hint = if banner.retry.is_some() { "  [R] retry  [x] dismiss" } else { "  [x] dismiss" };
            Paragraph::new(Line::from(vec![
                Span::styled(banner.message.clone(), Style::default().fg(Color::White)),
                Span::styled(hint, Style::default().fg(Color::Gray)),
            ]))
            .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Red)))
        }
        None => Paragraph::new(state.status_text.clone()).block(Block::default().borders(Borders::ALL)),
    };
    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{Banner, LedState, RetryAction};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn state() -> DisplayState {
        DisplayState {
            leds: [[LedState::Off; 16]; 4],
            playing_step: Some(4),
            cursor: (0, 0),
            playing: true,
            ready: true,
            source: SourceKind::Sequencer,
            bpm: 128.0,
            project_name: "Demo".into(),
            song_title: "Neon Rain".into(),
            busy: false,
            banner: Some(Banner {
                message: "render failed".into(),
                retry: Some(RetryAction::Render),
            }),
            status_text: String::new(),
        }
    }

    #[test]
    fn draws_header_and_banner() {
        let mut term = Terminal::new(TestBackend::new(100, 24)).unwrap();
        term.draw(|f| render(f, f.area(), &state(), true)).unwrap();
        let buf = term.backend().buffer().clone();
        let text: String = buf.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("Neon Rain"));
        assert!(text.contains("128 BPM"));
        assert!(text.contains("PLAYING"));
        assert!(text.contains("[R] retry"));
    }
}
