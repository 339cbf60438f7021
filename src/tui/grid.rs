use crate::shared::{Instrument, LedState, NUM_INSTRUMENTS, STEPS_PER_PATTERN};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Paragraph};
use ratatui::Frame;

const LABEL_WIDTH: u16 = 7;

// one row per instrument, one cell per step; every fourth step gets a
// brighter off colour so the beats read at a glance
pub fn draw_step_grid(
    frame: &mut Frame,
    area: Rect,
    leds: &[[LedState; STEPS_PER_PATTERN]; NUM_INSTRUMENTS],
    blink_on: bool,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Ratio(1, NUM_INSTRUMENTS as u32); NUM_INSTRUMENTS])
        .split(area);

    for (row_idx, row_area) in rows.iter().enumerate() {
        let halves = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(LABEL_WIDTH), Constraint::Min(0)])
            .split(*row_area);
        let label = Paragraph::new(Instrument::ALL[row_idx].label()).style(Style::default().fg(Color::Gray));
        frame.render_widget(label, halves[0]);

        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, STEPS_PER_PATTERN as u32); STEPS_PER_PATTERN])
            .split(halves[1]);

        for (step, cell_area) in cols.iter().enumerate() {
            let style = cell_style(leds[row_idx][step], step, blink_on);
            frame.render_widget(Block::default().style(style), *cell_area);
        }
    }
}

fn cell_style(led: LedState, step: usize, blink_on: bool) -> Style {
    let off = if step % 4 == 0 { Color::Rgb(60, 60, 60) } else { Color::Rgb(35, 35, 35) };
    let bg = match led {
        LedState::Off => off,
        LedState::OnMedium => Color::Magenta,
        LedState::OnHigh => Color::LightMagenta,
        LedState::Blink if blink_on => Color::White,
        LedState::Blink => off,
    };
    Style::default().bg(bg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blink_alternates_with_the_off_colour() {
        let lit = cell_style(LedState::Blink, 3, true);
        let dark = cell_style(LedState::Blink, 3, false);
        assert_eq!(lit.bg, Some(Color::White));
        assert_eq!(dark, cell_style(LedState::Off, 3, false));
        assert_ne!(cell_style(LedState::Off, 0, false), cell_style(LedState::Off, 1, false));
    }
}
