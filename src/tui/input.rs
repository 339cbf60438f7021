use std::time::Duration;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crate::shared::InputEvent;

// poll for input from the terminal and resolve keys into semantic input
// events for the session (key map in shared.rs)
pub fn poll_input(timeout: Duration) -> anyhow::Result<Vec<InputEvent>> {
    if !event::poll(timeout)? {
        return Ok(vec![]);
    }

    if let Event::Key(key) = event::read()? {
        if key.kind != KeyEventKind::Press {
            return Ok(vec![]);
        }
        return Ok(handle_key(key.code));
    }
    Ok(vec![])
}

fn handle_key(code: KeyCode) -> Vec<InputEvent> {
    let event = match code {
        KeyCode::Esc | KeyCode::Char('q') => InputEvent::Quit,
        KeyCode::Char(' ') => InputEvent::TogglePlay,

        KeyCode::Left | KeyCode::Char('h') => InputEvent::CursorLeft,
        KeyCode::Right | KeyCode::Char('l') => InputEvent::CursorRight,
        KeyCode::Up | KeyCode::Char('k') => InputEvent::CursorUp,
        KeyCode::Down | KeyCode::Char('j') => InputEvent::CursorDown,
        KeyCode::Enter => InputEvent::ToggleStep,

        // tempo, shifted = bigger jumps
        KeyCode::Char('+' | '=') => InputEvent::NudgeBpm(1),
        KeyCode::Char('-') => InputEvent::NudgeBpm(-1),
        KeyCode::Char(']') => InputEvent::NudgeBpm(10),
        KeyCode::Char('[') => InputEvent::NudgeBpm(-10),

        KeyCode::Char('i') => InputEvent::SwitchSource,
        KeyCode::Char('r') => InputEvent::Render,
        KeyCode::Char('R') => InputEvent::Retry,
        KeyCode::Char('x') => InputEvent::DismissBanner,
        KeyCode::Char('s') => InputEvent::Save,
        _ => return vec![],
    };
    vec![event]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_resolve_to_events() {
        assert_eq!(handle_key(KeyCode::Char(' ')), vec![InputEvent::TogglePlay]);
        assert_eq!(handle_key(KeyCode::Enter), vec![InputEvent::ToggleStep]);
        assert_eq!(handle_key(KeyCode::Char('[')), vec![InputEvent::NudgeBpm(-10)]);
        assert_eq!(handle_key(KeyCode::Char('R')), vec![InputEvent::Retry]);
        assert_eq!(handle_key(KeyCode::Esc), vec![InputEvent::Quit]);
        assert!(handle_key(KeyCode::Char('z')).is_empty());
    }
}
