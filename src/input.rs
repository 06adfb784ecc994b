//! Key bindings for the game screen.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Action from a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MoveLeft,
    MoveRight,
    Rotate,
    SoftDrop,
    HardDrop,
    Hold,
    Quit,
    None,
}

/// Map a key event to a game action. Arrows plus the classic letter keys.
pub fn key_to_action(key: KeyEvent) -> Action {
    let KeyEvent {
        code, modifiers, ..
    } = key;
    if !modifiers.is_empty() && modifiers != KeyModifiers::SHIFT {
        return Action::None;
    }
    match code {
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        KeyCode::Left | KeyCode::Char('h') => Action::MoveLeft,
        KeyCode::Right | KeyCode::Char('l') => Action::MoveRight,
        KeyCode::Up | KeyCode::Char('k') => Action::Rotate,
        KeyCode::Down | KeyCode::Char('j') => Action::SoftDrop,
        KeyCode::Char(' ') => Action::HardDrop,
        KeyCode::Char('c') => Action::Hold,
        _ => Action::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventKind;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::NONE,
        }
    }

    #[test]
    fn arrows_and_letters_map_to_actions() {
        assert_eq!(key_to_action(press(KeyCode::Left)), Action::MoveLeft);
        assert_eq!(key_to_action(press(KeyCode::Char('l'))), Action::MoveRight);
        assert_eq!(key_to_action(press(KeyCode::Up)), Action::Rotate);
        assert_eq!(key_to_action(press(KeyCode::Char(' '))), Action::HardDrop);
        assert_eq!(key_to_action(press(KeyCode::Char('c'))), Action::Hold);
        assert_eq!(key_to_action(press(KeyCode::Esc)), Action::Quit);
        assert_eq!(key_to_action(press(KeyCode::Tab)), Action::None);
    }

    #[test]
    fn modified_keys_are_ignored() {
        let key = KeyEvent {
            code: KeyCode::Left,
            modifiers: KeyModifiers::CONTROL,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::NONE,
        };
        assert_eq!(key_to_action(key), Action::None);
    }
}
