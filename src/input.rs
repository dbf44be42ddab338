use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerAction {
    Up,
    Down,
    Top,
    Bottom,
    Select,
    Cancel,
}

pub fn map_key(key: KeyEvent) -> Option<PickerAction> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(PickerAction::Cancel)
        }
        KeyCode::Char('m') | KeyCode::Char('j')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(PickerAction::Select)
        }
        KeyCode::Char('j') if key.modifiers.is_empty() => Some(PickerAction::Down),
        KeyCode::Down => Some(PickerAction::Down),
        KeyCode::Char('k') if key.modifiers.is_empty() => Some(PickerAction::Up),
        KeyCode::Up => Some(PickerAction::Up),
        KeyCode::Char('g') | KeyCode::Home => Some(PickerAction::Top),
        KeyCode::Char('G') | KeyCode::End => Some(PickerAction::Bottom),
        KeyCode::Enter => Some(PickerAction::Select),
        KeyCode::Esc | KeyCode::Char('q') => Some(PickerAction::Cancel),
        _ => None,
    }
}
