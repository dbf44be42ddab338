use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Constraint;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Row, Table, TableState};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io::{self, IsTerminal};
use tracing::debug;

use crate::input::{PickerAction, map_key};
use crate::select::{Prompter, SelectionError};

const ACCENT: Color = Color::Rgb(94, 175, 255);
const MAX_VISIBLE_ROWS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PickerOutcome {
    Chosen(usize),
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default)]
struct PickerState {
    selected: usize,
    len: usize,
}

impl PickerState {
    fn new(len: usize) -> Self {
        Self { selected: 0, len }
    }

    fn apply(&mut self, action: PickerAction) -> Option<PickerOutcome> {
        let last = self.len.saturating_sub(1);
        match action {
            PickerAction::Up => self.selected = self.selected.saturating_sub(1),
            PickerAction::Down => self.selected = (self.selected + 1).min(last),
            PickerAction::Top => self.selected = 0,
            PickerAction::Bottom => self.selected = last,
            PickerAction::Select if self.len > 0 => {
                return Some(PickerOutcome::Chosen(self.selected));
            }
            PickerAction::Select => {}
            PickerAction::Cancel => return Some(PickerOutcome::Cancelled),
        }
        None
    }
}

/// Inline list picker drawn on stderr below the cursor.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn select(
        &self,
        label: &str,
        header: &str,
        choices: &[String],
    ) -> Result<usize, SelectionError> {
        if !io::stdin().is_terminal() {
            return Err(SelectionError::NotInteractive(label.to_string()));
        }

        enable_raw_mode()?;
        let picked = run_picker(label, header, choices);
        let restored = disable_raw_mode();
        let outcome = picked?;
        restored?;

        match outcome {
            PickerOutcome::Chosen(index) => {
                debug!(index, "picked");
                Ok(index)
            }
            PickerOutcome::Cancelled => Err(SelectionError::Cancelled),
        }
    }
}

fn run_picker(label: &str, header: &str, choices: &[String]) -> io::Result<PickerOutcome> {
    let height = choices.len().min(MAX_VISIBLE_ROWS) + 3;
    let mut terminal = Terminal::with_options(
        CrosstermBackend::new(io::stderr()),
        TerminalOptions {
            viewport: Viewport::Inline(u16::try_from(height).unwrap_or(u16::MAX)),
        },
    )?;
    let mut state = PickerState::new(choices.len());

    let outcome = loop {
        terminal.draw(|frame| render_picker(frame, label, header, choices, state.selected))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        if let Some(action) = map_key(key)
            && let Some(outcome) = state.apply(action)
        {
            break outcome;
        }
    };

    terminal.clear()?;
    Ok(outcome)
}

fn render_picker(frame: &mut Frame, label: &str, header: &str, choices: &[String], selected: usize) {
    let header = Row::new(vec![
        Cell::from(header.to_string()).style(Style::default().add_modifier(Modifier::BOLD)),
    ])
    .style(Style::default().fg(ACCENT));
    let rows = choices
        .iter()
        .map(|choice| Row::new(vec![Cell::from(choice.clone())]));

    let block = Block::default()
        .title(format!("{label} (↑/↓ move, enter select, esc cancel)"))
        .borders(Borders::TOP)
        .border_style(Style::default().fg(ACCENT));

    let table = Table::new(rows, [Constraint::Min(10)])
        .header(header)
        .block(block)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut table_state = TableState::default();
    table_state.select(Some(selected));
    frame.render_stateful_widget(table, frame.area(), &mut table_state);
}
