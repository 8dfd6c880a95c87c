mod render;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, widgets::ListState, Terminal};
use std::io;
use tokio::sync::mpsc;

use crate::selector::{ChipEntry, GateKind};
use crate::session::GateSession;
use crate::transport::{SendOutcome, Status};

/// Status lines kept on screen
const LOG_LINES: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Focus {
    List,
    Address,
}

/// Terminal chip selector.
pub struct GateUI {
    pub(crate) entries: Vec<ChipEntry>,
    pub(crate) list_state: ListState,
    pub(crate) focus: Focus,
    pub(crate) address: String,
    pub(crate) status: String,
    pub(crate) log: Vec<String>,
}

impl GateUI {
    pub fn new(session: &GateSession) -> Self {
        let entries = session.entries();
        let mut list_state = ListState::default();
        list_state.select((!entries.is_empty()).then_some(0));
        let address = session
            .destination()
            .as_str()
            .trim_start_matches("http://")
            .to_string();

        Self {
            entries,
            list_state,
            focus: Focus::List,
            address,
            status: "Server Status : Idle".to_string(),
            log: Vec::new(),
        }
    }

    pub async fn run(
        &mut self,
        session: &mut GateSession,
        mut status_rx: mpsc::UnboundedReceiver<Status>,
    ) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal, session, &mut status_rx).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    async fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        session: &mut GateSession,
        status_rx: &mut mpsc::UnboundedReceiver<Status>,
    ) -> Result<()> {
        loop {
            while let Ok(status) = status_rx.try_recv() {
                self.push_status(status.to_string());
            }

            terminal.draw(|f| self.ui(f, session))?;

            // Short poll so completions show up promptly
            if event::poll(std::time::Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press && self.handle_key(key, session) {
                        return Ok(());
                    }
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Returns true when the user asked to quit.
    pub(crate) fn handle_key(&mut self, key: KeyEvent, session: &mut GateSession) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }

        match self.focus {
            Focus::Address => match key.code {
                KeyCode::Enter => {
                    match session.on_destination_changed(&self.address) {
                        Ok(()) => self.push_status(format!("Destination : {}", session.destination())),
                        Err(e) => self.push_status(format!("Bad address: {}", e)),
                    }
                    self.focus = Focus::List;
                }
                KeyCode::Tab | KeyCode::Esc => self.focus = Focus::List,
                KeyCode::Backspace => {
                    self.address.pop();
                }
                KeyCode::Char(c) => self.address.push(c),
                _ => {}
            },
            Focus::List => match key.code {
                KeyCode::Esc | KeyCode::Char('q') => return true,
                KeyCode::Tab => self.focus = Focus::Address,
                KeyCode::Up => self.move_selection(-1),
                KeyCode::Down => self.move_selection(1),
                KeyCode::PageUp => self.move_selection(-10),
                KeyCode::PageDown => self.move_selection(10),
                KeyCode::Home => self.list_state.select((!self.entries.is_empty()).then_some(0)),
                KeyCode::End => self.list_state.select(self.entries.len().checked_sub(1)),
                KeyCode::Left => {
                    let gate = session.gate().prev();
                    self.switch_gate(session, gate);
                }
                KeyCode::Right => {
                    let gate = session.gate().next();
                    self.switch_gate(session, gate);
                }
                KeyCode::Enter => self.send_selected(session),
                _ => {}
            },
        }
        false
    }

    fn move_selection(&mut self, delta: isize) {
        if self.entries.is_empty() {
            return;
        }
        let last = self.entries.len() as isize - 1;
        let current = self.list_state.selected().unwrap_or(0) as isize;
        self.list_state.select(Some((current + delta).clamp(0, last) as usize));
    }

    fn switch_gate(&mut self, session: &mut GateSession, gate: GateKind) {
        session.on_gate_changed(gate);
        self.entries = session.entries();
        self.list_state.select((!self.entries.is_empty()).then_some(0));
        self.push_status(format!("Gate : {}", gate));
    }

    fn send_selected(&mut self, session: &mut GateSession) {
        let Some(entry) = self.list_state.selected().and_then(|i| self.entries.get(i)).copied() else {
            return;
        };
        match session.on_selection_made(entry.code) {
            Ok(SendOutcome::Dispatched) => self.status = format!("Sending {} ({})...", entry.name, entry.code),
            Ok(SendOutcome::Dropped) => self.status = "Previous chip still in flight".to_string(),
            Err(e) => self.push_status(e.to_string()),
        }
    }

    pub(crate) fn push_status(&mut self, line: String) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.status = line.clone();
        self.log.push(format!("[{}] {}", stamp, line));
        if self.log.len() > LOG_LINES {
            self.log.remove(0);
        }
    }
}
