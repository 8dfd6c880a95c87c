use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

use super::{Focus, GateUI};
use crate::session::GateSession;

impl GateUI {
    pub(crate) fn ui(&mut self, f: &mut Frame, session: &GateSession) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(3),
                Constraint::Length(super::LOG_LINES as u16 + 2),
                Constraint::Length(1),
            ])
            .split(f.area());

        // Header: gate and link state
        let (slot_label, slot_color) = if session.is_ready() {
            ("ready", Color::Green)
        } else {
            ("sending", Color::Yellow)
        };
        let header = Paragraph::new(Line::from(vec![
            Span::styled(
                format!(" {} ", session.gate()),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("→ {}  ", session.destination())),
            Span::styled(format!("[{}]", slot_label), Style::default().fg(slot_color)),
        ]))
        .block(Block::default().borders(Borders::ALL).title(" Net Gate "));
        f.render_widget(header, chunks[0]);

        // Chip list
        let items: Vec<ListItem> = self
            .entries
            .iter()
            .map(|entry| {
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:>4}  ", entry.code), Style::default().fg(Color::DarkGray)),
                    Span::raw(entry.name),
                ]))
            })
            .collect();
        let list_border = if self.focus == Focus::List {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(list_border)
                    .title(format!(" Chips ({}) ", self.entries.len())),
            )
            .highlight_style(Style::default().bg(Color::Blue).add_modifier(Modifier::BOLD))
            .highlight_symbol("▶ ");
        f.render_stateful_widget(list, chunks[1], &mut self.list_state);

        // Address field
        let address_border = if self.focus == Focus::Address {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        };
        let address = Paragraph::new(self.address.as_str()).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(address_border)
                .title(" Server address (host:port) "),
        );
        f.render_widget(address, chunks[2]);
        if self.focus == Focus::Address {
            let x = chunks[2].x + 1 + self.address.chars().count() as u16;
            f.set_cursor_position((x.min(chunks[2].right().saturating_sub(2)), chunks[2].y + 1));
        }

        // Status log
        let log: Vec<Line> = self.log.iter().map(|l| Line::from(l.as_str())).collect();
        let status = Paragraph::new(log).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} ", self.status)),
        );
        f.render_widget(status, chunks[3]);

        let help = Paragraph::new(Span::styled(
            " ↑/↓ select · Enter send · ←/→ gate · Tab address · q quit",
            Style::default().fg(Color::DarkGray),
        ));
        f.render_widget(help, chunks[4]);
    }
}
