//! Terminal rendering. One summary block, the column header, one line per
//! displayed process, and a prompt/notice line at the bottom.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use crate::app::{ActiveView, App};
use crate::format::{self, HEADER};
use crate::rate::{CPU_CATEGORIES, CPU_IDLE};
use crate::record::{ProcState, STATE_SLOTS};

pub fn ui(f: &mut Frame, app: &App) {
    if let ActiveView::Text { title, body } = &app.view {
        draw_text_view(f, app, title, body);
        return;
    }

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(f.area());

    let dim = style(app, Style::default().fg(Color::Gray));
    let plain = style(app, Style::default().fg(Color::White));

    f.render_widget(
        Paragraph::new(summary_lines(app)).style(dim),
        root[0],
    );
    f.render_widget(
        Paragraph::new(HEADER).style(style(
            app,
            Style::default()
                .fg(Color::Black)
                .bg(Color::Gray)
                .add_modifier(Modifier::BOLD),
        )),
        root[1],
    );

    let visible = root[2].height as usize;
    f.render_widget(
        Paragraph::new(
            app.rows
                .iter()
                .take(visible)
                .map(|r| Line::from(r.as_str()))
                .collect::<Vec<_>>(),
        )
        .style(plain),
        root[2],
    );

    f.render_widget(Paragraph::new(status_line(app)).style(dim), root[3]);
}

fn style(app: &App, styled: Style) -> Style {
    if app.opts.color { styled } else { Style::default() }
}

fn summary_lines(app: &App) -> Vec<Line<'static>> {
    let s = &app.summary;
    let mut states = Vec::new();
    for slot in 0..STATE_SLOTS {
        if s.state_counts[slot] > 0 {
            states.push(format!(
                "{} {}",
                s.state_counts[slot],
                ProcState::slot_label(slot)
            ));
        }
    }
    let states = if states.is_empty() {
        String::new()
    } else {
        format!(" ({})", states.join(", "))
    };

    // Tenths of a percent per category; idle goes last.
    let mut cpu = Vec::new();
    for (i, name) in CPU_CATEGORIES.iter().enumerate() {
        if i != CPU_IDLE {
            cpu.push(format!("{:.1}% {name}", pct(s, i)));
        }
    }
    cpu.push(format!("{:.1}% idle", pct(s, CPU_IDLE)));

    let mem = &s.memory;
    vec![
        Line::from(format!(
            "load averages: {:.2}, {:.2}, {:.2}  order: {}",
            s.load[0],
            s.load[1],
            s.load[2],
            app.opts.sort_key.name(),
        )),
        Line::from(format!(
            "{} processes, {} displayed{states}",
            s.total, s.active
        )),
        Line::from(format!("CPU: {}", cpu.join(", "))),
        Line::from(format!(
            "Memory: {} active, {} free, {} total, {} of {} swap used",
            format::scale_k(mem.active_kb),
            format::scale_k(mem.free_kb),
            format::scale_k(mem.total_kb),
            format::scale_k(mem.swap_used_kb),
            format::scale_k(mem.swap_total_kb),
        )),
    ]
}

fn pct(s: &crate::app::Summary, category: usize) -> f64 {
    s.cpu_pct.get(category).copied().unwrap_or(0) as f64 / 10.0
}

fn status_line(app: &App) -> Line<'_> {
    if let Some((prompt, buffer)) = app.interp.prompt() {
        Line::from(vec![
            Span::raw(prompt),
            Span::styled(
                buffer.to_string(),
                style(app, Style::default().add_modifier(Modifier::BOLD)),
            ),
            Span::styled(
                "_",
                style(app, Style::default().add_modifier(Modifier::SLOW_BLINK)),
            ),
        ])
    } else if let Some(message) = &app.message {
        Line::from(message.as_str())
    } else {
        Line::from("")
    }
}

fn draw_text_view(f: &mut Frame, app: &App, title: &str, body: &str) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(f.area());

    let block = Block::default()
        .borders(Borders::ALL)
        .title(title.to_string())
        .border_style(style(app, Style::default().fg(Color::DarkGray)));
    f.render_widget(
        Paragraph::new(body.to_string())
            .block(block)
            .style(style(app, Style::default().fg(Color::White))),
        root[0],
    );
    f.render_widget(
        Paragraph::new("press any key to return")
            .style(style(app, Style::default().fg(Color::Gray))),
        root[1],
    );
}
