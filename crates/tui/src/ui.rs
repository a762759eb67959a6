use chrono::Local;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style, Modifier},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use buybot_core::engine::bulk_target;
use buybot_core::format_money;
use buybot_core::settings::NumericField;
use buybot_core::types::BuyMethod;
use crate::App;

const TRADE_ROWS: u16 = 8;

pub fn draw(f: &mut Frame, app: &App) {
    let side_visible = app.log_visible || app.debug_visible;
    let chunks = if side_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    // Banner, settings, trades
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(TRADE_ROWS + 2),
        ])
        .split(chunks[0]);

    let (banner_label, banner_bg) = if app.is_running() {
        ("RUNNING (S or hotkey to stop)", Color::Green)
    } else {
        ("IDLE (S to start)", Color::Red)
    };
    let banner_width = left_chunks[0].width as usize;
    let pad_total = banner_width.saturating_sub(banner_label.len());
    let pad_left = pad_total / 2;
    let pad_right = pad_total - pad_left;
    let centered_banner = format!("{}{}{}", " ".repeat(pad_left), banner_label, " ".repeat(pad_right));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered_banner,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left_chunks[0]);

    let settings_panel = Paragraph::new(settings_lines(app)).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(settings_panel, left_chunks[1]);

    draw_trades(f, app, left_chunks[2]);

    if side_visible && chunks.len() > 1 {
        if app.debug_visible {
            draw_debug(f, app, chunks[1]);
        } else {
            draw_logs(f, app, chunks[1]);
        }
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn key(k: &'static str) -> Span<'static> {
    Span::styled(k, Style::default().fg(Color::Yellow))
}

fn label(text: &'static str) -> Span<'static> {
    Span::styled(text, Style::default().fg(Color::DarkGray))
}

fn flag(on: bool) -> Span<'static> {
    if on {
        Span::styled("on ", Style::default().fg(Color::Green))
    } else {
        Span::styled("off", Style::default().fg(Color::DarkGray))
    }
}

fn settings_lines(app: &App) -> Vec<Line<'static>> {
    let s = &app.settings;
    let method = s.buy_method();
    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(vec![
        Span::raw(" "),
        key("s"),
        Span::raw(" start/stop, "),
        key("m"),
        Span::raw(" method, "),
        key("t"),
        Span::raw(" target, "),
        key("d"),
        Span::raw(" debug, "),
        key("l"),
        Span::raw(" logs, "),
        key("q"),
        Span::raw(" quit"),
    ]));
    lines.push(Line::from(""));

    let target = if s.target_window().is_empty() { "(none)".to_string() } else { s.target_window().to_string() };
    lines.push(Line::from(vec![
        label(" Method  "),
        Span::styled(method.to_string(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
    ]));
    lines.push(Line::from(vec![label(" Target  "), Span::styled(target, Style::default().fg(Color::Yellow))]));

    match method {
        BuyMethod::Simple => {
            lines.push(Line::from(vec![
                label(" Max     "),
                Span::raw(format_money(s.numeric(NumericField::MaxPrice))),
            ]));
        }
        BuyMethod::Bulk => {
            let max = s.numeric(NumericField::BulkMaxPrice);
            let amount = s.numeric(NumericField::BulkBuyAmount);
            lines.push(Line::from(vec![
                label(" Max     "),
                Span::raw(format!("{} x {}", format_money(max), amount)),
                label("  target "),
                Span::raw(format_money(bulk_target(max, amount))),
            ]));
        }
    }

    lines.push(Line::from(vec![
        label(" Balance "),
        Span::styled(
            format_money(s.numeric(NumericField::CurrentBalance)),
            Style::default().fg(Color::Green),
        ),
        label("  floor "),
        Span::raw(format_money(s.numeric(NumericField::BalanceFloor))),
    ]));

    lines.push(Line::from(vec![
        Span::raw(" "),
        key("r"),
        label(" randomize "),
        flag(app.options.randomize_clicks),
        Span::raw("  "),
        key("b"),
        label(" skip buy "),
        flag(app.options.skip_buy),
        Span::raw("  "),
        key("x"),
        label(" skip max "),
        flag(app.options.skip_max),
    ]));
    lines.push(Line::from(""));

    let missing = s.missing_regions(method);
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|r| r.as_str()).collect();
        lines.push(Line::from(vec![
            Span::styled(" missing regions: ", Style::default().fg(Color::Red)),
            Span::raw(names.join(", ")),
        ]));
    }

    let status_color = if app.status.contains("FAIL") || app.status.contains("ERROR") {
        Color::Red
    } else {
        Color::Cyan
    };
    lines.push(Line::from(vec![
        label(" Status  "),
        Span::styled(app.status.clone(), Style::default().fg(status_color)),
    ]));

    lines
}

fn draw_trades(f: &mut Frame, app: &App, area: Rect) {
    let shown = area.height.saturating_sub(2) as usize;
    let start = app.trades.len().saturating_sub(shown);
    let mut lines: Vec<Line> = app.trades
        .iter()
        .skip(start)
        .map(|t| {
            Line::from(vec![
                Span::styled(
                    t.timestamp.with_timezone(&Local).format("%d/%m/%Y %H:%M:%S").to_string(),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::raw("  "),
                Span::raw(format!("{:>10}", format_money(t.unit_price))),
                Span::raw(format!("{:>12}", format_money(t.spent))),
                Span::styled(format!("{:>12}", format_money(t.balance_after)), Style::default().fg(Color::Green)),
            ])
        })
        .collect();
    if lines.is_empty() {
        lines.push(Line::from(label(" no trades yet")));
    }

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Trades ({}) ", app.trades.len()))
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(panel, area);
}

fn draw_logs(f: &mut Frame, app: &App, area: Rect) {
    let visible_height = area.height.saturating_sub(2) as usize;
    let total = app.log_messages.len();
    let max_scroll = total.saturating_sub(visible_height);
    let scroll = app.log_scroll.min(max_scroll);
    let start = total.saturating_sub(visible_height + scroll);
    let end = total.saturating_sub(scroll);
    let log_lines: Vec<Line> = app.log_messages[start..end]
        .iter()
        .map(|m| parse_log_line(m))
        .collect();

    let log_panel = Paragraph::new(log_lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Logs ")
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(log_panel, area);
}

/// Debug pane: plain engine lines, or the structured records when the
/// detail view is on. Always pinned to the newest entry.
fn draw_debug(f: &mut Frame, app: &App, area: Rect) {
    let (title, source) = if app.detail_view {
        (" Debug detail (v: plain, c: clear) ", &app.detail_lines)
    } else {
        (" Debug (v: detail) ", &app.debug_lines)
    };
    let visible_height = area.height.saturating_sub(2) as usize;
    let start = source.len().saturating_sub(visible_height);
    let lines: Vec<Line> = source
        .iter()
        .skip(start)
        .map(|l| {
            let color = if l.contains("STATUS:") { Color::Cyan } else { Color::Gray };
            Line::from(Span::styled(l.as_str(), Style::default().fg(color)))
        })
        .collect();

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(panel, area);
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }

    let level = parts[0];
    let prefix = parts[1];
    let color_idx: u8 = parts[2].parse().unwrap_or(0);
    let timestamp = parts[3];
    let message = parts[4];

    let prefix_color = match color_idx {
        1 => Color::DarkGray,  // COLOR_GRAY
        2 => Color::LightBlue, // COLOR_BLUE
        3 => Color::Green,     // COLOR_GREEN
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];

    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }

    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(prefix_color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(prefix_color)));

    Line::from(spans)
}
