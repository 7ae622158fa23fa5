use ratatui::prelude::*;
use ratatui::widgets::*;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::client::Client;
use crate::types::*;

const BORDER_FG: Color = Color::DarkGray;
const ACTIVE_BORDER_FG: Color = Color::Green;
const GHOST_FG: Color = Color::Yellow;

/// tmux color names: base colors, `brightX`, `colourN`, `#rrggbb`.
pub fn parse_color(s: &str) -> Option<Color> {
    match s.trim().to_lowercase().as_str() {
        "default" | "" => None,
        "black" => Some(Color::Black),
        "red" => Some(Color::Red),
        "green" => Some(Color::Green),
        "yellow" => Some(Color::Yellow),
        "blue" => Some(Color::Blue),
        "magenta" => Some(Color::Magenta),
        "cyan" => Some(Color::Cyan),
        "white" => Some(Color::White),
        "brightblack" => Some(Color::DarkGray),
        "brightred" => Some(Color::LightRed),
        "brightgreen" => Some(Color::LightGreen),
        "brightyellow" => Some(Color::LightYellow),
        "brightblue" => Some(Color::LightBlue),
        "brightmagenta" => Some(Color::LightMagenta),
        "brightcyan" => Some(Color::LightCyan),
        "brightwhite" => Some(Color::Gray),
        s if s.starts_with("colour") => s[6..].parse::<u8>().ok().map(Color::Indexed),
        s if s.starts_with("color") => s[5..].parse::<u8>().ok().map(Color::Indexed),
        s if s.starts_with('#') && s.len() == 7 => {
            let r = u8::from_str_radix(&s[1..3], 16).ok()?;
            let g = u8::from_str_radix(&s[3..5], 16).ok()?;
            let b = u8::from_str_radix(&s[5..7], 16).ok()?;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}

pub fn run_style(run: &CellRun) -> Style {
    let mut fg = parse_color(&run.fg).unwrap_or(Color::Reset);
    let mut bg = parse_color(&run.bg).unwrap_or(Color::Reset);
    if run.flags & FLAG_INVERSE != 0 { std::mem::swap(&mut fg, &mut bg); }
    let mut style = Style::default().fg(fg).bg(bg);
    if run.flags & FLAG_DIM != 0 { style = style.add_modifier(Modifier::DIM); }
    if run.flags & FLAG_BOLD != 0 { style = style.add_modifier(Modifier::BOLD); }
    if run.flags & FLAG_ITALIC != 0 { style = style.add_modifier(Modifier::ITALIC); }
    if run.flags & FLAG_UNDERLINE != 0 { style = style.add_modifier(Modifier::UNDERLINED); }
    style
}

/// Cut `text` to at most `max` display columns without splitting a wide char.
pub fn truncate_to_width(text: &str, max: usize) -> &str {
    if UnicodeWidthStr::width(text) <= max { return text; }
    let mut used = 0;
    for (i, c) in text.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > max { return &text[..i]; }
        used += w;
    }
    text
}

/// Styled rows of a pane, clipped to its rectangle.
pub fn pane_lines(pane: &Pane) -> Vec<Line<'static>> {
    let cols = pane.width as usize;
    pane.content.iter().take(pane.height as usize).map(|row| {
        let mut used = 0;
        let mut spans = Vec::with_capacity(row.runs.len());
        for run in &row.runs {
            if used >= cols { break; }
            let text = truncate_to_width(&run.text, cols - used);
            used += UnicodeWidthStr::width(text);
            spans.push(Span::styled(text.to_string(), run_style(run)));
        }
        Line::from(spans)
    }).collect()
}

fn clip(r: Rect, area: Rect) -> Rect {
    r.intersection(area)
}

fn inside(area: Rect, x: u16, y: u16) -> bool {
    x >= area.x && x < area.right() && y >= area.y && y < area.bottom()
}

fn pane_area(p: &Pane) -> Rect {
    Rect::new(p.x, p.y, p.width, p.height)
}

/// Divider cells to the right of and below each pane that has a neighbour there.
fn draw_dividers(buf: &mut Buffer, panes: &[Pane], active: Option<&str>, area: Rect) {
    for p in panes {
        let style = Style::default().fg(if active == Some(p.id.as_str()) { ACTIVE_BORDER_FG } else { BORDER_FG });
        let right = p.x.saturating_add(p.width);
        let bottom = p.y.saturating_add(p.height);
        if panes.iter().any(|o| o.x == right.saturating_add(1)) {
            for y in p.y..bottom {
                if inside(area, right, y) {
                    buf.get_mut(right, y).set_symbol("│").set_style(style);
                }
            }
        }
        if panes.iter().any(|o| o.y == bottom.saturating_add(1)) {
            for x in p.x..right {
                if inside(area, x, bottom) {
                    buf.get_mut(x, bottom).set_symbol("─").set_style(style);
                }
            }
        }
    }
}

fn status_line(client: &Client, width: u16) -> Line<'static> {
    if let Some(buf) = client.prompt() {
        return Line::from(vec![Span::raw(":"), Span::raw(buf.to_string())]);
    }
    let bar = Style::default().fg(Color::Black).bg(Color::Green);
    let mut spans = Vec::new();
    if let Some(snap) = client.snapshot() {
        spans.push(Span::styled(format!("[{}] ", snap.session_name), bar));
        for w in snap.visible_windows() {
            let mark = if snap.active_window_id.as_deref() == Some(w.id.as_str()) { "*" } else { "" };
            spans.push(Span::styled(format!("{}:{}{} ", w.index, w.name, mark), bar));
        }
    }
    let right = match client.message() {
        Some(m) => m.to_string(),
        None if client.prefix_armed() => "^B".to_string(),
        None => client.snapshot().map(|s| s.status_line.clone()).unwrap_or_default(),
    };
    let used: usize = spans.iter().map(|s| s.width()).sum();
    let room = (width as usize).saturating_sub(used);
    let right = truncate_to_width(&right, room).to_string();
    let pad = room.saturating_sub(UnicodeWidthStr::width(right.as_str()));
    spans.push(Span::styled(" ".repeat(pad), bar));
    spans.push(Span::styled(right, bar));
    Line::from(spans)
}

/// Draw the rendered pane set (snapshot plus optimistic preview), dividers,
/// the drag outline, and the status line in the bottom row.
pub fn draw(f: &mut Frame, client: &Client) {
    let full = f.size();
    if full.height == 0 { return; }
    let status = Rect::new(full.x, full.bottom() - 1, full.width, 1);
    let area = Rect::new(full.x, full.y, full.width, full.height - 1);

    let panes = client.rendered_panes();
    let active = client.snapshot().and_then(|s| s.active_pane_id.clone());
    for p in &panes {
        let r = clip(pane_area(p), area);
        if r.is_empty() { continue; }
        f.render_widget(Clear, r);
        f.render_widget(Paragraph::new(Text::from(pane_lines(p))), r);
    }
    draw_dividers(f.buffer_mut(), &panes, active.as_deref(), area);

    if let Some(ghost) = client.drag_ghost() {
        let r = clip(Rect::new(ghost.x, ghost.y, ghost.width, ghost.height), area);
        if !r.is_empty() {
            f.render_widget(Block::default().borders(Borders::ALL).border_style(Style::default().fg(GHOST_FG)), r);
        }
    }

    f.render_widget(Paragraph::new(status_line(client, status.width)), status);

    match client.prompt() {
        Some(buf) => {
            let x = status.x + 1 + UnicodeWidthStr::width(buf) as u16;
            f.set_cursor(x.min(status.right().saturating_sub(1)), status.y);
        }
        None => {
            let cursor = active.as_deref().and_then(|id| panes.iter().find(|p| p.id == id));
            if let Some(p) = cursor {
                if !client.interaction().pointer_captured() && p.cursor_x < p.width && p.cursor_y < p.height {
                    let (x, y) = (p.x + p.cursor_x, p.y + p.cursor_y);
                    if inside(area, x, y) { f.set_cursor(x, y); }
                }
            }
        }
    }
}
