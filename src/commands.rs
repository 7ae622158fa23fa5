use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::types::{Direction, FocusDir};

/// Default coalescing window for keystroke batches (one frame).
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(16);

/// Every operation the client can ask the remote session to perform.
///
/// Pane and window targets are optional; `None` leaves `-t` off and lets the
/// remote side pick its current pane or window. Keystroke commands always
/// name their pane so batches can be keyed by destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    SendLiteral { target: String, text: String },
    SendKeys { target: String, keys: Vec<String> },
    SplitPane { target: Option<String>, direction: Direction },
    KillPane { target: Option<String> },
    SelectPane { target: String },
    SelectPaneDir { dir: FocusDir },
    ResizePane { target: Option<String>, dir: FocusDir, amount: u16 },
    ZoomPane { target: Option<String> },
    SwapPanes { src: String, dst: String },
    BreakPane { src: String, name: Option<String>, detached: bool },
    NewWindow,
    /// Background window that never becomes current (group and float holders).
    NewHiddenWindow { name: String },
    SelectWindow { target: String },
    NextWindow,
    PreviousWindow,
    KillWindow { target: Option<String> },
    RenameWindow { target: Option<String>, name: String },
    NextLayout,
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind { Literal, Keys }

impl RemoteCommand {
    /// Keystroke commands that may be merged with neighbours for the same pane.
    pub fn batch_key(&self) -> Option<(BatchKind, &str)> {
        match self {
            RemoteCommand::SendLiteral { target, .. } => Some((BatchKind::Literal, target)),
            RemoteCommand::SendKeys { target, .. } => Some((BatchKind::Keys, target)),
            _ => None,
        }
    }

    pub fn is_batchable(&self) -> bool { self.batch_key().is_some() }

    /// Render as a single tmux command line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        match self {
            RemoteCommand::SendLiteral { target, text } => {
                out.push_str("send-keys");
                push_target(&mut out, "-t", Some(target));
                out.push_str(" -l");
                if text.starts_with('-') { out.push_str(" --"); }
                out.push(' ');
                out.push_str(&quote_arg(text));
            }
            RemoteCommand::SendKeys { target, keys } => {
                out.push_str("send-keys");
                push_target(&mut out, "-t", Some(target));
                if keys.first().is_some_and(|k| k.starts_with('-')) { out.push_str(" --"); }
                for k in keys {
                    out.push(' ');
                    out.push_str(&quote_arg(k));
                }
            }
            RemoteCommand::SplitPane { target, direction } => {
                out.push_str(match direction { Direction::Horizontal => "split-window -h", Direction::Vertical => "split-window -v" });
                push_target(&mut out, "-t", target.as_ref());
            }
            RemoteCommand::KillPane { target } => {
                out.push_str("kill-pane");
                push_target(&mut out, "-t", target.as_ref());
            }
            RemoteCommand::SelectPane { target } => {
                out.push_str("select-pane");
                push_target(&mut out, "-t", Some(target));
            }
            RemoteCommand::SelectPaneDir { dir } => {
                out.push_str("select-pane ");
                out.push_str(dir.flag());
            }
            RemoteCommand::ResizePane { target, dir, amount } => {
                out.push_str("resize-pane");
                push_target(&mut out, "-t", target.as_ref());
                out.push(' ');
                out.push_str(dir.flag());
                out.push(' ');
                out.push_str(&amount.to_string());
            }
            RemoteCommand::ZoomPane { target } => {
                out.push_str("resize-pane");
                push_target(&mut out, "-t", target.as_ref());
                out.push_str(" -Z");
            }
            RemoteCommand::SwapPanes { src, dst } => {
                out.push_str("swap-pane");
                push_target(&mut out, "-s", Some(src));
                push_target(&mut out, "-t", Some(dst));
            }
            RemoteCommand::BreakPane { src, name, detached } => {
                out.push_str("break-pane");
                if *detached { out.push_str(" -d"); }
                push_target(&mut out, "-s", Some(src));
                if let Some(n) = name {
                    out.push_str(" -n ");
                    out.push_str(&quote_arg(n));
                }
            }
            RemoteCommand::NewWindow => out.push_str("new-window"),
            RemoteCommand::NewHiddenWindow { name } => {
                out.push_str("new-window -d -n ");
                out.push_str(&quote_arg(name));
            }
            RemoteCommand::SelectWindow { target } => {
                out.push_str("select-window");
                push_target(&mut out, "-t", Some(target));
            }
            RemoteCommand::NextWindow => out.push_str("next-window"),
            RemoteCommand::PreviousWindow => out.push_str("previous-window"),
            RemoteCommand::KillWindow { target } => {
                out.push_str("kill-window");
                push_target(&mut out, "-t", target.as_ref());
            }
            RemoteCommand::RenameWindow { target, name } => {
                out.push_str("rename-window");
                push_target(&mut out, "-t", target.as_ref());
                out.push(' ');
                out.push_str(&quote_arg(name));
            }
            RemoteCommand::NextLayout => out.push_str("next-layout"),
            RemoteCommand::Raw(s) => out.push_str(s.trim()),
        }
        out
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn push_target(out: &mut String, flag: &str, target: Option<&String>) {
    if let Some(t) = target {
        out.push(' ');
        out.push_str(flag);
        out.push(' ');
        out.push_str(&quote_arg(t));
    }
}

/// Quote one argument so the remote command parser reads it back verbatim.
pub fn quote_arg(s: &str) -> String {
    let plain = !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "%@$:._-+=/,".contains(c));
    if plain && !s.starts_with('$') { return s.to_string(); }
    if !s.contains('\'') { return format!("'{}'", s); }
    let mut q = String::with_capacity(s.len() + 2);
    q.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$') { q.push('\\'); }
        q.push(c);
    }
    q.push('"');
    q
}

/// Split a command line into arguments, honouring single quotes, double
/// quotes with backslash escapes, and bare backslash escapes.
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut cur = String::new();
    let mut in_arg = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_arg = true;
                for q in chars.by_ref() {
                    if q == '\'' { break; }
                    cur.push(q);
                }
            }
            '"' => {
                in_arg = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => { if let Some(e) = chars.next() { cur.push(e); } }
                        _ => cur.push(q),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                if let Some(e) = chars.next() { cur.push(e); }
            }
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut cur));
                    in_arg = false;
                }
            }
            c => { in_arg = true; cur.push(c); }
        }
    }
    if in_arg { args.push(cur); }
    args
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1))
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Positional arguments after the command name, skipping `-x value` pairs
/// for the flags listed in `valued`.
fn positionals<'a>(args: &'a [String], valued: &[&str]) -> Vec<&'a String> {
    let mut out = Vec::new();
    let mut i = 1;
    while i < args.len() {
        let a = &args[i];
        if a == "--" && out.is_empty() {
            out.extend(args[i + 1..].iter());
            break;
        }
        if valued.contains(&a.as_str()) { i += 2; continue; }
        if a.starts_with('-') && a.len() > 1 && out.is_empty() { i += 1; continue; }
        out.push(a);
        i += 1;
    }
    out
}

fn dir_flag(args: &[String]) -> Option<FocusDir> {
    if has_flag(args, "-L") { Some(FocusDir::Left) }
    else if has_flag(args, "-R") { Some(FocusDir::Right) }
    else if has_flag(args, "-U") { Some(FocusDir::Up) }
    else if has_flag(args, "-D") { Some(FocusDir::Down) }
    else { None }
}

/// Parse a free-form command line (command prompt or `bind-key` body).
/// Unrecognised or incomplete forms pass through as `Raw`.
pub fn parse_command(line: &str) -> RemoteCommand {
    let args = split_args(line);
    let raw = || RemoteCommand::Raw(line.trim().to_string());
    let Some(name) = args.first() else { return raw(); };
    let target = flag_value(&args, "-t").cloned();

    match name.as_str() {
        "split-window" | "splitw" => {
            let direction = if has_flag(&args, "-h") { Direction::Horizontal } else { Direction::Vertical };
            RemoteCommand::SplitPane { target, direction }
        }
        "kill-pane" | "killp" => RemoteCommand::KillPane { target },
        "select-pane" | "selectp" => {
            if let Some(dir) = dir_flag(&args) { return RemoteCommand::SelectPaneDir { dir }; }
            match target {
                Some(target) => RemoteCommand::SelectPane { target },
                None => raw(),
            }
        }
        "resize-pane" | "resizep" => {
            if has_flag(&args, "-Z") { return RemoteCommand::ZoomPane { target }; }
            let Some(dir) = dir_flag(&args) else { return raw(); };
            let amount = positionals(&args, &["-t", "-x", "-y"])
                .first()
                .and_then(|a| a.parse::<u16>().ok())
                .unwrap_or(1);
            RemoteCommand::ResizePane { target, dir, amount }
        }
        "swap-pane" | "swapp" => match (flag_value(&args, "-s"), target) {
            (Some(src), Some(dst)) => RemoteCommand::SwapPanes { src: src.clone(), dst },
            _ => raw(),
        },
        "break-pane" | "breakp" => match flag_value(&args, "-s") {
            Some(src) => RemoteCommand::BreakPane {
                src: src.clone(),
                name: flag_value(&args, "-n").cloned(),
                detached: has_flag(&args, "-d"),
            },
            None => raw(),
        },
        "new-window" | "neww" if args.len() == 1 => RemoteCommand::NewWindow,
        "new-window" | "neww" if args.len() == 4 && has_flag(&args, "-d") => match flag_value(&args, "-n") {
            Some(name) => RemoteCommand::NewHiddenWindow { name: name.clone() },
            None => raw(),
        },
        "select-window" | "selectw" => match target {
            Some(target) => RemoteCommand::SelectWindow { target },
            None => raw(),
        },
        "next-window" | "next" => RemoteCommand::NextWindow,
        "previous-window" | "prev" => RemoteCommand::PreviousWindow,
        "kill-window" | "killw" => RemoteCommand::KillWindow { target },
        "rename-window" | "renamew" => {
            match positionals(&args, &["-t"]).last() {
                Some(n) => RemoteCommand::RenameWindow { target, name: (*n).clone() },
                None => raw(),
            }
        }
        "next-layout" | "nextl" => RemoteCommand::NextLayout,
        "send-keys" | "send" => {
            let Some(target) = target else { return raw(); };
            let keys: Vec<String> = positionals(&args, &["-t"]).into_iter().cloned().collect();
            if keys.is_empty() { return raw(); }
            if has_flag(&args, "-l") {
                RemoteCommand::SendLiteral { target, text: keys.join(" ") }
            } else {
                RemoteCommand::SendKeys { target, keys }
            }
        }
        _ => raw(),
    }
}

struct Batch {
    kind: BatchKind,
    target: String,
    parts: Vec<String>,
    opened_at: Instant,
}

impl Batch {
    fn into_command(self) -> RemoteCommand {
        match self.kind {
            BatchKind::Literal => RemoteCommand::SendLiteral { target: self.target, text: self.parts.concat() },
            BatchKind::Keys => RemoteCommand::SendKeys { target: self.target, keys: self.parts },
        }
    }
}

/// Ordered outgoing queue that coalesces consecutive keystrokes for the same
/// pane within a short window. Only the newest batch accepts more input, so
/// emission order always equals issue order.
pub struct CommandQueue {
    window: Duration,
    pending: VecDeque<Batch>,
}

impl CommandQueue {
    pub fn new(window: Duration) -> Self {
        Self { window, pending: VecDeque::new() }
    }

    /// Queue a command. Returns whatever must be sent right now, in order:
    /// non-batchable commands drain every pending batch ahead of themselves.
    pub fn push(&mut self, cmd: RemoteCommand, now: Instant) -> Vec<RemoteCommand> {
        let (kind, target) = match cmd.batch_key() {
            Some((k, t)) => (k, t.to_string()),
            None => {
                let mut out = self.flush();
                out.push(cmd);
                return out;
            }
        };
        let parts = match cmd {
            RemoteCommand::SendLiteral { text, .. } => vec![text],
            RemoteCommand::SendKeys { keys, .. } => keys,
            _ => Vec::new(),
        };
        let window = self.window;
        if let Some(tail) = self.pending.back_mut() {
            if tail.kind == kind && tail.target == target && now.saturating_duration_since(tail.opened_at) < window {
                tail.parts.extend(parts);
                return Vec::new();
            }
        }
        self.pending.push_back(Batch { kind, target, parts, opened_at: now });
        Vec::new()
    }

    /// Batches whose window has closed, oldest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<RemoteCommand> {
        let mut out = Vec::new();
        while let Some(front) = self.pending.front() {
            if now.saturating_duration_since(front.opened_at) < self.window { break; }
            if let Some(b) = self.pending.pop_front() { out.push(b.into_command()); }
        }
        out
    }

    /// Drain every pending batch in FIFO order.
    pub fn flush(&mut self) -> Vec<RemoteCommand> {
        if !self.pending.is_empty() { debug!(batches = self.pending.len(), "flushing command batches"); }
        self.pending.drain(..).map(Batch::into_command).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.front().map(|b| b.opened_at + self.window)
    }

    pub fn is_empty(&self) -> bool { self.pending.is_empty() }

    pub fn len(&self) -> usize { self.pending.len() }
}

impl Default for CommandQueue {
    fn default() -> Self { Self::new(DEFAULT_BATCH_WINDOW) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(t: &str, s: &str) -> RemoteCommand {
        RemoteCommand::SendLiteral { target: t.into(), text: s.into() }
    }

    fn keys(t: &str, k: &[&str]) -> RemoteCommand {
        RemoteCommand::SendKeys { target: t.into(), keys: k.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn encode_forms() {
        assert_eq!(lit("%1", "ls -la").encode(), "send-keys -t %1 -l 'ls -la'");
        assert_eq!(lit("%1", "it's").encode(), "send-keys -t %1 -l \"it's\"");
        assert_eq!(keys("%1", &["Enter", "C-c"]).encode(), "send-keys -t %1 Enter C-c");
        assert_eq!(RemoteCommand::SwapPanes { src: "%0".into(), dst: "%1".into() }.encode(), "swap-pane -s %0 -t %1");
        assert_eq!(
            RemoteCommand::ResizePane { target: Some("%2".into()), dir: FocusDir::Left, amount: 3 }.encode(),
            "resize-pane -t %2 -L 3"
        );
        assert_eq!(
            RemoteCommand::BreakPane { src: "%4".into(), name: Some("__%1_group_1".into()), detached: true }.encode(),
            "break-pane -d -s %4 -n __%1_group_1"
        );
        assert_eq!(RemoteCommand::SplitPane { target: None, direction: Direction::Horizontal }.encode(), "split-window -h");
    }

    #[test]
    fn split_args_quotes() {
        assert_eq!(split_args("rename-window 'my win'"), vec!["rename-window", "my win"]);
        assert_eq!(split_args(r#"send-keys -l "a \"b\"""#), vec!["send-keys", "-l", "a \"b\""]);
        assert_eq!(split_args("a  b\\ c ''"), vec!["a", "b c", ""]);
    }

    #[test]
    fn encode_then_parse_keeps_literal_text() {
        for text in ["plain", "-x", "with space", "it's", "$HOME", "back\\slash \"q\""] {
            let cmd = lit("%3", text);
            assert_eq!(parse_command(&cmd.encode()), cmd);
        }
    }

    #[test]
    fn parse_known_and_raw() {
        assert_eq!(parse_command("split-window -h"), RemoteCommand::SplitPane { target: None, direction: Direction::Horizontal });
        assert_eq!(parse_command("splitw"), RemoteCommand::SplitPane { target: None, direction: Direction::Vertical });
        assert_eq!(parse_command("select-pane -U"), RemoteCommand::SelectPaneDir { dir: FocusDir::Up });
        assert_eq!(parse_command("resize-pane -Z"), RemoteCommand::ZoomPane { target: None });
        assert_eq!(
            parse_command("resize-pane -t %1 -R 5"),
            RemoteCommand::ResizePane { target: Some("%1".into()), dir: FocusDir::Right, amount: 5 }
        );
        assert_eq!(
            parse_command("rename-window -t @2 logs"),
            RemoteCommand::RenameWindow { target: Some("@2".into()), name: "logs".into() }
        );
        assert_eq!(
            parse_command("new-window -d -n __%3_group_1"),
            RemoteCommand::NewHiddenWindow { name: "__%3_group_1".into() }
        );
        assert_eq!(parse_command("display-message hi"), RemoteCommand::Raw("display-message hi".into()));
        assert_eq!(parse_command("swap-pane -s %1"), RemoteCommand::Raw("swap-pane -s %1".into()));
    }

    #[test]
    fn coalesces_same_target_literals() {
        let t0 = Instant::now();
        let mut q = CommandQueue::default();
        assert!(q.push(lit("%1", "a"), t0).is_empty());
        assert!(q.push(lit("%1", "b"), t0 + Duration::from_millis(5)).is_empty());
        assert!(q.take_due(t0 + Duration::from_millis(10)).is_empty());
        assert_eq!(q.take_due(t0 + Duration::from_millis(16)), vec![lit("%1", "ab")]);
        assert!(q.is_empty());
    }

    #[test]
    fn keystroke_batches_keep_kind_boundaries() {
        let t0 = Instant::now();
        let mut q = CommandQueue::default();
        q.push(lit("%1", "a"), t0);
        q.push(lit("%1", "b"), t0);
        q.push(keys("%1", &["Enter"]), t0 + Duration::from_millis(1));
        q.push(lit("%1", "c"), t0 + Duration::from_millis(2));
        assert_eq!(q.len(), 3);
        assert_eq!(q.flush(), vec![lit("%1", "ab"), keys("%1", &["Enter"]), lit("%1", "c")]);
    }

    #[test]
    fn different_target_starts_new_batch() {
        let t0 = Instant::now();
        let mut q = CommandQueue::default();
        q.push(lit("%1", "a"), t0);
        q.push(lit("%2", "b"), t0);
        q.push(lit("%1", "c"), t0);
        assert_eq!(q.flush(), vec![lit("%1", "a"), lit("%2", "b"), lit("%1", "c")]);
    }

    #[test]
    fn expired_tail_is_not_extended() {
        let t0 = Instant::now();
        let mut q = CommandQueue::default();
        q.push(lit("%1", "a"), t0);
        q.push(lit("%1", "b"), t0 + Duration::from_millis(20));
        assert_eq!(q.take_due(t0 + Duration::from_millis(20)), vec![lit("%1", "a")]);
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(36)));
    }

    #[test]
    fn non_batchable_flushes_pending_first() {
        let t0 = Instant::now();
        let mut q = CommandQueue::default();
        q.push(lit("%1", "x"), t0);
        let swap = RemoteCommand::SwapPanes { src: "%1".into(), dst: "%2".into() };
        assert_eq!(q.push(swap.clone(), t0), vec![lit("%1", "x"), swap]);
        assert!(q.is_empty());
    }
}
