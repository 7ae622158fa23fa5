use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::event::{KeyCode, KeyModifiers};
use tracing::{debug, warn};

use crate::commands::DEFAULT_BATCH_WINDOW;
use crate::error::ConfigError;
use crate::interaction::InteractionConfig;
use crate::sync::{EngineConfig, ReconnectPolicy};

pub type Key = (KeyCode, KeyModifiers);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTable {
    /// Matched without the prefix (`bind-key -n`).
    Root,
    /// Matched right after the prefix key.
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub key: Key,
    pub table: KeyTable,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prefix: Key,
    pub prefix_timeout: Duration,
    pub command_key: Key,
    pub batch_window: Duration,
    pub commit_timeout: Duration,
    pub resize_throttle: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// `None` retries forever.
    pub reconnect_max_attempts: Option<u32>,
    pub status_bar_rows: u16,
    pub min_pane_size: u16,
    pub bindings: Vec<Bind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: (KeyCode::Char('b'), KeyModifiers::CONTROL),
            prefix_timeout: Duration::from_millis(1000),
            command_key: (KeyCode::Char(':'), KeyModifiers::NONE),
            batch_window: DEFAULT_BATCH_WINDOW,
            commit_timeout: Duration::from_secs(5),
            resize_throttle: Duration::from_millis(50),
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_max_attempts: None,
            status_bar_rows: 1,
            min_pane_size: 2,
            bindings: default_bindings(),
        }
    }
}

impl Config {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            batch_window: self.batch_window,
            reconnect: ReconnectPolicy {
                base_delay: self.reconnect_base_delay,
                max_delay: self.reconnect_max_delay,
                max_attempts: self.reconnect_max_attempts,
            },
        }
    }

    pub fn interaction_config(&self) -> InteractionConfig {
        InteractionConfig {
            commit_timeout: self.commit_timeout,
            resize_throttle: self.resize_throttle,
            status_bar_rows: self.status_bar_rows,
            min_pane_size: self.min_pane_size,
        }
    }

    pub fn lookup(&self, table: KeyTable, key: Key) -> Option<&Bind> {
        let key = normalize_key(key);
        self.bindings.iter().find(|b| b.table == table && b.key == key)
    }

    pub fn bind(&mut self, table: KeyTable, key: Key, command: impl Into<String>) {
        let key = normalize_key(key);
        self.bindings.retain(|b| !(b.table == table && b.key == key));
        self.bindings.push(Bind { key, table, command: command.into() });
    }

    pub fn unbind(&mut self, table: KeyTable, key: Key) {
        let key = normalize_key(key);
        self.bindings.retain(|b| !(b.table == table && b.key == key));
    }
}

pub fn default_bindings() -> Vec<Bind> {
    let p = |code: KeyCode, mods: KeyModifiers, cmd: &str| Bind { key: (code, mods), table: KeyTable::Prefix, command: cmd.to_string() };
    let none = KeyModifiers::NONE;
    let alt = KeyModifiers::ALT;
    vec![
        p(KeyCode::Char('"'), none, "split-window -v"),
        p(KeyCode::Char('%'), none, "split-window -h"),
        p(KeyCode::Char('x'), none, "kill-pane"),
        p(KeyCode::Char('&'), none, "kill-window"),
        p(KeyCode::Char('c'), none, "new-window"),
        p(KeyCode::Char('n'), none, "next-window"),
        p(KeyCode::Char('p'), none, "previous-window"),
        p(KeyCode::Char('z'), none, "resize-pane -Z"),
        p(KeyCode::Char(' '), none, "next-layout"),
        p(KeyCode::Char('!'), none, "break-pane"),
        p(KeyCode::Char('d'), none, "detach-client"),
        p(KeyCode::Char('G'), none, "group-add"),
        p(KeyCode::Char(')'), none, "group-next"),
        p(KeyCode::Char('('), none, "group-prev"),
        p(KeyCode::Up, none, "select-pane -U"),
        p(KeyCode::Down, none, "select-pane -D"),
        p(KeyCode::Left, none, "select-pane -L"),
        p(KeyCode::Right, none, "select-pane -R"),
        p(KeyCode::Up, alt, "resize-pane -U 5"),
        p(KeyCode::Down, alt, "resize-pane -D 5"),
        p(KeyCode::Left, alt, "resize-pane -L 5"),
        p(KeyCode::Right, alt, "resize-pane -R 5"),
    ]
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")).map(PathBuf::from)
}

/// Candidate config files, most specific first.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = env::var_os("MUXVIEW_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".muxview.conf"));
        paths.push(home.join(".config").join("muxview").join("muxview.conf"));
    }
    paths
}

/// Load the explicit file if given (it must exist), otherwise the first
/// candidate that exists, otherwise defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => config_paths().into_iter().find(|p| p.is_file()),
    };
    if let Some(path) = path {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        debug!(path = %path.display(), "loading config");
        parse_config_content(&mut cfg, &content)?;
    }
    Ok(cfg)
}

pub fn parse_config_content(cfg: &mut Config, content: &str) -> Result<(), ConfigError> {
    for (i, line) in content.lines().enumerate() {
        parse_config_line(cfg, line).map_err(|message| ConfigError::Parse { line: i + 1, message })?;
    }
    Ok(())
}

pub fn parse_config_line(cfg: &mut Config, line: &str) -> Result<(), String> {
    let l = line.trim();
    if l.is_empty() || l.starts_with('#') { return Ok(()); }
    let l = if l.ends_with('\\') { l.trim_end_matches('\\').trim() } else { l };

    let mut words = l.split_whitespace();
    match words.next() {
        Some("set" | "set-option") => parse_set_option(cfg, l),
        Some("bind-key" | "bind") => parse_bind_key(cfg, l),
        Some("unbind-key" | "unbind") => parse_unbind_key(cfg, l),
        Some(other) => {
            warn!(directive = other, "unsupported config directive skipped");
            Ok(())
        }
        None => Ok(()),
    }
}

fn parse_set_option(cfg: &mut Config, line: &str) -> Result<(), String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut i = 1;
    while i < parts.len() && parts[i].starts_with('-') { i += 1; }
    if i >= parts.len() { return Err("set: missing option name".into()); }
    let name = parts[i];
    let value = parts[i + 1..].join(" ");
    let value = value.trim().trim_matches('"').trim_matches('\'');
    parse_option_value(cfg, name, value)
}

fn millis(name: &str, value: &str) -> Result<Duration, String> {
    value.parse::<u64>().map(Duration::from_millis).map_err(|_| format!("{}: expected milliseconds, got '{}'", name, value))
}

fn number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String> {
    value.parse::<T>().map_err(|_| format!("{}: expected a number, got '{}'", name, value))
}

pub fn parse_option_value(cfg: &mut Config, name: &str, value: &str) -> Result<(), String> {
    match name {
        "prefix" => cfg.prefix = parse_key_name(value).ok_or_else(|| format!("prefix: unknown key '{}'", value))?,
        "command-key" => cfg.command_key = parse_key_name(value).ok_or_else(|| format!("command-key: unknown key '{}'", value))?,
        "prefix-timeout" | "escape-time" => cfg.prefix_timeout = millis(name, value)?,
        "batch-window" => cfg.batch_window = millis(name, value)?,
        "commit-timeout" => cfg.commit_timeout = millis(name, value)?,
        "resize-throttle" => cfg.resize_throttle = millis(name, value)?,
        "reconnect-base-delay" => cfg.reconnect_base_delay = millis(name, value)?,
        "reconnect-max-delay" => cfg.reconnect_max_delay = millis(name, value)?,
        "reconnect-max-attempts" => {
            let n: u32 = number(name, value)?;
            cfg.reconnect_max_attempts = if n == 0 { None } else { Some(n) };
        }
        "status-bar-rows" => cfg.status_bar_rows = number(name, value)?,
        "min-pane-size" => cfg.min_pane_size = number::<u16>(name, value)?.max(1),
        _ => warn!(option = name, "unknown option skipped"),
    }
    Ok(())
}

fn parse_bind_key(cfg: &mut Config, line: &str) -> Result<(), String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut i = 1;
    let mut table = KeyTable::Prefix;
    while i < parts.len() {
        let p = parts[i];
        // A bare "-" is a key name, not a flag.
        if !(p.starts_with('-') && p.len() > 1) { break; }
        if p.contains('n') { table = KeyTable::Root; }
        if p.contains('T') {
            i += 1;
            table = match parts.get(i) {
                Some(&"root") => KeyTable::Root,
                Some(&"prefix") => KeyTable::Prefix,
                other => return Err(format!("bind-key: unsupported key table {:?}", other)),
            };
        }
        i += 1;
    }
    let Some(key_str) = parts.get(i) else { return Err("bind-key: missing key".into()); };
    let command = parts[i + 1..].join(" ");
    if command.is_empty() { return Err(format!("bind-key {}: missing command", key_str)); }
    let key = parse_key_name(key_str).ok_or_else(|| format!("bind-key: unknown key '{}'", key_str))?;
    cfg.bind(table, key, command);
    Ok(())
}

fn parse_unbind_key(cfg: &mut Config, line: &str) -> Result<(), String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut i = 1;
    let mut table = KeyTable::Prefix;
    while i < parts.len() {
        let p = parts[i];
        if !(p.starts_with('-') && p.len() > 1) { break; }
        if p.contains('a') {
            cfg.bindings.clear();
            return Ok(());
        }
        if p.contains('n') { table = KeyTable::Root; }
        i += 1;
    }
    let Some(key_str) = parts.get(i) else { return Err("unbind-key: missing key".into()); };
    let key = parse_key_name(key_str).ok_or_else(|| format!("unbind-key: unknown key '{}'", key_str))?;
    cfg.unbind(table, key);
    Ok(())
}

/// Shift is implied by the character itself.
pub fn normalize_key(key: Key) -> Key {
    match key.0 {
        KeyCode::Char(_) => (key.0, key.1.difference(KeyModifiers::SHIFT)),
        _ => key,
    }
}

/// Parse tmux key names: `C-a`, `M-x`, `S-Tab`, `^b`, `Enter`, `F5`, `Space`, `"`.
pub fn parse_key_name(name: &str) -> Option<Key> {
    let name = name.trim().trim_matches('\'');
    if let Some(rest) = name.strip_prefix('^') {
        let mut chars = rest.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Some((KeyCode::Char(c.to_ascii_lowercase()), KeyModifiers::CONTROL));
        }
    }

    let mut mods = KeyModifiers::NONE;
    let mut rest = name;
    while rest.len() > 2 {
        let (head, tail) = rest.split_at(2);
        match head {
            "C-" | "c-" => mods |= KeyModifiers::CONTROL,
            "M-" | "m-" => mods |= KeyModifiers::ALT,
            "S-" | "s-" => mods |= KeyModifiers::SHIFT,
            _ => break,
        }
        rest = tail;
    }

    let code = match rest.to_ascii_lowercase().as_str() {
        "enter" | "return" => KeyCode::Enter,
        "tab" if mods.contains(KeyModifiers::SHIFT) => {
            mods.remove(KeyModifiers::SHIFT);
            KeyCode::BackTab
        }
        "tab" => KeyCode::Tab,
        "btab" => KeyCode::BackTab,
        "escape" | "esc" => KeyCode::Esc,
        "space" => KeyCode::Char(' '),
        "bspace" | "backspace" => KeyCode::Backspace,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "ppage" | "pageup" | "pgup" => KeyCode::PageUp,
        "npage" | "pagedown" | "pgdn" => KeyCode::PageDown,
        "ic" | "insert" => KeyCode::Insert,
        "dc" | "delete" => KeyCode::Delete,
        f if f.len() > 1 && f.starts_with('f') && f[1..].chars().all(|c| c.is_ascii_digit()) => {
            KeyCode::F(f[1..].parse().ok()?)
        }
        _ => {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if mods.contains(KeyModifiers::CONTROL) => KeyCode::Char(c.to_ascii_lowercase()),
                (Some(c), None) => KeyCode::Char(c),
                _ => return None,
            }
        }
    };
    Some(normalize_key((code, mods)))
}

/// Render a key in tmux notation, as `send-keys` expects it.
pub fn format_key(key: Key) -> Option<String> {
    let (code, mods) = key;
    let mut out = String::new();
    if mods.contains(KeyModifiers::CONTROL) { out.push_str("C-"); }
    if mods.contains(KeyModifiers::ALT) { out.push_str("M-"); }
    if mods.contains(KeyModifiers::SHIFT) && !matches!(code, KeyCode::Char(_)) { out.push_str("S-"); }
    let name = match code {
        KeyCode::Char(' ') => "Space".to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "Enter".to_string(),
        KeyCode::Tab => "Tab".to_string(),
        KeyCode::BackTab => "BTab".to_string(),
        KeyCode::Esc => "Escape".to_string(),
        KeyCode::Backspace => "BSpace".to_string(),
        KeyCode::Up => "Up".to_string(),
        KeyCode::Down => "Down".to_string(),
        KeyCode::Left => "Left".to_string(),
        KeyCode::Right => "Right".to_string(),
        KeyCode::Home => "Home".to_string(),
        KeyCode::End => "End".to_string(),
        KeyCode::PageUp => "PPage".to_string(),
        KeyCode::PageDown => "NPage".to_string(),
        KeyCode::Insert => "IC".to_string(),
        KeyCode::Delete => "DC".to_string(),
        KeyCode::F(n) => format!("F{}", n),
        _ => return None,
    };
    out.push_str(&name);
    Some(out)
}
