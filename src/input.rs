use std::time::Instant;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::debug;

use crate::commands::{parse_command, RemoteCommand};
use crate::config::{format_key, normalize_key, Config, KeyTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMode {
    Normal,
    PrefixWait { armed_at: Instant },
    CommandMode { buffer: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Keystroke for the active pane.
    Forward(RemoteCommand),
    /// A bound command.
    Command(RemoteCommand),
    /// Typed at the command prompt; its result is shown to the user.
    Prompt(RemoteCommand),
}

/// Prefix-key protocol: `Normal -> PrefixWait -> {Normal, CommandMode}`.
/// Runs independently of pointer gestures.
pub struct KeyboardFsm {
    mode: KeyMode,
}

impl Default for KeyboardFsm {
    fn default() -> Self { Self::new() }
}

impl KeyboardFsm {
    pub fn new() -> Self { Self { mode: KeyMode::Normal } }

    pub fn mode(&self) -> &KeyMode { &self.mode }

    /// Text typed so far in command mode.
    pub fn prompt(&self) -> Option<&str> {
        match &self.mode {
            KeyMode::CommandMode { buffer } => Some(buffer),
            _ => None,
        }
    }

    /// Drop an expired prefix. Returns true if the mode changed.
    pub fn tick(&mut self, cfg: &Config, now: Instant) -> bool {
        if let KeyMode::PrefixWait { armed_at } = self.mode {
            if now.saturating_duration_since(armed_at) >= cfg.prefix_timeout {
                debug!("prefix timed out");
                self.mode = KeyMode::Normal;
                return true;
            }
        }
        false
    }

    pub fn next_deadline(&self, cfg: &Config) -> Option<Instant> {
        match self.mode {
            KeyMode::PrefixWait { armed_at } => Some(armed_at + cfg.prefix_timeout),
            _ => None,
        }
    }

    pub fn handle_key(&mut self, cfg: &Config, key: KeyEvent, active_pane: Option<&str>, now: Instant) -> Option<KeyAction> {
        if key.kind == KeyEventKind::Release { return None; }
        self.tick(cfg, now);
        let pressed = normalize_key((key.code, key.modifiers));

        match std::mem::replace(&mut self.mode, KeyMode::Normal) {
            KeyMode::Normal => {
                if pressed == normalize_key(cfg.prefix) {
                    self.mode = KeyMode::PrefixWait { armed_at: now };
                    return None;
                }
                if let Some(bind) = cfg.lookup(KeyTable::Root, pressed) {
                    return Some(KeyAction::Command(parse_command(&bind.command)));
                }
                forward_key(pressed, active_pane).map(KeyAction::Forward)
            }
            KeyMode::PrefixWait { .. } => {
                if pressed == normalize_key(cfg.prefix) {
                    // send-prefix: the prefix itself goes to the pane.
                    let target = active_pane?;
                    return format_key(pressed).map(|k| KeyAction::Forward(RemoteCommand::SendKeys { target: target.to_string(), keys: vec![k] }));
                }
                if pressed == normalize_key(cfg.command_key) {
                    self.mode = KeyMode::CommandMode { buffer: String::new() };
                    return None;
                }
                match cfg.lookup(KeyTable::Prefix, pressed) {
                    Some(bind) => {
                        debug!(command = %bind.command, "prefix binding");
                        Some(KeyAction::Command(parse_command(&bind.command)))
                    }
                    None => None,
                }
            }
            KeyMode::CommandMode { mut buffer } => {
                match pressed.0 {
                    KeyCode::Enter => {
                        let line = buffer.trim();
                        if line.is_empty() { return None; }
                        Some(KeyAction::Prompt(parse_command(line)))
                    }
                    KeyCode::Esc => None,
                    KeyCode::Backspace => {
                        buffer.pop();
                        self.mode = KeyMode::CommandMode { buffer };
                        None
                    }
                    KeyCode::Char(c) if !pressed.1.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                        buffer.push(c);
                        self.mode = KeyMode::CommandMode { buffer };
                        None
                    }
                    _ => {
                        self.mode = KeyMode::CommandMode { buffer };
                        None
                    }
                }
            }
        }
    }
}

/// Encode a key for the active pane: plain characters as literal text,
/// everything else by tmux key name.
pub fn forward_key(key: (KeyCode, KeyModifiers), active_pane: Option<&str>) -> Option<RemoteCommand> {
    let target = active_pane?.to_string();
    match key {
        (KeyCode::Char(c), mods) if !mods.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
            Some(RemoteCommand::SendLiteral { target, text: c.to_string() })
        }
        _ => format_key(key).map(|k| RemoteCommand::SendKeys { target, keys: vec![k] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, FocusDir};
    use std::time::Duration;

    fn k(code: KeyCode) -> KeyEvent { KeyEvent::new(code, KeyModifiers::NONE) }
    fn ctrl(c: char) -> KeyEvent { KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL) }

    #[test]
    fn plain_keys_forward_to_active_pane() {
        let cfg = Config::default();
        let mut fsm = KeyboardFsm::new();
        let now = Instant::now();
        assert_eq!(
            fsm.handle_key(&cfg, k(KeyCode::Char('a')), Some("%1"), now),
            Some(KeyAction::Forward(RemoteCommand::SendLiteral { target: "%1".into(), text: "a".into() }))
        );
        assert_eq!(
            fsm.handle_key(&cfg, k(KeyCode::Enter), Some("%1"), now),
            Some(KeyAction::Forward(RemoteCommand::SendKeys { target: "%1".into(), keys: vec!["Enter".into()] }))
        );
        assert_eq!(
            fsm.handle_key(&cfg, ctrl('c'), Some("%1"), now),
            Some(KeyAction::Forward(RemoteCommand::SendKeys { target: "%1".into(), keys: vec!["C-c".into()] }))
        );
        assert_eq!(fsm.handle_key(&cfg, k(KeyCode::Char('a')), None, now), None);
    }

    #[test]
    fn prefix_then_binding() {
        let cfg = Config::default();
        let mut fsm = KeyboardFsm::new();
        let now = Instant::now();
        assert_eq!(fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now), None);
        assert!(matches!(fsm.mode(), KeyMode::PrefixWait { .. }));
        assert_eq!(
            fsm.handle_key(&cfg, k(KeyCode::Char('%')), Some("%1"), now),
            Some(KeyAction::Command(RemoteCommand::SplitPane { target: None, direction: Direction::Horizontal }))
        );
        assert_eq!(fsm.mode(), &KeyMode::Normal);

        fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now);
        assert_eq!(
            fsm.handle_key(&cfg, k(KeyCode::Left), Some("%1"), now),
            Some(KeyAction::Command(RemoteCommand::SelectPaneDir { dir: FocusDir::Left }))
        );
    }

    #[test]
    fn unbound_key_after_prefix_is_swallowed() {
        let cfg = Config::default();
        let mut fsm = KeyboardFsm::new();
        let now = Instant::now();
        fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now);
        assert_eq!(fsm.handle_key(&cfg, k(KeyCode::Char('y')), Some("%1"), now), None);
        assert_eq!(fsm.mode(), &KeyMode::Normal);
    }

    #[test]
    fn double_prefix_sends_prefix() {
        let cfg = Config::default();
        let mut fsm = KeyboardFsm::new();
        let now = Instant::now();
        fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now);
        assert_eq!(
            fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now),
            Some(KeyAction::Forward(RemoteCommand::SendKeys { target: "%1".into(), keys: vec!["C-b".into()] }))
        );
    }

    #[test]
    fn prefix_times_out() {
        let cfg = Config::default();
        let mut fsm = KeyboardFsm::new();
        let now = Instant::now();
        fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now);
        assert_eq!(fsm.next_deadline(&cfg), Some(now + cfg.prefix_timeout));
        let late = now + cfg.prefix_timeout + Duration::from_millis(1);
        // The late key is handled as a normal keystroke.
        assert_eq!(
            fsm.handle_key(&cfg, k(KeyCode::Char('%')), Some("%1"), late),
            Some(KeyAction::Forward(RemoteCommand::SendLiteral { target: "%1".into(), text: "%".into() }))
        );

        fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now);
        assert!(fsm.tick(&cfg, late));
        assert_eq!(fsm.mode(), &KeyMode::Normal);
    }

    #[test]
    fn command_mode_editing() {
        let cfg = Config::default();
        let mut fsm = KeyboardFsm::new();
        let now = Instant::now();
        fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now);
        fsm.handle_key(&cfg, k(KeyCode::Char(':')), Some("%1"), now);
        for c in "kill-panx".chars() {
            assert_eq!(fsm.handle_key(&cfg, k(KeyCode::Char(c)), Some("%1"), now), None);
        }
        fsm.handle_key(&cfg, k(KeyCode::Backspace), Some("%1"), now);
        fsm.handle_key(&cfg, k(KeyCode::Char('e')), Some("%1"), now);
        assert_eq!(fsm.prompt(), Some("kill-pane"));
        assert_eq!(
            fsm.handle_key(&cfg, k(KeyCode::Enter), Some("%1"), now),
            Some(KeyAction::Prompt(RemoteCommand::KillPane { target: None }))
        );
        assert_eq!(fsm.mode(), &KeyMode::Normal);

        fsm.handle_key(&cfg, ctrl('b'), Some("%1"), now);
        fsm.handle_key(&cfg, k(KeyCode::Char(':')), Some("%1"), now);
        fsm.handle_key(&cfg, k(KeyCode::Char('x')), Some("%1"), now);
        assert_eq!(fsm.handle_key(&cfg, k(KeyCode::Esc), Some("%1"), now), None);
        assert_eq!(fsm.prompt(), None);
    }

    #[test]
    fn root_table_binding() {
        let mut cfg = Config::default();
        cfg.bind(KeyTable::Root, (KeyCode::Char('h'), KeyModifiers::ALT), "select-pane -L");
        let mut fsm = KeyboardFsm::new();
        assert_eq!(
            fsm.handle_key(&cfg, KeyEvent::new(KeyCode::Char('h'), KeyModifiers::ALT), Some("%1"), Instant::now()),
            Some(KeyAction::Command(RemoteCommand::SelectPaneDir { dir: FocusDir::Left }))
        );
    }
}
