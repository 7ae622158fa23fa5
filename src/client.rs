use std::time::Instant;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};
use ratatui::prelude::Rect;
use tracing::{debug, info};

use crate::cache::BoundedCache;
use crate::commands::{split_args, RemoteCommand};
use crate::config::Config;
use crate::error::EngineError;
use crate::groups::{GroupRegistry, GroupStore};
use crate::input::{KeyAction, KeyMode, KeyboardFsm};
use crate::interaction::{InteractionMachine, Phase, Scene};
use crate::layout::{divider_at, find_best_pane_in_direction, pane_at, LayoutPreset};
use crate::sync::{ConnectionState, Engine, EngineEvent};
use crate::transport::Transport;
use crate::tree::compute_positions;
use crate::types::{CellSize, Pane, PaneRect, SessionSnapshot};

const LAYOUT_CACHE_SIZE: usize = 16;

/// Input the client reacts to. Pointer coordinates are in pixels; with the
/// default 1x1 cell size they are plain cell coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    PointerDown { x: f32, y: f32 },
    PointerMove { x: f32, y: f32 },
    PointerUp { x: f32, y: f32 },
    Cancel,
    Key(KeyEvent),
    Resize { cols: u16, rows: u16 },
    Tick,
}

type LayoutKey = (LayoutPreset, Vec<String>, u16, u16);

/// Single-threaded composition of the sync engine, the gesture and keyboard
/// state machines, and the pane-group registry. Every input goes through
/// [`Client::handle`].
pub struct Client {
    engine: Engine,
    machine: InteractionMachine,
    keys: KeyboardFsm,
    groups: GroupRegistry,
    config: Config,
    layout: LayoutPreset,
    layout_cache: BoundedCache<LayoutKey, Vec<PaneRect>>,
    /// Pane under the pointer at press time; a release without a drop target
    /// focuses it.
    pressed_pane: Option<String>,
    message: Option<String>,
    detached: bool,
}

impl Client {
    pub fn new(transport: Box<dyn Transport>, config: Config, store: Box<dyn GroupStore>) -> Self {
        Self {
            engine: Engine::new(transport, config.engine_config()),
            machine: InteractionMachine::new(config.interaction_config()),
            keys: KeyboardFsm::new(),
            groups: GroupRegistry::new(store),
            config,
            layout: LayoutPreset::EvenHorizontal,
            layout_cache: BoundedCache::new(LAYOUT_CACHE_SIZE),
            pressed_pane: None,
            message: None,
            detached: false,
        }
    }

    pub fn connect(&mut self, now: Instant) -> Result<(), EngineError> {
        self.engine.connect(now)
    }

    pub fn engine(&self) -> &Engine { &self.engine }

    pub fn snapshot(&self) -> Option<&SessionSnapshot> { self.engine.snapshot() }

    pub fn interaction(&self) -> &InteractionMachine { &self.machine }

    pub fn groups(&self) -> &GroupRegistry { &self.groups }

    pub fn config(&self) -> &Config { &self.config }

    pub fn set_cell_size(&mut self, cell: CellSize) { self.machine.set_cell_size(cell); }

    /// Last error or command output worth showing on the status line.
    pub fn message(&self) -> Option<&str> { self.message.as_deref() }

    pub fn prompt(&self) -> Option<&str> { self.keys.prompt() }

    pub fn prefix_armed(&self) -> bool { matches!(self.keys.mode(), KeyMode::PrefixWait { .. }) }

    pub fn is_detached(&self) -> bool { self.detached }

    /// Preset that `next-layout` was last cycled to.
    pub fn current_layout(&self) -> LayoutPreset { self.layout }

    pub fn next_deadline(&self) -> Option<Instant> {
        [self.engine.next_deadline(), self.machine.next_deadline(), self.keys.next_deadline(&self.config)]
            .into_iter()
            .flatten()
            .min()
    }

    /// Feed one event through the client. Returns true if the view changed.
    pub fn handle(&mut self, ev: ClientEvent, now: Instant) -> bool {
        let redraw = match ev {
            ClientEvent::PointerDown { x, y } => self.pointer_down(x, y),
            ClientEvent::PointerMove { x, y } => {
                let (rects, active, height) = self.scene_parts();
                let scene = Scene { rects: &rects, active_pane: active.as_deref(), content_height: height };
                let live = self.machine.phase() != Phase::Idle;
                let cmds = self.machine.pointer_move(scene, x, y, now);
                self.send(cmds, now);
                live
            }
            ClientEvent::PointerUp { x, y } => self.pointer_up(x, y, now),
            ClientEvent::Cancel => self.cancel_gesture(now),
            ClientEvent::Key(key) => self.key(key, now),
            ClientEvent::Resize { cols, rows } => {
                self.engine.enqueue(RemoteCommand::Raw(format!("refresh-client -C {}x{}", cols, rows)), now);
                true
            }
            ClientEvent::Tick => self.tick(now),
        };
        let released = self.sync_hold(now);
        redraw || released
    }

    /// Bracketed paste goes to the active pane as one literal.
    pub fn paste(&mut self, text: &str, now: Instant) {
        let Some(target) = self.active_pane() else { return; };
        self.engine.enqueue(RemoteCommand::SendLiteral { target, text: text.to_string() }, now);
    }

    /// Active-window panes with any optimistic geometry applied on top of the
    /// authoritative snapshot.
    pub fn rendered_panes(&self) -> Vec<Pane> {
        let Some(snap) = self.engine.snapshot() else { return Vec::new(); };
        let preview = self.machine.preview();
        snap.active_window_panes().into_iter().map(|p| {
            let mut p = p.clone();
            if let Some(r) = preview.and_then(|rs| rs.iter().find(|r| r.id == p.id)) {
                p.x = r.x;
                p.y = r.y;
                p.width = r.width;
                p.height = r.height;
            }
            p
        }).collect()
    }

    /// Outline of the pane being dragged, following the pointer.
    pub fn drag_ghost(&self) -> Option<PaneRect> {
        let (pane, dx, dy) = self.machine.drag_offset()?;
        let r = self.engine.snapshot()?.pane(pane)?.rect();
        Some(PaneRect {
            x: (r.x as i32 + dx).clamp(0, u16::MAX as i32) as u16,
            y: (r.y as i32 + dy).clamp(0, u16::MAX as i32) as u16,
            ..r
        })
    }

    /// Geometry the active window would take after `next-layout`. Memoized by
    /// preset, pane ids and window size.
    pub fn preview_next_layout(&mut self) -> Vec<PaneRect> {
        let Some(snap) = self.engine.snapshot() else { return Vec::new(); };
        let ids: Vec<String> = snap.active_window_panes().iter().map(|p| p.id.clone()).collect();
        let (w, h) = (snap.total_width, snap.total_height);
        let preset = self.layout.next();
        self.layout_cache
            .get_or_insert_with((preset, ids.clone(), w, h), || {
                preset.build(&ids).map(|tree| compute_positions(&tree, Rect::new(0, 0, w, h))).unwrap_or_default()
            })
            .clone()
    }

    fn authoritative_rects(&self) -> Vec<PaneRect> {
        self.engine.snapshot()
            .map(|s| s.active_window_panes().iter().map(|p| p.rect()).collect())
            .unwrap_or_default()
    }

    fn active_pane(&self) -> Option<String> {
        self.engine.snapshot()?.active_pane_id.clone()
    }

    fn scene_parts(&self) -> (Vec<PaneRect>, Option<String>, u16) {
        let height = self.engine.snapshot().map_or(0, |s| s.total_height);
        (self.authoritative_rects(), self.active_pane(), height)
    }

    fn pointer_down(&mut self, x: f32, y: f32) -> bool {
        let (rects, active, height) = self.scene_parts();
        let (col, row) = self.machine.cell_size().to_cell(x, y);
        let (Ok(col), Ok(row)) = (u16::try_from(col), u16::try_from(row)) else { return false; };
        let scene = Scene { rects: &rects, active_pane: active.as_deref(), content_height: height };
        if let Some((pane, handle)) = divider_at(&rects, col, row) {
            return self.machine.resize_start(scene, &pane, handle, x, y);
        }
        let Some(hit) = pane_at(&rects, col, row).map(|r| r.id.clone()) else { return false; };
        let started = self.machine.drag_start(scene, &hit, x, y);
        if started { self.pressed_pane = Some(hit); }
        started
    }

    fn pointer_up(&mut self, x: f32, y: f32, now: Instant) -> bool {
        let (rects, active, height) = self.scene_parts();
        let scene = Scene { rects: &rects, active_pane: active.as_deref(), content_height: height };
        let was = self.machine.phase();
        let cmds = self.machine.pointer_up(scene, x, y, now);
        let pressed = self.pressed_pane.take();
        if was == Phase::Dragging && cmds.is_empty() && self.machine.phase() == Phase::Idle {
            if let Some(p) = pressed.filter(|p| active.as_deref() != Some(p.as_str())) {
                debug!(pane = %p, "click focus");
                self.engine.enqueue(RemoteCommand::SelectPane { target: p }, now);
            }
        }
        self.send(cmds, now);
        was != Phase::Idle
    }

    fn cancel_gesture(&mut self, now: Instant) -> bool {
        let live = matches!(self.machine.phase(), Phase::Dragging | Phase::Resizing);
        let cmds = self.machine.cancel();
        self.pressed_pane = None;
        self.send(cmds, now);
        live
    }

    fn key(&mut self, key: KeyEvent, now: Instant) -> bool {
        if key.code == KeyCode::Esc && key.kind != KeyEventKind::Release
            && matches!(self.machine.phase(), Phase::Dragging | Phase::Resizing)
        {
            return self.cancel_gesture(now);
        }
        let active = self.active_pane();
        let before = self.keys.mode().clone();
        let action = self.keys.handle_key(&self.config, key, active.as_deref(), now);
        let mode_changed = *self.keys.mode() != before;
        match action {
            Some(KeyAction::Forward(cmd)) => {
                self.engine.enqueue(cmd, now);
                mode_changed
            }
            Some(KeyAction::Command(cmd)) => {
                self.dispatch(cmd, now);
                true
            }
            Some(KeyAction::Prompt(cmd)) => {
                self.prompt_command(cmd, now);
                true
            }
            None => mode_changed,
        }
    }

    fn tick(&mut self, now: Instant) -> bool {
        let events = self.engine.pump(now);
        let mut redraw = self.absorb(events, now);
        redraw |= self.machine.tick(now);
        redraw |= self.keys.tick(&self.config, now);
        redraw
    }

    /// Run a bound command. Client-local commands never reach the wire.
    pub fn dispatch(&mut self, cmd: RemoteCommand, now: Instant) {
        if let Some(cmd) = self.resolve(cmd, now) {
            self.engine.enqueue(cmd, now);
        }
    }

    fn prompt_command(&mut self, cmd: RemoteCommand, now: Instant) {
        let Some(cmd) = self.resolve(cmd, now) else { return; };
        match self.engine.request(cmd) {
            Ok(id) => debug!(id, "prompt command sent"),
            Err(e) => self.message = Some(e.to_string()),
        }
    }

    fn resolve(&mut self, cmd: RemoteCommand, now: Instant) -> Option<RemoteCommand> {
        match cmd {
            RemoteCommand::SelectPaneDir { dir } => {
                let rects = self.authoritative_rects();
                let active = self.active_pane()?;
                let target = find_best_pane_in_direction(&rects, &active, dir);
                if target.is_none() { debug!(?dir, "no pane in that direction"); }
                target.map(|target| RemoteCommand::SelectPane { target })
            }
            RemoteCommand::NextLayout => {
                self.layout = self.layout.next();
                Some(cmd)
            }
            RemoteCommand::Raw(line) => self.run_local(&line, now),
            other => Some(other),
        }
    }

    /// Handle client-side commands. Anything else is passed through raw.
    fn run_local(&mut self, line: &str, now: Instant) -> Option<RemoteCommand> {
        let args = split_args(line);
        let name = args.first()?;
        let target = target_arg(&args).or_else(|| self.active_pane());
        let cmds = match name.as_str() {
            "detach-client" | "detach" => {
                self.detach(now);
                return None;
            }
            "group-add" => target.map(|t| self.groups.add(&t)),
            "group-next" => target.map(|t| self.groups.next(&t)),
            "group-prev" => target.map(|t| self.groups.prev(&t)),
            "group-close" => target.map(|t| self.groups.close(&t)),
            "group-switch" => target.map(|t| self.groups.switch(&t)),
            _ => return Some(RemoteCommand::Raw(line.to_string())),
        };
        self.send(cmds.unwrap_or_default(), now);
        None
    }

    fn detach(&mut self, now: Instant) {
        info!("detaching");
        self.detached = true;
        let events = self.engine.disconnect();
        self.absorb(events, now);
    }

    fn send(&mut self, cmds: Vec<RemoteCommand>, now: Instant) {
        for cmd in cmds {
            self.engine.enqueue(cmd, now);
        }
    }

    /// Keep the engine's held-update flag in step with the gesture machine.
    fn sync_hold(&mut self, now: Instant) -> bool {
        let hold = self.machine.holds_updates();
        if hold == self.engine.updates_held() { return false; }
        let events = self.engine.set_updates_held(hold);
        self.absorb(events, now)
    }

    fn absorb(&mut self, events: Vec<EngineEvent>, now: Instant) -> bool {
        if events.is_empty() { return false; }
        let mut changed = false;
        for ev in events {
            match ev {
                EngineEvent::StateChanged => changed = true,
                EngineEvent::Connected(info) => {
                    debug!(connection = %info.connection_id, "connected");
                    self.message = None;
                }
                EngineEvent::Reconnecting { attempt, delay } => {
                    self.message = Some(format!("reconnecting (attempt {}) in {} ms", attempt, delay.as_millis()));
                }
                EngineEvent::Disconnected if !self.detached => self.message = Some("connection lost".into()),
                EngineEvent::Disconnected => {}
                EngineEvent::Error(e) => self.message = Some(e.to_string()),
                EngineEvent::CommandResult { id, result } => match result {
                    Ok(out) => {
                        debug!(id, "command ok");
                        let out = out.trim_end();
                        if !out.is_empty() { self.message = Some(out.to_string()); }
                    }
                    Err(e) => self.message = Some(e.to_string()),
                },
            }
        }
        if changed { self.after_state_change(now); }
        true
    }

    fn after_state_change(&mut self, now: Instant) {
        let (rects, active, height) = self.scene_parts();
        let scene = Scene { rects: &rects, active_pane: active.as_deref(), content_height: height };
        self.machine.on_update(scene);
        let cmds = match self.engine.snapshot() {
            Some(snap) => self.groups.observe(snap),
            None => Vec::new(),
        };
        self.send(cmds, now);
    }

    pub fn connection_state(&self) -> ConnectionState { self.engine.connection_state() }
}

fn target_arg(args: &[String]) -> Option<String> {
    let i = args.iter().position(|a| a == "-t")?;
    args.get(i + 1).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crossterm::event::KeyModifiers;

    use crate::groups::MemoryGroupStore;
    use crate::transport::mock::MockTransport;
    use crate::transport::TransportEvent;
    use crate::types::{StateUpdate, Window};

    fn pane(id: &str, x: u16, w: u16) -> Pane {
        Pane { id: id.into(), window_id: "@0".into(), x, y: 0, width: w, height: 23, ..Default::default() }
    }

    fn snapshot(left: &str, right: &str) -> SessionSnapshot {
        SessionSnapshot {
            session_name: "main".into(),
            active_window_id: Some("@0".into()),
            active_pane_id: Some("%0".into()),
            panes: vec![pane(left, 0, 40), pane(right, 41, 39)],
            windows: vec![Window { id: "@0".into(), name: "zsh".into(), active: true, ..Default::default() }],
            total_width: 80,
            total_height: 23,
            status_line: String::new(),
        }
    }

    fn client() -> (Client, MockTransport, Instant) {
        let mock = MockTransport::new();
        let mut c = Client::new(Box::new(mock.clone()), Config::default(), Box::new(MemoryGroupStore::new()));
        let now = Instant::now();
        c.connect(now).unwrap();
        mock.push(TransportEvent::Update(StateUpdate::Full { state: snapshot("%0", "%1") }));
        assert!(c.handle(ClientEvent::Tick, now));
        (c, mock, now)
    }

    fn key(code: KeyCode) -> ClientEvent { ClientEvent::Key(KeyEvent::new(code, KeyModifiers::NONE)) }

    fn prefix() -> ClientEvent { ClientEvent::Key(KeyEvent::new(KeyCode::Char('b'), KeyModifiers::CONTROL)) }

    #[test]
    fn typed_keys_are_batched() {
        let (mut c, mock, now) = client();
        c.handle(key(KeyCode::Char('a')), now);
        c.handle(key(KeyCode::Char('b')), now + Duration::from_millis(2));
        assert!(mock.sent().is_empty());
        c.handle(ClientEvent::Tick, now + Duration::from_millis(30));
        assert_eq!(mock.sent(), vec!["send-keys -t %0 -l ab"]);
    }

    #[test]
    fn directional_select_resolves_locally() {
        let (mut c, mock, now) = client();
        c.handle(prefix(), now);
        assert!(c.prefix_armed());
        c.handle(key(KeyCode::Right), now);
        assert_eq!(mock.sent(), vec!["select-pane -t %1"]);
        c.handle(prefix(), now);
        c.handle(key(KeyCode::Left), now);
        assert_eq!(mock.sent().len(), 1);
    }

    #[test]
    fn drag_swap_holds_updates_until_drop() {
        let (mut c, mock, now) = client();
        assert!(c.handle(ClientEvent::PointerDown { x: 5.0, y: 5.0 }, now));
        assert!(c.engine().updates_held());
        c.handle(ClientEvent::PointerMove { x: 50.0, y: 5.0 }, now);
        let rendered = c.rendered_panes();
        assert_eq!(rendered.iter().find(|p| p.id == "%1").map(|p| p.x), Some(0));
        assert_eq!(c.drag_ghost().map(|r| r.x), Some(45));

        // Arrives mid-gesture and is deferred.
        let mut moved = snapshot("%0", "%1");
        moved.status_line = "late".into();
        mock.push(TransportEvent::Update(StateUpdate::Full { state: moved }));
        c.handle(ClientEvent::Tick, now);
        assert_eq!(c.engine().held_update_count(), 1);
        assert_eq!(c.snapshot().map(|s| s.status_line.as_str()), Some(""));

        c.handle(ClientEvent::PointerUp { x: 50.0, y: 5.0 }, now);
        assert_eq!(mock.sent(), vec!["swap-pane -s %0 -t %1"]);
        assert!(!c.engine().updates_held());
        assert_eq!(c.snapshot().map(|s| s.status_line.as_str()), Some("late"));
        assert_eq!(c.interaction().phase(), Phase::CommittingDrag);

        mock.push(TransportEvent::Update(StateUpdate::Full { state: snapshot("%1", "%0") }));
        c.handle(ClientEvent::Tick, now);
        assert_eq!(c.interaction().phase(), Phase::Idle);
    }

    #[test]
    fn click_focuses_pane() {
        let (mut c, mock, now) = client();
        c.handle(ClientEvent::PointerDown { x: 60.0, y: 3.0 }, now);
        c.handle(ClientEvent::PointerUp { x: 60.0, y: 3.0 }, now);
        assert_eq!(mock.sent(), vec!["select-pane -t %1"]);
        assert!(!c.interaction().pointer_captured());
    }

    #[test]
    fn escape_reverts_live_resize() {
        let (mut c, mock, now) = client();
        assert!(c.handle(ClientEvent::PointerDown { x: 40.0, y: 5.0 }, now));
        assert_eq!(c.interaction().phase(), Phase::Resizing);
        c.handle(ClientEvent::PointerMove { x: 45.0, y: 5.0 }, now);
        assert_eq!(c.rendered_panes()[0].width, 45);
        c.handle(key(KeyCode::Esc), now + Duration::from_millis(10));
        assert_eq!(mock.sent(), vec!["resize-pane -t %0 -R 5", "resize-pane -t %0 -L 5"]);
        assert_eq!(c.interaction().phase(), Phase::Idle);
        assert_eq!(c.rendered_panes()[0].width, 40);
        assert!(!c.engine().updates_held());
    }

    fn split_at(left_width: u16) -> SessionSnapshot {
        SessionSnapshot {
            panes: vec![pane("%0", 0, left_width), pane("%1", left_width + 1, 79 - left_width)],
            ..snapshot("%0", "%1")
        }
    }

    #[test]
    fn resize_commit_waits_for_final_width() {
        let (mut c, mock, now) = client();
        c.handle(ClientEvent::PointerDown { x: 40.0, y: 5.0 }, now);
        c.handle(ClientEvent::PointerMove { x: 45.0, y: 5.0 }, now);
        c.handle(ClientEvent::PointerMove { x: 50.0, y: 5.0 }, now + Duration::from_millis(10));
        // The first step lands while the gesture is still live.
        mock.push(TransportEvent::Update(StateUpdate::Full { state: split_at(45) }));
        c.handle(ClientEvent::Tick, now + Duration::from_millis(15));
        assert!(c.engine().updates_held());

        c.handle(ClientEvent::PointerUp { x: 50.0, y: 5.0 }, now + Duration::from_millis(20));
        assert_eq!(mock.sent(), vec!["resize-pane -t %0 -R 5", "resize-pane -t %0 -R 5"]);
        assert_eq!(c.interaction().phase(), Phase::CommittingResize);
        assert_eq!(c.rendered_panes()[0].width, 50);

        mock.push(TransportEvent::Update(StateUpdate::Full { state: split_at(50) }));
        c.handle(ClientEvent::Tick, now + Duration::from_millis(40));
        assert_eq!(c.interaction().phase(), Phase::Idle);
        assert_eq!(c.rendered_panes()[0].width, 50);
    }

    #[test]
    fn detach_binding_disconnects() {
        let (mut c, mock, now) = client();
        c.handle(prefix(), now);
        c.handle(key(KeyCode::Char('d')), now);
        assert!(c.is_detached());
        assert!(!mock.state.borrow().connected);
        assert_eq!(c.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn group_add_creates_hidden_window() {
        let (mut c, mock, now) = client();
        c.handle(prefix(), now);
        c.handle(key(KeyCode::Char('G')), now);
        assert_eq!(mock.sent(), vec!["new-window -d -n __%0_group_1"]);
        assert_eq!(c.groups().groups().len(), 1);
    }

    #[test]
    fn prompt_commands_report_results() {
        let (mut c, mock, now) = client();
        c.handle(prefix(), now);
        c.handle(key(KeyCode::Char(':')), now);
        for ch in "kill-window".chars() {
            c.handle(key(KeyCode::Char(ch)), now);
        }
        assert_eq!(c.prompt(), Some("kill-window"));
        c.handle(key(KeyCode::Enter), now);
        let (id, line) = mock.state.borrow().requests[0].clone();
        assert_eq!(line, "kill-window");
        mock.push(TransportEvent::Response { id, result: Err("can't kill last window".into()) });
        c.handle(ClientEvent::Tick, now);
        assert!(c.message().is_some_and(|m| m.contains("can't kill last window")));
    }

    #[test]
    fn next_layout_preview_is_memoized() {
        let (mut c, _, _) = client();
        let a = c.preview_next_layout();
        let b = c.preview_next_layout();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(c.layout_cache.stats(), (1, 1));
        // EvenVertical stacks the panes.
        assert_eq!((a[0].y, a[1].x), (0, 0));
    }

    #[test]
    fn paste_goes_to_active_pane() {
        let (mut c, mock, now) = client();
        c.paste("echo hi", now);
        c.handle(ClientEvent::Tick, now + Duration::from_millis(20));
        assert_eq!(mock.sent(), vec!["send-keys -t %0 -l 'echo hi'"]);
    }

    #[test]
    fn deadline_tracks_pending_batch() {
        let (mut c, _, now) = client();
        assert_eq!(c.next_deadline(), None);
        c.handle(key(KeyCode::Char('x')), now);
        assert!(c.next_deadline().is_some());
    }
}
