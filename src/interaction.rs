use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::commands::RemoteCommand;
use crate::layout::pane_at;
use crate::preview::{divider_sides, resize_preview, snap_delta, swap_preview_full, swap_preview_half};
use crate::types::{CellSize, Direction, PaneRect, ResizeHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionConfig {
    pub commit_timeout: Duration,
    /// Minimum spacing between resize commands while the pointer moves.
    pub resize_throttle: Duration,
    /// Rows below the pane area that act as the "detach to new window" strip.
    pub status_bar_rows: u16,
    pub min_pane_size: u16,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(5),
            resize_throttle: Duration::from_millis(50),
            status_bar_rows: 1,
            min_pane_size: 2,
        }
    }
}

/// What the machine sees of the world: authoritative rectangles of the
/// active window, the active pane, and the height of the pane area.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub rects: &'a [PaneRect],
    pub active_pane: Option<&'a str>,
    pub content_height: u16,
}

/// Pointer listener registration scoped to a gesture state. Acquired on
/// entering `Dragging`/`Resizing` and released when the state is left by any
/// path, including cancel and drop of the whole machine.
#[derive(Debug)]
pub struct PointerCapture {
    flag: Rc<Cell<bool>>,
}

impl PointerCapture {
    fn acquire(flag: &Rc<Cell<bool>>) -> Self {
        flag.set(true);
        debug!("pointer captured");
        Self { flag: Rc::clone(flag) }
    }
}

impl Drop for PointerCapture {
    fn drop(&mut self) {
        self.flag.set(false);
        debug!("pointer released");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragTarget {
    Pane(String),
    /// Pointer is over the status strip: break the pane out into a new window.
    Detach,
}

#[derive(Debug)]
pub enum InteractionState {
    Idle,
    Dragging {
        pane: String,
        start: (f32, f32),
        pointer: (f32, f32),
        target: Option<DragTarget>,
        _capture: PointerCapture,
    },
    CommittingDrag {
        pane: String,
        target: String,
        /// Where `pane` lands once the swap is applied remotely.
        expected: PaneRect,
        deadline: Instant,
    },
    Resizing {
        pane: String,
        handle: ResizeHandle,
        /// Pane on the near side of the divider; resize commands address it.
        command_target: String,
        start: (f32, f32),
        total: i32,
        last_sent: i32,
        last_sent_at: Option<Instant>,
        before: PaneRect,
        _capture: PointerCapture,
    },
    CommittingResize {
        pane: String,
        /// Final preview rectangle of `pane`; earlier increments do not confirm.
        expected: PaneRect,
        deadline: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase { Idle, Dragging, CommittingDrag, Resizing, CommittingResize }

pub struct InteractionMachine {
    state: InteractionState,
    preview: Option<Vec<PaneRect>>,
    config: InteractionConfig,
    cell: CellSize,
    captured: Rc<Cell<bool>>,
}

impl InteractionMachine {
    pub fn new(config: InteractionConfig) -> Self {
        Self { state: InteractionState::Idle, preview: None, config, cell: CellSize::default(), captured: Rc::new(Cell::new(false)) }
    }

    pub fn set_cell_size(&mut self, cell: CellSize) { self.cell = cell; }

    pub fn cell_size(&self) -> CellSize { self.cell }

    pub fn state(&self) -> &InteractionState { &self.state }

    pub fn phase(&self) -> Phase {
        match self.state {
            InteractionState::Idle => Phase::Idle,
            InteractionState::Dragging { .. } => Phase::Dragging,
            InteractionState::CommittingDrag { .. } => Phase::CommittingDrag,
            InteractionState::Resizing { .. } => Phase::Resizing,
            InteractionState::CommittingResize { .. } => Phase::CommittingResize,
        }
    }

    /// Authoritative updates are deferred while a gesture is live.
    pub fn holds_updates(&self) -> bool {
        matches!(self.phase(), Phase::Dragging | Phase::Resizing)
    }

    pub fn pointer_captured(&self) -> bool { self.captured.get() }

    /// Optimistic rectangles, if any, that override the snapshot geometry.
    pub fn preview(&self) -> Option<&[PaneRect]> { self.preview.as_deref() }

    pub fn drag_target(&self) -> Option<&DragTarget> {
        match &self.state {
            InteractionState::Dragging { target, .. } => target.as_ref(),
            _ => None,
        }
    }

    /// Dragged pane and its offset from the drag start, in whole cells.
    pub fn drag_offset(&self) -> Option<(&str, i32, i32)> {
        match &self.state {
            InteractionState::Dragging { pane, start, pointer, .. } => {
                let dx = ((pointer.0 - start.0) / self.cell.width.max(f32::EPSILON)).round() as i32;
                let dy = ((pointer.1 - start.1) / self.cell.height.max(f32::EPSILON)).round() as i32;
                Some((pane.as_str(), dx, dy))
            }
            _ => None,
        }
    }

    pub fn drag_start(&mut self, scene: Scene<'_>, pane: &str, px: f32, py: f32) -> bool {
        if !matches!(self.state, InteractionState::Idle) { return false; }
        if !scene.rects.iter().any(|r| r.id == pane) { return false; }
        debug!(pane, "drag start");
        self.state = InteractionState::Dragging {
            pane: pane.to_string(),
            start: (px, py),
            pointer: (px, py),
            target: None,
            _capture: PointerCapture::acquire(&self.captured),
        };
        self.preview = None;
        true
    }

    pub fn resize_start(&mut self, scene: Scene<'_>, pane: &str, handle: ResizeHandle, px: f32, py: f32) -> bool {
        if !matches!(self.state, InteractionState::Idle) { return false; }
        let Some(sides) = divider_sides(scene.rects, pane, handle) else { return false; };
        let Some(before) = scene.rects.iter().find(|r| r.id == pane).cloned() else { return false; };
        let command_target = if sides.before.iter().any(|b| b == pane) {
            pane.to_string()
        } else {
            sides.before[0].clone()
        };
        debug!(pane, ?handle, "resize start");
        self.state = InteractionState::Resizing {
            pane: pane.to_string(),
            handle,
            command_target,
            start: (px, py),
            total: 0,
            last_sent: 0,
            last_sent_at: None,
            before,
            _capture: PointerCapture::acquire(&self.captured),
        };
        self.preview = Some(scene.rects.to_vec());
        true
    }

    pub fn pointer_move(&mut self, scene: Scene<'_>, px: f32, py: f32, now: Instant) -> Vec<RemoteCommand> {
        match self.phase() {
            Phase::Dragging => { self.track_drag(scene, px, py); Vec::new() }
            Phase::Resizing => self.track_resize(scene, px, py, now, false),
            _ => Vec::new(),
        }
    }

    pub fn pointer_up(&mut self, scene: Scene<'_>, px: f32, py: f32, now: Instant) -> Vec<RemoteCommand> {
        match self.phase() {
            Phase::Dragging => {
                self.track_drag(scene, px, py);
                self.finish_drag(scene, now)
            }
            Phase::Resizing => {
                let cmds = self.track_resize(scene, px, py, now, true);
                let state = std::mem::replace(&mut self.state, InteractionState::Idle);
                if let InteractionState::Resizing { pane, total, before, .. } = state {
                    if total == 0 && cmds.is_empty() {
                        self.preview = None;
                        debug!(pane, "resize ended without change");
                    } else {
                        let expected = self
                            .preview
                            .as_ref()
                            .and_then(|rects| rects.iter().find(|r| r.id == pane))
                            .cloned()
                            .unwrap_or(before);
                        debug!(pane, total, "resize committing");
                        self.state = InteractionState::CommittingResize { pane, expected, deadline: now + self.config.commit_timeout };
                    }
                }
                cmds
            }
            _ => Vec::new(),
        }
    }

    /// Escape or explicit cancel. Only live gestures can be cancelled; a
    /// resize that already moved the remote divider is stepped back to zero.
    pub fn cancel(&mut self) -> Vec<RemoteCommand> {
        let mut cmds = Vec::new();
        match &self.state {
            InteractionState::Dragging { pane, .. } => debug!(pane, "drag cancelled"),
            InteractionState::Resizing { pane, handle, command_target, last_sent, .. } => {
                debug!(pane, "resize cancelled");
                if *last_sent != 0 {
                    cmds.push(resize_step(command_target, *handle, -*last_sent));
                }
            }
            _ => return cmds,
        }
        self.state = InteractionState::Idle;
        self.preview = None;
        cmds
    }

    /// Check a freshly applied authoritative state against a pending commit.
    /// Returns true when the commit was resolved.
    pub fn on_update(&mut self, scene: Scene<'_>) -> bool {
        let confirmed = match &self.state {
            InteractionState::CommittingDrag { pane, target, expected, .. } => {
                let p = scene.rects.iter().find(|r| &r.id == pane);
                let t = scene.rects.iter().any(|r| &r.id == target);
                match p {
                    None => true,
                    Some(_) if !t => true,
                    Some(p) => p.x == expected.x && p.y == expected.y && p.width == expected.width && p.height == expected.height,
                }
            }
            InteractionState::CommittingResize { pane, expected, .. } => {
                match scene.rects.iter().find(|r| &r.id == pane) {
                    None => true,
                    Some(p) => p == expected,
                }
            }
            _ => false,
        };
        if confirmed {
            debug!(phase = ?self.phase(), "commit confirmed");
            self.state = InteractionState::Idle;
            self.preview = None;
        }
        confirmed
    }

    /// Resolve an expired commit by falling back to authoritative geometry.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired = match &self.state {
            InteractionState::CommittingDrag { deadline, .. } | InteractionState::CommittingResize { deadline, .. } => now >= *deadline,
            _ => false,
        };
        if expired {
            debug!(phase = ?self.phase(), "commit timed out, reverting");
            self.state = InteractionState::Idle;
            self.preview = None;
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            InteractionState::CommittingDrag { deadline, .. } | InteractionState::CommittingResize { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    fn track_drag(&mut self, scene: Scene<'_>, px: f32, py: f32) {
        let (col, row) = self.cell.to_cell(px, py);
        let strip = scene.content_height as i32..scene.content_height.saturating_add(self.config.status_bar_rows) as i32;
        let InteractionState::Dragging { pane, pointer, target, .. } = &mut self.state else { return; };
        *pointer = (px, py);
        if col >= 0 && strip.contains(&row) {
            *target = Some(DragTarget::Detach);
        } else if col >= 0 && row >= 0 && col <= u16::MAX as i32 && row <= u16::MAX as i32 {
            // Dividers and empty space keep whatever target was last hovered.
            if let Some(hit) = pane_at(scene.rects, col as u16, row as u16) {
                *target = if hit.id == *pane { None } else { Some(DragTarget::Pane(hit.id.clone())) };
            }
        }
        self.preview = match target {
            Some(DragTarget::Pane(t)) => Some(swap_preview_half(scene.rects, pane, t)),
            _ => None,
        };
    }

    fn finish_drag(&mut self, scene: Scene<'_>, now: Instant) -> Vec<RemoteCommand> {
        let state = std::mem::replace(&mut self.state, InteractionState::Idle);
        let InteractionState::Dragging { pane, target, .. } = state else { return Vec::new(); };
        match target {
            Some(DragTarget::Pane(t)) => {
                let Some(expected) = scene.rects.iter().find(|r| r.id == t).cloned() else {
                    self.preview = None;
                    return Vec::new();
                };
                let mut cmds = vec![RemoteCommand::SwapPanes { src: pane.clone(), dst: t.clone() }];
                if let Some(active) = scene.active_pane {
                    if active != pane {
                        cmds.push(RemoteCommand::SelectPane { target: active.to_string() });
                    }
                }
                debug!(pane, target = %t, "drag committing");
                self.preview = Some(swap_preview_full(scene.rects, &pane, &t));
                self.state = InteractionState::CommittingDrag { pane, target: t, expected, deadline: now + self.config.commit_timeout };
                cmds
            }
            Some(DragTarget::Detach) => {
                debug!(pane, "drag detach");
                self.preview = None;
                vec![RemoteCommand::BreakPane { src: pane, name: None, detached: false }]
            }
            None => {
                self.preview = None;
                Vec::new()
            }
        }
    }

    fn track_resize(&mut self, scene: Scene<'_>, px: f32, py: f32, now: Instant, force: bool) -> Vec<RemoteCommand> {
        let min = self.config.min_pane_size;
        let throttle = self.config.resize_throttle;
        let cell = self.cell;
        let InteractionState::Resizing { pane, handle, command_target, start, total, last_sent, last_sent_at, .. } = &mut self.state else {
            return Vec::new();
        };
        let snapped = match handle.axis() {
            Direction::Horizontal => snap_delta(px - start.0, cell.width),
            Direction::Vertical => snap_delta(py - start.1, cell.height),
        };
        let (rects, applied) = resize_preview(scene.rects, pane, *handle, snapped, min);
        *total = applied;
        self.preview = Some(rects);

        let due = force || last_sent_at.map_or(true, |t| now.saturating_duration_since(t) >= throttle);
        if *total == *last_sent || !due { return Vec::new(); }
        let step = *total - *last_sent;
        *last_sent = *total;
        *last_sent_at = Some(now);
        vec![resize_step(command_target, *handle, step)]
    }
}

fn resize_step(target: &str, handle: ResizeHandle, step: i32) -> RemoteCommand {
    RemoteCommand::ResizePane {
        target: Some(target.to_string()),
        dir: handle.step_dir(step),
        amount: step.unsigned_abs().min(u16::MAX as u32) as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FocusDir;
    use proptest::prelude::*;

    const CELL: CellSize = CellSize { width: 8.0, height: 16.0 };

    fn two_cols() -> Vec<PaneRect> {
        vec![PaneRect::new("%0", 0, 0, 40, 24), PaneRect::new("%1", 41, 0, 39, 24)]
    }

    fn scene<'a>(rects: &'a [PaneRect], active: &'a str) -> Scene<'a> {
        Scene { rects, active_pane: Some(active), content_height: 24 }
    }

    fn machine(throttle_ms: u64) -> InteractionMachine {
        let mut m = InteractionMachine::new(InteractionConfig {
            resize_throttle: Duration::from_millis(throttle_ms),
            ..Default::default()
        });
        m.set_cell_size(CELL);
        m
    }

    // Pixel centre of a cell.
    fn px(col: u16, row: u16) -> (f32, f32) {
        (col as f32 * CELL.width + 4.0, row as f32 * CELL.height + 8.0)
    }

    fn signed(cmd: &RemoteCommand) -> i32 {
        match cmd {
            RemoteCommand::ResizePane { dir: FocusDir::Right | FocusDir::Down, amount, .. } => *amount as i32,
            RemoteCommand::ResizePane { dir: FocusDir::Left | FocusDir::Up, amount, .. } => -(*amount as i32),
            other => panic!("not a resize: {:?}", other),
        }
    }

    #[test]
    fn drag_swap_scenario() {
        let rects = two_cols();
        let mut m = machine(0);
        let t0 = Instant::now();
        let (sx, sy) = px(10, 10);
        assert!(m.drag_start(scene(&rects, "%1"), "%0", sx, sy));
        assert!(m.pointer_captured());
        assert!(m.holds_updates());

        let (mx, my) = px(60, 10);
        assert!(m.pointer_move(scene(&rects, "%1"), mx, my, t0).is_empty());
        assert_eq!(m.drag_target(), Some(&DragTarget::Pane("%1".into())));
        let half = m.preview().unwrap();
        assert_eq!(half[0], rects[0]);
        assert_eq!(half[1], PaneRect::new("%1", 0, 0, 40, 24));
        assert_eq!(m.drag_offset(), Some(("%0", 50, 0)));

        let cmds = m.pointer_up(scene(&rects, "%1"), mx, my, t0);
        assert_eq!(cmds, vec![
            RemoteCommand::SwapPanes { src: "%0".into(), dst: "%1".into() },
            RemoteCommand::SelectPane { target: "%1".into() },
        ]);
        assert_eq!(m.phase(), Phase::CommittingDrag);
        assert!(!m.pointer_captured());
        assert!(!m.holds_updates());
        let full = m.preview().unwrap();
        assert_eq!(full[0], PaneRect::new("%0", 41, 0, 39, 24));
        assert_eq!(full[1], PaneRect::new("%1", 0, 0, 40, 24));

        // A non-geometry update does not resolve the commit.
        assert!(!m.on_update(scene(&rects, "%1")));
        let swapped = vec![PaneRect::new("%0", 41, 0, 39, 24), PaneRect::new("%1", 0, 0, 40, 24)];
        assert!(m.on_update(scene(&swapped, "%1")));
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.preview().is_none());
    }

    #[test]
    fn drag_of_active_pane_skips_reselect() {
        let rects = two_cols();
        let mut m = machine(0);
        let (sx, sy) = px(5, 5);
        m.drag_start(scene(&rects, "%0"), "%0", sx, sy);
        let (mx, my) = px(70, 5);
        let cmds = m.pointer_up(scene(&rects, "%0"), mx, my, Instant::now());
        assert_eq!(cmds, vec![RemoteCommand::SwapPanes { src: "%0".into(), dst: "%1".into() }]);
    }

    #[test]
    fn drag_commit_timeout_reverts() {
        let rects = two_cols();
        let mut m = machine(0);
        let t0 = Instant::now();
        let (sx, sy) = px(10, 10);
        m.drag_start(scene(&rects, "%0"), "%0", sx, sy);
        let (mx, my) = px(60, 10);
        m.pointer_up(scene(&rects, "%0"), mx, my, t0);
        assert_eq!(m.next_deadline(), Some(t0 + Duration::from_secs(5)));
        assert!(!m.tick(t0 + Duration::from_millis(4999)));
        assert!(m.tick(t0 + Duration::from_secs(5)));
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.preview().is_none());
    }

    #[test]
    fn drag_to_status_strip_detaches() {
        let rects = two_cols();
        let mut m = machine(0);
        let (sx, sy) = px(10, 10);
        m.drag_start(scene(&rects, "%0"), "%0", sx, sy);
        let (mx, my) = px(10, 24);
        m.pointer_move(scene(&rects, "%0"), mx, my, Instant::now());
        assert_eq!(m.drag_target(), Some(&DragTarget::Detach));
        let cmds = m.pointer_up(scene(&rects, "%0"), mx, my, Instant::now());
        assert_eq!(cmds, vec![RemoteCommand::BreakPane { src: "%0".into(), name: None, detached: false }]);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn tall_status_strip_does_not_overflow() {
        let rects = two_cols();
        let mut m = InteractionMachine::new(InteractionConfig { status_bar_rows: u16::MAX, ..Default::default() });
        m.set_cell_size(CELL);
        let (sx, sy) = px(10, 10);
        m.drag_start(scene(&rects, "%0"), "%0", sx, sy);
        let (mx, my) = px(10, 900);
        m.pointer_move(scene(&rects, "%0"), mx, my, Instant::now());
        assert_eq!(m.drag_target(), Some(&DragTarget::Detach));
    }

    #[test]
    fn divider_keeps_previous_target_and_origin_clears_it() {
        let rects = two_cols();
        let mut m = machine(0);
        let (sx, sy) = px(10, 10);
        m.drag_start(scene(&rects, "%0"), "%0", sx, sy);
        let (mx, my) = px(60, 10);
        m.pointer_move(scene(&rects, "%0"), mx, my, Instant::now());
        let (dx, dy) = px(40, 10);
        m.pointer_move(scene(&rects, "%0"), dx, dy, Instant::now());
        assert_eq!(m.drag_target(), Some(&DragTarget::Pane("%1".into())));
        let (ox, oy) = px(3, 3);
        m.pointer_move(scene(&rects, "%0"), ox, oy, Instant::now());
        assert_eq!(m.drag_target(), None);
        assert!(m.pointer_up(scene(&rects, "%0"), ox, oy, Instant::now()).is_empty());
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn escape_cancels_drag_without_commands() {
        let rects = two_cols();
        let mut m = machine(0);
        m.drag_start(scene(&rects, "%0"), "%0", 0.0, 0.0);
        let (mx, my) = px(60, 10);
        m.pointer_move(scene(&rects, "%0"), mx, my, Instant::now());
        assert!(m.cancel().is_empty());
        assert_eq!(m.phase(), Phase::Idle);
        assert!(!m.pointer_captured());
        assert!(m.preview().is_none());
    }

    #[test]
    fn resize_sends_increments_and_remainder() {
        let rects = two_cols();
        let mut m = machine(50);
        let t0 = Instant::now();
        assert!(m.resize_start(scene(&rects, "%0"), "%0", ResizeHandle::E, 320.0, 100.0));
        let c1 = m.pointer_move(scene(&rects, "%0"), 320.0 + 16.0, 100.0, t0);
        assert_eq!(c1, vec![RemoteCommand::ResizePane { target: Some("%0".into()), dir: FocusDir::Right, amount: 2 }]);
        // Throttled: preview follows, no command.
        assert!(m.pointer_move(scene(&rects, "%0"), 320.0 + 40.0, 100.0, t0 + Duration::from_millis(10)).is_empty());
        assert_eq!(m.preview().unwrap()[0].width, 45);
        let up = m.pointer_up(scene(&rects, "%0"), 320.0 + 40.0, 100.0, t0 + Duration::from_millis(20));
        assert_eq!(up, vec![RemoteCommand::ResizePane { target: Some("%0".into()), dir: FocusDir::Right, amount: 3 }]);
        assert_eq!(m.phase(), Phase::CommittingResize);
        assert_eq!(m.preview().unwrap()[0].width, 45);

        // Stale update with the old geometry keeps the preview.
        assert!(!m.on_update(scene(&rects, "%0")));
        // So does one that only reflects the first increment.
        let partial = vec![PaneRect::new("%0", 0, 0, 42, 24), PaneRect::new("%1", 43, 0, 37, 24)];
        assert!(!m.on_update(scene(&partial, "%0")));
        assert_eq!(m.preview().unwrap()[0].width, 45);
        let moved = vec![PaneRect::new("%0", 0, 0, 45, 24), PaneRect::new("%1", 46, 0, 34, 24)];
        assert!(m.on_update(scene(&moved, "%0")));
        assert!(m.preview().is_none());
    }

    #[test]
    fn resize_from_far_side_addresses_near_pane() {
        let rects = two_cols();
        let mut m = machine(0);
        assert!(m.resize_start(scene(&rects, "%0"), "%1", ResizeHandle::W, 328.0, 0.0));
        let cmds = m.pointer_move(scene(&rects, "%0"), 328.0 - 24.0, 0.0, Instant::now());
        assert_eq!(cmds, vec![RemoteCommand::ResizePane { target: Some("%0".into()), dir: FocusDir::Left, amount: 3 }]);
    }

    #[test]
    fn resize_cancel_reverts_sent_steps() {
        let rects = two_cols();
        let mut m = machine(0);
        m.resize_start(scene(&rects, "%0"), "%0", ResizeHandle::E, 0.0, 0.0);
        m.pointer_move(scene(&rects, "%0"), -32.0, 0.0, Instant::now());
        assert_eq!(m.cancel(), vec![RemoteCommand::ResizePane { target: Some("%0".into()), dir: FocusDir::Right, amount: 4 }]);
        assert_eq!(m.phase(), Phase::Idle);
        assert!(!m.pointer_captured());
    }

    #[test]
    fn resize_without_movement_returns_to_idle() {
        let rects = two_cols();
        let mut m = machine(0);
        m.resize_start(scene(&rects, "%0"), "%0", ResizeHandle::E, 0.0, 0.0);
        assert!(m.pointer_up(scene(&rects, "%0"), 2.0, 0.0, Instant::now()).is_empty());
        assert_eq!(m.phase(), Phase::Idle);
        assert!(m.preview().is_none());
    }

    #[test]
    fn resize_start_needs_a_neighbour() {
        let rects = two_cols();
        let mut m = machine(0);
        assert!(!m.resize_start(scene(&rects, "%0"), "%1", ResizeHandle::E, 0.0, 0.0));
        assert!(!m.resize_start(scene(&rects, "%0"), "%9", ResizeHandle::E, 0.0, 0.0));
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn dropping_machine_releases_capture() {
        let rects = two_cols();
        let mut m = machine(0);
        m.drag_start(scene(&rects, "%0"), "%0", 0.0, 0.0);
        let flag = Rc::clone(&m.captured);
        assert!(flag.get());
        drop(m);
        assert!(!flag.get());
    }

    proptest! {
        #[test]
        fn resize_steps_sum_to_final_delta(
            deltas in proptest::collection::btree_set(1i32..37, 1..12),
            throttle in 0u64..40,
        ) {
            let deltas: Vec<i32> = deltas.into_iter().collect();
            let rects = two_cols();
            let mut m = machine(throttle);
            let t0 = Instant::now();
            m.resize_start(scene(&rects, "%0"), "%0", ResizeHandle::E, 0.0, 0.0);
            let mut sent = 0;
            for (i, d) in deltas.iter().enumerate() {
                let cmds = m.pointer_move(scene(&rects, "%0"), *d as f32 * CELL.width, 0.0, t0 + Duration::from_millis(i as u64 * 10));
                prop_assert!(cmds.len() <= 1);
                sent += cmds.iter().map(signed).sum::<i32>();
            }
            let last = *deltas.last().unwrap();
            let up = m.pointer_up(scene(&rects, "%0"), last as f32 * CELL.width, 0.0, t0 + Duration::from_secs(1));
            prop_assert!(up.len() <= 1);
            let remainder: i32 = up.iter().map(signed).sum();
            prop_assert_eq!(remainder, last - sent);
            prop_assert_eq!(sent + remainder, last);
        }
    }
}
