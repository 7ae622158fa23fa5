use std::collections::HashMap;
use std::sync::OnceLock;

use ratatui::prelude::Rect;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// One run of identically styled cells in a pane row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellRun {
    pub text: String,
    #[serde(default)]
    pub fg: String,
    #[serde(default)]
    pub bg: String,
    #[serde(default)]
    pub flags: u8,
    #[serde(default)]
    pub width: u16,
}

pub const FLAG_DIM: u8 = 1;
pub const FLAG_BOLD: u8 = 2;
pub const FLAG_ITALIC: u8 = 4;
pub const FLAG_UNDERLINE: u8 = 8;
pub const FLAG_INVERSE: u8 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowRuns {
    pub runs: Vec<CellRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pane {
    /// Remote pane id, e.g. "%3".
    pub id: String,
    /// Owning window id, e.g. "@1".
    pub window_id: String,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cursor_x: u16,
    #[serde(default)]
    pub cursor_y: u16,
    #[serde(default)]
    pub in_mode: bool,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_tab_index: Option<u32>,
    #[serde(default)]
    pub content: Vec<RowRuns>,
}

impl Pane {
    pub fn rect(&self) -> PaneRect {
        PaneRect { id: self.id.clone(), x: self.x, y: self.y, width: self.width, height: self.height }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Window {
    /// Remote window id, e.g. "@1".
    pub id: String,
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub is_pane_group_window: bool,
    #[serde(default)]
    pub is_float_window: bool,
    #[serde(default)]
    pub float_parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowKind {
    Normal,
    /// Hidden holder for an inactive pane-group member.
    Group { parent_pane: String, index: u32 },
    /// Hidden holder for a detached overlay pane.
    Float,
}

fn group_window_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^__%(\d+)_group_(\d+)$").expect("static regex"))
}

fn float_window_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^__float_\w+$").expect("static regex"))
}

/// Classify a window by its remote name (`__%5_group_1`, `__float_7`).
pub fn window_kind_from_name(name: &str) -> WindowKind {
    if let Some(c) = group_window_re().captures(name) {
        let index = c[2].parse::<u32>().unwrap_or(0);
        return WindowKind::Group { parent_pane: format!("%{}", &c[1]), index };
    }
    if float_window_re().is_match(name) { return WindowKind::Float; }
    WindowKind::Normal
}

pub fn group_window_name(parent_pane: &str, index: u32) -> String {
    format!("__%{}_group_{}", parent_pane.trim_start_matches('%'), index)
}

impl Window {
    pub fn kind(&self) -> WindowKind {
        match window_kind_from_name(&self.name) {
            WindowKind::Normal if self.is_float_window => WindowKind::Float,
            k => k,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.is_pane_group_window || self.is_float_window || self.kind() != WindowKind::Normal
    }
}

/// The full mirrored session state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_name: String,
    #[serde(default)]
    pub active_window_id: Option<String>,
    #[serde(default)]
    pub active_pane_id: Option<String>,
    #[serde(default)]
    pub panes: Vec<Pane>,
    #[serde(default)]
    pub windows: Vec<Window>,
    #[serde(default)]
    pub total_width: u16,
    #[serde(default)]
    pub total_height: u16,
    #[serde(default)]
    pub status_line: String,
}

impl SessionSnapshot {
    pub fn pane(&self, id: &str) -> Option<&Pane> {
        self.panes.iter().find(|p| p.id == id)
    }

    pub fn window(&self, id: &str) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// Panes tiled in the given window, in snapshot order.
    pub fn window_panes<'a>(&'a self, window_id: &'a str) -> impl Iterator<Item = &'a Pane> + 'a {
        self.panes.iter().filter(move |p| p.window_id == window_id)
    }

    pub fn active_window_panes(&self) -> Vec<&Pane> {
        match &self.active_window_id {
            Some(w) => self.window_panes(w).collect(),
            None => Vec::new(),
        }
    }

    pub fn visible_windows(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter().filter(|w| !w.is_hidden())
    }
}

/// Keeps an explicit `null` as `Some(None)` so a patch can clear a field.
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Field-wise pane patch. `None` means unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaneDelta {
    pub window_id: Option<String>,
    pub x: Option<u16>,
    pub y: Option<u16>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub active: Option<bool>,
    pub command: Option<String>,
    pub title: Option<String>,
    pub cursor_x: Option<u16>,
    pub cursor_y: Option<u16>,
    pub in_mode: Option<bool>,
    #[serde(deserialize_with = "double_option")]
    pub group_id: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub group_tab_index: Option<Option<u32>>,
    pub content: Option<Vec<RowRuns>>,
}

impl PaneDelta {
    pub fn apply_to(&self, p: &mut Pane) {
        if let Some(v) = &self.window_id { p.window_id = v.clone(); }
        if let Some(v) = self.x { p.x = v; }
        if let Some(v) = self.y { p.y = v; }
        if let Some(v) = self.width { p.width = v; }
        if let Some(v) = self.height { p.height = v; }
        if let Some(v) = self.active { p.active = v; }
        if let Some(v) = &self.command { p.command = v.clone(); }
        if let Some(v) = &self.title { p.title = v.clone(); }
        if let Some(v) = self.cursor_x { p.cursor_x = v; }
        if let Some(v) = self.cursor_y { p.cursor_y = v; }
        if let Some(v) = self.in_mode { p.in_mode = v; }
        if let Some(v) = &self.group_id { p.group_id = v.clone(); }
        if let Some(v) = self.group_tab_index { p.group_tab_index = v; }
        if let Some(v) = &self.content { p.content = v.clone(); }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowDelta {
    pub index: Option<u32>,
    pub name: Option<String>,
    pub active: Option<bool>,
    pub is_pane_group_window: Option<bool>,
    pub is_float_window: Option<bool>,
    #[serde(deserialize_with = "double_option")]
    pub float_parent: Option<Option<String>>,
}

impl WindowDelta {
    pub fn apply_to(&self, w: &mut Window) {
        if let Some(v) = self.index { w.index = v; }
        if let Some(v) = &self.name { w.name = v.clone(); }
        if let Some(v) = self.active { w.active = v; }
        if let Some(v) = self.is_pane_group_window { w.is_pane_group_window = v; }
        if let Some(v) = self.is_float_window { w.is_float_window = v; }
        if let Some(v) = &self.float_parent { w.float_parent = v.clone(); }
    }
}

/// A sequenced partial update. In the entity maps a `null` patch removes the entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Delta {
    pub seq: u64,
    pub panes: Option<HashMap<String, Option<PaneDelta>>>,
    pub new_panes: Option<Vec<Pane>>,
    pub windows: Option<HashMap<String, Option<WindowDelta>>>,
    pub new_windows: Option<Vec<Window>>,
    pub active_window_id: Option<String>,
    pub active_pane_id: Option<String>,
    pub status_line: Option<String>,
    pub total_width: Option<u16>,
    pub total_height: Option<u16>,
}

impl Delta {
    pub fn new(seq: u64) -> Self { Self { seq, ..Default::default() } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StateUpdate {
    Full { state: SessionSnapshot },
    Delta { delta: Delta },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Children side by side; divider is a column.
    Horizontal,
    /// Children stacked; divider is a row.
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusDir { Left, Right, Up, Down }

impl FocusDir {
    pub fn flag(self) -> &'static str {
        match self { FocusDir::Left => "-L", FocusDir::Right => "-R", FocusDir::Up => "-U", FocusDir::Down => "-D" }
    }

    pub fn axis(self) -> Direction {
        match self { FocusDir::Left | FocusDir::Right => Direction::Horizontal, FocusDir::Up | FocusDir::Down => Direction::Vertical }
    }
}

/// Which edge of a pane a resize gesture grabbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeHandle { N, S, E, W }

impl ResizeHandle {
    pub fn axis(self) -> Direction {
        match self { ResizeHandle::E | ResizeHandle::W => Direction::Horizontal, ResizeHandle::N | ResizeHandle::S => Direction::Vertical }
    }

    /// Direction the divider moves for a positive or negative cell step.
    pub fn step_dir(self, step: i32) -> FocusDir {
        match (self.axis(), step >= 0) {
            (Direction::Horizontal, true) => FocusDir::Right,
            (Direction::Horizontal, false) => FocusDir::Left,
            (Direction::Vertical, true) => FocusDir::Down,
            (Direction::Vertical, false) => FocusDir::Up,
        }
    }
}

/// Cell-grid rectangle of one pane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaneRect {
    pub id: String,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl PaneRect {
    pub fn new(id: impl Into<String>, x: u16, y: u16, width: u16, height: u16) -> Self {
        Self { id: id.into(), x, y, width, height }
    }

    pub fn area(&self) -> Rect { Rect::new(self.x, self.y, self.width, self.height) }

    pub fn contains(&self, col: u16, row: u16) -> bool {
        col >= self.x && col < self.x + self.width && row >= self.y && row < self.y + self.height
    }

    pub fn right(&self) -> u16 { self.x + self.width }
    pub fn bottom(&self) -> u16 { self.y + self.height }
}

/// Pixel size of one character cell, as measured by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    pub width: f32,
    pub height: f32,
}

impl Default for CellSize {
    fn default() -> Self { Self { width: 1.0, height: 1.0 } }
}

impl CellSize {
    pub fn to_cell(&self, px: f32, py: f32) -> (i32, i32) {
        ((px / self.width.max(f32::EPSILON)).floor() as i32, (py / self.height.max(f32::EPSILON)).floor() as i32)
    }
}
