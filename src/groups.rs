use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::commands::RemoteCommand;
use crate::error::GroupStoreError;
use crate::types::{group_window_name, SessionSnapshot};

/// Panes sharing one visual slot; `members[active_index]` is the one shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneGroup {
    pub id: String,
    pub members: Vec<String>,
    pub active_index: usize,
}

impl PaneGroup {
    pub fn active_member(&self) -> Option<&str> {
        self.members.get(self.active_index).map(|s| s.as_str())
    }

    pub fn contains(&self, pane: &str) -> bool {
        self.members.iter().any(|m| m == pane)
    }

    fn index_of(&self, pane: &str) -> Option<usize> {
        self.members.iter().position(|m| m == pane)
    }
}

/// Key-value side channel holding group membership across reconnects.
pub trait GroupStore {
    fn load(&self) -> Result<Vec<PaneGroup>, GroupStoreError>;
    fn save(&mut self, groups: &[PaneGroup]) -> Result<(), GroupStoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryGroupStore {
    groups: Vec<PaneGroup>,
}

impl MemoryGroupStore {
    pub fn new() -> Self { Self::default() }
}

impl GroupStore for MemoryGroupStore {
    fn load(&self) -> Result<Vec<PaneGroup>, GroupStoreError> { Ok(self.groups.clone()) }

    fn save(&mut self, groups: &[PaneGroup]) -> Result<(), GroupStoreError> {
        self.groups = groups.to_vec();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupRecord {
    members: Vec<String>,
    active_index: usize,
}

/// JSON object keyed by group id, one file per session.
#[derive(Debug, Clone)]
pub struct FileGroupStore {
    path: PathBuf,
}

impl FileGroupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    /// `<data dir>/muxview/groups-<session>.json`
    pub fn for_session(session: &str) -> Option<Self> {
        let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
        let safe: String = session.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
        Some(Self::new(PathBuf::from(home).join(".local").join("share").join("muxview").join(format!("groups-{}.json", safe))))
    }
}

impl GroupStore for FileGroupStore {
    fn load(&self) -> Result<Vec<PaneGroup>, GroupStoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let map: BTreeMap<String, GroupRecord> = serde_json::from_str(&text)?;
        Ok(map.into_iter().map(|(id, r)| PaneGroup { id, members: r.members, active_index: r.active_index }).collect())
    }

    fn save(&mut self, groups: &[PaneGroup]) -> Result<(), GroupStoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let map: BTreeMap<&str, GroupRecord> = groups.iter()
            .map(|g| (g.id.as_str(), GroupRecord { members: g.members.clone(), active_index: g.active_index }))
            .collect();
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Drop members that no longer exist, keep the active index in range, and
/// dissolve groups left with fewer than two members. Returns true if
/// anything changed.
pub fn reconcile(groups: &mut Vec<PaneGroup>, live: &HashSet<&str>) -> bool {
    let before = groups.clone();
    for g in groups.iter_mut() {
        let active = g.active_member().map(|s| s.to_string());
        g.members.retain(|m| live.contains(m.as_str()));
        g.active_index = active
            .and_then(|a| g.index_of(&a))
            .unwrap_or_else(|| g.active_index.min(g.members.len().saturating_sub(1)));
    }
    groups.retain(|g| g.members.len() >= 2);
    *groups != before
}

/// Short id from the wall clock in base 36.
pub fn generate_group_id(existing: &[PaneGroup]) -> String {
    let mut n = chrono::Utc::now().timestamp_millis().unsigned_abs();
    let mut digits = Vec::new();
    while n > 0 {
        let d = (n % 36) as u32;
        digits.push(std::char::from_digit(d, 36).unwrap_or('0'));
        n /= 36;
    }
    let base: String = digits.into_iter().rev().collect();
    let mut id = format!("g{}", base);
    let mut k = 1;
    while existing.iter().any(|g| g.id == id) {
        id = format!("g{}-{}", base, k);
        k += 1;
    }
    id
}

struct PendingAdd {
    group_id: String,
    window_name: String,
}

/// Owns group membership and turns group operations into remote commands.
pub struct GroupRegistry {
    store: Box<dyn GroupStore>,
    groups: Vec<PaneGroup>,
    pending: Vec<PendingAdd>,
}

impl GroupRegistry {
    pub fn new(store: Box<dyn GroupStore>) -> Self {
        let groups = match store.load() {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "could not load pane groups");
                Vec::new()
            }
        };
        Self { store, groups, pending: Vec::new() }
    }

    pub fn groups(&self) -> &[PaneGroup] { &self.groups }

    pub fn group_of(&self, pane: &str) -> Option<&PaneGroup> {
        self.groups.iter().find(|g| g.contains(pane))
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.groups) {
            warn!(error = %e, "could not save pane groups");
        }
    }

    /// Start a new tab next to `anchor`. The new pane is created in a hidden
    /// holder window and swapped in once it shows up in a snapshot.
    pub fn add(&mut self, anchor: &str) -> Vec<RemoteCommand> {
        let group_id = match self.group_of(anchor) {
            Some(g) => g.id.clone(),
            None => {
                let id = generate_group_id(&self.groups);
                debug!(group = %id, anchor, "creating pane group");
                self.groups.push(PaneGroup { id: id.clone(), members: vec![anchor.to_string()], active_index: 0 });
                id
            }
        };
        let Some(group) = self.groups.iter().find(|g| g.id == group_id) else { return Vec::new(); };
        // Holder windows are named after the visible slot's pane.
        let parent = group.members[0].clone();
        let index = (1..)
            .find(|i| !self.pending.iter().any(|p| p.window_name == group_window_name(&parent, *i)) && *i as usize >= group.members.len())
            .unwrap_or(group.members.len() as u32);
        let window_name = group_window_name(&parent, index);
        self.pending.push(PendingAdd { group_id, window_name: window_name.clone() });
        vec![RemoteCommand::NewHiddenWindow { name: window_name }]
    }

    /// Fold a new authoritative snapshot in: adopt panes created by `add`
    /// and drop members that vanished.
    pub fn observe(&mut self, snap: &SessionSnapshot) -> Vec<RemoteCommand> {
        let mut cmds = Vec::new();
        let mut changed = false;
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            let Some(window) = snap.windows.iter().find(|w| w.name == p.window_name) else {
                self.pending.push(p);
                continue;
            };
            let Some(new_pane) = snap.window_panes(&window.id).next().map(|pane| pane.id.clone()) else {
                self.pending.push(p);
                continue;
            };
            let Some(group) = self.groups.iter_mut().find(|g| g.id == p.group_id) else { continue; };
            if group.contains(&new_pane) { continue; }
            group.members.push(new_pane.clone());
            changed = true;
            debug!(group = %group.id, pane = %new_pane, "pane joined group");
            let visible = group.active_member().map(|s| s.to_string());
            if let Some(visible) = visible {
                cmds.push(RemoteCommand::SwapPanes { src: new_pane.clone(), dst: visible });
                cmds.push(RemoteCommand::SelectPane { target: new_pane.clone() });
                group.active_index = group.members.len() - 1;
            }
        }

        let live: HashSet<&str> = snap.panes.iter().map(|p| p.id.as_str()).collect();
        // Groups still waiting for their first extra member are not dissolved.
        let waiting: HashSet<String> = self.pending.iter().map(|p| p.group_id.clone()).collect();
        let (mut forming, mut settled): (Vec<PaneGroup>, Vec<PaneGroup>) =
            std::mem::take(&mut self.groups).into_iter().partition(|g| waiting.contains(&g.id) && g.members.len() < 2);
        changed |= reconcile(&mut settled, &live);
        forming.retain(|g| g.members.iter().all(|m| live.contains(m.as_str())));
        settled.extend(forming);
        self.groups = settled;
        if changed { self.persist(); }
        cmds
    }

    /// Bring `target` into its group's visible slot.
    pub fn switch(&mut self, target: &str) -> Vec<RemoteCommand> {
        let Some(group) = self.groups.iter_mut().find(|g| g.contains(target)) else { return Vec::new(); };
        let Some(idx) = group.index_of(target) else { return Vec::new(); };
        let Some(visible) = group.active_member().map(|s| s.to_string()) else { return Vec::new(); };
        if visible == target { return Vec::new(); }
        group.active_index = idx;
        let cmds = vec![
            RemoteCommand::SwapPanes { src: target.to_string(), dst: visible },
            RemoteCommand::SelectPane { target: target.to_string() },
        ];
        self.persist();
        cmds
    }

    pub fn next(&mut self, pane: &str) -> Vec<RemoteCommand> { self.step(pane, 1) }

    pub fn prev(&mut self, pane: &str) -> Vec<RemoteCommand> { self.step(pane, -1) }

    fn step(&mut self, pane: &str, by: isize) -> Vec<RemoteCommand> {
        let Some(group) = self.group_of(pane) else { return Vec::new(); };
        let n = group.members.len() as isize;
        if n < 2 { return Vec::new(); }
        let idx = (group.active_index as isize + by).rem_euclid(n) as usize;
        let target = group.members[idx].clone();
        self.switch(&target)
    }

    /// Remove `pane` from its group and kill it. A visible member hands its
    /// slot to the next tab first.
    pub fn close(&mut self, pane: &str) -> Vec<RemoteCommand> {
        let Some(gi) = self.groups.iter().position(|g| g.contains(pane)) else { return Vec::new(); };
        let mut cmds = Vec::new();
        if self.groups[gi].active_member() == Some(pane) {
            cmds.extend(self.step(pane, 1));
        }
        let group = &mut self.groups[gi];
        let active = group.active_member().map(|s| s.to_string());
        group.members.retain(|m| m != pane);
        group.active_index = active.and_then(|a| group.index_of(&a)).unwrap_or(0);
        if group.members.len() < 2 {
            debug!(group = %group.id, "dissolving pane group");
            self.groups.remove(gi);
        }
        cmds.push(RemoteCommand::KillPane { target: Some(pane.to_string()) });
        self.persist();
        cmds
    }
}
