use ratatui::prelude::Rect;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::types::{Direction, PaneRect};

pub const MIN_RATIO: f64 = 0.1;
pub const MAX_RATIO: f64 = 0.9;

/// Binary subdivision of a window rectangle into panes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SplitNode {
    Leaf { pane_id: String },
    Split {
        direction: Direction,
        /// Fraction of the parent extent given to `left`, in (0, 1).
        ratio: f64,
        left: Box<SplitNode>,
        right: Box<SplitNode>,
    },
}

impl SplitNode {
    pub fn leaf(pane_id: impl Into<String>) -> Self {
        SplitNode::Leaf { pane_id: pane_id.into() }
    }

    pub fn split(direction: Direction, ratio: f64, left: SplitNode, right: SplitNode) -> Self {
        SplitNode::Split { direction, ratio, left: Box::new(left), right: Box::new(right) }
    }
}

/// Split `size` cells into (left, right) with one divider cell between them.
pub fn split_extent(size: u16, ratio: f64) -> (u16, u16) {
    let left = ((size as f64 * ratio).floor() as u16).min(size.saturating_sub(1));
    let right = size.saturating_sub(left + 1);
    (left, right)
}

fn child_areas(direction: Direction, ratio: f64, area: Rect) -> (Rect, Rect, Rect) {
    match direction {
        Direction::Horizontal => {
            let (lw, rw) = split_extent(area.width, ratio);
            (
                Rect::new(area.x, area.y, lw, area.height),
                Rect::new(area.x + lw, area.y, area.width.min(1), area.height),
                Rect::new(area.x + lw + 1, area.y, rw, area.height),
            )
        }
        Direction::Vertical => {
            let (th, bh) = split_extent(area.height, ratio);
            (
                Rect::new(area.x, area.y, area.width, th),
                Rect::new(area.x, area.y + th, area.width, area.height.min(1)),
                Rect::new(area.x, area.y + th + 1, area.width, bh),
            )
        }
    }
}

/// Pane rectangles for every leaf, in left-to-right leaf order.
pub fn compute_positions(node: &SplitNode, area: Rect) -> Vec<PaneRect> {
    fn rec(node: &SplitNode, area: Rect, out: &mut Vec<PaneRect>) {
        match node {
            SplitNode::Leaf { pane_id } => out.push(PaneRect::new(pane_id.clone(), area.x, area.y, area.width, area.height)),
            SplitNode::Split { direction, ratio, left, right } => {
                let (l, _, r) = child_areas(*direction, *ratio, area);
                rec(left, l, out);
                rec(right, r, out);
            }
        }
    }
    let mut out = Vec::new();
    rec(node, area, &mut out);
    out
}

/// Divider strips as (direction, rect), parents before children.
pub fn compute_dividers(node: &SplitNode, area: Rect) -> Vec<(Direction, Rect)> {
    fn rec(node: &SplitNode, area: Rect, out: &mut Vec<(Direction, Rect)>) {
        if let SplitNode::Split { direction, ratio, left, right } = node {
            let (l, d, r) = child_areas(*direction, *ratio, area);
            out.push((*direction, d));
            rec(left, l, out);
            rec(right, r, out);
        }
    }
    let mut out = Vec::new();
    rec(node, area, &mut out);
    out
}

pub fn contains_leaf(node: &SplitNode, pane_id: &str) -> bool {
    match node {
        SplitNode::Leaf { pane_id: p } => p == pane_id,
        SplitNode::Split { left, right, .. } => contains_leaf(left, pane_id) || contains_leaf(right, pane_id),
    }
}

pub fn count_leaves(node: &SplitNode) -> usize {
    match node {
        SplitNode::Leaf { .. } => 1,
        SplitNode::Split { left, right, .. } => count_leaves(left) + count_leaves(right),
    }
}

pub fn leaf_ids(node: &SplitNode) -> Vec<String> {
    fn rec(n: &SplitNode, out: &mut Vec<String>) {
        match n {
            SplitNode::Leaf { pane_id } => out.push(pane_id.clone()),
            SplitNode::Split { left, right, .. } => { rec(left, out); rec(right, out); }
        }
    }
    let mut out = Vec::new();
    rec(node, &mut out);
    out
}

/// Replace the leaf for `target` with a 50/50 split of (target, new_pane).
/// Returns `None` when `target` is not in the tree or `new_pane` already is.
pub fn split_leaf(node: &SplitNode, target: &str, new_pane: &str, direction: Direction) -> Option<SplitNode> {
    if !contains_leaf(node, target) || contains_leaf(node, new_pane) {
        debug!(target, new_pane, "split_leaf: target missing or new pane already tiled");
        return None;
    }
    fn rec(n: &SplitNode, target: &str, new_pane: &str, direction: Direction) -> SplitNode {
        match n {
            SplitNode::Leaf { pane_id } if pane_id == target => {
                SplitNode::split(direction, 0.5, n.clone(), SplitNode::leaf(new_pane))
            }
            SplitNode::Leaf { .. } => n.clone(),
            SplitNode::Split { direction: d, ratio, left, right } => SplitNode::Split {
                direction: *d,
                ratio: *ratio,
                left: Box::new(rec(left, target, new_pane, direction)),
                right: Box::new(rec(right, target, new_pane, direction)),
            },
        }
    }
    Some(rec(node, target, new_pane, direction))
}

/// Remove a leaf, collapsing its parent split into the surviving sibling.
/// Returns `None` when the removed leaf was the whole tree.
pub fn remove_leaf(node: &SplitNode, pane_id: &str) -> Option<SplitNode> {
    match node {
        SplitNode::Leaf { pane_id: p } => if p == pane_id { None } else { Some(node.clone()) },
        SplitNode::Split { direction, ratio, left, right } => {
            match (remove_leaf(left, pane_id), remove_leaf(right, pane_id)) {
                (Some(l), Some(r)) => Some(SplitNode::Split { direction: *direction, ratio: *ratio, left: Box::new(l), right: Box::new(r) }),
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(r),
                (None, None) => None,
            }
        }
    }
}

/// Nudge the ratio of the nearest ancestor of `pane_id` split along `direction`.
/// Positive `delta` grows the pane. Returns whether a ratio changed.
pub fn adjust_ratio(node: &mut SplitNode, pane_id: &str, direction: Direction, delta: f64) -> bool {
    fn rec(node: &mut SplitNode, pane_id: &str, direction: Direction, delta: f64) -> Option<bool> {
        let SplitNode::Split { direction: d, ratio, left, right } = node else { return None };
        let in_left = contains_leaf(left, pane_id);
        let in_right = contains_leaf(right, pane_id);
        if in_left == in_right { return None; }
        let handled = if in_left { rec(left, pane_id, direction, delta) } else { rec(right, pane_id, direction, delta) };
        if handled.is_some() { return handled; }
        if *d != direction { return None; }
        let signed = if in_left { delta } else { -delta };
        let next = (*ratio + signed).clamp(MIN_RATIO, MAX_RATIO);
        let changed = (next - *ratio).abs() > f64::EPSILON;
        *ratio = next;
        Some(changed)
    }
    rec(node, pane_id, direction, delta).unwrap_or(false)
}

/// Half-split constructor; ratios follow leaf counts so every pane gets an equal share.
pub fn build_balanced_tree(ids: &[String], direction: Direction) -> Option<SplitNode> {
    match ids.len() {
        0 => None,
        1 => Some(SplitNode::leaf(ids[0].clone())),
        n => {
            let mid = n / 2;
            let left = build_balanced_tree(&ids[..mid], direction)?;
            let right = build_balanced_tree(&ids[mid..], direction)?;
            Some(SplitNode::split(direction, mid as f64 / n as f64, left, right))
        }
    }
}

/// Exchange two leaves in place. Returns false if either is missing.
pub fn swap_leaves(node: &mut SplitNode, a: &str, b: &str) -> bool {
    if a == b || !contains_leaf(node, a) || !contains_leaf(node, b) { return false; }
    fn rec(n: &mut SplitNode, a: &str, b: &str) {
        match n {
            SplitNode::Leaf { pane_id } => {
                if pane_id == a { *pane_id = b.to_string(); } else if pane_id == b { *pane_id = a.to_string(); }
            }
            SplitNode::Split { left, right, .. } => { rec(left, a, b); rec(right, a, b); }
        }
    }
    rec(node, a, b);
    true
}
