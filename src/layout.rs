use ratatui::prelude::Rect;

use crate::types::{Direction, FocusDir, PaneRect, ResizeHandle};
use crate::tree::{build_balanced_tree, SplitNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutPreset {
    EvenHorizontal,
    EvenVertical,
    MainHorizontal,
    MainVertical,
    Tiled,
}

pub const LAYOUT_CYCLE: [LayoutPreset; 5] = [
    LayoutPreset::EvenHorizontal,
    LayoutPreset::EvenVertical,
    LayoutPreset::MainHorizontal,
    LayoutPreset::MainVertical,
    LayoutPreset::Tiled,
];

const MAIN_PANE_RATIO: f64 = 0.6;

impl LayoutPreset {
    pub fn name(self) -> &'static str {
        match self {
            LayoutPreset::EvenHorizontal => "even-horizontal",
            LayoutPreset::EvenVertical => "even-vertical",
            LayoutPreset::MainHorizontal => "main-horizontal",
            LayoutPreset::MainVertical => "main-vertical",
            LayoutPreset::Tiled => "tiled",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "even-horizontal" | "even-h" => Some(LayoutPreset::EvenHorizontal),
            "even-vertical" | "even-v" => Some(LayoutPreset::EvenVertical),
            "main-horizontal" | "main-h" => Some(LayoutPreset::MainHorizontal),
            "main-vertical" | "main-v" => Some(LayoutPreset::MainVertical),
            "tiled" => Some(LayoutPreset::Tiled),
            _ => None,
        }
    }

    pub fn next(self) -> Self {
        let i = LAYOUT_CYCLE.iter().position(|p| *p == self).unwrap_or(0);
        LAYOUT_CYCLE[(i + 1) % LAYOUT_CYCLE.len()]
    }

    pub fn build(self, ids: &[String]) -> Option<SplitNode> {
        match self {
            LayoutPreset::EvenHorizontal => even_horizontal(ids),
            LayoutPreset::EvenVertical => even_vertical(ids),
            LayoutPreset::MainHorizontal => main_split(ids, Direction::Vertical, Direction::Horizontal),
            LayoutPreset::MainVertical => main_split(ids, Direction::Horizontal, Direction::Vertical),
            LayoutPreset::Tiled => tiled_auto(ids),
        }
    }
}

pub fn even_horizontal(ids: &[String]) -> Option<SplitNode> {
    build_balanced_tree(ids, Direction::Horizontal)
}

pub fn even_vertical(ids: &[String]) -> Option<SplitNode> {
    build_balanced_tree(ids, Direction::Vertical)
}

fn main_split(ids: &[String], outer: Direction, rest: Direction) -> Option<SplitNode> {
    let (main, others) = ids.split_first()?;
    match build_balanced_tree(others, rest) {
        None => Some(SplitNode::leaf(main.clone())),
        Some(r) => Some(SplitNode::split(outer, MAIN_PANE_RATIO, SplitNode::leaf(main.clone()), r)),
    }
}

/// Grid of stacked rows, each an even-horizontal run of at most `cols` panes.
/// Grows past `rows` when the grid is too small to hold every pane.
pub fn tiled(ids: &[String], rows: usize, cols: usize) -> Option<SplitNode> {
    if ids.is_empty() || rows == 0 || cols == 0 { return None; }
    let needed = ids.len().div_ceil(cols);
    if needed > rows {
        tracing::debug!(rows, needed, "tiled: grid too small, adding rows");
    }
    let row_trees: Vec<SplitNode> = ids.chunks(cols).filter_map(even_horizontal).collect();
    balanced_nodes(row_trees, Direction::Vertical)
}

pub fn tiled_auto(ids: &[String]) -> Option<SplitNode> {
    let n = ids.len();
    if n == 0 { return None; }
    let cols = (n as f64).sqrt().ceil() as usize;
    let rows = n.div_ceil(cols);
    tiled(ids, rows, cols)
}

fn balanced_nodes(mut nodes: Vec<SplitNode>, direction: Direction) -> Option<SplitNode> {
    match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        n => {
            let right = nodes.split_off(n / 2);
            let l = balanced_nodes(nodes, direction)?;
            let r = balanced_nodes(right, direction)?;
            Some(SplitNode::split(direction, (n / 2) as f64 / n as f64, l, r))
        }
    }
}

fn bounds(rects: &[PaneRect]) -> Option<Rect> {
    let x = rects.iter().map(|r| r.x).min()?;
    let y = rects.iter().map(|r| r.y).min()?;
    let right = rects.iter().map(|r| r.right()).max()?;
    let bottom = rects.iter().map(|r| r.bottom()).max()?;
    Some(Rect::new(x, y, right - x, bottom - y))
}

/// Rebuild a split tree from live pane rectangles by cutting along full-span divider lines.
/// Returns `None` if the rectangles do not form a guillotine layout.
pub fn tree_from_panes(rects: &[PaneRect]) -> Option<SplitNode> {
    if rects.len() == 1 { return Some(SplitNode::leaf(rects[0].id.clone())); }
    let area = bounds(rects)?;
    for direction in [Direction::Horizontal, Direction::Vertical] {
        let (start, extent) = match direction {
            Direction::Horizontal => (area.x, area.width),
            Direction::Vertical => (area.y, area.height),
        };
        for cut in start + 1..start + extent {
            let (before, after): (Vec<PaneRect>, Vec<PaneRect>) = rects.iter().cloned().partition(|r| match direction {
                Direction::Horizontal => r.right() <= cut,
                Direction::Vertical => r.bottom() <= cut,
            });
            if before.is_empty() || after.is_empty() { continue; }
            let clean = after.iter().all(|r| match direction {
                Direction::Horizontal => r.x > cut,
                Direction::Vertical => r.y > cut,
            });
            if !clean { continue; }
            let lead = (cut - start) as f64;
            let ratio = (lead + 0.5) / extent as f64;
            let left = tree_from_panes(&before)?;
            let right = tree_from_panes(&after)?;
            return Some(SplitNode::split(direction, ratio, left, right));
        }
    }
    None
}

/// First pane (in slice order) containing the cell.
pub fn pane_at(rects: &[PaneRect], col: u16, row: u16) -> Option<&PaneRect> {
    rects.iter().find(|r| r.contains(col, row))
}

/// Divider cell under the pointer, reported as the right/bottom edge of the pane before it.
pub fn divider_at(rects: &[PaneRect], col: u16, row: u16) -> Option<(String, ResizeHandle)> {
    for r in rects {
        if col == r.right() && row >= r.y && row < r.bottom() && rects.iter().any(|o| o.x == col + 1) {
            return Some((r.id.clone(), ResizeHandle::E));
        }
        if row == r.bottom() && col >= r.x && col < r.right() && rects.iter().any(|o| o.y == row + 1) {
            return Some((r.id.clone(), ResizeHandle::S));
        }
    }
    None
}

/// Spatial pane navigation: prefer panes overlapping on the perpendicular axis,
/// then the smallest primary-axis gap, then the nearest perpendicular center.
pub fn find_best_pane_in_direction(rects: &[PaneRect], from: &str, dir: FocusDir) -> Option<String> {
    let arect = rects.iter().find(|r| r.id == from)?;
    let acx = arect.x as i32 * 2 + arect.width as i32;
    let acy = arect.y as i32 * 2 + arect.height as i32;
    let ranges_overlap = |a_start: u16, a_len: u16, b_start: u16, b_len: u16| -> bool {
        a_start < b_start + b_len && b_start < a_start + a_len
    };

    // (index, primary_gap, perp_center_dist, has_perp_overlap)
    let mut best: Option<(usize, u32, i32, bool)> = None;
    for (i, r) in rects.iter().enumerate() {
        if r.id == arect.id { continue; }
        let (primary_gap, perp_overlap) = match dir {
            FocusDir::Left => {
                if r.right() > arect.x { continue; }
                ((arect.x - r.right()) as u32, ranges_overlap(r.y, r.height, arect.y, arect.height))
            }
            FocusDir::Right => {
                if r.x < arect.right() { continue; }
                ((r.x - arect.right()) as u32, ranges_overlap(r.y, r.height, arect.y, arect.height))
            }
            FocusDir::Up => {
                if r.bottom() > arect.y { continue; }
                ((arect.y - r.bottom()) as u32, ranges_overlap(r.x, r.width, arect.x, arect.width))
            }
            FocusDir::Down => {
                if r.y < arect.bottom() { continue; }
                ((r.y - arect.bottom()) as u32, ranges_overlap(r.x, r.width, arect.x, arect.width))
            }
        };
        let rcx = r.x as i32 * 2 + r.width as i32;
        let rcy = r.y as i32 * 2 + r.height as i32;
        let perp_dist = match dir {
            FocusDir::Left | FocusDir::Right => (rcy - acy).abs(),
            FocusDir::Up | FocusDir::Down => (rcx - acx).abs(),
        };
        let dominated = match best {
            None => false,
            Some((_, bg, bd, bo)) => {
                if perp_overlap != bo { !perp_overlap }
                else if primary_gap != bg { primary_gap > bg }
                else { perp_dist >= bd }
            }
        };
        if !dominated { best = Some((i, primary_gap, perp_dist, perp_overlap)); }
    }
    best.map(|(i, ..)| rects[i].id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{compute_positions, leaf_ids};

    fn ids(n: usize) -> Vec<String> { (0..n).map(|i| format!("%{}", i)).collect() }

    #[test]
    fn test_even_layouts_are_deterministic() {
        let a = even_vertical(&ids(4)).unwrap();
        let b = even_vertical(&ids(4)).unwrap();
        assert_eq!(a, b);
        let rects = compute_positions(&a, Rect::new(0, 0, 80, 43));
        assert!(rects.iter().all(|r| r.width == 80 && r.height == 10), "{rects:?}");
    }

    #[test]
    fn test_tiled_grid_shape() {
        let t = tiled_auto(&ids(5)).unwrap();
        assert_eq!(leaf_ids(&t), ids(5));
        let rects = compute_positions(&t, Rect::new(0, 0, 100, 41));
        let rows: std::collections::BTreeSet<u16> = rects.iter().map(|r| r.y).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rects.iter().filter(|r| r.y == 0).count(), 3);
        assert!(tiled(&ids(3), 0, 2).is_none());
    }

    #[test]
    fn test_tiled_grows_rows_to_fit_every_pane() {
        let t = tiled(&ids(5), 2, 2).unwrap();
        assert_eq!(crate::tree::count_leaves(&t), 5);
        assert_eq!(leaf_ids(&t), ids(5));
        let rects = compute_positions(&t, Rect::new(0, 0, 80, 35));
        let rows: std::collections::BTreeSet<u16> = rects.iter().map(|r| r.y).collect();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_main_vertical() {
        let t = LayoutPreset::MainVertical.build(&ids(3)).unwrap();
        let rects = compute_positions(&t, Rect::new(0, 0, 100, 21));
        assert_eq!(rects[0], PaneRect::new("%0", 0, 0, 60, 21));
        assert_eq!(rects[1].x, 61);
        assert_eq!(LayoutPreset::MainVertical.build(&ids(1)), Some(SplitNode::leaf("%0")));
    }

    #[test]
    fn test_preset_cycle_wraps() {
        assert_eq!(LayoutPreset::Tiled.next(), LayoutPreset::EvenHorizontal);
        assert_eq!(LayoutPreset::from_name("even-v"), Some(LayoutPreset::EvenVertical));
        assert_eq!(LayoutPreset::from_name("spiral"), None);
    }

    #[test]
    fn test_tree_from_panes_roundtrips_geometry() {
        let rects = vec![
            PaneRect::new("%0", 0, 0, 40, 24),
            PaneRect::new("%1", 41, 0, 39, 11),
            PaneRect::new("%2", 41, 12, 39, 12),
        ];
        let t = tree_from_panes(&rects).unwrap();
        assert_eq!(compute_positions(&t, Rect::new(0, 0, 80, 24)), rects);
    }

    #[test]
    fn test_tree_from_panes_rejects_pinwheel() {
        let rects = vec![
            PaneRect::new("a", 0, 0, 10, 4),
            PaneRect::new("b", 11, 0, 4, 10),
            PaneRect::new("c", 5, 11, 10, 4),
            PaneRect::new("d", 0, 5, 4, 10),
            PaneRect::new("e", 5, 5, 5, 5),
        ];
        assert!(tree_from_panes(&rects).is_none());
    }

    #[test]
    fn test_divider_and_pane_hit_testing() {
        let rects = vec![PaneRect::new("%0", 0, 0, 40, 24), PaneRect::new("%1", 41, 0, 39, 24)];
        assert_eq!(pane_at(&rects, 39, 5).map(|r| r.id.as_str()), Some("%0"));
        assert_eq!(pane_at(&rects, 40, 5), None);
        assert_eq!(divider_at(&rects, 40, 5), Some(("%0".to_string(), ResizeHandle::E)));
        assert_eq!(divider_at(&rects, 79, 5), None);
    }

    #[test]
    fn test_find_best_pane_in_direction() {
        let rects = vec![
            PaneRect::new("%0", 0, 0, 40, 24),
            PaneRect::new("%1", 41, 0, 39, 11),
            PaneRect::new("%2", 41, 12, 39, 12),
        ];
        assert_eq!(find_best_pane_in_direction(&rects, "%0", FocusDir::Right).as_deref(), Some("%2"));
        assert_eq!(find_best_pane_in_direction(&rects, "%2", FocusDir::Up).as_deref(), Some("%1"));
        assert_eq!(find_best_pane_in_direction(&rects, "%2", FocusDir::Left).as_deref(), Some("%0"));
        assert_eq!(find_best_pane_in_direction(&rects, "%0", FocusDir::Left), None);
    }
}
