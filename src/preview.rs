use crate::types::{Direction, PaneRect, ResizeHandle};

/// Move `target` into the dragged pane's slot. The dragged pane keeps its
/// rectangle; the renderer draws it under the pointer instead.
pub fn swap_preview_half(rects: &[PaneRect], dragged: &str, target: &str) -> Vec<PaneRect> {
    let Some(origin) = rects.iter().find(|r| r.id == dragged) else { return rects.to_vec(); };
    let origin = origin.clone();
    rects.iter().map(|r| {
        if r.id == target && target != dragged {
            PaneRect { id: r.id.clone(), ..origin.clone() }
        } else {
            r.clone()
        }
    }).collect()
}

/// Both panes fully exchanged, as the remote side will show them after the swap.
pub fn swap_preview_full(rects: &[PaneRect], a: &str, b: &str) -> Vec<PaneRect> {
    let ra = rects.iter().find(|r| r.id == a).cloned();
    let rb = rects.iter().find(|r| r.id == b).cloned();
    let (Some(ra), Some(rb)) = (ra, rb) else { return rects.to_vec(); };
    rects.iter().map(|r| {
        if r.id == a { PaneRect { id: r.id.clone(), ..rb.clone() } }
        else if r.id == b { PaneRect { id: r.id.clone(), ..ra.clone() } }
        else { r.clone() }
    }).collect()
}

/// Pixel offset to whole cells, rounded to nearest.
pub fn snap_delta(px: f32, cell: f32) -> i32 {
    if cell <= 0.0 { return 0; }
    (px / cell).round() as i32
}

/// Panes on either side of a divider line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DividerSides {
    /// Divider coordinate (column for vertical lines, row for horizontal).
    pub line: u16,
    pub axis: Direction,
    /// Panes ending just before the divider.
    pub before: Vec<String>,
    /// Panes starting just after the divider.
    pub after: Vec<String>,
}

fn span(r: &PaneRect, axis: Direction) -> (u16, u16) {
    // Extent along the divider line.
    match axis {
        Direction::Horizontal => (r.y, r.bottom()),
        Direction::Vertical => (r.x, r.right()),
    }
}

fn lead(r: &PaneRect, axis: Direction) -> u16 {
    match axis { Direction::Horizontal => r.x, Direction::Vertical => r.y }
}

fn trail(r: &PaneRect, axis: Direction) -> u16 {
    match axis { Direction::Horizontal => r.right(), Direction::Vertical => r.bottom() }
}

fn extent(r: &PaneRect, axis: Direction) -> u16 {
    match axis { Direction::Horizontal => r.width, Direction::Vertical => r.height }
}

/// Find the connected run of panes sharing the divider on `handle`'s side of
/// `pane`. Segments touch when their spans overlap or abut across a one-cell
/// divider gap.
pub fn divider_sides(rects: &[PaneRect], pane: &str, handle: ResizeHandle) -> Option<DividerSides> {
    let p = rects.iter().find(|r| r.id == pane)?;
    let axis = handle.axis();
    let line = match handle {
        ResizeHandle::E | ResizeHandle::S => trail(p, axis),
        ResizeHandle::W | ResizeHandle::N => lead(p, axis).checked_sub(1)?,
    };

    let on_before = |r: &PaneRect| trail(r, axis) == line;
    let on_after = |r: &PaneRect| lead(r, axis) == line + 1;

    let (mut lo, mut hi) = span(p, axis);
    let mut members: Vec<&PaneRect> = vec![p];
    loop {
        let mut grew = false;
        for r in rects {
            if members.iter().any(|m| m.id == r.id) { continue; }
            if !(on_before(r) || on_after(r)) { continue; }
            let (a, b) = span(r, axis);
            if a <= hi + 1 && b + 1 >= lo {
                lo = lo.min(a);
                hi = hi.max(b);
                members.push(r);
                grew = true;
            }
        }
        if !grew { break; }
    }

    let before: Vec<String> = members.iter().filter(|r| on_before(r)).map(|r| r.id.clone()).collect();
    let after: Vec<String> = members.iter().filter(|r| on_after(r)).map(|r| r.id.clone()).collect();
    if before.is_empty() || after.is_empty() { return None; }
    Some(DividerSides { line, axis, before, after })
}

/// Optimistic geometry for moving the divider on `handle` by `delta` cells
/// (positive = right/down). Panes before the divider grow, panes after it
/// shift and shrink; the delta is clamped so nobody drops below `min_size`.
/// Returns the new rectangles and the delta actually applied.
pub fn resize_preview(rects: &[PaneRect], pane: &str, handle: ResizeHandle, delta: i32, min_size: u16) -> (Vec<PaneRect>, i32) {
    let Some(sides) = divider_sides(rects, pane, handle) else { return (rects.to_vec(), 0); };
    let axis = sides.axis;
    let size_of = |id: &String| rects.iter().find(|r| &r.id == id).map_or(0, |r| extent(r, axis)) as i32;
    let room_before = sides.before.iter().map(size_of).min().unwrap_or(0) - min_size as i32;
    let room_after = sides.after.iter().map(size_of).min().unwrap_or(0) - min_size as i32;
    let applied = delta.clamp(-room_before.max(0), room_after.max(0));
    if applied == 0 { return (rects.to_vec(), 0); }

    let out = rects.iter().map(|r| {
        let mut r = r.clone();
        let grow = sides.before.contains(&r.id);
        let shift = sides.after.contains(&r.id);
        match axis {
            Direction::Horizontal => {
                if grow { r.width = (r.width as i32 + applied) as u16; }
                if shift {
                    r.x = (r.x as i32 + applied) as u16;
                    r.width = (r.width as i32 - applied) as u16;
                }
            }
            Direction::Vertical => {
                if grow { r.height = (r.height as i32 + applied) as u16; }
                if shift {
                    r.y = (r.y as i32 + applied) as u16;
                    r.height = (r.height as i32 - applied) as u16;
                }
            }
        }
        r
    }).collect();
    (out, applied)
}
