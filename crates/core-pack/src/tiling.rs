//! Guillotine tiling primitives shared by both search drivers.
//!
//! A placement step takes one free sub-rectangle, puts a job cell in its
//! lower-left corner, and splits the leftover into two sub-rectangles. The
//! two split orders cover the two guillotine cut sequences; degenerate
//! slivers are dropped. Sub-rectangles are disjoint and exactly tile the
//! parent, so free area can be tracked incrementally.

use crate::PackItem;
use core_geom::Rect;

/// Geometric slop for fit tests on inch dimensions.
pub(crate) const FIT_EPSILON: f64 = 1e-9;

/// One placed job instance in padded panel space (lower-left corner).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placed {
    pub item: usize,
    pub x: f64,
    pub y: f64,
    pub rotated: bool,
}

/// A complete tiling of the request's items.
#[derive(Debug, Clone)]
pub struct Tiling {
    pub placed: Vec<Placed>,
    extent_w: f64,
    extent_h: f64,
}

impl Tiling {
    /// Assemble from placements, measuring the real (unpadded) footprint.
    pub(crate) fn from_places(placed: Vec<Placed>, items: &[PackItem]) -> Self {
        let mut extent_w = 0.0f64;
        let mut extent_h = 0.0f64;
        for p in &placed {
            let item = &items[p.item];
            let (w, h) = if p.rotated {
                (item.height, item.width)
            } else {
                (item.width, item.height)
            };
            extent_w = extent_w.max(p.x + w);
            extent_h = extent_h.max(p.y + h);
        }
        Self {
            placed,
            extent_w,
            extent_h,
        }
    }

    /// Bounding extent of the placed footprints (no spacing padding).
    pub fn extent(&self) -> (f64, f64) {
        (self.extent_w, self.extent_h)
    }

    pub fn extent_area(&self) -> f64 {
        self.extent_w * self.extent_h
    }

    /// Total board area placed.
    pub fn used_area(&self, items: &[PackItem]) -> f64 {
        self.placed
            .iter()
            .map(|p| items[p.item].width * items[p.item].height)
            .sum()
    }

    /// Total order on complete tilings: smaller bounding extent wins, then
    /// the lexicographically first placement sequence (names, rotation,
    /// coordinates). Placed area is identical across complete tilings of
    /// one item set, so it never needs comparing here.
    pub(crate) fn better_than(&self, other: &Tiling, items: &[PackItem]) -> bool {
        let a = self.extent_area();
        let b = other.extent_area();
        if a != b {
            return a < b;
        }
        let key = |t: &Tiling| {
            t.placed
                .iter()
                .map(|p| {
                    (
                        items[p.item].name.clone(),
                        p.rotated,
                        (p.x * 1e9) as i64,
                        (p.y * 1e9) as i64,
                    )
                })
                .collect::<Vec<_>>()
        };
        key(self) < key(other)
    }
}

/// Split order for the leftover of a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SplitOrder {
    /// Full-width strip above, remainder strip to the right of the cell.
    RightThenTop,
    /// Full-height strip to the right, remainder strip above the cell.
    TopThenRight,
}

pub(crate) fn fits(rect: &Rect, w: f64, h: f64) -> bool {
    rect.width() + FIT_EPSILON >= w && rect.height() + FIT_EPSILON >= h
}

/// The two leftover sub-rectangles after placing a `cell_w` x `cell_h` cell
/// in the lower-left corner of `rect`. Degenerate slivers are omitted.
pub(crate) fn split(rect: &Rect, cell_w: f64, cell_h: f64, order: SplitOrder) -> Vec<Rect> {
    let cut_x = rect.min_x + cell_w;
    let cut_y = rect.min_y + cell_h;
    let (right, top) = match order {
        SplitOrder::RightThenTop => (
            Rect::new(cut_x, rect.min_y, rect.max_x, cut_y),
            Rect::new(rect.min_x, cut_y, rect.max_x, rect.max_y),
        ),
        SplitOrder::TopThenRight => (
            Rect::new(cut_x, rect.min_y, rect.max_x, rect.max_y),
            Rect::new(rect.min_x, cut_y, cut_x, rect.max_y),
        ),
    };
    [right, top]
        .into_iter()
        .filter(|r| r.width() > FIT_EPSILON && r.height() > FIT_EPSILON)
        .collect()
}

/// Greedy first-fit of one cell into a free-rectangle list. On success the
/// chosen rectangle is replaced by its split leftovers and the placement
/// (lower-left corner, rotation flag) is returned.
pub(crate) fn first_fit(
    free: &mut Vec<Rect>,
    w: f64,
    h: f64,
    rw: f64,
    rh: f64,
    allow_rotate: bool,
) -> Option<(f64, f64, bool)> {
    for i in 0..free.len() {
        let rect = free[i];
        let rotated = if fits(&rect, w, h) {
            false
        } else if allow_rotate && fits(&rect, rw, rh) {
            true
        } else {
            continue;
        };
        let (cw, ch) = if rotated { (rw, rh) } else { (w, h) };
        let children = split(&rect, cw, ch, SplitOrder::RightThenTop);
        let at = (rect.min_x, rect.min_y, rotated);
        free.splice(i..=i, children);
        return Some(at);
    }
    None
}
