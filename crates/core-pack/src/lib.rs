//! Guillotine tiling search: choose non-overlapping positions (with
//! optional 90° rotation) for a multiset of rectangular jobs on a fixed
//! panel.
//!
//! Two drivers share the same tiling primitives:
//! * [`pack_exhaustive`]: depth-first enumeration of every guillotine
//!   tiling (which job, which rotation, which split order, or leave the
//!   sub-rectangle empty) with a remaining-area prune. It ignores the
//!   wall-clock budget but polls the cancellation flag at every node.
//! * [`pack_random`]: repeated sampling under a wall-clock budget; shuffle
//!   the job list, tile a small prefix exhaustively, first-fit the rest,
//!   keep the best. Embarrassingly parallel; workers share the best-so-far
//!   record behind a mutex.
//!
//! Determinism: candidate scores are compared under a total order (bounding
//! extent, then the placement sequence itself), so for a given seed and a
//! completed iteration set the winning tiling is unique regardless of
//! worker scheduling. The seed in use is logged at completion.
//!
//! Inter-job spacing is folded into the search as dimension padding: every
//! job cell is grown by `(sx, sy)` and the panel by the same amount, so
//! spacing is paid between neighbours but not along the panel's far edges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

mod exhaustive;
mod random;
mod tiling;

pub use exhaustive::pack_exhaustive;
pub use random::{pack_random, RandomOptions};
pub use tiling::{Placed, Tiling};

#[derive(Error, Debug)]
pub enum PackError {
    #[error(
        "panel {configured_width:.2}\"x{configured_height:.2}\" is too small to hold the jobs \
         (at least {required_width:.2}\"x{required_height:.2}\" required)"
    )]
    PanelTooSmall {
        required_width: f64,
        required_height: f64,
        configured_width: f64,
        configured_height: f64,
    },
    #[error("placement search cancelled before a complete tiling was found")]
    Cancelled,
}

/// Cooperative cancellation flag shared with the front-end.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fire-and-forget progress snapshot for an optional front-end. Senders use
/// `try_send`; a slow consumer drops updates instead of stalling the search.
#[derive(Debug, Clone)]
pub struct PackProgress {
    pub placements_tried: u64,
    pub best_extent: Option<(f64, f64)>,
}

/// One rectangle to place (a job instance; repeats are expanded by the
/// caller before building the request).
#[derive(Debug, Clone)]
pub struct PackItem {
    pub name: String,
    pub width: f64,
    pub height: f64,
}

/// A prepared search problem: items pre-sorted largest-dimension-first
/// (stable, name tie-break) and spacing folded into effective cells.
#[derive(Debug, Clone)]
pub struct PackRequest {
    items: Vec<PackItem>,
    panel_width: f64,
    panel_height: f64,
    spacing_x: f64,
    spacing_y: f64,
}

impl PackRequest {
    pub fn new(
        mut items: Vec<PackItem>,
        panel_width: f64,
        panel_height: f64,
        spacing_x: f64,
        spacing_y: f64,
    ) -> Self {
        // Largest boards first: better tilings sooner, earlier cutoffs.
        items.sort_by(|a, b| {
            b.width
                .max(b.height)
                .partial_cmp(&a.width.max(a.height))
                .expect("job dimensions are finite")
                .then_with(|| a.name.cmp(&b.name))
        });
        Self {
            items,
            panel_width,
            panel_height,
            spacing_x,
            spacing_y,
        }
    }

    pub fn items(&self) -> &[PackItem] {
        &self.items
    }

    pub fn panel(&self) -> (f64, f64) {
        (self.panel_width, self.panel_height)
    }

    /// Panel rectangle in padded (spacing-folded) space.
    pub(crate) fn padded_panel(&self) -> core_geom::Rect {
        core_geom::Rect::new(
            0.0,
            0.0,
            self.panel_width + self.spacing_x,
            self.panel_height + self.spacing_y,
        )
    }

    pub(crate) fn spacing(&self) -> (f64, f64) {
        (self.spacing_x, self.spacing_y)
    }

    /// The least panel that could plausibly hold the items: an unconstrained
    /// first-fit shelf pack wrapped at the configured panel width. Reported
    /// inside [`PackError::PanelTooSmall`] when no complete tiling exists.
    pub(crate) fn required_extent(&self) -> (f64, f64) {
        let wrap = self
            .panel_width
            .max(self.items.iter().fold(0.0f64, |m, i| m.max(i.width.min(i.height))));
        let mut row_w = 0.0f64;
        let mut row_h = 0.0f64;
        let mut max_w = 0.0f64;
        let mut total_h = 0.0f64;
        for item in &self.items {
            // Lay each item on its long side; rotation can only help.
            let (w, h) = if item.width >= item.height {
                (item.width, item.height)
            } else {
                (item.height, item.width)
            };
            let (w, h) = (w + self.spacing_x, h + self.spacing_y);
            if row_w > 0.0 && row_w + w > wrap + self.spacing_x {
                total_h += row_h;
                row_w = 0.0;
                row_h = 0.0;
            }
            row_w += w;
            row_h = row_h.max(h);
            max_w = max_w.max(row_w);
        }
        total_h += row_h;
        (
            (max_w - self.spacing_x).max(0.0),
            (total_h - self.spacing_y).max(0.0),
        )
    }

    pub(crate) fn panel_too_small(&self) -> PackError {
        let (required_width, required_height) = self.required_extent();
        PackError::PanelTooSmall {
            required_width,
            required_height,
            configured_width: self.panel_width,
            configured_height: self.panel_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sorts_largest_dimension_first() {
        let req = PackRequest::new(
            vec![
                PackItem { name: "small".into(), width: 1.0, height: 1.0 },
                PackItem { name: "tall".into(), width: 1.0, height: 5.0 },
                PackItem { name: "wide".into(), width: 4.0, height: 1.0 },
            ],
            10.0,
            10.0,
            0.0,
            0.0,
        );
        let names: Vec<&str> = req.items().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["tall", "wide", "small"]);
    }

    #[test]
    fn required_extent_covers_single_oversized_job() {
        let req = PackRequest::new(
            vec![PackItem { name: "j".into(), width: 2.0, height: 2.0 }],
            1.0,
            1.0,
            0.0,
            0.0,
        );
        let (w, h) = req.required_extent();
        assert!(w >= 2.0);
        assert!(h >= 2.0);
    }
}
