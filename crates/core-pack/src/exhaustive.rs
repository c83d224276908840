//! Depth-first enumeration of complete guillotine tilings.
//!
//! At every node the search owns a stack of free sub-rectangles. It takes
//! the top rectangle and either leaves it empty or places one remaining job
//! in its lower-left corner (native or rotated) under one of the two split
//! orders, pushing the leftovers. A branch is cut as soon as the minimum
//! area still to be placed exceeds the free area. The traversal order is
//! canonical (items ascending, native before rotated, right-then-top before
//! top-then-right, empty last), which together with the total order on
//! tilings makes the winner deterministic.

use crate::tiling::{fits, split, Placed, SplitOrder, Tiling, FIT_EPSILON};
use crate::{CancelToken, PackError, PackProgress, PackRequest};
use core_geom::Rect;
use crossbeam_channel::Sender;

/// Raised through the recursion when the cancellation flag trips.
pub(crate) struct Stopped;

/// Padded cell dimensions for one item, both orientations.
#[derive(Debug, Clone, Copy)]
struct Cell {
    w: f64,
    h: f64,
    rw: f64,
    rh: f64,
    min_area: f64,
}

struct Search<'a> {
    req: &'a PackRequest,
    cells: Vec<Cell>,
    cancel: &'a CancelToken,
    progress: Option<&'a Sender<PackProgress>>,
    nodes: u64,
    /// Rectangles declared empty along the current path. They are not free
    /// for the exhaustive search itself, but the randomized driver's greedy
    /// phase may still fill them.
    skipped: Vec<Rect>,
    best: Option<(Tiling, Vec<Rect>)>,
}

const PROGRESS_NODE_MASK: u64 = (1 << 16) - 1;

impl<'a> Search<'a> {
    fn new(
        req: &'a PackRequest,
        cancel: &'a CancelToken,
        progress: Option<&'a Sender<PackProgress>>,
    ) -> Self {
        let (sx, sy) = req.spacing();
        let cells = req
            .items()
            .iter()
            .map(|item| {
                let w = item.width + sx;
                let h = item.height + sy;
                let rw = item.height + sx;
                let rh = item.width + sy;
                Cell {
                    w,
                    h,
                    rw,
                    rh,
                    min_area: (w * h).min(rw * rh),
                }
            })
            .collect();
        Self {
            req,
            cells,
            cancel,
            progress,
            nodes: 0,
            skipped: Vec::new(),
            best: None,
        }
    }

    fn tick(&mut self) -> Result<(), Stopped> {
        self.nodes += 1;
        if self.cancel.is_cancelled() {
            return Err(Stopped);
        }
        if self.nodes & PROGRESS_NODE_MASK == 0 {
            if let Some(tx) = self.progress {
                let _ = tx.try_send(PackProgress {
                    placements_tried: self.nodes,
                    best_extent: self.best.as_ref().map(|(t, _)| t.extent()),
                });
            }
        }
        Ok(())
    }

    fn record(&mut self, places: &[Placed], free: &[Rect]) {
        let candidate = Tiling::from_places(places.to_vec(), self.req.items());
        let replace = match &self.best {
            Some((best, _)) => candidate.better_than(best, self.req.items()),
            None => true,
        };
        if replace {
            let mut leftover = free.to_vec();
            leftover.extend_from_slice(&self.skipped);
            self.best = Some((candidate, leftover));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs(
        &mut self,
        free: &mut Vec<Rect>,
        free_area: f64,
        used: &mut [bool],
        remaining: usize,
        remaining_min_area: f64,
        places: &mut Vec<Placed>,
    ) -> Result<(), Stopped> {
        self.tick()?;
        if remaining == 0 {
            self.record(places, free);
            return Ok(());
        }
        if remaining_min_area > free_area + FIT_EPSILON {
            return Ok(()); // cannot possibly fit what is left
        }
        let Some(rect) = free.pop() else {
            return Ok(());
        };
        let rect_area = rect.area();

        for idx in 0..self.cells.len() {
            if used[idx] {
                continue;
            }
            let cell = self.cells[idx];
            let square = (cell.w - cell.rw).abs() <= FIT_EPSILON
                && (cell.h - cell.rh).abs() <= FIT_EPSILON;
            for rotated in [false, true] {
                if rotated && square {
                    continue;
                }
                let (cw, ch) = if rotated {
                    (cell.rw, cell.rh)
                } else {
                    (cell.w, cell.h)
                };
                if !fits(&rect, cw, ch) {
                    continue;
                }
                // When the cell consumes the rectangle in one axis the two
                // split orders coincide; explore only one.
                let single_split = rect.width() - cw <= FIT_EPSILON
                    || rect.height() - ch <= FIT_EPSILON;
                for order in [SplitOrder::RightThenTop, SplitOrder::TopThenRight] {
                    if order == SplitOrder::TopThenRight && single_split {
                        continue;
                    }
                    let children = split(&rect, cw, ch, order);
                    let children_area: f64 = children.iter().map(Rect::area).sum();
                    let depth = children.len();
                    free.extend(children);
                    used[idx] = true;
                    places.push(Placed {
                        item: idx,
                        x: rect.min_x,
                        y: rect.min_y,
                        rotated,
                    });
                    self.dfs(
                        free,
                        free_area - rect_area + children_area,
                        used,
                        remaining - 1,
                        remaining_min_area - cell.min_area,
                        places,
                    )?;
                    places.pop();
                    used[idx] = false;
                    free.truncate(free.len() - depth);
                }
            }
        }

        // Or leave this sub-rectangle empty.
        self.skipped.push(rect);
        let emptied = self.dfs(
            free,
            free_area - rect_area,
            used,
            remaining,
            remaining_min_area,
            places,
        );
        self.skipped.pop();
        emptied?;

        free.push(rect);
        Ok(())
    }

    fn run(&mut self, panel: Rect, subset: &[usize]) -> Result<(), Stopped> {
        let mut used = vec![true; self.cells.len()];
        let mut remaining_min_area = 0.0;
        for &idx in subset {
            used[idx] = false;
            remaining_min_area += self.cells[idx].min_area;
        }
        let mut free = vec![panel];
        let free_area = panel.area();
        let mut places = Vec::with_capacity(subset.len());
        self.dfs(
            &mut free,
            free_area,
            &mut used,
            subset.len(),
            remaining_min_area,
            &mut places,
        )
    }
}

/// Exhaustively search complete tilings of every item on the panel.
pub fn pack_exhaustive(
    req: &PackRequest,
    cancel: &CancelToken,
    progress: Option<&Sender<PackProgress>>,
) -> Result<Tiling, PackError> {
    let all: Vec<usize> = (0..req.items().len()).collect();
    let mut search = Search::new(req, cancel, progress);
    let stopped = search.run(req.padded_panel(), &all).is_err();
    tracing::info!(
        target: "pack.search",
        nodes = search.nodes,
        found = search.best.is_some(),
        stopped,
        "exhaustive_search_done"
    );
    match (search.best, stopped) {
        (Some((tiling, _)), _) => Ok(tiling),
        (None, true) => Err(PackError::Cancelled),
        (None, false) => Err(req.panel_too_small()),
    }
}

/// Exhaustively tile only `subset` (the randomized driver's prefix),
/// returning the best sub-tiling and its leftover free rectangles.
pub(crate) fn exhaustive_subset(
    req: &PackRequest,
    panel: Rect,
    subset: &[usize],
    cancel: &CancelToken,
) -> Result<Option<(Vec<Placed>, Vec<Rect>)>, Stopped> {
    let mut search = Search::new(req, cancel, None);
    search.run(panel, subset)?;
    Ok(search.best.map(|(tiling, free)| (tiling.placed, free)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackItem;

    fn item(name: &str, w: f64, h: f64) -> PackItem {
        PackItem {
            name: name.into(),
            width: w,
            height: h,
        }
    }

    fn footprints(tiling: &Tiling, items: &[PackItem]) -> Vec<Rect> {
        tiling
            .placed
            .iter()
            .map(|p| {
                let (w, h) = if p.rotated {
                    (items[p.item].height, items[p.item].width)
                } else {
                    (items[p.item].width, items[p.item].height)
                };
                Rect::new(p.x, p.y, p.x + w, p.y + h)
            })
            .collect()
    }

    #[test]
    fn single_job_lands_at_origin() {
        let req = PackRequest::new(vec![item("j", 4.0, 3.0)], 10.0, 10.0, 0.0, 0.0);
        let tiling = pack_exhaustive(&req, &CancelToken::new(), None).unwrap();
        assert_eq!(tiling.placed.len(), 1);
        let p = tiling.placed[0];
        assert_eq!((p.x, p.y, p.rotated), (0.0, 0.0, false));
        assert_eq!(tiling.extent(), (4.0, 3.0));
    }

    #[test]
    fn two_jobs_fit_a_tight_panel() {
        // A=3x2 and B=2x3 on a 5x5 panel; every complete tiling keeps both
        // footprints disjoint and inside the panel.
        let req = PackRequest::new(
            vec![item("a", 3.0, 2.0), item("b", 2.0, 3.0)],
            5.0,
            5.0,
            0.0,
            0.0,
        );
        let tiling = pack_exhaustive(&req, &CancelToken::new(), None).unwrap();
        assert_eq!(tiling.placed.len(), 2);
        let (ew, eh) = tiling.extent();
        assert!(ew <= 5.0 + 1e-9 && eh <= 5.0 + 1e-9);
        let rects = footprints(&tiling, req.items());
        assert!(!rects[0].overlaps(&rects[1]));
    }

    #[test]
    fn spacing_separates_neighbours() {
        let req = PackRequest::new(
            vec![item("a", 2.0, 2.0), item("b", 2.0, 2.0)],
            10.0,
            10.0,
            0.25,
            0.25,
        );
        let tiling = pack_exhaustive(&req, &CancelToken::new(), None).unwrap();
        let rects = footprints(&tiling, req.items());
        // Disjoint even when each footprint is inflated by half the spacing.
        let grow = 0.124;
        let a = Rect::new(
            rects[0].min_x - grow,
            rects[0].min_y - grow,
            rects[0].max_x + grow,
            rects[0].max_y + grow,
        );
        let b = Rect::new(
            rects[1].min_x - grow,
            rects[1].min_y - grow,
            rects[1].max_x + grow,
            rects[1].max_y + grow,
        );
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn oversized_job_reports_panel_too_small() {
        let req = PackRequest::new(vec![item("j", 2.0, 2.0)], 1.0, 1.0, 0.0, 0.0);
        match pack_exhaustive(&req, &CancelToken::new(), None) {
            Err(PackError::PanelTooSmall {
                required_width,
                required_height,
                configured_width,
                configured_height,
            }) => {
                assert!(required_width >= 2.0);
                assert!(required_height >= 2.0);
                assert_eq!((configured_width, configured_height), (1.0, 1.0));
            }
            other => panic!("expected PanelTooSmall, got {:?}", other.map(|t| t.extent())),
        }
    }

    #[test]
    fn cancellation_with_no_result_reports_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let req = PackRequest::new(vec![item("j", 1.0, 1.0)], 5.0, 5.0, 0.0, 0.0);
        assert!(matches!(
            pack_exhaustive(&req, &cancel, None),
            Err(PackError::Cancelled)
        ));
    }

    #[test]
    fn deterministic_between_runs() {
        let req = PackRequest::new(
            vec![
                item("a", 3.0, 2.0),
                item("b", 2.0, 3.0),
                item("c", 1.0, 1.0),
                item("d", 2.0, 1.0),
            ],
            6.0,
            6.0,
            0.1,
            0.1,
        );
        let one = pack_exhaustive(&req, &CancelToken::new(), None).unwrap();
        let two = pack_exhaustive(&req, &CancelToken::new(), None).unwrap();
        assert_eq!(one.placed, two.placed);
    }
}
