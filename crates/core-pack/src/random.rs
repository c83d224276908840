//! Randomized placement search.
//!
//! Each iteration shuffles the job list, tiles the first
//! `exhaustive_jobs` exhaustively, then first-fits the remainder into the
//! leftover free rectangles. Workers run the same loop from per-worker
//! seeds derived from the master seed and publish into one mutex-guarded
//! best-so-far record. The search stops at the wall-clock deadline, on
//! cancellation, or after `max_iterations` samples; a zero timeout with no
//! iteration cap means "until cancelled".

use crate::exhaustive::exhaustive_subset;
use crate::tiling::{first_fit, fits, Placed, Tiling};
use crate::{CancelToken, PackError, PackProgress, PackRequest};
use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RandomOptions {
    /// How many of the shuffled jobs to tile exhaustively per sample.
    pub exhaustive_jobs: usize,
    /// Wall-clock budget; zero means run until cancelled.
    pub timeout: Duration,
    /// Master seed. Worker seeds derive from it, so a recorded seed
    /// reproduces the sample streams.
    pub seed: u64,
    pub workers: usize,
    /// Optional cap on total samples across all workers (bounded runs and
    /// tests; `None` for the CLI's timed mode).
    pub max_iterations: Option<u64>,
}

impl Default for RandomOptions {
    fn default() -> Self {
        Self {
            exhaustive_jobs: 2,
            timeout: Duration::ZERO,
            seed: 0,
            workers: 1,
            max_iterations: None,
        }
    }
}

fn worker_seed(master: u64, worker: usize) -> u64 {
    master.wrapping_add((worker as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Quick infeasibility screen so a hopeless search fails fast instead of
/// sampling forever under a zero timeout.
fn obviously_too_small(req: &PackRequest) -> bool {
    let panel = req.padded_panel();
    let (sx, sy) = req.spacing();
    let mut min_area = 0.0;
    for item in req.items() {
        let w = item.width + sx;
        let h = item.height + sy;
        let rw = item.height + sx;
        let rh = item.width + sy;
        if !fits(&panel, w, h) && !fits(&panel, rw, rh) {
            return true;
        }
        min_area += (w * h).min(rw * rh);
    }
    min_area > panel.area() + 1e-9
}

struct Shared<'a> {
    req: &'a PackRequest,
    opts: &'a RandomOptions,
    cancel: &'a CancelToken,
    progress: Option<&'a Sender<PackProgress>>,
    deadline: Option<Instant>,
    best: Mutex<Option<Tiling>>,
    iterations: AtomicU64,
}

impl Shared<'_> {
    fn publish(&self, tiling: Tiling) {
        let mut guard = self.best.lock().expect("best record lock");
        let replace = match &*guard {
            Some(current) => tiling.better_than(current, self.req.items()),
            None => true,
        };
        if replace {
            tracing::debug!(
                target: "pack.search",
                extent = ?tiling.extent(),
                "random_search_improved"
            );
            *guard = Some(tiling);
        }
    }

    fn report(&self) {
        if let Some(tx) = self.progress {
            let best_extent = self
                .best
                .lock()
                .expect("best record lock")
                .as_ref()
                .map(Tiling::extent);
            let _ = tx.try_send(PackProgress {
                placements_tried: self.iterations.load(Ordering::Relaxed),
                best_extent,
            });
        }
    }
}

const PROGRESS_EVERY: u64 = 256;

fn worker(shared: &Shared<'_>, index: usize) {
    let req = shared.req;
    let n = req.items().len();
    let (sx, sy) = req.spacing();
    let mut rng = StdRng::seed_from_u64(worker_seed(shared.opts.seed, index));
    let mut indices: Vec<usize> = (0..n).collect();
    let prefix_len = shared.opts.exhaustive_jobs.clamp(1, n);

    loop {
        if shared.cancel.is_cancelled() {
            return;
        }
        if let Some(deadline) = shared.deadline {
            if Instant::now() >= deadline {
                return;
            }
        }
        let sample = shared.iterations.fetch_add(1, Ordering::Relaxed);
        if let Some(max) = shared.opts.max_iterations {
            if sample >= max {
                return;
            }
        }
        if sample % PROGRESS_EVERY == 0 {
            shared.report();
        }

        indices.shuffle(&mut rng);
        let (mut places, mut free) = match exhaustive_subset(
            req,
            req.padded_panel(),
            &indices[..prefix_len],
            shared.cancel,
        ) {
            Err(_) => return, // cancelled mid-sample
            Ok(None) => continue,
            Ok(Some(found)) => found,
        };

        let mut complete = true;
        for &idx in &indices[prefix_len..] {
            let item = &req.items()[idx];
            match first_fit(
                &mut free,
                item.width + sx,
                item.height + sy,
                item.height + sx,
                item.width + sy,
                true,
            ) {
                Some((x, y, rotated)) => places.push(Placed {
                    item: idx,
                    x,
                    y,
                    rotated,
                }),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            shared.publish(Tiling::from_places(places, req.items()));
        }
    }
}

/// Run the randomized driver. Returns the best complete tiling found within
/// the budget.
pub fn pack_random(
    req: &PackRequest,
    opts: &RandomOptions,
    cancel: &CancelToken,
    progress: Option<&Sender<PackProgress>>,
) -> Result<Tiling, PackError> {
    if req.items().is_empty() {
        return Ok(Tiling::from_places(Vec::new(), req.items()));
    }
    if obviously_too_small(req) {
        return Err(req.panel_too_small());
    }

    let deadline = (opts.timeout > Duration::ZERO).then(|| Instant::now() + opts.timeout);
    let shared = Shared {
        req,
        opts,
        cancel,
        progress,
        deadline,
        best: Mutex::new(None),
        iterations: AtomicU64::new(0),
    };

    let workers = opts.workers.max(1);
    std::thread::scope(|scope| {
        for index in 0..workers {
            let shared = &shared;
            scope.spawn(move || worker(shared, index));
        }
    });

    let iterations = shared.iterations.load(Ordering::Relaxed);
    let best = shared.best.into_inner().expect("best record lock");
    tracing::info!(
        target: "pack.search",
        seed = opts.seed,
        workers,
        iterations,
        found = best.is_some(),
        "random_search_done"
    );
    match best {
        Some(tiling) => Ok(tiling),
        None if cancel.is_cancelled() => Err(PackError::Cancelled),
        None => Err(req.panel_too_small()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PackItem;
    use core_geom::Rect;

    fn item(name: &str, w: f64, h: f64) -> PackItem {
        PackItem {
            name: name.into(),
            width: w,
            height: h,
        }
    }

    fn opts(seed: u64, iterations: u64) -> RandomOptions {
        RandomOptions {
            seed,
            max_iterations: Some(iterations),
            ..RandomOptions::default()
        }
    }

    #[test]
    fn single_job_places_at_origin() {
        let req = PackRequest::new(vec![item("j", 4.0, 3.0)], 10.0, 10.0, 0.0, 0.0);
        let tiling = pack_random(&req, &opts(42, 20), &CancelToken::new(), None).unwrap();
        assert_eq!(tiling.placed.len(), 1);
        let p = tiling.placed[0];
        assert_eq!((p.x, p.y, p.rotated), (0.0, 0.0, false));
        assert_eq!(tiling.extent(), (4.0, 3.0));
    }

    #[test]
    fn same_seed_reproduces_the_same_tiling() {
        let items = vec![
            item("a", 3.0, 2.0),
            item("b", 2.0, 3.0),
            item("c", 1.5, 1.0),
            item("d", 1.0, 1.0),
            item("e", 2.0, 1.0),
        ];
        let req = PackRequest::new(items, 6.0, 6.0, 0.1, 0.1);
        let one = pack_random(&req, &opts(7, 200), &CancelToken::new(), None).unwrap();
        let two = pack_random(&req, &opts(7, 200), &CancelToken::new(), None).unwrap();
        assert_eq!(one.placed, two.placed);
    }

    #[test]
    fn parallel_workers_keep_footprints_disjoint_and_inside() {
        let items = vec![
            item("a", 3.0, 2.0),
            item("b", 2.0, 3.0),
            item("c", 1.5, 1.0),
            item("d", 1.0, 1.0),
        ];
        let req = PackRequest::new(items, 6.0, 6.0, 0.05, 0.05);
        let options = RandomOptions {
            seed: 11,
            workers: 4,
            max_iterations: Some(400),
            ..RandomOptions::default()
        };
        let tiling = pack_random(&req, &options, &CancelToken::new(), None).unwrap();
        assert_eq!(tiling.placed.len(), 4);
        let (ew, eh) = tiling.extent();
        assert!(ew <= 6.0 + 1e-9 && eh <= 6.0 + 1e-9);
        let rects: Vec<Rect> = tiling
            .placed
            .iter()
            .map(|p| {
                let it = &req.items()[p.item];
                let (w, h) = if p.rotated { (it.height, it.width) } else { (it.width, it.height) };
                Rect::new(p.x, p.y, p.x + w, p.y + h)
            })
            .collect();
        for (i, a) in rects.iter().enumerate() {
            for b in &rects[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn hopeless_panel_fails_fast() {
        let req = PackRequest::new(vec![item("j", 2.0, 2.0)], 1.0, 1.0, 0.0, 0.0);
        assert!(matches!(
            pack_random(&req, &RandomOptions::default(), &CancelToken::new(), None),
            Err(PackError::PanelTooSmall { .. })
        ));
    }

    #[test]
    fn timeout_bounds_the_search() {
        let items = vec![
            item("a", 3.0, 2.0),
            item("b", 2.0, 3.0),
            item("c", 1.5, 1.0),
        ];
        let req = PackRequest::new(items, 8.0, 8.0, 0.0, 0.0);
        let options = RandomOptions {
            seed: 3,
            timeout: Duration::from_millis(50),
            ..RandomOptions::default()
        };
        let started = Instant::now();
        let tiling = pack_random(&req, &options, &CancelToken::new(), None).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(tiling.placed.len(), 3);
    }
}
