//! Placement: where each job instance sits on the panel.
//!
//! A `Placement` is the flat, ordered list of `{job, x, y, rotated}` the
//! merger consumes. It can be built three ways: flattening the packer's
//! tiling, stacking layout-file rows, or reading back a previously written
//! placement file (`write` and `from_file` round-trip, which is how runs
//! are reproduced). Jobs are shared read-only via `Arc`; the rotated twin
//! of every job is materialized once in the [`JobRegistry`] so a placement
//! entry is just a reference plus an offset.

use core_aperture::{ApertureTable, MacroTable};
use core_geom::Rect;
use core_job::{Job, JobError};
use core_pack::{PackItem, Tiling};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

mod layout;

pub use layout::{parse_layout, LayoutEntry};

#[derive(Error, Debug)]
pub enum PlaceError {
    #[error("layout references unknown job {0}")]
    LayoutReferencesUnknownJob(String),
    #[error("malformed placement line {line}: {text:?}")]
    InvalidPlacementLine { line: usize, text: String },
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A job and its pre-built 90°-rotated twin.
#[derive(Debug, Clone)]
pub struct JobPair {
    pub native: Arc<Job>,
    pub rotated: Arc<Job>,
}

/// All jobs of the run, each with its rotated twin, keyed by name.
#[derive(Debug, Default)]
pub struct JobRegistry {
    pairs: BTreeMap<String, JobPair>,
}

impl JobRegistry {
    /// Materialize rotated twins through the global tables.
    pub fn build(
        jobs: BTreeMap<String, Job>,
        apertures: &mut ApertureTable,
        macros: &mut MacroTable,
    ) -> Result<Self, JobError> {
        let mut pairs = BTreeMap::new();
        for (name, job) in jobs {
            let rotated = job.rotated_90(apertures, macros)?;
            pairs.insert(
                name,
                JobPair {
                    native: Arc::new(job),
                    rotated: Arc::new(rotated),
                },
            );
        }
        Ok(Self { pairs })
    }

    pub fn get(&self, name: &str) -> Option<&JobPair> {
        self.pairs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobPair)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// One placed job instance. `job` is already the rotated twin when
/// `rotated` is set, so emission only ever applies the offset.
#[derive(Debug, Clone)]
pub struct PlacedJob {
    pub name: String,
    pub job: Arc<Job>,
    pub x: f64,
    pub y: f64,
    pub rotated: bool,
}

impl PlacedJob {
    pub fn footprint(&self) -> Rect {
        Rect::new(
            self.x,
            self.y,
            self.x + self.job.width(),
            self.y + self.job.height(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Placement {
    pub jobs: Vec<PlacedJob>,
}

impl Placement {
    fn entry(
        registry: &JobRegistry,
        name: &str,
        x: f64,
        y: f64,
        rotated: bool,
    ) -> Result<PlacedJob, PlaceError> {
        let pair = registry
            .get(name)
            .ok_or_else(|| PlaceError::LayoutReferencesUnknownJob(name.to_string()))?;
        let job = if rotated {
            pair.rotated.clone()
        } else {
            pair.native.clone()
        };
        Ok(PlacedJob {
            name: name.to_string(),
            job,
            x,
            y,
            rotated,
        })
    }

    /// Flatten the packer's tiling, translating to the panel origin.
    pub fn from_tiling(
        tiling: &Tiling,
        items: &[PackItem],
        registry: &JobRegistry,
        origin_x: f64,
        origin_y: f64,
    ) -> Result<Self, PlaceError> {
        let mut jobs = Vec::with_capacity(tiling.placed.len());
        for p in &tiling.placed {
            jobs.push(Self::entry(
                registry,
                &items[p.item].name,
                origin_x + p.x,
                origin_y + p.y,
                p.rotated,
            )?);
        }
        Ok(Self { jobs })
    }

    /// Stack layout rows bottom-to-top: each row is laid left-to-right with
    /// `xspacing` between jobs, rows are `yspacing` apart, and a row is as
    /// tall as its tallest job.
    pub fn from_layout(
        rows: &[Vec<LayoutEntry>],
        registry: &JobRegistry,
        origin_x: f64,
        origin_y: f64,
        xspacing: f64,
        yspacing: f64,
    ) -> Result<Self, PlaceError> {
        let mut jobs = Vec::new();
        let mut y = origin_y;
        for row in rows {
            let mut x = origin_x;
            let mut row_height = 0.0f64;
            for entry in row {
                let placed = Self::entry(registry, &entry.name, x, y, entry.rotated)?;
                x += placed.job.width() + xspacing;
                row_height = row_height.max(placed.job.height());
                jobs.push(placed);
            }
            y += row_height + yspacing;
        }
        Ok(Self { jobs })
    }

    /// Read a placement back from the reproducibility file (`name x y
    /// [rotated]` per line, `#` comments allowed).
    pub fn from_file(path: &Path, registry: &JobRegistry) -> Result<Self, PlaceError> {
        let text = fs::read_to_string(path)?;
        let mut jobs = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = || PlaceError::InvalidPlacementLine {
                line: idx + 1,
                text: raw.to_string(),
            };
            let mut fields = line.split_whitespace();
            let name = fields.next().ok_or_else(malformed)?;
            let x: f64 = fields
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(malformed)?;
            let y: f64 = fields
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(malformed)?;
            let rotated = match fields.next() {
                None => false,
                Some("rotated") => true,
                Some(_) => return Err(malformed()),
            };
            if fields.next().is_some() {
                return Err(malformed());
            }
            jobs.push(Self::entry(registry, name, x, y, rotated)?);
        }
        tracing::info!(target: "place", count = jobs.len(), file = %path.display(), "placement_loaded");
        Ok(Self { jobs })
    }

    /// Serialize in the `from_file` format.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for p in &self.jobs {
            let mut line = String::new();
            let _ = write!(line, "{} {:.5} {:.5}", p.name, p.x, p.y);
            if p.rotated {
                line.push_str(" rotated");
            }
            writeln!(w, "{}", line)?;
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        self.write_to(&mut file)
    }

    /// Bounding box over all placed footprints.
    pub fn extents(&self) -> Rect {
        let mut bounds: Option<Rect> = None;
        for p in &self.jobs {
            let fp = p.footprint();
            bounds = Some(match bounds {
                Some(b) => b.union(&fp),
                None => fp,
            });
        }
        bounds.unwrap_or(Rect::point(0.0, 0.0))
    }

    /// Total board area placed (for the utilization statistic).
    pub fn placed_area(&self) -> f64 {
        self.jobs.iter().map(|p| p.job.area()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_job::{DrillProgram, LayerToken, OpKind, BOARD_OUTLINE_LAYER};

    fn rect_job(name: &str, w: f64, h: f64) -> Job {
        let outline = vec![
            LayerToken::Op { x: 0.0, y: 0.0, kind: OpKind::Move },
            LayerToken::Op { x: w, y: 0.0, kind: OpKind::Line },
            LayerToken::Op { x: w, y: h, kind: OpKind::Line },
            LayerToken::Op { x: 0.0, y: h, kind: OpKind::Line },
            LayerToken::Op { x: 0.0, y: 0.0, kind: OpKind::Line },
        ];
        let mut layers = BTreeMap::new();
        layers.insert(BOARD_OUTLINE_LAYER.to_string(), outline);
        Job::new(name.to_string(), layers, DrillProgram::default(), Vec::new(), 1).unwrap()
    }

    fn registry(jobs: &[(&str, f64, f64)]) -> JobRegistry {
        let mut map = BTreeMap::new();
        for (name, w, h) in jobs {
            map.insert(name.to_string(), rect_job(name, *w, *h));
        }
        let mut gat = ApertureTable::new();
        let mut gamt = MacroTable::new();
        JobRegistry::build(map, &mut gat, &mut gamt).unwrap()
    }

    #[test]
    fn layout_rows_stack_bottom_to_top() {
        let reg = registry(&[("a", 2.0, 1.0), ("b", 1.0, 2.0)]);
        let rows = vec![
            vec![
                LayoutEntry { name: "a".into(), rotated: false },
                LayoutEntry { name: "b".into(), rotated: false },
            ],
            vec![LayoutEntry { name: "a".into(), rotated: true }],
        ];
        let place = Placement::from_layout(&rows, &reg, 0.1, 0.1, 0.25, 0.5).unwrap();
        assert_eq!(place.jobs.len(), 3);
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(close(place.jobs[0].x, 0.1) && close(place.jobs[0].y, 0.1));
        assert!(close(place.jobs[1].x, 2.35) && close(place.jobs[1].y, 0.1));
        // Second row above the tallest job of the first plus spacing.
        assert!(close(place.jobs[2].x, 0.1) && close(place.jobs[2].y, 2.6));
        assert!(place.jobs[2].rotated);
        // Rotated "a" is 1x2.
        assert!((place.jobs[2].job.width() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn extents_cover_rotated_footprints() {
        let reg = registry(&[("a", 3.0, 2.0)]);
        let place = Placement {
            jobs: vec![PlacedJob {
                name: "a".into(),
                job: reg.get("a").unwrap().rotated.clone(),
                x: 1.0,
                y: 1.0,
                rotated: true,
            }],
        };
        assert_eq!(place.extents(), Rect::new(1.0, 1.0, 3.0, 4.0));
    }

    #[test]
    fn placement_file_round_trips() {
        let reg = registry(&[("alpha", 2.0, 1.0), ("beta", 1.0, 1.0)]);
        let place = Placement {
            jobs: vec![
                PlacedJob {
                    name: "alpha".into(),
                    job: reg.get("alpha").unwrap().native.clone(),
                    x: 0.1,
                    y: 0.1,
                    rotated: false,
                },
                PlacedJob {
                    name: "beta".into(),
                    job: reg.get("beta").unwrap().rotated.clone(),
                    x: 2.35,
                    y: 0.1,
                    rotated: true,
                },
            ],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.placement.txt");
        place.write(&path).unwrap();
        let back = Placement::from_file(&path, &reg).unwrap();
        assert_eq!(back.jobs.len(), 2);
        for (a, b) in place.jobs.iter().zip(&back.jobs) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.rotated, b.rotated);
            assert!((a.x - b.x).abs() <= 1e-5);
            assert!((a.y - b.y).abs() <= 1e-5);
        }
    }

    #[test]
    fn unknown_job_in_placement_file_is_rejected() {
        let reg = registry(&[("alpha", 2.0, 1.0)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.placement.txt");
        fs::write(&path, "ghost 0.10000 0.10000\n").unwrap();
        assert!(matches!(
            Placement::from_file(&path, &reg),
            Err(PlaceError::LayoutReferencesUnknownJob(name)) if name == "ghost"
        ));
    }
}
