//! Per-board job model: layer command streams, the drill program, and the
//! geometric operations the panelizer applies to a board before placement.
//!
//! A `Job` is built by the readers in `core-parse`, normalized once
//! (`shift_to_positive`, optional trimming), and from then on referenced,
//! never copied, by placements. Rotation is resolved eagerly: the packer
//! works against a pre-built 90°-rotated twin of each job, so emission only
//! ever needs a translation offset plus the aperture/tool remaps.
//!
//! Invariants:
//! * Every `Select` token references a code present in the global aperture
//!   table; coordinates are absolute in the job's local frame.
//! * Every drill tool with hits has a diameter in `DrillProgram::tools`.
//! * After `shift_to_positive`, `min_x >= 0` and `min_y >= 0` across every
//!   layer and drill stream (idempotent).
//! * The bounding box is derived solely from the board-outline layer; other
//!   layers may overhang and are not consulted.

use core_aperture::{ApertureCode, ApertureError, ApertureTable, MacroId, MacroTable};
use core_geom::{gerb, rotate90, Rect};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use thiserror::Error;

mod tools;
mod trim;

pub use tools::{diameter_key, ToolCode, ToolError, ToolTable};

/// The layer name whose extents are authoritative for a board's size.
pub const BOARD_OUTLINE_LAYER: &str = "boardoutline";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job {0} has no board outline layer")]
    MissingBoardOutline(String),
    #[error("job {0} has an empty board outline layer")]
    EmptyBoardOutline(String),
    #[error(transparent)]
    Aperture(#[from] ApertureError),
}

/// Process-wide resource tables, threaded explicitly through the parser,
/// packer, and merger (no hidden module-level mutability). Read-only after
/// parsing, except for the drawing apertures the merger inserts before
/// emission begins.
#[derive(Debug, Default, Clone)]
pub struct GlobalState {
    pub apertures: ApertureTable,
    pub macros: MacroTable,
    pub tools: ToolTable,
}

/// Coordinate operation kinds (`D02`, `D01`, `D03`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Move,
    Line,
    Flash,
}

impl OpKind {
    fn d_code(self) -> u8 {
        match self {
            OpKind::Line => 1,
            OpKind::Move => 2,
            OpKind::Flash => 3,
        }
    }
}

/// One token of a layer command stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerToken {
    /// Select an aperture from the global table.
    Select(ApertureCode),
    /// A coordinate operation, absolute inches in the job's local frame.
    Op { x: f64, y: f64, kind: OpKind },
    /// An opaque command re-emitted verbatim (`G36*`, `G37*`, …).
    Passthrough(String),
}

/// One job's Excellon data: local tool names to diameters, and per-tool hit
/// lists. Local names stay job-scoped; the global tool table maps diameters
/// to panel-wide `Tnn` codes.
#[derive(Debug, Clone, Default)]
pub struct DrillProgram {
    pub tools: BTreeMap<String, f64>,
    pub hits: BTreeMap<String, Vec<(f64, f64)>>,
}

impl DrillProgram {
    pub fn hit_count(&self) -> usize {
        self.hits.values().map(Vec::len).sum()
    }
}

/// A centroid (pick-and-place) record carried through placement.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidRecord {
    pub refdes: String,
    pub side: String,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
}

/// One board job: layer streams, drill program, repeat count, and the
/// outline-derived bounding box.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub layers: BTreeMap<String, Vec<LayerToken>>,
    pub drill: DrillProgram,
    pub centroids: Vec<CentroidRecord>,
    pub repeat: u32,
    bounds: Rect,
}

impl Job {
    /// Assemble a job from parsed parts, deriving the outline bounding box.
    pub fn new(
        name: String,
        layers: BTreeMap<String, Vec<LayerToken>>,
        drill: DrillProgram,
        centroids: Vec<CentroidRecord>,
        repeat: u32,
    ) -> Result<Self, JobError> {
        let mut job = Job {
            name,
            layers,
            drill,
            centroids,
            repeat: repeat.max(1),
            bounds: Rect::point(0.0, 0.0),
        };
        job.recompute_bounds()?;
        Ok(job)
    }

    /// Bounding box of the board-outline layer.
    pub fn bounding_box(&self) -> Rect {
        self.bounds
    }

    pub fn width(&self) -> f64 {
        self.bounds.width()
    }

    pub fn height(&self) -> f64 {
        self.bounds.height()
    }

    pub fn area(&self) -> f64 {
        self.bounds.area()
    }

    pub fn max_dimension(&self) -> f64 {
        self.bounds.max_side()
    }

    fn recompute_bounds(&mut self) -> Result<(), JobError> {
        let outline = self
            .layers
            .get(BOARD_OUTLINE_LAYER)
            .ok_or_else(|| JobError::MissingBoardOutline(self.name.clone()))?;
        let mut bounds: Option<Rect> = None;
        for token in outline {
            if let LayerToken::Op { x, y, .. } = token {
                match &mut bounds {
                    Some(r) => r.expand_to(*x, *y),
                    None => bounds = Some(Rect::point(*x, *y)),
                }
            }
        }
        self.bounds = bounds.ok_or_else(|| JobError::EmptyBoardOutline(self.name.clone()))?;
        Ok(())
    }

    /// Minimum coordinate across every layer stream and drill hit.
    pub fn min_coordinates(&self) -> (f64, f64) {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        for tokens in self.layers.values() {
            for token in tokens {
                if let LayerToken::Op { x, y, .. } = token {
                    min_x = min_x.min(*x);
                    min_y = min_y.min(*y);
                }
            }
        }
        for hits in self.drill.hits.values() {
            for (x, y) in hits {
                min_x = min_x.min(*x);
                min_y = min_y.min(*y);
            }
        }
        (min_x, min_y)
    }

    fn translate(&mut self, dx: f64, dy: f64) {
        for tokens in self.layers.values_mut() {
            for token in tokens {
                if let LayerToken::Op { x, y, .. } = token {
                    *x += dx;
                    *y += dy;
                }
            }
        }
        for hits in self.drill.hits.values_mut() {
            for (x, y) in hits {
                *x += dx;
                *y += dy;
            }
        }
        for rec in &mut self.centroids {
            rec.x += dx;
            rec.y += dy;
        }
        self.bounds = self.bounds.translated(dx, dy);
    }

    /// Force every coordinate non-negative by shifting up the absolute value
    /// of any negative minimum. Idempotent.
    pub fn shift_to_positive(&mut self) {
        let (min_x, min_y) = self.min_coordinates();
        let dx = if min_x.is_finite() && min_x < 0.0 { -min_x } else { 0.0 };
        let dy = if min_y.is_finite() && min_y < 0.0 { -min_y } else { 0.0 };
        if dx > 0.0 || dy > 0.0 {
            tracing::debug!(target: "job", job = %self.name, dx, dy, "shift_to_positive");
            self.translate(dx, dy);
        }
    }

    /// Build the 90°-rotated twin of this job.
    ///
    /// Coordinates map `(x, y) -> (-y, x)` and are shifted back into the
    /// positive quadrant; apertures that are not rotationally symmetric are
    /// re-addressed through the global tables.
    pub fn rotated_90(
        &self,
        apertures: &mut ApertureTable,
        macros: &mut MacroTable,
    ) -> Result<Job, JobError> {
        let mut layers = BTreeMap::new();
        let mut select_cache: BTreeMap<ApertureCode, ApertureCode> = BTreeMap::new();
        for (layer, tokens) in &self.layers {
            let mut out = Vec::with_capacity(tokens.len());
            for token in tokens {
                out.push(match token {
                    LayerToken::Select(code) => {
                        let mapped = match select_cache.get(code) {
                            Some(m) => *m,
                            None => {
                                let shape = apertures
                                    .get(*code)
                                    .ok_or(ApertureError::UnknownCode(*code))?
                                    .clone();
                                let rotated = shape.rotated_90(macros)?;
                                let mapped = if rotated.approx_eq(&shape) {
                                    *code
                                } else {
                                    apertures.find_or_add(rotated)
                                };
                                select_cache.insert(*code, mapped);
                                mapped
                            }
                        };
                        LayerToken::Select(mapped)
                    }
                    LayerToken::Op { x, y, kind } => {
                        let (rx, ry) = rotate90(*x, *y);
                        LayerToken::Op {
                            x: rx,
                            y: ry,
                            kind: *kind,
                        }
                    }
                    LayerToken::Passthrough(s) => LayerToken::Passthrough(s.clone()),
                });
            }
            layers.insert(layer.clone(), out);
        }

        let mut drill = DrillProgram {
            tools: self.drill.tools.clone(),
            hits: BTreeMap::new(),
        };
        for (tool, hits) in &self.drill.hits {
            drill
                .hits
                .insert(tool.clone(), hits.iter().map(|&(x, y)| rotate90(x, y)).collect());
        }

        let centroids = self
            .centroids
            .iter()
            .map(|rec| {
                let (x, y) = rotate90(rec.x, rec.y);
                CentroidRecord {
                    refdes: rec.refdes.clone(),
                    side: rec.side.clone(),
                    x,
                    y,
                    rotation: (rec.rotation + 90.0).rem_euclid(360.0),
                }
            })
            .collect();

        let mut job = Job::new(self.name.clone(), layers, drill, centroids, self.repeat)?;
        job.shift_to_positive();
        Ok(job)
    }

    /// The aperture codes and macro ids this job's `layer` stream uses.
    pub fn apertures_and_macros(
        &self,
        layer: &str,
        apertures: &ApertureTable,
    ) -> (BTreeSet<ApertureCode>, BTreeSet<MacroId>) {
        let mut used_ap = BTreeSet::new();
        let mut used_macro = BTreeSet::new();
        if let Some(tokens) = self.layers.get(layer) {
            for token in tokens {
                if let LayerToken::Select(code) = token {
                    used_ap.insert(*code);
                    if let Some(core_aperture::Shape::Macro { id, .. }) = apertures.get(*code) {
                        used_macro.insert(*id);
                    }
                }
            }
        }
        (used_ap, used_macro)
    }

    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    /// Emit one layer stream offset by `(dx, dy)`, translating aperture
    /// selects through `ap_remap` (identity for codes not in the map).
    pub fn emit_layer<W: Write>(
        &self,
        w: &mut W,
        layer: &str,
        dx: f64,
        dy: f64,
        ap_remap: &BTreeMap<ApertureCode, ApertureCode>,
    ) -> io::Result<()> {
        let Some(tokens) = self.layers.get(layer) else {
            return Ok(());
        };
        for token in tokens {
            match token {
                LayerToken::Select(code) => {
                    let code = ap_remap.get(code).copied().unwrap_or(*code);
                    writeln!(w, "{}*", code)?;
                }
                LayerToken::Op { x, y, kind } => {
                    writeln!(
                        w,
                        "X{:07}Y{:07}D0{}*",
                        gerb(x + dx),
                        gerb(y + dy),
                        kind.d_code()
                    )?;
                }
                LayerToken::Passthrough(s) => writeln!(w, "{}", s)?,
            }
        }
        Ok(())
    }

    /// Emit every drill hit whose (clustered) tool diameter equals
    /// `diameter`, offset by `(dx, dy)`. Returns the number of hits written.
    pub fn emit_drill_hits<W: Write>(
        &self,
        w: &mut W,
        diameter: f64,
        dx: f64,
        dy: f64,
    ) -> io::Result<usize> {
        let mut written = 0;
        for (tool, hits) in &self.drill.hits {
            let Some(d) = self.drill.tools.get(tool) else {
                continue;
            };
            if diameter_key(*d) != diameter_key(diameter) {
                continue;
            }
            for (x, y) in hits {
                writeln!(w, "X{:07}Y{:07}", gerb(x + dx), gerb(y + dy))?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Hits this job contributes to the tool with `diameter`.
    pub fn drill_hits_for(&self, diameter: f64) -> usize {
        self.drill
            .hits
            .iter()
            .filter(|(tool, _)| {
                self.drill
                    .tools
                    .get(*tool)
                    .is_some_and(|d| diameter_key(*d) == diameter_key(diameter))
            })
            .map(|(_, hits)| hits.len())
            .sum()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A rectangular board outline plus one copper layer with a single
    /// flash, for exercising geometry operations.
    pub fn rect_job(name: &str, w: f64, h: f64) -> Job {
        let code = ApertureCode(10);
        let outline = vec![
            LayerToken::Op { x: 0.0, y: 0.0, kind: OpKind::Move },
            LayerToken::Op { x: w, y: 0.0, kind: OpKind::Line },
            LayerToken::Op { x: w, y: h, kind: OpKind::Line },
            LayerToken::Op { x: 0.0, y: h, kind: OpKind::Line },
            LayerToken::Op { x: 0.0, y: 0.0, kind: OpKind::Line },
        ];
        let copper = vec![
            LayerToken::Select(code),
            LayerToken::Op { x: w / 2.0, y: h / 2.0, kind: OpKind::Flash },
        ];
        let mut layers = BTreeMap::new();
        layers.insert(BOARD_OUTLINE_LAYER.to_string(), outline);
        layers.insert("*toplayer".to_string(), copper);

        let mut drill = DrillProgram::default();
        drill.tools.insert("T01".into(), 0.032);
        drill.hits.insert("T01".into(), vec![(w / 2.0, h / 2.0)]);

        Job::new(name.to_string(), layers, drill, Vec::new(), 1).unwrap()
    }
}
