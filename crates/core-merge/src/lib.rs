//! The merger: turns a read-only [`Placement`] plus the global tables into
//! the merged output set: one Gerber file per layer, a combined Excellon
//! program under the clustered tool table, the board outline, scoring, and
//! fabrication drawing overlays, the placement reproducibility file, the
//! tool list, and the centroid CSV.
//!
//! Ordering guarantees: aperture, macro, and tool definitions are emitted
//! in ascending code order and jobs in placement order, so a given
//! placement produces byte-identical files. Every file is written to a
//! `.tmp` sibling and renamed into place; a failed merge leaves no partial
//! outputs. Preconditions (panel fit, fab-drawing tool limit) are validated
//! before the first file is opened.

use core_aperture::{ApertureError, Shape};
use core_config::Config;
use core_geom::Rect;
use core_job::{GlobalState, ToolError};
use core_place::{PlaceError, Placement};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

mod centroid_out;
mod excellon_out;
mod fabdrawing;
mod gerber_out;
mod scoring;

pub use fabdrawing::MAX_DRILL_TOOLS;

/// Panel origin in inches: keeps all coordinates comfortably away from zero
/// so downstream leading-zero handling can never misread them.
pub const PANEL_ORIGIN: (f64, f64) = (0.1, 0.1);

/// Octagon style for the fixed `OC8` prelude macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OctagonStyle {
    /// 22.5° vertices (the conventional look).
    #[default]
    Normal,
    /// 0.0° vertices.
    Rotated,
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error(
        "merged extent {required_width:.2}\"x{required_height:.2}\" exceeds the \
         {configured_width:.2}\"x{configured_height:.2}\" panel"
    )]
    PanelTooSmall {
        required_width: f64,
        required_height: f64,
        configured_width: f64,
        configured_height: f64,
    },
    #[error("fabrication drawing supports at most {max} drill tools ({got} in use)")]
    TooManyDrillToolsForFabDrawing { max: usize, got: usize },
    #[error(transparent)]
    Aperture(#[from] ApertureError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Place(#[from] PlaceError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Run statistics, computed by the merger and printed by the front-end.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub output_files: Vec<PathBuf>,
    pub panel_size: (f64, f64),
    pub placed_area: f64,
    pub panel_area: f64,
    pub drill_hits: usize,
    pub smallest_drill: Option<f64>,
    /// (tool code, diameter, hits) in ascending code order.
    pub per_tool_hits: Vec<(core_job::ToolCode, f64, usize)>,
}

impl MergeReport {
    pub fn utilization(&self) -> f64 {
        if self.panel_area > 0.0 {
            self.placed_area / self.panel_area * 100.0
        } else {
            0.0
        }
    }

    pub fn drill_density(&self) -> f64 {
        if self.panel_area > 0.0 {
            self.drill_hits as f64 / self.panel_area
        } else {
            0.0
        }
    }
}

/// Write `path` through a `.tmp` sibling and rename on success.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), MergeError>
where
    F: FnOnce(&mut BufWriter<fs::File>) -> Result<(), MergeError>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let result = (|| {
        let mut out = BufWriter::new(fs::File::create(&tmp)?);
        write(&mut out)?;
        out.flush()?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}

/// Panel frame shared by the emitters: origin and outer extents (margins
/// included).
#[derive(Debug, Clone, Copy)]
pub(crate) struct PanelFrame {
    pub origin_x: f64,
    pub origin_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl PanelFrame {
    pub(crate) fn width(&self) -> f64 {
        self.max_x - self.origin_x
    }

    pub(crate) fn height(&self) -> f64 {
        self.max_y - self.origin_y
    }
}

/// Offset that lands a placed job's outline lower-left on its placement
/// origin (job-local coordinates need not start at zero).
pub(crate) fn job_offset(placed: &core_place::PlacedJob) -> (f64, f64) {
    let bounds = placed.job.bounding_box();
    (placed.x - bounds.min_x, placed.y - bounds.min_y)
}

/// Merge the placed jobs into the configured output set under `out_dir`.
pub fn merge(
    config: &Config,
    state: &mut GlobalState,
    placement: &Placement,
    octagons: OctagonStyle,
    out_dir: &Path,
) -> Result<MergeReport, MergeError> {
    let panel = &config.panel;
    let extents = placement.extents();
    let frame = PanelFrame {
        origin_x: PANEL_ORIGIN.0,
        origin_y: PANEL_ORIGIN.1,
        max_x: extents.max_x + panel.rightmargin,
        max_y: extents.max_y + panel.topmargin,
    };

    // Validate preconditions before any file is opened.
    if frame.width() > panel.width + 1e-9 || frame.height() > panel.height + 1e-9 {
        return Err(MergeError::PanelTooSmall {
            required_width: frame.width(),
            required_height: frame.height(),
            configured_width: panel.width,
            configured_height: panel.height,
        });
    }
    if config.output.fabricationdrawing.is_some() && state.tools.len() > MAX_DRILL_TOOLS {
        return Err(MergeError::TooManyDrillToolsForFabDrawing {
            max: MAX_DRILL_TOOLS,
            got: state.tools.len(),
        });
    }

    // Drawing apertures for the overlays, inserted before any emission
    // reads the table.
    let cut_code = state.apertures.find_or_add(Shape::Circle {
        diameter: panel.cutlinewidth,
    });
    let crop_code = state.apertures.find_or_add(Shape::Circle {
        diameter: panel.cropmarkwidth,
    });
    let fiducial_codes = if panel.fiducialpoints.is_empty() {
        None
    } else {
        Some((
            state.apertures.find_or_add(Shape::Circle {
                diameter: panel.fiducialcopperdiameter,
            }),
            state.apertures.find_or_add(Shape::Circle {
                diameter: panel.fiducialmaskdiameter,
            }),
        ))
    };
    let fab_code = state.apertures.find_or_add(Shape::Circle { diameter: 0.001 });

    let mut outputs = Vec::new();

    // Placement reproducibility file first, so a failed artwork run can
    // still be replayed.
    let placement_path = out_dir.join(&config.output.placement);
    write_atomic(&placement_path, |w| {
        placement.write_to(w)?;
        Ok(())
    })?;
    outputs.push(placement_path);

    // Merged artwork, one file per layer.
    for layer in config.layer_list() {
        let path = out_dir.join(config.output_for_layer(&layer));
        gerber_out::write_merged_layer(
            &path,
            &layer,
            config,
            state,
            placement,
            &frame,
            octagons,
            cut_code,
            crop_code,
            fiducial_codes,
        )?;
        info!(target: "merge.layer", layer = %layer, file = %path.display(), "layer_written");
        outputs.push(path);
    }

    // Board outline and scoring overlays.
    if let Some(name) = &config.output.boardoutline {
        let path = out_dir.join(name);
        gerber_out::write_board_outline(&path, &frame, octagons)?;
        outputs.push(path);
    }
    if let Some(name) = &config.output.scoring {
        let path = out_dir.join(name);
        scoring::write_scoring(&path, placement, &frame, octagons)?;
        outputs.push(path);
    }

    // Fabrication drawing.
    if let Some(name) = &config.output.fabricationdrawing {
        let path = out_dir.join(name);
        fabdrawing::write_fab_drawing(&path, state, placement, &frame, octagons, fab_code)?;
        outputs.push(path);
    }

    // Combined drill program and tool list.
    let drills_path = out_dir.join(&config.output.drills);
    let per_tool_hits = excellon_out::write_drills(&drills_path, state, placement)?;
    outputs.push(drills_path);

    let toollist_path = out_dir.join(&config.output.toollist);
    excellon_out::write_tool_list(&toollist_path, &per_tool_hits)?;
    outputs.push(toollist_path);

    // Centroid CSV.
    let centroid_path = out_dir.join(&config.output.centroid);
    centroid_out::write_centroid(&centroid_path, placement)?;
    outputs.push(centroid_path);

    let drill_hits: usize = per_tool_hits.iter().map(|(_, _, n)| n).sum();
    let smallest_drill = per_tool_hits
        .iter()
        .filter(|(_, _, n)| *n > 0)
        .map(|(_, d, _)| *d)
        .fold(None, |min: Option<f64>, d| {
            Some(min.map_or(d, |m: f64| m.min(d)))
        });
    let report = MergeReport {
        output_files: outputs,
        panel_size: (frame.width(), frame.height()),
        placed_area: placement.placed_area(),
        panel_area: frame.width() * frame.height(),
        drill_hits,
        smallest_drill,
        per_tool_hits,
    };
    info!(
        target: "merge",
        files = report.output_files.len(),
        utilization = format!("{:.1}%", report.utilization()),
        drill_hits = report.drill_hits,
        "merge_complete"
    );
    Ok(report)
}

/// Footprints of all placed jobs (used by scoring and tests).
pub(crate) fn footprints(placement: &Placement) -> Vec<Rect> {
    placement.jobs.iter().map(|p| p.footprint()).collect()
}
