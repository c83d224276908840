//! Scoring overlay: shallow grooves the fab house uses to snap the panel
//! apart. A groove is only useful when it runs clear across the panel, so
//! lines are drawn through every maximal gap between placed footprints that
//! spans the full panel width (horizontal) or height (vertical), at the gap
//! midpoint.

use crate::{footprints, write_atomic, MergeError, OctagonStyle, PanelFrame};
use crate::gerber_out::{write_gerber_footer, write_gerber_header};
use core_aperture::{ApertureCode, Shape};
use core_geom::{gerb, Rect};
use core_place::Placement;
use std::io::Write;
use std::path::Path;

const GAP_EPSILON: f64 = 1e-9;

/// Midpoints of the clear bands along one axis. `lo`/`hi` pick the axis
/// (`min_y`/`max_y` for horizontal lines, `min_x`/`max_x` for vertical).
fn clear_band_midpoints(
    rects: &[Rect],
    lo: fn(&Rect) -> f64,
    hi: fn(&Rect) -> f64,
) -> Vec<f64> {
    let mut edges: Vec<f64> = rects.iter().flat_map(|r| [lo(r), hi(r)]).collect();
    edges.sort_by(|a, b| a.partial_cmp(b).expect("finite extents"));
    edges.dedup_by(|a, b| (*a - *b).abs() <= GAP_EPSILON);

    let mut midpoints = Vec::new();
    for pair in edges.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a <= GAP_EPSILON {
            continue;
        }
        let occupied = rects
            .iter()
            .any(|r| lo(r) < b - GAP_EPSILON && hi(r) > a + GAP_EPSILON);
        let below = rects.iter().any(|r| hi(r) <= a + GAP_EPSILON);
        let above = rects.iter().any(|r| lo(r) >= b - GAP_EPSILON);
        if !occupied && below && above {
            midpoints.push((a + b) / 2.0);
        }
    }
    midpoints
}

/// The scoring line positions for a placement: (horizontal line ys,
/// vertical line xs).
pub(crate) fn scoring_lines(placement: &Placement) -> (Vec<f64>, Vec<f64>) {
    let rects = footprints(placement);
    let horizontal = clear_band_midpoints(&rects, |r| r.min_y, |r| r.max_y);
    let vertical = clear_band_midpoints(&rects, |r| r.min_x, |r| r.max_x);
    (horizontal, vertical)
}

pub(crate) fn write_scoring(
    path: &Path,
    placement: &Placement,
    frame: &PanelFrame,
    octagons: OctagonStyle,
) -> Result<(), MergeError> {
    let (horizontal, vertical) = scoring_lines(placement);
    write_atomic(path, |w| {
        write_gerber_header(w, octagons)?;
        let code = ApertureCode(10);
        Shape::Circle { diameter: 0.001 }.write_def(w, code)?;
        writeln!(w, "{}*", code)?;
        for y in &horizontal {
            writeln!(w, "X{:07}Y{:07}D02*", gerb(frame.origin_x), gerb(*y))?;
            writeln!(w, "X{:07}Y{:07}D01*", gerb(frame.max_x), gerb(*y))?;
        }
        for x in &vertical {
            writeln!(w, "X{:07}Y{:07}D02*", gerb(*x), gerb(frame.origin_y))?;
            writeln!(w, "X{:07}Y{:07}D01*", gerb(*x), gerb(frame.max_y))?;
        }
        write_gerber_footer(w)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_place::PlacedJob;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn rect_job(name: &str, w: f64, h: f64) -> Arc<core_job::Job> {
        use core_job::{DrillProgram, LayerToken, OpKind, BOARD_OUTLINE_LAYER};
        let outline = vec![
            LayerToken::Op { x: 0.0, y: 0.0, kind: OpKind::Move },
            LayerToken::Op { x: w, y: 0.0, kind: OpKind::Line },
            LayerToken::Op { x: w, y: h, kind: OpKind::Line },
            LayerToken::Op { x: 0.0, y: h, kind: OpKind::Line },
            LayerToken::Op { x: 0.0, y: 0.0, kind: OpKind::Line },
        ];
        let mut layers = BTreeMap::new();
        layers.insert(BOARD_OUTLINE_LAYER.to_string(), outline);
        Arc::new(
            core_job::Job::new(name.to_string(), layers, DrillProgram::default(), Vec::new(), 1)
                .unwrap(),
        )
    }

    fn placed(name: &str, w: f64, h: f64, x: f64, y: f64) -> PlacedJob {
        PlacedJob {
            name: name.into(),
            job: rect_job(name, w, h),
            x,
            y,
            rotated: false,
        }
    }

    #[test]
    fn row_gap_scores_between_rows() {
        // Two rows with a 0.2" gap between y=1.1 and y=1.3.
        let placement = Placement {
            jobs: vec![
                placed("a", 2.0, 1.0, 0.1, 0.1),
                placed("b", 1.0, 1.0, 2.3, 0.1),
                placed("c", 3.0, 1.0, 0.1, 1.3),
            ],
        };
        let (horizontal, vertical) = scoring_lines(&placement);
        assert_eq!(horizontal.len(), 1);
        assert!((horizontal[0] - 1.2).abs() < 1e-9);
        // The column gap between a and b does not span past row c.
        assert!(vertical.is_empty());
    }

    #[test]
    fn column_gap_scores_when_it_spans_the_panel() {
        let placement = Placement {
            jobs: vec![
                placed("a", 1.0, 2.0, 0.1, 0.1),
                placed("b", 1.0, 2.0, 1.6, 0.1),
            ],
        };
        let (horizontal, vertical) = scoring_lines(&placement);
        assert!(horizontal.is_empty());
        assert_eq!(vertical.len(), 1);
        assert!((vertical[0] - 1.35).abs() < 1e-9);
    }

    #[test]
    fn touching_jobs_score_nothing() {
        let placement = Placement {
            jobs: vec![
                placed("a", 1.0, 1.0, 0.1, 0.1),
                placed("b", 1.0, 1.0, 1.1, 0.1),
            ],
        };
        let (horizontal, vertical) = scoring_lines(&placement);
        assert!(horizontal.is_empty());
        assert!(vertical.is_empty());
    }
}
