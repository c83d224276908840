//! Merged centroid (pick-and-place) CSV.
//!
//! Every placed job instance contributes its part records at the placement
//! offset; rotation is already baked into the rotated twin's records. Rows
//! are ordered by reference designator, then position, so output is stable
//! across runs.

use crate::{job_offset, write_atomic, MergeError};
use core_place::Placement;
use std::io::Write;
use std::path::Path;

pub(crate) fn write_centroid(path: &Path, placement: &Placement) -> Result<(), MergeError> {
    let mut rows: Vec<(String, String, f64, f64, f64)> = Vec::new();
    for placed in &placement.jobs {
        let (dx, dy) = job_offset(placed);
        for rec in &placed.job.centroids {
            rows.push((
                rec.refdes.clone(),
                rec.side.clone(),
                rec.x + dx,
                rec.y + dy,
                rec.rotation,
            ));
        }
    }
    rows.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| ((a.2 * 1e9) as i64).cmp(&((b.2 * 1e9) as i64)))
            .then_with(|| ((a.3 * 1e9) as i64).cmp(&((b.3 * 1e9) as i64)))
    });

    write_atomic(path, |w| {
        writeln!(w, "RefDes,Layer,LocationX,LocationY,Rotation")?;
        for (refdes, side, x, y, rotation) in &rows {
            writeln!(w, "{},{},{:.4},{:.4},{:.1}", refdes, side, x, y, rotation)?;
        }
        Ok(())
    })
}
