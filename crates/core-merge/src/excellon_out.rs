//! Merged Excellon emission and the tool list file.
//!
//! Layout follows the legacy inline form: `%` rewind, then for each global
//! tool (ascending code order) its `TnnCd.dddd` definition immediately
//! followed by every placed job's hits for that diameter, then `M30`.

use crate::{job_offset, write_atomic, MergeError};
use core_job::{GlobalState, ToolCode};
use core_place::Placement;
use std::io::Write;
use std::path::Path;

/// Write the combined drill program. Returns `(code, diameter, hits)` per
/// tool in ascending code order for the statistics and the tool list.
pub(crate) fn write_drills(
    path: &Path,
    state: &GlobalState,
    placement: &Placement,
) -> Result<Vec<(ToolCode, f64, usize)>, MergeError> {
    // Every diameter a placed job references must resolve before the file
    // is opened.
    for placed in &placement.jobs {
        for diameter in placed.job.drill.tools.values() {
            state.tools.resolve(*diameter)?;
        }
    }

    let mut per_tool = Vec::new();
    write_atomic(path, |w| {
        writeln!(w, "%")?;
        for (code, diameter) in state.tools.iter() {
            writeln!(w, "{}C{:.4}", code, diameter)?;
            let mut hits = 0usize;
            for placed in &placement.jobs {
                let (dx, dy) = job_offset(placed);
                hits += placed.job.emit_drill_hits(w, diameter, dx, dy)?;
            }
            per_tool.push((code, diameter, hits));
        }
        writeln!(w, "M30")?;
        Ok(())
    })?;
    Ok(per_tool)
}

/// The human-readable tool list: one `Tnn <diameter>in` line per tool that
/// actually has hits.
pub(crate) fn write_tool_list(
    path: &Path,
    per_tool: &[(ToolCode, f64, usize)],
) -> Result<(), MergeError> {
    write_atomic(path, |w| {
        for (code, diameter, hits) in per_tool {
            if *hits > 0 {
                writeln!(w, "{} {:.4}in", code, diameter)?;
            }
        }
        Ok(())
    })
}
