//! RS-274X emission: the fixed prelude, macro/aperture definition blocks,
//! merged layer bodies, and the overlay drawings (cut lines, crop marks,
//! fiducials, board outline).

use crate::{job_offset, write_atomic, MergeError, OctagonStyle, PanelFrame};
use core_aperture::{ApertureCode, MacroId, Shape};
use core_config::Config;
use core_geom::{gerb, Rect};
use core_job::GlobalState;
use core_place::Placement;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

/// Crop mark leg length in inches.
const CROP_MARK_LEG: f64 = 0.125;

pub(crate) fn write_gerber_header<W: Write>(w: &mut W, octagons: OctagonStyle) -> io::Result<()> {
    let rotation = match octagons {
        OctagonStyle::Normal => "22.5",
        OctagonStyle::Rotated => "0.0",
    };
    write!(
        w,
        "G75*\nG70*\n%OFA0B0*%\n%FSLAX25Y25*%\n%IPPOS*%\n%LPD*%\n%AMOC8*\n5,1,8,0,0,1.08239X$1,{}*\n%\n",
        rotation
    )
}

pub(crate) fn write_gerber_footer<W: Write>(w: &mut W) -> io::Result<()> {
    writeln!(w, "M02*")
}

fn write_macros<W: Write>(
    w: &mut W,
    state: &GlobalState,
    used: &BTreeSet<MacroId>,
) -> io::Result<()> {
    for (id, def) in state.macros.iter() {
        if used.contains(&id) {
            def.write_def(w, id)?;
        }
    }
    Ok(())
}

fn write_apertures<W: Write>(
    w: &mut W,
    state: &GlobalState,
    used: &BTreeSet<ApertureCode>,
) -> io::Result<()> {
    for (code, shape) in state.apertures.iter() {
        if used.contains(&code) {
            shape.write_def(w, code)?;
        }
    }
    Ok(())
}

fn draw(w: &mut impl Write, x: f64, y: f64, d: u8) -> io::Result<()> {
    writeln!(w, "X{:07}Y{:07}D0{}*", gerb(x), gerb(y), d)
}

/// Four cut-line segments around one placed job's footprint.
pub(crate) fn write_cut_lines<W: Write>(
    w: &mut W,
    code: ApertureCode,
    footprint: &Rect,
) -> io::Result<()> {
    writeln!(w, "{}*", code)?;
    draw(w, footprint.min_x, footprint.min_y, 2)?;
    draw(w, footprint.max_x, footprint.min_y, 1)?;
    draw(w, footprint.max_x, footprint.max_y, 1)?;
    draw(w, footprint.min_x, footprint.max_y, 1)?;
    draw(w, footprint.min_x, footprint.min_y, 1)
}

/// 0.125" L-shaped marks at each panel corner, the line edge flush with the
/// panel border (center inset by half the line width).
pub(crate) fn write_crop_marks<W: Write>(
    w: &mut W,
    code: ApertureCode,
    line_width: f64,
    frame: &PanelFrame,
) -> io::Result<()> {
    writeln!(w, "{}*", code)?;
    let offset = line_width / 2.0;
    let leg = CROP_MARK_LEG;

    // Lower-left
    let (x, y) = (frame.origin_x + offset, frame.origin_y + offset);
    draw(w, x + leg, y, 2)?;
    draw(w, x, y, 1)?;
    draw(w, x, y + leg, 1)?;

    // Lower-right
    let (x, y) = (frame.max_x - offset, frame.origin_y + offset);
    draw(w, x, y + leg, 2)?;
    draw(w, x, y, 1)?;
    draw(w, x - leg, y, 1)?;

    // Upper-right
    let (x, y) = (frame.max_x - offset, frame.max_y - offset);
    draw(w, x - leg, y, 2)?;
    draw(w, x, y, 1)?;
    draw(w, x, y - leg, 1)?;

    // Upper-left
    let (x, y) = (frame.origin_x + offset, frame.max_y - offset);
    draw(w, x, y - leg, 2)?;
    draw(w, x, y, 1)?;
    draw(w, x + leg, y, 1)
}

/// Flash the fiducial aperture at each configured point. Non-negative
/// offsets anchor to the panel's lower-left corner, negative offsets to the
/// upper-right.
pub(crate) fn write_fiducials<W: Write>(
    w: &mut W,
    code: ApertureCode,
    points: &[f64],
    frame: &PanelFrame,
) -> io::Result<()> {
    writeln!(w, "{}*", code)?;
    for pair in points.chunks_exact(2) {
        let (x, y) = (pair[0], pair[1]);
        let fx = if x >= 0.0 {
            frame.origin_x + x
        } else {
            frame.max_x + x
        };
        let fy = if y >= 0.0 {
            frame.origin_y + y
        } else {
            frame.max_y + y
        };
        draw(w, fx, fy, 3)?;
    }
    Ok(())
}

/// The fiducial flavor a layer takes, when any.
fn fiducial_for_layer(
    layer: &str,
    codes: Option<(ApertureCode, ApertureCode)>,
) -> Option<ApertureCode> {
    let (copper, mask) = codes?;
    match layer {
        "*toplayer" | "*bottomlayer" => Some(copper),
        "*topsoldermask" | "*bottomsoldermask" => Some(mask),
        _ => None,
    }
}

/// Write one merged artwork layer: used aperture/macro subsets, minimum
/// feature thickening, overlay apertures, prelude, definitions, job
/// streams with cut lines, then crop marks, fiducials, and the footer.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_merged_layer(
    path: &Path,
    layer: &str,
    config: &Config,
    state: &mut GlobalState,
    placement: &Placement,
    frame: &PanelFrame,
    octagons: OctagonStyle,
    cut_code: ApertureCode,
    crop_code: ApertureCode,
    fiducial_codes: Option<(ApertureCode, ApertureCode)>,
) -> Result<(), MergeError> {
    let mut used_ap = BTreeSet::new();
    let mut used_macro = BTreeSet::new();
    for placed in &placement.jobs {
        let (a, m) = placed.job.apertures_and_macros(layer, &state.apertures);
        used_ap.extend(a);
        used_macro.extend(m);
    }

    // Thicken apertures below the layer's minimum feature dimension. The
    // rewrite is an emit-time remap; job streams stay untouched.
    let mut remap: BTreeMap<ApertureCode, ApertureCode> = BTreeMap::new();
    if let Some(min_dim) = config.minimumfeature.get(layer) {
        for code in used_ap.clone() {
            if let Some(grown) = state.apertures.adjusted(code, *min_dim)? {
                let new_code = state.apertures.find_or_add(grown);
                used_ap.remove(&code);
                used_ap.insert(new_code);
                remap.insert(code, new_code);
                info!(
                    target: "merge.layer",
                    layer,
                    from = %code,
                    to = %new_code,
                    min_dim,
                    "aperture_thickened"
                );
            }
        }
    }

    let cuts = config.panel.cutlinelayers.iter().any(|l| l == layer);
    let crops = config.panel.cropmarklayers.iter().any(|l| l == layer);
    if cuts {
        used_ap.insert(cut_code);
    }
    if crops {
        used_ap.insert(crop_code);
    }
    let fiducial = fiducial_for_layer(layer, fiducial_codes);
    if let Some(code) = fiducial {
        used_ap.insert(code);
    }

    let state = &*state;
    write_atomic(path, |w| {
        write_gerber_header(w, octagons)?;
        write_macros(w, state, &used_macro)?;
        write_apertures(w, state, &used_ap)?;
        for placed in &placement.jobs {
            let (dx, dy) = job_offset(placed);
            placed.job.emit_layer(w, layer, dx, dy, &remap)?;
            if cuts {
                write_cut_lines(w, cut_code, &placed.footprint())?;
            }
        }
        if crops {
            write_crop_marks(w, crop_code, config.panel.cropmarkwidth, frame)?;
        }
        if let Some(code) = fiducial {
            write_fiducials(w, code, &config.panel.fiducialpoints, frame)?;
        }
        write_gerber_footer(w)?;
        Ok(())
    })
}

/// The board outline overlay: a 1-mil rectangle along the panel border in
/// a self-contained single-aperture file.
pub(crate) fn write_board_outline(
    path: &Path,
    frame: &PanelFrame,
    octagons: OctagonStyle,
) -> Result<(), MergeError> {
    write_atomic(path, |w| {
        write_gerber_header(w, octagons)?;
        let code = ApertureCode(10);
        Shape::Circle { diameter: 0.001 }.write_def(w, code)?;
        writeln!(w, "{}*", code)?;
        draw(w, frame.origin_x, frame.origin_y, 2)?;
        draw(w, frame.origin_x, frame.max_y, 1)?;
        draw(w, frame.max_x, frame.max_y, 1)?;
        draw(w, frame.max_x, frame.origin_y, 1)?;
        draw(w, frame.origin_x, frame.origin_y, 1)?;
        write_gerber_footer(w)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> PanelFrame {
        PanelFrame {
            origin_x: 0.1,
            origin_y: 0.1,
            max_x: 5.1,
            max_y: 5.1,
        }
    }

    #[test]
    fn header_styles_differ_only_in_octagon_rotation() {
        let mut normal = Vec::new();
        let mut rotated = Vec::new();
        write_gerber_header(&mut normal, OctagonStyle::Normal).unwrap();
        write_gerber_header(&mut rotated, OctagonStyle::Rotated).unwrap();
        let normal = String::from_utf8(normal).unwrap();
        let rotated = String::from_utf8(rotated).unwrap();
        assert!(normal.contains("%FSLAX25Y25*%"));
        assert!(normal.contains("5,1,8,0,0,1.08239X$1,22.5*"));
        assert!(rotated.contains("5,1,8,0,0,1.08239X$1,0.0*"));
        assert_eq!(normal.lines().count(), rotated.lines().count());
    }

    #[test]
    fn fiducials_anchor_by_sign() {
        // Scenario: panel extents (0.1,0.1)-(5.1,5.1), points
        // 0.125,0.125,-0.125,-0.125 land at (0.225,0.225) and (4.975,4.975).
        let mut out = Vec::new();
        write_fiducials(
            &mut out,
            ApertureCode(12),
            &[0.125, 0.125, -0.125, -0.125],
            &frame(),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "D12*\nX0022500Y0022500D03*\nX0497500Y0497500D03*\n"
        );
    }

    #[test]
    fn crop_marks_are_inset_by_half_the_line_width() {
        let mut out = Vec::new();
        write_crop_marks(&mut out, ApertureCode(11), 0.01, &frame()).unwrap();
        let text = String::from_utf8(out).unwrap();
        // Lower-left mark: pen down at (0.230, 0.105), corner at
        // (0.105, 0.105), up to (0.105, 0.230).
        assert!(text.starts_with(
            "D11*\nX0023000Y0010500D02*\nX0010500Y0010500D01*\nX0010500Y0023000D01*\n"
        ));
        // Four corners, three strokes each, plus the select line.
        assert_eq!(text.lines().count(), 13);
    }

    #[test]
    fn cut_lines_trace_the_footprint() {
        let mut out = Vec::new();
        write_cut_lines(
            &mut out,
            ApertureCode(10),
            &Rect::new(0.1, 0.1, 2.1, 1.1),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "D10*\nX0010000Y0010000D02*\nX0210000Y0010000D01*\nX0210000Y0110000D01*\nX0010000Y0110000D01*\nX0010000Y0010000D01*\n"
        );
    }
}
