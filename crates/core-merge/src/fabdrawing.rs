//! Fabrication drawing: the panel outline, one distinct stroke symbol per
//! drill tool at every hit position, and a stroked legend (tool code,
//! diameter, hit count) above the panel. Everything is drawn with a single
//! 1-mil line aperture.

use crate::{job_offset, write_atomic, MergeError, OctagonStyle, PanelFrame};
use crate::gerber_out::{write_gerber_footer, write_gerber_header};
use core_aperture::ApertureCode;
use core_geom::gerb;
use core_job::{diameter_key, GlobalState};
use core_place::Placement;
use std::io::Write;
use std::path::Path;

type Segment = ((f64, f64), (f64, f64));

/// One stroke symbol per tool; more drill sizes than symbols is an error.
pub const MAX_DRILL_TOOLS: usize = 10;

/// Half-extent of a drill symbol in inches.
const SYMBOL_RADIUS: f64 = 0.02;

/// Legend glyph height in inches.
const TEXT_HEIGHT: f64 = 0.08;
const TEXT_ADVANCE: f64 = 0.08;
const LEGEND_ROW_STEP: f64 = 0.12;

/// Symbol strokes on the unit square [-1, 1]², one table entry per tool
/// index.
fn symbol_segments(index: usize) -> &'static [Segment] {
    const PLUS: &[Segment] = &[((-1.0, 0.0), (1.0, 0.0)), ((0.0, -1.0), (0.0, 1.0))];
    const CROSS: &[Segment] = &[((-1.0, -1.0), (1.0, 1.0)), ((-1.0, 1.0), (1.0, -1.0))];
    const SQUARE: &[Segment] = &[
        ((-1.0, -1.0), (1.0, -1.0)),
        ((1.0, -1.0), (1.0, 1.0)),
        ((1.0, 1.0), (-1.0, 1.0)),
        ((-1.0, 1.0), (-1.0, -1.0)),
    ];
    const DIAMOND: &[Segment] = &[
        ((0.0, -1.0), (1.0, 0.0)),
        ((1.0, 0.0), (0.0, 1.0)),
        ((0.0, 1.0), (-1.0, 0.0)),
        ((-1.0, 0.0), (0.0, -1.0)),
    ];
    const STAR: &[Segment] = &[
        ((-1.0, 0.0), (1.0, 0.0)),
        ((0.0, -1.0), (0.0, 1.0)),
        ((-0.7, -0.7), (0.7, 0.7)),
        ((-0.7, 0.7), (0.7, -0.7)),
    ];
    const TRIANGLE: &[Segment] = &[
        ((-1.0, -1.0), (1.0, -1.0)),
        ((1.0, -1.0), (0.0, 1.0)),
        ((0.0, 1.0), (-1.0, -1.0)),
    ];
    const NABLA: &[Segment] = &[
        ((-1.0, 1.0), (1.0, 1.0)),
        ((1.0, 1.0), (0.0, -1.0)),
        ((0.0, -1.0), (-1.0, 1.0)),
    ];
    const SQUARE_CROSS: &[Segment] = &[
        ((-1.0, -1.0), (1.0, -1.0)),
        ((1.0, -1.0), (1.0, 1.0)),
        ((1.0, 1.0), (-1.0, 1.0)),
        ((-1.0, 1.0), (-1.0, -1.0)),
        ((-1.0, -1.0), (1.0, 1.0)),
    ];
    const HBAR: &[Segment] = &[((-1.0, 0.0), (1.0, 0.0))];
    const VBAR: &[Segment] = &[((0.0, -1.0), (0.0, 1.0))];
    const TABLE: [&[Segment]; MAX_DRILL_TOOLS] = [
        PLUS, CROSS, SQUARE, DIAMOND, STAR, TRIANGLE, NABLA, SQUARE_CROSS, HBAR, VBAR,
    ];
    TABLE[index]
}

/// Seven-segment strokes for the legend glyphs, on a 0.6 x 1.0 box.
fn glyph_segments(c: char) -> Option<Vec<Segment>> {
    const A: Segment = ((0.0, 1.0), (0.6, 1.0));
    const B: Segment = ((0.6, 0.5), (0.6, 1.0));
    const C: Segment = ((0.6, 0.0), (0.6, 0.5));
    const D: Segment = ((0.0, 0.0), (0.6, 0.0));
    const E: Segment = ((0.0, 0.0), (0.0, 0.5));
    const F: Segment = ((0.0, 0.5), (0.0, 1.0));
    const G: Segment = ((0.0, 0.5), (0.6, 0.5));
    let segments: Vec<Segment> = match c {
        '0' => vec![A, B, C, D, E, F],
        '1' => vec![B, C],
        '2' => vec![A, B, G, E, D],
        '3' => vec![A, B, G, C, D],
        '4' => vec![F, G, B, C],
        '5' => vec![A, F, G, C, D],
        '6' => vec![A, F, G, E, C, D],
        '7' => vec![A, B, C],
        '8' => vec![A, B, C, D, E, F, G],
        '9' => vec![A, B, C, D, F, G],
        '.' => vec![((0.25, 0.0), (0.35, 0.0))],
        'T' => vec![A, ((0.3, 0.0), (0.3, 1.0))],
        _ => return None,
    };
    Some(segments)
}

fn stroke(w: &mut impl Write, from: (f64, f64), to: (f64, f64)) -> std::io::Result<()> {
    writeln!(w, "X{:07}Y{:07}D02*", gerb(from.0), gerb(from.1))?;
    writeln!(w, "X{:07}Y{:07}D01*", gerb(to.0), gerb(to.1))
}

fn draw_symbol(
    w: &mut impl Write,
    index: usize,
    cx: f64,
    cy: f64,
) -> std::io::Result<()> {
    for ((x0, y0), (x1, y1)) in symbol_segments(index) {
        stroke(
            w,
            (cx + x0 * SYMBOL_RADIUS, cy + y0 * SYMBOL_RADIUS),
            (cx + x1 * SYMBOL_RADIUS, cy + y1 * SYMBOL_RADIUS),
        )?;
    }
    Ok(())
}

/// Render `text` starting at `(x, y)` (lower-left). Unknown characters
/// advance the pen without strokes.
fn draw_text(w: &mut impl Write, x: f64, y: f64, text: &str) -> std::io::Result<()> {
    let scale = TEXT_HEIGHT;
    let mut pen_x = x;
    for c in text.chars() {
        if let Some(segments) = glyph_segments(c) {
            for ((x0, y0), (x1, y1)) in segments {
                stroke(
                    w,
                    (pen_x + x0 * scale, y + y0 * scale),
                    (pen_x + x1 * scale, y + y1 * scale),
                )?;
            }
        }
        pen_x += TEXT_ADVANCE;
    }
    Ok(())
}

pub(crate) fn write_fab_drawing(
    path: &Path,
    state: &GlobalState,
    placement: &Placement,
    frame: &PanelFrame,
    octagons: OctagonStyle,
    fab_code: ApertureCode,
) -> Result<(), MergeError> {
    write_atomic(path, |w| {
        write_gerber_header(w, octagons)?;
        if let Some(shape) = state.apertures.get(fab_code) {
            shape.write_def(w, fab_code)?;
        }
        writeln!(w, "{}*", fab_code)?;

        // Panel outline.
        stroke(w, (frame.origin_x, frame.origin_y), (frame.origin_x, frame.max_y))?;
        stroke(w, (frame.origin_x, frame.max_y), (frame.max_x, frame.max_y))?;
        stroke(w, (frame.max_x, frame.max_y), (frame.max_x, frame.origin_y))?;
        stroke(w, (frame.max_x, frame.origin_y), (frame.origin_x, frame.origin_y))?;

        // One symbol per drill hit, shape keyed by tool index.
        for (index, (_, diameter)) in state.tools.iter().enumerate() {
            for placed in &placement.jobs {
                let (dx, dy) = job_offset(placed);
                for (tool, hits) in &placed.job.drill.hits {
                    let Some(d) = placed.job.drill.tools.get(tool) else {
                        continue;
                    };
                    if diameter_key(*d) != diameter_key(diameter) {
                        continue;
                    }
                    for (x, y) in hits {
                        draw_symbol(w, index, x + dx, y + dy)?;
                    }
                }
            }
        }

        // Legend above the panel: symbol, tool code, diameter, hit count.
        for (index, (code, diameter)) in state.tools.iter().enumerate() {
            let y = frame.max_y + 0.15 + index as f64 * LEGEND_ROW_STEP;
            let hits: usize = placement
                .jobs
                .iter()
                .map(|p| p.job.drill_hits_for(diameter))
                .sum();
            draw_symbol(w, index, frame.origin_x + SYMBOL_RADIUS, y + TEXT_HEIGHT / 2.0)?;
            let text = format!("{} {:.4} {}", code, diameter, hits);
            draw_text(w, frame.origin_x + 0.1, y, &text)?;
        }

        write_gerber_footer(w)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_index_has_a_distinct_symbol() {
        let mut seen: Vec<&[Segment]> = Vec::new();
        for index in 0..MAX_DRILL_TOOLS {
            let symbol = symbol_segments(index);
            assert!(!symbol.is_empty());
            assert!(!seen.contains(&symbol));
            seen.push(symbol);
        }
    }

    #[test]
    fn legend_glyphs_cover_the_text_alphabet() {
        for c in "0123456789.T".chars() {
            assert!(glyph_segments(c).is_some(), "missing glyph {:?}", c);
        }
        assert!(glyph_segments(' ').is_none());
    }

    #[test]
    fn text_strokes_move_then_draw() {
        let mut out = Vec::new();
        draw_text(&mut out, 1.0, 1.0, "1").unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // Glyph '1' is two strokes: four coordinate lines alternating
        // move/draw.
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("D02*"));
        assert!(lines[1].ends_with("D01*"));
    }
}
