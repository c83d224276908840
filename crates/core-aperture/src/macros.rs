//! Structured aperture macro bodies.
//!
//! A macro body is a sequence of `*`-terminated lines, each a comma-
//! separated list of terms. Terms the engine understands are plain numbers;
//! anything else (parameter references like `$1`, arithmetic such as
//! `1.08239X$1`, variable assignments) is carried verbatim as an opaque
//! expression and re-emitted untouched.

use core_geom::approx_eq;
use std::io::{self, Write};

use crate::MacroId;

/// One comma-separated term of a macro line.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroTerm {
    Num(f64),
    /// Verbatim expression text (no commas, no `*`).
    Expr(String),
}

impl MacroTerm {
    fn approx_eq(&self, other: &MacroTerm) -> bool {
        match (self, other) {
            (MacroTerm::Num(a), MacroTerm::Num(b)) => approx_eq(*a, *b),
            (MacroTerm::Expr(a), MacroTerm::Expr(b)) => a == b,
            _ => false,
        }
    }
}

/// One `*`-terminated line of a macro body.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroLine {
    pub terms: Vec<MacroTerm>,
}

impl MacroLine {
    /// Primitive code when the line opens with a plain number.
    fn primitive(&self) -> Option<i64> {
        match self.terms.first() {
            Some(MacroTerm::Num(v)) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }
}

/// A named parameterized shape definition (GAMT entry body).
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDef {
    pub lines: Vec<MacroLine>,
}

/// Primitives whose final parameter is a rotation angle in degrees.
const ROTATABLE: &[i64] = &[2, 4, 5, 6, 7, 20, 21, 22];

impl MacroDef {
    pub fn new(lines: Vec<MacroLine>) -> Self {
        Self { lines }
    }

    /// Body equality within the dimension tolerance (content addressing).
    pub fn approx_eq(&self, other: &MacroDef) -> bool {
        self.lines.len() == other.lines.len()
            && self.lines.iter().zip(&other.lines).all(|(a, b)| {
                a.terms.len() == b.terms.len()
                    && a.terms.iter().zip(&b.terms).all(|(x, y)| x.approx_eq(y))
            })
    }

    /// The body after the referencing job rotates 90°: each primitive with a
    /// numeric trailing rotation gets 90 added (normalized to [0, 360)).
    /// Expression rotations are left untouched.
    pub fn rotated_90(&self) -> MacroDef {
        let lines = self
            .lines
            .iter()
            .map(|line| {
                let mut terms = line.terms.clone();
                if let Some(code) = line.primitive() {
                    if ROTATABLE.contains(&code) {
                        if let Some(MacroTerm::Num(rot)) = terms.last_mut() {
                            *rot = (*rot + 90.0).rem_euclid(360.0);
                        }
                    }
                }
                MacroLine { terms }
            })
            .collect();
        MacroDef { lines }
    }

    /// Detect the Eagle-style octagon body: a single 8-vertex polygon
    /// primitive (`5,1,8,0,0,<size>,<rot>`). Returns its rotation.
    pub fn octagon_rotation(&self) -> Option<f64> {
        let body: Vec<&MacroLine> = self
            .lines
            .iter()
            .filter(|l| l.primitive() != Some(0))
            .collect();
        if body.len() != 1 {
            return None;
        }
        let terms = &body[0].terms;
        if terms.len() != 7 {
            return None;
        }
        match (&terms[0], &terms[2], terms.last()) {
            (MacroTerm::Num(code), MacroTerm::Num(vertices), Some(MacroTerm::Num(rot)))
                if *code == 5.0 && *vertices == 8.0 =>
            {
                Some(*rot)
            }
            _ => None,
        }
    }

    /// Write the `%AM…%` definition under `id`.
    pub fn write_def<W: Write>(&self, w: &mut W, id: MacroId) -> io::Result<()> {
        writeln!(w, "%AM{}*", id)?;
        for line in &self.lines {
            for (i, term) in line.terms.iter().enumerate() {
                if i > 0 {
                    write!(w, ",")?;
                }
                match term {
                    MacroTerm::Num(v) => write!(w, "{}", fmt_macro_num(*v))?,
                    MacroTerm::Expr(e) => write!(w, "{}", e)?,
                }
            }
            writeln!(w, "*")?;
        }
        writeln!(w, "%")
    }
}

/// Integers print bare, everything else via the shortest round-trip form.
fn fmt_macro_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn octagon_body() -> MacroDef {
        MacroDef::new(vec![MacroLine {
            terms: vec![
                MacroTerm::Num(5.0),
                MacroTerm::Num(1.0),
                MacroTerm::Num(8.0),
                MacroTerm::Num(0.0),
                MacroTerm::Num(0.0),
                MacroTerm::Expr("1.08239X$1".into()),
                MacroTerm::Num(22.5),
            ],
        }])
    }

    #[test]
    fn octagon_body_is_detected() {
        assert_eq!(octagon_body().octagon_rotation(), Some(22.5));

        let not_octagon = MacroDef::new(vec![MacroLine {
            terms: vec![MacroTerm::Num(1.0), MacroTerm::Num(1.0)],
        }]);
        assert_eq!(not_octagon.octagon_rotation(), None);
    }

    #[test]
    fn rotation_bumps_trailing_angle() {
        let rotated = octagon_body().rotated_90();
        assert_eq!(
            rotated.lines[0].terms.last(),
            Some(&MacroTerm::Num(112.5))
        );
        // A second turn wraps past 360.
        let again = rotated.rotated_90().rotated_90().rotated_90();
        assert_eq!(again.lines[0].terms.last(), Some(&MacroTerm::Num(22.5)));
    }

    #[test]
    fn definition_round_trips_expressions() {
        let mut out = Vec::new();
        octagon_body().write_def(&mut out, MacroId(3)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "%AMM3*\n5,1,8,0,0,1.08239X$1,22.5*\n%\n"
        );
    }

    #[test]
    fn content_addressing_tolerates_rounding() {
        let a = octagon_body();
        let mut b = octagon_body();
        if let MacroTerm::Num(v) = &mut b.lines[0].terms[6] {
            *v += 5e-8;
        }
        assert!(a.approx_eq(&b));
    }
}
