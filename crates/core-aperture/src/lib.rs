//! Aperture shapes, aperture macros, and the content-addressed global
//! tables (GAT / GAMT).
//!
//! Two apertures with equal shape parameters (within 1e-7") share one code;
//! the same holds for macro bodies. Codes are allocated monotonically
//! (`D10`, `D11`, …) as shapes are first seen, macro names as `M1`, `M2`, …
//! Tables are read-only once the packer runs, except for the drawing
//! apertures the merger inserts before emission begins.
//!
//! The octagon shape is special: it is emitted as an instance of the fixed
//! `OC8` macro that every output file carries in its prelude, so it never
//! occupies a slot in the macro table.

use core_geom::approx_eq;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use thiserror::Error;

mod macros;

pub use macros::{MacroDef, MacroLine, MacroTerm};

#[derive(Error, Debug)]
pub enum ApertureError {
    /// A minimum feature dimension was requested for an aperture whose
    /// dimensions the engine cannot reason about.
    #[error("aperture {code} is a macro instance and cannot be grown to a minimum feature size")]
    MinimumFeatureExceedsApertureSupport { code: ApertureCode },
    #[error("aperture code {0} is not in the global aperture table")]
    UnknownCode(ApertureCode),
    #[error("macro {0} is not in the global macro table")]
    UnknownMacro(MacroId),
}

/// A `Dnnn` aperture code. Ordered numerically, so `D10` < `D99` < `D100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApertureCode(pub u32);

impl fmt::Display for ApertureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// A global macro name (`M1`, `M2`, …). Input macro names are re-addressed
/// to these on load so identical bodies merge across jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacroId(pub u32);

impl fmt::Display for MacroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Drawing primitive shapes. Dimensions in inches.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle { diameter: f64 },
    Rectangle { width: f64, height: f64 },
    Obround { width: f64, height: f64 },
    /// Regular octagon, drawn as an instance of the prelude `OC8` macro.
    /// `rotated` selects the 22.5° variant of the prelude.
    Octagon { diameter: f64, rotated: bool },
    Macro { id: MacroId, params: Vec<f64> },
}

impl Shape {
    /// Horizontal extent of the flash, when the engine can know it.
    pub fn dim_x(&self) -> Option<f64> {
        match self {
            Shape::Circle { diameter } | Shape::Octagon { diameter, .. } => Some(*diameter),
            Shape::Rectangle { width, .. } | Shape::Obround { width, .. } => Some(*width),
            Shape::Macro { .. } => None,
        }
    }

    /// Vertical extent of the flash, when the engine can know it.
    pub fn dim_y(&self) -> Option<f64> {
        match self {
            Shape::Circle { diameter } | Shape::Octagon { diameter, .. } => Some(*diameter),
            Shape::Rectangle { height, .. } | Shape::Obround { height, .. } => Some(*height),
            Shape::Macro { .. } => None,
        }
    }

    /// Shape-parameter equality within the dimension tolerance.
    pub fn approx_eq(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Circle { diameter: a }, Shape::Circle { diameter: b }) => approx_eq(*a, *b),
            (
                Shape::Rectangle {
                    width: aw,
                    height: ah,
                },
                Shape::Rectangle {
                    width: bw,
                    height: bh,
                },
            )
            | (
                Shape::Obround {
                    width: aw,
                    height: ah,
                },
                Shape::Obround {
                    width: bw,
                    height: bh,
                },
            ) => approx_eq(*aw, *bw) && approx_eq(*ah, *bh),
            (
                Shape::Octagon {
                    diameter: a,
                    rotated: ar,
                },
                Shape::Octagon {
                    diameter: b,
                    rotated: br,
                },
            ) => ar == br && approx_eq(*a, *b),
            (Shape::Macro { id: a, params: ap }, Shape::Macro { id: b, params: bp }) => {
                a == b
                    && ap.len() == bp.len()
                    && ap.iter().zip(bp).all(|(x, y)| approx_eq(*x, *y))
            }
            _ => false,
        }
    }

    /// Grow every linear dimension to at least `min_dim`.
    ///
    /// Returns `Ok(None)` when the shape already meets the minimum.
    /// Rectangles and obrounds grow each axis independently; circles and
    /// octagons grow their diameter. Macro instances are refused: their
    /// parameters have no dimension semantics the engine can honor.
    pub fn grown(&self, min_dim: f64, code: ApertureCode) -> Result<Option<Shape>, ApertureError> {
        fn need(current: f64, min_dim: f64) -> bool {
            current + core_geom::DIM_EPSILON < min_dim
        }
        match self {
            Shape::Circle { diameter } => Ok(need(*diameter, min_dim)
                .then(|| Shape::Circle { diameter: min_dim })),
            Shape::Rectangle { width, height } => {
                if need(*width, min_dim) || need(*height, min_dim) {
                    Ok(Some(Shape::Rectangle {
                        width: width.max(min_dim),
                        height: height.max(min_dim),
                    }))
                } else {
                    Ok(None)
                }
            }
            Shape::Obround { width, height } => {
                if need(*width, min_dim) || need(*height, min_dim) {
                    Ok(Some(Shape::Obround {
                        width: width.max(min_dim),
                        height: height.max(min_dim),
                    }))
                } else {
                    Ok(None)
                }
            }
            Shape::Octagon { diameter, rotated } => Ok(need(*diameter, min_dim)
                .then(|| Shape::Octagon {
                    diameter: min_dim,
                    rotated: *rotated,
                })),
            Shape::Macro { .. } => {
                Err(ApertureError::MinimumFeatureExceedsApertureSupport { code })
            }
        }
    }

    /// The shape of this aperture after the owning job rotates 90°.
    ///
    /// Rotationally symmetric shapes are returned unchanged; rectangles and
    /// obrounds swap their axes; macro instances reference a rotated copy of
    /// their body, content-addressed through the macro table.
    pub fn rotated_90(&self, macros: &mut MacroTable) -> Result<Shape, ApertureError> {
        Ok(match self {
            Shape::Circle { .. } | Shape::Octagon { .. } => self.clone(),
            Shape::Rectangle { width, height } => Shape::Rectangle {
                width: *height,
                height: *width,
            },
            Shape::Obround { width, height } => Shape::Obround {
                width: *height,
                height: *width,
            },
            Shape::Macro { id, params } => {
                let def = macros
                    .get(*id)
                    .ok_or(ApertureError::UnknownMacro(*id))?
                    .clone();
                let rotated = def.rotated_90();
                if rotated.approx_eq(&def) {
                    self.clone()
                } else {
                    Shape::Macro {
                        id: macros.find_or_add(rotated),
                        params: params.clone(),
                    }
                }
            }
        })
    }

    /// Write the `%AD…*%` definition line for this shape under `code`.
    pub fn write_def<W: Write>(&self, w: &mut W, code: ApertureCode) -> io::Result<()> {
        match self {
            Shape::Circle { diameter } => {
                writeln!(w, "%AD{}C,{}*%", code, fmt_dim(*diameter))
            }
            Shape::Rectangle { width, height } => {
                writeln!(w, "%AD{}R,{}X{}*%", code, fmt_dim(*width), fmt_dim(*height))
            }
            Shape::Obround { width, height } => {
                writeln!(w, "%AD{}O,{}X{}*%", code, fmt_dim(*width), fmt_dim(*height))
            }
            Shape::Octagon { diameter, .. } => {
                writeln!(w, "%AD{}OC8,{}*%", code, fmt_dim(*diameter))
            }
            Shape::Macro { id, params } => {
                write!(w, "%AD{}{}", code, id)?;
                for (i, p) in params.iter().enumerate() {
                    write!(w, "{}{}", if i == 0 { "," } else { "X" }, fmt_dim(*p))?;
                }
                writeln!(w, "*%")
            }
        }
    }
}

/// Format an inch dimension for an aperture definition: five decimals, the
/// same fixed width every time so output stays byte-deterministic.
pub fn fmt_dim(v: f64) -> String {
    format!("{:.5}", v)
}

/// The global aperture table (GAT).
#[derive(Debug, Default, Clone)]
pub struct ApertureTable {
    entries: BTreeMap<u32, Shape>,
}

/// First code handed out; D0–D9 are reserved by RS-274X.
const FIRST_APERTURE: u32 = 10;

impl ApertureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: ApertureCode) -> Option<&Shape> {
        self.entries.get(&code.0)
    }

    /// Content-addressed lookup.
    pub fn find(&self, shape: &Shape) -> Option<ApertureCode> {
        self.entries
            .iter()
            .find(|(_, s)| s.approx_eq(shape))
            .map(|(c, _)| ApertureCode(*c))
    }

    /// Insert under the next free code without checking for duplicates.
    pub fn add(&mut self, shape: Shape) -> ApertureCode {
        let next = self
            .entries
            .keys()
            .next_back()
            .map_or(FIRST_APERTURE, |k| k + 1);
        self.entries.insert(next, shape);
        ApertureCode(next)
    }

    pub fn find_or_add(&mut self, shape: Shape) -> ApertureCode {
        match self.find(&shape) {
            Some(code) => code,
            None => self.add(shape),
        }
    }

    /// Resolve the minimum-feature adjustment for `code`.
    ///
    /// `Ok(None)` means the aperture already meets `min_dim`; otherwise the
    /// returned shape has every linear dimension at least `min_dim` (the
    /// caller re-addresses it through [`find_or_add`]).
    ///
    /// [`find_or_add`]: ApertureTable::find_or_add
    pub fn adjusted(
        &self,
        code: ApertureCode,
        min_dim: f64,
    ) -> Result<Option<Shape>, ApertureError> {
        let shape = self.get(code).ok_or(ApertureError::UnknownCode(code))?;
        shape.grown(min_dim, code)
    }

    /// Codes in ascending numeric order.
    pub fn iter(&self) -> impl Iterator<Item = (ApertureCode, &Shape)> {
        self.entries.iter().map(|(c, s)| (ApertureCode(*c), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The global aperture macro table (GAMT).
#[derive(Debug, Default, Clone)]
pub struct MacroTable {
    entries: BTreeMap<u32, MacroDef>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: MacroId) -> Option<&MacroDef> {
        self.entries.get(&id.0)
    }

    pub fn find(&self, def: &MacroDef) -> Option<MacroId> {
        self.entries
            .iter()
            .find(|(_, d)| d.approx_eq(def))
            .map(|(id, _)| MacroId(*id))
    }

    pub fn find_or_add(&mut self, def: MacroDef) -> MacroId {
        if let Some(id) = self.find(&def) {
            return id;
        }
        let next = self.entries.keys().next_back().map_or(1, |k| k + 1);
        self.entries.insert(next, def);
        MacroId(next)
    }

    /// Ids in ascending numeric order.
    pub fn iter(&self) -> impl Iterator<Item = (MacroId, &MacroDef)> {
        self.entries.iter().map(|(id, d)| (MacroId(*id), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_or_add_is_content_addressed() {
        let mut gat = ApertureTable::new();
        let a = gat.find_or_add(Shape::Circle { diameter: 0.010 });
        let b = gat.find_or_add(Shape::Circle { diameter: 0.010 + 5e-8 });
        let c = gat.find_or_add(Shape::Circle { diameter: 0.012 });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, ApertureCode(10));
        assert_eq!(c, ApertureCode(11));
        assert_eq!(gat.find(&Shape::Circle { diameter: 0.012 }), Some(c));
    }

    #[test]
    fn rectangle_and_obround_do_not_collide() {
        let mut gat = ApertureTable::new();
        let r = gat.find_or_add(Shape::Rectangle {
            width: 0.05,
            height: 0.02,
        });
        let o = gat.find_or_add(Shape::Obround {
            width: 0.05,
            height: 0.02,
        });
        assert_ne!(r, o);
    }

    #[test]
    fn grown_meets_minimum_per_axis() {
        let code = ApertureCode(10);
        let grown = Shape::Rectangle {
            width: 0.004,
            height: 0.020,
        }
        .grown(0.008, code)
        .unwrap()
        .unwrap();
        assert!(grown.approx_eq(&Shape::Rectangle {
            width: 0.008,
            height: 0.020,
        }));

        // Already meets the minimum.
        assert!(Shape::Circle { diameter: 0.010 }
            .grown(0.008, code)
            .unwrap()
            .is_none());
    }

    #[test]
    fn grown_refuses_macros() {
        let shape = Shape::Macro {
            id: MacroId(1),
            params: vec![0.05],
        };
        assert!(matches!(
            shape.grown(0.008, ApertureCode(12)),
            Err(ApertureError::MinimumFeatureExceedsApertureSupport { .. })
        ));
    }

    #[test]
    fn rotation_swaps_rectangle_axes() {
        let mut gamt = MacroTable::new();
        let r = Shape::Rectangle {
            width: 0.05,
            height: 0.02,
        }
        .rotated_90(&mut gamt)
        .unwrap();
        assert!(r.approx_eq(&Shape::Rectangle {
            width: 0.02,
            height: 0.05,
        }));

        let c = Shape::Circle { diameter: 0.01 };
        assert!(c.rotated_90(&mut gamt).unwrap().approx_eq(&c));
    }

    #[test]
    fn definition_lines_are_stable() {
        let mut out = Vec::new();
        Shape::Circle { diameter: 0.01 }
            .write_def(&mut out, ApertureCode(10))
            .unwrap();
        Shape::Rectangle {
            width: 0.06,
            height: 0.04,
        }
        .write_def(&mut out, ApertureCode(11))
        .unwrap();
        Shape::Octagon {
            diameter: 0.062,
            rotated: false,
        }
        .write_def(&mut out, ApertureCode(12))
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "%ADD10C,0.01000*%\n%ADD11R,0.06000X0.04000*%\n%ADD12OC8,0.06200*%\n"
        );
    }
}
