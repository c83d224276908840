//! RS-274X layer reader built on [nom](https://crates.io/crates/nom).
//!
//! The reader targets the dialect the merger understands: absolute
//! leading-zero-omitted coordinates, standard apertures (C/R/O), aperture
//! macros, and linear draw/move/flash operations. Region statements pass
//! through verbatim; circular interpolation and incremental coordinates are
//! rejected rather than silently mangled.
//!
//! Everything local to the file is re-addressed on the fly: `D`-codes go
//! through the global aperture table, macro names through the global macro
//! table, and a macro body that matches the Eagle octagon convention (a
//! single 8-vertex polygon primitive) turns its instances into octagon
//! apertures backed by the output prelude's `OC8`.

use crate::ParseError;
use core_aperture::{ApertureCode, MacroDef, MacroLine, MacroTerm, Shape};
use core_job::{GlobalState, LayerToken, OpKind};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_until, take_while1};
use nom::character::complete::{char, digit1, multispace0, one_of};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::multi::{many0, many1, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use std::collections::HashMap;
use std::path::Path;

pub(crate) type IResult<'a, T> = nom::IResult<&'a str, T>;

const MM_PER_INCH: f64 = 25.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Inch,
    Millimeter,
}

#[derive(Debug, Clone, PartialEq)]
enum Template {
    Circle(Vec<f64>),
    Rect(Vec<f64>),
    Obround(Vec<f64>),
    Polygon(Vec<f64>),
    Named(String, Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
enum Cmd {
    Comment,
    Unit(Unit),
    Format {
        zero: char,
        mode: char,
        x_dec: u8,
        y_dec: u8,
    },
    ApertureDef {
        code: u32,
        template: Template,
    },
    MacroDef {
        name: String,
        body: MacroDef,
    },
    Select(u32),
    Op {
        x: Option<i64>,
        y: Option<i64>,
        arc: bool,
        d: u16,
    },
    Region(&'static str),
    ArcMode,
    Incremental,
    Ignore,
    End,
}

fn integer(input: &str) -> IResult<i64> {
    map_res(
        recognize(pair(opt(one_of("+-")), digit1)),
        str::parse::<i64>,
    )(input)
}

fn unsigned_decimal(input: &str) -> IResult<f64> {
    map_res(
        alt((
            recognize(tuple((digit1, char('.'), opt(digit1)))),
            recognize(pair(char('.'), digit1)),
            recognize(digit1),
        )),
        |text: &str| {
            if let Some(stripped) = text.strip_suffix('.') {
                stripped.parse::<f64>()
            } else {
                text.parse::<f64>()
            }
        },
    )(input)
}

fn decimal(input: &str) -> IResult<f64> {
    map(
        pair(opt(one_of("+-")), unsigned_decimal),
        |(sign, val)| if sign == Some('-') { -val } else { val },
    )(input)
}

/// Macro or attribute name: letters, digits, `_`, `$`, `.`.
fn name(input: &str) -> IResult<&str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')(input)
}

fn comment(input: &str) -> IResult<Cmd> {
    value(Cmd::Comment, delimited(tag("G04"), take_until("*"), char('*')))(input)
}

fn unit_mo(input: &str) -> IResult<Cmd> {
    map(
        delimited(tag("%MO"), alt((tag("IN"), tag("MM"))), tag("*%")),
        |unit| {
            Cmd::Unit(if unit == "IN" {
                Unit::Inch
            } else {
                Unit::Millimeter
            })
        },
    )(input)
}

fn format_digit(input: &str) -> IResult<u8> {
    map(one_of("0123456"), |c| c as u8 - b'0')(input)
}

fn format_spec(input: &str) -> IResult<Cmd> {
    map(
        delimited(
            tag("%FS"),
            tuple((
                one_of("LT"),
                one_of("AI"),
                preceded(char('X'), pair(format_digit, format_digit)),
                preceded(char('Y'), pair(format_digit, format_digit)),
            )),
            tag("*%"),
        ),
        |(zero, mode, (_, x_dec), (_, y_dec))| Cmd::Format {
            zero,
            mode,
            x_dec,
            y_dec,
        },
    )(input)
}

fn params(input: &str) -> IResult<Vec<f64>> {
    separated_list1(char('X'), decimal)(input)
}

fn aperture_define(input: &str) -> IResult<Cmd> {
    let (input, code) = preceded(
        pair(tag("%AD"), char('D')),
        map_res(digit1, str::parse::<u32>),
    )(input)?;
    let (input, template) = alt((
        map(preceded(tag("C,"), params), Template::Circle),
        map(preceded(tag("R,"), params), Template::Rect),
        map(preceded(tag("O,"), params), Template::Obround),
        map(preceded(tag("P,"), params), Template::Polygon),
        map(
            pair(name, opt(preceded(char(','), params))),
            |(n, p)| Template::Named(n.to_string(), p.unwrap_or_default()),
        ),
    ))(input)?;
    value(Cmd::ApertureDef { code, template }, tag("*%"))(input)
}

fn macro_line(input: &str) -> IResult<MacroLine> {
    map(
        take_while1(|c| c != '*' && c != '%'),
        |text: &str| MacroLine {
            terms: text
                .trim()
                .split(',')
                .map(|term| {
                    let term = term.trim();
                    match term.parse::<f64>() {
                        Ok(v) => MacroTerm::Num(v),
                        Err(_) => MacroTerm::Expr(term.to_string()),
                    }
                })
                .collect(),
        },
    )(input)
}

fn macro_def(input: &str) -> IResult<Cmd> {
    map(
        delimited(
            tag("%AM"),
            pair(
                terminated(name, pair(char('*'), multispace0)),
                many1(terminated(macro_line, pair(char('*'), multispace0))),
            ),
            char('%'),
        ),
        |(n, lines)| Cmd::MacroDef {
            name: n.to_string(),
            body: MacroDef::new(lines),
        },
    )(input)
}

/// Any other `%…*%` block (polarity, offset, image name, attributes): no
/// geometric meaning for the merger, skipped.
fn generic_percent(input: &str) -> IResult<Cmd> {
    value(Cmd::Ignore, delimited(char('%'), take_until("*%"), tag("*%")))(input)
}

fn g54_select(input: &str) -> IResult<Cmd> {
    map(
        delimited(
            pair(tag("G54"), char('D')),
            map_res(digit1, str::parse::<u32>),
            char('*'),
        ),
        Cmd::Select,
    )(input)
}

fn gcode_ignored(input: &str) -> IResult<Cmd> {
    value(
        Cmd::Ignore,
        alt((tag("G01*"), tag("G74*"), tag("G75*"), tag("G90*"))),
    )(input)
}

fn gcode_units(input: &str) -> IResult<Cmd> {
    alt((
        value(Cmd::Unit(Unit::Inch), tag("G70*")),
        value(Cmd::Unit(Unit::Millimeter), tag("G71*")),
    ))(input)
}

fn arc_mode(input: &str) -> IResult<Cmd> {
    value(Cmd::ArcMode, alt((tag("G02*"), tag("G03*"))))(input)
}

fn incremental(input: &str) -> IResult<Cmd> {
    value(Cmd::Incremental, tag("G91*"))(input)
}

fn region(input: &str) -> IResult<Cmd> {
    alt((
        value(Cmd::Region("G36*"), tag("G36*")),
        value(Cmd::Region("G37*"), tag("G37*")),
    ))(input)
}

fn end_of_file(input: &str) -> IResult<Cmd> {
    value(Cmd::End, tag("M02*"))(input)
}

fn coord_op(input: &str) -> IResult<Cmd> {
    map(
        terminated(
            tuple((
                opt(preceded(char('X'), integer)),
                opt(preceded(char('Y'), integer)),
                opt(preceded(char('I'), integer)),
                opt(preceded(char('J'), integer)),
                preceded(char('D'), map_res(digit1, str::parse::<u16>)),
            )),
            char('*'),
        ),
        |(x, y, i, j, d)| Cmd::Op {
            x,
            y,
            arc: i.is_some() || j.is_some(),
            d,
        },
    )(input)
}

fn command(input: &str) -> IResult<Cmd> {
    alt((
        comment,
        unit_mo,
        format_spec,
        aperture_define,
        macro_def,
        generic_percent,
        g54_select,
        gcode_ignored,
        gcode_units,
        arc_mode,
        incremental,
        region,
        end_of_file,
        coord_op,
    ))(input)
}

fn commands(input: &str) -> IResult<Vec<Cmd>> {
    all_consuming(terminated(
        many0(preceded(multispace0, command)),
        multispace0,
    ))(input)
}

/// A macro name resolves either to the octagon convention or to a global
/// macro table entry.
enum MacroRef {
    Octagon { rotated: bool },
    Global(core_aperture::MacroId),
}

/// Read one RS-274X layer into tokens, re-addressing apertures and macros
/// through the global tables.
pub fn read_gerber(
    text: &str,
    path: &Path,
    state: &mut GlobalState,
) -> Result<Vec<LayerToken>, ParseError> {
    let (_, cmds) = commands(text).map_err(|err| match err {
        nom::Err::Incomplete(_) => ParseError::syntax(path, "truncated input"),
        nom::Err::Error(e) | nom::Err::Failure(e) => ParseError::syntax(
            path,
            format!("syntax error near byte {}", text.len() - e.input.len()),
        ),
    })?;

    let mut unit = Unit::Inch;
    let mut divisor: Option<f64> = None;
    let mut locals: HashMap<u32, ApertureCode> = HashMap::new();
    let mut macro_refs: HashMap<String, MacroRef> = HashMap::new();
    let mut last = (0.0f64, 0.0f64);
    let mut tokens = Vec::new();

    let dim_scale = |unit: Unit, v: f64| match unit {
        Unit::Inch => v,
        Unit::Millimeter => v / MM_PER_INCH,
    };

    for cmd in cmds {
        match cmd {
            Cmd::Comment | Cmd::Ignore => {}
            Cmd::Unit(u) => unit = u,
            Cmd::Format {
                zero,
                mode,
                x_dec,
                y_dec,
            } => {
                if zero != 'L' {
                    return Err(ParseError::unsupported(path, "trailing-zero omission"));
                }
                if mode != 'A' {
                    return Err(ParseError::unsupported(path, "incremental coordinates"));
                }
                if x_dec != y_dec {
                    return Err(ParseError::unsupported(
                        path,
                        "asymmetric coordinate formats",
                    ));
                }
                divisor = Some(10f64.powi(x_dec as i32));
            }
            Cmd::MacroDef { name, body } => {
                let reference = match body.octagon_rotation() {
                    Some(rot) => MacroRef::Octagon {
                        rotated: rot.abs() > core_geom::DIM_EPSILON,
                    },
                    None => MacroRef::Global(state.macros.find_or_add(body)),
                };
                macro_refs.insert(name, reference);
            }
            Cmd::ApertureDef { code, template } => {
                let shape = match template {
                    Template::Circle(p) => Shape::Circle {
                        diameter: dim_scale(unit, p[0]),
                    },
                    Template::Rect(p) if p.len() >= 2 => Shape::Rectangle {
                        width: dim_scale(unit, p[0]),
                        height: dim_scale(unit, p[1]),
                    },
                    Template::Obround(p) if p.len() >= 2 => Shape::Obround {
                        width: dim_scale(unit, p[0]),
                        height: dim_scale(unit, p[1]),
                    },
                    Template::Rect(_) | Template::Obround(_) => {
                        return Err(ParseError::syntax(
                            path,
                            format!("aperture D{} needs two dimensions", code),
                        ));
                    }
                    Template::Polygon(_) => {
                        return Err(ParseError::unsupported(path, "polygon (P) apertures"));
                    }
                    Template::Named(n, p) => match macro_refs.get(&n) {
                        Some(MacroRef::Octagon { rotated }) => {
                            let diameter = *p.first().ok_or_else(|| {
                                ParseError::syntax(
                                    path,
                                    format!("octagon aperture D{} needs a size", code),
                                )
                            })?;
                            Shape::Octagon {
                                diameter: dim_scale(unit, diameter),
                                rotated: *rotated,
                            }
                        }
                        Some(MacroRef::Global(id)) => Shape::Macro {
                            id: *id,
                            params: p.iter().map(|v| dim_scale(unit, *v)).collect(),
                        },
                        None => {
                            return Err(ParseError::syntax(
                                path,
                                format!("aperture D{} references undefined macro {}", code, n),
                            ));
                        }
                    },
                };
                locals.insert(code, state.apertures.find_or_add(shape));
            }
            Cmd::Select(code) => {
                let global = locals.get(&code).ok_or(ParseError::UnknownAperture {
                    path: path.to_path_buf(),
                    code,
                })?;
                tokens.push(LayerToken::Select(*global));
            }
            Cmd::Region(text) => tokens.push(LayerToken::Passthrough(text.to_string())),
            Cmd::ArcMode => {
                return Err(ParseError::unsupported(path, "circular interpolation"));
            }
            Cmd::Incremental => {
                return Err(ParseError::unsupported(path, "incremental coordinates"));
            }
            Cmd::Op { x, y, arc, d } => {
                if arc {
                    return Err(ParseError::unsupported(path, "arc offsets (I/J)"));
                }
                if d >= 10 {
                    // A coordinate-less `Dnn*` line is an aperture select.
                    if x.is_some() || y.is_some() {
                        return Err(ParseError::syntax(
                            path,
                            format!("coordinates on aperture select D{}", d),
                        ));
                    }
                    let global = locals.get(&(d as u32)).ok_or(ParseError::UnknownAperture {
                        path: path.to_path_buf(),
                        code: d as u32,
                    })?;
                    tokens.push(LayerToken::Select(*global));
                    continue;
                }
                let kind = match d {
                    1 => OpKind::Line,
                    2 => OpKind::Move,
                    3 => OpKind::Flash,
                    other => {
                        return Err(ParseError::syntax(
                            path,
                            format!("unknown operation D{:02}", other),
                        ));
                    }
                };
                let divisor = divisor.ok_or_else(|| {
                    ParseError::syntax(path, "coordinate before format specification")
                })?;
                let scale = |raw: i64| dim_scale(unit, raw as f64 / divisor);
                let px = x.map(scale).unwrap_or(last.0);
                let py = y.map(scale).unwrap_or(last.1);
                last = (px, py);
                tokens.push(LayerToken::Op {
                    x: px,
                    y: py,
                    kind,
                });
            }
            Cmd::End => break,
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::path::PathBuf;

    fn parse(text: &str, state: &mut GlobalState) -> Result<Vec<LayerToken>, ParseError> {
        read_gerber(text, &PathBuf::from("test.ger"), state)
    }

    #[test]
    fn simple_layer_round_trips_geometry() {
        let mut state = GlobalState::default();
        let tokens = parse(
            indoc! {"
                G04 sample layer*
                %FSLAX25Y25*%
                %MOIN*%
                %ADD10C,0.0100*%
                %ADD11R,0.0600X0.0400*%
                G01*
                D10*
                X0010000Y0010000D02*
                X0020000D01*
                D11*
                X0015000Y0015000D03*
                M02*
            "},
            &mut state,
        )
        .unwrap();

        let circle = state.apertures.find(&Shape::Circle { diameter: 0.01 }).unwrap();
        let rect = state
            .apertures
            .find(&Shape::Rectangle { width: 0.06, height: 0.04 })
            .unwrap();
        assert_eq!(
            tokens,
            vec![
                LayerToken::Select(circle),
                LayerToken::Op { x: 0.1, y: 0.1, kind: OpKind::Move },
                // Modal Y: X moves, Y carried from the previous op.
                LayerToken::Op { x: 0.2, y: 0.1, kind: OpKind::Line },
                LayerToken::Select(rect),
                LayerToken::Op { x: 0.15, y: 0.15, kind: OpKind::Flash },
            ]
        );
    }

    #[test]
    fn identical_shapes_share_codes_across_files() {
        let mut state = GlobalState::default();
        let first = parse(
            "%FSLAX25Y25*%\n%MOIN*%\n%ADD10C,0.0100*%\nD10*\nX0Y0D03*\nM02*\n",
            &mut state,
        )
        .unwrap();
        // Second file uses a different local code for the same circle.
        let second = parse(
            "%FSLAX25Y25*%\n%MOIN*%\n%ADD17C,0.0100*%\nD17*\nX0Y0D03*\nM02*\n",
            &mut state,
        )
        .unwrap();
        assert_eq!(first[0], second[0]);
        assert_eq!(state.apertures.len(), 1);
    }

    #[test]
    fn eagle_octagon_macro_becomes_an_octagon() {
        let mut state = GlobalState::default();
        let tokens = parse(
            indoc! {"
                %FSLAX25Y25*%
                %MOIN*%
                %AMOC8*
                5,1,8,0,0,1.08239X$1,22.5*
                %
                %ADD12OC8,0.0620*%
                D12*
                X0Y0D03*
                M02*
            "},
            &mut state,
        )
        .unwrap();
        let LayerToken::Select(code) = tokens[0] else {
            panic!("expected select first");
        };
        assert!(state.apertures.get(code).unwrap().approx_eq(&Shape::Octagon {
            diameter: 0.062,
            rotated: true,
        }));
        // The octagon convention never lands in the macro table.
        assert!(state.macros.is_empty());
    }

    #[test]
    fn general_macros_are_globally_renamed() {
        let mut state = GlobalState::default();
        parse(
            indoc! {"
                %FSLAX25Y25*%
                %MOIN*%
                %AMDONUT*
                1,1,$1,0,0*
                1,0,$2,0,0*
                %
                %ADD15DONUT,0.0500X0.0250*%
                D15*
                X0Y0D03*
                M02*
            "},
            &mut state,
        )
        .unwrap();
        assert_eq!(state.macros.len(), 1);
        let code = state
            .apertures
            .iter()
            .next()
            .map(|(c, _)| c)
            .unwrap();
        assert!(matches!(
            state.apertures.get(code),
            Some(Shape::Macro { params, .. }) if params.len() == 2
        ));
    }

    #[test]
    fn millimeter_files_scale_to_inches() {
        let mut state = GlobalState::default();
        let tokens = parse(
            "%FSLAX35Y35*%\n%MOMM*%\n%ADD10C,0.254*%\nD10*\nX2540000Y0D03*\nM02*\n",
            &mut state,
        )
        .unwrap();
        assert!(state
            .apertures
            .find(&Shape::Circle { diameter: 0.01 })
            .is_some());
        let LayerToken::Op { x, .. } = tokens[1] else {
            panic!("expected an op");
        };
        assert!((x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn region_statements_pass_through() {
        let mut state = GlobalState::default();
        let tokens = parse(
            "%FSLAX25Y25*%\nG36*\nX0Y0D02*\nX100Y0D01*\nG37*\nM02*\n",
            &mut state,
        )
        .unwrap();
        assert_eq!(tokens[0], LayerToken::Passthrough("G36*".into()));
        assert_eq!(*tokens.last().unwrap(), LayerToken::Passthrough("G37*".into()));
    }

    #[test]
    fn undefined_aperture_is_an_error() {
        let mut state = GlobalState::default();
        let err = parse("%FSLAX25Y25*%\nD42*\nM02*\n", &mut state).unwrap_err();
        assert!(matches!(err, ParseError::UnknownAperture { code: 42, .. }));
    }

    #[test]
    fn arcs_are_rejected() {
        let mut state = GlobalState::default();
        let err = parse(
            "%FSLAX25Y25*%\n%ADD10C,0.01*%\nD10*\nG02*\nX1Y1I5J0D01*\nM02*\n",
            &mut state,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::Unsupported { .. }));
    }
}
