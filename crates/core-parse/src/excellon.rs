//! Line-oriented Excellon drill reader.
//!
//! Two passes over the file, the way drill files are actually structured:
//! the header (everything before the `%` rewind) yields units, zero mode,
//! and tool definitions; the body yields tool selections and hit
//! coordinates. Coordinates arrive either with an explicit decimal point or
//! in fixed format (2.4 for inch files, 3.3 for metric) with the zero
//! mode deciding which side is padded. Everything is normalized to inches.
//!
//! Routed slots (`G85`, `M15`/`M16`) are not part of the drill model and
//! are rejected.

use crate::ParseError;
use core_job::DrillProgram;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

const MM_PER_INCH: f64 = 25.4;

static TOOL_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^T0*(\d+)(?:F\d+)?(?:S\d+)?C([\d.]+)$").expect("tool def regex"));
static TOOL_SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^T0*(\d+)$").expect("tool select regex"));
static COORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:X([+-]?[\d.]+))?(?:Y([+-]?[\d.]+))?$").expect("coordinate regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Inch,
    Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZeroMode {
    /// Leading zeros present, trailing suppressed: digits are left-aligned.
    Leading,
    /// Trailing zeros present: digits are right-aligned.
    Trailing,
}

fn local_tool(number: u32) -> String {
    format!("T{:02}", number)
}

/// Fixed-format digit counts per unit (Excellon convention: 2.4 inch,
/// 3.3 metric).
fn digit_format(unit: Unit) -> (u32, u32) {
    match unit {
        Unit::Inch => (2, 4),
        Unit::Metric => (3, 3),
    }
}

fn parse_coord(
    text: &str,
    unit: Unit,
    zero: ZeroMode,
    path: &Path,
) -> Result<f64, ParseError> {
    let to_inches = |v: f64| match unit {
        Unit::Inch => v,
        Unit::Metric => v / MM_PER_INCH,
    };
    if text.contains('.') {
        let v: f64 = text
            .parse()
            .map_err(|_| ParseError::syntax(path, format!("bad coordinate {:?}", text)))?;
        return Ok(to_inches(v));
    }
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text.strip_prefix('+').unwrap_or(text)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::syntax(
            path,
            format!("bad coordinate {:?}", text),
        ));
    }
    let (int_digits, dec_digits) = digit_format(unit);
    let value = match zero {
        ZeroMode::Trailing => {
            let raw: f64 = digits.parse().unwrap_or(0.0);
            raw / 10f64.powi(dec_digits as i32)
        }
        ZeroMode::Leading => {
            // Left-aligned: missing digits are trailing zeros.
            let width = (int_digits + dec_digits) as usize;
            let mut padded = digits.to_string();
            while padded.len() < width {
                padded.push('0');
            }
            let raw: f64 = padded.parse().unwrap_or(0.0);
            raw / 10f64.powi(dec_digits as i32)
        }
    };
    Ok(to_inches(sign * value))
}

/// Read one Excellon drill file into a [`DrillProgram`] (inches).
pub fn read_excellon(text: &str, path: &Path) -> Result<DrillProgram, ParseError> {
    let mut unit = Unit::Inch;
    let mut zero = ZeroMode::Leading;
    let mut program = DrillProgram::default();

    // Header pass: units and tool definitions.
    for raw in text.lines() {
        let line = raw.trim();
        if line == "%" {
            break;
        }
        let upper = line.to_uppercase();
        if upper.starts_with("INCH") || upper.starts_with("METRIC") {
            unit = if upper.starts_with("INCH") {
                Unit::Inch
            } else {
                Unit::Metric
            };
            if upper.contains("TZ") {
                zero = ZeroMode::Trailing;
            } else if upper.contains("LZ") {
                zero = ZeroMode::Leading;
            }
            continue;
        }
        if let Some(caps) = TOOL_DEF.captures(line) {
            let number: u32 = caps[1]
                .parse()
                .map_err(|_| ParseError::syntax(path, format!("bad tool number in {:?}", line)))?;
            let diameter: f64 = caps[2]
                .parse()
                .map_err(|_| ParseError::syntax(path, format!("bad tool diameter in {:?}", line)))?;
            let diameter = match unit {
                Unit::Inch => diameter,
                Unit::Metric => diameter / MM_PER_INCH,
            };
            program.tools.insert(local_tool(number), diameter);
        }
    }

    // Body pass: tool selections and hits.
    let mut in_body = false;
    let mut current: Option<String> = None;
    let mut last = (0.0f64, 0.0f64);
    for raw in text.lines() {
        let line = raw.trim();
        if line == "%" {
            in_body = true;
            continue;
        }
        if !in_body || line.is_empty() || line.starts_with(';') {
            continue;
        }
        if line == "M30" || line == "T0" || line == "G90" || line == "G05" || line == "M48" {
            continue;
        }
        if line.contains("G85") || line == "M15" || line == "M16" {
            return Err(ParseError::unsupported(path, "routed slots"));
        }
        if let Some(caps) = TOOL_SELECT.captures(line) {
            let number: u32 = caps[1].parse().unwrap_or(0);
            if number == 0 {
                current = None; // tool removed from spindle
                continue;
            }
            let tool = local_tool(number);
            if !program.tools.contains_key(&tool) {
                return Err(ParseError::syntax(
                    path,
                    format!("tool {} selected but never defined", tool),
                ));
            }
            current = Some(tool);
            continue;
        }
        if let Some(caps) = COORD.captures(line) {
            if caps.get(1).is_none() && caps.get(2).is_none() {
                continue; // stray modal line with neither axis
            }
            let tool = current.clone().ok_or_else(|| {
                ParseError::syntax(path, format!("hit {:?} before any tool selection", line))
            })?;
            if let Some(x) = caps.get(1) {
                last.0 = parse_coord(x.as_str(), unit, zero, path)?;
            }
            if let Some(y) = caps.get(2) {
                last.1 = parse_coord(y.as_str(), unit, zero, path)?;
            }
            program.hits.entry(tool).or_default().push(last);
            continue;
        }
        return Err(ParseError::syntax(
            path,
            format!("unrecognized drill command {:?}", line),
        ));
    }

    // Every tool with hits must have a diameter.
    for tool in program.hits.keys() {
        if !program.tools.contains_key(tool) {
            return Err(ParseError::syntax(
                path,
                format!("hits recorded for undefined tool {}", tool),
            ));
        }
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::path::PathBuf;

    fn parse(text: &str) -> Result<DrillProgram, ParseError> {
        read_excellon(text, &PathBuf::from("test.xln"))
    }

    #[test]
    fn decimal_inch_file() {
        let program = parse(indoc! {"
            M48
            INCH,TZ
            T01C0.0320
            T02C0.0400
            %
            T01
            X1.25Y0.5
            X1.5Y0.5
            T02
            X0.75Y0.75
            M30
        "})
        .unwrap();
        assert_eq!(program.tools["T01"], 0.032);
        assert_eq!(program.hits["T01"], vec![(1.25, 0.5), (1.5, 0.5)]);
        assert_eq!(program.hits["T02"], vec![(0.75, 0.75)]);
    }

    #[test]
    fn fixed_format_trailing_zero_mode() {
        // INCH,TZ fixed 2.4: right-aligned, 12500 -> 1.25".
        let program = parse(indoc! {"
            INCH,TZ
            T01C0.0320
            %
            T01
            X12500Y5000
            M30
        "})
        .unwrap();
        assert_eq!(program.hits["T01"], vec![(1.25, 0.5)]);
    }

    #[test]
    fn fixed_format_leading_zero_mode() {
        // INCH,LZ fixed 2.4: left-aligned, 0125 -> 01.2500 -> 1.25".
        let program = parse(indoc! {"
            INCH,LZ
            T01C0.0320
            %
            T01
            X0125Y0050
            M30
        "})
        .unwrap();
        assert_eq!(program.hits["T01"], vec![(1.25, 0.5)]);
    }

    #[test]
    fn metric_converts_to_inches() {
        let program = parse(indoc! {"
            METRIC,TZ
            T01C0.8128
            %
            T01
            X25.4Y12.7
            M30
        "})
        .unwrap();
        assert!((program.tools["T01"] - 0.032).abs() < 1e-9);
        assert_eq!(program.hits["T01"], vec![(1.0, 0.5)]);
    }

    #[test]
    fn modal_coordinates_carry_the_other_axis() {
        let program = parse(indoc! {"
            INCH,TZ
            T01C0.0320
            %
            T01
            X1.0Y1.0
            X2.0
            Y3.0
            M30
        "})
        .unwrap();
        assert_eq!(
            program.hits["T01"],
            vec![(1.0, 1.0), (2.0, 1.0), (2.0, 3.0)]
        );
    }

    #[test]
    fn undefined_tool_selection_is_rejected() {
        let err = parse("INCH,TZ\nT01C0.0320\n%\nT05\nX1.0Y1.0\nM30\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn slots_are_rejected() {
        let err = parse("INCH,TZ\nT01C0.0320\n%\nT01\nX1.0Y1.0G85X2.0Y1.0\nM30\n").unwrap_err();
        assert!(matches!(err, ParseError::Unsupported { .. }));
    }
}
