//! Centroid (pick-and-place) CSV reader.
//!
//! Format: a `RefDes,Layer,LocationX,LocationY,Rotation` header followed by
//! one row per part, coordinates in inches in the job's local frame.

use crate::ParseError;
use core_job::CentroidRecord;
use std::path::Path;

pub fn read_centroid(text: &str, path: &Path) -> Result<Vec<CentroidRecord>, ParseError> {
    let mut records = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if idx == 0 && line.to_lowercase().starts_with("refdes") {
            continue; // header row
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 5 {
            return Err(ParseError::syntax(
                path,
                format!("centroid line {} needs 5 fields: {:?}", idx + 1, raw),
            ));
        }
        let number = |text: &str| -> Result<f64, ParseError> {
            text.parse().map_err(|_| {
                ParseError::syntax(
                    path,
                    format!("bad number {:?} on centroid line {}", text, idx + 1),
                )
            })
        };
        records.push(CentroidRecord {
            refdes: fields[0].to_string(),
            side: fields[1].to_string(),
            x: number(fields[2])?,
            y: number(fields[3])?,
            rotation: number(fields[4])?,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rows_after_header() {
        let records = read_centroid(
            "RefDes,Layer,LocationX,LocationY,Rotation\nR1,top,0.5,0.25,90\nC3,bottom,1.0,1.5,0\n",
            &PathBuf::from("test.csv"),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].refdes, "R1");
        assert_eq!(records[1].rotation, 0.0);
    }

    #[test]
    fn short_rows_are_rejected() {
        assert!(read_centroid("R1,top,0.5\n", &PathBuf::from("test.csv")).is_err());
    }
}
