//! The global drill tool table and diameter clustering.
//!
//! Tool codes `T01`, `T02`, … are assigned in first-seen order while
//! scanning jobs (the caller iterates jobs by sorted name, so numbering is
//! deterministic). Clustering collapses diameters within a tolerance onto
//! the largest diameter of the window (a drill may grow, never shrink),
//! and the collapsed group keeps its smallest tool code.

use crate::Job;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool for diameter {diameter:.4}\" not found in global tool map")]
    ToolMissingInGlobalMap { diameter: f64 },
}

/// A global `Tnn` tool code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolCode(pub u32);

impl fmt::Display for ToolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:02}", self.0)
    }
}

/// Integer key for a drill diameter, on a 1e-6" grid so float noise cannot
/// split one physical drill size into two map entries.
pub fn diameter_key(diameter: f64) -> i64 {
    (diameter * 1e6).round() as i64
}

/// `GlobalToolRMap` (diameter -> code) and `GlobalToolMap` (code ->
/// diameter) kept in lockstep.
#[derive(Debug, Default, Clone)]
pub struct ToolTable {
    by_diameter: BTreeMap<i64, ToolCode>,
    by_code: BTreeMap<ToolCode, f64>,
}

impl ToolTable {
    /// Scan jobs (in the caller's order) and assign codes to every distinct
    /// diameter not yet mapped.
    pub fn build<'a>(jobs: impl Iterator<Item = &'a Job>) -> Self {
        let mut table = ToolTable::default();
        let mut next = 0u32;
        for job in jobs {
            for diameter in job.drill.tools.values() {
                let key = diameter_key(*diameter);
                if table.by_diameter.contains_key(&key) {
                    continue;
                }
                next += 1;
                let code = ToolCode(next);
                table.by_diameter.insert(key, code);
                table.by_code.insert(code, *diameter);
            }
        }
        table
    }

    /// Cluster diameters within `tolerance`, rewriting both maps.
    ///
    /// Returns the diameter remap (old -> representative) the caller applies
    /// to every job's drill program. A no-op when `tolerance <= 0`.
    pub fn cluster(&mut self, tolerance: f64) -> Vec<(f64, f64)> {
        if tolerance <= 0.0 {
            return Vec::new();
        }
        let mut diameters: Vec<f64> = self.by_code.values().copied().collect();
        diameters.sort_by(|a, b| a.partial_cmp(b).expect("diameters are finite"));

        let mut remap = Vec::new();
        let mut new_by_diameter = BTreeMap::new();
        let mut new_by_code = BTreeMap::new();

        let mut i = 0;
        while i < diameters.len() {
            let anchor = diameters[i];
            let mut j = i;
            while j + 1 < diameters.len() && diameters[j + 1] - anchor <= tolerance {
                j += 1;
            }
            // Representative is the largest member so no hole is undersized;
            // the group keeps its smallest tool code for stable numbering.
            let representative = diameters[j];
            let code = diameters[i..=j]
                .iter()
                .map(|d| self.by_diameter[&diameter_key(*d)])
                .min()
                .expect("window is non-empty");
            for &d in &diameters[i..=j] {
                if diameter_key(d) != diameter_key(representative) {
                    remap.push((d, representative));
                }
            }
            new_by_diameter.insert(diameter_key(representative), code);
            new_by_code.insert(code, representative);
            i = j + 1;
        }

        if !remap.is_empty() {
            tracing::info!(
                target: "job.tools",
                clusters = new_by_code.len(),
                collapsed = remap.len(),
                tolerance,
                "drill_cluster"
            );
        }
        self.by_diameter = new_by_diameter;
        self.by_code = new_by_code;
        remap
    }

    /// Rewrite a job's drill diameters through a cluster remap.
    pub fn apply_remap(job: &mut Job, remap: &[(f64, f64)]) {
        for diameter in job.drill.tools.values_mut() {
            if let Some((_, to)) = remap
                .iter()
                .find(|(from, _)| diameter_key(*from) == diameter_key(*diameter))
            {
                *diameter = *to;
            }
        }
    }

    pub fn resolve(&self, diameter: f64) -> Result<ToolCode, ToolError> {
        self.by_diameter
            .get(&diameter_key(diameter))
            .copied()
            .ok_or(ToolError::ToolMissingInGlobalMap { diameter })
    }

    pub fn diameter_of(&self, code: ToolCode) -> Option<f64> {
        self.by_code.get(&code).copied()
    }

    /// Tools in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (ToolCode, f64)> + '_ {
        self.by_code.iter().map(|(c, d)| (*c, *d))
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}
