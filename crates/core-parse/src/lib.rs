//! Readers for the per-job input artifacts: RS-274X artwork layers,
//! Excellon drill programs, and centroid CSV files, plus the loader that
//! assembles them into [`Job`] values while populating the global aperture
//! and macro tables.
//!
//! Local resources are re-addressed on load: a job's `D`-codes and macro
//! names are translated to global codes via content addressing, so two jobs
//! flashing the same 0.032" circle share one aperture table entry.

use core_job::{GlobalState, Job, JobError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

mod centroid;
mod excellon;
mod gerber;

pub use centroid::read_centroid;
pub use excellon::read_excellon;
pub use gerber::read_gerber;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {detail}")]
    Syntax { path: PathBuf, detail: String },
    #[error("{path}: unsupported input: {what}")]
    Unsupported { path: PathBuf, what: String },
    #[error("{path}: aperture D{code} selected but never defined")]
    UnknownAperture { path: PathBuf, code: u32 },
    #[error(transparent)]
    Job(#[from] JobError),
}

impl ParseError {
    fn syntax(path: &Path, detail: impl Into<String>) -> Self {
        ParseError::Syntax {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }

    fn unsupported(path: &Path, what: impl Into<String>) -> Self {
        ParseError::Unsupported {
            path: path.to_path_buf(),
            what: what.into(),
        }
    }
}

fn read_file(path: &Path) -> Result<String, ParseError> {
    fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every configured job, resolving layer files relative to
/// `base_dir` (the config file's directory).
pub fn load_jobs(
    config: &core_config::Config,
    state: &mut GlobalState,
    base_dir: &Path,
) -> Result<BTreeMap<String, Job>, ParseError> {
    let mut jobs = BTreeMap::new();
    for (name, spec) in &config.jobs {
        let mut layers = BTreeMap::new();
        let mut drill = core_job::DrillProgram::default();
        let mut centroids = Vec::new();
        for (layer, file) in &spec.layers {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                base_dir.join(file)
            };
            match layer.as_str() {
                core_config::DRILLS_LAYER => {
                    drill = read_excellon(&read_file(&path)?, &path)?;
                    debug!(
                        target: "parse",
                        job = %name,
                        tools = drill.tools.len(),
                        hits = drill.hit_count(),
                        "drill_loaded"
                    );
                }
                core_config::CENTROID_LAYER => {
                    centroids = read_centroid(&read_file(&path)?, &path)?;
                }
                _ => {
                    let tokens = read_gerber(&read_file(&path)?, &path, state)?;
                    layers.insert(layer.clone(), tokens);
                }
            }
        }
        let job = Job::new(name.clone(), layers, drill, centroids, spec.repeat)?;
        info!(
            target: "parse",
            job = %name,
            width = job.width(),
            height = job.height(),
            repeat = job.repeat,
            "job_loaded"
        );
        jobs.insert(name.clone(), job);
    }
    Ok(jobs)
}
