//! Panel configuration loading and parsing.
//!
//! The configuration file is TOML with four tables: `[panel]` (geometry and
//! overlay settings), `[output]` (file names), `[minimumfeature]` (per-layer
//! minimum feature dimensions), and one `[jobs.<name>]` table per board
//! mapping layer names to input files. `*`-prefixed names are shared
//! artwork layers; the reserved names `boardoutline`, `drills`, and
//! `centroid` select the outline, Excellon, and pick-and-place readers.
//!
//! The snapshot is read once and is immutable for the rest of the run.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    #[error("config: {0}")]
    Invalid(String),
}

/// `[panel]` table: panel geometry, margins, spacing, and overlay settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PanelSettings {
    #[serde(default = "PanelSettings::default_width")]
    pub width: f64,
    #[serde(default = "PanelSettings::default_height")]
    pub height: f64,
    #[serde(default)]
    pub leftmargin: f64,
    #[serde(default)]
    pub bottommargin: f64,
    #[serde(default)]
    pub rightmargin: f64,
    #[serde(default)]
    pub topmargin: f64,
    #[serde(default = "PanelSettings::default_spacing")]
    pub xspacing: f64,
    #[serde(default = "PanelSettings::default_spacing")]
    pub yspacing: f64,
    #[serde(default = "PanelSettings::default_line_width")]
    pub cutlinewidth: f64,
    #[serde(default)]
    pub cutlinelayers: Vec<String>,
    #[serde(default = "PanelSettings::default_line_width")]
    pub cropmarkwidth: f64,
    #[serde(default)]
    pub cropmarklayers: Vec<String>,
    /// Alternating x, y offsets. Positive values anchor to the panel's
    /// lower-left corner, negative to the upper-right.
    #[serde(default)]
    pub fiducialpoints: Vec<f64>,
    #[serde(default = "PanelSettings::default_fiducial_copper")]
    pub fiducialcopperdiameter: f64,
    #[serde(default = "PanelSettings::default_fiducial_mask")]
    pub fiducialmaskdiameter: f64,
    /// Drill diameters closer than this collapse onto one tool; zero
    /// disables clustering.
    #[serde(default)]
    pub drillclustertolerance: f64,
}

impl PanelSettings {
    const fn default_width() -> f64 {
        12.0
    }
    const fn default_height() -> f64 {
        9.0
    }
    const fn default_spacing() -> f64 {
        0.125
    }
    const fn default_line_width() -> f64 {
        0.01
    }
    const fn default_fiducial_copper() -> f64 {
        0.08
    }
    const fn default_fiducial_mask() -> f64 {
        0.32
    }
}

impl Default for PanelSettings {
    fn default() -> Self {
        toml::from_str("").expect("empty panel table deserializes")
    }
}

/// `[output]` table: file names for the merged artifacts. Any key that is
/// not one of the fixed outputs names the merged file for that layer.
#[derive(Debug, Deserialize, Clone)]
pub struct OutputSettings {
    #[serde(default = "OutputSettings::default_placement")]
    pub placement: String,
    #[serde(default = "OutputSettings::default_drills")]
    pub drills: String,
    #[serde(default = "OutputSettings::default_toollist")]
    pub toollist: String,
    #[serde(default = "OutputSettings::default_centroid")]
    pub centroid: String,
    #[serde(default)]
    pub boardoutline: Option<String>,
    #[serde(default)]
    pub scoring: Option<String>,
    #[serde(default)]
    pub fabricationdrawing: Option<String>,
    #[serde(flatten)]
    pub layers: BTreeMap<String, String>,
}

impl OutputSettings {
    fn default_placement() -> String {
        "merged.placement.txt".into()
    }
    fn default_drills() -> String {
        "merged.drills.xln".into()
    }
    fn default_toollist() -> String {
        "merged.toollist.drl".into()
    }
    fn default_centroid() -> String {
        "merged.centroid.csv".into()
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        toml::from_str("").expect("empty output table deserializes")
    }
}

/// One `[jobs.<name>]` table: repeat count plus layer -> input file.
#[derive(Debug, Deserialize, Clone)]
pub struct JobSpec {
    #[serde(default = "JobSpec::default_repeat")]
    pub repeat: u32,
    #[serde(flatten)]
    pub layers: BTreeMap<String, PathBuf>,
}

impl JobSpec {
    const fn default_repeat() -> u32 {
        1
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub panel: PanelSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub minimumfeature: BTreeMap<String, f64>,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobSpec>,
}

/// Layer names with a reader of their own rather than the Gerber one.
pub const DRILLS_LAYER: &str = "drills";
pub const CENTROID_LAYER: &str = "centroid";
pub const BOARD_OUTLINE_LAYER: &str = "boardoutline";

impl Config {
    /// The merged artwork layers, sorted: the union of every job's layer
    /// names minus the drill and centroid pseudo-layers.
    pub fn layer_list(&self) -> Vec<String> {
        let mut layers = BTreeSet::new();
        for job in self.jobs.values() {
            for name in job.layers.keys() {
                if name != DRILLS_LAYER && name != CENTROID_LAYER {
                    layers.insert(name.clone());
                }
            }
        }
        layers.into_iter().collect()
    }

    /// Output file for a merged layer: configured name or
    /// `merged.<layer>.ger` with the `*` prefix stripped.
    pub fn output_for_layer(&self, layer: &str) -> String {
        if let Some(name) = self.output.layers.get(layer) {
            return name.clone();
        }
        format!("merged.{}.ger", layer.trim_start_matches('*'))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let p = &self.panel;
        if p.width <= 0.0 || p.height <= 0.0 {
            return invalid(format!(
                "panel dimensions must be positive (got {}x{})",
                p.width, p.height
            ));
        }
        for (key, v) in [
            ("leftmargin", p.leftmargin),
            ("bottommargin", p.bottommargin),
            ("rightmargin", p.rightmargin),
            ("topmargin", p.topmargin),
            ("xspacing", p.xspacing),
            ("yspacing", p.yspacing),
        ] {
            if v < 0.0 {
                return invalid(format!("panel.{} must not be negative (got {})", key, v));
            }
        }
        if p.fiducialpoints.len() % 2 != 0 {
            return invalid(format!(
                "panel.fiducialpoints needs x,y pairs (got {} values)",
                p.fiducialpoints.len()
            ));
        }
        if self.jobs.is_empty() {
            return invalid("no [jobs.<name>] tables defined".into());
        }
        for (name, job) in &self.jobs {
            if !job.layers.contains_key(BOARD_OUTLINE_LAYER) {
                return invalid(format!("job {} has no boardoutline layer", name));
            }
            if job.repeat == 0 {
                return invalid(format!("job {} repeat must be at least 1", name));
            }
        }
        for (layer, dim) in &self.minimumfeature {
            if *dim <= 0.0 {
                return invalid(format!(
                    "minimumfeature.{} must be positive (got {})",
                    layer, dim
                ));
            }
        }
        Ok(())
    }
}

/// Load and validate a configuration snapshot.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    config.validate()?;
    info!(
        target: "config",
        file = %path.display(),
        jobs = config.jobs.len(),
        layers = config.layer_list().len(),
        "config_loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::io::Write;

    fn load_str(text: &str) -> Result<Config, ConfigError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.toml");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        drop(f);
        load(&path)
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = load_str(indoc! {r#"
            [jobs.main]
            boardoutline = "main.bor"
            drills = "main.xln"
            "*toplayer" = "main.cmp"
        "#})
        .unwrap();
        assert_eq!(cfg.panel.width, 12.0);
        assert_eq!(cfg.panel.xspacing, 0.125);
        assert_eq!(cfg.output.placement, "merged.placement.txt");
        assert_eq!(cfg.jobs["main"].repeat, 1);
        assert_eq!(cfg.layer_list(), vec!["*toplayer", "boardoutline"]);
        assert_eq!(cfg.output_for_layer("*toplayer"), "merged.toplayer.ger");
    }

    #[test]
    fn full_config_round_trips_values() {
        let cfg = load_str(indoc! {r#"
            [panel]
            width = 10.0
            height = 8.0
            leftmargin = 0.2
            xspacing = 0.25
            cutlinelayers = ["*topsilkscreen"]
            cropmarklayers = ["*toplayer"]
            fiducialpoints = [0.125, 0.125, -0.125, -0.125]
            drillclustertolerance = 0.0005

            [minimumfeature]
            "*topsoldermask" = 0.008

            [output]
            drills = "panel.xln"
            "*toplayer" = "panel.cmp"

            [jobs.main]
            repeat = 2
            boardoutline = "main.bor"
            drills = "main.xln"
            "*toplayer" = "main.cmp"
            "*topsoldermask" = "main.stc"
        "#})
        .unwrap();
        assert_eq!(cfg.panel.fiducialpoints.len(), 4);
        assert_eq!(cfg.minimumfeature["*topsoldermask"], 0.008);
        assert_eq!(cfg.output_for_layer("*toplayer"), "panel.cmp");
        assert_eq!(cfg.jobs["main"].repeat, 2);
        assert_eq!(
            cfg.layer_list(),
            vec!["*toplayer", "*topsoldermask", "boardoutline"]
        );
    }

    #[test]
    fn missing_outline_is_rejected() {
        let err = load_str(indoc! {r#"
            [jobs.main]
            drills = "main.xln"
        "#})
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("boardoutline")));
    }

    #[test]
    fn odd_fiducial_list_is_rejected() {
        let err = load_str(indoc! {r#"
            [panel]
            fiducialpoints = [0.125, 0.125, -0.125]

            [jobs.main]
            boardoutline = "main.bor"
        "#})
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("fiducialpoints")));
    }
}
