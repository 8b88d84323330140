//! Run parameters for the PDR pipeline.
//!
//! A [`PdrConfig`] is built once (usually parsed from a JSON, YAML, or TOML file) and handed to
//! the orchestrator by value. Nothing in the pipeline mutates it afterwards.
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{PdrError, Result};

/// Name of the constant mean step-length model.
pub const MEAN_MODEL: &str = "Mean";
/// Name of the two-feature linear regression step-length model.
pub const LINEAR_MODEL: &str = "Linear";

fn default_sample_rate() -> usize {
    50
}
fn default_move_average() -> usize {
    9
}
fn default_min_distance() -> usize {
    15
}
fn default_distance_frac_step() -> usize {
    5
}
fn default_butter_wn() -> f64 {
    0.02
}
fn default_optimized_mode_ratio() -> f64 {
    0.5
}
fn default_least_start_point() -> usize {
    100
}
fn default_step_model() -> String {
    LINEAR_MODEL.to_string()
}
fn default_heading_ratio_threshold() -> f64 {
    15.0
}

/// Immutable run parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PdrConfig {
    /// Sensor samples per second on the aligned grid (also: sub-steps per ground-truth tick).
    #[serde(default = "default_sample_rate")]
    pub sample_rate: usize,
    /// Window of the centered moving average applied to the acceleration magnitude.
    #[serde(default = "default_move_average")]
    pub move_average: usize,
    /// Minimum sample gap between two accepted peaks.
    #[serde(default = "default_min_distance")]
    pub min_distance: usize,
    /// Samples dropped from the beginning of the training data.
    #[serde(default)]
    pub clean_start: usize,
    /// Samples dropped from the end of the training data.
    #[serde(default)]
    pub clean_end: usize,
    /// Ground-truth ticks per step-length training segment.
    #[serde(default = "default_distance_frac_step")]
    pub distance_frac_step: usize,
    /// Normalized low-pass cutoff (fraction of Nyquist) for the heading filters.
    #[serde(default = "default_butter_wn")]
    pub butter_wn: f64,
    /// Weight of the reference direction when blending it with the magnetic start heading.
    #[serde(default = "default_optimized_mode_ratio")]
    pub optimized_mode_ratio: f64,
    /// Samples required to bootstrap the heading reference.
    #[serde(default = "default_least_start_point")]
    pub least_start_point: usize,
    /// Step-length model kind, either `"Mean"` or `"Linear"`.
    #[serde(default = "default_step_model")]
    pub step_model: String,
    /// Where the trained step model is written to and read from.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Heading error (degrees) under which a sample counts as correct.
    #[serde(default = "default_heading_ratio_threshold")]
    pub heading_ratio_threshold: f64,
}

impl Default for PdrConfig {
    fn default() -> Self {
        PdrConfig {
            sample_rate: default_sample_rate(),
            move_average: default_move_average(),
            min_distance: default_min_distance(),
            clean_start: 0,
            clean_end: 0,
            distance_frac_step: default_distance_frac_step(),
            butter_wn: default_butter_wn(),
            optimized_mode_ratio: default_optimized_mode_ratio(),
            least_start_point: default_least_start_point(),
            step_model: default_step_model(),
            model_path: None,
            heading_ratio_threshold: default_heading_ratio_threshold(),
        }
    }
}

impl PdrConfig {
    /// Check the parameters for values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PdrError::InvalidConfig("sample_rate must be positive".into()));
        }
        if self.move_average == 0 {
            return Err(PdrError::InvalidConfig("move_average must be positive".into()));
        }
        if self.least_start_point == 0 {
            return Err(PdrError::InvalidConfig(
                "least_start_point must be positive".into(),
            ));
        }
        if self.distance_frac_step == 0 {
            return Err(PdrError::InvalidConfig(
                "distance_frac_step must be positive".into(),
            ));
        }
        if !(self.butter_wn > 0.0 && self.butter_wn < 1.0) {
            return Err(PdrError::InvalidConfig(format!(
                "butter_wn must lie in (0, 1), got {}",
                self.butter_wn
            )));
        }
        if !(0.0..=1.0).contains(&self.optimized_mode_ratio) {
            return Err(PdrError::InvalidConfig(format!(
                "optimized_mode_ratio must lie in [0, 1], got {}",
                self.optimized_mode_ratio
            )));
        }
        if self.step_model != MEAN_MODEL && self.step_model != LINEAR_MODEL {
            return Err(PdrError::InvalidConfig(format!(
                "unknown step model '{}'",
                self.step_model
            )));
        }
        Ok(())
    }
    /// Time step between two aligned samples in seconds.
    pub fn sample_period(&self) -> f64 {
        1.0 / self.sample_rate as f64
    }
    /// Whether the configured step model is the constant mean.
    pub fn uses_mean_model(&self) -> bool {
        self.step_model == MEAN_MODEL
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        Ok(toml::from_str(&s)?)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(PdrError::InvalidConfig(format!(
                "unsupported config extension: {}",
                p.display()
            ))),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml).
    ///
    /// The parsed configuration is validated before it is returned.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let config = match extension(p).as_deref() {
            Some("json") => Self::from_json(p)?,
            Some("yaml") | Some("yml") => Self::from_yaml(p)?,
            Some("toml") => Self::from_toml(p)?,
            _ => {
                return Err(PdrError::InvalidConfig(format!(
                    "unsupported config extension: {}",
                    p.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn default_is_valid() {
        let config = PdrConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.uses_mean_model());
        assert_eq!(config.sample_period(), 0.02);
    }
    #[test]
    fn rejects_bad_cutoff() {
        let config = PdrConfig {
            butter_wn: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PdrError::InvalidConfig(_))));
    }
    #[test]
    fn rejects_unknown_model() {
        let config = PdrConfig {
            step_model: "Forest".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
    #[test]
    fn missing_fields_take_defaults() {
        let config: PdrConfig = serde_json::from_str(r#"{"sample_rate": 100}"#).unwrap();
        assert_eq!(config.sample_rate, 100);
        assert_eq!(config.min_distance, 15);
        assert_eq!(config.step_model, LINEAR_MODEL);
        assert!(config.model_path.is_none());
    }
    #[test]
    fn file_round_trip_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let config = PdrConfig {
            step_model: MEAN_MODEL.to_string(),
            model_path: Some(PathBuf::from("model.bin")),
            ..Default::default()
        };
        for name in ["config.json", "config.yaml", "config.toml"] {
            let path = dir.path().join(name);
            config.to_file(&path).unwrap();
            let loaded = PdrConfig::from_file(&path).unwrap();
            assert_eq!(loaded, config);
        }
        assert!(config.to_file(dir.path().join("config.ini")).is_err());
    }
}
