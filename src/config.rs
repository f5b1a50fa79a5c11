//! Modeler configuration
//!
//! [`ModelerConfig`] names the ensemble, where the per-track and per-step
//! tables for each [`Mode`] live, and which dates to load. It round-trips
//! through JSON so a run can be reproduced from a file.
//!
//! # Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use hailcast::config::{DateRange, ModelerConfig};
//!
//! let day = NaiveDate::from_ymd_opt(2015, 5, 6).unwrap();
//! let config = ModelerConfig::builder("SSEF")
//!     .train("data/train", "members.csv", DateRange::new(day, day))
//!     .forecast("data/forecast", "members.csv", DateRange::new(day, day))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.group_col, "Microphysics");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default stratification column in the member table
pub const DEFAULT_GROUP_COL: &str = "Microphysics";

/// Which data set a table load or prediction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Historical tracks with observed labels
    Train,
    /// Tracks to forecast
    Forecast,
}

impl Mode {
    /// Lowercase name used in logs and file layouts
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Forecast => "forecast",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk format of the per-track and per-step tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    /// Comma-separated values with a header row
    #[default]
    Csv,
    /// Apache Parquet
    Parquet,
}

impl TableFormat {
    /// File extension without the leading dot
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

/// Inclusive range of run dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First run date
    pub start: NaiveDate,
    /// Last run date (inclusive)
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range covering `start..=end`
    #[must_use]
    pub const fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Whether `date` falls inside the range
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Data locations for one [`Mode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSource {
    /// Directory holding `*total_*` and `*step_*` files
    pub data_path: PathBuf,
    /// Member table mapping `Ensemble_Member` to a group
    pub member_file: PathBuf,
    /// Run dates to load
    pub dates: DateRange,
}

/// Complete configuration for a [`crate::modeler::TrackModeler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelerConfig {
    /// Ensemble name embedded in table file names
    pub ensemble_name: String,
    /// Training data locations
    pub train: ModeSource,
    /// Forecast data locations
    pub forecast: ModeSource,
    /// Member-table column used to stratify all models
    #[serde(default = "default_group_col")]
    pub group_col: String,
    /// Input table format
    #[serde(default)]
    pub format: TableFormat,
}

fn default_group_col() -> String {
    DEFAULT_GROUP_COL.to_string()
}

impl ModelerConfig {
    /// Start building a configuration for `ensemble_name`
    #[must_use]
    pub fn builder(ensemble_name: impl Into<String>) -> ModelerConfigBuilder {
        ModelerConfigBuilder::new(ensemble_name)
    }

    /// Data locations for `mode`
    #[must_use]
    pub const fn source(&self, mode: Mode) -> &ModeSource {
        match mode {
            Mode::Train => &self.train,
            Mode::Forecast => &self.forecast,
        }
    }

    /// Load and validate a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::Json`] if it
    /// is malformed and [`Error::Config`] if validation fails.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory or file cannot be written.
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check that the configuration is coherent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty ensemble name or group column,
    /// or a date range whose start is after its end.
    pub fn validate(&self) -> Result<()> {
        if self.ensemble_name.trim().is_empty() {
            return Err(Error::config("ensemble_name", "must not be empty"));
        }
        if self.group_col.trim().is_empty() {
            return Err(Error::config("group_col", "must not be empty"));
        }
        for mode in [Mode::Train, Mode::Forecast] {
            let dates = self.source(mode).dates;
            if dates.start > dates.end {
                return Err(Error::config(
                    format!("{mode}.dates"),
                    format!("start {} is after end {}", dates.start, dates.end),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for [`ModelerConfig`].
#[derive(Debug)]
pub struct ModelerConfigBuilder {
    ensemble_name: String,
    train: Option<ModeSource>,
    forecast: Option<ModeSource>,
    group_col: String,
    format: TableFormat,
}

impl ModelerConfigBuilder {
    /// Create a builder with the default group column and CSV input
    #[must_use]
    pub fn new(ensemble_name: impl Into<String>) -> Self {
        Self {
            ensemble_name: ensemble_name.into(),
            train: None,
            forecast: None,
            group_col: default_group_col(),
            format: TableFormat::default(),
        }
    }

    /// Set the training data locations
    #[must_use]
    pub fn train(
        mut self,
        data_path: impl Into<PathBuf>,
        member_file: impl Into<PathBuf>,
        dates: DateRange,
    ) -> Self {
        self.train = Some(ModeSource {
            data_path: data_path.into(),
            member_file: member_file.into(),
            dates,
        });
        self
    }

    /// Set the forecast data locations
    #[must_use]
    pub fn forecast(
        mut self,
        data_path: impl Into<PathBuf>,
        member_file: impl Into<PathBuf>,
        dates: DateRange,
    ) -> Self {
        self.forecast = Some(ModeSource {
            data_path: data_path.into(),
            member_file: member_file.into(),
            dates,
        });
        self
    }

    /// Override the stratification column
    #[must_use]
    pub fn group_col(mut self, group_col: impl Into<String>) -> Self {
        self.group_col = group_col.into();
        self
    }

    /// Override the input table format
    #[must_use]
    pub const fn format(mut self, format: TableFormat) -> Self {
        self.format = format;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either mode's locations were never set or
    /// [`ModelerConfig::validate`] fails.
    pub fn build(self) -> Result<ModelerConfig> {
        let config = ModelerConfig {
            ensemble_name: self.ensemble_name,
            train: self
                .train
                .ok_or_else(|| Error::config("train", "training locations not set"))?,
            forecast: self
                .forecast
                .ok_or_else(|| Error::config("forecast", "forecast locations not set"))?,
            group_col: self.group_col,
            format: self.format,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2015, 5, d).unwrap()
    }

    fn config() -> ModelerConfig {
        ModelerConfig::builder("SSEF")
            .train("train/", "members.csv", DateRange::new(day(1), day(3)))
            .forecast("forecast/", "members.csv", DateRange::new(day(4), day(4)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let config = config();
        assert_eq!(config.group_col, DEFAULT_GROUP_COL);
        assert_eq!(config.format, TableFormat::Csv);
        assert_eq!(config.source(Mode::Forecast).dates.start, day(4));
    }

    #[test]
    fn test_missing_mode_is_rejected() {
        let err = ModelerConfig::builder("SSEF").build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_inverted_dates_are_rejected() {
        let err = ModelerConfig::builder("SSEF")
            .train("t", "m.csv", DateRange::new(day(5), day(1)))
            .forecast("f", "m.csv", DateRange::new(day(1), day(1)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("train.dates"));
    }

    #[test]
    fn test_empty_ensemble_is_rejected() {
        let mut config = config();
        config.ensemble_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_date_range_contains_is_inclusive() {
        let range = DateRange::new(day(1), day(3));
        assert!(range.contains(day(1)));
        assert!(range.contains(day(3)));
        assert!(!range.contains(day(4)));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = config();
        config.to_json_file(&path).unwrap();
        let loaded = ModelerConfig::from_json_file(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_group_col_defaults_when_absent_from_json() {
        let json = r#"{
            "ensemble_name": "SSEF",
            "train": {"data_path": "t", "member_file": "m.csv",
                      "dates": {"start": "2015-05-01", "end": "2015-05-02"}},
            "forecast": {"data_path": "f", "member_file": "m.csv",
                         "dates": {"start": "2015-05-03", "end": "2015-05-03"}}
        }"#;
        let config: ModelerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.group_col, DEFAULT_GROUP_COL);
        assert_eq!(config.format, TableFormat::Csv);
    }
}
