//! Track table file discovery
//!
//! Upstream writes one file per run date and kind, e.g.
//! `track_total_SSEF_20150506.csv` and `track_step_SSEF_20150506.csv`. The
//! run date is always the last `_`-separated component of the file stem.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::{DateRange, TableFormat};
use crate::{Error, Result};

/// Which of the two per-run tables a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// One row per track
    Total,
    /// One row per track timestep
    Step,
}

impl TableKind {
    /// File-name marker preceding the ensemble name
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Step => "step",
        }
    }
}

/// File-name matcher for one table kind of one ensemble.
#[derive(Debug, Clone)]
pub struct TrackFilePattern {
    regex: Regex,
}

impl TrackFilePattern {
    /// Build the matcher for `kind` files of `ensemble` in `format`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if the pattern cannot be compiled.
    pub fn new(kind: TableKind, ensemble: &str, format: TableFormat) -> Result<Self> {
        let pattern = format!(
            r"{}_{}.*_(\d{{8}})\.{}$",
            kind.marker(),
            regex::escape(ensemble),
            format.extension()
        );
        let regex = Regex::new(&pattern)
            .map_err(|e| Error::InvalidInput(format!("Bad track file pattern {pattern}: {e}")))?;
        Ok(Self { regex })
    }

    /// Run date encoded in `file_name`, if it matches.
    #[must_use]
    pub fn run_date(&self, file_name: &str) -> Option<NaiveDate> {
        let captures = self.regex.captures(file_name)?;
        NaiveDate::parse_from_str(captures.get(1)?.as_str(), "%Y%m%d").ok()
    }
}

/// Sorted paths in `dir` matching `pattern` whose run date lies in `dates`.
///
/// A missing directory yields no files.
///
/// # Errors
/// Returns [`Error::Io`] if an existing directory cannot be listed.
pub fn discover(dir: &Path, pattern: &TrackFilePattern, dates: &DateRange) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "track data directory does not exist");
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match pattern.run_date(name) {
            Some(date) if dates.contains(date) => files.push(path),
            Some(date) => debug!(file = name, %date, "outside run date range"),
            None => {}
        }
    }
    files.sort();
    Ok(files)
}
