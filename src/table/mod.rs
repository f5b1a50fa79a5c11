//! Table join pipeline (Arrow)
//!
//! Loads the per-track (`total`) and per-timestep (`step`) tables for one
//! [`Mode`], attaches ensemble-member metadata, and exposes two joined views:
//!
//! ```text
//! step ──(Track_ID, suffixes _Step/_Total)──> step×total ──(Ensemble_Member)──> combo
//! total ──────────────────(Ensemble_Member)────────────────────────────────────> total_group
//! ```
//!
//! Every row of `combo` and `total_group` carries exactly one group label,
//! because the member table is validated to map each member once.

pub mod columns;
pub mod discovery;
pub mod join;

use std::collections::HashSet;
use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::compute;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, info};

use crate::config::{Mode, ModelerConfig, TableFormat};
use crate::{Error, Result};
use columns::{concat_tables, normalize, rows_equal, string_values, unique_strings};
use discovery::{discover, TableKind, TrackFilePattern};
use join::{dedupe_on, inner_join, JoinSide};

/// Track identifier column shared by both tables
pub const TRACK_ID: &str = "Track_ID";
/// Timestep identifier column in the step table
pub const STEP_ID: &str = "Step_ID";
/// Member identifier joining tracks to the member table
pub const ENSEMBLE_MEMBER: &str = "Ensemble_Member";
/// Ensemble name column in the total table
pub const ENSEMBLE_NAME: &str = "Ensemble_Name";
/// Step duration after the step×total join (merged/split segments exceed 1)
pub const DURATION_STEP: &str = "Duration_Step";
/// Suffix for step-table columns that also exist in the total table
pub const STEP_SUFFIX: &str = "_Step";
/// Suffix for total-table columns that also exist in the step table
pub const TOTAL_SUFFIX: &str = "_Total";

/// Loaded and joined tables for one mode.
#[derive(Debug, Clone)]
pub struct TrackTables {
    /// One row per track
    pub total: RecordBatch,
    /// One row per track timestep
    pub step: RecordBatch,
    /// Member → group mapping
    pub member: RecordBatch,
    /// step × total × member
    pub combo: RecordBatch,
    /// total × member
    pub total_group: RecordBatch,
}

impl TrackTables {
    /// Discover, load and join the tables for `mode`.
    ///
    /// Files outside the configured date range are ignored; no matching
    /// files gives empty views rather than an error. Forecast step tables are
    /// de-duplicated on `Step_ID` because reprocessed runs repeat steps.
    ///
    /// # Errors
    /// Returns error if a matched file or the member table cannot be read, or
    /// the member table fails validation.
    pub fn load(config: &ModelerConfig, mode: Mode) -> Result<Self> {
        let source = config.source(mode);
        let total_pattern =
            TrackFilePattern::new(TableKind::Total, &config.ensemble_name, config.format)?;
        let step_pattern =
            TrackFilePattern::new(TableKind::Step, &config.ensemble_name, config.format)?;
        let total_files = discover(&source.data_path, &total_pattern, &source.dates)?;
        let step_files = discover(&source.data_path, &step_pattern, &source.dates)?;
        info!(
            %mode,
            start = %source.dates.start,
            end = %source.dates.end,
            total_files = total_files.len(),
            step_files = step_files.len(),
            "loading track tables"
        );

        let total = concat_tables(
            &total_files
                .iter()
                .map(|p| read_table(p, config.format))
                .collect::<Result<Vec<_>>>()?,
        )?;
        let step = concat_tables(
            &step_files
                .iter()
                .map(|p| read_table(p, config.format))
                .collect::<Result<Vec<_>>>()?,
        )?;
        let member = read_table(&source.member_file, TableFormat::Csv)?;

        Self::from_tables(total, step, member, &config.group_col, mode == Mode::Forecast)
    }

    /// Join already-loaded tables.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateMember`] if a member maps to more than one
    /// row, [`Error::InvalidInput`] for an empty group label, or
    /// [`Error::MissingColumn`] if a join key is absent from a populated table.
    pub fn from_tables(
        total: RecordBatch,
        step: RecordBatch,
        member: RecordBatch,
        group_col: &str,
        dedupe_steps: bool,
    ) -> Result<Self> {
        validate_members(&member, group_col)?;
        let step = if dedupe_steps {
            let before = step.num_rows();
            let deduped = dedupe_on(&step, STEP_ID, "step")?;
            debug!(dropped = before - deduped.num_rows(), "dropped duplicate steps");
            deduped
        } else {
            step
        };

        let step_total = inner_join(
            JoinSide::new(&step, "step", STEP_SUFFIX),
            JoinSide::new(&total, "total", TOTAL_SUFFIX),
            TRACK_ID,
        )?;
        let combo = inner_join(
            JoinSide::new(&step_total, "step_total", "_x"),
            JoinSide::new(&member, "member", "_y"),
            ENSEMBLE_MEMBER,
        )?;
        let total_group = inner_join(
            JoinSide::new(&total, "total", "_x"),
            JoinSide::new(&member, "member", "_y"),
            ENSEMBLE_MEMBER,
        )?;
        info!(
            steps = step.num_rows(),
            tracks = total.num_rows(),
            combo_rows = combo.num_rows(),
            total_group_rows = total_group.num_rows(),
            "joined track tables"
        );

        Ok(Self {
            total,
            step,
            member,
            combo,
            total_group,
        })
    }

    /// Group labels from the member table, in first-appearance order
    ///
    /// # Errors
    /// Returns error if a populated member table lacks `group_col`.
    pub fn groups(&self, group_col: &str) -> Result<Vec<String>> {
        unique_strings(&self.member, group_col, "member")
    }

    /// `combo` rows belonging to `group`
    ///
    /// # Errors
    /// Returns error if populated `combo` lacks `group_col`.
    pub fn combo_for_group(&self, group_col: &str, group: &str) -> Result<RecordBatch> {
        rows_equal(&self.combo, group_col, group, "combo")
    }

    /// `total_group` rows belonging to `group`
    ///
    /// # Errors
    /// Returns error if populated `total_group` lacks `group_col`.
    pub fn tracks_for_group(&self, group_col: &str, group: &str) -> Result<RecordBatch> {
        rows_equal(&self.total_group, group_col, group, "total_group")
    }
}

fn validate_members(member: &RecordBatch, group_col: &str) -> Result<()> {
    if member.num_rows() == 0 {
        return Ok(());
    }
    let members = string_values(member, ENSEMBLE_MEMBER, "member")?;
    let groups = string_values(member, group_col, "member")?;
    let mut seen = HashSet::new();
    for (m, g) in members.iter().zip(&groups) {
        let m = m
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("Member table has an empty member id".to_string()))?;
        if g.as_deref().map_or(true, |g| g.trim().is_empty()) {
            return Err(Error::InvalidInput(format!(
                "Member {m} has no {group_col} label"
            )));
        }
        if !seen.insert(m) {
            return Err(Error::DuplicateMember(m.to_string()));
        }
    }
    Ok(())
}

/// Read one table file and normalize its numeric columns.
///
/// # Errors
/// Returns error if the file cannot be opened or parsed.
pub fn read_table(path: &Path, format: TableFormat) -> Result<RecordBatch> {
    let batch = match format {
        TableFormat::Csv => read_csv(path)?,
        TableFormat::Parquet => read_parquet(path)?,
    };
    debug!(file = %path.display(), rows = batch.num_rows(), "read table");
    normalize(&batch)
}

fn read_csv(path: &Path) -> Result<RecordBatch> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(&mut file, None)?;
    file.rewind()?;
    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_format(format)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(compute::concat_batches(&schema, &batches)?)
}

fn read_parquet(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = Arc::clone(builder.schema());
    let reader = builder.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(compute::concat_batches(&schema, &batches)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::columns::float_values;

    fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn tables(dedupe: bool) -> TrackTables {
        let dir = tempfile::tempdir().unwrap();
        let total = write(
            dir.path(),
            "total.csv",
            "Track_ID,Ensemble_Name,Ensemble_Member,Duration\n\
             SSEF_20150506_t1,SSEF,m1,2\n\
             SSEF_20150506_t2,SSEF,m2,1\n",
        );
        let step = write(
            dir.path(),
            "step.csv",
            "Step_ID,Track_ID,Hail_Size,Duration\n\
             a,SSEF_20150506_t1,12,1\n\
             b,SSEF_20150506_t1,,1\n\
             b,SSEF_20150506_t1,,1\n\
             c,SSEF_20150506_t2,30,1\n",
        );
        let member = write(
            dir.path(),
            "member.csv",
            "Ensemble_Member,Microphysics\nm1,Thompson\nm2,Morrison\n",
        );
        TrackTables::from_tables(
            read_table(&total, TableFormat::Csv).unwrap(),
            read_table(&step, TableFormat::Csv).unwrap(),
            read_table(&member, TableFormat::Csv).unwrap(),
            "Microphysics",
            dedupe,
        )
        .unwrap()
    }

    #[test]
    fn test_combo_rows_carry_member_group() {
        let tables = tables(false);
        assert_eq!(tables.combo.num_rows(), 4);
        let tracks = string_values(&tables.combo, TRACK_ID, "combo").unwrap();
        let groups = string_values(&tables.combo, "Microphysics", "combo").unwrap();
        for (t, g) in tracks.iter().zip(&groups) {
            let expected = if t.as_deref() == Some("SSEF_20150506_t1") {
                "Thompson"
            } else {
                "Morrison"
            };
            assert_eq!(g.as_deref(), Some(expected));
        }
        assert!(tables.combo.column_by_name(DURATION_STEP).is_some());
    }

    #[test]
    fn test_missing_values_become_zero() {
        let tables = tables(false);
        let sizes = float_values(&tables.combo, "Hail_Size", "combo").unwrap();
        assert_eq!(sizes, vec![12.0, 0.0, 0.0, 30.0]);
    }

    #[test]
    fn test_forecast_dedupes_steps() {
        let tables = tables(true);
        assert_eq!(tables.step.num_rows(), 3);
        assert_eq!(tables.combo.num_rows(), 3);
    }

    #[test]
    fn test_groups_and_group_views() {
        let tables = tables(false);
        assert_eq!(
            tables.groups("Microphysics").unwrap(),
            vec!["Thompson", "Morrison"]
        );
        assert_eq!(
            tables.combo_for_group("Microphysics", "Thompson").unwrap().num_rows(),
            3
        );
        assert_eq!(
            tables.tracks_for_group("Microphysics", "Morrison").unwrap().num_rows(),
            1
        );
    }

    #[test]
    fn test_duplicate_member_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let member = write(
            dir.path(),
            "member.csv",
            "Ensemble_Member,Microphysics\nm1,Thompson\nm1,Morrison\n",
        );
        let err = TrackTables::from_tables(
            columns::empty_batch(),
            columns::empty_batch(),
            read_table(&member, TableFormat::Csv).unwrap(),
            "Microphysics",
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateMember(m) if m == "m1"));
    }

    #[test]
    fn test_empty_inputs_give_empty_views() {
        let dir = tempfile::tempdir().unwrap();
        let member = write(
            dir.path(),
            "member.csv",
            "Ensemble_Member,Microphysics\nm1,Thompson\n",
        );
        let tables = TrackTables::from_tables(
            columns::empty_batch(),
            columns::empty_batch(),
            read_table(&member, TableFormat::Csv).unwrap(),
            "Microphysics",
            true,
        )
        .unwrap();
        assert_eq!(tables.combo.num_rows(), 0);
        assert_eq!(tables.total_group.num_rows(), 0);
        assert_eq!(
            tables.combo_for_group("Microphysics", "Thompson").unwrap().num_rows(),
            0
        );
    }
}
