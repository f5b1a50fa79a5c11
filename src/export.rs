//! Forecast export to GeoJSON
//!
//! Upstream writes one feature collection per track at
//! `{json_data_path}/{run_date}/{member}/{ensemble}_{run_date}_{member}_model_track_{n}.json`
//! whose features are the track's steps in order. Export copies each step's
//! predictions into the matching feature's properties, drops the bulky
//! `attributes` property, and writes the result to the same relative path
//! under `out_path`.
//!
//! Property keys are `condition_{model}`, `size_{model}`, `dist_{model}` and
//! `{offset}_{model}` with spaces in model names replaced by hyphens.
//! Condition values are scalars; every other family contributes the list of
//! its prediction columns whose name contains the hyphenated model name.
//!
//! Alignment is positional: the `n`-th prediction row of a track goes into
//! the `n`-th feature.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::codec::hyphenate;
use crate::forecast::{Forecasts, ModelTables, PredictionTable};
use crate::table::columns::string_values;
use crate::table::{ENSEMBLE_MEMBER, ENSEMBLE_NAME, TRACK_ID};
use crate::{Error, Result};

/// Property removed from every exported feature
const ATTRIBUTES: &str = "attributes";

/// Which model outputs to export, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    /// Condition model names
    pub condition_models: Vec<String>,
    /// Size model names
    pub size_models: Vec<String>,
    /// Size-distribution model names
    pub dist_models: Vec<String>,
    /// Track-offset model names (exported for every offset present)
    pub track_models: Vec<String>,
    /// Root of the upstream GeoJSON tree
    pub json_data_path: PathBuf,
    /// Root of the output tree
    pub out_path: PathBuf,
}

/// Outcome counts of one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Files written
    pub written: usize,
    /// Tracks skipped (missing or unusable source file, misaligned predictions)
    pub skipped: usize,
    /// Tracks whose output could not be written
    pub failed: usize,
}

impl ExportSummary {
    fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Written => self.written += 1,
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Failed => self.failed += 1,
        }
    }

    /// Tracks attempted
    #[must_use]
    pub const fn total(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Written,
    Skipped,
    Failed,
}

/// Per-step values for one property
#[derive(Debug, Clone, PartialEq)]
enum StepValues {
    Scalar(Vec<f64>),
    Vector(Vec<Vec<f64>>),
}

impl StepValues {
    fn len(&self) -> usize {
        match self {
            Self::Scalar(v) => v.len(),
            Self::Vector(v) => v.len(),
        }
    }

    fn value(&self, step: usize) -> Value {
        match self {
            Self::Scalar(v) => Value::from(v[step]),
            Self::Vector(v) => Value::from(v[step].clone()),
        }
    }
}

/// One prediction table with its columns pulled out and rows indexed by track.
#[derive(Debug)]
struct ExtractedTable {
    rows: HashMap<String, Vec<usize>>,
    columns: Vec<Vec<f64>>,
    scalar: bool,
}

impl ExtractedTable {
    fn new(table: &PredictionTable, columns: &[String], scalar: bool) -> Result<Self> {
        let mut rows: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, id) in string_values(table.batch(), TRACK_ID, "predictions")?
            .into_iter()
            .enumerate()
        {
            if let Some(id) = id {
                rows.entry(id).or_default().push(i);
            }
        }
        let columns = columns
            .iter()
            .map(|c| table.column_values(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rows,
            columns,
            scalar,
        })
    }

    fn step_values(&self, track_id: &str) -> StepValues {
        let rows = self.rows.get(track_id).map_or(&[][..], Vec::as_slice);
        if self.scalar {
            let column = self.columns.first();
            StepValues::Scalar(
                rows.iter()
                    .map(|&r| column.map_or(0.0, |c| c[r]))
                    .collect(),
            )
        } else {
            StepValues::Vector(
                rows.iter()
                    .map(|&r| self.columns.iter().map(|c| c[r]).collect())
                    .collect(),
            )
        }
    }
}

/// Every table that feeds one property key, by group
#[derive(Debug)]
struct PropertySource {
    key: String,
    by_group: BTreeMap<String, ExtractedTable>,
}

/// Everything needed to write one track's file; owns its values.
#[derive(Debug, Clone, PartialEq)]
struct ExportUnit {
    track_id: String,
    relative_dir: PathBuf,
    file_name: String,
    properties: Vec<(String, StepValues)>,
}

/// Run date (first 8 characters of the fourth-from-last component) and track
/// number (last component) encoded in a track id.
fn parse_track_id(track_id: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = track_id.split('_').collect();
    if parts.len() < 4 {
        return None;
    }
    let run_date: String = parts[parts.len() - 4].chars().take(8).collect();
    let track_num = parts[parts.len() - 1].to_string();
    Some((run_date, track_num))
}

/// Writes forecast properties into per-track GeoJSON files.
#[derive(Debug)]
pub struct ForecastExporter<'a> {
    tracks: &'a RecordBatch,
    group_col: &'a str,
    forecasts: &'a Forecasts,
}

impl<'a> ForecastExporter<'a> {
    /// Export `forecasts` for each row of `tracks` (the forecast per-track
    /// view, which carries each track's group in `group_col`).
    #[must_use]
    pub const fn new(
        tracks: &'a RecordBatch,
        group_col: &'a str,
        forecasts: &'a Forecasts,
    ) -> Self {
        Self {
            tracks,
            group_col,
            forecasts,
        }
    }

    /// Export one track at a time.
    ///
    /// # Errors
    /// Returns error if the track table or a prediction table lacks an
    /// identifying column. Per-track problems are counted in the summary.
    pub fn export(&self, request: &ExportRequest) -> Result<ExportSummary> {
        let (units, unparsed) = self.units(request)?;
        let mut summary = ExportSummary {
            skipped: unparsed,
            ..ExportSummary::default()
        };
        for unit in &units {
            summary.record(write_unit(unit, &request.json_data_path, &request.out_path));
        }
        info!(
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed,
            "exported forecasts"
        );
        Ok(summary)
    }

    /// Export with one independent unit per track on a pool of `workers`
    /// threads, returning once every unit has finished.
    ///
    /// # Errors
    /// Returns [`Error::ThreadPool`] if the pool cannot be built, otherwise
    /// as [`export`](Self::export).
    pub fn export_parallel(&self, request: &ExportRequest, workers: usize) -> Result<ExportSummary> {
        let (units, unparsed) = self.units(request)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;
        let outcomes: Vec<UnitOutcome> = pool.install(|| {
            units
                .par_iter()
                .map(|unit| write_unit(unit, &request.json_data_path, &request.out_path))
                .collect()
        });
        let mut summary = ExportSummary {
            skipped: unparsed,
            ..ExportSummary::default()
        };
        for outcome in outcomes {
            summary.record(outcome);
        }
        info!(
            workers,
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed,
            "exported forecasts in parallel"
        );
        Ok(summary)
    }

    fn sources(&self, request: &ExportRequest) -> Result<Vec<PropertySource>> {
        let mut sources = Vec::new();
        for name in &request.condition_models {
            let mut by_group = BTreeMap::new();
            for (group, table) in &self.forecasts.condition {
                if table.prediction_columns().contains(name) {
                    by_group.insert(
                        group.clone(),
                        ExtractedTable::new(table, std::slice::from_ref(name), true)?,
                    );
                }
            }
            sources.push(PropertySource {
                key: format!("condition_{}", hyphenate(name)),
                by_group,
            });
        }
        for name in &request.size_models {
            sources.push(vector_source(format!("size_{}", hyphenate(name)), &self.forecasts.size, name)?);
        }
        for name in &request.dist_models {
            sources.push(vector_source(format!("dist_{}", hyphenate(name)), &self.forecasts.dist, name)?);
        }
        for (offset, tables) in &self.forecasts.track {
            for name in &request.track_models {
                sources.push(vector_source(format!("{offset}_{}", hyphenate(name)), tables, name)?);
            }
        }
        Ok(sources)
    }

    /// One unit per exportable track row, plus the number of rows skipped
    /// because they cannot be mapped to a file.
    fn units(&self, request: &ExportRequest) -> Result<(Vec<ExportUnit>, usize)> {
        let sources = self.sources(request)?;
        if self.tracks.num_rows() == 0 {
            return Ok((Vec::new(), 0));
        }
        let track_ids = string_values(self.tracks, TRACK_ID, "total_group")?;
        let ensembles = string_values(self.tracks, ENSEMBLE_NAME, "total_group")?;
        let members = string_values(self.tracks, ENSEMBLE_MEMBER, "total_group")?;
        let groups = string_values(self.tracks, self.group_col, "total_group")?;

        let mut units = Vec::with_capacity(track_ids.len());
        let mut skipped = 0;
        for row in 0..track_ids.len() {
            let (Some(track_id), Some(ensemble), Some(member), Some(group)) = (
                track_ids[row].as_deref(),
                ensembles[row].as_deref(),
                members[row].as_deref(),
                groups[row].as_deref(),
            ) else {
                warn!(
                    row,
                    track_id = ?track_ids[row],
                    member = ?members[row],
                    "track row is missing an identifier"
                );
                skipped += 1;
                continue;
            };
            let Some((run_date, track_num)) = parse_track_id(track_id) else {
                warn!(track_id, "cannot parse run date from track id");
                skipped += 1;
                continue;
            };
            let properties = sources
                .iter()
                .filter_map(|source| {
                    source
                        .by_group
                        .get(group)
                        .map(|table| (source.key.clone(), table.step_values(track_id)))
                })
                .collect();
            units.push(ExportUnit {
                track_id: track_id.to_string(),
                relative_dir: Path::new(&run_date).join(member),
                file_name: format!("{ensemble}_{run_date}_{member}_model_track_{track_num}.json"),
                properties,
            });
        }
        debug!(units = units.len(), skipped, "prepared export units");
        Ok((units, skipped))
    }
}

fn vector_source(key: String, tables: &ModelTables, name: &str) -> Result<PropertySource> {
    let pattern = hyphenate(name);
    let mut by_group = BTreeMap::new();
    for (group, models) in tables {
        if let Some(table) = models.get(name) {
            let columns = table.matching_columns(&pattern);
            by_group.insert(group.clone(), ExtractedTable::new(table, &columns, false)?);
        }
    }
    Ok(PropertySource { key, by_group })
}

/// Read, annotate and write one track file.
fn write_unit(unit: &ExportUnit, json_data_path: &Path, out_path: &Path) -> UnitOutcome {
    let source = json_data_path.join(&unit.relative_dir).join(&unit.file_name);
    let mut track: Value = match fs::read(&source)
        .map_err(Error::from)
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
    {
        Ok(track) => track,
        Err(e) => {
            warn!(file = %source.display(), error = %e, "skipping track without usable source file");
            return UnitOutcome::Skipped;
        }
    };
    let Some(features) = track.get_mut("features").and_then(Value::as_array_mut) else {
        warn!(file = %source.display(), "source file has no feature list");
        return UnitOutcome::Skipped;
    };
    if let Some((key, values)) = unit
        .properties
        .iter()
        .find(|(_, values)| values.len() < features.len())
    {
        warn!(
            track_id = %unit.track_id,
            property = %key,
            rows = values.len(),
            features = features.len(),
            "fewer prediction rows than features"
        );
        return UnitOutcome::Skipped;
    }

    for (step, feature) in features.iter_mut().enumerate() {
        let Some(feature) = feature.as_object_mut() else {
            continue;
        };
        let properties = feature
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(properties) = properties.as_object_mut() else {
            continue;
        };
        properties.remove(ATTRIBUTES);
        for (key, values) in &unit.properties {
            properties.insert(key.clone(), values.value(step));
        }
    }

    let dir = out_path.join(&unit.relative_dir);
    let target = dir.join(&unit.file_name);
    match fs::create_dir_all(&dir).and_then(|()| fs::write(&target, to_json(&track)?)) {
        Ok(()) => {
            debug!(file = %target.display(), "wrote forecast");
            UnitOutcome::Written
        }
        Err(e) => {
            error!(file = %target.display(), error = %e, "failed to write forecast");
            UnitOutcome::Failed
        }
    }
}

/// One-space indented JSON with object keys sorted.
fn to_json(value: &Value) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b" "));
    sort_keys(value).serialize(&mut serializer)?;
    Ok(out)
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
