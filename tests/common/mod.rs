//! Shared fixtures for integration tests
//!
//! Lays out a small ensemble run the way upstream tools write it: per-run
//! track tables, a member file, and one GeoJSON feature collection per track.

#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use hailcast::config::{DateRange, ModelerConfig, TableFormat};
use parquet::arrow::ArrowWriter;
use serde_json::json;

pub const RUN_DATE: &str = "20150506";

pub const TRACK_IDS: [&str; 4] = [
    "SSEF_m1_20150506_12_15_t1",
    "SSEF_m1_20150506_12_15_t2",
    "SSEF_m2_20150506_12_15_t3",
    "SSEF_m2_20150506_12_15_t4",
];

pub const STEPS_PER_TRACK: usize = 3;

/// Route library logs to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 5, d).unwrap()
}

fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), false))
        .collect();
    RecordBatch::try_new(
        Arc::new(Schema::new(fields)),
        columns.into_iter().map(|(_, a)| a).collect(),
    )
    .unwrap()
}

fn strings(values: &[&str]) -> ArrayRef {
    Arc::new(StringArray::from(values.to_vec()))
}

fn floats(values: &[f64]) -> ArrayRef {
    Arc::new(Float64Array::from(values.to_vec()))
}

/// `m1` (Thompson) tracks produce hail; `m2` (Morrison) tracks do not.
pub fn total_table() -> RecordBatch {
    batch(vec![
        ("Track_ID", strings(&TRACK_IDS)),
        ("Ensemble_Name", strings(&["SSEF"; 4])),
        ("Ensemble_Member", strings(&["m1", "m1", "m2", "m2"])),
        ("Duration", floats(&[3.0; 4])),
        ("Start_Time_Error", floats(&[1.0, 3.0, -2.0, 0.0])),
        ("Translation_Error_X", floats(&[10.0, 30.0, -5.0, 5.0])),
        ("Translation_Error_Y", floats(&[0.0, 4.0, 1.0, 1.0])),
    ])
}

#[allow(clippy::cast_precision_loss)]
pub fn step_table() -> RecordBatch {
    let mut step_ids = Vec::new();
    let mut step_tracks = Vec::new();
    let mut feature = Vec::new();
    let mut hail = Vec::new();
    let mut shape = Vec::new();
    let mut scale = Vec::new();
    for (t, track) in TRACK_IDS.iter().enumerate() {
        for s in 0..STEPS_PER_TRACK {
            step_ids.push(format!("{track}_{s}"));
            step_tracks.push(*track);
            let wet = t < 2;
            let jitter = (t * STEPS_PER_TRACK + s) as f64 * 0.1;
            feature.push(if wet { 10.0 + jitter } else { 1.0 + jitter });
            hail.push(if wet { [12.0, 23.0, 7.0][s] } else { 0.0 });
            shape.push(if wet { 2.0 + jitter } else { 0.0 });
            scale.push(if wet { 5.0 + jitter } else { 0.0 });
        }
    }
    let step_id_refs: Vec<&str> = step_ids.iter().map(String::as_str).collect();
    batch(vec![
        ("Step_ID", strings(&step_id_refs)),
        ("Track_ID", strings(&step_tracks)),
        ("Feature", floats(&feature)),
        ("Hail_Size", floats(&hail)),
        ("Shape", floats(&shape)),
        ("Location", floats(&[6.0; 12])),
        ("Scale", floats(&scale)),
        ("Duration", floats(&[1.0, 1.0, 2.0].repeat(4))),
    ])
}

pub fn member_table() -> RecordBatch {
    batch(vec![
        ("Ensemble_Member", strings(&["m1", "m2"])),
        ("Microphysics", strings(&["Thompson", "Morrison"])),
    ])
}

pub fn write_csv(path: &Path, batch: &RecordBatch) {
    let mut writer = arrow::csv::Writer::new(File::create(path).unwrap());
    writer.write(batch).unwrap();
}

pub fn write_parquet(path: &Path, batch: &RecordBatch) {
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

/// One run laid out on disk.
pub struct RunFixture {
    pub root: tempfile::TempDir,
}

impl RunFixture {
    /// Write the run's tables in `format` plus a decoy run outside the
    /// configured dates.
    pub fn new(format: TableFormat) -> Self {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        fs::create_dir_all(&data).unwrap();
        let ext = format.extension();
        let write = |name: String, batch: &RecordBatch| match format {
            TableFormat::Csv => write_csv(&data.join(name), batch),
            TableFormat::Parquet => write_parquet(&data.join(name), batch),
        };
        write(format!("track_total_SSEF_{RUN_DATE}.{ext}"), &total_table());
        write(format!("track_step_SSEF_{RUN_DATE}.{ext}"), &step_table());
        write(format!("track_total_SSEF_20150601.{ext}"), &total_table());
        write_csv(&root.path().join("members.csv"), &member_table());
        Self { root }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    pub fn member_file(&self) -> PathBuf {
        self.root.path().join("members.csv")
    }

    pub fn json_dir(&self) -> PathBuf {
        self.root.path().join("json")
    }

    pub fn config(&self, format: TableFormat) -> ModelerConfig {
        ModelerConfig::builder("SSEF")
            .train(self.data_dir(), self.member_file(), DateRange::new(day(1), day(20)))
            .forecast(self.data_dir(), self.member_file(), DateRange::new(day(6), day(6)))
            .format(format)
            .build()
            .unwrap()
    }

    /// Path the upstream tools use for a track's GeoJSON
    pub fn track_json_path(&self, track_id: &str) -> PathBuf {
        let parts: Vec<&str> = track_id.split('_').collect();
        let member = parts[1];
        let num = parts[parts.len() - 1];
        self.json_dir()
            .join(RUN_DATE)
            .join(member)
            .join(format!("SSEF_{RUN_DATE}_{member}_model_track_{num}.json"))
    }

    /// Write a feature collection with one feature per step for each track.
    pub fn write_track_json(&self, track_ids: &[&str]) {
        for track_id in track_ids {
            let features: Vec<_> = (0..STEPS_PER_TRACK)
                .map(|s| {
                    json!({
                        "type": "Feature",
                        "geometry": {"type": "Point", "coordinates": [-97.5, 35.2]},
                        "properties": {
                            "valid_time": format!("2015-05-06T{:02}:00:00", 12 + s),
                            "attributes": {"masks": [[0, 1], [1, 1]]}
                        }
                    })
                })
                .collect();
            let collection = json!({"type": "FeatureCollection", "features": features});
            let path = self.track_json_path(track_id);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, serde_json::to_vec(&collection).unwrap()).unwrap();
        }
    }
}
