//! Prediction tables
//!
//! A [`PredictionTable`] is the metadata columns of the rows a model was
//! applied to, followed by one `Float64` column per prediction output. Rows
//! stay in the order of the joined step view, so the rows of one track line
//! up with that track's GeoJSON features.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use nalgebra::DMatrix;

use crate::registry::TrackOffset;
use crate::table::columns::{float_values, string_values};
use crate::table::TRACK_ID;
use crate::{Error, Result};

/// Metadata plus prediction columns for one group (and model).
#[derive(Debug, Clone)]
pub struct PredictionTable {
    batch: RecordBatch,
    prediction_columns: Vec<String>,
}

impl PredictionTable {
    /// Start from the metadata columns of the predicted rows.
    #[must_use]
    pub fn new(metadata: RecordBatch) -> Self {
        Self {
            batch: metadata,
            prediction_columns: Vec::new(),
        }
    }

    /// Append (or replace) one prediction column.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if `values` does not have one entry per row.
    pub fn push_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.batch.num_rows() {
            return Err(Error::InvalidInput(format!(
                "Prediction column {name} has {} values for {} rows",
                values.len(),
                self.batch.num_rows()
            )));
        }
        let schema = self.batch.schema();
        let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len() + 1);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len() + 1);
        for (field, column) in schema.fields().iter().zip(self.batch.columns()) {
            if field.name() != name {
                fields.push(field.as_ref().clone());
                columns.push(Arc::clone(column));
            }
        }
        fields.push(Field::new(name, DataType::Float64, false));
        columns.push(Arc::new(Float64Array::from(values)));
        self.batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        self.prediction_columns.retain(|c| c != name);
        self.prediction_columns.push(name.to_string());
        Ok(())
    }

    /// Append one column per matrix column.
    ///
    /// # Errors
    /// Returns error if the shape disagrees with `names` or the row count.
    pub fn push_matrix(&mut self, names: &[String], values: &DMatrix<f64>) -> Result<()> {
        if names.len() != values.ncols() {
            return Err(Error::InvalidInput(format!(
                "{} column names for {} prediction columns",
                names.len(),
                values.ncols()
            )));
        }
        for (name, column) in names.iter().zip(values.column_iter()) {
            self.push_column(name, column.iter().copied().collect())?;
        }
        Ok(())
    }

    /// Underlying Arrow batch
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of rows
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Names of the prediction columns, in insertion order
    #[must_use]
    pub fn prediction_columns(&self) -> &[String] {
        &self.prediction_columns
    }

    /// Prediction columns whose name contains `pattern`
    #[must_use]
    pub fn matching_columns(&self, pattern: &str) -> Vec<String> {
        self.prediction_columns
            .iter()
            .filter(|c| c.contains(pattern))
            .cloned()
            .collect()
    }

    /// Values of one column.
    ///
    /// # Errors
    /// Returns [`Error::MissingColumn`] if there is no such column.
    pub fn column_values(&self, name: &str) -> Result<Vec<f64>> {
        float_values(&self.batch, name, "predictions")
    }

    /// Row indices belonging to `track_id`, in table order.
    ///
    /// # Errors
    /// Returns [`Error::MissingColumn`] if the metadata lacks `Track_ID`.
    pub fn track_rows(&self, track_id: &str) -> Result<Vec<usize>> {
        Ok(string_values(&self.batch, TRACK_ID, "predictions")?
            .iter()
            .enumerate()
            .filter_map(|(i, v)| (v.as_deref() == Some(track_id)).then_some(i))
            .collect())
    }
}

/// Prediction tables for one family, by group then model name
pub type ModelTables = BTreeMap<String, BTreeMap<String, PredictionTable>>;

/// Everything the exporter injects into GeoJSON.
#[derive(Debug, Clone, Default)]
pub struct Forecasts {
    /// Condition probabilities: one table per group, one column per model
    pub condition: BTreeMap<String, PredictionTable>,
    /// Size PDFs
    pub size: ModelTables,
    /// Size-distribution parameters
    pub dist: ModelTables,
    /// Track-offset PDFs, per offset
    pub track: BTreeMap<TrackOffset, ModelTables>,
}
