//! Track offset models
//!
//! Start-time and translation errors are only meaningful for single-step
//! segments, so merged or split steps (`Duration_Step != 1`) are left out of
//! training.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{fit_classifiers, prediction_table, PredictionInputs, TrackModeler};
use crate::codec::OutputGrid;
use crate::forecast::ModelTables;
use crate::model::NamedClassifier;
use crate::registry::{ModelEntry, ModelFamily, TrackOffset};
use crate::table::columns::{feature_matrix, filter_rows, float_values};
use crate::table::DURATION_STEP;
use crate::Result;

/// Error column recorded for `offset` in the per-track table
#[must_use]
pub const fn default_label_column(offset: TrackOffset) -> &'static str {
    match offset {
        TrackOffset::StartTime => "Start_Time_Error",
        TrackOffset::TranslationX => "Translation_Error_X",
        TrackOffset::TranslationY => "Translation_Error_Y",
    }
}

/// Label column and buckets for one offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOffsetSpec {
    /// Offset dimension
    pub offset: TrackOffset,
    /// Continuous error column
    pub output_column: String,
    /// Error buckets; values outside are clipped
    pub grid: OutputGrid,
}

impl TrackOffsetSpec {
    /// Bucket the standard error column for `offset`
    #[must_use]
    pub fn new(offset: TrackOffset, grid: OutputGrid) -> Self {
        Self {
            offset,
            output_column: default_label_column(offset).to_string(),
            grid,
        }
    }

    /// Bucket a different column
    #[must_use]
    pub fn with_output_column(mut self, column: impl Into<String>) -> Self {
        self.output_column = column.into();
        self
    }
}

/// Inputs and per-offset labels for track models
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSpec {
    /// Model inputs
    pub input_columns: Vec<String>,
    /// One entry per offset to model
    pub offsets: Vec<TrackOffsetSpec>,
}

impl TrackModeler {
    /// Fit every template against each offset's bucketed errors on each
    /// training group's single-step rows.
    ///
    /// # Errors
    /// Returns error if training data is not loaded, a column is missing, or
    /// a model fails to fit.
    pub fn fit_track_models(&mut self, models: &[NamedClassifier], spec: &TrackSpec) -> Result<()> {
        info!(models = models.len(), offsets = spec.offsets.len(), "fitting track models");
        let (tables, groups) = self.training_groups()?;
        let mut fitted = Vec::new();
        for group in groups {
            let rows = tables.combo_for_group(self.group_col(), &group)?;
            if rows.num_rows() == 0 {
                warn!(group = %group, "no training rows");
                continue;
            }
            let durations = float_values(&rows, DURATION_STEP, "combo")?;
            let single_step = durations.iter().map(|&d| (d - 1.0).abs() < f64::EPSILON);
            let rows = filter_rows(&rows, single_step.collect())?;
            if rows.num_rows() == 0 {
                warn!(group = %group, "no single-step rows for track models");
                continue;
            }
            let inputs = feature_matrix(&rows, &spec.input_columns, "combo")?;

            let mut per_offset = Vec::with_capacity(spec.offsets.len());
            for offset_spec in &spec.offsets {
                let labels: Vec<i64> = float_values(&rows, &offset_spec.output_column, "combo")?
                    .into_iter()
                    .map(|v| offset_spec.grid.discretize(v))
                    .collect();
                let family = ModelFamily::Track(offset_spec.offset);
                let group_models = fit_classifiers(&group, family, models, &inputs, &labels)?;
                per_offset.push((offset_spec.offset, offset_spec.grid, group_models));
            }
            fitted.push((group, per_offset));
        }
        for (group, per_offset) in fitted {
            for (offset, grid, models) in per_offset {
                for (name, model) in models {
                    self.registry.insert(
                        group.clone(),
                        name,
                        ModelEntry::Track {
                            offset,
                            model,
                            grid,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Offset PDFs per step row for every offset with fitted models: offset →
    /// group → model → table with one `{model}_{offset:02}` column per bucket.
    ///
    /// # Errors
    /// Returns [`crate::Error::ModelNotFound`] for an unknown model name,
    /// [`crate::Error::ClassNotInGrid`] if a model predicts an off-grid
    /// class, or error if the data or columns are missing.
    pub fn predict_track_models(
        &self,
        model_names: &[String],
        request: &PredictionInputs,
    ) -> Result<BTreeMap<TrackOffset, ModelTables>> {
        let mut predictions = BTreeMap::new();
        for offset in TrackOffset::ALL {
            let family = ModelFamily::Track(offset);
            let groups = self.registry.groups(family);
            if groups.is_empty() {
                continue;
            }
            let mut by_group = BTreeMap::new();
            for group in groups {
                let Some(rows) = self.prediction_rows(&group, request.mode)? else {
                    continue;
                };
                let inputs = feature_matrix(&rows, &request.input_columns, "combo")?;
                let mut by_model = BTreeMap::new();
                for name in model_names {
                    info!(group = %group, %offset, model = %name, "predicting track offset");
                    let (columns, pdf) = self.predict_pdf(family, &group, name, &inputs)?;
                    let mut table = prediction_table(&rows, request)?;
                    table.push_matrix(&columns, &pdf)?;
                    by_model.insert(name.clone(), table);
                }
                by_group.insert(group, by_model);
            }
            predictions.insert(offset, by_group);
        }
        Ok(predictions)
    }
}
