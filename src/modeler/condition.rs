//! Hail occurrence models

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{fit_classifiers, prediction_table, PredictionInputs, TrackModeler};
use crate::forecast::PredictionTable;
use crate::model::NamedClassifier;
use crate::registry::{ModelEntry, ModelFamily};
use crate::table::columns::{feature_matrix, float_values};
use crate::{Error, Result};

/// Columns and threshold for occurrence labels
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionSpec {
    /// Model inputs
    pub input_columns: Vec<String>,
    /// Column thresholded into the label
    pub output_column: String,
    /// A row is an event if its output exceeds this
    pub threshold: f64,
}

impl ConditionSpec {
    /// Label `Hail_Size > 0`
    #[must_use]
    pub fn new(input_columns: Vec<String>) -> Self {
        Self {
            input_columns,
            output_column: "Hail_Size".to_string(),
            threshold: 0.0,
        }
    }

    /// Label a different column or threshold
    #[must_use]
    pub fn with_output(mut self, column: impl Into<String>, threshold: f64) -> Self {
        self.output_column = column.into();
        self.threshold = threshold;
        self
    }
}

impl TrackModeler {
    /// Fit every template against each training group's step rows.
    ///
    /// # Errors
    /// Returns error if training data is not loaded, a column is missing, or
    /// a model fails to fit.
    pub fn fit_condition_models(
        &mut self,
        models: &[NamedClassifier],
        spec: &ConditionSpec,
    ) -> Result<()> {
        info!(models = models.len(), "fitting condition models");
        let (tables, groups) = self.training_groups()?;
        let mut fitted = Vec::new();
        for group in groups {
            let rows = tables.combo_for_group(self.group_col(), &group)?;
            if rows.num_rows() == 0 {
                warn!(group = %group, "no training rows");
                continue;
            }
            let inputs = feature_matrix(&rows, &spec.input_columns, "combo")?;
            let labels: Vec<i64> = float_values(&rows, &spec.output_column, "combo")?
                .into_iter()
                .map(|v| i64::from(v > spec.threshold))
                .collect();
            let ones = labels.iter().filter(|&&l| l == 1).count();
            info!(group = %group, ones, zeros = labels.len() - ones, "condition labels");

            let group_models =
                fit_classifiers(&group, ModelFamily::Condition, models, &inputs, &labels)?;
            fitted.push((group, group_models));
        }
        for (group, models) in fitted {
            for (name, model) in models {
                self.registry
                    .insert(group.clone(), name, ModelEntry::Condition { model });
            }
        }
        Ok(())
    }

    /// Event probability per step row, one table per group with one column
    /// per model name.
    ///
    /// # Errors
    /// Returns [`crate::Error::ModelNotFound`] if a group lacks one of
    /// `model_names`, or error if the data or columns are missing.
    pub fn predict_condition_models(
        &self,
        model_names: &[String],
        request: &PredictionInputs,
    ) -> Result<BTreeMap<String, PredictionTable>> {
        let mut predictions = BTreeMap::new();
        for group in self.registry.groups(ModelFamily::Condition) {
            let Some(rows) = self.prediction_rows(&group, request.mode)? else {
                continue;
            };
            let inputs = feature_matrix(&rows, &request.input_columns, "combo")?;
            let mut table = prediction_table(&rows, request)?;
            for name in model_names {
                let entry = self.entry(ModelFamily::Condition, &group, name)?;
                let ModelEntry::Condition { model } = entry else {
                    return Err(Error::Fit(format!(
                        "Entry for `{name}` in group {group} is not a condition classifier"
                    )));
                };
                let proba = model.predict_proba(&inputs)?;
                let positive = match model.classes().iter().position(|&c| c == 1) {
                    Some(c) => proba.column(c).iter().copied().collect(),
                    None => vec![0.0; proba.nrows()],
                };
                table.push_column(name, positive)?;
            }
            predictions.insert(group, table);
        }
        Ok(predictions)
    }
}
