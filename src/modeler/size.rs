//! Discretized hail size models

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{fit_classifiers, prediction_table, PredictionInputs, TrackModeler};
use crate::codec::OutputGrid;
use crate::forecast::ModelTables;
use crate::model::NamedClassifier;
use crate::registry::{ModelEntry, ModelFamily};
use crate::table::columns::{feature_matrix, filter_rows, float_values};
use crate::Result;

/// Columns and buckets for size labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeSpec {
    /// Model inputs
    pub input_columns: Vec<String>,
    /// Continuous size column
    pub output_column: String,
    /// Size buckets; rows below the grid start are not hail
    pub grid: OutputGrid,
}

impl SizeSpec {
    /// Bucket `Hail_Size` on `grid`
    #[must_use]
    pub fn new(input_columns: Vec<String>, grid: OutputGrid) -> Self {
        Self {
            input_columns,
            output_column: "Hail_Size".to_string(),
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

impl TrackModeler {
    /// Fit every template against bucketed sizes of each training group's
    /// hail-producing step rows.
    ///
    /// # Errors
    /// Returns error if training data is not loaded, a column is missing, or
    /// a model fails to fit.
    pub fn fit_size_models(&mut self, models: &[NamedClassifier], spec: &SizeSpec) -> Result<()> {
        info!(models = models.len(), grid = ?spec.grid.values(), "fitting size models");
        let (tables, groups) = self.training_groups()?;
        #[allow(clippy::cast_precision_loss)]
        let floor = spec.grid.start() as f64;
        let mut fitted = Vec::new();
        for group in groups {
            let rows = tables.combo_for_group(self.group_col(), &group)?;
            let rows = if rows.num_rows() == 0 {
                rows
            } else {
                let sizes = float_values(&rows, &spec.output_column, "combo")?;
                filter_rows(&rows, sizes.iter().map(|&s| s >= floor).collect())?
            };
            if rows.num_rows() == 0 {
                warn!(group = %group, "no hail rows for size models");
                continue;
            }
            let inputs = feature_matrix(&rows, &spec.input_columns, "combo")?;
            let labels: Vec<i64> = float_values(&rows, &spec.output_column, "combo")?
                .into_iter()
                .map(|v| spec.grid.discretize(v))
                .collect();

            let group_models = fit_classifiers(&group, ModelFamily::Size, models, &inputs, &labels)?;
            fitted.push((group, group_models));
        }
        for (group, models) in fitted {
            for (name, model) in models {
                self.registry.insert(
                    group.clone(),
                    name,
                    ModelEntry::Size {
                        model,
                        grid: spec.grid,
                    },
                );
            }
        }
        Ok(())
    }

    /// Size PDF per step row: one table per group and model with one
    /// `{model}_{size:02}` column per grid bucket.
    ///
    /// # Errors
    /// Returns [`crate::Error::ModelNotFound`] for an unknown model name,
    /// [`crate::Error::ClassNotInGrid`] if a model predicts an off-grid
    /// class, or error if the data or columns are missing.
    pub fn predict_size_models(
        &self,
        model_names: &[String],
        request: &PredictionInputs,
    ) -> Result<ModelTables> {
        let mut predictions = BTreeMap::new();
        for group in self.registry.groups(ModelFamily::Size) {
            let Some(rows) = self.prediction_rows(&group, request.mode)? else {
                continue;
            };
            let inputs = feature_matrix(&rows, &request.input_columns, "combo")?;
            let mut by_model = BTreeMap::new();
            for name in model_names {
                info!(group = %group, model = %name, "predicting size");
                let (columns, pdf) = self.predict_pdf(ModelFamily::Size, &group, name, &inputs)?;
                let mut table = prediction_table(&rows, request)?;
                table.push_matrix(&columns, &pdf)?;
                by_model.insert(name.clone(), table);
            }
            predictions.insert(group, by_model);
        }
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::modeler;
    use super::*;
    use crate::model::GaussianNaiveBayes;

    fn spec() -> SizeSpec {
        SizeSpec::new(vec!["Feature".to_string()], OutputGrid::new(5, 5, 20).unwrap())
    }

    fn fit() -> TrackModeler {
        let mut modeler = modeler();
        let models = [NamedClassifier::classifier("Naive Bayes", GaussianNaiveBayes::default())];
        modeler.fit_size_models(&models, &spec()).unwrap();
        modeler
    }

    #[test]
    fn test_groups_without_hail_are_skipped() {
        let modeler = fit();
        assert_eq!(modeler.registry().groups(ModelFamily::Size), vec!["Thompson"]);
    }

    #[test]
    fn test_labels_are_clipped_and_bucketed() {
        let modeler = fit();
        let entry = modeler
            .registry()
            .get(ModelFamily::Size, "Thompson", "Naive Bayes")
            .unwrap();
        // sizes 12, 23, 7 -> 10, 20, 5
        assert_eq!(entry.classifier().unwrap().classes(), &[5, 10, 20]);
        assert_eq!(entry.grid().unwrap().values(), vec![5, 10, 15, 20]);
    }

    #[test]
    fn test_predicted_pdf_covers_full_grid() {
        let modeler = fit();
        let request = PredictionInputs::new(vec!["Feature".to_string()], vec!["Track_ID".to_string()]);
        let predictions = modeler
            .predict_size_models(&["Naive Bayes".to_string()], &request)
            .unwrap();

        assert!(!predictions.contains_key("Morrison"));
        let table = &predictions["Thompson"]["Naive Bayes"];
        assert_eq!(
            table.prediction_columns(),
            &[
                "Naive-Bayes_05".to_string(),
                "Naive-Bayes_10".to_string(),
                "Naive-Bayes_15".to_string(),
                "Naive-Bayes_20".to_string()
            ]
        );
        assert!(table
            .column_values("Naive-Bayes_15")
            .unwrap()
            .iter()
            .all(|p| *p == 0.0));
        for row in 0..table.num_rows() {
            let mass: f64 = table
                .prediction_columns()
                .iter()
                .map(|c| table.column_values(c).unwrap()[row])
                .sum();
            assert!((mass - 1.0).abs() < 1e-9);
        }
    }
}
