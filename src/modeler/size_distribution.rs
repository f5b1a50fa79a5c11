//! Hail size distribution parameter models
//!
//! Regressors learn standardized log shape, location and scale. When the
//! location is held fixed upstream only shape and scale are modeled, and the
//! fixed location is put back at prediction time.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use tracing::{info, warn};

use super::{log_diagnostics, prediction_table, PredictionInputs, TrackModeler};
use crate::codec::hyphenate;
use crate::distribution::LogNormalParams;
use crate::forecast::ModelTables;
use crate::model::NamedRegressor;
use crate::registry::{ModelEntry, ModelFamily};
use crate::table::columns::{feature_matrix, filter_rows, float_values};
use crate::{Error, Result};

/// Location used when models only learn shape and scale
pub const DEFAULT_LOCATION: f64 = 6.0;

const PARAMETERS: [&str; 3] = ["shape", "location", "scale"];

/// Columns for distribution parameter labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeDistributionSpec {
    /// Model inputs
    pub input_columns: Vec<String>,
    /// Parameter columns; the last one is the scale
    pub output_columns: Vec<String>,
}

impl SizeDistributionSpec {
    /// Learn `Shape`, `Location` and `Scale`
    #[must_use]
    pub fn new(input_columns: Vec<String>) -> Self {
        Self {
            input_columns,
            output_columns: vec!["Shape".into(), "Location".into(), "Scale".into()],
        }
    }

    /// Learn a different parameter set (e.g. `Shape` and `Scale` only)
    #[must_use]
    pub fn with_output_columns(mut self, columns: Vec<String>) -> Self {
        self.output_columns = columns;
        self
    }
}

impl TrackModeler {
    /// Fit every template against standardized log parameters of each
    /// training group's rows with a positive scale.
    ///
    /// # Errors
    /// Returns error if training data is not loaded, `output_columns` is
    /// empty, a column is missing, or a model fails to fit.
    pub fn fit_size_distribution_models(
        &mut self,
        models: &[NamedRegressor],
        spec: &SizeDistributionSpec,
    ) -> Result<()> {
        let Some(scale_column) = spec.output_columns.last() else {
            return Err(Error::InvalidInput(
                "Size distribution needs at least one output column".to_string(),
            ));
        };
        info!(models = models.len(), outputs = ?spec.output_columns, "fitting size distribution models");
        let (tables, groups) = self.training_groups()?;
        let mut fitted = Vec::new();
        for group in groups {
            let rows = tables.combo_for_group(self.group_col(), &group)?;
            if rows.num_rows() == 0 {
                warn!(group = %group, "no training rows");
                continue;
            }
            let scale = float_values(&rows, scale_column, "combo")?;
            let rows = filter_rows(&rows, scale.iter().map(|&s| s > 0.0).collect())?;
            let labels = feature_matrix(&rows, &spec.output_columns, "combo")?.map(f64::ln);
            let complete: Vec<usize> = (0..labels.nrows())
                .filter(|&r| labels.row(r).iter().all(|v| v.is_finite()))
                .collect();
            if complete.is_empty() {
                warn!(group = %group, "no rows with a positive scale");
                continue;
            }
            let rows = if complete.len() == rows.num_rows() {
                rows
            } else {
                warn!(
                    group = %group,
                    dropped = rows.num_rows() - complete.len(),
                    "dropping rows with non-positive parameters"
                );
                let mut mask = vec![false; rows.num_rows()];
                for &r in &complete {
                    mask[r] = true;
                }
                filter_rows(&rows, mask)?
            };
            let log_labels = labels.select_rows(&complete);

            let lognorm = LogNormalParams::fit(&log_labels)?;
            let targets = lognorm.standardize(&log_labels)?;
            let inputs = feature_matrix(&rows, &spec.input_columns, "combo")?;

            let mut group_models = Vec::with_capacity(models.len());
            for named in models {
                info!(group = %group, model = %named.name, rows = inputs.nrows(), "fitting size distribution");
                let mut model = named.template.unfitted();
                model.fit(&inputs, &targets)?;
                log_diagnostics(&group, &named.name, model.diagnostics());
                group_models.push((named.name.clone(), model));
            }
            fitted.push((group, lognorm, group_models));
        }
        for (group, lognorm, models) in fitted {
            for (name, model) in models {
                self.registry.insert(
                    group.clone(),
                    name,
                    ModelEntry::SizeDistribution {
                        model,
                        lognorm: lognorm.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Shape, location and scale per step row: one table per group and model
    /// with `{model}_shape`, `{model}_location` and `{model}_scale` columns.
    ///
    /// Two-output models get `location` inserted as the middle parameter.
    ///
    /// # Errors
    /// Returns [`Error::ModelNotFound`] for an unknown model name, or error if
    /// the data or columns are missing or a model predicts an unusable width.
    pub fn predict_size_distribution_models(
        &self,
        model_names: &[String],
        request: &PredictionInputs,
        location: f64,
    ) -> Result<ModelTables> {
        let mut predictions = BTreeMap::new();
        for group in self.registry.groups(ModelFamily::SizeDistribution) {
            let Some(rows) = self.prediction_rows(&group, request.mode)? else {
                continue;
            };
            let inputs = feature_matrix(&rows, &request.input_columns, "combo")?;
            let mut by_model = BTreeMap::new();
            for name in model_names {
                let ModelEntry::SizeDistribution { model, lognorm } =
                    self.entry(ModelFamily::SizeDistribution, &group, name)?
                else {
                    return Err(Error::Fit(format!(
                        "Entry for `{name}` in group {group} is not a size distribution regressor"
                    )));
                };
                let params = lognorm.restore(&model.predict(&inputs)?)?;
                let params = with_location(params, location)?;

                let prefix = hyphenate(name);
                let columns: Vec<String> = PARAMETERS
                    .iter()
                    .map(|p| format!("{prefix}_{p}"))
                    .collect();
                let mut table = prediction_table(&rows, request)?;
                table.push_matrix(&columns, &params)?;
                by_model.insert(name.clone(), table);
            }
            predictions.insert(group, by_model);
        }
        Ok(predictions)
    }
}

/// Expand shape/scale predictions to shape/location/scale.
fn with_location(params: DMatrix<f64>, location: f64) -> Result<DMatrix<f64>> {
    match params.ncols() {
        3 => Ok(params),
        2 => Ok(params.insert_column(1, location)),
        n => Err(Error::Fit(format!(
            "Size distribution model predicted {n} parameters; expected 2 or 3"
        ))),
    }
}
