//! Fit and predict orchestration
//!
//! [`TrackModeler`] owns the per-mode table cache and the model registry.
//! Every fit walks the training groups, builds one input matrix per group and
//! fits a fresh copy of each named template against it; a group's entries are
//! registered only once all of its models have fitted. Every predict walks the
//! groups the registry knows for that family and skips groups without rows in
//! the requested mode.
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use hailcast::config::{DateRange, Mode, ModelerConfig};
//! use hailcast::model::{GaussianNaiveBayes, NamedClassifier};
//! use hailcast::modeler::{ConditionSpec, PredictionInputs, TrackModeler};
//!
//! let day = |d| NaiveDate::from_ymd_opt(2015, 5, d).unwrap();
//! let config = ModelerConfig::builder("SSEF")
//!     .train("/data/train", "/data/members.csv", DateRange::new(day(1), day(20)))
//!     .forecast("/data/forecast", "/data/members.csv", DateRange::new(day(21), day(21)))
//!     .build()?;
//!
//! let mut modeler = TrackModeler::new(config)?;
//! modeler.load_data(Mode::Train)?;
//! modeler.load_data(Mode::Forecast)?;
//!
//! let inputs = vec!["Max_Hail_Size".to_string()];
//! let models = [NamedClassifier::classifier("Naive Bayes", GaussianNaiveBayes::default())];
//! modeler.fit_condition_models(&models, &ConditionSpec::new(inputs.clone()))?;
//!
//! let request = PredictionInputs::new(inputs, vec!["Track_ID".to_string()]);
//! let condition = modeler.predict_condition_models(&["Naive Bayes".to_string()], &request)?;
//! # Ok::<(), hailcast::Error>(())
//! ```

mod condition;
mod size;
mod size_distribution;
mod track;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use arrow::record_batch::RecordBatch;
use nalgebra::DMatrix;
use tracing::{debug, info, warn};

pub use condition::ConditionSpec;
pub use size::SizeSpec;
pub use size_distribution::{SizeDistributionSpec, DEFAULT_LOCATION};
pub use track::{TrackOffsetSpec, TrackSpec};

use crate::config::{Mode, ModelerConfig};
use crate::distribution::{write_copulas, Copula};
use crate::export::{ExportRequest, ExportSummary, ForecastExporter};
use crate::forecast::{Forecasts, PredictionTable};
use crate::model::{Classifier, FitReport, ModelLoader};
use crate::persistence;
use crate::registry::{ModelEntry, ModelFamily, ModelRegistry, TrackOffset};
use crate::table::columns::{feature_matrix, project};
use crate::table::TrackTables;
use crate::{Error, Result};

/// Columns and data mode used when applying fitted models
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionInputs {
    /// Model input columns, in training order
    pub input_columns: Vec<String>,
    /// Columns copied into every prediction table (must include `Track_ID`
    /// for export)
    pub metadata_columns: Vec<String>,
    /// Which loaded tables to predict on
    pub mode: Mode,
}

impl PredictionInputs {
    /// Predict on forecast data
    #[must_use]
    pub const fn new(input_columns: Vec<String>, metadata_columns: Vec<String>) -> Self {
        Self {
            input_columns,
            metadata_columns,
            mode: Mode::Forecast,
        }
    }

    /// Predict on another mode's data
    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Labels and names for [`TrackModeler::calc_copulas`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopulaSpec {
    /// Track-offset model each label belongs to
    pub model_names: Vec<String>,
    /// Error columns of the per-track view
    pub label_columns: Vec<String>,
}

impl Default for CopulaSpec {
    fn default() -> Self {
        Self {
            model_names: TrackOffset::ALL.iter().map(|o| o.as_str().to_string()).collect(),
            label_columns: TrackOffset::ALL
                .iter()
                .map(|o| track::default_label_column(*o).to_string())
                .collect(),
        }
    }
}

/// Session state: loaded tables per mode and fitted models.
#[derive(Debug)]
pub struct TrackModeler {
    config: ModelerConfig,
    data: HashMap<Mode, TrackTables>,
    registry: ModelRegistry,
}

impl TrackModeler {
    /// Create a modeler with no data loaded.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn new(config: ModelerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            data: HashMap::new(),
            registry: ModelRegistry::new(),
        })
    }

    /// Session configuration
    #[must_use]
    pub const fn config(&self) -> &ModelerConfig {
        &self.config
    }

    /// Column holding the group label
    #[must_use]
    pub fn group_col(&self) -> &str {
        &self.config.group_col
    }

    /// Load (or reload) the tables for `mode`, replacing any cached ones.
    ///
    /// # Errors
    /// Returns error if a matched file cannot be read or the tables cannot
    /// be joined.
    pub fn load_data(&mut self, mode: Mode) -> Result<()> {
        let tables = TrackTables::load(&self.config, mode)?;
        self.data.insert(mode, tables);
        Ok(())
    }

    /// Cache tables that were loaded some other way.
    pub fn insert_tables(&mut self, mode: Mode, tables: TrackTables) {
        self.data.insert(mode, tables);
    }

    /// Cached tables for `mode`, if loaded
    #[must_use]
    pub fn data(&self, mode: Mode) -> Option<&TrackTables> {
        self.data.get(&mode)
    }

    /// Fitted models
    #[must_use]
    pub const fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Fitted models, mutably
    pub fn registry_mut(&mut self) -> &mut ModelRegistry {
        &mut self.registry
    }

    fn tables(&self, mode: Mode) -> Result<&TrackTables> {
        self.data
            .get(&mode)
            .ok_or_else(|| Error::InvalidInput(format!("No {mode} data loaded")))
    }

    /// Training tables and their groups in member-table order
    fn training_groups(&self) -> Result<(&TrackTables, Vec<String>)> {
        let tables = self.tables(Mode::Train)?;
        let groups = tables.groups(self.group_col())?;
        Ok((tables, groups))
    }

    /// Step rows of `group` for prediction, or `None` if there are none
    fn prediction_rows(&self, group: &str, mode: Mode) -> Result<Option<RecordBatch>> {
        let rows = self.tables(mode)?.combo_for_group(self.group_col(), group)?;
        if rows.num_rows() == 0 {
            debug!(group, %mode, "no rows to predict");
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }

    fn entry(&self, family: ModelFamily, group: &str, model_name: &str) -> Result<&ModelEntry> {
        self.registry
            .get(family, group, model_name)
            .ok_or_else(|| Error::ModelNotFound {
                family: family.to_string(),
                group: group.to_string(),
                model: model_name.to_string(),
            })
    }

    /// Class probabilities of a classifier entry spread over its grid
    fn predict_pdf(
        &self,
        family: ModelFamily,
        group: &str,
        model_name: &str,
        inputs: &DMatrix<f64>,
    ) -> Result<(Vec<String>, DMatrix<f64>)> {
        let entry = self.entry(family, group, model_name)?;
        let (Some(model), Some(grid)) = (entry.classifier(), entry.grid()) else {
            return Err(Error::Fit(format!(
                "Entry for `{model_name}` in group {group} is not a discretized classifier"
            )));
        };
        let pdf = grid.reconstruct(model_name, model.classes(), &model.predict_proba(inputs)?)?;
        Ok((grid.column_names(model_name), pdf))
    }

    /// Per-group mean and covariance of track errors, written to `output_file`.
    ///
    /// Loads training data first if it has not been loaded. Groups with fewer
    /// than two complete tracks are left out.
    ///
    /// # Errors
    /// Returns error if training data cannot be loaded, a label column is
    /// missing, or the file cannot be written.
    pub fn calc_copulas(
        &mut self,
        output_file: &Path,
        spec: &CopulaSpec,
    ) -> Result<BTreeMap<String, Copula>> {
        if !self.data.contains_key(&Mode::Train) {
            self.load_data(Mode::Train)?;
        }
        let (tables, groups) = self.training_groups()?;
        let mut copulas = BTreeMap::new();
        for group in groups {
            let tracks = tables.tracks_for_group(self.group_col(), &group)?;
            if tracks.num_rows() == 0 {
                warn!(group = %group, "no tracks for copula");
                continue;
            }
            let samples = feature_matrix(&tracks, &spec.label_columns, "total_group")?;
            match Copula::fit(&samples, spec.label_columns.clone(), spec.model_names.clone()) {
                Ok(copula) => {
                    info!(group = %group, tracks = tracks.num_rows(), "fitted copula");
                    copulas.insert(group, copula);
                }
                Err(Error::Fit(reason)) => warn!(group = %group, %reason, "skipping copula"),
                Err(e) => return Err(e),
            }
        }
        write_copulas(output_file, &copulas)?;
        info!(file = %output_file.display(), groups = copulas.len(), "wrote copulas");
        Ok(copulas)
    }

    /// Persist every fitted model under `dir`. Returns the number saved.
    ///
    /// # Errors
    /// Returns [`Error::InvalidModelKey`] for names that cannot be encoded,
    /// or an I/O error.
    pub fn save_models(&self, dir: &Path) -> Result<usize> {
        persistence::save_registry(&self.registry, dir)
    }

    /// Restore models saved under `dir`, merging them into the registry.
    /// Returns the number loaded.
    ///
    /// # Errors
    /// Returns error if the manifest or a model file cannot be read or
    /// restored.
    pub fn load_models(&mut self, dir: &Path, loader: &dyn ModelLoader) -> Result<usize> {
        let loaded = persistence::load_registry(dir, loader)?;
        let count = loaded.len();
        self.registry.merge(loaded);
        Ok(count)
    }

    fn exporter<'a>(&'a self, forecasts: &'a Forecasts) -> Result<ForecastExporter<'a>> {
        let tables = self.tables(Mode::Forecast)?;
        Ok(ForecastExporter::new(
            &tables.total_group,
            self.group_col(),
            forecasts,
        ))
    }

    /// Inject `forecasts` into each forecast track's GeoJSON file, one track
    /// at a time.
    ///
    /// # Errors
    /// Returns error if forecast data is not loaded or the track table lacks
    /// an identifying column. Per-track failures are counted, not raised.
    pub fn output_forecasts_json(
        &self,
        forecasts: &Forecasts,
        request: &ExportRequest,
    ) -> Result<ExportSummary> {
        self.exporter(forecasts)?.export(request)
    }

    /// Same as [`output_forecasts_json`](Self::output_forecasts_json) with
    /// tracks spread over `workers` threads.
    ///
    /// # Errors
    /// Additionally returns [`Error::ThreadPool`] if the pool cannot start.
    pub fn output_forecasts_json_parallel(
        &self,
        forecasts: &Forecasts,
        request: &ExportRequest,
        workers: usize,
    ) -> Result<ExportSummary> {
        self.exporter(forecasts)?.export_parallel(request, workers)
    }
}

/// Metadata projection that starts a prediction table
fn prediction_table(rows: &RecordBatch, inputs: &PredictionInputs) -> Result<PredictionTable> {
    Ok(PredictionTable::new(project(
        rows,
        &inputs.metadata_columns,
        "combo",
    )?))
}

/// Fit a fresh copy of every template against `labels`.
fn fit_classifiers(
    group: &str,
    family: ModelFamily,
    templates: &[crate::model::NamedClassifier],
    inputs: &DMatrix<f64>,
    labels: &[i64],
) -> Result<Vec<(String, Box<dyn Classifier>)>> {
    templates
        .iter()
        .map(|named| {
            info!(group, %family, model = %named.name, rows = labels.len(), "fitting");
            let mut model = named.template.unfitted();
            model.fit(inputs, labels)?;
            log_diagnostics(group, &named.name, model.diagnostics());
            Ok((named.name.clone(), model))
        })
        .collect()
}

fn log_diagnostics(group: &str, model_name: &str, report: Option<FitReport>) {
    if let Some(report) = report {
        info!(
            group,
            model = model_name,
            selected = %report.summary,
            score = ?report.score,
            "fit diagnostics"
        );
    }
}
