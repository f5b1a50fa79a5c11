//! Fitted-model capability
//!
//! The modeler never looks inside a model. It needs a classifier that reports
//! per-class probabilities and a multi-output regressor, both of which can
//! hand back their state for persistence. Inputs are rows × features
//! matrices built from the joined track tables.
//!
//! Two small reference implementations ship with the crate so that a
//! complete fit → predict → export cycle works without an external toolkit:
//! [`GaussianNaiveBayes`] and [`RidgeRegressor`]. [`BuiltinModels`] restores
//! them from persisted state.

mod naive_bayes;
mod ridge;

use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

pub use naive_bayes::GaussianNaiveBayes;
pub use ridge::RidgeRegressor;

use crate::{Error, Result};

/// Optional report a model can give about its last fit (e.g. the winner of
/// an internal search).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Human-readable description of the selected estimator
    pub summary: String,
    /// Score of the selected estimator, if the model computes one
    pub score: Option<f64>,
}

/// Classifier over integer class labels.
pub trait Classifier: Send + Sync + fmt::Debug {
    /// Stable identifier used to restore persisted state
    fn kind(&self) -> &'static str;

    /// Fresh, unfitted model with the same configuration
    fn unfitted(&self) -> Box<dyn Classifier>;

    /// Fit against `labels`, one per input row.
    ///
    /// # Errors
    /// Returns [`Error::Fit`] if the inputs are unusable.
    fn fit(&mut self, inputs: &DMatrix<f64>, labels: &[i64]) -> Result<()>;

    /// Classes seen during fitting, ascending. Columns of
    /// [`predict_proba`](Self::predict_proba) follow this order.
    fn classes(&self) -> &[i64];

    /// Rows × classes probability matrix.
    ///
    /// # Errors
    /// Returns [`Error::Fit`] if the model is unfitted or shapes disagree.
    fn predict_proba(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>>;

    /// Serializable fitted state
    ///
    /// # Errors
    /// Returns [`Error::Json`] if the state cannot be encoded.
    fn state(&self) -> Result<serde_json::Value>;

    /// Report about the last fit, for models that keep one
    fn diagnostics(&self) -> Option<FitReport> {
        None
    }
}

/// Regressor with one or more outputs.
pub trait Regressor: Send + Sync + fmt::Debug {
    /// Stable identifier used to restore persisted state
    fn kind(&self) -> &'static str;

    /// Fresh, unfitted model with the same configuration
    fn unfitted(&self) -> Box<dyn Regressor>;

    /// Fit against rows × outputs `targets`.
    ///
    /// # Errors
    /// Returns [`Error::Fit`] if the inputs are unusable.
    fn fit(&mut self, inputs: &DMatrix<f64>, targets: &DMatrix<f64>) -> Result<()>;

    /// Number of outputs learned during fitting
    fn n_outputs(&self) -> usize;

    /// Rows × outputs predictions.
    ///
    /// # Errors
    /// Returns [`Error::Fit`] if the model is unfitted or shapes disagree.
    fn predict(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>>;

    /// Serializable fitted state
    ///
    /// # Errors
    /// Returns [`Error::Json`] if the state cannot be encoded.
    fn state(&self) -> Result<serde_json::Value>;

    /// Report about the last fit, for models that keep one
    fn diagnostics(&self) -> Option<FitReport> {
        None
    }
}

/// Restores persisted models from `(kind, state)`.
pub trait ModelLoader {
    /// Rebuild a classifier.
    ///
    /// # Errors
    /// Returns [`Error::Persistence`] for an unknown kind and
    /// [`Error::Json`] if the state does not match it.
    fn classifier(&self, kind: &str, state: serde_json::Value) -> Result<Box<dyn Classifier>>;

    /// Rebuild a regressor.
    ///
    /// # Errors
    /// Returns [`Error::Persistence`] for an unknown kind and
    /// [`Error::Json`] if the state does not match it.
    fn regressor(&self, kind: &str, state: serde_json::Value) -> Result<Box<dyn Regressor>>;
}

/// Loader for the models shipped with this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinModels;

impl ModelLoader for BuiltinModels {
    fn classifier(&self, kind: &str, state: serde_json::Value) -> Result<Box<dyn Classifier>> {
        match kind {
            GaussianNaiveBayes::KIND => Ok(Box::new(serde_json::from_value::<GaussianNaiveBayes>(
                state,
            )?)),
            other => Err(Error::Persistence(format!("Unknown classifier kind: {other}"))),
        }
    }

    fn regressor(&self, kind: &str, state: serde_json::Value) -> Result<Box<dyn Regressor>> {
        match kind {
            RidgeRegressor::KIND => Ok(Box::new(serde_json::from_value::<RidgeRegressor>(state)?)),
            other => Err(Error::Persistence(format!("Unknown regressor kind: {other}"))),
        }
    }
}

/// A model template paired with the name its predictions are filed under.
#[derive(Debug)]
pub struct NamedModel<M: ?Sized> {
    /// Model name; spaces become hyphens in column names and files
    pub name: String,
    /// Unfitted template; each group fits its own copy
    pub template: Box<M>,
}

impl NamedModel<dyn Classifier> {
    /// Name a classifier template
    pub fn classifier(name: impl Into<String>, template: impl Classifier + 'static) -> Self {
        Self {
            name: name.into(),
            template: Box::new(template),
        }
    }
}

impl NamedModel<dyn Regressor> {
    /// Name a regressor template
    pub fn regressor(name: impl Into<String>, template: impl Regressor + 'static) -> Self {
        Self {
            name: name.into(),
            template: Box::new(template),
        }
    }
}

/// Named classifier template
pub type NamedClassifier = NamedModel<dyn Classifier>;
/// Named regressor template
pub type NamedRegressor = NamedModel<dyn Regressor>;

pub(crate) fn check_rows(inputs: &DMatrix<f64>, rows: usize, what: &str) -> Result<()> {
    if inputs.nrows() == rows {
        Ok(())
    } else {
        Err(Error::Fit(format!(
            "{} input rows but {rows} {what}",
            inputs.nrows()
        )))
    }
}
