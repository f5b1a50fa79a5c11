//! Distribution fitting
//!
//! Two descriptive fits feed the models:
//!
//! - [`LogNormalParams`]: per-parameter mean and standard deviation of
//!   log-transformed size-distribution labels, used to standardize regressor
//!   targets and to invert regressor output.
//! - [`Copula`]: mean vector and sample covariance of joint track errors,
//!   consumed downstream for correlated error sampling.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Log-space location and spread of each distribution parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogNormalParams {
    /// Mean of each log parameter
    pub mean: Vec<f64>,
    /// Population standard deviation of each log parameter
    pub sd: Vec<f64>,
}

impl LogNormalParams {
    /// Fit from rows × parameters log labels.
    ///
    /// A parameter with zero spread gets `sd = 1` so standardization stays
    /// finite.
    ///
    /// # Errors
    /// Returns [`Error::Fit`] if there are no rows.
    pub fn fit(log_labels: &DMatrix<f64>) -> Result<Self> {
        if log_labels.nrows() == 0 {
            return Err(Error::Fit(
                "Cannot fit log-normal parameters without rows".to_string(),
            ));
        }
        #[allow(clippy::cast_precision_loss)]
        let n = log_labels.nrows() as f64;
        let (mean, sd) = log_labels
            .column_iter()
            .map(|column| {
                let mean = column.sum() / n;
                let sd = (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
                (mean, if sd > 0.0 && sd.is_finite() { sd } else { 1.0 })
            })
            .unzip();
        Ok(Self { mean, sd })
    }

    /// Number of parameters
    #[must_use]
    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// `(log_labels - mean) / sd`, column-wise.
    ///
    /// # Errors
    /// Returns [`Error::Fit`] if the column count differs from [`width`](Self::width).
    pub fn standardize(&self, log_labels: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.check_width(log_labels)?;
        Ok(DMatrix::from_fn(log_labels.nrows(), log_labels.ncols(), |r, c| {
            (log_labels[(r, c)] - self.mean[c]) / self.sd[c]
        }))
    }

    /// `exp(standardized * sd + mean)`, column-wise.
    ///
    /// # Errors
    /// Returns [`Error::Fit`] if the column count differs from [`width`](Self::width).
    pub fn restore(&self, standardized: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.check_width(standardized)?;
        Ok(DMatrix::from_fn(standardized.nrows(), standardized.ncols(), |r, c| {
            (standardized[(r, c)] * self.sd[c] + self.mean[c]).exp()
        }))
    }

    fn check_width(&self, values: &DMatrix<f64>) -> Result<()> {
        if values.ncols() == self.width() {
            Ok(())
        } else {
            Err(Error::Fit(format!(
                "Expected {} distribution parameters, got {}",
                self.width(),
                values.ncols()
            )))
        }
    }
}

/// Multivariate normal summary of one group's track errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Copula {
    /// Mean of each label column
    pub mean: Vec<f64>,
    /// Sample covariance (n - 1 denominator), labels × labels
    pub cov: Vec<Vec<f64>>,
    /// Label columns, in matrix order
    pub label_names: Vec<String>,
    /// Track-offset model each label corresponds to
    pub model_names: Vec<String>,
}

impl Copula {
    /// Fit from rows × labels `samples`.
    ///
    /// Rows with a non-finite value are dropped first.
    ///
    /// # Errors
    /// Returns [`Error::Fit`] if fewer than two usable rows remain or the
    /// name count differs from the column count.
    pub fn fit(
        samples: &DMatrix<f64>,
        label_names: Vec<String>,
        model_names: Vec<String>,
    ) -> Result<Self> {
        if label_names.len() != samples.ncols() {
            return Err(Error::Fit(format!(
                "{} label names for {} sample columns",
                label_names.len(),
                samples.ncols()
            )));
        }
        let rows: Vec<usize> = (0..samples.nrows())
            .filter(|&r| samples.row(r).iter().all(|v| v.is_finite()))
            .collect();
        if rows.len() < 2 {
            return Err(Error::Fit(format!(
                "Covariance needs at least 2 complete rows, got {}",
                rows.len()
            )));
        }
        let clean = samples.select_rows(&rows);

        #[allow(clippy::cast_precision_loss)]
        let n = clean.nrows() as f64;
        let mean: Vec<f64> = clean.column_iter().map(|c| c.sum() / n).collect();
        let centered = DMatrix::from_fn(clean.nrows(), clean.ncols(), |r, c| {
            clean[(r, c)] - mean[c]
        });
        let cov = (centered.transpose() * &centered) / (n - 1.0);

        Ok(Self {
            mean,
            cov: cov
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
            label_names,
            model_names,
        })
    }
}

/// Write `{group: copula}` as JSON.
///
/// # Errors
/// Returns error if the file cannot be created or written.
pub fn write_copulas(path: &Path, copulas: &BTreeMap<String, Copula>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, copulas)?;
    writer.flush()?;
    Ok(())
}

/// Read a file written by [`write_copulas`].
///
/// # Errors
/// Returns error if the file cannot be opened or parsed.
pub fn read_copulas(path: &Path) -> Result<BTreeMap<String, Copula>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
