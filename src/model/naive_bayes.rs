//! Gaussian naive Bayes classifier

use std::f64::consts::PI;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::{check_rows, Classifier};
use crate::{Error, Result};

/// Per-class independent normal likelihoods with class-frequency priors.
///
/// Variances are widened by `var_smoothing` times the largest feature
/// variance so constant features do not divide by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNaiveBayes {
    var_smoothing: f64,
    classes: Vec<i64>,
    priors: Vec<f64>,
    means: Vec<Vec<f64>>,
    variances: Vec<Vec<f64>>,
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self::with_var_smoothing(1e-9)
    }
}

impl GaussianNaiveBayes {
    /// Persistence identifier
    pub const KIND: &'static str = "gaussian-naive-bayes";

    /// Unfitted model with a custom smoothing fraction
    #[must_use]
    pub const fn with_var_smoothing(var_smoothing: f64) -> Self {
        Self {
            var_smoothing,
            classes: Vec::new(),
            priors: Vec::new(),
            means: Vec::new(),
            variances: Vec::new(),
        }
    }

    fn joint_log_likelihood(&self, row: &[f64]) -> Vec<f64> {
        self.classes
            .iter()
            .enumerate()
            .map(|(c, _)| {
                let spread: f64 = row
                    .iter()
                    .zip(self.means[c].iter().zip(&self.variances[c]))
                    .map(|(x, (mu, var))| (2.0 * PI * var).ln() + (x - mu).powi(2) / var)
                    .sum();
                self.priors[c].ln() - 0.5 * spread
            })
            .collect()
    }
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

impl Classifier for GaussianNaiveBayes {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn unfitted(&self) -> Box<dyn Classifier> {
        Box::new(Self::with_var_smoothing(self.var_smoothing))
    }

    fn fit(&mut self, inputs: &DMatrix<f64>, labels: &[i64]) -> Result<()> {
        check_rows(inputs, labels.len(), "labels")?;
        if labels.is_empty() {
            return Err(Error::Fit("Naive Bayes needs at least one training row".to_string()));
        }

        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();

        let max_variance = (0..inputs.ncols())
            .map(|j| {
                let column: Vec<f64> = inputs.column(j).iter().copied().collect();
                mean_and_variance(&column).1
            })
            .fold(0.0, f64::max);
        let epsilon = if max_variance > 0.0 {
            self.var_smoothing * max_variance
        } else {
            self.var_smoothing
        };

        #[allow(clippy::cast_precision_loss)]
        let total = labels.len() as f64;
        let mut priors = Vec::with_capacity(classes.len());
        let mut means = Vec::with_capacity(classes.len());
        let mut variances = Vec::with_capacity(classes.len());
        for &class in &classes {
            let rows: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter_map(|(i, &l)| (l == class).then_some(i))
                .collect();
            #[allow(clippy::cast_precision_loss)]
            priors.push(rows.len() as f64 / total);
            let (mu, var): (Vec<f64>, Vec<f64>) = (0..inputs.ncols())
                .map(|j| {
                    let column: Vec<f64> = rows.iter().map(|&i| inputs[(i, j)]).collect();
                    let (m, v) = mean_and_variance(&column);
                    (m, v + epsilon)
                })
                .unzip();
            means.push(mu);
            variances.push(var);
        }

        self.classes = classes;
        self.priors = priors;
        self.means = means;
        self.variances = variances;
        Ok(())
    }

    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn predict_proba(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let Some(features) = self.means.first().map(Vec::len) else {
            return Err(Error::Fit("Naive Bayes model is not fitted".to_string()));
        };
        if inputs.ncols() != features {
            return Err(Error::Fit(format!(
                "Expected {features} features, got {}",
                inputs.ncols()
            )));
        }

        let mut probabilities = DMatrix::zeros(inputs.nrows(), self.classes.len());
        for (i, row) in inputs.row_iter().enumerate() {
            let row: Vec<f64> = row.iter().copied().collect();
            let jll = self.joint_log_likelihood(&row);
            let max = jll.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let exp: Vec<f64> = jll.iter().map(|v| (v - max).exp()).collect();
            let norm: f64 = exp.iter().sum();
            for (c, e) in exp.iter().enumerate() {
                probabilities[(i, c)] = e / norm;
            }
        }
        Ok(probabilities)
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
