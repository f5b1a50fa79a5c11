//! Multi-output ridge regression

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use super::{check_rows, FitReport, Regressor};
use crate::{Error, Result};

/// L2-penalized least squares with an unpenalized intercept per output.
///
/// Solved in closed form on centered data: `(XᵀX + αI) β = Xᵀy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    alpha: f64,
    /// features × outputs
    coefficients: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
    training_mse: Option<f64>,
}

impl Default for RidgeRegressor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeRegressor {
    /// Persistence identifier
    pub const KIND: &'static str = "ridge";

    /// Unfitted model with penalty `alpha`
    #[must_use]
    pub const fn new(alpha: f64) -> Self {
        Self {
            alpha,
            coefficients: Vec::new(),
            intercepts: Vec::new(),
            training_mse: None,
        }
    }

    fn coefficient_matrix(&self) -> DMatrix<f64> {
        let features = self.coefficients.len();
        DMatrix::from_fn(features, self.intercepts.len(), |f, o| {
            self.coefficients[f][o]
        })
    }
}

fn column_means(matrix: &DMatrix<f64>) -> Vec<f64> {
    #[allow(clippy::cast_precision_loss)]
    let n = matrix.nrows() as f64;
    matrix.column_iter().map(|c| c.sum() / n).collect()
}

fn centered(matrix: &DMatrix<f64>, means: &[f64]) -> DMatrix<f64> {
    DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |r, c| {
        matrix[(r, c)] - means[c]
    })
}

impl Regressor for RidgeRegressor {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn unfitted(&self) -> Box<dyn Regressor> {
        Box::new(Self::new(self.alpha))
    }

    fn fit(&mut self, inputs: &DMatrix<f64>, targets: &DMatrix<f64>) -> Result<()> {
        check_rows(inputs, targets.nrows(), "target rows")?;
        if inputs.nrows() == 0 {
            return Err(Error::Fit("Ridge regression needs at least one training row".to_string()));
        }
        if self.alpha < 0.0 {
            return Err(Error::Fit(format!("Ridge alpha must be >= 0, got {}", self.alpha)));
        }

        let x_means = column_means(inputs);
        let y_means = column_means(targets);
        let xc = centered(inputs, &x_means);
        let yc = centered(targets, &y_means);

        let features = inputs.ncols();
        let gram = xc.transpose() * &xc + DMatrix::identity(features, features) * self.alpha;
        let rhs = xc.transpose() * &yc;
        let beta = gram
            .cholesky()
            .ok_or_else(|| Error::Fit("Ridge normal equations are singular; raise alpha".to_string()))?
            .solve(&rhs);

        self.intercepts = y_means
            .iter()
            .enumerate()
            .map(|(o, y_mean)| {
                y_mean
                    - x_means
                        .iter()
                        .enumerate()
                        .map(|(f, x_mean)| x_mean * beta[(f, o)])
                        .sum::<f64>()
            })
            .collect();
        self.coefficients = beta.row_iter().map(|row| row.iter().copied().collect()).collect();

        let residuals = self.predict(inputs)? - targets;
        #[allow(clippy::cast_precision_loss)]
        let cells = residuals.len() as f64;
        self.training_mse = Some(residuals.norm_squared() / cells.max(1.0));
        Ok(())
    }

    fn n_outputs(&self) -> usize {
        self.intercepts.len()
    }

    fn predict(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if self.intercepts.is_empty() {
            return Err(Error::Fit("Ridge model is not fitted".to_string()));
        }
        if inputs.ncols() != self.coefficients.len() {
            return Err(Error::Fit(format!(
                "Expected {} features, got {}",
                self.coefficients.len(),
                inputs.ncols()
            )));
        }
        let mut out = inputs * self.coefficient_matrix();
        for (o, intercept) in self.intercepts.iter().enumerate() {
            out.column_mut(o).add_scalar_mut(*intercept);
        }
        Ok(out)
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn diagnostics(&self) -> Option<FitReport> {
        self.training_mse.map(|mse| FitReport {
            summary: format!("ridge(alpha={})", self.alpha),
            score: Some(mse),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_linear_relation() {
        // y0 = 2x + 1, y1 = -x + 3
        let inputs = DMatrix::from_row_slice(4, 1, &[0.0, 1.0, 2.0, 3.0]);
        let targets =
            DMatrix::from_row_slice(4, 2, &[1.0, 3.0, 3.0, 2.0, 5.0, 1.0, 7.0, 0.0]);
        let mut model = RidgeRegressor::new(1e-10);
        model.fit(&inputs, &targets).unwrap();

        assert_eq!(model.n_outputs(), 2);
        let predicted = model.predict(&DMatrix::from_row_slice(1, 1, &[10.0])).unwrap();
        assert!((predicted[(0, 0)] - 21.0).abs() < 1e-6);
        assert!((predicted[(0, 1)] + 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_penalty_shrinks_slope() {
        let inputs = DMatrix::from_row_slice(4, 1, &[0.0, 1.0, 2.0, 3.0]);
        let targets = DMatrix::from_row_slice(4, 1, &[0.0, 1.0, 2.0, 3.0]);
        let mut model = RidgeRegressor::new(10.0);
        model.fit(&inputs, &targets).unwrap();
        assert!(model.coefficients[0][0] < 1.0);
        assert!(model.coefficients[0][0] > 0.0);
    }

    #[test]
    fn test_diagnostics_after_fit() {
        let mut model = RidgeRegressor::default();
        assert!(model.diagnostics().is_none());
        let inputs = DMatrix::from_row_slice(3, 1, &[0.0, 1.0, 2.0]);
        model.fit(&inputs, &inputs).unwrap();
        let report = model.diagnostics().unwrap();
        assert_eq!(report.summary, "ridge(alpha=1)");
        assert!(report.score.unwrap() >= 0.0);
    }

    #[test]
    fn test_constant_feature_is_solvable_with_penalty() {
        let inputs = DMatrix::from_row_slice(3, 1, &[1.0, 1.0, 1.0]);
        let targets = DMatrix::from_row_slice(3, 1, &[2.0, 4.0, 6.0]);
        let mut model = RidgeRegressor::default();
        model.fit(&inputs, &targets).unwrap();
        let predicted = model.predict(&inputs).unwrap();
        assert!((predicted[(0, 0)] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_predict_checks_width() {
        let mut model = RidgeRegressor::default();
        let inputs = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        model.fit(&inputs, &inputs).unwrap();
        assert!(model.predict(&DMatrix::zeros(1, 2)).is_err());
    }
}
