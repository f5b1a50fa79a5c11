//! Discretization codec
//!
//! Continuous labels (hail size, track offsets) are turned into classes by
//! truncating to an integer, clipping to `[start, stop]`, and flooring onto
//! a fixed-step grid anchored at `start`. A classifier only reports the
//! classes it saw during fitting; [`OutputGrid::reconstruct`] spreads those
//! probabilities back over the full grid so every row has one value per
//! bucket.
//!
//! ```rust
//! use hailcast::codec::OutputGrid;
//!
//! let grid = OutputGrid::new(5, 5, 20).unwrap();
//! assert_eq!(grid.values(), vec![5, 10, 15, 20]);
//! assert_eq!(grid.discretize(23.0), 20);
//! assert_eq!(grid.discretize(12.9), 10);
//! ```

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Fixed-step class grid `start, start + step, ...` up to the bucket holding `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GridSpec", into = "GridSpec")]
pub struct OutputGrid {
    start: i64,
    step: i64,
    stop: i64,
}

/// Unvalidated wire form of [`OutputGrid`]
#[derive(Serialize, Deserialize)]
struct GridSpec {
    start: i64,
    step: i64,
    stop: i64,
}

impl TryFrom<GridSpec> for OutputGrid {
    type Error = Error;

    fn try_from(spec: GridSpec) -> Result<Self> {
        Self::new(spec.start, spec.step, spec.stop)
    }
}

impl From<OutputGrid> for GridSpec {
    fn from(grid: OutputGrid) -> Self {
        Self {
            start: grid.start,
            step: grid.step,
            stop: grid.stop,
        }
    }
}

impl OutputGrid {
    /// Create a grid.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if `step <= 0` or `stop < start`.
    pub fn new(start: i64, step: i64, stop: i64) -> Result<Self> {
        if step <= 0 {
            return Err(Error::InvalidInput(format!(
                "Grid step must be positive, got {step}"
            )));
        }
        if stop < start {
            return Err(Error::InvalidInput(format!(
                "Grid stop {stop} is below start {start}"
            )));
        }
        Ok(Self { start, step, stop })
    }

    /// Lowest class
    #[must_use]
    pub const fn start(&self) -> i64 {
        self.start
    }

    /// Bucket width
    #[must_use]
    pub const fn step(&self) -> i64 {
        self.step
    }

    /// Clip ceiling
    #[must_use]
    pub const fn stop(&self) -> i64 {
        self.stop
    }

    /// Number of buckets
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub const fn len(&self) -> usize {
        ((self.stop - self.start) / self.step + 1) as usize
    }

    /// A grid always has at least one bucket
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Every class value, ascending
    #[must_use]
    pub fn values(&self) -> Vec<i64> {
        (0..self.len() as i64).map(|i| self.start + i * self.step).collect()
    }

    /// Class for a continuous value: truncate, clip, floor to the grid.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn discretize(&self, value: f64) -> i64 {
        let clipped = (value.trunc() as i64).clamp(self.start, self.stop);
        (clipped - self.start).div_euclid(self.step) * self.step + self.start
    }

    /// Grid position of `class`; exact match only.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn index_of(&self, class: i64) -> Option<usize> {
        let offset = class - self.start;
        if offset < 0 || offset % self.step != 0 {
            return None;
        }
        let index = (offset / self.step) as usize;
        (index < self.len()).then_some(index)
    }

    /// Spread classifier output over the full grid.
    ///
    /// `probabilities` is rows × `classes.len()`; the result is rows ×
    /// [`len`](Self::len) with zeros at buckets the classifier never saw.
    ///
    /// # Errors
    /// Returns [`Error::ClassNotInGrid`] if any class is not exactly a grid
    /// value, and [`Error::Fit`] if the column count disagrees with `classes`.
    pub fn reconstruct(
        &self,
        model: &str,
        classes: &[i64],
        probabilities: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        if probabilities.ncols() != classes.len() {
            return Err(Error::Fit(format!(
                "`{model}` returned {} probability columns for {} classes",
                probabilities.ncols(),
                classes.len()
            )));
        }
        let mut pdf = DMatrix::zeros(probabilities.nrows(), self.len());
        for (c, &class) in classes.iter().enumerate() {
            let index = self.index_of(class).ok_or_else(|| Error::ClassNotInGrid {
                class,
                model: model.to_string(),
                grid: self.values(),
            })?;
            pdf.set_column(index, &probabilities.column(c));
        }
        Ok(pdf)
    }

    /// One column name per bucket: `{model-with-hyphens}_{class:02}`
    #[must_use]
    pub fn column_names(&self, model: &str) -> Vec<String> {
        let prefix = hyphenate(model);
        self.values()
            .into_iter()
            .map(|v| format!("{prefix}_{v:02}"))
            .collect()
    }
}

/// Model name as it appears in column names, property keys and file names.
#[must_use]
pub fn hyphenate(model: &str) -> String {
    model.replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_grid() -> OutputGrid {
        OutputGrid::new(5, 5, 20).unwrap()
    }

    #[test]
    fn test_values_include_ceiling_bucket() {
        assert_eq!(size_grid().values(), vec![5, 10, 15, 20]);
        assert_eq!(size_grid().len(), 4);
    }

    #[test]
    fn test_uneven_ceiling_truncates_to_last_full_step() {
        let grid = OutputGrid::new(5, 5, 22).unwrap();
        assert_eq!(grid.values(), vec![5, 10, 15, 20]);
        assert_eq!(grid.discretize(22.0), 20);
    }

    #[test]
    fn test_discretize_clips_and_buckets() {
        let grid = size_grid();
        assert_eq!(grid.discretize(23.0), 20);
        assert_eq!(grid.discretize(5.0), 5);
        assert_eq!(grid.discretize(9.99), 5);
        assert_eq!(grid.discretize(-3.0), 5);
    }

    #[test]
    fn test_discretize_negative_range_floors() {
        let grid = OutputGrid::new(-60, 10, 60).unwrap();
        assert_eq!(grid.discretize(-15.0), -20);
        assert_eq!(grid.discretize(-15.7), -20);
        assert_eq!(grid.discretize(-100.0), -60);
        assert_eq!(grid.discretize(15.0), 10);
    }

    #[test]
    fn test_index_of_is_exact() {
        let grid = size_grid();
        assert_eq!(grid.index_of(15), Some(2));
        assert_eq!(grid.index_of(16), None);
        assert_eq!(grid.index_of(25), None);
        assert_eq!(grid.index_of(0), None);
    }

    #[test]
    fn test_reconstruct_places_classes() {
        let probabilities = DMatrix::from_row_slice(2, 2, &[0.25, 0.75, 0.5, 0.5]);
        let pdf = size_grid()
            .reconstruct("Random Forest", &[10, 20], &probabilities)
            .unwrap();
        assert_eq!(pdf.shape(), (2, 4));
        assert!((pdf[(0, 1)] - 0.25).abs() < f64::EPSILON);
        assert!((pdf[(0, 3)] - 0.75).abs() < f64::EPSILON);
        assert_eq!(pdf[(1, 0)], 0.0);
        assert_eq!(pdf[(1, 2)], 0.0);
    }

    #[test]
    fn test_reconstruct_rejects_off_grid_class() {
        let probabilities = DMatrix::from_row_slice(1, 1, &[1.0]);
        let err = size_grid()
            .reconstruct("rf", &[12], &probabilities)
            .unwrap_err();
        assert!(matches!(err, Error::ClassNotInGrid { class: 12, .. }));
    }

    #[test]
    fn test_column_names_are_zero_padded() {
        assert_eq!(
            size_grid().column_names("Random Forest"),
            vec![
                "Random-Forest_05",
                "Random-Forest_10",
                "Random-Forest_15",
                "Random-Forest_20"
            ]
        );
    }

    #[test]
    fn test_invalid_grids() {
        assert!(OutputGrid::new(0, 0, 10).is_err());
        assert!(OutputGrid::new(10, 5, 0).is_err());
    }

    #[test]
    fn test_deserialization_validates() {
        let grid: OutputGrid = serde_json::from_str(r#"{"start":5,"step":5,"stop":20}"#).unwrap();
        assert_eq!(grid, size_grid());
        assert!(serde_json::from_str::<OutputGrid>(r#"{"start":5,"step":0,"stop":20}"#).is_err());
    }
}
