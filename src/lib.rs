//! # Hailcast: storm-track hail forecast modeling
//!
//! **Version**: 0.1.0
//!
//! Hailcast fits and applies statistical models to storm tracks extracted
//! from convection-allowing ensemble forecasts. Tracks are grouped by a
//! member attribute (typically the microphysics scheme), and each group gets
//! its own models for:
//!
//! - hail occurrence (condition)
//! - discretized hail size
//! - log-normal hail size distribution parameters
//! - start-time and translation error of the track
//!
//! Predictions are merged back into per-track GeoJSON files, and the joint
//! distribution of track errors can be summarized as a multivariate normal.
//!
//! ## Pipeline
//!
//! ```text
//! track_total_*.csv ─┐
//! track_step_*.csv  ─┼─► TrackTables ─► fit_* ─► ModelRegistry ─► predict_* ─► Forecasts
//! member file       ─┘                                │                          │
//!                                                save/load_models     output_forecasts_json
//! ```
//!
//! See [`modeler::TrackModeler`] for an end-to-end example.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod codec;
pub mod config;
pub mod distribution;
pub mod error;
pub mod export;
pub mod forecast;
pub mod model;
pub mod modeler;
pub mod persistence;
pub mod registry;
pub mod table;

pub use error::{Error, Result};
pub use modeler::TrackModeler;
