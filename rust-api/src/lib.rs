//! Chakugai - pre-race out-of-the-money prediction for boat races
//!
//! This library provides:
//! - Feature derivation from raw competitor records (race-wide aggregates,
//!   opponent-relative features, exhibition and tilt features)
//! - Model selection per venue and lane group, with decision thresholds read
//!   from artifact file names
//! - A native scorer for LightGBM text-format tree ensembles
//! - Lane-routed inference: lanes 1-5 and lane 6 use separate models
//!
//! # Example
//!
//! ```no_run
//! use chakugai::core::ModelRegistry;
//! use chakugai::data::load_raw_records;
//! use chakugai::models::RaceRequest;
//! use chakugai::pipeline::run_round;
//! use chakugai::predictor::ModelStore;
//!
//! let records = load_raw_records("race.csv").unwrap();
//! let date = chrono::NaiveDate::from_ymd_opt(2025, 1, 25).unwrap();
//! let request = RaceRequest::new(date, "江戸川", 6);
//!
//! let outcome = run_round(&request, &records, &ModelRegistry::builtin("."), &ModelStore::fresh());
//! for row in &outcome.predictions {
//!     println!("{}号艇: {:.3} -> {}", row.features.lane(), row.score, row.flag);
//! }
//! ```

pub mod config;
pub mod core;
pub mod data;
pub mod models;
pub mod pipeline;
pub mod predictor;

// API-specific modules (only available with api feature)
#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod handlers;

#[cfg(feature = "scraper")]
pub mod scraper;

// Re-export commonly used types
pub use config::AppConfig;
pub use core::{Booster, ModelRegistry, RegistryError, Threshold};
pub use data::{load_raw_records, FeatureEngineering, FeatureRow};
pub use models::{LaneGroup, PredictionRow, RaceRequest, RawCompetitorRecord};
pub use pipeline::{run_round, PipelineSignal, RoundOutcome};
pub use predictor::{predict, ModelArtifact, ModelStore};
