//! Raw record ingestion, normalization and feature derivation

pub mod csv_loader;
pub mod features;
pub mod normalize;

// Re-export commonly used types
pub use csv_loader::{load_raw_records, LoadError};
pub use features::{
    get_all_feature_names, BaseFeatures, DerivedFeatures, ExhibitionFeatures, FeatureEngineering,
    FeatureRow, OpponentFeatures, RaceAggregates, RaceGroupIssue, RowMeta, TiltFeatures,
};
