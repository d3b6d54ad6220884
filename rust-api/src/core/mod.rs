//! Model consumption: artifact registry and the tree-ensemble scorer

pub mod booster;
pub mod registry;

// Re-export commonly used types
pub use booster::{Booster, ModelError, OutputTransform};
pub use registry::{
    all_venues, extract_threshold, venue_code, venue_name, ModelRegistry, RegistryError,
    ResolvedArtifact, Threshold, VenueModels, DEFAULT_THRESHOLD,
};
