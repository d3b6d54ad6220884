//! HTTP handlers and the state they share

pub mod health;
pub mod predict;
pub mod venues;

use actix_web::web;

use crate::core::ModelRegistry;
use crate::predictor::ModelStore;
#[cfg(feature = "scraper")]
use crate::scraper::RaceScraper;

/// Application state shared across handlers
pub struct AppState {
    pub registry: ModelRegistry,
    pub store: ModelStore,
    #[cfg(feature = "scraper")]
    pub scraper: RaceScraper,
}

/// Register every route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .route("/venues", web::get().to(venues::list_venues))
        .route("/predict", web::post().to(predict::predict_race));

    #[cfg(feature = "scraper")]
    cfg.route("/predict/live", web::post().to(predict::predict_live));
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Arc;

    pub(crate) fn state(registry: ModelRegistry) -> Arc<AppState> {
        Arc::new(AppState {
            registry,
            store: ModelStore::cached(),
            #[cfg(feature = "scraper")]
            scraper: RaceScraper::new(Default::default()).unwrap(),
        })
    }
}
