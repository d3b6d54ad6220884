use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;

use super::AppState;
use crate::core::all_venues;
use crate::models::{LaneGroup, ModelSummary, VenueInfo};

/// All venues, with the artifacts and thresholds of the registered ones
pub async fn list_venues(state: web::Data<Arc<AppState>>) -> impl Responder {
    let venues: Vec<VenueInfo> = all_venues()
        .iter()
        .map(|&(code, name)| VenueInfo {
            code,
            name: name.to_string(),
            models: LaneGroup::ALL
                .iter()
                .filter_map(|&group| state.registry.resolve(name, group).ok())
                .map(|resolved| ModelSummary {
                    lane_group: resolved.lane_group,
                    file_name: resolved.file_name(),
                    threshold: resolved.threshold.value,
                    threshold_defaulted: resolved.threshold.defaulted,
                    scored_rows: 0,
                })
                .collect(),
        })
        .collect();

    HttpResponse::Ok().json(venues)
}
