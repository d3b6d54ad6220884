use actix_web::{web, HttpResponse};
use std::sync::Arc;

use super::AppState;
use crate::error::{validate_lanes, validate_round, validate_venue, AppError};
use crate::models::PredictRequest;
use crate::pipeline::run_round;

/// Predict a round from records supplied in the request
pub async fn predict_race(
    state: web::Data<Arc<AppState>>,
    req: web::Json<PredictRequest>,
) -> Result<HttpResponse, AppError> {
    validate_round(req.round)?;
    validate_venue(&req.venue)?;
    validate_lanes(req.records.iter().map(|r| r.lane))?;

    let request = req.race_request();
    let outcome = run_round(&request, &req.records, &state.registry, &state.store);

    Ok(HttpResponse::Ok().json(outcome))
}

/// Scrape a round from the racing site and predict it
#[cfg(feature = "scraper")]
pub async fn predict_live(
    state: web::Data<Arc<AppState>>,
    req: web::Json<crate::models::LivePredictRequest>,
) -> Result<HttpResponse, AppError> {
    use crate::models::RaceRequest;
    use crate::pipeline::RoundOutcome;
    use crate::scraper::ScraperError;

    validate_round(req.round)?;
    validate_venue(&req.venue)?;

    let request = RaceRequest::new(req.date, req.venue.clone(), req.round);
    let outcome = match state.scraper.scrape_round(&request).await {
        Ok(records) => run_round(&request, &records, &state.registry, &state.store),
        Err(ScraperError::NoRaceData) => RoundOutcome::no_data(&request, "race not found"),
        Err(e) => return Err(e.into()),
    };

    Ok(HttpResponse::Ok().json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ModelRegistry;
    use crate::handlers::{configure, test_support};
    use crate::models::ErrorResponse;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};

    fn records_json() -> Value {
        let records: Vec<Value> = (1..=6)
            .map(|lane| {
                json!({
                    "name": format!("選手{}", lane),
                    "class_code": "B1",
                    "national_win_rate": "5.50",
                    "lane": lane,
                    "race_day": "25",
                    "round": 3
                })
            })
            .collect();
        Value::Array(records)
    }

    #[actix_web::test]
    async fn test_predict_unregistered_venue() {
        let state = test_support::state(ModelRegistry::builtin("."));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({
                "date": "2025-01-25",
                "venue": "大村",
                "round": 3,
                "records": records_json()
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["features"].as_array().unwrap().len(), 6);
        assert!(body["predictions"].as_array().unwrap().is_empty());
        assert_eq!(body["signals"][0]["kind"], "unsupported_venue");
    }

    #[actix_web::test]
    async fn test_predict_rejects_bad_round() {
        let state = test_support::state(ModelRegistry::builtin("."));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({
                "date": "2025-01-25",
                "venue": "江戸川",
                "round": 13,
                "records": []
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "validation_error");
    }

    #[actix_web::test]
    async fn test_predict_rejects_unknown_venue() {
        let state = test_support::state(ModelRegistry::builtin("."));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({
                "date": "2025-01-25",
                "venue": "Atlantis",
                "round": 1
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_predict_empty_records_is_no_data() {
        let state = test_support::state(ModelRegistry::builtin("."));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/predict")
            .set_json(json!({
                "date": "2025-01-25",
                "venue": "江戸川",
                "round": 1
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["signals"][0]["kind"], "no_data");
    }
}
