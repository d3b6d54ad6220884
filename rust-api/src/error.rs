use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;

use crate::core::venue_code;
use crate::models::ErrorResponse;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Invalid request data
    ValidationError(String),
    /// The racing site could not be read
    UpstreamError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::UpstreamError(msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_code, message) = match self {
            AppError::ValidationError(msg) => ("validation_error", msg.clone()),
            AppError::UpstreamError(msg) => ("upstream_error", msg.clone()),
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: error_code.to_string(),
            message,
        })
    }
}

#[cfg(feature = "scraper")]
impl From<crate::scraper::ScraperError> for AppError {
    fn from(err: crate::scraper::ScraperError) -> Self {
        use crate::scraper::ScraperError;
        match err {
            ScraperError::UnknownVenue(venue) => {
                AppError::ValidationError(format!("Unknown venue: {}", venue))
            }
            other => AppError::UpstreamError(other.to_string()),
        }
    }
}

/// Validation functions
pub fn validate_round(round: u8) -> Result<(), AppError> {
    if !(1..=12).contains(&round) {
        return Err(AppError::ValidationError(format!(
            "Round must be between 1 and 12, got {}",
            round
        )));
    }
    Ok(())
}

/// Venue must be one of the 24 known venues; registration is checked later
pub fn validate_venue(venue: &str) -> Result<(), AppError> {
    if venue_code(venue).is_none() {
        return Err(AppError::ValidationError(format!(
            "Unknown venue: {}",
            venue
        )));
    }
    Ok(())
}

pub fn validate_lanes<I>(lanes: I) -> Result<(), AppError>
where
    I: IntoIterator<Item = u8>,
{
    for lane in lanes {
        if !(1..=6).contains(&lane) {
            return Err(AppError::ValidationError(format!(
                "Lane must be between 1 and 6, got {}",
                lane
            )));
        }
    }
    Ok(())
}
