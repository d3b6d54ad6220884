use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::data::FeatureRow;

/// Model routing partition: lanes 1-5 share one model, lane 6 has its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneGroup {
    Lanes1To5,
    Lane6,
}

impl LaneGroup {
    pub const ALL: [LaneGroup; 2] = [LaneGroup::Lanes1To5, LaneGroup::Lane6];

    /// Group a lane belongs to; lanes outside 1-6 are never scored
    pub fn of_lane(lane: u8) -> Option<Self> {
        match lane {
            1..=5 => Some(LaneGroup::Lanes1To5),
            6 => Some(LaneGroup::Lane6),
            _ => None,
        }
    }

    pub fn contains(&self, lane: u8) -> bool {
        Self::of_lane(lane) == Some(*self)
    }

    /// Display label used by the presentation shells
    pub fn label(&self) -> &'static str {
        match self {
            LaneGroup::Lanes1To5 => "1_5号艇",
            LaneGroup::Lane6 => "6号艇",
        }
    }
}

/// One competitor as handed over by an ingestion collaborator.
///
/// Text fields are kept as delivered (percent strings, "F1", "-" for an
/// unknown mean start timing); `None` means the collaborator had no value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCompetitorRecord {
    pub name: Option<String>,
    pub age: Option<String>,
    pub weight: Option<String>,
    pub class_code: Option<String>,
    pub foul_starts: Option<String>,
    pub late_starts: Option<String>,
    pub mean_start_timing: Option<String>,
    pub national_win_rate: Option<String>,
    pub national_in2_rate: Option<String>,
    pub national_in3_rate: Option<String>,
    pub local_win_rate: Option<String>,
    pub local_in2_rate: Option<String>,
    pub local_in3_rate: Option<String>,
    pub motor_no: Option<String>,
    pub motor_in2_rate: Option<String>,
    pub motor_in3_rate: Option<String>,
    pub boat_no_equip: Option<String>,
    pub boat_in2_rate: Option<String>,
    pub boat_in3_rate: Option<String>,
    pub lane: u8,
    /// Two-digit day of month the race is held on
    pub race_day: String,
    pub round: u8,
    pub exhibition_time: Option<String>,
    pub tilt: Option<String>,
}

/// Immutable description of the round a caller wants predicted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceRequest {
    pub date: NaiveDate,
    pub venue: String,
    pub round: u8,
}

impl RaceRequest {
    pub fn new(date: NaiveDate, venue: impl Into<String>, round: u8) -> Self {
        Self {
            date,
            venue: venue.into(),
            round,
        }
    }

    /// Date as YYYYMMDD, the form the racing site expects
    pub fn date_code(&self) -> u32 {
        self.date.year() as u32 * 10_000 + self.date.month() * 100 + self.date.day()
    }

    /// Zero-padded day of month, the race-group key the feature table uses
    pub fn race_day(&self) -> String {
        self.date.format("%d").to_string()
    }
}

/// Feature row with the score of the lane-group model that covered it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRow {
    pub features: FeatureRow,
    pub lane_group: LaneGroup,
    pub score: f64,
    pub threshold: f64,
    /// 1 when `score` is strictly above `threshold`
    pub flag: u8,
}

/// Artifact actually used for one lane group of a round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub lane_group: LaneGroup,
    pub file_name: String,
    pub threshold: f64,
    pub threshold_defaulted: bool,
    pub scored_rows: usize,
}

/// Race prediction request carrying already-ingested records
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictRequest {
    pub date: NaiveDate,
    pub venue: String,
    pub round: u8,
    #[serde(default)]
    pub records: Vec<RawCompetitorRecord>,
}

impl PredictRequest {
    pub fn race_request(&self) -> RaceRequest {
        RaceRequest::new(self.date, self.venue.clone(), self.round)
    }
}

/// Race prediction request that fetches the records itself
#[derive(Debug, Serialize, Deserialize)]
pub struct LivePredictRequest {
    pub date: NaiveDate,
    pub venue: String,
    pub round: u8,
}

/// Venue listing entry
#[derive(Debug, Serialize, Deserialize)]
pub struct VenueInfo {
    pub code: u8,
    pub name: String,
    pub models: Vec<ModelSummary>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub registered_venues: usize,
    pub model_cache: bool,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
