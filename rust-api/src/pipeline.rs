//! One-round orchestration: derive features, resolve both lane-group models,
//! score, and collect every recoverable condition as a signal.

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::core::{ModelRegistry, RegistryError};
use crate::data::{FeatureEngineering, FeatureRow};
use crate::models::{LaneGroup, ModelSummary, PredictionRow, RaceRequest, RawCompetitorRecord};
use crate::predictor::{dispatch, reassemble, ModelStore};

/// Recoverable condition surfaced to the presentation shells
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineSignal {
    /// The artifact name carried no threshold; 0.5 was used
    ThresholdDefaulted {
        lane_group: LaneGroup,
        file_name: String,
        threshold: f64,
    },
    UnsupportedVenue {
        venue: String,
    },
    ModelUnavailable {
        lane_group: LaneGroup,
        file_name: String,
        reason: String,
    },
    /// Columns the model declares but the table lacks; scored as NaN
    MissingColumns {
        lane_group: LaneGroup,
        columns: Vec<String>,
    },
    /// Lanes are not exactly one boat in each of 1-6
    IncompleteRaceGroup {
        race_day: String,
        round: u8,
        rows: usize,
        lanes: Vec<u8>,
    },
    NoData {
        reason: String,
    },
}

impl fmt::Display for PipelineSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineSignal::ThresholdDefaulted {
                lane_group,
                file_name,
                threshold,
            } => write!(
                f,
                "{}: no threshold in {}, using {}",
                lane_group.label(),
                file_name,
                threshold
            ),
            PipelineSignal::UnsupportedVenue { venue } => {
                write!(f, "no models registered for venue {}", venue)
            }
            PipelineSignal::ModelUnavailable {
                lane_group,
                file_name,
                reason,
            } => write!(
                f,
                "{}: model {} unavailable ({})",
                lane_group.label(),
                file_name,
                reason
            ),
            PipelineSignal::MissingColumns {
                lane_group,
                columns,
            } => write!(
                f,
                "{}: {} model columns missing from the feature table: {}",
                lane_group.label(),
                columns.len(),
                columns.join(", ")
            ),
            PipelineSignal::IncompleteRaceGroup {
                race_day,
                round,
                rows,
                lanes,
            } => write!(
                f,
                "race {}_{} has {} rows in lanes {:?}; opponent features assume one boat per lane 1-6",
                race_day, round, rows, lanes
            ),
            PipelineSignal::NoData { reason } => write!(f, "no data: {}", reason),
        }
    }
}

/// Everything one round produced
#[derive(Debug, Clone, Serialize)]
pub struct RoundOutcome {
    pub request: RaceRequest,
    pub features: Vec<FeatureRow>,
    /// Lanes 1-5 predictions followed by lane 6
    pub predictions: Vec<PredictionRow>,
    pub models: Vec<ModelSummary>,
    pub signals: Vec<PipelineSignal>,
}

impl RoundOutcome {
    fn new(request: &RaceRequest) -> Self {
        Self {
            request: request.clone(),
            features: Vec::new(),
            predictions: Vec::new(),
            models: Vec::new(),
            signals: Vec::new(),
        }
    }

    /// Outcome for a round whose ingestion produced nothing usable
    pub fn no_data(request: &RaceRequest, reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(request);
        outcome.raise(PipelineSignal::NoData {
            reason: reason.into(),
        });
        outcome
    }

    fn raise(&mut self, signal: PipelineSignal) {
        warn!("{}", signal);
        self.signals.push(signal);
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn has_signal<F>(&self, pred: F) -> bool
    where
        F: Fn(&PipelineSignal) -> bool,
    {
        self.signals.iter().any(pred)
    }

    /// Predictions made by one lane group's model
    pub fn group(&self, group: LaneGroup) -> impl Iterator<Item = &PredictionRow> {
        self.predictions.iter().filter(move |p| p.lane_group == group)
    }

    pub fn flagged(&self, group: LaneGroup) -> usize {
        self.group(group).filter(|p| p.flag == 1).count()
    }

    pub fn mean_score(&self, group: LaneGroup) -> Option<f64> {
        let scores: Vec<f64> = self.group(group).map(|p| p.score).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Run the full pipeline for one round.
///
/// Never fails: unsupported venues, missing artifacts and defaulted
/// thresholds become signals, and whatever can still be scored is.
pub fn run_round(
    request: &RaceRequest,
    records: &[RawCompetitorRecord],
    registry: &ModelRegistry,
    store: &ModelStore,
) -> RoundOutcome {
    if records.is_empty() {
        return RoundOutcome::no_data(request, "no competitor records");
    }

    let mut outcome = RoundOutcome::new(request);

    for group in FeatureEngineering::incomplete_race_groups(records) {
        outcome.raise(PipelineSignal::IncompleteRaceGroup {
            rows: group.rows(),
            race_day: group.race_day,
            round: group.round,
            lanes: group.lanes,
        });
    }

    outcome.features = FeatureEngineering::derive(records);
    info!(
        "Derived {} feature rows for {} R{}",
        outcome.features.len(),
        request.venue,
        request.round
    );

    let mut scored: Vec<Vec<PredictionRow>> = Vec::with_capacity(LaneGroup::ALL.len());
    for group in LaneGroup::ALL {
        match score_group(request, group, registry, store, &mut outcome) {
            GroupResult::Scored(rows) => scored.push(rows),
            GroupResult::Skipped => scored.push(Vec::new()),
            GroupResult::VenueUnsupported => break,
        }
    }

    let mut scored = scored.into_iter();
    let lanes_1_to_5 = scored.next().unwrap_or_default();
    let lane_6 = scored.next().unwrap_or_default();
    outcome.predictions = reassemble(lanes_1_to_5, lane_6);
    outcome
}

enum GroupResult {
    Scored(Vec<PredictionRow>),
    Skipped,
    VenueUnsupported,
}

fn score_group(
    request: &RaceRequest,
    group: LaneGroup,
    registry: &ModelRegistry,
    store: &ModelStore,
    outcome: &mut RoundOutcome,
) -> GroupResult {
    let resolved = match registry.resolve(&request.venue, group) {
        Ok(resolved) => resolved,
        Err(RegistryError::UnsupportedVenue(venue)) => {
            outcome.raise(PipelineSignal::UnsupportedVenue { venue });
            return GroupResult::VenueUnsupported;
        }
    };

    if !outcome.features.iter().any(|r| group.contains(r.lane())) {
        return GroupResult::Skipped;
    }

    if resolved.threshold.defaulted {
        outcome.raise(PipelineSignal::ThresholdDefaulted {
            lane_group: group,
            file_name: resolved.file_name(),
            threshold: resolved.threshold.value,
        });
    }

    let artifact = match store.load(&resolved) {
        Ok(artifact) => artifact,
        Err(e) => {
            outcome.raise(PipelineSignal::ModelUnavailable {
                lane_group: group,
                file_name: resolved.file_name(),
                reason: e.to_string(),
            });
            return GroupResult::Skipped;
        }
    };

    let result = dispatch(&outcome.features, &artifact);
    if !result.missing_columns.is_empty() {
        outcome.raise(PipelineSignal::MissingColumns {
            lane_group: group,
            columns: result.missing_columns,
        });
    }

    outcome.models.push(ModelSummary {
        lane_group: group,
        file_name: artifact.file_name(),
        threshold: artifact.threshold(),
        threshold_defaulted: resolved.threshold.defaulted,
        scored_rows: result.predictions.len(),
    });

    GroupResult::Scored(result.predictions)
}
