//! Inference dispatch: schema alignment, scoring, binarization and lane routing

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::core::{Booster, ModelError, ResolvedArtifact};
use crate::data::FeatureRow;
use crate::models::{LaneGroup, PredictionRow};

/// Named numeric table handed to a scorer
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Table reordered to a model's declared columns
#[derive(Debug, Clone)]
pub struct AlignedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// Declared columns the table lacked, filled with NaN
    pub missing: Vec<String>,
    /// Table columns the model does not declare
    pub dropped: Vec<String>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { columns, rows }
    }

    /// Table over derived rows; columns follow the first row
    pub fn from_rows(rows: &[&FeatureRow]) -> Self {
        let columns: Vec<String> = rows
            .first()
            .map(|row| row.column_names().iter().map(|c| c.to_string()).collect())
            .unwrap_or_default();
        let index: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let values = rows
            .iter()
            .map(|row| {
                let mut values = vec![f64::NAN; columns.len()];
                for (name, value) in row.columns() {
                    if let Some(&i) = index.get(name) {
                        values[i] = value;
                    }
                }
                values
            })
            .collect();

        Self::new(columns, values)
    }

    /// Reorder to `required`, inserting NaN for absent columns and dropping extras.
    ///
    /// Missing columns stay NaN rather than 0 so the trees' own missing-value
    /// routing applies.
    pub fn align(&self, required: &[String]) -> AlignedTable {
        let index: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let positions: Vec<Option<usize>> = required
            .iter()
            .map(|c| index.get(c.as_str()).copied())
            .collect();

        let missing = required
            .iter()
            .zip(&positions)
            .filter(|(_, p)| p.is_none())
            .map(|(c, _)| c.clone())
            .collect();
        let dropped = self
            .columns
            .iter()
            .filter(|c| !required.contains(c))
            .cloned()
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|p| p.and_then(|i| row.get(i).copied()).unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();

        AlignedTable {
            columns: required.to_vec(),
            rows,
            missing,
            dropped,
        }
    }
}

/// Loaded ensemble bound to its (venue, lane group) and threshold
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub resolved: ResolvedArtifact,
    booster: Arc<Booster>,
}

impl ModelArtifact {
    pub fn new(resolved: ResolvedArtifact, booster: Arc<Booster>) -> Self {
        Self { resolved, booster }
    }

    /// Read the artifact from disk
    pub fn load(resolved: ResolvedArtifact) -> Result<Self, ModelError> {
        let booster = Booster::load(&resolved.path)?;
        Ok(Self::new(resolved, Arc::new(booster)))
    }

    pub fn lane_group(&self) -> LaneGroup {
        self.resolved.lane_group
    }

    pub fn threshold(&self) -> f64 {
        self.resolved.threshold.value
    }

    pub fn feature_names(&self) -> &[String] {
        self.booster.feature_names()
    }

    pub fn file_name(&self) -> String {
        self.resolved.file_name()
    }

    pub fn score(&self, row: &[f64]) -> f64 {
        self.booster.predict(row)
    }
}

/// Loads artifacts, optionally keeping them for reuse across rounds
pub struct ModelStore {
    cache: Option<Mutex<HashMap<(String, LaneGroup), Arc<Booster>>>>,
}

impl ModelStore {
    /// Store that reads every artifact from disk on each request
    pub fn fresh() -> Self {
        Self { cache: None }
    }

    /// Store that keeps loaded artifacts keyed by (venue, lane group)
    pub fn cached() -> Self {
        Self {
            cache: Some(Mutex::new(HashMap::new())),
        }
    }

    pub fn new(cache: bool) -> Self {
        if cache {
            Self::cached()
        } else {
            Self::fresh()
        }
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    pub fn load(&self, resolved: &ResolvedArtifact) -> Result<ModelArtifact, ModelError> {
        let Some(cache) = &self.cache else {
            return ModelArtifact::load(resolved.clone());
        };

        let key = (resolved.venue.clone(), resolved.lane_group);
        if let Some(booster) = cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            debug!("Model cache hit for {} {:?}", key.0, key.1);
            return Ok(ModelArtifact::new(resolved.clone(), booster.clone()));
        }

        // Loaded outside the lock; a concurrent load of the same key just wins the insert
        let booster = Arc::new(Booster::load(&resolved.path)?);
        cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, booster.clone());
        info!("Cached model {}", resolved.file_name());
        Ok(ModelArtifact::new(resolved.clone(), booster))
    }
}

/// Flag a score: strictly above the threshold
pub fn binarize(score: f64, threshold: f64) -> u8 {
    if score > threshold {
        1
    } else {
        0
    }
}

/// Result of scoring one lane group
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub predictions: Vec<PredictionRow>,
    pub missing_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
}

/// Score the rows of the artifact's lane group, reporting schema differences
pub fn dispatch(rows: &[FeatureRow], artifact: &ModelArtifact) -> Dispatch {
    let group = artifact.lane_group();
    let selected: Vec<&FeatureRow> = rows.iter().filter(|r| group.contains(r.lane())).collect();
    if selected.is_empty() {
        return Dispatch {
            predictions: Vec::new(),
            missing_columns: Vec::new(),
            dropped_columns: Vec::new(),
        };
    }

    let aligned = FeatureTable::from_rows(&selected).align(artifact.feature_names());
    let threshold = artifact.threshold();

    let predictions = selected
        .iter()
        .zip(&aligned.rows)
        .map(|(row, values)| {
            let score = artifact.score(values);
            PredictionRow {
                features: (*row).clone(),
                lane_group: group,
                score,
                threshold,
                flag: binarize(score, threshold),
            }
        })
        .collect::<Vec<_>>();

    debug!(
        "Scored {} rows with {} ({} missing, {} dropped columns)",
        predictions.len(),
        artifact.file_name(),
        aligned.missing.len(),
        aligned.dropped.len()
    );

    Dispatch {
        predictions,
        missing_columns: aligned.missing,
        dropped_columns: aligned.dropped,
    }
}

/// Score the rows of the artifact's lane group
pub fn predict(rows: &[FeatureRow], artifact: &ModelArtifact) -> Vec<PredictionRow> {
    dispatch(rows, artifact).predictions
}

/// Lanes 1-5 subset followed by the lane 6 subset, each in its own order
pub fn reassemble(lanes_1_to_5: Vec<PredictionRow>, lane_6: Vec<PredictionRow>) -> Vec<PredictionRow> {
    let mut combined = lanes_1_to_5;
    combined.extend(lane_6);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Threshold;
    use crate::data::FeatureEngineering;
    use crate::models::RawCompetitorRecord;
    use std::path::PathBuf;

    /// Regression stump on コース: lanes up to 5.5 score `low`, lane 6 scores `high`
    fn lane_stump(low: f64, high: f64, extra_feature: &str) -> Booster {
        let text = format!(
            "tree
num_class=1
max_feature_idx=1
objective=regression
feature_names=コース {}

Tree=0
num_leaves=2
num_cat=0
split_feature=0
threshold=5.5
decision_type=2
left_child=-1
right_child=-2
leaf_value={} {}
is_linear=0
shrinkage=1

end of trees
",
            extra_feature, low, high
        );
        Booster::parse(&text).unwrap()
    }

    fn artifact(group: LaneGroup, threshold: f64, booster: Booster) -> ModelArtifact {
        ModelArtifact::new(
            ResolvedArtifact {
                venue: "江戸川".to_string(),
                lane_group: group,
                path: PathBuf::from(format!("test_{}.txt", threshold)),
                threshold: Threshold {
                    value: threshold,
                    defaulted: false,
                },
            },
            Arc::new(booster),
        )
    }

    fn race_rows() -> Vec<FeatureRow> {
        let records: Vec<RawCompetitorRecord> = (1..=6)
            .map(|lane| RawCompetitorRecord {
                name: Some(format!("選手{}", lane)),
                class_code: Some("B1".to_string()),
                national_win_rate: Some("5.00".to_string()),
                lane,
                race_day: "25".to_string(),
                round: 1,
                ..Default::default()
            })
            .collect();
        FeatureEngineering::derive(&records)
    }

    #[test]
    fn test_align_fills_and_drops() {
        let table = FeatureTable::new(
            vec!["A".to_string(), "C".to_string(), "D".to_string()],
            vec![vec![1.0, 3.0, 4.0], vec![5.0, 7.0, 8.0]],
        );
        let required = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let aligned = table.align(&required);

        assert_eq!(aligned.columns, required);
        assert_eq!(aligned.missing, vec!["B".to_string()]);
        assert_eq!(aligned.dropped, vec!["D".to_string()]);
        assert_eq!(aligned.rows[0][0], 1.0);
        assert!(aligned.rows[0][1].is_nan());
        assert_eq!(aligned.rows[0][2], 3.0);
        assert_eq!(aligned.rows[1][2], 7.0);
    }

    #[test]
    fn test_align_follows_model_order() {
        let table = FeatureTable::new(
            vec!["A".to_string(), "B".to_string()],
            vec![vec![1.0, 2.0]],
        );
        let aligned = table.align(&["B".to_string(), "A".to_string()]);
        assert_eq!(aligned.rows[0], vec![2.0, 1.0]);
        assert!(aligned.missing.is_empty());
        assert!(aligned.dropped.is_empty());
    }

    #[test]
    fn test_lane_routing_exactness() {
        let rows = race_rows();
        let front = artifact(LaneGroup::Lanes1To5, 0.5, lane_stump(0.2, 0.9, "勝率_全国"));
        let outside = artifact(LaneGroup::Lane6, 0.5, lane_stump(0.2, 0.9, "勝率_全国"));

        let front_rows = predict(&rows, &front);
        let outside_rows = predict(&rows, &outside);

        let front_lanes: Vec<u8> = front_rows.iter().map(|p| p.features.lane()).collect();
        assert_eq!(front_lanes, vec![1, 2, 3, 4, 5]);
        assert_eq!(outside_rows.len(), 1);
        assert_eq!(outside_rows[0].features.lane(), 6);
        assert_eq!(outside_rows[0].lane_group, LaneGroup::Lane6);

        let all = reassemble(front_rows, outside_rows);
        let mut lanes: Vec<u8> = all.iter().map(|p| p.features.lane()).collect();
        assert_eq!(lanes, vec![1, 2, 3, 4, 5, 6]);
        lanes.dedup();
        assert_eq!(lanes.len(), 6);
    }

    #[test]
    fn test_scores_and_flags() {
        let rows = race_rows();
        let outside = artifact(LaneGroup::Lane6, 0.5, lane_stump(0.2, 0.9, "勝率_全国"));
        let predictions = predict(&rows, &outside);
        assert_eq!(predictions[0].score, 0.9);
        assert_eq!(predictions[0].flag, 1);
        assert_eq!(predictions[0].threshold, 0.5);

        let front = artifact(LaneGroup::Lanes1To5, 0.5, lane_stump(0.2, 0.9, "勝率_全国"));
        assert!(predict(&rows, &front).iter().all(|p| p.flag == 0));
    }

    #[test]
    fn test_binarization_boundary() {
        assert_eq!(binarize(0.5, 0.5), 0);
        assert_eq!(binarize(0.5000001, 0.5), 1);
        assert_eq!(binarize(0.49, 0.5), 0);

        let rows = race_rows();
        let front = artifact(LaneGroup::Lanes1To5, 0.5, lane_stump(0.5, 0.9, "勝率_全国"));
        assert!(predict(&rows, &front).iter().all(|p| p.score == 0.5 && p.flag == 0));
    }

    #[test]
    fn test_dispatch_reports_missing_columns() {
        let rows = race_rows();
        let front = artifact(LaneGroup::Lanes1To5, 0.5, lane_stump(0.2, 0.9, "未知の特徴量"));
        let result = dispatch(&rows, &front);

        assert_eq!(result.predictions.len(), 5);
        assert_eq!(result.missing_columns, vec!["未知の特徴量".to_string()]);
        assert!(result.dropped_columns.contains(&"体重".to_string()));
    }

    #[test]
    fn test_empty_input() {
        let front = artifact(LaneGroup::Lanes1To5, 0.5, lane_stump(0.2, 0.9, "勝率_全国"));
        assert!(predict(&[], &front).is_empty());
    }

    #[test]
    fn test_feature_table_from_rows() {
        let rows = race_rows();
        let refs: Vec<&FeatureRow> = rows.iter().collect();
        let table = FeatureTable::from_rows(&refs);
        assert_eq!(table.rows.len(), 6);
        assert_eq!(table.columns.len(), rows[0].column_names().len());
        let lane_idx = table.columns.iter().position(|c| c == "コース").unwrap();
        assert_eq!(table.rows[5][lane_idx], 6.0);
    }

    #[test]
    fn test_store_modes() {
        assert!(!ModelStore::fresh().is_caching());
        assert!(ModelStore::cached().is_caching());
        assert!(ModelStore::new(true).is_caching());
    }
}
