//! Venue table, per-venue model artifacts and decision thresholds

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::models::LaneGroup;

/// Threshold used when an artifact's file name carries none
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Directory holding the January models, relative to the model directory
const MODEL_SUBDIR: &str = "モデル/一月用モデル";

/// Registered artifacts: (venue, lanes 1-5 file, lane 6 file)
const MODEL_TABLE: [(&str, &str, &str); 7] = [
    (
        "桐生",
        "桐生1_5_78910_56位モデル_0125_0.68.txt",
        "桐生6_78910_56位モデル_0125_0.64.txt",
    ),
    (
        "びわこ",
        "びわこ1_5_78910_456位モデル_0125_0.79.txt",
        "びわこ6_78910_56位モデル_0125_0.63.txt",
    ),
    (
        "津",
        "津1_5_78910_456位モデル_0125_0.72.txt",
        "津6_78910_456位モデル_0125_0.83.txt",
    ),
    (
        "江戸川",
        "江戸川1_5_78910_456位モデル_0125_0.82.txt",
        "江戸川6_78910_3456位モデル_0125_0.95.txt",
    ),
    (
        "徳山",
        "徳山1_5_78910_56位モデル_0125_0.68.txt",
        "徳山6_78910_56位モデル_0125_0.74.txt",
    ),
    (
        "下関",
        "下関1_5_78910_56位モデル_0125_0.8.txt",
        "下関6_78910_56位モデル_0125_0.53.txt",
    ),
    (
        "福岡",
        "福岡1_5_78910_456位モデル_0125_0.76.txt",
        "福岡6_78910_456位モデル_0125_0.82.txt",
    ),
];

/// All 24 venues by official code
const VENUES: [(u8, &str); 24] = [
    (1, "桐生"),
    (2, "戸田"),
    (3, "江戸川"),
    (4, "平和島"),
    (5, "多摩川"),
    (6, "浜名湖"),
    (7, "蒲郡"),
    (8, "常滑"),
    (9, "津"),
    (10, "三国"),
    (11, "びわこ"),
    (12, "住之江"),
    (13, "尼崎"),
    (14, "鳴門"),
    (15, "丸亀"),
    (16, "児島"),
    (17, "宮島"),
    (18, "徳山"),
    (19, "下関"),
    (20, "若松"),
    (21, "芦屋"),
    (22, "福岡"),
    (23, "唐津"),
    (24, "大村"),
];

/// Venue name for an official code
pub fn venue_name(code: u8) -> Option<&'static str> {
    VENUES.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Official code for a venue name
pub fn venue_code(name: &str) -> Option<u8> {
    VENUES.iter().find(|(_, n)| *n == name).map(|(code, _)| *code)
}

/// Every venue in code order
pub fn all_venues() -> &'static [(u8, &'static str)] {
    &VENUES
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unsupported venue: {0}")]
    UnsupportedVenue(String),
}

/// Decision threshold and whether it had to be defaulted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub value: f64,
    pub defaulted: bool,
}

fn threshold_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_(\d+\.\d+)\.[A-Za-z0-9]+$").unwrap())
}

/// Read the decision threshold from the `_<float>.<ext>` suffix of a file name
pub fn extract_threshold(path: &Path) -> Threshold {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    threshold_pattern()
        .captures(&file_name)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .map(|value| Threshold {
            value,
            defaulted: false,
        })
        .unwrap_or(Threshold {
            value: DEFAULT_THRESHOLD,
            defaulted: true,
        })
}

/// Artifact file names for one venue
#[derive(Debug, Clone, PartialEq)]
pub struct VenueModels {
    pub lanes_1_to_5: PathBuf,
    pub lane_6: PathBuf,
}

impl VenueModels {
    pub fn new(lanes_1_to_5: impl Into<PathBuf>, lane_6: impl Into<PathBuf>) -> Self {
        Self {
            lanes_1_to_5: lanes_1_to_5.into(),
            lane_6: lane_6.into(),
        }
    }

    pub fn path(&self, group: LaneGroup) -> &Path {
        match group {
            LaneGroup::Lanes1To5 => &self.lanes_1_to_5,
            LaneGroup::Lane6 => &self.lane_6,
        }
    }
}

/// Artifact chosen for a (venue, lane group)
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArtifact {
    pub venue: String,
    pub lane_group: LaneGroup,
    pub path: PathBuf,
    pub threshold: Threshold,
}

impl ResolvedArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Static mapping from venue to its two artifacts
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    base_dir: PathBuf,
    entries: Vec<(String, VenueModels)>,
}

impl ModelRegistry {
    /// Registry of the deployed artifacts under `base_dir`
    pub fn builtin<P: AsRef<Path>>(base_dir: P) -> Self {
        let subdir = Path::new(MODEL_SUBDIR);
        Self::from_entries(
            base_dir,
            MODEL_TABLE.iter().map(|(venue, lanes_1_to_5, lane_6)| {
                (
                    venue.to_string(),
                    VenueModels::new(subdir.join(lanes_1_to_5), subdir.join(lane_6)),
                )
            }),
        )
    }

    /// Registry over arbitrary entries; relative paths resolve against `base_dir`
    pub fn from_entries<P, I>(base_dir: P, entries: I) -> Self
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = (String, VenueModels)>,
    {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            entries: entries.into_iter().collect(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Registered venue names in table order
    pub fn venues(&self) -> Vec<&str> {
        self.entries.iter().map(|(venue, _)| venue.as_str()).collect()
    }

    pub fn is_registered(&self, venue: &str) -> bool {
        self.entries.iter().any(|(v, _)| v == venue)
    }

    /// Artifact path and threshold for a venue's lane group
    pub fn resolve(&self, venue: &str, group: LaneGroup) -> Result<ResolvedArtifact, RegistryError> {
        let models = self
            .entries
            .iter()
            .find(|(v, _)| v == venue)
            .map(|(_, models)| models)
            .ok_or_else(|| RegistryError::UnsupportedVenue(venue.to_string()))?;

        let path = self.base_dir.join(models.path(group));
        let threshold = extract_threshold(&path);

        Ok(ResolvedArtifact {
            venue: venue.to_string(),
            lane_group: group,
            path,
            threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_threshold() {
        let t = extract_threshold(Path::new("江戸川6_78910_3456位モデル_0125_0.95.txt"));
        assert_eq!(t, Threshold { value: 0.95, defaulted: false });

        let t = extract_threshold(Path::new("モデル/一月用モデル/下関1_5_78910_56位モデル_0125_0.8.txt"));
        assert_eq!(t.value, 0.8);
        assert!(!t.defaulted);
    }

    #[test]
    fn test_extract_threshold_defaults() {
        let t = extract_threshold(Path::new("model.txt"));
        assert_eq!(t, Threshold { value: DEFAULT_THRESHOLD, defaulted: true });

        // Integer suffix and missing extension do not count
        assert!(extract_threshold(Path::new("model_1.txt")).defaulted);
        assert!(extract_threshold(Path::new("model_0.7")).defaulted);
        // The number must sit right before the extension
        assert!(extract_threshold(Path::new("model_0.7_final.txt")).defaulted);
    }

    #[test]
    fn test_extract_threshold_any_extension() {
        let t = extract_threshold(Path::new("/models/lane6_0.61.bin"));
        assert_eq!(t.value, 0.61);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ModelRegistry::builtin("/srv/models");
        assert_eq!(registry.venues().len(), 7);
        assert!(registry.is_registered("江戸川"));
        assert!(!registry.is_registered("大村"));

        let resolved = registry.resolve("江戸川", LaneGroup::Lane6).unwrap();
        assert_eq!(resolved.threshold.value, 0.95);
        assert_eq!(resolved.file_name(), "江戸川6_78910_3456位モデル_0125_0.95.txt");
        assert!(resolved.path.starts_with("/srv/models/モデル/一月用モデル"));

        let resolved = registry.resolve("江戸川", LaneGroup::Lanes1To5).unwrap();
        assert_eq!(resolved.threshold.value, 0.82);
    }

    #[test]
    fn test_every_builtin_threshold_parses() {
        let registry = ModelRegistry::builtin(".");
        for venue in registry.venues() {
            for group in LaneGroup::ALL {
                let resolved = registry.resolve(venue, group).unwrap();
                assert!(!resolved.threshold.defaulted, "{} {:?}", venue, group);
            }
        }
    }

    #[test]
    fn test_unsupported_venue() {
        let registry = ModelRegistry::builtin(".");
        assert_eq!(
            registry.resolve("大村", LaneGroup::Lanes1To5),
            Err(RegistryError::UnsupportedVenue("大村".to_string()))
        );
    }

    #[test]
    fn test_venue_lookup() {
        assert_eq!(venue_name(1), Some("桐生"));
        assert_eq!(venue_name(16), Some("児島"));
        assert_eq!(venue_name(24), Some("大村"));
        assert_eq!(venue_name(99), None);
        assert_eq!(venue_code("江戸川"), Some(3));
        assert_eq!(venue_code("不明"), None);
        assert_eq!(all_venues().len(), 24);
    }
}
