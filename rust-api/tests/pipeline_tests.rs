//! End-to-end rounds through registry, model store and dispatch

use std::io::Write;
use std::path::Path;

use chakugai::core::{ModelRegistry, VenueModels};
use chakugai::data::load_raw_records;
use chakugai::models::{LaneGroup, RaceRequest, RawCompetitorRecord};
use chakugai::pipeline::{run_round, PipelineSignal};
use chakugai::predictor::ModelStore;
use chrono::NaiveDate;

/// Stump on 勝率_全国: 0.2 at or below 5.5, 0.8 above
fn stump_model(extra_feature: &str) -> String {
    format!(
        "tree
version=v3
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx=1
objective=regression
feature_names=勝率_全国 {}

Tree=0
num_leaves=2
num_cat=0
split_feature=0
split_gain=1
threshold=5.5
decision_type=2
left_child=-1
right_child=-2
leaf_value=0.2 0.8
leaf_weight=1 1
leaf_count=1 1
internal_value=0
internal_weight=0
internal_count=2
is_linear=0
shrinkage=1


end of trees

feature_importances:
勝率_全国=1
",
        extra_feature
    )
}

fn write_model(dir: &Path, name: &str, extra_feature: &str) {
    std::fs::write(dir.join(name), stump_model(extra_feature)).unwrap();
}

fn registry(dir: &Path) -> ModelRegistry {
    ModelRegistry::from_entries(
        dir,
        vec![(
            "江戸川".to_string(),
            VenueModels::new("front_0.6.txt", "outside.txt"),
        )],
    )
}

fn request() -> RaceRequest {
    RaceRequest::new(NaiveDate::from_ymd_opt(2025, 1, 25).unwrap(), "江戸川", 6)
}

fn records(win_rates: [&str; 6]) -> Vec<RawCompetitorRecord> {
    win_rates
        .iter()
        .enumerate()
        .map(|(i, rate)| RawCompetitorRecord {
            name: Some(format!("選手{}", i + 1)),
            class_code: Some("B1".to_string()),
            mean_start_timing: Some("0.16".to_string()),
            national_win_rate: Some(rate.to_string()),
            lane: i as u8 + 1,
            race_day: "25".to_string(),
            round: 6,
            ..Default::default()
        })
        .collect()
}

#[test]
fn test_round_routes_lanes_and_applies_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "front_0.6.txt", "スタート展示");
    write_model(dir.path(), "outside.txt", "クラスランク");

    let outcome = run_round(
        &request(),
        &records(["6.50", "4.00", "5.50", "7.20", "3.10", "6.00"]),
        &registry(dir.path()),
        &ModelStore::fresh(),
    );

    let lanes: Vec<u8> = outcome.predictions.iter().map(|p| p.features.lane()).collect();
    assert_eq!(lanes, vec![1, 2, 3, 4, 5, 6]);

    let flags: Vec<u8> = outcome.predictions.iter().map(|p| p.flag).collect();
    assert_eq!(flags, vec![1, 0, 0, 1, 0, 1]);

    let front = &outcome.predictions[0];
    assert_eq!(front.lane_group, LaneGroup::Lanes1To5);
    assert_eq!(front.threshold, 0.6);
    assert_eq!(front.score, 0.8);

    let outside = &outcome.predictions[5];
    assert_eq!(outside.lane_group, LaneGroup::Lane6);
    assert_eq!(outside.threshold, 0.5);

    assert_eq!(outcome.models.len(), 2);
    assert_eq!(outcome.models[0].file_name, "front_0.6.txt");
    assert_eq!(outcome.models[0].scored_rows, 5);
    assert!(!outcome.models[0].threshold_defaulted);
    assert!(outcome.models[1].threshold_defaulted);

    assert_eq!(outcome.flagged(LaneGroup::Lanes1To5), 2);
    assert_eq!(outcome.flagged(LaneGroup::Lane6), 1);
    let mean = outcome.mean_score(LaneGroup::Lanes1To5).unwrap();
    assert!((mean - 0.44).abs() < 1e-9);
}

#[test]
fn test_round_reports_defaulted_threshold_and_missing_columns() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "front_0.6.txt", "スタート展示");
    write_model(dir.path(), "outside.txt", "クラスランク");

    let outcome = run_round(
        &request(),
        &records(["5.00"; 6]),
        &registry(dir.path()),
        &ModelStore::fresh(),
    );

    assert!(outcome.has_signal(|s| matches!(
        s,
        PipelineSignal::ThresholdDefaulted { lane_group: LaneGroup::Lane6, file_name, .. }
            if file_name == "outside.txt"
    )));
    // No exhibition readings in the batch, so the column is absent
    assert!(outcome.has_signal(|s| matches!(
        s,
        PipelineSignal::MissingColumns { lane_group: LaneGroup::Lanes1To5, columns }
            if columns == &vec!["スタート展示".to_string()]
    )));
    assert!(!outcome.has_signal(|s| matches!(
        s,
        PipelineSignal::MissingColumns { lane_group: LaneGroup::Lane6, .. }
    )));
    assert_eq!(outcome.predictions.len(), 6);
}

#[test]
fn test_missing_artifact_keeps_other_group() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "front_0.6.txt", "クラスランク");

    let outcome = run_round(
        &request(),
        &records(["6.50"; 6]),
        &registry(dir.path()),
        &ModelStore::fresh(),
    );

    assert!(outcome.has_signal(|s| matches!(
        s,
        PipelineSignal::ModelUnavailable { lane_group: LaneGroup::Lane6, .. }
    )));
    assert_eq!(outcome.predictions.len(), 5);
    assert!(outcome.predictions.iter().all(|p| p.lane_group == LaneGroup::Lanes1To5));
    assert_eq!(outcome.features.len(), 6);
}

#[test]
fn test_unregistered_venue_still_derives_features() {
    let dir = tempfile::tempdir().unwrap();
    let request = RaceRequest::new(NaiveDate::from_ymd_opt(2025, 1, 25).unwrap(), "大村", 6);

    let outcome = run_round(
        &request,
        &records(["6.50"; 6]),
        &registry(dir.path()),
        &ModelStore::fresh(),
    );

    assert_eq!(
        outcome.signals,
        vec![PipelineSignal::UnsupportedVenue {
            venue: "大村".to_string()
        }]
    );
    assert!(outcome.is_empty());
    assert_eq!(outcome.features.len(), 6);
}

#[test]
fn test_cached_store_reuses_models_across_rounds() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "front_0.6.txt", "クラスランク");
    write_model(dir.path(), "outside.txt", "クラスランク");

    let registry = registry(dir.path());
    let store = ModelStore::cached();

    let first = run_round(&request(), &records(["6.50"; 6]), &registry, &store);
    // Cached boosters survive the files disappearing
    std::fs::remove_file(dir.path().join("outside.txt")).unwrap();
    let second = run_round(&request(), &records(["4.00"; 6]), &registry, &store);

    assert_eq!(first.predictions.len(), 6);
    assert_eq!(second.predictions.len(), 6);
    assert!(second.predictions.iter().all(|p| p.flag == 0));
}

#[test]
fn test_csv_records_flow_through_round() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "front_0.6.txt", "スタート展示");
    write_model(dir.path(), "outside.txt", "チルト");

    let header = "名前,年齢,体重,クラス,F数,L数,平均ST,勝率_全国,2連率_全国,3連率_全国,\
勝率_当地,2連率_当地,3連率_当地,モーターナンバー,モーター2連率,モーター3連率,\
ボートナンバー,ボート2連率,ボート3連率,コース,日,ラウンド,スタート展示,チルト";
    let mut csv = String::from(header);
    csv.push('\n');
    for lane in 1..=6 {
        let rate = if lane % 2 == 0 { "6.80" } else { "4.20" };
        csv.push_str(&format!(
            "選手{lane},30歳,52.0,B1,F0,L0,0.16,{rate},30.00%,45.00%,5.00,30.00%,45.00%,\
1{lane},35.00%,50.00%,2{lane},33.00%,48.00%,{lane},25,6,6.8{lane},0.0\n"
        ));
    }
    let path = dir.path().join("round.csv");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(csv.as_bytes())
        .unwrap();

    let records = load_raw_records(&path).unwrap();
    assert_eq!(records.len(), 6);

    let outcome = run_round(&request(), &records, &registry(dir.path()), &ModelStore::fresh());

    assert!(!outcome.has_signal(|s| matches!(s, PipelineSignal::MissingColumns { .. })));
    assert!(outcome.features.iter().all(|f| f.exhibition.is_some() && f.tilt.is_some()));
    let flags: Vec<u8> = outcome.predictions.iter().map(|p| p.flag).collect();
    assert_eq!(flags, vec![0, 1, 0, 1, 0, 1]);
}
