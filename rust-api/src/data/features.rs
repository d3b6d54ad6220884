//! Feature Engineering
//!
//! Turns raw competitor records into the fully numeric table the pretrained
//! models were fitted on: cleaned scalars, single-row ratios, race-wide
//! aggregates, opponent-relative deltas, and pre-race exhibition/tilt features.
//!
//! Column identifiers are the ones the model artifacts declare, so they stay
//! exactly as the training table named them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::normalize::{
    class_rank, opt, parse_age, parse_foul_count, parse_mean_start_timing, parse_numeric,
    parse_rate, parse_reading, parse_weight,
};
use crate::models::RawCompetitorRecord;

/// Boats per race; the opponent-mean formula assumes a full field
pub const RACE_SIZE: usize = 6;

/// Offset keeping the start-timing reciprocals bounded near zero
const ST_OFFSET: f64 = 0.01;

/// Lane advantage score (lane 1 is most advantageous)
fn lane_advantage(lane: u8) -> f64 {
    match lane {
        1 => 1.0,
        2 => 0.8,
        3 => 0.6,
        4 => 0.4,
        5 => 0.2,
        6 => 0.0,
        _ => 0.5,
    }
}

/// Tilt setting to category; settings outside the three standard ones map to 0
fn tilt_category(tilt: f64) -> f64 {
    if tilt == -0.5 {
        -1.0
    } else if tilt == 0.5 {
        1.0
    } else {
        0.0
    }
}

macro_rules! feature_group {
    (
        $(#[$attr:meta])*
        pub struct $name:ident {
            $($(#[$field_attr:meta])* $field:ident => $column:literal,)*
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $($(#[$field_attr])* pub $field: f64,)*
        }

        impl $name {
            /// Column identifiers, in table order
            pub const COLUMNS: &'static [&'static str] = &[$($column),*];

            /// Values in the same order as `COLUMNS`
            pub fn values(&self) -> Vec<f64> {
                vec![$(self.$field),*]
            }

            fn scrub_non_finite(&mut self) {
                $(if !self.$field.is_finite() {
                    self.$field = 0.0;
                })*
            }
        }
    };
}

feature_group! {
    /// Cleaned versions of the raw record fields
    pub struct BaseFeatures {
        age => "年齢",
        weight => "体重",
        /// Class code coerced to a number; the letter codes carry 0 here
        class_code => "クラス",
        foul_starts => "F数",
        mean_start_timing => "平均ST",
        national_win_rate => "勝率_全国",
        national_in2_rate => "2連率_全国",
        national_in3_rate => "3連率_全国",
        local_win_rate => "勝率_当地",
        local_in2_rate => "2連率_当地",
        local_in3_rate => "3連率_当地",
        motor_no => "モーターナンバー",
        motor_in2_rate => "モーター2連率",
        motor_in3_rate => "モーター3連率",
        boat_no => "ボートナンバー",
        boat_in2_rate => "ボート2連率",
        boat_in3_rate => "ボート3連率",
        lane => "コース",
        race_day => "日",
        round => "ラウンド",
    }
}

feature_group! {
    /// Features computed from a single row
    pub struct DerivedFeatures {
        class_rank => "クラスランク",
        st_stability => "ST安定スコア",
        win_rate_diff => "勝率_diff",
        in2_rate_diff => "2連率_diff",
        in3_rate_diff => "3連率_diff",
        win_rate_combined => "勝率総合",
        placing_stability => "連対安定度",
        motor_power => "モーターパワー",
        boat_power => "ボートパワー",
        equipment_gap => "機力差",
        equipment_power => "総合機力",
        lane_advantage => "イン有利スコア",
        lane_reciprocal => "コース逆数",
        overall_power => "総合力スコア",
        lane_fit_score => "コース適応スコア",
        class_power_score => "クラス機力スコア",
        st_win_link => "ST勝率連動",
        weight_st_ratio => "体重ST比",
    }
}

feature_group! {
    /// Race-group mean/max/min broadcast back onto every row of the race
    pub struct RaceAggregates {
        national_win_rate_mean => "勝率_全国_mean_全体",
        national_win_rate_max => "勝率_全国_max_全体",
        national_win_rate_min => "勝率_全国_min_全体",
        local_win_rate_mean => "勝率_当地_mean_全体",
        local_win_rate_max => "勝率_当地_max_全体",
        local_win_rate_min => "勝率_当地_min_全体",
        motor_power_mean => "モーターパワー_mean_全体",
        motor_power_max => "モーターパワー_max_全体",
        motor_power_min => "モーターパワー_min_全体",
        boat_power_mean => "ボートパワー_mean_全体",
        boat_power_max => "ボートパワー_max_全体",
        boat_power_min => "ボートパワー_min_全体",
        overall_power_mean => "総合力スコア_mean_全体",
        overall_power_max => "総合力スコア_max_全体",
        overall_power_min => "総合力スコア_min_全体",
        class_rank_mean => "クラスランク_mean_全体",
        class_rank_max => "クラスランク_max_全体",
        class_rank_min => "クラスランク_min_全体",
        mean_start_timing_mean => "平均ST_mean_全体",
        mean_start_timing_max => "平均ST_max_全体",
        mean_start_timing_min => "平均ST_min_全体",
    }
}

feature_group! {
    /// Own value against the mean of the other five boats
    pub struct OpponentFeatures {
        national_win_rate_opp_mean => "勝率_全国_敵平均",
        national_win_rate_opp_diff => "勝率_全国_差",
        motor_power_opp_mean => "モーターパワー_敵平均",
        motor_power_opp_diff => "モーターパワー_差",
        overall_power_opp_mean => "総合力スコア_敵平均",
        overall_power_opp_diff => "総合力スコア_差",
        class_rank_opp_mean => "敵平均クラスランク",
        /// 1 when own class rank beats the opponents' mean
        class_advantage => "クラス優位",
    }
}

feature_group! {
    /// Pre-race exhibition time relative to the rest of the race
    pub struct ExhibitionFeatures {
        exhibition_time => "スタート展示",
        diff_from_race_mean => "スタート展示_平均との差",
        /// Min-method rank within the race (ties share the lowest rank)
        race_rank => "スタート展示_順位",
        gap_to_fastest => "スタート展示_最速差",
        /// Deviation from the mean of the same lane across the batch;
        /// a single-race batch has one boat per lane, so this is 0
        diff_from_lane_mean => "スタート展示_コース平均との差",
        lane_x_exhibition => "コース_スタート展示",
    }
}

feature_group! {
    /// Propeller tilt setting and its interactions
    pub struct TiltFeatures {
        tilt => "チルト",
        positive => "チルト_プラス",
        category => "チルト_cat",
        tilt_x_lane => "チルト_コース",
    }
}

/// Column of the exhibition × tilt interaction, present only when both exist
pub const EXHIBITION_TILT_COLUMN: &str = "スタート展示_チルト";

/// Identity of a row; not part of the model input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMeta {
    pub race_day: String,
    pub round: u8,
    pub lane: u8,
    pub racer_name: Option<String>,
    pub class_code: Option<String>,
}

/// Fully numeric feature row derived 1:1 from a raw record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub meta: RowMeta,
    pub base: BaseFeatures,
    pub derived: DerivedFeatures,
    pub aggregates: RaceAggregates,
    pub opponent: OpponentFeatures,
    pub exhibition: Option<ExhibitionFeatures>,
    pub tilt: Option<TiltFeatures>,
    pub exhibition_x_tilt: Option<f64>,
}

impl FeatureRow {
    pub fn lane(&self) -> u8 {
        self.meta.lane
    }

    /// (column, value) pairs in table order
    pub fn columns(&self) -> Vec<(&'static str, f64)> {
        let mut columns: Vec<(&'static str, f64)> = Vec::with_capacity(90);
        columns.extend(BaseFeatures::COLUMNS.iter().copied().zip(self.base.values()));
        columns.extend(DerivedFeatures::COLUMNS.iter().copied().zip(self.derived.values()));
        columns.extend(RaceAggregates::COLUMNS.iter().copied().zip(self.aggregates.values()));
        columns.extend(OpponentFeatures::COLUMNS.iter().copied().zip(self.opponent.values()));
        if let Some(ref exhibition) = self.exhibition {
            columns.extend(ExhibitionFeatures::COLUMNS.iter().copied().zip(exhibition.values()));
        }
        if let Some(ref tilt) = self.tilt {
            columns.extend(TiltFeatures::COLUMNS.iter().copied().zip(tilt.values()));
        }
        if let Some(value) = self.exhibition_x_tilt {
            columns.push((EXHIBITION_TILT_COLUMN, value));
        }
        columns
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns().into_iter().map(|(name, _)| name).collect()
    }

    /// Look up a single column by identifier
    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns()
            .into_iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }
}

/// Record after scalar normalization; `None` marks a missing value
#[derive(Debug, Clone)]
struct NormalizedRecord {
    age: Option<f64>,
    weight: Option<f64>,
    class_code: Option<f64>,
    class_rank: f64,
    foul_starts: f64,
    mean_start_timing: Option<f64>,
    national_win_rate: f64,
    national_in2_rate: f64,
    national_in3_rate: f64,
    local_win_rate: f64,
    local_in2_rate: f64,
    local_in3_rate: f64,
    motor_no: f64,
    motor_in2_rate: f64,
    motor_in3_rate: f64,
    boat_no: f64,
    boat_in2_rate: f64,
    boat_in3_rate: f64,
    lane: u8,
    race_day: Option<f64>,
    round: u8,
    exhibition_time: Option<f64>,
    tilt: Option<f64>,
}

impl NormalizedRecord {
    fn from_raw(raw: &RawCompetitorRecord) -> Self {
        // Rates and equipment numbers are zero-filled straight away; age,
        // weight and mean ST stay missing until the final cleanup.
        let rate = |field: &Option<String>| opt(field, parse_rate).unwrap_or(0.0);
        let number = |field: &Option<String>| opt(field, parse_numeric).unwrap_or(0.0);

        Self {
            age: opt(&raw.age, parse_age),
            weight: opt(&raw.weight, parse_weight),
            class_code: opt(&raw.class_code, parse_numeric),
            class_rank: raw.class_code.as_deref().map(class_rank).unwrap_or(0.0),
            foul_starts: raw
                .foul_starts
                .as_deref()
                .map(parse_foul_count)
                .unwrap_or(0) as f64,
            mean_start_timing: opt(&raw.mean_start_timing, parse_mean_start_timing),
            national_win_rate: rate(&raw.national_win_rate),
            national_in2_rate: rate(&raw.national_in2_rate),
            national_in3_rate: rate(&raw.national_in3_rate),
            local_win_rate: rate(&raw.local_win_rate),
            local_in2_rate: rate(&raw.local_in2_rate),
            local_in3_rate: rate(&raw.local_in3_rate),
            motor_no: number(&raw.motor_no),
            motor_in2_rate: rate(&raw.motor_in2_rate),
            motor_in3_rate: rate(&raw.motor_in3_rate),
            boat_no: number(&raw.boat_no_equip),
            boat_in2_rate: rate(&raw.boat_in2_rate),
            boat_in3_rate: rate(&raw.boat_in3_rate),
            lane: raw.lane,
            race_day: parse_numeric(&raw.race_day),
            round: raw.round,
            exhibition_time: opt(&raw.exhibition_time, parse_reading),
            tilt: opt(&raw.tilt, parse_reading),
        }
    }
}

/// Single-row features, still carrying missing values
#[derive(Debug, Clone)]
struct RowDraft {
    meta: RowMeta,
    record: NormalizedRecord,
    st_stability: Option<f64>,
    win_rate_diff: f64,
    in2_rate_diff: f64,
    in3_rate_diff: f64,
    win_rate_combined: f64,
    placing_stability: f64,
    motor_power: f64,
    boat_power: f64,
    equipment_gap: f64,
    equipment_power: f64,
    lane_advantage: f64,
    lane_reciprocal: f64,
    overall_power: f64,
    lane_fit_score: f64,
    class_power_score: f64,
    st_win_link: Option<f64>,
    weight_st_ratio: Option<f64>,
}

impl RowDraft {
    fn new(raw: &RawCompetitorRecord) -> Self {
        let r = NormalizedRecord::from_raw(raw);

        let st_stability = r.mean_start_timing.map(|st| 1.0 / (st + ST_OFFSET));
        let win_rate_combined = (r.national_win_rate + r.local_win_rate) / 2.0;
        let motor_power = (r.motor_in2_rate + r.motor_in3_rate) / 2.0;
        let boat_power = (r.boat_in2_rate + r.boat_in3_rate) / 2.0;
        let equipment_power = (motor_power + boat_power) / 2.0;
        let lane_advantage = lane_advantage(r.lane);

        Self {
            meta: RowMeta {
                race_day: raw.race_day.clone(),
                round: raw.round,
                lane: raw.lane,
                racer_name: raw.name.clone(),
                class_code: raw.class_code.clone(),
            },
            st_stability,
            win_rate_diff: r.local_win_rate - r.national_win_rate,
            in2_rate_diff: r.local_in2_rate - r.national_in2_rate,
            in3_rate_diff: r.local_in3_rate - r.national_in3_rate,
            win_rate_combined,
            placing_stability: (r.national_in2_rate + r.national_in3_rate) / 2.0,
            motor_power,
            boat_power,
            equipment_gap: motor_power - boat_power,
            equipment_power,
            lane_advantage,
            lane_reciprocal: if r.lane == 0 { 0.0 } else { 1.0 / r.lane as f64 },
            overall_power: (win_rate_combined + equipment_power) / 2.0,
            lane_fit_score: lane_advantage * r.local_win_rate,
            class_power_score: r.class_rank * equipment_power,
            st_win_link: st_stability.map(|s| s * r.national_win_rate),
            weight_st_ratio: r
                .weight
                .zip(r.mean_start_timing)
                .map(|(w, st)| w / (st + ST_OFFSET)),
            record: r,
        }
    }

    fn race_key(&self) -> RaceKey {
        (self.meta.race_day.clone(), self.meta.round)
    }
}

/// Race-group key: race day + round
type RaceKey = (String, u8);

/// Mean/max/min over the present values of a group
#[derive(Debug, Clone, Copy, Default)]
struct GroupStat {
    mean: Option<f64>,
    max: Option<f64>,
    min: Option<f64>,
}

impl GroupStat {
    fn over<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let present: Vec<f64> = values.into_iter().flatten().collect();
        if present.is_empty() {
            return Self::default();
        }
        let sum: f64 = present.iter().sum();
        Self {
            mean: Some(sum / present.len() as f64),
            max: present.iter().cloned().reduce(f64::max),
            min: present.iter().cloned().reduce(f64::min),
        }
    }
}

/// Race-group statistics shared by every row of one race
#[derive(Debug, Clone, Default)]
struct RaceStats {
    national_win_rate: GroupStat,
    local_win_rate: GroupStat,
    motor_power: GroupStat,
    boat_power: GroupStat,
    overall_power: GroupStat,
    class_rank: GroupStat,
    mean_start_timing: GroupStat,
    exhibition: Vec<f64>,
}

impl RaceStats {
    fn collect(drafts: &[&RowDraft]) -> Self {
        Self {
            national_win_rate: GroupStat::over(
                drafts.iter().map(|d| Some(d.record.national_win_rate)),
            ),
            local_win_rate: GroupStat::over(drafts.iter().map(|d| Some(d.record.local_win_rate))),
            motor_power: GroupStat::over(drafts.iter().map(|d| Some(d.motor_power))),
            boat_power: GroupStat::over(drafts.iter().map(|d| Some(d.boat_power))),
            overall_power: GroupStat::over(drafts.iter().map(|d| Some(d.overall_power))),
            class_rank: GroupStat::over(drafts.iter().map(|d| Some(d.record.class_rank))),
            mean_start_timing: GroupStat::over(drafts.iter().map(|d| d.record.mean_start_timing)),
            exhibition: drafts
                .iter()
                .map(|d| d.record.exhibition_time.unwrap_or(0.0))
                .collect(),
        }
    }
}

/// Mean of the other boats, given the race mean and the own value
pub fn opponent_mean(group_mean: f64, own: f64) -> f64 {
    (group_mean * RACE_SIZE as f64 - own) / (RACE_SIZE - 1) as f64
}

/// Min-method rank: 1 + number of strictly smaller values
pub fn min_rank(value: f64, group: &[f64]) -> f64 {
    (group.iter().filter(|&&other| other < value).count() + 1) as f64
}

/// Missing or non-finite values resolve to 0 in the finished table
fn fill(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// A race whose lane set breaks the one-boat-per-lane assumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceGroupIssue {
    pub race_day: String,
    pub round: u8,
    /// Lanes present, sorted, duplicates kept
    pub lanes: Vec<u8>,
}

impl RaceGroupIssue {
    pub fn rows(&self) -> usize {
        self.lanes.len()
    }
}

/// Feature derivation for batches of raw records
pub struct FeatureEngineering;

impl FeatureEngineering {
    /// Derive the feature table for a batch of records.
    ///
    /// Rows come back in input order. Any number of races may share a batch;
    /// race-wide statistics are grouped by (race day, round).
    pub fn derive(records: &[RawCompetitorRecord]) -> Vec<FeatureRow> {
        if records.is_empty() {
            return Vec::new();
        }

        let has_exhibition = records.iter().any(|r| r.exhibition_time.is_some());
        let has_tilt = records.iter().any(|r| r.tilt.is_some());

        let drafts: Vec<RowDraft> = records.iter().map(RowDraft::new).collect();

        let mut groups: HashMap<RaceKey, Vec<&RowDraft>> = HashMap::new();
        for draft in &drafts {
            groups.entry(draft.race_key()).or_default().push(draft);
        }
        let stats: HashMap<RaceKey, RaceStats> = groups
            .iter()
            .map(|(key, members)| (key.clone(), RaceStats::collect(members)))
            .collect();

        let lane_means = if has_exhibition {
            Self::exhibition_lane_means(&drafts)
        } else {
            HashMap::new()
        };

        drafts
            .iter()
            .map(|draft| {
                let race = stats.get(&draft.race_key()).cloned().unwrap_or_default();
                Self::finish_row(draft, &race, &lane_means, has_exhibition, has_tilt)
            })
            .collect()
    }

    /// Races in the batch whose lanes are not exactly one boat in each of 1-6
    pub fn incomplete_race_groups(records: &[RawCompetitorRecord]) -> Vec<RaceGroupIssue> {
        let mut groups: Vec<RaceGroupIssue> = Vec::new();
        for record in records {
            match groups
                .iter_mut()
                .find(|g| g.race_day == record.race_day && g.round == record.round)
            {
                Some(group) => group.lanes.push(record.lane),
                None => groups.push(RaceGroupIssue {
                    race_day: record.race_day.clone(),
                    round: record.round,
                    lanes: vec![record.lane],
                }),
            }
        }
        for group in groups.iter_mut() {
            group.lanes.sort_unstable();
        }
        groups.retain(|g| !g.lanes.iter().copied().eq(1..=RACE_SIZE as u8));
        groups
    }

    /// Exhibition mean per lane over the whole batch
    fn exhibition_lane_means(drafts: &[RowDraft]) -> HashMap<u8, f64> {
        let mut sums: HashMap<u8, (f64, usize)> = HashMap::new();
        for draft in drafts {
            let entry = sums.entry(draft.record.lane).or_insert((0.0, 0));
            entry.0 += draft.record.exhibition_time.unwrap_or(0.0);
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(lane, (sum, count))| (lane, sum / count as f64))
            .collect()
    }

    /// Combine a draft with its race statistics and apply the final cleanup
    fn finish_row(
        draft: &RowDraft,
        race: &RaceStats,
        lane_means: &HashMap<u8, f64>,
        has_exhibition: bool,
        has_tilt: bool,
    ) -> FeatureRow {
        let r = &draft.record;
        let lane = r.lane as f64;

        let base = BaseFeatures {
            age: fill(r.age),
            weight: fill(r.weight),
            class_code: fill(r.class_code),
            foul_starts: r.foul_starts,
            mean_start_timing: fill(r.mean_start_timing),
            national_win_rate: r.national_win_rate,
            national_in2_rate: r.national_in2_rate,
            national_in3_rate: r.national_in3_rate,
            local_win_rate: r.local_win_rate,
            local_in2_rate: r.local_in2_rate,
            local_in3_rate: r.local_in3_rate,
            motor_no: r.motor_no,
            motor_in2_rate: r.motor_in2_rate,
            motor_in3_rate: r.motor_in3_rate,
            boat_no: r.boat_no,
            boat_in2_rate: r.boat_in2_rate,
            boat_in3_rate: r.boat_in3_rate,
            lane,
            race_day: fill(r.race_day),
            round: r.round as f64,
        };

        let derived = DerivedFeatures {
            class_rank: r.class_rank,
            st_stability: fill(draft.st_stability),
            win_rate_diff: draft.win_rate_diff,
            in2_rate_diff: draft.in2_rate_diff,
            in3_rate_diff: draft.in3_rate_diff,
            win_rate_combined: draft.win_rate_combined,
            placing_stability: draft.placing_stability,
            motor_power: draft.motor_power,
            boat_power: draft.boat_power,
            equipment_gap: draft.equipment_gap,
            equipment_power: draft.equipment_power,
            lane_advantage: draft.lane_advantage,
            lane_reciprocal: draft.lane_reciprocal,
            overall_power: draft.overall_power,
            lane_fit_score: draft.lane_fit_score,
            class_power_score: draft.class_power_score,
            st_win_link: fill(draft.st_win_link),
            weight_st_ratio: fill(draft.weight_st_ratio),
        };

        let aggregates = RaceAggregates {
            national_win_rate_mean: fill(race.national_win_rate.mean),
            national_win_rate_max: fill(race.national_win_rate.max),
            national_win_rate_min: fill(race.national_win_rate.min),
            local_win_rate_mean: fill(race.local_win_rate.mean),
            local_win_rate_max: fill(race.local_win_rate.max),
            local_win_rate_min: fill(race.local_win_rate.min),
            motor_power_mean: fill(race.motor_power.mean),
            motor_power_max: fill(race.motor_power.max),
            motor_power_min: fill(race.motor_power.min),
            boat_power_mean: fill(race.boat_power.mean),
            boat_power_max: fill(race.boat_power.max),
            boat_power_min: fill(race.boat_power.min),
            overall_power_mean: fill(race.overall_power.mean),
            overall_power_max: fill(race.overall_power.max),
            overall_power_min: fill(race.overall_power.min),
            class_rank_mean: fill(race.class_rank.mean),
            class_rank_max: fill(race.class_rank.max),
            class_rank_min: fill(race.class_rank.min),
            mean_start_timing_mean: fill(race.mean_start_timing.mean),
            mean_start_timing_max: fill(race.mean_start_timing.max),
            mean_start_timing_min: fill(race.mean_start_timing.min),
        };

        let opp = |stat: &GroupStat, own: f64| stat.mean.map(|mean| opponent_mean(mean, own));
        let win_opp = opp(&race.national_win_rate, r.national_win_rate);
        let motor_opp = opp(&race.motor_power, draft.motor_power);
        let overall_opp = opp(&race.overall_power, draft.overall_power);
        let class_opp = opp(&race.class_rank, r.class_rank);

        let opponent = OpponentFeatures {
            national_win_rate_opp_mean: fill(win_opp),
            national_win_rate_opp_diff: fill(win_opp.map(|m| r.national_win_rate - m)),
            motor_power_opp_mean: fill(motor_opp),
            motor_power_opp_diff: fill(motor_opp.map(|m| draft.motor_power - m)),
            overall_power_opp_mean: fill(overall_opp),
            overall_power_opp_diff: fill(overall_opp.map(|m| draft.overall_power - m)),
            class_rank_opp_mean: fill(class_opp),
            class_advantage: match class_opp {
                Some(m) if r.class_rank > m => 1.0,
                _ => 0.0,
            },
        };

        // Exhibition and tilt are zero-filled before their race statistics
        let exhibition_value = r.exhibition_time.unwrap_or(0.0);
        let tilt_value = r.tilt.unwrap_or(0.0);

        let exhibition = has_exhibition.then(|| {
            let race_mean = GroupStat::over(race.exhibition.iter().map(|&v| Some(v)));
            ExhibitionFeatures {
                exhibition_time: exhibition_value,
                diff_from_race_mean: fill(race_mean.mean.map(|m| exhibition_value - m)),
                race_rank: min_rank(exhibition_value, &race.exhibition),
                gap_to_fastest: fill(race_mean.min.map(|m| exhibition_value - m)),
                diff_from_lane_mean: fill(
                    lane_means.get(&r.lane).map(|m| exhibition_value - m),
                ),
                lane_x_exhibition: lane * exhibition_value,
            }
        });

        let tilt = has_tilt.then(|| TiltFeatures {
            tilt: tilt_value,
            positive: if tilt_value > 0.0 { 1.0 } else { 0.0 },
            category: tilt_category(tilt_value),
            tilt_x_lane: tilt_value * lane,
        });

        let exhibition_x_tilt =
            (has_exhibition && has_tilt).then(|| fill(Some(exhibition_value * tilt_value)));

        let mut row = FeatureRow {
            meta: draft.meta.clone(),
            base,
            derived,
            aggregates,
            opponent,
            exhibition,
            tilt,
            exhibition_x_tilt,
        };
        row.scrub_non_finite();
        row
    }
}

impl FeatureRow {
    /// Final guard of the completeness invariant: nothing non-finite survives
    fn scrub_non_finite(&mut self) {
        self.base.scrub_non_finite();
        self.derived.scrub_non_finite();
        self.aggregates.scrub_non_finite();
        self.opponent.scrub_non_finite();
        if let Some(ref mut exhibition) = self.exhibition {
            exhibition.scrub_non_finite();
        }
        if let Some(ref mut tilt) = self.tilt {
            tilt.scrub_non_finite();
        }
    }
}

/// Every column identifier the engine can emit, in table order
pub fn get_all_feature_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::new();
    names.extend_from_slice(BaseFeatures::COLUMNS);
    names.extend_from_slice(DerivedFeatures::COLUMNS);
    names.extend_from_slice(RaceAggregates::COLUMNS);
    names.extend_from_slice(OpponentFeatures::COLUMNS);
    names.extend_from_slice(ExhibitionFeatures::COLUMNS);
    names.extend_from_slice(TiltFeatures::COLUMNS);
    names.push(EXHIBITION_TILT_COLUMN);
    names
}
