//! CSV ingestion of raw competitor tables
//!
//! The header uses the column names of the scraped race table (名前, 年齢, ...).
//! Every column is read as text so that the normalization rules in
//! [`super::normalize`] stay the only place values are interpreted.

use polars::prelude::*;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use super::normalize::parse_numeric;
use crate::models::RawCompetitorRecord;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read CSV: {0}")]
    Polars(#[from] PolarsError),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Row {row}: invalid {column} value {value:?}")]
    InvalidValue {
        row: usize,
        column: &'static str,
        value: String,
    },
}

const COL_NAME: &str = "名前";
const COL_AGE: &str = "年齢";
const COL_WEIGHT: &str = "体重";
const COL_CLASS: &str = "クラス";
const COL_FOULS: &str = "F数";
const COL_LATES: &str = "L数";
const COL_MEAN_ST: &str = "平均ST";
const COL_LANE: &str = "コース";
const COL_DAY: &str = "日";
const COL_ROUND: &str = "ラウンド";
const COL_EXHIBITION: &str = "スタート展示";
const COL_TILT: &str = "チルト";

/// Columns a table must carry to identify rows
const KEY_COLUMNS: [&str; 3] = [COL_LANE, COL_DAY, COL_ROUND];

/// Text view over one optional column
struct TextColumn<'a>(Option<&'a StringChunked>);

impl<'a> TextColumn<'a> {
    fn lookup(df: &'a DataFrame, name: &str) -> Result<Self, LoadError> {
        match df.column(name) {
            Ok(column) => Ok(Self(Some(column.str()?))),
            Err(_) => Ok(Self(None)),
        }
    }

    fn get(&self, row: usize) -> Option<String> {
        self.0.and_then(|ca| ca.get(row)).map(|s| s.to_string())
    }

    /// Pre-race reading: an empty cell in a present column is empty text, not absent
    fn get_reading(&self, row: usize) -> Option<String> {
        self.0
            .map(|ca| ca.get(row).map(|s| s.to_string()).unwrap_or_default())
    }
}

/// Parse a small integer key field ("3", "3.0")
fn parse_key(value: Option<String>, row: usize, column: &'static str) -> Result<u8, LoadError> {
    let text = value.unwrap_or_default();
    match parse_numeric(&text) {
        Some(v) if v >= 0.0 && v <= u8::MAX as f64 && v.fract() == 0.0 => Ok(v as u8),
        _ => Err(LoadError::InvalidValue {
            row,
            column,
            value: text,
        }),
    }
}

/// Load raw competitor records from a CSV file
pub fn load_raw_records<P: AsRef<Path>>(path: P) -> Result<Vec<RawCompetitorRecord>, LoadError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;

    let records = records_from_frame(&df)?;
    info!(
        "Loaded {} records from {}",
        records.len(),
        path.as_ref().display()
    );
    Ok(records)
}

/// Convert an all-text DataFrame into raw records
pub fn records_from_frame(df: &DataFrame) -> Result<Vec<RawCompetitorRecord>, LoadError> {
    for key in KEY_COLUMNS {
        if df.column(key).is_err() {
            return Err(LoadError::MissingColumn(key.to_string()));
        }
    }

    let col = |name: &str| TextColumn::lookup(df, name);
    let name = col(COL_NAME)?;
    let age = col(COL_AGE)?;
    let weight = col(COL_WEIGHT)?;
    let class = col(COL_CLASS)?;
    let fouls = col(COL_FOULS)?;
    let lates = col(COL_LATES)?;
    let mean_st = col(COL_MEAN_ST)?;
    let nat_win = col("勝率_全国")?;
    let nat_in2 = col("2連率_全国")?;
    let nat_in3 = col("3連率_全国")?;
    let local_win = col("勝率_当地")?;
    let local_in2 = col("2連率_当地")?;
    let local_in3 = col("3連率_当地")?;
    let motor_no = col("モーターナンバー")?;
    let motor_in2 = col("モーター2連率")?;
    let motor_in3 = col("モーター3連率")?;
    let boat_no = col("ボートナンバー")?;
    let boat_in2 = col("ボート2連率")?;
    let boat_in3 = col("ボート3連率")?;
    let lane = col(COL_LANE)?;
    let day = col(COL_DAY)?;
    let round = col(COL_ROUND)?;
    let exhibition = col(COL_EXHIBITION)?;
    let tilt = col(COL_TILT)?;

    if exhibition.0.is_none() || tilt.0.is_none() {
        debug!("CSV has no pre-race columns; exhibition/tilt features will be absent");
    }

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        records.push(RawCompetitorRecord {
            name: name.get(i),
            age: age.get(i),
            weight: weight.get(i),
            class_code: class.get(i),
            foul_starts: fouls.get(i),
            late_starts: lates.get(i),
            mean_start_timing: mean_st.get(i),
            national_win_rate: nat_win.get(i),
            national_in2_rate: nat_in2.get(i),
            national_in3_rate: nat_in3.get(i),
            local_win_rate: local_win.get(i),
            local_in2_rate: local_in2.get(i),
            local_in3_rate: local_in3.get(i),
            motor_no: motor_no.get(i),
            motor_in2_rate: motor_in2.get(i),
            motor_in3_rate: motor_in3.get(i),
            boat_no_equip: boat_no.get(i),
            boat_in2_rate: boat_in2.get(i),
            boat_in3_rate: boat_in3.get(i),
            lane: parse_key(lane.get(i), i, COL_LANE)?,
            race_day: day.get(i).unwrap_or_default().trim().to_string(),
            round: parse_key(round.get(i), i, COL_ROUND)?,
            exhibition_time: exhibition.get_reading(i),
            tilt: tilt.get_reading(i),
        });
    }

    Ok(records)
}
