//! Race list (出走表) page parser
//!
//! Reads six competitors from the racelist page. Each competitor contributes a
//! name block (`div.is-fs18`), two `div.is-fs11` blocks (registration/class,
//! then branch/age/weight) and five `.is-lineH2` cells (F/L/mean ST, national
//! rates, local rates, motor, boat). Cell text is split into whitespace tokens
//! instead of being sliced at fixed character offsets.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::ScraperError;
use crate::models::RawCompetitorRecord;

/// Competitors per race
const BOATS: usize = 6;
/// `.is-lineH2` cells per competitor
const CELLS_PER_BOAT: usize = 5;

/// Tokens of one statistics cell, e.g. "F0 L0 0.15"
fn cell_tokens(cell: &ElementRef) -> Vec<String> {
    cell.text()
        .flat_map(|t| t.split_whitespace())
        .map(|t| t.to_string())
        .collect()
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>()
}

/// Racelist parser holding its compiled selectors and patterns
pub struct RaceListParser {
    name: Selector,
    profile: Selector,
    stats: Selector,
    class_pattern: Regex,
    age_pattern: Regex,
    weight_pattern: Regex,
}

impl RaceListParser {
    pub fn new() -> Result<Self, ScraperError> {
        let selector = |css: &str| {
            Selector::parse(css).map_err(|e| ScraperError::ParseError(e.to_string()))
        };
        Ok(Self {
            name: selector("div.is-fs18")?,
            profile: selector("div.is-fs11")?,
            stats: selector(".is-lineH2")?,
            class_pattern: Regex::new(r"\b(A1|A2|B1|B2)\b").unwrap(),
            age_pattern: Regex::new(r"(\d+)\s*歳").unwrap(),
            weight_pattern: Regex::new(r"(\d+(?:\.\d+)?)\s*kg").unwrap(),
        })
    }

    /// Parse the six competitors of a race.
    ///
    /// `race_day` and `round` are stamped onto every record; exhibition and
    /// tilt are left unset for the pre-race page to fill in.
    pub fn parse(
        &self,
        html: &str,
        race_day: &str,
        round: u8,
    ) -> Result<Vec<RawCompetitorRecord>, ScraperError> {
        let document = Html::parse_document(html);

        let names: Vec<String> = document
            .select(&self.name)
            .map(|el| Self::clean_name(&element_text(&el)))
            .collect();
        let profiles: Vec<String> = document
            .select(&self.profile)
            .map(|el| element_text(&el))
            .collect();
        let stats: Vec<Vec<String>> = document
            .select(&self.stats)
            .map(|el| cell_tokens(&el))
            .collect();

        if names.len() < BOATS || stats.len() < BOATS * CELLS_PER_BOAT {
            return Err(ScraperError::NoRaceData);
        }
        if profiles.len() < BOATS * 2 {
            tracing::warn!(
                "Found {} profile blocks, expected {}; class/age/weight may be missing",
                profiles.len(),
                BOATS * 2
            );
        }

        let records = (0..BOATS)
            .map(|boat| {
                let class_block = profiles.get(boat * 2).map(String::as_str).unwrap_or("");
                let body_block = profiles.get(boat * 2 + 1).map(String::as_str).unwrap_or("");
                let cells = &stats[boat * CELLS_PER_BOAT..(boat + 1) * CELLS_PER_BOAT];
                let token = |cell: usize, i: usize| cells[cell].get(i).cloned();

                RawCompetitorRecord {
                    name: Some(names[boat].clone()).filter(|n| !n.is_empty()),
                    age: self.capture(&self.age_pattern, body_block, "歳"),
                    weight: self.capture(&self.weight_pattern, body_block, ""),
                    class_code: self.capture(&self.class_pattern, class_block, ""),
                    foul_starts: token(0, 0),
                    late_starts: token(0, 1),
                    mean_start_timing: token(0, 2),
                    national_win_rate: token(1, 0),
                    national_in2_rate: token(1, 1),
                    national_in3_rate: token(1, 2),
                    local_win_rate: token(2, 0),
                    local_in2_rate: token(2, 1),
                    local_in3_rate: token(2, 2),
                    motor_no: token(3, 0),
                    motor_in2_rate: token(3, 1),
                    motor_in3_rate: token(3, 2),
                    boat_no_equip: token(4, 0),
                    boat_in2_rate: token(4, 1),
                    boat_in3_rate: token(4, 2),
                    lane: boat as u8 + 1,
                    race_day: race_day.to_string(),
                    round,
                    exhibition_time: None,
                    tilt: None,
                }
            })
            .collect();

        Ok(records)
    }

    fn capture(&self, pattern: &Regex, text: &str, suffix: &str) -> Option<String> {
        pattern
            .captures(text)
            .map(|caps| format!("{}{}", &caps[1], suffix))
    }

    /// Collapse the name block's whitespace (including full-width spaces)
    fn clean_name(text: &str) -> String {
        text.replace('　', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
