//! Pre-race information (直前情報) page parser
//!
//! The boat table uses `td[rowspan="4"]` cells; seven of them per boat, with
//! the exhibition time fourth and the tilt fifth. Nested lists (parts-change
//! notes) are not part of the reading.

use scraper::{ElementRef, Html, Node, Selector};

use super::ScraperError;

/// Index of the first boat's exhibition cell and the stride between boats
const EXHIBITION_OFFSET: usize = 3;
const CELLS_PER_BOAT: usize = 7;
const BOATS: usize = 6;

/// Exhibition times and tilt settings for lanes 1-6, as displayed
#[derive(Debug, Clone, PartialEq)]
pub struct PreRaceInfo {
    pub exhibition: Vec<String>,
    pub tilt: Vec<String>,
}

impl PreRaceInfo {
    /// Placeholder used when the page is unavailable: empty text for every lane
    pub fn empty() -> Self {
        Self {
            exhibition: vec![String::new(); BOATS],
            tilt: vec![String::new(); BOATS],
        }
    }
}

/// Text of a cell, skipping anything inside a `ul`
fn text_without_lists(cell: &ElementRef) -> String {
    let mut text = String::new();
    for node in cell.descendants() {
        let Node::Text(t) = node.value() else {
            continue;
        };
        let inside_list = node
            .ancestors()
            .take_while(|a| a.id() != cell.id())
            .any(|a| matches!(a.value(), Node::Element(e) if e.name() == "ul"));
        if !inside_list {
            text.push_str(t);
        }
    }
    text.trim().to_string()
}

/// Parse exhibition and tilt readings.
///
/// Returns `None` when fewer than six of either could be found, so the caller
/// can fall back to empty readings.
pub fn parse_beforeinfo(html: &str) -> Result<Option<PreRaceInfo>, ScraperError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"td[rowspan="4"]"#)
        .map_err(|e| ScraperError::ParseError(e.to_string()))?;

    let cells: Vec<String> = document
        .select(&selector)
        .map(|cell| text_without_lists(&cell))
        .collect();

    let mut exhibition = Vec::with_capacity(BOATS);
    let mut tilt = Vec::with_capacity(BOATS);
    for boat in 0..BOATS {
        let idx = EXHIBITION_OFFSET + boat * CELLS_PER_BOAT;
        if let Some(value) = cells.get(idx) {
            exhibition.push(value.clone());
        }
        if let Some(value) = cells.get(idx + 1) {
            tilt.push(value.clone());
        }
    }

    if exhibition.len() == BOATS && tilt.len() == BOATS {
        Ok(Some(PreRaceInfo { exhibition, tilt }))
    } else {
        tracing::warn!(
            "Pre-race table incomplete: {} exhibition and {} tilt readings",
            exhibition.len(),
            tilt.len()
        );
        Ok(None)
    }
}
