//! HTTP client with rate limiting for the race pages

use super::beforeinfo::{parse_beforeinfo, PreRaceInfo};
use super::racelist::RaceListParser;
use crate::core::venue_code;
use crate::models::{RaceRequest, RawCompetitorRecord};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const BASE_URL_RACELIST: &str = "https://www.boatrace.jp/owpc/pc/race/racelist";
const BASE_URL_BEFOREINFO: &str = "https://www.boatrace.jp/owpc/pc/race/beforeinfo";

/// Scraper errors
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Failed to parse HTML: {0}")]
    ParseError(String),

    #[error("No race data on page")]
    NoRaceData,

    #[error("Unknown venue: {0}")]
    UnknownVenue(String),
}

/// Scraper configuration
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Delay between requests in milliseconds
    pub delay_ms: u64,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Max retry attempts
    pub max_retries: u32,
    /// User agent string
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            timeout_secs: 30,
            max_retries: 3,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        }
    }
}

/// Page URL for one round
fn page_url(base: &str, venue_code: u8, date_code: u32, round: u8) -> String {
    format!("{}?rno={}&jcd={:02}&hd={}", base, round, venue_code, date_code)
}

/// Race list page URL for one round
pub fn racelist_url(venue_code: u8, date_code: u32, round: u8) -> String {
    page_url(BASE_URL_RACELIST, venue_code, date_code, round)
}

/// Pre-race information page URL for one round
pub fn beforeinfo_url(venue_code: u8, date_code: u32, round: u8) -> String {
    page_url(BASE_URL_BEFOREINFO, venue_code, date_code, round)
}

/// Decode a page body: UTF-8 when valid, Shift_JIS otherwise
pub fn decode_body(bytes: &[u8]) -> String {
    let (text, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }
    let (text, _, _) = encoding_rs::SHIFT_JIS.decode(bytes);
    text.into_owned()
}

/// Copy pre-race readings onto the records by lane
fn apply_pre_race(records: &mut [RawCompetitorRecord], info: &PreRaceInfo) {
    for record in records.iter_mut() {
        let idx = (record.lane as usize).saturating_sub(1);
        record.exhibition_time = Some(info.exhibition.get(idx).cloned().unwrap_or_default());
        record.tilt = Some(info.tilt.get(idx).cloned().unwrap_or_default());
    }
}

/// Race page scraper with rate limiting
pub struct RaceScraper {
    client: reqwest::Client,
    config: ScraperConfig,
    parser: RaceListParser,
    last_request: Arc<Mutex<Instant>>,
}

impl RaceScraper {
    /// Create a new scraper with the given configuration
    pub fn new(config: ScraperConfig) -> Result<Self, ScraperError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .build()?;

        let first_request = Instant::now()
            .checked_sub(Duration::from_millis(config.delay_ms))
            .unwrap_or_else(Instant::now);

        Ok(Self {
            client,
            config,
            parser: RaceListParser::new()?,
            last_request: Arc::new(Mutex::new(first_request)),
        })
    }

    /// Wait for rate limit
    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        let delay = Duration::from_millis(self.config.delay_ms);

        if elapsed < delay {
            tokio::time::sleep(delay - elapsed).await;
        }

        *last = Instant::now();
    }

    /// Fetch HTML page with rate limiting and retry
    async fn fetch_page(&self, url: &str) -> Result<String, ScraperError> {
        for attempt in 0..self.config.max_retries {
            self.wait_for_rate_limit().await;

            match self.client.get(url).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        let bytes = response.bytes().await?;
                        return Ok(decode_body(&bytes));
                    }
                    tracing::warn!(
                        "Request failed with status {} (attempt {}/{})",
                        response.status(),
                        attempt + 1,
                        self.config.max_retries
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.config.max_retries,
                        e
                    );
                }
            }

            if attempt + 1 < self.config.max_retries {
                let backoff = Duration::from_millis(self.config.delay_ms * (attempt as u64 + 1));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(ScraperError::ParseError(format!(
            "Failed to fetch {} after {} attempts",
            url, self.config.max_retries
        )))
    }

    /// Scrape the six competitors of a round, with pre-race readings.
    ///
    /// A missing or incomplete pre-race page leaves empty readings and is
    /// only logged; a race list without racers is `NoRaceData`.
    pub async fn scrape_round(
        &self,
        request: &RaceRequest,
    ) -> Result<Vec<RawCompetitorRecord>, ScraperError> {
        let code = venue_code(&request.venue)
            .ok_or_else(|| ScraperError::UnknownVenue(request.venue.clone()))?;
        let date_code = request.date_code();

        let url = racelist_url(code, date_code, request.round);
        tracing::info!("Scraping race list: {}", url);
        let html = self.fetch_page(&url).await?;
        let mut records = self.parser.parse(&html, &request.race_day(), request.round)?;

        let info_url = beforeinfo_url(code, date_code, request.round);
        tracing::info!("Scraping pre-race info: {}", info_url);
        let info = match self.fetch_page(&info_url).await {
            Ok(html) => parse_beforeinfo(&html).unwrap_or_else(|e| {
                tracing::warn!("Pre-race page unreadable: {}", e);
                None
            }),
            Err(e) => {
                tracing::warn!("Pre-race page unavailable: {}", e);
                None
            }
        };
        apply_pre_race(&mut records, &info.unwrap_or_else(PreRaceInfo::empty));

        Ok(records)
    }
}
