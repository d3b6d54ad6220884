//! Web scraper for boatrace.jp race pages
//!
//! Produces the raw competitor records for one round from the race list and
//! the pre-race information pages.
//!
//! # Example
//!
//! ```no_run
//! use chakugai::models::RaceRequest;
//! use chakugai::scraper::{RaceScraper, ScraperConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scraper = RaceScraper::new(ScraperConfig::default())?;
//!     let date = chrono::NaiveDate::from_ymd_opt(2025, 1, 25).unwrap();
//!
//!     let records = scraper.scrape_round(&RaceRequest::new(date, "江戸川", 6)).await?;
//!     println!("Found {} competitors", records.len());
//!
//!     Ok(())
//! }
//! ```

mod beforeinfo;
mod client;
mod racelist;

pub use beforeinfo::{parse_beforeinfo, PreRaceInfo};
pub use client::{
    beforeinfo_url, decode_body, racelist_url, RaceScraper, ScraperConfig, ScraperError,
};
pub use racelist::RaceListParser;

use crate::core::venue_code;
use crate::models::RaceRequest;

/// Race list URL for a request, when the venue is known
pub fn race_page_url(request: &RaceRequest) -> Option<String> {
    venue_code(&request.venue).map(|code| racelist_url(code, request.date_code(), request.round))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_race_page_url() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 25).unwrap();
        let url = race_page_url(&RaceRequest::new(date, "福岡", 3)).unwrap();
        assert_eq!(
            url,
            "https://www.boatrace.jp/owpc/pc/race/racelist?rno=3&jcd=22&hd=20250125"
        );
        assert!(race_page_url(&RaceRequest::new(date, "不明", 3)).is_none());
    }
}
