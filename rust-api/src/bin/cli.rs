//! Chakugai CLI - terminal shell for out-of-the-money predictions

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use chakugai::core::{all_venues, venue_code, venue_name, ModelRegistry};
use chakugai::data::{load_raw_records, FeatureEngineering, FeatureRow};
use chakugai::models::{LaneGroup, RaceRequest, RawCompetitorRecord};
use chakugai::pipeline::{run_round, RoundOutcome};
use chakugai::predictor::ModelStore;

#[cfg(feature = "scraper")]
use chakugai::scraper::{race_page_url, RaceScraper, ScraperConfig, ScraperError};

#[derive(Parser)]
#[command(name = "chakugai")]
#[command(author, version, about = "Boat race out-of-the-money prediction CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run in interactive mode
    #[arg(short, long)]
    interactive: bool,

    /// Directory the registered model paths are relative to
    #[arg(long, env = "MODEL_DIR", default_value = ".")]
    model_dir: PathBuf,

    /// Keep loaded models in memory between rounds
    #[arg(long, env = "MODEL_CACHE")]
    cache: bool,

    /// Delay between page requests in milliseconds
    #[arg(long, env = "SCRAPER_DELAY_MS", default_value = "1000")]
    delay: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a round from the racing site and predict it
    #[cfg(feature = "scraper")]
    Predict {
        /// Race date (YYYYMMDD or YYYY-MM-DD)
        #[arg(short, long, value_parser = parse_date)]
        date: NaiveDate,

        /// Venue name or code (1-24)
        #[arg(short, long)]
        venue: String,

        /// Race round (1-12)
        #[arg(short, long)]
        round: u8,
    },

    /// Predict a round from a CSV of raw competitor records
    PredictFile {
        /// CSV file with raw column names
        #[arg(short, long)]
        input: PathBuf,

        /// Race date (YYYYMMDD or YYYY-MM-DD)
        #[arg(short, long, value_parser = parse_date)]
        date: NaiveDate,

        /// Venue name or code (1-24)
        #[arg(short, long)]
        venue: String,

        /// Race round (1-12)
        #[arg(short, long)]
        round: u8,
    },

    /// List venues and their registered models
    Venues,

    /// Print the derived feature table for a CSV of raw records
    Features {
        /// CSV file with raw column names
        #[arg(short, long)]
        input: PathBuf,

        /// Print every column instead of the summary subset
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    println!("{}", format!("Chakugai CLI v{}", env!("CARGO_PKG_VERSION")).cyan().bold());
    println!();

    let registry = ModelRegistry::builtin(&cli.model_dir);
    let store = ModelStore::new(cli.cache);

    if cli.interactive {
        run_interactive(&registry, &store, cli.delay)?;
    } else if let Some(command) = cli.command {
        match command {
            #[cfg(feature = "scraper")]
            Commands::Predict { date, venue, round } => {
                let request = build_request(date, &venue, round)?;
                predict_live(&request, &registry, &store, cli.delay)?;
            }
            Commands::PredictFile {
                input,
                date,
                venue,
                round,
            } => {
                let request = build_request(date, &venue, round)?;
                predict_file(&input, &request, &registry, &store)?;
            }
            Commands::Venues => list_venues(&registry),
            Commands::Features { input, all } => print_features(&input, all)?,
        }
    } else {
        println!("Use --help for usage information or --interactive for interactive mode.");
    }

    Ok(())
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|_| format!("expected YYYYMMDD or YYYY-MM-DD, got {}", value))
}

/// Accept a venue display name or its numeric code
fn resolve_venue(value: &str) -> Result<String> {
    let value = value.trim();
    if let Ok(code) = value.parse::<u8>() {
        return venue_name(code)
            .map(str::to_string)
            .with_context(|| format!("Venue code must be 1-24, got {}", code));
    }
    if venue_code(value).is_none() {
        anyhow::bail!("Unknown venue: {}", value);
    }
    Ok(value.to_string())
}

fn build_request(date: NaiveDate, venue: &str, round: u8) -> Result<RaceRequest> {
    if !(1..=12).contains(&round) {
        anyhow::bail!("Round must be 1-12, got {}", round);
    }
    Ok(RaceRequest::new(date, resolve_venue(venue)?, round))
}

const SPINNER_TICK_MS: u64 = 100;

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

#[cfg(feature = "scraper")]
fn predict_live(
    request: &RaceRequest,
    registry: &ModelRegistry,
    store: &ModelStore,
    delay: u64,
) -> Result<()> {
    print_header(request);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let scraper = RaceScraper::new(ScraperConfig {
        delay_ms: delay,
        ..Default::default()
    })
    .context("Failed to create scraper")?;

    let pb = spinner(format!("Scraping {} R{}...", request.venue, request.round));
    let scraped = rt.block_on(scraper.scrape_round(request));
    pb.finish_and_clear();

    let outcome = match scraped {
        Ok(records) => run_round(request, &records, registry, store),
        Err(ScraperError::NoRaceData) => RoundOutcome::no_data(request, "race not found"),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to scrape {} R{}", request.venue, request.round)
            })
        }
    };

    print_outcome(&outcome);
    if let Some(url) = race_page_url(request) {
        println!("{}: {}", "Race page".dimmed(), url);
    }
    Ok(())
}

fn predict_file(
    input: &Path,
    request: &RaceRequest,
    registry: &ModelRegistry,
    store: &ModelStore,
) -> Result<()> {
    print_header(request);

    let records = load_raw_records(input)
        .with_context(|| format!("Failed to load CSV from {:?}", input))?;
    let records = select_round(records, request.round);

    let pb = spinner(format!("Scoring {} records...", records.len()));
    let outcome = run_round(request, &records, registry, store);
    pb.finish_and_clear();

    print_outcome(&outcome);
    Ok(())
}

/// Keep the requested round when the file holds several
fn select_round(records: Vec<RawCompetitorRecord>, round: u8) -> Vec<RawCompetitorRecord> {
    if records.iter().all(|r| r.round != round) {
        return records;
    }
    records.into_iter().filter(|r| r.round == round).collect()
}

fn print_header(request: &RaceRequest) {
    println!(
        "{}: {} / {} / {}R",
        "Predicting".green(),
        request.date.format("%Y-%m-%d"),
        request.venue,
        request.round
    );
    println!();
}

/// Flagged boats are predicted to finish outside the target ranks
fn flag_label(flag: u8) -> &'static str {
    if flag == 1 {
        "着外"
    } else {
        "-"
    }
}

fn print_outcome(outcome: &RoundOutcome) {
    if !outcome.signals.is_empty() {
        println!("{}", "Signals:".yellow().bold());
        for signal in &outcome.signals {
            println!("  {} {}", "!".yellow(), signal);
        }
        println!();
    }

    if outcome.is_empty() {
        println!("{}", "No predictions for this round.".red());
        return;
    }

    println!("{}", "予測結果 (Predictions):".yellow().bold());
    println!(
        "{:>6} {:>4} {:<12} {:>4} {:>12} {:>10} {:>10} {:>8}",
        "ラウンド", "艇番", "選手名", "級", "1_5号艇予測", "1_5スコア", "6号艇予測", "6スコア"
    );
    println!("{}", "-".repeat(80));

    for row in &outcome.predictions {
        let meta = &row.features.meta;
        let flag = if row.flag == 1 {
            flag_label(row.flag).red().bold().to_string()
        } else {
            flag_label(row.flag).to_string()
        };
        let score = format!("{:.3}", row.score);
        let (flag_1_5, score_1_5, flag_6, score_6) = match row.lane_group {
            LaneGroup::Lanes1To5 => (flag, score, String::new(), String::new()),
            LaneGroup::Lane6 => (String::new(), String::new(), flag, score),
        };
        println!(
            "{:>6} {:>4} {:<12} {:>4} {:>12} {:>10} {:>10} {:>8}",
            meta.round,
            meta.lane,
            truncate_name(meta.racer_name.as_deref().unwrap_or("-"), 12),
            meta.class_code.as_deref().unwrap_or("-"),
            flag_1_5,
            score_1_5,
            flag_6,
            score_6
        );
    }
    println!();

    println!("{}", "使用モデル (Models):".yellow().bold());
    for model in &outcome.models {
        let note = if model.threshold_defaulted {
            " (default)".dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<8} {} threshold {:.2}{}",
            model.lane_group.label(),
            model.file_name,
            model.threshold,
            note
        );
    }
    println!();

    println!("{}", "集計 (Summary):".yellow().bold());
    for group in LaneGroup::ALL {
        let total = outcome.group(group).count();
        if total == 0 {
            continue;
        }
        println!(
            "  {:<8} flagged {}/{}  mean score {:.3}",
            group.label(),
            outcome.flagged(group),
            total,
            outcome.mean_score(group).unwrap_or(0.0)
        );
    }
    println!();
}

fn list_venues(registry: &ModelRegistry) {
    println!("{}", "Venues:".yellow().bold());
    println!("{}", "-".repeat(60));

    for &(code, name) in all_venues() {
        if !registry.is_registered(name) {
            println!("  {:2}: {}", code, name.dimmed());
            continue;
        }
        println!("  {:2}: {}", code, name.green());
        for group in LaneGroup::ALL {
            if let Ok(artifact) = registry.resolve(name, group) {
                let status = if artifact.path.exists() {
                    "".to_string()
                } else {
                    " (missing)".red().to_string()
                };
                let default_note = if artifact.threshold.defaulted {
                    " default"
                } else {
                    ""
                };
                println!(
                    "      {:<8} {} [{:.2}{}]{}",
                    group.label(),
                    artifact.file_name(),
                    artifact.threshold.value,
                    default_note,
                    status
                );
            }
        }
    }
}

fn print_features(input: &Path, all: bool) -> Result<()> {
    let records = load_raw_records(input)
        .with_context(|| format!("Failed to load CSV from {:?}", input))?;
    let rows = FeatureEngineering::derive(&records);

    for group in FeatureEngineering::incomplete_race_groups(&records) {
        println!(
            "  {} race {}_{} has lanes {:?}",
            "!".yellow(),
            group.race_day,
            group.round,
            group.lanes
        );
    }

    println!(
        "{} {} rows",
        "特徴量 (Features):".yellow().bold(),
        rows.len()
    );
    for row in &rows {
        print_feature_row(row, all);
    }
    Ok(())
}

/// Columns shown when the full table is not requested
const SUMMARY_COLUMNS: &[&str] = &[
    "勝率_全国",
    "平均ST",
    "総合力スコア",
    "勝率_全国_mean_全体",
    "勝率_全国_差",
    "クラス優位",
    "スタート展示",
    "スタート展示_順位",
    "チルト",
];

fn print_feature_row(row: &FeatureRow, all: bool) {
    println!(
        "{}",
        format!(
            "{}日 {}R {}号艇 {}",
            row.meta.race_day,
            row.meta.round,
            row.lane(),
            row.meta.racer_name.as_deref().unwrap_or("-")
        )
        .bold()
    );
    for (name, value) in row.columns() {
        if all || SUMMARY_COLUMNS.contains(&name) {
            println!("    {:<24} {:>10.4}", name, value);
        }
    }
}

fn run_interactive(registry: &ModelRegistry, store: &ModelStore, delay: u64) -> Result<()> {
    println!("{}", "Interactive mode".green().bold());
    println!();

    let theme = ColorfulTheme::default();
    let venues: Vec<&str> = registry.venues();
    if venues.is_empty() {
        anyhow::bail!("No venues registered");
    }

    loop {
        let options = vec!["Predict a race", "Predict from CSV", "List venues", "Quit"];

        let selection = Select::with_theme(&theme)
            .with_prompt("What would you like to do?")
            .items(&options)
            .default(0)
            .interact()?;

        if selection == 2 {
            println!();
            list_venues(registry);
            println!();
            continue;
        }
        if selection == 3 {
            println!("Goodbye!");
            break;
        }

        let venue_idx = Select::with_theme(&theme)
            .with_prompt("Venue")
            .items(&venues)
            .default(0)
            .interact()?;

        let date_text: String = Input::with_theme(&theme)
            .with_prompt("Date (YYYYMMDD)")
            .default(chrono::Local::now().format("%Y%m%d").to_string())
            .interact_text()?;
        let date = parse_date(&date_text).map_err(anyhow::Error::msg)?;

        let rounds: Vec<String> = (1..=12).map(|r| format!("{}R", r)).collect();
        let round_idx = Select::with_theme(&theme)
            .with_prompt("Round")
            .items(&rounds)
            .default(0)
            .interact()?;

        let request = RaceRequest::new(date, venues[venue_idx], round_idx as u8 + 1);
        println!();

        let result = if selection == 0 {
            predict_interactive(&request, registry, store, delay)
        } else {
            let path: String = Input::with_theme(&theme)
                .with_prompt("CSV path")
                .interact_text()?;
            predict_file(Path::new(path.trim()), &request, registry, store)
        };
        if let Err(e) = result {
            println!("{}: {:#}", "Failed".red(), e);
        }
        println!();
    }

    Ok(())
}

#[cfg(feature = "scraper")]
fn predict_interactive(
    request: &RaceRequest,
    registry: &ModelRegistry,
    store: &ModelStore,
    delay: u64,
) -> Result<()> {
    predict_live(request, registry, store, delay)
}

#[cfg(not(feature = "scraper"))]
fn predict_interactive(
    _request: &RaceRequest,
    _registry: &ModelRegistry,
    _store: &ModelStore,
    _delay: u64,
) -> Result<()> {
    anyhow::bail!("Scraping requires the scraper feature")
}

/// Truncate name to fit display width
fn truncate_name(name: &str, max_len: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= max_len {
        name.to_string()
    } else {
        chars[..max_len - 1].iter().collect::<String>() + "…"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 25).unwrap();
        assert_eq!(parse_date("20250125").unwrap(), expected);
        assert_eq!(parse_date("2025-01-25").unwrap(), expected);
        assert!(parse_date("25/01/2025").is_err());
    }

    #[test]
    fn test_resolve_venue() {
        assert_eq!(resolve_venue("3").unwrap(), "江戸川");
        assert_eq!(resolve_venue(" 福岡 ").unwrap(), "福岡");
        assert!(resolve_venue("25").is_err());
        assert!(resolve_venue("不明").is_err());
    }

    #[test]
    fn test_flag_label() {
        assert_eq!(flag_label(1), "着外");
        assert_eq!(flag_label(0), "-");
    }

    #[test]
    fn test_spinner_ticks() {
        let pb = spinner("Scoring".to_string());
        assert_eq!(pb.message(), "Scoring");
        assert!(!pb.is_finished());
        pb.finish_and_clear();
        assert!(pb.is_finished());
    }
}
