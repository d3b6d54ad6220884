//! Environment-driven configuration shared by the CLI and the HTTP server

use std::path::PathBuf;
use tracing::warn;

use crate::core::ModelRegistry;
use crate::predictor::ModelStore;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SCRAPER_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Directory the registered artifact paths are relative to
    pub model_dir: PathBuf,
    /// Explicit MODEL_CACHE setting; each binary picks its own default
    pub model_cache: Option<bool>,
    pub scraper_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_dir: PathBuf::from("."),
            model_cache: None,
            scraper_delay_ms: DEFAULT_SCRAPER_DELAY_MS,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AppConfig {
    /// Read HOST, PORT, MODEL_DIR, MODEL_CACHE and SCRAPER_DELAY_MS
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("PORT") {
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!("Invalid PORT {:?}, using {}", value, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => defaults.port,
        };

        let model_cache = lookup("MODEL_CACHE").and_then(|value| {
            let flag = parse_flag(&value);
            if flag.is_none() {
                warn!("Invalid MODEL_CACHE {:?}, ignoring", value);
            }
            flag
        });

        let scraper_delay_ms = match lookup("SCRAPER_DELAY_MS") {
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!(
                    "Invalid SCRAPER_DELAY_MS {:?}, using {}",
                    value, DEFAULT_SCRAPER_DELAY_MS
                );
                DEFAULT_SCRAPER_DELAY_MS
            }),
            None => defaults.scraper_delay_ms,
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
            model_dir: lookup("MODEL_DIR").map(PathBuf::from).unwrap_or(defaults.model_dir),
            model_cache,
            scraper_delay_ms,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_enabled(&self, default: bool) -> bool {
        self.model_cache.unwrap_or(default)
    }

    pub fn registry(&self) -> ModelRegistry {
        ModelRegistry::builtin(&self.model_dir)
    }

    pub fn model_store(&self, cache_default: bool) -> ModelStore {
        ModelStore::new(self.cache_enabled(cache_default))
    }
}
