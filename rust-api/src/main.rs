use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use chakugai::config::AppConfig;
use chakugai::handlers::{configure, AppState};
#[cfg(feature = "scraper")]
use chakugai::scraper::{RaceScraper, ScraperConfig};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let config = AppConfig::from_env();
    let addr = config.bind_addr();

    let registry = config.registry();
    let store = config.model_store(true);
    info!(
        "Serving {} venues from {:?} (model cache {})",
        registry.venues().len(),
        registry.base_dir(),
        if store.is_caching() { "on" } else { "off" }
    );

    #[cfg(feature = "scraper")]
    let scraper = RaceScraper::new(ScraperConfig {
        delay_ms: config.scraper_delay_ms,
        ..Default::default()
    })
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let app_state = Arc::new(AppState {
        registry,
        store,
        #[cfg(feature = "scraper")]
        scraper,
    });

    info!("Starting chakugai API server at http://{}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind(&addr)?
    .run()
    .await
}
