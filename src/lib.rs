pub mod auth;
pub mod chromedriver_manager;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod scraper;

pub use config::RunConfig;
pub use error::{ExtractError, NavigationError, SessionError};
pub use scraper::{ExtractionReport, RunOutcome, ScraperEngine};
