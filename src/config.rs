use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{Credentials, ProjectHandle};

pub const SECRET_ENV: &str = "EVIEW_SECRET";

/// Everything one extraction run needs, fixed at run start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub identity: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub project: String,
    pub headless: bool,
    pub base_url: String,
    /// Tenant to pick when the identity provider asks for an organization.
    pub organization: Option<String>,
    /// Label of the page type to extract, matched against list item text.
    pub page_type: String,
    /// Text fragments containing any of these are dropped before parsing.
    pub denylist: Vec<String>,
    /// Treat an unclear post-login URL as a failure instead of a warning.
    pub strict_login: bool,
    /// Verbose logging; the browser stays open after a failed run.
    pub debug_mode: bool,
    pub window_size: (u32, u32),
    pub output_path: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub driver: DriverConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub path: PathBuf,
    pub port: u16,
    /// Spawn the driver process ourselves; otherwise connect to a running one.
    pub manage: bool,
}

/// Fixed delays and retry budgets. All waits are fixed-interval, no backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub short_poll_attempts: u32,
    pub short_poll_interval_ms: u64,
    pub idp_click_settle_ms: u64,
    pub secret_page_settle_ms: u64,
    pub post_login_settle_ms: u64,
    pub project_list_settle_ms: u64,
    pub project_open_settle_ms: u64,
    pub item_settle_ms: u64,
    pub item_pause_ms: u64,
    pub scroll_settle_ms: u64,
    pub scroll_step_px: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            secret: String::new(),
            project: String::new(),
            headless: true,
            base_url: "https://eview.eplan.com/".to_string(),
            organization: None,
            page_type: "PLC-Diagram".to_string(),
            denylist: vec![
                "Date".to_string(),
                "Datum".to_string(),
                "ET 200SP".to_string(),
            ],
            strict_login: false,
            debug_mode: false,
            window_size: (1920, 1080),
            output_path: PathBuf::from("extracted_pages.json"),
            diagnostics_dir: PathBuf::from("."),
            driver: DriverConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        let binary = if cfg!(windows) {
            "chromedriver.exe"
        } else {
            "chromedriver"
        };
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            path: exe_dir.join(binary),
            port: 9516,
            manage: true,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 15,
            poll_interval_ms: 1000,
            short_poll_attempts: 10,
            short_poll_interval_ms: 500,
            idp_click_settle_ms: 1000,
            secret_page_settle_ms: 3000,
            post_login_settle_ms: 5000,
            project_list_settle_ms: 3000,
            project_open_settle_ms: 5000,
            item_settle_ms: 500,
            item_pause_ms: 100,
            scroll_settle_ms: 500,
            scroll_step_px: 400,
        }
    }
}

impl TimingConfig {
    /// Timing with every delay at zero, for simulated sessions.
    pub fn immediate() -> Self {
        Self {
            poll_attempts: 3,
            poll_interval_ms: 0,
            short_poll_attempts: 2,
            short_poll_interval_ms: 0,
            idp_click_settle_ms: 0,
            secret_page_settle_ms: 0,
            post_login_settle_ms: 0,
            project_list_settle_ms: 0,
            project_open_settle_ms: 0,
            item_settle_ms: 0,
            item_pause_ms: 0,
            scroll_settle_ms: 0,
            scroll_step_px: 400,
        }
    }

    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

impl RunConfig {
    /// Load from `path`, or from the platform config directory when `None`.
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => {
                let default_path = Self::config_path()?;
                if default_path.exists() {
                    Self::read_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(secret) = std::env::var(SECRET_ENV) {
            if !secret.is_empty() {
                config.secret = secret;
            }
        }

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "eplan", "eview-extractor")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(proj_dirs.config_dir().join("config.json"))
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.identity.clone(), self.secret.clone())
    }

    pub fn project_handle(&self) -> ProjectHandle {
        ProjectHandle::new(self.project.clone())
    }

    pub fn webdriver_url(&self) -> String {
        format!("http://localhost:{}", self.driver.port)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.identity.is_empty() {
            errors.push("Identity (email) is required".to_string());
        }

        if self.project.is_empty() {
            errors.push("Project number is required".to_string());
        }

        if self.base_url.is_empty() {
            errors.push("Base URL is required".to_string());
        }

        if self.page_type.is_empty() {
            errors.push("Page type label is required".to_string());
        }

        if self.timing.scroll_step_px <= 0 {
            errors.push("Scroll step must be positive".to_string());
        }

        errors
    }
}
