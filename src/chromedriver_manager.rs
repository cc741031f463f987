use anyhow::{Context, Result};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::SessionError;
use crate::scraper::retry::RetryPolicy;

/// Starts and stops the local WebDriver server process.
pub struct ChromeDriverManager {
    config: DriverConfig,
    readiness: RetryPolicy,
    process: Arc<Mutex<Option<Child>>>,
}

impl ChromeDriverManager {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            readiness: RetryPolicy::new(30, Duration::from_millis(500)),
            process: Arc::new(Mutex::new(None)),
        }
    }

    fn status_url(&self) -> String {
        format!("http://localhost:{}/status", self.config.port)
    }

    /// Spawn the driver and wait until its status endpoint answers.
    /// Does nothing when the driver is not managed by us.
    pub async fn start(&self) -> Result<()> {
        if !self.config.manage {
            debug!("ChromeDriver not managed, expecting it on port {}", self.config.port);
            return Ok(());
        }

        let mut process_guard = self.process.lock().await;
        if process_guard.is_some() {
            info!("ChromeDriver is already running on port {}", self.config.port);
            return Ok(());
        }

        if !self.config.path.exists() {
            anyhow::bail!(
                "ChromeDriver not found at {}. Install it or set driver.path in the config.",
                self.config.path.display()
            );
        }

        info!("Starting ChromeDriver on port {}...", self.config.port);
        let child = Command::new(&self.config.path)
            .arg(format!("--port={}", self.config.port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to start ChromeDriver from {}. Make sure Chrome is installed.",
                    self.config.path.display()
                )
            })?;
        *process_guard = Some(child);
        drop(process_guard);

        debug!("Waiting for ChromeDriver to become ready...");
        if !self.wait_for_readiness().await {
            self.stop().await;
            anyhow::bail!(
                "ChromeDriver failed to become ready after {} checks",
                self.readiness.attempts
            );
        }

        info!("✅ ChromeDriver successfully started on port {}", self.config.port);
        Ok(())
    }

    async fn wait_for_readiness(&self) -> bool {
        let client = reqwest::Client::new();
        let url = self.status_url();

        let ready = self
            .readiness
            .poll("ChromeDriver status", |_| {
                let request = client.get(&url).send();
                async move {
                    match request.await {
                        Ok(response) if response.status().is_success() => Ok(Some(())),
                        Ok(response) => {
                            debug!("ChromeDriver status {}", response.status());
                            Ok(None)
                        }
                        Err(e) => Err(SessionError::Other(e.to_string())),
                    }
                }
            })
            .await;

        matches!(ready, Ok(Some(())))
    }

    pub async fn stop(&self) {
        let mut process_guard = self.process.lock().await;
        if let Some(mut child) = process_guard.take() {
            if let Err(e) = child.kill() {
                warn!("Failed to kill ChromeDriver: {}", e);
            }
            let _ = child.wait();
            info!("ChromeDriver stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut process_guard = self.process.lock().await;
        match process_guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for ChromeDriverManager {
    fn drop(&mut self) {
        if let Ok(mut process_guard) = self.process.try_lock() {
            if let Some(mut child) = process_guard.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
