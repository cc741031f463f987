pub mod browser;
pub mod extractor;
pub mod lookup;
pub mod navigator;
pub mod parser;
pub mod retry;
pub mod traverser;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::error::ExtractError;
use crate::export::PageListWriter;
use crate::models::ExtractedRecord;
use browser::BrowserSession;
use navigator::SessionNavigator;
use traverser::{ListTraverser, PageTypeFilter, TraversalStats};

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    /// One flattened string per page that yielded records, in visit order.
    pub pages: Vec<String>,
    pub records: Vec<ExtractedRecord>,
    pub stats: TraversalStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(usize),
    NothingFound,
}

impl ExtractionReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.pages.is_empty() {
            RunOutcome::NothingFound
        } else {
            RunOutcome::Completed(self.pages.len())
        }
    }
}

/// Runs login, project selection, list traversal and output on one session.
pub struct ScraperEngine<S: BrowserSession> {
    session: S,
    config: Arc<RunConfig>,
    cancel: CancellationToken,
}

impl<S: BrowserSession> ScraperEngine<S> {
    pub fn new(session: S, config: Arc<RunConfig>, cancel: CancellationToken) -> Self {
        Self {
            session,
            config,
            cancel,
        }
    }

    /// Run the full pipeline. The session is closed afterwards, except
    /// after a failure in debug mode so the browser can be inspected.
    pub async fn run(self) -> Result<ExtractionReport, ExtractError> {
        info!("🚀 Starting eVIEW extraction process...");

        let result = tokio::select! {
            result = self.run_steps() => result,
            _ = self.cancel.cancelled() => {
                warn!("Cancellation requested, stopping extraction");
                Err(ExtractError::Cancelled)
            }
        };

        match &result {
            Ok(report) => info!(
                "🎉 Extraction completed! {} pages with content, {} records",
                report.pages.len(),
                report.records.len()
            ),
            Err(e) => error!("❌ Extraction failed during {}: {}", e.phase(), e),
        }

        let keep_open = result.is_err()
            && self.config.debug_mode
            && !matches!(result, Err(ExtractError::Cancelled));
        if keep_open {
            warn!("Debug mode: leaving the browser open for inspection");
        } else if let Err(e) = self.session.quit().await {
            warn!("Failed to close browser session: {}", e);
        }

        result
    }

    async fn run_steps(&self) -> Result<ExtractionReport, ExtractError> {
        let mut navigator = SessionNavigator::new(self.config.clone());

        info!("📍 Step 1/4: Logging in...");
        navigator
            .authenticate(&self.session, &self.config.credentials())
            .await?;

        info!("📍 Step 2/4: Opening project '{}'...", self.config.project);
        navigator
            .open_project(&self.session, &self.config.project_handle())
            .await?;
        info!("✅ Project '{}' opened successfully", self.config.project);

        info!("📍 Step 3/4: Switching to list view...");
        navigator.switch_to_list_view(&self.session).await?;

        info!("📍 Step 4/4: Extracting '{}' pages...", self.config.page_type);
        let filter = PageTypeFilter::new(&self.config.page_type);
        let traversal = ListTraverser::new(self.config.clone(), self.cancel.clone())
            .traverse(&self.session, |item| filter.matches(item))
            .await?;

        if traversal.pages.is_empty() {
            warn!("⚠️ Traversal completed but no page yielded records");
        }

        let writer = PageListWriter::new(&self.config.output_path);
        writer.write(&traversal.pages)?;
        info!(
            "💾 Saved {} pages to {}",
            traversal.pages.len(),
            writer.path().display()
        );

        Ok(ExtractionReport {
            pages: traversal.pages,
            records: traversal.records,
            stats: traversal.stats,
        })
    }
}
