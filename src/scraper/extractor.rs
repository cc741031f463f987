use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::export::diagnostic;
use crate::models::ExtractedRecord;
use crate::scraper::browser::{BrowserSession, Locator};
use crate::scraper::parser::RecordParser;
use crate::scraper::retry::RetryPolicy;

static TEXT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<text[^>]*>([^<]+)</text>").expect("text pattern"));
static TSPAN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<tspan[^>]*>([^<]+)</tspan>").expect("tspan pattern"));

/// Marker that the schematic of the opened page has been rendered.
const CONTENT_MARKER: &str = "svg";

/// Pulls the schematic text of the currently opened page.
pub struct PageContentExtractor {
    config: Arc<RunConfig>,
}

impl PageContentExtractor {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Self { config }
    }

    /// Records of the current page flattened to `address function; address function`.
    pub async fn extract_current_page<S: BrowserSession>(&self, session: &S) -> String {
        flatten_records(&self.extract_page_records(session).await)
    }

    /// Records of the current page. Never fails: any read problem yields no records.
    pub async fn extract_page_records<S: BrowserSession>(&self, session: &S) -> Vec<ExtractedRecord> {
        self.wait_for_content(session).await;

        let page_source = match session.page_source().await {
            Ok(source) => source,
            Err(e) => {
                error!("Page source extraction failed: {}", e);
                return Vec::new();
            }
        };

        let fragments = self.collect_fragments(&page_source);
        if fragments.is_empty() {
            error!("No content could be extracted from the page markup");
            match diagnostic::dump_page_source(&self.config.diagnostics_dir, &page_source) {
                Ok(path) => info!("Saved page source for debugging: {}", path.display()),
                Err(e) => warn!("Could not save page source for debugging: {}", e),
            }
            return Vec::new();
        }

        info!("Extracted {} unique text elements", fragments.len());
        let records = RecordParser::parse(&fragments.join(" "));
        debug!("Parsed {} records", records.len());
        records
    }

    async fn wait_for_content<S: BrowserSession>(&self, session: &S) {
        let timing = &self.config.timing;
        let policy = RetryPolicy::new(
            timing.short_poll_attempts,
            Duration::from_millis(timing.short_poll_interval_ms),
        );
        let marker = Locator::tag(CONTENT_MARKER);

        match policy.poll("SVG content", |_| session.find_first(&marker)).await {
            Ok(Some(_)) => debug!("SVG content present"),
            Ok(None) => warn!("SVG content not found, extracting anyway"),
            Err(e) => warn!("Waiting for SVG content failed: {}", e),
        }
    }

    /// Text of `<text>` and `<tspan>` nodes, filtered and deduplicated in first-seen order.
    pub fn collect_fragments(&self, markup: &str) -> Vec<String> {
        let raw = TEXT_PATTERN
            .captures_iter(markup)
            .chain(TSPAN_PATTERN.captures_iter(markup))
            .filter_map(|cap| cap.get(1))
            .map(|m| decode_entities(m.as_str().trim()));

        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for text in raw {
            if !self.keep_fragment(&text) {
                continue;
            }
            if seen.insert(text.clone()) {
                unique.push(text);
            }
        }
        debug!("Kept {} text fragments", unique.len());
        unique
    }

    fn keep_fragment(&self, text: &str) -> bool {
        text.chars().count() > 2
            && !self
                .config
                .denylist
                .iter()
                .any(|skip| text.contains(skip.as_str()))
    }
}

pub fn flatten_records(records: &[ExtractedRecord]) -> String {
    records
        .iter()
        .map(ExtractedRecord::flatten)
        .collect::<Vec<_>>()
        .join("; ")
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::error::SessionError;
    use crate::scraper::testing::{svg_page, FakeSession};

    fn extractor(diagnostics: &std::path::Path) -> PageContentExtractor {
        let config = RunConfig {
            timing: TimingConfig::immediate(),
            diagnostics_dir: diagnostics.to_path_buf(),
            ..RunConfig::default()
        };
        PageContentExtractor::new(Arc::new(config))
    }

    #[test]
    fn test_short_and_denylisted_fragments_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = extractor(dir.path());
        let markup = svg_page(&["IO", "Datum 01.01.2024", "ET 200SP DI 8x24VDC", "Motor Start 1.2", "IW3.1"]);

        let fragments = extractor.collect_fragments(&markup);
        assert_eq!(fragments, vec!["Motor Start 1.2", "IW3.1"]);
    }

    #[test]
    fn test_fragments_deduplicated_in_first_seen_order() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = extractor(dir.path());
        let markup = "<svg><text>Pump 2.0</text><text>QW4.0</text>\
                      <text><tspan dy=\"1\">QW4.0</tspan></text><text>Pump 2.0</text>\
                      <tspan>Fan &amp; Heater 1.1</tspan></svg>";

        let fragments = extractor.collect_fragments(markup);
        assert_eq!(fragments, vec!["Pump 2.0", "QW4.0", "Fan & Heater 1.1"]);
    }

    #[tokio::test]
    async fn test_current_page_is_parsed_and_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession::new("https://eview.example/viewer");
        session.set_default_source(&svg_page(&["Motor Start 1.2", "IW3.1", "IW3.2"]));

        let text = extractor(dir.path()).extract_current_page(&session).await;
        assert_eq!(text, "IW3.1 Motor Start 1.2; IW3.2 Motor Start 1.2");
    }

    #[tokio::test]
    async fn test_markup_read_failure_yields_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession::new("https://eview.example/viewer");
        session.fail_page_source(SessionError::Other("chrome crashed".to_string()));

        let text = extractor(dir.path()).extract_current_page(&session).await;
        assert!(text.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_page_without_text_writes_diagnostic_dump() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession::new("https://eview.example/viewer");
        session.set_default_source("<html><body><canvas></canvas></body></html>");

        let text = extractor(dir.path()).extract_current_page(&session).await;
        assert!(text.is_empty());

        let dumps: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].starts_with("debug_page_source_"));
        assert!(dumps[0].ends_with(".html"));
    }
}
