use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::{ExtractError, SessionError};
use crate::models::ExtractedRecord;
use crate::scraper::browser::{BrowserSession, ElementHandle, Locator};
use crate::scraper::extractor::{flatten_records, PageContentExtractor};

pub const LIST_ITEM_TAG: &str = "pv-page-list-item";
pub const SCROLL_CONTAINER: &str = "cdk-virtual-scroll-viewport";
pub const ITEM_DESCRIPTION: &str = ".ev-description.ev-hi";

pub const SCROLL_TO_TOP: &str = "arguments[0].scrollTop = 0";
pub const READ_SCROLL_TOP: &str = "return arguments[0].scrollTop";
pub const SCROLL_BY_PREFIX: &str = "arguments[0].scrollTop += ";

/// Jumps back up the list tolerated before traversal gives up.
const MAX_SCROLL_REWINDS: usize = 3;

/// Identity of a list item, derived from its full rendered markup.
///
/// The virtual scroll viewport recycles nodes, so neither the position nor
/// the node handle says which page an item shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_markup(markup: &str) -> Self {
        Self(format!("{:x}", Sha256::digest(markup.as_bytes())))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// One rendered entry of the page list.
#[derive(Debug, Clone)]
pub struct PageItem<H> {
    pub fingerprint: Fingerprint,
    /// Page description text (`.ev-description.ev-hi`), if rendered.
    pub label: String,
    /// All text of the item.
    pub text: String,
    handle: H,
}

impl<H> PageItem<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }
}

/// Selects list items by their page type label, e.g. `PLC-Diagram`.
#[derive(Debug, Clone)]
pub struct PageTypeFilter {
    page_type: String,
}

impl PageTypeFilter {
    pub fn new(page_type: impl Into<String>) -> Self {
        Self {
            page_type: page_type.into(),
        }
    }

    pub fn matches<H>(&self, item: &PageItem<H>) -> bool {
        item.label.contains(&self.page_type) || item.text.contains(&self.page_type)
    }
}

/// Mutable state of one traversal; dropped when the run ends.
#[derive(Debug, Default)]
pub struct TraversalState {
    pub visited: HashSet<Fingerprint>,
    pub last_scroll_offset: i64,
    pub collected_texts: Vec<String>,
    pub records: Vec<ExtractedRecord>,
    pub items_scanned: usize,
    pub sweeps: usize,
    pub scroll_rewinds: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub items_scanned: usize,
    pub targets_found: usize,
    pub pages_with_content: usize,
    pub sweeps: usize,
}

/// Result of walking the whole list once from top to bottom.
#[derive(Debug, Clone, Default)]
pub struct Traversal {
    /// Flattened record string per visited page with content, in visit order.
    pub pages: Vec<String>,
    pub records: Vec<ExtractedRecord>,
    pub stats: TraversalStats,
}

/// Walks the virtualized page list and extracts every target page once.
pub struct ListTraverser {
    config: Arc<RunConfig>,
    extractor: PageContentExtractor,
    cancel: CancellationToken,
}

impl ListTraverser {
    pub fn new(config: Arc<RunConfig>, cancel: CancellationToken) -> Self {
        Self {
            extractor: PageContentExtractor::new(config.clone()),
            config,
            cancel,
        }
    }

    pub async fn traverse<S, P>(&self, session: &S, is_target: P) -> Result<Traversal, ExtractError>
    where
        S: BrowserSession,
        P: Fn(&PageItem<S::Element>) -> bool + Send + Sync,
    {
        info!("🚀 Starting page list traversal...");
        let timing = &self.config.timing;

        let mut container = find_container(session).await?;

        match run_on_container(session, &mut container, SCROLL_TO_TOP).await {
            Ok(_) => {
                debug!("Scrolled to top of page list");
                sleep(Duration::from_millis(timing.scroll_settle_ms)).await;
            }
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => warn!("⚠️ Could not scroll to top: {}", e),
        }

        let mut state = TraversalState {
            last_scroll_offset: self.read_offset(session, &mut container).await?.unwrap_or(0),
            ..TraversalState::default()
        };

        loop {
            state.sweeps += 1;
            self.sweep(session, &is_target, &mut state).await?;

            if self.cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }

            let step = format!("{}{}", SCROLL_BY_PREFIX, timing.scroll_step_px);
            debug!("⬇️ Scrolling down (sweep #{})", state.sweeps);
            if let Err(e) = run_on_container(session, &mut container, &step).await {
                if e.is_terminal() {
                    return Err(e.into());
                }
                warn!("❌ Could not scroll down: {}", e);
                break;
            }
            sleep(Duration::from_millis(timing.scroll_settle_ms)).await;

            match self.read_offset(session, &mut container).await? {
                Some(offset) if offset == state.last_scroll_offset => {
                    debug!("🏁 Scroll position stayed at {}, bottom reached", offset);
                    break;
                }
                Some(offset) if offset < state.last_scroll_offset => {
                    state.scroll_rewinds += 1;
                    if state.scroll_rewinds > MAX_SCROLL_REWINDS {
                        warn!(
                            "⚠️ Scroll position jumped back {} times, stopping at {}",
                            state.scroll_rewinds, offset
                        );
                        break;
                    }
                    warn!(
                        "⚠️ Scroll position jumped back from {} to {}, continuing",
                        state.last_scroll_offset, offset
                    );
                    state.last_scroll_offset = offset;
                }
                Some(offset) => {
                    debug!("📏 Scroll position {} (previous {})", offset, state.last_scroll_offset);
                    state.last_scroll_offset = offset;
                }
                None => {
                    warn!("⚠️ Could not read scroll position, assuming bottom reached");
                    break;
                }
            }
        }

        let stats = TraversalStats {
            items_scanned: state.items_scanned,
            targets_found: state.visited.len(),
            pages_with_content: state.collected_texts.len(),
            sweeps: state.sweeps,
        };
        info!(
            "📊 Traversal finished: {} items scanned, {} target pages, {} with content, {} sweeps",
            stats.items_scanned, stats.targets_found, stats.pages_with_content, stats.sweeps
        );

        Ok(Traversal {
            pages: state.collected_texts,
            records: state.records,
            stats,
        })
    }

    async fn read_offset<S: BrowserSession>(
        &self,
        session: &S,
        container: &mut S::Element,
    ) -> Result<Option<i64>, SessionError> {
        match run_on_container(session, container, READ_SCROLL_TOP).await {
            Ok(value) => Ok(value.as_i64().or_else(|| value.as_f64().map(|v| v as i64))),
            Err(e) if e.is_terminal() => Err(e),
            Err(e) => {
                warn!("Could not read scroll position: {}", e);
                Ok(None)
            }
        }
    }

    /// Visit every slot currently rendered. Slots are re-resolved by index
    /// each time since handles from the previous slot may have gone stale.
    async fn sweep<S, P>(&self, session: &S, is_target: &P, state: &mut TraversalState) -> Result<(), ExtractError>
    where
        S: BrowserSession,
        P: Fn(&PageItem<S::Element>) -> bool + Send + Sync,
    {
        let slots = session.find_all(&Locator::tag(LIST_ITEM_TAG)).await?.len();
        debug!("📋 Sweep #{}: {} rendered items", state.sweeps, slots);

        for index in 0..slots {
            state.items_scanned += 1;
            match self.visit_slot(session, index, is_target, state).await {
                Ok(()) => {}
                Err(ExtractError::Session(e)) if !e.is_terminal() => {
                    warn!("⚠️ Skipping item {} of sweep #{}: {}", index + 1, state.sweeps, e);
                }
                Err(e) => return Err(e),
            }
            sleep(Duration::from_millis(self.config.timing.item_pause_ms)).await;
        }
        Ok(())
    }

    async fn visit_slot<S, P>(
        &self,
        session: &S,
        index: usize,
        is_target: &P,
        state: &mut TraversalState,
    ) -> Result<(), ExtractError>
    where
        S: BrowserSession,
        P: Fn(&PageItem<S::Element>) -> bool + Send + Sync,
    {
        let handles = session.find_all(&Locator::tag(LIST_ITEM_TAG)).await?;
        let Some(handle) = handles.into_iter().nth(index) else {
            debug!("Item index {} no longer rendered, skipping", index);
            return Ok(());
        };

        let item = read_item(handle).await?;
        if !is_target(&item) {
            debug!("⚪ Item {} ({}) is not a target page", index + 1, item.fingerprint);
            return Ok(());
        }

        if state.visited.contains(&item.fingerprint) {
            debug!("Target page {} already processed", item.fingerprint);
            return Ok(());
        }

        if self.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let page_number = state.visited.len() + 1;
        info!("🎯 Opening target page #{}: '{}'", page_number, one_line(&item.label, &item.text));
        sleep(Duration::from_millis(self.config.timing.item_settle_ms)).await;

        // Marked only once a click is attempted; a missed re-resolve leaves
        // the page for a later sweep.
        let fresh = match resolve_by_fingerprint(session, &item.fingerprint).await? {
            Some(fresh) => fresh,
            None => {
                warn!("⚠️ Target page #{} disappeared before it could be opened", page_number);
                return Ok(());
            }
        };
        state.visited.insert(item.fingerprint.clone());
        fresh.handle().click().await?;
        sleep(Duration::from_millis(self.config.timing.item_settle_ms)).await;

        let records = self.extractor.extract_page_records(session).await;
        if records.is_empty() {
            warn!("⚠️ No content extracted from target page #{}", page_number);
            return Ok(());
        }

        state.collected_texts.push(flatten_records(&records));
        state.records.extend(records);
        info!(
            "✅ Extracted target page #{} (pages with content: {})",
            page_number,
            state.collected_texts.len()
        );
        Ok(())
    }
}

async fn read_item<H: ElementHandle>(handle: H) -> Result<PageItem<H>, SessionError> {
    let markup = handle.outer_html().await?;

    let mut labels = Vec::new();
    match handle.find_all(&Locator::css(ITEM_DESCRIPTION)).await {
        Ok(descriptions) => {
            for description in descriptions {
                labels.push(description.text().await?);
            }
        }
        Err(e) if e.is_transient() || e.is_terminal() => return Err(e),
        Err(e) => debug!("No description elements: {}", e),
    }
    let text = handle.text().await?;

    Ok(PageItem {
        fingerprint: Fingerprint::of_markup(&markup),
        label: labels.join(" "),
        text,
        handle,
    })
}

async fn find_container<S: BrowserSession>(session: &S) -> Result<S::Element, SessionError> {
    session
        .find_first(&Locator::css(SCROLL_CONTAINER))
        .await?
        .ok_or_else(|| SessionError::NoSuchElement(format!("scroll container '{}'", SCROLL_CONTAINER)))
}

/// Run `script` on the scroll container, re-resolving it once if the viewer
/// re-rendered it.
async fn run_on_container<S: BrowserSession>(
    session: &S,
    container: &mut S::Element,
    script: &str,
) -> Result<serde_json::Value, SessionError> {
    match session.execute(script, Some(&*container)).await {
        Err(SessionError::StaleElement(msg)) => {
            debug!("Scroll container went stale ({}), looking it up again", msg);
            *container = find_container(session).await?;
            session.execute(script, Some(&*container)).await
        }
        other => other,
    }
}

/// Find the rendered item showing the page with `fingerprint` right now.
async fn resolve_by_fingerprint<S: BrowserSession>(
    session: &S,
    fingerprint: &Fingerprint,
) -> Result<Option<PageItem<S::Element>>, SessionError> {
    for handle in session.find_all(&Locator::tag(LIST_ITEM_TAG)).await? {
        let markup = match handle.outer_html().await {
            Ok(markup) => markup,
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) => {
                debug!("Skipping unreadable item while re-resolving: {}", e);
                continue;
            }
        };
        if Fingerprint::of_markup(&markup) == *fingerprint {
            return Ok(Some(read_item(handle).await?));
        }
    }
    error!("Page {} not found among rendered items", fingerprint);
    Ok(None)
}

fn one_line(label: &str, text: &str) -> String {
    let source = if label.is_empty() { text } else { label };
    source.split_whitespace().collect::<Vec<_>>().join(" ")
}
