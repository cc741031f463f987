//! Scriptable in-memory browser used by the unit tests.
//!
//! Elements are registered per locator. The eVIEW page list is simulated as
//! a virtualized window over a backing list: only the items under the current
//! scroll offset are rendered, and every scroll or page click bumps a DOM
//! generation so handles obtained earlier report a stale element.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::scraper::browser::{BrowserSession, ElementHandle, Locator};
use crate::scraper::traverser::{
    LIST_ITEM_TAG, READ_SCROLL_TOP, SCROLL_BY_PREFIX, SCROLL_CONTAINER, SCROLL_TO_TOP,
};

#[derive(Debug, Clone)]
pub enum ClickEffect {
    Navigate(String),
    Reveal(Locator, FakeNode),
}

#[derive(Debug, Clone)]
pub struct FakeNode {
    tag: String,
    id: String,
    text: String,
    attrs: HashMap<String, String>,
    displayed: bool,
    enabled: bool,
    children: Vec<(Locator, FakeNode)>,
    effects: Vec<ClickEffect>,
    click_failure: Option<SessionError>,
}

impl FakeNode {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            id: String::new(),
            text: String::new(),
            attrs: HashMap::new(),
            displayed: true,
            enabled: true,
            children: Vec::new(),
            effects: Vec::new(),
            click_failure: None,
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn child(mut self, locator: Locator, node: FakeNode) -> Self {
        self.children.push((locator, node));
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn fail_click(mut self, error: SessionError) -> Self {
        self.click_failure = Some(error);
        self
    }

    fn outer_html(&self) -> String {
        format!("<{} id=\"{}\">{}</{}>", self.tag, self.id, self.text, self.tag)
    }
}

/// One entry of the simulated virtualized page list.
#[derive(Debug, Clone)]
pub struct FakeListItem {
    pub markup: String,
    pub label: String,
    pub svg: String,
    pub stale_reads: u32,
    /// 1-based markup read that reports a stale element.
    pub stale_read_at: Option<u32>,
    pub markup_reads: u32,
    pub click_failure: Option<SessionError>,
}

impl FakeListItem {
    pub fn new(markup: &str, label: &str, svg: &str) -> Self {
        Self {
            markup: markup.to_string(),
            label: label.to_string(),
            svg: svg.to_string(),
            stale_reads: 0,
            stale_read_at: None,
            markup_reads: 0,
            click_failure: None,
        }
    }

    pub fn stale_on_first_read(mut self) -> Self {
        self.stale_reads = 1;
        self
    }

    pub fn stale_on_read(mut self, read: u32) -> Self {
        self.stale_read_at = Some(read);
        self
    }

    pub fn fail_click(mut self, error: SessionError) -> Self {
        self.click_failure = Some(error);
        self
    }
}

#[derive(Debug, Default)]
struct FakeList {
    items: Vec<FakeListItem>,
    item_height: i64,
    viewport_items: usize,
    scroll_top: i64,
    /// When false the container never scrolls, whatever the script says.
    scrollable: bool,
    /// The viewer jumps back to the top once this offset is reached.
    rewind_at: Option<i64>,
}

impl FakeList {
    fn max_scroll(&self) -> i64 {
        let hidden = self.items.len().saturating_sub(self.viewport_items) as i64;
        hidden * self.item_height
    }

    fn rendered(&self) -> Vec<usize> {
        let first = (self.scroll_top / self.item_height.max(1)) as usize;
        (first..self.items.len()).take(self.viewport_items).collect()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    url: String,
    arena: Vec<FakeNode>,
    registry: HashMap<Locator, Vec<usize>>,
    lookups: HashMap<Locator, usize>,
    list: Option<FakeList>,
    generation: u64,
    current_page: Option<usize>,
    default_source: String,
    source_failure: Option<SessionError>,
    clicks: Vec<String>,
    typed: Vec<(String, String)>,
    enters: Vec<String>,
    scripts: Vec<String>,
    opened_pages: Vec<usize>,
    closed: bool,
    container_scripts: u32,
    stale_container_script: Option<u32>,
    cancel_after_opens: Option<(usize, CancellationToken)>,
}

impl FakeState {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed("invalid session id".to_string()))
        } else {
            Ok(())
        }
    }

    fn apply(&mut self, effects: Vec<ClickEffect>) {
        for effect in effects {
            match effect {
                ClickEffect::Navigate(url) => self.url = url,
                ClickEffect::Reveal(locator, node) => {
                    self.arena.push(node);
                    let index = self.arena.len() - 1;
                    self.registry.entry(locator).or_default().push(index);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Handle {
    Node(usize),
    Detached(Box<FakeNode>),
    Container,
    ListItem { item: usize, generation: u64 },
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    state: Arc<Mutex<FakeState>>,
    handle: Handle,
}

#[derive(Clone)]
pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSession {
    pub fn new(url: &str) -> Self {
        let state = FakeState {
            url: url.to_string(),
            ..FakeState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add(&self, locator: Locator, node: FakeNode) {
        let mut state = self.lock();
        state.arena.push(node);
        let index = state.arena.len() - 1;
        state.registry.entry(locator).or_default().push(index);
    }

    /// Install the virtualized page list with `viewport_items` rendered at once.
    pub fn with_list(&self, items: Vec<FakeListItem>, viewport_items: usize, item_height: i64) {
        self.lock().list = Some(FakeList {
            items,
            item_height,
            viewport_items,
            scroll_top: 0,
            scrollable: true,
            rewind_at: None,
        });
    }

    pub fn freeze_scroll(&self) {
        if let Some(list) = self.lock().list.as_mut() {
            list.scrollable = false;
        }
    }

    pub fn rewind_scroll_at(&self, offset: i64) {
        if let Some(list) = self.lock().list.as_mut() {
            list.rewind_at = Some(offset);
        }
    }

    /// The `script`-th script run on the scroll container (1-based) fails as stale.
    pub fn stale_container_on_script(&self, script: u32) {
        self.lock().stale_container_script = Some(script);
    }

    pub fn set_default_source(&self, source: &str) {
        self.lock().default_source = source.to_string();
    }

    pub fn fail_page_source(&self, error: SessionError) {
        self.lock().source_failure = Some(error);
    }

    pub fn cancel_after_opens(&self, opens: usize, token: CancellationToken) {
        self.lock().cancel_after_opens = Some((opens, token));
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    pub fn lookups(&self, locator: &Locator) -> usize {
        self.lock().lookups.get(locator).copied().unwrap_or(0)
    }

    pub fn clicks(&self) -> Vec<String> {
        self.lock().clicks.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.lock().typed.clone()
    }

    pub fn enters(&self) -> Vec<String> {
        self.lock().enters.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    pub fn opened_pages(&self) -> Vec<usize> {
        self.lock().opened_pages.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn element(&self, handle: Handle) -> FakeElement {
        FakeElement {
            state: self.state.clone(),
            handle,
        }
    }
}

impl FakeElement {
    pub fn node_id(&self) -> String {
        let state = self.state.lock().unwrap();
        match &self.handle {
            Handle::Node(index) => state.arena[*index].id.clone(),
            Handle::Detached(node) => node.id.clone(),
            Handle::Container => "container".to_string(),
            Handle::ListItem { item, .. } => format!("item-{}", item),
        }
    }

    fn with_node<T>(&self, f: impl FnOnce(&FakeNode) -> T) -> Result<T, SessionError> {
        let state = self.state.lock().unwrap();
        state.ensure_open()?;
        match &self.handle {
            Handle::Node(index) => Ok(f(&state.arena[*index])),
            Handle::Detached(node) => Ok(f(node)),
            Handle::Container => Ok(f(&FakeNode::new(SCROLL_CONTAINER))),
            Handle::ListItem { .. } => Err(SessionError::Other("not a plain node".to_string())),
        }
    }

    fn live_item(&self, state: &FakeState) -> Result<Option<usize>, SessionError> {
        state.ensure_open()?;
        match self.handle {
            Handle::ListItem { item, generation } => {
                if generation != state.generation {
                    Err(SessionError::StaleElement(format!("item {} re-rendered", item)))
                } else {
                    Ok(Some(item))
                }
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ElementHandle for FakeElement {
    async fn click(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = self.live_item(&state)? {
            let list = state.list.as_mut().ok_or_else(|| SessionError::Other("no list".into()))?;
            if let Some(error) = list.items[item].click_failure.take() {
                return Err(error);
            }
            state.current_page = Some(item);
            state.opened_pages.push(item);
            state.clicks.push(format!("item-{}", item));
            state.generation += 1;
            if let Some((opens, token)) = &state.cancel_after_opens {
                if state.opened_pages.len() >= *opens {
                    token.cancel();
                }
            }
            return Ok(());
        }

        match &self.handle {
            Handle::Node(index) => {
                let index = *index;
                if let Some(error) = state.arena[index].click_failure.take() {
                    return Err(error);
                }
                let id = state.arena[index].id.clone();
                let effects = state.arena[index].effects.clone();
                state.clicks.push(id);
                state.apply(effects);
                Ok(())
            }
            Handle::Detached(node) => {
                state.clicks.push(node.id.clone());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn type_text(&self, text: &str) -> Result<(), SessionError> {
        let id = self.node_id();
        let mut state = self.state.lock().unwrap();
        state.ensure_open()?;
        state.typed.push((id, text.to_string()));
        Ok(())
    }

    async fn press_enter(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.ensure_open()?;
        if let Handle::Node(index) = &self.handle {
            let index = *index;
            let id = state.arena[index].id.clone();
            let effects = state.arena[index].effects.clone();
            state.enters.push(id);
            state.apply(effects);
        }
        Ok(())
    }

    async fn text(&self) -> Result<String, SessionError> {
        {
            let state = self.state.lock().unwrap();
            if let Some(item) = self.live_item(&state)? {
                let list = state.list.as_ref().ok_or_else(|| SessionError::Other("no list".into()))?;
                return Ok(list.items[item].label.clone());
            }
        }
        self.with_node(|node| node.text.clone())
    }

    async fn attr(&self, name: &str) -> Result<Option<String>, SessionError> {
        self.with_node(|node| node.attrs.get(name).cloned())
    }

    async fn outer_html(&self) -> Result<String, SessionError> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(item) = self.live_item(&state)? {
                let list = state.list.as_mut().ok_or_else(|| SessionError::Other("no list".into()))?;
                let entry = &mut list.items[item];
                entry.markup_reads += 1;
                if entry.stale_read_at == Some(entry.markup_reads) {
                    return Err(SessionError::StaleElement("re-rendered while reading".to_string()));
                }
                if entry.stale_reads > 0 {
                    entry.stale_reads -= 1;
                    return Err(SessionError::StaleElement("detached while reading".to_string()));
                }
                return Ok(entry.markup.clone());
            }
        }
        self.with_node(|node| node.outer_html())
    }

    async fn is_displayed(&self) -> Result<bool, SessionError> {
        {
            let state = self.state.lock().unwrap();
            if self.live_item(&state)?.is_some() {
                return Ok(true);
            }
        }
        self.with_node(|node| node.displayed)
    }

    async fn is_enabled(&self) -> Result<bool, SessionError> {
        {
            let state = self.state.lock().unwrap();
            if self.live_item(&state)?.is_some() {
                return Ok(true);
            }
        }
        self.with_node(|node| node.enabled)
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<Self>, SessionError> {
        {
            let state = self.state.lock().unwrap();
            if let Some(item) = self.live_item(&state)? {
                let list = state.list.as_ref().ok_or_else(|| SessionError::Other("no list".into()))?;
                let label = list.items[item].label.clone();
                let description = Locator::css(crate::scraper::traverser::ITEM_DESCRIPTION);
                if *locator == description && !label.is_empty() {
                    let node = FakeNode::new("span").text(&label);
                    return Ok(vec![FakeElement {
                        state: self.state.clone(),
                        handle: Handle::Detached(Box::new(node)),
                    }]);
                }
                return Ok(Vec::new());
            }
        }

        let locator = locator.clone();
        let children = self.with_node(|node| {
            node.children
                .iter()
                .filter(|(l, _)| *l == locator)
                .map(|(_, n)| n.clone())
                .collect::<Vec<_>>()
        })?;
        Ok(children
            .into_iter()
            .map(|node| FakeElement {
                state: self.state.clone(),
                handle: Handle::Detached(Box::new(node)),
            })
            .collect())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    type Element = FakeElement;

    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        let state = self.lock();
        state.ensure_open()?;
        Ok(state.url.clone())
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<FakeElement>, SessionError> {
        let handles = {
            let mut state = self.lock();
            state.ensure_open()?;
            *state.lookups.entry(locator.clone()).or_insert(0) += 1;

            if *locator == Locator::tag(LIST_ITEM_TAG) {
                let generation = state.generation;
                state
                    .list
                    .as_ref()
                    .map(|list| {
                        list.rendered()
                            .into_iter()
                            .map(|item| Handle::ListItem { item, generation })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            } else if *locator == Locator::css(SCROLL_CONTAINER) {
                if state.list.is_some() {
                    vec![Handle::Container]
                } else {
                    Vec::new()
                }
            } else if *locator == Locator::tag("svg") {
                let has_svg = state
                    .current_page
                    .and_then(|page| state.list.as_ref().map(|l| l.items[page].svg.contains("<svg")))
                    .unwrap_or(false);
                if has_svg {
                    vec![Handle::Detached(Box::new(FakeNode::new("svg")))]
                } else {
                    Vec::new()
                }
            } else {
                state
                    .registry
                    .get(locator)
                    .map(|indices| indices.iter().map(|i| Handle::Node(*i)).collect())
                    .unwrap_or_default()
            }
        };

        Ok(handles.into_iter().map(|h| self.element(h)).collect())
    }

    async fn page_source(&self) -> Result<String, SessionError> {
        let state = self.lock();
        state.ensure_open()?;
        if let Some(error) = &state.source_failure {
            return Err(error.clone());
        }
        let page = state
            .current_page
            .and_then(|page| state.list.as_ref().map(|l| l.items[page].svg.clone()));
        Ok(page.unwrap_or_else(|| state.default_source.clone()))
    }

    async fn execute(
        &self,
        script: &str,
        target: Option<&FakeElement>,
    ) -> Result<serde_json::Value, SessionError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.scripts.push(script.to_string());

        let on_container = matches!(target.map(|t| &t.handle), Some(Handle::Container));
        if !on_container {
            return Ok(serde_json::Value::Null);
        }
        state.container_scripts += 1;
        if state.stale_container_script == Some(state.container_scripts) {
            return Err(SessionError::StaleElement("scroll container re-rendered".to_string()));
        }

        let generation = state.generation;
        let list = state
            .list
            .as_mut()
            .ok_or_else(|| SessionError::Script("no scroll container".to_string()))?;

        let before = list.scroll_top;
        if script == SCROLL_TO_TOP {
            list.scroll_top = 0;
        } else if script == READ_SCROLL_TOP {
            return Ok(serde_json::json!(list.scroll_top));
        } else if let Some(step) = script.strip_prefix(SCROLL_BY_PREFIX) {
            let step: i64 = step
                .trim()
                .parse()
                .map_err(|_| SessionError::Script(format!("bad scroll step in {}", script)))?;
            if list.scrollable {
                list.scroll_top = (list.scroll_top + step).min(list.max_scroll()).max(0);
            }
            if let Some(at) = list.rewind_at {
                if list.scroll_top >= at {
                    list.scroll_top = 0;
                    list.rewind_at = None;
                }
            }
        }
        let moved = list.scroll_top != before;
        if moved {
            state.generation = generation + 1;
        }
        Ok(serde_json::Value::Null)
    }

    async fn quit(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.closed = true;
        Ok(())
    }
}

/// A minimal SVG page whose `<text>` nodes carry the given fragments.
pub fn svg_page(fragments: &[&str]) -> String {
    let body: String = fragments
        .iter()
        .map(|f| format!("<text x=\"0\" y=\"0\">{}</text>", f))
        .collect();
    format!("<html><body><svg>{}</svg></body></html>", body)
}
