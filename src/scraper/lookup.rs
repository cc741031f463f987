//! Element lookups expressed as ordered strategy lists.
//!
//! The viewer and the identity provider change their markup between
//! rollouts, so every control is described by several candidate locators.
//! Candidates are tried in order and the first element passing the
//! strategy's filter wins.

use tracing::debug;

use crate::error::SessionError;
use crate::scraper::browser::{BrowserSession, ElementHandle, Locator};
use crate::scraper::retry::RetryPolicy;

/// Where a text filter reads the element's label from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSource {
    Text,
    Attr(String),
    /// Visible text, falling back to the `value` attribute (inputs).
    TextOrValue,
}

/// Case-insensitive "contains any of" match over a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub source: TextSource,
    pub variants: Vec<String>,
}

impl TextMatch {
    pub fn any_of<I, S>(source: TextSource, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source,
            variants: variants.into_iter().map(|v| v.into().to_lowercase()).collect(),
        }
    }

    pub fn matches(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.variants.iter().any(|v| label.contains(v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub locator: Locator,
    pub require_displayed: bool,
    pub require_enabled: bool,
    pub text: Option<TextMatch>,
    /// Attribute that must contain the given value.
    pub attr: Option<(String, String)>,
}

impl Strategy {
    /// Any element the locator returns.
    pub fn any(locator: Locator) -> Self {
        Self {
            locator,
            require_displayed: false,
            require_enabled: false,
            text: None,
            attr: None,
        }
    }

    pub fn visible(locator: Locator) -> Self {
        Self {
            require_displayed: true,
            ..Self::any(locator)
        }
    }

    /// Visible and enabled: something that can be clicked or typed into.
    pub fn interactive(locator: Locator) -> Self {
        Self {
            require_displayed: true,
            require_enabled: true,
            ..Self::any(locator)
        }
    }

    pub fn with_text(mut self, text: TextMatch) -> Self {
        self.text = Some(text);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, contains: impl Into<String>) -> Self {
        self.attr = Some((name.into(), contains.into()));
        self
    }

    /// Check one candidate. Errors reading a single element count as a miss.
    pub async fn accepts<E: ElementHandle>(&self, element: &E) -> Result<bool, SessionError> {
        match self.check(element).await {
            Ok(accepted) => Ok(accepted),
            Err(e) if e.is_terminal() => Err(e),
            Err(e) => {
                debug!("Skipping candidate for {}: {}", self.locator, e);
                Ok(false)
            }
        }
    }

    async fn check<E: ElementHandle>(&self, element: &E) -> Result<bool, SessionError> {
        if self.require_displayed && !element.is_displayed().await? {
            return Ok(false);
        }
        if self.require_enabled && !element.is_enabled().await? {
            return Ok(false);
        }
        if let Some((name, needle)) = &self.attr {
            match element.attr(name).await? {
                Some(value) if value.contains(needle.as_str()) => {}
                _ => return Ok(false),
            }
        }
        if let Some(text) = &self.text {
            let label = match &text.source {
                TextSource::Text => element.text().await?,
                TextSource::Attr(name) => element.attr(name).await?.unwrap_or_default(),
                TextSource::TextOrValue => {
                    let visible = element.text().await?;
                    if visible.trim().is_empty() {
                        element.attr("value").await?.unwrap_or_default()
                    } else {
                        visible
                    }
                }
            };
            if !text.matches(label.trim()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Ordered strategies evaluated with early exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyList {
    name: String,
    strategies: Vec<Strategy>,
}

/// The element a lookup found and which strategy found it.
#[derive(Debug, Clone)]
pub struct Found<E> {
    pub element: E,
    pub strategy: usize,
}

impl StrategyList {
    pub fn new(name: impl Into<String>, strategies: Vec<Strategy>) -> Self {
        Self {
            name: name.into(),
            strategies,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// One pass over all strategies.
    pub async fn first_match<S: BrowserSession>(
        &self,
        session: &S,
    ) -> Result<Option<Found<S::Element>>, SessionError> {
        for (index, strategy) in self.strategies.iter().enumerate() {
            let candidates = match session.find_all(&strategy.locator).await {
                Ok(candidates) => candidates,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!("{}: lookup {} failed: {}", self.name, strategy.locator, e);
                    continue;
                }
            };

            for element in candidates {
                if strategy.accepts(&element).await? {
                    debug!("{} found with {}", self.name, strategy.locator);
                    return Ok(Some(Found {
                        element,
                        strategy: index,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Every accepted candidate of every strategy, in strategy order.
    pub async fn matches<S: BrowserSession>(&self, session: &S) -> Result<Vec<Found<S::Element>>, SessionError> {
        let mut found = Vec::new();
        for (index, strategy) in self.strategies.iter().enumerate() {
            let candidates = match session.find_all(&strategy.locator).await {
                Ok(candidates) => candidates,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!("{}: lookup {} failed: {}", self.name, strategy.locator, e);
                    continue;
                }
            };

            for element in candidates {
                if strategy.accepts(&element).await? {
                    found.push(Found {
                        element,
                        strategy: index,
                    });
                }
            }
        }
        debug!("{}: {} candidates", self.name, found.len());
        Ok(found)
    }

    /// Repeat [`first_match`](Self::first_match) under a fixed retry budget.
    pub async fn wait_for<S: BrowserSession>(
        &self,
        session: &S,
        policy: RetryPolicy,
    ) -> Result<Option<Found<S::Element>>, SessionError> {
        policy.poll(&self.name, |_| self.first_match(session)).await
    }
}
