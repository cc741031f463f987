use async_trait::async_trait;
use std::fmt;
use thirtyfour::prelude::*;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::error::{ExtractError, SessionError};

/// How an element is located in the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
    Tag(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Locator::Tag(name.into())
    }

    fn to_by(&self) -> By {
        match self {
            Locator::Css(s) => By::Css(s.as_str()),
            Locator::XPath(s) => By::XPath(s.as_str()),
            Locator::Tag(s) => By::Tag(s.as_str()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{}", s),
            Locator::XPath(s) => write!(f, "xpath:{}", s),
            Locator::Tag(s) => write!(f, "tag:{}", s),
        }
    }
}

/// A handle to a rendered element. Only valid until the next DOM mutation;
/// callers re-resolve instead of holding one across awaited settle delays.
#[async_trait]
pub trait ElementHandle: Clone + Send + Sync {
    async fn click(&self) -> Result<(), SessionError>;
    /// Clear the field and type `text` into it.
    async fn type_text(&self, text: &str) -> Result<(), SessionError>;
    /// Press the default action key (Return).
    async fn press_enter(&self) -> Result<(), SessionError>;
    async fn text(&self) -> Result<String, SessionError>;
    async fn attr(&self, name: &str) -> Result<Option<String>, SessionError>;
    async fn outer_html(&self) -> Result<String, SessionError>;
    async fn is_displayed(&self) -> Result<bool, SessionError>;
    async fn is_enabled(&self) -> Result<bool, SessionError>;
    async fn find_all(&self, locator: &Locator) -> Result<Vec<Self>, SessionError>;
}

/// The browser capability the pipeline drives.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    type Element: ElementHandle;

    async fn navigate(&self, url: &str) -> Result<(), SessionError>;
    async fn current_url(&self) -> Result<String, SessionError>;
    async fn find_all(&self, locator: &Locator) -> Result<Vec<Self::Element>, SessionError>;
    async fn page_source(&self) -> Result<String, SessionError>;
    /// Run `script` with `target` bound to `arguments[0]` and return its value.
    async fn execute(
        &self,
        script: &str,
        target: Option<&Self::Element>,
    ) -> Result<serde_json::Value, SessionError>;
    async fn quit(&self) -> Result<(), SessionError>;

    async fn find_first(&self, locator: &Locator) -> Result<Option<Self::Element>, SessionError> {
        Ok(self.find_all(locator).await?.into_iter().next())
    }
}

fn session_err(e: WebDriverError) -> SessionError {
    let message = e.to_string();
    match e {
        WebDriverError::StaleElementReference(_) => SessionError::StaleElement(message),
        WebDriverError::ElementClickIntercepted(_) => SessionError::ClickIntercepted(message),
        WebDriverError::NoSuchElement(_) => SessionError::NoSuchElement(message),
        WebDriverError::JavascriptError(_) => SessionError::Script(message),
        WebDriverError::InvalidSessionId(_)
        | WebDriverError::NoSuchWindow(_)
        | WebDriverError::FatalError(_)
        | WebDriverError::CommandSendError(_)
        | WebDriverError::CommandRecvError(_) => SessionError::Closed(message),
        _ => SessionError::classify(message),
    }
}

pub struct BrowserDriver {
    driver: WebDriver,
}

impl BrowserDriver {
    /// Connect to the WebDriver server with a fixed number of fixed-delay attempts.
    pub async fn connect(config: &RunConfig) -> Result<Self, ExtractError> {
        debug!(headless = config.headless, "Creating Chrome capabilities");

        let mut caps = DesiredCapabilities::chrome();

        let (width, height) = config.window_size;
        let mut chrome_args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--disable-features=VizDisplayCompositor".to_string(),
            format!("--window-size={},{}", width, height),
        ];

        if config.headless {
            chrome_args.push("--headless".to_string());
        }

        for arg in &chrome_args {
            caps.add_arg(arg)
                .map_err(|e| ExtractError::SessionStart(format!("Invalid Chrome argument {}: {}", arg, e)))?;
        }

        let url = config.webdriver_url();
        let mut last_error = String::new();
        for attempt in 1..=3 {
            debug!("Connecting to WebDriver at {} [{}/3]", url, attempt);
            match WebDriver::new(&url, caps.clone()).await {
                Ok(driver) => {
                    debug!("Connected to WebDriver");
                    return Ok(Self { driver });
                }
                Err(e) => {
                    warn!("WebDriver connection attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                    if attempt < 3 {
                        sleep(Duration::from_millis(1000)).await;
                    }
                }
            }
        }

        Err(ExtractError::SessionStart(format!(
            "Failed to connect to WebDriver at {} after 3 attempts: {}",
            url, last_error
        )))
    }
}

#[async_trait]
impl ElementHandle for WebElement {
    async fn click(&self) -> Result<(), SessionError> {
        WebElement::click(self).await.map_err(session_err)
    }

    async fn type_text(&self, text: &str) -> Result<(), SessionError> {
        self.clear().await.map_err(session_err)?;
        self.send_keys(text).await.map_err(session_err)
    }

    async fn press_enter(&self) -> Result<(), SessionError> {
        self.send_keys(Key::Return).await.map_err(session_err)
    }

    async fn text(&self) -> Result<String, SessionError> {
        WebElement::text(self).await.map_err(session_err)
    }

    async fn attr(&self, name: &str) -> Result<Option<String>, SessionError> {
        WebElement::attr(self, name).await.map_err(session_err)
    }

    async fn outer_html(&self) -> Result<String, SessionError> {
        WebElement::outer_html(self).await.map_err(session_err)
    }

    async fn is_displayed(&self) -> Result<bool, SessionError> {
        WebElement::is_displayed(self).await.map_err(session_err)
    }

    async fn is_enabled(&self) -> Result<bool, SessionError> {
        WebElement::is_enabled(self).await.map_err(session_err)
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<Self>, SessionError> {
        WebElement::find_all(self, locator.to_by())
            .await
            .map_err(session_err)
    }
}

#[async_trait]
impl BrowserSession for BrowserDriver {
    type Element = WebElement;

    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.driver.goto(url).await.map_err(session_err)
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        Ok(self.driver.current_url().await.map_err(session_err)?.to_string())
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<WebElement>, SessionError> {
        self.driver.find_all(locator.to_by()).await.map_err(session_err)
    }

    async fn page_source(&self) -> Result<String, SessionError> {
        self.driver.source().await.map_err(session_err)
    }

    async fn execute(
        &self,
        script: &str,
        target: Option<&WebElement>,
    ) -> Result<serde_json::Value, SessionError> {
        let args: Vec<serde_json::Value> = target
            .into_iter()
            .map(|el| serde_json::json!(el))
            .collect();

        let ret = self.driver.execute(script, args).await.map_err(session_err)?;
        Ok(ret.json().clone())
    }

    async fn quit(&self) -> Result<(), SessionError> {
        // quit() consumes the handle; the clone shares the same session.
        let driver = self.driver.clone();
        driver.quit().await.map_err(session_err)
    }
}
