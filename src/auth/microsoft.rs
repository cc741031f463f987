use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::scraper::browser::{BrowserSession, ElementHandle, Locator};
use crate::scraper::lookup::{Strategy, StrategyList, TextMatch, TextSource};

/// Part of the identity provider's address.
pub const IDP_MARKER: &str = "login.microsoft";
/// Part of any address that is still a login page.
pub const LOGIN_MARKER: &str = "login";
/// Route marker of the eVIEW application.
pub const ROUTE_MARKER: &str = "eview";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginVerdict {
    SignedIn,
    /// Neither clearly on the application nor clearly on a login page.
    Unclear,
}

/// Decide from the address alone whether the SSO round trip came back.
pub fn check_login(current_url: &str, base_url: &str) -> LoginVerdict {
    let lower = current_url.to_lowercase();
    if lower.contains(LOGIN_MARKER) {
        return LoginVerdict::Unclear;
    }

    let on_origin = match reqwest::Url::parse(base_url) {
        Ok(base) => reqwest::Url::parse(current_url)
            .map(|current| current.origin() == base.origin())
            .unwrap_or(false),
        Err(_) => current_url.starts_with(base_url),
    };

    if on_origin || lower.contains(ROUTE_MARKER) {
        LoginVerdict::SignedIn
    } else {
        LoginVerdict::Unclear
    }
}

pub fn idp_button() -> StrategyList {
    StrategyList::new(
        "Microsoft login button",
        vec![
            Strategy::interactive(Locator::xpath(
                "//*[contains(text(), 'Microsoft') or contains(text(), 'microsoft') or contains(@title, 'Microsoft')]",
            )),
            Strategy::interactive(Locator::tag("button"))
                .with_text(TextMatch::any_of(TextSource::Text, ["microsoft"])),
            Strategy::interactive(Locator::tag("a"))
                .with_text(TextMatch::any_of(TextSource::Attr("title".to_string()), ["microsoft"])),
        ],
    )
}

pub fn identity_field() -> StrategyList {
    visible_css(
        "email field",
        &[
            "input[type='email']",
            "input[name='loginfmt']",
            "input[id='i0116']",
            "input[id='email']",
            "input[placeholder*='Email']",
            "input[placeholder*='E-Mail']",
            "input[name='username']",
        ],
    )
}

pub fn identity_submit() -> StrategyList {
    interactive_css(
        "'Next' button",
        &[
            "input[type='submit']",
            "input[id='idSIButton9']",
            "button[type='submit']",
            "input[value='Next']",
            "input[value='Weiter']",
            "button[id='idSIButton9']",
        ],
    )
}

pub fn secret_field() -> StrategyList {
    visible_css(
        "password field",
        &[
            "input[type='password']",
            "input[name='passwd']",
            "input[id='i0118']",
            "input[id='passwordInput']",
            "input[placeholder*='Password']",
            "input[placeholder*='Passwort']",
        ],
    )
}

pub fn secret_submit() -> StrategyList {
    interactive_css(
        "'Sign in' button",
        &[
            "input[type='submit']",
            "input[id='idSIButton9']",
            "button[type='submit']",
            "input[value='Sign in']",
            "input[value='Anmelden']",
            "button[id='idSIButton9']",
        ],
    )
}

pub fn stay_signed_in() -> StrategyList {
    interactive_css(
        "'Stay signed in' button",
        &[
            "input[id='idSIButton9']",
            "input[value='Yes']",
            "input[value='Ja']",
            "button[id='idSIButton9']",
        ],
    )
}

pub fn organization_option(name: &str) -> StrategyList {
    let literal = xpath_literal(name);
    let mut strategies: Vec<Strategy> = ["div", "span", "a", "button", "td"]
        .iter()
        .map(|tag| {
            Strategy::visible(Locator::xpath(format!(
                "//{}[contains(text(), {})]",
                tag, literal
            )))
        })
        .collect();
    strategies.push(
        Strategy::interactive(Locator::xpath(format!(
            "//*[contains(translate(text(), 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), {})]",
            xpath_literal(&name.to_lowercase())
        ))),
    );
    StrategyList::new("organization option", strategies)
}

fn visible_css(name: &str, selectors: &[&str]) -> StrategyList {
    StrategyList::new(
        name,
        selectors
            .iter()
            .map(|s| Strategy::visible(Locator::css(*s)))
            .collect(),
    )
}

fn interactive_css(name: &str, selectors: &[&str]) -> StrategyList {
    StrategyList::new(
        name,
        selectors
            .iter()
            .map(|s| Strategy::interactive(Locator::css(*s)))
            .collect(),
    )
}

/// Quote `value` as an XPath string literal, including values with both quote kinds.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Single steps of the Microsoft SSO dialog. Each step is one attempt;
/// the navigator owns the retry budgets and the state transitions.
pub struct MicrosoftAuth {
    settle: Duration,
}

impl MicrosoftAuth {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    /// Click each identity provider button candidate in turn and report
    /// whether one of them took the browser to the provider's domain.
    pub async fn try_idp_click<S: BrowserSession>(&self, session: &S) -> Result<Option<()>, SessionError> {
        let candidates = idp_button().matches(session).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        for (i, found) in candidates.iter().enumerate() {
            match found.element.click().await {
                Ok(()) => {}
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!("Login button candidate {} not clickable: {}", i + 1, e);
                    continue;
                }
            }
            sleep(self.settle).await;

            let url = session.current_url().await?;
            if url.contains(IDP_MARKER) {
                info!("Successfully clicked Microsoft login button");
                return Ok(Some(()));
            }
            debug!("Still at {} after clicking login button candidate {}", url, i + 1);
        }
        Ok(None)
    }

    /// Type into `field`, then click the first submit control or press Enter.
    pub async fn fill_and_submit<S: BrowserSession>(
        &self,
        session: &S,
        field: &S::Element,
        value: &str,
        submit: &StrategyList,
    ) -> Result<(), SessionError> {
        field.type_text(value).await?;

        match submit.first_match(session).await? {
            Some(found) => {
                found.element.click().await?;
                debug!("{} clicked", submit.name());
            }
            None => {
                field.press_enter().await?;
                debug!("{} not found, pressed Enter instead", submit.name());
            }
        }
        Ok(())
    }

    /// Pick `organization` on a multi-tenant chooser, if one is showing.
    pub async fn select_organization<S: BrowserSession>(
        &self,
        session: &S,
        organization: Option<&str>,
    ) -> Result<bool, SessionError> {
        let url = session.current_url().await?.to_lowercase();
        if !url.contains("organization") && !url.contains("tenant") {
            debug!("No organization selection dialog detected");
            return Ok(false);
        }

        let Some(name) = organization else {
            warn!("Organization selection dialog shown but no organization configured");
            return Ok(false);
        };

        info!("Organization selection dialog detected, looking for '{}'", name);
        match organization_option(name).first_match(session).await? {
            Some(found) => {
                found.element.click().await?;
                sleep(self.settle).await;
                info!("Organization '{}' selected", name);
                Ok(true)
            }
            None => {
                warn!("No '{}' organization found, proceeding anyway...", name);
                Ok(false)
            }
        }
    }
}
