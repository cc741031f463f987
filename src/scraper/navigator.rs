use std::fmt;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::auth::microsoft::{self, LoginVerdict, MicrosoftAuth};
use crate::config::{RunConfig, TimingConfig};
use crate::error::{NavigationError, SessionError};
use crate::models::{Credentials, ProjectHandle};
use crate::scraper::browser::{BrowserSession, ElementHandle, Locator};
use crate::scraper::lookup::{Strategy, StrategyList, TextMatch, TextSource};
use crate::scraper::retry::RetryPolicy;

pub const SCROLL_INTO_VIEW: &str = "arguments[0].scrollIntoView(true);";
const POPUP_OPEN_CLASS: &str = "fl-pop-up-open";

/// Progress of the navigator from a fresh browser to the page list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavState {
    Start,
    AwaitingIdpButton,
    EnteringIdentity,
    EnteringSecret,
    ResolvingPersistentSessionPrompt,
    Authenticated,
    ProjectListVisible,
    ProjectOpened,
    ListModeActive,
}

impl fmt::Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Drives login, project selection and the switch to list view.
///
/// Retries happen only inside a state, for the element search of that
/// state. A state that cannot complete ends navigation with a
/// [`NavigationError`] naming it.
pub struct SessionNavigator {
    config: Arc<RunConfig>,
    state: NavState,
}

impl SessionNavigator {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Self {
            config,
            state: NavState::Start,
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    fn enter(&mut self, next: NavState) {
        debug!("Navigator: {} -> {}", self.state, next);
        self.state = next;
    }

    fn require_state(&self, required: NavState, attempted: NavState) -> Result<(), NavigationError> {
        if self.state == required {
            Ok(())
        } else {
            Err(NavigationError::failed(
                attempted,
                format!("navigator is in state {}, expected {}", self.state, required),
            ))
        }
    }

    fn policy(&self) -> RetryPolicy {
        let timing = &self.config.timing;
        RetryPolicy::new(timing.poll_attempts, TimingConfig::ms(timing.poll_interval_ms))
    }

    fn short_policy(&self) -> RetryPolicy {
        let timing = &self.config.timing;
        RetryPolicy::new(timing.short_poll_attempts, TimingConfig::ms(timing.short_poll_interval_ms))
    }

    /// Log into eVIEW through the Microsoft identity provider.
    pub async fn authenticate<S: BrowserSession>(
        &mut self,
        session: &S,
        credentials: &Credentials,
    ) -> Result<NavState, NavigationError> {
        let timing = self.config.timing.clone();
        let auth = MicrosoftAuth::new(TimingConfig::ms(timing.idp_click_settle_ms));

        self.enter(NavState::Start);
        info!("📍 Navigating to {}", self.config.base_url);
        session
            .navigate(&self.config.base_url)
            .await
            .map_err(at(NavState::Start))?;

        self.enter(NavState::AwaitingIdpButton);
        let policy = self.policy();
        let clicked = policy
            .poll("Microsoft login button", |_| auth.try_idp_click(session))
            .await
            .map_err(at(NavState::AwaitingIdpButton))?;
        if clicked.is_none() {
            return Err(NavigationError::failed(
                NavState::AwaitingIdpButton,
                format!(
                    "Could not find Microsoft login button after {} attempts",
                    policy.attempts
                ),
            ));
        }

        self.enter(NavState::EnteringIdentity);
        let field = microsoft::identity_field()
            .wait_for(session, self.policy())
            .await
            .map_err(at(NavState::EnteringIdentity))?
            .ok_or_else(|| NavigationError::failed(NavState::EnteringIdentity, "Email field not found"))?;
        info!("Typing in email...");
        auth.fill_and_submit(session, &field.element, &credentials.identity, &microsoft::identity_submit())
            .await
            .map_err(at(NavState::EnteringIdentity))?;

        sleep(TimingConfig::ms(timing.secret_page_settle_ms)).await;

        self.enter(NavState::EnteringSecret);
        let field = microsoft::secret_field()
            .wait_for(session, self.policy())
            .await
            .map_err(at(NavState::EnteringSecret))?;
        match field {
            Some(field) => {
                info!("Inserting password...");
                auth.fill_and_submit(session, &field.element, &credentials.secret, &microsoft::secret_submit())
                    .await
                    .map_err(at(NavState::EnteringSecret))?;
            }
            None => warn!("Password field not found - maybe 'Single Sign-On' active"),
        }

        self.enter(NavState::ResolvingPersistentSessionPrompt);
        let prompt = microsoft::stay_signed_in()
            .wait_for(session, self.policy())
            .await
            .map_err(at(NavState::ResolvingPersistentSessionPrompt))?;
        match prompt {
            Some(found) => match found.element.click().await {
                Ok(()) => debug!("'Stay signed in' dialogue answered with 'Yes'"),
                Err(e) if e.is_terminal() => {
                    return Err(at(NavState::ResolvingPersistentSessionPrompt)(e));
                }
                Err(e) => warn!("Could not answer 'Stay signed in' dialogue: {}", e),
            },
            None => debug!("No 'Stay signed in' dialogue shown"),
        }

        auth.select_organization(session, self.config.organization.as_deref())
            .await
            .map_err(at(NavState::ResolvingPersistentSessionPrompt))?;

        info!("Waiting for return to EPLAN eVIEW...");
        sleep(TimingConfig::ms(timing.post_login_settle_ms)).await;

        let current_url = session
            .current_url()
            .await
            .map_err(at(NavState::Authenticated))?;
        match microsoft::check_login(&current_url, &self.config.base_url) {
            LoginVerdict::SignedIn => info!("✅ Microsoft SSO login successful"),
            LoginVerdict::Unclear if self.config.strict_login => {
                return Err(NavigationError::failed(
                    NavState::Authenticated,
                    format!("Login verification failed, current URL: {}", current_url),
                ));
            }
            LoginVerdict::Unclear => {
                warn!("⚠️ Login status unclear, continuing. Current URL: {}", current_url);
            }
        }

        self.enter(NavState::Authenticated);
        Ok(self.state)
    }

    /// Select the project in the project list and open it.
    pub async fn open_project<S: BrowserSession>(
        &mut self,
        session: &S,
        project: &ProjectHandle,
    ) -> Result<NavState, NavigationError> {
        self.require_state(NavState::Authenticated, NavState::ProjectListVisible)?;
        let timing = self.config.timing.clone();

        info!("Waiting for project overview...");
        sleep(TimingConfig::ms(timing.project_list_settle_ms)).await;
        self.enter(NavState::ProjectListVisible);

        let listing_url = session
            .current_url()
            .await
            .map_err(at(NavState::ProjectListVisible))?;

        info!("Looking for project '{}' in the list...", project);
        let found = project_entry(project)
            .wait_for(session, self.short_policy())
            .await
            .map_err(at(NavState::ProjectListVisible))?;
        let Some(found) = found else {
            log_visible_rows(session).await;
            return Err(NavigationError::failed(
                NavState::ProjectListVisible,
                format!("Project '{}' not found in list", project),
            ));
        };
        debug!("Project found with strategy #{}", found.strategy + 1);
        let entry = found.element;

        if let Err(e) = session.execute(SCROLL_INTO_VIEW, Some(&entry)).await {
            if e.is_terminal() {
                return Err(at(NavState::ProjectListVisible)(e));
            }
            debug!("Couldn't scroll to project element, continuing: {}", e);
        }

        click_project_entry(&entry)
            .await
            .map_err(at(NavState::ProjectListVisible))?;

        info!("Looking for 'Open' button...");
        let open_button = open_button()
            .wait_for(session, self.short_policy())
            .await
            .map_err(at(NavState::ProjectOpened))?
            .ok_or_else(|| NavigationError::failed(NavState::ProjectOpened, "'Open' button not found"))?;
        open_button
            .element
            .click()
            .await
            .map_err(at(NavState::ProjectOpened))?;

        info!("Waiting for the project to load...");
        sleep(TimingConfig::ms(timing.project_open_settle_ms)).await;

        let sidebar = project_sidebar()
            .wait_for(session, self.short_policy())
            .await
            .map_err(at(NavState::ProjectOpened))?;
        if sidebar.is_some() {
            info!("✅ Project sidebar found");
        } else {
            let current_url = session
                .current_url()
                .await
                .map_err(at(NavState::ProjectOpened))?;
            if current_url == listing_url {
                return Err(NavigationError::failed(
                    NavState::ProjectOpened,
                    format!("Project '{}' did not open: no sidebar and still at {}", project, current_url),
                ));
            }
            warn!("⚠️ Project sidebar not found, but navigated to {}; continuing", current_url);
        }

        self.enter(NavState::ProjectOpened);
        Ok(self.state)
    }

    /// Switch the page viewer from thumbnails to the page list.
    pub async fn switch_to_list_view<S: BrowserSession>(&mut self, session: &S) -> Result<NavState, NavigationError> {
        self.require_state(NavState::ProjectOpened, NavState::ListModeActive)?;
        let fail = |cause: &str| NavigationError::failed(NavState::ListModeActive, cause);

        info!("Looking for the three dots button");
        let more = more_button()
            .wait_for(session, self.short_policy())
            .await
            .map_err(at(NavState::ListModeActive))?
            .ok_or_else(|| fail("Can't find button with three dots"))?;

        let class = more
            .element
            .attr("class")
            .await
            .map_err(at(NavState::ListModeActive))?
            .unwrap_or_default();
        if class.contains(POPUP_OPEN_CLASS) {
            info!("Three dots pop-up is already open");
        } else {
            more.element
                .click()
                .await
                .map_err(|e| fail(&format!("Can't click on button with three dots: {}", e)))?;
            debug!("Clicked button with three dots");
        }

        let entry = list_view_entry()
            .wait_for(session, self.short_policy())
            .await
            .map_err(at(NavState::ListModeActive))?
            .ok_or_else(|| fail("Can't find 'List' entry in the page menu"))?;
        entry
            .element
            .click()
            .await
            .map_err(|e| fail(&format!("Can't click on 'List' entry: {}", e)))?;
        info!("✅ Switched to list view");

        self.enter(NavState::ListModeActive);
        Ok(self.state)
    }
}

/// Map a session error raised while working on `state`.
fn at(state: NavState) -> impl Fn(SessionError) -> NavigationError {
    move |e| {
        if e.is_terminal() {
            NavigationError::Session { state, source: e }
        } else {
            NavigationError::failed(state, e.to_string())
        }
    }
}

pub fn project_entry(project: &ProjectHandle) -> StrategyList {
    let name = microsoft::xpath_literal(project.as_str());
    StrategyList::new(
        "project entry",
        vec![
            Strategy::any(Locator::xpath(format!("//td[contains(text(), {})]", name))),
            Strategy::any(Locator::xpath(format!("//span[contains(text(), {})]", name))),
            Strategy::any(Locator::xpath(format!("//div[contains(text(), {})]", name))),
            Strategy::any(Locator::xpath(format!("//a[contains(text(), {})]", name))),
            Strategy::any(Locator::xpath(format!("//tr[contains(., {})]", name))),
            Strategy::any(Locator::xpath(format!("//*[text()={}]", name))),
        ],
    )
}

pub fn open_button() -> StrategyList {
    StrategyList::new(
        "'Open' button",
        vec![Strategy::interactive(Locator::tag("button"))
            .with_text(TextMatch::any_of(TextSource::TextOrValue, ["öffnen", "open"]))],
    )
}

pub fn project_sidebar() -> StrategyList {
    StrategyList::new(
        "project sidebar",
        vec![Strategy::any(Locator::xpath(
            "//div[contains(@class, 'tree') or contains(@class, 'sidebar')]",
        ))],
    )
}

pub fn more_button() -> StrategyList {
    StrategyList::new(
        "three dots button",
        vec![Strategy::visible(Locator::tag("eplan-icon-button")).with_attr("data-t", "ev-btn-page-more")],
    )
}

pub fn list_view_entry() -> StrategyList {
    StrategyList::new(
        "list view entry",
        vec![Strategy::visible(Locator::tag("eplan-dropdown-item"))
            .with_attr("data-name", "ev-page-list-view-btn")],
    )
}

async fn click_project_entry<E: ElementHandle>(entry: &E) -> Result<(), SessionError> {
    match entry.click().await {
        Ok(()) => {
            debug!("Project clicked");
            Ok(())
        }
        Err(e) if e.is_terminal() => Err(e),
        Err(e) => {
            debug!("Direct click failed ({}), trying the parent row", e);
            let row = entry
                .find_all(&Locator::xpath("./ancestor-or-self::tr"))
                .await?
                .into_iter()
                .next()
                .ok_or(e)?;
            row.click().await?;
            debug!("Clicked on parent row instead");
            Ok(())
        }
    }
}

async fn log_visible_rows<S: BrowserSession>(session: &S) {
    let Ok(rows) = session.find_all(&Locator::tag("tr")).await else {
        return;
    };
    error!("Project not found; {} table rows visible", rows.len());
    for (i, row) in rows.iter().take(10).enumerate() {
        if let Ok(text) = row.text().await {
            let text: String = text.chars().take(100).collect();
            debug!("Row {}: {}", i, text);
        }
    }
}
