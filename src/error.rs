use thiserror::Error;

use crate::scraper::navigator::NavState;

/// Failures reported by the browser capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The handle points at a node the viewer has already re-rendered.
    #[error("Stale element: {0}")]
    StaleElement(String),

    /// Another element (overlay, spinner) received the click.
    #[error("Click intercepted: {0}")]
    ClickIntercepted(String),

    #[error("No such element: {0}")]
    NoSuchElement(String),

    #[error("Script failed: {0}")]
    Script(String),

    /// Session was closed, either by cancellation or by the browser going away.
    #[error("Browser session closed: {0}")]
    Closed(String),

    #[error("WebDriver error: {0}")]
    Other(String),
}

impl SessionError {
    /// Errors that only invalidate the current unit of work.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::StaleElement(_) | SessionError::ClickIntercepted(_)
        )
    }

    /// Errors after which no further browser interaction can succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionError::Closed(_))
    }

    /// Classify a WebDriver failure by its W3C error code text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("stale element") || lower.contains("stale") {
            SessionError::StaleElement(message)
        } else if lower.contains("click intercepted") || lower.contains("intercept") {
            SessionError::ClickIntercepted(message)
        } else if lower.contains("invalid session")
            || lower.contains("no such window")
            || lower.contains("session deleted")
            || lower.contains("not reachable")
            || lower.contains("disconnected")
        {
            SessionError::Closed(message)
        } else if lower.contains("no such element") {
            SessionError::NoSuchElement(message)
        } else if lower.contains("javascript error") {
            SessionError::Script(message)
        } else {
            SessionError::Other(message)
        }
    }
}

/// A state transition of the navigator that could not be completed.
#[derive(Debug, Error, Clone)]
pub enum NavigationError {
    #[error("{state} failed: {cause}")]
    StateFailed { state: NavState, cause: String },

    #[error("{state} aborted: {source}")]
    Session {
        state: NavState,
        #[source]
        source: SessionError,
    },
}

impl NavigationError {
    pub fn failed(state: NavState, cause: impl Into<String>) -> Self {
        NavigationError::StateFailed {
            state,
            cause: cause.into(),
        }
    }

    pub fn state(&self) -> NavState {
        match self {
            NavigationError::StateFailed { state, .. } | NavigationError::Session { state, .. } => {
                *state
            }
        }
    }
}

/// Top-level failure of one extraction run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to start browser session: {0}")]
    SessionStart(String),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error("Page traversal aborted: {0}")]
    Session(#[from] SessionError),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Failed to write extraction output: {0}")]
    Output(#[from] std::io::Error),
}

impl ExtractError {
    /// Name of the pipeline phase the failure belongs to, for user-facing messages.
    pub fn phase(&self) -> String {
        match self {
            ExtractError::SessionStart(_) => "browser start".to_string(),
            ExtractError::Navigation(e) => e.state().to_string(),
            ExtractError::Session(_) => "page traversal".to_string(),
            ExtractError::Cancelled => "cancellation".to_string(),
            ExtractError::Output(_) => "output".to_string(),
        }
    }
}
