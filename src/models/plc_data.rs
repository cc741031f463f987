use serde::{Deserialize, Serialize};
use std::fmt;

/// Login identity and secret for one run.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Display name or number of the target project in the eVIEW project list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectHandle(String);

impl ProjectHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlcDataType {
    Input,
    Output,
    Unknown,
}

impl PlcDataType {
    pub fn from_address(address: &str) -> Self {
        if address.starts_with('I') {
            Self::Input
        } else if address.starts_with('Q') {
            Self::Output
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for PlcDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "Input"),
            Self::Output => write!(f, "Output"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One I/O address and the function label it was printed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub address: String,
    pub function: String,
}

impl ExtractedRecord {
    pub fn new(address: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            function: function.into(),
        }
    }

    pub fn kind(&self) -> PlcDataType {
        PlcDataType::from_address(&self.address)
    }

    /// Fields joined by a single space, as stored in the page list output.
    pub fn flatten(&self) -> String {
        format!("{} {}", self.address, self.function)
            .trim_end()
            .to_string()
    }
}
