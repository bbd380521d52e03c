//! Domain objects shared by both protocol adapters.
//!
//! Wire shapes differ between Cloud (v2) and Data Center/Server (v1); the
//! mapping functions in each adapter translate to and from these types.
//! Consumers never see partial objects: a mapper either produces a complete
//! value or fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which REST shape the remote speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    /// v2 endpoints under `api/v2`; spaces addressed by opaque id.
    Cloud,
    /// v1 endpoints under `rest/api`; spaces addressed by symbolic key.
    Server,
}

impl fmt::Display for ApiFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiFlavor::Cloud => f.write_str("cloud"),
            ApiFlavor::Server => f.write_str("server"),
        }
    }
}

impl std::str::FromStr for ApiFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloud" => Ok(ApiFlavor::Cloud),
            "server" | "datacenter" => Ok(ApiFlavor::Server),
            other => Err(format!("unknown API flavor '{other}' (expected cloud or server)")),
        }
    }
}

/// Resolved remote identity of a synchronized page. Mutated only after a
/// confirmed remote observation or write.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteIdentity {
    pub page_id: String,
    /// Space key. Cloud translates to its opaque space id internally.
    pub space: String,
    pub version: i64,
}

/// Full page including body content.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub id: String,
    pub title: String,
    /// Space key.
    pub space: String,
    pub parent_id: Option<String>,
    pub version: i64,
    /// CSF body in storage representation.
    pub body: String,
}

/// Page metadata without body, as returned by title search.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub space: String,
    pub parent_id: Option<String>,
    pub version: i64,
}

/// Request to create a page under a parent.
#[derive(Debug, Clone)]
pub struct CreatePage {
    /// Space key.
    pub space: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub body: String,
}

/// Request to update a page under optimistic locking. `version` is the new
/// version number to assign, one above the last observed.
#[derive(Debug, Clone)]
pub struct UpdatePage {
    pub page_id: String,
    pub title: String,
    pub body: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub prefix: String,
}

impl Label {
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: "global".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifiedLabel {
    pub id: String,
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentProperty {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifiedProperty {
    pub id: String,
    pub key: String,
    pub value: Value,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: String,
    pub title: String,
    pub file_size: u64,
    /// Description field; carries the uploader's content hash.
    pub comment: Option<String>,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavor_parses_aliases() {
        assert_eq!("cloud".parse::<ApiFlavor>().unwrap(), ApiFlavor::Cloud);
        assert_eq!("Server".parse::<ApiFlavor>().unwrap(), ApiFlavor::Server);
        assert_eq!("datacenter".parse::<ApiFlavor>().unwrap(), ApiFlavor::Server);
        assert!("v3".parse::<ApiFlavor>().is_err());
    }

    #[test]
    fn global_label_prefix() {
        let label = Label::global("docs");
        assert_eq!(label.prefix, "global");
    }
}
