//! Remote wiki access through two wire-incompatible REST shapes.
//!
//! The [`WikiRemote`] trait is the logical operation contract the sync
//! engine programs against. Two production backends implement it,
//! [`cloud::CloudRemote`] (v2) and [`server::ServerRemote`] (v1), plus an
//! in-memory fake used by tests. Trait-level page and space references are
//! symbolic space keys; each adapter translates to its native addressing.

pub mod cloud;
pub mod http;
pub mod memory;
pub mod server;
pub mod types;

use crate::error::{RemoteError, RemoteResult};
use serde_json::Value;
use std::path::Path;
use types::{
    ApiFlavor, Attachment, ContentProperty, CreatePage, IdentifiedLabel, IdentifiedProperty,
    Label, Page, PageSummary, UpdatePage,
};

/// One method per logical operation. Object-safe; the sync engine holds a
/// `&dyn WikiRemote`.
pub trait WikiRemote {
    fn flavor(&self) -> ApiFlavor;

    /// Resolves a space key to the remote's opaque space id.
    fn space_id(&self, key: &str) -> RemoteResult<String>;

    /// Resolves an opaque space id back to its key. Under the v1 shape
    /// there is no lookup endpoint; without a cache hit this fails with
    /// [`RemoteError::Limitation`].
    fn space_key(&self, id: &str) -> RemoteResult<String>;

    fn get_page(&self, page_id: &str) -> RemoteResult<Page>;

    /// Searches a space for a page by exact title.
    fn find_page(&self, space_key: &str, title: &str) -> RemoteResult<Option<PageSummary>>;

    fn create_page(&self, request: &CreatePage) -> RemoteResult<Page>;

    /// Fails with [`RemoteError::Conflict`] when the submitted version is
    /// stale.
    fn update_page(&self, request: &UpdatePage) -> RemoteResult<()>;

    fn delete_page(&self, page_id: &str) -> RemoteResult<()>;

    fn labels(&self, page_id: &str) -> RemoteResult<Vec<IdentifiedLabel>>;
    fn add_labels(&self, page_id: &str, labels: &[Label]) -> RemoteResult<()>;
    fn remove_label(&self, page_id: &str, name: &str) -> RemoteResult<()>;

    fn properties(&self, page_id: &str) -> RemoteResult<Vec<IdentifiedProperty>>;
    fn add_property(
        &self,
        page_id: &str,
        property: &ContentProperty,
    ) -> RemoteResult<IdentifiedProperty>;
    fn update_property(
        &self,
        page_id: &str,
        property_id: &str,
        version: i64,
        property: &ContentProperty,
    ) -> RemoteResult<IdentifiedProperty>;
    /// Removes one content property. The v2 shape addresses properties by
    /// id, the v1 shape by key; callers supply both.
    fn remove_property(&self, page_id: &str, property_id: &str, key: &str) -> RemoteResult<()>;

    fn attachments(&self, page_id: &str) -> RemoteResult<Vec<Attachment>>;
    fn upload_attachment(
        &self,
        page_id: &str,
        name: &str,
        path: &Path,
        comment: &str,
    ) -> RemoteResult<()>;
}

// JSON field accessors shared by the wire mappers. A missing or mistyped
// field is a payload error carrying the offending path.

pub(crate) fn field<'a>(value: &'a Value, url: &str, path: &[&str]) -> RemoteResult<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.get(key).ok_or_else(|| RemoteError::Payload {
            url: url.to_string(),
            message: format!("missing field '{}'", path.join(".")),
        })?;
    }
    Ok(current)
}

pub(crate) fn str_field(value: &Value, url: &str, path: &[&str]) -> RemoteResult<String> {
    let v = field(value, url, path)?;
    match v {
        Value::String(s) => Ok(s.clone()),
        // Some deployments serialize ids as numbers.
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(RemoteError::Payload {
            url: url.to_string(),
            message: format!("field '{}' is not a string", path.join(".")),
        }),
    }
}

pub(crate) fn i64_field(value: &Value, url: &str, path: &[&str]) -> RemoteResult<i64> {
    field(value, url, path)?
        .as_i64()
        .ok_or_else(|| RemoteError::Payload {
            url: url.to_string(),
            message: format!("field '{}' is not an integer", path.join(".")),
        })
}

pub(crate) fn opt_str_field(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_accessors_walk_nested_paths() {
        let v = json!({"version": {"number": 7}, "id": 42, "title": "T"});
        assert_eq!(i64_field(&v, "u", &["version", "number"]).unwrap(), 7);
        assert_eq!(str_field(&v, "u", &["id"]).unwrap(), "42");
        assert_eq!(str_field(&v, "u", &["title"]).unwrap(), "T");
        assert!(str_field(&v, "u", &["missing"]).is_err());
        assert_eq!(opt_str_field(&v, &["absent", "x"]), None);
    }
}
