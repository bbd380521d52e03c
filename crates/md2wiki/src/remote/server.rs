//! Data Center / Server adapter speaking the v1 REST shape.
//!
//! All endpoints live under `rest/api`. Spaces are addressed by symbolic
//! key; ids appear only in responses, so key lookup from an id works solely
//! through the cache populated by earlier key-to-id resolutions. Collection
//! endpoints paginate with offset and limit, terminating when a response
//! carries fewer entries than requested.
//!
//! Label and attachment mutation helpers are shared with the Cloud adapter,
//! which routes those operations through the v1 paths as well.

use crate::config::ConnectionConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::http::HttpClient;
use crate::remote::types::{
    ApiFlavor, Attachment, ContentProperty, CreatePage, IdentifiedLabel, IdentifiedProperty,
    Label, Page, PageSummary, UpdatePage,
};
use crate::remote::{field, i64_field, opt_str_field, str_field, WikiRemote};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const API_ROOT: &str = "rest/api";
const PAGE_LIMIT: usize = 200;

pub struct ServerRemote {
    client: HttpClient,
    key_to_id: Mutex<HashMap<String, String>>,
    id_to_key: Mutex<HashMap<String, String>>,
}

impl ServerRemote {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            client: HttpClient::new(config),
            key_to_id: Mutex::new(HashMap::new()),
            id_to_key: Mutex::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        self.client.url(API_ROOT, path)
    }
}

impl WikiRemote for ServerRemote {
    fn flavor(&self) -> ApiFlavor {
        ApiFlavor::Server
    }

    fn space_id(&self, key: &str) -> RemoteResult<String> {
        if let Some(id) = self.key_to_id.lock().unwrap().get(key) {
            return Ok(id.clone());
        }
        let url = self.url(&format!("/space/{key}"));
        let payload = match self.client.get_json(&url, &[]) {
            Err(RemoteError::Http { status: 404, .. }) => {
                return Err(RemoteError::SpaceNotFound(key.to_string()))
            }
            other => other?,
        };
        let id = str_field(&payload, &url, &["id"])?;
        self.key_to_id
            .lock()
            .unwrap()
            .insert(key.to_string(), id.clone());
        self.id_to_key
            .lock()
            .unwrap()
            .insert(id.clone(), key.to_string());
        Ok(id)
    }

    fn space_key(&self, id: &str) -> RemoteResult<String> {
        // No v1 endpoint resolves an id to a key.
        self.id_to_key.lock().unwrap().get(id).cloned().ok_or_else(|| {
            RemoteError::Limitation(format!("space id {id} cannot be resolved to a key under v1"))
        })
    }

    fn get_page(&self, page_id: &str) -> RemoteResult<Page> {
        let url = self.url(&format!("/content/{page_id}"));
        let payload = match self
            .client
            .get_json(&url, &[("expand", "body.storage,version,space,ancestors")])
        {
            Err(RemoteError::Http { status: 404, .. }) => {
                return Err(RemoteError::PageNotFound(page_id.to_string()))
            }
            other => other?,
        };
        page_from_v1(&payload, &url)
    }

    fn find_page(&self, space_key: &str, title: &str) -> RemoteResult<Option<PageSummary>> {
        let url = self.url("/content");
        let results = fetch_v1(&self.client, &url, &[
            ("type", "page"),
            ("spaceKey", space_key),
            ("title", title),
            ("expand", "version,space,ancestors"),
        ])?;
        match results.first() {
            None => Ok(None),
            Some(value) => Ok(Some(summary_from_v1(value, &url)?)),
        }
    }

    fn create_page(&self, request: &CreatePage) -> RemoteResult<Page> {
        let url = self.url("/content");
        let mut body = json!({
            "type": "page",
            "status": "current",
            "title": request.title,
            "space": {"key": request.space},
            "body": {"storage": {"value": request.body, "representation": "storage"}},
        });
        if let Some(parent) = &request.parent_id {
            body["ancestors"] = json!([{"id": parent}]);
        }
        let payload = self.client.post_json(&url, &body)?;
        debug!(title = %request.title, "created page (v1)");
        page_from_v1(&payload, &url)
    }

    fn update_page(&self, request: &UpdatePage) -> RemoteResult<()> {
        let url = self.url(&format!("/content/{}", request.page_id));
        let body = json!({
            "id": request.page_id,
            "type": "page",
            "status": "current",
            "title": request.title,
            "body": {"storage": {"value": request.body, "representation": "storage"}},
            "version": {"number": request.version, "minorEdit": true},
        });
        match self.client.put_json(&url, &body) {
            Err(RemoteError::Http { status: 409, .. }) => Err(RemoteError::Conflict {
                page_id: request.page_id.clone(),
                submitted: request.version,
            }),
            Err(e) => Err(e),
            Ok(_) => Ok(()),
        }
    }

    fn delete_page(&self, page_id: &str) -> RemoteResult<()> {
        self.client.delete(&self.url(&format!("/content/{page_id}")), &[])
    }

    fn labels(&self, page_id: &str) -> RemoteResult<Vec<IdentifiedLabel>> {
        labels_v1(&self.client, page_id)
    }

    fn add_labels(&self, page_id: &str, labels: &[Label]) -> RemoteResult<()> {
        add_labels_v1(&self.client, page_id, labels)
    }

    fn remove_label(&self, page_id: &str, name: &str) -> RemoteResult<()> {
        remove_label_v1(&self.client, page_id, name)
    }

    fn properties(&self, page_id: &str) -> RemoteResult<Vec<IdentifiedProperty>> {
        let url = self.url(&format!("/content/{page_id}/property"));
        let results = fetch_v1(&self.client, &url, &[])?;
        results
            .iter()
            .map(|value| property_from_v1(value, &url))
            .collect()
    }

    fn add_property(
        &self,
        page_id: &str,
        property: &ContentProperty,
    ) -> RemoteResult<IdentifiedProperty> {
        let url = self.url(&format!("/content/{page_id}/property"));
        let body = json!({"key": property.key, "value": property.value});
        let payload = self.client.post_json(&url, &body)?;
        property_from_v1(&payload, &url)
    }

    fn update_property(
        &self,
        page_id: &str,
        _property_id: &str,
        version: i64,
        property: &ContentProperty,
    ) -> RemoteResult<IdentifiedProperty> {
        // v1 addresses properties by key, not id.
        let url = self.url(&format!("/content/{page_id}/property/{}", property.key));
        let body = json!({
            "key": property.key,
            "value": property.value,
            "version": {"number": version},
        });
        let payload = self.client.put_json(&url, &body)?;
        property_from_v1(&payload, &url)
    }

    fn remove_property(&self, page_id: &str, _property_id: &str, key: &str) -> RemoteResult<()> {
        self.client
            .delete(&self.url(&format!("/content/{page_id}/property/{key}")), &[])
    }

    fn attachments(&self, page_id: &str) -> RemoteResult<Vec<Attachment>> {
        attachments_v1(&self.client, page_id)
    }

    fn upload_attachment(
        &self,
        page_id: &str,
        name: &str,
        path: &Path,
        comment: &str,
    ) -> RemoteResult<()> {
        upload_attachment_v1(&self.client, page_id, name, path, comment)
    }
}

// v1 content operations shared with the Cloud adapter.

pub(crate) fn labels_v1(client: &HttpClient, page_id: &str) -> RemoteResult<Vec<IdentifiedLabel>> {
    let url = client.url(API_ROOT, &format!("/content/{page_id}/label"));
    let results = fetch_v1(client, &url, &[])?;
    results
        .iter()
        .map(|value| {
            Ok(IdentifiedLabel {
                id: str_field(value, &url, &["id"])?,
                name: str_field(value, &url, &["name"])?,
                prefix: str_field(value, &url, &["prefix"])?,
            })
        })
        .collect()
}

pub(crate) fn add_labels_v1(
    client: &HttpClient,
    page_id: &str,
    labels: &[Label],
) -> RemoteResult<()> {
    if labels.is_empty() {
        return Ok(());
    }
    let url = client.url(API_ROOT, &format!("/content/{page_id}/label"));
    let body = Value::Array(
        labels
            .iter()
            .map(|label| json!({"prefix": label.prefix, "name": label.name}))
            .collect(),
    );
    client.post_json(&url, &body)?;
    Ok(())
}

pub(crate) fn remove_label_v1(client: &HttpClient, page_id: &str, name: &str) -> RemoteResult<()> {
    let url = client.url(API_ROOT, &format!("/content/{page_id}/label"));
    client.delete(&url, &[("name", name)])
}

pub(crate) fn attachments_v1(client: &HttpClient, page_id: &str) -> RemoteResult<Vec<Attachment>> {
    let url = client.url(API_ROOT, &format!("/content/{page_id}/child/attachment"));
    let results = fetch_v1(client, &url, &[("expand", "version")])?;
    results
        .iter()
        .map(|value| attachment_from_v1(value, &url))
        .collect()
}

pub(crate) fn upload_attachment_v1(
    client: &HttpClient,
    page_id: &str,
    name: &str,
    path: &Path,
    comment: &str,
) -> RemoteResult<()> {
    let list_url = client.url(API_ROOT, &format!("/content/{page_id}/child/attachment"));
    let existing = fetch_v1(client, &list_url, &[("filename", name)])?;
    let upload_url = match existing.first() {
        // Re-upload becomes a new version of the existing attachment.
        Some(found) => {
            let id = str_field(found, &list_url, &["id"])?;
            client.url(API_ROOT, &format!("/content/{page_id}/child/attachment/{id}/data"))
        }
        None => list_url,
    };
    client.post_multipart_file(&upload_url, name, path, comment)?;
    debug!(page_id, name, "uploaded attachment");
    Ok(())
}

/// Drains an offset-paginated v1 collection. A page smaller than the
/// requested limit is the last one.
pub(crate) fn fetch_v1(
    client: &HttpClient,
    url: &str,
    query: &[(&str, &str)],
) -> RemoteResult<Vec<Value>> {
    let mut results = Vec::new();
    let mut start = 0usize;
    loop {
        let start_s = start.to_string();
        let limit_s = PAGE_LIMIT.to_string();
        let mut page_query: Vec<(&str, &str)> = query.to_vec();
        page_query.push(("start", start_s.as_str()));
        page_query.push(("limit", limit_s.as_str()));
        let payload = client.get_json(url, &page_query)?;
        let batch = field(&payload, url, &["results"])?
            .as_array()
            .cloned()
            .ok_or_else(|| RemoteError::Payload {
                url: url.to_string(),
                message: "field 'results' is not an array".to_string(),
            })?;
        let size = batch.len();
        results.extend(batch);
        if size < PAGE_LIMIT {
            return Ok(results);
        }
        start += PAGE_LIMIT;
    }
}

// Wire mappers. Each produces a complete domain value or a payload error.

fn page_from_v1(value: &Value, url: &str) -> RemoteResult<Page> {
    Ok(Page {
        id: str_field(value, url, &["id"])?,
        title: str_field(value, url, &["title"])?,
        space: str_field(value, url, &["space", "key"])?,
        parent_id: parent_from_ancestors(value),
        version: i64_field(value, url, &["version", "number"])?,
        body: str_field(value, url, &["body", "storage", "value"])?,
    })
}

fn summary_from_v1(value: &Value, url: &str) -> RemoteResult<PageSummary> {
    Ok(PageSummary {
        id: str_field(value, url, &["id"])?,
        title: str_field(value, url, &["title"])?,
        space: str_field(value, url, &["space", "key"])?,
        parent_id: parent_from_ancestors(value),
        version: i64_field(value, url, &["version", "number"])?,
    })
}

/// The direct parent is the last entry of the ancestor chain.
fn parent_from_ancestors(value: &Value) -> Option<String> {
    value
        .get("ancestors")
        .and_then(Value::as_array)
        .and_then(|a| a.last())
        .and_then(|last| last.get("id"))
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn property_from_v1(value: &Value, url: &str) -> RemoteResult<IdentifiedProperty> {
    Ok(IdentifiedProperty {
        id: str_field(value, url, &["id"])?,
        key: str_field(value, url, &["key"])?,
        value: field(value, url, &["value"])?.clone(),
        version: i64_field(value, url, &["version", "number"])?,
    })
}

fn attachment_from_v1(value: &Value, url: &str) -> RemoteResult<Attachment> {
    Ok(Attachment {
        id: str_field(value, url, &["id"])?,
        title: str_field(value, url, &["title"])?,
        // A missing or negative size on the wire reads as zero.
        file_size: i64_field(value, url, &["extensions", "fileSize"])
            .ok()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0),
        comment: opt_str_field(value, &["extensions", "comment"])
            .or_else(|| opt_str_field(value, &["metadata", "comment"])),
        version: i64_field(value, url, &["version", "number"])?,
    })
}
