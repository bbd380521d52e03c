//! Cloud adapter speaking the v2 REST shape.
//!
//! Endpoints live under `api/v2` and address spaces by opaque id. Symbolic
//! keys from documents are translated through a bidirectional cache so the
//! lookup endpoint is hit at most once per space. Collections paginate with
//! an opaque cursor carried in the `_links.next` URL of each response.
//!
//! Label and attachment mutation have no v2 endpoints; those calls route
//! through the shared v1 operations in [`super::server`].

use crate::config::ConnectionConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::http::HttpClient;
use crate::remote::server::{
    add_labels_v1, remove_label_v1, upload_attachment_v1,
};
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

const API_ROOT: &str = "api/v2";
const PAGE_LIMIT: usize = 200;

pub struct CloudRemote {
    client: HttpClient,
    key_to_id: Mutex<HashMap<String, String>>,
    id_to_key: Mutex<HashMap<String, String>>,
}

impl CloudRemote {
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

    fn cache(&self, key: &str, id: &str) {
        self.key_to_id
            .lock()
            .unwrap()
            .insert(key.to_string(), id.to_string());
        self.id_to_key
            .lock()
            .unwrap()
            .insert(id.to_string(), key.to_string());
    }
}

impl WikiRemote for CloudRemote {
    fn flavor(&self) -> ApiFlavor {
        ApiFlavor::Cloud
    }

    fn space_id(&self, key: &str) -> RemoteResult<String> {
        if let Some(id) = self.key_to_id.lock().unwrap().get(key) {
            return Ok(id.clone());
        }
        let url = self.url("/spaces");
        let payload = self.client.get_json(&url, &[("keys", key), ("limit", "1")])?;
        let results = field(&payload, &url, &["results"])?;
        let entry = results
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| RemoteError::SpaceNotFound(key.to_string()))?;
        let id = str_field(entry, &url, &["id"])?;
        self.cache(key, &id);
        Ok(id)
    }

    fn space_key(&self, id: &str) -> RemoteResult<String> {
        if let Some(key) = self.id_to_key.lock().unwrap().get(id) {
            return Ok(key.clone());
        }
        let url = self.url(&format!("/spaces/{id}"));
        let payload = match self.client.get_json(&url, &[]) {
            Err(RemoteError::Http { status: 404, .. }) => {
                return Err(RemoteError::SpaceNotFound(id.to_string()))
            }
            other => other?,
        };
        let key = str_field(&payload, &url, &["key"])?;
        self.cache(&key, id);
        Ok(key)
    }

    fn get_page(&self, page_id: &str) -> RemoteResult<Page> {
        let url = self.url(&format!("/pages/{page_id}"));
        let payload = match self.client.get_json(&url, &[("body-format", "storage")]) {
            Err(RemoteError::Http { status: 404, .. }) => {
                return Err(RemoteError::PageNotFound(page_id.to_string()))
            }
            other => other?,
        };
        let space_id = str_field(&payload, &url, &["spaceId"])?;
        let space = self.space_key(&space_id)?;
        Ok(Page {
            id: str_field(&payload, &url, &["id"])?,
            title: str_field(&payload, &url, &["title"])?,
            space,
            parent_id: opt_str_field(&payload, &["parentId"]),
            version: i64_field(&payload, &url, &["version", "number"])?,
            body: str_field(&payload, &url, &["body", "storage", "value"])?,
        })
    }

    fn find_page(&self, space_key: &str, title: &str) -> RemoteResult<Option<PageSummary>> {
        let space_id = self.space_id(space_key)?;
        let url = self.url("/pages");
        let results = fetch_v2(&self.client, &url, &[
            ("title", title),
            ("space-id", &space_id),
        ])?;
        match results.first() {
            None => Ok(None),
            Some(value) => Ok(Some(PageSummary {
                id: str_field(value, &url, &["id"])?,
                title: str_field(value, &url, &["title"])?,
                space: space_key.to_string(),
                parent_id: opt_str_field(value, &["parentId"]),
                version: i64_field(value, &url, &["version", "number"])?,
            })),
        }
    }

    fn create_page(&self, request: &CreatePage) -> RemoteResult<Page> {
        let space_id = self.space_id(&request.space)?;
        let url = self.url("/pages");
        let mut body = json!({
            "spaceId": space_id,
            "status": "current",
            "title": request.title,
            "body": {"representation": "storage", "value": request.body},
        });
        if let Some(parent) = &request.parent_id {
            body["parentId"] = json!(parent);
        }
        let payload = self.client.post_json(&url, &body)?;
        debug!(title = %request.title, "created page (v2)");
        Ok(Page {
            id: str_field(&payload, &url, &["id"])?,
            title: str_field(&payload, &url, &["title"])?,
            space: request.space.clone(),
            parent_id: opt_str_field(&payload, &["parentId"]),
            version: i64_field(&payload, &url, &["version", "number"])?,
            body: opt_str_field(&payload, &["body", "storage", "value"])
                .unwrap_or_else(|| request.body.clone()),
        })
    }

    fn update_page(&self, request: &UpdatePage) -> RemoteResult<()> {
        let url = self.url(&format!("/pages/{}", request.page_id));
        let body = json!({
            "id": request.page_id,
            "status": "current",
            "title": request.title,
            "body": {"representation": "storage", "value": request.body},
            "version": {"number": request.version},
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
        self.client.delete(&self.url(&format!("/pages/{page_id}")), &[])
    }

    fn labels(&self, page_id: &str) -> RemoteResult<Vec<IdentifiedLabel>> {
        let url = self.url(&format!("/pages/{page_id}/labels"));
        let results = fetch_v2(&self.client, &url, &[])?;
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

    fn add_labels(&self, page_id: &str, labels: &[Label]) -> RemoteResult<()> {
        add_labels_v1(&self.client, page_id, labels)
    }

    fn remove_label(&self, page_id: &str, name: &str) -> RemoteResult<()> {
        remove_label_v1(&self.client, page_id, name)
    }

    fn properties(&self, page_id: &str) -> RemoteResult<Vec<IdentifiedProperty>> {
        let url = self.url(&format!("/pages/{page_id}/properties"));
        let results = fetch_v2(&self.client, &url, &[])?;
        results
            .iter()
            .map(|value| property_from_v2(value, &url))
            .collect()
    }

    fn add_property(
        &self,
        page_id: &str,
        property: &ContentProperty,
    ) -> RemoteResult<IdentifiedProperty> {
        let url = self.url(&format!("/pages/{page_id}/properties"));
        let body = json!({"key": property.key, "value": property.value});
        let payload = self.client.post_json(&url, &body)?;
        property_from_v2(&payload, &url)
    }

    fn update_property(
        &self,
        page_id: &str,
        property_id: &str,
        version: i64,
        property: &ContentProperty,
    ) -> RemoteResult<IdentifiedProperty> {
        let url = self.url(&format!("/pages/{page_id}/properties/{property_id}"));
        let body = json!({
            "key": property.key,
            "value": property.value,
            "version": {"number": version},
        });
        let payload = self.client.put_json(&url, &body)?;
        property_from_v2(&payload, &url)
    }

    fn remove_property(&self, page_id: &str, property_id: &str, _key: &str) -> RemoteResult<()> {
        self.client
            .delete(&self.url(&format!("/pages/{page_id}/properties/{property_id}")), &[])
    }

    fn attachments(&self, page_id: &str) -> RemoteResult<Vec<Attachment>> {
        let url = self.url(&format!("/pages/{page_id}/attachments"));
        let results = fetch_v2(&self.client, &url, &[])?;
        results
            .iter()
            .map(|value| attachment_from_v2(value, &url))
            .collect()
    }

    fn upload_attachment(
        &self,
        page_id: &str,
        name: &str,
        path: &Path,
        comment: &str,
    ) -> RemoteResult<()> {
        // Attachment upload has no v2 endpoint.
        upload_attachment_v1(&self.client, page_id, name, path, comment)
    }
}

/// Drains a cursor-paginated v2 collection. The next cursor is carried in
/// the `_links.next` URL; its absence terminates the walk.
fn fetch_v2(client: &HttpClient, url: &str, query: &[(&str, &str)]) -> RemoteResult<Vec<Value>> {
    let mut results = Vec::new();
    let mut cursor: Option<String> = None;
    let limit_s = PAGE_LIMIT.to_string();
    loop {
        let mut page_query: Vec<(&str, &str)> = query.to_vec();
        page_query.push(("limit", limit_s.as_str()));
        if let Some(c) = &cursor {
            page_query.push(("cursor", c.as_str()));
        }
        let payload = client.get_json(url, &page_query)?;
        let batch = field(&payload, url, &["results"])?
            .as_array()
            .cloned()
            .ok_or_else(|| RemoteError::Payload {
                url: url.to_string(),
                message: "field 'results' is not an array".to_string(),
            })?;
        results.extend(batch);
        cursor = opt_str_field(&payload, &["_links", "next"])
            .as_deref()
            .and_then(extract_cursor);
        if cursor.is_none() {
            return Ok(results);
        }
    }
}

/// Pulls the `cursor` query value out of a `_links.next` URL. The value is
/// percent-encoded in the link and must be decoded before resubmission.
fn extract_cursor(next: &str) -> Option<String> {
    let query = next.split('?').nth(1)?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("cursor=") {
            return Some(percent_decode(value));
        }
    }
    None
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn property_from_v2(value: &Value, url: &str) -> RemoteResult<IdentifiedProperty> {
    Ok(IdentifiedProperty {
        id: str_field(value, url, &["id"])?,
        key: str_field(value, url, &["key"])?,
        value: field(value, url, &["value"])?.clone(),
        version: i64_field(value, url, &["version", "number"])?,
    })
}

fn attachment_from_v2(value: &Value, url: &str) -> RemoteResult<Attachment> {
    // A missing or negative size on the wire reads as zero.
    let file_size = i64_field(value, url, &["fileSize"])
        .ok()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0);
    Ok(Attachment {
        id: str_field(value, url, &["id"])?,
        title: str_field(value, url, &["title"])?,
        file_size,
        comment: opt_str_field(value, &["comment"]),
        version: i64_field(value, url, &["version", "number"])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_extracted_and_decoded_from_next_link() {
        let next = "/wiki/api/v2/pages?limit=200&cursor=eyJpZCI6MTIzfQ%3D%3D";
        assert_eq!(extract_cursor(next).as_deref(), Some("eyJpZCI6MTIzfQ=="));
        assert_eq!(extract_cursor("/wiki/api/v2/pages?limit=200"), None);
    }

    #[test]
    fn percent_decode_passes_plain_text() {
        assert_eq!(percent_decode("abc-123"), "abc-123");
        assert_eq!(percent_decode("a%2Fb%3D"), "a/b=");
    }

    #[test]
    fn maps_v2_property_payload() {
        let payload = json!({
            "id": "p9", "key": "owner",
            "value": "docs-team",
            "version": {"number": 4},
        });
        let prop = property_from_v2(&payload, "u").unwrap();
        assert_eq!(prop.id, "p9");
        assert_eq!(prop.value, json!("docs-team"));
        assert_eq!(prop.version, 4);
    }

    #[test]
    fn maps_v2_attachment_payload() {
        let payload = json!({
            "id": "a1", "title": "diagram.png",
            "fileSize": 512,
            "comment": "sha256:abcd",
            "version": {"number": 2},
        });
        let att = attachment_from_v2(&payload, "u").unwrap();
        assert_eq!(att.file_size, 512);
        assert_eq!(att.comment.as_deref(), Some("sha256:abcd"));
    }

    #[test]
    fn negative_attachment_size_reads_as_zero() {
        let payload = json!({
            "id": "a1", "title": "diagram.png",
            "fileSize": -1,
            "version": {"number": 2},
        });
        let att = attachment_from_v2(&payload, "u").unwrap();
        assert_eq!(att.file_size, 0);
    }
}
