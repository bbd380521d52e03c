//! In-memory remote used by the sync engine tests.
//!
//! Behaves like a small wiki: pages live in a map keyed by id, title search
//! walks that map, and updates enforce optimistic locking. Tests can inject
//! version conflicts to exercise the retry path and inspect the recorded
//! operation log to assert ordering and idempotence.

use crate::error::{RemoteError, RemoteResult};
use crate::remote::types::{
    ApiFlavor, Attachment, ContentProperty, CreatePage, IdentifiedLabel, IdentifiedProperty,
    Label, Page, PageSummary, UpdatePage,
};
use crate::remote::WikiRemote;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    spaces: HashMap<String, String>,
    pages: HashMap<String, Page>,
    labels: HashMap<String, Vec<IdentifiedLabel>>,
    properties: HashMap<String, Vec<IdentifiedProperty>>,
    attachments: HashMap<String, Vec<Attachment>>,
    next_id: u64,
    /// Remaining updates to reject with a simulated concurrent edit.
    inject_conflicts: u32,
    operations: Vec<String>,
}

impl State {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

pub struct InMemoryRemote {
    flavor: ApiFlavor,
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new(space_key: &str) -> Self {
        let mut state = State::default();
        let id = format!("space-{space_key}");
        state.spaces.insert(space_key.to_string(), id);
        Self {
            flavor: ApiFlavor::Cloud,
            state: Mutex::new(state),
        }
    }

    pub fn add_space(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        let id = format!("space-{key}");
        state.spaces.insert(key.to_string(), id);
    }

    /// Seeds an existing page and returns its id.
    pub fn seed_page(
        &self,
        space: &str,
        parent_id: Option<&str>,
        title: &str,
        body: &str,
        version: i64,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.fresh_id("page-");
        state.pages.insert(
            id.clone(),
            Page {
                id: id.clone(),
                title: title.to_string(),
                space: space.to_string(),
                parent_id: parent_id.map(str::to_string),
                version,
                body: body.to_string(),
            },
        );
        id
    }

    /// The next `count` updates fail with a version conflict while the
    /// stored page advances one version, as if another client had written.
    pub fn inject_conflicts(&self, count: u32) {
        self.state.lock().unwrap().inject_conflicts = count;
    }

    /// Mutating operations in invocation order, e.g. `update_page:page-1`.
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn page(&self, page_id: &str) -> Option<Page> {
        self.state.lock().unwrap().pages.get(page_id).cloned()
    }

    pub fn page_by_title(&self, title: &str) -> Option<Page> {
        self.state
            .lock()
            .unwrap()
            .pages
            .values()
            .find(|p| p.title == title)
            .cloned()
    }

    pub fn page_labels(&self, page_id: &str) -> Vec<IdentifiedLabel> {
        self.state
            .lock()
            .unwrap()
            .labels
            .get(page_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn page_properties(&self, page_id: &str) -> Vec<IdentifiedProperty> {
        self.state
            .lock()
            .unwrap()
            .properties
            .get(page_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn page_attachments(&self, page_id: &str) -> Vec<Attachment> {
        self.state
            .lock()
            .unwrap()
            .attachments
            .get(page_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl WikiRemote for InMemoryRemote {
    fn flavor(&self) -> ApiFlavor {
        self.flavor
    }

    fn space_id(&self, key: &str) -> RemoteResult<String> {
        self.state
            .lock()
            .unwrap()
            .spaces
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteError::SpaceNotFound(key.to_string()))
    }

    fn space_key(&self, id: &str) -> RemoteResult<String> {
        let state = self.state.lock().unwrap();
        state
            .spaces
            .iter()
            .find(|(_, v)| v.as_str() == id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| RemoteError::SpaceNotFound(id.to_string()))
    }

    fn get_page(&self, page_id: &str) -> RemoteResult<Page> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("get_page:{page_id}"));
        state
            .pages
            .get(page_id)
            .cloned()
            .ok_or_else(|| RemoteError::PageNotFound(page_id.to_string()))
    }

    fn find_page(&self, space_key: &str, title: &str) -> RemoteResult<Option<PageSummary>> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("find_page:{space_key}:{title}"));
        if !state.spaces.contains_key(space_key) {
            return Err(RemoteError::SpaceNotFound(space_key.to_string()));
        }
        Ok(state
            .pages
            .values()
            .find(|p| p.space == space_key && p.title == title)
            .map(|p| PageSummary {
                id: p.id.clone(),
                title: p.title.clone(),
                space: p.space.clone(),
                parent_id: p.parent_id.clone(),
                version: p.version,
            }))
    }

    fn create_page(&self, request: &CreatePage) -> RemoteResult<Page> {
        let mut state = self.state.lock().unwrap();
        if !state.spaces.contains_key(&request.space) {
            return Err(RemoteError::SpaceNotFound(request.space.clone()));
        }
        let id = state.fresh_id("page-");
        state.operations.push(format!("create_page:{id}"));
        let page = Page {
            id: id.clone(),
            title: request.title.clone(),
            space: request.space.clone(),
            parent_id: request.parent_id.clone(),
            version: 1,
            body: request.body.clone(),
        };
        state.pages.insert(id, page.clone());
        Ok(page)
    }

    fn update_page(&self, request: &UpdatePage) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(format!("update_page:{}", request.page_id));
        if state.inject_conflicts > 0 {
            state.inject_conflicts -= 1;
            let page = state
                .pages
                .get_mut(&request.page_id)
                .ok_or_else(|| RemoteError::PageNotFound(request.page_id.clone()))?;
            page.version += 1;
            return Err(RemoteError::Conflict {
                page_id: request.page_id.clone(),
                submitted: request.version,
            });
        }
        let page = state
            .pages
            .get_mut(&request.page_id)
            .ok_or_else(|| RemoteError::PageNotFound(request.page_id.clone()))?;
        if request.version != page.version + 1 {
            return Err(RemoteError::Conflict {
                page_id: request.page_id.clone(),
                submitted: request.version,
            });
        }
        page.title = request.title.clone();
        page.body = request.body.clone();
        page.version = request.version;
        Ok(())
    }

    fn delete_page(&self, page_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("delete_page:{page_id}"));
        state
            .pages
            .remove(page_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::PageNotFound(page_id.to_string()))
    }

    fn labels(&self, page_id: &str) -> RemoteResult<Vec<IdentifiedLabel>> {
        Ok(self.page_labels(page_id))
    }

    fn add_labels(&self, page_id: &str, labels: &[Label]) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("add_labels:{page_id}"));
        for label in labels {
            let id = state.fresh_id("label-");
            state
                .labels
                .entry(page_id.to_string())
                .or_default()
                .push(IdentifiedLabel {
                    id,
                    name: label.name.clone(),
                    prefix: label.prefix.clone(),
                });
        }
        Ok(())
    }

    fn remove_label(&self, page_id: &str, name: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(format!("remove_label:{page_id}:{name}"));
        if let Some(labels) = state.labels.get_mut(page_id) {
            labels.retain(|l| l.name != name);
        }
        Ok(())
    }

    fn properties(&self, page_id: &str) -> RemoteResult<Vec<IdentifiedProperty>> {
        Ok(self.page_properties(page_id))
    }

    fn add_property(
        &self,
        page_id: &str,
        property: &ContentProperty,
    ) -> RemoteResult<IdentifiedProperty> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(format!("add_property:{page_id}:{}", property.key));
        let id = state.fresh_id("prop-");
        let stored = IdentifiedProperty {
            id,
            key: property.key.clone(),
            value: property.value.clone(),
            version: 1,
        };
        state
            .properties
            .entry(page_id.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn update_property(
        &self,
        page_id: &str,
        property_id: &str,
        version: i64,
        property: &ContentProperty,
    ) -> RemoteResult<IdentifiedProperty> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(format!("update_property:{page_id}:{}", property.key));
        let stored = state
            .properties
            .get_mut(page_id)
            .and_then(|props| props.iter_mut().find(|p| p.id == property_id))
            .ok_or_else(|| RemoteError::PageNotFound(page_id.to_string()))?;
        stored.value = property.value.clone();
        stored.version = version;
        Ok(stored.clone())
    }

    fn remove_property(&self, page_id: &str, property_id: &str, _key: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(format!("remove_property:{page_id}:{property_id}"));
        if let Some(props) = state.properties.get_mut(page_id) {
            props.retain(|p| p.id != property_id);
        }
        Ok(())
    }

    fn attachments(&self, page_id: &str) -> RemoteResult<Vec<Attachment>> {
        Ok(self.page_attachments(page_id))
    }

    fn upload_attachment(
        &self,
        page_id: &str,
        name: &str,
        path: &Path,
        comment: &str,
    ) -> RemoteResult<()> {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(format!("upload_attachment:{page_id}:{name}"));
        let has_existing = state
            .attachments
            .get(page_id)
            .is_some_and(|entries| entries.iter().any(|a| a.title == name));
        if has_existing {
            let existing = state
                .attachments
                .get_mut(page_id)
                .and_then(|entries| entries.iter_mut().find(|a| a.title == name))
                .expect("checked above");
            existing.version += 1;
            existing.file_size = size;
            existing.comment = Some(comment.to_string());
            return Ok(());
        }
        let id = state.fresh_id("att-");
        state
            .attachments
            .entry(page_id.to_string())
            .or_default()
            .push(Attachment {
                id,
                title: name.to_string(),
                file_size: size,
                comment: Some(comment.to_string()),
                version: 1,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_find_round_trips() {
        let remote = InMemoryRemote::new("DOCS");
        assert_eq!(remote.flavor(), ApiFlavor::Cloud);
        let page = remote
            .create_page(&CreatePage {
                space: "DOCS".into(),
                parent_id: None,
                title: "Home".into(),
                body: "<p>x</p>".into(),
            })
            .unwrap();
        let found = remote.find_page("DOCS", "Home").unwrap().unwrap();
        assert_eq!(found.id, page.id);
        assert_eq!(found.version, 1);
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let remote = InMemoryRemote::new("DOCS");
        let id = remote.seed_page("DOCS", None, "Home", "<p>old</p>", 5);
        let err = remote
            .update_page(&UpdatePage {
                page_id: id.clone(),
                title: "Home".into(),
                body: "<p>new</p>".into(),
                version: 5,
            })
            .unwrap_err();
        assert!(matches!(err, RemoteError::Conflict { submitted: 5, .. }));
        assert!(remote
            .update_page(&UpdatePage {
                page_id: id,
                title: "Home".into(),
                body: "<p>new</p>".into(),
                version: 6,
            })
            .is_ok());
    }

    #[test]
    fn injected_conflict_advances_remote_version() {
        let remote = InMemoryRemote::new("DOCS");
        let id = remote.seed_page("DOCS", None, "Home", "<p>old</p>", 1);
        remote.inject_conflicts(1);
        assert!(remote
            .update_page(&UpdatePage {
                page_id: id.clone(),
                title: "Home".into(),
                body: "<p>new</p>".into(),
                version: 2,
            })
            .is_err());
        assert_eq!(remote.page(&id).unwrap().version, 2);
        // After refetch the next version number succeeds.
        assert!(remote
            .update_page(&UpdatePage {
                page_id: id,
                title: "Home".into(),
                body: "<p>new</p>".into(),
                version: 3,
            })
            .is_ok());
    }

    #[test]
    fn label_add_and_remove() {
        let remote = InMemoryRemote::new("DOCS");
        let id = remote.seed_page("DOCS", None, "Home", "", 1);
        remote
            .add_labels(&id, &[Label::global("a"), Label::global("b")])
            .unwrap();
        remote.remove_label(&id, "a").unwrap();
        let names: Vec<_> = remote.labels(&id).unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["b"]);
    }
}
