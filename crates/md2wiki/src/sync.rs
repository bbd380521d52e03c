//! Synchronization engine.
//!
//! Walks the document tree in strict pre-order so every parent's remote
//! identity is resolved before its children publish. Per node the protocol
//! is: resolve identity (explicit id, adopt by title search, or create),
//! compare the converted document against the remote state, and write only
//! what differs. Version conflicts retry exactly once after a refetch; a
//! second conflict fails the node and its subtree is skipped while siblings
//! proceed.
//!
//! Labels, properties, and attachments reconcile as set differences, never
//! wholesale replacement. Attachments are content-addressed: the SHA-256 of
//! the file travels in the attachment comment, and a matching hash on the
//! remote copy suppresses re-upload.

use crate::convert::{self, ConvertedDocument};
use crate::error::RemoteError;
use crate::index::{DocumentTree, NodeId, XrefTable};
use crate::remote::types::{
    ContentProperty, CreatePage, IdentifiedLabel, IdentifiedProperty, Label, Page,
    RemoteIdentity, UpdatePage,
};
use crate::remote::WikiRemote;
use crate::report::{Outcome, PageOutcome, RunReport};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Placeholder identity assigned to pages a dry run would create, so their
/// children can still be planned.
const PLANNED_ID: &str = "(new)";

/// Stub body published for synthetic grouping nodes.
const CHILDREN_STUB: &str = "<ac:structured-macro ac:name=\"children\"><ac:parameter ac:name=\"allChildren\">true</ac:parameter></ac:structured-macro>";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Space for documents that do not declare their own.
    pub space_key: String,
    /// Walk the full protocol, reads included, but issue no mutating call.
    pub dry_run: bool,
}

pub struct Synchronizer<'a> {
    remote: &'a dyn WikiRemote,
    options: SyncOptions,
}

impl<'a> Synchronizer<'a> {
    pub fn new(remote: &'a dyn WikiRemote, options: SyncOptions) -> Self {
        Self { remote, options }
    }

    pub fn synchronize(&self, tree: &mut DocumentTree) -> RunReport {
        let xref = XrefTable::build(tree);
        let mut report = RunReport::default();
        // Node id -> resolved remote page id; absence means the node did
        // not resolve and its children must not publish.
        let mut resolved: HashMap<NodeId, String> = HashMap::new();

        for id in tree.preorder() {
            let (source_label, node_title, parent, meta) = {
                let node = tree.node(id);
                let label = node
                    .source
                    .as_ref()
                    .map(|d| d.relative_path.display().to_string())
                    .unwrap_or_else(|| format!("{}/", node.title));
                let meta = node.source.as_ref().map(|d| d.meta.clone());
                (label, node.title.clone(), node.parent, meta)
            };

            if let Some(parent) = parent {
                if !resolved.contains_key(&parent) {
                    warn!(source = %source_label, "skipping: parent not synchronized");
                    report.record(PageOutcome {
                        source: source_label,
                        title: node_title,
                        outcome: Outcome::Failed {
                            reason: "parent page not synchronized".to_string(),
                        },
                        diagnostics: Vec::new(),
                    });
                    continue;
                }
            }
            let parent_page = parent.map(|p| resolved[&p].clone());

            // Unsynchronized documents index into the tree but are never
            // written. An explicit page id still anchors their children.
            if let Some(meta) = &meta {
                if !meta.synchronized {
                    let page_id = meta.page_id.clone().unwrap_or_default();
                    if !page_id.is_empty() {
                        resolved.insert(id, page_id.clone());
                    }
                    debug!(source = %source_label, "unsynchronized document, no write");
                    report.record(PageOutcome {
                        source: source_label,
                        title: node_title,
                        outcome: Outcome::Skipped { page_id },
                        diagnostics: Vec::new(),
                    });
                    continue;
                }
            }

            let converted = match self.convert_node(tree, id, &xref) {
                Ok(converted) => converted,
                Err(message) => {
                    report.record(PageOutcome {
                        source: source_label,
                        title: node_title,
                        outcome: Outcome::Failed { reason: message },
                        diagnostics: Vec::new(),
                    });
                    continue;
                }
            };

            let space = meta
                .as_ref()
                .and_then(|m| m.space_key.clone())
                .unwrap_or_else(|| self.options.space_key.clone());
            let explicit_id = meta.as_ref().and_then(|m| m.page_id.clone());

            match self.publish(&space, explicit_id.as_deref(), parent_page.as_deref(), &converted) {
                Ok((outcome, identity)) => {
                    resolved.insert(id, identity.page_id.clone());
                    if !self.options.dry_run {
                        tree.node_mut(id).identity = Some(identity);
                    }
                    report.record(PageOutcome {
                        source: source_label,
                        title: converted.title.clone(),
                        outcome,
                        diagnostics: converted.diagnostics,
                    });
                }
                Err(err) => {
                    warn!(source = %source_label, error = %err, "node failed");
                    report.record(PageOutcome {
                        source: source_label,
                        title: converted.title.clone(),
                        outcome: Outcome::Failed {
                            reason: err.to_string(),
                        },
                        diagnostics: converted.diagnostics,
                    });
                }
            }
        }
        report
    }

    fn convert_node(
        &self,
        tree: &DocumentTree,
        id: NodeId,
        xref: &XrefTable,
    ) -> Result<ConvertedDocument, String> {
        let node = tree.node(id);
        match &node.source {
            Some(doc) => convert::convert(doc, xref).map_err(|e| e.to_string()),
            // Synthetic grouping node: a stub that lists its children.
            None => Ok(ConvertedDocument {
                title: node.title.clone(),
                body: CHILDREN_STUB.to_string(),
                attachments: Vec::new(),
                labels: Vec::new(),
                properties: BTreeMap::new(),
                diagnostics: Vec::new(),
            }),
        }
    }

    /// Resolves the node's remote identity and writes whatever differs.
    /// Returns the outcome and the identity children will attach under.
    fn publish(
        &self,
        space: &str,
        explicit_id: Option<&str>,
        parent_id: Option<&str>,
        converted: &ConvertedDocument,
    ) -> Result<(Outcome, RemoteIdentity), RemoteError> {
        let page = match explicit_id {
            Some(page_id) => Some(self.remote.get_page(page_id)?),
            None => match self.remote.find_page(space, &converted.title)? {
                Some(summary) => {
                    debug!(title = %converted.title, page_id = %summary.id, "adopting existing page");
                    Some(self.remote.get_page(&summary.id)?)
                }
                None => None,
            },
        };

        let page = match page {
            Some(page) => page,
            None => {
                if self.options.dry_run {
                    info!(title = %converted.title, "dry run: would create page");
                    return Ok((
                        Outcome::Created {
                            page_id: PLANNED_ID.to_string(),
                        },
                        RemoteIdentity {
                            page_id: PLANNED_ID.to_string(),
                            space: space.to_string(),
                            version: 0,
                        },
                    ));
                }
                let created = self.remote.create_page(&CreatePage {
                    space: space.to_string(),
                    parent_id: parent_id.map(str::to_string),
                    title: converted.title.clone(),
                    body: converted.body.clone(),
                })?;
                info!(title = %converted.title, page_id = %created.id, "created page");
                self.reconcile_metadata(&created.id, converted)?;
                self.reconcile_attachments(&created.id, converted)?;
                return Ok((
                    Outcome::Created {
                        page_id: created.id.clone(),
                    },
                    RemoteIdentity {
                        page_id: created.id,
                        space: space.to_string(),
                        version: created.version,
                    },
                ));
            }
        };

        let desired_labels = normalized_labels(&converted.labels);
        let current_labels = self.remote.labels(&page.id)?;
        let (labels_add, labels_remove) = label_diff(&current_labels, &desired_labels);

        let current_properties = self.remote.properties(&page.id)?;
        let property_ops = property_diff(&current_properties, &converted.properties);

        let current_attachments = self.remote.attachments(&page.id)?;
        let pending_uploads: Vec<_> = converted
            .attachments
            .iter()
            .filter(|a| {
                let expected = hash_comment(&a.hash);
                !current_attachments
                    .iter()
                    .any(|remote| remote.title == a.name && remote.comment.as_deref() == Some(expected.as_str()))
            })
            .collect();

        let content_changed = page.body != converted.body || page.title != converted.title;
        if !content_changed
            && labels_add.is_empty()
            && labels_remove.is_empty()
            && property_ops.is_empty()
            && pending_uploads.is_empty()
        {
            debug!(page_id = %page.id, "unchanged, skipping");
            let identity = identity_of(&page, space);
            return Ok((Outcome::Skipped { page_id: page.id.clone() }, identity));
        }

        if self.options.dry_run {
            info!(page_id = %page.id, "dry run: would update page");
            let identity = identity_of(&page, space);
            return Ok((Outcome::Updated { page_id: page.id.clone() }, identity));
        }

        // Attachments first: the new body may reference them by name.
        for attachment in &pending_uploads {
            self.remote.upload_attachment(
                &page.id,
                &attachment.name,
                &attachment.source,
                &hash_comment(&attachment.hash),
            )?;
        }

        let mut version = page.version;
        if content_changed {
            version = self.update_with_retry(&page, converted)?;
        }

        if !labels_add.is_empty() {
            self.remote.add_labels(&page.id, &labels_add)?;
        }
        for name in &labels_remove {
            self.remote.remove_label(&page.id, name)?;
        }
        self.apply_property_ops(&page.id, &property_ops)?;

        info!(page_id = %page.id, title = %converted.title, "updated page");
        let identity = RemoteIdentity {
            page_id: page.id.clone(),
            space: space.to_string(),
            version,
        };
        Ok((Outcome::Updated { page_id: page.id.clone() }, identity))
    }

    /// One optimistic-lock retry: on conflict refetch, recompute the
    /// version, submit again. A second conflict propagates. Returns the
    /// version number the page holds after the write.
    fn update_with_retry(
        &self,
        page: &Page,
        converted: &ConvertedDocument,
    ) -> Result<i64, RemoteError> {
        let request = UpdatePage {
            page_id: page.id.clone(),
            title: converted.title.clone(),
            body: converted.body.clone(),
            version: page.version + 1,
        };
        match self.remote.update_page(&request) {
            Ok(()) => Ok(request.version),
            Err(RemoteError::Conflict { .. }) => {
                warn!(page_id = %page.id, "version conflict, refetching once");
                let fresh = self.remote.get_page(&page.id)?;
                let retry = UpdatePage {
                    version: fresh.version + 1,
                    ..request
                };
                self.remote.update_page(&retry)?;
                Ok(retry.version)
            }
            Err(other) => Err(other),
        }
    }

    fn reconcile_metadata(
        &self,
        page_id: &str,
        converted: &ConvertedDocument,
    ) -> Result<(), RemoteError> {
        let labels = normalized_labels(&converted.labels);
        if !labels.is_empty() {
            self.remote.add_labels(page_id, &labels)?;
        }
        for (key, value) in &converted.properties {
            self.remote.add_property(
                page_id,
                &ContentProperty {
                    key: key.clone(),
                    value: value.clone(),
                },
            )?;
        }
        Ok(())
    }

    fn reconcile_attachments(
        &self,
        page_id: &str,
        converted: &ConvertedDocument,
    ) -> Result<(), RemoteError> {
        for attachment in &converted.attachments {
            self.remote.upload_attachment(
                page_id,
                &attachment.name,
                &attachment.source,
                &hash_comment(&attachment.hash),
            )?;
        }
        Ok(())
    }

    fn apply_property_ops(&self, page_id: &str, ops: &[PropertyOp]) -> Result<(), RemoteError> {
        for op in ops {
            match op {
                PropertyOp::Add(property) => {
                    self.remote.add_property(page_id, property)?;
                }
                PropertyOp::Update {
                    id,
                    next_version,
                    property,
                } => {
                    self.remote
                        .update_property(page_id, id, *next_version, property)?;
                }
                PropertyOp::Remove { id, key } => {
                    self.remote.remove_property(page_id, id, key)?;
                }
            }
        }
        Ok(())
    }
}

fn hash_comment(hash: &str) -> String {
    format!("sha256:{hash}")
}

fn identity_of(page: &Page, space: &str) -> RemoteIdentity {
    RemoteIdentity {
        page_id: page.id.clone(),
        space: space.to_string(),
        version: page.version,
    }
}

/// Sorted, deduplicated global labels for a document's tag list.
fn normalized_labels(tags: &[String]) -> Vec<Label> {
    let mut labels: Vec<Label> = tags.iter().map(|t| Label::global(t.as_str())).collect();
    labels.sort();
    labels.dedup();
    labels
}

/// Labels to add and label names to remove, both in sorted order.
fn label_diff(current: &[IdentifiedLabel], desired: &[Label]) -> (Vec<Label>, Vec<String>) {
    let add: Vec<Label> = desired
        .iter()
        .filter(|d| !current.iter().any(|c| c.name == d.name))
        .cloned()
        .collect();
    let mut remove: Vec<String> = current
        .iter()
        .filter(|c| !desired.iter().any(|d| d.name == c.name))
        .map(|c| c.name.clone())
        .collect();
    remove.sort();
    (add, remove)
}

#[derive(Debug, PartialEq)]
enum PropertyOp {
    Add(ContentProperty),
    Update {
        id: String,
        next_version: i64,
        property: ContentProperty,
    },
    Remove {
        id: String,
        key: String,
    },
}

/// Set difference over property keys, in sorted key order. Equal values
/// produce no operation.
fn property_diff(current: &[IdentifiedProperty], desired: &BTreeMap<String, Value>) -> Vec<PropertyOp> {
    let mut ops = Vec::new();
    for (key, value) in desired {
        match current.iter().find(|p| &p.key == key) {
            None => ops.push(PropertyOp::Add(ContentProperty {
                key: key.clone(),
                value: value.clone(),
            })),
            Some(existing) if &existing.value != value => ops.push(PropertyOp::Update {
                id: existing.id.clone(),
                next_version: existing.version + 1,
                property: ContentProperty {
                    key: key.clone(),
                    value: value.clone(),
                },
            }),
            Some(_) => {}
        }
    }
    let mut removals: Vec<&IdentifiedProperty> = current
        .iter()
        .filter(|p| !desired.contains_key(&p.key))
        .collect();
    removals.sort_by(|a, b| a.key.cmp(&b.key));
    for p in removals {
        ops.push(PropertyOp::Remove {
            id: p.id.clone(),
            key: p.key.clone(),
        });
    }
    ops
}
