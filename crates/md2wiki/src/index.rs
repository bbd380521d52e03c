//! Document indexer: arranges the loaded corpus into a single rooted tree
//! and builds the cross-reference table used for link resolution.
//!
//! Parenting is directory-driven. A directory's `index.md` or `README.md`
//! is the parent of the directory's other documents and of its
//! subdirectories. Directories without an index document either produce a
//! synthetic grouping node (`keep_hierarchy`) or fold their documents into
//! the nearest ancestor that has one.

use crate::error::StructureError;
use crate::remote::types::RemoteIdentity;
use crate::scanner::SourceDocument;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

pub type NodeId = usize;

#[derive(Debug)]
pub struct DocumentNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    /// Child order is deterministic: documents of the node's directory
    /// first (sorted by path), then subdirectory nodes (sorted by path).
    pub children: Vec<NodeId>,
    /// `None` for synthetic grouping nodes.
    pub source: Option<SourceDocument>,
    pub title: String,
    /// Resolved remote page identity; set by the sync engine after a
    /// confirmed remote observation or write.
    pub identity: Option<RemoteIdentity>,
}

impl DocumentNode {
    pub fn is_synthetic(&self) -> bool {
        self.source.is_none()
    }

    /// False only when the source opts out via `synchronized: false`.
    pub fn is_synchronized(&self) -> bool {
        self.source.as_ref().map_or(true, |s| s.meta.synchronized)
    }
}

#[derive(Debug)]
pub struct DocumentTree {
    pub nodes: Vec<DocumentNode>,
    pub root: NodeId,
}

impl DocumentTree {
    pub fn node(&self, id: NodeId) -> &DocumentNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut DocumentNode {
        &mut self.nodes[id]
    }

    /// Node ids in pre-order starting at the root.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

struct DirGroup {
    index: Option<SourceDocument>,
    others: Vec<SourceDocument>,
}

/// Builds the document tree. `keep_hierarchy` controls how directories
/// without an index document are represented.
pub fn build_tree(
    docs: Vec<SourceDocument>,
    keep_hierarchy: bool,
) -> Result<DocumentTree, StructureError> {
    if docs.is_empty() {
        return Err(StructureError::NoRoot);
    }
    if docs.len() == 1 {
        let doc = docs.into_iter().next().expect("one document");
        let title = doc.title();
        let tree = DocumentTree {
            nodes: vec![DocumentNode {
                id: 0,
                parent: None,
                children: Vec::new(),
                source: Some(doc),
                title,
                identity: None,
            }],
            root: 0,
        };
        return Ok(tree);
    }

    // Group documents by their containing directory.
    let mut groups: BTreeMap<PathBuf, DirGroup> = BTreeMap::new();
    for doc in docs {
        let dir = doc
            .relative_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let group = groups.entry(dir.clone()).or_insert(DirGroup {
            index: None,
            others: Vec::new(),
        });
        if doc.is_index() {
            match &group.index {
                None => group.index = Some(doc),
                Some(existing) => {
                    if dir.as_os_str().is_empty() {
                        return Err(StructureError::MultipleRoots {
                            first: existing.relative_path.clone(),
                            second: doc.relative_path.clone(),
                        });
                    }
                    // In subdirectories index.md outranks README.md; the
                    // loser joins the ordinary documents.
                    let incoming_is_index = stem_is(&doc, "index");
                    let existing_is_index = stem_is(existing, "index");
                    if incoming_is_index && !existing_is_index {
                        let demoted = group.index.replace(doc).expect("existing index");
                        group.others.push(demoted);
                    } else {
                        group.others.push(doc);
                    }
                }
            }
        } else {
            group.others.push(doc);
        }
    }

    let Some(root_group) = groups.get_mut(Path::new("")) else {
        return Err(StructureError::NoRoot);
    };
    let Some(root_doc) = root_group.index.take() else {
        return Err(StructureError::NoRoot);
    };

    let mut nodes: Vec<DocumentNode> = Vec::new();
    let root = push_node(&mut nodes, None, Some(root_doc));

    // Container node each directory's contents attach to. Directories are
    // visited in lexicographic order, so a parent directory is resolved
    // before any of its subdirectories, and a directory's own documents
    // attach before its subdirectory nodes do.
    let mut containers: HashMap<PathBuf, NodeId> = HashMap::new();
    containers.insert(PathBuf::new(), root);

    let dirs: Vec<PathBuf> = groups.keys().cloned().collect();
    for dir in &dirs {
        let container = if dir.as_os_str().is_empty() {
            root
        } else {
            let parent_dir = dir.parent().map(Path::to_path_buf).unwrap_or_default();
            let parent = ensure_container(&parent_dir, &mut containers, &mut nodes, keep_hierarchy);
            let group = groups.get_mut(dir.as_path()).expect("grouped dir");
            let id = if let Some(index_doc) = group.index.take() {
                // The index document becomes the directory's node.
                let id = push_node(&mut nodes, Some(parent), Some(index_doc));
                nodes[parent].children.push(id);
                id
            } else if keep_hierarchy {
                let id = push_node(&mut nodes, Some(parent), None);
                nodes[id].title = dir
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                nodes[parent].children.push(id);
                id
            } else {
                parent
            };
            containers.insert(dir.clone(), id);
            id
        };

        let group = groups.get_mut(dir.as_path()).expect("grouped dir");
        group.others.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        for doc in group.others.drain(..) {
            let id = push_node(&mut nodes, Some(container), Some(doc));
            nodes[container].children.push(id);
        }
    }

    let tree = DocumentTree { nodes, root };
    validate(&tree)?;
    Ok(tree)
}

fn stem_is(doc: &SourceDocument, stem: &str) -> bool {
    doc.relative_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .as_deref()
        == Some(stem)
}

fn push_node(
    nodes: &mut Vec<DocumentNode>,
    parent: Option<NodeId>,
    source: Option<SourceDocument>,
) -> NodeId {
    let id = nodes.len();
    let title = source.as_ref().map(SourceDocument::title).unwrap_or_default();
    nodes.push(DocumentNode {
        id,
        parent,
        children: Vec::new(),
        source,
        title,
        identity: None,
    });
    id
}

/// Resolves the container node for `dir`, creating intermediate nodes on
/// demand. With `keep_hierarchy` a directory without an index document gets
/// a synthetic grouping node; otherwise it shares its parent's container.
fn ensure_container(
    dir: &Path,
    containers: &mut HashMap<PathBuf, NodeId>,
    nodes: &mut Vec<DocumentNode>,
    keep_hierarchy: bool,
) -> NodeId {
    if let Some(&id) = containers.get(dir) {
        return id;
    }
    let parent_dir = dir.parent().map(Path::to_path_buf).unwrap_or_default();
    let parent = ensure_container(&parent_dir, containers, nodes, keep_hierarchy);

    let id = if keep_hierarchy {
        let id = push_node(nodes, Some(parent), None);
        nodes[id].title = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        nodes[parent].children.push(id);
        id
    } else {
        parent
    };
    containers.insert(dir.to_path_buf(), id);
    id
}

/// Checks that every node is reachable from the root exactly once.
fn validate(tree: &DocumentTree) -> Result<(), StructureError> {
    let mut seen = vec![false; tree.nodes.len()];
    let mut stack = vec![tree.root];
    while let Some(id) = stack.pop() {
        if seen[id] {
            return Err(StructureError::Cycle {
                path: node_path(&tree.nodes[id]),
            });
        }
        seen[id] = true;
        stack.extend(tree.nodes[id].children.iter().copied());
    }
    for (id, visited) in seen.iter().enumerate() {
        if !visited {
            return Err(StructureError::MissingParent {
                child: node_path(&tree.nodes[id]),
            });
        }
    }
    Ok(())
}

fn node_path(node: &DocumentNode) -> PathBuf {
    node.source
        .as_ref()
        .map(|s| s.relative_path.clone())
        .unwrap_or_else(|| PathBuf::from(&node.title))
}

/// What a relative link to a document resolves to.
#[derive(Debug, Clone)]
pub struct CrossReference {
    pub title: String,
    pub space_key: Option<String>,
    pub page_id: Option<String>,
}

/// Absolute source path → cross-reference entry, built in one full pass
/// over the tree before any conversion starts.
#[derive(Debug, Default)]
pub struct XrefTable {
    entries: HashMap<PathBuf, CrossReference>,
}

impl XrefTable {
    pub fn build(tree: &DocumentTree) -> Self {
        let mut entries = HashMap::new();
        for node in &tree.nodes {
            if let Some(source) = &node.source {
                entries.insert(
                    normalize(&source.absolute_path),
                    CrossReference {
                        title: node.title.clone(),
                        space_key: source.meta.space_key.clone(),
                        page_id: source.meta.page_id.clone(),
                    },
                );
            }
        }
        Self { entries }
    }

    /// Resolves `target`, a link destination relative to `base_dir`.
    pub fn resolve(&self, base_dir: &Path, target: &str) -> Option<&CrossReference> {
        let joined = if Path::new(target).is_absolute() {
            PathBuf::from(target)
        } else {
            base_dir.join(target)
        };
        self.entries.get(&normalize(&joined))
    }
}

/// Lexical path normalization; resolves `.` and `..` without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
