pub mod node;

use std::collections::HashMap;

use crate::store::{Store, fresh_id, now_utc};
use node::{NodeKind, NodeMetadata, NodeStatus, OutlineNode, TreeNode};

#[derive(Debug)]
pub enum TreeError {
    /// Referenced node id does not exist.
    NotFound(String),
    /// Destination parent is unresolvable or belongs to another project.
    InvalidParent(String),
    /// The move would make a node its own descendant.
    CyclicMove(String),
    /// An ancestor walk failed to reach a root within the store bound.
    /// Pre-existing data corruption, not a caller error.
    CorruptTree(String),
    Storage(rusqlite::Error),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "node `{id}` not found"),
            Self::InvalidParent(id) => write!(f, "invalid parent `{id}`"),
            Self::CyclicMove(id) => {
                write!(f, "moving `{id}` would make it its own descendant")
            }
            Self::CorruptTree(id) => {
                write!(f, "ancestor walk from `{id}` never reached a root")
            }
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for TreeError {}

impl From<rusqlite::Error> for TreeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value)
    }
}

#[derive(Debug, Clone)]
pub struct NewNode<'a> {
    pub project_id: &'a str,
    pub kind: NodeKind,
    pub parent_id: Option<&'a str>,
    pub title: &'a str,
    pub word_count_goal: i64,
    pub metadata: NodeMetadata,
}

impl<'a> NewNode<'a> {
    pub fn new(project_id: &'a str, kind: NodeKind, parent_id: Option<&'a str>, title: &'a str) -> Self {
        Self {
            project_id,
            kind,
            parent_id,
            title,
            word_count_goal: 0,
            metadata: NodeMetadata::default(),
        }
    }
}

/// Field-level update. Parent and order are deliberately absent; placement
/// only moves through `move_node`.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub title: Option<String>,
    pub status: Option<NodeStatus>,
    pub word_count_goal: Option<i64>,
    pub metadata: Option<NodeMetadata>,
}

/// Inserts a node at the end of its sibling group (max existing order + 1,
/// or 0 for the first child) with status `draft`.
pub fn create_node(store: &Store, spec: NewNode<'_>) -> Result<OutlineNode, TreeError> {
    let tx = store.conn().unchecked_transaction()?;

    if let Some(parent_id) = spec.parent_id {
        match Store::get_node_on(&tx, parent_id)? {
            Some(parent) if parent.project_id == spec.project_id => {}
            _ => return Err(TreeError::InvalidParent(parent_id.to_string())),
        }
    }

    let order = Store::sibling_max_order_on(&tx, spec.project_id, spec.parent_id)?
        .map_or(0, |max| max + 1);
    let now = now_utc();
    let node = OutlineNode {
        id: fresh_id(spec.title),
        project_id: spec.project_id.to_string(),
        parent_id: spec.parent_id.map(ToOwned::to_owned),
        kind: spec.kind,
        title: spec.title.to_string(),
        order,
        status: NodeStatus::Draft,
        word_count_goal: spec.word_count_goal,
        metadata: spec.metadata,
        created_at: now.clone(),
        updated_at: now,
    };
    Store::insert_node_on(&tx, &node)?;
    tx.commit()?;
    Ok(node)
}

/// Merges the given fields and refreshes the update timestamp.
pub fn update_node(store: &Store, id: &str, update: NodeUpdate) -> Result<OutlineNode, TreeError> {
    let tx = store.conn().unchecked_transaction()?;
    let mut node =
        Store::get_node_on(&tx, id)?.ok_or_else(|| TreeError::NotFound(id.to_string()))?;

    if let Some(title) = update.title {
        node.title = title;
    }
    if let Some(status) = update.status {
        node.status = status;
    }
    if let Some(goal) = update.word_count_goal {
        node.word_count_goal = goal;
    }
    if let Some(metadata) = update.metadata {
        node.metadata = metadata;
    }
    node.updated_at = now_utc();

    Store::update_node_fields_on(&tx, &node)?;
    tx.commit()?;
    Ok(node)
}

/// Reparents or reorders a node. Sibling orders stay unique: a same-parent
/// move shifts the siblings between the old and the new slot by one, a
/// cross-parent move opens a slot in the destination group and leaves the
/// source group gapped (gaps are tolerated; inserts and display both survive
/// them). The whole sequence runs in one transaction.
pub fn move_node(
    store: &Store,
    id: &str,
    new_parent_id: Option<&str>,
    new_order: i64,
) -> Result<OutlineNode, TreeError> {
    let tx = store.conn().unchecked_transaction()?;
    let node =
        Store::get_node_on(&tx, id)?.ok_or_else(|| TreeError::NotFound(id.to_string()))?;

    if let Some(parent_id) = new_parent_id {
        match Store::get_node_on(&tx, parent_id)? {
            Some(parent) if parent.project_id == node.project_id => {}
            _ => return Err(TreeError::InvalidParent(parent_id.to_string())),
        }
        ensure_no_cycle(&tx, &node.project_id, id, parent_id)?;
    }

    let target = new_order.max(0);
    let same_parent = node.parent_id.as_deref() == new_parent_id;
    if same_parent && target == node.order {
        tx.commit()?;
        return Ok(node);
    }

    if same_parent {
        let old = node.order;
        if target > old {
            // Forward move: everyone in (old, target] steps back by one.
            Store::shift_order_range_on(&tx, &node.project_id, new_parent_id, old + 1, target, -1)?;
        } else {
            // Backward move: everyone in [target, old) steps forward by one.
            Store::shift_order_range_on(&tx, &node.project_id, new_parent_id, target, old - 1, 1)?;
        }
    } else {
        Store::open_order_slot_on(&tx, &node.project_id, new_parent_id, target)?;
    }

    let now = now_utc();
    Store::set_placement_on(&tx, id, new_parent_id, target, &now)?;
    tx.commit()?;

    let mut moved = node;
    moved.parent_id = new_parent_id.map(ToOwned::to_owned);
    moved.order = target;
    moved.updated_at = now;
    Ok(moved)
}

/// Walks ancestors from the destination parent. Reaching the moved node is a
/// cycle; exhausting the store bound without reaching a root is corruption.
fn ensure_no_cycle(
    conn: &rusqlite::Connection,
    project_id: &str,
    moved_id: &str,
    destination_parent: &str,
) -> Result<(), TreeError> {
    let bound = Store::count_project_nodes_on(conn, project_id)?;
    let mut cursor = Some(destination_parent.to_string());
    let mut steps: i64 = 0;

    while let Some(current) = cursor {
        if current == moved_id {
            return Err(TreeError::CyclicMove(moved_id.to_string()));
        }
        steps += 1;
        if steps > bound {
            return Err(TreeError::CorruptTree(destination_parent.to_string()));
        }
        cursor = match Store::get_node_on(conn, &current)? {
            Some(ancestor) => ancestor.parent_id,
            None => return Err(TreeError::CorruptTree(current)),
        };
    }
    Ok(())
}

/// Removes the node and its whole subtree, descendants first, in a single
/// transaction. An absent id is a successful no-op. Returns the number of
/// removed nodes.
pub fn delete_node(store: &Store, id: &str) -> Result<usize, TreeError> {
    let tx = store.conn().unchecked_transaction()?;
    let Some(root) = Store::get_node_on(&tx, id)? else {
        return Ok(0);
    };

    // Explicit stack instead of recursion: deep outlines must not overflow.
    let mut pending = vec![root.id.clone()];
    let mut preorder = Vec::new();
    while let Some(current) = pending.pop() {
        let children = Store::child_ids_on(&tx, &root.project_id, &current)?;
        pending.extend(children);
        preorder.push(current);
    }

    // Reverse pre-order deletes every node after all of its descendants, so
    // no surviving row ever points at a missing parent.
    for node_id in preorder.iter().rev() {
        Store::delete_node_row_on(&tx, node_id)?;
    }
    tx.commit()?;
    Ok(preorder.len())
}

/// Read-only nested view of a project: roots in order, children attached
/// sorted ascending by order, each node tagged with its depth. Rows whose
/// parent chain cannot be resolved are omitted.
pub fn materialize_tree(store: &Store, project_id: &str) -> Result<Vec<TreeNode>, TreeError> {
    let nodes = store.list_project_nodes(project_id)?;
    let bound = nodes.len();
    let by_id: HashMap<&str, &OutlineNode> =
        nodes.iter().map(|node| (node.id.as_str(), node)).collect();

    let mut depths: HashMap<String, Option<usize>> = HashMap::new();
    for node in &nodes {
        resolve_depth(&by_id, &mut depths, &node.id, bound);
    }

    // Sibling lists in display order, keyed by parent.
    let mut child_lists: HashMap<Option<String>, Vec<(i64, String)>> = HashMap::new();
    for node in &nodes {
        if depths.get(&node.id).copied().flatten().is_none() {
            continue;
        }
        child_lists
            .entry(node.parent_id.clone())
            .or_default()
            .push((node.order, node.id.clone()));
    }
    for list in child_lists.values_mut() {
        list.sort();
    }

    // Deepest-first assembly: every child is built before its parent asks
    // for it, so no recursion is needed.
    let mut levels: Vec<Vec<String>> = Vec::new();
    for node in &nodes {
        if let Some(depth) = depths.get(&node.id).copied().flatten() {
            if levels.len() <= depth {
                levels.resize(depth + 1, Vec::new());
            }
            levels[depth].push(node.id.clone());
        }
    }

    let mut built: HashMap<String, TreeNode> = HashMap::new();
    for (depth, ids) in levels.iter().enumerate().rev() {
        for id in ids {
            let children = child_lists
                .remove(&Some(id.clone()))
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(_, child_id)| built.remove(&child_id))
                .collect();
            let node = by_id[id.as_str()].clone();
            built.insert(
                id.clone(),
                TreeNode {
                    node,
                    level: depth,
                    children,
                },
            );
        }
    }

    let roots = child_lists
        .remove(&None)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(_, id)| built.remove(&id))
        .collect();
    Ok(roots)
}

/// Iterative memoized depth walk. `None` marks a node whose parent chain is
/// broken or cyclic; such nodes are unreachable from any root.
fn resolve_depth(
    by_id: &HashMap<&str, &OutlineNode>,
    memo: &mut HashMap<String, Option<usize>>,
    id: &str,
    bound: usize,
) {
    let mut path: Vec<String> = Vec::new();
    let mut cursor = id.to_string();
    let anchor: Option<usize> = loop {
        if let Some(known) = memo.get(&cursor) {
            break *known;
        }
        let Some(node) = by_id.get(cursor.as_str()) else {
            break None;
        };
        match &node.parent_id {
            None => {
                memo.insert(cursor.clone(), Some(0));
                break Some(0);
            }
            Some(parent) => {
                if path.len() >= bound {
                    break None;
                }
                path.push(cursor.clone());
                cursor = parent.clone();
            }
        }
    };

    let mut depth = anchor;
    for walked in path.into_iter().rev() {
        depth = depth.map(|d| d + 1);
        memo.insert(walked, depth);
    }
    memo.entry(id.to_string()).or_insert(anchor);
}
