use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::diff::{Diff, PatchError, apply_diff, compute_diff};
use crate::store::{Store, fresh_id, now_utc, sha256_hex};

/// One committed version of a chapter's content. Snapshots are append-only
/// and addressed by content hash; `diff` transforms the parent's content
/// into this version (a chain root diffs from the empty string).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub chapter_id: String,
    pub project_id: String,
    pub summary: String,
    pub content_hash: String,
    pub word_count: usize,
    pub diff: Diff,
    pub parent_snapshot_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug)]
pub enum SnapshotError {
    NotFound(String),
    /// Snapshot creation named a parent that does not resolve.
    ParentNotFound(String),
    /// The append would break the single-chain-per-chapter invariant.
    InvalidLineage(String),
    /// Replaying the chain did not reproduce the stored content hash.
    HashMismatch { snapshot_id: String },
    Patch(PatchError),
    Storage(rusqlite::Error),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "snapshot `{id}` not found"),
            Self::ParentNotFound(id) => write!(f, "parent snapshot `{id}` not found"),
            Self::InvalidLineage(reason) => write!(f, "invalid lineage: {reason}"),
            Self::HashMismatch { snapshot_id } => {
                write!(f, "replayed content does not match hash of `{snapshot_id}`")
            }
            Self::Patch(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<rusqlite::Error> for SnapshotError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value)
    }
}

impl From<PatchError> for SnapshotError {
    fn from(value: PatchError) -> Self {
        Self::Patch(value)
    }
}

pub fn content_hash(content: &str) -> String {
    sha256_hex(content)
}

/// Non-whitespace character count. Character-based so CJK prose counts the
/// way writers expect.
pub fn measure_content(content: &str) -> usize {
    content.chars().filter(|c| !c.is_whitespace()).count()
}

#[derive(Debug, Clone)]
pub struct NewSnapshot<'a> {
    pub chapter_id: &'a str,
    pub project_id: &'a str,
    pub content: &'a str,
    pub summary: &'a str,
    pub parent_snapshot_id: Option<&'a str>,
}

/// Diffs `content` against the parent's reconstructed content (or the empty
/// string for a chain root) and appends the result.
pub fn create_snapshot(store: &Store, spec: NewSnapshot<'_>) -> Result<Snapshot, SnapshotError> {
    let parent_content = match spec.parent_snapshot_id {
        Some(parent_id) => {
            if store.get_snapshot(parent_id)?.is_none() {
                return Err(SnapshotError::ParentNotFound(parent_id.to_string()));
            }
            reconstruct(store, parent_id)?
        }
        None => String::new(),
    };

    let snapshot = Snapshot {
        id: fresh_id(spec.chapter_id),
        chapter_id: spec.chapter_id.to_string(),
        project_id: spec.project_id.to_string(),
        summary: spec.summary.to_string(),
        content_hash: content_hash(spec.content),
        word_count: measure_content(spec.content),
        diff: compute_diff(&parent_content, spec.content),
        parent_snapshot_id: spec.parent_snapshot_id.map(ToOwned::to_owned),
        created_at: now_utc(),
    };
    append_snapshot(store, &snapshot)?;
    Ok(snapshot)
}

/// Lineage-checked append. The parent must exist, belong to the same chapter
/// and be the current chain head; a root append is only legal on an empty
/// chapter. Validation and insert share one transaction.
pub fn append_snapshot(store: &Store, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let tx = store.conn().unchecked_transaction()?;

    match &snapshot.parent_snapshot_id {
        Some(parent_id) => {
            let parent = Store::get_snapshot_on(&tx, parent_id)?.ok_or_else(|| {
                SnapshotError::InvalidLineage(format!("parent `{parent_id}` does not exist"))
            })?;
            if parent.chapter_id != snapshot.chapter_id {
                return Err(SnapshotError::InvalidLineage(format!(
                    "parent `{parent_id}` belongs to chapter `{}`",
                    parent.chapter_id
                )));
            }
            if Store::snapshot_child_count_on(&tx, parent_id)? > 0 {
                return Err(SnapshotError::InvalidLineage(format!(
                    "parent `{parent_id}` already has a successor"
                )));
            }
        }
        None => {
            if Store::chapter_snapshot_count_on(&tx, &snapshot.chapter_id)? > 0 {
                return Err(SnapshotError::InvalidLineage(format!(
                    "chapter `{}` already has a chain root",
                    snapshot.chapter_id
                )));
            }
        }
    }

    Store::insert_snapshot_on(&tx, snapshot)?;
    tx.commit()?;
    Ok(())
}

pub fn get_snapshot(store: &Store, id: &str) -> Result<Snapshot, SnapshotError> {
    store
        .get_snapshot(id)?
        .ok_or_else(|| SnapshotError::NotFound(id.to_string()))
}

/// The chapter's chain, newest first, walked via parent pointers from the
/// head. Stray rows that the walk cannot reach are a lineage fault.
pub fn snapshot_chain(store: &Store, chapter_id: &str) -> Result<Vec<Snapshot>, SnapshotError> {
    let rows = store.snapshots_for_chapter(chapter_id)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let referenced: HashSet<&str> = rows
        .iter()
        .filter_map(|s| s.parent_snapshot_id.as_deref())
        .collect();
    let mut heads = rows.iter().filter(|s| !referenced.contains(s.id.as_str()));
    let head = heads
        .next()
        .ok_or_else(|| SnapshotError::InvalidLineage("chain has no head".to_string()))?;
    if heads.next().is_some() {
        return Err(SnapshotError::InvalidLineage(
            "chapter has more than one chain head".to_string(),
        ));
    }

    let by_id: HashMap<&str, &Snapshot> = rows.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut chain = Vec::with_capacity(rows.len());
    let mut cursor = Some(head.id.as_str());
    while let Some(current) = cursor {
        let snapshot = by_id.get(current).ok_or_else(|| {
            SnapshotError::InvalidLineage(format!("chain references missing snapshot `{current}`"))
        })?;
        chain.push((*snapshot).clone());
        if chain.len() > rows.len() {
            return Err(SnapshotError::InvalidLineage(
                "parent pointers form a loop".to_string(),
            ));
        }
        cursor = snapshot.parent_snapshot_id.as_deref();
    }

    if chain.len() != rows.len() {
        return Err(SnapshotError::InvalidLineage(
            "chain does not reach every snapshot of the chapter".to_string(),
        ));
    }
    Ok(chain)
}

/// Rebuilds a snapshot's content by replaying diffs from the chain root and
/// verifies the result against the stored content hash.
pub fn reconstruct(store: &Store, id: &str) -> Result<String, SnapshotError> {
    let target = get_snapshot(store, id)?;

    let mut lineage = vec![target.clone()];
    let mut seen: HashSet<String> = [target.id.clone()].into();
    let mut cursor = target.parent_snapshot_id.clone();
    while let Some(parent_id) = cursor {
        if !seen.insert(parent_id.clone()) {
            return Err(SnapshotError::InvalidLineage(
                "parent pointers form a loop".to_string(),
            ));
        }
        let parent = store.get_snapshot(&parent_id)?.ok_or_else(|| {
            SnapshotError::InvalidLineage(format!("chain references missing snapshot `{parent_id}`"))
        })?;
        cursor = parent.parent_snapshot_id.clone();
        lineage.push(parent);
    }

    let mut content = String::new();
    for snapshot in lineage.iter().rev() {
        content = apply_diff(&content, &snapshot.diff)?;
    }

    if content_hash(&content) != target.content_hash {
        return Err(SnapshotError::HashMismatch {
            snapshot_id: target.id,
        });
    }
    Ok(content)
}
