use serde::Serialize;

use crate::outline::TreeError;
use crate::outline::node::{NodeKind, NodeStatus};
use crate::snapshot::{SnapshotError, snapshot_chain};
use crate::store::{Store, now_utc};

pub const DEFAULT_ROLLUP_STATUSES: [NodeStatus; 2] = [NodeStatus::Review, NodeStatus::Finished];

#[derive(Debug)]
pub enum ChronicleError {
    /// The volume id does not resolve.
    NotFound(String),
    Tree(TreeError),
    Snapshot(SnapshotError),
}

impl std::fmt::Display for ChronicleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "volume `{id}` not found"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Snapshot(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ChronicleError {}

impl From<TreeError> for ChronicleError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

impl From<SnapshotError> for ChronicleError {
    fn from(value: SnapshotError) -> Self {
        Self::Snapshot(value)
    }
}

impl From<rusqlite::Error> for ChronicleError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Tree(TreeError::Storage(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterDigest {
    pub chapter_id: String,
    pub chapter_number: usize,
    pub title: String,
    pub summary: String,
    pub word_count: usize,
    pub status: NodeStatus,
}

/// Derived per-volume rollup: one digest per qualifying chapter plus the
/// concatenated compiled text. Read-only; recompiled on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeChronicle {
    pub volume_id: String,
    pub project_id: String,
    pub title: String,
    pub chapters: Vec<ChapterDigest>,
    pub compiled: String,
    pub compiled_at: String,
}

/// Reads the volume's chapter children whose status is in `statuses`, ordered
/// by outline order, and folds each chapter's newest snapshot summary into a
/// single compiled document. Chapters without snapshots fall back to their
/// outline summary metadata.
pub fn compile(
    store: &Store,
    volume_id: &str,
    statuses: &[NodeStatus],
) -> Result<VolumeChronicle, ChronicleError> {
    let volume = store
        .get_node(volume_id)?
        .ok_or_else(|| ChronicleError::NotFound(volume_id.to_string()))?;

    let mut chapters = Vec::new();
    for node in store.list_children(&volume.project_id, Some(volume_id))? {
        if node.kind != NodeKind::Chapter || !statuses.contains(&node.status) {
            continue;
        }
        let head = snapshot_chain(store, &node.id)?.into_iter().next();
        let (summary, word_count) = match head {
            Some(snapshot) => (snapshot.summary, snapshot.word_count),
            None => (node.metadata.summary.clone().unwrap_or_default(), 0),
        };
        chapters.push(ChapterDigest {
            chapter_id: node.id,
            chapter_number: chapters.len() + 1,
            title: node.title,
            summary,
            word_count,
            status: node.status,
        });
    }

    let mut compiled = String::new();
    for digest in &chapters {
        compiled.push_str(&format!("## {}. {}\n\n", digest.chapter_number, digest.title));
        if !digest.summary.is_empty() {
            compiled.push_str(&digest.summary);
            compiled.push_str("\n\n");
        }
    }

    Ok(VolumeChronicle {
        volume_id: volume.id,
        project_id: volume.project_id,
        title: volume.title,
        chapters,
        compiled: compiled.trim_end().to_string(),
        compiled_at: now_utc(),
    })
}
