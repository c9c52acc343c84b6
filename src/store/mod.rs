use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use sha2::{Digest, Sha256};

use crate::outline::node::{NodeKind, NodeMetadata, NodeStatus, OutlineNode};
use crate::snapshot::Snapshot;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// SQLite-backed project store. Holds outline nodes and chapter snapshots;
/// all invariant enforcement lives in the engines, the store only moves rows.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        match version {
            0 => {
                self.create_schema_v1()?;
                self.conn.execute_batch("PRAGMA user_version = 1;")?;
                Ok(())
            }
            1 => self.create_schema_v1(),
            _ => Err(rusqlite::Error::InvalidQuery),
        }
    }

    fn create_schema_v1(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS outline_nodes (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                parent_id TEXT,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                status TEXT NOT NULL,
                word_count_goal INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_project
                ON outline_nodes(project_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_parent
                ON outline_nodes(project_id, parent_id);

            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                chapter_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                content_hash TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                diff TEXT NOT NULL,
                parent_snapshot_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_chapter
                ON snapshots(chapter_id);
            ",
        )?;
        Ok(())
    }
}

// Outline node rows.
impl Store {
    pub fn get_node(&self, id: &str) -> rusqlite::Result<Option<OutlineNode>> {
        Self::get_node_on(&self.conn, id)
    }

    pub(crate) fn get_node_on(conn: &Connection, id: &str) -> rusqlite::Result<Option<OutlineNode>> {
        let mut stmt = conn.prepare(
            "SELECT id, project_id, parent_id, kind, title, sort_order, status,
                    word_count_goal, metadata, created_at, updated_at
             FROM outline_nodes WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(node_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Children of one sibling group, sorted ascending by order. A null
    /// parent selects the project's root nodes.
    pub fn list_children(
        &self,
        project_id: &str,
        parent_id: Option<&str>,
    ) -> rusqlite::Result<Vec<OutlineNode>> {
        Self::list_children_on(&self.conn, project_id, parent_id)
    }

    pub(crate) fn list_children_on(
        conn: &Connection,
        project_id: &str,
        parent_id: Option<&str>,
    ) -> rusqlite::Result<Vec<OutlineNode>> {
        let mut stmt = conn.prepare(
            "SELECT id, project_id, parent_id, kind, title, sort_order, status,
                    word_count_goal, metadata, created_at, updated_at
             FROM outline_nodes
             WHERE project_id = ?1 AND parent_id IS ?2
             ORDER BY sort_order ASC",
        )?;
        let mut rows = stmt.query(params![project_id, parent_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(node_from_row(row)?);
        }
        Ok(out)
    }

    /// Every node of a project. No ordering is guaranteed.
    pub fn list_project_nodes(&self, project_id: &str) -> rusqlite::Result<Vec<OutlineNode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, parent_id, kind, title, sort_order, status,
                    word_count_goal, metadata, created_at, updated_at
             FROM outline_nodes WHERE project_id = ?1",
        )?;
        let mut rows = stmt.query(params![project_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(node_from_row(row)?);
        }
        Ok(out)
    }

    pub(crate) fn insert_node_on(conn: &Connection, node: &OutlineNode) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO outline_nodes (
                id, project_id, parent_id, kind, title, sort_order, status,
                word_count_goal, metadata, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                node.id,
                node.project_id,
                node.parent_id,
                node.kind.as_str(),
                node.title,
                node.order,
                node.status.as_str(),
                node.word_count_goal,
                encode_metadata(&node.metadata)?,
                node.created_at,
                node.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Rewrites the caller-mutable fields. Parent and order never move through
    /// this path; `set_placement_on` is the only writer for those.
    pub(crate) fn update_node_fields_on(
        conn: &Connection,
        node: &OutlineNode,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE outline_nodes
             SET title = ?2, status = ?3, word_count_goal = ?4, metadata = ?5,
                 updated_at = ?6
             WHERE id = ?1",
            params![
                node.id,
                node.title,
                node.status.as_str(),
                node.word_count_goal,
                encode_metadata(&node.metadata)?,
                node.updated_at,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn set_placement_on(
        conn: &Connection,
        id: &str,
        parent_id: Option<&str>,
        order: i64,
        updated_at: &str,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE outline_nodes
             SET parent_id = ?2, sort_order = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, parent_id, order, updated_at],
        )?;
        Ok(())
    }

    pub(crate) fn delete_node_row_on(conn: &Connection, id: &str) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM outline_nodes WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub(crate) fn child_ids_on(
        conn: &Connection,
        project_id: &str,
        parent_id: &str,
    ) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT id FROM outline_nodes WHERE project_id = ?1 AND parent_id = ?2",
        )?;
        let mut rows = stmt.query(params![project_id, parent_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get(0)?);
        }
        Ok(out)
    }

    pub(crate) fn sibling_max_order_on(
        conn: &Connection,
        project_id: &str,
        parent_id: Option<&str>,
    ) -> rusqlite::Result<Option<i64>> {
        conn.query_row(
            "SELECT MAX(sort_order) FROM outline_nodes
             WHERE project_id = ?1 AND parent_id IS ?2",
            params![project_id, parent_id],
            |row| row.get(0),
        )
    }

    /// Adds `delta` to every sibling order in the inclusive range `[lo, hi]`.
    pub(crate) fn shift_order_range_on(
        conn: &Connection,
        project_id: &str,
        parent_id: Option<&str>,
        lo: i64,
        hi: i64,
        delta: i64,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE outline_nodes
             SET sort_order = sort_order + ?5
             WHERE project_id = ?1 AND parent_id IS ?2
               AND sort_order >= ?3 AND sort_order <= ?4",
            params![project_id, parent_id, lo, hi, delta],
        )?;
        Ok(())
    }

    /// Opens a slot at `at` in the destination group by pushing every sibling
    /// at or past it one step down.
    pub(crate) fn open_order_slot_on(
        conn: &Connection,
        project_id: &str,
        parent_id: Option<&str>,
        at: i64,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE outline_nodes
             SET sort_order = sort_order + 1
             WHERE project_id = ?1 AND parent_id IS ?2 AND sort_order >= ?3",
            params![project_id, parent_id, at],
        )?;
        Ok(())
    }

    pub(crate) fn count_project_nodes_on(
        conn: &Connection,
        project_id: &str,
    ) -> rusqlite::Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM outline_nodes WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )
    }
}

// Snapshot rows. Inserts only; the versioning layer rejects anything that
// would mutate or branch an existing chain.
impl Store {
    pub fn get_snapshot(&self, id: &str) -> rusqlite::Result<Option<Snapshot>> {
        Self::get_snapshot_on(&self.conn, id)
    }

    pub(crate) fn get_snapshot_on(
        conn: &Connection,
        id: &str,
    ) -> rusqlite::Result<Option<Snapshot>> {
        let mut stmt = conn.prepare(
            "SELECT id, chapter_id, project_id, summary, content_hash, word_count,
                    diff, parent_snapshot_id, created_at
             FROM snapshots WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(snapshot_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Every snapshot of a chapter, oldest insert first. Chain ordering by
    /// parent pointers is the versioning layer's job.
    pub fn snapshots_for_chapter(&self, chapter_id: &str) -> rusqlite::Result<Vec<Snapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, chapter_id, project_id, summary, content_hash, word_count,
                    diff, parent_snapshot_id, created_at
             FROM snapshots WHERE chapter_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query(params![chapter_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(snapshot_from_row(row)?);
        }
        Ok(out)
    }

    pub(crate) fn insert_snapshot_on(
        conn: &Connection,
        snapshot: &Snapshot,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO snapshots (
                id, chapter_id, project_id, summary, content_hash, word_count,
                diff, parent_snapshot_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                snapshot.id,
                snapshot.chapter_id,
                snapshot.project_id,
                snapshot.summary,
                snapshot.content_hash,
                snapshot.word_count as i64,
                serde_json::to_string(&snapshot.diff)
                    .map_err(|err| conversion_error(6, err))?,
                snapshot.parent_snapshot_id,
                snapshot.created_at,
            ],
        )?;
        Ok(())
    }

    pub(crate) fn snapshot_child_count_on(
        conn: &Connection,
        parent_id: &str,
    ) -> rusqlite::Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE parent_snapshot_id = ?1",
            params![parent_id],
            |row| row.get(0),
        )
    }

    pub(crate) fn chapter_snapshot_count_on(
        conn: &Connection,
        chapter_id: &str,
    ) -> rusqlite::Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE chapter_id = ?1",
            params![chapter_id],
            |row| row.get(0),
        )
    }
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<OutlineNode> {
    let kind_raw: String = row.get(3)?;
    let status_raw: String = row.get(6)?;
    let metadata_raw: String = row.get(8)?;
    Ok(OutlineNode {
        id: row.get(0)?,
        project_id: row.get(1)?,
        parent_id: row.get(2)?,
        kind: NodeKind::parse(&kind_raw).ok_or_else(|| {
            conversion_error(3, invalid_data(format!("unknown node kind `{kind_raw}`")))
        })?,
        title: row.get(4)?,
        order: row.get(5)?,
        status: NodeStatus::parse(&status_raw).ok_or_else(|| {
            conversion_error(6, invalid_data(format!("unknown node status `{status_raw}`")))
        })?,
        word_count_goal: row.get(7)?,
        metadata: serde_json::from_str::<NodeMetadata>(&metadata_raw)
            .map_err(|err| conversion_error(8, err))?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let diff_raw: String = row.get(6)?;
    let word_count: i64 = row.get(5)?;
    Ok(Snapshot {
        id: row.get(0)?,
        chapter_id: row.get(1)?,
        project_id: row.get(2)?,
        summary: row.get(3)?,
        content_hash: row.get(4)?,
        word_count: word_count.max(0) as usize,
        diff: serde_json::from_str(&diff_raw).map_err(|err| conversion_error(6, err))?,
        parent_snapshot_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn encode_metadata(metadata: &NodeMetadata) -> rusqlite::Result<String> {
    serde_json::to_string(metadata).map_err(|err| conversion_error(8, err))
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Opaque 32-hex-char identifier: a truncated digest over the seed, the
/// clock, the process id and an in-process counter.
pub fn fresh_id(seed: &str) -> String {
    let epoch_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let material = format!("{seed}\x1f{epoch_nanos}\x1f{}\x1f{counter}", std::process::id());
    let mut id = sha256_hex(&material);
    id.truncate(32);
    id
}

pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::{Store, fresh_id, now_utc, sha256_hex};
    use crate::outline::node::{NodeKind, NodeMetadata, NodeStatus, OutlineNode};

    fn sample_node(id: &str, parent: Option<&str>, order: i64) -> OutlineNode {
        OutlineNode {
            id: id.to_string(),
            project_id: "p1".to_string(),
            parent_id: parent.map(ToOwned::to_owned),
            kind: NodeKind::Chapter,
            title: format!("chapter {id}"),
            order,
            status: NodeStatus::Draft,
            word_count_goal: 0,
            metadata: NodeMetadata::default(),
            created_at: now_utc(),
            updated_at: now_utc(),
        }
    }

    #[test]
    fn node_rows_round_trip() {
        let store = Store::open_in_memory().expect("in-memory sqlite");
        let node = sample_node("n1", None, 0);
        Store::insert_node_on(store.conn(), &node).expect("insert");

        let loaded = store.get_node("n1").expect("get").expect("present");
        assert_eq!(loaded, node);
        assert_eq!(store.get_node("missing").expect("get"), None);
    }

    #[test]
    fn children_are_sorted_by_order() {
        let store = Store::open_in_memory().expect("in-memory sqlite");
        Store::insert_node_on(store.conn(), &sample_node("root", None, 0)).expect("insert");
        Store::insert_node_on(store.conn(), &sample_node("b", Some("root"), 1)).expect("insert");
        Store::insert_node_on(store.conn(), &sample_node("a", Some("root"), 0)).expect("insert");

        let children = store.list_children("p1", Some("root")).expect("list");
        let ids: Vec<&str> = children.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);

        let roots = store.list_children("p1", None).expect("roots");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, "root");
    }

    #[test]
    fn sibling_max_order_distinguishes_groups() {
        let store = Store::open_in_memory().expect("in-memory sqlite");
        Store::insert_node_on(store.conn(), &sample_node("root", None, 4)).expect("insert");
        Store::insert_node_on(store.conn(), &sample_node("c", Some("root"), 7)).expect("insert");

        assert_eq!(
            Store::sibling_max_order_on(store.conn(), "p1", None).expect("max"),
            Some(4)
        );
        assert_eq!(
            Store::sibling_max_order_on(store.conn(), "p1", Some("root")).expect("max"),
            Some(7)
        );
        assert_eq!(
            Store::sibling_max_order_on(store.conn(), "p1", Some("empty")).expect("max"),
            None
        );
    }

    #[test]
    fn reopening_a_database_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("outline.sqlite3");
        {
            let store = Store::open(&path).expect("open");
            Store::insert_node_on(store.conn(), &sample_node("n1", None, 0)).expect("insert");
        }
        let store = Store::open(&path).expect("reopen");
        assert!(store.get_node("n1").expect("get").is_some());
    }

    #[test]
    fn fresh_ids_are_unique_and_hex() {
        let a = fresh_id("seed");
        let b = fresh_id("seed");
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
