//! SQLite backend
//!
//! Resources are stored as JSON documents next to the few columns queries
//! narrow on (type, editor). The database runs in WAL mode with one writer
//! connection and one reader connection, so reads see the last committed state
//! while a batch is being written.

use crate::error::{Error, Result};
use crate::query::Query;
use crate::resource::{InternalId, LinkRecord, LinkType, Resource};
use crate::store::sealed::Commit;
use crate::store::{CommitBatch, CommitTarget, CommittedItem, LinkFilter, StoreBackend, run_commit};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS resources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        resource_type TEXT NOT NULL,
        editor_name TEXT,
        document TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_resources_type ON resources(resource_type);

    CREATE TABLE IF NOT EXISTS links (
        from_id INTEGER NOT NULL,
        link_type TEXT NOT NULL,
        to_id INTEGER NOT NULL,
        PRIMARY KEY (from_id, link_type, to_id)
    );

    CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_id);

    CREATE TABLE IF NOT EXISTS tags (
        resource_id INTEGER NOT NULL,
        tag_name TEXT NOT NULL,
        PRIMARY KEY (resource_id, tag_name)
    );

    CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(tag_name);
";

/// Graph persisted in a SQLite database file.
pub struct SqliteStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(db_path)?;
        writer.busy_timeout(Duration::from_secs(5))?;
        let mode: String = writer.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        log::debug!("Opened graph database {} (journal {mode})", db_path.display());
        writer.execute_batch(SCHEMA)?;

        let reader = Connection::open(db_path)?;
        reader.busy_timeout(Duration::from_secs(5))?;

        Ok(Self {
            path: db_path.to_path_buf(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| Error::Poisoned("sqlite reader"))
    }
}

fn decode(internal_id: InternalId, document: &str) -> Result<Resource> {
    let resource: Resource = serde_json::from_str(document)?;
    Ok(resource.with_internal_id(internal_id))
}

fn encode(resource: &Resource) -> Result<String> {
    Ok(serde_json::to_string(&resource.detached())?)
}

fn load_resource(conn: &Connection, internal_id: InternalId) -> Result<Option<Resource>> {
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM resources WHERE id = ?1",
            [internal_id],
            |row| row.get(0),
        )
        .optional()?;
    document.map(|doc| decode(internal_id, &doc)).transpose()
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl CommitTarget for Transaction<'_> {
    fn load(&self, internal_id: InternalId) -> Result<Resource> {
        load_resource(self, internal_id)?
            .ok_or_else(|| Error::validation(format!("resource #{internal_id} does not exist")))
    }

    fn insert_resource(&mut self, resource: &Resource) -> Result<InternalId> {
        self.execute(
            "INSERT INTO resources (resource_type, editor_name, document) VALUES (?1, ?2, ?3)",
            params![
                resource.resource_type,
                resource.editor_name,
                encode(resource)?
            ],
        )?;
        Ok(self.last_insert_rowid())
    }

    fn replace_resource(&mut self, internal_id: InternalId, resource: &Resource) -> Result<()> {
        let changed = self.execute(
            "UPDATE resources SET resource_type = ?1, editor_name = ?2, document = ?3 WHERE id = ?4",
            params![
                resource.resource_type,
                resource.editor_name,
                encode(resource)?,
                internal_id
            ],
        )?;
        if changed == 0 {
            return Err(Error::validation(format!(
                "resource #{internal_id} does not exist"
            )));
        }
        Ok(())
    }

    fn remove_resource(&mut self, internal_id: InternalId) -> Result<()> {
        self.execute(
            "DELETE FROM links WHERE from_id = ?1 OR to_id = ?1",
            [internal_id],
        )?;
        self.execute("DELETE FROM tags WHERE resource_id = ?1", [internal_id])?;
        self.execute("DELETE FROM resources WHERE id = ?1", [internal_id])?;
        Ok(())
    }

    fn insert_link(&mut self, record: &LinkRecord) -> Result<()> {
        self.execute(
            "INSERT OR IGNORE INTO links (from_id, link_type, to_id) VALUES (?1, ?2, ?3)",
            params![record.from_id, record.link_type.as_str(), record.to_id],
        )?;
        Ok(())
    }

    fn remove_link(&mut self, record: &LinkRecord) -> Result<()> {
        self.execute(
            "DELETE FROM links WHERE from_id = ?1 AND link_type = ?2 AND to_id = ?3",
            params![record.from_id, record.link_type.as_str(), record.to_id],
        )?;
        Ok(())
    }

    fn insert_tag(&mut self, internal_id: InternalId, tag_name: &str) -> Result<()> {
        self.execute(
            "INSERT OR IGNORE INTO tags (resource_id, tag_name) VALUES (?1, ?2)",
            params![internal_id, tag_name],
        )?;
        Ok(())
    }

    fn remove_tag(&mut self, internal_id: InternalId, tag_name: &str) -> Result<()> {
        self.execute(
            "DELETE FROM tags WHERE resource_id = ?1 AND tag_name = ?2",
            params![internal_id, tag_name],
        )?;
        Ok(())
    }
}

impl StoreBackend for SqliteStore {
    fn find(&self, query: &Query) -> Result<Vec<Resource>> {
        let mut sql = String::from("SELECT id, document FROM resources WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(resource_type) = query.resource_type() {
            sql.push_str(" AND resource_type = ?");
            values.push(Value::Text(resource_type.to_string()));
        }
        if let Some(editor) = query.editor_name() {
            sql.push_str(" AND editor_name = ?");
            values.push(Value::Text(editor.to_string()));
        }
        for tag in query.required_tags() {
            sql.push_str(" AND id IN (SELECT resource_id FROM tags WHERE tag_name = ?)");
            values.push(Value::Text(tag.clone()));
        }
        if let Some(ids) = query.required_ids() {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND id IN ({})", placeholders(ids.len())));
            values.extend(ids.iter().map(|id| Value::Integer(*id)));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        // Property predicates run in Rust so both backends share their semantics
        let mut result = Vec::new();
        for row in rows {
            let (id, document) = row?;
            let resource = decode(id, &document)?;
            if query.matches_properties(&resource) {
                result.push(resource);
            }
        }
        Ok(result)
    }

    fn find_by_id(&self, internal_id: InternalId) -> Result<Option<Resource>> {
        let conn = self.reader()?;
        load_resource(&conn, internal_id)
    }

    fn find_links(&self, filter: &LinkFilter) -> Result<Vec<LinkRecord>> {
        let mut sql = String::from("SELECT from_id, link_type, to_id FROM links WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();
        if let Some(from_id) = filter.from_id {
            sql.push_str(" AND from_id = ?");
            values.push(Value::Integer(from_id));
        }
        if let Some(link_type) = filter.link_type {
            sql.push_str(" AND link_type = ?");
            values.push(Value::Text(link_type.as_str().to_string()));
        }
        if let Some(to_id) = filter.to_id {
            sql.push_str(" AND to_id = ?");
            values.push(Value::Integer(to_id));
        }
        sql.push_str(" ORDER BY from_id, link_type, to_id");

        let conn = self.reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (from_id, link_type, to_id) = row?;
            result.push(LinkRecord {
                from_id,
                link_type: link_type.parse::<LinkType>()?,
                to_id,
            });
        }
        // Text order of link types differs from enum order; keep the in-memory order
        result.sort();
        Ok(result)
    }

    fn tags_of(&self, internal_id: InternalId) -> Result<BTreeSet<String>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT tag_name FROM tags WHERE resource_id = ?1")?;
        let rows = stmt.query_map([internal_id], |row| row.get::<_, String>(0))?;
        let mut tags = BTreeSet::new();
        for tag in rows {
            tags.insert(tag?);
        }
        Ok(tags)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

impl Commit for SqliteStore {
    fn commit(
        &self,
        batch: &CommitBatch,
        on_item: &mut dyn FnMut(&CommittedItem) -> Result<()>,
    ) -> Result<Vec<Resource>> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| Error::Poisoned("sqlite writer"))?;
        let mut tx = conn.transaction()?;
        // Dropping the transaction on error rolls it back
        let added = run_commit(&mut tx, batch, on_item)?;
        tx.commit()?;
        Ok(added)
    }
}
