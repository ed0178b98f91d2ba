//! Local Replica Storage
//!
//! SQLite-backed replica of billing and inventory records. One table per
//! [`EntityKind`], each row carrying the record's sync status, plus a
//! metadata table for sync bookkeeping. The outbound queue lives in the same
//! database file (see [`super::queue`]).

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

use super::record::{EntityKind, Record, SyncStatus};
use super::resolver::{resolve_conflicts, Resolution, Strategy, Winner};
use crate::error::Result;

const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

/// Predicate for [`LocalStore::query`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordQuery {
    /// Every record of the kind
    All,
    /// Business code starting with the given prefix (ASCII case-insensitive)
    CodePrefix(String),
    /// Name starting with the given prefix (ASCII case-insensitive)
    NamePrefix(String),
    /// `updatedAt` within `[from, to]`, oldest first
    UpdatedBetween {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    Status(SyncStatus),
}

/// Local SQLite storage for replicated records
pub struct LocalStore {
    pub(super) conn: Connection,
}

impl LocalStore {
    /// Open or create a local store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a throwaway store that lives only as long as the connection
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a local store in the default location (user data directory)
    pub fn open_default(app_name: &str) -> Result<Self> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
            })
            .join(app_name);

        std::fs::create_dir_all(&data_dir)?;
        Self::open(data_dir.join("replica.db"))
    }

    fn init_schema(&mut self) -> Result<()> {
        for kind in EntityKind::ALL {
            let table = kind.table();
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    code TEXT,
                    name TEXT,
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    sync_status TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_code ON {table}(code);
                CREATE INDEX IF NOT EXISTS idx_{table}_name ON {table}(name);
                CREATE INDEX IF NOT EXISTS idx_{table}_updated_at ON {table}(updated_at);
                CREATE INDEX IF NOT EXISTS idx_{table}_sync_status ON {table}(sync_status);"
            ))?;
        }

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        self.init_queue_schema()?;
        Ok(())
    }

    // === Record Operations ===

    /// Get a record by id
    pub fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, payload, updated_at, sync_status FROM {} WHERE id = ?1",
            kind.table()
        ))?;

        let record = stmt.query_row(params![id], record_from_row).optional()?;
        Ok(record)
    }

    /// Store a record, replacing any existing row with the same id
    pub fn put(&mut self, kind: EntityKind, record: &Record) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;

        self.conn.execute(
            &format!(
                "INSERT INTO {} (id, code, name, payload, updated_at, sync_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                 code = excluded.code,
                 name = excluded.name,
                 payload = excluded.payload,
                 updated_at = excluded.updated_at,
                 sync_status = excluded.sync_status",
                kind.table()
            ),
            params![
                record.id,
                record.code(),
                record.name(),
                payload,
                record.updated_at.timestamp_millis(),
                record.sync_status.as_str(),
            ],
        )?;

        Ok(())
    }

    /// Remove a record. Returns whether a row existed.
    pub fn delete(&mut self, kind: EntityKind, id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
            params![id],
        )?;
        Ok(removed > 0)
    }

    /// Records matching a lookup predicate
    pub fn query(&self, kind: EntityKind, query: &RecordQuery) -> Result<Vec<Record>> {
        let table = kind.table();
        let columns = "id, payload, updated_at, sync_status";

        let records = match query {
            RecordQuery::All => self.select(
                &format!("SELECT {columns} FROM {table} ORDER BY id"),
                params![],
            )?,
            RecordQuery::CodePrefix(prefix) => self.select(
                &format!(
                    "SELECT {columns} FROM {table} WHERE code LIKE ?1 ESCAPE '\\' ORDER BY id"
                ),
                params![like_prefix(prefix)],
            )?,
            RecordQuery::NamePrefix(prefix) => self.select(
                &format!(
                    "SELECT {columns} FROM {table} WHERE name LIKE ?1 ESCAPE '\\' ORDER BY id"
                ),
                params![like_prefix(prefix)],
            )?,
            RecordQuery::UpdatedBetween { from, to } => self.select(
                &format!(
                    "SELECT {columns} FROM {table}
                     WHERE updated_at >= ?1 AND updated_at <= ?2
                     ORDER BY updated_at, id"
                ),
                params![from.timestamp_millis(), to.timestamp_millis()],
            )?,
            RecordQuery::Status(status) => self.filter_by_status(kind, *status)?,
        };

        Ok(records)
    }

    /// All records of a kind with the given sync status
    pub fn filter_by_status(&self, kind: EntityKind, status: SyncStatus) -> Result<Vec<Record>> {
        self.select(
            &format!(
                "SELECT id, payload, updated_at, sync_status FROM {}
                 WHERE sync_status = ?1 ORDER BY id",
                kind.table()
            ),
            params![status.as_str()],
        )
    }

    /// Number of records of a kind, optionally restricted to one status
    pub fn count(&self, kind: EntityKind, status: Option<SyncStatus>) -> Result<usize> {
        let count: i64 = match status {
            Some(status) => self.conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE sync_status = ?1",
                    kind.table()
                ),
                params![status.as_str()],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", kind.table()),
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    fn select(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, record_from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // === Merge ===

    /// Merge one kind's server changes into the replica.
    ///
    /// Changes for records with a queued delete are dropped. Only records the
    /// server touched are considered; a local winner stays as stored, and a
    /// server winner takes over the row and supersedes the record's queued
    /// creates and updates. Callers must hold the store for the whole call.
    pub fn merge_remote(
        &mut self,
        kind: EntityKind,
        server_changes: Vec<Record>,
        strategy: Strategy,
    ) -> Result<Resolution> {
        let deleted: HashSet<String> = self.queued_deletes(kind)?.into_iter().collect();
        let server: Vec<Record> = server_changes
            .into_iter()
            .filter(|r| !deleted.contains(&r.id))
            .collect();
        if server.is_empty() {
            return Ok(Resolution::default());
        }

        let pending: Vec<Record> = {
            let touched: HashSet<&str> = server.iter().map(|r| r.id.as_str()).collect();
            self.filter_by_status(kind, SyncStatus::Pending)?
                .into_iter()
                .filter(|r| touched.contains(r.id.as_str()))
                .collect()
        };

        let resolution = resolve_conflicts(kind, pending, server, strategy);

        for record in resolution
            .merged
            .iter()
            .filter(|r| r.sync_status == SyncStatus::Synced)
        {
            self.put(kind, record)?;
        }
        for conflict in &resolution.conflicts {
            if conflict.winner == Winner::Server {
                self.discard_superseded(kind, conflict.id())?;
            }
        }

        Ok(resolution)
    }

    // === Metadata ===

    /// Set a metadata value
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        self.conn.execute(
            "INSERT INTO sync_metadata (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
            params![key, value, now],
        )?;

        Ok(())
    }

    /// Get a metadata value
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// When the last fully successful sync cycle started pulling
    pub fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let value = self.get_metadata(LAST_SYNC_TIME_KEY)?;
        Ok(value.and_then(|v| {
            DateTime::parse_from_rfc3339(&v)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }

    pub fn set_last_sync_time(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.set_metadata(LAST_SYNC_TIME_KEY, &at.to_rfc3339())
    }

    /// Close the database connection
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

pub(super) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let payload_str: String = row.get(1)?;
    let updated_at: i64 = row.get(2)?;
    let status_str: String = row.get(3)?;

    let payload: Map<String, Value> = serde_json::from_str(&payload_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let sync_status = status_str
        .parse::<SyncStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Record {
        id,
        updated_at: millis_to_datetime(updated_at),
        sync_status,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::queue::Operation;
    use chrono::TimeZone;
    use serde_json::json;

    fn create_test_store() -> LocalStore {
        LocalStore::open_in_memory().unwrap()
    }

    fn item(id: &str, code: &str, name: &str, millis: i64) -> Record {
        let payload = json!({"code": code, "name": name, "qty": 1});
        Record {
            id: id.to_string(),
            updated_at: Utc.timestamp_millis_opt(millis).unwrap(),
            sync_status: SyncStatus::Synced,
            payload: payload.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn test_record_storage() {
        let mut store = create_test_store();
        let record = item("item-1", "SKU-1", "Widget", 1_000);

        store.put(EntityKind::Items, &record).unwrap();

        let retrieved = store.get(EntityKind::Items, "item-1").unwrap().unwrap();
        assert_eq!(retrieved, record);

        // Kinds are separate tables
        assert!(store.get(EntityKind::Billings, "item-1").unwrap().is_none());

        assert!(store.delete(EntityKind::Items, "item-1").unwrap());
        assert!(store.get(EntityKind::Items, "item-1").unwrap().is_none());
        assert!(!store.delete(EntityKind::Items, "item-1").unwrap());
    }

    #[test]
    fn test_put_overwrites_whole_record() {
        let mut store = create_test_store();
        store
            .put(EntityKind::Items, &item("item-1", "SKU-1", "Widget", 1_000))
            .unwrap();

        let mut newer = item("item-1", "SKU-9", "Gadget", 2_000).pending();
        newer.payload.remove("qty");
        store.put(EntityKind::Items, &newer).unwrap();

        let retrieved = store.get(EntityKind::Items, "item-1").unwrap().unwrap();
        assert_eq!(retrieved.code(), Some("SKU-9"));
        assert!(retrieved.is_pending());
        assert!(!retrieved.payload.contains_key("qty"));
        assert_eq!(store.count(EntityKind::Items, None).unwrap(), 1);
    }

    #[test]
    fn test_filter_by_status() {
        let mut store = create_test_store();
        store
            .put(EntityKind::Billings, &item("b-1", "INV-1", "Acme", 1_000))
            .unwrap();
        store
            .put(EntityKind::Billings, &item("b-2", "INV-2", "Acme", 1_000).pending())
            .unwrap();

        let pending = store
            .filter_by_status(EntityKind::Billings, SyncStatus::Pending)
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b-2");
        assert_eq!(
            store
                .count(EntityKind::Billings, Some(SyncStatus::Synced))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_prefix_queries() {
        let mut store = create_test_store();
        store
            .put(EntityKind::Items, &item("1", "SKU-100", "Bolt", 1_000))
            .unwrap();
        store
            .put(EntityKind::Items, &item("2", "SKU-200", "Nut", 1_000))
            .unwrap();
        store
            .put(EntityKind::Items, &item("3", "SK_U", "Bracket", 1_000))
            .unwrap();

        let by_code = store
            .query(EntityKind::Items, &RecordQuery::CodePrefix("SKU-1".into()))
            .unwrap();
        assert_eq!(by_code.len(), 1);
        assert_eq!(by_code[0].id, "1");

        // Wildcards in the prefix are literal
        let literal = store
            .query(EntityKind::Items, &RecordQuery::CodePrefix("SK_".into()))
            .unwrap();
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].id, "3");

        let by_name = store
            .query(EntityKind::Items, &RecordQuery::NamePrefix("b".into()))
            .unwrap();
        let ids: Vec<_> = by_name.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn test_updated_between_query() {
        let mut store = create_test_store();
        store
            .put(EntityKind::Items, &item("late", "C", "C", 3_000))
            .unwrap();
        store
            .put(EntityKind::Items, &item("early", "A", "A", 1_000))
            .unwrap();
        store
            .put(EntityKind::Items, &item("mid", "B", "B", 2_000))
            .unwrap();

        let range = RecordQuery::UpdatedBetween {
            from: Utc.timestamp_millis_opt(1_500).unwrap(),
            to: Utc.timestamp_millis_opt(3_000).unwrap(),
        };
        let ids: Vec<_> = store
            .query(EntityKind::Items, &range)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["mid", "late"]);
    }

    #[test]
    fn test_metadata() {
        let mut store = create_test_store();

        store.set_metadata("test_key", "test_value").unwrap();
        let value = store.get_metadata("test_key").unwrap().unwrap();
        assert_eq!(value, "test_value");

        assert!(store.last_sync_time().unwrap().is_none());
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        store.set_last_sync_time(at).unwrap();
        assert_eq!(store.last_sync_time().unwrap(), Some(at));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");

        {
            let mut store = LocalStore::open(&path).unwrap();
            store
                .put(EntityKind::Items, &item("item-1", "SKU-1", "Widget", 1_000))
                .unwrap();
            store.close().unwrap();
        }

        let store = LocalStore::open(&path).unwrap();
        assert!(store.get(EntityKind::Items, "item-1").unwrap().is_some());
    }

    fn pending(record: Record) -> Record {
        Record {
            sync_status: SyncStatus::Pending,
            ..record
        }
    }

    #[test]
    fn test_merge_leaves_untouched_pending_records_alone() {
        let mut store = create_test_store();
        let local = pending(item("local-1", "SKU-1", "Draft", 5_000));
        store.put(EntityKind::Items, &local).unwrap();
        store
            .enqueue(EntityKind::Items, Operation::Create, &local)
            .unwrap();

        let resolution = store
            .merge_remote(
                EntityKind::Items,
                vec![item("srv-1", "SKU-2", "Server", 1_000)],
                Strategy::Smart,
            )
            .unwrap();

        assert_eq!(resolution.merged.len(), 1);
        assert_eq!(resolution.synced_count(), 1);
        assert!(resolution.conflicts.is_empty());
        assert_eq!(store.get(EntityKind::Items, "local-1").unwrap(), Some(local));
        assert_eq!(store.queue_len().unwrap(), 1);
        assert_eq!(
            store.get(EntityKind::Items, "srv-1").unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[test]
    fn test_merge_skips_records_with_queued_delete() {
        let mut store = create_test_store();
        store
            .enqueue(
                EntityKind::Items,
                Operation::Delete,
                &item("gone", "SKU-1", "Gone", 1_000),
            )
            .unwrap();

        let resolution = store
            .merge_remote(
                EntityKind::Items,
                vec![item("gone", "SKU-1", "Still here", 9_000)],
                Strategy::Server,
            )
            .unwrap();

        assert!(resolution.merged.is_empty());
        assert!(store.get(EntityKind::Items, "gone").unwrap().is_none());
        assert_eq!(store.queue_len().unwrap(), 1);
    }

    #[test]
    fn test_merge_server_winner_drops_stale_writes() {
        let mut store = create_test_store();
        let local = pending(item("item-1", "SKU-1", "Local", 1_000));
        store.put(EntityKind::Items, &local).unwrap();
        store
            .enqueue(EntityKind::Items, Operation::Create, &local)
            .unwrap();
        store
            .enqueue(EntityKind::Items, Operation::Update, &local)
            .unwrap();

        let resolution = store
            .merge_remote(
                EntityKind::Items,
                vec![item("item-1", "SKU-1", "Server", 2_000)],
                Strategy::Smart,
            )
            .unwrap();

        assert_eq!(resolution.conflicts.len(), 1);
        assert_eq!(resolution.conflicts[0].winner, Winner::Server);
        let stored = store.get(EntityKind::Items, "item-1").unwrap().unwrap();
        assert_eq!(stored.name(), Some("Server"));
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(store.queue_len().unwrap(), 0);
    }

    #[test]
    fn test_unknown_sync_status_is_reported_as_corrupt() {
        let store = create_test_store();
        store
            .conn
            .execute(
                "INSERT INTO items (id, code, name, payload, updated_at, sync_status)
                 VALUES ('item-1', 'SKU-1', 'Widget', '{}', 0, 'archived')",
                [],
            )
            .unwrap();

        let err = store.get(EntityKind::Items, "item-1").unwrap_err();
        assert!(err.to_string().contains("Corrupt local data"), "{}", err);
    }
}
