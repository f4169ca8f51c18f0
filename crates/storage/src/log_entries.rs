//! Log-entry handler over SQLite
//!
//! Entries live in the `log_entries` table, created on first use. The
//! message map is stored as JSON and the generation time as RFC 3339 text
//! with microsecond precision, so time-range filters compare as strings.
//! Generations are truncated to that precision on the way in and filter
//! bounds are rounded up to it, which keeps SQL filtering in agreement with
//! `LogEntryFilter::matches` on the stored entries.

use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};
use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dbmirror_core::{
    Connection, Error, LogEntry, LogEntryFilter, LogEntryHandler, Result, TableHandler,
};
use tracing::{info, trace};

use crate::store::SqliteStore;

/// Name of the log-entry table
pub const LOG_ENTRY_TABLE: &str = "log_entries";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS log_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host TEXT NOT NULL,
    ip TEXT NOT NULL,
    entry_type TEXT NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    generation TEXT NOT NULL,
    message TEXT NOT NULL
)";

const SELECT_COLUMNS: &str = "id, host, ip, entry_type, status, source, generation, message";

/// Row as read from SQLite, before decoding
type RawEntry = (i64, String, String, String, String, String, String, String);

/// `LogEntryHandler` backed by a `SqliteStore`
pub struct SqliteLogEntries {
    connection: Connection,
    store: Arc<SqliteStore>,
    debug: AtomicBool,
}

impl SqliteLogEntries {
    /// Create a handler for `connection`, creating the table if needed
    pub fn open(connection: Connection, store: Arc<SqliteStore>) -> Result<Self> {
        store.with_conn(|conn| conn.execute_batch(CREATE_TABLE))?;
        Ok(Self {
            connection,
            store,
            debug: AtomicBool::new(false),
        })
    }

    fn log_op(&self, op: &'static str, detail: &dyn std::fmt::Debug) {
        if self.debug() {
            info!(target: "dbmirror::sqlite", url = self.connection.url(), op, ?detail, "Log entry operation");
        } else {
            trace!(target: "dbmirror::sqlite", url = self.connection.url(), op, ?detail, "Log entry operation");
        }
    }

    fn select_raw(&self, filter: &LogEntryFilter) -> Result<Vec<RawEntry>> {
        let (clause, params) = where_clause(filter);
        let mut sql = format!("SELECT {} FROM {}{} ORDER BY id", SELECT_COLUMNS, LOG_ENTRY_TABLE, clause);
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), read_raw)?
                .collect::<rusqlite::Result<Vec<_>>>();
            rows
        })
    }
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn decode(raw: RawEntry) -> Result<LogEntry> {
    let (id, host, ip, entry_type, status, source, generation, message) = raw;
    let generation = DateTime::parse_from_rfc3339(&generation)
        .map_err(|e| Error::Serialization(format!("invalid generation '{}': {}", generation, e)))?
        .with_timezone(&Utc);
    let message: BTreeMap<String, String> = serde_json::from_str(&message)?;
    Ok(LogEntry {
        id: Some(id),
        host,
        ip,
        entry_type,
        status,
        source,
        generation,
        message,
    })
}

fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `time` as stored: sub-microsecond digits dropped
fn truncate_micros(time: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = time.nanosecond();
    time.with_nanosecond(nanos - nanos % 1_000).unwrap_or(time)
}

/// Smallest storable time not before `time`
fn ceil_micros(time: DateTime<Utc>) -> DateTime<Utc> {
    let floor = truncate_micros(time);
    if floor < time {
        floor + Duration::microseconds(1)
    } else {
        floor
    }
}

/// Build ` WHERE ...` (or an empty string) plus its positional parameters
fn where_clause(filter: &LogEntryFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if !filter.entry_types.is_empty() {
        let marks = vec!["?"; filter.entry_types.len()].join(", ");
        conditions.push(format!("entry_type IN ({})", marks));
        params.extend(filter.entry_types.iter().cloned().map(Value::Text));
    }
    if let Some(status) = &filter.status {
        conditions.push("status = ?".to_string());
        params.push(Value::Text(status.clone()));
    }
    if let Some(source) = &filter.source {
        conditions.push("source = ?".to_string());
        params.push(Value::Text(source.clone()));
    }
    if let Some(since) = &filter.since {
        conditions.push("generation >= ?".to_string());
        params.push(Value::Text(encode_time(&ceil_micros(*since))));
    }
    if let Some(until) = &filter.until {
        conditions.push("generation < ?".to_string());
        params.push(Value::Text(encode_time(&ceil_micros(*until))));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

impl TableHandler for SqliteLogEntries {
    fn table_name(&self) -> &str {
        LOG_ENTRY_TABLE
    }

    fn connection(&self) -> &Connection {
        &self.connection
    }

    fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    fn set_debug(&self, value: bool) {
        self.debug.store(value, Ordering::Relaxed);
    }
}

impl LogEntryHandler for SqliteLogEntries {
    fn exists(&self, id: i64) -> Result<bool> {
        self.store.with_conn(|conn| {
            conn.prepare_cached("SELECT 1 FROM log_entries WHERE id = ?1")?
                .exists([id])
        })
    }

    fn load(&self, id: i64) -> Result<Option<LogEntry>> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", SELECT_COLUMNS, LOG_ENTRY_TABLE);
        let raw = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut rows = stmt.query([id])?;
            let raw = match rows.next()? {
                Some(row) => Some(read_raw(row)?),
                None => None,
            };
            Ok(raw)
        })?;
        raw.map(decode).transpose()
    }

    fn load_filtered(&self, filter: &LogEntryFilter) -> Result<Vec<LogEntry>> {
        self.select_raw(filter)?.into_iter().map(decode).collect()
    }

    fn count(&self) -> Result<usize> {
        let n: i64 = self
            .store
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM log_entries", [], |r| r.get(0)))?;
        usize::try_from(n).map_err(|e| Error::internal(e.to_string()))
    }

    fn add(&self, entry: &LogEntry) -> Result<LogEntry> {
        self.log_op("add", entry);
        let message = serde_json::to_string(&entry.message)?;
        let id = self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO log_entries (host, ip, entry_type, status, source, generation, message) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    entry.host,
                    entry.ip,
                    entry.entry_type,
                    entry.status,
                    entry.source,
                    encode_time(&entry.generation),
                    message,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        let generation = truncate_micros(entry.generation);
        Ok(entry.clone().with_generation(generation).with_id(id))
    }

    fn update(&self, entry: &LogEntry) -> Result<bool> {
        self.log_op("update", entry);
        let id = match entry.id {
            Some(id) => id,
            None => return Ok(false),
        };
        let message = serde_json::to_string(&entry.message)?;
        let changed = self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE log_entries SET host = ?1, ip = ?2, entry_type = ?3, status = ?4, \
                 source = ?5, generation = ?6, message = ?7 WHERE id = ?8",
                rusqlite::params![
                    entry.host,
                    entry.ip,
                    entry.entry_type,
                    entry.status,
                    entry.source,
                    encode_time(&entry.generation),
                    message,
                    id,
                ],
            )
        })?;
        Ok(changed > 0)
    }

    fn remove(&self, id: i64) -> Result<bool> {
        self.log_op("remove", &id);
        let changed = self
            .store
            .with_conn(|conn| conn.execute("DELETE FROM log_entries WHERE id = ?1", [id]))?;
        Ok(changed > 0)
    }

    fn remove_filtered(&self, filter: &LogEntryFilter) -> Result<usize> {
        self.log_op("remove_filtered", filter);
        let (clause, params) = where_clause(filter);
        let mut selection = format!("SELECT id FROM {}{} ORDER BY id", LOG_ENTRY_TABLE, clause);
        if let Some(limit) = filter.limit {
            selection.push_str(&format!(" LIMIT {}", limit));
        }
        let sql = format!("DELETE FROM {} WHERE id IN ({})", LOG_ENTRY_TABLE, selection);
        self.store
            .with_conn(|conn| conn.execute(&sql, rusqlite::params_from_iter(params)))
    }

    fn truncate(&self) -> Result<()> {
        self.log_op("truncate", &LOG_ENTRY_TABLE);
        self.store
            .with_conn(|conn| conn.execute("DELETE FROM log_entries", []).map(|_| ()))
    }
}
