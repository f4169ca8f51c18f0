//! Test doubles for the mirroring layer
//!
//! - **RecordingBackend**: `Backend` whose handlers journal every call
//! - **CallJournal**: Ordered record of (store URL, operation, argument)
//! - **Gate**: Holds writes to, or the opening of, one store until released
//!
//! # Example
//!
//! ```ignore
//! let backend = Arc::new(RecordingBackend::new("b1"));
//! backend.fail_writes_for("db://mirror/a");
//! let gate = backend.hold_writes_for("db://mirror/b");
//! // ... drive handlers ...
//! assert!(backend.journal().calls_for("db://mirror/a").is_empty());
//! ```

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbmirror_core::{
    Backend, Connection, ConnectionIdentity, Error, LogEntry, LogEntryFilter, LogEntryHandler,
    ResultSet, Result, SqlHandler, SqlValue, TableHandler,
};

/// One recorded handler call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// URL of the store that received the call
    pub url: String,
    /// Operation name
    pub op: &'static str,
    /// Main argument, rendered
    pub arg: String,
}

/// Ordered journal of handler calls, shareable across backends
#[derive(Debug, Default)]
pub struct CallJournal {
    calls: Mutex<Vec<Call>>,
}

impl CallJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, url: &str, op: &'static str, arg: String) {
        self.calls.lock().push(Call {
            url: url.to_string(),
            op,
            arg,
        });
    }

    /// All calls in order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Calls received by the store at `url`
    pub fn calls_for(&self, url: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url == url)
            .cloned()
            .collect()
    }

    /// Number of calls
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Forget all calls
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

/// Blocks the calls it guards until opened
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn pass(&self) {
        let mut state = self.state.lock();
        state.waiting += 1;
        self.changed.notify_all();
        while !state.open {
            self.changed.wait(&mut state);
        }
        state.waiting -= 1;
    }

    /// Wait until `count` calls are blocked on the gate
    ///
    /// Returns false if that did not happen within `timeout`.
    pub fn wait_for_waiters(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.waiting < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.waiting >= count;
            }
        }
        true
    }

    /// Number of calls currently blocked
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Release blocked calls and let future ones through
    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }
}

#[derive(Debug, Default)]
struct Behavior {
    journal: Arc<CallJournal>,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    open_gates: Mutex<HashMap<String, Arc<Gate>>>,
}

/// Handler double serving both table kinds for one connection
pub struct RecordingStore {
    backend: String,
    connection: Connection,
    behavior: Arc<Behavior>,
    debug: AtomicBool,
    statements: Mutex<Vec<String>>,
    entries: Mutex<BTreeMap<i64, LogEntry>>,
    next_id: AtomicI64,
}

impl RecordingStore {
    fn new(backend: &str, connection: Connection, behavior: Arc<Behavior>) -> Self {
        Self {
            backend: backend.to_string(),
            connection,
            behavior,
            debug: AtomicBool::new(false),
            statements: Mutex::new(Vec::new()),
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Statements written so far
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Log entries stored so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().values().cloned().collect()
    }

    fn read(&self, op: &'static str, arg: impl ToString) {
        self.behavior
            .journal
            .record(self.connection.url(), op, arg.to_string());
    }

    fn write(&self, op: &'static str, arg: impl ToString) -> Result<()> {
        let url = self.connection.url();
        self.behavior.journal.record(url, op, arg.to_string());
        let gate = self.behavior.gates.lock().get(url).cloned();
        if let Some(gate) = gate {
            gate.pass();
        }
        if self.behavior.failing.lock().contains(url) {
            return Err(Error::store(&self.backend, format!("{} rejected by {}", op, url)));
        }
        Ok(())
    }

    fn record_statement(&self, statement: String) -> usize {
        let mut statements = self.statements.lock();
        statements.push(statement);
        statements.len()
    }
}

impl TableHandler for RecordingStore {
    fn table_name(&self) -> &str {
        "recording"
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

impl SqlHandler for RecordingStore {
    fn table_exists(&self, table: &str) -> Result<bool> {
        self.read("table_exists", table);
        Ok(self.statements.lock().iter().any(|s| s.contains(table)))
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        self.read("column_exists", format!("{}.{}", table, column));
        Ok(self
            .statements
            .lock()
            .iter()
            .any(|s| s.contains(table) && s.contains(column)))
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        self.read("list_tables", "");
        Ok(Vec::new())
    }

    fn select(&self, columns: &str, tables: &str, _where: Option<&str>) -> Result<ResultSet> {
        self.read("select", format!("{} FROM {}", columns, tables));
        Ok(self.statement_rows())
    }

    fn select_distinct(&self, columns: &str, tables: &str, _where: Option<&str>) -> Result<ResultSet> {
        self.read("select_distinct", format!("{} FROM {}", columns, tables));
        Ok(self.statement_rows())
    }

    fn query(&self, sql: &str) -> Result<ResultSet> {
        self.read("query", sql);
        Ok(self.statement_rows())
    }

    fn execute(&self, sql: &str) -> Result<bool> {
        self.write("execute", sql)?;
        self.record_statement(sql.to_string());
        Ok(false)
    }

    fn execute_generated_keys(&self, sql: &str) -> Result<ResultSet> {
        self.write("execute_generated_keys", sql)?;
        let key = self.record_statement(sql.to_string());
        let mut keys = ResultSet::new(vec!["generated_key".to_string()]);
        keys.push_row(vec![SqlValue::Integer(key as i64)]);
        Ok(keys)
    }

    fn update(&self, assignments: &str, table: &str, where_clause: &str) -> Result<usize> {
        let statement = format!("UPDATE {} SET {} WHERE {}", table, assignments, where_clause);
        self.write("update", &statement)?;
        self.record_statement(statement);
        Ok(1)
    }

    fn truncate(&self, table: &str) -> Result<()> {
        self.write("truncate", table)?;
        self.record_statement(format!("TRUNCATE {}", table));
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.write("drop", table)?;
        self.record_statement(format!("DROP TABLE {}", table));
        Ok(())
    }
}

impl RecordingStore {
    fn statement_rows(&self) -> ResultSet {
        let mut rows = ResultSet::new(vec!["statement".to_string()]);
        for s in self.statements.lock().iter() {
            rows.push_row(vec![SqlValue::Text(s.clone())]);
        }
        rows
    }
}

impl LogEntryHandler for RecordingStore {
    fn exists(&self, id: i64) -> Result<bool> {
        self.read("exists", id);
        Ok(self.entries.lock().contains_key(&id))
    }

    fn load(&self, id: i64) -> Result<Option<LogEntry>> {
        self.read("load", id);
        Ok(self.entries.lock().get(&id).cloned())
    }

    fn load_filtered(&self, filter: &LogEntryFilter) -> Result<Vec<LogEntry>> {
        self.read("load_filtered", format!("{:?}", filter));
        let entries = self.entries.lock();
        let matching = entries.values().filter(|e| filter.matches(e)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    fn count(&self) -> Result<usize> {
        self.read("count", "");
        Ok(self.entries.lock().len())
    }

    fn add(&self, entry: &LogEntry) -> Result<LogEntry> {
        self.write("add", &entry.entry_type)?;
        let stored = entry
            .clone()
            .with_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.lock().insert(stored.id.unwrap_or_default(), stored.clone());
        Ok(stored)
    }

    fn update(&self, entry: &LogEntry) -> Result<bool> {
        self.write("update", format!("{:?}", entry.id))?;
        let mut entries = self.entries.lock();
        let existing = match entry.id {
            Some(id) => entries.get_mut(&id),
            None => None,
        };
        match existing {
            Some(existing) => {
                *existing = entry.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, id: i64) -> Result<bool> {
        self.write("remove", id)?;
        Ok(self.entries.lock().remove(&id).is_some())
    }

    fn remove_filtered(&self, filter: &LogEntryFilter) -> Result<usize> {
        self.write("remove_filtered", format!("{:?}", filter))?;
        let mut entries = self.entries.lock();
        let ids: Vec<i64> = entries
            .iter()
            .filter(|(_, e)| filter.matches(e))
            .map(|(id, _)| *id)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        for id in &ids {
            entries.remove(id);
        }
        Ok(ids.len())
    }

    fn truncate(&self) -> Result<()> {
        self.write("truncate", "log_entries")?;
        self.entries.lock().clear();
        Ok(())
    }
}

/// `Backend` handing out `RecordingStore`s
pub struct RecordingBackend {
    name: String,
    behavior: Arc<Behavior>,
    stores: DashMap<ConnectionIdentity, Arc<RecordingStore>>,
    opened: AtomicUsize,
}

impl RecordingBackend {
    /// Create a backend with its own journal
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_journal(name, Arc::new(CallJournal::new()))
    }

    /// Create a backend recording into `journal`
    pub fn with_journal(name: impl Into<String>, journal: Arc<CallJournal>) -> Self {
        Self {
            name: name.into(),
            behavior: Arc::new(Behavior {
                journal,
                ..Behavior::default()
            }),
            stores: DashMap::new(),
            opened: AtomicUsize::new(0),
        }
    }

    /// Journal of every call made through this backend's handlers
    pub fn journal(&self) -> &Arc<CallJournal> {
        &self.behavior.journal
    }

    /// Make every write to the store at `url` fail
    pub fn fail_writes_for(&self, url: &str) {
        self.behavior.failing.lock().insert(url.to_string());
    }

    /// Block writes to the store at `url` until the returned gate opens
    pub fn hold_writes_for(&self, url: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.behavior
            .gates
            .lock()
            .insert(url.to_string(), Arc::clone(&gate));
        gate
    }

    /// Block opening a handler for the store at `url` until the returned gate opens
    ///
    /// Only handler requests through the `Backend` trait are held;
    /// [`store`](Self::store) stays immediate.
    pub fn hold_opens_for(&self, url: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.behavior
            .open_gates
            .lock()
            .insert(url.to_string(), Arc::clone(&gate));
        gate
    }

    fn open_store(&self, conn: &Connection) -> Arc<RecordingStore> {
        let gate = self.behavior.open_gates.lock().get(conn.url()).cloned();
        if let Some(gate) = gate {
            gate.pass();
        }
        self.store(conn)
    }

    /// Store serving `conn`
    pub fn store(&self, conn: &Connection) -> Arc<RecordingStore> {
        let store = self.stores.entry(conn.identity()).or_insert_with(|| {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Arc::new(RecordingStore::new(&self.name, conn.clone(), Arc::clone(&self.behavior)))
        });
        Arc::clone(store.value())
    }

    /// Number of stores created
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn sql_handler(&self, conn: &Connection) -> Result<Arc<dyn SqlHandler>> {
        Ok(self.open_store(conn))
    }

    fn log_entry_handler(&self, conn: &Connection) -> Result<Arc<dyn LogEntryHandler>> {
        Ok(self.open_store(conn))
    }
}
