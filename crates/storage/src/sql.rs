//! Generic SQL handler over SQLite

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dbmirror_core::{Connection, Error, ResultSet, Result, SqlHandler, SqlValue, TableHandler};
use tracing::{info, trace};

use crate::convert::materialize;
use crate::store::SqliteStore;

/// Table name reported by generic SQL handlers, which are not bound to a table
pub const GENERIC_SQL_TABLE: &str = "<sql>";

/// Column holding the key returned by `execute_generated_keys`
pub const GENERATED_KEY_COLUMN: &str = "generated_key";

/// `SqlHandler` backed by a `SqliteStore`
pub struct SqliteSql {
    connection: Connection,
    store: Arc<SqliteStore>,
    debug: AtomicBool,
}

impl SqliteSql {
    /// Create a handler for `connection` using `store`
    pub fn new(connection: Connection, store: Arc<SqliteStore>) -> Self {
        Self {
            connection,
            store,
            debug: AtomicBool::new(false),
        }
    }

    fn log_statement(&self, op: &'static str, sql: &str) {
        if self.debug() {
            info!(target: "dbmirror::sqlite", url = self.connection.url(), op, sql, "Executing");
        } else {
            trace!(target: "dbmirror::sqlite", url = self.connection.url(), op, sql, "Executing");
        }
    }

    fn run_query(&self, op: &'static str, sql: &str) -> Result<ResultSet> {
        self.log_statement(op, sql);
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            materialize(&mut stmt, [])
        })
    }

    /// Run `f` only if `table` exists, otherwise report `TableNotFound`
    fn with_existing_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<R>,
    ) -> Result<R> {
        let outcome = self.store.with_conn(|conn| {
            if !table_exists_in(conn, table)? {
                return Ok(None);
            }
            f(conn).map(Some)
        })?;
        outcome.ok_or_else(|| Error::TableNotFound(table.to_string()))
    }
}

fn table_exists_in(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<bool> {
    conn.prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?
        .exists([table])
}

fn build_select(distinct: bool, columns: &str, tables: &str, where_clause: Option<&str>) -> String {
    let mut sql = String::from("SELECT ");
    if distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(columns);
    sql.push_str(" FROM ");
    sql.push_str(tables);
    if let Some(cond) = where_clause.map(str::trim).filter(|c| !c.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(cond);
    }
    sql
}

impl TableHandler for SqliteSql {
    fn table_name(&self) -> &str {
        GENERIC_SQL_TABLE
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

impl SqlHandler for SqliteSql {
    fn table_exists(&self, table: &str) -> Result<bool> {
        self.store.with_conn(|conn| table_exists_in(conn, table))
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        self.store.with_conn(|conn| {
            conn.prepare_cached("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")?
                .exists([table, column])
        })
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>();
            names
        })
    }

    fn select(&self, columns: &str, tables: &str, where_clause: Option<&str>) -> Result<ResultSet> {
        self.run_query("select", &build_select(false, columns, tables, where_clause))
    }

    fn select_distinct(
        &self,
        columns: &str,
        tables: &str,
        where_clause: Option<&str>,
    ) -> Result<ResultSet> {
        self.run_query("select_distinct", &build_select(true, columns, tables, where_clause))
    }

    fn query(&self, sql: &str) -> Result<ResultSet> {
        self.run_query("query", sql)
    }

    fn execute(&self, sql: &str) -> Result<bool> {
        self.log_statement("execute", sql);
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            if stmt.column_count() > 0 {
                // drive the statement so that side effects happen
                let mut rows = stmt.query([])?;
                while rows.next()?.is_some() {}
                Ok(true)
            } else {
                stmt.execute([])?;
                Ok(false)
            }
        })
    }

    fn execute_generated_keys(&self, sql: &str) -> Result<ResultSet> {
        self.log_statement("execute_generated_keys", sql);
        let key = self.store.with_conn(|conn| {
            let before = conn.last_insert_rowid();
            let changed = conn.execute(sql, [])?;
            let after = conn.last_insert_rowid();
            // the rowid survives from the last insert on this connection
            let inserted = changed > 0 && (after != before || is_insert(sql));
            Ok(inserted.then_some(after))
        })?;
        let mut keys = ResultSet::new(vec![GENERATED_KEY_COLUMN.to_string()]);
        if let Some(key) = key {
            keys.push_row(vec![SqlValue::Integer(key)]);
        }
        Ok(keys)
    }

    fn update(&self, assignments: &str, table: &str, where_clause: &str) -> Result<usize> {
        let sql = format!("UPDATE {} SET {} WHERE {}", table, assignments, where_clause);
        self.log_statement("update", &sql);
        self.store.with_conn(|conn| conn.execute(&sql, []))
    }

    fn truncate(&self, table: &str) -> Result<()> {
        let sql = format!("DELETE FROM {}", table);
        self.log_statement("truncate", &sql);
        self.with_existing_table(table, |conn| conn.execute(&sql, []).map(|_| ()))
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let sql = format!("DROP TABLE {}", table);
        self.log_statement("drop", &sql);
        self.with_existing_table(table, |conn| conn.execute(&sql, []).map(|_| ()))
    }
}

/// Whether `sql` starts with a row-inserting keyword
fn is_insert(sql: &str) -> bool {
    let head = sql.trim_start();
    ["INSERT", "REPLACE"].iter().any(|kw| {
        head.get(..kw.len())
            .map_or(false, |word| word.eq_ignore_ascii_case(kw))
    })
}
