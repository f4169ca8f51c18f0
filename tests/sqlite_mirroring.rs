//! End-to-end mirroring over SQLite
//!
//! Drives `MirrorContext` configured from TOML with the SQLite backend and
//! checks the mirror database by opening it directly.

use dbmirror::{
    sqlite_catalog, Error, LogEntry, LogEntryFilter, MirrorConfig, MirrorContext, SqlHandler,
    SqlValue, SqliteBackend, SQLITE_BACKEND,
};
use std::path::Path;
use tempfile::TempDir;

fn url(dir: &Path, name: &str) -> String {
    format!("sqlite://{}", dir.join(name).display())
}

fn config_for(dir: &Path, policy: &str) -> MirrorConfig {
    MirrorConfig::from_toml_str(&format!(
        r#"
fallback = "{backend}"
on_mirror_failure = "{policy}"

[[route]]
url = "{primary}"
mirror = "{mirror}"
backend = "{backend}"
"#,
        backend = SQLITE_BACKEND,
        policy = policy,
        primary = url(dir, "primary.db"),
        mirror = url(dir, "mirror.db"),
    ))
    .unwrap()
}

/// Opens `name` in `dir` outside the context, as an independent reader
fn inspect(dir: &Path, name: &str) -> std::sync::Arc<dyn SqlHandler> {
    let reader = MirrorContext::new(
        std::sync::Arc::new(SqliteBackend::new("inspect")),
        Default::default(),
    );
    let conn = reader.connection(&url(dir, name)).unwrap();
    reader.sql_handler(&conn).unwrap()
}

#[test]
fn test_sql_writes_reach_both_databases() {
    let dir = TempDir::new().unwrap();
    let ctx = MirrorContext::from_config(&config_for(dir.path(), "abort"), &sqlite_catalog()).unwrap();
    let conn = ctx.connection(&url(dir.path(), "primary.db")).unwrap();
    let sql = ctx.sql_handler(&conn).unwrap();

    sql.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
    let keys = sql
        .execute_generated_keys("INSERT INTO users (name) VALUES ('ada')")
        .unwrap();
    assert_eq!(keys.get(0, "generated_key").and_then(SqlValue::as_i64), Some(1));
    sql.execute("INSERT INTO users (name) VALUES ('grace')").unwrap();
    assert_eq!(sql.update("name = 'alan'", "users", "id = 2").unwrap(), 1);

    for name in ["primary.db", "mirror.db"] {
        let names = inspect(dir.path(), name)
            .select("name", "users", None)
            .unwrap()
            .strings("name");
        assert_eq!(names, vec!["ada".to_string(), "alan".to_string()], "{}", name);
    }

    sql.truncate("users").unwrap();
    assert!(inspect(dir.path(), "mirror.db").query("SELECT * FROM users").unwrap().is_empty());

    sql.drop_table("users").unwrap();
    assert!(!inspect(dir.path(), "mirror.db").table_exists("users").unwrap());
    assert!(!sql.table_exists("users").unwrap());
}

#[test]
fn test_log_entries_are_mirrored() {
    let dir = TempDir::new().unwrap();
    let ctx = MirrorContext::from_config(&config_for(dir.path(), "abort"), &sqlite_catalog()).unwrap();
    let conn = ctx.connection(&url(dir.path(), "primary.db")).unwrap();
    let log = ctx.log_entry_handler(&conn).unwrap();

    let first = log.add(&LogEntry::new("login", "web").with_host("h1")).unwrap();
    log.add(&LogEntry::new("logout", "web")).unwrap();
    log.add(&LogEntry::new("login", "cli")).unwrap();
    assert!(log.update(&first.clone().with_status("ok")).unwrap());
    assert_eq!(
        log.remove_filtered(&LogEntryFilter::all().with_source("cli")).unwrap(),
        1
    );

    let reader = MirrorContext::new(std::sync::Arc::new(SqliteBackend::new("inspect")), Default::default());
    let mirror_log = reader
        .log_entry_handler(&reader.connection(&url(dir.path(), "mirror.db")).unwrap())
        .unwrap();
    assert_eq!(mirror_log.count().unwrap(), 2);
    let mirrored = mirror_log.load(first.id.unwrap()).unwrap().unwrap();
    assert_eq!(mirrored.status, "ok");
    assert_eq!(mirrored.host, "h1");
    assert_eq!(log.count().unwrap(), 2);
}

#[test]
fn test_failed_mirror_write_aborts_primary() {
    let dir = TempDir::new().unwrap();
    let ctx = MirrorContext::from_config(&config_for(dir.path(), "abort"), &sqlite_catalog()).unwrap();
    let conn = ctx.connection(&url(dir.path(), "primary.db")).unwrap();
    let sql = ctx.sql_handler(&conn).unwrap();

    // Table exists only on the primary, so the mirror rejects the insert.
    inspect(dir.path(), "primary.db")
        .execute("CREATE TABLE only_primary (id INTEGER)")
        .unwrap();
    let err = sql.execute("INSERT INTO only_primary VALUES (1)").unwrap_err();
    assert!(matches!(err, Error::Store { .. }));
    assert!(sql.query("SELECT * FROM only_primary").unwrap().is_empty());

    let err = sql.truncate("missing").unwrap_err();
    assert!(matches!(err, Error::TableNotFound(_)));
}

#[test]
fn test_continue_policy_writes_primary_anyway() {
    let dir = TempDir::new().unwrap();
    let ctx =
        MirrorContext::from_config(&config_for(dir.path(), "continue"), &sqlite_catalog()).unwrap();
    let conn = ctx.connection(&url(dir.path(), "primary.db")).unwrap();
    let sql = ctx.sql_handler(&conn).unwrap();

    inspect(dir.path(), "primary.db")
        .execute("CREATE TABLE only_primary (id INTEGER)")
        .unwrap();
    sql.execute("INSERT INTO only_primary VALUES (1)").unwrap();
    assert_eq!(sql.query("SELECT id FROM only_primary").unwrap().ints("id"), vec![1]);

    let wrapper = ctx.registry().get::<dbmirror::SqlTable>(&conn).unwrap();
    assert_eq!(wrapper.stats().mirror_failures, 1);
}

#[test]
fn test_unrouted_connection_has_no_mirror() {
    let dir = TempDir::new().unwrap();
    let ctx = MirrorContext::from_config(&config_for(dir.path(), "abort"), &sqlite_catalog()).unwrap();
    let conn = ctx.connection(&url(dir.path(), "plain.db")).unwrap();

    let sql = ctx.sql_handler(&conn).unwrap();
    sql.execute("CREATE TABLE t (id INTEGER)").unwrap();

    assert!(!ctx.router().can_mirror(&conn));
    assert!(ctx.registry().is_empty());
    assert!(!dir.path().join("mirror.db").exists());
    assert_eq!(ctx.router().fallback().name(), SQLITE_BACKEND);
}

#[test]
fn test_config_file_drives_context() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(dbmirror::CONFIG_FILE_NAME);
    config_for(dir.path(), "abort").write_to_file(&path).unwrap();

    let config = MirrorConfig::from_file(&path).unwrap();
    let ctx = MirrorContext::from_config(&config, &sqlite_catalog()).unwrap();
    let conn = ctx.connection(&url(dir.path(), "primary.db")).unwrap();
    assert!(ctx.router().can_mirror(&conn));
}
