use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schema::{self, Step, SCHEMA_VERSION, TABLE};
use super::{RouteStore, StoreError};
use crate::route::{self, Cost, Route, RouteFields};

/// SQLITE_CONSTRAINT_UNIQUE
const UNIQUE_VIOLATION: std::ffi::c_int = 2067;

/// Routes in an embedded SQLite file. One connection behind a mutex, WAL mode.
#[derive(Clone)]
pub struct SqliteRouteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRouteStore {
    /// Open (or create) the database at `path`. `":memory:"` gives a private
    /// in-memory database.
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        if path != ":memory:" {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn migrate(&self) -> Result<u32, StoreError> {
        let mut conn = self.lock()?;
        let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current >= SCHEMA_VERSION {
            return Ok(current);
        }

        let tx = conn.transaction()?;
        for migration in schema::pending(current) {
            match migration.step {
                Step::Sql(sql) => tx.execute_batch(sql)?,
                Step::AddColumn { name, definition } => {
                    if has_column(&tx, name)? {
                        tracing::debug!(column = name, "column already present, skipping");
                    } else {
                        tx.execute_batch(&format!(
                            "ALTER TABLE {TABLE} ADD COLUMN {name} {definition}"
                        ))?;
                    }
                }
            }
            tracing::info!(
                version = migration.version,
                "applied migration: {}",
                migration.description
            );
        }
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;

        Ok(SCHEMA_VERSION)
    }

    fn query(&self, filter: &str, args: impl rusqlite::Params) -> Result<Vec<Route>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {TABLE} {filter} ORDER BY path ASC",
            schema::select_list()
        );
        let mut stmt = conn.prepare(&sql)?;
        let routes = stmt
            .query_map(args, row_to_route)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(routes)
    }

    fn insert(&self, fields: &RouteFields) -> Result<Route, StoreError> {
        let fields = fields.validated()?;
        let now = route::format_timestamp(&route::now());

        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {TABLE} \
                 (path, target_url, enabled, cost_usdc, auth_header, is_test, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)"
            ),
            params![
                fields.path,
                fields.target_url,
                fields.enabled,
                fields.cost.as_f64(),
                fields.auth_header,
                fields.is_test,
                now,
            ],
        )
        .map_err(|e| unique_violation(e, &fields.path))?;

        let id = conn.last_insert_rowid();
        fetch_by_id(&conn, id)?.ok_or(StoreError::NotFound(id))
    }

    fn replace(&self, id: i64, fields: &RouteFields) -> Result<Route, StoreError> {
        let fields = fields.validated()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous = fetch_by_id(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        let updated_at = route::format_timestamp(&route::next_update_time(previous.updated_at));

        tx.execute(
            &format!(
                "UPDATE {TABLE} SET path = ?1, target_url = ?2, enabled = ?3, cost_usdc = ?4, \
                 auth_header = ?5, is_test = ?6, updated_at = ?7 WHERE id = ?8"
            ),
            params![
                fields.path,
                fields.target_url,
                fields.enabled,
                fields.cost.as_f64(),
                fields.auth_header,
                fields.is_test,
                updated_at,
                id,
            ],
        )
        .map_err(|e| unique_violation(e, &fields.path))?;

        let route = fetch_by_id(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        tx.commit()?;
        Ok(route)
    }

    fn remove(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute(&format!("DELETE FROM {TABLE} WHERE id = ?1"), [id])?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl RouteStore for SqliteRouteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_schema(&self) -> Result<u32, StoreError> {
        self.migrate()
    }

    async fn list(&self) -> Result<Vec<Route>, StoreError> {
        self.query("", [])
    }

    async fn list_enabled(&self) -> Result<Vec<Route>, StoreError> {
        self.query("WHERE enabled = 1", [])
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<Route>, StoreError> {
        Ok(self.query("WHERE path = ?1", [path])?.into_iter().next())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Route>, StoreError> {
        let conn = self.lock()?;
        fetch_by_id(&conn, id)
    }

    async fn create(&self, fields: &RouteFields) -> Result<Route, StoreError> {
        self.insert(fields)
    }

    async fn update(&self, id: i64, fields: &RouteFields) -> Result<Route, StoreError> {
        self.replace(id, fields)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.remove(id)
    }
}

fn fetch_by_id(conn: &Connection, id: i64) -> Result<Option<Route>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {TABLE} WHERE id = ?1",
        schema::select_list()
    );
    Ok(conn.query_row(&sql, [id], row_to_route).optional()?)
}

fn has_column(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({TABLE})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|n| n == name))
}

fn unique_violation(e: rusqlite::Error, path: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        if err.extended_code == UNIQUE_VIOLATION {
            return StoreError::DuplicatePath(path.to_string());
        }
    }
    StoreError::Sqlite(e)
}

fn row_to_route(row: &Row<'_>) -> rusqlite::Result<Route> {
    let cost = row.get::<_, Option<f64>>(4)?.unwrap_or(0.0);
    let cost = Cost::from_f64(cost)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Real, Box::new(e)))?;

    Ok(Route {
        id: row.get(0)?,
        path: row.get(1)?,
        target_url: row.get(2)?,
        enabled: row.get::<_, Option<bool>>(3)?.unwrap_or(true),
        cost,
        auth_header: row
            .get::<_, Option<String>>(5)?
            .filter(|h| !h.is_empty()),
        is_test: row.get::<_, Option<bool>>(6)?.unwrap_or(true),
        created_at: timestamp_column(row, 7)?,
        updated_at: timestamp_column(row, 8)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH),
        Some(raw) => route::parse_timestamp(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                format!("invalid timestamp: {raw}").into(),
            )
        }),
    }
}
