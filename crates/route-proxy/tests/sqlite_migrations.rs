use std::time::Duration;

use route_proxy::store::schema::SCHEMA_VERSION;
use route_proxy::store::SqliteRouteStore;
use route_proxy::{RouteFields, RouteStore};
use rusqlite::Connection;

fn user_version(path: &std::path::Path) -> u32 {
    Connection::open(path)
        .unwrap()
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap()
}

fn columns(path: &std::path::Path) -> Vec<String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("PRAGMA table_info(proxy_routes)").unwrap();
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    names
}

#[actix_rt::test]
async fn test_fresh_database_reaches_current_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routes.db");

    let store = SqliteRouteStore::open(path.to_str().unwrap(), Duration::from_secs(1)).unwrap();
    assert_eq!(store.ensure_schema().await.unwrap(), SCHEMA_VERSION);
    assert_eq!(user_version(&path), SCHEMA_VERSION);

    let cols = columns(&path);
    for expected in ["cost_usdc", "auth_header", "is_test", "created_at", "updated_at"] {
        assert!(cols.iter().any(|c| c == expected), "missing {expected}");
    }
}

#[actix_rt::test]
async fn test_legacy_table_keeps_rows_and_gains_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");

    // An older revision: unversioned, cost_usdc bolted on, no auth_header/is_test.
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE proxy_routes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT UNIQUE NOT NULL,
                target_url TEXT NOT NULL,
                enabled BOOLEAN DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            ALTER TABLE proxy_routes ADD COLUMN cost_usdc REAL DEFAULT 0;
            INSERT INTO proxy_routes (path, target_url, cost_usdc) VALUES ('/api', 'http://localhost:3000', 0);
            INSERT INTO proxy_routes (path, target_url, enabled, cost_usdc) VALUES ('/paid', 'http://paid', 0, 2.5);
            "#,
        )
        .unwrap();
    }

    let store = SqliteRouteStore::open(path.to_str().unwrap(), Duration::from_secs(1)).unwrap();
    assert_eq!(store.ensure_schema().await.unwrap(), SCHEMA_VERSION);

    let routes = store.list().await.unwrap();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].path, "/api");
    assert!(routes[0].enabled);
    assert!(routes[0].is_test);
    assert_eq!(routes[0].auth_header, None);

    assert_eq!(routes[1].path, "/paid");
    assert!(!routes[1].enabled);
    assert_eq!(routes[1].cost.units(), 2_500_000);

    // Legacy second-precision timestamps still advance on update.
    let updated = store
        .update(routes[1].id, &routes[1].fields().with_enabled(true))
        .await
        .unwrap();
    assert!(updated.updated_at > routes[1].updated_at);
}

#[actix_rt::test]
async fn test_reopening_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routes.db");
    let path_str = path.to_str().unwrap();

    let created = {
        let store = SqliteRouteStore::open(path_str, Duration::from_secs(1)).unwrap();
        store.ensure_schema().await.unwrap();
        store
            .create(&RouteFields::new("/keep", "http://a"))
            .await
            .unwrap()
    };

    let store = SqliteRouteStore::open(path_str, Duration::from_secs(1)).unwrap();
    assert_eq!(store.ensure_schema().await.unwrap(), SCHEMA_VERSION);
    assert_eq!(store.get_by_id(created.id).await.unwrap(), Some(created));
}
