//! Hosted store against a minimal PostgREST stand-in.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use serde_json::{json, Value};

use route_proxy::store::schema::SCHEMA_VERSION;
use route_proxy::store::HostedRouteStore;
use route_proxy::{RouteFields, RouteStore, StoreError};

const API_KEY: &str = "anon-key";

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: Vec<Value>,
    /// Whether the migration function is installed.
    rpc: bool,
}

type Shared = web::Data<Mutex<Table>>;

fn authorized(req: &HttpRequest) -> bool {
    req.headers().get("apikey").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

fn matches(row: &Value, query: &HashMap<String, String>) -> bool {
    query.iter().all(|(key, value)| match key.as_str() {
        "id" => value
            .strip_prefix("eq.")
            .and_then(|id| id.parse::<i64>().ok())
            .is_some_and(|id| row["id"] == id),
        "path" => value.strip_prefix("eq.").is_some_and(|p| row["path"] == p),
        "enabled" => row["enabled"] == (value == "is.true"),
        _ => true,
    })
}

async fn select(
    req: HttpRequest,
    query: web::Query<HashMap<String, String>>,
    table: Shared,
) -> HttpResponse {
    if !authorized(&req) {
        return HttpResponse::Unauthorized().json(json!({ "message": "No API key found" }));
    }
    let table = table.lock().unwrap();
    let mut rows: Vec<Value> = table
        .rows
        .iter()
        .filter(|row| matches(row, &query))
        .cloned()
        .collect();
    // Locale collation: punctuation is ignored, so "/api2" sorts before "/api/v2".
    rows.sort_by_key(|row| {
        row["path"]
            .as_str()
            .unwrap_or_default()
            .replace('/', "")
    });
    HttpResponse::Ok().json(rows)
}

async fn insert(req: HttpRequest, body: web::Json<Value>, table: Shared) -> HttpResponse {
    if !authorized(&req) {
        return HttpResponse::Unauthorized().finish();
    }
    let mut table = table.lock().unwrap();
    let mut row = body.into_inner();
    if table.rows.iter().any(|r| r["path"] == row["path"]) {
        return HttpResponse::Conflict().json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint \"proxy_routes_path_key\"",
        }));
    }
    table.next_id += 1;
    row["id"] = table.next_id.into();
    table.rows.push(row.clone());
    HttpResponse::Created().json(vec![row])
}

async fn patch(
    query: web::Query<HashMap<String, String>>,
    body: web::Json<Value>,
    table: Shared,
) -> HttpResponse {
    let mut table = table.lock().unwrap();
    let changes = body.into_inner();
    let mut updated = Vec::new();
    for row in table.rows.iter_mut().filter(|row| matches(row, &query)) {
        if let (Some(row), Some(changes)) = (row.as_object_mut(), changes.as_object()) {
            for (key, value) in changes {
                row.insert(key.clone(), value.clone());
            }
        }
        updated.push(row.clone());
    }
    HttpResponse::Ok().json(updated)
}

async fn remove(query: web::Query<HashMap<String, String>>, table: Shared) -> HttpResponse {
    let mut table = table.lock().unwrap();
    let (gone, kept): (Vec<Value>, Vec<Value>) =
        table.rows.drain(..).partition(|row| matches(row, &query));
    table.rows = kept;
    HttpResponse::Ok().json(gone)
}

async fn migrate(body: web::Json<Value>, table: Shared) -> HttpResponse {
    if !table.lock().unwrap().rpc {
        return HttpResponse::NotFound().json(json!({
            "code": "PGRST202",
            "message": "Could not find the function public.proxy_routes_migrate",
        }));
    }
    HttpResponse::Ok().json(body["target_version"].clone())
}

async fn spawn_postgrest(rpc: bool) -> String {
    let table = web::Data::new(Mutex::new(Table {
        rpc,
        ..Default::default()
    }));
    let server = HttpServer::new(move || {
        App::new().app_data(table.clone()).service(
            web::scope("/rest/v1")
                .route("/rpc/proxy_routes_migrate", web::post().to(migrate))
                .route("/proxy_routes", web::get().to(select))
                .route("/proxy_routes", web::post().to(insert))
                .route("/proxy_routes", web::patch().to(patch))
                .route("/proxy_routes", web::delete().to(remove)),
        )
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    format!("http://{addr}")
}

fn store(base: &str, key: &str) -> HostedRouteStore {
    HostedRouteStore::new(
        reqwest::Client::new(),
        base,
        key.to_string(),
        Duration::from_secs(5),
    )
}

#[actix_rt::test]
async fn test_crud_round_trip() {
    let base = spawn_postgrest(true).await;
    let store = store(&base, API_KEY);
    assert_eq!(store.ensure_schema().await.unwrap(), SCHEMA_VERSION);

    let created = store
        .create(
            &RouteFields::new("/weather", "https://api.example.com")
                .with_cost("0.01".parse().unwrap())
                .with_auth_header("Bearer k"),
        )
        .await
        .unwrap();
    assert_eq!(created.id, 1);
    assert_eq!(created.cost.units(), 10_000);
    assert_eq!(created.auth_header.as_deref(), Some("Bearer k"));

    store
        .create(&RouteFields::new("/a", "http://a").with_enabled(false))
        .await
        .unwrap();

    let paths: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, ["/a", "/weather"]);
    let enabled = store.list_enabled().await.unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].path, "/weather");

    assert_eq!(
        store.get_by_path("/weather").await.unwrap().map(|r| r.id),
        Some(created.id)
    );

    let updated = store
        .update(created.id, &RouteFields::new("/weather", "https://api2.example.com"))
        .await
        .unwrap();
    assert_eq!(updated.target_url, "https://api2.example.com");
    assert_eq!(updated.auth_header, None);
    assert!(updated.updated_at > created.updated_at);
    assert_eq!(updated.created_at, created.created_at);

    assert!(store.delete(created.id).await.unwrap());
    assert!(!store.delete(created.id).await.unwrap());
    assert!(matches!(
        store.update(created.id, &RouteFields::new("/x", "http://x")).await,
        Err(StoreError::NotFound(_))
    ));
}

#[actix_rt::test]
async fn test_listing_uses_byte_order_like_other_backends() {
    let base = spawn_postgrest(true).await;
    let store = store(&base, API_KEY);

    for path in ["/api2", "/api/v2", "/api"] {
        store.create(&RouteFields::new(path, "http://a")).await.unwrap();
    }
    let paths: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, ["/api", "/api/v2", "/api2"]);
    let enabled: Vec<String> = store
        .list_enabled()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(enabled, paths);
}

#[actix_rt::test]
async fn test_unique_violation_is_duplicate_path() {
    let base = spawn_postgrest(true).await;
    let store = store(&base, API_KEY);

    store.create(&RouteFields::new("/dup", "http://a")).await.unwrap();
    let err = store
        .create(&RouteFields::new("/dup", "http://b"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicatePath(ref p) if p == "/dup"));
}

#[actix_rt::test]
async fn test_missing_migration_function_falls_back_to_probe() {
    let base = spawn_postgrest(false).await;
    assert_eq!(store(&base, API_KEY).ensure_schema().await.unwrap(), SCHEMA_VERSION);
}

#[actix_rt::test]
async fn test_rejected_key_is_a_store_error() {
    let base = spawn_postgrest(true).await;
    let err = store(&base, "wrong").list().await.unwrap_err();
    assert!(matches!(err, StoreError::Hosted(ref m) if m.contains("401")));
}

#[actix_rt::test]
async fn test_unreachable_backend_is_a_store_error() {
    let err = store("http://127.0.0.1:1", API_KEY)
        .list_enabled()
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Hosted(_)));
}
