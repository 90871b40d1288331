//! Routes in a hosted Postgres table, reached through its PostgREST API
//! (Supabase's `/rest/v1`).
//!
//! Schema changes cannot be issued over PostgREST, so the migration steps live
//! in a database function shipped in `migrations/hosted.sql`; `ensure_schema`
//! calls it over RPC.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::schema::{self, SCHEMA_VERSION, TABLE};
use super::{RouteStore, StoreError};
use crate::route::{self, Route, RouteFields};

const MIGRATE_FUNCTION: &str = "proxy_routes_migrate";

/// Postgres `unique_violation`.
const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Clone)]
pub struct HostedRouteStore {
    http: reqwest::Client,
    rest_url: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for HostedRouteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedRouteStore")
            .field("rest_url", &self.rest_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HostedRouteStore {
    /// `project_url` is the project root (`https://xyz.supabase.co`); the
    /// REST prefix is appended unless already present.
    pub fn new(
        http: reqwest::Client,
        project_url: &str,
        api_key: String,
        timeout: Duration,
    ) -> Self {
        let base = project_url.trim_end_matches('/');
        let rest_url = if base.ends_with("/rest/v1") {
            base.to_string()
        } else {
            format!("{base}/rest/v1")
        };
        Self {
            http,
            rest_url,
            api_key,
            timeout,
        }
    }

    fn request(&self, method: Method, path_and_query: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.rest_url, path_and_query))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        request
            .send()
            .await
            .map_err(|e| StoreError::Hosted(format!("request failed: {e}")))
    }

    /// Read the rows of a successful response, or classify the failure.
    async fn rows(
        &self,
        response: reqwest::Response,
        path: Option<&str>,
    ) -> Result<Vec<Route>, StoreError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Hosted(format!("failed to read response: {e}")))?;

        if status.is_success() {
            return serde_json::from_str(&text)
                .map_err(|e| StoreError::Hosted(format!("unexpected row format: {e}")));
        }

        let error: PostgrestError = serde_json::from_str(&text).unwrap_or_default();
        if error.code.as_deref() == Some(PG_UNIQUE_VIOLATION) {
            if let Some(path) = path {
                return Err(StoreError::DuplicatePath(path.to_string()));
            }
        }
        tracing::warn!(status = %status, body = %text, "hosted route store returned an error");
        Err(StoreError::Hosted(format!(
            "{status}: {}",
            error.message.unwrap_or(text)
        )))
    }

    async fn select(&self, filter: &str) -> Result<Vec<Route>, StoreError> {
        let query = format!(
            "{TABLE}?select={}{filter}&order=path.asc",
            schema::select_list().replace(' ', "")
        );
        let response = self.send(self.request(Method::GET, &query)).await?;
        let mut rows = self.rows(response, None).await?;
        // Server ordering follows the column collation; keep byte order like
        // the other backends.
        rows.sort_by(|a, b| a.path.cmp(&b.path).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn row_body(fields: &RouteFields) -> serde_json::Value {
        serde_json::json!({
            "path": fields.path,
            "target_url": fields.target_url,
            "enabled": fields.enabled,
            "cost_usdc": fields.cost,
            "auth_header": fields.auth_header,
            "is_test": fields.is_test,
        })
    }

    /// Used when the migration function is not installed: confirm every
    /// column the proxy reads is present.
    async fn probe_columns(&self) -> Result<u32, StoreError> {
        let query = format!(
            "{TABLE}?select={}&limit=1",
            schema::select_list().replace(' ', "")
        );
        let response = self.send(self.request(Method::GET, &query)).await?;
        let status = response.status();
        if status.is_success() {
            tracing::warn!(
                "{MIGRATE_FUNCTION} is not installed; hosted schema verified by column probe"
            );
            return Ok(SCHEMA_VERSION);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Schema(format!(
            "table {TABLE} is missing or lacks columns {:?} ({status}: {body}); \
             apply migrations/hosted.sql to the database",
            schema::COLUMNS
        )))
    }
}

#[async_trait]
impl RouteStore for HostedRouteStore {
    fn backend(&self) -> &'static str {
        "hosted"
    }

    async fn ensure_schema(&self) -> Result<u32, StoreError> {
        let request = self
            .request(Method::POST, &format!("rpc/{MIGRATE_FUNCTION}"))
            .json(&serde_json::json!({ "target_version": SCHEMA_VERSION }));
        let response = self.send(request).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return self.probe_columns().await;
        }
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Hosted(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(StoreError::Schema(format!(
                "{MIGRATE_FUNCTION} failed with {status}: {text}"
            )));
        }

        let version: u32 = serde_json::from_str(text.trim()).map_err(|e| {
            StoreError::Schema(format!("{MIGRATE_FUNCTION} returned {text:?}: {e}"))
        })?;
        if version < SCHEMA_VERSION {
            return Err(StoreError::Schema(format!(
                "hosted schema is at version {version}, expected {SCHEMA_VERSION}"
            )));
        }
        Ok(version)
    }

    async fn list(&self) -> Result<Vec<Route>, StoreError> {
        self.select("").await
    }

    async fn list_enabled(&self) -> Result<Vec<Route>, StoreError> {
        self.select("&enabled=is.true").await
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<Route>, StoreError> {
        let filter = format!("&path=eq.{}", urlencoding::encode(path));
        Ok(self.select(&filter).await?.into_iter().next())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Route>, StoreError> {
        Ok(self.select(&format!("&id=eq.{id}")).await?.into_iter().next())
    }

    async fn create(&self, fields: &RouteFields) -> Result<Route, StoreError> {
        let fields = fields.validated()?;
        let now = route::format_timestamp(&route::now());
        let mut body = Self::row_body(&fields);
        body["created_at"] = now.clone().into();
        body["updated_at"] = now.into();

        let request = self
            .request(Method::POST, TABLE)
            .header("Prefer", "return=representation")
            .json(&body);
        let response = self.send(request).await?;
        self.rows(response, Some(&fields.path))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Hosted("insert returned no row".to_string()))
    }

    async fn update(&self, id: i64, fields: &RouteFields) -> Result<Route, StoreError> {
        let fields = fields.validated()?;
        let previous = self.get_by_id(id).await?.ok_or(StoreError::NotFound(id))?;

        let mut body = Self::row_body(&fields);
        body["updated_at"] =
            route::format_timestamp(&route::next_update_time(previous.updated_at)).into();

        let request = self
            .request(Method::PATCH, &format!("{TABLE}?id=eq.{id}"))
            .header("Prefer", "return=representation")
            .json(&body);
        let response = self.send(request).await?;
        // Empty result: deleted between the read and the write.
        self.rows(response, Some(&fields.path))
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let request = self
            .request(Method::DELETE, &format!("{TABLE}?id=eq.{id}"))
            .header("Prefer", "return=representation");
        let response = self.send(request).await?;
        Ok(!self.rows(response, None).await?.is_empty())
    }
}
