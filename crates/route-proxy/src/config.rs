use alloy::primitives::Address;
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_API_URL: &str = "http://localhost:3000";
const DEFAULT_DB_PATH: &str = "./proxy_config.db";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FACILITATOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;

/// Where routes are persisted.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Embedded SQLite file
    Local { db_path: String },
    /// Hosted PostgREST / Supabase project
    Hosted { url: String, api_key: String },
}

impl std::fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Local { db_path } => {
                f.debug_struct("Local").field("db_path", db_path).finish()
            }
            StoreBackend::Hosted { url, .. } => f
                .debug_struct("Hosted")
                .field("url", url)
                .field("api_key", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Clone)]
pub struct ProxyConfig {
    /// Server port
    pub port: u16,
    /// Upstream of the route seeded into an empty store
    pub default_upstream: String,
    pub store: StoreBackend,
    /// SQLite busy timeout / hosted request timeout
    pub store_timeout: Duration,
    /// Facilitator URL for payment verification and settlement
    pub facilitator_url: String,
    /// Address receiving route payments (None = paid routes fail open)
    pub payee_address: Option<Address>,
    /// Bearer credential for the facilitator
    pub facilitator_api_key: Option<String>,
    /// HMAC shared secret for facilitator auth
    pub hmac_secret: Option<Vec<u8>>,
    /// Time allowed for an upstream to return response headers
    pub upstream_timeout: Duration,
    /// Time allowed for verify + settle before failing open
    pub facilitator_timeout: Duration,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Bearer token required for the admin API (None = open)
    pub admin_token: Option<String>,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("port", &self.port)
            .field("default_upstream", &self.default_upstream)
            .field("store", &self.store)
            .field("store_timeout", &self.store_timeout)
            .field("facilitator_url", &self.facilitator_url)
            .field("payee_address", &self.payee_address)
            .field(
                "facilitator_api_key",
                &self.facilitator_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "hmac_secret",
                &self.hmac_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("upstream_timeout", &self.upstream_timeout)
            .field("facilitator_timeout", &self.facilitator_timeout)
            .field("allowed_origins", &self.allowed_origins)
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            default_upstream: DEFAULT_API_URL.to_string(),
            store: StoreBackend::Local {
                db_path: DEFAULT_DB_PATH.to_string(),
            },
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
            facilitator_url: x402::DEFAULT_FACILITATOR_URL.to_string(),
            payee_address: None,
            facilitator_api_key: None,
            hmac_secret: None,
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            facilitator_timeout: Duration::from_secs(DEFAULT_FACILITATOR_TIMEOUT_SECS),
            allowed_origins: vec!["*".to_string()],
            admin_token: None,
            metrics_token: None,
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the config from any variable source. Empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Optional: port
        let port = match var("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("PORT", raw))?,
            None => DEFAULT_PORT,
        };

        // Optional: default upstream for the seeded route
        let default_upstream = var("API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        require_http_url(&default_upstream)?;

        // Store backend
        let wants_hosted = match var("ROUTE_STORE").as_deref() {
            Some("hosted") => true,
            Some("local") => false,
            Some(other) => return Err(ConfigError::InvalidStore(other.to_string())),
            None => var("USE_SUPABASE").is_some_and(|v| v == "true" || v == "1"),
        };
        let db_path = var("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let store = if wants_hosted {
            match (var("SUPABASE_URL"), var("SUPABASE_ANON_KEY")) {
                (Some(url), Some(api_key)) => {
                    require_http_url(&url)?;
                    StoreBackend::Hosted { url, api_key }
                }
                _ => {
                    tracing::warn!(
                        "hosted route store requested but SUPABASE_URL / SUPABASE_ANON_KEY \
                         are not set; using the local SQLite store at {db_path}"
                    );
                    StoreBackend::Local { db_path }
                }
            }
        } else {
            StoreBackend::Local { db_path }
        };

        // Optional: facilitator URL
        let facilitator_url =
            var("FACILITATOR_URL").unwrap_or_else(|| x402::DEFAULT_FACILITATOR_URL.to_string());
        require_http_url(&facilitator_url)?;

        // Optional: payee address
        let payee_address = match var("PAYEE_ADDRESS").or_else(|| var("ADDRESS")) {
            Some(raw) => Some(
                raw.parse::<Address>()
                    .map_err(|_| ConfigError::InvalidAddress(raw))?,
            ),
            None => None,
        };

        let facilitator_api_key = var("FACILITATOR_API_KEY");

        // Optional: HMAC secret
        let hmac_secret = var("FACILITATOR_SHARED_SECRET").map(String::into_bytes);
        if let Some(ref secret) = hmac_secret {
            if secret.len() < 32 {
                tracing::warn!(
                    "FACILITATOR_SHARED_SECRET is too short ({} bytes, minimum 32); \
                     use `openssl rand -hex 32` to generate a secure secret",
                    secret.len()
                );
            }
        }

        let upstream_timeout =
            seconds(&var, "UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS)?;
        let facilitator_timeout = seconds(
            &var,
            "FACILITATOR_TIMEOUT_SECS",
            DEFAULT_FACILITATOR_TIMEOUT_SECS,
        )?;
        let store_timeout = seconds(&var, "STORE_TIMEOUT_SECS", DEFAULT_STORE_TIMEOUT_SECS)?;

        // Optional: allowed origins
        let allowed_origins: Vec<String> = var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["*".to_string()]);

        let admin_token = var("ADMIN_TOKEN");
        let metrics_token = var("METRICS_TOKEN");

        if payee_address.is_none() {
            tracing::warn!(
                "PAYEE_ADDRESS not set; routes with a cost will be forwarded without payment"
            );
        }
        if admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not set; /api/routes is writable by anyone who can reach it");
        }
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            port,
            default_upstream,
            store,
            store_timeout,
            facilitator_url,
            payee_address,
            facilitator_api_key,
            hmac_secret,
            upstream_timeout,
            facilitator_timeout,
            allowed_origins,
            admin_token,
            metrics_token,
        })
    }
}

fn require_http_url(raw: &str) -> Result<(), ConfigError> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl(raw.to_string())),
    }
}

fn seconds<F>(var: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::InvalidNumber(key, raw)),
        },
        None => Ok(Duration::from_secs(default)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {0}: {1}")]
    InvalidNumber(&'static str, String),

    #[error("invalid ROUTE_STORE '{0}' (expected 'local' or 'hosted')")]
    InvalidStore(String),
}
