use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use x402::price::{format_amount, parse_price};
use x402::{X402Error, USDC_DECIMALS};

use crate::store::StoreError;

/// A USDC price held as integer base units (6 decimals).
///
/// Accepted on the wire as a JSON number (`2.5`) or a string (`"2.50"`,
/// `"$2.50"`); always written back as a number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cost(u64);

impl Cost {
    pub const ZERO: Cost = Cost(0);

    pub fn from_units(units: u64) -> Self {
        Cost(units)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn is_free(&self) -> bool {
        self.0 == 0
    }

    /// Convert a stored floating point amount (the legacy `cost_usdc REAL`
    /// column). The float's shortest decimal rendering is parsed, so `0.1`
    /// becomes exactly 100000 units.
    pub fn from_f64(value: f64) -> Result<Self, X402Error> {
        if !value.is_finite() {
            return Err(X402Error::InvalidPrice(format!("{value} is not a number")));
        }
        format!("{value}").parse()
    }

    /// Nearest `f64` to this amount, for the REAL storage column.
    pub fn as_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(0.0)
    }
}

impl FromStr for Cost {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_price(s, USDC_DECIMALS).map(Cost)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_amount(self.0, USDC_DECIMALS))
    }
}

impl Serialize for Cost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Cost {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CostVisitor;

        impl de::Visitor<'_> for CostVisitor {
            type Value = Cost;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative USDC amount as a number or string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Cost, E> {
                v.to_string().parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Cost, E> {
                v.to_string().parse().map_err(E::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Cost, E> {
                Cost::from_f64(v).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Cost, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Cost, E> {
                Ok(Cost::ZERO)
            }
        }

        deserializer.deserialize_any(CostVisitor)
    }
}

/// A stored routing rule: requests whose path starts with `path` go to
/// `target_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: i64,
    pub path: String,
    pub target_url: String,
    #[serde(default = "default_true", deserialize_with = "flag_default_true")]
    pub enabled: bool,
    #[serde(default, alias = "cost_usdc")]
    pub cost: Cost,
    #[serde(default, deserialize_with = "optional_credential")]
    pub auth_header: Option<String>,
    #[serde(default = "default_true", deserialize_with = "flag_default_true")]
    pub is_test: bool,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Route {
    /// The mutable part of this route, e.g. as a base for an update.
    pub fn fields(&self) -> RouteFields {
        RouteFields {
            path: self.path.clone(),
            target_url: self.target_url.clone(),
            enabled: self.enabled,
            cost: self.cost,
            auth_header: self.auth_header.clone(),
            is_test: self.is_test,
        }
    }
}

/// Caller-supplied route attributes for create and update (a full replace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteFields {
    pub path: String,
    pub target_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, alias = "cost_usdc")]
    pub cost: Cost,
    #[serde(default, deserialize_with = "optional_credential")]
    pub auth_header: Option<String>,
    #[serde(default = "default_true")]
    pub is_test: bool,
}

impl RouteFields {
    /// An enabled, free, test-tier route with no injected credentials.
    pub fn new(path: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target_url: target_url.into(),
            enabled: true,
            cost: Cost::ZERO,
            auth_header: None,
            is_test: true,
        }
    }

    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_auth_header(mut self, auth_header: impl Into<String>) -> Self {
        self.auth_header = Some(auth_header.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_test_tier(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    /// Check the invariants every backend enforces before writing and return
    /// the normalized fields (trimmed target, empty credential dropped).
    pub fn validated(&self) -> Result<RouteFields, StoreError> {
        if self.path.is_empty() {
            return Err(StoreError::InvalidInput("path is required".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(StoreError::InvalidInput(
                "path must start with /".to_string(),
            ));
        }
        let target_url = self.target_url.trim();
        if target_url.is_empty() {
            return Err(StoreError::InvalidInput(
                "target_url is required".to_string(),
            ));
        }
        let parsed = url::Url::parse(target_url).map_err(|e| {
            StoreError::InvalidInput(format!("target_url is not an absolute URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(StoreError::InvalidInput(format!(
                "target_url must be an http(s) URL with a host, got {target_url}"
            )));
        }

        Ok(RouteFields {
            path: self.path.clone(),
            target_url: target_url.to_string(),
            enabled: self.enabled,
            cost: self.cost,
            auth_header: self.auth_header.clone().filter(|h| !h.is_empty()),
            is_test: self.is_test,
        })
    }
}

/// Current time at the microsecond precision the stores keep.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// `updated_at` for a mutation of a row last touched at `previous`. Never
/// equal to or earlier than `previous`, even when the clock steps back.
pub(crate) fn next_update_time(previous: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + chrono::Duration::microseconds(1);
    now().max(floor)
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse RFC 3339 and the offset-less forms written by SQLite's
/// `CURRENT_TIMESTAMP` or a Postgres `timestamp` column (read as UTC).
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn default_true() -> bool {
    true
}

fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn optional_credential<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

/// Booleans from hosted rows may come back as `true`, `1` or `null`.
fn flag_default_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(i)) => i != 0,
        None => true,
    })
}
