use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Quota state returned alongside a secret when the originating upstream
/// exposes one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimit {
    pub limit: i64,
    pub remaining: i64,
    pub reset: DateTime<Utc>,
    /// Which upstream relationship this quota belongs to, e.g. `"bws_read"`.
    pub api_relation: String,
}

/// A secret as handed from one stage to the next, or out to the caller.
/// `secret` is left as a raw JSON value since a stage may hold it as an
/// opaque string (no parse_secret stage in the chain) or as a decoded
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Secret {
    pub key_id: String,
    pub key: String,
    pub secret: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

/// A `Secret` plus the upstream linkage it arrived with, used on the
/// reverse path so a cache stage can tell which of its own dual indexes
/// (`id` or `key`) the update applies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdatedSecret {
    #[serde(flatten)]
    pub secret: Secret,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id_relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_relation: Option<String>,
}

/// Body of a write request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteSecret {
    pub key: String,
    pub secret: Value,
}
