use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One secret as Bitwarden returns it: opaque id, human key, raw value.
#[derive(Debug, Clone, Deserialize)]
pub struct BwsSecret {
    pub id: String,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Quota header shape: `limit` is a window string (`"10s"`, `"5m"`, `"1h"`),
/// parsed as `<integer><unit>`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitHeader {
    pub limit: String,
    pub remaining: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    pub secrets: Option<Vec<BwsSecret>>,
    pub ratelimit: RateLimitHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetByIdResponse {
    pub id: String,
    pub key: String,
    pub value: String,
    pub ratelimit: RateLimitHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateResponse {
    pub id: String,
    pub key: String,
    pub value: String,
}

pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable")
}
