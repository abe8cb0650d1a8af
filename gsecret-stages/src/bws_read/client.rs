use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use gsecret_bws_sdk::{epoch, BwsError, BwsSecretClient, Region};
use gsecret_secret::{Secret, TokenID, UpdatedSecret};

/// Tracks one upstream quota bucket: the full-sync bucket, or one
/// individual secret id.
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    max: i64,
    window_seconds: i64,
    remaining: i64,
    reset: DateTime<Utc>,
}

impl ApiRateLimiter {
    pub fn new() -> Self {
        Self {
            max: 0,
            window_seconds: 0,
            remaining: 0,
            reset: Utc::now(),
        }
    }

    /// Parse `<integer><unit>` with unit in `{s, m, h}`; unknown units
    /// collapse to a zero window.
    fn parse_window(window: &str) -> i64 {
        let window = window.trim();
        let (digits, unit) = window.split_at(window.len().saturating_sub(1));
        let Ok(n) = digits.parse::<i64>() else {
            return 0;
        };
        match unit {
            "s" => n,
            "m" => n * 60,
            "h" => n * 3600,
            _ => 0,
        }
    }

    /// A fresh-window observation (`remaining >= current remaining`) resets
    /// `max`/`window`/`reset`; either way `remaining` always advances to the
    /// latest observed value.
    pub fn trigger(&mut self, window_string: &str, remaining: i64) {
        let window_seconds = Self::parse_window(window_string);
        if remaining >= self.remaining {
            self.max = remaining + 1;
            self.window_seconds = window_seconds;
            self.reset = Utc::now() + chrono::Duration::seconds(window_seconds);
        }
        self.remaining = remaining;
    }

    /// `max(min_delay, window / max * 2)` — a 50% safety margin against the
    /// quoted quota. `max == 0` means "no known quota yet": don't sleep.
    pub fn delay(&self, min_delay: Duration) -> Duration {
        if self.max == 0 {
            return Duration::ZERO;
        }
        let computed = (self.window_seconds as f64) / (self.max as f64) * 2.0;
        Duration::from_secs_f64(computed.max(min_delay.as_secs_f64()))
    }

    pub fn api_relation_limit(&self) -> i64 {
        self.max
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn reset(&self) -> DateTime<Utc> {
        self.reset
    }
}

impl Default for ApiRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fired once per sync pass with the batch converted for delivery, and also
/// used to deliver a full snapshot to a newly-registered callback (spec
/// §4.7 "Secret conversion for callbacks"). Implementors are expected to be
/// cheap, non-owning handles — see `gsecret_stages::bws_read::ChainSyncCallback`,
/// which closes over a chain index rather than the stage itself, avoiding
/// the `stage -> client -> callback -> stage` reference cycle flagged in
/// the design notes.
#[async_trait]
pub trait SyncCallback: Send + Sync {
    async fn on_sync(&self, token_id: &TokenID, secrets: Vec<UpdatedSecret>);
}

struct SyncState {
    callbacks: Vec<Arc<dyn SyncCallback>>,
    pending: Vec<Arc<dyn SyncCallback>>,
}

/// One client per `(TokenID, region)`. Owns the
/// SDK client, the `key -> id` translation cache, per-bucket rate limiter
/// state, and the registered sync callbacks. A background task runs the
/// sync loop for the lifetime of the process.
pub struct BwsClient {
    token_id: TokenID,
    stage_label: String,
    http: BwsSecretClient,
    min_sync_delay: Duration,
    kv_translater: Mutex<HashMap<String, String>>,
    sync_rate_limiter: Mutex<ApiRateLimiter>,
    id_rate_limiters: Mutex<HashMap<String, ApiRateLimiter>>,
    sync_state: Mutex<SyncState>,
    last_sync: Mutex<DateTime<Utc>>,
}

impl BwsClient {
    /// `BwsClient::from_token` — instantiates the SDK client and calls
    /// `populate_kv_cache()` before returning.
    pub async fn from_token(
        region: Region,
        access_token: &str,
        stage_label: impl Into<String>,
        token_id: TokenID,
        min_sync_delay: Duration,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            token_id,
            stage_label: stage_label.into(),
            http: BwsSecretClient::new(region, access_token),
            min_sync_delay,
            kv_translater: Mutex::new(HashMap::new()),
            sync_rate_limiter: Mutex::new(ApiRateLimiter::new()),
            id_rate_limiters: Mutex::new(HashMap::new()),
            sync_state: Mutex::new(SyncState {
                callbacks: Vec::new(),
                pending: Vec::new(),
            }),
            last_sync: Mutex::new(epoch()),
        });
        client.populate_kv_cache().await;
        client
    }

    pub fn region(&self) -> &Region {
        self.http.region()
    }

    /// Idempotent registration: a callback already present is left alone;
    /// a new one is appended to both the standing callback list and
    /// `sync_all` so the next sync pass delivers it a full snapshot (spec
    /// §4.7 "Register the callback").
    pub fn register_callback(&self, callback: Arc<dyn SyncCallback>) {
        let mut state = self.sync_state.lock().expect("sync state lock poisoned");
        if state
            .callbacks
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &callback))
        {
            return;
        }
        state.callbacks.push(Arc::clone(&callback));
        state.pending.push(callback);
    }

    async fn populate_kv_cache(self: &Arc<Self>) {
        self.sync(epoch()).await;
        let me = Arc::clone(self);
        tokio::spawn(async move {
            me.sync_loop().await;
        });
    }

    async fn sync_loop(self: Arc<Self>) {
        tokio::time::sleep(self.sync_delay()).await;
        loop {
            let pending = {
                let mut state = self.sync_state.lock().expect("sync state lock poisoned");
                std::mem::take(&mut state.pending)
            };
            if !pending.is_empty() {
                let secrets = self.sync(epoch()).await;
                if let Some(secrets) = secrets {
                    for callback in &pending {
                        callback.on_sync(&self.token_id, secrets.clone()).await;
                    }
                }
                tokio::time::sleep(self.sync_delay()).await;
            }

            let now = Utc::now();
            let since = *self.last_sync.lock().expect("last_sync lock poisoned");
            let secrets = self.sync(since).await;
            *self.last_sync.lock().expect("last_sync lock poisoned") = now;
            if let Some(secrets) = secrets {
                let callbacks = self
                    .sync_state
                    .lock()
                    .expect("sync state lock poisoned")
                    .callbacks
                    .clone();
                for callback in &callbacks {
                    callback.on_sync(&self.token_id, secrets.clone()).await;
                }
            }
            tokio::time::sleep(self.sync_delay()).await;
        }
    }

    fn sync_delay(&self) -> Duration {
        self.sync_rate_limiter
            .lock()
            .expect("sync rate limiter lock poisoned")
            .delay(self.min_sync_delay)
    }

    /// Issues `sync(since)`, updates the full-sync rate limiter, rebuilds
    /// `kv_translater`, and reconciles the per-id rate limiter table (spec
    /// §4.7 "Each sync() updates..."). Returns the converted batch for
    /// callback delivery, or `None` on a "no secrets" (null payload) pass.
    async fn sync(&self, since: DateTime<Utc>) -> Option<Vec<UpdatedSecret>> {
        let response = match self.http.sync(since).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "bws sync failed");
                return None;
            }
        };

        self.sync_rate_limiter
            .lock()
            .expect("sync rate limiter lock poisoned")
            .trigger(&response.ratelimit.limit, response.ratelimit.remaining);

        let Some(secrets) = response.secrets else {
            debug!("bws sync returned no secrets");
            return None;
        };

        {
            let mut kv = self.kv_translater.lock().expect("kv lock poisoned");
            kv.clear();
            for secret in &secrets {
                kv.insert(secret.key.clone(), secret.id.clone());
            }
        }

        {
            let ids: std::collections::HashSet<&str> =
                secrets.iter().map(|s| s.id.as_str()).collect();
            let mut limiters = self.id_rate_limiters.lock().expect("id limiter lock poisoned");
            limiters.retain(|id, _| ids.contains(id.as_str()));
            for id in &ids {
                limiters.entry((*id).to_string()).or_insert_with(ApiRateLimiter::new);
            }
        }

        Some(
            secrets
                .into_iter()
                .map(|s| self.convert_for_callback(s.id, s.key, s.value))
                .collect(),
        )
    }

    fn convert_for_callback(&self, id: String, key: String, value: String) -> UpdatedSecret {
        let api_id_relation = format!("{}:id:{}", self.stage_label, id);
        let api_key_relation = format!("{}:key:{}", self.stage_label, id);
        UpdatedSecret {
            secret: Secret {
                key_id: id,
                key,
                secret: serde_json::Value::String(value),
                rate_limit: None,
            },
            api_id_relation: Some(api_id_relation),
            api_key_relation: Some(api_key_relation),
        }
    }

    /// `key -> id` lookup, consulting the cache populated by `sync`.
    fn translate_key(&self, key: &str) -> Option<String> {
        self.kv_translater
            .lock()
            .expect("kv lock poisoned")
            .get(key)
            .cloned()
    }

    /// `GET /api/secrets/{id}`, updating the per-id rate limiter from the
    /// response headers.
    pub async fn get_by_id(
        &self,
        id: &str,
    ) -> Result<(Secret, String), BwsError> {
        let resp = self.http.get_by_id(id).await?;
        let mut limiters = self.id_rate_limiters.lock().expect("id limiter lock poisoned");
        let limiter = limiters.entry(id.to_string()).or_insert_with(ApiRateLimiter::new);
        limiter.trigger(&resp.ratelimit.limit, resp.ratelimit.remaining);
        let api_relation = format!("{}:id:{}", self.stage_label, id);
        Ok((
            Secret {
                key_id: resp.id,
                key: resp.key,
                secret: serde_json::Value::String(resp.value),
                rate_limit: Some(gsecret_secret::RateLimit {
                    limit: limiter.api_relation_limit(),
                    remaining: limiter.remaining(),
                    reset: limiter.reset(),
                    api_relation: api_relation.clone(),
                }),
            },
            api_relation,
        ))
    }

    /// Translates `key` to an id via `kv_translater`, then delegates to
    /// `get_by_id`.
    pub async fn get_by_key(&self, key: &str) -> Result<(Secret, String), BwsError> {
        let Some(id) = self.translate_key(key) else {
            return Err(BwsError::SecretNotFound);
        };
        self.get_by_id(&id).await
    }
}

/// Maps `TokenID -> BwsClient` plus a parallel `TokenID -> region key` used
/// to reject a token that tries to target two upstreams through the same
/// stage instance.
pub struct BwsClientController {
    stage_label: String,
    min_sync_delay: Duration,
    clients: tokio::sync::Mutex<HashMap<String, (Arc<BwsClient>, String)>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMismatch;

impl BwsClientController {
    pub fn new(stage_label: impl Into<String>, min_sync_delay: Duration) -> Self {
        Self {
            stage_label: stage_label.into(),
            min_sync_delay,
            clients: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_client(
        &self,
        token_id: &TokenID,
        access_token: &str,
        region: Region,
        callback: Arc<dyn SyncCallback>,
    ) -> Result<Arc<BwsClient>, RegionMismatch> {
        let mut clients = self.clients.lock().await;
        let region_key = region.key();
        if let Some((client, existing_region_key)) = clients.get(token_id.as_str()) {
            if *existing_region_key != region_key {
                return Err(RegionMismatch);
            }
            client.register_callback(callback);
            return Ok(Arc::clone(client));
        }

        let client = BwsClient::from_token(
            region,
            access_token,
            self.stage_label.clone(),
            token_id.clone(),
            self.min_sync_delay,
        )
        .await;
        client.register_callback(callback);
        clients.insert(token_id.as_str().to_string(), (Arc::clone(&client), region_key));
        Ok(client)
    }
}
