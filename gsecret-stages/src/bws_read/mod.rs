mod client;

pub use client::{ApiRateLimiter, BwsClient, BwsClientController, SyncCallback};

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use gsecret_bws_sdk::{BwsError, Region};
use gsecret_core::chain::{Chain, ChainStageBuilder, ForwardChainExecutor, ReverseChainExecutor};
use gsecret_core::error::BuildError;
use gsecret_core::GsecretError;
use gsecret_secret::{GSecretStage, Secret, Token, TokenID, UpdatedSecret, WriteSecret};

fn default_api_url() -> String {
    Region::us().api_url
}

fn default_identity_url() -> String {
    Region::us().identity_url
}

fn default_stage_label() -> String {
    "bws_read".to_string()
}

fn default_min_sync_delay_seconds() -> f64 {
    0.1
}

/// Config for the upstream-read stage. `api_url`/`identity_url`
/// select the Bitwarden Secrets Manager deployment a token's client talks
/// to; `stage_label` seeds the `api_relation` strings this stage's sync
/// callbacks hand to the cache and rate-limiter stages further up the chain.
#[derive(Debug, Clone, Deserialize)]
pub struct BwsReadConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    #[serde(default = "default_stage_label")]
    pub stage_label: String,
    #[serde(default = "default_min_sync_delay_seconds")]
    pub min_sync_delay_seconds: f64,
}

impl Default for BwsReadConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            identity_url: default_identity_url(),
            stage_label: default_stage_label(),
            min_sync_delay_seconds: default_min_sync_delay_seconds(),
        }
    }
}

impl BwsReadConfig {
    fn region(&self) -> Region {
        Region::new(self.api_url.clone(), self.identity_url.clone())
    }
}

/// A cheap, non-owning callback handle registered with a token's
/// `BwsClient`. Closes over a chain index rather than the stage itself,
/// so it never holds a strong reference back into the chain that owns it.
struct ChainSyncCallback {
    chain: Weak<Chain<dyn GSecretStage>>,
    index: usize,
}

#[async_trait]
impl SyncCallback for ChainSyncCallback {
    async fn on_sync(&self, token_id: &TokenID, secrets: Vec<UpdatedSecret>) {
        let Some(chain) = self.chain.upgrade() else {
            return;
        };
        if self.index == 0 {
            return;
        }
        let mut exec = ReverseChainExecutor::at(chain, self.index as i64 - 1);
        if let Some(prev_stage) = exec.next() {
            prev_stage.secret_updated(secrets, token_id, exec).await;
        }
    }
}

fn map_bws_error(err: BwsError) -> GsecretError {
    match err {
        BwsError::Unauthorised => GsecretError::unauthorised("upstream rejected credentials"),
        BwsError::ApiRateLimit => GsecretError::rate_limited("upstream rate limit exceeded"),
        BwsError::SecretNotFound => GsecretError::not_found("secret not found"),
        BwsError::SecretParse(reason) => GsecretError::internal(reason),
        BwsError::SendRequest(reason) => GsecretError::internal(reason.to_string()),
        BwsError::ApiError(reason) => GsecretError::internal(reason),
    }
}

/// Reads secrets from Bitwarden Secrets Manager, forwarding a miss instead
/// of answering 404 itself so a generator stage further down the chain can
/// fill the gap. Never writes; `secret_updated` is a pure
/// forward as a reverse-chain participant (it only *originates* reverse
/// propagation via `SyncCallback`, it doesn't receive it).
pub struct BwsReadStage {
    config: BwsReadConfig,
    controller: Arc<BwsClientController>,
    chain_position: Mutex<Option<(Weak<Chain<dyn GSecretStage>>, usize)>>,
}

impl BwsReadStage {
    fn sync_callback(&self) -> Arc<dyn SyncCallback> {
        let position = self.chain_position.lock().expect("chain position lock poisoned");
        match position.as_ref() {
            Some((chain, index)) => Arc::new(ChainSyncCallback {
                chain: chain.clone(),
                index: *index,
            }),
            None => Arc::new(ChainSyncCallback {
                chain: Weak::new(),
                index: 0,
            }),
        }
    }

    async fn client_for(&self, token: &Token) -> Result<Arc<BwsClient>, GsecretError> {
        let token_id = token.to_token_id();
        self.controller
            .get_client(&token_id, token.as_str(), self.config.region(), self.sync_callback())
            .await
            .map_err(|_| GsecretError::internal("token already bound to a different bws region"))
    }
}

#[async_trait]
impl GSecretStage for BwsReadStage {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let client = self.client_for(token).await?;
        match client.get_by_id(key_id).await {
            Ok((secret, _api_relation)) => Ok(secret),
            Err(BwsError::SecretNotFound) => match next.next() {
                Some(stage) => stage.get_secret_id(key_id, token, next).await,
                None => Err(GsecretError::not_found("secret not found")),
            },
            Err(e) => Err(map_bws_error(e)),
        }
    }

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let client = self.client_for(token).await?;
        match client.get_by_key(key).await {
            Ok((secret, _api_relation)) => Ok(secret),
            Err(BwsError::SecretNotFound) => match next.next() {
                Some(stage) => stage.get_secret_key(key, token, next).await,
                None => Err(GsecretError::not_found("secret not found")),
            },
            Err(e) => Err(map_bws_error(e)),
        }
    }

    async fn write_secret(
        &self,
        secret: &WriteSecret,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        match next.next() {
            Some(stage) => stage.write_secret(secret, token, next).await,
            None => Err(GsecretError::not_supported("write not supported in read-only mode")),
        }
    }

    async fn secret_updated(
        &self,
        secrets: Vec<UpdatedSecret>,
        token_id: &TokenID,
        mut next: ReverseChainExecutor<dyn GSecretStage>,
    ) {
        if let Some(stage) = next.next() {
            stage.secret_updated(secrets, token_id, next).await;
        }
    }

    fn bind_chain(&self, chain: &Arc<Chain<dyn GSecretStage>>, index: usize) {
        *self.chain_position.lock().expect("chain position lock poisoned") =
            Some((Arc::downgrade(chain), index));
    }
}

/// Shares one [`BwsClientController`] (and every client it ever builds)
/// across every chain this builder instantiates.
pub struct BwsReadStageBuilder {
    controller: Arc<BwsClientController>,
    label: String,
}

impl BwsReadStageBuilder {
    pub fn new(stage_label: impl Into<String>, min_sync_delay: Duration) -> Self {
        let label = stage_label.into();
        Self {
            controller: Arc::new(BwsClientController::new(label.clone(), min_sync_delay)),
            label,
        }
    }
}

impl Default for BwsReadStageBuilder {
    fn default() -> Self {
        Self::new(default_stage_label(), Duration::from_secs_f64(default_min_sync_delay_seconds()))
    }
}

impl ChainStageBuilder<dyn GSecretStage> for BwsReadStageBuilder {
    fn build(
        &self,
        config: Option<Value>,
        _chain: &Chain<dyn GSecretStage>,
    ) -> Result<Arc<dyn GSecretStage>, BuildError> {
        let mut config: BwsReadConfig = match config {
            Some(v) => serde_json::from_value(v).map_err(|e| BuildError::Schema {
                path: "bws_read".into(),
                message: e.to_string(),
            })?,
            None => BwsReadConfig::default(),
        };
        if config.stage_label == default_stage_label() {
            config.stage_label = self.label.clone();
        }
        Ok(Arc::new(BwsReadStage {
            config,
            controller: Arc::clone(&self.controller),
            chain_position: Mutex::new(None),
        }))
    }
}
