mod controller;

pub use controller::{CacheController, TokenCache};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use gsecret_core::chain::{Chain, ChainStageBuilder, ForwardChainExecutor, ReverseChainExecutor};
use gsecret_core::error::BuildError;
use gsecret_core::{GsecretError, Metrics};
use gsecret_secret::{GSecretStage, Secret, Token, TokenID, UpdatedSecret, WriteSecret};

/// Config for the cache stage. `ttl_seconds = 0` disables
/// expiration entirely.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
    #[serde(default = "default_invalidate_on_upstream_error")]
    pub invalidate_on_upstream_error: bool,
}

fn default_ttl_seconds() -> i64 {
    300
}

fn default_invalidate_on_upstream_error() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            invalidate_on_upstream_error: default_invalidate_on_upstream_error(),
        }
    }
}

/// Read-through cache in front of the rest of the chain, keyed per token
///. Shares one [`CacheController`] across every chain the
/// builder instantiates, so tokens' caches persist for the process
/// lifetime regardless of how many chains reference this stage.
pub struct CacheStage {
    config: CacheConfig,
    controller: Arc<CacheController>,
    metrics: Arc<Metrics>,
    chain_name: String,
}

#[async_trait]
impl GSecretStage for CacheStage {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let token_cache = self.controller.get_token_cache(&token.to_token_id());
        if let Some(secret) = token_cache.get_by_id(key_id, self.config.ttl_seconds) {
            self.metrics.record_cache_hit(&self.chain_name, "id");
            return Ok(secret);
        }
        self.metrics.record_cache_miss(&self.chain_name, "id");

        let Some(stage) = next.next() else {
            return Err(GsecretError::not_found("secret not found"));
        };
        let result = stage.get_secret_id(key_id, token, next).await;
        self.reconcile_single(&token_cache, key_id, &result);
        result
    }

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let token_cache = self.controller.get_token_cache(&token.to_token_id());
        if let Some(secret) = token_cache.get_by_key(key, self.config.ttl_seconds) {
            self.metrics.record_cache_hit(&self.chain_name, "key");
            return Ok(secret);
        }
        self.metrics.record_cache_miss(&self.chain_name, "key");

        let Some(stage) = next.next() else {
            return Err(GsecretError::not_found("secret not found"));
        };
        let result = stage.get_secret_key(key, token, next).await;
        match &result {
            Ok(secret) => token_cache.upsert(secret),
            Err(e) if e.is_not_found() => token_cache.invalidate_by_key(key),
            Err(_) if self.config.invalidate_on_upstream_error => {
                token_cache.invalidate_by_key(key)
            }
            _ => {}
        }
        result
    }

    async fn write_secret(
        &self,
        secret: &WriteSecret,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let Some(stage) = next.next() else {
            return Err(GsecretError::not_supported("write operations not supported"));
        };
        let result = stage.write_secret(secret, token, next).await;
        if let Ok(written) = &result {
            let token_cache = self.controller.get_token_cache(&token.to_token_id());
            token_cache.upsert(written);
        }
        result
    }

    async fn secret_updated(
        &self,
        secrets: Vec<UpdatedSecret>,
        token_id: &TokenID,
        mut next: ReverseChainExecutor<dyn GSecretStage>,
    ) {
        let token_cache = self.controller.get_token_cache(token_id);
        token_cache.reconcile(&secrets);

        if let Some(stage) = next.next() {
            stage.secret_updated(secrets, token_id, next).await;
        }
    }
}

impl CacheStage {
    fn reconcile_single(
        &self,
        token_cache: &TokenCache,
        key_id: &str,
        result: &Result<Secret, GsecretError>,
    ) {
        match result {
            Ok(secret) => token_cache.upsert(secret),
            Err(e) if e.is_not_found() => token_cache.invalidate_by_id(key_id),
            Err(_) if self.config.invalidate_on_upstream_error => {
                token_cache.invalidate_by_id(key_id)
            }
            _ => {}
        }
    }
}

pub struct CacheStageBuilder {
    controller: Arc<CacheController>,
    metrics: Arc<Metrics>,
}

impl CacheStageBuilder {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            controller: Arc::new(CacheController::new()),
            metrics,
        }
    }
}

impl ChainStageBuilder<dyn GSecretStage> for CacheStageBuilder {
    fn build(
        &self,
        config: Option<Value>,
        chain: &Chain<dyn GSecretStage>,
    ) -> Result<Arc<dyn GSecretStage>, BuildError> {
        let config: CacheConfig = match config {
            Some(v) => serde_json::from_value(v).map_err(|e| BuildError::Schema {
                path: "cache".into(),
                message: e.to_string(),
            })?,
            None => CacheConfig::default(),
        };
        Ok(Arc::new(CacheStage {
            config,
            controller: Arc::clone(&self.controller),
            metrics: Arc::clone(&self.metrics),
            chain_name: chain.name.clone(),
        }))
    }
}
