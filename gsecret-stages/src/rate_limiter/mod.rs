mod buffer;

pub use buffer::{BufferController, BufferDelay, BufferRateLimits, BufferedStageClient};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use gsecret_core::chain::{Chain, ChainStageBuilder, ForwardChainExecutor, ReverseChainExecutor};
use gsecret_core::error::BuildError;
use gsecret_core::{GsecretError, Metrics};
use gsecret_secret::{GSecretStage, Secret, Token, TokenID, UpdatedSecret, WriteSecret};

/// Config for the rate-limiter stage.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_delay_seconds")]
    pub default_delay_seconds: f64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
}

fn default_delay_seconds() -> f64 {
    2.0
}

fn default_timeout_seconds() -> f64 {
    10.0
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_delay_seconds: default_delay_seconds(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Buffers requests in front of the chain so upstream rate-limit windows
/// never see a burst larger than their quota.
pub struct RateLimiterStage {
    timeout: Duration,
    client: BufferedStageClient,
}

#[async_trait]
impl GSecretStage for RateLimiterStage {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let delay = BufferDelay::new(self.timeout);
        self.client.id_delay(key_id, &delay).await;

        let Some(stage) = next.next() else {
            return Err(GsecretError::internal("no executor available"));
        };
        let result = stage.get_secret_id(key_id, token, next).await;
        if let Ok(secret) = &result {
            if let Some(rate_limit) = &secret.rate_limit {
                self.client.log_id_rate_limit(
                    key_id,
                    &rate_limit.api_relation,
                    BufferRateLimits {
                        remaining: rate_limit.remaining,
                        resets: rate_limit.reset,
                    },
                );
            }
        }
        result
    }

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let delay = BufferDelay::new(self.timeout);
        self.client.key_delay(key, &delay).await;

        let Some(stage) = next.next() else {
            return Err(GsecretError::internal("no executor available"));
        };
        let result = stage.get_secret_key(key, token, next).await;
        if let Ok(secret) = &result {
            if let Some(rate_limit) = &secret.rate_limit {
                self.client.log_key_rate_limit(
                    key,
                    &rate_limit.api_relation,
                    BufferRateLimits {
                        remaining: rate_limit.remaining,
                        resets: rate_limit.reset,
                    },
                );
            }
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
        stage.write_secret(secret, token, next).await
    }

    async fn secret_updated(
        &self,
        secrets: Vec<UpdatedSecret>,
        token_id: &TokenID,
        mut next: ReverseChainExecutor<dyn GSecretStage>,
    ) {
        for updated in &secrets {
            if let Some(bucket) = &updated.api_id_relation {
                self.client.register_id_bucket(&updated.secret.key_id, bucket);
            }
            if let Some(bucket) = &updated.api_key_relation {
                self.client.register_key_bucket(&updated.secret.key, bucket);
            }
        }
        if let Some(stage) = next.next() {
            stage.secret_updated(secrets, token_id, next).await;
        }
    }
}

/// Shares one [`BufferController`] (and its background scheduler task)
/// across every chain this builder instantiates.
pub struct RateLimiterStageBuilder {
    controller: Arc<BufferController>,
}

impl RateLimiterStageBuilder {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            controller: BufferController::spawn(metrics),
        }
    }
}

impl ChainStageBuilder<dyn GSecretStage> for RateLimiterStageBuilder {
    fn build(
        &self,
        config: Option<Value>,
        _chain: &Chain<dyn GSecretStage>,
    ) -> Result<Arc<dyn GSecretStage>, BuildError> {
        let config: RateLimiterConfig = match config {
            Some(v) => serde_json::from_value(v).map_err(|e| BuildError::Schema {
                path: "rate_limiter".into(),
                message: e.to_string(),
            })?,
            None => RateLimiterConfig::default(),
        };
        let client = BufferedStageClient::new(
            Arc::clone(&self.controller),
            Duration::from_secs_f64(config.default_delay_seconds),
        );
        Ok(Arc::new(RateLimiterStage {
            timeout: Duration::from_secs_f64(config.timeout_seconds),
            client,
        }))
    }
}
