use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use gsecret_bws_sdk::{BwsError, BwsSecretClient, Region};
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

fn default_note() -> String {
    String::new()
}

/// Config for the upstream-write stage.
#[derive(Debug, Clone, Deserialize)]
pub struct BwsWriteConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    /// Free-text note attached to a newly-created secret.
    #[serde(default = "default_note")]
    pub note: String,
    /// Bitwarden project ids the new secret is attached to.
    #[serde(default)]
    pub project_ids: Vec<String>,
}

impl Default for BwsWriteConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            identity_url: default_identity_url(),
            note: default_note(),
            project_ids: Vec::new(),
        }
    }
}

impl BwsWriteConfig {
    fn region(&self) -> Region {
        Region::new(self.api_url.clone(), self.identity_url.clone())
    }
}

fn map_bws_error(err: BwsError) -> GsecretError {
    match err {
        BwsError::Unauthorised => GsecretError::unauthorised("upstream rejected credentials"),
        BwsError::ApiRateLimit => GsecretError::rate_limited("upstream rate limit exceeded"),
        BwsError::SecretNotFound => GsecretError::not_found("secret not found"),
        BwsError::SecretParse(reason) => GsecretError::internal(reason),
        BwsError::SendRequest(reason) => GsecretError::transport(reason.to_string()),
        BwsError::ApiError(reason) => GsecretError::internal(reason),
    }
}

/// Writes new secrets to Bitwarden Secrets Manager. Simpler sibling of
/// [`crate::bws_read::BwsReadStage`]: no caching, no sync loop, a fresh
/// per-token client built lazily and kept for the process lifetime (spec
/// §4.8). Never originates reverse propagation.
pub struct BwsWriteStage {
    config: BwsWriteConfig,
    clients: StdMutex<std::collections::HashMap<String, Arc<BwsSecretClient>>>,
}

impl BwsWriteStage {
    fn client_for(&self, token: &Token) -> Arc<BwsSecretClient> {
        let token_id = token.to_token_id();
        let mut clients = self.clients.lock().expect("write client cache lock poisoned");
        clients
            .entry(token_id.as_str().to_string())
            .or_insert_with(|| Arc::new(BwsSecretClient::new(self.config.region(), token.as_str())))
            .clone()
    }
}

#[async_trait]
impl GSecretStage for BwsWriteStage {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        match next.next() {
            Some(stage) => stage.get_secret_id(key_id, token, next).await,
            None => Err(GsecretError::not_found("secret not found")),
        }
    }

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        match next.next() {
            Some(stage) => stage.get_secret_key(key, token, next).await,
            None => Err(GsecretError::not_found("secret not found")),
        }
    }

    async fn write_secret(
        &self,
        secret: &WriteSecret,
        token: &Token,
        _next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let client = self.client_for(token);
        let Value::String(value) = &secret.secret else {
            return Err(GsecretError::internal("secret value must be a string by write time"));
        };
        let created = client
            .create(&secret.key, value, &self.config.note, &self.config.project_ids)
            .await
            .map_err(map_bws_error)?;
        Ok(Secret {
            key_id: created.id,
            key: created.key,
            secret: Value::String(created.value),
            rate_limit: None,
        })
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
}

pub struct BwsWriteStageBuilder;

impl BwsWriteStageBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BwsWriteStageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStageBuilder<dyn GSecretStage> for BwsWriteStageBuilder {
    fn build(
        &self,
        config: Option<Value>,
        _chain: &Chain<dyn GSecretStage>,
    ) -> Result<Arc<dyn GSecretStage>, BuildError> {
        let config: BwsWriteConfig = match config {
            Some(v) => serde_json::from_value(v).map_err(|e| BuildError::Schema {
                path: "bws_write".into(),
                message: e.to_string(),
            })?,
            None => BwsWriteConfig::default(),
        };
        Ok(Arc::new(BwsWriteStage {
            config,
            clients: StdMutex::new(std::collections::HashMap::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsecret_core::chain::Chain;

    struct NoDownstream;

    #[async_trait]
    impl GSecretStage for NoDownstream {
        async fn get_secret_id(
            &self,
            _key_id: &str,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            unreachable!("not exercised")
        }
        async fn get_secret_key(
            &self,
            _key: &str,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            unreachable!("not exercised")
        }
        async fn write_secret(
            &self,
            _secret: &WriteSecret,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            unreachable!("not exercised")
        }
        async fn secret_updated(
            &self,
            _secrets: Vec<UpdatedSecret>,
            _token_id: &TokenID,
            _next: ReverseChainExecutor<dyn GSecretStage>,
        ) {
        }
    }

    #[tokio::test]
    async fn get_secret_id_with_no_downstream_is_not_found() {
        let stage = BwsWriteStage {
            config: BwsWriteConfig::default(),
            clients: StdMutex::new(std::collections::HashMap::new()),
        };
        let chain: Arc<Chain<dyn GSecretStage>> = Arc::new(Chain::new("c1"));
        let exec = ForwardChainExecutor::new(chain);
        let token = Token::new("tok");
        let err = stage.get_secret_id("a", &token, exec).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn non_string_value_at_write_time_is_an_internal_error() {
        let stage = BwsWriteStage {
            config: BwsWriteConfig::default(),
            clients: StdMutex::new(std::collections::HashMap::new()),
        };
        let mut chain: Chain<dyn GSecretStage> = Chain::new("c1");
        chain.add_stage(Arc::new(NoDownstream) as Arc<dyn GSecretStage>);
        let chain = Arc::new(chain);
        let exec = ForwardChainExecutor::new(chain);
        let token = Token::new("tok");
        let write = WriteSecret {
            key: "k".into(),
            secret: serde_json::json!({"not": "a string"}),
        };
        let err = stage.write_secret(&write, &token, exec).await.unwrap_err();
        assert_eq!(err.code, 500);
    }

    #[tokio::test]
    async fn client_for_token_is_cached_across_calls() {
        let stage = BwsWriteStage {
            config: BwsWriteConfig::default(),
            clients: StdMutex::new(std::collections::HashMap::new()),
        };
        let token = Token::new("tok");
        let first = stage.client_for(&token);
        let second = stage.client_for(&token);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
