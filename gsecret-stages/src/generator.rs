use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use gsecret_core::chain::{Chain, ChainStageBuilder, ForwardChainExecutor, ReverseChainExecutor};
use gsecret_core::error::BuildError;
use gsecret_core::GsecretError;
use gsecret_secret::{GSecretStage, Secret, Token, TokenID, UpdatedSecret, WriteSecret};

const AMBIGUOUS_CHARS: &str = "0Ol1I";
const SIMILAR_CHARS: &str = "il1Lo0O";

/// Character-set and exclusion options for the generated value.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_length")]
    pub length: usize,
    #[serde(default = "default_true")]
    pub include_uppercase: bool,
    #[serde(default = "default_true")]
    pub include_lowercase: bool,
    #[serde(default = "default_true")]
    pub include_numbers: bool,
    #[serde(default)]
    pub include_symbols: bool,
    #[serde(default)]
    pub custom_charset: Option<String>,
    #[serde(default = "default_symbol_set")]
    pub symbol_set: String,
    #[serde(default)]
    pub exclude_ambiguous: bool,
    #[serde(default)]
    pub exclude_similar: bool,
    #[serde(default)]
    pub exclude_chars: String,
}

fn default_length() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_symbol_set() -> String {
    "!@#$%^&*()_+-=[]{}|;:,.<>?".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            length: default_length(),
            include_uppercase: true,
            include_lowercase: true,
            include_numbers: true,
            include_symbols: false,
            custom_charset: None,
            symbol_set: default_symbol_set(),
            exclude_ambiguous: false,
            exclude_similar: false,
            exclude_chars: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub overwrite_existing: bool,
}

/// Fills in missing secrets by generating a fresh value and writing it
/// downstream on a cache miss, instead of surfacing the 404.
pub struct GeneratorStage {
    config: GeneratorConfig,
}

impl GeneratorStage {
    fn build_charset(&self) -> String {
        let gen = &self.config.generation;
        let mut charset = match &gen.custom_charset {
            Some(custom) if !custom.is_empty() => custom.clone(),
            _ => {
                let mut s = String::new();
                if gen.include_uppercase {
                    s.push_str("ABCDEFGHIJKLMNOPQRSTUVWXYZ");
                }
                if gen.include_lowercase {
                    s.push_str("abcdefghijklmnopqrstuvwxyz");
                }
                if gen.include_numbers {
                    s.push_str("0123456789");
                }
                if gen.include_symbols {
                    s.push_str(&gen.symbol_set);
                }
                s
            }
        };

        if gen.exclude_ambiguous {
            charset.retain(|c| !AMBIGUOUS_CHARS.contains(c));
        }
        if gen.exclude_similar {
            charset.retain(|c| !SIMILAR_CHARS.contains(c));
        }
        if !gen.exclude_chars.is_empty() {
            charset.retain(|c| !gen.exclude_chars.contains(c));
        }
        charset
    }

    fn generate_secret(&self) -> String {
        let charset: Vec<char> = self.build_charset().chars().collect();
        if charset.is_empty() {
            return String::new();
        }
        let mut rng = OsRng;
        (0..self.config.generation.length)
            .map(|_| charset[rng.gen_range(0..charset.len())])
            .collect()
    }
}

#[async_trait]
impl GSecretStage for GeneratorStage {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let Some(stage) = next.next() else {
            return Err(GsecretError::not_found("secret not found"));
        };
        stage.get_secret_id(key_id, token, next).await
    }

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let Some(stage) = next.next() else {
            return Err(GsecretError::not_supported(
                "cannot generate secret: no write stage in chain",
            ));
        };

        if !self.config.overwrite_existing {
            let result = stage.get_secret_key(key, token, next.copy()).await;
            match result {
                Ok(secret) => return Ok(secret),
                Err(e) if !e.is_not_found() => return Err(e),
                Err(_) => {}
            }
        }

        let write_secret = WriteSecret {
            key: key.to_string(),
            secret: Value::String(self.generate_secret()),
        };
        stage.write_secret(&write_secret, token, next).await
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
        if let Some(stage) = next.next() {
            stage.secret_updated(secrets, token_id, next).await;
        }
    }
}

pub struct GeneratorStageBuilder;

impl GeneratorStageBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeneratorStageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStageBuilder<dyn GSecretStage> for GeneratorStageBuilder {
    fn build(
        &self,
        config: Option<Value>,
        _chain: &Chain<dyn GSecretStage>,
    ) -> Result<Arc<dyn GSecretStage>, BuildError> {
        let config: GeneratorConfig = match config {
            Some(v) => serde_json::from_value(v).map_err(|e| BuildError::Schema {
                path: "generator".into(),
                message: e.to_string(),
            })?,
            None => GeneratorConfig::default(),
        };
        Ok(Arc::new(GeneratorStage { config }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsecret_core::chain::Chain;

    struct FoundUpstream;
    struct MissingUpstream;
    struct WritingUpstream;

    #[async_trait]
    impl GSecretStage for FoundUpstream {
        async fn get_secret_id(
            &self,
            _key_id: &str,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            unreachable!()
        }
        async fn get_secret_key(
            &self,
            key: &str,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            Ok(Secret {
                key_id: "existing-id".into(),
                key: key.into(),
                secret: Value::String("existing".into()),
                rate_limit: None,
            })
        }
        async fn write_secret(
            &self,
            _secret: &WriteSecret,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            unreachable!()
        }
        async fn secret_updated(
            &self,
            _secrets: Vec<UpdatedSecret>,
            _token_id: &TokenID,
            _next: ReverseChainExecutor<dyn GSecretStage>,
        ) {
        }
    }

    #[async_trait]
    impl GSecretStage for MissingUpstream {
        async fn get_secret_id(
            &self,
            _key_id: &str,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            unreachable!()
        }
        async fn get_secret_key(
            &self,
            _key: &str,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            Err(GsecretError::not_found("no such secret"))
        }
        async fn write_secret(
            &self,
            secret: &WriteSecret,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            Ok(Secret {
                key_id: "generated-id".into(),
                key: secret.key.clone(),
                secret: secret.secret.clone(),
                rate_limit: None,
            })
        }
        async fn secret_updated(
            &self,
            _secrets: Vec<UpdatedSecret>,
            _token_id: &TokenID,
            _next: ReverseChainExecutor<dyn GSecretStage>,
        ) {
        }
    }

    #[async_trait]
    impl GSecretStage for WritingUpstream {
        async fn get_secret_id(
            &self,
            _key_id: &str,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            unreachable!()
        }
        async fn get_secret_key(
            &self,
            _key: &str,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            unreachable!()
        }
        async fn write_secret(
            &self,
            secret: &WriteSecret,
            _token: &Token,
            _next: ForwardChainExecutor<dyn GSecretStage>,
        ) -> Result<Secret, GsecretError> {
            Ok(Secret {
                key_id: "new-id".into(),
                key: secret.key.clone(),
                secret: secret.secret.clone(),
                rate_limit: None,
            })
        }
        async fn secret_updated(
            &self,
            _secrets: Vec<UpdatedSecret>,
            _token_id: &TokenID,
            _next: ReverseChainExecutor<dyn GSecretStage>,
        ) {
        }
    }

    fn chain_with(upstream: Arc<dyn GSecretStage>) -> Arc<Chain<dyn GSecretStage>> {
        let mut chain: Chain<dyn GSecretStage> = Chain::new("c1");
        chain.add_stage(upstream);
        Arc::new(chain)
    }

    #[tokio::test]
    async fn existing_secret_is_returned_without_generating() {
        let stage = GeneratorStage {
            config: GeneratorConfig::default(),
        };
        let chain = chain_with(Arc::new(FoundUpstream));
        let exec = ForwardChainExecutor::new(chain);
        let token = Token::new("tok");
        let result = stage.get_secret_key("k", &token, exec).await.unwrap();
        assert_eq!(result.secret, Value::String("existing".into()));
    }

    #[tokio::test]
    async fn missing_secret_triggers_generation_and_write() {
        let stage = GeneratorStage {
            config: GeneratorConfig {
                generation: GenerationConfig {
                    length: 16,
                    ..GenerationConfig::default()
                },
                overwrite_existing: false,
            },
        };
        let chain = chain_with(Arc::new(MissingUpstream));
        let exec = ForwardChainExecutor::new(chain);
        let token = Token::new("tok");
        let result = stage.get_secret_key("k", &token, exec).await.unwrap();
        let Value::String(generated) = result.secret else {
            panic!("expected string secret")
        };
        assert_eq!(generated.len(), 16);
    }

    #[tokio::test]
    async fn overwrite_existing_skips_the_read_attempt() {
        let stage = GeneratorStage {
            config: GeneratorConfig {
                generation: GenerationConfig {
                    length: 8,
                    ..GenerationConfig::default()
                },
                overwrite_existing: true,
            },
        };
        let chain = chain_with(Arc::new(WritingUpstream));
        let exec = ForwardChainExecutor::new(chain);
        let token = Token::new("tok");
        let result = stage.get_secret_key("k", &token, exec).await.unwrap();
        assert_eq!(result.key_id, "new-id");
    }

    #[test]
    fn exclusions_remove_ambiguous_characters() {
        let stage = GeneratorStage {
            config: GeneratorConfig {
                generation: GenerationConfig {
                    include_uppercase: true,
                    include_lowercase: false,
                    include_numbers: true,
                    exclude_ambiguous: true,
                    ..GenerationConfig::default()
                },
                overwrite_existing: false,
            },
        };
        let charset = stage.build_charset();
        for c in AMBIGUOUS_CHARS.chars() {
            assert!(!charset.contains(c), "charset should not contain {c}");
        }
    }
}
