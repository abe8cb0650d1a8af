use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use gsecret_core::chain::{Chain, ChainStageBuilder, ForwardChainExecutor, ReverseChainExecutor};
use gsecret_core::error::BuildError;
use gsecret_core::GsecretError;
use gsecret_secret::{GSecretStage, Secret, Token, TokenID, UpdatedSecret, WriteSecret};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeOnWrite {
    None,
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseOnRead {
    None,
    Json,
    Yaml,
    Auto,
}

/// Config for the parse-secret stage.
#[derive(Debug, Clone, Deserialize)]
pub struct ParseSecretConfig {
    #[serde(default = "default_encode_on_write")]
    pub encode_on_write: EncodeOnWrite,
    #[serde(default = "default_parse_on_read")]
    pub parse_on_read: ParseOnRead,
    #[serde(default = "default_true")]
    pub parse_errors_as_string: bool,
    #[serde(default)]
    pub pretty_print: bool,
}

fn default_encode_on_write() -> EncodeOnWrite {
    EncodeOnWrite::Yaml
}

fn default_parse_on_read() -> ParseOnRead {
    ParseOnRead::Auto
}

fn default_true() -> bool {
    true
}

impl Default for ParseSecretConfig {
    fn default() -> Self {
        Self {
            encode_on_write: default_encode_on_write(),
            parse_on_read: default_parse_on_read(),
            parse_errors_as_string: default_true(),
            pretty_print: false,
        }
    }
}

/// Transcodes secret payloads between an opaque wire string and a
/// structured value, on the way in (encode) and out (decode).
pub struct ParseSecretStage {
    config: ParseSecretConfig,
}

impl ParseSecretStage {
    fn try_json(s: &str) -> Option<Value> {
        serde_json::from_str(s).ok()
    }

    fn try_yaml(s: &str) -> Option<Value> {
        serde_yaml::from_str(s).ok()
    }

    /// Decode a stored string payload into structured data. Non-string
    /// values pass through untouched. Returns `Err` only when decoding
    /// fails and `parse_errors_as_string` is disabled.
    fn parse_value(&self, value: Value) -> Result<Value, String> {
        let Value::String(s) = &value else {
            return Ok(value);
        };

        let parsed = match self.config.parse_on_read {
            ParseOnRead::None => return Ok(value),
            ParseOnRead::Auto => Self::try_json(s).or_else(|| Self::try_yaml(s)),
            ParseOnRead::Json => Self::try_json(s),
            ParseOnRead::Yaml => Self::try_yaml(s),
        };

        match parsed {
            Some(v) => Ok(v),
            None if self.config.parse_errors_as_string => Ok(value),
            None => Err(format!(
                "failed to parse secret as {:?}",
                self.config.parse_on_read
            )),
        }
    }

    /// Encode structured data into the string form stored upstream.
    /// Strings pass through untouched.
    fn encode_value(&self, value: Value) -> Value {
        if matches!(&value, Value::String(_)) {
            return value;
        }

        match self.config.encode_on_write {
            EncodeOnWrite::None => Value::String(value.to_string()),
            EncodeOnWrite::Json => {
                let encoded = if self.config.pretty_print {
                    serde_json::to_string_pretty(&value)
                } else {
                    serde_json::to_string(&value)
                };
                encoded.map(Value::String).unwrap_or(value)
            }
            EncodeOnWrite::Yaml => serde_yaml::to_string(&value)
                .map(Value::String)
                .unwrap_or(value),
        }
    }

    fn parse_secret(&self, secret: Secret) -> Result<Secret, GsecretError> {
        let parsed = self
            .parse_value(secret.secret)
            .map_err(GsecretError::internal)?;
        Ok(Secret {
            secret: parsed,
            ..secret
        })
    }
}

#[async_trait]
impl GSecretStage for ParseSecretStage {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let Some(stage) = next.next() else {
            return Err(GsecretError::not_found("secret not found"));
        };
        let secret = stage.get_secret_id(key_id, token, next).await?;
        self.parse_secret(secret)
    }

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let Some(stage) = next.next() else {
            return Err(GsecretError::not_found("secret not found"));
        };
        let secret = stage.get_secret_key(key, token, next).await?;
        self.parse_secret(secret)
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
        let encoded = WriteSecret {
            key: secret.key.clone(),
            secret: self.encode_value(secret.secret.clone()),
        };
        let result = stage.write_secret(&encoded, token, next).await?;
        self.parse_secret(result)
    }

    async fn secret_updated(
        &self,
        secrets: Vec<UpdatedSecret>,
        token_id: &TokenID,
        mut next: ReverseChainExecutor<dyn GSecretStage>,
    ) {
        let parsed: Vec<UpdatedSecret> = secrets
            .into_iter()
            .filter_map(|updated| {
                let parsed_value = self.parse_value(updated.secret.secret.clone()).ok()?;
                Some(UpdatedSecret {
                    secret: Secret {
                        secret: parsed_value,
                        ..updated.secret
                    },
                    ..updated
                })
            })
            .collect();

        if let Some(stage) = next.next() {
            stage.secret_updated(parsed, token_id, next).await;
        }
    }
}

pub struct ParseSecretStageBuilder;

impl ParseSecretStageBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ParseSecretStageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStageBuilder<dyn GSecretStage> for ParseSecretStageBuilder {
    fn build(
        &self,
        config: Option<Value>,
        _chain: &Chain<dyn GSecretStage>,
    ) -> Result<Arc<dyn GSecretStage>, BuildError> {
        let config: ParseSecretConfig = match config {
            Some(v) => serde_json::from_value(v).map_err(|e| BuildError::Schema {
                path: "parse_secret".into(),
                message: e.to_string(),
            })?,
            None => ParseSecretConfig::default(),
        };
        Ok(Arc::new(ParseSecretStage { config }))
    }
}
