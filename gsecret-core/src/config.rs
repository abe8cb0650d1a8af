use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::BuildError;

/// One step of a chain: a stage name plus its stage-specific config blob,
/// e.g. `{ name: cache, config: { ttl_seconds: 300 } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainStepConfig {
    pub name: String,
    #[serde(default)]
    pub config: Option<Value>,
}

/// One named chain within one API: `{ api, name, steps: [...] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub api: String,
    pub name: String,
    pub steps: Vec<ChainStepConfig>,
}

/// Top-level document: `{ chains: [...] }`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RootConfig {
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl RootConfig {
    pub fn from_yaml_str(path: &str, contents: &str) -> Result<Self, BuildError> {
        serde_yaml::from_str(contents).map_err(|source| BuildError::Yaml {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, BuildError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| BuildError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml_str(&display, &contents)
    }
}

/// A `RootConfig` indexed for the builder's lookups: every API name that
/// appears, and every chain grouped under its API.
pub struct LoadedConfig {
    chains_by_api: HashMap<String, Vec<ChainConfig>>,
}

impl LoadedConfig {
    pub fn new(root: RootConfig) -> Self {
        let mut chains_by_api: HashMap<String, Vec<ChainConfig>> = HashMap::new();
        for chain in root.chains {
            chains_by_api.entry(chain.api.clone()).or_default().push(chain);
        }
        Self { chains_by_api }
    }

    pub fn apis(&self) -> impl Iterator<Item = &str> {
        self.chains_by_api.keys().map(|s| s.as_str())
    }

    pub fn chains(&self, api: &str) -> &[ChainConfig] {
        self.chains_by_api
            .get(api)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
