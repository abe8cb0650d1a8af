use thiserror::Error;

/// Wire shape for a failed stage operation: `GsecretFailure{reason, code}`.
///
/// Every stage either answers with a secret or originates/forwards one of
/// these; the taxonomy is fixed so `code` is always one of
/// 401, 404, 429, 500, 501, 503.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason} ({code})")]
pub struct GsecretError {
    pub reason: String,
    pub code: u16,
}

impl GsecretError {
    pub fn new(reason: impl Into<String>, code: u16) -> Self {
        Self {
            reason: reason.into(),
            code,
        }
    }

    pub fn unauthorised(reason: impl Into<String>) -> Self {
        Self::new(reason, 401)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(reason, 404)
    }

    pub fn rate_limited(reason: impl Into<String>) -> Self {
        Self::new(reason, 429)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(reason, 500)
    }

    pub fn not_supported(reason: impl Into<String>) -> Self {
        Self::new(reason, 501)
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::new(reason, 503)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == 404
    }
}

/// Startup-time failures: missing API, missing stage registration,
/// duplicate registration, type mismatch, schema violation. These are
/// fatal and always carry a locator so the offending config path can be
/// pinpointed.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("api '{0}' not found")]
    ApiNotFound(String),

    #[error("stage '{stage}' not registered for api '{api}'")]
    StageNotRegistered { api: String, stage: String },

    #[error("api '{0}' is already registered")]
    DuplicateApi(String),

    #[error("stage '{0}' is already registered in this interface")]
    DuplicateStage(String),

    #[error("chain '{chain}' stage type mismatch: expected stages implementing '{expected}'")]
    StageTypeMismatch { chain: String, expected: &'static str },

    #[error("config error at {path}: {message}")]
    Schema { path: String, message: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config at {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
