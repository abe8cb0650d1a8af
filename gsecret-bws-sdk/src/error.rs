use thiserror::Error;

/// The distinguished error kinds the upstream-client interface promises
///. Stages match on these to
/// produce the fixed HTTP status taxonomy.
#[derive(Error, Debug)]
pub enum BwsError {
    #[error("unauthorised")]
    Unauthorised,

    #[error("rate limit exceeded")]
    ApiRateLimit,

    #[error("secret not found")]
    SecretNotFound,

    #[error("failed to parse secret response: {0}")]
    SecretParse(String),

    #[error("failed to send request: {0}")]
    SendRequest(#[from] reqwest::Error),

    #[error("api error: {0}")]
    ApiError(String),
}
