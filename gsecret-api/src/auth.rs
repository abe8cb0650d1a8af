use axum::http::HeaderMap;

use gsecret_core::GsecretError;
use gsecret_secret::Token;

/// Extracts a bearer token from the `Authorization` header. Both `Bearer
/// <token>` and a bare token are accepted; a missing header is a 401.
///
/// The token is never validated here — gsecret treats it as opaque and
/// passes it straight through to the upstream stages.
pub fn extract_token(headers: &HeaderMap) -> Result<Token, GsecretError> {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GsecretError::unauthorised("missing Authorization header"))?;

    let raw = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if raw.is_empty() {
        return Err(GsecretError::unauthorised("empty Authorization header"));
    }
    Ok(Token::new(raw))
}
