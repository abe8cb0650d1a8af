use sha2::{Digest, Sha256};

/// The hashed identity every stage keys its per-caller state by. Never
/// reversible back to the raw token, which is the point: caches, client
/// pools, and rate-limit buckets all index on `TokenID`, not on `Token`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenID(String);

impl TokenID {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TokenID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw bearer token as presented by a caller. Held only long enough to
/// authenticate a single request and derive its `TokenID`; never logged or
/// persisted.
#[derive(Debug, Clone)]
pub struct Token(String);

impl Token {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_token_id(&self) -> TokenID {
        let digest = Sha256::digest(self.0.as_bytes());
        TokenID(hex::encode(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_id_is_deterministic_for_same_token() {
        let a = Token::new("super-secret").to_token_id();
        let b = Token::new("super-secret").to_token_id();
        assert_eq!(a, b);
    }

    #[test]
    fn token_id_differs_across_tokens() {
        let a = Token::new("token-a").to_token_id();
        let b = Token::new("token-b").to_token_id();
        assert_ne!(a, b);
    }

    #[test]
    fn token_id_is_a_sha256_hex_digest() {
        let id = Token::new("x").to_token_id();
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
