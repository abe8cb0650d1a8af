/// Which Bitwarden Secrets Manager deployment to talk to. Mirrors the
/// `bws_read`/`bws_write` stage config's `api_url`/`identity_url` pair
/// so a token's cached client can be checked for region
/// drift (`BwsClientController::get_client`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub api_url: String,
    pub identity_url: String,
}

impl Region {
    pub fn new(api_url: impl Into<String>, identity_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            identity_url: identity_url.into(),
        }
    }

    pub fn us() -> Self {
        Self::new("https://api.bitwarden.com", "https://identity.bitwarden.com")
    }

    pub fn eu() -> Self {
        Self::new("https://api.bitwarden.eu", "https://identity.bitwarden.eu")
    }

    /// Stable key used to detect "same token, different region" misuse.
    pub fn key(&self) -> String {
        format!("{}|{}", self.api_url, self.identity_url)
    }
}
