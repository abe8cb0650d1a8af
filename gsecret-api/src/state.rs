use std::sync::Arc;

use gsecret_core::chain::ChainController;
use gsecret_core::Metrics;
use gsecret_secret::GSecretStage;

/// Shared state for the `/gsecret` API surface: the chain controller built
/// by `ApiBuilder::build_api` at startup, plus the `write_blocked` gate that
/// rejects every write before a chain is even entered.
#[derive(Clone)]
pub struct GsecretApiState {
    pub chain_controller: Arc<ChainController<dyn GSecretStage>>,
    pub write_blocked: bool,
    pub metrics: Arc<Metrics>,
}

impl GsecretApiState {
    pub fn new(
        chain_controller: Arc<ChainController<dyn GSecretStage>>,
        write_blocked: bool,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chain_controller,
            write_blocked,
            metrics,
        }
    }
}
