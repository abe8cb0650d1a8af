pub mod auth;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use gsecret_core::builder::ApiBuilder;
use gsecret_core::chain::ChainController;
use gsecret_core::config::ChainConfig;
use gsecret_core::error::BuildError;
use gsecret_core::registry::Interface;
use gsecret_secret::GSecretStage;

pub use gsecret_core::Metrics;
pub use registry::build_interface;
pub use state::GsecretApiState;

/// Builds the `/gsecret` axum sub-router: resolves every configured chain
/// against `interface`, binds each stage to its chain position (the seam
/// `ApiBuilder::build_api`'s `on_chain_built` hook exists for — see
/// `gsecret_core::builder` and `GSecretStage::bind_chain`), and mounts the
/// three HTTP routes this surface exposes. `metrics` is shared with
/// whatever mounts the `/metrics` scrape endpoint alongside this router.
pub fn build_router(
    interface: &Interface<dyn GSecretStage>,
    chains: &[ChainConfig],
    write_blocked: bool,
    metrics: Arc<Metrics>,
) -> Result<Router, BuildError> {
    let mut controller: ChainController<dyn GSecretStage> = ChainController::new();
    ApiBuilder::build_api(interface, chains, &mut controller, |chain| {
        for i in 0..chain.len() {
            if let Some(stage) = chain.stage_at(i) {
                stage.bind_chain(chain, i);
            }
        }
    })?;

    let state = GsecretApiState::new(Arc::new(controller), write_blocked, metrics);

    Ok(Router::new()
        .route("/{chain}/key/{key}", get(handlers::get_secret_key))
        .route("/{chain}/id/{key_id}", get(handlers::get_secret_id))
        .route("/{chain}/write", post(handlers::write_secret))
        .with_state(state))
}
