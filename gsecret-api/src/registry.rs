use std::sync::Arc;
use std::time::Duration;

use gsecret_core::error::BuildError;
use gsecret_core::registry::Interface;
use gsecret_core::Metrics;
use gsecret_secret::GSecretStage;
use gsecret_stages::{
    BwsReadStageBuilder, BwsWriteStageBuilder, CacheStageBuilder, GeneratorStageBuilder,
    ParseSecretStageBuilder, RateLimiterStageBuilder,
};

/// Registers every built-in stage this binary ships under its config name.
/// Rust has no runtime module loading, so every stage a deployment might
/// use has to be linked in and registered here ahead of time rather than
/// imported dynamically by its config name. `metrics` is shared with the
/// cache and rate-limiter stages so their hit/miss counters and queue-depth
/// gauge land in the same registry the HTTP surface scrapes.
pub fn build_interface(metrics: Arc<Metrics>) -> Result<Interface<dyn GSecretStage>, BuildError> {
    let mut interface: Interface<dyn GSecretStage> = Interface::new("gsecret");
    interface.register_stage(
        "cache",
        Arc::new(CacheStageBuilder::new(Arc::clone(&metrics))),
    )?;
    interface.register_stage(
        "rate_limiter",
        Arc::new(RateLimiterStageBuilder::new(Arc::clone(&metrics))),
    )?;
    interface.register_stage("parse_secret", Arc::new(ParseSecretStageBuilder::new()))?;
    interface.register_stage("generator", Arc::new(GeneratorStageBuilder::new()))?;
    interface.register_stage(
        "bws_read",
        Arc::new(BwsReadStageBuilder::new("bws_read", Duration::from_millis(100))),
    )?;
    interface.register_stage("bws_write", Arc::new(BwsWriteStageBuilder::new()))?;
    Ok(interface)
}
