use std::sync::Arc;

use crate::chain::{Chain, ChainController};
use crate::config::ChainConfig;
use crate::error::BuildError;
use crate::registry::Interface;

/// Walks config-described chains against a stage registry and materializes
/// them into a [`ChainController`], one [`Chain`] per `ChainConfig` (spec
/// §4.1 "ApiBuilder").
///
/// This replaces the original's dynamic import machinery
/// (`PluginLoader`/`Importer`) with ahead-of-time registration: every stage
/// a deployment might use has to be registered into the `Interface` before
/// `build_api` runs, so an unknown stage name fails at startup with
/// `StageNotRegistered` rather than at first request with an import error.
pub struct ApiBuilder;

impl ApiBuilder {
    /// Builds one chain by resolving each step's stage name against
    /// `interface` and appending the result in order. The in-progress
    /// chain is passed to each builder so a stage can inspect its
    /// predecessors (e.g. to find a shared sub-state) before joining.
    pub fn build_chain<T: ?Sized>(
        interface: &Interface<T>,
        chain_config: &ChainConfig,
    ) -> Result<Chain<T>, BuildError> {
        let mut chain: Chain<T> = Chain::new(chain_config.name.clone());
        for step in &chain_config.steps {
            let builder = interface.get_stage(&step.name).ok_or_else(|| {
                BuildError::StageNotRegistered {
                    api: interface.name.clone(),
                    stage: step.name.clone(),
                }
            })?;
            let stage = builder.build(step.config.clone(), &chain)?;
            chain.add_stage(stage);
        }
        Ok(chain)
    }

    /// Builds every chain listed for one API and registers each into
    /// `controller`. `on_chain_built` runs once per finished chain, after
    /// it has been wrapped in the `Arc` that makes it addressable by
    /// `Weak` — this is the seam a stage contract uses to hand stages a
    /// non-owning back-reference to their own chain (see the `bind_chain`
    /// hook on `gsecret_secret::GSecretStage`), kept out of this crate
    /// since the generic chain runtime has no notion of stage-specific
    /// hooks.
    pub fn build_api<T: ?Sized>(
        interface: &Interface<T>,
        chains: &[ChainConfig],
        controller: &mut ChainController<T>,
        mut on_chain_built: impl FnMut(&Arc<Chain<T>>),
    ) -> Result<(), BuildError> {
        for chain_config in chains {
            let chain = Self::build_chain(interface, chain_config)?;
            let arc_chain = controller.add_chain(chain);
            on_chain_built(&arc_chain);
        }
        Ok(())
    }
}
