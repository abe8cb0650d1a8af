mod chain_impl;
mod executor;

pub use chain_impl::{Chain, ChainStageBuilder};
pub use executor::{ChainController, ForwardChainExecutor, ReverseChainExecutor};
