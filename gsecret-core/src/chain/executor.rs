use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::chain_impl::Chain;

/// A cursor walking a [`Chain`] from first to last. `next()` yields the
/// stage at the current index and advances; once out of range it yields
/// `None` forever rather than wrapping or panicking.
///
/// Executors are single-thread cheap value-like objects: `copy()` snapshots
/// the current index so a stage can probe downstream without consuming its
/// own cursor.
pub struct ForwardChainExecutor<T: ?Sized> {
    chain: Arc<Chain<T>>,
    current_index: usize,
}

impl<T: ?Sized> ForwardChainExecutor<T> {
    pub fn new(chain: Arc<Chain<T>>) -> Self {
        Self {
            chain,
            current_index: 0,
        }
    }

    pub fn at(chain: Arc<Chain<T>>, index: usize) -> Self {
        Self {
            chain,
            current_index: index,
        }
    }

    pub fn copy(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            current_index: self.current_index,
        }
    }

    pub fn next(&mut self) -> Option<Arc<T>> {
        if self.current_index < self.chain.len() {
            let stage = self.chain.stage_at(self.current_index).cloned();
            self.current_index += 1;
            stage
        } else {
            None
        }
    }

    pub fn chain(&self) -> &Arc<Chain<T>> {
        &self.chain
    }
}

/// Same cursor abstraction, walking from a given index down toward 0.
/// Used to propagate `secret_updated` notifications back up the chain.
pub struct ReverseChainExecutor<T: ?Sized> {
    chain: Arc<Chain<T>>,
    current_index: i64,
}

impl<T: ?Sized> ReverseChainExecutor<T> {
    /// Defaults to `len(chain) - 1`, matching the Python default of `-1`
    /// meaning "last stage".
    pub fn new(chain: Arc<Chain<T>>) -> Self {
        let current_index = chain.len() as i64 - 1;
        Self {
            chain,
            current_index,
        }
    }

    pub fn at(chain: Arc<Chain<T>>, index: i64) -> Self {
        Self {
            chain,
            current_index: index,
        }
    }

    pub fn copy(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            current_index: self.current_index,
        }
    }

    pub fn next(&mut self) -> Option<Arc<T>> {
        if self.current_index >= 0 && (self.current_index as usize) < self.chain.len() {
            let stage = self.chain.stage_at(self.current_index as usize).cloned();
            self.current_index -= 1;
            stage
        } else {
            None
        }
    }
}

/// Owns the chain map for one interface. `get_executor` always mints a
/// fresh forward executor positioned at 0.
pub struct ChainController<T: ?Sized> {
    chains: HashMap<String, Arc<Chain<T>>>,
}

impl<T: ?Sized> ChainController<T> {
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
        }
    }

    pub fn add_chain(&mut self, chain: Chain<T>) -> Arc<Chain<T>> {
        let arc = Arc::new(chain);
        self.chains.insert(arc.name.clone(), Arc::clone(&arc));
        arc
    }

    pub fn get_executor(&self, name: &str) -> Option<ForwardChainExecutor<T>> {
        self.chains
            .get(name)
            .map(|chain| ForwardChainExecutor::new(Arc::clone(chain)))
    }

    pub fn get_chain(&self, name: &str) -> Option<Arc<Chain<T>>> {
        self.chains.get(name).cloned()
    }
}

impl<T: ?Sized> Default for ChainController<T> {
    fn default() -> Self {
        Self::new()
    }
}
