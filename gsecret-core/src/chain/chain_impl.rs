use std::sync::Arc;

use serde_json::Value;

use crate::error::BuildError;

/// An append-only ordered pipeline of stages bound to a single stage
/// contract `T`. Built incrementally by [`crate::builder::ApiBuilder`];
/// once handed to a [`crate::chain::ChainController`] its stage order is
/// fixed.
///
/// Rust's type system enforces the "each stage satisfies `stage_class`"
/// invariant at compile time (every stage pushed must already be an
/// `Arc<T>`), so unlike the dynamically-typed original there is no
/// runtime type-mismatch error path here.
pub struct Chain<T: ?Sized> {
    pub name: String,
    stages: Vec<Arc<T>>,
}

impl<T: ?Sized> Chain<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn add_stage(&mut self, stage: Arc<T>) {
        self.stages.push(stage);
    }

    pub fn stage_at(&self, index: usize) -> Option<&Arc<T>> {
        self.stages.get(index)
    }

    /// Identity lookup (`Arc` pointer equality), matching the original's
    /// `is` comparison rather than structural equality.
    pub fn index_of(&self, stage: &Arc<T>) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| Arc::ptr_eq(s, stage))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// `build(config, chain) -> stage`. The builder owns any per-chain-shared
/// sub-state (e.g. a client controller) across every stage instance it
/// produces, so repeated instantiations within the same process share
/// caches.
pub trait ChainStageBuilder<T: ?Sized>: Send + Sync {
    fn build(&self, config: Option<Value>, chain: &Chain<T>) -> Result<Arc<T>, BuildError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Dummy: Send + Sync {}
    struct A;
    impl Dummy for A {}

    #[test]
    fn add_stage_and_len() {
        let mut chain: Chain<dyn Dummy> = Chain::new("c1");
        assert_eq!(chain.len(), 0);
        assert!(chain.is_empty());
        chain.add_stage(Arc::new(A));
        chain.add_stage(Arc::new(A));
        assert_eq!(chain.len(), 2);
        assert!(!chain.is_empty());
    }

    #[test]
    fn index_of_is_identity_based() {
        let mut chain: Chain<dyn Dummy> = Chain::new("c1");
        let a: Arc<dyn Dummy> = Arc::new(A);
        let b: Arc<dyn Dummy> = Arc::new(A);
        chain.add_stage(a.clone());
        chain.add_stage(b.clone());

        assert_eq!(chain.index_of(&a), Some(0));
        assert_eq!(chain.index_of(&b), Some(1));

        let unrelated: Arc<dyn Dummy> = Arc::new(A);
        assert_eq!(chain.index_of(&unrelated), None);
    }

    #[test]
    fn stage_at_round_trips_index_of() {
        let mut chain: Chain<dyn Dummy> = Chain::new("c1");
        for _ in 0..5 {
            chain.add_stage(Arc::new(A));
        }
        for i in 0..chain.len() {
            let stage = chain.stage_at(i).unwrap();
            assert_eq!(chain.index_of(stage), Some(i));
        }
    }
}
