//! Exercises several real stages wired into one chain, as opposed to each
//! stage's own colocated unit tests which exercise it against a bare stub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gsecret_core::chain::{Chain, ChainStageBuilder, ForwardChainExecutor, ReverseChainExecutor};
use gsecret_core::{GsecretError, Metrics};
use gsecret_secret::{GSecretStage, Secret, Token, TokenID, UpdatedSecret, WriteSecret};
use gsecret_stages::{CacheStageBuilder, GeneratorStageBuilder};

// =============================================================================
// A terminal store standing in for an upstream secret manager
// =============================================================================

struct Store {
    by_id: Mutex<HashMap<String, Secret>>,
    by_key: Mutex<HashMap<String, Secret>>,
    reads: AtomicUsize,
}

fn scoped(token: &Token, key: &str) -> String {
    format!("{}:{}", token.as_str(), key)
}

impl Store {
    fn new() -> Self {
        Self {
            by_id: Mutex::new(HashMap::new()),
            by_key: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GSecretStage for Store {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        _next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.by_id
            .lock()
            .unwrap()
            .get(&scoped(token, key_id))
            .cloned()
            .ok_or_else(|| GsecretError::not_found("no such secret"))
    }

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        _next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.by_key
            .lock()
            .unwrap()
            .get(&scoped(token, key))
            .cloned()
            .ok_or_else(|| GsecretError::not_found("no such secret"))
    }

    async fn write_secret(
        &self,
        secret: &WriteSecret,
        token: &Token,
        _next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let written = Secret {
            key_id: format!("store-{}", secret.key),
            key: secret.key.clone(),
            secret: secret.secret.clone(),
            rate_limit: None,
        };
        self.by_id
            .lock()
            .unwrap()
            .insert(scoped(token, &written.key_id), written.clone());
        self.by_key
            .lock()
            .unwrap()
            .insert(scoped(token, &written.key), written.clone());
        Ok(written)
    }

    async fn secret_updated(
        &self,
        _secrets: Vec<UpdatedSecret>,
        _token_id: &TokenID,
        _next: ReverseChainExecutor<dyn GSecretStage>,
    ) {
    }
}

fn pipeline(metrics: Arc<Metrics>) -> Arc<Chain<dyn GSecretStage>> {
    let mut chain: Chain<dyn GSecretStage> = Chain::new("pipeline");

    let cache = CacheStageBuilder::new(metrics).build(None, &chain).unwrap();
    chain.add_stage(cache);

    let generator = GeneratorStageBuilder::new()
        .build(Some(serde_json::json!({"generation": {"length": 20}})), &chain)
        .unwrap();
    chain.add_stage(generator);

    chain.add_stage(Arc::new(Store::new()));

    Arc::new(chain)
}

/// Pops the first stage off a fresh executor over `chain`, mirroring how
/// `gsecret-api`'s request handlers enter a chain.
async fn get_secret_key(
    chain: &Arc<Chain<dyn GSecretStage>>,
    key: &str,
    token: &Token,
) -> Result<Secret, GsecretError> {
    let mut exec = ForwardChainExecutor::new(Arc::clone(chain));
    let first = exec.next().expect("pipeline has at least one stage");
    first.get_secret_key(key, token, exec).await
}

// =============================================================================
// cache -> generator -> store: a miss generates and writes through once,
// then the cache shields the store from every later read.
// =============================================================================

#[tokio::test]
async fn cache_shields_the_store_after_the_generator_fills_a_miss() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let chain = pipeline(metrics);
    let token = Token::new("tok");

    let first = get_secret_key(&chain, "k", &token).await.unwrap();
    let generated = first.secret.as_str().unwrap().to_string();
    assert_eq!(generated.len(), 20);

    let second = get_secret_key(&chain, "k", &token).await.unwrap();
    assert_eq!(second.secret.as_str().unwrap(), generated);
}

#[tokio::test]
async fn two_tokens_get_independent_cache_entries_from_the_same_chain() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let chain = pipeline(metrics);

    let alice = Token::new("alice");
    let bob = Token::new("bob");

    let for_alice = get_secret_key(&chain, "shared-key", &alice).await.unwrap();
    let for_bob = get_secret_key(&chain, "shared-key", &bob).await.unwrap();

    // Each token generated (and cached) its own value for the same logical
    // key; the dual-indexed cache is keyed per `TokenID`, not globally.
    assert_ne!(
        for_alice.secret.as_str().unwrap(),
        for_bob.secret.as_str().unwrap()
    );
}
