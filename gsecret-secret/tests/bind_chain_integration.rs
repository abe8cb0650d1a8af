//! Exercises the `bind_chain` hook end to end: a stage that stashes a `Weak`
//! handle to its own chain and later uses it to walk backward and notify
//! every stage ahead of it, as opposed to `stage.rs`'s colocated unit tests
//! which only check the trait's default no-op.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use gsecret_core::chain::{Chain, ForwardChainExecutor, ReverseChainExecutor};
use gsecret_core::GsecretError;
use gsecret_secret::{GSecretStage, Secret, Token, TokenID, UpdatedSecret, WriteSecret};

// =============================================================================
// A passthrough stage that never answers directly, just forwards
// =============================================================================

struct Pass {
    notified: Mutex<Vec<String>>,
}

impl Pass {
    fn new() -> Self {
        Self {
            notified: Mutex::new(Vec::new()),
        }
    }

    fn notified(&self) -> Vec<String> {
        self.notified.lock().unwrap().clone()
    }
}

#[async_trait]
impl GSecretStage for Pass {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let stage = next.next().ok_or_else(|| GsecretError::not_found("chain exhausted"))?;
        stage.get_secret_id(key_id, token, next).await
    }

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let stage = next.next().ok_or_else(|| GsecretError::not_found("chain exhausted"))?;
        stage.get_secret_key(key, token, next).await
    }

    async fn write_secret(
        &self,
        secret: &WriteSecret,
        token: &Token,
        mut next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let stage = next.next().ok_or_else(|| GsecretError::not_found("chain exhausted"))?;
        stage.write_secret(secret, token, next).await
    }

    async fn secret_updated(
        &self,
        secrets: Vec<UpdatedSecret>,
        token_id: &TokenID,
        mut next: ReverseChainExecutor<dyn GSecretStage>,
    ) {
        self.notified
            .lock()
            .unwrap()
            .push(secrets.first().map(|s| s.secret.key.clone()).unwrap_or_default());
        if let Some(stage) = next.next() {
            stage.secret_updated(secrets, token_id, next).await;
        }
    }
}

// =============================================================================
// A terminal stage that, on write, binds its chain and walks backward
// through every stage that came before it
// =============================================================================

struct Notifier {
    chain: Mutex<Option<Weak<Chain<dyn GSecretStage>>>>,
    index: Mutex<Option<usize>>,
}

impl Notifier {
    fn new() -> Self {
        Self {
            chain: Mutex::new(None),
            index: Mutex::new(None),
        }
    }
}

#[async_trait]
impl GSecretStage for Notifier {
    async fn get_secret_id(
        &self,
        _key_id: &str,
        _token: &Token,
        _next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        Err(GsecretError::not_found("terminal stage has no secrets"))
    }

    async fn get_secret_key(
        &self,
        _key: &str,
        _token: &Token,
        _next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        Err(GsecretError::not_found("terminal stage has no secrets"))
    }

    async fn write_secret(
        &self,
        secret: &WriteSecret,
        token: &Token,
        _next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError> {
        let written = Secret {
            key_id: format!("id-{}", secret.key),
            key: secret.key.clone(),
            secret: secret.secret.clone(),
            rate_limit: None,
        };

        let chain = self.chain.lock().unwrap().clone().and_then(|weak| weak.upgrade());
        if let Some(chain) = chain {
            let index = self.index.lock().unwrap().expect("bind_chain ran before write_secret");
            let token_id = token.to_token_id();
            let update = UpdatedSecret {
                secret: written.clone(),
                api_id_relation: None,
                api_key_relation: None,
            };
            // Walk backward starting one stage before this one: the stages
            // ahead of the notifier in the chain are the ones that cached or
            // rate-limited this secret and need to hear about the write.
            let mut reverse = ReverseChainExecutor::at(chain, index as i64 - 1);
            if let Some(stage) = reverse.next() {
                stage.secret_updated(vec![update], &token_id, reverse).await;
            }
        }

        Ok(written)
    }

    async fn secret_updated(
        &self,
        _secrets: Vec<UpdatedSecret>,
        _token_id: &TokenID,
        _next: ReverseChainExecutor<dyn GSecretStage>,
    ) {
    }

    fn bind_chain(&self, chain: &Arc<Chain<dyn GSecretStage>>, index: usize) {
        *self.chain.lock().unwrap() = Some(Arc::downgrade(chain));
        *self.index.lock().unwrap() = Some(index);
    }
}

#[tokio::test]
async fn write_through_the_notifier_walks_back_through_every_earlier_stage() {
    let first = Arc::new(Pass::new());
    let second = Arc::new(Pass::new());
    let notifier = Arc::new(Notifier::new());

    let mut chain: Chain<dyn GSecretStage> = Chain::new("notify");
    chain.add_stage(Arc::clone(&first) as Arc<dyn GSecretStage>);
    chain.add_stage(Arc::clone(&second) as Arc<dyn GSecretStage>);
    chain.add_stage(Arc::clone(&notifier) as Arc<dyn GSecretStage>);
    let chain = Arc::new(chain);

    // Mirrors `ApiBuilder::build_api`'s `on_chain_built` hook: the notifier
    // is told where it lives once the chain is fully assembled.
    let notifier_dyn: Arc<dyn GSecretStage> = Arc::clone(&notifier) as Arc<dyn GSecretStage>;
    notifier.bind_chain(&chain, chain.index_of(&notifier_dyn).unwrap());

    let token = Token::new("tok");
    let mut exec = ForwardChainExecutor::new(Arc::clone(&chain));
    let entry = exec.next().unwrap();
    entry
        .write_secret(&WriteSecret { key: "k".into(), secret: serde_json::json!("v") }, &token, exec)
        .await
        .unwrap();

    assert_eq!(second.notified(), vec!["k".to_string()]);
    assert_eq!(first.notified(), vec!["k".to_string()]);
}

#[tokio::test]
async fn weak_chain_handle_upgrades_to_none_once_the_chain_is_dropped() {
    let notifier = Arc::new(Notifier::new());
    {
        let mut chain: Chain<dyn GSecretStage> = Chain::new("short-lived");
        chain.add_stage(Arc::clone(&notifier) as Arc<dyn GSecretStage>);
        let chain = Arc::new(chain);
        notifier.bind_chain(&chain, 0);
        assert!(notifier
            .chain
            .lock()
            .unwrap()
            .clone()
            .unwrap()
            .upgrade()
            .is_some());
    }

    // The chain's only strong reference was the local `chain` binding above;
    // once it drops, the notifier's weak handle must no longer upgrade. This
    // is exactly the cycle `bind_chain`'s doc comment says `Weak` avoids.
    let token = Token::new("tok");
    let mut exec = {
        let mut throwaway: Chain<dyn GSecretStage> = Chain::new("throwaway");
        throwaway.add_stage(Arc::clone(&notifier) as Arc<dyn GSecretStage>);
        ForwardChainExecutor::new(Arc::new(throwaway))
    };
    let entry = exec.next().unwrap();
    let written = entry
        .write_secret(&WriteSecret { key: "k2".into(), secret: serde_json::json!("v2") }, &token, exec)
        .await
        .unwrap();

    // write_secret still succeeds; it just silently skips the reverse walk
    // because its stashed chain reference no longer upgrades.
    assert_eq!(written.key, "k2");
}
