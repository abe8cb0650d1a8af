use std::sync::Arc;

use async_trait::async_trait;

use gsecret_core::chain::{Chain, ForwardChainExecutor, ReverseChainExecutor};
use gsecret_core::GsecretError;

use crate::token::{Token, TokenID};
use crate::types::{Secret, UpdatedSecret, WriteSecret};

/// The stage contract for the `gsecret` interface.
///
/// Every concrete stage (cache, rate limiter, parse-secret, generator,
/// upstream read/write) implements this trait. Forward operations receive a
/// [`ForwardChainExecutor`] positioned just after themselves and either
/// answer locally or call `next.next()` to reach the following stage.
/// `secret_updated` walks the other direction via a [`ReverseChainExecutor`]
/// and is fire-and-forget: a failing stage in the reverse chain does not
/// abort the remainder.
#[async_trait]
pub trait GSecretStage: Send + Sync {
    async fn get_secret_id(
        &self,
        key_id: &str,
        token: &Token,
        next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError>;

    async fn get_secret_key(
        &self,
        key: &str,
        token: &Token,
        next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError>;

    async fn write_secret(
        &self,
        secret: &WriteSecret,
        token: &Token,
        next: ForwardChainExecutor<dyn GSecretStage>,
    ) -> Result<Secret, GsecretError>;

    async fn secret_updated(
        &self,
        secrets: Vec<UpdatedSecret>,
        token_id: &TokenID,
        next: ReverseChainExecutor<dyn GSecretStage>,
    );

    /// Hook invoked once by `ApiBuilder::build_api`'s `on_chain_built` callback,
    /// after this stage's chain has been fully assembled and wrapped in the
    /// `Arc` that makes it addressable. Tells a stage where it lives so it can
    /// build its own `ReverseChainExecutor` later. A borrowed,
    /// non-owning handle by design: holding `chain` as a `Weak` here avoids the
    /// `stage -> chain -> stage` reference cycle flagged in DESIGN.md.
    ///
    /// Most stages have no use for this and keep the default no-op.
    fn bind_chain(&self, _chain: &Arc<Chain<dyn GSecretStage>>, _index: usize) {}
}
