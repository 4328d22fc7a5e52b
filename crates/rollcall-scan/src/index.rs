use crate::engine::{EngineError, EngineHandle};
use rollcall_core::{IdentityIndex, IdentityStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum RebuildError {
    #[error("failed to list identities: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Identity index shared between scan sessions.
///
/// Readers take an `Arc` snapshot once per cycle. A rebuild computes the
/// complete index first and swaps it in with a single send, so no reader
/// ever sees a partially built index.
#[derive(Clone)]
pub struct SharedIndex {
    tx: Arc<watch::Sender<Arc<IdentityIndex>>>,
}

impl Default for SharedIndex {
    fn default() -> Self {
        Self::new(IdentityIndex::new())
    }
}

impl SharedIndex {
    pub fn new(index: IdentityIndex) -> Self {
        let (tx, _) = watch::channel(Arc::new(index));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<IdentityIndex> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<IdentityIndex>> {
        self.tx.subscribe()
    }

    pub fn replace(&self, index: IdentityIndex) {
        self.tx.send_replace(Arc::new(index));
    }

    /// Reload every identity from the store and swap in a fresh index.
    /// Returns the number of indexed labels.
    pub async fn rebuild(
        &self,
        engine: &EngineHandle,
        store: &dyn IdentityStore,
    ) -> Result<usize, RebuildError> {
        let identities = store.list_identities().await?;
        let total = identities.len();
        let index = engine.build_index(identities).await?;
        let indexed = index.len();
        self.replace(index);
        tracing::info!(identities = total, indexed, "identity index swapped");
        Ok(indexed)
    }
}
