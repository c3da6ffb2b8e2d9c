//! Top-level client context.

use std::sync::Arc;

use crate::ext::{
    Batch, BatchResults, BindError, BlockRef, ClientConfig, Contract, ContractRegistry,
    ContractResolver, Multicaller, RemoteLedger, TransactionOrchestrator,
};

/// Owns the ledger connection, the contract identity cache and the configuration.
///
/// Cloning is cheap; clones share the ledger and the cache.
pub struct LedgerClient<L: ?Sized> {
    ledger: Arc<L>,
    contracts: ContractRegistry,
    config: ClientConfig,
}

impl<L: ?Sized> Clone for LedgerClient<L> {
    fn clone(&self) -> Self {
        Self { ledger: self.ledger.clone(), contracts: self.contracts.clone(), config: self.config.clone() }
    }
}

impl<L: RemoteLedger + ?Sized> LedgerClient<L> {
    pub fn new(ledger: Arc<L>, resolver: impl ContractResolver + 'static, config: ClientConfig) -> Self {
        Self { ledger, contracts: ContractRegistry::new(resolver), config }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.contracts
    }

    /// Contract registered under `name`, resolved on first use.
    pub async fn contract(&self, name: &str) -> Result<Arc<Contract>, BindError> {
        self.contracts.get(name).await
    }

    pub async fn contracts(&self, names: &[&str]) -> Result<Vec<Arc<Contract>>, BindError> {
        self.contracts.get_all(names).await
    }

    pub fn multicaller(&self) -> Multicaller<L> {
        Multicaller::new(self.ledger.clone(), self.config.multicall.clone())
    }

    pub fn orchestrator(&self) -> TransactionOrchestrator<L> {
        TransactionOrchestrator::new(self.ledger.clone(), &self.config)
    }

    /// Build a batch with `build` and execute it at `block`.
    ///
    /// ```ignore
    /// let (exists, price) = (lot.exists(), lot.current_price());
    /// let (results, (exists, price)) = client
    ///     .query(BlockRef::Latest, |batch| Ok((exists.enqueue_read(batch)?, price.enqueue_read(batch)?)))
    ///     .await?;
    /// ```
    pub async fn query<R, F>(&self, block: BlockRef, build: F) -> Result<(BatchResults, R), BindError>
    where
        F: FnOnce(&mut Batch) -> Result<R, BindError>,
    {
        let mut batch = Batch::at(block);
        let slots = build(&mut batch)?;
        let results = self.multicaller().execute(&mut batch).await?;
        Ok((results, slots))
    }
}
