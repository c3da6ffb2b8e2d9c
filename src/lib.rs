//! # alloy-bind
//!
//! Typed contract bindings for EVM ledgers, built on Alloy.
//!
//! ## Core Features
//!
//! - **Field Bindings**: `Field<T>` binds one contract read method to a host type with a declared unit
//! - **Batched Reads**: many reads across many contracts execute as a few Multicall3 round trips pinned to one block
//! - **Transaction Orchestration**: dry-run, submit, wait for confirmation, ordered sequences
//! - **Contract Registry**: process-scoped name → address/ABI cache, populated once per name
//! - **Contract Error Parsing**: Distributed registry pattern for Solidity revert decoding
//! - **Settings Registry**: typed protocol settings with proposal payload encoding
//!
//! ## Usage
//!
//! ```ignore
//! use alloy_bind::ext::*;
//!
//! let ledger = Arc::new(RpcLedger::connect_http(rpc_url, Some(signer), &config)?);
//! let client = LedgerClient::new(ledger, resolver, config);
//!
//! let auction = client.contract("rocketAuctionManager").await?;
//! let exists = Field::<bool>::new(&auction, "getLotExists")?.with_args(vec![index]);
//! let price = Field::<f64>::new(&auction, "getLotCurrentPrice")?.with_args(vec![index]);
//!
//! let (results, (exists, price)) = client
//!     .query(BlockRef::Latest, |batch| Ok((exists.enqueue_read(batch)?, price.enqueue_read(batch)?)))
//!     .await?;
//! ```

// ============================================================================
// Internal Module Declarations
// ============================================================================

/// Client context owning the ledger handle, contract cache and configuration
mod client;

/// Contract error parser registry for decoding Solidity revert errors
mod contract_error;

/// Error taxonomy and RPC error classification
mod error;

/// Typed field bindings and ABI value decoding
mod field;

/// Gas limit and fee pricing
mod gas;

/// Contract identities, resolvers and the identity cache
mod identity;

/// Batches, slots and the multicall executor
mod multicall;

/// Transaction estimation, submission, confirmation and sequencing
mod orchestrator;

/// Remote ledger trait, RPC implementation and configuration
mod provider;

/// Protocol settings registry and proposal encoding
mod settings;

/// Write requests, handles and outcomes
mod transaction;

/// Wire-to-host unit conversion
mod units;

/// Test harness module (compiled only in test mode)
#[cfg(test)]
pub mod test_harness;

// ============================================================================
// Public Exports
// ============================================================================

/// Re-export all public APIs from the alloy crate.
pub use alloy::*;

/// Internal module for macro usage.
#[doc(hidden)]
pub mod __private {
    /// inventory crate - distributed plugin registration for contract error parsers
    pub use inventory;
    /// paste crate - identifier concatenation in macros
    pub use paste;
}

/// Extension module containing the binding engine:
///
/// - `Field`, `SlotValue`, `Unit`, `Parameter` - typed bindings and unit conversion
/// - `Batch`, `Slot`, `BatchResults`, `Multicaller` - batched reads
/// - `TransactionOrchestrator`, `PreparedTx`, `TransactionResult` - writes
/// - `RemoteLedger`, `RpcLedger` - ledger boundary
/// - `LedgerClient`, `ContractRegistry` - client context
/// - `SettingsRegistry` - protocol settings
pub mod ext {
    pub use super::client::*;
    pub use super::contract_error::*;
    pub use super::error::*;
    pub use super::field::*;
    pub use super::gas::*;
    pub use super::identity::*;
    pub use super::multicall::*;
    pub use super::orchestrator::*;
    pub use super::provider::*;
    pub use super::settings::*;
    pub use super::transaction::*;
    pub use super::units::*;
}
