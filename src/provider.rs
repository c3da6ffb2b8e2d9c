//! Remote ledger boundary and client configuration.
//!
//! Everything above this module talks to the chain through [`RemoteLedger`]. The trait
//! is narrow: one pinned block lookup, one Multicall3 round trip, and the
//! handful of calls the orchestrator needs to estimate, price, send and poll.
//!
//! ## Architecture
//!
//! ```text
//! RemoteLedger (trait)
//! ├── RpcLedger: alloy DynProvider (HTTP, optional wallet filler)
//! └── MockLedger: in-memory ledger (test_harness, cfg(test) only)
//!
//! RpcLedger fillers:
//! ├── recommended fillers: chain id, gas, nonce
//! └── WalletFiller<EthereumWallet>: signs transactions (when a signer is given)
//! ```

use std::time::Duration;

use alloy::{
    eips::BlockId,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, B256},
    providers::{DynProvider, Provider, ProviderBuilder, MULTICALL3_ADDRESS},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::SolCall,
    transports::{RpcError, TransportErrorKind, TransportResult},
};
use async_trait::async_trait;

mod multicall3 {
    alloy::sol! {
        #[derive(Debug)]
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        #[derive(Debug)]
        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) public payable returns (Result[] memory returnData);
    }
}

// ============================================================================
// Client Configuration
// ============================================================================

/// Multicall batching configuration.
#[derive(Debug, Clone)]
pub struct MulticallConfig {
    /// Aggregator contract (default: canonical Multicall3 deployment)
    pub address: Address,
    /// Maximum calls carried by one physical round trip (default: 500)
    pub max_calls_per_round_trip: usize,
}

impl Default for MulticallConfig {
    fn default() -> Self {
        Self { address: MULTICALL3_ADDRESS, max_calls_per_round_trip: 500 }
    }
}

impl MulticallConfig {
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    /// Set the round trip size cap. Zero is treated as one.
    pub fn with_max_calls_per_round_trip(mut self, max: usize) -> Self {
        self.max_calls_per_round_trip = max.max(1);
        self
    }
}

/// Receipt polling configuration.
#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    /// Interval between receipt polls (default: 1 second)
    pub poll_interval: Duration,
    /// Default wait deadline used by sequences (default: 120 seconds)
    pub receipt_timeout: Duration,
    /// Blocks that must include the transaction, counting its own (default: 1)
    pub confirmations: u64,
    /// Base backoff in milliseconds after a transient polling error (default: 100)
    pub retry_backoff_ms: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            receipt_timeout: Duration::from_secs(120),
            confirmations: 1,
            retry_backoff_ms: 100,
        }
    }
}

impl ConfirmationConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Set the required confirmation depth. Zero is treated as one.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    pub fn with_retry_backoff_ms(mut self, base_ms: u64) -> Self {
        self.retry_backoff_ms = base_ms;
        self
    }
}

/// Gas limit and fee pricing configuration.
#[derive(Debug, Clone)]
pub struct GasConfig {
    /// Safe gas limit as a percentage of the estimate (default: 120)
    pub limit_multiplier_percent: u64,
    /// Multiplier applied to network fee estimates (default: 1.0)
    pub fee_multiplier: f64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self { limit_multiplier_percent: 120, fee_multiplier: 1.0 }
    }
}

impl GasConfig {
    pub fn with_limit_multiplier_percent(mut self, percent: u64) -> Self {
        self.limit_multiplier_percent = percent;
        self
    }

    pub fn with_fee_multiplier(mut self, multiplier: f64) -> Self {
        self.fee_multiplier = multiplier;
        self
    }
}

/// Configuration shared by the multicaller and the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub multicall: MulticallConfig,
    pub confirmation: ConfirmationConfig,
    pub gas: GasConfig,
}

impl ClientConfig {
    pub fn with_multicall(mut self, multicall: MulticallConfig) -> Self {
        self.multicall = multicall;
        self
    }

    pub fn with_confirmation(mut self, confirmation: ConfirmationConfig) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_gas(mut self, gas: GasConfig) -> Self {
        self.gas = gas;
        self
    }
}

// ============================================================================
// RemoteLedger
// ============================================================================

/// One read inside a physical aggregate round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadCall {
    pub target: Address,
    pub calldata: Bytes,
}

/// Per-call result of an aggregate round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Return data of a successful call
    Success(Bytes),
    /// Revert data of a failed call
    Failure(Bytes),
}

/// EIP-1559 fee estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee: u128,
    pub max_priority_fee: u128,
}

/// The parts of a transaction receipt the orchestrator relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub success: bool,
}

/// Connection to the remote ledger.
///
/// Implementations must be safe to share between tasks. None of the methods retry;
/// retry policy belongs to the caller.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Current head block number.
    async fn block_number(&self) -> TransportResult<u64>;

    /// Execute `calls` in one Multicall3 `aggregate3` round trip at `block`.
    ///
    /// Every call is sent with `allowFailure = true`; the result has one entry per call.
    async fn aggregate(&self, calls: &[ReadCall], block: u64) -> TransportResult<Vec<CallOutcome>>;

    /// Dry-run a transaction and return its gas usage.
    async fn estimate_gas(&self, tx: &TransactionRequest) -> TransportResult<u64>;

    async fn estimate_fees(&self) -> TransportResult<FeeEstimate>;

    async fn gas_price(&self) -> TransportResult<u128>;

    /// Next nonce for `address`, counting pending transactions.
    async fn pending_nonce(&self, address: Address) -> TransportResult<u64>;

    /// Sign (if needed) and broadcast. Returns once the node accepted the transaction.
    async fn send_transaction(&self, tx: TransactionRequest) -> TransportResult<B256>;

    /// Receipt for `hash`, or `None` if it has not been included yet.
    async fn receipt(&self, hash: B256) -> TransportResult<Option<ConfirmationReceipt>>;

    /// Sender used when a transaction does not name one.
    fn default_sender(&self) -> Option<Address> {
        None
    }
}

// ============================================================================
// RpcLedger
// ============================================================================

/// [`RemoteLedger`] backed by an alloy provider.
#[derive(Clone)]
pub struct RpcLedger {
    provider: DynProvider,
    multicall_address: Address,
    sender: Option<Address>,
}

impl std::fmt::Debug for RpcLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedger")
            .field("multicall_address", &self.multicall_address)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl RpcLedger {
    /// Wrap an existing provider. Sends fail unless it carries a wallet filler.
    pub fn new(provider: DynProvider) -> Self {
        Self { provider, multicall_address: MULTICALL3_ADDRESS, sender: None }
    }

    /// Connect over HTTP, optionally signing with `signer`.
    pub fn connect_http(
        rpc_url: &str,
        signer: Option<PrivateKeySigner>,
        config: &ClientConfig,
    ) -> anyhow::Result<Self> {
        let url = rpc_url.parse()?;
        let (provider, sender) = match signer {
            Some(signer) => {
                let sender = signer.address();
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::new(signer))
                    .connect_http(url)
                    .erased();
                (provider, Some(sender))
            }
            None => (ProviderBuilder::new().connect_http(url).erased(), None),
        };
        provider.client().set_poll_interval(config.confirmation.poll_interval);

        tracing::debug!(rpc_url, ?sender, multicall = %config.multicall.address, "connected rpc ledger");

        Ok(Self { provider, multicall_address: config.multicall.address, sender })
    }

    pub fn with_multicall_address(mut self, address: Address) -> Self {
        self.multicall_address = address;
        self
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

#[async_trait]
impl RemoteLedger for RpcLedger {
    async fn block_number(&self) -> TransportResult<u64> {
        self.provider.get_block_number().await
    }

    async fn aggregate(&self, calls: &[ReadCall], block: u64) -> TransportResult<Vec<CallOutcome>> {
        let calls: Vec<multicall3::Call3> = calls
            .iter()
            .map(|call| multicall3::Call3 {
                target: call.target,
                allowFailure: true,
                callData: call.calldata.clone(),
            })
            .collect();
        let expected = calls.len();

        let input = Bytes::from(multicall3::aggregate3Call { calls }.abi_encode());
        let tx = TransactionRequest::default().with_to(self.multicall_address).with_input(input);
        let output = self.provider.call(tx).block(BlockId::number(block)).await?;

        let results = multicall3::aggregate3Call::abi_decode_returns(&output).map_err(|e| {
            TransportErrorKind::custom_str(&format!("malformed aggregate3 response: {e}"))
        })?;
        if results.len() != expected {
            return Err(TransportErrorKind::custom_str(&format!(
                "aggregate3 returned {} results for {} calls",
                results.len(),
                expected
            )));
        }

        Ok(results
            .into_iter()
            .map(|r| if r.success { CallOutcome::Success(r.returnData) } else { CallOutcome::Failure(r.returnData) })
            .collect())
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> TransportResult<u64> {
        self.provider.estimate_gas(tx.clone()).await
    }

    async fn estimate_fees(&self) -> TransportResult<FeeEstimate> {
        let fees = self.provider.estimate_eip1559_fees().await?;
        Ok(FeeEstimate { max_fee: fees.max_fee_per_gas, max_priority_fee: fees.max_priority_fee_per_gas })
    }

    async fn gas_price(&self) -> TransportResult<u128> {
        self.provider.get_gas_price().await
    }

    async fn pending_nonce(&self, address: Address) -> TransportResult<u64> {
        self.provider.get_transaction_count(address).pending().await
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> TransportResult<B256> {
        if self.sender.is_none() && tx.from.is_none() {
            return Err(RpcError::UnsupportedFeature("Cannot send transaction without a signer"));
        }
        let pending = self.provider.send_transaction(tx).await?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, hash: B256) -> TransportResult<Option<ConfirmationReceipt>> {
        let Some(receipt) = self.provider.get_transaction_receipt(hash).await? else {
            return Ok(None);
        };
        // Receipts without a block number are pending on some nodes.
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };
        Ok(Some(ConfirmationReceipt {
            tx_hash: receipt.transaction_hash,
            block_number,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            success: receipt.status(),
        }))
    }

    fn default_sender(&self) -> Option<Address> {
        self.sender
    }
}
