//! In-memory ledger harness for exercising batches and transaction flows.
//!
//! `MockLedger` implements [`RemoteLedger`] over scripted state: read results keyed by
//! (target, calldata), per-write estimation and inclusion behaviour, a movable head
//! block and injectable transport failures. Every round trip is recorded so tests can
//! assert on how the engine talked to the ledger.
//!
//! # Example
//!
//! ```ignore
//! let fixture = AuctionFixture::new().await?;
//! fixture.script_lot(1, true, 42, ratio_1_5());
//!
//! let lot = fixture.lot(1)?;
//! let (results, slots) = fixture.client.query(BlockRef::Latest, |b| lot.enqueue(b)).await?;
//! assert_eq!(results.get(&slots.current_price), Some(&1.5));
//! ```

mod scenario;

pub use scenario::*;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt},
    json_abi::JsonAbi,
    primitives::{keccak256, Address, Bytes, B256, U256},
    rpc::{json_rpc::ErrorPayload, types::TransactionRequest},
    sol_types::{Revert, SolError},
    transports::{RpcError, TransportError, TransportErrorKind, TransportResult},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::ext::{
    Batch, BindError, CallOutcome, ClientConfig, ConfirmationConfig, ConfirmationReceipt, Contract,
    ContractIdentity, ContractResolver, FeeEstimate, Field, LedgerClient, PreparedTx, ReadCall,
    RemoteLedger, Slot, StaticResolver,
};

// ============================================================================
// Behaviours
// ============================================================================

/// How a scripted read answers inside an aggregate round trip.
#[derive(Debug, Clone)]
pub enum ReadBehavior {
    Return(Bytes),
    Revert(Bytes),
}

/// How a dry run of a write answers.
#[derive(Debug, Clone)]
pub enum EstimateBehavior {
    Gas(u64),
    /// Revert with `Error(string)` data
    Revert(String),
    /// Transport-level failure
    Fail(String),
}

/// When, and how, a submitted write is included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    /// Included on the `polls`-th receipt poll (0 = already on the first)
    After { polls: u32, success: bool },
    /// Never included
    Never,
}

#[derive(Debug, Clone)]
pub struct WriteBehavior {
    pub estimate: EstimateBehavior,
    pub inclusion: Inclusion,
    /// Reject at submission with this message
    pub reject_send: Option<String>,
}

impl Default for WriteBehavior {
    fn default() -> Self {
        Self {
            estimate: EstimateBehavior::Gas(50_000),
            inclusion: Inclusion::After { polls: 0, success: true },
            reject_send: None,
        }
    }
}

impl WriteBehavior {
    pub fn confirm() -> Self {
        Self::default()
    }

    pub fn confirm_after(polls: u32) -> Self {
        Self { inclusion: Inclusion::After { polls, success: true }, ..Default::default() }
    }

    /// Passes the dry run, then reverts on chain.
    pub fn revert_on_chain() -> Self {
        Self { inclusion: Inclusion::After { polls: 0, success: false }, ..Default::default() }
    }

    pub fn revert_in_simulation(reason: impl Into<String>) -> Self {
        Self { estimate: EstimateBehavior::Revert(reason.into()), ..Default::default() }
    }

    pub fn never_mined() -> Self {
        Self { inclusion: Inclusion::Never, ..Default::default() }
    }

    pub fn reject_send(message: impl Into<String>) -> Self {
        Self { reject_send: Some(message.into()), ..Default::default() }
    }
}

// ============================================================================
// Records
// ============================================================================

/// One physical aggregate round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRecord {
    pub block: u64,
    pub calls: Vec<ReadCall>,
}

/// One submitted transaction.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub hash: B256,
    pub target: Address,
    pub calldata: Bytes,
    pub from: Option<Address>,
    pub nonce: u64,
    pub gas_limit: Option<u64>,
    pub max_fee: Option<u128>,
    pub gas_price: Option<u128>,
    behavior: WriteBehavior,
    polls: u32,
    included_block: Option<u64>,
}

#[derive(Default)]
struct LedgerState {
    head: u64,
    advance_head_per_round_trip: bool,
    reads: HashMap<ReadCall, ReadBehavior>,
    reads_at: HashMap<(u64, ReadCall), ReadBehavior>,
    writes: HashMap<ReadCall, WriteBehavior>,
    aggregates: Vec<AggregateRecord>,
    fail_round_trips: HashSet<usize>,
    fail_block_number: bool,
    legacy_fees: bool,
    failing_receipt_polls: u32,
    receipt_error: Option<String>,
    nonces: HashMap<Address, u64>,
    sent: Vec<SentTx>,
    estimates: usize,
}

// ============================================================================
// MockLedger
// ============================================================================

/// In-memory [`RemoteLedger`].
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
    sender: Option<Address>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(sender: Address) -> Self {
        Self { sender: Some(sender), ..Default::default() }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().expect("ledger state poisoned")
    }

    // --- chain ---------------------------------------------------------------

    pub fn set_head(&self, block: u64) {
        self.lock().head = block;
    }

    pub fn head(&self) -> u64 {
        self.lock().head
    }

    pub fn mine(&self, blocks: u64) {
        self.lock().head += blocks;
    }

    /// Move the head forward by one block on every aggregate round trip.
    pub fn advance_head_per_round_trip(&self) {
        self.lock().advance_head_per_round_trip = true;
    }

    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        self.lock().nonces.insert(address, nonce);
    }

    /// Make EIP-1559 fee estimation unavailable.
    pub fn use_legacy_fees(&self) {
        self.lock().legacy_fees = true;
    }

    // --- reads ---------------------------------------------------------------

    pub fn on_read_raw(&self, target: Address, calldata: Bytes, behavior: ReadBehavior) {
        self.lock().reads.insert(ReadCall { target, calldata }, behavior);
    }

    /// Script `contract.method(args)` to return `outputs`.
    pub fn on_read(&self, contract: &Contract, method: &str, args: &[DynSolValue], outputs: &[DynSolValue]) {
        let (call, data) = encode_read(contract, method, args, outputs);
        self.lock().reads.insert(call, ReadBehavior::Return(data));
    }

    /// Script `contract.method(args)` to return `outputs`, only when read at `block`.
    pub fn on_read_at(
        &self,
        block: u64,
        contract: &Contract,
        method: &str,
        args: &[DynSolValue],
        outputs: &[DynSolValue],
    ) {
        let (call, data) = encode_read(contract, method, args, outputs);
        self.lock().reads_at.insert((block, call), ReadBehavior::Return(data));
    }

    /// Script `contract.method(args)` to revert with `Error(reason)`.
    pub fn on_read_revert(&self, contract: &Contract, method: &str, args: &[DynSolValue], reason: &str) {
        let calldata = contract.encode_call(method, args).expect("read arguments must encode");
        let call = ReadCall { target: contract.address(), calldata };
        self.lock().reads.insert(call, ReadBehavior::Revert(revert_data(reason)));
    }

    /// Fail the `n`-th aggregate round trip (0-based) at the transport level.
    pub fn fail_round_trip(&self, n: usize) {
        self.lock().fail_round_trips.insert(n);
    }

    pub fn fail_block_number(&self, fail: bool) {
        self.lock().fail_block_number = fail;
    }

    pub fn aggregates(&self) -> Vec<AggregateRecord> {
        self.lock().aggregates.clone()
    }

    // --- writes --------------------------------------------------------------

    pub fn on_write(&self, tx: &PreparedTx, behavior: WriteBehavior) {
        let call = ReadCall { target: tx.target(), calldata: tx.calldata().clone() };
        self.lock().writes.insert(call, behavior);
    }

    /// Fail the next `n` receipt polls with a transient transport error.
    pub fn fail_receipt_polls(&self, n: u32) {
        self.fail_receipt_polls_with(n, "connection reset by peer");
    }

    /// Fail the next `n` receipt polls with `message`.
    pub fn fail_receipt_polls_with(&self, n: u32, message: &str) {
        let mut state = self.lock();
        state.failing_receipt_polls = n;
        state.receipt_error = Some(message.to_string());
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.lock().sent.clone()
    }

    pub fn estimate_count(&self) -> usize {
        self.lock().estimates
    }
}

fn encode_read(
    contract: &Contract,
    method: &str,
    args: &[DynSolValue],
    outputs: &[DynSolValue],
) -> (ReadCall, Bytes) {
    let calldata = contract.encode_call(method, args).expect("read arguments must encode");
    let data = contract
        .function(method)
        .expect("method must exist")
        .abi_encode_output(outputs)
        .expect("outputs must encode");
    (ReadCall { target: contract.address(), calldata }, data.into())
}

/// `Error(string)` revert data.
pub fn revert_data(reason: &str) -> Bytes {
    Revert { reason: reason.to_string() }.abi_encode().into()
}

/// A node error response carrying revert data, as returned by `eth_estimateGas`.
pub fn revert_error(reason: &str) -> TransportError {
    let json = serde_json::json!({
        "code": 3,
        "message": "execution reverted",
        "data": revert_data(reason).to_string(),
    });
    let payload: ErrorPayload =
        serde_json::from_str(&json.to_string()).expect("error payload must deserialize");
    RpcError::ErrorResp(payload)
}

fn call_of(tx: &TransactionRequest) -> TransportResult<ReadCall> {
    let target = tx
        .to
        .and_then(|kind| kind.to().copied())
        .ok_or_else(|| TransportErrorKind::custom_str("transaction has no target"))?;
    let calldata = tx.input.input().cloned().unwrap_or_default();
    Ok(ReadCall { target, calldata })
}

#[async_trait]
impl RemoteLedger for MockLedger {
    async fn block_number(&self) -> TransportResult<u64> {
        let state = self.lock();
        if state.fail_block_number {
            return Err(TransportErrorKind::custom_str("connection refused"));
        }
        Ok(state.head)
    }

    async fn aggregate(&self, calls: &[ReadCall], block: u64) -> TransportResult<Vec<CallOutcome>> {
        let mut state = self.lock();
        let round_trip = state.aggregates.len();
        state.aggregates.push(AggregateRecord { block, calls: calls.to_vec() });
        if state.advance_head_per_round_trip {
            state.head += 1;
        }
        if state.fail_round_trips.contains(&round_trip) {
            return Err(TransportErrorKind::custom_str("connection reset by peer"));
        }

        Ok(calls
            .iter()
            .map(|call| {
                let behavior = state
                    .reads_at
                    .get(&(block, call.clone()))
                    .or_else(|| state.reads.get(call));
                match behavior {
                    Some(ReadBehavior::Return(data)) => CallOutcome::Success(data.clone()),
                    Some(ReadBehavior::Revert(data)) => CallOutcome::Failure(data.clone()),
                    None => CallOutcome::Failure(Bytes::new()),
                }
            })
            .collect())
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> TransportResult<u64> {
        let call = call_of(tx)?;
        let mut state = self.lock();
        state.estimates += 1;
        match state.writes.get(&call).map(|w| w.estimate.clone()).unwrap_or(EstimateBehavior::Gas(50_000)) {
            EstimateBehavior::Gas(gas) => Ok(gas),
            EstimateBehavior::Revert(reason) => Err(revert_error(&reason)),
            EstimateBehavior::Fail(message) => Err(TransportErrorKind::custom_str(&message)),
        }
    }

    async fn estimate_fees(&self) -> TransportResult<FeeEstimate> {
        if self.lock().legacy_fees {
            return Err(RpcError::UnsupportedFeature("eth_feeHistory"));
        }
        Ok(FeeEstimate { max_fee: 30_000_000_000, max_priority_fee: 1_000_000_000 })
    }

    async fn gas_price(&self) -> TransportResult<u128> {
        Ok(20_000_000_000)
    }

    async fn pending_nonce(&self, address: Address) -> TransportResult<u64> {
        Ok(self.lock().nonces.get(&address).copied().unwrap_or_default())
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> TransportResult<B256> {
        let call = call_of(&tx)?;
        let mut state = self.lock();
        let behavior = state.writes.get(&call).cloned().unwrap_or_default();
        if let Some(message) = &behavior.reject_send {
            return Err(TransportErrorKind::custom_str(message));
        }

        let from = tx.from.or(self.sender);
        let nonce = match (from, tx.nonce) {
            (Some(from), Some(nonce)) => {
                let next = state.nonces.entry(from).or_default();
                *next = (*next).max(nonce + 1);
                nonce
            }
            (Some(from), None) => {
                let next = state.nonces.entry(from).or_default();
                *next += 1;
                *next - 1
            }
            (None, nonce) => nonce.unwrap_or_default(),
        };

        let hash = keccak256(
            [call.target.as_slice(), call.calldata.as_ref(), &(state.sent.len() as u64).to_be_bytes()[..]].concat(),
        );
        state.sent.push(SentTx {
            hash,
            target: call.target,
            calldata: call.calldata,
            from,
            nonce,
            gas_limit: tx.gas,
            max_fee: tx.max_fee_per_gas,
            gas_price: tx.gas_price,
            behavior,
            polls: 0,
            included_block: None,
        });
        Ok(hash)
    }

    async fn receipt(&self, hash: B256) -> TransportResult<Option<ConfirmationReceipt>> {
        let mut state = self.lock();
        if state.failing_receipt_polls > 0 {
            state.failing_receipt_polls -= 1;
            let message = state.receipt_error.as_deref().unwrap_or("connection reset by peer");
            return Err(TransportErrorKind::custom_str(message));
        }

        let head = state.head;
        let Some(sent) = state.sent.iter_mut().find(|s| s.hash == hash) else {
            return Ok(None);
        };
        let poll = sent.polls;
        sent.polls += 1;

        let Inclusion::After { polls, success } = sent.behavior.inclusion else {
            return Ok(None);
        };
        if poll < polls {
            return Ok(None);
        }
        let block = *sent.included_block.get_or_insert(head + 1);
        let gas_limit = sent.gas_limit.unwrap_or(21_000);
        if block > state.head {
            state.head = block;
        }

        Ok(Some(ConfirmationReceipt {
            tx_hash: hash,
            block_number: block,
            gas_used: gas_limit.min(50_000),
            effective_gas_price: 1_000_000_000,
            success,
        }))
    }

    fn default_sender(&self) -> Option<Address> {
        self.sender
    }
}

// ============================================================================
// Resolvers
// ============================================================================

/// Resolver that counts calls and takes a while to answer.
pub struct CountingResolver {
    inner: StaticResolver,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingResolver {
    pub fn new(inner: StaticResolver, delay: Duration) -> Self {
        Self { inner, calls: AtomicUsize::new(0), delay }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractResolver for Arc<CountingResolver> {
    async fn resolve(&self, name: &str) -> anyhow::Result<ContractIdentity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.resolve(name).await
    }
}

// ============================================================================
// Auction fixture
// ============================================================================

pub const AUCTION_MANAGER: &str = "rocketAuctionManager";
pub const RPL_TOKEN: &str = "rocketTokenRPL";
pub const PROTOCOL_SETTINGS_AUCTION: &str = "rocketDAOProtocolSettingsAuction";

pub fn auction_abi() -> JsonAbi {
    JsonAbi::parse([
        "function getLotExists(uint256 index) external view returns (bool)",
        "function getLotStartBlock(uint256 index) external view returns (uint256)",
        "function getLotEndBlock(uint256 index) external view returns (uint256)",
        "function getLotCurrentPrice(uint256 index) external view returns (uint256)",
        "function getLotCount() external view returns (uint256)",
        "function createLot() external",
        "function placeBid(uint256 index) external payable",
        "function claimBid(uint256 index) external",
    ])
    .expect("auction ABI must parse")
}

pub fn token_abi() -> JsonAbi {
    JsonAbi::parse([
        "function balanceOf(address owner) external view returns (uint256)",
        "function approve(address spender, uint256 amount) external returns (bool)",
        "function transfer(address to, uint256 amount) external returns (bool)",
    ])
    .expect("token ABI must parse")
}

pub fn settings_abi() -> JsonAbi {
    JsonAbi::parse([
        "function getSettingBool(string path) external view returns (bool)",
        "function getSettingUint(string path) external view returns (uint256)",
        "function getSettingAddress(string path) external view returns (address)",
    ])
    .expect("settings ABI must parse")
}

pub fn lot_index(index: u64) -> Vec<DynSolValue> {
    vec![DynSolValue::Uint(U256::from(index), 256)]
}

/// An auction lot binding: one field per lot property.
#[derive(Debug, Clone)]
pub struct Lot {
    pub index: u64,
    pub exists: Field<bool>,
    pub start_block: Field<u64>,
    pub current_price: Field<f64>,
}

/// Slots of an enqueued lot read.
#[derive(Debug, Clone, Copy)]
pub struct LotSlots {
    pub exists: Slot<bool>,
    pub start_block: Slot<u64>,
    pub current_price: Slot<f64>,
}

impl Lot {
    pub fn new(auction: &Arc<Contract>, index: u64) -> Result<Self, BindError> {
        Ok(Self {
            index,
            exists: Field::new(auction, "getLotExists")?.with_args(lot_index(index)),
            start_block: Field::new(auction, "getLotStartBlock")?.with_args(lot_index(index)),
            current_price: Field::new(auction, "getLotCurrentPrice")?.with_args(lot_index(index)),
        })
    }

    pub fn enqueue(&self, batch: &mut Batch) -> Result<LotSlots, BindError> {
        Ok(LotSlots {
            exists: self.exists.enqueue_read(batch)?,
            start_block: self.start_block.enqueue_read(batch)?,
            current_price: self.current_price.enqueue_read(batch)?,
        })
    }
}

/// A client over a [`MockLedger`] with the auction, token and settings contracts
/// registered.
pub struct AuctionFixture {
    pub ledger: Arc<MockLedger>,
    pub client: LedgerClient<MockLedger>,
    pub auction: Arc<Contract>,
    pub token: Arc<Contract>,
    pub settings: Arc<Contract>,
}

impl AuctionFixture {
    pub async fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default(), MockLedger::with_sender(alice())).await
    }

    pub async fn with_config(config: ClientConfig, ledger: MockLedger) -> Result<Self> {
        let ledger = Arc::new(ledger);
        ledger.set_head(100);
        let client = LedgerClient::new(ledger.clone(), resolver(), config);
        let auction = client.contract(AUCTION_MANAGER).await?;
        let token = client.contract(RPL_TOKEN).await?;
        let settings = client.contract(PROTOCOL_SETTINGS_AUCTION).await?;
        Ok(Self { ledger, client, auction, token, settings })
    }

    /// Fast polling so timing-based tests stay short under a paused clock.
    pub fn fast_confirmation() -> ConfirmationConfig {
        ConfirmationConfig::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_receipt_timeout(Duration::from_secs(5))
    }

    pub fn lot(&self, index: u64) -> Result<Lot> {
        Lot::new(&self.auction, index).map_err(|e| anyhow!("failed to bind lot {index}: {e}"))
    }

    /// Script the three lot reads.
    pub fn script_lot(&self, index: u64, exists: bool, start_block: u64, price_ratio: U256) {
        let args = lot_index(index);
        self.ledger.on_read(&self.auction, "getLotExists", &args, &[DynSolValue::Bool(exists)]);
        self.ledger.on_read(
            &self.auction,
            "getLotStartBlock",
            &args,
            &[DynSolValue::Uint(U256::from(start_block), 256)],
        );
        self.ledger.on_read(&self.auction, "getLotCurrentPrice", &args, &[DynSolValue::Uint(price_ratio, 256)]);
    }

    pub fn approve(&self, amount: u64) -> Result<PreparedTx, BindError> {
        self.token.prepare(
            "approve",
            &[DynSolValue::Address(self.auction.address()), DynSolValue::Uint(U256::from(amount), 256)],
            Default::default(),
        )
    }

    pub fn place_bid(&self, index: u64) -> Result<PreparedTx, BindError> {
        self.auction.prepare("placeBid", &lot_index(index), Default::default())
    }

    pub fn claim_bid(&self, index: u64) -> Result<PreparedTx, BindError> {
        self.auction.prepare("claimBid", &lot_index(index), Default::default())
    }
}

pub fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn resolver() -> StaticResolver {
    StaticResolver::new()
        .with_contract(AUCTION_MANAGER, Address::repeat_byte(0x10), auction_abi())
        .with_contract(RPL_TOKEN, Address::repeat_byte(0x20), token_abi())
        .with_contract(PROTOCOL_SETTINGS_AUCTION, Address::repeat_byte(0x30), settings_abi())
}

/// 1.5 as a 1e18 fixed-point ratio.
pub fn ratio_1_5() -> U256 {
    U256::from(1_500_000_000_000_000_000u128)
}

// ============================================================================
// Tests
// ============================================================================
