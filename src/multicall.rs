//! Batched reads: collect, deduplicate, pin, split, decode.
//!
//! ```text
//! Field::enqueue_read ──► Batch (CallRequests) ──► Multicaller::execute
//!                                                    │
//!                          dedup identical (target, calldata)
//!                          pin block (Latest → block_number(), once)
//!                          chunk by max_calls_per_round_trip
//!                                                    │
//!                                   RemoteLedger::aggregate × N
//!                                                    │
//!                          decode every request in order (fail fast)
//!                                                    ▼
//!                                              BatchResults
//! ```

use std::{
    any::Any,
    collections::{hash_map::Entry, HashMap},
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use alloy::primitives::{Address, Bytes};

use crate::ext::{
    decode_revert_data, BindError, CallOutcome, MulticallConfig, ReadCall, RemoteLedger, SlotError,
};

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

type Decoder = Box<dyn FnOnce(&Bytes) -> Result<Box<dyn Any + Send>, SlotError> + Send>;

/// Block a batch is evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockRef {
    /// Head block at execution time, resolved once per batch
    #[default]
    Latest,
    Number(u64),
}

struct CallRequest {
    target: Address,
    label: String,
    calldata: Bytes,
    decode: Decoder,
}

/// An ordered collection of reads that execute against one block.
pub struct Batch {
    id: u64,
    block: BlockRef,
    calls: Vec<CallRequest>,
    closed: bool,
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("block", &self.block)
            .field("calls", &self.calls.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::at(BlockRef::Latest)
    }
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(block: BlockRef) -> Self {
        Self { id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed), block, calls: Vec::new(), closed: false }
    }

    pub fn at_block(number: u64) -> Self {
        Self::at(BlockRef::Number(number))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn block(&self) -> BlockRef {
        self.block
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append one read. Nothing is executed.
    ///
    /// `decode` turns the call's return data into the slot's value; it runs once,
    /// inside [`Multicaller::execute`].
    pub fn add<T, F>(
        &mut self,
        target: Address,
        label: impl Into<String>,
        calldata: Bytes,
        decode: F,
    ) -> Result<Slot<T>, BindError>
    where
        T: Send + 'static,
        F: FnOnce(&Bytes) -> Result<T, SlotError> + Send + 'static,
    {
        if self.closed {
            return Err(BindError::BatchClosed);
        }
        let index = self.calls.len();
        self.calls.push(CallRequest {
            target,
            label: label.into(),
            calldata,
            decode: Box::new(move |data| decode(data).map(|v| Box::new(v) as Box<dyn Any + Send>)),
        });
        Ok(Slot { batch_id: self.id, index, _value: PhantomData })
    }

    /// Append a read whose value is the undecoded return data.
    pub fn add_raw(
        &mut self,
        target: Address,
        label: impl Into<String>,
        calldata: Bytes,
    ) -> Result<Slot<Bytes>, BindError> {
        self.add(target, label, calldata, |data| Ok(data.clone()))
    }
}

/// Typed receipt for one enqueued read.
pub struct Slot<T> {
    batch_id: u64,
    index: usize,
    _value: PhantomData<fn() -> T>,
}

impl<T> Slot<T> {
    /// Position of the read within its batch.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("batch_id", &self.batch_id).field("index", &self.index).finish()
    }
}

/// Decoded values of an executed batch.
pub struct BatchResults {
    batch_id: u64,
    block: Option<u64>,
    values: Vec<Option<Box<dyn Any + Send>>>,
}

impl fmt::Debug for BatchResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchResults")
            .field("batch_id", &self.batch_id)
            .field("block", &self.block)
            .field("values", &self.values.len())
            .finish()
    }
}

impl BatchResults {
    /// Block every value was read at. `None` only for an empty batch at `Latest`.
    pub fn block(&self) -> Option<u64> {
        self.block
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow a slot's value. `None` for slots of another batch or already taken.
    pub fn get<T: 'static>(&self, slot: &Slot<T>) -> Option<&T> {
        if slot.batch_id != self.batch_id {
            return None;
        }
        self.values.get(slot.index)?.as_ref()?.downcast_ref::<T>()
    }

    /// Move a slot's value out.
    pub fn take<T: 'static>(&mut self, slot: Slot<T>) -> Option<T> {
        if slot.batch_id != self.batch_id {
            return None;
        }
        let value = self.values.get_mut(slot.index)?.take()?;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }
}

// ============================================================================
// Multicaller
// ============================================================================

/// Executes batches through Multicall3 round trips.
pub struct Multicaller<L: ?Sized> {
    ledger: Arc<L>,
    config: MulticallConfig,
}

impl<L: ?Sized> Clone for Multicaller<L> {
    fn clone(&self) -> Self {
        Self { ledger: self.ledger.clone(), config: self.config.clone() }
    }
}

impl<L: RemoteLedger + ?Sized> Multicaller<L> {
    pub fn new(ledger: Arc<L>, config: MulticallConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &MulticallConfig {
        &self.config
    }

    /// Execute every read in `batch` against one block.
    ///
    /// Closes the batch. On any failure no values are returned; the error names
    /// the first failing request by index and label.
    pub async fn execute(&self, batch: &mut Batch) -> Result<BatchResults, BindError> {
        if batch.closed {
            return Err(BindError::BatchClosed);
        }
        batch.closed = true;
        let requests = std::mem::take(&mut batch.calls);
        let batch_id = batch.id;

        if requests.is_empty() {
            let block = match batch.block {
                BlockRef::Number(n) => Some(n),
                BlockRef::Latest => None,
            };
            return Ok(BatchResults { batch_id, block, values: Vec::new() });
        }

        // Requests sharing (target, calldata) share one physical call.
        let mut unique: Vec<ReadCall> = Vec::new();
        let mut owners: Vec<usize> = Vec::new();
        let mut physical: Vec<usize> = Vec::with_capacity(requests.len());
        let mut seen: HashMap<ReadCall, usize> = HashMap::new();
        for (index, request) in requests.iter().enumerate() {
            let call = ReadCall { target: request.target, calldata: request.calldata.clone() };
            let slot = match seen.entry(call) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    unique.push(e.key().clone());
                    owners.push(index);
                    *e.insert(unique.len() - 1)
                }
            };
            physical.push(slot);
        }

        let block = match batch.block {
            BlockRef::Number(n) => n,
            BlockRef::Latest => self.ledger.block_number().await.map_err(|e| {
                tracing::warn!(batch = batch_id, error = %e, "failed to pin batch block");
                BindError::BatchExecution {
                    index: None,
                    label: requests[0].label.clone(),
                    reason: format!("failed to resolve latest block: {e}"),
                }
            })?,
        };

        let max = self.config.max_calls_per_round_trip.max(1);
        let mut outcomes: Vec<CallOutcome> = Vec::with_capacity(unique.len());
        for (round_trip, chunk) in unique.chunks(max).enumerate() {
            let first = &requests[owners[round_trip * max]];
            tracing::debug!(batch = batch_id, block, round_trip, size = chunk.len(), "executing multicall round trip");

            let chunk_outcomes = self.ledger.aggregate(chunk, block).await.map_err(|e| {
                tracing::warn!(batch = batch_id, block, round_trip, error = %e, "multicall round trip failed");
                BindError::BatchExecution {
                    index: None,
                    label: first.label.clone(),
                    reason: format!("round trip {round_trip} failed: {e}"),
                }
            })?;
            if chunk_outcomes.len() != chunk.len() {
                return Err(BindError::BatchExecution {
                    index: None,
                    label: first.label.clone(),
                    reason: format!(
                        "round trip {round_trip} returned {} results for {} calls",
                        chunk_outcomes.len(),
                        chunk.len()
                    ),
                });
            }
            outcomes.extend(chunk_outcomes);
        }

        let mut values = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let CallRequest { label, decode, .. } = request;
            let data = match &outcomes[physical[index]] {
                CallOutcome::Success(data) => data,
                CallOutcome::Failure(data) => {
                    let reason = decode_revert_data(data).unwrap_or_else(|| "call reverted".to_string());
                    tracing::warn!(batch = batch_id, block, index, %label, %reason, "batched call reverted");
                    return Err(BindError::BatchExecution { index: Some(index), label, reason });
                }
            };
            match decode(data) {
                Ok(value) => values.push(Some(value)),
                Err(SlotError::Decode(reason)) => {
                    tracing::warn!(batch = batch_id, index, %label, %reason, "failed to decode batched call");
                    return Err(BindError::Decode { index, label, reason });
                }
                Err(SlotError::Conversion(source)) => {
                    tracing::warn!(batch = batch_id, index, %label, error = %source, "failed to convert batched call");
                    return Err(BindError::Conversion { index, label, source });
                }
            }
        }

        tracing::debug!(
            batch = batch_id,
            block,
            requests = values.len(),
            calls = unique.len(),
            "batch executed"
        );
        Ok(BatchResults { batch_id, block: Some(block), values })
    }
}
