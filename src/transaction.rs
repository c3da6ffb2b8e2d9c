//! Write requests, submission handles and confirmation outcomes.

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    rpc::types::TransactionRequest,
};
use tokio::time::Instant;

use crate::ext::{BindError, ConfirmationReceipt, TxGas};

/// Signing and pricing options for a write.
///
/// Unset fields are filled in at submission: `gas_limit` from a dry run, `nonce`
/// by the ledger's signer (or by the orchestrator for parallel sequences).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SigningOptions {
    pub from: Option<Address>,
    pub value: U256,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas: TxGas,
}

impl SigningOptions {
    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_gas(mut self, gas: TxGas) -> Self {
        self.gas = gas;
        self
    }
}

/// A fully encoded write, ready to estimate or submit. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTx {
    target: Address,
    label: String,
    calldata: Bytes,
    opts: SigningOptions,
}

impl PreparedTx {
    pub fn new(target: Address, label: impl Into<String>, calldata: Bytes, opts: SigningOptions) -> Self {
        Self { target, label: label.into(), calldata, opts }
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn calldata(&self) -> &Bytes {
        &self.calldata
    }

    pub fn opts(&self) -> &SigningOptions {
        &self.opts
    }

    /// Base request without gas fields. `nonce` overrides the one in the options.
    pub(crate) fn to_request(&self, from: Option<Address>, nonce: Option<u64>) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .to(self.target)
            .input(self.calldata.clone().into())
            .value(self.opts.value);
        if let Some(from) = from {
            tx = tx.from(from);
        }
        if let Some(nonce) = nonce.or(self.opts.nonce) {
            tx = tx.nonce(nonce);
        }
        tx
    }
}

/// A submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    pub hash: B256,
    pub label: String,
    pub from: Option<Address>,
    pub nonce: Option<u64>,
    pub submitted_at: Instant,
}

/// Confirmation state observed for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Included successfully at the required depth
    Confirmed(ConfirmationReceipt),
    /// Included with a failed status; final
    Reverted(ConfirmationReceipt),
    /// Included successfully but short of the required depth when the wait ended
    Pending(ConfirmationReceipt),
    /// No receipt seen when the wait ended; the transaction's fate is unknown
    TimedOut,
}

impl TxOutcome {
    pub fn receipt(&self) -> Option<&ConfirmationReceipt> {
        match self {
            TxOutcome::Confirmed(r) | TxOutcome::Reverted(r) | TxOutcome::Pending(r) => Some(r),
            TxOutcome::TimedOut => None,
        }
    }

    /// Whether the outcome can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxOutcome::Confirmed(_) | TxOutcome::Reverted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub hash: B256,
    pub label: String,
    pub outcome: TxOutcome,
}

impl TransactionResult {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, TxOutcome::Confirmed(_))
    }

    pub fn receipt(&self) -> Option<&ConfirmationReceipt> {
        self.outcome.receipt()
    }

    /// The confirmed receipt, or the outcome as an error.
    pub fn into_receipt(self) -> Result<ConfirmationReceipt, BindError> {
        let TransactionResult { hash, label, outcome } = self;
        match outcome {
            TxOutcome::Confirmed(receipt) => Ok(receipt),
            TxOutcome::Reverted(_) => Err(BindError::Reverted { hash, label }),
            TxOutcome::Pending(_) => Err(BindError::Pending { hash, label }),
            TxOutcome::TimedOut => Err(BindError::TimedOut { hash, label }),
        }
    }

    pub(crate) fn failure_reason(&self) -> String {
        match &self.outcome {
            TxOutcome::Confirmed(_) => format!("transaction {} ({}) confirmed", self.hash, self.label),
            TxOutcome::Reverted(r) => {
                format!("transaction {} ({}) reverted in block {}", self.hash, self.label, r.block_number)
            }
            TxOutcome::Pending(r) => format!(
                "transaction {} ({}) included in block {} but not yet confirmed",
                self.hash, self.label, r.block_number
            ),
            TxOutcome::TimedOut => {
                format!("transaction {} ({}) timed out waiting for inclusion", self.hash, self.label)
            }
        }
    }
}

/// A sequence step that reached the ledger, with the handle to keep waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedStep {
    pub index: usize,
    pub handle: TransactionHandle,
    pub result: TransactionResult,
}

/// How a sequence of writes is submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequencePolicy {
    /// Submit one, wait for its confirmation, then submit the next
    #[default]
    Sequential,
    /// Submit all, then wait for all
    Parallel,
}

impl SequencePolicy {
    /// `true` selects [`SequencePolicy::Sequential`].
    pub fn wait_between(wait: bool) -> Self {
        if wait {
            SequencePolicy::Sequential
        } else {
            SequencePolicy::Parallel
        }
    }
}
