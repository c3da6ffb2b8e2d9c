//! Error taxonomy and RPC error classification.
//!
//! Two layers live here:
//!
//! - [`BindError`] and friends: the typed errors every binding, batch and
//!   transaction operation surfaces to its caller. Each one names the slot,
//!   label or sequence index responsible.
//! - [`RpcErrorKind`]: string-pattern classification of raw node errors, used to
//!   decide whether a failed dry-run is a revert and whether a failed receipt
//!   poll is worth polling again.

use alloy::{
    primitives::{B256, U256},
    transports::{RpcError, TransportError},
};
use thiserror::Error;

use crate::ext::{SubmittedStep, TransactionResult};

// ============================================================================
// Conversion / decoding errors
// ============================================================================

/// A wire value did not fit the declared host unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The value is outside the range of the host type.
    #[error("value {value} does not fit unit {unit}")]
    Overflow { unit: &'static str, value: String },

    /// An enum index with no matching variant.
    #[error("unknown {kind} variant {value}")]
    UnknownVariant { kind: &'static str, value: u64 },
}

impl ConversionError {
    pub fn overflow(unit: &'static str, raw: U256) -> Self {
        ConversionError::Overflow { unit, value: raw.to_string() }
    }
}

/// Why a single slot could not be filled from its return data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// Return bytes do not match the declared shape.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Shape matched but the value is out of range for the unit.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

// ============================================================================
// BindError
// ============================================================================

/// Errors surfaced by field bindings, the multicaller and the orchestrator.
#[derive(Debug, Error)]
pub enum BindError {
    /// A slot's raw value could not be converted to its unit.
    #[error("slot {index} ({label}): {source}")]
    Conversion { index: usize, label: String, source: ConversionError },

    /// A slot's return bytes did not match its declared shape.
    #[error("slot {index} ({label}): decode error: {reason}")]
    Decode { index: usize, label: String, reason: String },

    /// The node failed a call or a round trip.
    ///
    /// `index` is the request that failed when it is known, otherwise the first
    /// request of the failed round trip.
    #[error("batch execution failed at slot {index:?} ({label}): {reason}")]
    BatchExecution { index: Option<usize>, label: String, reason: String },

    /// The batch was already executed.
    #[error("batch is closed for submission")]
    BatchClosed,

    /// A write was requested on a read-only method.
    #[error("{label} is not writable")]
    NotWritable { label: String },

    /// The contract ABI has no method with this name.
    #[error("contract {contract} has no method {method}")]
    UnknownMethod { contract: String, method: String },

    /// The contract name could not be resolved.
    #[error("unknown contract {name}: {reason}")]
    UnknownContract { name: String, reason: String },

    /// Call arguments did not fit the method's ABI.
    #[error("{label}: failed to encode arguments: {reason}")]
    Encode { label: String, reason: String },

    /// Dry-run of a write reverted.
    #[error("{label}: simulation reverted: {reason}")]
    SimulationReverted { label: String, reason: String },

    /// The transaction was included but reverted.
    #[error("transaction {hash} ({label}) reverted")]
    Reverted { hash: B256, label: String },

    /// No receipt was observed before the deadline.
    #[error("transaction {hash} ({label}) timed out waiting for inclusion")]
    TimedOut { hash: B256, label: String },

    /// Included but not yet at the required confirmation depth.
    #[error("transaction {hash} ({label}) is still pending confirmation")]
    Pending { hash: B256, label: String },

    /// A step of a transaction sequence failed.
    ///
    /// `completed` holds the results of every step before `index`.
    /// Those are final; rolling them back is the caller's responsibility.
    ///
    /// `failed` is the failing step when it reached the ledger, and `unreported`
    /// holds steps after it that were also submitted. A `Pending` or `TimedOut`
    /// step can still be waited on through its handle.
    #[error("sequence step {index} failed: {reason}")]
    SequenceStepFailed {
        index: usize,
        completed: Vec<TransactionResult>,
        failed: Option<Box<SubmittedStep>>,
        unreported: Vec<SubmittedStep>,
        reason: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BindError {
    /// The failing sequence index, if this is a sequence failure.
    pub fn failed_step(&self) -> Option<usize> {
        match self {
            BindError::SequenceStepFailed { index, .. } => Some(*index),
            _ => None,
        }
    }
}

// ============================================================================
// Error Classification Types
// ============================================================================

/// Classified RPC error types for recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// The call or transaction reverted during execution
    Reverted,

    /// Nonce is lower than expected (already used on chain)
    NonceTooLow,

    /// Nonce creates a gap (higher than expected)
    NonceTooHigh,

    /// Replacement transaction gas price too low
    ReplacementUnderpriced,

    /// Insufficient funds for gas * price + value
    InsufficientFunds,

    /// Gas limit too low for transaction
    IntrinsicGasTooLow,

    /// Network/connection error
    NetworkError,

    /// Transaction already known (duplicate)
    AlreadyKnown,

    /// Unknown or unclassified error
    Unknown,
}

impl RpcErrorKind {
    /// Whether repeating the same read may succeed.
    ///
    /// Only meaningful for idempotent requests such as receipt polling; writes are
    /// never resubmitted by this crate.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcErrorKind::NetworkError | RpcErrorKind::Unknown)
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, RpcErrorKind::Reverted)
    }
}

/// Classify an RPC error into a known error kind by pattern matching.
///
/// An error response that carries revert data is always `Reverted`. Otherwise the
/// message is matched against the wordings used by common node implementations.
pub fn classify_rpc_error<E: std::fmt::Display>(error: &RpcError<E>) -> RpcErrorKind {
    if let RpcError::ErrorResp(payload) = error {
        if payload.data.is_some() && payload.message.to_lowercase().contains("revert") {
            return RpcErrorKind::Reverted;
        }
    }
    classify_message(&error.to_string())
}

/// Classify a bare error message.
pub fn classify_message(message: &str) -> RpcErrorKind {
    let error_str = message.to_lowercase();

    if error_str.contains("execution reverted")
        || error_str.contains("revert")
        || error_str.contains("invalid opcode")
    {
        return RpcErrorKind::Reverted;
    }

    if error_str.contains("nonce too low")
        || error_str.contains("nonce is too low")
        || error_str.contains("invalid nonce")
            && (error_str.contains("too low") || error_str.contains("expected"))
    {
        return RpcErrorKind::NonceTooLow;
    }

    if error_str.contains("nonce too high")
        || error_str.contains("nonce is too high")
        || error_str.contains("nonce gap")
    {
        return RpcErrorKind::NonceTooHigh;
    }

    if error_str.contains("replacement transaction underpriced")
        || error_str.contains("underpriced")
        || error_str.contains("max fee per gas less than block base fee")
    {
        return RpcErrorKind::ReplacementUnderpriced;
    }

    if error_str.contains("insufficient funds")
        || error_str.contains("insufficient balance")
        || error_str.contains("exceeds balance")
    {
        return RpcErrorKind::InsufficientFunds;
    }

    if error_str.contains("intrinsic gas too low")
        || error_str.contains("gas limit too low")
        || error_str.contains("out of gas")
    {
        return RpcErrorKind::IntrinsicGasTooLow;
    }

    if error_str.contains("already known")
        || error_str.contains("already imported")
        || error_str.contains("known transaction")
    {
        return RpcErrorKind::AlreadyKnown;
    }

    if error_str.contains("connection")
        || error_str.contains("timeout")
        || error_str.contains("timed out")
        || error_str.contains("network")
        || error_str.contains("transport")
        || error_str.contains("eof")
        || error_str.contains("broken pipe")
    {
        return RpcErrorKind::NetworkError;
    }

    RpcErrorKind::Unknown
}

// ============================================================================
// Retry Utilities
// ============================================================================

/// Exponential backoff for receipt polling after transient errors.
///
/// Uses 2^retry_count * base_ms, capped at 30 seconds.
///
/// ```
/// use alloy_bind::ext::backoff_duration;
///
/// assert_eq!(backoff_duration(0, 100).as_millis(), 100);
/// assert_eq!(backoff_duration(2, 100).as_millis(), 400);
/// assert_eq!(backoff_duration(10, 100).as_millis(), 30_000);
/// ```
pub fn backoff_duration(retry_count: u32, base_ms: u64) -> std::time::Duration {
    let ms = base_ms.saturating_mul(2u64.saturating_pow(retry_count));
    std::time::Duration::from_millis(ms.min(30_000))
}
