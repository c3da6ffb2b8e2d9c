//! Revert reason decoding with a distributed registry of contract error parsers.
//!
//! Standard `Error(string)` and `Panic(uint256)` payloads are decoded directly.
//! Custom Solidity errors are decoded by parsers that contract stubs register with
//! [`register_contract_errors!`](crate::register_contract_errors); the `inventory` crate
//! collects them at link time.
//!
//! ```text
//! register_contract_errors!(RocketAuctionManager)
//!     │
//!     ▼ (at link time)
//! inventory::iter::<ContractErrorParser>
//!     │
//!     ▼ (at runtime)
//! revert_reason(&err) → "RocketAuctionManager::LotNotFound(...)"
//! ```

use alloy::{
    primitives::Bytes,
    sol_types::{decode_revert_reason, Panic, Revert, SolError},
    transports::{RpcError, TransportError},
};

/// Contract error parser entry for the registry.
pub struct ContractErrorParser {
    /// Name of the contract (for error messages)
    pub name: &'static str,
    /// Parser function that attempts to decode error data
    pub parse: fn(&Bytes) -> Option<String>,
}

inventory::collect!(ContractErrorParser);

/// Try every registered parser and return the first successful decode.
pub fn parse_contract_error(data: &Bytes) -> Option<String> {
    for parser in inventory::iter::<ContractErrorParser> {
        if let Some(msg) = (parser.parse)(data) {
            return Some(msg);
        }
    }
    None
}

/// Decode raw revert data into a human-readable reason.
pub fn decode_revert_data(data: &Bytes) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    if let Ok(revert) = Revert::abi_decode(data) {
        return Some(revert.reason).filter(|reason| !reason.is_empty());
    }
    if let Ok(panic) = Panic::abi_decode(data) {
        return Some(panic.to_string());
    }
    parse_contract_error(data).or_else(|| decode_revert_reason(data))
}

/// Extract the revert data carried by an RPC error response, if any.
pub fn revert_data(err: &TransportError) -> Option<Bytes> {
    match err {
        RpcError::ErrorResp(payload) => payload
            .data
            .as_ref()
            .and_then(|data| serde_json::from_str::<Bytes>(data.get()).ok()),
        _ => None,
    }
}

/// Best-effort revert reason for a failed dry-run. Never empty.
///
/// Prefers decoded revert data, then the node's error message.
pub fn revert_reason(err: &TransportError) -> String {
    if let Some(reason) = revert_data(err).as_ref().and_then(decode_revert_data) {
        return reason;
    }
    let message = match err {
        RpcError::ErrorResp(payload) => payload.message.to_string(),
        other => other.to_string(),
    };
    if message.trim().is_empty() {
        "execution reverted".to_string()
    } else {
        message
    }
}

/// Register error parsers for contracts defined with `alloy::sol!`.
///
/// ```ignore
/// alloy::sol! {
///     #[sol(all_derives)]
///     RocketAuctionManager,
///     "abi/RocketAuctionManager.json"
/// }
///
/// register_contract_errors!(RocketAuctionManager);
/// ```
#[macro_export]
macro_rules! register_contract_errors {
    ($($contract:ident),* $(,)?) => {
        $(
            $crate::__private::paste::paste! {
                $crate::__private::inventory::submit! {
                    $crate::ext::ContractErrorParser {
                        name: stringify!($contract),
                        parse: |data| {
                            use $crate::sol_types::SolInterface;
                            $contract::[<$contract Errors>]::abi_decode(data)
                                .ok()
                                .map(|e| format!("{}::{:?}", stringify!($contract), e))
                        },
                    }
                }
            }
        )*
    };
}
