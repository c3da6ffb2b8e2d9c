//! Gas limit and fee pricing.
//!
//! `TxGas` is the caller's pricing policy on a transaction. The orchestrator
//! resolves it against the ledger into concrete [`GasPricing`] right before
//! submission.

use alloy::{rpc::types::TransactionRequest, transports::TransportResult};

use crate::ext::RemoteLedger;

/// Gas pricing policy for a write.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum TxGas {
    /// EIP-1559 gas pricing
    Eip1559 { max_fee: u128, max_priority_fee: u128 },
    /// Legacy gas pricing
    Legacy { gas_price: u128 },
    /// Estimate gas fees from the network
    #[default]
    FromNetwork,
}

/// Concrete fees for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPricing {
    Eip1559 { max_fee: u128, max_priority_fee: u128 },
    Legacy { gas_price: u128 },
}

impl GasPricing {
    pub fn max_fee(&self) -> u128 {
        match *self {
            GasPricing::Eip1559 { max_fee, .. } => max_fee,
            GasPricing::Legacy { gas_price } => gas_price,
        }
    }

    pub fn max_priority_fee(&self) -> u128 {
        match *self {
            GasPricing::Eip1559 { max_priority_fee, .. } => max_priority_fee,
            GasPricing::Legacy { gas_price } => gas_price,
        }
    }

    /// Set the fee fields of `tx`.
    pub fn apply(&self, tx: TransactionRequest) -> TransactionRequest {
        match *self {
            GasPricing::Eip1559 { max_fee, max_priority_fee } => {
                tx.max_fee_per_gas(max_fee).max_priority_fee_per_gas(max_priority_fee)
            }
            GasPricing::Legacy { gas_price } => tx.gas_price(gas_price),
        }
    }
}

/// Result of dry-running and pricing a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasInfo {
    /// Gas used by the dry run
    pub estimated_gas: u64,
    /// Estimate scaled by the configured safety percentage
    pub safe_gas_limit: u64,
    pub pricing: GasPricing,
}

impl GasInfo {
    pub fn max_fee(&self) -> u128 {
        self.pricing.max_fee()
    }

    pub fn max_priority_fee(&self) -> u128 {
        self.pricing.max_priority_fee()
    }
}

/// Scale a gas estimate by `percent`, never going below the estimate itself.
pub fn safe_gas_limit(estimated: u64, percent: u64) -> u64 {
    let scaled = (u128::from(estimated) * u128::from(percent)) / 100;
    u64::try_from(scaled).unwrap_or(u64::MAX).max(estimated)
}

fn boost(fee: u128, multiplier: f64) -> u128 {
    (fee as f64 * multiplier) as u128
}

impl TxGas {
    /// Resolve the policy into concrete fees.
    ///
    /// - `Eip1559` and `Legacy` are used as given
    /// - `FromNetwork` tries EIP-1559 estimation first and falls back to the legacy
    ///   gas price, boosting either by `multiplier`
    pub async fn resolve<L: RemoteLedger + ?Sized>(
        self,
        ledger: &L,
        multiplier: f64,
    ) -> TransportResult<GasPricing> {
        let pricing = match self {
            TxGas::Eip1559 { max_fee, max_priority_fee } => {
                GasPricing::Eip1559 { max_fee, max_priority_fee }
            }
            TxGas::Legacy { gas_price } => GasPricing::Legacy { gas_price },
            TxGas::FromNetwork => match ledger.estimate_fees().await {
                Ok(fees) => {
                    let max_fee = boost(fees.max_fee, multiplier);
                    let max_priority_fee = boost(fees.max_priority_fee, multiplier);
                    tracing::debug!(
                        network_max_fee = fees.max_fee,
                        max_fee,
                        max_priority_fee,
                        multiplier,
                        "applied EIP-1559 gas from network"
                    );
                    GasPricing::Eip1559 { max_fee, max_priority_fee }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "EIP-1559 estimation failed, using legacy gas price");
                    let network_gas_price = ledger.gas_price().await?;
                    let gas_price = boost(network_gas_price, multiplier);
                    tracing::debug!(network_gas_price, gas_price, multiplier, "applied legacy gas from network");
                    GasPricing::Legacy { gas_price }
                }
            },
        };
        Ok(pricing)
    }
}
