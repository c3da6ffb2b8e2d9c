//! Contract identities and the process-scoped identity cache.

use std::{collections::HashMap, fmt, sync::Arc};

use alloy::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::{Function, JsonAbi, StateMutability},
    primitives::{Address, Bytes},
};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::ext::{BindError, PreparedTx, SigningOptions};

/// A deployed contract: logical name, address and ABI.
#[derive(Clone)]
pub struct Contract {
    name: String,
    address: Address,
    abi: JsonAbi,
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract").field("name", &self.name).field("address", &self.address).finish()
    }
}

impl Contract {
    pub fn new(name: impl Into<String>, address: Address, abi: JsonAbi) -> Self {
        Self { name: name.into(), address, abi }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// `Contract.method`, the label used in errors and logs.
    pub fn label(&self, method: &str) -> String {
        format!("{}.{}", self.name, method)
    }

    /// Look up a method by name. Overloads resolve to the first declaration.
    pub fn function(&self, method: &str) -> Result<&Function, BindError> {
        self.abi
            .function(method)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| BindError::UnknownMethod { contract: self.name.clone(), method: method.to_string() })
    }

    /// Selector-prefixed calldata for `method(args)`.
    pub fn encode_call(&self, method: &str, args: &[DynSolValue]) -> Result<Bytes, BindError> {
        let function = self.function(method)?;
        encode_input(function, &self.label(method), args)
    }

    /// Build a write to `method(args)`.
    ///
    /// Fails with `NotWritable` for `view` and `pure` methods.
    pub fn prepare(
        &self,
        method: &str,
        args: &[DynSolValue],
        opts: SigningOptions,
    ) -> Result<PreparedTx, BindError> {
        let label = self.label(method);
        let function = self.function(method)?;
        if !is_writable(function) {
            return Err(BindError::NotWritable { label });
        }
        let calldata = encode_input(function, &label, args)?;
        Ok(PreparedTx::new(self.address, label, calldata, opts))
    }
}

pub(crate) fn is_writable(function: &Function) -> bool {
    !matches!(function.state_mutability, StateMutability::View | StateMutability::Pure)
}

pub(crate) fn encode_input(
    function: &Function,
    label: &str,
    args: &[DynSolValue],
) -> Result<Bytes, BindError> {
    function
        .abi_encode_input(args)
        .map(Bytes::from)
        .map_err(|e| BindError::Encode { label: label.to_string(), reason: e.to_string() })
}

// ============================================================================
// Resolution
// ============================================================================

/// What a resolver knows about a contract name.
#[derive(Debug, Clone)]
pub struct ContractIdentity {
    pub address: Address,
    pub abi: JsonAbi,
}

/// Maps a logical contract name to its current identity.
///
/// Implementations may perform remote calls (e.g. a storage-contract lookup).
#[async_trait]
pub trait ContractResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> anyhow::Result<ContractIdentity>;
}

/// Resolver over a fixed, in-memory set of identities.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    contracts: HashMap<String, ContractIdentity>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(mut self, name: impl Into<String>, address: Address, abi: JsonAbi) -> Self {
        self.contracts.insert(name.into(), ContractIdentity { address, abi });
        self
    }
}

#[async_trait]
impl ContractResolver for StaticResolver {
    async fn resolve(&self, name: &str) -> anyhow::Result<ContractIdentity> {
        self.contracts
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no contract registered under {name}"))
    }
}

// ============================================================================
// ContractRegistry
// ============================================================================

/// Read-through cache of contract identities, populated once per name.
///
/// The map shard lock is only held to find or create the per-name cell. Resolution
/// runs outside it; concurrent lookups of the same name wait on that name's cell, so
/// the resolver runs once per name. A failed resolution leaves the cell empty and the
/// next lookup tries again.
#[derive(Clone)]
pub struct ContractRegistry {
    resolver: Arc<dyn ContractResolver>,
    cache: Arc<DashMap<String, Arc<OnceCell<Arc<Contract>>>>>,
}

impl fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractRegistry").field("cached", &self.cache.len()).finish_non_exhaustive()
    }
}

impl ContractRegistry {
    pub fn new(resolver: impl ContractResolver + 'static) -> Self {
        Self { resolver: Arc::new(resolver), cache: Arc::new(DashMap::new()) }
    }

    /// Get the contract registered under `name`, resolving it on first use.
    pub async fn get(&self, name: &str) -> Result<Arc<Contract>, BindError> {
        let cell = self.cache.entry(name.to_string()).or_default().value().clone();

        let contract = cell
            .get_or_try_init(|| async {
                tracing::debug!(contract = name, "resolving contract identity");
                let identity = self.resolver.resolve(name).await.map_err(|e| {
                    tracing::warn!(contract = name, error = %e, "contract resolution failed");
                    BindError::UnknownContract { name: name.to_string(), reason: e.to_string() }
                })?;
                tracing::debug!(contract = name, address = %identity.address, "resolved contract identity");
                Ok::<_, BindError>(Arc::new(Contract::new(name, identity.address, identity.abi)))
            })
            .await?;
        Ok(contract.clone())
    }

    /// Resolve several names, in order.
    pub async fn get_all(&self, names: &[&str]) -> Result<Vec<Arc<Contract>>, BindError> {
        let mut contracts = Vec::with_capacity(names.len());
        for name in names {
            contracts.push(self.get(name).await?);
        }
        Ok(contracts)
    }

    /// Drop the cached identity for `name`; the next lookup resolves again.
    pub fn invalidate(&self, name: &str) -> bool {
        self.cache.remove(name).is_some()
    }

    /// Whether `name` has a resolved identity in the cache.
    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.get(name).is_some_and(|cell| cell.initialized())
    }
}
