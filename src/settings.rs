//! Protocol settings registry.
//!
//! Settings live on several settings contracts and are read through
//! `getSettingBool(path)`, `getSettingUint(path)` and `getSettingAddress(path)`.
//! Each registered path carries its declared kind, so the whole registry can be
//! enumerated, read in one batch and encoded into proposal payloads without any
//! runtime type inspection.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, U256},
};

use crate::ext::{
    Batch, BatchResults, BindError, Contract, ConversionError, Field, Slot, Unit,
};

crate::wire_enum! {
    /// Value type of a setting inside a multi-setting proposal.
    pub enum ProposalSettingType {
        Uint256 = 0,
        Bool = 1,
        Address = 2,
    }
}

/// Declared host unit of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKind {
    Bool,
    /// Raw uint256 (wei amounts, bonds)
    Uint,
    /// 1e18 fixed-point ratio
    Ratio,
    Count,
    Duration,
    Timestamp,
    Address,
}

impl SettingKind {
    fn getter(self) -> &'static str {
        match self {
            SettingKind::Bool => "getSettingBool",
            SettingKind::Address => "getSettingAddress",
            _ => "getSettingUint",
        }
    }

    /// How this kind is carried in a proposal.
    pub fn proposal_type(self) -> ProposalSettingType {
        match self {
            SettingKind::Bool => ProposalSettingType::Bool,
            SettingKind::Address => ProposalSettingType::Address,
            _ => ProposalSettingType::Uint256,
        }
    }
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Uint(U256),
    Ratio(f64),
    Count(u64),
    Duration(Duration),
    Timestamp(SystemTime),
    Address(Address),
}

impl SettingValue {
    pub fn kind(&self) -> SettingKind {
        match self {
            SettingValue::Bool(_) => SettingKind::Bool,
            SettingValue::Uint(_) => SettingKind::Uint,
            SettingValue::Ratio(_) => SettingKind::Ratio,
            SettingValue::Count(_) => SettingKind::Count,
            SettingValue::Duration(_) => SettingKind::Duration,
            SettingValue::Timestamp(_) => SettingKind::Timestamp,
            SettingValue::Address(_) => SettingKind::Address,
        }
    }

    /// The raw uint256 behind a numeric value.
    pub fn to_uint(&self) -> Result<U256, ConversionError> {
        match self {
            SettingValue::Bool(b) => Ok(U256::from(u8::from(*b))),
            SettingValue::Uint(v) => Ok(*v),
            SettingValue::Ratio(v) => v.to_wire(),
            SettingValue::Count(v) => v.to_wire(),
            SettingValue::Duration(v) => v.to_wire(),
            SettingValue::Timestamp(v) => v.to_wire(),
            SettingValue::Address(a) => Ok(U256::from_be_slice(a.as_slice())),
        }
    }

    /// The 32-byte word this value occupies in a proposal payload.
    ///
    /// Bools are 0 or 1, addresses are left-padded, numbers are big-endian.
    pub fn encode_word(&self) -> Result<B256, ConversionError> {
        Ok(B256::from(self.to_uint()?))
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(match self {
            SettingValue::Bool(b) => DynSolValue::Bool(*b),
            SettingValue::Address(a) => DynSolValue::Address(*a),
            other => DynSolValue::Uint(other.to_uint()?, 256),
        })
    }
}

/// Encode a multi-setting proposal payload, one word per value.
///
/// `types` and `values` must have the same length, and each value must be carried
/// by the declared type.
pub fn encode_words(types: &[ProposalSettingType], values: &[SettingValue]) -> Result<Vec<B256>, BindError> {
    if types.len() != values.len() {
        return Err(BindError::Encode {
            label: "proposal settings".to_string(),
            reason: format!("{} setting types for {} values", types.len(), values.len()),
        });
    }
    types
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (ty, value))| {
            let label = format!("proposal setting {i}");
            if value.kind().proposal_type() != *ty {
                return Err(BindError::Encode {
                    label,
                    reason: format!("value is {:?} but the setting type is {:?}", value.kind(), ty),
                });
            }
            value.encode_word().map_err(|e| BindError::Encode { label, reason: e.to_string() })
        })
        .collect()
}

/// The typed read binding of one setting.
#[derive(Debug, Clone)]
pub enum SettingField {
    Bool(Field<bool>),
    Uint(Field<U256>),
    Ratio(Field<f64>),
    Count(Field<u64>),
    Duration(Field<Duration>),
    Timestamp(Field<SystemTime>),
    Address(Field<Address>),
}

impl SettingField {
    fn new(contract: &Arc<Contract>, path: &str, kind: SettingKind) -> Result<Self, BindError> {
        let method = kind.getter();
        let args = vec![DynSolValue::String(path.to_string())];
        Ok(match kind {
            SettingKind::Bool => SettingField::Bool(Field::new(contract, method)?.with_args(args)),
            SettingKind::Uint => SettingField::Uint(Field::new(contract, method)?.with_args(args)),
            SettingKind::Ratio => SettingField::Ratio(Field::new(contract, method)?.with_args(args)),
            SettingKind::Count => SettingField::Count(Field::new(contract, method)?.with_args(args)),
            SettingKind::Duration => SettingField::Duration(Field::new(contract, method)?.with_args(args)),
            SettingKind::Timestamp => SettingField::Timestamp(Field::new(contract, method)?.with_args(args)),
            SettingKind::Address => SettingField::Address(Field::new(contract, method)?.with_args(args)),
        })
    }

    fn enqueue(&self, batch: &mut Batch) -> Result<PendingSlot, BindError> {
        Ok(match self {
            SettingField::Bool(f) => PendingSlot::Bool(f.enqueue_read(batch)?),
            SettingField::Uint(f) => PendingSlot::Uint(f.enqueue_read(batch)?),
            SettingField::Ratio(f) => PendingSlot::Ratio(f.enqueue_read(batch)?),
            SettingField::Count(f) => PendingSlot::Count(f.enqueue_read(batch)?),
            SettingField::Duration(f) => PendingSlot::Duration(f.enqueue_read(batch)?),
            SettingField::Timestamp(f) => PendingSlot::Timestamp(f.enqueue_read(batch)?),
            SettingField::Address(f) => PendingSlot::Address(f.enqueue_read(batch)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SettingEntry {
    pub path: String,
    pub kind: SettingKind,
    pub field: SettingField,
}

impl SettingEntry {
    /// Settings contract this entry is read from.
    pub fn contract(&self) -> &Arc<Contract> {
        match &self.field {
            SettingField::Bool(f) => f.contract(),
            SettingField::Uint(f) => f.contract(),
            SettingField::Ratio(f) => f.contract(),
            SettingField::Count(f) => f.contract(),
            SettingField::Duration(f) => f.contract(),
            SettingField::Timestamp(f) => f.contract(),
            SettingField::Address(f) => f.contract(),
        }
    }

    /// Arguments for a single-setting proposal: contract name, path and value.
    pub fn proposal_args(&self, value: &SettingValue) -> Result<Vec<DynSolValue>, BindError> {
        let label = format!("{}:{}", self.contract().name(), self.path);
        if value.kind() != self.kind {
            return Err(BindError::Encode {
                label,
                reason: format!("value is {:?} but the setting is {:?}", value.kind(), self.kind),
            });
        }
        let encoded = value.to_sol().map_err(|e| BindError::Encode { label, reason: e.to_string() })?;
        Ok(vec![
            DynSolValue::String(self.contract().name().to_string()),
            DynSolValue::String(self.path.clone()),
            encoded,
        ])
    }
}

/// Ordered registry of settings, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct SettingsRegistry {
    entries: Vec<SettingEntry>,
    index: HashMap<String, usize>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` on `contract`. Re-registering a path replaces its entry.
    pub fn register(
        &mut self,
        contract: &Arc<Contract>,
        path: &str,
        kind: SettingKind,
    ) -> Result<&SettingEntry, BindError> {
        let entry = SettingEntry { path: path.to_string(), kind, field: SettingField::new(contract, path, kind)? };
        let position = match self.index.get(path) {
            Some(&i) => {
                self.entries[i] = entry;
                i
            }
            None => {
                self.entries.push(entry);
                self.index.insert(path.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        Ok(&self.entries[position])
    }

    pub fn register_bool(&mut self, contract: &Arc<Contract>, path: &str) -> Result<&SettingEntry, BindError> {
        self.register(contract, path, SettingKind::Bool)
    }

    pub fn register_uint(&mut self, contract: &Arc<Contract>, path: &str) -> Result<&SettingEntry, BindError> {
        self.register(contract, path, SettingKind::Uint)
    }

    pub fn register_ratio(&mut self, contract: &Arc<Contract>, path: &str) -> Result<&SettingEntry, BindError> {
        self.register(contract, path, SettingKind::Ratio)
    }

    pub fn register_count(&mut self, contract: &Arc<Contract>, path: &str) -> Result<&SettingEntry, BindError> {
        self.register(contract, path, SettingKind::Count)
    }

    pub fn register_duration(&mut self, contract: &Arc<Contract>, path: &str) -> Result<&SettingEntry, BindError> {
        self.register(contract, path, SettingKind::Duration)
    }

    pub fn register_timestamp(&mut self, contract: &Arc<Contract>, path: &str) -> Result<&SettingEntry, BindError> {
        self.register(contract, path, SettingKind::Timestamp)
    }

    pub fn register_address(&mut self, contract: &Arc<Contract>, path: &str) -> Result<&SettingEntry, BindError> {
        self.register(contract, path, SettingKind::Address)
    }

    pub fn get(&self, path: &str) -> Option<&SettingEntry> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[SettingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries carried by `ty` in proposals, in registration order.
    pub fn of_type(&self, ty: ProposalSettingType) -> impl Iterator<Item = &SettingEntry> + '_ {
        self.entries.iter().filter(move |e| e.kind.proposal_type() == ty)
    }

    pub fn of_kind(&self, kind: SettingKind) -> impl Iterator<Item = &SettingEntry> + '_ {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Enqueue a read of every registered setting into `batch`.
    pub fn enqueue_all(&self, batch: &mut Batch) -> Result<PendingSettings, BindError> {
        let slots = self
            .entries
            .iter()
            .map(|entry| Ok((entry.path.clone(), entry.field.enqueue(batch)?)))
            .collect::<Result<Vec<_>, BindError>>()?;
        Ok(PendingSettings { slots })
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingSlot {
    Bool(Slot<bool>),
    Uint(Slot<U256>),
    Ratio(Slot<f64>),
    Count(Slot<u64>),
    Duration(Slot<Duration>),
    Timestamp(Slot<SystemTime>),
    Address(Slot<Address>),
}

impl PendingSlot {
    fn index(&self) -> usize {
        match self {
            PendingSlot::Bool(s) => s.index(),
            PendingSlot::Uint(s) => s.index(),
            PendingSlot::Ratio(s) => s.index(),
            PendingSlot::Count(s) => s.index(),
            PendingSlot::Duration(s) => s.index(),
            PendingSlot::Timestamp(s) => s.index(),
            PendingSlot::Address(s) => s.index(),
        }
    }

    fn read(&self, results: &BatchResults) -> Option<SettingValue> {
        Some(match self {
            PendingSlot::Bool(s) => SettingValue::Bool(*results.get(s)?),
            PendingSlot::Uint(s) => SettingValue::Uint(*results.get(s)?),
            PendingSlot::Ratio(s) => SettingValue::Ratio(*results.get(s)?),
            PendingSlot::Count(s) => SettingValue::Count(*results.get(s)?),
            PendingSlot::Duration(s) => SettingValue::Duration(*results.get(s)?),
            PendingSlot::Timestamp(s) => SettingValue::Timestamp(*results.get(s)?),
            PendingSlot::Address(s) => SettingValue::Address(*results.get(s)?),
        })
    }
}

/// Slots of an enqueued registry read.
#[derive(Debug, Clone)]
pub struct PendingSettings {
    slots: Vec<(String, PendingSlot)>,
}

impl PendingSettings {
    /// Typed values in registration order.
    pub fn collect(&self, results: &BatchResults) -> Result<Vec<(String, SettingValue)>, BindError> {
        self.slots
            .iter()
            .map(|(path, slot)| {
                let value = slot.read(results).ok_or_else(|| BindError::Decode {
                    index: slot.index(),
                    label: path.clone(),
                    reason: "no result for this slot in the given batch".to_string(),
                })?;
                Ok((path.clone(), value))
            })
            .collect()
    }
}
