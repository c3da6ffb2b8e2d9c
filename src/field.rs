//! Typed field bindings over single contract methods.
//!
//! A [`Field<T>`] names one read method (plus any leading arguments) and, optionally,
//! the method that writes it. It never holds a value: reads are enqueued into a
//! [`Batch`](crate::ext::Batch) and come back through
//! [`BatchResults`](crate::ext::BatchResults).

use std::{
    fmt,
    marker::PhantomData,
    sync::Arc,
    time::{Duration, SystemTime},
};

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, FunctionExt, Specifier},
    primitives::{Address, Bytes, B256, I256, U256},
};

use crate::{
    identity::{encode_input, is_writable},
    ext::{
        Batch, BindError, Contract, ConversionError, Parameter, PreparedTx, SigningOptions,
        Slot, SlotError, Unit,
    },
};

/// A value that can be decoded from, and encoded to, ABI values.
pub trait SlotValue: Sized + Send + 'static {
    /// Decode from a method's full output list.
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError>;

    /// Encode as a single call argument.
    fn to_sol(&self) -> Result<DynSolValue, ConversionError>;
}

fn single(mut values: Vec<DynSolValue>) -> Result<DynSolValue, SlotError> {
    if values.len() != 1 {
        return Err(SlotError::Decode(format!("expected 1 return value, got {}", values.len())));
    }
    Ok(values.remove(0))
}

fn mismatch(expected: &str, got: &DynSolValue) -> SlotError {
    SlotError::Decode(format!("expected {expected}, got {:?}", got.as_type()))
}

impl SlotValue for bool {
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
        match single(values)? {
            DynSolValue::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(DynSolValue::Bool(*self))
    }
}

impl SlotValue for Address {
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
        match single(values)? {
            DynSolValue::Address(a) => Ok(a),
            other => Err(mismatch("address", &other)),
        }
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(DynSolValue::Address(*self))
    }
}

impl SlotValue for B256 {
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
        match single(values)? {
            DynSolValue::FixedBytes(word, 32) => Ok(word),
            other => Err(mismatch("bytes32", &other)),
        }
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(DynSolValue::FixedBytes(*self, 32))
    }
}

impl SlotValue for Bytes {
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
        match single(values)? {
            DynSolValue::Bytes(b) => Ok(b.into()),
            other => Err(mismatch("bytes", &other)),
        }
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(DynSolValue::Bytes(self.to_vec()))
    }
}

impl SlotValue for String {
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
        match single(values)? {
            DynSolValue::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(DynSolValue::String(self.clone()))
    }
}

impl SlotValue for U256 {
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
        match single(values)? {
            DynSolValue::Uint(raw, _) => Ok(raw),
            other => Err(mismatch("uint", &other)),
        }
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(DynSolValue::Uint(*self, 256))
    }
}

macro_rules! impl_unit_slot {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SlotValue for $ty {
                fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
                    let raw = U256::from_sol(values)?;
                    Ok(<$ty as Unit>::from_wire(raw)?)
                }

                fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
                    Ok(DynSolValue::Uint(self.to_wire()?, 256))
                }
            }
        )*
    };
}

impl_unit_slot!(u8, u16, u32, u64, u128, usize, i64, f64, Duration, SystemTime);

impl<T: Unit + 'static> SlotValue for Parameter<T> {
    /// Keeps the raw value; conversion is deferred to [`Parameter::value`].
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
        Ok(Parameter::from_raw(U256::from_sol(values)?))
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(DynSolValue::Uint(self.raw(), 256))
    }
}

impl<T: SlotValue> SlotValue for Vec<T> {
    fn from_sol(values: Vec<DynSolValue>) -> Result<Self, SlotError> {
        match single(values)? {
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
                items.into_iter().map(|item| T::from_sol(vec![item])).collect()
            }
            other => Err(mismatch("array", &other)),
        }
    }

    fn to_sol(&self) -> Result<DynSolValue, ConversionError> {
        Ok(DynSolValue::Array(self.iter().map(T::to_sol).collect::<Result<_, _>>()?))
    }
}

/// Re-width integer values to the parameter type they are sent as. `SlotValue::to_sol`
/// emits `uint256` (or `uint8` for wire enums); setters may take any `uintN` or `intN`.
fn fit_to_type(value: DynSolValue, ty: &DynSolType) -> Result<DynSolValue, ConversionError> {
    let overflow = |unit: &'static str, v: &U256| ConversionError::Overflow { unit, value: v.to_string() };
    match (value, ty) {
        (DynSolValue::Uint(v, _), DynSolType::Uint(bits)) => {
            if v.bit_len() > *bits {
                return Err(overflow("uint", &v));
            }
            Ok(DynSolValue::Uint(v, *bits))
        }
        (DynSolValue::Uint(v, _), DynSolType::Int(bits)) => {
            if v.bit_len() >= *bits {
                return Err(overflow("int", &v));
            }
            Ok(DynSolValue::Int(I256::from_raw(v), *bits))
        }
        (DynSolValue::Array(items), DynSolType::Array(inner)) => Ok(DynSolValue::Array(
            items.into_iter().map(|item| fit_to_type(item, inner)).collect::<Result<_, _>>()?,
        )),
        (DynSolValue::Array(items) | DynSolValue::FixedArray(items), DynSolType::FixedArray(inner, _)) => {
            Ok(DynSolValue::FixedArray(
                items.into_iter().map(|item| fit_to_type(item, inner)).collect::<Result<_, _>>()?,
            ))
        }
        (other, _) => Ok(other),
    }
}

// ============================================================================
// Field<T>
// ============================================================================

/// A typed binding to one contract read method.
pub struct Field<T> {
    contract: Arc<Contract>,
    method: String,
    args: Vec<DynSolValue>,
    setter: Option<String>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self {
            contract: self.contract.clone(),
            method: self.method.clone(),
            args: self.args.clone(),
            setter: self.setter.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("contract", &self.contract.name())
            .field("method", &self.method)
            .field("args", &self.args)
            .field("setter", &self.setter)
            .finish()
    }
}

impl<T: SlotValue> Field<T> {
    /// Bind `method` on `contract`. Fails with `UnknownMethod` if the ABI lacks it.
    pub fn new(contract: &Arc<Contract>, method: &str) -> Result<Self, BindError> {
        contract.function(method)?;
        Ok(Self {
            contract: contract.clone(),
            method: method.to_string(),
            args: Vec::new(),
            setter: None,
            _value: PhantomData,
        })
    }

    /// Bind leading arguments, e.g. a lot index or a setting path.
    pub fn with_args(mut self, args: Vec<DynSolValue>) -> Self {
        self.args = args;
        self
    }

    /// Name the method that writes this field. It is called with the bound
    /// arguments followed by the new value.
    pub fn with_setter(mut self, method: &str) -> Result<Self, BindError> {
        self.contract.function(method)?;
        self.setter = Some(method.to_string());
        Ok(self)
    }

    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    pub fn args(&self) -> &[DynSolValue] {
        &self.args
    }

    pub fn label(&self) -> String {
        self.contract.label(&self.method)
    }

    /// Append this field's read to `batch` and return the slot its value will land in.
    ///
    /// Return data must be the canonical encoding of the method's outputs: a `bool`
    /// word other than 0 or 1, dirty padding, or trailing bytes fail with `Decode`.
    pub fn enqueue_read(&self, batch: &mut Batch) -> Result<Slot<T>, BindError> {
        if batch.is_closed() {
            return Err(BindError::BatchClosed);
        }
        let label = self.label();
        let function = self.contract.function(&self.method)?.clone();
        let calldata = encode_input(&function, &label, &self.args)?;

        batch.add(self.contract.address(), label, calldata, move |data: &Bytes| {
            let values =
                function.abi_decode_output(data).map_err(|e| SlotError::Decode(e.to_string()))?;
            let canonical = function.abi_encode_output(&values).map_err(|e| SlotError::Decode(e.to_string()))?;
            if canonical.as_slice() != data.as_ref() {
                return Err(SlotError::Decode(format!(
                    "non-canonical return data ({} bytes, expected {})",
                    data.len(),
                    canonical.len()
                )));
            }
            T::from_sol(values)
        })
    }

    /// Build the write that sets this field to `value`. Integer values are sized to the
    /// setter's last parameter, so a `uint64` or `uint8` setter accepts a `u64` field.
    pub fn build_write(&self, value: &T, opts: SigningOptions) -> Result<PreparedTx, BindError> {
        let Some(setter) = self.setter.as_deref() else {
            return Err(BindError::NotWritable { label: self.label() });
        };
        let label = self.contract.label(setter);
        let function = self.contract.function(setter)?;
        if !is_writable(function) {
            return Err(BindError::NotWritable { label });
        }

        let encode_err = |reason: String| BindError::Encode { label: label.clone(), reason };
        let Some(param) = function.inputs.last() else {
            return Err(encode_err("setter takes no value argument".to_string()));
        };
        let ty: DynSolType = param.resolve().map_err(|e| encode_err(e.to_string()))?;
        let encoded = value
            .to_sol()
            .and_then(|raw| fit_to_type(raw, &ty))
            .map_err(|e| encode_err(e.to_string()))?;
        let mut args = self.args.clone();
        args.push(encoded);

        let calldata = encode_input(function, &label, &args)?;
        Ok(PreparedTx::new(self.contract.address(), label, calldata, opts))
    }
}
