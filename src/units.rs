//! Wire-to-host unit conversion.
//!
//! Contracts return every numeric value as an unsigned 256-bit integer. This module maps
//! those raw words onto host types with a declared unit policy:
//!
//! - plain integers (checked narrowing, never truncating)
//! - ratios as `f64` with 1e18 fixed-point scaling
//! - durations as whole seconds
//! - timestamps as seconds since the Unix epoch
//! - narrow enums declared with [`wire_enum!`](crate::wire_enum)
//!
//! All conversions are pure: the same wire value always yields the same host value.

use std::{
    fmt,
    marker::PhantomData,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy::primitives::{
    utils::{format_units, parse_units},
    U256,
};

use crate::ext::ConversionError;

/// Decimal places used by ratio-typed values on the wire.
pub const RATIO_DECIMALS: u8 = 18;

/// A host type with a declared wire representation.
pub trait Unit: Sized {
    /// Human-readable unit name, used in conversion errors.
    const NAME: &'static str;

    fn from_wire(raw: U256) -> Result<Self, ConversionError>;

    fn to_wire(&self) -> Result<U256, ConversionError>;
}

macro_rules! impl_integer_unit {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Unit for $ty {
                const NAME: &'static str = stringify!($ty);

                fn from_wire(raw: U256) -> Result<Self, ConversionError> {
                    <$ty>::try_from(raw).map_err(|_| ConversionError::overflow(Self::NAME, raw))
                }

                fn to_wire(&self) -> Result<U256, ConversionError> {
                    U256::try_from(*self)
                        .map_err(|_| ConversionError::Overflow { unit: Self::NAME, value: self.to_string() })
                }
            }
        )*
    };
}

impl_integer_unit!(u8, u16, u32, u64, u128, usize, i64);

impl Unit for U256 {
    const NAME: &'static str = "uint256";

    fn from_wire(raw: U256) -> Result<Self, ConversionError> {
        Ok(raw)
    }

    fn to_wire(&self) -> Result<U256, ConversionError> {
        Ok(*self)
    }
}

impl Unit for f64 {
    const NAME: &'static str = "ratio";

    fn from_wire(raw: U256) -> Result<Self, ConversionError> {
        fixed_to_f64(raw, RATIO_DECIMALS)
    }

    fn to_wire(&self) -> Result<U256, ConversionError> {
        f64_to_fixed(*self, RATIO_DECIMALS)
    }
}

impl Unit for Duration {
    const NAME: &'static str = "duration";

    fn from_wire(raw: U256) -> Result<Self, ConversionError> {
        let secs = u64::try_from(raw).map_err(|_| ConversionError::overflow(Self::NAME, raw))?;
        Ok(Duration::from_secs(secs))
    }

    /// Whole seconds only; a sub-second remainder is an `Overflow`.
    fn to_wire(&self) -> Result<U256, ConversionError> {
        whole_seconds(Self::NAME, *self)
    }
}

impl Unit for SystemTime {
    const NAME: &'static str = "timestamp";

    fn from_wire(raw: U256) -> Result<Self, ConversionError> {
        let secs = u64::try_from(raw).map_err(|_| ConversionError::overflow(Self::NAME, raw))?;
        UNIX_EPOCH
            .checked_add(Duration::from_secs(secs))
            .ok_or_else(|| ConversionError::overflow(Self::NAME, raw))
    }

    fn to_wire(&self) -> Result<U256, ConversionError> {
        let since_epoch = self.duration_since(UNIX_EPOCH).map_err(|e| ConversionError::Overflow {
            unit: Self::NAME,
            value: format!("{} seconds before epoch", e.duration().as_secs()),
        })?;
        whole_seconds(Self::NAME, since_epoch)
    }
}

fn whole_seconds(unit: &'static str, duration: Duration) -> Result<U256, ConversionError> {
    if duration.subsec_nanos() != 0 {
        return Err(ConversionError::Overflow { unit, value: format!("{duration:?}") });
    }
    Ok(U256::from(duration.as_secs()))
}

/// Convert a fixed-point wire value with `decimals` places into an `f64`.
///
/// Goes through the exact decimal string so the result is the nearest `f64`.
pub fn fixed_to_f64(raw: U256, decimals: u8) -> Result<f64, ConversionError> {
    let formatted =
        format_units(raw, decimals).map_err(|_| ConversionError::overflow("ratio", raw))?;
    let value: f64 = formatted.parse().map_err(|_| ConversionError::overflow("ratio", raw))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConversionError::overflow("ratio", raw))
    }
}

/// Convert an `f64` into a fixed-point wire value with `decimals` places.
///
/// Uses the shortest decimal that round-trips to `value`, so `0.05` becomes exactly
/// `5 * 10^(decimals - 2)`. Negative, NaN and infinite values, and values that need more
/// than `decimals` places, cannot be represented and fail with `Overflow`.
pub fn f64_to_fixed(value: f64, decimals: u8) -> Result<U256, ConversionError> {
    let overflow = || ConversionError::Overflow { unit: "ratio", value: value.to_string() };
    if !value.is_finite() || (value.is_sign_negative() && value != 0.0) {
        return Err(overflow());
    }
    if value == 0.0 {
        return Ok(U256::ZERO);
    }
    let text = value.to_string();
    if text.split_once('.').is_some_and(|(_, fraction)| fraction.len() > decimals as usize) {
        return Err(overflow());
    }
    parse_units(&text, decimals).map(|units| units.get_absolute()).map_err(|_| overflow())
}

// ============================================================================
// Parameter<T>
// ============================================================================

/// A raw wire value paired with its declared host unit.
///
/// Holds the undecoded integer and converts on demand. Useful when the caller
/// also needs the exact wire value, e.g. to pass it back as a call argument.
pub struct Parameter<T> {
    raw: U256,
    _unit: PhantomData<fn() -> T>,
}

impl<T: Unit> Parameter<T> {
    pub fn from_raw(raw: U256) -> Self {
        Self { raw, _unit: PhantomData }
    }

    pub fn from_value(value: &T) -> Result<Self, ConversionError> {
        Ok(Self::from_raw(value.to_wire()?))
    }

    pub fn raw(&self) -> U256 {
        self.raw
    }

    pub fn value(&self) -> Result<T, ConversionError> {
        T::from_wire(self.raw)
    }
}

impl<T> Clone for Parameter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Parameter<T> {}

impl<T> PartialEq for Parameter<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Parameter<T> {}

impl<T: Unit> fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter").field("unit", &T::NAME).field("raw", &self.raw).finish()
    }
}

// ============================================================================
// Narrow enums
// ============================================================================

/// Declare a `u8`-backed enum that converts to and from its wire index.
///
/// Indices outside the declared variants fail with `UnknownVariant`.
///
/// ```ignore
/// alloy_bind::wire_enum! {
///     pub enum MinipoolStatus {
///         Initialised = 0,
///         Prelaunch = 1,
///         Staking = 2,
///     }
/// }
/// ```
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident = $index:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $($variant = $index),*
        }

        impl $crate::ext::Unit for $name {
            const NAME: &'static str = stringify!($name);

            fn from_wire(
                raw: $crate::primitives::U256,
            ) -> ::core::result::Result<Self, $crate::ext::ConversionError> {
                let index = u8::try_from(raw)
                    .map_err(|_| $crate::ext::ConversionError::overflow(Self::NAME, raw))?;
                match index {
                    $($index => Ok($name::$variant),)*
                    other => Err($crate::ext::ConversionError::UnknownVariant {
                        kind: Self::NAME,
                        value: u64::from(other),
                    }),
                }
            }

            fn to_wire(
                &self,
            ) -> ::core::result::Result<$crate::primitives::U256, $crate::ext::ConversionError> {
                Ok($crate::primitives::U256::from(*self as u8))
            }
        }

        impl $crate::ext::SlotValue for $name {
            fn from_sol(
                values: ::std::vec::Vec<$crate::dyn_abi::DynSolValue>,
            ) -> ::core::result::Result<Self, $crate::ext::SlotError> {
                let raw = <$crate::primitives::U256 as $crate::ext::SlotValue>::from_sol(values)?;
                <$name as $crate::ext::Unit>::from_wire(raw).map_err($crate::ext::SlotError::from)
            }

            fn to_sol(
                &self,
            ) -> ::core::result::Result<$crate::dyn_abi::DynSolValue, $crate::ext::ConversionError> {
                Ok($crate::dyn_abi::DynSolValue::Uint(
                    $crate::primitives::U256::from(*self as u8),
                    8,
                ))
            }
        }
    };
}
