#[cfg(feature = "borsh")]
use borsh::{BorshDeserialize, BorshSerialize};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumTryAs};

/// Interpretation of the bits of an integer element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum Signedness {
    /// `iN`: operations decide how the bits are interpreted.
    Signless,
    /// `siN`
    Signed,
    /// `uiN`
    Unsigned,
}

/// Represents an integer element type with a specific bit width.
///
/// Only the widths listed in [`IntType::SUPPORTED_WIDTHS`] can be constructed.
/// Signless integers are interpreted as two's complement when folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub struct IntType {
    width: u32,
    signedness: Signedness,
}

impl IntType {
    pub const I1: Self = Self::signless(1);
    pub const I8: Self = Self::signless(8);
    pub const I16: Self = Self::signless(16);
    pub const I32: Self = Self::signless(32);
    pub const I64: Self = Self::signless(64);
    pub const SUPPORTED_WIDTHS: [u32; 5] = [1, 8, 16, 32, 64];

    const fn signless(width: u32) -> Self {
        Self {
            width,
            signedness: Signedness::Signless,
        }
    }

    /// Creates a new integer type, returning `None` for unsupported widths.
    pub const fn new(width: u32, signedness: Signedness) -> Option<Self> {
        match width {
            1 | 8 | 16 | 32 | 64 => Some(Self { width, signedness }),
            _ => None,
        }
    }

    #[inline]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub const fn signedness(&self) -> Signedness {
        self.signedness
    }

    /// Returns `true` for the signless 1-bit integer used for predicates.
    #[inline]
    pub const fn is_bool(&self) -> bool {
        self.width == 1 && matches!(self.signedness, Signedness::Signless)
    }

    /// Truncates `value` to the width of this type and sign-extends it back
    /// to 64 bits (zero-extends for unsigned types).
    pub fn wrap(&self, value: i64) -> i64 {
        if self.width >= 64 {
            return value;
        }
        if self.width == 1 {
            return value & 1;
        }

        let shift = 64 - self.width;
        match self.signedness {
            Signedness::Unsigned => (((value as u64) << shift) >> shift) as i64,
            Signedness::Signless | Signedness::Signed => (value << shift) >> shift,
        }
    }
}

impl std::fmt::Display for IntType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.signedness {
            Signedness::Signless => write!(f, "i{}", self.width),
            Signedness::Signed => write!(f, "si{}", self.width),
            Signedness::Unsigned => write!(f, "ui{}", self.width),
        }
    }
}

/// Represents a floating-point element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum FloatType {
    /// IEEE-754 binary16.
    F16,

    /// 16-bit "brain" floating point value. Same exponent range as `F32`
    /// with a 7-bit significand.
    BF16,

    /// IEEE-754 binary32.
    F32,

    /// IEEE-754 binary64.
    F64,
}

impl std::fmt::Display for FloatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FloatType::F16 => "f16",
            FloatType::BF16 => "bf16",
            FloatType::F32 => "f32",
            FloatType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs, EnumTryAs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum ElementType {
    Int(IntType),
    Float(FloatType),
}

impl ElementType {
    /// Returns `true` for the signless `i1` element type.
    pub fn is_bool(&self) -> bool {
        matches!(self, ElementType::Int(ity) if ity.is_bool())
    }

    /// Returns `true` for signless `i32` or `i64`.
    pub fn is_signless_i32_or_i64(&self) -> bool {
        matches!(self, ElementType::Int(ity) if *ity == IntType::I32 || *ity == IntType::I64)
    }
}

impl From<IntType> for ElementType {
    fn from(ity: IntType) -> Self {
        ElementType::Int(ity)
    }
}

impl From<FloatType> for ElementType {
    fn from(fty: FloatType) -> Self {
        ElementType::Float(fty)
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementType::Int(ity) => ity.fmt(f),
            ElementType::Float(fty) => fty.fmt(f),
        }
    }
}
