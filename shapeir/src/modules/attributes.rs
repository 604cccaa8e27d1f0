//! Operation attributes.
//!
//! Attributes are compile-time literals attached to an operation by name.
//! Dense element attributes hold the payload of `stablehlo.constant`; a
//! single stored element on a multi-element tensor is a splat.
#[cfg(feature = "borsh")]
use borsh::{BorshDeserialize, BorshSerialize};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIs, EnumIter, EnumString, EnumTryAs};

/// Comparison performed by `stablehlo.compare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum ComparisonDirection {
    EQ,
    NE,
    GE,
    GT,
    LE,
    LT,
}

impl ComparisonDirection {
    pub fn evaluate<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            ComparisonDirection::EQ => lhs == rhs,
            ComparisonDirection::NE => lhs != rhs,
            ComparisonDirection::GE => lhs >= rhs,
            ComparisonDirection::GT => lhs > rhs,
            ComparisonDirection::LE => lhs <= rhs,
            ComparisonDirection::LT => lhs < rhs,
        }
    }
}

/// Element payload of a dense attribute, flattened in row-major order.
#[derive(Debug, Clone, PartialEq, EnumIs, EnumTryAs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DenseElements {
    Ints(Vec<i64>),
    Bools(Vec<bool>),
    Floats(Vec<f64>),
}

impl DenseElements {
    pub fn len(&self) -> usize {
        match self {
            DenseElements::Ints(values) => values.len(),
            DenseElements::Bools(values) => values.len(),
            DenseElements::Floats(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer view of the elements, expanded to `count` elements when the
    /// payload is a splat. Booleans read as `0`/`1`; floats have no integer
    /// view.
    pub fn to_ints(&self, count: usize) -> Option<Vec<i64>> {
        let values: Vec<i64> = match self {
            DenseElements::Ints(values) => values.clone(),
            DenseElements::Bools(values) => values.iter().map(|b| i64::from(*b)).collect(),
            DenseElements::Floats(_) => return None,
        };
        expand_splat(values, count)
    }

    /// Boolean view of the elements, expanded like [`DenseElements::to_ints`].
    pub fn to_bools(&self, count: usize) -> Option<Vec<bool>> {
        let values: Vec<bool> = match self {
            DenseElements::Bools(values) => values.clone(),
            DenseElements::Ints(values) => values.iter().map(|v| *v != 0).collect(),
            DenseElements::Floats(_) => return None,
        };
        expand_splat(values, count)
    }
}

// Floats are stored by their bit patterns: borsh refuses NaN, which is a
// legal constant.
#[cfg(feature = "borsh")]
impl BorshSerialize for DenseElements {
    fn serialize<W: borsh::io::Write>(&self, writer: &mut W) -> borsh::io::Result<()> {
        match self {
            DenseElements::Ints(values) => {
                0u8.serialize(writer)?;
                values.serialize(writer)
            }
            DenseElements::Bools(values) => {
                1u8.serialize(writer)?;
                values.serialize(writer)
            }
            DenseElements::Floats(values) => {
                2u8.serialize(writer)?;
                let bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
                bits.serialize(writer)
            }
        }
    }
}

#[cfg(feature = "borsh")]
impl BorshDeserialize for DenseElements {
    fn deserialize_reader<R: borsh::io::Read>(reader: &mut R) -> borsh::io::Result<Self> {
        match u8::deserialize_reader(reader)? {
            0 => Ok(DenseElements::Ints(Vec::deserialize_reader(reader)?)),
            1 => Ok(DenseElements::Bools(Vec::deserialize_reader(reader)?)),
            2 => {
                let bits = Vec::<u64>::deserialize_reader(reader)?;
                Ok(DenseElements::Floats(bits.into_iter().map(f64::from_bits).collect()))
            }
            tag => Err(borsh::io::Error::new(
                borsh::io::ErrorKind::InvalidData,
                format!("unknown dense elements tag {}", tag),
            )),
        }
    }
}

fn expand_splat<T: Clone>(values: Vec<T>, count: usize) -> Option<Vec<T>> {
    if values.len() == count {
        Some(values)
    } else if values.len() == 1 {
        Some(vec![values[0].clone(); count])
    } else {
        None
    }
}

impl std::fmt::Display for DenseElements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_list<T>(
            f: &mut std::fmt::Formatter<'_>,
            values: &[T],
            item: impl Fn(&mut std::fmt::Formatter<'_>, &T) -> std::fmt::Result,
        ) -> std::fmt::Result {
            if let [single] = values {
                return item(f, single);
            }
            write!(f, "[")?;
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                item(f, value)?;
            }
            write!(f, "]")
        }

        write!(f, "dense<")?;
        match self {
            DenseElements::Ints(values) => write_list(f, values, |f, v| write!(f, "{}", v))?,
            DenseElements::Bools(values) => write_list(f, values, |f, v| write!(f, "{}", v))?,
            DenseElements::Floats(values) => write_list(f, values, |f, v| write!(f, "{:?}", v))?,
        }
        write!(f, ">")
    }
}

/// Attribute value attached to an operation.
#[derive(Debug, Clone, PartialEq, EnumIs, EnumTryAs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum Attribute {
    Str(String),
    Bool(bool),
    Int(i64),
    Dense(DenseElements),
    /// `array<i64: ...>`
    Array(Vec<i64>),
    /// `@name` reference to a function.
    Symbol(String),
    ComparisonDirection(ComparisonDirection),
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attribute::Str(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
            Attribute::Bool(b) => write!(f, "{}", b),
            Attribute::Int(v) => write!(f, "{}", v),
            Attribute::Dense(elements) => elements.fmt(f),
            Attribute::Array(values) => {
                write!(f, "array<i64")?;
                for (i, v) in values.iter().enumerate() {
                    write!(f, "{}{}", if i == 0 { ": " } else { ", " }, v)?;
                }
                write!(f, ">")
            }
            Attribute::Symbol(name) => write!(f, "@{}", name),
            Attribute::ComparisonDirection(dir) => {
                write!(f, "#stablehlo<comparison_direction {}>", dir)
            }
        }
    }
}
