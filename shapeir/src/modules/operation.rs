//! Operations and their kinds.
//!
//! The set of operations understood by the pipeline is closed and modelled by
//! [`OpKind`]. Operations from a recognized dialect that the pipeline does
//! not model are kept as [`OpKind::Unregistered`] and treated as opaque.
use std::collections::BTreeMap;

use bitflags::bitflags;
#[cfg(feature = "borsh")]
use borsh::{BorshDeserialize, BorshSerialize};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumIter, IntoEnumIterator};

use crate::modules::{
    Region,
    attributes::{Attribute, DenseElements},
    value::{Location, ValueId},
};

/// Dialects whose operations may appear in a module.
pub const KNOWN_DIALECTS: [&str; 3] = ["func", "stablehlo", "chlo"];

bitflags! {
    /// Static properties of an operation kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u8 {
        /// No side effects: may be deduplicated or removed when unused.
        const PURE = 1 << 0;
        /// Must be the last operation of its region.
        const TERMINATOR = 1 << 1;
        /// Result shape equals the (common) operand shape.
        const ELEMENTWISE = 1 << 2;
        /// Result shape is computed from a shape operand at runtime.
        const DYNAMISM = 1 << 3;
    }
}

/// Expected number of operands or results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Any => true,
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Kind tag of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumIter)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum OpKind {
    FuncReturn,
    FuncCall,
    Constant,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Maximum,
    Minimum,
    Negate,
    Abs,
    And,
    Or,
    Not,
    Compare,
    Select,
    Convert,
    Reshape,
    DynamicReshape,
    BroadcastInDim,
    DynamicBroadcastInDim,
    Iota,
    DynamicIota,
    GetDimensionSize,
    Concatenate,
    CustomCall,
    While,
    Return,
    /// Operation of a known dialect without modelled semantics.
    Unregistered(String),
}

impl OpKind {
    /// Fully qualified operation name, e.g. `stablehlo.add`.
    pub fn name(&self) -> &str {
        match self {
            OpKind::FuncReturn => "func.return",
            OpKind::FuncCall => "func.call",
            OpKind::Constant => "stablehlo.constant",
            OpKind::Add => "stablehlo.add",
            OpKind::Subtract => "stablehlo.subtract",
            OpKind::Multiply => "stablehlo.multiply",
            OpKind::Divide => "stablehlo.divide",
            OpKind::Remainder => "stablehlo.remainder",
            OpKind::Maximum => "stablehlo.maximum",
            OpKind::Minimum => "stablehlo.minimum",
            OpKind::Negate => "stablehlo.negate",
            OpKind::Abs => "stablehlo.abs",
            OpKind::And => "stablehlo.and",
            OpKind::Or => "stablehlo.or",
            OpKind::Not => "stablehlo.not",
            OpKind::Compare => "stablehlo.compare",
            OpKind::Select => "stablehlo.select",
            OpKind::Convert => "stablehlo.convert",
            OpKind::Reshape => "stablehlo.reshape",
            OpKind::DynamicReshape => "stablehlo.dynamic_reshape",
            OpKind::BroadcastInDim => "stablehlo.broadcast_in_dim",
            OpKind::DynamicBroadcastInDim => "stablehlo.dynamic_broadcast_in_dim",
            OpKind::Iota => "stablehlo.iota",
            OpKind::DynamicIota => "stablehlo.dynamic_iota",
            OpKind::GetDimensionSize => "stablehlo.get_dimension_size",
            OpKind::Concatenate => "stablehlo.concatenate",
            OpKind::CustomCall => "stablehlo.custom_call",
            OpKind::While => "stablehlo.while",
            OpKind::Return => "stablehlo.return",
            OpKind::Unregistered(name) => name,
        }
    }

    /// Resolve an operation name. Unknown names of a known dialect other
    /// than `func` become [`OpKind::Unregistered`]; anything else is `None`.
    pub fn from_name(name: &str) -> Option<OpKind> {
        if let Some(kind) = OpKind::iter()
            .filter(|kind| !kind.is_unregistered())
            .find(|kind| kind.name() == name)
        {
            return Some(kind);
        }

        match name.split_once('.') {
            Some(("stablehlo" | "chlo", op)) if !op.is_empty() => {
                Some(OpKind::Unregistered(name.to_string()))
            }
            _ => None,
        }
    }

    /// Dialect prefix of the operation name.
    pub fn dialect(&self) -> &str {
        self.name()
            .split_once('.')
            .map(|(dialect, _)| dialect)
            .unwrap_or_default()
    }

    pub fn flags(&self) -> OpFlags {
        match self {
            OpKind::FuncReturn | OpKind::Return => OpFlags::TERMINATOR,
            OpKind::Add
            | OpKind::Subtract
            | OpKind::Multiply
            | OpKind::Divide
            | OpKind::Remainder
            | OpKind::Maximum
            | OpKind::Minimum
            | OpKind::Negate
            | OpKind::Abs
            | OpKind::And
            | OpKind::Or
            | OpKind::Not
            | OpKind::Compare
            | OpKind::Select
            | OpKind::Convert => OpFlags::PURE | OpFlags::ELEMENTWISE,
            OpKind::Constant
            | OpKind::Reshape
            | OpKind::BroadcastInDim
            | OpKind::Iota
            | OpKind::GetDimensionSize
            | OpKind::Concatenate => OpFlags::PURE,
            OpKind::DynamicReshape | OpKind::DynamicBroadcastInDim | OpKind::DynamicIota => {
                OpFlags::PURE | OpFlags::DYNAMISM
            }
            OpKind::FuncCall | OpKind::CustomCall | OpKind::While | OpKind::Unregistered(_) => {
                OpFlags::empty()
            }
        }
    }

    /// Expected (operand, result) counts, or `None` when unchecked.
    pub fn arity(&self) -> Option<(Arity, Arity)> {
        use Arity::*;
        Some(match self {
            OpKind::FuncReturn | OpKind::Return => (Any, Exactly(0)),
            OpKind::FuncCall | OpKind::CustomCall => (Any, Any),
            OpKind::Constant | OpKind::Iota => (Exactly(0), Exactly(1)),
            OpKind::Add
            | OpKind::Subtract
            | OpKind::Multiply
            | OpKind::Divide
            | OpKind::Remainder
            | OpKind::Maximum
            | OpKind::Minimum
            | OpKind::And
            | OpKind::Or
            | OpKind::Compare
            | OpKind::DynamicReshape
            | OpKind::DynamicBroadcastInDim => (Exactly(2), Exactly(1)),
            OpKind::Negate
            | OpKind::Abs
            | OpKind::Not
            | OpKind::Convert
            | OpKind::Reshape
            | OpKind::BroadcastInDim
            | OpKind::DynamicIota
            | OpKind::GetDimensionSize => (Exactly(1), Exactly(1)),
            OpKind::Select => (Exactly(3), Exactly(1)),
            OpKind::Concatenate => (AtLeast(1), Exactly(1)),
            OpKind::While => (Any, Any),
            OpKind::Unregistered(_) => return None,
        })
    }

    /// Number of regions the operation must carry, or `None` when unchecked.
    pub fn num_regions(&self) -> Option<usize> {
        match self {
            OpKind::While => Some(2),
            OpKind::Unregistered(_) => None,
            _ => Some(0),
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single operation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    pub attributes: BTreeMap<String, Attribute>,
    pub regions: Vec<Region>,
    pub location: Location,
}

impl Operation {
    pub fn new(kind: OpKind, operands: Vec<ValueId>, results: Vec<ValueId>) -> Self {
        Self {
            kind,
            operands,
            results,
            attributes: BTreeMap::new(),
            regions: Vec::new(),
            location: Location::Unknown,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_regions(mut self, regions: Vec<Region>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    pub fn flags(&self) -> OpFlags {
        self.kind.flags()
    }

    pub fn is_pure(&self) -> bool {
        self.flags().contains(OpFlags::PURE)
    }

    pub fn is_terminator(&self) -> bool {
        self.flags().contains(OpFlags::TERMINATOR)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn str_attribute(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name)? {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn bool_attribute(&self, name: &str) -> Option<bool> {
        match self.attributes.get(name)? {
            Attribute::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn int_attribute(&self, name: &str) -> Option<i64> {
        match self.attributes.get(name)? {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn array_attribute(&self, name: &str) -> Option<&[i64]> {
        match self.attributes.get(name)? {
            Attribute::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn symbol_attribute(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name)? {
            Attribute::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn dense_attribute(&self, name: &str) -> Option<&DenseElements> {
        match self.attributes.get(name)? {
            Attribute::Dense(elements) => Some(elements),
            _ => None,
        }
    }

    /// Callee of a `func.call`.
    pub fn callee(&self) -> Option<&str> {
        match self.kind {
            OpKind::FuncCall => self.symbol_attribute("callee"),
            _ => None,
        }
    }

    /// Visit this operation and all nested operations in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Operation)) {
        f(self);
        for region in &self.regions {
            region.walk(f);
        }
    }

    /// Replace every operand (including in nested regions) found in `mapping`.
    pub fn remap_operands(&mut self, mapping: &impl Fn(ValueId) -> Option<ValueId>) {
        for operand in self.operands.iter_mut() {
            if let Some(new) = mapping(*operand) {
                *operand = new;
            }
        }
        for region in self.regions.iter_mut() {
            for op in region.operations.iter_mut() {
                op.remap_operands(mapping);
            }
        }
    }
}
