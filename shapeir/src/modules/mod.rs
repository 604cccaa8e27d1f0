//! Program structure: regions, functions and modules.
//!
//! A [`Module`] owns an ordered list of [`Function`]s. Each function owns a
//! value table and a single-block body [`Region`]; operations may carry
//! nested regions (for example the condition and body of `stablehlo.while`),
//! whose block arguments are allocated in the same value table. Values are
//! referenced by [`ValueId`] and must be defined before use along the
//! region nesting.
//!
//! - `attributes`: attribute literals
//! - `operation`: operation kinds and the [`Operation`] node
//! - `value`: SSA value handles and locations
//! - `parser`: text format parser (feature `chumsky`)
//! - `fmt`: text format printer
use std::collections::BTreeMap;

#[cfg(feature = "borsh")]
use borsh::{BorshDeserialize, BorshSerialize};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    modules::{
        operation::Operation,
        value::{Location, ValueId, ValueInfo},
    },
    types::Type,
};

pub mod attributes;
pub mod fmt;
pub mod operation;
#[cfg(feature = "chumsky")]
pub mod parser;
pub mod value;

/// A single-block region: block arguments followed by operations.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub struct Region {
    pub arguments: Vec<ValueId>,
    pub operations: Vec<Operation>,
}

impl Region {
    pub fn new(arguments: Vec<ValueId>) -> Self {
        Self {
            arguments,
            operations: Vec::new(),
        }
    }

    /// Visit every operation (including nested ones) in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Operation)) {
        for op in &self.operations {
            op.walk(f);
        }
    }

    /// Terminator of the region, if the last operation is one.
    pub fn terminator(&self) -> Option<&Operation> {
        self.operations.last().filter(|op| op.is_terminator())
    }
}

/// Symbol visibility of a function.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum Visibility {
    /// Callable from outside the module. Never removed.
    #[default]
    Public,

    /// Only reachable through calls within the module. Erased once unused.
    Private,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

/// A function: signature, value table and body.
///
/// The function arguments are the arguments of the body region.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub struct Function {
    pub name: String,
    pub visibility: Visibility,
    pub result_types: Vec<Type>,
    pub body: Region,
    pub values: Vec<ValueInfo>,
    pub location: Location,
}

impl Function {
    /// Create a function with an empty body and one argument per type.
    pub fn new(
        name: impl Into<String>,
        argument_types: impl IntoIterator<Item = Type>,
        result_types: Vec<Type>,
    ) -> Self {
        let mut function = Self {
            name: name.into(),
            visibility: Visibility::Public,
            result_types,
            body: Region::default(),
            values: Vec::new(),
            location: Location::Unknown,
        };
        let arguments = argument_types
            .into_iter()
            .map(|ty| function.new_value(ty))
            .collect();
        function.body.arguments = arguments;
        function
    }

    /// Allocate a fresh value of the given type.
    pub fn new_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo { ty });
        id
    }

    pub fn arguments(&self) -> &[ValueId] {
        &self.body.arguments
    }

    pub fn argument_types(&self) -> Vec<Type> {
        self.body
            .arguments
            .iter()
            .map(|arg| self.value_type(*arg).clone())
            .collect()
    }

    /// Type of a value of this function.
    ///
    /// Panics when `value` was not allocated by this function.
    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.values[value.index()].ty
    }

    pub fn get_value_type(&self, value: ValueId) -> Option<&Type> {
        self.values.get(value.index()).map(|info| &info.ty)
    }

    pub fn set_value_type(&mut self, value: ValueId, ty: Type) {
        self.values[value.index()].ty = ty;
    }

    /// Visit every operation of the body in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Operation)) {
        self.body.walk(f);
    }

    /// Replace every use of `from` with `to`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        let mapping = |value: ValueId| (value == from).then_some(to);
        for op in self.body.operations.iter_mut() {
            op.remap_operands(&mapping);
        }
    }

    /// Number of uses of each value, indexed by [`ValueId::index`].
    pub fn use_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.values.len()];
        self.walk(&mut |op| {
            for operand in &op.operands {
                if let Some(count) = counts.get_mut(operand.index()) {
                    *count += 1;
                }
            }
        });
        counts
    }

    /// Renumber values sequentially in definition order and drop unused
    /// entries from the value table.
    ///
    /// Definition order is: region arguments, then the results of each
    /// operation followed by the values defined in its nested regions.
    pub fn renumber_values(&mut self) {
        fn collect(region: &Region, order: &mut Vec<ValueId>) {
            order.extend(region.arguments.iter().copied());
            for op in &region.operations {
                order.extend(op.results.iter().copied());
                for nested in &op.regions {
                    collect(nested, order);
                }
            }
        }

        fn rewrite(region: &mut Region, mapping: &BTreeMap<ValueId, ValueId>) {
            let renamed = |value: &mut ValueId| {
                if let Some(new) = mapping.get(value) {
                    *value = *new;
                }
            };
            region.arguments.iter_mut().for_each(renamed);
            for op in region.operations.iter_mut() {
                op.operands.iter_mut().for_each(renamed);
                op.results.iter_mut().for_each(renamed);
                for nested in op.regions.iter_mut() {
                    rewrite(nested, mapping);
                }
            }
        }

        let mut order = Vec::new();
        collect(&self.body, &mut order);

        let mut mapping = BTreeMap::new();
        let mut values = Vec::with_capacity(order.len());
        for old in order {
            let Some(info) = self.values.get(old.index()) else {
                continue;
            };
            if mapping.contains_key(&old) {
                continue;
            }
            mapping.insert(old, ValueId(values.len() as u32));
            values.push(info.clone());
        }

        rewrite(&mut self.body, &mapping);
        self.values = values;
    }
}

/// A module: the unit handed to the refinement pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub struct Module {
    pub name: Option<String>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}
