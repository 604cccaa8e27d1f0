//! Lightweight analyses over a function body.
use std::collections::HashMap;

use crate::{
    modules::{
        Function, Region,
        attributes::DenseElements,
        operation::{OpKind, Operation},
        value::ValueId,
    },
    types::Type,
};

/// Values defined by `stablehlo.constant`, keyed by result value.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    constants: HashMap<ValueId, DenseElements>,
}

impl ConstantTable {
    /// Collect every constant defined anywhere in `function`.
    pub fn build(function: &Function) -> Self {
        let mut table = Self::default();
        function.walk(&mut |op| table.record(op));
        table
    }

    /// Record `op` if it is a constant.
    pub fn record(&mut self, op: &Operation) {
        if op.kind != OpKind::Constant {
            return;
        }
        if let (Some(result), Some(value)) = (op.results.first(), op.dense_attribute("value")) {
            self.constants.insert(*result, value.clone());
        }
    }

    pub fn insert(&mut self, value: ValueId, elements: DenseElements) {
        self.constants.insert(value, elements);
    }

    pub fn get(&self, value: ValueId) -> Option<&DenseElements> {
        self.constants.get(&value)
    }

    pub fn is_constant(&self, value: ValueId) -> bool {
        self.constants.contains_key(&value)
    }

    /// Integer elements of a constant value of static type, splats expanded.
    pub fn match_ints(&self, function: &Function, value: ValueId) -> Option<Vec<i64>> {
        let count = static_element_count(function.get_value_type(value)?)?;
        self.get(value)?.to_ints(count)
    }

    /// Boolean elements of a constant value of static type, splats expanded.
    pub fn match_bools(&self, function: &Function, value: ValueId) -> Option<Vec<bool>> {
        let count = static_element_count(function.get_value_type(value)?)?;
        self.get(value)?.to_bools(count)
    }
}

fn static_element_count(ty: &Type) -> Option<usize> {
    usize::try_from(ty.as_tensor()?.num_elements()?).ok()
}

/// Collect the ids of every value defined in `region` (arguments, results
/// and nested definitions).
pub fn defined_values(region: &Region) -> Vec<ValueId> {
    let mut values = region.arguments.clone();
    for op in &region.operations {
        values.extend(op.results.iter().copied());
        for nested in &op.regions {
            values.extend(defined_values(nested));
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        modules::attributes::Attribute,
        types::{TensorType, primary::IntType},
    };

    #[test]
    fn splat_constants_expand_to_static_type() {
        let mut function = Function::new("f", [], vec![]);
        let value = function.new_value(TensorType::with_static_dims(IntType::I64, &[3]).into());
        function.body.operations.push(
            Operation::new(OpKind::Constant, vec![], vec![value]).with_attribute(
                "value",
                Attribute::Dense(DenseElements::Ints(vec![4])),
            ),
        );

        let table = ConstantTable::build(&function);
        assert_eq!(table.match_ints(&function, value), Some(vec![4, 4, 4]));
        assert_eq!(table.match_bools(&function, value), Some(vec![true, true, true]));
        assert_eq!(defined_values(&function.body), vec![value]);
    }
}
