//! Structural verification.
//!
//! Checks that a module is well formed before any transformation touches
//! it: symbols are unique, every operand is defined before its use along
//! the region nesting, values are defined once, regions end with the right
//! terminator, operations have the operand/result counts and attributes
//! their kind requires, and calls and returns agree with the signatures
//! they refer to. Every problem is reported through the handler; the walk
//! does not stop at the first one.
use std::collections::{BTreeSet, HashSet};

use crate::{
    diagnostics::{Diagnostic, DiagnosticHandler, Reported},
    modules::{
        Function, Module, Region,
        operation::{OpFlags, OpKind, Operation},
        value::{Location, ValueId},
    },
    types::{Dim, Shape, Type},
};

/// Verify every function of `module`.
pub fn verify_module(module: &Module, handler: &mut DiagnosticHandler) -> Result<(), Reported> {
    let before = handler.len();

    let mut names = BTreeSet::new();
    for function in &module.functions {
        if !names.insert(function.name.as_str()) {
            handler.emit(Diagnostic::error(
                function.location,
                format!("redefinition of symbol named '{}'", function.name),
            ));
        }
    }

    for function in &module.functions {
        FunctionVerifier {
            module,
            function,
            handler: &mut *handler,
            defined: HashSet::new(),
            visible: HashSet::new(),
        }
        .verify();
    }

    if handler.len() > before {
        Err(Reported)
    } else {
        Ok(())
    }
}

struct FunctionVerifier<'a> {
    module: &'a Module,
    function: &'a Function,
    handler: &'a mut DiagnosticHandler,
    defined: HashSet<ValueId>,
    visible: HashSet<ValueId>,
}

impl<'a> FunctionVerifier<'a> {
    fn verify(&mut self) {
        let function = self.function;
        for (i, info) in function.values.iter().enumerate() {
            if let Some(problem) = malformed_type(&info.ty) {
                self.handler.emit(Diagnostic::error(
                    function.location,
                    format!("value %{} of @{} has an invalid type: {}", i, function.name, problem),
                ));
            }
        }

        self.verify_region(&function.body, None);
    }

    fn define(&mut self, value: ValueId, location: Location) -> bool {
        if value.index() >= self.function.values.len() {
            self.handler.emit(Diagnostic::error(
                location,
                format!("reference to unknown value {} in @{}", value, self.function.name),
            ));
            return false;
        }
        if !self.defined.insert(value) {
            self.handler.emit(Diagnostic::error(
                location,
                format!("value {} is defined more than once in @{}", value, self.function.name),
            ));
        }
        self.visible.insert(value);
        true
    }

    /// `parent` is the operation owning the region, `None` for the body.
    fn verify_region(&mut self, region: &'a Region, parent: Option<&'a Operation>) {
        let location = parent.map_or(self.function.location, |op| op.location);
        let mut scope = Vec::new();

        for arg in &region.arguments {
            if self.define(*arg, location) {
                scope.push(*arg);
            }
        }

        match region.operations.last() {
            None => {
                let message = match parent {
                    None => format!("function @{} has an empty body", self.function.name),
                    Some(op) => format!("'{}' op has an empty region", op.name()),
                };
                self.handler.emit(Diagnostic::error(location, message));
            }
            Some(last) => {
                let expected = if parent.is_none() {
                    OpKind::FuncReturn
                } else {
                    OpKind::Return
                };
                if last.kind != expected {
                    self.handler.emit(Diagnostic::op_error(
                        last,
                        format!("is not a valid terminator; the region must end with '{}'", expected),
                    ));
                }
            }
        }

        let count = region.operations.len();
        for (i, op) in region.operations.iter().enumerate() {
            if op.is_terminator() && i + 1 != count {
                self.handler.emit(Diagnostic::op_error(
                    op,
                    "must be the last operation in its region",
                ));
            }

            for (index, operand) in op.operands.iter().enumerate() {
                if operand.index() >= self.function.values.len() {
                    self.handler.emit(Diagnostic::op_error(
                        op,
                        format!("operand #{} references unknown value {}", index, operand),
                    ));
                } else if !self.visible.contains(operand) {
                    self.handler.emit(Diagnostic::op_error(
                        op,
                        format!("operand #{} does not dominate this use", index),
                    ));
                }
            }

            self.verify_op(op);

            for nested in &op.regions {
                self.verify_region(nested, Some(op));
            }

            for result in &op.results {
                if self.define(*result, op.location) {
                    scope.push(*result);
                }
            }
        }

        for value in scope {
            self.visible.remove(&value);
        }
    }

    fn type_of(&self, value: ValueId) -> Option<&'a Type> {
        self.function.get_value_type(value)
    }

    fn verify_op(&mut self, op: &'a Operation) {
        if let Some((operands, results)) = op.kind.arity() {
            if !operands.accepts(op.operands.len()) {
                self.handler.emit(Diagnostic::op_error(
                    op,
                    format!("requires {} operands but found {}", operands, op.operands.len()),
                ));
                return;
            }
            if !results.accepts(op.results.len()) {
                self.handler.emit(Diagnostic::op_error(
                    op,
                    format!("requires {} results but found {}", results, op.results.len()),
                ));
                return;
            }
        }

        if let Some(expected) = op.kind.num_regions() {
            if op.regions.len() != expected {
                self.handler.emit(Diagnostic::op_error(
                    op,
                    format!("requires {} regions but found {}", expected, op.regions.len()),
                ));
                return;
            }
        }

        for name in required_attributes(&op.kind) {
            if op.attribute(name).is_none() {
                self.handler.emit(Diagnostic::op_error(
                    op,
                    format!("requires attribute '{}'", name),
                ));
                return;
            }
        }

        if op.flags().contains(OpFlags::ELEMENTWISE) {
            self.verify_elementwise(op);
        }

        match &op.kind {
            OpKind::Constant => self.verify_constant(op),
            OpKind::FuncReturn => self.verify_return(op),
            OpKind::FuncCall => self.verify_call(op),
            OpKind::GetDimensionSize => self.verify_dimension_attribute(op, "dimension"),
            OpKind::Iota | OpKind::DynamicIota => {
                self.verify_dimension_attribute(op, "iota_dimension")
            }
            OpKind::While => self.verify_while(op),
            _ => {}
        }
    }

    fn verify_elementwise(&mut self, op: &'a Operation) {
        let function = self.function;
        let element_of = |value: &ValueId| {
            function
                .get_value_type(*value)
                .and_then(Type::as_tensor)
                .map(|tensor| tensor.element)
        };

        // Compare, select and convert change or mix element types.
        let checked: Vec<ValueId> = match op.kind {
            OpKind::Compare | OpKind::Convert => Vec::new(),
            OpKind::Select => op.operands[1..]
                .iter()
                .chain(&op.results)
                .copied()
                .collect(),
            _ => op.operands.iter().chain(&op.results).copied().collect(),
        };

        let elements: BTreeSet<_> = checked.iter().map(element_of).collect();
        if elements.len() > 1 || elements.contains(&None) {
            self.handler.emit(Diagnostic::op_error(
                op,
                "requires the same element type for all operands and results",
            ));
        }

        if op.kind == OpKind::Compare {
            let is_bool = op
                .results
                .first()
                .and_then(element_of)
                .is_some_and(|element| element.is_bool());
            if !is_bool {
                self.handler.emit(Diagnostic::op_error(
                    op,
                    "result #0 must be a tensor of i1 values",
                ));
            }
        }
    }

    fn verify_constant(&mut self, op: &'a Operation) {
        let Some(elements) = op.dense_attribute("value") else {
            self.handler.emit(Diagnostic::op_error(
                op,
                "requires attribute 'value' to be a dense elements attribute",
            ));
            return;
        };
        let Some(expected) = self
            .type_of(op.results[0])
            .and_then(Type::as_tensor)
            .and_then(|tensor| tensor.num_elements())
        else {
            return;
        };
        let found = elements.len() as i64;
        if found != expected && found != 1 {
            self.handler.emit(Diagnostic::op_error(
                op,
                format!(
                    "value has {} elements but the result type holds {}",
                    found, expected
                ),
            ));
        }
    }

    fn verify_return(&mut self, op: &'a Operation) {
        let function = self.function;
        if op.operands.len() != function.result_types.len() {
            self.handler.emit(Diagnostic::op_error(
                op,
                format!(
                    "has {} operands, but enclosing function (@{}) returns {}",
                    op.operands.len(),
                    function.name,
                    function.result_types.len()
                ),
            ));
            return;
        }
        for (i, (operand, expected)) in op.operands.iter().zip(&function.result_types).enumerate() {
            if let Some(found) = self.type_of(*operand) {
                if found != expected {
                    self.handler.emit(Diagnostic::op_error(
                        op,
                        format!(
                            "type of return operand {} ({}) doesn't match function result type ({}) in function @{}",
                            i, found, expected, function.name
                        ),
                    ));
                }
            }
        }
    }

    fn verify_call(&mut self, op: &'a Operation) {
        let Some(callee_name) = op.callee() else {
            self.handler.emit(Diagnostic::op_error(
                op,
                "requires a 'callee' symbol reference attribute",
            ));
            return;
        };
        let Some(callee) = self.module.function(callee_name) else {
            self.handler.emit(Diagnostic::op_error(
                op,
                format!("'{}' does not reference a valid function", callee_name),
            ));
            return;
        };

        let arguments = callee.argument_types();
        if op.operands.len() != arguments.len() {
            self.handler.emit(Diagnostic::op_error(op, "incorrect number of operands for callee"));
            return;
        }
        if op.results.len() != callee.result_types.len() {
            self.handler.emit(Diagnostic::op_error(op, "incorrect number of results for callee"));
            return;
        }
        for (i, (operand, expected)) in op.operands.iter().zip(&arguments).enumerate() {
            if let Some(found) = self.type_of(*operand) {
                if !found.is_compatible_with(expected) {
                    self.handler.emit(Diagnostic::op_error(
                        op,
                        format!(
                            "operand type mismatch: expected operand type {}, but provided {} for operand number {}",
                            expected, found, i
                        ),
                    ));
                }
            }
        }
        for (i, (result, expected)) in op.results.iter().zip(&callee.result_types).enumerate() {
            if let Some(found) = self.type_of(*result) {
                if !found.is_compatible_with(expected) {
                    self.handler.emit(Diagnostic::op_error(
                        op,
                        format!(
                            "result type mismatch at index {}: expected {}, but found {}",
                            i, expected, found
                        ),
                    ));
                }
            }
        }
    }

    fn verify_dimension_attribute(&mut self, op: &'a Operation, name: &str) {
        let Some(dimension) = op.int_attribute(name) else {
            self.handler.emit(Diagnostic::op_error(
                op,
                format!("requires integer attribute '{}'", name),
            ));
            return;
        };
        // get_dimension_size indexes its operand, iota its result.
        let subject = match op.kind {
            OpKind::GetDimensionSize => op.operands[0],
            _ => op.results[0],
        };
        let rank = self
            .type_of(subject)
            .and_then(Type::as_tensor)
            .and_then(|tensor| tensor.rank());
        if let Some(rank) = rank {
            if dimension < 0 || dimension as usize >= rank {
                self.handler.emit(Diagnostic::op_error(
                    op,
                    format!("requires {} attribute in range [0, {}), got {}", name, rank, dimension),
                ));
            }
        }
    }

    fn verify_while(&mut self, op: &'a Operation) {
        if op.operands.len() != op.results.len() {
            self.handler.emit(Diagnostic::op_error(
                op,
                "requires the same number of operands and results",
            ));
            return;
        }
        for (index, region) in op.regions.iter().enumerate() {
            if region.arguments.len() != op.operands.len() {
                self.handler.emit(Diagnostic::op_error(
                    op,
                    format!(
                        "region #{} expects {} arguments but has {}",
                        index,
                        op.operands.len(),
                        region.arguments.len()
                    ),
                ));
            }
        }
    }
}

/// Attributes an operation kind cannot do without.
fn required_attributes(kind: &OpKind) -> &'static [&'static str] {
    match kind {
        OpKind::Constant => &["value"],
        OpKind::Compare => &["comparison_direction"],
        OpKind::BroadcastInDim | OpKind::DynamicBroadcastInDim => &["broadcast_dimensions"],
        OpKind::Iota | OpKind::DynamicIota => &["iota_dimension"],
        OpKind::GetDimensionSize | OpKind::Concatenate => &["dimension"],
        OpKind::CustomCall => &["call_target_name"],
        OpKind::FuncCall => &["callee"],
        _ => &[],
    }
}

fn malformed_type(ty: &Type) -> Option<&'static str> {
    match ty {
        Type::Tensor(tensor) => match &tensor.shape {
            Shape::Ranked(dims) if dims.iter().any(|d| matches!(d, Dim::Static(s) if *s < 0)) => {
                Some("tensor dimension sizes must be non-negative")
            }
            _ => None,
        },
        Type::Token => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        modules::attributes::{Attribute, DenseElements},
        types::{TensorType, primary::IntType},
    };

    fn i64_scalar() -> Type {
        TensorType::scalar(IntType::I64).into()
    }

    fn verify(module: &Module) -> Vec<String> {
        let mut handler = DiagnosticHandler::new();
        let _ = verify_module(module, &mut handler);
        handler.take().0.into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn well_formed_function_passes() {
        let mut function = Function::new("main", [i64_scalar()], vec![i64_scalar()]);
        let arg = function.arguments()[0];
        let c = function.new_value(i64_scalar());
        let sum = function.new_value(i64_scalar());
        function.body.operations = vec![
            Operation::new(OpKind::Constant, vec![], vec![c])
                .with_attribute("value", Attribute::Dense(DenseElements::Ints(vec![1]))),
            Operation::new(OpKind::Add, vec![arg, c], vec![sum]),
            Operation::new(OpKind::FuncReturn, vec![sum], vec![]),
        ];
        let module = Module {
            name: None,
            functions: vec![function],
        };
        assert!(verify(&module).is_empty());
    }

    #[test]
    fn use_before_definition_is_reported() {
        let mut function = Function::new("main", [i64_scalar()], vec![i64_scalar()]);
        let arg = function.arguments()[0];
        let a = function.new_value(i64_scalar());
        let b = function.new_value(i64_scalar());
        function.body.operations = vec![
            Operation::new(OpKind::Add, vec![arg, b], vec![a]),
            Operation::new(OpKind::Negate, vec![arg], vec![b]),
            Operation::new(OpKind::FuncReturn, vec![a], vec![]),
        ];
        let module = Module {
            name: None,
            functions: vec![function],
        };
        assert_eq!(
            verify(&module),
            vec!["'stablehlo.add' op operand #1 does not dominate this use"]
        );
    }

    #[test]
    fn missing_terminator_and_bad_arity_are_reported() {
        let mut function = Function::new("main", [i64_scalar()], vec![]);
        let arg = function.arguments()[0];
        let r = function.new_value(i64_scalar());
        function.body.operations = vec![Operation::new(OpKind::Add, vec![arg], vec![r])];
        let module = Module {
            name: None,
            functions: vec![function],
        };
        let messages = verify(&module);
        assert!(messages.iter().any(|m| m.contains("is not a valid terminator")));
        assert!(messages.iter().any(|m| m.contains("requires 2 operands but found 1")));
    }
}
