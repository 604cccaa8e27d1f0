//! Fixpoint shape refinement.
//!
//! Every sweep visits the operations of each function in order, infers
//! result shapes from operand shapes and constant shape operands, refines
//! the declared result types with what was inferred, and folds integer
//! computations into constants. Refined return types flow into the function
//! signature and from there into the results of calls in the next sweep.
use std::collections::HashMap;

use log::{debug, trace};
use shapeir::{
    Attribute, Diagnostic, DiagnosticHandler, Dim, Function, Location, Module, OpFlags, OpKind,
    Operation, Region, Reported, Shape, Type, ValueId, ValueInfo, analysis::ConstantTable,
};

use super::fold::{Folder, MAX_FOLDED_ELEMENTS};
use crate::pass::ModulePass;

pub struct ShapeRefinement {
    max_iterations: usize,
}

impl ShapeRefinement {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }
}

impl Default for ShapeRefinement {
    fn default() -> Self {
        Self::new(64)
    }
}

struct Refiner<'a> {
    values: &'a mut Vec<ValueInfo>,
    constants: ConstantTable,
    signatures: &'a HashMap<String, Vec<Type>>,
    diagnostics: &'a mut DiagnosticHandler,
    changed: bool,
}

impl Refiner<'_> {
    fn ty(&self, value: ValueId) -> Option<&Type> {
        self.values.get(value.index()).map(|info| &info.ty)
    }

    fn shape(&self, value: ValueId) -> Option<&Shape> {
        Some(&self.ty(value)?.as_tensor()?.shape)
    }

    fn folder(&self) -> Folder<'_> {
        Folder {
            values: self.values.as_slice(),
            constants: &self.constants,
        }
    }

    /// Meet the type of `value` with `inferred`.
    fn refine_value(
        &mut self,
        kind: &OpKind,
        location: Location,
        value: ValueId,
        inferred: &Type,
    ) -> Result<(), Reported> {
        let Some(info) = self.values.get_mut(value.index()) else {
            return Ok(());
        };
        match info.ty.meet(inferred) {
            Some(refined) if refined != info.ty => {
                trace!("refined %{} from {} to {}", value.0, info.ty, refined);
                info.ty = refined;
                self.changed = true;
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                let message = format!(
                    "'{}' op inferred type {} is incompatible with result type {}",
                    kind.name(),
                    inferred,
                    info.ty
                );
                Err(self.diagnostics.emit(Diagnostic::error(location, message)))
            }
        }
    }

    /// Shape described by a 1-D shape operand: static sizes when the operand
    /// is a constant, otherwise only the rank when its length is known.
    fn shape_from_operand(&self, operand: ValueId) -> Option<Shape> {
        if let Some(dims) = self.folder().expanded_ints(operand) {
            if dims.iter().any(|d| *d < 0) {
                return None;
            }
            return Some(Shape::from_static(&dims));
        }
        let length = usize::try_from(self.ty(operand)?.as_tensor()?.num_elements()?).ok()?;
        if length > MAX_FOLDED_ELEMENTS {
            return None;
        }
        Some(Shape::Ranked(vec![Dim::Dynamic; length]))
    }

    /// Result shape of a single-result operation, from its operands alone.
    fn infer_shape(&self, op: &Operation) -> Option<Shape> {
        if op.flags().contains(OpFlags::ELEMENTWISE) {
            let mut acc = Shape::Unranked;
            for (i, operand) in op.operands.iter().enumerate() {
                let shape = self.shape(*operand)?;
                // `select` accepts a scalar predicate.
                if op.kind == OpKind::Select && i == 0 && shape.rank() == Some(0) {
                    continue;
                }
                acc = acc.meet(shape)?;
            }
            return Some(acc);
        }

        match op.kind {
            OpKind::DynamicReshape | OpKind::DynamicBroadcastInDim => self.shape_from_operand(*op.operands.get(1)?),
            OpKind::DynamicIota => self.shape_from_operand(*op.operands.first()?),
            OpKind::Concatenate => self.infer_concatenate(op),
            _ => None,
        }
    }

    fn infer_concatenate(&self, op: &Operation) -> Option<Shape> {
        let dimension = usize::try_from(op.int_attribute("dimension")?).ok()?;
        let mut operands = op.operands.iter().map(|operand| self.shape(*operand)?.dims());
        let mut dims: Vec<Dim> = operands.next()??.to_vec();
        if dimension >= dims.len() {
            return None;
        }
        for next in operands {
            let next = next?;
            if next.len() != dims.len() {
                return None;
            }
            for (i, (acc, dim)) in dims.iter_mut().zip(next).enumerate() {
                *acc = match (i == dimension, *acc, *dim) {
                    (true, Dim::Static(a), Dim::Static(b)) => Dim::Static(a.checked_add(b)?),
                    (true, _, _) => Dim::Dynamic,
                    (false, a, b) => a.meet(&b)?,
                };
            }
        }
        Some(Shape::Ranked(dims))
    }

    fn refine_results(&mut self, op: &Operation) -> Result<(), Reported> {
        if op.kind == OpKind::FuncCall {
            let signatures = self.signatures;
            let Some(signature) = op.callee().and_then(|name| signatures.get(name)) else {
                return Ok(());
            };
            for (result, ty) in op.results.iter().zip(signature) {
                self.refine_value(&op.kind, op.location, *result, ty)?;
            }
            return Ok(());
        }

        let [result] = op.results[..] else {
            return Ok(());
        };
        let Some(Type::Tensor(declared)) = self.ty(result) else {
            return Ok(());
        };
        let declared = declared.clone();
        match self.infer_shape(op) {
            Some(shape) => {
                let inferred = Type::Tensor(declared.with_shape(shape));
                self.refine_value(&op.kind, op.location, result, &inferred)
            }
            None if op.flags().contains(OpFlags::ELEMENTWISE) => Err(self
                .diagnostics
                .emit(Diagnostic::op_error(op, "operands have incompatible shapes"))),
            None => Ok(()),
        }
    }

    fn refine_while(&mut self, op: &mut Operation) -> Result<(), Reported> {
        let carried: Vec<Type> = op
            .operands
            .iter()
            .filter_map(|operand| self.ty(*operand).cloned())
            .collect();

        for region in op.regions.iter_mut() {
            for (argument, ty) in region.arguments.iter().zip(&carried) {
                self.refine_value(&op.kind, op.location, *argument, ty)?;
            }
            self.refine_region(region)?;
        }

        if let Some(yielded) = op.regions.get(1).and_then(Region::terminator) {
            for (value, expected) in yielded.operands.iter().zip(&carried) {
                let Some(found) = self.ty(*value) else {
                    continue;
                };
                if !found.is_compatible_with(expected) {
                    let message = format!(
                        "body yields {} which is incompatible with loop-carried type {}",
                        found, expected
                    );
                    return Err(self.diagnostics.emit(Diagnostic::op_error(op, message)));
                }
            }
        }

        for (result, ty) in op.results.iter().zip(&carried) {
            self.refine_value(&op.kind, op.location, *result, ty)?;
        }
        Ok(())
    }

    fn refine_region(&mut self, region: &mut Region) -> Result<(), Reported> {
        for op in region.operations.iter_mut() {
            match op.kind {
                OpKind::While => self.refine_while(op)?,
                _ => {
                    self.refine_results(op)?;
                    for nested in op.regions.iter_mut() {
                        self.refine_region(nested)?;
                    }
                }
            }

            if op.kind == OpKind::Constant || !op.is_pure() {
                continue;
            }
            if let Some(elements) = self.folder().fold(op) {
                trace!("folded '{}' into a constant", op.name());
                let results = std::mem::take(&mut op.results);
                if let Some(result) = results.first() {
                    self.constants.insert(*result, elements.clone());
                }
                *op = Operation::new(OpKind::Constant, Vec::new(), results)
                    .with_attribute("value", Attribute::Dense(elements))
                    .with_location(op.location);
                self.changed = true;
            }
        }
        Ok(())
    }
}

/// One sweep over `function`. Returns whether anything changed.
fn refine_function(
    function: &mut Function,
    signatures: &HashMap<String, Vec<Type>>,
    diagnostics: &mut DiagnosticHandler,
) -> Result<bool, Reported> {
    let constants = ConstantTable::build(function);
    let Function {
        body,
        values,
        result_types,
        ..
    } = function;

    let mut refiner = Refiner {
        values,
        constants,
        signatures,
        diagnostics,
        changed: false,
    };
    refiner.refine_region(body)?;

    let Some(terminator) = body.terminator() else {
        return Ok(refiner.changed);
    };
    for (declared, returned) in result_types.iter_mut().zip(&terminator.operands) {
        let Some(returned) = refiner.ty(*returned) else {
            continue;
        };
        match declared.meet(returned) {
            Some(refined) if refined != *declared => {
                *declared = refined;
                refiner.changed = true;
            }
            Some(_) => {}
            None => {
                let message = format!(
                    "type of return operand {} doesn't match function result type {}",
                    returned, declared
                );
                return Err(refiner
                    .diagnostics
                    .emit(Diagnostic::op_error(terminator, message)));
            }
        }
    }
    Ok(refiner.changed)
}

impl ModulePass for ShapeRefinement {
    fn name(&self) -> &'static str {
        "refine-shapes"
    }

    fn run_on_module(
        &mut self,
        module: &mut Module,
        diagnostics: &mut DiagnosticHandler,
    ) -> Result<(), Reported> {
        for iteration in 1..=self.max_iterations {
            let signatures: HashMap<String, Vec<Type>> = module
                .functions
                .iter()
                .map(|f| (f.name.clone(), f.result_types.clone()))
                .collect();

            let mut changed = false;
            for function in module.functions.iter_mut() {
                changed |= refine_function(function, &signatures, diagnostics)?;
            }
            if !changed {
                debug!("shape refinement converged after {} sweep(s)", iteration);
                return Ok(());
            }
        }

        Err(diagnostics.emit(Diagnostic::error(
            Location::Unknown,
            format!(
                "shape refinement did not converge after {} iterations",
                self.max_iterations
            ),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeir::{
        DenseElements, TensorType,
        modules::parser::parse_module,
        types::primary::{FloatType, IntType},
    };

    fn refine(source: &str) -> (Module, Result<(), Reported>, DiagnosticHandler) {
        let mut module = parse_module(source).unwrap();
        let mut diagnostics = DiagnosticHandler::new();
        let result = ShapeRefinement::default().run_on_module(&mut module, &mut diagnostics);
        (module, result, diagnostics)
    }

    #[test]
    fn dimension_sizes_flow_into_dynamic_reshape() {
        let (module, result, _) = refine(
            r#"
func.func public @main(%x: tensor<3x4xf32>) -> (tensor<?xf32>) {
  %d0 = "stablehlo.get_dimension_size"(%x) {dimension = 0} : (tensor<3x4xf32>) -> tensor<i32>
  %d1 = "stablehlo.get_dimension_size"(%x) {dimension = 1} : (tensor<3x4xf32>) -> tensor<i32>
  %n = "stablehlo.multiply"(%d0, %d1) : (tensor<i32>, tensor<i32>) -> tensor<i32>
  %s = "stablehlo.reshape"(%n) : (tensor<i32>) -> tensor<1xi32>
  %y = "stablehlo.dynamic_reshape"(%x, %s) : (tensor<3x4xf32>, tensor<1xi32>) -> tensor<?xf32>
  "func.return"(%y) : (tensor<?xf32>) -> ()
}
"#,
        );
        assert!(result.is_ok());
        let main = &module.functions[0];
        let reshape = &main.body.operations[4];
        assert_eq!(reshape.kind, OpKind::DynamicReshape);
        assert_eq!(
            main.value_type(reshape.results[0]),
            &Type::Tensor(TensorType::with_static_dims(FloatType::F32, &[12]))
        );
        assert_eq!(main.result_types, vec![main.value_type(reshape.results[0]).clone()]);
        assert_eq!(main.body.operations[2].kind, OpKind::Constant);
        assert_eq!(
            main.body.operations[3].dense_attribute("value"),
            Some(&DenseElements::Ints(vec![12]))
        );
    }

    #[test]
    fn predicates_fold_to_booleans() {
        let (module, result, _) = refine(
            r#"
func.func public @main(%x: tensor<5xi64>) -> () {
  %d = "stablehlo.get_dimension_size"(%x) {dimension = 0} : (tensor<5xi64>) -> tensor<i32>
  %c = "stablehlo.constant"() {value = dense<5>} : () -> tensor<i32>
  %p = "stablehlo.compare"(%d, %c) {comparison_direction = #stablehlo<comparison_direction EQ>} : (tensor<i32>, tensor<i32>) -> tensor<i1>
  "stablehlo.custom_call"(%p) {call_target_name = "shape_assertion", error_message = "bad", has_side_effect = true} : (tensor<i1>) -> ()
  "func.return"() : () -> ()
}
"#,
        );
        assert!(result.is_ok());
        let compare = &module.functions[0].body.operations[2];
        assert_eq!(compare.kind, OpKind::Constant);
        assert_eq!(
            compare.dense_attribute("value"),
            Some(&DenseElements::Bools(vec![true]))
        );
    }

    #[test]
    fn call_results_follow_refined_callees() {
        let (module, result, _) = refine(
            r#"
func.func public @main(%x: tensor<2xi64>) -> (tensor<?xi64>) {
  %y = "func.call"(%x) {callee = @f} : (tensor<2xi64>) -> tensor<?xi64>
  "func.return"(%y) : (tensor<?xi64>) -> ()
}
func.func public @f(%a: tensor<2xi64>) -> (tensor<?xi64>) {
  %s = "stablehlo.constant"() {value = dense<2>} : () -> tensor<1xi64>
  %b = "stablehlo.dynamic_reshape"(%a, %s) : (tensor<2xi64>, tensor<1xi64>) -> tensor<?xi64>
  "func.return"(%b) : (tensor<?xi64>) -> ()
}
"#,
        );
        assert!(result.is_ok());
        let expected = Type::Tensor(TensorType::with_static_dims(IntType::I64, &[2]));
        assert_eq!(module.functions[1].result_types, vec![expected.clone()]);
        assert_eq!(module.functions[0].result_types, vec![expected]);
    }

    #[test]
    fn while_results_take_the_carried_types() {
        let (module, result, _) = refine(
            r#"
func.func public @main(%x: tensor<3xi64>) -> (tensor<?xi64>) {
  %r = "stablehlo.while"(%x) ({
    ^bb0(%a: tensor<?xi64>):
      %c = "stablehlo.constant"() {value = dense<false>} : () -> tensor<i1>
      "stablehlo.return"(%c) : (tensor<i1>) -> ()
  }, {
    ^bb0(%b: tensor<?xi64>):
      %n = "stablehlo.negate"(%b) : (tensor<?xi64>) -> tensor<?xi64>
      "stablehlo.return"(%n) : (tensor<?xi64>) -> ()
  }) : (tensor<3xi64>) -> tensor<?xi64>
  "func.return"(%r) : (tensor<?xi64>) -> ()
}
"#,
        );
        assert!(result.is_ok());
        let main = &module.functions[0];
        let expected = Type::Tensor(TensorType::with_static_dims(IntType::I64, &[3]));
        let body = &main.body.operations[0].regions[1];
        assert_eq!(main.value_type(body.arguments[0]), &expected);
        assert_eq!(main.value_type(body.operations[0].results[0]), &expected);
        assert_eq!(main.result_types, vec![expected]);
    }

    #[test]
    fn conflicting_static_shapes_are_reported() {
        let (_, result, mut diagnostics) = refine(
            r#"
func.func public @main(%x: tensor<3xi64>) -> (tensor<4xi64>) {
  %s = "stablehlo.constant"() {value = dense<3>} : () -> tensor<1xi64>
  %y = "stablehlo.dynamic_reshape"(%x, %s) : (tensor<3xi64>, tensor<1xi64>) -> tensor<4xi64>
  "func.return"(%y) : (tensor<4xi64>) -> ()
}
"#,
        );
        assert!(result.is_err());
        let transcript = diagnostics.take();
        assert!(transcript.mentions("inferred type tensor<3xi64> is incompatible with result type tensor<4xi64>"));
    }

    #[test]
    fn concatenate_sums_along_the_dimension() {
        let (module, result, _) = refine(
            r#"
func.func public @main(%x: tensor<2x3xi64>, %y: tensor<5x3xi64>) -> (tensor<?x3xi64>) {
  %z = "stablehlo.concatenate"(%x, %y) {dimension = 0} : (tensor<2x3xi64>, tensor<5x3xi64>) -> tensor<?x3xi64>
  "func.return"(%z) : (tensor<?x3xi64>) -> ()
}
"#,
        );
        assert!(result.is_ok());
        assert_eq!(
            module.functions[0].result_types,
            vec![Type::Tensor(TensorType::with_static_dims(IntType::I64, &[7, 3]))]
        );
    }

    #[test]
    fn concatenate_overflow_stays_dynamic() {
        let (module, result, _) = refine(
            r#"
func.func public @main(%x: tensor<9223372036854775807xi64>, %y: tensor<1xi64>) -> (tensor<?xi64>) {
  %z = "stablehlo.concatenate"(%x, %y) {dimension = 0} : (tensor<9223372036854775807xi64>, tensor<1xi64>) -> tensor<?xi64>
  "func.return"(%z) : (tensor<?xi64>) -> ()
}
"#,
        );
        assert!(result.is_ok());
        assert!(!module.functions[0].result_types[0].is_static());
    }

    #[test]
    fn huge_static_shapes_are_left_alone() {
        let (module, result, _) = refine(
            r#"
func.func public @main(%x: tensor<4294967296x4294967296xi64>) -> (tensor<4294967296x4294967296xi64>) {
  %y = "stablehlo.add"(%x, %x) : (tensor<4294967296x4294967296xi64>, tensor<4294967296x4294967296xi64>) -> tensor<4294967296x4294967296xi64>
  "func.return"(%y) : (tensor<4294967296x4294967296xi64>) -> ()
}
"#,
        );
        assert!(result.is_ok());
        assert_eq!(module.functions[0].body.operations[0].kind, OpKind::Add);
    }

    #[test]
    fn large_splats_fold_without_expansion() {
        let (module, result, _) = refine(
            r#"
func.func public @main() -> (tensor<100000000xi64>) {
  %c = "stablehlo.constant"() {value = dense<1>} : () -> tensor<100000000xi64>
  %s = "stablehlo.add"(%c, %c) : (tensor<100000000xi64>, tensor<100000000xi64>) -> tensor<100000000xi64>
  "func.return"(%s) : (tensor<100000000xi64>) -> ()
}
"#,
        );
        assert!(result.is_ok());
        let folded = &module.functions[0].body.operations[1];
        assert_eq!(folded.kind, OpKind::Constant);
        assert_eq!(folded.dense_attribute("value"), Some(&DenseElements::Ints(vec![2])));
    }

    #[test]
    fn splat_shape_operands_give_every_dimension() {
        let (module, result, _) = refine(
            r#"
func.func public @main(%x: tensor<9xf32>) -> (tensor<?x?xf32>) {
  %s = "stablehlo.constant"() {value = dense<3>} : () -> tensor<2xi64>
  %y = "stablehlo.dynamic_reshape"(%x, %s) : (tensor<9xf32>, tensor<2xi64>) -> tensor<?x?xf32>
  "func.return"(%y) : (tensor<?x?xf32>) -> ()
}
"#,
        );
        assert!(result.is_ok());
        assert_eq!(
            module.functions[0].result_types,
            vec![Type::Tensor(TensorType::with_static_dims(FloatType::F32, &[3, 3]))]
        );
    }
}
