//! Common subexpression elimination.
//!
//! Pure operations without regions are deduplicated when an equivalent
//! operation (same kind, operands, attributes and result types) dominates
//! them. Values defined in an enclosing region are reused inside nested
//! regions, never the other way around.
use std::collections::HashMap;

use log::debug;
use shapeir::{DiagnosticHandler, Function, Operation, Region, Reported, ValueId, ValueInfo};

use crate::pass::FunctionPass;

#[derive(Debug, Default, Clone, Copy)]
pub struct CommonSubexpressionElimination;

/// Structural identity of an operation, ignoring its location and results.
fn operation_key(op: &Operation, values: &[ValueInfo]) -> String {
    let result_types: Vec<_> = op
        .results
        .iter()
        .map(|result| values.get(result.index()).map(|info| &info.ty))
        .collect();
    format!(
        "{}|{:?}|{:?}|{:?}",
        op.name(),
        op.operands,
        op.attributes,
        result_types
    )
}

struct Scopes<'a> {
    values: &'a [ValueInfo],
    scopes: Vec<HashMap<String, Vec<ValueId>>>,
    replacements: HashMap<ValueId, ValueId>,
}

impl Scopes<'_> {
    fn lookup(&self, key: &str) -> Option<&Vec<ValueId>> {
        self.scopes.iter().rev().find_map(|scope| scope.get(key))
    }

    fn simplify_region(&mut self, region: &mut Region) {
        self.scopes.push(HashMap::new());

        let operations = std::mem::take(&mut region.operations);
        for mut op in operations {
            for operand in op.operands.iter_mut() {
                if let Some(existing) = self.replacements.get(operand) {
                    *operand = *existing;
                }
            }

            if op.is_pure() && op.regions.is_empty() && !op.results.is_empty() {
                let key = operation_key(&op, self.values);
                if let Some(existing) = self.lookup(&key).cloned() {
                    for (duplicate, existing) in op.results.iter().zip(existing) {
                        self.replacements.insert(*duplicate, existing);
                    }
                    continue;
                }
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(key, op.results.clone());
                }
            }

            for nested in op.regions.iter_mut() {
                self.simplify_region(nested);
            }
            region.operations.push(op);
        }

        self.scopes.pop();
    }
}

impl FunctionPass for CommonSubexpressionElimination {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn run_on_function(
        &mut self,
        function: &mut Function,
        _: &mut DiagnosticHandler,
    ) -> Result<(), Reported> {
        let Function { body, values, .. } = function;
        let mut scopes = Scopes {
            values,
            scopes: Vec::new(),
            replacements: HashMap::new(),
        };
        scopes.simplify_region(body);

        if !scopes.replacements.is_empty() {
            debug!(
                "cse: removed {} duplicate value(s) from @{}",
                scopes.replacements.len(),
                function.name
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeir::{OpKind, modules::parser::parse_module};

    #[test]
    fn duplicates_are_merged_across_nested_regions() {
        let mut module = parse_module(
            r#"
func.func @f(%x: tensor<i64>) -> (tensor<i64>) {
  %a = "stablehlo.constant"() {value = dense<4>} : () -> tensor<i64>
  %b = "stablehlo.constant"() {value = dense<4>} : () -> tensor<i64>
  %s = "stablehlo.add"(%a, %x) : (tensor<i64>, tensor<i64>) -> tensor<i64>
  %t = "stablehlo.add"(%b, %x) : (tensor<i64>, tensor<i64>) -> tensor<i64>
  %r = "stablehlo.while"(%s) ({
    ^bb0(%i: tensor<i64>):
      %c = "stablehlo.constant"() {value = dense<4>} : () -> tensor<i64>
      %p = "stablehlo.compare"(%i, %c) {comparison_direction = #stablehlo<comparison_direction LT>} : (tensor<i64>, tensor<i64>) -> tensor<i1>
      "stablehlo.return"(%p) : (tensor<i1>) -> ()
  }, {
    ^bb0(%j: tensor<i64>):
      "stablehlo.return"(%t) : (tensor<i64>) -> ()
  }) : (tensor<i64>) -> tensor<i64>
  "func.return"(%r) : (tensor<i64>) -> ()
}
"#,
        )
        .unwrap();
        let mut function = module.functions.remove(0);
        CommonSubexpressionElimination
            .run_on_function(&mut function, &mut DiagnosticHandler::new())
            .unwrap();

        let ops = &function.body.operations;
        let kinds: Vec<_> = ops.iter().map(|op| op.kind.clone()).collect();
        assert_eq!(kinds, vec![OpKind::Constant, OpKind::Add, OpKind::While, OpKind::FuncReturn]);

        let constant = ops[0].results[0];
        let sum = ops[1].results[0];
        let cond = &ops[2].regions[0];
        assert_eq!(cond.operations.len(), 2);
        assert_eq!(cond.operations[0].operands[1], constant);
        assert_eq!(ops[2].regions[1].operations[0].operands, vec![sum]);
    }

    #[test]
    fn side_effecting_operations_are_kept() {
        let mut module = parse_module(
            r#"
func.func @f() -> () {
  "stablehlo.custom_call"() {call_target_name = "foo", has_side_effect = true} : () -> ()
  "stablehlo.custom_call"() {call_target_name = "foo", has_side_effect = true} : () -> ()
  "func.return"() : () -> ()
}
"#,
        )
        .unwrap();
        let mut function = module.functions.remove(0);
        CommonSubexpressionElimination
            .run_on_function(&mut function, &mut DiagnosticHandler::new())
            .unwrap();
        assert_eq!(function.body.operations.len(), 3);
    }
}
