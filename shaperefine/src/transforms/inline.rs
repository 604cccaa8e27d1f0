//! Inlining of `func.call` operations.
//!
//! Calls to functions that are not part of a recursive cycle are replaced by
//! a copy of the callee body. Functions are processed callees first, so a
//! callee is fully inlined before it is copied into its callers. Private
//! functions left without callers are erased afterwards.
use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use petgraph::{algo::tarjan_scc, prelude::DiGraphMap};
use shapeir::{
    DiagnosticHandler, Function, Module, OpKind, Operation, Region, Reported, ValueId, Visibility,
};

use crate::pass::ModulePass;

#[derive(Debug, Default, Clone, Copy)]
pub struct Inliner;

/// Caller to callee edges, one node per function index.
fn call_graph(module: &Module) -> DiGraphMap<usize, ()> {
    let mut graph = DiGraphMap::new();
    for (caller, function) in module.functions.iter().enumerate() {
        graph.add_node(caller);
        function.walk(&mut |op| {
            if let Some(callee) = op.callee().and_then(|name| module.function_index(name)) {
                graph.add_edge(caller, callee, ());
            }
        });
    }
    graph
}

/// Rewrite every value reference of `op`, including results and the
/// arguments of nested regions.
fn rebase(op: &mut Operation, map: &impl Fn(ValueId) -> ValueId) {
    op.operands.iter_mut().for_each(|v| *v = map(*v));
    op.results.iter_mut().for_each(|v| *v = map(*v));
    for region in op.regions.iter_mut() {
        region.arguments.iter_mut().for_each(|v| *v = map(*v));
        for nested in region.operations.iter_mut() {
            rebase(nested, map);
        }
    }
}

/// Follow `replacements` until a value that is not replaced.
fn resolve(replacements: &HashMap<ValueId, ValueId>, mut value: ValueId) -> ValueId {
    while let Some(next) = replacements.get(&value) {
        value = *next;
    }
    value
}

struct InlineContext<'a> {
    inlinable: &'a HashMap<String, Function>,
    values: &'a mut Vec<shapeir::ValueInfo>,
    replacements: HashMap<ValueId, ValueId>,
    inlined: usize,
}

impl InlineContext<'_> {
    fn inline_region(&mut self, region: &mut Region) {
        let operations = std::mem::take(&mut region.operations);
        for mut op in operations {
            let callee = op.callee().and_then(|name| self.inlinable.get(name));
            let Some(callee) = callee else {
                for nested in op.regions.iter_mut() {
                    self.inline_region(nested);
                }
                region.operations.push(op);
                continue;
            };

            // Callee values are appended to the caller's value table; callee
            // arguments stand for the call operands.
            let offset = self.values.len() as u32;
            self.values.extend(callee.values.iter().cloned());
            let arguments: HashMap<ValueId, ValueId> = callee
                .arguments()
                .iter()
                .copied()
                .zip(op.operands.iter().copied())
                .collect();
            let map = |value: ValueId| {
                arguments
                    .get(&value)
                    .copied()
                    .unwrap_or(ValueId(value.0 + offset))
            };

            let mut body = callee.body.operations.clone();
            let terminator = body.pop_if(|last| last.kind == OpKind::FuncReturn);
            for inlined in body.iter_mut() {
                rebase(inlined, &map);
            }

            if let Some(mut terminator) = terminator {
                rebase(&mut terminator, &map);
                for (result, returned) in op.results.iter().zip(&terminator.operands) {
                    self.replacements.insert(*result, *returned);
                }
            }

            trace!("inlined call to @{}", callee.name);
            self.inlined += 1;
            region.operations.extend(body);
        }
    }
}

fn inline_function(function: &mut Function, inlinable: &HashMap<String, Function>) -> usize {
    let mut context = InlineContext {
        inlinable,
        values: &mut function.values,
        replacements: HashMap::new(),
        inlined: 0,
    };
    context.inline_region(&mut function.body);

    let InlineContext {
        replacements,
        inlined,
        ..
    } = context;
    if !replacements.is_empty() {
        let mapping = |value: ValueId| {
            replacements
                .contains_key(&value)
                .then(|| resolve(&replacements, value))
        };
        for op in function.body.operations.iter_mut() {
            op.remap_operands(&mapping);
        }
    }
    inlined
}

impl ModulePass for Inliner {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run_on_module(&mut self, module: &mut Module, _: &mut DiagnosticHandler) -> Result<(), Reported> {
        let graph = call_graph(module);

        // Components come out callees first.
        let mut recursive = HashSet::new();
        let mut order = Vec::with_capacity(module.functions.len());
        for component in tarjan_scc(&graph) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|node| graph.contains_edge(*node, *node));
            if cyclic {
                recursive.extend(component.iter().copied());
            }
            order.extend(component);
        }

        let mut inlinable = HashMap::new();
        let mut total = 0;
        for index in order {
            let function = &mut module.functions[index];
            total += inline_function(function, &inlinable);
            if !recursive.contains(&index) {
                inlinable.insert(function.name.clone(), function.clone());
            }
        }

        // Erase private functions nothing calls anymore.
        let mut called = HashSet::new();
        for function in &module.functions {
            function.walk(&mut |op| {
                if let Some(callee) = op.callee() {
                    called.insert(callee.to_string());
                }
            });
        }
        let before = module.functions.len();
        module
            .functions
            .retain(|f| f.visibility == Visibility::Public || called.contains(&f.name));

        debug!(
            "inlined {} call(s), erased {} function(s)",
            total,
            before - module.functions.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeir::{modules::parser::parse_module, verify::verify_module};

    fn inline(source: &str) -> Module {
        let mut module = parse_module(source).unwrap();
        let mut diagnostics = DiagnosticHandler::new();
        Inliner.run_on_module(&mut module, &mut diagnostics).unwrap();
        assert!(verify_module(&module, &mut diagnostics).is_ok(), "{}", diagnostics.take());
        module
    }

    #[test]
    fn inlines_nested_calls_and_erases_private_callees() {
        let module = inline(
            r#"
func.func public @main(%x: tensor<2xi64>) -> (tensor<2xi64>) {
  %y = "func.call"(%x) {callee = @double} : (tensor<2xi64>) -> tensor<2xi64>
  %z = "func.call"(%y) {callee = @double} : (tensor<2xi64>) -> tensor<2xi64>
  "func.return"(%z) : (tensor<2xi64>) -> ()
}
func.func private @double(%a: tensor<2xi64>) -> (tensor<2xi64>) {
  %b = "func.call"(%a) {callee = @id} : (tensor<2xi64>) -> tensor<2xi64>
  %c = "stablehlo.add"(%b, %b) : (tensor<2xi64>, tensor<2xi64>) -> tensor<2xi64>
  "func.return"(%c) : (tensor<2xi64>) -> ()
}
func.func private @id(%a: tensor<2xi64>) -> (tensor<2xi64>) {
  "func.return"(%a) : (tensor<2xi64>) -> ()
}
"#,
        );
        assert_eq!(module.functions.len(), 1);

        let main = &module.functions[0];
        let kinds: Vec<_> = main.body.operations.iter().map(|op| op.kind.clone()).collect();
        assert_eq!(kinds, vec![OpKind::Add, OpKind::Add, OpKind::FuncReturn]);

        let [first, second, ret] = &main.body.operations[..] else {
            panic!("expected three operations");
        };
        assert_eq!(first.operands, vec![main.arguments()[0]; 2]);
        assert_eq!(second.operands, vec![first.results[0]; 2]);
        assert_eq!(ret.operands, second.results);
    }

    #[test]
    fn recursive_functions_are_kept() {
        let module = inline(
            r#"
func.func public @main(%x: tensor<i64>) -> (tensor<i64>) {
  %y = "func.call"(%x) {callee = @loop} : (tensor<i64>) -> tensor<i64>
  "func.return"(%y) : (tensor<i64>) -> ()
}
func.func private @loop(%a: tensor<i64>) -> (tensor<i64>) {
  %b = "func.call"(%a) {callee = @loop} : (tensor<i64>) -> tensor<i64>
  "func.return"(%b) : (tensor<i64>) -> ()
}
func.func private @unused(%a: tensor<i64>) -> (tensor<i64>) {
  "func.return"(%a) : (tensor<i64>) -> ()
}
"#,
        );
        let names: Vec<_> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["main", "loop"]);
        assert_eq!(module.functions[0].body.operations[0].kind, OpKind::FuncCall);
    }

    #[test]
    fn calls_inside_regions_are_inlined() {
        let module = inline(
            r#"
func.func public @main(%x: tensor<i64>) -> (tensor<i64>) {
  %r = "stablehlo.while"(%x) ({
    ^bb0(%a: tensor<i64>):
      %c = "stablehlo.constant"() {value = dense<false>} : () -> tensor<i1>
      "stablehlo.return"(%c) : (tensor<i1>) -> ()
  }, {
    ^bb0(%b: tensor<i64>):
      %n = "func.call"(%b) {callee = @neg} : (tensor<i64>) -> tensor<i64>
      "stablehlo.return"(%n) : (tensor<i64>) -> ()
  }) : (tensor<i64>) -> tensor<i64>
  "func.return"(%r) : (tensor<i64>) -> ()
}
func.func private @neg(%a: tensor<i64>) -> (tensor<i64>) {
  %b = "stablehlo.negate"(%a) : (tensor<i64>) -> tensor<i64>
  "func.return"(%b) : (tensor<i64>) -> ()
}
"#,
        );
        assert_eq!(module.functions.len(), 1);
        let body = &module.functions[0].body.operations[0].regions[1];
        assert_eq!(body.operations[0].kind, OpKind::Negate);
        assert_eq!(body.operations[1].operands, body.operations[0].results);
    }
}
