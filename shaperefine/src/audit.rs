//! Final check that a refined module is fully static.
use log::debug;
use shapeir::{Diagnostic, DiagnosticHandler, DiagnosticKind, Function, Module, Type, ValueId};

use crate::{assertion::is_shape_assertion, error::RefineError};

fn is_dynamic(function: &Function, value: &ValueId) -> bool {
    function.get_value_type(*value).is_some_and(|ty| !ty.is_static())
}

/// Check that no dynamic shape and no shape assertion is left in `module`.
///
/// Every offending operation is reported, not just the first one. When
/// both conditions hold, a single error carrying both kinds of
/// diagnostics is returned.
pub fn validate_static_shapes(module: &Module) -> Result<(), RefineError> {
    let mut diagnostics = DiagnosticHandler::new();
    let mut dynamic = false;
    let mut residual = false;

    for function in &module.functions {
        let signature_dynamic = function.arguments().iter().any(|a| is_dynamic(function, a))
            || function.result_types.iter().any(|ty: &Type| !ty.is_static());
        if signature_dynamic {
            dynamic = true;
            diagnostics.emit(
                Diagnostic::error(function.location, "'func.func' op has dynamic shapes")
                    .with_kind(DiagnosticKind::ResidualState)
                    .with_note(format!("in function @{}", function.name)),
            );
        }

        function.walk(&mut |op| {
            let region_arguments = op.regions.iter().flat_map(|region| &region.arguments);
            if op.results.iter().chain(region_arguments).any(|v| is_dynamic(function, v)) {
                dynamic = true;
                diagnostics.emit(
                    Diagnostic::op_error(op, "has dynamic shapes")
                        .with_kind(DiagnosticKind::ResidualState),
                );
            }
            if is_shape_assertion(op) {
                residual = true;
                diagnostics.emit(
                    Diagnostic::op_error(op, "has residual shape assertions")
                        .with_kind(DiagnosticKind::ResidualState),
                );
            }
        });
    }

    if dynamic || residual {
        debug!("static shape audit failed with {} diagnostic(s)", diagnostics.len());
    }
    let transcript = diagnostics.take();
    match (dynamic, residual) {
        (false, false) => Ok(()),
        (true, false) => Err(RefineError::DynamicShapes(transcript)),
        (false, true) => Err(RefineError::ResidualShapeAssertions(transcript)),
        (true, true) => Err(RefineError::DynamicShapesAndResidualShapeAssertions(transcript)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeir::modules::parser::parse_module;

    #[test]
    fn static_module_passes() {
        let module = parse_module(
            r#"
func.func public @main(%x: tensor<2xi64>) -> (tensor<2xi64>) {
  %y = "stablehlo.add"(%x, %x) : (tensor<2xi64>, tensor<2xi64>) -> tensor<2xi64>
  "func.return"(%y) : (tensor<2xi64>) -> ()
}
"#,
        )
        .unwrap();
        assert_eq!(validate_static_shapes(&module), Ok(()));
    }

    #[test]
    fn dynamic_arguments_are_reported_on_the_function() {
        let module = parse_module(
            r#"
func.func public @main(%x: tensor<?xi64>) -> () {
  "func.return"() : () -> ()
}
"#,
        )
        .unwrap();
        let error = validate_static_shapes(&module).unwrap_err();
        assert!(error.is_dynamic_shapes());
        let transcript = error.transcript().unwrap();
        assert_eq!(transcript.0.len(), 1);
        assert_eq!(transcript.0[0].message, "'func.func' op has dynamic shapes");
    }

    #[test]
    fn residual_assertions_alone() {
        let module = parse_module(
            r#"
func.func public @main() -> () {
  %p = "stablehlo.constant"() {value = dense<true>} : () -> tensor<i1>
  "stablehlo.custom_call"(%p) {call_target_name = "shape_assertion", error_message = "left over", has_side_effect = true} : (tensor<i1>) -> ()
  "func.return"() : () -> ()
}
"#,
        )
        .unwrap();
        let error = validate_static_shapes(&module).unwrap_err();
        assert!(error.is_residual_shape_assertions());
        assert!(error.to_string().starts_with(
            "Module has residual shape assertions: loc(4:3): error: 'stablehlo.custom_call' op has residual shape assertions"
        ));
    }
}
