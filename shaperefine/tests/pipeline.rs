use shapeir::{
    DenseElements, DiagnosticKind, Module, OpKind, TensorType, Type,
    bytecode::read_module,
    modules::parser::parse_module,
    types::primary::{FloatType, IntType},
};
use shaperefine::{
    RefineError, RefineOptions, ShapeRefiner, refine_polymorphic_shapes,
    refine_polymorphic_shapes_from_str,
};

/// A polymorphic `@wrapped` whose leading dimension is checked and then
/// reshaped through a computed shape, called with a concrete argument.
fn polymorphic_module(batch: i64, with_assertion: bool) -> String {
    let assertion = if with_assertion {
        r#"
  %c = "stablehlo.constant"() {value = dense<2>} : () -> tensor<i32>
  %ok = "stablehlo.compare"(%d, %c) {comparison_direction = #stablehlo<comparison_direction GE>} : (tensor<i32>, tensor<i32>) -> tensor<i1>
  "stablehlo.custom_call"(%ok, %d) {call_target_name = "shape_assertion", error_message = "batch {0} must be at least 2", has_side_effect = true} : (tensor<i1>, tensor<i32>) -> ()"#
    } else {
        ""
    };
    format!(
        r#"
module @jit_f {{
func.func public @main(%arg0: tensor<{batch}x4xf32>) -> (tensor<?x4xf32>) {{
  %0 = "func.call"(%arg0) {{callee = @wrapped}} : (tensor<{batch}x4xf32>) -> tensor<?x4xf32>
  "func.return"(%0) : (tensor<?x4xf32>) -> ()
}}
func.func private @wrapped(%x: tensor<?x4xf32>) -> (tensor<?x4xf32>) {{
  %d = "stablehlo.get_dimension_size"(%x) {{dimension = 0}} : (tensor<?x4xf32>) -> tensor<i32>{assertion}
  %d64 = "stablehlo.convert"(%d) : (tensor<i32>) -> tensor<i64>
  %r = "stablehlo.reshape"(%d64) : (tensor<i64>) -> tensor<1xi64>
  %four = "stablehlo.constant"() {{value = dense<4>}} : () -> tensor<1xi64>
  %shape = "stablehlo.concatenate"(%r, %four) {{dimension = 0}} : (tensor<1xi64>, tensor<1xi64>) -> tensor<2xi64>
  %y = "stablehlo.dynamic_reshape"(%x, %shape) : (tensor<?x4xf32>, tensor<2xi64>) -> tensor<?x4xf32>
  %z = "stablehlo.add"(%y, %y) : (tensor<?x4xf32>, tensor<?x4xf32>) -> tensor<?x4xf32>
  "func.return"(%z) : (tensor<?x4xf32>) -> ()
}}
}}
"#
    )
}

fn refine(source: &str, enable_shape_assertions: bool) -> (Module, Result<(), RefineError>) {
    let mut module = parse_module(source).expect("test module should parse");
    let result = refine_polymorphic_shapes(&mut module, enable_shape_assertions);
    (module, result)
}

fn f32_tensor(dims: &[i64]) -> Type {
    Type::Tensor(TensorType::with_static_dims(FloatType::F32, dims))
}

#[test]
fn refines_called_polymorphic_function_to_static_shapes() {
    let (module, result) = refine(&polymorphic_module(3, true), true);
    assert_eq!(result, Ok(()));

    assert_eq!(module.functions.len(), 1, "private callee should be inlined and erased");
    let main = &module.functions[0];
    assert_eq!(main.result_types, vec![f32_tensor(&[3, 4])]);

    let mut kinds = Vec::new();
    main.walk(&mut |op| kinds.push(op.kind.clone()));
    assert!(!kinds.contains(&OpKind::CustomCall));
    assert!(!kinds.contains(&OpKind::DynamicReshape));
    assert!(kinds.contains(&OpKind::Add));
    for value in &main.values {
        assert!(value.ty.is_static(), "{} is not static", value.ty);
    }
}

#[test]
fn violated_assertion_reports_the_formatted_message() {
    let (module, result) = refine(&polymorphic_module(1, true), true);
    let error = result.unwrap_err();
    assert!(error.is_refinement());
    assert!(
        error
            .to_string()
            .starts_with("Module shape refinement failed: ")
    );

    let transcript = error.transcript().unwrap();
    let violated: Vec<_> = transcript
        .diagnostics()
        .iter()
        .filter(|d| d.kind == DiagnosticKind::AssertionViolated)
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(violated, vec!["batch 1 must be at least 2"]);

    let mut markers = 0;
    module.functions[0].walk(&mut |op| markers += (op.kind == OpKind::CustomCall) as usize);
    assert_eq!(markers, 1, "a violated marker stays in place");
}

#[test]
fn disabled_assertions_are_stripped_without_evaluation() {
    let (module, result) = refine(&polymorphic_module(1, true), false);
    assert_eq!(result, Ok(()));
    assert_eq!(module.functions[0].result_types, vec![f32_tensor(&[1, 4])]);
}

#[test]
fn invalid_module_is_rejected_before_any_pass() {
    let source = r#"
func.func public @main(%x: tensor<2xi64>) -> (tensor<3xi64>) {
  "func.return"(%x) : (tensor<2xi64>) -> ()
}
"#;
    let (module, result) = refine(source, true);
    let error = result.unwrap_err();
    assert!(error.is_verification());
    assert!(error.to_string().starts_with("Module verification failed: "));
    assert!(
        error
            .transcript()
            .unwrap()
            .mentions("doesn't match function result type")
    );
    assert_eq!(module, parse_module(source).unwrap());
}

#[test]
fn irreducible_dynamism_fails_the_audit() {
    let source = r#"
func.func public @main(%x: tensor<4xi64>, %s: tensor<1xi64>) -> (tensor<?xi64>) {
  %y = "stablehlo.dynamic_reshape"(%x, %s) : (tensor<4xi64>, tensor<1xi64>) -> tensor<?xi64>
  "func.return"(%y) : (tensor<?xi64>) -> ()
}
"#;
    let (_, result) = refine(source, true);
    let error = result.unwrap_err();
    assert!(error.is_dynamic_shapes());
    assert!(
        error
            .transcript()
            .unwrap()
            .mentions("'stablehlo.dynamic_reshape' op has dynamic shapes")
    );
}

#[test]
fn refining_a_refined_module_is_a_no_op() {
    let (first, result) = refine(&polymorphic_module(5, false), true);
    assert_eq!(result, Ok(()));
    assert_eq!(first.functions[0].body.operations.len(), 2);

    let mut second = first.clone();
    assert_eq!(refine_polymorphic_shapes(&mut second, true), Ok(()));
    assert_eq!(second, first);
}

#[test]
fn text_entry_point_round_trips_through_the_container() {
    let source = polymorphic_module(3, true);
    let bytes = refine_polymorphic_shapes_from_str(&source, true).unwrap();
    let decoded = read_module(&bytes).unwrap();

    let (refined, result) = refine(&source, true);
    assert_eq!(result, Ok(()));
    assert_eq!(decoded, refined);

    let printed = decoded.to_string();
    let mut reparsed = parse_module(&printed).unwrap();
    for function in reparsed.functions.iter_mut() {
        function.renumber_values();
    }
    assert_eq!(reparsed, decoded, "printed form:\n{}", printed);
    assert_eq!(reparsed.to_string(), printed);
}

#[test]
fn unparsable_source_is_a_front_end_error() {
    let error = refine_polymorphic_shapes_from_str("func.func @f(", true).unwrap_err();
    let RefineError::CannotParse { rendered, .. } = &error else {
        panic!("expected a parse error, got {error:?}");
    };
    assert!(!rendered.is_empty());
    assert_eq!(error.to_string(), "Cannot parse module");
}

#[test]
fn marker_with_six_operands_is_rejected_before_evaluation() {
    let source = r#"
func.func public @main() -> () {
  %p = "stablehlo.constant"() {value = dense<true>} : () -> tensor<i1>
  %n = "stablehlo.constant"() {value = dense<1>} : () -> tensor<i32>
  "stablehlo.custom_call"(%p, %n, %n, %n, %n, %n) {call_target_name = "shape_assertion", error_message = "too many", has_side_effect = true} : (tensor<i1>, tensor<i32>, tensor<i32>, tensor<i32>, tensor<i32>, tensor<i32>) -> ()
  "func.return"() : () -> ()
}
"#;
    let (_, result) = refine(source, true);
    let error = result.unwrap_err();
    let transcript = error.transcript().unwrap();
    assert_eq!(transcript.diagnostics().len(), 1);
    assert!(transcript.mentions("expects 1 <= size(operands) <= 5"));
}

#[test]
fn options_bound_the_refinement_sweeps() {
    let options = RefineOptions::from_toml_str(
        "max_refinement_iterations = 1\nverify_after_each_pass = true",
    )
    .unwrap();
    let mut module = parse_module(&polymorphic_module(3, true)).unwrap();
    let error = ShapeRefiner::new(options).refine(&mut module).unwrap_err();
    assert!(
        error
            .transcript()
            .unwrap()
            .mentions("shape refinement did not converge after 1 iterations")
    );

    let mut module = parse_module(&polymorphic_module(3, true)).unwrap();
    let refiner = ShapeRefiner::new(RefineOptions::default().with_shape_assertions(true));
    assert_eq!(refiner.refine(&mut module), Ok(()));
    assert!(refiner.options().enable_shape_assertions);
}

#[test]
fn refined_types_are_static_integers_too() {
    let source = r#"
func.func public @main(%x: tensor<6xi32>) -> (tensor<?xi32>) {
  %n = "stablehlo.get_dimension_size"(%x) {dimension = 0} : (tensor<6xi32>) -> tensor<i32>
  %s = "stablehlo.reshape"(%n) : (tensor<i32>) -> tensor<1xi32>
  %i = "stablehlo.dynamic_iota"(%s) {iota_dimension = 0} : (tensor<1xi32>) -> tensor<?xi32>
  %y = "stablehlo.add"(%x, %i) : (tensor<6xi32>, tensor<?xi32>) -> tensor<?xi32>
  "func.return"(%y) : (tensor<?xi32>) -> ()
}
"#;
    let (module, result) = refine(source, true);
    assert_eq!(result, Ok(()));
    assert_eq!(
        module.functions[0].result_types,
        vec![Type::Tensor(TensorType::with_static_dims(IntType::I32, &[6]))]
    );
}

#[test]
fn nan_constants_survive_the_container() {
    let source = r#"
func.func public @main(%x: tensor<2xf32>) -> (tensor<2xf32>) {
  %c = "stablehlo.constant"() {value = dense<NaN>} : () -> tensor<2xf32>
  %y = "stablehlo.add"(%x, %c) : (tensor<2xf32>, tensor<2xf32>) -> tensor<2xf32>
  "func.return"(%y) : (tensor<2xf32>) -> ()
}
"#;
    let bytes = refine_polymorphic_shapes_from_str(source, true).unwrap();
    let decoded = read_module(&bytes).unwrap();
    let (refined, result) = refine(source, true);
    assert_eq!(result, Ok(()));
    assert_eq!(decoded.to_string(), refined.to_string());

    let payload = decoded.functions[0].body.operations[0].dense_attribute("value");
    let Some(DenseElements::Floats(values)) = payload else {
        panic!("expected a float constant, got {payload:?}");
    };
    assert!(values.iter().all(|v| v.is_nan()));
}

#[test]
fn huge_static_dimensions_do_not_break_refinement() {
    let source = r#"
func.func public @main(%x: tensor<4294967296x4294967296xi64>) -> (tensor<4294967296x4294967296xi64>) {
  %y = "stablehlo.add"(%x, %x) : (tensor<4294967296x4294967296xi64>, tensor<4294967296x4294967296xi64>) -> tensor<4294967296x4294967296xi64>
  "func.return"(%y) : (tensor<4294967296x4294967296xi64>) -> ()
}
"#;
    let (module, result) = refine(source, true);
    assert_eq!(result, Ok(()));
    assert_eq!(module.functions[0].body.operations[0].kind, OpKind::Add);
}
