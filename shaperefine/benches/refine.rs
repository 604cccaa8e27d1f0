use criterion::{Criterion, black_box, criterion_group, criterion_main};

use shapeir::modules::parser::parse_module;
use shaperefine::{ShapeRefiner, message::format_message};

/// Chain of `depth` polymorphic helpers, each reshaping through a computed
/// shape and guarded by a shape assertion.
fn build_chain(depth: usize) -> String {
    let mut source = String::from(
        r#"
func.func public @main(%arg0: tensor<8x16xf32>) -> (tensor<?x16xf32>) {
  %0 = "func.call"(%arg0) {callee = @f0} : (tensor<8x16xf32>) -> tensor<?x16xf32>
  "func.return"(%0) : (tensor<?x16xf32>) -> ()
}
"#,
    );
    for i in 0..depth {
        let tail = if i + 1 < depth {
            format!(
                r#"%n = "func.call"(%z) {{callee = @f{}}} : (tensor<?x16xf32>) -> tensor<?x16xf32>
  "func.return"(%n) : (tensor<?x16xf32>) -> ()"#,
                i + 1
            )
        } else {
            r#""func.return"(%z) : (tensor<?x16xf32>) -> ()"#.to_string()
        };
        source.push_str(&format!(
            r#"
func.func private @f{i}(%x: tensor<?x16xf32>) -> (tensor<?x16xf32>) {{
  %d = "stablehlo.get_dimension_size"(%x) {{dimension = 0}} : (tensor<?x16xf32>) -> tensor<i32>
  %c = "stablehlo.constant"() {{value = dense<1>}} : () -> tensor<i32>
  %ok = "stablehlo.compare"(%d, %c) {{comparison_direction = #stablehlo<comparison_direction GE>}} : (tensor<i32>, tensor<i32>) -> tensor<i1>
  "stablehlo.custom_call"(%ok, %d) {{call_target_name = "shape_assertion", error_message = "dim {{0}} < 1", has_side_effect = true}} : (tensor<i1>, tensor<i32>) -> ()
  %d64 = "stablehlo.convert"(%d) : (tensor<i32>) -> tensor<i64>
  %r = "stablehlo.reshape"(%d64) : (tensor<i64>) -> tensor<1xi64>
  %w = "stablehlo.constant"() {{value = dense<16>}} : () -> tensor<1xi64>
  %s = "stablehlo.concatenate"(%r, %w) {{dimension = 0}} : (tensor<1xi64>, tensor<1xi64>) -> tensor<2xi64>
  %y = "stablehlo.dynamic_reshape"(%x, %s) : (tensor<?x16xf32>, tensor<2xi64>) -> tensor<?x16xf32>
  %z = "stablehlo.multiply"(%y, %y) : (tensor<?x16xf32>, tensor<?x16xf32>) -> tensor<?x16xf32>
  {tail}
}}
"#
        ));
    }
    source
}

fn refine_benchmark(c: &mut Criterion) {
    let refiner = ShapeRefiner::default();
    for depth in [1, 8, 32] {
        let module = parse_module(&build_chain(depth)).expect("bench module should parse");
        c.bench_function(&format!("refine chain of {}", depth), |b| {
            b.iter(|| {
                let mut module = module.clone();
                refiner.refine(black_box(&mut module))
            })
        });
    }

    let source = build_chain(8);
    c.bench_function("refine from text (8)", |b| {
        b.iter(|| refiner.refine_from_str(black_box(&source)))
    });
}

fn format_benchmark(c: &mut Criterion) {
    c.bench_function("format error message", |b| {
        b.iter(|| {
            format_message(
                black_box("expected {0,8:x} got {1:N}, bounds [{2}, {3:d4}]"),
                black_box(&[255, 1_234_567, -3, 42]),
            )
        })
    });
}

criterion_group!(benches, refine_benchmark, format_benchmark);
criterion_main!(benches);
