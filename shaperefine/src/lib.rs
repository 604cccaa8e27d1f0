//! Refinement of polymorphic tensor shapes.
//!
//! Programs exported with symbolic dimensions carry dynamic shapes, shape
//! computations and `shape_assertion` markers guarding the assumptions the
//! exporter made. Once the argument shapes are known, [`ShapeRefiner`]
//! propagates them through the program until every shape is static, checks
//! the markers and removes them. [`validate_static_shapes`] then confirms
//! nothing dynamic is left.
//!
//! ```
//! use shaperefine::refine_polymorphic_shapes_from_str;
//!
//! let source = r#"
//! func.func public @main(%x: tensor<4xi64>) -> (tensor<?xi64>) {
//!   %s = "stablehlo.constant"() {value = dense<4>} : () -> tensor<1xi64>
//!   %y = "stablehlo.dynamic_reshape"(%x, %s) : (tensor<4xi64>, tensor<1xi64>) -> tensor<?xi64>
//!   "func.return"(%y) : (tensor<?xi64>) -> ()
//! }
//! "#;
//! let bytes = refine_polymorphic_shapes_from_str(source, true).unwrap();
//! let module = shapeir::bytecode::read_module(&bytes).unwrap();
//! assert!(module.functions[0].result_types[0].is_static());
//! ```
pub mod assertion;
pub mod audit;
pub mod config;
pub mod discharge;
pub mod error;
pub mod message;
pub mod pass;
pub mod pipeline;
pub mod transforms;

pub use audit::validate_static_shapes;
pub use config::RefineOptions;
pub use error::RefineError;
pub use pipeline::ShapeRefiner;

use shapeir::Module;

/// Refine `module` in place with default options.
pub fn refine_polymorphic_shapes(
    module: &mut Module,
    enable_shape_assertions: bool,
) -> Result<(), RefineError> {
    ShapeRefiner::new(RefineOptions::default().with_shape_assertions(enable_shape_assertions))
        .refine(module)
}

/// Parse, refine and serialize a module with default options.
pub fn refine_polymorphic_shapes_from_str(
    source: &str,
    enable_shape_assertions: bool,
) -> Result<Vec<u8>, RefineError> {
    ShapeRefiner::new(RefineOptions::default().with_shape_assertions(enable_shape_assertions))
        .refine_from_str(source)
}
