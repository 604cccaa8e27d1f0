//! The refinement pipeline.
use log::{debug, info, warn};
use shapeir::{
    DiagnosticHandler, Module, bytecode::write_module, modules::parser, verify::verify_module,
};

use crate::{
    audit::validate_static_shapes,
    config::RefineOptions,
    discharge::CheckShapeAssertions,
    error::RefineError,
    pass::PassManager,
    transforms::{CanonicalizeDynamism, CommonSubexpressionElimination, Inliner, ShapeRefinement},
};

/// Runs shape refinement, assertion discharge and the static shape audit on
/// modules, with a fixed set of [`RefineOptions`].
#[derive(Debug, Clone, Default)]
pub struct ShapeRefiner {
    options: RefineOptions,
}

impl ShapeRefiner {
    pub fn new(options: RefineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RefineOptions {
        &self.options
    }

    fn pass_manager(&self) -> PassManager {
        let mut passes = PassManager::new()
            .with_verification(self.options.verify_after_each_pass)
            .with_ir_tracing(self.options.trace_ir);
        passes
            .add_pass(Inliner)
            .add_nested_pass(CommonSubexpressionElimination)
            .add_pass(ShapeRefinement::new(self.options.max_refinement_iterations))
            .add_nested_pass(CanonicalizeDynamism)
            .add_nested_pass(CheckShapeAssertions::new(
                self.options.enable_shape_assertions,
            ));
        passes
    }

    /// Refine `module` in place.
    ///
    /// The module is verified first; an invalid module is returned untouched
    /// with [`RefineError::Verification`]. When a pass fails, the module is
    /// left in whatever state that pass reached.
    pub fn refine(&self, module: &mut Module) -> Result<(), RefineError> {
        self.options.validate()?;
        info!(
            "refining polymorphic shapes of {} function(s), shape assertions {}",
            module.functions.len(),
            if self.options.enable_shape_assertions {
                "enabled"
            } else {
                "disabled"
            }
        );

        let mut diagnostics = DiagnosticHandler::new();
        if verify_module(module, &mut diagnostics).is_err() {
            return Err(RefineError::Verification(diagnostics.take()));
        }

        let mut passes = self.pass_manager();
        debug!("pipeline: {}", passes.pass_names().join(","));
        if let Err(failure) = passes.run(module, &mut diagnostics) {
            warn!("{}", failure);
            return Err(RefineError::Refinement(diagnostics.take()));
        }

        for function in module.functions.iter_mut() {
            function.renumber_values();
        }
        validate_static_shapes(module)
    }

    /// Parse `source`, refine it and serialize the result into the binary
    /// container.
    pub fn refine_from_str(&self, source: &str) -> Result<Vec<u8>, RefineError> {
        let mut module = parser::parse_module(source).map_err(|source_error| {
            let rendered = match &source_error {
                shapeir::Error::ParserErrors { errors } => parser::render_errors(source, errors),
                other => other.to_string(),
            };
            RefineError::CannotParse {
                rendered,
                source: source_error,
            }
        })?;
        self.refine(&mut module)?;
        write_module(&module).map_err(RefineError::CannotSerialize)
    }
}
