//! Pass infrastructure.
//!
//! A [`PassManager`] owns an ordered list of module passes and runs them one
//! after the other on a module, stopping at the first pass that fails. Passes
//! that work function by function implement [`FunctionPass`] and are
//! scheduled with [`PassManager::add_nested_pass`].
use std::time::Instant;

use log::{debug, trace, warn};
use shapeir::{DiagnosticHandler, Function, Module, Reported, verify::verify_module};
use thiserror::Error;

/// A transformation of a whole module.
pub trait ModulePass {
    /// Name used in logs and failure reports.
    fn name(&self) -> &'static str;

    /// Run the pass. Every failure must have been reported to `diagnostics`.
    fn run_on_module(
        &mut self,
        module: &mut Module,
        diagnostics: &mut DiagnosticHandler,
    ) -> Result<(), Reported>;
}

/// A transformation that only looks at one function at a time.
pub trait FunctionPass {
    fn name(&self) -> &'static str;

    fn run_on_function(
        &mut self,
        function: &mut Function,
        diagnostics: &mut DiagnosticHandler,
    ) -> Result<(), Reported>;
}

/// Runs a [`FunctionPass`] on every function of a module.
///
/// A failure in one function does not prevent the pass from running on the
/// remaining ones; the nested pass fails if any function failed.
#[derive(Debug, Clone)]
pub struct Nested<P>(pub P);

impl<P: FunctionPass> ModulePass for Nested<P> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn run_on_module(
        &mut self,
        module: &mut Module,
        diagnostics: &mut DiagnosticHandler,
    ) -> Result<(), Reported> {
        let mut failed = false;
        for function in module.functions.iter_mut() {
            if self.0.run_on_function(function, diagnostics).is_err() {
                trace!("{} failed on @{}", self.0.name(), function.name);
                failed = true;
            }
        }
        if failed { Err(Reported) } else { Ok(()) }
    }
}

/// The pass that stopped a [`PassManager`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pass '{pass}' failed")]
pub struct PassFailure {
    pub pass: &'static str,
}

/// Ordered list of passes.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn ModulePass>>,
    verify_after_each_pass: bool,
    trace_ir: bool,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-run the structural verifier after every pass.
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify_after_each_pass = enabled;
        self
    }

    /// Dump the module at `trace` level after every pass.
    pub fn with_ir_tracing(mut self, enabled: bool) -> Self {
        self.trace_ir = enabled;
        self
    }

    pub fn add_pass(&mut self, pass: impl ModulePass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn add_nested_pass(&mut self, pass: impl FunctionPass + 'static) -> &mut Self {
        self.passes.push(Box::new(Nested(pass)));
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Run every pass in order on `module`.
    pub fn run(
        &mut self,
        module: &mut Module,
        diagnostics: &mut DiagnosticHandler,
    ) -> Result<(), PassFailure> {
        for pass in self.passes.iter_mut() {
            let name = pass.name();
            let start = Instant::now();
            let result = pass.run_on_module(module, diagnostics);
            debug!(
                "{} complete, {:.1}ms",
                name,
                start.elapsed().as_secs_f64() * 1000.0
            );

            if result.is_err() || diagnostics.has_errors() {
                return Err(PassFailure { pass: name });
            }

            if self.trace_ir {
                trace!("// -----// IR Dump After {} //----- //\n{}", name, module);
            }

            if self.verify_after_each_pass && verify_module(module, diagnostics).is_err() {
                warn!("module no longer verifies after {}", name);
                return Err(PassFailure { pass: name });
            }
        }
        Ok(())
    }
}
