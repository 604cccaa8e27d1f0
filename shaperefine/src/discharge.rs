//! Discharge of shape assertions once shapes are static.
//!
//! Markers whose predicate folded to `true` are erased. A marker whose
//! predicate folded to `false` is kept and reported with its formatted error
//! message. Markers that are malformed or whose operands are not constants
//! are structural errors and stop the processing of the function.
use std::collections::BTreeSet;

use log::{debug, trace};
use shapeir::{
    Diagnostic, DiagnosticHandler, DiagnosticKind, Function, Region, Reported,
    analysis::ConstantTable,
};
use smallvec::SmallVec;

use crate::{
    assertion::{is_shape_assertion, verify_shape_assertion},
    message::{MAX_ERROR_MESSAGE_INPUTS, format_message},
    pass::FunctionPass,
};

/// Checks shape assertions of a function and erases the satisfied ones.
#[derive(Debug, Clone, Copy)]
pub struct CheckShapeAssertions {
    enable_shape_assertions: bool,
}

impl CheckShapeAssertions {
    pub fn new(enable_shape_assertions: bool) -> Self {
        Self {
            enable_shape_assertions,
        }
    }
}

impl Default for CheckShapeAssertions {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Outcome of the read-only scan of a function.
#[derive(Debug, Default)]
struct Scan {
    /// Pre-order indices of the markers to erase.
    erase: BTreeSet<usize>,
    violated: usize,
    structural: bool,
}

impl CheckShapeAssertions {
    fn scan(&self, function: &Function, diagnostics: &mut DiagnosticHandler) -> Scan {
        let constants = ConstantTable::build(function);
        let mut scan = Scan::default();
        let mut index = 0usize;

        function.walk(&mut |op| {
            let current = index;
            index += 1;
            if scan.structural || !is_shape_assertion(op) {
                return;
            }

            if !self.enable_shape_assertions {
                scan.erase.insert(current);
                return;
            }

            let assertion = match verify_shape_assertion(op, function) {
                Ok(assertion) => assertion,
                Err(diagnostic) => {
                    diagnostics.emit(diagnostic);
                    scan.structural = true;
                    return;
                }
            };

            let holds = constants
                .match_ints(function, assertion.assert_what())
                .and_then(|values| values.first().copied());
            let Some(holds) = holds else {
                diagnostics.emit(Diagnostic::error(
                    op.location,
                    "expects static assert_what (operand #0)",
                ));
                scan.structural = true;
                return;
            };

            if holds != 0 {
                scan.erase.insert(current);
                return;
            }

            let mut inputs: SmallVec<i64, MAX_ERROR_MESSAGE_INPUTS> = SmallVec::new();
            for (i, input) in assertion.error_message_inputs().iter().enumerate() {
                let value = constants
                    .match_ints(function, *input)
                    .and_then(|values| values.first().copied());
                let Some(value) = value else {
                    diagnostics.emit(Diagnostic::error(
                        op.location,
                        format!("expects static error_message_input (operand #{})", i + 1),
                    ));
                    scan.structural = true;
                    return;
                };
                inputs.push(value);
            }

            let message = format_message(assertion.error_message(), &inputs);
            diagnostics.emit(
                Diagnostic::error(op.location, message).with_kind(DiagnosticKind::AssertionViolated),
            );
            scan.violated += 1;
        });

        scan
    }
}

/// Remove the operations whose pre-order index is in `erase`.
fn erase_preorder(region: &mut Region, erase: &BTreeSet<usize>, index: &mut usize) {
    region.operations.retain_mut(|op| {
        let current = *index;
        *index += 1;
        if erase.contains(&current) {
            op.regions
                .iter()
                .for_each(|nested| nested.walk(&mut |_| *index += 1));
            return false;
        }
        for nested in op.regions.iter_mut() {
            erase_preorder(nested, erase, index);
        }
        true
    });
}

impl FunctionPass for CheckShapeAssertions {
    fn name(&self) -> &'static str {
        "check-shape-assertions"
    }

    fn run_on_function(
        &mut self,
        function: &mut Function,
        diagnostics: &mut DiagnosticHandler,
    ) -> Result<(), Reported> {
        let scan = self.scan(function, diagnostics);

        if !scan.erase.is_empty() {
            trace!(
                "erasing {} shape assertion(s) from @{}",
                scan.erase.len(),
                function.name
            );
            erase_preorder(&mut function.body, &scan.erase, &mut 0);
        }

        if scan.structural || scan.violated > 0 {
            debug!(
                "@{}: {} violated shape assertion(s){}",
                function.name,
                scan.violated,
                if scan.structural { ", malformed marker" } else { "" }
            );
            return Err(Reported);
        }
        Ok(())
    }
}
