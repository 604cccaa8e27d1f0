//! Rewrites dynamism operations whose result became static into their
//! static counterparts, forwards identity shape operations and removes
//! dead pure operations.
use std::collections::HashMap;

use log::debug;
use shapeir::{
    Attribute, DiagnosticHandler, Function, OpKind, Operation, Region, Reported, ValueId,
    ValueInfo,
};

use crate::pass::FunctionPass;

#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalizeDynamism;

fn has_static_result(op: &Operation, values: &[ValueInfo]) -> bool {
    op.results
        .first()
        .and_then(|result| values.get(result.index()))
        .is_some_and(|info| info.ty.is_static())
}

/// Turn a dynamism operation with a static result into its static form.
fn make_static(op: &mut Operation) -> bool {
    let keep: &[&str] = match op.kind {
        OpKind::DynamicReshape => {
            op.kind = OpKind::Reshape;
            op.operands.truncate(1);
            &[]
        }
        OpKind::DynamicBroadcastInDim => {
            op.kind = OpKind::BroadcastInDim;
            op.operands.truncate(1);
            &["broadcast_dimensions"]
        }
        OpKind::DynamicIota => {
            op.kind = OpKind::Iota;
            op.operands.clear();
            &["iota_dimension"]
        }
        _ => return false,
    };
    op.attributes.retain(|name, _| keep.contains(&name.as_str()));
    true
}

/// The operation returns its operand unchanged.
fn is_identity(op: &Operation, values: &[ValueInfo]) -> bool {
    let ([operand], [result]) = (&op.operands[..], &op.results[..]) else {
        return false;
    };
    let (Some(from), Some(to)) = (values.get(operand.index()), values.get(result.index())) else {
        return false;
    };
    if from.ty != to.ty || !from.ty.is_static() {
        return false;
    }
    match op.kind {
        OpKind::Reshape | OpKind::Convert => true,
        OpKind::BroadcastInDim => {
            let rank = from.ty.as_tensor().and_then(|t| t.rank()).unwrap_or_default() as i64;
            match op.attribute("broadcast_dimensions") {
                Some(Attribute::Array(dims)) => dims.iter().copied().eq(0..rank),
                _ => false,
            }
        }
        _ => false,
    }
}

struct Rewriter<'a> {
    values: &'a [ValueInfo],
    forwarded: HashMap<ValueId, ValueId>,
    made_static: usize,
}

impl Rewriter<'_> {
    fn rewrite_region(&mut self, region: &mut Region) {
        let operations = std::mem::take(&mut region.operations);
        for mut op in operations {
            if op.flags().contains(shapeir::OpFlags::DYNAMISM) && has_static_result(&op, self.values)
            {
                self.made_static += make_static(&mut op) as usize;
            }
            if is_identity(&op, self.values) {
                self.forwarded.insert(op.results[0], op.operands[0]);
                continue;
            }
            for nested in op.regions.iter_mut() {
                self.rewrite_region(nested);
            }
            region.operations.push(op);
        }
    }
}

/// Remove pure, region-free operations whose results are all unused.
fn remove_dead(region: &mut Region, uses: &[usize]) -> usize {
    let mut removed = 0;
    region.operations.retain_mut(|op| {
        let dead = op.is_pure()
            && op.regions.is_empty()
            && !op.results.is_empty()
            && op
                .results
                .iter()
                .all(|result| uses.get(result.index()).copied().unwrap_or_default() == 0);
        if dead {
            removed += 1;
            return false;
        }
        for nested in op.regions.iter_mut() {
            removed += remove_dead(nested, uses);
        }
        true
    });
    removed
}

impl FunctionPass for CanonicalizeDynamism {
    fn name(&self) -> &'static str {
        "canonicalize-dynamism"
    }

    fn run_on_function(
        &mut self,
        function: &mut Function,
        _: &mut DiagnosticHandler,
    ) -> Result<(), Reported> {
        let Function { body, values, .. } = function;
        let mut rewriter = Rewriter {
            values,
            forwarded: HashMap::new(),
            made_static: 0,
        };
        rewriter.rewrite_region(body);

        let Rewriter {
            forwarded,
            made_static,
            ..
        } = rewriter;
        if !forwarded.is_empty() {
            let mapping = |mut value: ValueId| {
                if !forwarded.contains_key(&value) {
                    return None;
                }
                while let Some(next) = forwarded.get(&value) {
                    value = *next;
                }
                Some(value)
            };
            for op in function.body.operations.iter_mut() {
                op.remap_operands(&mapping);
            }
        }

        let mut removed = 0;
        loop {
            let uses = function.use_counts();
            match remove_dead(&mut function.body, &uses) {
                0 => break,
                n => removed += n,
            }
        }

        debug!(
            "@{}: {} static rewrite(s), {} forwarded, {} dead op(s) removed",
            function.name,
            made_static,
            forwarded.len(),
            removed
        );
        Ok(())
    }
}
