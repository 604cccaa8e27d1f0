//! Constant folding of integer shape computations.
//!
//! Only what is needed to turn shape operands and assertion predicates into
//! constants is folded: integer and boolean arithmetic, comparisons,
//! selection, conversion, reshapes, splat broadcasts, concatenation along
//! the leading dimension, 1-D iotas and `get_dimension_size` of static
//! dimensions.
use shapeir::{
    Attribute, DenseElements, OpKind, Operation, Shape, TensorType, ValueId, ValueInfo,
    analysis::ConstantTable,
    types::primary::{ElementType, IntType, Signedness},
};

/// Largest non-splat payload the folder reads or produces. Shape operands
/// and assertion inputs stay far below it; splats are folded at any size.
pub(crate) const MAX_FOLDED_ELEMENTS: usize = 1 << 12;

pub(crate) struct Folder<'a> {
    pub values: &'a [ValueInfo],
    pub constants: &'a ConstantTable,
}

/// Element `i` of a payload that is either a splat or fully expanded.
fn element(values: &[i64], i: usize) -> Option<i64> {
    if let [splat] = values {
        return Some(*splat);
    }
    values.get(i).copied()
}

/// Apply `f` elementwise, keeping splats unexpanded. Payloads longer than
/// one element must agree on their length.
fn zip_elements(
    operands: &[&[i64]],
    mut f: impl FnMut(&[i64]) -> Option<i64>,
) -> Option<Vec<i64>> {
    let len = operands.iter().map(|values| values.len()).max()?;
    if operands.iter().any(|values| values.len() != len && values.len() != 1) {
        return None;
    }
    let mut args = Vec::with_capacity(operands.len());
    (0..len)
        .map(|i| {
            args.clear();
            for values in operands {
                args.push(element(values, i)?);
            }
            f(&args)
        })
        .collect()
}

impl Folder<'_> {
    fn tensor(&self, value: ValueId) -> Option<&TensorType> {
        self.values.get(value.index())?.ty.as_tensor()
    }

    fn int_type(&self, value: ValueId) -> Option<IntType> {
        match self.tensor(value)?.element {
            ElementType::Int(ity) => Some(ity),
            ElementType::Float(_) => None,
        }
    }

    fn element_count(&self, value: ValueId) -> Option<usize> {
        usize::try_from(self.tensor(value)?.num_elements()?).ok()
    }

    /// Integer elements of a constant value. A splat comes back as a single
    /// element; other payloads are read only up to [`MAX_FOLDED_ELEMENTS`].
    pub fn ints(&self, value: ValueId) -> Option<Vec<i64>> {
        let count = self.element_count(value)?;
        self.int_type(value)?;
        let payload = self.constants.get(value)?;
        if payload.len() == 1 {
            return payload.to_ints(1);
        }
        if count > MAX_FOLDED_ELEMENTS {
            return None;
        }
        payload.to_ints(count)
    }

    /// Integer elements of a constant value with splats expanded, for
    /// payloads of at most [`MAX_FOLDED_ELEMENTS`] elements.
    pub fn expanded_ints(&self, value: ValueId) -> Option<Vec<i64>> {
        let count = self.element_count(value)?;
        if count > MAX_FOLDED_ELEMENTS {
            return None;
        }
        self.int_type(value)?;
        self.constants.get(value)?.to_ints(count)
    }

    /// Fold `op` into the elements of its single result.
    pub fn fold(&self, op: &Operation) -> Option<DenseElements> {
        let [result] = op.results[..] else {
            return None;
        };
        let result_type = self.tensor(result)?;
        let count = self.element_count(result)?;
        if count == 0 {
            return None;
        }
        let ty = self.int_type(result)?;

        let values = match &op.kind {
            OpKind::Add
            | OpKind::Subtract
            | OpKind::Multiply
            | OpKind::Divide
            | OpKind::Remainder
            | OpKind::Maximum
            | OpKind::Minimum
            | OpKind::And
            | OpKind::Or => {
                let lhs = self.ints(op.operands[0])?;
                let rhs = self.ints(op.operands[1])?;
                zip_elements(&[lhs.as_slice(), rhs.as_slice()], |args| {
                    fold_binary(&op.kind, args[0], args[1], ty)
                })?
            }
            OpKind::Negate | OpKind::Abs | OpKind::Not => self
                .ints(op.operands[0])?
                .into_iter()
                .map(|a| fold_unary(&op.kind, a, ty))
                .collect(),
            OpKind::Compare => {
                let Some(Attribute::ComparisonDirection(direction)) =
                    op.attribute("comparison_direction")
                else {
                    return None;
                };
                let unsigned = self.int_type(op.operands[0])?.signedness() == Signedness::Unsigned;
                let lhs = self.ints(op.operands[0])?;
                let rhs = self.ints(op.operands[1])?;
                zip_elements(&[lhs.as_slice(), rhs.as_slice()], |args| {
                    let holds = if unsigned {
                        direction.evaluate(args[0] as u64, args[1] as u64)
                    } else {
                        direction.evaluate(args[0], args[1])
                    };
                    Some(i64::from(holds))
                })?
            }
            OpKind::Select => {
                let predicate = self.ints(op.operands[0])?;
                let on_true = self.ints(op.operands[1])?;
                let on_false = self.ints(op.operands[2])?;
                zip_elements(
                    &[predicate.as_slice(), on_true.as_slice(), on_false.as_slice()],
                    |args| Some(if args[0] != 0 { args[1] } else { args[2] }),
                )?
            }
            OpKind::Convert => {
                let values = self.ints(op.operands[0])?;
                if ty.is_bool() {
                    values.into_iter().map(|v| i64::from(v != 0)).collect()
                } else {
                    values
                }
            }
            OpKind::Reshape => self.ints(op.operands[0])?,
            OpKind::BroadcastInDim => {
                let values = self.ints(op.operands[0])?;
                let first = *values.first()?;
                if values.iter().any(|v| *v != first) {
                    return None;
                }
                vec![first]
            }
            OpKind::Concatenate => {
                if op.int_attribute("dimension") != Some(0) || count > MAX_FOLDED_ELEMENTS {
                    return None;
                }
                let mut values = Vec::with_capacity(count);
                for operand in &op.operands {
                    values.extend(self.expanded_ints(*operand)?);
                }
                values
            }
            OpKind::Iota => {
                if result_type.rank() != Some(1)
                    || op.int_attribute("iota_dimension") != Some(0)
                    || count > MAX_FOLDED_ELEMENTS
                {
                    return None;
                }
                (0..count as i64).collect()
            }
            OpKind::GetDimensionSize => {
                let dimension = usize::try_from(op.int_attribute("dimension")?).ok()?;
                let Shape::Ranked(dims) = &self.tensor(op.operands[0])?.shape else {
                    return None;
                };
                vec![dims.get(dimension)?.size()?]
            }
            _ => return None,
        };

        // A single element on a larger result is a splat.
        if values.len() != count && values.len() != 1 {
            return None;
        }
        Some(to_elements(values, ty))
    }
}

fn fold_binary(kind: &OpKind, a: i64, b: i64, ty: IntType) -> Option<i64> {
    let unsigned = ty.signedness() == Signedness::Unsigned;
    let value = match kind {
        OpKind::Add => a.wrapping_add(b),
        OpKind::Subtract => a.wrapping_sub(b),
        OpKind::Multiply => a.wrapping_mul(b),
        OpKind::Divide | OpKind::Remainder if b == 0 => return None,
        OpKind::Divide if unsigned => ((a as u64) / (b as u64)) as i64,
        OpKind::Divide => a.wrapping_div(b),
        OpKind::Remainder if unsigned => ((a as u64) % (b as u64)) as i64,
        OpKind::Remainder => a.wrapping_rem(b),
        OpKind::Maximum if unsigned => (a as u64).max(b as u64) as i64,
        OpKind::Maximum => a.max(b),
        OpKind::Minimum if unsigned => (a as u64).min(b as u64) as i64,
        OpKind::Minimum => a.min(b),
        OpKind::And => a & b,
        OpKind::Or => a | b,
        _ => return None,
    };
    Some(ty.wrap(value))
}

fn fold_unary(kind: &OpKind, a: i64, ty: IntType) -> i64 {
    let value = match kind {
        OpKind::Negate => a.wrapping_neg(),
        OpKind::Abs if ty.signedness() == Signedness::Unsigned => a,
        OpKind::Abs => a.wrapping_abs(),
        OpKind::Not => !a,
        _ => a,
    };
    ty.wrap(value)
}

/// Build the constant payload, wrapping values to `ty` and collapsing
/// uniform values into a splat.
fn to_elements(values: Vec<i64>, ty: IntType) -> DenseElements {
    let mut values: Vec<i64> = values.into_iter().map(|v| ty.wrap(v)).collect();
    if values.len() > 1 && values.iter().all(|v| *v == values[0]) {
        values.truncate(1);
    }
    if ty.is_bool() {
        DenseElements::Bools(values.into_iter().map(|v| v != 0).collect())
    } else {
        DenseElements::Ints(values)
    }
}
