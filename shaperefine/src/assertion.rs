//! Well-formedness of `stablehlo.custom_call @shape_assertion` markers.
//!
//! A marker has the predicate `assert_what : tensor<i1>` as operand #0,
//! followed by up to [`MAX_ERROR_MESSAGE_INPUTS`] scalar `i32`/`i64`
//! error message inputs, no results and an `error_message` template whose
//! placeholders only reference existing inputs.
use shapeir::{
    Attribute, Diagnostic, Function, OpKind, Operation, Type, ValueId,
    types::primary::ElementType,
};

use crate::message::{MAX_ERROR_MESSAGE_INPUTS, validate_placeholders};

/// `call_target_name` of shape assertion markers.
pub const SHAPE_ASSERTION_NAME: &str = "shape_assertion";
pub const ERROR_MESSAGE_ATTR_NAME: &str = "error_message";

/// Attributes a marker may carry.
pub const SUPPORTED_ATTRIBUTES: [&str; 5] = [
    "api_version",
    "backend_config",
    "call_target_name",
    ERROR_MESSAGE_ATTR_NAME,
    "has_side_effect",
];

/// Returns `true` for custom calls targeting [`SHAPE_ASSERTION_NAME`].
pub fn is_shape_assertion(op: &Operation) -> bool {
    op.kind == OpKind::CustomCall
        && op.str_attribute("call_target_name") == Some(SHAPE_ASSERTION_NAME)
}

/// View of a marker that passed [`verify_shape_assertion`].
#[derive(Debug, Clone, Copy)]
pub struct ShapeAssertion<'a> {
    op: &'a Operation,
    error_message: &'a str,
}

impl<'a> ShapeAssertion<'a> {
    pub fn op(&self) -> &'a Operation {
        self.op
    }

    /// Operand #0.
    pub fn assert_what(&self) -> ValueId {
        self.op.operands[0]
    }

    /// Operands #1 and following.
    pub fn error_message_inputs(&self) -> &'a [ValueId] {
        &self.op.operands[1..]
    }

    pub fn error_message(&self) -> &'a str {
        self.error_message
    }
}

fn is_scalar_of(function: &Function, value: ValueId, element: impl Fn(&ElementType) -> bool) -> bool {
    match function.get_value_type(value) {
        Some(Type::Tensor(tensor)) => tensor.is_scalar() && element(&tensor.element),
        _ => false,
    }
}

/// Check the operand, result and attribute contract of a marker.
///
/// Checks run in a fixed order and the first violation is returned as a
/// structural diagnostic on `op`. Nothing is evaluated.
pub fn verify_shape_assertion<'a>(
    op: &'a Operation,
    function: &Function,
) -> Result<ShapeAssertion<'a>, Diagnostic> {
    let max_operands = 1 + MAX_ERROR_MESSAGE_INPUTS;
    if !(1..=max_operands).contains(&op.operands.len()) {
        return Err(Diagnostic::error(
            op.location,
            format!("expects 1 <= size(operands) <= {}", max_operands),
        ));
    }
    let input_count = op.operands.len() - 1;

    if !op.results.is_empty() {
        return Err(Diagnostic::error(op.location, "expects size(results) = 0"));
    }

    if let Some(name) = op
        .attributes
        .keys()
        .find(|name| !SUPPORTED_ATTRIBUTES.contains(&name.as_str()))
    {
        return Err(Diagnostic::error(
            op.location,
            format!("{} is not a supported attribute", name),
        ));
    }

    match op.attribute("backend_config") {
        None => {}
        Some(Attribute::Str(config)) if config.is_empty() => {}
        Some(_) => {
            return Err(Diagnostic::error(op.location, "expects an empty backend_config"));
        }
    }

    if op.str_attribute("call_target_name") != Some(SHAPE_ASSERTION_NAME) {
        return Err(Diagnostic::error(op.location, "expects @shape_assertion"));
    }

    if op.bool_attribute("has_side_effect") != Some(true) {
        return Err(Diagnostic::error(op.location, "expects has_side_effect=true"));
    }

    if !is_scalar_of(function, op.operands[0], ElementType::is_bool) {
        return Err(Diagnostic::error(
            op.location,
            "expects assert_what (operand #0) to be a constant of type tensor<i1>",
        ));
    }

    for (i, input) in op.operands.iter().enumerate().skip(1) {
        if !is_scalar_of(function, *input, ElementType::is_signless_i32_or_i64) {
            return Err(Diagnostic::error(
                op.location,
                format!(
                    "expects error_message_input (operand #{}) to be a constant of type tensor<i32> or tensor<i64>",
                    i
                ),
            ));
        }
    }

    let Some(error_message) = op.str_attribute(ERROR_MESSAGE_ATTR_NAME) else {
        return Err(Diagnostic::error(op.location, "expects an error_message attribute"));
    };

    validate_placeholders(error_message, input_count)
        .map_err(|err| Diagnostic::error(op.location, err.to_string()))?;

    Ok(ShapeAssertion { op, error_message })
}
