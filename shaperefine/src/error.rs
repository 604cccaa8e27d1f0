use shapeir::{Transcript, utils::Error as IrError};
use strum::EnumIs;
use thiserror::Error;

/// Failure of a refinement call.
///
/// Variants produced from diagnostics carry the [`Transcript`] of every
/// diagnostic collected during the call; `Display` renders it after the
/// summary line.
#[derive(Debug, Clone, PartialEq, EnumIs, Error)]
pub enum RefineError {
    /// The module is structurally invalid; no pass was run.
    #[error("Module verification failed: {0}")]
    Verification(Transcript),

    /// A pass of the pipeline failed, e.g. on a violated shape assertion.
    #[error("Module shape refinement failed: {0}")]
    Refinement(Transcript),

    #[error("Module has dynamic shapes: {0}")]
    DynamicShapes(Transcript),

    #[error("Module has residual shape assertions: {0}")]
    ResidualShapeAssertions(Transcript),

    #[error("Module has dynamic shapes and residual shape assertions: {0}")]
    DynamicShapesAndResidualShapeAssertions(Transcript),

    /// The text form could not be parsed. `rendered` holds the annotated
    /// parser errors.
    #[error("Cannot parse module")]
    CannotParse {
        rendered: String,
        #[source]
        source: IrError,
    },

    #[error("Cannot serialize module")]
    CannotSerialize(#[source] IrError),

    #[error("Invalid refinement options: {0}")]
    InvalidConfig(String),
}

impl RefineError {
    /// Diagnostics carried by the error, if any.
    pub fn transcript(&self) -> Option<&Transcript> {
        match self {
            RefineError::Verification(transcript)
            | RefineError::Refinement(transcript)
            | RefineError::DynamicShapes(transcript)
            | RefineError::ResidualShapeAssertions(transcript)
            | RefineError::DynamicShapesAndResidualShapeAssertions(transcript) => Some(transcript),
            RefineError::CannotParse { .. }
            | RefineError::CannotSerialize(_)
            | RefineError::InvalidConfig(_) => None,
        }
    }
}
