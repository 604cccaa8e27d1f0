//! Tensor program representation used by the shape refinement pipeline.
//!
//! A [`Module`](modules::Module) is an ordered list of functions. Each
//! function owns a single-block body region whose operations reference
//! function-scoped SSA values. Types carry per-dimension static or dynamic
//! sizes so that refinement can make polymorphic programs fully static.

pub mod analysis;
#[cfg(feature = "borsh")]
pub mod bytecode;
pub mod diagnostics;
pub mod modules;
pub mod types;
pub mod utils;
pub mod verify;

pub use diagnostics::{Diagnostic, DiagnosticHandler, DiagnosticKind, Reported, Transcript};
pub use modules::{
    Function, Module, Region, Visibility,
    attributes::{Attribute, ComparisonDirection, DenseElements},
    operation::{OpFlags, OpKind, Operation},
    value::{Location, ValueId, ValueInfo},
};
pub use types::{Dim, Shape, TensorType, Type, primary::ElementType};
pub use utils::Error;
