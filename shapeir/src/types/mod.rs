//! Value types.
//!
//! Every SSA value carries a [`Type`]. Tensor types record an element type
//! and a [`Shape`] which is either unranked or a list of dimensions, each of
//! which is statically known or dynamic (`?` in the text format).
//!
//! Refinement only ever moves a type towards more static information; the
//! [`Shape::meet`] and [`Type::meet`] operations compute the most refined
//! type compatible with two observations, or report that they conflict.
#[cfg(feature = "borsh")]
use borsh::{BorshDeserialize, BorshSerialize};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumTryAs};

use crate::types::primary::ElementType;

pub mod primary;

/// A single tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum Dim {
    Static(i64),
    Dynamic,
}

impl Dim {
    /// Returns the static size, if known.
    pub fn size(&self) -> Option<i64> {
        match self {
            Dim::Static(size) => Some(*size),
            Dim::Dynamic => None,
        }
    }

    /// Most refined dimension compatible with both `self` and `other`.
    pub fn meet(&self, other: &Dim) -> Option<Dim> {
        match (self, other) {
            (Dim::Static(a), Dim::Static(b)) if a != b => None,
            (Dim::Static(a), _) | (_, Dim::Static(a)) => Some(Dim::Static(*a)),
            (Dim::Dynamic, Dim::Dynamic) => Some(Dim::Dynamic),
        }
    }
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dim::Static(size) => write!(f, "{}", size),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

/// Shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs, EnumTryAs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum Shape {
    /// Rank is unknown.
    Unranked,
    /// Rank is known; each dimension may still be dynamic.
    Ranked(Vec<Dim>),
}

impl Shape {
    /// Builds a ranked shape where every dimension is static.
    pub fn from_static(dims: &[i64]) -> Self {
        Shape::Ranked(dims.iter().copied().map(Dim::Static).collect())
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => Some(dims.len()),
        }
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => Some(dims),
        }
    }

    /// Returns `true` when the shape is ranked and every dimension is static.
    pub fn is_static(&self) -> bool {
        match self {
            Shape::Unranked => false,
            Shape::Ranked(dims) => dims.iter().all(Dim::is_static),
        }
    }

    /// Returns the static dimension sizes, if all of them are known.
    pub fn static_dims(&self) -> Option<Vec<i64>> {
        self.dims()?.iter().map(Dim::size).collect()
    }

    /// Number of elements, if the shape is fully static and the count fits
    /// in an `i64`.
    pub fn num_elements(&self) -> Option<i64> {
        self.static_dims()?
            .into_iter()
            .try_fold(1i64, |acc, dim| acc.checked_mul(dim))
    }

    /// Most refined shape compatible with both `self` and `other`, or `None`
    /// when ranks or static dimension sizes disagree.
    pub fn meet(&self, other: &Shape) -> Option<Shape> {
        match (self, other) {
            (Shape::Unranked, shape) | (shape, Shape::Unranked) => Some(shape.clone()),
            (Shape::Ranked(lhs), Shape::Ranked(rhs)) => {
                if lhs.len() != rhs.len() {
                    return None;
                }
                lhs.iter()
                    .zip(rhs)
                    .map(|(a, b)| a.meet(b))
                    .collect::<Option<Vec<_>>>()
                    .map(Shape::Ranked)
            }
        }
    }
}

/// A ranked or unranked tensor type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub struct TensorType {
    pub element: ElementType,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(element: impl Into<ElementType>, dims: impl IntoIterator<Item = Dim>) -> Self {
        Self {
            element: element.into(),
            shape: Shape::Ranked(dims.into_iter().collect()),
        }
    }

    /// Rank-0 tensor of the given element type.
    pub fn scalar(element: impl Into<ElementType>) -> Self {
        Self::new(element, [])
    }

    pub fn with_static_dims(element: impl Into<ElementType>, dims: &[i64]) -> Self {
        Self {
            element: element.into(),
            shape: Shape::from_static(dims),
        }
    }

    pub fn unranked(element: impl Into<ElementType>) -> Self {
        Self {
            element: element.into(),
            shape: Shape::Unranked,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.rank()
    }

    pub fn is_static(&self) -> bool {
        self.shape.is_static()
    }

    /// Returns `true` for ranked rank-0 tensors.
    pub fn is_scalar(&self) -> bool {
        self.rank() == Some(0)
    }

    pub fn num_elements(&self) -> Option<i64> {
        self.shape.num_elements()
    }

    /// Same element type, new shape.
    pub fn with_shape(&self, shape: Shape) -> Self {
        Self {
            element: self.element,
            shape,
        }
    }
}

impl std::fmt::Display for TensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tensor<")?;
        match &self.shape {
            Shape::Unranked => write!(f, "*x")?,
            Shape::Ranked(dims) => {
                for dim in dims {
                    write!(f, "{}x", dim)?;
                }
            }
        }
        write!(f, "{}>", self.element)
    }
}

/// Type of an SSA value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs, EnumTryAs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "borsh", derive(BorshSerialize, BorshDeserialize))]
pub enum Type {
    Tensor(TensorType),
    /// `!stablehlo.token`, used to order side effects.
    Token,
}

impl Type {
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(tensor) => Some(tensor),
            Type::Token => None,
        }
    }

    /// Tokens have no shape and are always static.
    pub fn is_static(&self) -> bool {
        match self {
            Type::Tensor(tensor) => tensor.is_static(),
            Type::Token => true,
        }
    }

    /// Most refined type compatible with both `self` and `other`. Element
    /// types must match exactly.
    pub fn meet(&self, other: &Type) -> Option<Type> {
        match (self, other) {
            (Type::Token, Type::Token) => Some(Type::Token),
            (Type::Tensor(lhs), Type::Tensor(rhs)) if lhs.element == rhs.element => lhs
                .shape
                .meet(&rhs.shape)
                .map(|shape| Type::Tensor(lhs.with_shape(shape))),
            _ => None,
        }
    }

    /// Two types are compatible when they have a common refinement.
    pub fn is_compatible_with(&self, other: &Type) -> bool {
        self.meet(other).is_some()
    }
}

impl From<TensorType> for Type {
    fn from(tensor: TensorType) -> Self {
        Type::Tensor(tensor)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Tensor(tensor) => tensor.fmt(f),
            Type::Token => write!(f, "!stablehlo.token"),
        }
    }
}
