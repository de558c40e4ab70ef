use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of an expression.
///
/// Numeric storage is `f64` throughout; the dtype is a construction-time
/// discipline that determines which operators may be applied to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    Float,
    Int,
    Bool,
}

impl Dtype {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Dtype::Float | Dtype::Int)
    }

    /// The dtype resulting from combining two numeric operands.
    pub fn promote(self, other: Dtype) -> Dtype {
        if self == Dtype::Float || other == Dtype::Float {
            Dtype::Float
        } else {
            Dtype::Int
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dtype::Float => write!(f, "float"),
            Dtype::Int => write!(f, "int"),
            Dtype::Bool => write!(f, "bool"),
        }
    }
}

/// The shape of a tensor-valued expression: an ordered tuple of axis sizes.
///
/// A rank-0 shape denotes a scalar. Shapes are fixed at node construction
/// time and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of elements (1 for a scalar).
    pub fn len(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shape obtained by appending the axes of `other` to `self`.
    pub fn concat(&self, other: &Shape) -> Shape {
        let mut dims = self.0.clone();
        dims.extend_from_slice(&other.0);
        Shape(dims)
    }

    /// The shape obtained by appending `k` axes of size one.
    pub fn appended_ones(&self, k: usize) -> Shape {
        let mut dims = self.0.clone();
        dims.extend(std::iter::repeat(1).take(k));
        Shape(dims)
    }

    pub fn removed_axis(&self, axis: usize) -> Shape {
        assert!(axis < self.rank(), "axis {} out of bounds for shape {}", axis, self);
        let mut dims = self.0.clone();
        dims.remove(axis);
        Shape(dims)
    }

    fn dim_from_end(&self, i: usize) -> usize {
        if i < self.rank() {
            self.0[self.rank() - 1 - i]
        } else {
            1
        }
    }

    /// Trailing-aligned broadcast of two shapes, or `None` if they are
    /// incompatible. Size-one axes stretch to the size of the other operand.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        let rank = self.rank().max(other.rank());
        let mut dims = Vec::with_capacity(rank);
        for i in 0..rank {
            let a = self.dim_from_end(i);
            let b = other.dim_from_end(i);
            let d = if a == b {
                a
            } else if a == 1 {
                b
            } else if b == 1 {
                a
            } else {
                return None;
            };
            dims.push(d);
        }
        dims.reverse();
        Some(Shape(dims))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}
