use crate::shape::Shape;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A dense numeric tensor with row-major storage.
///
/// This is the concrete value type bound to arguments and produced by
/// integration. Per-point evaluation results use [`Batch`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f64>,
}

impl Tensor {
    /// # Panics
    ///
    /// Panics if the data length does not match the number of elements of
    /// the shape.
    pub fn new(shape: impl Into<Shape>, data: Vec<f64>) -> Self {
        let shape = shape.into();
        assert_eq!(
            data.len(),
            shape.len(),
            "tensor data length {} does not match shape {}",
            data.len(),
            shape
        );
        Tensor { shape, data }
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let data = vec![0.0; shape.len()];
        Tensor { shape, data }
    }

    pub fn scalar(value: f64) -> Self {
        Tensor {
            shape: Shape::scalar(),
            data: vec![value],
        }
    }

    /// A rank-1 tensor from raw data.
    pub fn from_vec(data: Vec<f64>) -> Self {
        let shape = Shape::from(vec![data.len()]);
        Tensor { shape, data }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// The single element of a scalar tensor.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not rank 0.
    pub fn as_scalar(&self) -> f64 {
        assert!(self.shape.is_scalar(), "tensor of shape {} is not a scalar", self.shape);
        self.data[0]
    }

    /// Element access by multi-index.
    pub fn get(&self, index: &[usize]) -> f64 {
        assert_eq!(index.len(), self.shape.rank());
        let mut flat = 0;
        for (i, (&ix, &dim)) in index.iter().zip(self.shape.dims()).enumerate() {
            assert!(ix < dim, "index {} out of bounds for axis {} of shape {}", ix, i, self.shape);
            flat = flat * dim + ix;
        }
        self.data[flat]
    }

    pub fn reshaped(mut self, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        assert_eq!(shape.len(), self.shape.len(), "reshape must preserve the element count");
        self.shape = shape;
        self
    }
}

// Equality and hashing compare exact bit patterns, so that tensors can act
// as interning keys for constant nodes. NaN payloads compare equal to
// themselves under this scheme.
impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for Tensor {}

impl Hash for Tensor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape.hash(state);
        for v in &self.data {
            v.to_bits().hash(state);
        }
    }
}

/// Per-point evaluation results: one tensor of a common shape per point of
/// a point set, stored contiguously with the point axis leading.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    npoints: usize,
    shape: Shape,
    data: Vec<f64>,
}

impl Batch {
    pub fn new(npoints: usize, shape: impl Into<Shape>, data: Vec<f64>) -> Self {
        let shape = shape.into();
        assert_eq!(data.len(), npoints * shape.len(), "batch data length mismatch");
        Batch { npoints, shape, data }
    }

    pub fn zeros(npoints: usize, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let data = vec![0.0; npoints * shape.len()];
        Batch { npoints, shape, data }
    }

    /// Repeats a single tensor across all points.
    pub fn splat(npoints: usize, tensor: &Tensor) -> Self {
        let n = tensor.shape().len();
        let mut data = Vec::with_capacity(npoints * n);
        for _ in 0..npoints {
            data.extend_from_slice(tensor.data());
        }
        Batch {
            npoints,
            shape: tensor.shape().clone(),
            data,
        }
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// The flattened tensor elements belonging to point `p`.
    pub fn point(&self, p: usize) -> &[f64] {
        let n = self.shape.len();
        &self.data[p * n..(p + 1) * n]
    }

    pub(crate) fn with_shape(mut self, shape: Shape) -> Self {
        assert_eq!(shape.len(), self.shape.len(), "reshape must preserve the element count");
        self.shape = shape;
        self
    }

    /// Weighted sum over the point axis: `sum_p w[p] * value[p]`.
    ///
    /// This is the quadrature contraction that turns pointwise integrand
    /// values into an integral.
    pub fn contract_weights(&self, weights: &[f64]) -> Tensor {
        assert_eq!(weights.len(), self.npoints, "one weight per point required");
        let n = self.shape.len();
        let mut out = vec![0.0; n];
        for (p, &w) in weights.iter().enumerate() {
            let vals = self.point(p);
            for (acc, &v) in out.iter_mut().zip(vals) {
                *acc += w * v;
            }
        }
        Tensor::new(self.shape.clone(), out)
    }

    /// Concatenates batches along the point axis. All parts must share the
    /// same shape.
    pub fn concat_points(parts: Vec<Batch>) -> Batch {
        assert!(!parts.is_empty(), "cannot concatenate zero batches");
        let shape = parts[0].shape.clone();
        let npoints = parts.iter().map(|b| b.npoints).sum();
        let mut data = Vec::with_capacity(npoints * shape.len());
        for part in parts {
            assert_eq!(part.shape, shape, "all batches must share one shape");
            data.extend_from_slice(&part.data);
        }
        Batch { npoints, shape, data }
    }
}
