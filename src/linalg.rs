use eyre::eyre;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// An external linear-algebra collaborator capable of solving
/// `matrix * x = rhs` for square systems.
pub trait LinearSolver {
    fn solve(&self, matrix: &DMatrix<f64>, rhs: &DVector<f64>) -> eyre::Result<DVector<f64>>;
}

/// Reference dense backend based on LU factorization with partial pivoting.
#[derive(Debug, Clone, Default)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn solve(&self, matrix: &DMatrix<f64>, rhs: &DVector<f64>) -> eyre::Result<DVector<f64>> {
        assert_eq!(matrix.nrows(), matrix.ncols(), "matrix must be square");
        assert_eq!(matrix.nrows(), rhs.len(), "dimension mismatch between matrix and rhs");
        matrix
            .clone()
            .lu()
            .solve(rhs)
            .ok_or_else(|| eyre!("LU factorization failed: matrix is singular"))
    }
}

/// Selects the linear-algebra backend used for the Newton direction solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    #[default]
    DenseLu,
}

impl Backend {
    pub fn solver(&self) -> Box<dyn LinearSolver> {
        match self {
            Backend::DenseLu => Box::new(DenseLu),
        }
    }
}
