//! The numerical-operator abstraction shared by all assembly strategies.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;

/// A square linear (or linearized) operator acting on global degree-of-freedom vectors.
///
/// This is the single contract exposed upward by every assembly strategy: partial
/// (matrix-free) operators, fully assembled sparse matrices and constrained wrappers all
/// implement it, so solvers never see which strategy produced the operator.
pub trait Operator {
    /// Input and output dimension.
    fn size(&self) -> usize;

    /// `y = A x`. Overwrites `y`.
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>);

    /// `y = A^T x`. Overwrites `y`.
    ///
    /// The default implementation aborts: several operators in this crate (notably the
    /// backend form drivers) are inherently one-directional, and requesting their
    /// transpose indicates a call-site logic error rather than bad data.
    fn apply_transpose(&self, _x: &DVector<f64>, _y: &mut DVector<f64>) {
        panic!("apply_transpose is not supported by this operator");
    }

    /// Write the operator's diagonal into `diag` (needed by e.g. Jacobi-type
    /// preconditioners). Overwrites `diag`.
    ///
    /// The default implementation aborts; operators that can extract their diagonal
    /// without materializing off-diagonal entries override it.
    fn assemble_diagonal(&self, _diag: &mut DVector<f64>) {
        panic!("assemble_diagonal is not supported by this operator");
    }
}

/// A dense matrix as an [`Operator`]. Mostly useful in tests and for very small systems.
#[derive(Debug, Clone)]
pub struct DenseOperator {
    matrix: DMatrix<f64>,
}

impl DenseOperator {
    /// # Panics
    ///
    /// Panics if the matrix is not square.
    pub fn new(matrix: DMatrix<f64>) -> Self {
        assert_eq!(matrix.nrows(), matrix.ncols(), "operator must be square");
        Self { matrix }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
}

impl Operator for DenseOperator {
    fn size(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        y.gemv(1.0, &self.matrix, x, 0.0);
    }

    fn apply_transpose(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        y.gemv_tr(1.0, &self.matrix, x, 0.0);
    }

    fn assemble_diagonal(&self, diag: &mut DVector<f64>) {
        for i in 0..self.matrix.nrows() {
            diag[i] = self.matrix[(i, i)];
        }
    }
}

/// A CSR matrix as an [`Operator`].
#[derive(Debug, Clone)]
pub struct CsrOperator {
    matrix: CsrMatrix<f64>,
}

impl CsrOperator {
    /// # Panics
    ///
    /// Panics if the matrix is not square.
    pub fn new(matrix: CsrMatrix<f64>) -> Self {
        assert_eq!(matrix.nrows(), matrix.ncols(), "operator must be square");
        Self { matrix }
    }

    pub fn matrix(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }
}

impl Operator for CsrOperator {
    fn size(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        csr_mul_vec(&self.matrix, x, y);
    }

    fn apply_transpose(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        csr_tr_mul_vec(&self.matrix, x, y);
    }

    fn assemble_diagonal(&self, diag: &mut DVector<f64>) {
        for i in 0..self.matrix.nrows() {
            diag[i] = self.matrix.get_entry(i, i).map(|e| e.into_value()).unwrap_or(0.0);
        }
    }
}

/// `y = A x` for a CSR matrix. Overwrites `y`.
pub(crate) fn csr_mul_vec(a: &CsrMatrix<f64>, x: &DVector<f64>, y: &mut DVector<f64>) {
    debug_assert_eq!(a.ncols(), x.len());
    debug_assert_eq!(a.nrows(), y.len());
    for (i, row) in a.row_iter().enumerate() {
        let mut sum = 0.0;
        for (&j, &value) in row.col_indices().iter().zip(row.values()) {
            sum += value * x[j];
        }
        y[i] = sum;
    }
}

/// `y = A^T x` for a CSR matrix. Overwrites `y`.
pub(crate) fn csr_tr_mul_vec(a: &CsrMatrix<f64>, x: &DVector<f64>, y: &mut DVector<f64>) {
    debug_assert_eq!(a.nrows(), x.len());
    debug_assert_eq!(a.ncols(), y.len());
    y.fill(0.0);
    for (i, row) in a.row_iter().enumerate() {
        for (&j, &value) in row.col_indices().iter().zip(row.values()) {
            y[j] += value * x[i];
        }
    }
}
