//! Essential-boundary-condition elimination without materializing the eliminated matrix.

use crate::operator::{csr_mul_vec, csr_tr_mul_vec, Operator};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use std::cell::RefCell;
use std::sync::Arc;

/// Wraps an inner operator `A` to enforce prescribed values at a list of constrained
/// degrees of freedom.
///
/// The wrapped operator acts as the symmetrically eliminated system: identity rows and
/// columns at constrained indices, `A` elsewhere — but the eliminated matrix is never
/// formed. The constraint list is immutable for the lifetime of the wrapper and its
/// indices are assumed distinct.
///
/// Two scratch vectors sized to the output layout are allocated once at construction and
/// reused on every call, so `apply` performs no allocation.
pub struct ConstrainedOperator {
    a: Arc<dyn Operator>,
    constraints: Vec<usize>,
    z: RefCell<DVector<f64>>,
    w: RefCell<DVector<f64>>,
}

impl ConstrainedOperator {
    /// # Panics
    ///
    /// Panics if any constrained index is out of bounds for the inner operator.
    pub fn new(a: Arc<dyn Operator>, constraints: Vec<usize>) -> Self {
        let n = a.size();
        assert!(
            constraints.iter().all(|&i| i < n),
            "constrained index out of bounds"
        );
        Self {
            a,
            constraints,
            z: RefCell::new(DVector::zeros(n)),
            w: RefCell::new(DVector::zeros(n)),
        }
    }

    pub fn inner(&self) -> &dyn Operator {
        &*self.a
    }

    pub fn constraints(&self) -> &[usize] {
        &self.constraints
    }

    /// Eliminate the constrained degrees of freedom from the right-hand side:
    ///
    /// ```text
    /// b <- b - A (x restricted to constrained indices, zero elsewhere)
    /// b[constraints] <- x[constraints]
    /// ```
    ///
    /// After this call, solving the constrained system with `b` reproduces the
    /// prescribed values of `x` exactly at the constrained indices.
    pub fn eliminate_rhs(&self, x: &DVector<f64>, b: &mut DVector<f64>) {
        let mut w = self.w.borrow_mut();
        let mut z = self.z.borrow_mut();

        w.fill(0.0);
        for &i in &self.constraints {
            w[i] = x[i];
        }

        self.a.apply(&w, &mut z);
        *b -= &*z;

        for &i in &self.constraints {
            b[i] = x[i];
        }
    }
}

impl Operator for ConstrainedOperator {
    fn size(&self) -> usize {
        self.a.size()
    }

    /// `y = A z` where `z` equals `x` except zero at constrained indices, then
    /// `y[constraints] = x[constraints]`. With an empty constraint list this degenerates
    /// to the inner operator's `apply` with no scratch-buffer traffic.
    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        if self.constraints.is_empty() {
            self.a.apply(x, y);
            return;
        }

        let mut z = self.z.borrow_mut();
        z.copy_from(x);
        for &i in &self.constraints {
            z[i] = 0.0;
        }

        self.a.apply(&z, y);

        for &i in &self.constraints {
            y[i] = x[i];
        }
    }

    fn assemble_diagonal(&self, diag: &mut DVector<f64>) {
        self.a.assemble_diagonal(diag);
        // Identity rows at constrained indices
        for &i in &self.constraints {
            diag[i] = 1.0;
        }
    }
}

/// The prolongation-conjugated operator `P^T A P`, applied factor by factor.
///
/// Used when the space carries a non-identity conforming prolongation: the form operator
/// `A` acts on L-vectors while the solver works with true degrees of freedom.
pub struct RapOperator {
    p: CsrMatrix<f64>,
    a: Arc<dyn Operator>,
    // Scratch in the L-vector space: P x and A P x
    xl: RefCell<DVector<f64>>,
    yl: RefCell<DVector<f64>>,
}

impl RapOperator {
    /// # Panics
    ///
    /// Panics if the prolongation's row count does not match the inner operator's size.
    pub fn new(p: CsrMatrix<f64>, a: Arc<dyn Operator>) -> Self {
        assert_eq!(p.nrows(), a.size(), "prolongation/operator size mismatch");
        let l_size = p.nrows();
        Self {
            p,
            a,
            xl: RefCell::new(DVector::zeros(l_size)),
            yl: RefCell::new(DVector::zeros(l_size)),
        }
    }
}

impl Operator for RapOperator {
    fn size(&self) -> usize {
        self.p.ncols()
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        let mut xl = self.xl.borrow_mut();
        let mut yl = self.yl.borrow_mut();
        // y = P^T (A (P x))
        csr_mul_vec(&self.p, x, &mut xl);
        self.a.apply(&xl, &mut yl);
        csr_tr_mul_vec(&self.p, &yl, y);
    }
}
