//! Bilinear form driver: integrator registration, assembly-level selection, and the
//! formation of constrained linear systems.
//!
//! The form is the user-facing entry point. Integrators are registered by name through a
//! small registry; the assembly level decides whether `form_system_matrix` produces a
//! matrix-free constrained wrapper (partial assembly) or a fully assembled sparse matrix
//! with explicit row/column elimination. Both levels are driven by the same
//! per-quadrature-point setup routine, so they agree to machine precision.

use crate::constrained::{ConstrainedOperator, RapOperator};
use crate::operator::{csr_mul_vec, csr_tr_mul_vec, CsrOperator, Operator};
use crate::pa::{self, PaDiffusion};
use crate::space::{Coefficient, TensorElementSpace};
use crate::storage::{Backend, Buffer, Layout};
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// How `form_system_matrix` realizes the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyLevel {
    /// Assemble a global sparse matrix.
    Full,
    /// Keep the operator matrix-free; only quadrature-point data is precomputed.
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntegratorKind {
    Diffusion,
}

fn integrator_registry() -> FxHashMap<&'static str, IntegratorKind> {
    let mut registry = FxHashMap::default();
    registry.insert("diffusion", IntegratorKind::Diffusion);
    registry
}

/// A right-hand side or solution vector in true-dof space, either borrowing the
/// original L-vector (identity prolongation) or owning a restricted copy.
///
/// Borrowing means solver updates land directly in the caller's vector, matching the
/// zero-copy fast path; both variants dereference to the underlying vector so solvers
/// are agnostic to which case they got.
pub enum Restricted<'a> {
    Aliased(&'a mut DVector<f64>),
    Owned(DVector<f64>),
}

impl<'a> Deref for Restricted<'a> {
    type Target = DVector<f64>;

    fn deref(&self) -> &DVector<f64> {
        match self {
            Restricted::Aliased(v) => v,
            Restricted::Owned(v) => v,
        }
    }
}

impl<'a> DerefMut for Restricted<'a> {
    fn deref_mut(&mut self) -> &mut DVector<f64> {
        match self {
            Restricted::Aliased(v) => v,
            Restricted::Owned(v) => v,
        }
    }
}

/// The constrained operator handed to solvers, in either assembly realization.
pub enum SystemOperator {
    /// Matrix-free: a [`ConstrainedOperator`] around the form operator (conjugated with
    /// the prolongation when the space carries one).
    Constrained(ConstrainedOperator),
    /// Fully assembled: the eliminated sparse matrix, the eliminated entries (original
    /// minus final), and the constraint list.
    Sparse {
        a: CsrOperator,
        eliminated: CsrMatrix<f64>,
        constraints: Vec<usize>,
    },
}

impl SystemOperator {
    /// Fold prescribed values into the right-hand side so that solving the constrained
    /// system reproduces them exactly.
    pub fn eliminate_rhs(&self, x: &DVector<f64>, b: &mut DVector<f64>) {
        match self {
            SystemOperator::Constrained(constrained) => constrained.eliminate_rhs(x, b),
            SystemOperator::Sparse {
                eliminated,
                constraints,
                ..
            } => {
                let mut correction = DVector::zeros(b.len());
                csr_mul_vec(eliminated, x, &mut correction);
                *b -= &correction;
                for &i in constraints {
                    b[i] = x[i];
                }
            }
        }
    }

    /// The fully assembled matrix, if this realization has one.
    pub fn sparse_matrix(&self) -> Option<&CsrMatrix<f64>> {
        match self {
            SystemOperator::Constrained(_) => None,
            SystemOperator::Sparse { a, .. } => Some(a.matrix()),
        }
    }
}

impl Operator for SystemOperator {
    fn size(&self) -> usize {
        match self {
            SystemOperator::Constrained(constrained) => constrained.size(),
            SystemOperator::Sparse { a, .. } => a.size(),
        }
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        match self {
            SystemOperator::Constrained(constrained) => constrained.apply(x, y),
            // Identity rows/columns are materialized in the matrix
            SystemOperator::Sparse { a, .. } => a.apply(x, y),
        }
    }

    fn assemble_diagonal(&self, diag: &mut DVector<f64>) {
        match self {
            SystemOperator::Constrained(constrained) => constrained.assemble_diagonal(diag),
            SystemOperator::Sparse { a, .. } => a.assemble_diagonal(diag),
        }
    }
}

/// Sum of several operators of equal size, applied with one scratch vector.
struct SumOperator {
    parts: Vec<Arc<dyn Operator>>,
    scratch: RefCell<DVector<f64>>,
}

impl Operator for SumOperator {
    fn size(&self) -> usize {
        self.parts[0].size()
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        let (first, rest) = self.parts.split_first().unwrap_or_else(|| unreachable!());
        first.apply(x, y);
        let mut scratch = self.scratch.borrow_mut();
        for part in rest {
            part.apply(x, &mut scratch);
            *y += &*scratch;
        }
    }

    fn assemble_diagonal(&self, diag: &mut DVector<f64>) {
        let (first, rest) = self.parts.split_first().unwrap_or_else(|| unreachable!());
        first.assemble_diagonal(diag);
        let mut scratch = self.scratch.borrow_mut();
        for part in rest {
            part.assemble_diagonal(&mut scratch);
            *diag += &*scratch;
        }
    }
}

/// A symmetric bilinear form over a [`TensorElementSpace`].
///
/// Integrators are added by registry name; assembly is lazy and happens on the first
/// `form_system_matrix` / `form_linear_system` call.
pub struct BilinearForm<S> {
    space: Arc<S>,
    q1d: usize,
    backend: Backend,
    level: AssemblyLevel,
    integrators: Vec<(IntegratorKind, Arc<dyn Coefficient>)>,
    partial: RefCell<Option<Arc<dyn Operator>>>,
    full: RefCell<Option<CsrMatrix<f64>>>,
}

impl<S: TensorElementSpace + 'static> BilinearForm<S> {
    pub fn new(space: Arc<S>, q1d: usize, level: AssemblyLevel, backend: Backend) -> Self {
        Self {
            space,
            q1d,
            backend,
            level,
            integrators: Vec::new(),
            partial: RefCell::new(None),
            full: RefCell::new(None),
        }
    }

    /// Register an integrator by name.
    ///
    /// # Panics
    ///
    /// Unknown names are a fatal configuration error, not a recoverable condition, and
    /// panic with the offending name.
    pub fn add_integrator(&mut self, name: &str, coefficient: Arc<dyn Coefficient>) {
        let kind = *integrator_registry()
            .get(name)
            .unwrap_or_else(|| panic!("unknown integrator '{}'", name));
        self.integrators.push((kind, coefficient));
        // Invalidate any previous assembly
        *self.partial.borrow_mut() = None;
        *self.full.borrow_mut() = None;
    }

    pub fn assembly_level(&self) -> AssemblyLevel {
        self.level
    }

    fn assert_has_integrators(&self) {
        assert!(
            !self.integrators.is_empty(),
            "cannot assemble a form without integrators"
        );
    }

    fn assemble_partial(&self) -> Arc<dyn Operator> {
        if let Some(operator) = self.partial.borrow().as_ref() {
            return Arc::clone(operator);
        }
        self.assert_has_integrators();

        let mut parts: Vec<Arc<dyn Operator>> = Vec::with_capacity(self.integrators.len());
        for (kind, coefficient) in &self.integrators {
            match kind {
                IntegratorKind::Diffusion => {
                    let operator = PaDiffusion::new(
                        Arc::clone(&self.space),
                        Arc::clone(coefficient),
                        self.q1d,
                        self.backend,
                    );
                    operator.assemble();
                    parts.push(Arc::new(operator));
                }
            }
        }

        let operator: Arc<dyn Operator> = if parts.len() == 1 {
            parts.pop().unwrap_or_else(|| unreachable!())
        } else {
            let size = parts[0].size();
            Arc::new(SumOperator {
                parts,
                scratch: RefCell::new(DVector::zeros(size)),
            })
        };
        *self.partial.borrow_mut() = Some(Arc::clone(&operator));
        operator
    }

    fn assemble_full(&self) -> CsrMatrix<f64> {
        if let Some(matrix) = self.full.borrow().as_ref() {
            return matrix.clone();
        }
        self.assert_has_integrators();

        let dim = self.space.dim();
        let ne = self.space.num_elements();
        let dpe = self.space.dofs_per_element();
        let shape = crate::quadrature::ShapeTables::new(self.space.dofs_1d(), self.q1d);
        let nq = shape.num_qpoints(dim);
        let sym = pa::sym_size(dim);
        let restriction = crate::restriction::ElementRestriction::new(&*self.space, self.backend);

        // Element matrices are computed into a device buffer and pulled to the host in
        // one transfer before the sparse insertion.
        let mut element_matrices =
            Buffer::<f64>::from_layout(Layout::new(ne * dpe * dpe, self.backend));

        let b = shape.b.as_slice();
        let g = shape.g.as_slice();
        let mut dq = vec![0.0; nq * sym];
        let mut column = vec![0.0; dpe];
        let mut unit = vec![0.0; dpe];
        for (e, ke) in element_matrices
            .as_mut_slice()
            .chunks_mut(dpe * dpe)
            .enumerate()
        {
            for (kind, coefficient) in &self.integrators {
                match kind {
                    IntegratorKind::Diffusion => {
                        pa::diffusion_setup_element(&*self.space, &**coefficient, &shape, e, &mut dq);
                        // Column j of the element matrix is the element apply of e_j
                        for j in 0..dpe {
                            unit.fill(0.0);
                            unit[j] = 1.0;
                            column.fill(0.0);
                            pa::diffusion_element_apply(
                                dim, shape.d1d, shape.q1d, b, g, &dq, &unit, &mut column,
                            );
                            for i in 0..dpe {
                                ke[i * dpe + j] += column[i];
                            }
                        }
                    }
                }
            }
        }
        let mut host = vec![0.0; ne * dpe * dpe];
        element_matrices.pull(&mut host);

        let n = self.space.num_dofs();
        let mut coo = CooMatrix::new(n, n);
        for e in 0..ne {
            let dofs = restriction.element_dofs(e);
            let ke = &host[e * dpe * dpe..(e + 1) * dpe * dpe];
            for (i, di) in dofs.iter().enumerate() {
                for (j, dj) in dofs.iter().enumerate() {
                    let value = di.sign() * dj.sign() * ke[i * dpe + j];
                    if value != 0.0 {
                        coo.push(di.index as usize, dj.index as usize, value);
                    }
                }
            }
        }

        let matrix = CsrMatrix::from(&coo);
        log::debug!(
            "fully assembled form: {} dofs, {} stored entries",
            n,
            matrix.nnz()
        );
        *self.full.borrow_mut() = Some(matrix.clone());
        matrix
    }

    /// Form the operator of the constrained system for the given essential
    /// (prescribed-value) degrees of freedom, in true-dof numbering.
    pub fn form_system_matrix(&self, ess_dofs: &[usize]) -> SystemOperator {
        match self.level {
            AssemblyLevel::Partial => {
                let operator = self.assemble_partial();
                let inner: Arc<dyn Operator> = match self.space.prolongation() {
                    Some(p) => Arc::new(RapOperator::new(p.clone(), operator)),
                    None => operator,
                };
                SystemOperator::Constrained(ConstrainedOperator::new(inner, ess_dofs.to_vec()))
            }
            AssemblyLevel::Full => {
                let mut matrix = self.assemble_full();
                if let Some(p) = self.space.prolongation() {
                    matrix = p.transpose() * &(&matrix * p);
                }
                let eliminated = eliminate_rows_cols(&mut matrix, ess_dofs);
                SystemOperator::Sparse {
                    a: CsrOperator::new(matrix),
                    eliminated,
                    constraints: ess_dofs.to_vec(),
                }
            }
        }
    }

    /// Form the complete constrained linear system `A X = B` from an initial guess /
    /// boundary-value vector `x` and a load vector `b`, both in L-vector numbering.
    ///
    /// Without a prolongation the returned `X` and `B` alias `x` and `b`; with one they
    /// are owned copies: `B = Pᵗ b` (the dual map), while `X` takes the *restriction*
    /// `R x`, selecting one representative L-dof per true dof so that prescribed values
    /// survive unscaled even when a true dof fans out to several L-dofs. When
    /// `copy_interior` is false the interior (unconstrained) entries of `X` are zeroed,
    /// discarding the initial guess but keeping the prescribed boundary values.
    pub fn form_linear_system<'a>(
        &self,
        ess_dofs: &[usize],
        x: &'a mut DVector<f64>,
        b: &'a mut DVector<f64>,
        copy_interior: bool,
    ) -> (SystemOperator, Restricted<'a>, Restricted<'a>) {
        let operator = self.form_system_matrix(ess_dofs);

        let (mut x_t, mut b_t) = match self.space.prolongation() {
            None => (Restricted::Aliased(x), Restricted::Aliased(b)),
            Some(p) => {
                let representatives = identity_rows(p);
                let mut x_true = DVector::zeros(p.ncols());
                for (j, &i) in representatives.iter().enumerate() {
                    x_true[j] = x[i];
                }
                let mut b_true = DVector::zeros(p.ncols());
                csr_tr_mul_vec(p, b, &mut b_true);
                (Restricted::Owned(x_true), Restricted::Owned(b_true))
            }
        };

        if !copy_interior {
            let constrained: FxHashSet<usize> = ess_dofs.iter().copied().collect();
            for i in 0..x_t.len() {
                if !constrained.contains(&i) {
                    x_t[i] = 0.0;
                }
            }
        }

        operator.eliminate_rhs(&x_t, &mut b_t);
        (operator, x_t, b_t)
    }

    /// Map a solved true-dof vector back to the L-vector.
    ///
    /// Returns `None` when the solution already lives in the caller's vector (the
    /// aliased case), or the prolongated L-vector otherwise.
    pub fn recover_solution(&self, x_t: &Restricted<'_>) -> Option<DVector<f64>> {
        match x_t {
            Restricted::Aliased(_) => None,
            Restricted::Owned(x_true) => {
                let p = self
                    .space
                    .prolongation()
                    .unwrap_or_else(|| panic!("owned restricted vector without a prolongation"));
                let mut x = DVector::zeros(p.nrows());
                csr_mul_vec(p, x_true, &mut x);
                Some(x)
            }
        }
    }
}

/// The restriction matching a conforming prolongation is a row selection: every true dof
/// owns at least one L-dof whose row of `P` is a unit row. Returns that row index per
/// true dof.
///
/// # Panics
///
/// Panics if some true dof has no unit row, in which case the prolongation is not a
/// conforming interpolation and no canonical restriction exists.
fn identity_rows(p: &CsrMatrix<f64>) -> Vec<usize> {
    let mut rows = vec![usize::MAX; p.ncols()];
    for (i, row) in p.row_iter().enumerate() {
        if let ([j], [value]) = (row.col_indices(), row.values()) {
            if *value == 1.0 && rows[*j] == usize::MAX {
                rows[*j] = i;
            }
        }
    }
    for (j, &i) in rows.iter().enumerate() {
        assert!(
            i != usize::MAX,
            "prolongation has no unit row for true dof {}",
            j
        );
    }
    rows
}

/// Zero the rows and columns of `a` at the constrained indices and put ones on their
/// diagonal. Returns the eliminated entries, `original - final`, which carry exactly the
/// information needed to fold prescribed values into a right-hand side.
///
/// Assumes the sparsity pattern stores every constrained diagonal entry.
fn eliminate_rows_cols(a: &mut CsrMatrix<f64>, constraints: &[usize]) -> CsrMatrix<f64> {
    let set: FxHashSet<usize> = constraints.iter().copied().collect();
    let n = a.nrows();
    let mut removed = CooMatrix::new(n, n);

    for (i, mut row) in a.row_iter_mut().enumerate() {
        let row_constrained = set.contains(&i);
        let (cols, values) = row.cols_and_values_mut();
        for (&j, value) in cols.iter().zip(values.iter_mut()) {
            if !(row_constrained || set.contains(&j)) {
                continue;
            }
            let target = if i == j { 1.0 } else { 0.0 };
            let difference = *value - target;
            if difference != 0.0 {
                removed.push(i, j, difference);
            }
            *value = target;
        }
    }

    CsrMatrix::from(&removed)
}
