//! Partial-assembly (matrix-free) operator extensions.
//!
//! A partially assembled operator never forms a global matrix. Its `Assemble` pass
//! precomputes per-quadrature-point geometric/coefficient tensors; its `apply` pipeline
//! is gather (L-vector to E-vector), forward sum-factorized kernels to quadrature points,
//! a pointwise physics contraction against the cached setup data, the transpose kernels
//! back to element dofs, and a race-free scatter-add.
//!
//! Assembly progress is tracked by an explicit [`AssemblyState`] rather than a boolean
//! flag, and gradient linearizations carry a generation counter so staleness is
//! detectable (see [`nonlinear`]).

pub mod diagonal;
pub mod nonlinear;

use crate::kernels;
use crate::quadrature::ShapeTables;
use crate::restriction::ElementRestriction;
use crate::space::{Coefficient, TensorElementSpace};
use crate::storage::{Backend, Buffer, Layout};
use crate::Operator;
use nalgebra::DVector;
use rayon::iter::{IndexedParallelIterator, ParallelIterator};
use rayon::slice::{ParallelSlice, ParallelSliceMut};
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Assembly progress of a partially assembled operator.
///
/// `Assembled` carries a generation counter: every (re)computation of cached setup data
/// bumps it, so consumers can detect stale linearizations instead of silently assuming
/// the cache matches their state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Unassembled,
    Assembled { generation: u64 },
}

impl AssemblyState {
    pub fn generation(&self) -> Option<u64> {
        match *self {
            AssemblyState::Unassembled => None,
            AssemblyState::Assembled { generation } => Some(generation),
        }
    }
}

/// Invert a row-major `dim x dim` Jacobian. Writes the row-major inverse and returns the
/// determinant.
pub(crate) fn invert_jacobian(dim: usize, j: &[f64], inv: &mut [f64]) -> f64 {
    match dim {
        1 => {
            let det = j[0];
            inv[0] = 1.0 / det;
            det
        }
        2 => {
            let det = j[0] * j[3] - j[1] * j[2];
            let inv_det = 1.0 / det;
            inv[0] = j[3] * inv_det;
            inv[1] = -j[1] * inv_det;
            inv[2] = -j[2] * inv_det;
            inv[3] = j[0] * inv_det;
            det
        }
        3 => {
            let c00 = j[4] * j[8] - j[5] * j[7];
            let c01 = j[5] * j[6] - j[3] * j[8];
            let c02 = j[3] * j[7] - j[4] * j[6];
            let det = j[0] * c00 + j[1] * c01 + j[2] * c02;
            let inv_det = 1.0 / det;
            inv[0] = c00 * inv_det;
            inv[1] = (j[2] * j[7] - j[1] * j[8]) * inv_det;
            inv[2] = (j[1] * j[5] - j[2] * j[4]) * inv_det;
            inv[3] = c01 * inv_det;
            inv[4] = (j[0] * j[8] - j[2] * j[6]) * inv_det;
            inv[5] = (j[2] * j[3] - j[0] * j[5]) * inv_det;
            inv[6] = c02 * inv_det;
            inv[7] = (j[1] * j[6] - j[0] * j[7]) * inv_det;
            inv[8] = (j[0] * j[4] - j[1] * j[3]) * inv_det;
            det
        }
        _ => panic!("unsupported dimension {}", dim),
    }
}

/// Number of independent entries of a symmetric `dim x dim` tensor.
pub(crate) fn sym_size(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

/// Per-quadrature-point geometry factors shared by the nonlinear extensions: the
/// quadrature weight times the Jacobian determinant, and the row-major Jacobian inverse.
#[derive(Debug, Clone)]
pub(crate) struct GeometryCache {
    pub wdet: Vec<f64>,
    pub jinv: Vec<f64>,
}

impl GeometryCache {
    pub fn compute(space: &impl TensorElementSpace, shape: &ShapeTables) -> Self {
        let dim = space.dim();
        let ne = space.num_elements();
        let nq = shape.num_qpoints(dim);

        let mut wdet = vec![0.0; ne * nq];
        let mut jinv = vec![0.0; ne * nq * dim * dim];

        let mut j = [0.0; 9];
        let mut xi = [0.0; 3];
        for e in 0..ne {
            for q in 0..nq {
                shape.qpoint_coords(dim, q, &mut xi[..dim]);
                space.element_jacobian(e, &xi[..dim], &mut j[..dim * dim]);
                let base = (e * nq + q) * dim * dim;
                let det = invert_jacobian(dim, &j[..dim * dim], &mut jinv[base..base + dim * dim]);
                wdet[e * nq + q] = shape.qpoint_weight(dim, q) * det;
            }
        }

        Self { wdet, jinv }
    }
}

/// Scratch size for one element's quadrature-point gradient staging.
pub(crate) const MAX_GQ: usize = 3 * kernels::MAX_Q1D * kernels::MAX_Q1D * kernels::MAX_Q1D;

/// Per-quadrature-point setup tensors of the diffusion integrator for one element:
/// the symmetric `w det(J) c J^-1 J^-T`, upper triangle packed row by row, point-major.
///
/// Shared between the partially assembled operator and the full-assembly path so the two
/// assembly levels agree to machine precision.
pub(crate) fn diffusion_setup_element(
    space: &dyn TensorElementSpace,
    coefficient: &dyn Coefficient,
    shape: &ShapeTables,
    element: usize,
    out: &mut [f64],
) {
    let dim = space.dim();
    let nq = shape.num_qpoints(dim);
    let sym = sym_size(dim);
    debug_assert_eq!(out.len(), nq * sym);

    let mut j = [0.0; 9];
    let mut inv = [0.0; 9];
    let mut xi = [0.0; 3];
    for q in 0..nq {
        shape.qpoint_coords(dim, q, &mut xi[..dim]);
        space.element_jacobian(element, &xi[..dim], &mut j[..dim * dim]);
        let det = invert_jacobian(dim, &j[..dim * dim], &mut inv[..dim * dim]);
        let scale = shape.qpoint_weight(dim, q) * coefficient.evaluate(element, q) * det;

        let mut entry = 0;
        for r in 0..dim {
            for s in r..dim {
                let mut sum = 0.0;
                for k in 0..dim {
                    sum += inv[r * dim + k] * inv[s * dim + k];
                }
                out[q * sym + entry] = scale * sum;
                entry += 1;
            }
        }
    }
}

/// Contract quadrature-point gradients against packed symmetric tensors, in place.
pub(crate) fn diffusion_contract_qpoints(dim: usize, nq: usize, dq: &[f64], gq: &mut [f64]) {
    match dim {
        1 => {
            for q in 0..nq {
                gq[q] *= dq[q];
            }
        }
        2 => {
            for q in 0..nq {
                let d = &dq[3 * q..3 * q + 3];
                let g0 = gq[q];
                let g1 = gq[nq + q];
                gq[q] = d[0] * g0 + d[1] * g1;
                gq[nq + q] = d[1] * g0 + d[2] * g1;
            }
        }
        3 => {
            for q in 0..nq {
                let d = &dq[6 * q..6 * q + 6];
                let g0 = gq[q];
                let g1 = gq[nq + q];
                let g2 = gq[2 * nq + q];
                gq[q] = d[0] * g0 + d[1] * g1 + d[2] * g2;
                gq[nq + q] = d[1] * g0 + d[3] * g1 + d[4] * g2;
                gq[2 * nq + q] = d[2] * g0 + d[4] * g1 + d[5] * g2;
            }
        }
        _ => unreachable!(),
    }
}

/// One element of the diffusion apply pipeline: forward gradient kernel, pointwise
/// contraction, transpose kernel. Accumulates into `ye`.
pub(crate) fn diffusion_element_apply(
    dim: usize,
    d1d: usize,
    q1d: usize,
    b: &[f64],
    g: &[f64],
    dq: &[f64],
    xe: &[f64],
    ye: &mut [f64],
) {
    let nq = q1d.pow(dim as u32);
    let mut gq = [0.0_f64; MAX_GQ];
    let gq = &mut gq[..dim * nq];
    match dim {
        1 => {
            kernels::grad_1d(d1d, q1d, g, xe, gq);
            diffusion_contract_qpoints(dim, nq, dq, gq);
            kernels::grad_transpose_1d(d1d, q1d, g, gq, ye);
        }
        2 => {
            kernels::grad_2d(d1d, q1d, b, g, xe, gq);
            diffusion_contract_qpoints(dim, nq, dq, gq);
            kernels::grad_transpose_2d(d1d, q1d, b, g, gq, ye);
        }
        3 => {
            kernels::grad_3d(d1d, q1d, b, g, xe, gq);
            diffusion_contract_qpoints(dim, nq, dq, gq);
            kernels::grad_transpose_3d(d1d, q1d, b, g, gq, ye);
        }
        _ => unreachable!(),
    }
}

/// A partially assembled diffusion operator: the action of the stiffness matrix
/// `K_ij = integral of c grad(phi_i) . grad(phi_j)` evaluated matrix-free.
///
/// Setup data is created lazily on the first `apply`; `assemble` is idempotent. The lazy
/// first-use path is *not* thread-safe: concurrent first calls are undefined behavior in
/// the sense that the operator must be externally synchronized (the type is not `Sync`,
/// so the compiler enforces this).
pub struct PaDiffusion<S> {
    space: Arc<S>,
    coefficient: Arc<dyn Coefficient>,
    shape: ShapeTables,
    restriction: ElementRestriction,
    backend: Backend,
    state: Cell<AssemblyState>,
    /// Symmetric per-quadrature-point tensor `w det(J) c J^-1 J^-T`, packed
    /// element-major, then point-major, then the `sym_size(dim)` entries.
    dq: RefCell<Buffer<f64>>,
    xe: RefCell<Buffer<f64>>,
    ye: RefCell<Buffer<f64>>,
}

impl<S: TensorElementSpace> PaDiffusion<S> {
    pub fn new(
        space: Arc<S>,
        coefficient: Arc<dyn Coefficient>,
        q1d: usize,
        backend: Backend,
    ) -> Self {
        let shape = ShapeTables::new(space.dofs_1d(), q1d);
        let restriction = ElementRestriction::new(&*space, backend);
        let dim = space.dim();
        let ne = space.num_elements();
        let nq = shape.num_qpoints(dim);
        let local = restriction.local_size();

        Self {
            dq: RefCell::new(Buffer::from_layout(Layout::new(
                ne * nq * sym_size(dim),
                backend,
            ))),
            xe: RefCell::new(Buffer::from_layout(Layout::new(local, backend))),
            ye: RefCell::new(Buffer::from_layout(Layout::new(local, backend))),
            space,
            coefficient,
            shape,
            restriction,
            backend,
            state: Cell::new(AssemblyState::Unassembled),
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state.get()
    }

    pub fn restriction(&self) -> &ElementRestriction {
        &self.restriction
    }

    /// Host copy of the cached per-quadrature-point setup data (test hook).
    pub fn setup_data(&self) -> Vec<f64> {
        let dq = self.dq.borrow();
        let mut host = vec![0.0; dq.len()];
        dq.pull(&mut host);
        host
    }

    /// Precompute the per-quadrature-point geometry/coefficient tensors. Idempotent:
    /// a second call without input changes leaves the cache untouched.
    pub fn assemble(&self) {
        if let AssemblyState::Assembled { .. } = self.state.get() {
            return;
        }

        let dim = self.space.dim();
        let ne = self.space.num_elements();
        let nq = self.shape.num_qpoints(dim);
        let sym = sym_size(dim);

        let mut host = vec![0.0; ne * nq * sym];
        let space: &dyn TensorElementSpace = &*self.space;
        let coefficient = &*self.coefficient;
        let shape = &self.shape;

        if self.backend.parallelize(ne) {
            host.par_chunks_mut(nq * sym).enumerate().for_each(|(e, out)| {
                diffusion_setup_element(space, coefficient, shape, e, out)
            });
        } else {
            for (e, out) in host.chunks_mut(nq * sym).enumerate() {
                diffusion_setup_element(space, coefficient, shape, e, out);
            }
        }

        self.dq.borrow_mut().push(&host);
        self.state.set(AssemblyState::Assembled { generation: 1 });
        log::debug!(
            "assembled diffusion setup data: {} elements, {} quadrature points each",
            ne,
            nq
        );
    }
}

impl<S: TensorElementSpace> Operator for PaDiffusion<S> {
    fn size(&self) -> usize {
        self.space.num_dofs()
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        // Lazy setup on first use; see the type-level note on thread safety
        self.assemble();

        let dim = self.space.dim();
        let d1d = self.shape.d1d;
        let q1d = self.shape.q1d;
        let nq = self.shape.num_qpoints(dim);
        let dpe = self.restriction.dofs_per_element();
        let ne = self.restriction.num_elements();
        let sym = sym_size(dim);

        let mut xe = self.xe.borrow_mut();
        let mut ye = self.ye.borrow_mut();
        let dq = self.dq.borrow();

        self.restriction.gather(x.as_slice(), xe.as_mut_slice());
        ye.fill(0.0);

        let b = self.shape.b.as_slice();
        let g = self.shape.g.as_slice();
        let dq_all = dq.as_slice();

        if self.backend.parallelize(ne) {
            ye.as_mut_slice()
                .par_chunks_mut(dpe)
                .zip(xe.as_slice().par_chunks(dpe))
                .enumerate()
                .for_each(|(e, (ye_e, xe_e))| {
                    let dq_e = &dq_all[e * nq * sym..(e + 1) * nq * sym];
                    diffusion_element_apply(dim, d1d, q1d, b, g, dq_e, xe_e, ye_e);
                });
        } else {
            for (e, (ye_e, xe_e)) in ye
                .as_mut_slice()
                .chunks_mut(dpe)
                .zip(xe.as_slice().chunks(dpe))
                .enumerate()
            {
                let dq_e = &dq_all[e * nq * sym..(e + 1) * nq * sym];
                diffusion_element_apply(dim, d1d, q1d, b, g, dq_e, xe_e, ye_e);
            }
        }

        y.fill(0.0);
        self.restriction.scatter_add(ye.as_slice(), y.as_mut_slice());
    }

    /// The diffusion operator is symmetric.
    fn apply_transpose(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        self.apply(x, y);
    }

    fn assemble_diagonal(&self, diag: &mut DVector<f64>) {
        self.assemble();

        let dim = self.space.dim();
        let nq = self.shape.num_qpoints(dim);
        let dpe = self.restriction.dofs_per_element();
        let sym = sym_size(dim);

        let dq = self.dq.borrow();
        let dq_all = dq.as_slice();
        let mut ye = self.ye.borrow_mut();
        ye.fill(0.0);

        // Expand the symmetric packing to a full tensor per point and reuse the generic
        // per-element diagonal extraction
        let mut full = vec![0.0; nq * dim * dim];
        for (e, ye_e) in ye.as_mut_slice().chunks_mut(dpe).enumerate() {
            let dq_e = &dq_all[e * nq * sym..(e + 1) * nq * sym];
            for q in 0..nq {
                let mut entry = 0;
                for r in 0..dim {
                    for s in r..dim {
                        let value = dq_e[q * sym + entry];
                        full[q * dim * dim + r * dim + s] = value;
                        full[q * dim * dim + s * dim + r] = value;
                        entry += 1;
                    }
                }
            }
            diagonal::element_diagonal(
                dim,
                self.shape.d1d,
                self.shape.q1d,
                self.shape.b.as_slice(),
                self.shape.g.as_slice(),
                &full,
                ye_e,
            );
        }

        diag.fill(0.0);
        self.restriction.scatter_add(ye.as_slice(), diag.as_mut_slice());
    }
}
