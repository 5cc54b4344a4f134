//! Matrix-free nonlinear forms and their linearizations.
//!
//! A nonlinear form evaluates a residual whose quadrature-point physics is supplied by a
//! [`FluxIntegrator`]: the integrator maps a *physical* solution gradient to a flux, its
//! derivative, and an energy density. The form owns a single reusable
//! [`GradientOperator`]; `assemble_gradient` relinearizes it in place at a new state and
//! bumps its generation counter, so handles obtained earlier observe the refreshed
//! linearization rather than a stale copy.

use crate::kernels;
use crate::pa::{invert_jacobian, AssemblyState, GeometryCache, MAX_GQ};
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

/// Pointwise physics of a gradient-based nonlinear form.
///
/// All gradients are *physical* (the reference-to-physical pullback is handled by the
/// form), with `dim` components.
pub trait FluxIntegrator: Send + Sync {
    /// Flux `P(grad u)` at a quadrature point. Writes `dim` entries.
    fn flux(&self, element: usize, qpoint: usize, grad: &[f64], flux: &mut [f64]);

    /// Derivative `dP/d(grad u)`, row-major `dim x dim`.
    fn flux_derivative(&self, element: usize, qpoint: usize, grad: &[f64], deriv: &mut [f64]);

    /// Energy density whose gradient-variation is the flux.
    fn energy_density(&self, element: usize, qpoint: usize, grad: &[f64]) -> f64;
}

/// The linear diffusion flux `P(g) = c g`, used to cross-check the nonlinear pipeline
/// against the partially assembled linear operator.
pub struct DiffusionFlux {
    coefficient: Arc<dyn Coefficient>,
}

impl DiffusionFlux {
    pub fn new(coefficient: Arc<dyn Coefficient>) -> Self {
        Self { coefficient }
    }
}

impl FluxIntegrator for DiffusionFlux {
    fn flux(&self, element: usize, qpoint: usize, grad: &[f64], flux: &mut [f64]) {
        let c = self.coefficient.evaluate(element, qpoint);
        for (f, g) in flux.iter_mut().zip(grad) {
            *f = c * g;
        }
    }

    fn flux_derivative(&self, element: usize, qpoint: usize, grad: &[f64], deriv: &mut [f64]) {
        let c = self.coefficient.evaluate(element, qpoint);
        let dim = grad.len();
        deriv.fill(0.0);
        for r in 0..dim {
            deriv[r * dim + r] = c;
        }
    }

    fn energy_density(&self, element: usize, qpoint: usize, grad: &[f64]) -> f64 {
        let c = self.coefficient.evaluate(element, qpoint);
        0.5 * c * grad.iter().map(|g| g * g).sum::<f64>()
    }
}

/// The linearization of a [`PaNonlinearForm`] at a particular state.
///
/// Holds a full (generally non-symmetric) `dim x dim` tensor per quadrature point,
/// `A = w det(J) J^-1 dP J^-T`, recomputed in place by `assemble_gradient`. The
/// generation counter identifies which linearization the cached tensors belong to;
/// applying an operator that was never assembled is a call-site error and panics.
pub struct GradientOperator {
    dim: usize,
    d1d: usize,
    q1d: usize,
    num_dofs: usize,
    shape: Arc<ShapeTables>,
    restriction: Arc<ElementRestriction>,
    backend: Backend,
    a: RefCell<Buffer<f64>>,
    generation: Cell<u64>,
    xe: RefCell<Buffer<f64>>,
    ye: RefCell<Buffer<f64>>,
}

impl GradientOperator {
    fn new(
        dim: usize,
        num_dofs: usize,
        shape: Arc<ShapeTables>,
        restriction: Arc<ElementRestriction>,
        backend: Backend,
    ) -> Self {
        let nq = shape.num_qpoints(dim);
        let ne = restriction.num_elements();
        let local = restriction.local_size();
        Self {
            dim,
            d1d: shape.d1d,
            q1d: shape.q1d,
            num_dofs,
            a: RefCell::new(Buffer::from_layout(Layout::new(ne * nq * dim * dim, backend))),
            xe: RefCell::new(Buffer::from_layout(Layout::new(local, backend))),
            ye: RefCell::new(Buffer::from_layout(Layout::new(local, backend))),
            shape,
            restriction,
            backend,
            generation: Cell::new(0),
        }
    }

    /// Which linearization the cached tensors belong to. Zero means "never assembled".
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn apply_element(
        dim: usize,
        d1d: usize,
        q1d: usize,
        b: &[f64],
        g: &[f64],
        a: &[f64],
        xe: &[f64],
        ye: &mut [f64],
    ) {
        let nq = q1d.pow(dim as u32);
        let mut gq = [0.0_f64; MAX_GQ];
        let gq = &mut gq[..dim * nq];
        let mut grad = [0.0_f64; 3];
        let mut out = [0.0_f64; 3];

        let mut forward = |gq: &mut [f64]| {
            for q in 0..nq {
                let a_q = &a[q * dim * dim..(q + 1) * dim * dim];
                for c in 0..dim {
                    grad[c] = gq[c * nq + q];
                }
                for r in 0..dim {
                    let mut sum = 0.0;
                    for s in 0..dim {
                        sum += a_q[r * dim + s] * grad[s];
                    }
                    out[r] = sum;
                }
                for c in 0..dim {
                    gq[c * nq + q] = out[c];
                }
            }
        };

        match dim {
            1 => {
                kernels::grad_1d(d1d, q1d, g, xe, gq);
                forward(gq);
                kernels::grad_transpose_1d(d1d, q1d, g, gq, ye);
            }
            2 => {
                kernels::grad_2d(d1d, q1d, b, g, xe, gq);
                forward(gq);
                kernels::grad_transpose_2d(d1d, q1d, b, g, gq, ye);
            }
            3 => {
                kernels::grad_3d(d1d, q1d, b, g, xe, gq);
                forward(gq);
                kernels::grad_transpose_3d(d1d, q1d, b, g, gq, ye);
            }
            _ => unreachable!(),
        }
    }
}

impl Operator for GradientOperator {
    fn size(&self) -> usize {
        self.num_dofs
    }

    fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        assert!(
            self.generation.get() > 0,
            "gradient operator applied before any linearization was assembled"
        );

        let dim = self.dim;
        let nq = self.shape.num_qpoints(dim);
        let dpe = self.restriction.dofs_per_element();
        let ne = self.restriction.num_elements();
        let block = nq * dim * dim;

        let mut xe = self.xe.borrow_mut();
        let mut ye = self.ye.borrow_mut();
        let a = self.a.borrow();

        self.restriction.gather(x.as_slice(), xe.as_mut_slice());
        ye.fill(0.0);

        let b = self.shape.b.as_slice();
        let g = self.shape.g.as_slice();
        let a_all = a.as_slice();
        let (d1d, q1d) = (self.d1d, self.q1d);

        if self.backend.parallelize(ne) {
            ye.as_mut_slice()
                .par_chunks_mut(dpe)
                .zip(xe.as_slice().par_chunks(dpe))
                .enumerate()
                .for_each(|(e, (ye_e, xe_e))| {
                    let a_e = &a_all[e * block..(e + 1) * block];
                    Self::apply_element(dim, d1d, q1d, b, g, a_e, xe_e, ye_e);
                });
        } else {
            for (e, (ye_e, xe_e)) in ye
                .as_mut_slice()
                .chunks_mut(dpe)
                .zip(xe.as_slice().chunks(dpe))
                .enumerate()
            {
                let a_e = &a_all[e * block..(e + 1) * block];
                Self::apply_element(dim, d1d, q1d, b, g, a_e, xe_e, ye_e);
            }
        }

        y.fill(0.0);
        self.restriction.scatter_add(ye.as_slice(), y.as_mut_slice());
    }

    fn assemble_diagonal(&self, diag: &mut DVector<f64>) {
        assert!(
            self.generation.get() > 0,
            "gradient diagonal requested before any linearization was assembled"
        );

        let dim = self.dim;
        let nq = self.shape.num_qpoints(dim);
        let dpe = self.restriction.dofs_per_element();
        let block = nq * dim * dim;

        let a = self.a.borrow();
        let a_all = a.as_slice();
        let mut ye = self.ye.borrow_mut();
        ye.fill(0.0);

        for (e, ye_e) in ye.as_mut_slice().chunks_mut(dpe).enumerate() {
            super::diagonal::element_diagonal(
                dim,
                self.d1d,
                self.q1d,
                self.shape.b.as_slice(),
                self.shape.g.as_slice(),
                &a_all[e * block..(e + 1) * block],
                ye_e,
            );
        }

        diag.fill(0.0);
        self.restriction.scatter_add(ye.as_slice(), diag.as_mut_slice());
    }
}

/// A partially assembled nonlinear form: residual evaluation, energy, and in-place
/// relinearization, all matrix-free.
pub struct PaNonlinearForm<S, I> {
    space: Arc<S>,
    integrator: Arc<I>,
    shape: Arc<ShapeTables>,
    restriction: Arc<ElementRestriction>,
    backend: Backend,
    state: Cell<AssemblyState>,
    geometry: RefCell<Option<GeometryCache>>,
    gradient: Arc<GradientOperator>,
    xe: RefCell<Buffer<f64>>,
    ye: RefCell<Buffer<f64>>,
}

impl<S: TensorElementSpace, I: FluxIntegrator> PaNonlinearForm<S, I> {
    pub fn new(space: Arc<S>, integrator: Arc<I>, q1d: usize, backend: Backend) -> Self {
        let shape = Arc::new(ShapeTables::new(space.dofs_1d(), q1d));
        let restriction = Arc::new(ElementRestriction::new(&*space, backend));
        let local = restriction.local_size();
        let gradient = Arc::new(GradientOperator::new(
            space.dim(),
            space.num_dofs(),
            Arc::clone(&shape),
            Arc::clone(&restriction),
            backend,
        ));

        Self {
            xe: RefCell::new(Buffer::from_layout(Layout::new(local, backend))),
            ye: RefCell::new(Buffer::from_layout(Layout::new(local, backend))),
            space,
            integrator,
            shape,
            restriction,
            backend,
            state: Cell::new(AssemblyState::Unassembled),
            geometry: RefCell::new(None),
            gradient,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state.get()
    }

    /// Precompute the geometry factors. Idempotent.
    pub fn assemble(&self) {
        if let AssemblyState::Assembled { .. } = self.state.get() {
            return;
        }
        *self.geometry.borrow_mut() = Some(GeometryCache::compute(&*self.space, &self.shape));
        self.state.set(AssemblyState::Assembled { generation: 0 });
        log::debug!(
            "assembled nonlinear form geometry: {} elements",
            self.space.num_elements()
        );
    }

    /// Evaluate the residual `y = F(x)`.
    pub fn apply(&self, x: &DVector<f64>, y: &mut DVector<f64>) {
        self.assemble();

        let dim = self.space.dim();
        let nq = self.shape.num_qpoints(dim);
        let dpe = self.restriction.dofs_per_element();
        let ne = self.restriction.num_elements();

        let mut xe = self.xe.borrow_mut();
        let mut ye = self.ye.borrow_mut();
        let geometry_ref = self.geometry.borrow();
        let geometry = geometry_ref.as_ref().unwrap_or_else(|| unreachable!());

        self.restriction.gather(x.as_slice(), xe.as_mut_slice());
        ye.fill(0.0);

        let b = self.shape.b.as_slice();
        let g = self.shape.g.as_slice();
        let integrator = &*self.integrator;
        let (d1d, q1d) = (self.shape.d1d, self.shape.q1d);

        let residual_element = |e: usize, xe_e: &[f64], ye_e: &mut [f64]| {
            let mut gq = [0.0_f64; MAX_GQ];
            let gq = &mut gq[..dim * nq];
            match dim {
                1 => kernels::grad_1d(d1d, q1d, g, xe_e, gq),
                2 => kernels::grad_2d(d1d, q1d, b, g, xe_e, gq),
                3 => kernels::grad_3d(d1d, q1d, b, g, xe_e, gq),
                _ => unreachable!(),
            }

            let mut gphys = [0.0_f64; 3];
            let mut flux = [0.0_f64; 3];
            for q in 0..nq {
                let point = e * nq + q;
                let jinv = &geometry.jinv[point * dim * dim..(point + 1) * dim * dim];
                let wdet = geometry.wdet[point];

                // Pull the reference gradient back to physical space: g_phys = J^-T g_ref
                for r in 0..dim {
                    let mut sum = 0.0;
                    for c in 0..dim {
                        sum += jinv[c * dim + r] * gq[c * nq + q];
                    }
                    gphys[r] = sum;
                }

                integrator.flux(e, q, &gphys[..dim], &mut flux[..dim]);

                // Push the flux forward to reference space, scaled by the measure
                for r in 0..dim {
                    let mut sum = 0.0;
                    for c in 0..dim {
                        sum += jinv[r * dim + c] * flux[c];
                    }
                    gq[r * nq + q] = wdet * sum;
                }
            }

            match dim {
                1 => kernels::grad_transpose_1d(d1d, q1d, g, gq, ye_e),
                2 => kernels::grad_transpose_2d(d1d, q1d, b, g, gq, ye_e),
                3 => kernels::grad_transpose_3d(d1d, q1d, b, g, gq, ye_e),
                _ => unreachable!(),
            }
        };

        if self.backend.parallelize(ne) {
            ye.as_mut_slice()
                .par_chunks_mut(dpe)
                .zip(xe.as_slice().par_chunks(dpe))
                .enumerate()
                .for_each(|(e, (ye_e, xe_e))| residual_element(e, xe_e, ye_e));
        } else {
            for (e, (ye_e, xe_e)) in ye
                .as_mut_slice()
                .chunks_mut(dpe)
                .zip(xe.as_slice().chunks(dpe))
                .enumerate()
            {
                residual_element(e, xe_e, ye_e);
            }
        }

        y.fill(0.0);
        self.restriction.scatter_add(ye.as_slice(), y.as_mut_slice());
    }

    /// Total stored energy at the state `x`.
    ///
    /// Pure: neither the state vector nor any cached data is modified, and the geometry
    /// is evaluated on the fly so the call works on an unassembled form.
    pub fn energy(&self, x: &DVector<f64>) -> f64 {
        let dim = self.space.dim();
        let nq = self.shape.num_qpoints(dim);
        let dpe = self.restriction.dofs_per_element();

        let mut xe = vec![0.0; self.restriction.local_size()];
        self.restriction.gather(x.as_slice(), &mut xe);

        let b = self.shape.b.as_slice();
        let g = self.shape.g.as_slice();
        let (d1d, q1d) = (self.shape.d1d, self.shape.q1d);

        let mut total = 0.0;
        let mut gq = [0.0_f64; MAX_GQ];
        let mut j = [0.0_f64; 9];
        let mut jinv = [0.0_f64; 9];
        let mut xi = [0.0_f64; 3];
        let mut gphys = [0.0_f64; 3];
        for (e, xe_e) in xe.chunks(dpe).enumerate() {
            let gq = &mut gq[..dim * nq];
            match dim {
                1 => kernels::grad_1d(d1d, q1d, g, xe_e, gq),
                2 => kernels::grad_2d(d1d, q1d, b, g, xe_e, gq),
                3 => kernels::grad_3d(d1d, q1d, b, g, xe_e, gq),
                _ => unreachable!(),
            }
            for q in 0..nq {
                self.shape.qpoint_coords(dim, q, &mut xi[..dim]);
                self.space.element_jacobian(e, &xi[..dim], &mut j[..dim * dim]);
                let det = invert_jacobian(dim, &j[..dim * dim], &mut jinv[..dim * dim]);
                for r in 0..dim {
                    let mut sum = 0.0;
                    for c in 0..dim {
                        sum += jinv[c * dim + r] * gq[c * nq + q];
                    }
                    gphys[r] = sum;
                }
                total += self.shape.qpoint_weight(dim, q)
                    * det
                    * self.integrator.energy_density(e, q, &gphys[..dim]);
            }
        }
        total
    }

    /// Relinearize the gradient operator at the state `x`, in place, and bump its
    /// generation.
    pub fn assemble_gradient(&self, x: &DVector<f64>) {
        self.assemble();

        let dim = self.space.dim();
        let nq = self.shape.num_qpoints(dim);
        let dpe = self.restriction.dofs_per_element();
        let ne = self.restriction.num_elements();
        let block = nq * dim * dim;

        let mut xe = self.xe.borrow_mut();
        let geometry_ref = self.geometry.borrow();
        let geometry = geometry_ref.as_ref().unwrap_or_else(|| unreachable!());

        self.restriction.gather(x.as_slice(), xe.as_mut_slice());

        let b = self.shape.b.as_slice();
        let g = self.shape.g.as_slice();
        let integrator = &*self.integrator;
        let (d1d, q1d) = (self.shape.d1d, self.shape.q1d);

        let mut host = vec![0.0; ne * block];

        let linearize_element = |e: usize, xe_e: &[f64], a_e: &mut [f64]| {
            let mut gq = [0.0_f64; MAX_GQ];
            let gq = &mut gq[..dim * nq];
            match dim {
                1 => kernels::grad_1d(d1d, q1d, g, xe_e, gq),
                2 => kernels::grad_2d(d1d, q1d, b, g, xe_e, gq),
                3 => kernels::grad_3d(d1d, q1d, b, g, xe_e, gq),
                _ => unreachable!(),
            }

            let mut gphys = [0.0_f64; 3];
            let mut deriv = [0.0_f64; 9];
            for q in 0..nq {
                let point = e * nq + q;
                let jinv = &geometry.jinv[point * dim * dim..(point + 1) * dim * dim];
                let wdet = geometry.wdet[point];

                for r in 0..dim {
                    let mut sum = 0.0;
                    for c in 0..dim {
                        sum += jinv[c * dim + r] * gq[c * nq + q];
                    }
                    gphys[r] = sum;
                }

                integrator.flux_derivative(e, q, &gphys[..dim], &mut deriv[..dim * dim]);

                // A = w det(J) J^-1 dP J^-T
                let a_q = &mut a_e[q * dim * dim..(q + 1) * dim * dim];
                for r in 0..dim {
                    for s in 0..dim {
                        let mut sum = 0.0;
                        for i in 0..dim {
                            for k in 0..dim {
                                sum += jinv[r * dim + i] * deriv[i * dim + k] * jinv[s * dim + k];
                            }
                        }
                        a_q[r * dim + s] = wdet * sum;
                    }
                }
            }
        };

        if self.backend.parallelize(ne) {
            host.par_chunks_mut(block)
                .zip(xe.as_slice().par_chunks(dpe))
                .enumerate()
                .for_each(|(e, (a_e, xe_e))| linearize_element(e, xe_e, a_e));
        } else {
            for (e, (a_e, xe_e)) in host
                .chunks_mut(block)
                .zip(xe.as_slice().chunks(dpe))
                .enumerate()
            {
                linearize_element(e, xe_e, a_e);
            }
        }

        self.gradient.a.borrow_mut().push(&host);
        let generation = self.gradient.generation.get() + 1;
        self.gradient.generation.set(generation);
        self.state.set(AssemblyState::Assembled { generation });
        log::debug!("assembled gradient linearization, generation {}", generation);
    }

    /// The gradient operator linearized at `x`. The returned handle is the form's single
    /// reusable linearization; a later `assemble_gradient` updates it in place.
    pub fn gradient(&self, x: &DVector<f64>) -> Arc<GradientOperator> {
        self.assemble_gradient(x);
        Arc::clone(&self.gradient)
    }
}
