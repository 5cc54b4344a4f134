//! Contracts for the external mesh/space collaborators, plus a structured reference
//! implementation used by the tests.
//!
//! The operator engine never inspects mesh topology directly. Everything it needs from
//! the discretization is funneled through [`TensorElementSpace`]: element counts, the
//! signed global-to-local degree-of-freedom map, geometric Jacobians at reference
//! coordinates, and an optional conforming prolongation.

use nalgebra_sparse::CsrMatrix;

/// A global degree-of-freedom index together with an orientation sign.
///
/// Vector-valued conforming spaces (H(div)/H(curl) type) flip the sign of some shared
/// degrees of freedom between neighboring elements; the restriction operator applies the
/// flip on both gather and scatter. Nodal spaces always use [`SignedDof::plain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedDof {
    pub index: u32,
    pub flipped: bool,
}

impl SignedDof {
    pub fn plain(index: usize) -> Self {
        Self {
            index: index as u32,
            flipped: false,
        }
    }

    pub fn flipped(index: usize) -> Self {
        Self {
            index: index as u32,
            flipped: true,
        }
    }

    pub fn sign(&self) -> f64 {
        if self.flipped {
            -1.0
        } else {
            1.0
        }
    }
}

/// A scalar field evaluable at quadrature points, consumed opaquely by the integrators.
pub trait Coefficient: Send + Sync {
    fn evaluate(&self, element: usize, qpoint: usize) -> f64;
}

/// The constant-coefficient fast path.
#[derive(Debug, Clone, Copy)]
pub struct ConstantCoefficient(pub f64);

impl Coefficient for ConstantCoefficient {
    fn evaluate(&self, _element: usize, _qpoint: usize) -> f64 {
        self.0
    }
}

/// The narrow interface to the finite element space and mesh geometry.
///
/// Scalar-valued (one component per degree of freedom) tensor-product spaces: every
/// element has `dofs_1d()^dim()` local degrees of freedom in lexicographic order with the
/// first axis fastest, matching the layout expected by the contraction kernels.
pub trait TensorElementSpace: Send + Sync {
    /// Spatial dimension, 1 to 3.
    fn dim(&self) -> usize;

    /// Number of mesh elements.
    fn num_elements(&self) -> usize;

    /// Global (L-vector) degree-of-freedom count.
    fn num_dofs(&self) -> usize;

    /// Number of degrees of freedom along one axis of an element (`D1D`).
    fn dofs_1d(&self) -> usize;

    fn dofs_per_element(&self) -> usize {
        self.dofs_1d().pow(self.dim() as u32)
    }

    /// Write the signed global indices of the element's degrees of freedom, in local
    /// lexicographic order. `out` has length [`TensorElementSpace::dofs_per_element`].
    fn populate_element_dofs(&self, out: &mut [SignedDof], element: usize);

    /// Jacobian of the reference-to-physical map of `element` at reference coordinates
    /// `xi` (in `[-1, 1]^dim`). Writes a row-major `dim x dim` matrix into `out`.
    fn element_jacobian(&self, element: usize, xi: &[f64], out: &mut [f64]);

    /// Conforming prolongation from true degrees of freedom to the L-vector, if the
    /// space is non-conforming or constrained. `None` means the identity.
    fn prolongation(&self) -> Option<&CsrMatrix<f64>> {
        None
    }
}

/// An axis-aligned structured grid of tensor-product elements of arbitrary polynomial
/// degree, with continuous nodal (Lagrange) unknowns.
///
/// This is the reference implementation of [`TensorElementSpace`]: orientation-free,
/// constant diagonal Jacobians, no prolongation. It doubles as the mesh fixture for the
/// integration tests.
#[derive(Debug, Clone)]
pub struct CartesianTensorSpace {
    dim: usize,
    cells: Vec<usize>,
    degree: usize,
    // Half cell edge length per axis: the Jacobian of [-1, 1] -> cell
    half_widths: Vec<f64>,
    // Nodes per axis of the global lexicographic numbering
    nodes_per_axis: Vec<usize>,
}

impl CartesianTensorSpace {
    /// A grid covering `[0, lengths[a]]` along each axis `a` with `cells[a]` equal cells
    /// and polynomial degree `degree` per element.
    ///
    /// # Panics
    ///
    /// Panics for zero cells, zero degree or a dimension outside 1..=3.
    pub fn new(cells: &[usize], lengths: &[f64], degree: usize) -> Self {
        let dim = cells.len();
        assert!((1..=3).contains(&dim), "dimension must be 1, 2 or 3");
        assert_eq!(lengths.len(), dim);
        assert!(degree >= 1, "polynomial degree must be at least 1");
        assert!(cells.iter().all(|&c| c > 0), "each axis needs at least one cell");

        let half_widths = cells
            .iter()
            .zip(lengths)
            .map(|(&c, &l)| 0.5 * l / c as f64)
            .collect();
        let nodes_per_axis = cells.iter().map(|&c| degree * c + 1).collect();

        Self {
            dim,
            cells: cells.to_vec(),
            degree,
            half_widths,
            nodes_per_axis,
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Global indices of all boundary nodes, ascending. Convenient for essential
    /// boundary conditions in tests and examples.
    pub fn boundary_dofs(&self) -> Vec<usize> {
        let mut dofs = Vec::new();
        'dof: for dof in 0..self.num_dofs() {
            let mut rem = dof;
            for axis in 0..self.dim {
                let n = self.nodes_per_axis[axis];
                let i = rem % n;
                rem /= n;
                if i == 0 || i + 1 == n {
                    dofs.push(dof);
                    continue 'dof;
                }
            }
        }
        dofs
    }
}

impl TensorElementSpace for CartesianTensorSpace {
    fn dim(&self) -> usize {
        self.dim
    }

    fn num_elements(&self) -> usize {
        self.cells.iter().product()
    }

    fn num_dofs(&self) -> usize {
        self.nodes_per_axis.iter().product()
    }

    fn dofs_1d(&self) -> usize {
        self.degree + 1
    }

    fn populate_element_dofs(&self, out: &mut [SignedDof], element: usize) {
        assert_eq!(out.len(), self.dofs_per_element());
        let d1d = self.dofs_1d();

        // Cell coordinates, first axis fastest
        let mut cell = [0usize; 3];
        let mut rem = element;
        for axis in 0..self.dim {
            cell[axis] = rem % self.cells[axis];
            rem /= self.cells[axis];
        }

        for (local, slot) in out.iter_mut().enumerate() {
            let mut rem = local;
            let mut global = 0;
            let mut stride = 1;
            for axis in 0..self.dim {
                let local_axis = rem % d1d;
                rem /= d1d;
                let global_axis = cell[axis] * self.degree + local_axis;
                global += stride * global_axis;
                stride *= self.nodes_per_axis[axis];
            }
            *slot = SignedDof::plain(global);
        }
    }

    fn element_jacobian(&self, _element: usize, _xi: &[f64], out: &mut [f64]) {
        assert_eq!(out.len(), self.dim * self.dim);
        out.fill(0.0);
        for axis in 0..self.dim {
            out[axis * self.dim + axis] = self.half_widths[axis];
        }
    }
}
