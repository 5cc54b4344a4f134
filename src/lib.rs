//! Matrix-free finite element operator evaluation for tensor-product elements.
//!
//! This crate implements the *partial assembly* approach to finite element operators:
//! instead of assembling a global sparse matrix, an operator precomputes only
//! per-quadrature-point geometry/coefficient data and evaluates its action through
//! sum-factorized tensor contractions. The building blocks are
//!
//! - [`storage`]: backend-tagged buffers with grow-only allocations,
//! - [`quadrature`]: 1D Gauss rules and Lagrange shape tables,
//! - [`space`]: the [`TensorElementSpace`] contract to the mesh/discretization,
//! - [`kernels`]: the sum-factorized contraction kernels,
//! - [`restriction`]: race-free gather/scatter between global and element-local vectors,
//! - [`pa`]: partially assembled linear and nonlinear operators,
//! - [`constrained`]: essential-boundary-condition wrappers,
//! - [`form`]: the bilinear form driver tying everything together.
//!
//! The crate deliberately stops below the solver layer: everything it produces is an
//! [`Operator`], and iterative solvers are expected to consume that trait.

pub mod constrained;
pub mod form;
pub mod kernels;
pub mod operator;
pub mod pa;
pub mod quadrature;
pub mod restriction;
pub mod space;
pub mod storage;

pub use constrained::{ConstrainedOperator, RapOperator};
pub use form::{AssemblyLevel, BilinearForm, Restricted, SystemOperator};
pub use operator::{CsrOperator, DenseOperator, Operator};
pub use pa::nonlinear::{DiffusionFlux, FluxIntegrator, GradientOperator, PaNonlinearForm};
pub use pa::{AssemblyState, PaDiffusion};
pub use quadrature::ShapeTables;
pub use restriction::ElementRestriction;
pub use space::{
    CartesianTensorSpace, Coefficient, ConstantCoefficient, SignedDof, TensorElementSpace,
};
pub use storage::{Backend, Buffer, Layout};
