use matfree::{
    AssemblyLevel, Backend, BilinearForm, CartesianTensorSpace, ConstantCoefficient, Operator,
    Restricted, SignedDof, TensorElementSpace,
};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::sync::Arc;

fn materialize(op: &dyn Operator) -> DMatrix<f64> {
    let n = op.size();
    let mut matrix = DMatrix::zeros(n, n);
    let mut x = DVector::zeros(n);
    let mut y = DVector::zeros(n);
    for j in 0..n {
        x.fill(0.0);
        x[j] = 1.0;
        op.apply(&x, &mut y);
        matrix.set_column(j, &y);
    }
    matrix
}

/// Bilinear 2 x 2 grid on the unit square; the harmonic function u(x, y) = x lies in the
/// discrete space, so the Galerkin solution with its boundary values is exact.
fn poisson_fixture() -> (Arc<CartesianTensorSpace>, Vec<usize>, DVector<f64>) {
    let space = Arc::new(CartesianTensorSpace::new(&[2, 2], &[1.0, 1.0], 1));
    let ess = space.boundary_dofs();
    // Node i sits at x = 0.5 * (i % 3)
    let exact = DVector::from_fn(space.num_dofs(), |i, _| 0.5 * (i % 3) as f64);
    (space, ess, exact)
}

#[test]
#[should_panic(expected = "unknown integrator 'mass'")]
fn unknown_integrator_name_aborts() {
    let space = Arc::new(CartesianTensorSpace::new(&[1, 1], &[1.0, 1.0], 1));
    let mut form = BilinearForm::new(space, 2, AssemblyLevel::Partial, Backend::Serial);
    form.add_integrator("mass", Arc::new(ConstantCoefficient(1.0)));
}

#[test]
fn full_assembly_solves_poisson_in_place() {
    let (space, ess, exact) = poisson_fixture();
    let mut form = BilinearForm::new(
        Arc::clone(&space),
        2,
        AssemblyLevel::Full,
        Backend::Serial,
    );
    form.add_integrator("diffusion", Arc::new(ConstantCoefficient(1.0)));

    // Boundary values from the exact solution, garbage in the interior
    let mut x = exact.clone();
    for i in 0..x.len() {
        if !ess.contains(&i) {
            x[i] = 9.0;
        }
    }
    let mut b = DVector::zeros(space.num_dofs());

    let (operator, mut x_t, b_t) = form.form_linear_system(&ess, &mut x, &mut b, false);

    // copy_interior = false discarded the garbage initial guess
    assert_eq!(x_t[4], 0.0);

    let matrix = operator
        .sparse_matrix()
        .unwrap_or_else(|| panic!("full assembly must expose its matrix"));
    let solution = DMatrix::from(matrix)
        .lu()
        .solve(&*b_t)
        .unwrap_or_else(|| panic!("constrained Poisson system must be solvable"));
    x_t.copy_from(&solution);

    // The aliased vectors already hold the solution in L-vector numbering
    assert!(form.recover_solution(&x_t).is_none());
    drop(x_t);
    drop(b_t);
    assert!((x - exact).norm() < 1e-11);
}

#[test]
fn partial_assembly_solves_poisson_in_place() {
    let (space, ess, exact) = poisson_fixture();
    let mut form = BilinearForm::new(
        Arc::clone(&space),
        2,
        AssemblyLevel::Partial,
        Backend::Serial,
    );
    form.add_integrator("diffusion", Arc::new(ConstantCoefficient(1.0)));

    let mut x = exact.clone();
    let mut b = DVector::zeros(space.num_dofs());
    let (operator, mut x_t, b_t) = form.form_linear_system(&ess, &mut x, &mut b, true);

    let solution = materialize(&operator)
        .lu()
        .solve(&*b_t)
        .unwrap_or_else(|| panic!("constrained Poisson system must be solvable"));
    x_t.copy_from(&solution);

    assert!(form.recover_solution(&x_t).is_none());
    drop(x_t);
    drop(b_t);
    assert!((x - exact).norm() < 1e-11);
}

/// A space carrying a (here trivial) prolongation forces the owned true-dof path:
/// restricted copies in, explicit recovery out.
struct ProlongatedSpace {
    inner: CartesianTensorSpace,
    p: CsrMatrix<f64>,
}

impl TensorElementSpace for ProlongatedSpace {
    fn dim(&self) -> usize {
        self.inner.dim()
    }
    fn num_elements(&self) -> usize {
        self.inner.num_elements()
    }
    fn num_dofs(&self) -> usize {
        self.inner.num_dofs()
    }
    fn dofs_1d(&self) -> usize {
        self.inner.dofs_1d()
    }
    fn populate_element_dofs(&self, out: &mut [SignedDof], element: usize) {
        self.inner.populate_element_dofs(out, element);
    }
    fn element_jacobian(&self, element: usize, xi: &[f64], out: &mut [f64]) {
        self.inner.element_jacobian(element, xi, out);
    }
    fn prolongation(&self) -> Option<&CsrMatrix<f64>> {
        Some(&self.p)
    }
}

#[test]
fn prolongated_space_takes_owned_path_and_recovers() {
    let inner = CartesianTensorSpace::new(&[2, 2], &[1.0, 1.0], 1);
    let ess = inner.boundary_dofs();
    let exact = DVector::from_fn(inner.num_dofs(), |i, _| 0.5 * (i % 3) as f64);
    let n = inner.num_dofs();
    let space = Arc::new(ProlongatedSpace {
        inner,
        p: CsrMatrix::identity(n),
    });

    let mut form = BilinearForm::new(
        Arc::clone(&space),
        2,
        AssemblyLevel::Partial,
        Backend::Serial,
    );
    form.add_integrator("diffusion", Arc::new(ConstantCoefficient(1.0)));

    let mut x = exact.clone();
    let mut b = DVector::zeros(n);
    let (operator, mut x_t, b_t) = form.form_linear_system(&ess, &mut x, &mut b, true);

    assert!(matches!(x_t, Restricted::Owned(_)));

    let solution = materialize(&operator)
        .lu()
        .solve(&*b_t)
        .unwrap_or_else(|| panic!("constrained Poisson system must be solvable"));
    x_t.copy_from(&solution);

    let recovered = form
        .recover_solution(&x_t)
        .unwrap_or_else(|| panic!("owned path must recover explicitly"));
    assert!((recovered - exact).norm() < 1e-11);
}

/// A prolongation that duplicates a true dof into several L-dofs (here: identifying the
/// two end nodes of a 1D grid) must not scale the prescribed value when the system is
/// restricted: `X` takes a row selection of `x`, not `Pᵗ x`.
#[test]
fn duplicated_true_dof_keeps_prescribed_value() {
    let inner = CartesianTensorSpace::new(&[2], &[2.0], 1);
    let n = inner.num_dofs();
    assert_eq!(n, 3);
    // Periodic identification: true dof 0 fans out to L-dofs 0 and 2
    let mut p = CooMatrix::new(n, 2);
    p.push(0, 0, 1.0);
    p.push(1, 1, 1.0);
    p.push(2, 0, 1.0);
    let space = Arc::new(ProlongatedSpace {
        inner,
        p: CsrMatrix::from(&p),
    });

    let mut form = BilinearForm::new(
        Arc::clone(&space),
        2,
        AssemblyLevel::Partial,
        Backend::Serial,
    );
    form.add_integrator("diffusion", Arc::new(ConstantCoefficient(1.0)));

    let mut x = DVector::from_vec(vec![2.0, 7.0, 2.0]);
    let mut b = DVector::zeros(n);
    let (operator, mut x_t, b_t) = form.form_linear_system(&[0], &mut x, &mut b, false);

    // The prescribed value arrives once, not once per duplicated L-dof
    assert_eq!(x_t[0], 2.0);
    assert_eq!(b_t[0], 2.0);

    let solution = materialize(&operator)
        .lu()
        .solve(&*b_t)
        .unwrap_or_else(|| panic!("constrained periodic system must be solvable"));
    x_t.copy_from(&solution);
    let recovered = form
        .recover_solution(&x_t)
        .unwrap_or_else(|| panic!("owned path must recover explicitly"));
    // Harmonic with both (identified) end values at 2: constant
    assert!((recovered - DVector::from_element(n, 2.0)).norm() < 1e-12);
}

#[test]
fn copy_interior_keeps_initial_guess() {
    let (space, ess, exact) = poisson_fixture();
    let mut form = BilinearForm::new(
        Arc::clone(&space),
        2,
        AssemblyLevel::Full,
        Backend::Serial,
    );
    form.add_integrator("diffusion", Arc::new(ConstantCoefficient(1.0)));

    let mut x = exact.clone();
    x[4] = 0.25;
    let mut b = DVector::zeros(space.num_dofs());
    let (_, x_t, _) = form.form_linear_system(&ess, &mut x, &mut b, true);
    assert_eq!(x_t[4], 0.25);
}
