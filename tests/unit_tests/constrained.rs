use matfree::{ConstrainedOperator, DenseOperator, Operator};
use nalgebra::{DMatrix, DVector};
use proptest::prelude::*;
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

proptest! {
    /// With no constraints the wrapper is exactly the inner operator.
    #[test]
    fn empty_constraint_list_is_transparent(
        entries in proptest::collection::vec(-5.0..5.0f64, 16),
        x in proptest::collection::vec(-5.0..5.0f64, 4)
    ) {
        let a = DMatrix::from_row_slice(4, 4, &entries);
        let inner = DenseOperator::new(a.clone());
        let constrained = ConstrainedOperator::new(Arc::new(inner), vec![]);

        let x = DVector::from_vec(x);
        let mut y = DVector::zeros(4);
        constrained.apply(&x, &mut y);
        prop_assert!((y - a * x).norm() < 1e-12);
    }

    /// Constrained entries pass through unchanged.
    #[test]
    fn constrained_rows_act_as_identity(
        entries in proptest::collection::vec(-5.0..5.0f64, 16),
        x in proptest::collection::vec(-5.0..5.0f64, 4)
    ) {
        let a = DenseOperator::new(DMatrix::from_row_slice(4, 4, &entries));
        let constrained = ConstrainedOperator::new(Arc::new(a), vec![0, 2]);

        let x = DVector::from_vec(x);
        let mut y = DVector::zeros(4);
        constrained.apply(&x, &mut y);
        prop_assert_eq!(y[0], x[0]);
        prop_assert_eq!(y[2], x[2]);
    }
}

/// Solving the constrained system after `eliminate_rhs` reproduces the prescribed values
/// exactly and satisfies the original equations at the unconstrained rows.
#[test]
fn eliminate_rhs_then_solve_is_consistent() {
    let a = DMatrix::from_row_slice(4, 4, &[
        10.0, 1.0, 2.0, 0.0, //
        1.0, 8.0, 1.0, 1.0, //
        2.0, 1.0, 9.0, 2.0, //
        0.0, 1.0, 2.0, 7.0,
    ]);
    let constraints = vec![0usize, 3];
    let constrained = ConstrainedOperator::new(
        Arc::new(DenseOperator::new(a.clone())),
        constraints.clone(),
    );

    // Prescribed values at the constrained dofs; the rest of x is ignored
    let x = DVector::from_vec(vec![2.0, 0.0, 0.0, -1.5]);
    let b_original = DVector::from_vec(vec![1.0, 4.0, -2.0, 3.0]);
    let mut b = b_original.clone();
    constrained.eliminate_rhs(&x, &mut b);

    let solution = materialize(&constrained)
        .lu()
        .solve(&b)
        .unwrap_or_else(|| panic!("constrained system must be solvable"));

    assert!((solution[0] - 2.0).abs() < 1e-12);
    assert!((solution[3] + 1.5).abs() < 1e-12);

    // Unconstrained rows satisfy the original equations
    let residual = &a * &solution - &b_original;
    assert!(residual[1].abs() < 1e-11);
    assert!(residual[2].abs() < 1e-11);
}

#[test]
#[should_panic(expected = "constrained index out of bounds")]
fn out_of_bounds_constraint_aborts() {
    let a = DenseOperator::new(DMatrix::identity(3, 3));
    let _ = ConstrainedOperator::new(Arc::new(a), vec![3]);
}
