use super::pseudo_random;
use matfree::kernels::{self, contract2d, contract3d, MAX_D1D, MAX_Q1D};
use matfree::quadrature::ShapeTables;
use matrixcompare::assert_scalar_eq;
use paste::paste;

/// The dispatcher routes these pairs to exact-size instantiations; the fallback
/// instantiation runs the same loops with larger staging arrays, so the two must agree
/// exactly.
macro_rules! specialized_matches_fallback {
    ($(($d1d:literal, $q1d:literal)),+ $(,)?) => {
        $(
            paste! {
                #[test]
                fn [<specialized_kernels_match_fallback_ $d1d _ $q1d>]() {
                    let (d1d, q1d) = ($d1d, $q1d);
                    let tables = ShapeTables::new(d1d, q1d);
                    let b = tables.b.as_slice();
                    let g = tables.g.as_slice();

                    // 2D
                    let x = pseudo_random(d1d * d1d, 17);
                    let nq = q1d * q1d;

                    let mut v_specialized = vec![0.0; nq];
                    kernels::eval_2d(d1d, q1d, b, &x, &mut v_specialized);
                    let mut v_fallback = vec![0.0; nq];
                    contract2d::eval::<MAX_D1D, MAX_Q1D>(d1d, q1d, b, &x, &mut v_fallback);
                    assert_eq!(v_specialized, v_fallback);

                    let mut gq_specialized = vec![0.0; 2 * nq];
                    kernels::grad_2d(d1d, q1d, b, g, &x, &mut gq_specialized);
                    let mut gq_fallback = vec![0.0; 2 * nq];
                    contract2d::grad::<MAX_D1D, MAX_Q1D>(d1d, q1d, b, g, &x, &mut gq_fallback);
                    assert_eq!(gq_specialized, gq_fallback);

                    // 3D
                    let x = pseudo_random(d1d * d1d * d1d, 31);
                    let nq = q1d * q1d * q1d;

                    let mut gq_specialized = vec![0.0; 3 * nq];
                    kernels::grad_3d(d1d, q1d, b, g, &x, &mut gq_specialized);
                    let mut gq_fallback = vec![0.0; 3 * nq];
                    contract3d::grad::<MAX_D1D, MAX_Q1D>(d1d, q1d, b, g, &x, &mut gq_fallback);
                    assert_eq!(gq_specialized, gq_fallback);
                }
            }
        )+
    };
}

specialized_matches_fallback!((2, 2), (2, 4), (3, 3), (3, 4), (4, 5), (5, 6));

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// <B x, v> == <x, B^T v> for the value interpolation, including a fallback-sized pair.
#[test]
fn eval_transpose_is_adjoint() {
    for &(d1d, q1d) in &[(2, 3), (3, 4), (6, 7)] {
        let tables = ShapeTables::new(d1d, q1d);
        let b = tables.b.as_slice();

        // 2D
        let x = pseudo_random(d1d * d1d, 5);
        let w = pseudo_random(q1d * q1d, 7);
        let mut v = vec![0.0; q1d * q1d];
        kernels::eval_2d(d1d, q1d, b, &x, &mut v);
        let mut y = vec![0.0; d1d * d1d];
        kernels::eval_transpose_2d(d1d, q1d, b, &w, &mut y);
        assert_scalar_eq!(dot(&v, &w), dot(&x, &y), comp = abs, tol = 1e-12);

        // 3D
        let x = pseudo_random(d1d * d1d * d1d, 11);
        let w = pseudo_random(q1d * q1d * q1d, 13);
        let mut v = vec![0.0; q1d * q1d * q1d];
        kernels::eval_3d(d1d, q1d, b, &x, &mut v);
        let mut y = vec![0.0; d1d * d1d * d1d];
        kernels::eval_transpose_3d(d1d, q1d, b, &w, &mut y);
        assert_scalar_eq!(dot(&v, &w), dot(&x, &y), comp = abs, tol = 1e-12);
    }
}

/// <G x, w> == <x, G^T w> for the gradient kernels.
#[test]
fn grad_transpose_is_adjoint() {
    for &(d1d, q1d) in &[(2, 2), (3, 5), (7, 8)] {
        let tables = ShapeTables::new(d1d, q1d);
        let b = tables.b.as_slice();
        let g = tables.g.as_slice();

        let nq = q1d * q1d;
        let x = pseudo_random(d1d * d1d, 3);
        let w = pseudo_random(2 * nq, 9);
        let mut gq = vec![0.0; 2 * nq];
        kernels::grad_2d(d1d, q1d, b, g, &x, &mut gq);
        let mut y = vec![0.0; d1d * d1d];
        kernels::grad_transpose_2d(d1d, q1d, b, g, &w, &mut y);
        assert_scalar_eq!(dot(&gq, &w), dot(&x, &y), comp = abs, tol = 1e-12);

        let nq = q1d * q1d * q1d;
        let x = pseudo_random(d1d * d1d * d1d, 23);
        let w = pseudo_random(3 * nq, 29);
        let mut gq = vec![0.0; 3 * nq];
        kernels::grad_3d(d1d, q1d, b, g, &x, &mut gq);
        let mut y = vec![0.0; d1d * d1d * d1d];
        kernels::grad_transpose_3d(d1d, q1d, b, g, &w, &mut y);
        assert_scalar_eq!(dot(&gq, &w), dot(&x, &y), comp = abs, tol = 1e-12);
    }
}

/// A constant dof field interpolates to the constant at every quadrature point.
#[test]
fn eval_reproduces_constants() {
    let (d1d, q1d) = (4, 5);
    let tables = ShapeTables::new(d1d, q1d);
    let b = tables.b.as_slice();

    let x = vec![3.25; d1d * d1d * d1d];
    let mut v = vec![0.0; q1d * q1d * q1d];
    kernels::eval_3d(d1d, q1d, b, &x, &mut v);
    for &value in &v {
        assert_scalar_eq!(value, 3.25, comp = abs, tol = 1e-13);
    }
}

#[test]
#[should_panic(expected = "exceeds the compiled maximum")]
fn oversized_kernel_request_aborts() {
    let (d1d, q1d) = (9, 9);
    let b = vec![0.0; d1d * q1d];
    let x = vec![0.0; d1d * d1d];
    let mut v = vec![0.0; q1d * q1d];
    kernels::eval_2d(d1d, q1d, &b, &x, &mut v);
}
