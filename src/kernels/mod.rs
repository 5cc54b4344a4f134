//! Sum-factorized tensor-contraction kernels.
//!
//! Each kernel maps per-element degree-of-freedom tensors to quadrature-point data (or
//! back, for the transpose variants) one spatial dimension at a time, avoiding the cost
//! of a dense contraction. The kernels are monomorphized over compile-time bounds
//! `(MD1, MQ1)` for their stack-allocated staging arrays while looping over the *runtime*
//! sizes `(d1d, q1d)`; the dispatchers below instantiate exact-size versions for the
//! common low-order pairs and fall back to a single maximum-size instantiation for
//! everything else, up to a hard cap.
//!
//! Shared data layout conventions (all `f64`, see [`crate::quadrature::ShapeTables`]):
//!
//! - basis tables `b`, `g`: shape `(q1d, d1d)`, `q` fastest;
//! - dof tensors `x`, `y`: lexicographic, first axis fastest (`x[dx + d1d * dy]` in 2D);
//! - quadrature values: lexicographic (`v[qx + q1d * qy]`);
//! - quadrature gradients: component-major, `gq[c * num_qpoints + q]`.
//!
//! Transpose kernels *accumulate* into their output so that several integrators can add
//! their contributions to the same E-vector.

pub mod contract1d;
pub mod contract2d;
pub mod contract3d;

/// Hard cap on the 1D degree-of-freedom count. Exceeding it is a fatal configuration
/// error, not a runtime condition.
pub const MAX_D1D: usize = 8;
/// Hard cap on the 1D quadrature-point count.
pub const MAX_Q1D: usize = 8;

/// Statically instantiated `(d1d, q1d)` pairs, used by the dispatchers below and by the
/// specialized-versus-fallback comparison tests.
pub const SPECIALIZED_PAIRS: &[(usize, usize)] = &[
    (2, 2),
    (2, 3),
    (2, 4),
    (2, 5),
    (2, 6),
    (3, 2),
    (3, 3),
    (3, 4),
    (3, 5),
    (3, 6),
    (4, 2),
    (4, 3),
    (4, 4),
    (4, 5),
    (4, 6),
    (5, 2),
    (5, 3),
    (5, 4),
    (5, 5),
    (5, 6),
];

/// Dispatch a kernel to an exact-size instantiation for the specialized `(d1d, q1d)`
/// pairs, or to the maximum-size fallback instantiation otherwise.
///
/// The kernel is matched as `module :: function` (two `ident` fragments) so the
/// expansion can append the turbofish, which a `path` fragment would not permit.
macro_rules! dispatch_kernel {
    ($module:ident :: $func:ident, $d1d:expr, $q1d:expr, ($($args:expr),* $(,)?)) => {{
        let (d1d, q1d) = ($d1d, $q1d);
        match (d1d, q1d) {
            (2, 2) => $module::$func::<2, 2>(2, 2, $($args),*),
            (2, 3) => $module::$func::<2, 3>(2, 3, $($args),*),
            (2, 4) => $module::$func::<2, 4>(2, 4, $($args),*),
            (2, 5) => $module::$func::<2, 5>(2, 5, $($args),*),
            (2, 6) => $module::$func::<2, 6>(2, 6, $($args),*),
            (3, 2) => $module::$func::<3, 2>(3, 2, $($args),*),
            (3, 3) => $module::$func::<3, 3>(3, 3, $($args),*),
            (3, 4) => $module::$func::<3, 4>(3, 4, $($args),*),
            (3, 5) => $module::$func::<3, 5>(3, 5, $($args),*),
            (3, 6) => $module::$func::<3, 6>(3, 6, $($args),*),
            (4, 2) => $module::$func::<4, 2>(4, 2, $($args),*),
            (4, 3) => $module::$func::<4, 3>(4, 3, $($args),*),
            (4, 4) => $module::$func::<4, 4>(4, 4, $($args),*),
            (4, 5) => $module::$func::<4, 5>(4, 5, $($args),*),
            (4, 6) => $module::$func::<4, 6>(4, 6, $($args),*),
            (5, 2) => $module::$func::<5, 2>(5, 2, $($args),*),
            (5, 3) => $module::$func::<5, 3>(5, 3, $($args),*),
            (5, 4) => $module::$func::<5, 4>(5, 4, $($args),*),
            (5, 5) => $module::$func::<5, 5>(5, 5, $($args),*),
            (5, 6) => $module::$func::<5, 6>(5, 6, $($args),*),
            _ => {
                assert!(
                    d1d <= MAX_D1D && q1d <= MAX_Q1D,
                    "tensor kernel size (D1D = {}, Q1D = {}) exceeds the compiled maximum \
                     (MAX_D1D = {}, MAX_Q1D = {})",
                    d1d,
                    q1d,
                    MAX_D1D,
                    MAX_Q1D
                );
                $module::$func::<MAX_D1D, MAX_Q1D>(d1d, q1d, $($args),*)
            }
        }
    }};
}

/// Values at quadrature points, 2D.
pub fn eval_2d(d1d: usize, q1d: usize, b: &[f64], x: &[f64], v: &mut [f64]) {
    dispatch_kernel!(contract2d::eval, d1d, q1d, (b, x, v))
}

/// Transpose of [`eval_2d`]; accumulates into `y`.
pub fn eval_transpose_2d(d1d: usize, q1d: usize, b: &[f64], v: &[f64], y: &mut [f64]) {
    dispatch_kernel!(contract2d::eval_transpose, d1d, q1d, (b, v, y))
}

/// Reference-space gradients at quadrature points, 2D.
pub fn grad_2d(d1d: usize, q1d: usize, b: &[f64], g: &[f64], x: &[f64], gq: &mut [f64]) {
    dispatch_kernel!(contract2d::grad, d1d, q1d, (b, g, x, gq))
}

/// Transpose of [`grad_2d`]; accumulates into `y`.
pub fn grad_transpose_2d(d1d: usize, q1d: usize, b: &[f64], g: &[f64], gq: &[f64], y: &mut [f64]) {
    dispatch_kernel!(contract2d::grad_transpose, d1d, q1d, (b, g, gq, y))
}

/// Values at quadrature points, 3D.
pub fn eval_3d(d1d: usize, q1d: usize, b: &[f64], x: &[f64], v: &mut [f64]) {
    dispatch_kernel!(contract3d::eval, d1d, q1d, (b, x, v))
}

/// Transpose of [`eval_3d`]; accumulates into `y`.
pub fn eval_transpose_3d(d1d: usize, q1d: usize, b: &[f64], v: &[f64], y: &mut [f64]) {
    dispatch_kernel!(contract3d::eval_transpose, d1d, q1d, (b, v, y))
}

/// Reference-space gradients at quadrature points, 3D.
pub fn grad_3d(d1d: usize, q1d: usize, b: &[f64], g: &[f64], x: &[f64], gq: &mut [f64]) {
    dispatch_kernel!(contract3d::grad, d1d, q1d, (b, g, x, gq))
}

/// Transpose of [`grad_3d`]; accumulates into `y`.
pub fn grad_transpose_3d(d1d: usize, q1d: usize, b: &[f64], g: &[f64], gq: &[f64], y: &mut [f64]) {
    dispatch_kernel!(contract3d::grad_transpose, d1d, q1d, (b, g, gq, y))
}

/// Values at quadrature points, 1D. The 1D contractions are a single small
/// matrix-vector product, so there is no specialized dispatch table for them.
pub fn eval_1d(d1d: usize, q1d: usize, b: &[f64], x: &[f64], v: &mut [f64]) {
    assert_caps(d1d, q1d);
    contract1d::eval(d1d, q1d, b, x, v)
}

/// Transpose of [`eval_1d`]; accumulates into `y`.
pub fn eval_transpose_1d(d1d: usize, q1d: usize, b: &[f64], v: &[f64], y: &mut [f64]) {
    assert_caps(d1d, q1d);
    contract1d::eval_transpose(d1d, q1d, b, v, y)
}

/// Reference-space derivatives at quadrature points, 1D.
pub fn grad_1d(d1d: usize, q1d: usize, g: &[f64], x: &[f64], gq: &mut [f64]) {
    assert_caps(d1d, q1d);
    contract1d::eval(d1d, q1d, g, x, gq)
}

/// Transpose of [`grad_1d`]; accumulates into `y`.
pub fn grad_transpose_1d(d1d: usize, q1d: usize, g: &[f64], gq: &[f64], y: &mut [f64]) {
    assert_caps(d1d, q1d);
    contract1d::eval_transpose(d1d, q1d, g, gq, y)
}

fn assert_caps(d1d: usize, q1d: usize) {
    assert!(
        d1d <= MAX_D1D && q1d <= MAX_Q1D,
        "tensor kernel size (D1D = {}, Q1D = {}) exceeds the compiled maximum \
         (MAX_D1D = {}, MAX_Q1D = {})",
        d1d,
        q1d,
        MAX_D1D,
        MAX_Q1D
    );
}
