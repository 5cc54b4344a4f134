//! Matrix-free diagonal extraction.
//!
//! The diagonal entry of a gradient-based integrator at local dof `i` is
//! `sum over q of grad(phi_i)(q)^T A(q) grad(phi_i)(q)` with `A` the full per-point
//! tensor. Unlike the apply pipeline this touches one basis function at a time, so it is
//! written as plain nested loops over the tensor-product structure rather than through
//! the sum-factorized kernels.

/// Accumulate the diagonal contributions of one element into `ye`.
///
/// `a` holds a full row-major `dim x dim` tensor per quadrature point, point-major
/// (`a[q * dim * dim + r * dim + s]`). `ye` has `d1d^dim` entries in lexicographic order.
pub(crate) fn element_diagonal(
    dim: usize,
    d1d: usize,
    q1d: usize,
    b: &[f64],
    g: &[f64],
    a: &[f64],
    ye: &mut [f64],
) {
    let ndof = d1d.pow(dim as u32);
    let nq = q1d.pow(dim as u32);
    debug_assert_eq!(a.len(), nq * dim * dim);
    debug_assert_eq!(ye.len(), ndof);

    let mut grad = [0.0_f64; 3];
    for i in 0..ndof {
        // Axis indices of dof i, first axis fastest
        let mut idx = [0usize; 3];
        let mut rem = i;
        for axis in 0..dim {
            idx[axis] = rem % d1d;
            rem /= d1d;
        }

        let mut sum = 0.0;
        for q in 0..nq {
            // grad_c(phi_i)(q) = product over axes of (g if axis == c else b)
            let mut qidx = [0usize; 3];
            let mut rem = q;
            for axis in 0..dim {
                qidx[axis] = rem % q1d;
                rem /= q1d;
            }
            for c in 0..dim {
                let mut value = 1.0;
                for axis in 0..dim {
                    let table = if axis == c { g } else { b };
                    value *= table[qidx[axis] + q1d * idx[axis]];
                }
                grad[c] = value;
            }

            let a_q = &a[q * dim * dim..(q + 1) * dim * dim];
            for r in 0..dim {
                for s in 0..dim {
                    sum += grad[r] * a_q[r * dim + s] * grad[s];
                }
            }
        }
        ye[i] += sum;
    }
}
