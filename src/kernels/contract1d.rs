//! 1D contractions. In one dimension sum factorization degenerates to a single small
//! dense matrix-vector product against the basis table.

/// `v[q] = sum_d b(q, d) x[d]`.
pub fn eval(d1d: usize, q1d: usize, b: &[f64], x: &[f64], v: &mut [f64]) {
    debug_assert_eq!(x.len(), d1d);
    debug_assert_eq!(v.len(), q1d);
    for q in 0..q1d {
        let mut u = 0.0;
        for d in 0..d1d {
            u += b[q + q1d * d] * x[d];
        }
        v[q] = u;
    }
}

/// `y[d] += sum_q b(q, d) v[q]`.
pub fn eval_transpose(d1d: usize, q1d: usize, b: &[f64], v: &[f64], y: &mut [f64]) {
    debug_assert_eq!(v.len(), q1d);
    debug_assert_eq!(y.len(), d1d);
    for d in 0..d1d {
        let mut u = 0.0;
        for q in 0..q1d {
            u += b[q + q1d * d] * v[q];
        }
        y[d] += u;
    }
}
