//! 2D sum-factorized contractions.
//!
//! Every kernel is generic over the staging-array bounds `(MD1, MQ1)` and loops over the
//! runtime sizes `(d1d, q1d)`; instantiating with `MD1 == d1d, MQ1 == q1d` yields the
//! specialized kernels (fixed trip counts, exact-size stack arrays), instantiating with
//! the maximum bounds yields the generic fallback. Both paths execute the identical
//! contraction order, so they agree to roundoff.

/// Interpolate dof values to quadrature points: `v(qx, qy) = sum_{dx, dy} b(qx, dx) b(qy, dy) x(dx, dy)`.
pub fn eval<const MD1: usize, const MQ1: usize>(
    d1d: usize,
    q1d: usize,
    b: &[f64],
    x: &[f64],
    v: &mut [f64],
) {
    debug_assert!(d1d <= MD1 && q1d <= MQ1);
    debug_assert_eq!(x.len(), d1d * d1d);
    debug_assert_eq!(v.len(), q1d * q1d);

    // Contract the x-axis first, then the y-axis
    let mut dq = [[0.0_f64; MQ1]; MD1];
    for dy in 0..d1d {
        for qx in 0..q1d {
            let mut u = 0.0;
            for dx in 0..d1d {
                u += b[qx + q1d * dx] * x[dx + d1d * dy];
            }
            dq[dy][qx] = u;
        }
    }
    for qy in 0..q1d {
        for qx in 0..q1d {
            let mut u = 0.0;
            for dy in 0..d1d {
                u += b[qy + q1d * dy] * dq[dy][qx];
            }
            v[qx + q1d * qy] = u;
        }
    }
}

/// Transpose of [`eval`]: `y(dx, dy) += sum_{qx, qy} b(qx, dx) b(qy, dy) v(qx, qy)`.
pub fn eval_transpose<const MD1: usize, const MQ1: usize>(
    d1d: usize,
    q1d: usize,
    b: &[f64],
    v: &[f64],
    y: &mut [f64],
) {
    debug_assert!(d1d <= MD1 && q1d <= MQ1);
    debug_assert_eq!(v.len(), q1d * q1d);
    debug_assert_eq!(y.len(), d1d * d1d);

    let mut qd = [[0.0_f64; MD1]; MQ1];
    for qy in 0..q1d {
        for dx in 0..d1d {
            let mut u = 0.0;
            for qx in 0..q1d {
                u += b[qx + q1d * dx] * v[qx + q1d * qy];
            }
            qd[qy][dx] = u;
        }
    }
    for dy in 0..d1d {
        for dx in 0..d1d {
            let mut u = 0.0;
            for qy in 0..q1d {
                u += b[qy + q1d * dy] * qd[qy][dx];
            }
            y[dx + d1d * dy] += u;
        }
    }
}

/// Reference-space gradient at quadrature points.
///
/// Writes the two components into `gq`, component-major:
/// `gq[q] = d/dxi`, `gq[q1d*q1d + q] = d/deta` with `q = qx + q1d * qy`.
pub fn grad<const MD1: usize, const MQ1: usize>(
    d1d: usize,
    q1d: usize,
    b: &[f64],
    g: &[f64],
    x: &[f64],
    gq: &mut [f64],
) {
    debug_assert!(d1d <= MD1 && q1d <= MQ1);
    debug_assert_eq!(x.len(), d1d * d1d);
    debug_assert_eq!(gq.len(), 2 * q1d * q1d);

    // Stage 1: contract the x-axis, producing both the d/dxi partial interpolation and
    // the plain value interpolation
    let mut dq0 = [[0.0_f64; MQ1]; MD1];
    let mut dq1 = [[0.0_f64; MQ1]; MD1];
    for dy in 0..d1d {
        for qx in 0..q1d {
            let mut u = 0.0;
            let mut v = 0.0;
            for dx in 0..d1d {
                let s = x[dx + d1d * dy];
                u += g[qx + q1d * dx] * s;
                v += b[qx + q1d * dx] * s;
            }
            dq0[dy][qx] = u;
            dq1[dy][qx] = v;
        }
    }

    // Stage 2: contract the y-axis
    let nq = q1d * q1d;
    for qy in 0..q1d {
        for qx in 0..q1d {
            let mut u = 0.0;
            let mut v = 0.0;
            for dy in 0..d1d {
                u += dq0[dy][qx] * b[qy + q1d * dy];
                v += dq1[dy][qx] * g[qy + q1d * dy];
            }
            gq[qx + q1d * qy] = u;
            gq[nq + qx + q1d * qy] = v;
        }
    }
}

/// Transpose of [`grad`]: accumulates quadrature-point gradient data back into dof
/// contributions, `y += G^T gq`.
pub fn grad_transpose<const MD1: usize, const MQ1: usize>(
    d1d: usize,
    q1d: usize,
    b: &[f64],
    g: &[f64],
    gq: &[f64],
    y: &mut [f64],
) {
    debug_assert!(d1d <= MD1 && q1d <= MQ1);
    debug_assert_eq!(gq.len(), 2 * q1d * q1d);
    debug_assert_eq!(y.len(), d1d * d1d);

    let nq = q1d * q1d;

    // Stage 1: contract the x-axis of both components
    let mut qd0 = [[0.0_f64; MD1]; MQ1];
    let mut qd1 = [[0.0_f64; MD1]; MQ1];
    for qy in 0..q1d {
        for dx in 0..d1d {
            let mut u = 0.0;
            let mut v = 0.0;
            for qx in 0..q1d {
                u += g[qx + q1d * dx] * gq[qx + q1d * qy];
                v += b[qx + q1d * dx] * gq[nq + qx + q1d * qy];
            }
            qd0[qy][dx] = u;
            qd1[qy][dx] = v;
        }
    }

    // Stage 2: contract the y-axis and accumulate
    for dy in 0..d1d {
        for dx in 0..d1d {
            let mut u = 0.0;
            for qy in 0..q1d {
                u += qd0[qy][dx] * b[qy + q1d * dy] + qd1[qy][dx] * g[qy + q1d * dy];
            }
            y[dx + d1d * dy] += u;
        }
    }
}
