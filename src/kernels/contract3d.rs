//! 3D sum-factorized contractions. Same conventions and monomorphization scheme as the
//! 2D kernels; the staging arrays grow to rank three and the gradient kernels track
//! three partial interpolations through the stages.

/// Interpolate dof values to quadrature points.
pub fn eval<const MD1: usize, const MQ1: usize>(
    d1d: usize,
    q1d: usize,
    b: &[f64],
    x: &[f64],
    v: &mut [f64],
) {
    debug_assert!(d1d <= MD1 && q1d <= MQ1);
    debug_assert_eq!(x.len(), d1d * d1d * d1d);
    debug_assert_eq!(v.len(), q1d * q1d * q1d);

    let mut ddq = [[[0.0_f64; MQ1]; MD1]; MD1];
    for dz in 0..d1d {
        for dy in 0..d1d {
            for qx in 0..q1d {
                let mut u = 0.0;
                for dx in 0..d1d {
                    u += b[qx + q1d * dx] * x[dx + d1d * (dy + d1d * dz)];
                }
                ddq[dz][dy][qx] = u;
            }
        }
    }
    let mut dqq = [[[0.0_f64; MQ1]; MQ1]; MD1];
    for dz in 0..d1d {
        for qy in 0..q1d {
            for qx in 0..q1d {
                let mut u = 0.0;
                for dy in 0..d1d {
                    u += b[qy + q1d * dy] * ddq[dz][dy][qx];
                }
                dqq[dz][qy][qx] = u;
            }
        }
    }
    for qz in 0..q1d {
        for qy in 0..q1d {
            for qx in 0..q1d {
                let mut u = 0.0;
                for dz in 0..d1d {
                    u += b[qz + q1d * dz] * dqq[dz][qy][qx];
                }
                v[qx + q1d * (qy + q1d * qz)] = u;
            }
        }
    }
}

/// Transpose of [`eval`]; accumulates into `y`.
pub fn eval_transpose<const MD1: usize, const MQ1: usize>(
    d1d: usize,
    q1d: usize,
    b: &[f64],
    v: &[f64],
    y: &mut [f64],
) {
    debug_assert!(d1d <= MD1 && q1d <= MQ1);
    debug_assert_eq!(v.len(), q1d * q1d * q1d);
    debug_assert_eq!(y.len(), d1d * d1d * d1d);

    let mut qqd = [[[0.0_f64; MD1]; MQ1]; MQ1];
    for qz in 0..q1d {
        for qy in 0..q1d {
            for dx in 0..d1d {
                let mut u = 0.0;
                for qx in 0..q1d {
                    u += b[qx + q1d * dx] * v[qx + q1d * (qy + q1d * qz)];
                }
                qqd[qz][qy][dx] = u;
            }
        }
    }
    let mut qdd = [[[0.0_f64; MD1]; MD1]; MQ1];
    for qz in 0..q1d {
        for dy in 0..d1d {
            for dx in 0..d1d {
                let mut u = 0.0;
                for qy in 0..q1d {
                    u += b[qy + q1d * dy] * qqd[qz][qy][dx];
                }
                qdd[qz][dy][dx] = u;
            }
        }
    }
    for dz in 0..d1d {
        for dy in 0..d1d {
            for dx in 0..d1d {
                let mut u = 0.0;
                for qz in 0..q1d {
                    u += b[qz + q1d * dz] * qdd[qz][dy][dx];
                }
                y[dx + d1d * (dy + d1d * dz)] += u;
            }
        }
    }
}

/// Reference-space gradient at quadrature points, component-major output:
/// `gq[c * q1d^3 + q]` for `c` in `{0, 1, 2}` and `q = qx + q1d * (qy + q1d * qz)`.
pub fn grad<const MD1: usize, const MQ1: usize>(
    d1d: usize,
    q1d: usize,
    b: &[f64],
    g: &[f64],
    x: &[f64],
    gq: &mut [f64],
) {
    debug_assert!(d1d <= MD1 && q1d <= MQ1);
    debug_assert_eq!(x.len(), d1d * d1d * d1d);
    debug_assert_eq!(gq.len(), 3 * q1d * q1d * q1d);

    // Stage 1: contract the x-axis; track d/dxi and the value interpolation
    let mut gx = [[[0.0_f64; MQ1]; MD1]; MD1];
    let mut vx = [[[0.0_f64; MQ1]; MD1]; MD1];
    for dz in 0..d1d {
        for dy in 0..d1d {
            for qx in 0..q1d {
                let mut u = 0.0;
                let mut v = 0.0;
                for dx in 0..d1d {
                    let s = x[dx + d1d * (dy + d1d * dz)];
                    u += g[qx + q1d * dx] * s;
                    v += b[qx + q1d * dx] * s;
                }
                gx[dz][dy][qx] = u;
                vx[dz][dy][qx] = v;
            }
        }
    }

    // Stage 2: contract the y-axis; three partials now in flight
    let mut gxy = [[[0.0_f64; MQ1]; MQ1]; MD1];
    let mut gyx = [[[0.0_f64; MQ1]; MQ1]; MD1];
    let mut vxy = [[[0.0_f64; MQ1]; MQ1]; MD1];
    for dz in 0..d1d {
        for qy in 0..q1d {
            for qx in 0..q1d {
                let mut u = 0.0;
                let mut v = 0.0;
                let mut w = 0.0;
                for dy in 0..d1d {
                    u += gx[dz][dy][qx] * b[qy + q1d * dy];
                    v += vx[dz][dy][qx] * g[qy + q1d * dy];
                    w += vx[dz][dy][qx] * b[qy + q1d * dy];
                }
                gxy[dz][qy][qx] = u;
                gyx[dz][qy][qx] = v;
                vxy[dz][qy][qx] = w;
            }
        }
    }

    // Stage 3: contract the z-axis
    let nq = q1d * q1d * q1d;
    for qz in 0..q1d {
        for qy in 0..q1d {
            for qx in 0..q1d {
                let mut u = 0.0;
                let mut v = 0.0;
                let mut w = 0.0;
                for dz in 0..d1d {
                    u += gxy[dz][qy][qx] * b[qz + q1d * dz];
                    v += gyx[dz][qy][qx] * b[qz + q1d * dz];
                    w += vxy[dz][qy][qx] * g[qz + q1d * dz];
                }
                let q = qx + q1d * (qy + q1d * qz);
                gq[q] = u;
                gq[nq + q] = v;
                gq[2 * nq + q] = w;
            }
        }
    }
}

/// Transpose of [`grad`]; accumulates into `y`.
pub fn grad_transpose<const MD1: usize, const MQ1: usize>(
    d1d: usize,
    q1d: usize,
    b: &[f64],
    g: &[f64],
    gq: &[f64],
    y: &mut [f64],
) {
    debug_assert!(d1d <= MD1 && q1d <= MQ1);
    debug_assert_eq!(gq.len(), 3 * q1d * q1d * q1d);
    debug_assert_eq!(y.len(), d1d * d1d * d1d);

    let nq = q1d * q1d * q1d;

    // Stage 1: contract the x-axis of all three components
    let mut c0 = [[[0.0_f64; MD1]; MQ1]; MQ1];
    let mut c1 = [[[0.0_f64; MD1]; MQ1]; MQ1];
    let mut c2 = [[[0.0_f64; MD1]; MQ1]; MQ1];
    for qz in 0..q1d {
        for qy in 0..q1d {
            for dx in 0..d1d {
                let mut u = 0.0;
                let mut v = 0.0;
                let mut w = 0.0;
                for qx in 0..q1d {
                    let q = qx + q1d * (qy + q1d * qz);
                    u += g[qx + q1d * dx] * gq[q];
                    v += b[qx + q1d * dx] * gq[nq + q];
                    w += b[qx + q1d * dx] * gq[2 * nq + q];
                }
                c0[qz][qy][dx] = u;
                c1[qz][qy][dx] = v;
                c2[qz][qy][dx] = w;
            }
        }
    }

    // Stage 2: contract the y-axis
    let mut d0 = [[[0.0_f64; MD1]; MD1]; MQ1];
    let mut d1 = [[[0.0_f64; MD1]; MD1]; MQ1];
    for qz in 0..q1d {
        for dy in 0..d1d {
            for dx in 0..d1d {
                let mut u = 0.0;
                let mut w = 0.0;
                for qy in 0..q1d {
                    u += c0[qz][qy][dx] * b[qy + q1d * dy] + c1[qz][qy][dx] * g[qy + q1d * dy];
                    w += c2[qz][qy][dx] * b[qy + q1d * dy];
                }
                d0[qz][dy][dx] = u;
                d1[qz][dy][dx] = w;
            }
        }
    }

    // Stage 3: contract the z-axis and accumulate
    for dz in 0..d1d {
        for dy in 0..d1d {
            for dx in 0..d1d {
                let mut u = 0.0;
                for qz in 0..q1d {
                    u += d0[qz][dy][dx] * b[qz + q1d * dz] + d1[qz][dy][dx] * g[qz + q1d * dz];
                }
                y[dx + d1d * (dy + d1d * dz)] += u;
            }
        }
    }
}
