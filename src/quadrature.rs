//! 1D Gauss quadrature and Lagrange shape-function tables for tensor-product elements.

use nalgebra::DMatrix;

/// Value and first derivative of the Legendre polynomial `P_n` at `x`.
///
/// The derivative identity divides by `x^2 - 1`, so `x` must lie strictly inside the
/// interval. The Newton iterates below always do.
fn legendre_with_derivative(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    // Bonnet recurrence starting from P_0 = 1, P_1 = x
    let mut prev = 1.0;
    let mut curr = x;
    for k in 2..=n {
        let k = k as f64;
        let next = ((2.0 * k - 1.0) * x * curr - (k - 1.0) * prev) / k;
        prev = curr;
        curr = next;
    }
    // (x^2 - 1) P_n' = n (x P_n - P_{n-1})
    let n = n as f64;
    (curr, n * (x * curr - prev) / (x * x - 1.0))
}

/// Gauss-Legendre rule with `n` points on `[-1, 1]`, exact for polynomials of degree
/// `2n - 1`. Returns `(weights, points)` with the points in ascending order.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss(n: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(n > 0, "number of points must be positive");

    let mut points = vec![0.0; n];
    let mut weights = vec![0.0; n];

    // The roots of P_n come in +/- pairs around zero; solve for the non-negative half
    // and mirror the rest.
    for i in 0..(n + 1) / 2 {
        // Chebyshev-like starting value for the i-th largest root
        let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        loop {
            let (p, dp) = legendre_with_derivative(n, x);
            let step = p / dp;
            x -= step;
            if step.abs() <= 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre_with_derivative(n, x);
        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        points[i] = -x;
        points[n - 1 - i] = x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }

    (weights, points)
}

/// Value of the `j`-th Lagrange basis function over `nodes`, evaluated at `x`.
fn lagrange_value(nodes: &[f64], j: usize, x: f64) -> f64 {
    let mut value = 1.0;
    for (k, &xk) in nodes.iter().enumerate() {
        if k != j {
            value *= (x - xk) / (nodes[j] - xk);
        }
    }
    value
}

/// Derivative of the `j`-th Lagrange basis function over `nodes`, evaluated at `x`.
fn lagrange_derivative(nodes: &[f64], j: usize, x: f64) -> f64 {
    let mut derivative = 0.0;
    for (m, &xm) in nodes.iter().enumerate() {
        if m == j {
            continue;
        }
        let mut term = 1.0 / (nodes[j] - xm);
        for (k, &xk) in nodes.iter().enumerate() {
            if k != j && k != m {
                term *= (x - xk) / (nodes[j] - xk);
            }
        }
        derivative += term;
    }
    derivative
}

/// Shape-function evaluation tables for a 1D Lagrange basis at the points of a 1D Gauss
/// rule, shared across all spatial dimensions of a tensor-product element.
///
/// `b` and `g` have shape `(q1d, d1d)`: entry `(q, d)` is the value (respectively the
/// derivative) of the `d`-th basis function at the `q`-th quadrature point. The
/// column-major storage of [`DMatrix`] therefore matches the `q`-fastest indexing
/// expected by the contraction kernels.
#[derive(Debug, Clone)]
pub struct ShapeTables {
    pub d1d: usize,
    pub q1d: usize,
    pub b: DMatrix<f64>,
    pub g: DMatrix<f64>,
    pub points_1d: Vec<f64>,
    pub weights_1d: Vec<f64>,
}

impl ShapeTables {
    /// Build tables for `d1d` equispaced Lagrange nodes on `[-1, 1]` evaluated at the
    /// `q1d`-point Gauss rule.
    ///
    /// # Panics
    ///
    /// Panics if `d1d < 2`.
    pub fn new(d1d: usize, q1d: usize) -> Self {
        assert!(d1d >= 2, "tensor elements need at least two nodes per axis");
        let (weights_1d, points_1d) = gauss(q1d);

        let nodes: Vec<f64> = (0..d1d)
            .map(|i| -1.0 + 2.0 * i as f64 / (d1d - 1) as f64)
            .collect();

        let mut b = DMatrix::zeros(q1d, d1d);
        let mut g = DMatrix::zeros(q1d, d1d);
        for d in 0..d1d {
            for q in 0..q1d {
                b[(q, d)] = lagrange_value(&nodes, d, points_1d[q]);
                g[(q, d)] = lagrange_derivative(&nodes, d, points_1d[q]);
            }
        }

        Self {
            d1d,
            q1d,
            b,
            g,
            points_1d,
            weights_1d,
        }
    }

    /// Number of quadrature points of the `dim`-dimensional tensor-product rule.
    pub fn num_qpoints(&self, dim: usize) -> usize {
        self.q1d.pow(dim as u32)
    }

    /// Reference coordinates of quadrature point `q` in lexicographic order
    /// (first axis fastest). Writes `dim` entries into `xi`.
    pub fn qpoint_coords(&self, dim: usize, q: usize, xi: &mut [f64]) {
        let mut rem = q;
        for axis in 0..dim {
            xi[axis] = self.points_1d[rem % self.q1d];
            rem /= self.q1d;
        }
    }

    /// Tensor-product quadrature weight of point `q`.
    pub fn qpoint_weight(&self, dim: usize, q: usize) -> f64 {
        let mut rem = q;
        let mut w = 1.0;
        for _ in 0..dim {
            w *= self.weights_1d[rem % self.q1d];
            rem /= self.q1d;
        }
        w
    }
}
