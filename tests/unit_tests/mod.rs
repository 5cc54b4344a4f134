mod constrained;
mod form;
mod kernels;
mod pa;
mod restriction;

/// Deterministic pseudo-random data for kernel and operator tests (xorshift).
pub fn pseudo_random(len: usize, seed: u64) -> Vec<f64> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 2000) as f64 / 1000.0 - 1.0
        })
        .collect()
}
