//! Flat-buffer kernels used by the loss layers.
//!
//! Every function walks the shortest of its slices; callers are responsible
//! for sizing them.

/// out[i] = a[i] - b[i]
pub fn sub(a: &[f64], b: &[f64], out: &mut [f64]) {
    for ((o, x), y) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
        *o = x - y;
    }
}

/// Inner product of `a` and `b`.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// y[i] = alpha * x[i] + beta * y[i]
///
/// With `beta == 0.0` the previous contents of `y` are discarded outright, so
/// stale NaNs in `y` do not leak into the result.
pub fn axpby(alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi = if beta == 0.0 { alpha * xi } else { alpha * xi + beta * *yi };
    }
}
