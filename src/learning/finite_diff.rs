//! Central-difference gradients, the reference the reverse pass is checked
//! against.

use crate::error::{Result, ScanError};
use crate::Tensor;

/// `∂f/∂x` by central differences, one element at a time.
///
/// Costs two evaluations of `f` per element of `x`.
pub fn numeric_gradient<F>(f: F, x: &Tensor, eps: f64) -> Result<Tensor>
where
    F: Fn(&Tensor) -> Result<f64>,
{
    if !(eps > 0.0) {
        return Err(ScanError::config(format!(
            "finite-difference step must be positive, got {}",
            eps
        )));
    }
    let mut grad = Tensor::zeros(x.raw_dim());
    let mut probe = x.clone();
    for (idx, &orig) in x.indexed_iter() {
        probe[&idx] = orig + eps;
        let up = f(&probe)?;
        probe[&idx] = orig - eps;
        let down = f(&probe)?;
        probe[&idx] = orig;
        grad[&idx] = (up - down) / (2.0 * eps);
    }
    Ok(grad)
}

/// Largest elementwise `|a - b|`; `None` when the shapes differ.
pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> Option<f64> {
    if a.shape() != b.shape() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max),
    )
}
