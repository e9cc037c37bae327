//! Bounded kernel activation
//!
//! Learned kernel weights pass through `tanh` before reaching the
//! local-attention operator so every tap weight stays in `[-1, 1]`.

use crate::error::Result;
use crate::tensor::Tensor4;

/// tanh forward.
///
/// Input:
///   - logits: raw kernel-generator output, any shape
///
/// Output:
///   - weights: same shape, bounded to [-1, 1]
pub fn bounded_kernel(logits: &Tensor4) -> Tensor4 {
    let mut out = logits.clone();
    out.data_mut().iter_mut().for_each(|x| *x = x.tanh());
    out
}

/// tanh backward, expressed through the forward output.
///
/// d/dx tanh(x) = 1 - tanh(x)²
///
/// `grad_weights` must have the shape of `weights`.
pub fn bounded_kernel_backward(weights: &Tensor4, grad_weights: &Tensor4) -> Result<Tensor4> {
    weights.check_same_shape(grad_weights, "grad_weights")?;

    let mut grad = grad_weights.clone();
    grad.data_mut()
        .iter_mut()
        .zip(weights.data().iter())
        .for_each(|(g, &y)| *g *= 1.0 - y * y);
    Ok(grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Shape4;

    #[test]
    fn test_bounded_range() {
        let shape = Shape4::new(1, 1, 1, 5);
        let logits = Tensor4::from_vec(shape, vec![-100.0, -1.0, 0.0, 1.0, 100.0]).unwrap();
        let weights = bounded_kernel(&logits);

        assert!(weights.data().iter().all(|w| (-1.0..=1.0).contains(w)));
        assert_eq!(weights.data()[2], 0.0);
        assert!((weights.data()[3] - 0.761_594_2).abs() < 1e-6);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let shape = Shape4::new(1, 1, 1, 4);
        let logits = Tensor4::from_vec(shape, vec![-1.5, -0.2, 0.3, 2.0]).unwrap();
        let weights = bounded_kernel(&logits);
        let ones = Tensor4::full(shape, 1.0);
        let grad = bounded_kernel_backward(&weights, &ones).unwrap();

        let eps = 1e-3f64;
        for (i, &x) in logits.data().iter().enumerate() {
            let x = x as f64;
            let numeric = ((x + eps).tanh() - (x - eps).tanh()) / (2.0 * eps);
            assert!((grad.data()[i] as f64 - numeric).abs() < 1e-4);
        }
    }

    #[test]
    fn test_backward_rejects_mismatched_gradient() {
        let weights = bounded_kernel(&Tensor4::zeros(Shape4::new(1, 2, 2, 2)));
        let grad = Tensor4::zeros(Shape4::new(1, 2, 2, 1));
        let err = bounded_kernel_backward(&weights, &grad).unwrap_err();
        assert!(err.is_shape_error());
    }
}
