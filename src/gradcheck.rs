//! Finite-difference gradient checking
//!
//! Verifies the analytic backward of a [`LocalAttention`] operator against
//! central differences of the scalar loss `L = Σ out ⊙ grad_output`.
//! The operator is linear in each input, so central differences carry no
//! truncation error and the tolerance only has to absorb f32 rounding.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::fsa::{Direction, LocalAttention};
use crate::tensor::Tensor4;

#[derive(Clone, Copy, Debug)]
pub struct GradCheckOptions {
    /// Central-difference step.
    pub eps: f32,
    /// Maximum accepted error, relative to max(1, |analytic|, |numeric|).
    pub tolerance: f64,
    /// Upper bound on probed elements per tensor (evenly strided).
    pub max_samples: usize,
}

impl Default for GradCheckOptions {
    fn default() -> Self {
        Self { eps: 1e-2, tolerance: 1e-3, max_samples: 256 }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GradCheckReport {
    pub direction: String,
    pub input_samples: usize,
    pub kernel_samples: usize,
    pub max_input_error: f64,
    pub max_kernel_error: f64,
    pub passed: bool,
}

/// Which operator argument a probe perturbs.
#[derive(Clone, Copy)]
enum Probe {
    Input,
    Kernel,
}

impl Probe {
    fn set(self, input: &mut Tensor4, kernel: &mut Tensor4, idx: usize, value: f32) {
        match self {
            Probe::Input => input.data_mut()[idx] = value,
            Probe::Kernel => kernel.data_mut()[idx] = value,
        }
    }
}

/// Run forward + backward, then probe both gradients numerically.
///
/// # Arguments
///
/// * `op` - Operator under test
/// * `input` - Feature tensor
/// * `kernel` - Kernel-weight tensor, shaped by `op.kernel_shape(input.shape())`
/// * `grad_output` - Upstream gradient; also the weights of the scalar loss
/// * `options` - Step size, tolerance and sample budget
///
/// # Returns
///
/// A report with the worst relative error per gradient. `passed` is false
/// when either exceeds `options.tolerance`.
pub fn check_gradients(
    op: &LocalAttention,
    input: &Tensor4,
    kernel: &Tensor4,
    grad_output: &Tensor4,
    options: &GradCheckOptions,
) -> Result<GradCheckReport> {
    let (_, saved) = op.forward(Arc::new(input.clone()), Arc::new(kernel.clone()))?;
    let grads = saved.backward(grad_output)?;

    let (input_samples, max_input_error) =
        probe(op, input, kernel, grad_output, &grads.grad_input, Probe::Input, options)?;
    let (kernel_samples, max_kernel_error) =
        probe(op, input, kernel, grad_output, &grads.grad_kernel, Probe::Kernel, options)?;

    let passed = max_input_error <= options.tolerance && max_kernel_error <= options.tolerance;
    if !passed {
        log::warn!(
            "Gradient check failed for {}: input_err={:.3e}, kernel_err={:.3e}",
            op.direction(),
            max_input_error,
            max_kernel_error
        );
    }

    Ok(GradCheckReport {
        direction: op.direction().to_string(),
        input_samples,
        kernel_samples,
        max_input_error,
        max_kernel_error,
        passed,
    })
}

/// Check every direction of a mixer on the same tensors.
pub fn check_all(
    ops: &[&LocalAttention],
    input: &Tensor4,
    kernel: &Tensor4,
    grad_output: &Tensor4,
    options: &GradCheckOptions,
) -> Result<Vec<GradCheckReport>> {
    ops.iter()
        .map(|op| check_gradients(op, input, kernel, grad_output, options))
        .collect()
}

fn loss(op: &LocalAttention, input: &Tensor4, kernel: &Tensor4, grad_output: &Tensor4) -> Result<f64> {
    op.evaluate(input, kernel)?.dot(grad_output)
}

fn probe(
    op: &LocalAttention,
    input: &Tensor4,
    kernel: &Tensor4,
    grad_output: &Tensor4,
    analytic: &Tensor4,
    which: Probe,
    options: &GradCheckOptions,
) -> Result<(usize, f64)> {
    let len = analytic.data().len();
    if len == 0 {
        return Ok((0, 0.0));
    }
    let step = (len / options.max_samples.max(1)).max(1);

    let mut input = input.clone();
    let mut kernel = kernel.clone();
    let mut samples = 0;
    let mut max_error = 0.0f64;

    for idx in (0..len).step_by(step) {
        let original = match which {
            Probe::Input => input.data()[idx],
            Probe::Kernel => kernel.data()[idx],
        };

        which.set(&mut input, &mut kernel, idx, original + options.eps);
        let plus = loss(op, &input, &kernel, grad_output)?;

        which.set(&mut input, &mut kernel, idx, original - options.eps);
        let minus = loss(op, &input, &kernel, grad_output)?;

        which.set(&mut input, &mut kernel, idx, original);

        // Divide by the step actually taken in f32
        let span = ((original + options.eps) - (original - options.eps)) as f64;
        let numeric = (plus - minus) / span;
        let exact = analytic.data()[idx] as f64;
        let scale = 1.0f64.max(exact.abs()).max(numeric.abs());
        max_error = max_error.max((exact - numeric).abs() / scale);
        samples += 1;
    }

    Ok((samples, max_error))
}

/// Parse a `--direction` style selector: one direction or `both`.
pub fn parse_directions(selector: &str) -> Result<Vec<Direction>> {
    match selector {
        "both" => Ok(vec![Direction::Horizontal, Direction::Vertical]),
        other => Ok(vec![other.parse()?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;
    use crate::cache::KernelMapCache;
    use crate::tensor::Shape4;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_gradcheck_passes_for_both_directions() {
        let config = MixerConfig {
            dim: 8,
            kernel_size: 9,
            kernel_loc: vec![3, 4, 5],
            kernel_stride: vec![1, 2, 4],
            num_heads: 2,
        };
        let ops = config.build(&mut KernelMapCache::new()).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);

        let shape = Shape4::new(1, ops.horizontal.channels(), 6, 7);
        let input = Tensor4::random(shape, &mut rng);
        let kernel = Tensor4::random(ops.horizontal.kernel_shape(shape), &mut rng);
        let grad_output = Tensor4::random(shape, &mut rng);

        let reports = check_all(
            &[&ops.horizontal, &ops.vertical],
            &input,
            &kernel,
            &grad_output,
            &GradCheckOptions::default(),
        )
        .unwrap();

        assert_eq!(reports.len(), 2);
        for report in reports {
            assert!(report.passed, "{:?}", report);
            assert!(report.input_samples > 0 && report.kernel_samples > 0);
        }
    }

    #[test]
    fn test_parse_directions() {
        assert_eq!(parse_directions("both").unwrap().len(), 2);
        assert_eq!(parse_directions("vertical").unwrap(), vec![Direction::Vertical]);
        assert!(parse_directions("sideways").is_err());
    }
}
