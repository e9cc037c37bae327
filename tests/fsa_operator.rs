//! End-to-end operator tests through the public API.

use std::sync::Arc;

use fsa_attn::activation::{bounded_kernel, bounded_kernel_backward};
use fsa_attn::gradcheck::{check_gradients, GradCheckOptions};
use fsa_attn::{Direction, KernelMapCache, MixerConfig, Shape4, Tensor4};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

fn small_config() -> MixerConfig {
    MixerConfig {
        dim: 12,
        kernel_size: 9,
        kernel_loc: vec![3, 4, 5],
        kernel_stride: vec![1, 2, 4],
        num_heads: 3,
    }
}

#[test]
fn test_gradcheck_random_configs() {
    let configs = vec![
        small_config(),
        MixerConfig { dim: 8, num_heads: 2, ..MixerConfig::default() },
        MixerConfig {
            dim: 4,
            kernel_size: 7,
            kernel_loc: vec![4],
            kernel_stride: vec![1],
            num_heads: 1,
        },
    ];

    for (seed, config) in configs.into_iter().enumerate() {
        let ops = config.build(&mut KernelMapCache::new()).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed as u64);

        // Planes narrower than the kernel reach so edge taps fall off
        let shape = Shape4::new(2, ops.horizontal.channels(), 5, 6);
        let input = Tensor4::random(shape, &mut rng);
        let kernel = bounded_kernel(&Tensor4::random(ops.horizontal.kernel_shape(shape), &mut rng));
        let grad_output = Tensor4::random(shape, &mut rng);

        for direction in [Direction::Horizontal, Direction::Vertical] {
            let report = check_gradients(
                ops.get(direction),
                &input,
                &kernel,
                &grad_output,
                &GradCheckOptions::default(),
            )
            .unwrap();
            assert!(report.passed, "config {:?}: {:?}", config_name(seed), report);
        }
    }
}

fn config_name(seed: usize) -> &'static str {
    ["small", "default-schedule", "dense"][seed]
}

/// Horizontal pass, then vertical pass on its output, chained backward.
#[test]
fn test_chained_directions_backward() {
    let ops = small_config().build(&mut KernelMapCache::new()).unwrap();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

    let shape = Shape4::new(1, ops.horizontal.channels(), 6, 5);
    let kshape = ops.horizontal.kernel_shape(shape);
    let x = Tensor4::random(shape, &mut rng);
    let logits_h = Tensor4::random(kshape, &mut rng);
    let kernel_v = Arc::new(bounded_kernel(&Tensor4::random(kshape, &mut rng)));
    let grad_output = Tensor4::random(shape, &mut rng);

    let composite_loss = |x: &Tensor4, logits_h: &Tensor4| -> f64 {
        let kh = bounded_kernel(logits_h);
        let attn_h = ops.horizontal.evaluate(x, &kh).unwrap();
        let attn = ops.vertical.evaluate(&attn_h, &kernel_v).unwrap();
        attn.dot(&grad_output).unwrap()
    };

    let kernel_h = Arc::new(bounded_kernel(&logits_h));
    let (attn_h, saved_h) = ops.horizontal.forward(Arc::new(x.clone()), Arc::clone(&kernel_h)).unwrap();
    let (_, saved_v) = ops.vertical.forward(Arc::new(attn_h), Arc::clone(&kernel_v)).unwrap();

    let grads_v = saved_v.backward(&grad_output).unwrap();
    let grads_h = saved_h.backward(&grads_v.grad_input).unwrap();
    let grad_logits_h = bounded_kernel_backward(&kernel_h, &grads_h.grad_kernel).unwrap();

    let eps = 1e-2f32;
    for idx in (0..x.data().len()).step_by(7) {
        let mut plus = x.clone();
        let mut minus = x.clone();
        plus.data_mut()[idx] += eps;
        minus.data_mut()[idx] -= eps;
        let span = (plus.data()[idx] - minus.data()[idx]) as f64;
        let numeric = (composite_loss(&plus, &logits_h) - composite_loss(&minus, &logits_h)) / span;
        let exact = grads_h.grad_input.data()[idx] as f64;
        assert!((numeric - exact).abs() < 5e-3 * exact.abs().max(1.0), "x[{}]: {} vs {}", idx, numeric, exact);
    }

    // tanh makes the loss non-linear in the logits; use a smaller step
    let eps = 1e-3f32;
    for idx in (0..logits_h.data().len()).step_by(13) {
        let mut plus = logits_h.clone();
        let mut minus = logits_h.clone();
        plus.data_mut()[idx] += eps;
        minus.data_mut()[idx] -= eps;
        let span = (plus.data()[idx] - minus.data()[idx]) as f64;
        let numeric = (composite_loss(&x, &plus) - composite_loss(&x, &minus)) / span;
        let exact = grad_logits_h.data()[idx] as f64;
        assert!((numeric - exact).abs() < 1e-2 * exact.abs().max(1.0), "logit[{}]: {} vs {}", idx, numeric, exact);
    }
}

#[test]
fn test_identity_and_zero_through_public_api() {
    let ops = small_config().build(&mut KernelMapCache::new()).unwrap();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let shape = Shape4::new(1, ops.vertical.channels(), 4, 4);
    let input = Tensor4::random(shape, &mut rng);
    let kshape = ops.vertical.kernel_shape(shape);

    let zero = ops.vertical.evaluate(&input, &Tensor4::zeros(kshape)).unwrap();
    assert!(zero.data().iter().all(|&v| v == 0.0));

    let k = ops.vertical.kernel_size();
    let mut identity = Tensor4::zeros(kshape);
    for g in 0..ops.vertical.groups() {
        for h in 0..4 {
            for w in 0..4 {
                identity.set(0, g * k + k / 2, h, w, 1.0);
            }
        }
    }
    assert_eq!(ops.vertical.evaluate(&input, &identity).unwrap(), input);
}

#[test]
fn test_shape_mismatch_leaves_no_state() {
    let ops = small_config().build(&mut KernelMapCache::new()).unwrap();
    let shape = Shape4::new(1, ops.horizontal.channels(), 3, 3);
    let input = Arc::new(Tensor4::zeros(shape));
    let bad_kernel = Arc::new(Tensor4::zeros(Shape4::new(1, 1, 3, 3)));

    let err = ops.horizontal.forward(Arc::clone(&input), bad_kernel).unwrap_err();
    assert!(err.is_shape_error());
    // Nothing retained the input on failure
    assert_eq!(Arc::strong_count(&input), 1);
}
