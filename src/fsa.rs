//! Directional local-attention operator
//!
//! Gathers feature values along one spatial axis over the cells of a
//! [`KernelMap`], weights each tap by a learned per-position kernel, and sums.
//! A tap `(offset, stride)` aggregates `stride` consecutive cells starting at
//! `offset` and extending away from the center (see [`Tap::cell`]), so the
//! taps of one side tile the whole patch.
//! Horizontal and vertical instances share one implementation parameterized
//! by [`Direction`].
//!
//! Forward:
//!
//! ```text
//! out[b, c, h, w] = Σ_t  kernel[b, g*K + t, h, w] * Σ_{j ∈ cell_t} in[b, c, shift_j(h, w)]
//! ```
//!
//! with `g = c / group_channels`. Cells are summed, not averaged. Each read
//! that lands outside the plane is zero.
//!
//! Backward returns exact gradients for the input (reverse scatter of the
//! gather to every cell element) and for the kernel (per-group dot product of
//! the output gradient with the cell sums). Forward hands back a [`SavedState`] that backward
//! consumes by value, so each forward pairs with at most one backward:
//!
//! ```compile_fail
//! # use std::sync::Arc;
//! # use fsa_attn::fsa::{Direction, LocalAttention};
//! # use fsa_attn::kernel_map::{generate, StrideSchedule};
//! # use fsa_attn::tensor::{Shape4, Tensor4};
//! # let (map, _) = generate(3, &StrideSchedule::new(vec![2], vec![1]).unwrap()).unwrap();
//! # let op = LocalAttention::new(Direction::Horizontal, 3, Arc::new(map), 1, 1).unwrap();
//! # let input = Arc::new(Tensor4::zeros(Shape4::new(1, 1, 2, 2)));
//! # let kernel = Arc::new(Tensor4::zeros(Shape4::new(1, 3, 2, 2)));
//! let (out, saved) = op.forward(input, kernel).unwrap();
//! let first = saved.backward(&out).unwrap();
//! let second = saved.backward(&out).unwrap();
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{FsaError, Result};
use crate::kernel_map::{KernelMap, Tap};
use crate::tensor::{Shape4, Tensor4};
use crate::validation;

/// Spatial axis the operator shifts along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Shift along width.
    Horizontal,
    /// Shift along height.
    Vertical,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Horizontal => "horizontal",
            Direction::Vertical => "vertical",
        }
    }

    /// Sum of `plane` over displacements `lo..=hi` from `(h, w)` along this
    /// axis. Out-of-plane elements contribute zero.
    ///
    /// The range is clipped to the plane first, so wide outer cells cost no
    /// more than the axis length.
    #[inline]
    fn cell_sum(
        self,
        plane: &[f32],
        h: usize,
        w: usize,
        (lo, hi): (i32, i32),
        height: usize,
        width: usize,
    ) -> f32 {
        let (pos, len) = match self {
            Direction::Horizontal => (w as isize, width as isize),
            Direction::Vertical => (h as isize, height as isize),
        };
        let first = (lo as isize).max(-pos);
        let last = (hi as isize).min(len - 1 - pos);

        (first..=last)
            .map(|j| {
                let x = (pos + j) as usize;
                match self {
                    Direction::Horizontal => plane[h * width + x],
                    Direction::Vertical => plane[x * width + w],
                }
            })
            .sum()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = FsaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "horizontal" => Ok(Direction::Horizontal),
            "vertical" => Ok(Direction::Vertical),
            other => Err(FsaError::UnknownDirection(other.to_string())),
        }
    }
}

/// One configured operator instance. Configuration is fixed for its lifetime.
#[derive(Clone, Debug)]
pub struct LocalAttention {
    direction: Direction,
    kernel_size: usize,
    kernel_map: Arc<KernelMap>,
    groups: usize,
    group_channels: usize,
}

/// Everything backward needs from the matching forward call.
///
/// Holds shared handles to the forward inputs; nothing is copied.
#[derive(Debug)]
pub struct SavedState {
    op: LocalAttention,
    input: Arc<Tensor4>,
    kernel: Arc<Tensor4>,
}

/// Gradients with respect to the two differentiable operator inputs.
#[derive(Clone, Debug)]
pub struct Gradients {
    pub grad_input: Tensor4,
    pub grad_kernel: Tensor4,
}

impl LocalAttention {
    /// Build an operator instance.
    ///
    /// # Errors
    ///
    /// `KernelMapLength` if the map does not have `kernel_size` taps,
    /// `EmptyGroups` if `groups` or `group_channels` is zero.
    pub fn new(
        direction: Direction,
        kernel_size: usize,
        kernel_map: Arc<KernelMap>,
        groups: usize,
        group_channels: usize,
    ) -> Result<Self> {
        if kernel_map.len() != kernel_size {
            return Err(FsaError::KernelMapLength {
                expected: kernel_size,
                actual: kernel_map.len(),
            });
        }
        if groups == 0 || group_channels == 0 {
            return Err(FsaError::EmptyGroups { groups, group_channels });
        }

        Ok(Self { direction, kernel_size, kernel_map, groups, group_channels })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn kernel_map(&self) -> &Arc<KernelMap> {
        &self.kernel_map
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn group_channels(&self) -> usize {
        self.group_channels
    }

    /// Channels of the feature tensor this operator accepts.
    pub fn channels(&self) -> usize {
        self.groups * self.group_channels
    }

    /// Shape of the kernel-weight tensor for a given feature shape.
    pub fn kernel_shape(&self, input: Shape4) -> Shape4 {
        Shape4::new(input.batch, self.groups * self.kernel_size, input.height, input.width)
    }

    /// Forward pass, retaining the inputs for [`SavedState::backward`].
    pub fn forward(&self, input: Arc<Tensor4>, kernel: Arc<Tensor4>) -> Result<(Tensor4, SavedState)> {
        let output = self.evaluate(&input, &kernel)?;
        let saved = SavedState { op: self.clone(), input, kernel };
        Ok((output, saved))
    }

    /// Forward pass without retaining anything (inference).
    pub fn evaluate(&self, input: &Tensor4, kernel: &Tensor4) -> Result<Tensor4> {
        validation::validate_call_shapes(
            input.shape(),
            kernel.shape(),
            self.kernel_size,
            self.groups,
            self.group_channels,
        )?;

        log::trace!(
            "fsa {} forward: input={}, kernel={}",
            self.direction,
            input.shape(),
            kernel.shape()
        );

        Ok(gather_forward(self, input, kernel))
    }
}

impl SavedState {
    pub fn input(&self) -> &Tensor4 {
        &self.input
    }

    pub fn kernel(&self) -> &Tensor4 {
        &self.kernel
    }

    pub fn operator(&self) -> &LocalAttention {
        &self.op
    }

    /// Backward pass. Consumes the saved state.
    pub fn backward(self, grad_output: &Tensor4) -> Result<Gradients> {
        backward(self, grad_output)
    }
}

/// Backward pass for one forward call.
///
/// # Errors
///
/// `ShapeMismatch` if `grad_output` does not have the forward input's shape.
pub fn backward(saved: SavedState, grad_output: &Tensor4) -> Result<Gradients> {
    let SavedState { op, input, kernel } = saved;
    validation::validate_grad_shape(input.shape(), grad_output.shape())?;

    log::trace!("fsa {} backward: grad_output={}", op.direction, grad_output.shape());

    let grad_input = scatter_input_grad(&op, &kernel, grad_output);
    let grad_kernel = kernel_grad(&op, &input, grad_output, kernel.shape());

    Ok(Gradients { grad_input, grad_kernel })
}

/// Dispatch by direction, mirroring the model-side call signature.
pub fn fsa_spatial(
    input: Arc<Tensor4>,
    kernel: Arc<Tensor4>,
    kernel_size: usize,
    kernel_map: Arc<KernelMap>,
    groups: usize,
    group_channels: usize,
    direction: Direction,
) -> Result<(Tensor4, SavedState)> {
    LocalAttention::new(direction, kernel_size, kernel_map, groups, group_channels)?
        .forward(input, kernel)
}

// =============================================================================
// KERNELS
// =============================================================================

/// out[b, c, p] = Σ_t kernel[b, g*K + t, p] * Σ_{j ∈ cell_t} in[b, c, shift_j(p)]
fn gather_forward(op: &LocalAttention, input: &Tensor4, kernel: &Tensor4) -> Tensor4 {
    let shape = input.shape();
    let mut output = Tensor4::zeros(shape);
    if shape.numel() == 0 {
        return output;
    }

    let (height, width) = (shape.height, shape.width);
    let taps: &[Tap] = op.kernel_map.taps();

    output
        .data_mut()
        .par_chunks_mut(shape.plane())
        .enumerate()
        .for_each(|(bc, out_plane)| {
            let (b, c) = (bc / shape.channels, bc % shape.channels);
            let g = c / op.group_channels;
            let in_plane = input.plane(b, c);

            for (t, tap) in taps.iter().enumerate() {
                let k_plane = kernel.plane(b, g * op.kernel_size + t);
                let cell = tap.cell();
                for h in 0..height {
                    for w in 0..width {
                        let p = h * width + w;
                        let gathered = op.direction.cell_sum(in_plane, h, w, cell, height, width);
                        out_plane[p] += k_plane[p] * gathered;
                    }
                }
            }
        });

    output
}

/// grad_in[b, c, q] = Σ_t Σ_{j ∈ cell_t} grad_out[b, c, p] * kernel[b, g*K + t, p]
/// where shift_j(p) = q.
///
/// Evaluated as a gather of the weighted output gradient over the negated
/// cell, so each worker owns its destination plane and no accumulation races
/// exist.
fn scatter_input_grad(op: &LocalAttention, kernel: &Tensor4, grad_output: &Tensor4) -> Tensor4 {
    let shape = grad_output.shape();
    let mut grad_input = Tensor4::zeros(shape);
    if shape.numel() == 0 {
        return grad_input;
    }

    let (height, width) = (shape.height, shape.width);
    let taps: &[Tap] = op.kernel_map.taps();

    grad_input
        .data_mut()
        .par_chunks_mut(shape.plane())
        .enumerate()
        .for_each(|(bc, gi_plane)| {
            let (b, c) = (bc / shape.channels, bc % shape.channels);
            let g = c / op.group_channels;
            let go_plane = grad_output.plane(b, c);
            let mut weighted = vec![0.0f32; shape.plane()];

            for (t, tap) in taps.iter().enumerate() {
                let k_plane = kernel.plane(b, g * op.kernel_size + t);
                weighted
                    .iter_mut()
                    .zip(go_plane.iter().zip(k_plane))
                    .for_each(|(dst, (&go, &k))| *dst = go * k);

                let (lo, hi) = tap.cell();
                for h in 0..height {
                    for w in 0..width {
                        gi_plane[h * width + w] +=
                            op.direction.cell_sum(&weighted, h, w, (-hi, -lo), height, width);
                    }
                }
            }
        });

    grad_input
}

/// grad_kernel[b, g*K + t, p] = Σ_{c in g} grad_out[b, c, p] * Σ_{j ∈ cell_t} in[b, c, shift_j(p)]
fn kernel_grad(
    op: &LocalAttention,
    input: &Tensor4,
    grad_output: &Tensor4,
    kernel_shape: Shape4,
) -> Tensor4 {
    let mut grad_kernel = Tensor4::zeros(kernel_shape);
    if kernel_shape.numel() == 0 {
        return grad_kernel;
    }

    let (height, width) = (kernel_shape.height, kernel_shape.width);
    let taps: &[Tap] = op.kernel_map.taps();
    let group_width = op.groups * op.kernel_size;

    grad_kernel
        .data_mut()
        .par_chunks_mut(kernel_shape.plane())
        .enumerate()
        .for_each(|(bk, gk_plane)| {
            let (b, gt) = (bk / group_width, bk % group_width);
            let (g, t) = (gt / op.kernel_size, gt % op.kernel_size);
            let cell = taps[t].cell();

            for c in g * op.group_channels..(g + 1) * op.group_channels {
                let go_plane = grad_output.plane(b, c);
                let in_plane = input.plane(b, c);
                for h in 0..height {
                    for w in 0..width {
                        let p = h * width + w;
                        let gathered = op.direction.cell_sum(in_plane, h, w, cell, height, width);
                        gk_plane[p] += go_plane[p] * gathered;
                    }
                }
            }
        });

    grad_kernel
}
