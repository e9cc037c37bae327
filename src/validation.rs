//! Construction-time and call-time validation
//!
//! Catches malformed stride schedules and tensor shapes before any kernel
//! runs, with error messages naming the invariant that failed.

use crate::error::{FsaError, Result};
use crate::tensor::Shape4;

/// Validate a stride schedule against the kernel size.
///
/// Checks, in order:
/// - `kernel_size` is odd and at least 3
/// - the schedule is non-empty and `locations` / `strides` have equal length
/// - `locations` are strictly increasing and start above 1 (the center)
/// - every stride is at least 1
/// - the last location equals `kernel_size / 2 + 1`
pub fn validate_schedule(kernel_size: usize, locations: &[usize], strides: &[usize]) -> Result<()> {
    if kernel_size % 2 == 0 || kernel_size < 3 {
        return Err(FsaError::InvalidKernelSize(kernel_size));
    }

    if locations.len() != strides.len() {
        return Err(FsaError::ScheduleLengthMismatch {
            locations: locations.len(),
            strides: strides.len(),
        });
    }

    if locations.is_empty() {
        return Err(FsaError::EmptySchedule);
    }

    // The center tap occupies location 1
    let mut previous = 1usize;
    for (index, &location) in locations.iter().enumerate() {
        if location <= previous {
            return Err(FsaError::NonIncreasingLocation { index, previous, location });
        }
        previous = location;
    }

    if let Some(index) = strides.iter().position(|&s| s == 0) {
        return Err(FsaError::ZeroStride { index });
    }

    let expected = kernel_size / 2 + 1;
    let last = locations[locations.len() - 1];
    if last != expected {
        return Err(FsaError::LocationSpan { last, expected });
    }

    log::trace!(
        "Stride schedule validated: kernel_size={}, locations={:?}, strides={:?}",
        kernel_size,
        locations,
        strides
    );

    Ok(())
}

/// Validate the input / kernel-weight pair of one operator call.
///
/// # Arguments
///
/// * `input` - Feature tensor shape, `[B, groups * group_channels, H, W]`
/// * `kernel` - Kernel-weight tensor shape, `[B, groups * kernel_size, H, W]`
/// * `kernel_size` - Taps per group
/// * `groups` - Weight groups
/// * `group_channels` - Feature channels sharing one group's weights
///
/// # Returns
///
/// `Ok(())` if both shapes agree with the configuration, otherwise a
/// `ShapeMismatch` naming the offending tensor.
pub fn validate_call_shapes(
    input: Shape4,
    kernel: Shape4,
    kernel_size: usize,
    groups: usize,
    group_channels: usize,
) -> Result<()> {
    if input.channels != groups * group_channels {
        return Err(FsaError::ShapeMismatch {
            tensor: "input",
            expected: format!(
                "{} channels (groups={} x group_channels={})",
                groups * group_channels,
                groups,
                group_channels
            ),
            actual: format!("{} channels", input.channels),
        });
    }

    let expected_kernel = Shape4::new(input.batch, groups * kernel_size, input.height, input.width);
    if kernel != expected_kernel {
        return Err(FsaError::ShapeMismatch {
            tensor: "kernel",
            expected: format!("{} (groups={} x kernel_size={})", expected_kernel, groups, kernel_size),
            actual: kernel.to_string(),
        });
    }

    Ok(())
}

/// Validate that an output gradient matches the forward input shape.
pub fn validate_grad_shape(input: Shape4, grad_output: Shape4) -> Result<()> {
    if input != grad_output {
        return Err(FsaError::ShapeMismatch {
            tensor: "grad_output",
            expected: input.to_string(),
            actual: grad_output.to_string(),
        });
    }
    Ok(())
}
