//! Multi-stride 1-D kernel maps
//!
//! A kernel map is the symmetric, center-dense / edge-sparse sampling lattice
//! the local-attention operator gathers along. Taps near the query position
//! sample every grid cell; taps further out skip by the stride of their
//! segment, giving a wide receptive field for a small tap count.
//!
//! Example (`kernel_size = 13`, locations `[4, 6, 7]`, strides `[1, 2, 4]`):
//!
//! ```text
//! offsets: -8 -6 -4 -3 -2 -1  0  1  2  3  4  6  8
//! strides:  4  2  2  1  1  1  1  1  1  1  2  2  4
//! ```

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{FsaError, Result};
use crate::validation;

/// Piecewise sampling-density specification for one side of the kernel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StrideSchedule {
    locations: Vec<usize>,
    strides: Vec<usize>,
}

impl StrideSchedule {
    /// Pair up stride-change locations with segment strides.
    ///
    /// Only the lengths are checked here; the full invariants depend on the
    /// kernel size and are checked by [`generate`].
    pub fn new(locations: Vec<usize>, strides: Vec<usize>) -> Result<Self> {
        if locations.len() != strides.len() {
            return Err(FsaError::ScheduleLengthMismatch {
                locations: locations.len(),
                strides: strides.len(),
            });
        }
        Ok(Self { locations, strides })
    }

    pub fn locations(&self) -> &[usize] {
        &self.locations
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// `(location, stride)` pairs in order.
    pub fn segments(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.locations.iter().copied().zip(self.strides.iter().copied())
    }
}

/// One sampling position: signed displacement from the query plus the
/// sampling granularity of its segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Tap {
    pub offset: i32,
    pub stride: i32,
}

impl Tap {
    pub const CENTER: Tap = Tap { offset: 0, stride: 1 };

    /// Inclusive range of axis displacements this tap aggregates: `stride`
    /// cells starting at `offset` and extending away from the center.
    ///
    /// On each side the cells of consecutive taps tile the axis without gaps,
    /// out to `patch_size / 2`.
    pub fn cell(&self) -> (i32, i32) {
        if self.offset >= 0 {
            (self.offset, self.offset + self.stride - 1)
        } else {
            (self.offset - self.stride + 1, self.offset)
        }
    }
}

/// Immutable symmetric tap table, built once per operator configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KernelMap {
    kernel_size: usize,
    taps: Vec<Tap>,
    patch_size: usize,
    #[serde(skip)]
    content_id: String,
}

impl KernelMap {
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn taps(&self) -> &[Tap] {
        &self.taps
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Minimum contiguous extent the weight-generation convolution must see.
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn offsets(&self) -> Vec<i32> {
        self.taps.iter().map(|t| t.offset).collect()
    }

    pub fn tap_strides(&self) -> Vec<i32> {
        self.taps.iter().map(|t| t.stride).collect()
    }

    /// `[kernel_size, 2]` integer rows `[offset, stride]`.
    pub fn to_rows(&self) -> Vec<[i32; 2]> {
        self.taps.iter().map(|t| [t.offset, t.stride]).collect()
    }

    /// Content-addressed id (16 hex chars of SHA-256 over kernel size and
    /// schedule). Identical configurations always share an id.
    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// Largest absolute offset, i.e. the position of the outermost tap.
    pub fn radius(&self) -> usize {
        self.taps.last().map(|t| t.offset.unsigned_abs() as usize).unwrap_or(0)
    }

    /// Furthest displacement any tap cell reaches, `patch_size / 2`.
    pub fn reach(&self) -> usize {
        self.taps.last().map(|t| t.cell().1.unsigned_abs() as usize).unwrap_or(0)
    }
}

/// Build the kernel map and patch size for a stride schedule.
///
/// Starting from the center tap `(0, 1)`, each `(location, stride)` segment
/// appends `location - previous_location` taps. The k-th new tap sits at
/// `last_offset + last_stride + k * stride`, where `(last_offset,
/// last_stride)` is the final tap before the segment. The one-sided list is
/// then mirrored (center excluded) to the negative side.
///
/// # Arguments
///
/// * `kernel_size` - Number of taps (odd, >= 3)
/// * `schedule` - One-sided stride schedule, last location `kernel_size / 2 + 1`
///
/// # Returns
///
/// The symmetric map and its patch size, `2 * (last_offset + last_stride) - 1`.
///
/// # Errors
///
/// Any violated schedule invariant (see [`validation::validate_schedule`]),
/// or `OffsetOverflow` if an offset or the patch size does not fit in `i32`.
pub fn generate(kernel_size: usize, schedule: &StrideSchedule) -> Result<(KernelMap, usize)> {
    validation::validate_schedule(kernel_size, schedule.locations(), schedule.strides())?;

    let mut side = Vec::with_capacity(kernel_size / 2 + 1);
    side.push(Tap::CENTER);

    let mut previous = 1usize;
    for (location, stride) in schedule.segments() {
        let first = side.len();
        let anchor = side[first - 1];
        let stride = i32::try_from(stride).map_err(|_| FsaError::OffsetOverflow { tap: first })?;
        let base = anchor
            .offset
            .checked_add(anchor.stride)
            .ok_or(FsaError::OffsetOverflow { tap: first })?;

        for k in 0..location - previous {
            let tap = first + k;
            let offset = i32::try_from(k)
                .ok()
                .and_then(|k| k.checked_mul(stride))
                .and_then(|step| base.checked_add(step))
                .ok_or(FsaError::OffsetOverflow { tap })?;
            side.push(Tap { offset, stride });
        }
        previous = location;
    }

    let last = side[side.len() - 1];
    // reach >= 2, so the subtraction cannot underflow
    let patch_size = last
        .offset
        .checked_add(last.stride)
        .and_then(|reach| reach.checked_mul(2))
        .map(|span| span - 1)
        .ok_or(FsaError::OffsetOverflow { tap: side.len() - 1 })?;
    let patch_size = patch_size as usize;

    let mut taps: Vec<Tap> = side[1..]
        .iter()
        .rev()
        .map(|t| Tap { offset: -t.offset, stride: t.stride })
        .collect();
    taps.extend_from_slice(&side);

    if taps.len() != kernel_size {
        return Err(FsaError::KernelMapLength { expected: kernel_size, actual: taps.len() });
    }

    let content_id = compute_map_id(kernel_size, schedule);

    log::debug!(
        "Kernel map {} generated: kernel_size={}, radius={}, patch_size={}",
        content_id,
        kernel_size,
        last.offset,
        patch_size
    );

    let map = KernelMap { kernel_size, taps, patch_size, content_id };
    Ok((map, patch_size))
}

/// Hex SHA-256 prefix over the kernel size and the schedule.
pub fn compute_map_id(kernel_size: usize, schedule: &StrideSchedule) -> String {
    let mut hasher = Sha256::new();
    hasher.update((kernel_size as u64).to_le_bytes());
    hasher.update((schedule.locations().len() as u64).to_le_bytes());
    for (location, stride) in schedule.segments() {
        hasher.update((location as u64).to_le_bytes());
        hasher.update((stride as u64).to_le_bytes());
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}
