//! Dense NCHW tensors
//!
//! Minimal contiguous f32 storage for the feature, kernel-weight and gradient
//! tensors the local-attention operator consumes. Layout is row-major
//! `[batch, channels, height, width]`.

use std::fmt;

use rand::Rng;

use crate::error::{FsaError, Result};

/// Shape of a 4-D NCHW tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Shape4 {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Shape4 {
    pub const fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self { batch, channels, height, width }
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.batch * self.channels * self.height * self.width
    }

    /// Elements in one `(b, c)` plane.
    pub fn plane(&self) -> usize {
        self.height * self.width
    }

    /// Flat index of `(b, c, h, w)`.
    #[inline]
    pub fn index(&self, b: usize, c: usize, h: usize, w: usize) -> usize {
        ((b * self.channels + c) * self.height + h) * self.width + w
    }
}

impl fmt::Display for Shape4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.batch, self.channels, self.height, self.width)
    }
}

/// Contiguous f32 tensor with an NCHW shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor4 {
    shape: Shape4,
    data: Vec<f32>,
}

impl Tensor4 {
    /// Wrap existing data. Fails if `data.len()` disagrees with the shape.
    pub fn from_vec(shape: Shape4, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(FsaError::ShapeMismatch {
                tensor: "data",
                expected: format!("{} elements for {}", shape.numel(), shape),
                actual: format!("{} elements", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Shape4) -> Self {
        Self { shape, data: vec![0.0; shape.numel()] }
    }

    pub fn full(shape: Shape4, value: f32) -> Self {
        Self { shape, data: vec![value; shape.numel()] }
    }

    /// Uniform samples in `[-1, 1)`.
    pub fn random<R: Rng + ?Sized>(shape: Shape4, rng: &mut R) -> Self {
        let data = (0..shape.numel())
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect();
        Self { shape, data }
    }

    pub fn shape(&self) -> Shape4 {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn get(&self, b: usize, c: usize, h: usize, w: usize) -> f32 {
        self.data[self.shape.index(b, c, h, w)]
    }

    #[inline]
    pub fn set(&mut self, b: usize, c: usize, h: usize, w: usize, value: f32) {
        let idx = self.shape.index(b, c, h, w);
        self.data[idx] = value;
    }

    /// One `(b, c)` plane as a `[height * width]` slice.
    pub fn plane(&self, b: usize, c: usize) -> &[f32] {
        let start = self.shape.index(b, c, 0, 0);
        &self.data[start..start + self.shape.plane()]
    }

    /// `ShapeMismatch` unless `other` has this tensor's shape.
    pub fn check_same_shape(&self, other: &Tensor4, tensor: &'static str) -> Result<()> {
        if self.shape != other.shape {
            return Err(FsaError::ShapeMismatch {
                tensor,
                expected: self.shape.to_string(),
                actual: other.shape.to_string(),
            });
        }
        Ok(())
    }

    /// Element-wise dot product (accumulated in f64) with a same-shape tensor.
    pub fn dot(&self, other: &Tensor4) -> Result<f64> {
        self.check_same_shape(other, "dot operand")?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum())
    }

    /// Largest absolute element-wise difference to a same-shape tensor.
    pub fn max_abs_diff(&self, other: &Tensor4) -> Result<f32> {
        self.check_same_shape(other, "comparison operand")?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_index_is_row_major_nchw() {
        let shape = Shape4::new(2, 3, 4, 5);
        assert_eq!(shape.index(0, 0, 0, 1), 1);
        assert_eq!(shape.index(0, 0, 1, 0), 5);
        assert_eq!(shape.index(0, 1, 0, 0), 20);
        assert_eq!(shape.index(1, 0, 0, 0), 60);
        assert_eq!(shape.numel(), 120);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let err = Tensor4::from_vec(Shape4::new(1, 1, 2, 2), vec![0.0; 3]).unwrap_err();
        assert!(err.is_shape_error());
    }

    #[test]
    fn test_plane_slice() {
        let shape = Shape4::new(1, 2, 2, 2);
        let t = Tensor4::from_vec(shape, (0..8).map(|v| v as f32).collect()).unwrap();
        assert_eq!(t.plane(0, 1), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(t.get(0, 1, 1, 0), 6.0);
    }

    #[test]
    fn test_binary_ops_check_shapes() {
        let a = Tensor4::full(Shape4::new(1, 1, 2, 2), 2.0);
        let b = Tensor4::full(Shape4::new(1, 1, 2, 2), 0.5);
        assert_eq!(a.dot(&b).unwrap(), 4.0);
        assert_eq!(a.max_abs_diff(&b).unwrap(), 1.5);

        // Same element count, different shape
        let c = Tensor4::full(Shape4::new(1, 4, 1, 1), 0.5);
        assert!(a.dot(&c).unwrap_err().is_shape_error());
        assert!(a.max_abs_diff(&Tensor4::zeros(Shape4::new(1, 1, 2, 3))).is_err());
    }

    #[test]
    fn test_random_is_seeded_and_bounded() {
        let shape = Shape4::new(1, 2, 3, 4);
        let a = Tensor4::random(shape, &mut Xoshiro256PlusPlus::seed_from_u64(7));
        let b = Tensor4::random(shape, &mut Xoshiro256PlusPlus::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(a.data().iter().all(|v| (-1.0..1.0).contains(v)));
    }
}
