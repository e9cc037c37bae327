//! Python bindings
//!
//! Exposes the kernel map and the forward/backward pair to Python. Tensors
//! cross the boundary as flat f32 lists plus an NCHW shape tuple.
//!
//! # Python Example
//!
//! ```python
//! import fsa_attn
//!
//! rows, patch_size = fsa_attn.generate_kernel_map(13, [4, 6, 7], [1, 2, 4])
//!
//! kmap = fsa_attn.KernelMap(13, [4, 6, 7], [1, 2, 4])
//! print(kmap.rows, kmap.patch_size)
//!
//! out, ctx = fsa_attn.fsa_forward(x, (1, 8, 16, 16), k, kmap, 4, 2, "horizontal")
//! grad_x, grad_k = ctx.backward(grad_out)
//! ctx.backward(grad_out)  # RuntimeError: already consumed
//! ```

use std::sync::Arc;

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;

use crate::fsa::{Direction, LocalAttention, SavedState};
use crate::kernel_map::{self, KernelMap, StrideSchedule};
use crate::tensor::{Shape4, Tensor4};

/// Immutable kernel map shared by every call that receives it.
#[pyclass(name = "KernelMap", frozen)]
pub struct PyKernelMap {
    inner: Arc<KernelMap>,
}

#[pymethods]
impl PyKernelMap {
    #[new]
    fn new(kernel_size: usize, kernel_loc: Vec<usize>, kernel_stride: Vec<usize>) -> PyResult<Self> {
        let schedule = StrideSchedule::new(kernel_loc, kernel_stride)?;
        let (map, _) = kernel_map::generate(kernel_size, &schedule)?;
        Ok(Self { inner: Arc::new(map) })
    }

    /// `[[offset, stride], ...]`
    #[getter]
    fn rows(&self) -> Vec<(i32, i32)> {
        self.inner.taps().iter().map(|t| (t.offset, t.stride)).collect()
    }

    #[getter]
    fn kernel_size(&self) -> usize {
        self.inner.kernel_size()
    }

    #[getter]
    fn patch_size(&self) -> usize {
        self.inner.patch_size()
    }

    #[getter]
    fn content_id(&self) -> String {
        self.inner.content_id().to_string()
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }
}

/// Saved forward state. `backward` may be called once.
#[pyclass(name = "FsaContext")]
pub struct PyFsaContext {
    saved: Option<SavedState>,
}

#[pymethods]
impl PyFsaContext {
    fn backward(&mut self, grad_output: Vec<f32>) -> PyResult<(Vec<f32>, Vec<f32>)> {
        let saved = self.saved.take().ok_or_else(|| {
            PyRuntimeError::new_err("backward already called for this forward")
        })?;
        let grad_output = Tensor4::from_vec(saved.input().shape(), grad_output)?;
        let grads = saved.backward(&grad_output)?;
        Ok((grads.grad_input.into_vec(), grads.grad_kernel.into_vec()))
    }

    #[getter]
    fn consumed(&self) -> bool {
        self.saved.is_none()
    }
}

/// `[[offset, stride], ...]` rows and the patch size for a stride schedule.
#[pyfunction]
fn generate_kernel_map(
    kernel_size: usize,
    kernel_loc: Vec<usize>,
    kernel_stride: Vec<usize>,
) -> PyResult<(Vec<(i32, i32)>, usize)> {
    let schedule = StrideSchedule::new(kernel_loc, kernel_stride)?;
    let (map, patch_size) = kernel_map::generate(kernel_size, &schedule)?;
    let rows = map.to_rows().into_iter().map(|[offset, stride]| (offset, stride)).collect();
    Ok((rows, patch_size))
}

#[pyfunction]
#[pyo3(signature = (input, input_shape, kernel, kernel_map, groups, group_channels, direction))]
fn fsa_forward(
    input: Vec<f32>,
    input_shape: (usize, usize, usize, usize),
    kernel: Vec<f32>,
    kernel_map: &PyKernelMap,
    groups: usize,
    group_channels: usize,
    direction: &str,
) -> PyResult<(Vec<f32>, PyFsaContext)> {
    let direction: Direction = direction.parse()?;
    let map = Arc::clone(&kernel_map.inner);
    let op = LocalAttention::new(direction, map.kernel_size(), map, groups, group_channels)?;

    let (b, c, h, w) = input_shape;
    let input = Tensor4::from_vec(Shape4::new(b, c, h, w), input)?;
    let kernel = Tensor4::from_vec(op.kernel_shape(input.shape()), kernel)?;

    let (output, saved) = op.forward(Arc::new(input), Arc::new(kernel))?;
    Ok((output.into_vec(), PyFsaContext { saved: Some(saved) }))
}

#[pyfunction]
fn fsa_backward(mut ctx: PyRefMut<'_, PyFsaContext>, grad_output: Vec<f32>) -> PyResult<(Vec<f32>, Vec<f32>)> {
    ctx.backward(grad_output)
}

#[pymodule]
fn fsa_attn(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyKernelMap>()?;
    m.add_class::<PyFsaContext>()?;
    m.add_function(wrap_pyfunction!(generate_kernel_map, m)?)?;
    m.add_function(wrap_pyfunction!(fsa_forward, m)?)?;
    m.add_function(wrap_pyfunction!(fsa_backward, m)?)?;
    Ok(())
}
