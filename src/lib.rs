//! FSA: multi-stride local spatial attention
//!
//! CPU kernels for the directional local-attention operator used by
//! local-attention-mixer super-resolution networks:
//!
//! - [`kernel_map`]: the symmetric, center-dense / edge-sparse 1-D sampling
//!   lattice and its patch size
//! - [`fsa`]: horizontal / vertical gather forward and scatter-add backward
//! - [`cache`]: content-addressed sharing of kernel maps across blocks
//! - [`config`]: JSON mixer configuration building both operators
//! - [`gradcheck`]: finite-difference verification of the backward
//!
//! The `python` feature builds the `fsa_attn` extension module.

pub mod activation;
pub mod cache;
pub mod config;
pub mod error;
pub mod fsa;
pub mod gradcheck;
pub mod kernel_map;
pub mod tensor;
pub mod validation;

#[cfg(feature = "python")]
pub mod python;

pub use cache::KernelMapCache;
pub use config::{MixerConfig, MixerOperators};
pub use error::{FsaError, Result};
pub use fsa::{backward, fsa_spatial, Direction, Gradients, LocalAttention, SavedState};
pub use kernel_map::{generate, KernelMap, StrideSchedule, Tap};
pub use tensor::{Shape4, Tensor4};
