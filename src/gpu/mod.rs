//! wgpu compute backend.
//!
//! Only available with the `gpu` feature. [`WgpuCompute`] implements
//! [`ComputeBackend`](crate::backend::ComputeBackend) on top of a wgpu
//! device: every [`BufferId`](crate::backend::BufferId) is one storage
//! buffer, every kernel is a WGSL entry point.
//!
//! # Architecture
//!
//! All kernels share one bind group layout:
//!
//! - Bindings 0-3: operand buffers (storage, read_write)
//! - Binding 4: [`KernelUniforms`] (uniform)
//!
//! Operands are assigned to binding slots per launch. Views over the same
//! buffer share a slot, so a buffer is never bound twice; unused slots get
//! small placeholder buffers.
//!
//! # Example
//!
//! ```rust,no_run
//! use flatnet::gpu::{WgpuCompute, WgpuOptions};
//! use flatnet::ComputeBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut gpu = WgpuCompute::init(WgpuOptions::default())?;
//! let id = gpu.create_buffer(&[1.0, 2.0, 3.0])?;
//! let mut out = vec![0.0; 3];
//! gpu.read_buffer(id, &mut out)?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod compute;
mod pipeline;
pub mod shaders;
mod storage;
mod uniforms;

pub use backend::{PowerPreference, WgpuBackend, WgpuOptions};
pub use compute::WgpuCompute;
pub use pipeline::{PipelineCache, MATMUL_TILES};
pub use storage::GpuStorage;
pub use uniforms::KernelUniforms;

/// Largest dimension of a compute dispatch.
pub const MAX_DISPATCH_DIM: usize = 65_535;

/// Every device buffer holds at least this many floats; zero-sized storage
/// bindings are invalid.
pub const MIN_BUFFER_ELEMENTS: usize = 4;

/// Splits a 1-D work-group count into an `(x, y)` dispatch within
/// [`MAX_DISPATCH_DIM`].
#[inline]
pub fn split_dispatch(groups: usize) -> (u32, u32) {
    let groups = groups.max(1);
    if groups <= MAX_DISPATCH_DIM {
        (groups as u32, 1)
    } else {
        let y = groups.div_ceil(MAX_DISPATCH_DIM);
        let x = groups.div_ceil(y);
        (x as u32, y as u32)
    }
}

/// Byte size of a buffer holding `elements` floats, padded to the minimum.
#[inline]
pub fn storage_bytes(elements: usize) -> u64 {
    (elements.max(MIN_BUFFER_ELEMENTS) * std::mem::size_of::<f32>()) as u64
}
