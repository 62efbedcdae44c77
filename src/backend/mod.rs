//! Compute backends executing kernel launches against device buffers.
//!
//! The [`ComputeBackend`] trait is the only thing the rest of the crate knows
//! about the device: it allocates flat `f32` buffers behind opaque
//! [`BufferId`] handles, moves data in and out, and executes
//! [`KernelLaunch`](crate::kernels::KernelLaunch) descriptors in submission
//! order.
//!
//! - [`CpuBackend`]: host arena, rayon + SIMD kernels. Always available.
//! - [`WgpuCompute`](crate::gpu::WgpuCompute): WGSL kernels on a wgpu device
//!   (feature `gpu`).

mod cpu;

pub use cpu::CpuBackend;

use crate::error::FlatnetResult;
use crate::kernels::KernelLaunch;

/// Handle of a device buffer owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

/// An in-order command queue over flat `f32` buffers.
///
/// Reads block until every previously launched kernel has completed.
pub trait ComputeBackend: Send {
    /// Short human-readable name ("cpu", adapter name, ...).
    fn name(&self) -> &str;

    /// Allocates a device buffer initialised with `data`.
    fn create_buffer(&mut self, data: &[f32]) -> FlatnetResult<BufferId>;

    /// Overwrites `data.len()` elements starting at element `offset`.
    fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[f32]) -> FlatnetResult<()>;

    /// Copies the whole device buffer into `out`.
    ///
    /// `out.len()` must equal the device length.
    fn read_buffer(&mut self, id: BufferId, out: &mut [f32]) -> FlatnetResult<()>;

    /// Element count of a device buffer.
    fn buffer_len(&self, id: BufferId) -> FlatnetResult<usize>;

    /// Frees a device buffer. Unknown handles are ignored.
    fn release_buffer(&mut self, id: BufferId);

    /// Enqueues one kernel.
    fn launch(&mut self, launch: &KernelLaunch) -> FlatnetResult<()>;

    /// Blocks until all enqueued work is complete.
    fn finish(&mut self) -> FlatnetResult<()>;
}

/// Builds the default backend: wgpu when requested and available, CPU
/// otherwise.
pub fn default_backend(prefer_gpu: bool) -> Box<dyn ComputeBackend> {
    #[cfg(feature = "gpu")]
    if prefer_gpu {
        match crate::gpu::WgpuCompute::init(crate::gpu::WgpuOptions::compute()) {
            Ok(gpu) => return Box::new(gpu),
            Err(e) => log::warn!("GPU backend unavailable ({}), falling back to CPU", e),
        }
    }
    #[cfg(not(feature = "gpu"))]
    if prefer_gpu {
        log::warn!("Built without the `gpu` feature, using CPU backend");
    }
    Box::new(CpuBackend::new())
}
