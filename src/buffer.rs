//! Host arrays paired with a device-resident mirror.
//!
//! A [`Buffer`] is the unit of ownership for network state: one per role
//! (activations, weights, increments, bias, deltas, targets, reduction
//! scratch). Host and device copies are synchronised explicitly:
//!
//! - [`write_to_device`](Buffer::write_to_device) before a kernel reads data
//!   prepared on the host,
//! - [`read_from_device`](Buffer::read_from_device) after kernels wrote data
//!   the host needs.
//!
//! All transfers block until the backend reports completion.

use crate::backend::{BufferId, ComputeBackend};
use crate::error::{FlatnetError, FlatnetResult};
use crate::view::MatrixView;

/// A named flat `f32` array with a device mirror.
pub struct Buffer {
    name: &'static str,
    host: Vec<f32>,
    device: BufferId,
}

impl Buffer {
    /// Allocates the device mirror and uploads `host` once.
    pub fn create(
        name: &'static str,
        host: Vec<f32>,
        backend: &mut dyn ComputeBackend,
    ) -> FlatnetResult<Self> {
        let device = backend.create_buffer(&host)?;
        log::debug!("Buffer '{}': {} elements on {}", name, host.len(), backend.name());
        Ok(Self { name, host, device })
    }

    /// Zero-filled buffer of `len` elements.
    pub fn zeros(name: &'static str, len: usize, backend: &mut dyn ComputeBackend) -> FlatnetResult<Self> {
        Self::create(name, vec![0.0; len], backend)
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.device
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.host.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Host copy; stale until [`read_from_device`](Self::read_from_device).
    #[inline]
    pub fn host(&self) -> &[f32] {
        &self.host
    }

    /// Host copy for filling; push with [`write_to_device`](Self::write_to_device).
    #[inline]
    pub fn host_mut(&mut self) -> &mut [f32] {
        &mut self.host
    }

    /// View over this buffer.
    #[inline]
    pub fn view(&self, rows: usize, cols: usize, offset: usize) -> MatrixView {
        MatrixView::new(self.device, rows, cols, offset)
    }

    /// Pushes the first `len` host elements to the device, or all of them.
    ///
    /// Partial pushes are used for minibatch-sized refreshes of buffers
    /// sized for the whole data set.
    pub fn write_to_device(&self, backend: &mut dyn ComputeBackend, len: Option<usize>) -> FlatnetResult<()> {
        let len = len.unwrap_or(self.host.len());
        if len > self.host.len() {
            return Err(FlatnetError::shape_mismatch(&[self.host.len()], &[len]));
        }
        backend.write_buffer(self.device, 0, &self.host[..len])
    }

    /// Pushes `host[range]` to the same range on the device.
    pub fn write_range_to_device(
        &self,
        backend: &mut dyn ComputeBackend,
        range: std::ops::Range<usize>,
    ) -> FlatnetResult<()> {
        if range.end > self.host.len() || range.start > range.end {
            return Err(FlatnetError::shape_mismatch(
                &[self.host.len()],
                &[range.start, range.end],
            ));
        }
        backend.write_buffer(self.device, range.start, &self.host[range])
    }

    /// Pulls the whole device array into the host copy.
    pub fn read_from_device(&mut self, backend: &mut dyn ComputeBackend) -> FlatnetResult<()> {
        let device_len = backend.buffer_len(self.device)?;
        if device_len != self.host.len() {
            return Err(FlatnetError::shape_mismatch(&[self.host.len()], &[device_len]));
        }
        backend.read_buffer(self.device, &mut self.host)
    }

    /// Frees the device mirror.
    pub fn release(self, backend: &mut dyn ComputeBackend) {
        backend.release_buffer(self.device);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("len", &self.host.len())
            .field("device", &self.device)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;

    #[test]
    fn test_create_and_read_back() {
        let mut backend = CpuBackend::new();
        let mut buf = Buffer::create("w", vec![1.0, 2.0, 3.0], &mut backend).unwrap();
        buf.host_mut().fill(0.0);
        buf.read_from_device(&mut backend).unwrap();
        assert_eq!(buf.host(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_partial_write() {
        let mut backend = CpuBackend::new();
        let mut buf = Buffer::zeros("a", 4, &mut backend).unwrap();
        buf.host_mut().copy_from_slice(&[5.0, 6.0, 7.0, 8.0]);
        buf.write_to_device(&mut backend, Some(2)).unwrap();
        buf.read_from_device(&mut backend).unwrap();
        assert_eq!(buf.host(), &[5.0, 6.0, 0.0, 0.0]);
    }

    #[test]
    fn test_range_write() {
        let mut backend = CpuBackend::new();
        let mut buf = Buffer::zeros("a", 4, &mut backend).unwrap();
        buf.host_mut().copy_from_slice(&[5.0, 6.0, 7.0, 8.0]);
        buf.write_range_to_device(&mut backend, 1..3).unwrap();
        buf.read_from_device(&mut backend).unwrap();
        assert_eq!(buf.host(), &[0.0, 6.0, 7.0, 0.0]);
        assert!(buf.write_range_to_device(&mut backend, 3..9).is_err());
    }

    #[test]
    fn test_oversized_write_rejected() {
        let mut backend = CpuBackend::new();
        let buf = Buffer::zeros("a", 2, &mut backend).unwrap();
        assert!(buf.write_to_device(&mut backend, Some(3)).is_err());
    }

    #[test]
    fn test_release() {
        let mut backend = CpuBackend::new();
        let buf = Buffer::zeros("a", 2, &mut backend).unwrap();
        let id = buf.id();
        buf.release(&mut backend);
        assert!(backend.buffer_len(id).is_err());
    }
}
