//! Device-resident float buffers.

use wgpu::util::DeviceExt;

use crate::error::{FlatnetError, FlatnetResult};
use crate::gpu::{storage_bytes, MIN_BUFFER_ELEMENTS};

/// One storage buffer holding `len` floats.
///
/// The wgpu buffer is padded to [`MIN_BUFFER_ELEMENTS`]; `len` is the
/// logical length seen by [`ComputeBackend`](crate::backend::ComputeBackend).
pub struct GpuStorage {
    pub buffer: wgpu::Buffer,
    len: usize,
}

impl GpuStorage {
    /// Creates a buffer initialised with `data`.
    pub fn upload(device: &wgpu::Device, data: &[f32], max_bytes: u64) -> FlatnetResult<Self> {
        let bytes = storage_bytes(data.len());
        if bytes > max_bytes {
            return Err(FlatnetError::buffer(format!(
                "buffer of {} floats exceeds the device binding limit of {} bytes",
                data.len(),
                max_bytes
            )));
        }

        let contents = if data.len() < MIN_BUFFER_ELEMENTS {
            let mut padded = [0.0f32; MIN_BUFFER_ELEMENTS];
            padded[..data.len()].copy_from_slice(data);
            bytemuck::cast_slice(&padded).to_vec()
        } else {
            bytemuck::cast_slice(data).to_vec()
        };

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("flatnet storage"),
            contents: &contents,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });

        Ok(Self {
            buffer,
            len: data.len(),
        })
    }

    /// Writes `data` starting at float `offset`.
    pub fn write(&self, queue: &wgpu::Queue, offset: usize, data: &[f32]) -> FlatnetResult<()> {
        if offset + data.len() > self.len {
            return Err(FlatnetError::shape_mismatch(&[self.len], &[offset + data.len()]));
        }
        if data.is_empty() {
            return Ok(());
        }
        let byte_offset = (offset * std::mem::size_of::<f32>()) as u64;
        queue.write_buffer(&self.buffer, byte_offset, bytemuck::cast_slice(data));
        Ok(())
    }

    /// Copies the buffer back into `out`, blocking until the transfer completes.
    pub fn download(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        out: &mut [f32],
    ) -> FlatnetResult<()> {
        if out.len() != self.len {
            return Err(FlatnetError::shape_mismatch(&[self.len], &[out.len()]));
        }
        if out.is_empty() {
            return Ok(());
        }
        let size_bytes = (self.len * std::mem::size_of::<f32>()) as u64;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("flatnet staging"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("flatnet download"),
        });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, size_bytes);
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| FlatnetError::buffer(format!("Failed to receive map result: {}", e)))??;

        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging.unmap();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for GpuStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuStorage")
            .field("len", &self.len)
            .field("bytes", &self.buffer.size())
            .finish()
    }
}
