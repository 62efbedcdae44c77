//! [`ComputeBackend`] implementation on wgpu.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::backend::{BufferId, ComputeBackend};
use crate::error::{FlatnetError, FlatnetResult};
use crate::gpu::backend::{WgpuBackend, WgpuOptions};
use crate::gpu::pipeline::{PipelineCache, OPERAND_SLOTS};
use crate::gpu::storage::GpuStorage;
use crate::gpu::uniforms::{KernelUniforms, Slots};
use crate::gpu::{split_dispatch, storage_bytes};
use crate::kernels::{KernelLaunch, KernelOp};
use crate::view::MatrixView;

/// Kernel operands by role. `None` marks a role the kernel does not use.
type Operands = [Option<MatrixView>; 4];

fn operands(op: &KernelOp) -> Operands {
    match *op {
        KernelOp::MatMul { a, b, c, bias, .. } => [Some(a), Some(b), Some(c), bias],
        KernelOp::Softmax { m } => [None, None, Some(m), None],
        KernelOp::Subtract { x, y, result } => [Some(x), Some(y), Some(result), None],
        KernelOp::SigmoidDerivative { delta, activation } => {
            [Some(activation), None, Some(delta), None]
        }
        KernelOp::RowSum { m, result, .. } => [Some(m), None, Some(result), None],
        KernelOp::ElementWiseSum { a, b, result, .. } => [Some(a), Some(b), Some(result), None],
        KernelOp::Reduce { x, y, scratch, .. } => [Some(x), y, Some(scratch), None],
        KernelOp::Scale { m, .. } => [None, None, Some(m), None],
    }
}

/// Gives each distinct buffer its own binding slot, in first-use order.
/// Unused roles point at slot 0.
fn assign_slots(ops: &Operands) -> (Vec<BufferId>, Slots) {
    let mut bound: Vec<BufferId> = Vec::with_capacity(OPERAND_SLOTS);
    let mut slot = |view: &Option<MatrixView>| -> u32 {
        match view {
            Some(v) => match bound.iter().position(|&id| id == v.buffer) {
                Some(pos) => pos as u32,
                None => {
                    bound.push(v.buffer);
                    (bound.len() - 1) as u32
                }
            },
            None => 0,
        }
    };
    let slots = Slots {
        a: slot(&ops[0]),
        b: slot(&ops[1]),
        c: slot(&ops[2]),
        bias: slot(&ops[3]),
    };
    (bound, slots)
}

/// wgpu-backed compute device.
pub struct WgpuCompute {
    context: WgpuBackend,
    pipelines: PipelineCache,
    buffers: HashMap<usize, GpuStorage>,
    next_id: usize,
    placeholders: Vec<wgpu::Buffer>,
    max_binding_bytes: u64,
}

impl WgpuCompute {
    /// Opens a device and compiles every kernel.
    pub fn init(options: WgpuOptions) -> FlatnetResult<Self> {
        let context = WgpuBackend::init(&options)?;
        let pipelines = PipelineCache::new(&context.device)?;
        let placeholders = (0..OPERAND_SLOTS)
            .map(|_| {
                context.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("flatnet placeholder"),
                    size: storage_bytes(0),
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let max_binding_bytes = context.max_binding_bytes();
        log::info!(
            "wgpu compute ready on {} ({} pipelines, {} MiB max binding)",
            context.adapter_info().name,
            pipelines.len(),
            max_binding_bytes >> 20
        );
        Ok(Self {
            context,
            pipelines,
            buffers: HashMap::new(),
            next_id: 0,
            placeholders,
            max_binding_bytes,
        })
    }

    pub fn context(&self) -> &WgpuBackend {
        &self.context
    }

    fn storage(&self, id: BufferId) -> FlatnetResult<&GpuStorage> {
        self.buffers.get(&id.0).ok_or(FlatnetError::UnknownBuffer(id.0))
    }

    fn check_bounds(&self, view: &MatrixView) -> FlatnetResult<()> {
        let len = self.storage(view.buffer)?.len();
        if view.end() > len {
            return Err(FlatnetError::shape_mismatch(&[len], &[view.offset, view.len()]));
        }
        Ok(())
    }
}

impl ComputeBackend for WgpuCompute {
    fn name(&self) -> &str {
        &self.context.adapter_info().name
    }

    fn create_buffer(&mut self, data: &[f32]) -> FlatnetResult<BufferId> {
        let storage = GpuStorage::upload(&self.context.device, data, self.max_binding_bytes)?;
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(id, storage);
        Ok(BufferId(id))
    }

    fn write_buffer(&mut self, id: BufferId, offset: usize, data: &[f32]) -> FlatnetResult<()> {
        self.storage(id)?.write(&self.context.queue, offset, data)
    }

    fn read_buffer(&mut self, id: BufferId, out: &mut [f32]) -> FlatnetResult<()> {
        self.storage(id)?
            .download(&self.context.device, &self.context.queue, out)
    }

    fn buffer_len(&self, id: BufferId) -> FlatnetResult<usize> {
        Ok(self.storage(id)?.len())
    }

    fn release_buffer(&mut self, id: BufferId) {
        if let Some(storage) = self.buffers.remove(&id.0) {
            storage.buffer.destroy();
        }
    }

    fn launch(&mut self, launch: &KernelLaunch) -> FlatnetResult<()> {
        let ops = operands(&launch.op);
        for view in ops.iter().flatten() {
            self.check_bounds(view)?;
        }
        let (bound, slots) = assign_slots(&ops);
        let uniforms = KernelUniforms::from_launch(launch, slots);
        let pipeline = self.pipelines.get(launch.op.name(), launch.work.tile)?;

        let device = &self.context.device;
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("flatnet uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries = Vec::with_capacity(OPERAND_SLOTS + 1);
        for slot in 0..OPERAND_SLOTS {
            let buffer = match bound.get(slot) {
                Some(id) => &self.storage(*id)?.buffer,
                None => &self.placeholders[slot],
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32,
                resource: buffer.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: OPERAND_SLOTS as u32,
            resource: uniform_buffer.as_entire_binding(),
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(launch.op.name()),
            layout: self.pipelines.bind_group_layout(),
            entries: &entries,
        });

        let (x, y) = match launch.op {
            KernelOp::MatMul { c, .. } => {
                let tile = launch.work.tile.max(1);
                (c.cols.div_ceil(tile).max(1) as u32, c.rows.div_ceil(tile).max(1) as u32)
            }
            _ => split_dispatch(launch.work.groups),
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(launch.op.name()),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(launch.op.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn finish(&mut self) -> FlatnetResult<()> {
        self.context.poll();
        Ok(())
    }
}

impl std::fmt::Debug for WgpuCompute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuCompute")
            .field("context", &self.context)
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_slots_dedupes_buffers() {
        let w = MatrixView::new(BufferId(7), 3, 2, 0);
        let inc = MatrixView::new(BufferId(9), 3, 2, 0);
        let (bound, slots) = assign_slots(&[Some(inc), Some(w), Some(inc), None]);
        assert_eq!(bound, vec![BufferId(9), BufferId(7)]);
        assert_eq!(slots.a, 0);
        assert_eq!(slots.b, 1);
        assert_eq!(slots.c, 0);
        assert_eq!(slots.bias, 0);
    }

    #[test]
    fn test_operands_roles() {
        let d = MatrixView::new(BufferId(1), 2, 2, 0);
        let a = MatrixView::new(BufferId(2), 2, 2, 0);
        let ops = operands(&KernelOp::SigmoidDerivative {
            delta: d,
            activation: a,
        });
        assert_eq!(ops[0].map(|v| v.buffer), Some(BufferId(2)));
        assert_eq!(ops[2].map(|v| v.buffer), Some(BufferId(1)));
        assert!(ops[1].is_none());
    }

    #[test]
    #[ignore]
    fn test_gpu_roundtrip() {
        let mut gpu = WgpuCompute::init(WgpuOptions::default()).expect("GPU init");
        let id = gpu.create_buffer(&[1.0, 2.0, 3.0]).unwrap();
        gpu.write_buffer(id, 1, &[5.0]).unwrap();
        let mut out = vec![0.0; 3];
        gpu.read_buffer(id, &mut out).unwrap();
        assert_eq!(out, vec![1.0, 5.0, 3.0]);
    }
}
