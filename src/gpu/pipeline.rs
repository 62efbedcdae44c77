//! Compute pipeline management.
//!
//! Every kernel is compiled once at device initialisation against a shared
//! bind group layout.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FlatnetError, FlatnetResult};
use crate::gpu::shaders::{self, ELEMENTWISE_ENTRIES};
use crate::gpu::uniforms::KernelUniforms;

/// Tile edges a matmul pipeline is built for.
pub const MATMUL_TILES: [usize; 3] = [4, 8, 16];

/// Number of operand bindings (`s0`..`s3`).
pub const OPERAND_SLOTS: usize = 4;

/// Compiled compute pipelines keyed by entry point and tile edge.
pub struct PipelineCache {
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: HashMap<(&'static str, usize), wgpu::ComputePipeline>,
}

impl PipelineCache {
    /// Compiles every kernel. Shader validation failures surface as
    /// [`FlatnetError::ShaderError`].
    pub fn new(device: &Arc<wgpu::Device>) -> FlatnetResult<Self> {
        let bind_group_layout = create_bind_group_layout(device);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("flatnet pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut pipelines = HashMap::new();
        for tile in MATMUL_TILES {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("flatnet matmul"),
                source: wgpu::ShaderSource::Wgsl(shaders::matmul_shader(tile).into()),
            });
            pipelines.insert(("matmul", tile), create_pipeline(device, &layout, &module, "matmul"));
        }

        let elementwise = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("flatnet elementwise"),
            source: wgpu::ShaderSource::Wgsl(shaders::elementwise_shader().into()),
        });
        for entry in ELEMENTWISE_ENTRIES {
            pipelines.insert((entry, 0), create_pipeline(device, &layout, &elementwise, entry));
        }

        let reduce = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("flatnet reduce"),
            source: wgpu::ShaderSource::Wgsl(shaders::reduce_shader().into()),
        });
        pipelines.insert(("reduce", 0), create_pipeline(device, &layout, &reduce, "reduce"));

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(FlatnetError::shader(err.to_string()));
        }

        log::debug!("Compiled {} compute pipelines", pipelines.len());
        Ok(Self {
            bind_group_layout,
            pipelines,
        })
    }

    /// Pipeline for `entry`; `tile` is ignored for non-matmul kernels.
    pub fn get(&self, entry: &'static str, tile: usize) -> FlatnetResult<&wgpu::ComputePipeline> {
        let key_tile = if entry == "matmul" { tile } else { 0 };
        self.pipelines
            .get(&(entry, key_tile))
            .ok_or_else(|| FlatnetError::shader(format!("no pipeline for {} (tile {})", entry, tile)))
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.pipelines.keys().collect();
        keys.sort();
        f.debug_struct("PipelineCache").field("pipelines", &keys).finish()
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry),
        layout: Some(layout),
        module,
        entry_point: Some(entry),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..OPERAND_SLOTS as u32)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: OPERAND_SLOTS as u32,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(KernelUniforms::size_bytes() as u64),
        },
        count: None,
    });

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("flatnet operands"),
        entries: &entries,
    })
}
