//! wgpu device initialization.
//!
//! [`WgpuBackend`] owns the instance, adapter, device and queue that
//! [`WgpuCompute`](super::WgpuCompute) issues work to.

use std::sync::Arc;

use crate::error::{FlatnetError, FlatnetResult};

/// Which kind of adapter to ask for first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Device selection for the training kernels.
#[derive(Debug, Clone)]
pub struct WgpuOptions {
    pub power: PowerPreference,
    /// Backends to enumerate (None = all).
    pub backends: Option<wgpu::Backends>,
    /// Case-insensitive substring of the adapter name to insist on.
    pub adapter_filter: Option<String>,
    /// Limits the device must grant.
    pub limits: wgpu::Limits,
}

impl Default for WgpuOptions {
    fn default() -> Self {
        Self {
            power: PowerPreference::HighPerformance,
            backends: None,
            adapter_filter: None,
            limits: wgpu::Limits::default(),
        }
    }
}

impl WgpuOptions {
    /// 1 GiB bindings so whole evaluation sets fit in one buffer, and
    /// 256-wide work-groups for the reduction kernel.
    pub fn compute() -> Self {
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 1 << 30,
            max_buffer_size: 1 << 30,
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            ..wgpu::Limits::default()
        };
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Downlevel limits on a low-power adapter.
    pub fn low_memory() -> Self {
        Self {
            power: PowerPreference::LowPower,
            limits: wgpu::Limits::downlevel_defaults(),
            ..Self::default()
        }
    }

    fn backends(&self) -> wgpu::Backends {
        self.backends.unwrap_or(wgpu::Backends::all())
    }
}

/// Limits the kernels depend on, as `(name, granted, required)`.
fn limit_table(granted: &wgpu::Limits, required: &wgpu::Limits) -> [(&'static str, u64, u64); 3] {
    [
        (
            "max_storage_buffer_binding_size",
            granted.max_storage_buffer_binding_size as u64,
            required.max_storage_buffer_binding_size as u64,
        ),
        ("max_buffer_size", granted.max_buffer_size, required.max_buffer_size),
        (
            "max_compute_invocations_per_workgroup",
            granted.max_compute_invocations_per_workgroup as u64,
            required.max_compute_invocations_per_workgroup as u64,
        ),
    ]
}

/// An opened wgpu device and its queue.
pub struct WgpuBackend {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
}

impl WgpuBackend {
    /// Picks an adapter per `options` and opens a device on it.
    ///
    /// # Errors
    ///
    /// [`FlatnetError::AdapterNotFound`] when nothing matches,
    /// [`FlatnetError::UnsupportedLimits`] when the adapter is too small,
    /// [`FlatnetError::DeviceRequestFailed`] when the driver refuses.
    pub fn init(options: &WgpuOptions) -> FlatnetResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: options.backends(),
            ..Default::default()
        });
        let adapter = match options.adapter_filter {
            Some(ref filter) => Self::find_adapter(&instance, options.backends(), filter)?,
            None => pollster::block_on(Self::preferred_adapter(&instance, options.power))?,
        };
        let info = adapter.get_info();
        log::info!("GPU adapter {} on {:?}", info.name, info.backend);

        for (name, granted, required) in limit_table(&adapter.limits(), &options.limits) {
            if granted < required {
                return Err(FlatnetError::unsupported_limits(format!(
                    "{}: {} granted, {} required",
                    name, granted, required
                )));
            }
        }

        let descriptor = wgpu::DeviceDescriptor {
            label: Some("flatnet device"),
            required_features: wgpu::Features::empty(),
            required_limits: options.limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
        };
        let (device, queue) = pollster::block_on(adapter.request_device(&descriptor, None))?;
        let limits = device.limits();

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            info,
            limits,
        })
    }

    fn find_adapter(instance: &wgpu::Instance, backends: wgpu::Backends, filter: &str) -> FlatnetResult<wgpu::Adapter> {
        let filter = filter.to_lowercase();
        instance
            .enumerate_adapters(backends)
            .into_iter()
            .find(|a| a.get_info().name.to_lowercase().contains(&filter))
            .ok_or_else(|| FlatnetError::adapter_not_found(format!("no adapter name contains '{}'", filter)))
    }

    /// The preferred kind of adapter, else whatever the instance offers.
    async fn preferred_adapter(instance: &wgpu::Instance, power: PowerPreference) -> FlatnetResult<wgpu::Adapter> {
        for power_preference in [power.into(), wgpu::PowerPreference::None] {
            let request = wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            };
            if let Some(adapter) = instance.request_adapter(&request).await {
                return Ok(adapter);
            }
        }
        Err(FlatnetError::adapter_not_found("no GPU adapter available"))
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Largest buffer one storage binding may cover, in bytes.
    pub fn max_binding_bytes(&self) -> u64 {
        (self.limits.max_storage_buffer_binding_size as u64).min(self.limits.max_buffer_size)
    }

    /// Blocks until submitted work has finished.
    pub fn poll(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.info.name)
            .field("backend", &self.info.backend)
            .field("max_binding_bytes", &self.max_binding_bytes())
            .finish()
    }
}
