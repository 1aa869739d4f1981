pub mod pool;
pub mod shader;

use std::error::Error;
use std::fmt::{self, Display};

pub(crate) const WORKGROUP_SIZE: u32 = 64;

/// Owner of the wgpu device and queue, plus the compiled-shader cache.
///
/// Constructed explicitly and passed by reference into the texture pool
/// and the binding layer; there is no ambient global context. Dropping it
/// releases every pipeline and pooled buffer created through it.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shaders: shader::ShaderCache,
}

impl GpuContext {
    /// Request an adapter and device, blocking until they are ready.
    pub fn new() -> Result<GpuContext, GpuInitError> {
        pollster::block_on(GpuContext::request())
    }

    async fn request() -> Result<GpuContext, GpuInitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .ok_or(GpuInitError::NoAdapter)?;
        println!("Using WGPU adapter: {:?}", adapter.get_info());
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(GpuInitError::Device)?;
        Ok(GpuContext {
            device,
            queue,
            shaders: shader::ShaderCache::new(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn shaders(&self) -> &shader::ShaderCache {
        &self.shaders
    }
}

#[derive(Debug)]
pub enum GpuInitError {
    NoAdapter,
    Device(wgpu::RequestDeviceError),
}

impl Display for GpuInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuInitError::NoAdapter => write!(f, "no suitable GPU adapter is available"),
            GpuInitError::Device(e) => write!(f, "device request failed: {e}"),
        }
    }
}

impl Error for GpuInitError {}
