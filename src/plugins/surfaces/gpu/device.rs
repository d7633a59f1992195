//! Compute device for the GPU hit resolver.
//!
//! Wraps a wgpu device and queue, either borrowed from the renderer
//! (`RenderDevice`/`RenderQueue`) or requested standalone for headless apps.
//! Without one, uploads and dispatches fail and the resolver degrades to a zero UV.
//!
//! Storage buffers are immutable once created. An external rebuild (for example a
//! static batch being regenerated) invalidates a buffer by bumping its generation,
//! which makes every outstanding handle to it stale.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Mutex, PoisonError};

use bevy::platform::collections::HashMap;
use bevy::prelude::*;
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::tasks::block_on;
use thiserror::Error;
use wgpu::util::DeviceExt;

use super::kernel::{KernelParams, ResultSlots, UvKernel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    id: u32,
    generation: u32,
}

#[derive(Debug)]
struct RawBuffer {
    label: &'static str,
    generation: u32,
    buffer: Option<wgpu::Buffer>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no compute adapter available")]
    NoAdapter,
    #[error("buffer of {size} bytes exceeds the storage binding limit of {limit}")]
    TooLarge { size: u64, limit: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("buffer {0:?} is no longer valid")]
    StaleBuffer(BufferHandle),
    #[error("kernel has no texture-coordinate attribute to read")]
    MissingUvs,
    #[error("{groups} workgroups exceed the dispatch limit of {limit}")]
    TooManyTriangles { groups: u32, limit: u32 },
    #[error("result readback failed: {0}")]
    Readback(String),
}

#[derive(Debug)]
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    kernel: Mutex<UvKernel>,
}

#[derive(Resource, Debug, Default)]
pub struct ComputeDevice {
    context: Option<GpuContext>,
    next_id: AtomicU32,
    buffers: Mutex<HashMap<u32, RawBuffer>>,
    dispatches: AtomicU64,
}

impl ComputeDevice {
    pub fn from_wgpu(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let kernel = UvKernel::new(&device);
        Self {
            context: Some(GpuContext {
                device,
                queue,
                kernel: Mutex::new(kernel),
            }),
            ..default()
        }
    }

    /// Share the renderer's device.
    pub fn from_render(device: &RenderDevice, queue: &RenderQueue) -> Self {
        Self::from_wgpu(device.wgpu_device().clone(), wgpu::Queue::clone(&queue.0))
    }

    /// Request a device of its own, for apps without a renderer. `None` when the
    /// machine has no adapter that can run compute shaders.
    pub fn request_standalone() -> Option<Self> {
        let instance = wgpu::Instance::default();
        let adapter = match block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        })) {
            Ok(adapter) => adapter,
            Err(err) => {
                debug!("no compute adapter: {err}");
                return None;
            }
        };
        if !adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            debug!("adapter {} cannot run compute shaders", adapter.get_info().name);
            return None;
        }

        let descriptor = wgpu::DeviceDescriptor {
            label: Some("hit_resolver"),
            required_limits: wgpu::Limits::downlevel_defaults(),
            ..default()
        };
        match block_on(adapter.request_device(&descriptor)) {
            Ok((device, queue)) => {
                info!("GPU hit resolver on standalone adapter {}", adapter.get_info().name);
                Some(Self::from_wgpu(device, queue))
            }
            Err(err) => {
                debug!("compute device request failed: {err}");
                None
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.context.is_some()
    }

    fn context(&self) -> Result<&GpuContext, DeviceError> {
        self.context.as_ref().ok_or(DeviceError::NoAdapter)
    }

    /// Upload `bytes` into a new read-only storage buffer. The contents are padded
    /// to a whole number of 32-bit words.
    pub fn create_buffer(&self, label: &'static str, bytes: &[u8]) -> Result<BufferHandle, DeviceError> {
        let context = self.context()?;
        let mut contents = bytes.to_vec();
        contents.resize(bytes.len().next_multiple_of(4), 0);

        let limit = u64::from(context.device.limits().max_storage_buffer_binding_size);
        let size = contents.len() as u64;
        if size > limit {
            return Err(DeviceError::TooLarge { size, limit });
        }

        let buffer = context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &contents,
            usage: wgpu::BufferUsages::STORAGE,
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        buffers.insert(
            id,
            RawBuffer {
                label,
                generation: 0,
                buffer: Some(buffer),
            },
        );
        Ok(BufferHandle { id, generation: 0 })
    }

    pub fn is_valid(&self, handle: BufferHandle) -> bool {
        self.buffer(handle).is_some()
    }

    fn buffer(&self, handle: BufferHandle) -> Option<wgpu::Buffer> {
        let buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let raw = buffers.get(&handle.id)?;
        if raw.generation != handle.generation {
            return None;
        }
        raw.buffer.clone()
    }

    /// Destroy the contents of a buffer, making every existing handle stale.
    pub fn invalidate(&self, handle: BufferHandle) -> bool {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        match buffers.get_mut(&handle.id) {
            Some(raw) if raw.generation == handle.generation => {
                debug!("compute buffer `{}` invalidated", raw.label);
                raw.generation = raw.generation.wrapping_add(1);
                if let Some(buffer) = raw.buffer.take() {
                    buffer.destroy();
                }
                true
            }
            _ => false,
        }
    }

    pub fn release(&self, handle: BufferHandle) {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.get(&handle.id).is_some_and(|raw| raw.generation == handle.generation) {
            if let Some(buffer) = buffers.remove(&handle.id).and_then(|raw| raw.buffer) {
                buffer.destroy();
            }
        }
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|raw| raw.buffer.is_some())
            .count()
    }

    /// Number of completed UV kernel dispatches.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Reset the result slots, run the nearest-triangle passes and block until
    /// the UV slot is read back. A miss reads back the zero coordinate.
    pub fn dispatch_uv_kernel(
        &self,
        params: &KernelParams,
        vertex: BufferHandle,
        index: BufferHandle,
    ) -> Result<Vec2, DispatchError> {
        let context = self.context()?;
        if params.uv_offset == KernelParams::NO_UV {
            return Err(DispatchError::MissingUvs);
        }
        let limit = context.device.limits().max_compute_workgroups_per_dimension;
        if params.workgroups() > limit {
            return Err(DispatchError::TooManyTriangles {
                groups: params.workgroups(),
                limit,
            });
        }
        let vertices = self.buffer(vertex).ok_or(DispatchError::StaleBuffer(vertex))?;
        let indices = self.buffer(index).ok_or(DispatchError::StaleBuffer(index))?;

        let kernel = context.kernel.lock().unwrap_or_else(PoisonError::into_inner);
        let device = &context.device;

        context.queue.write_buffer(&kernel.params, 0, bytemuck::bytes_of(params));
        context.queue.write_buffer(&kernel.slots, 0, bytemuck::bytes_of(&ResultSlots::EMPTY));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hit_uv_bg"),
            layout: &kernel.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: kernel.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: vertices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: kernel.slots.as_entire_binding(),
                },
            ],
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("hit_uv_encoder"),
        });
        kernel.record(&mut encoder, &bind_group, params);
        context.queue.submit(Some(encoder.finish()));

        let slots = read_back(device, &kernel.readback)?;
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        Ok(Vec2::from_array(slots.uv))
    }
}

/// Map the readback buffer and wait for it: the pipeline stall the caller pays
/// for a synchronous answer.
fn read_back(device: &wgpu::Device, readback: &wgpu::Buffer) -> Result<ResultSlots, DispatchError> {
    let slice = readback.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|err| DispatchError::Readback(err.to_string()))?;
    rx.recv()
        .map_err(|err| DispatchError::Readback(err.to_string()))?
        .map_err(|err| DispatchError::Readback(err.to_string()))?;

    let slots = {
        let mapped = slice.get_mapped_range();
        bytemuck::pod_read_unaligned::<ResultSlots>(&mapped[..ResultSlots::SIZE as usize])
    };
    readback.unmap();
    Ok(slots)
}
