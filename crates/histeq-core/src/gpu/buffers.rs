//! GPU buffer management for stage data and parameters.

use bytemuck::{Pod, Zeroable};
use wgpu::{self, util::DeviceExt};

use crate::device::BufferRole;
use crate::error::{EqualizeError, Operation};

/// Storage buffer owned by one pipeline run.
///
/// The memory is destroyed when the handle drops rather than whenever wgpu
/// reclaims the last reference.
pub struct GpuBuffer {
    pub(crate) buffer: wgpu::Buffer,
    role: BufferRole,
    size: u64,
}

impl GpuBuffer {
    /// Allocate a zero-initialised storage buffer.
    pub fn new(device: &wgpu::Device, role: BufferRole, size: u64) -> Result<Self, EqualizeError> {
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        if size > limit {
            return Err(EqualizeError::device(
                Operation::Allocate,
                format!(
                    "{} needs {} bytes, device binding limit is {}",
                    role.label(),
                    size,
                    limit
                ),
            ));
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(role.label()),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());

        if let Some(err) = out_of_memory.or(validation) {
            return Err(EqualizeError::device(
                Operation::Allocate,
                format!("{} ({} bytes): {}", role.label(), size, err),
            ));
        }

        log::debug!("gpu: allocated {} ({} bytes)", role.label(), size);
        Ok(Self { buffer, role, size })
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Copy the first `len` bytes back to the host through a staging buffer.
    pub fn download(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        len: u64,
    ) -> Result<Vec<u8>, EqualizeError> {
        if len > self.size {
            return Err(EqualizeError::transfer(
                Operation::Readback,
                format!(
                    "cannot read {} bytes from {} ({} bytes)",
                    len,
                    self.role.label(),
                    self.size
                ),
            ));
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        // Copies must be a multiple of four bytes.
        let copy_len = len.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_readback"),
            size: copy_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("download_encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging_buffer, 0, copy_len);
        queue.submit(std::iter::once(encoder.finish()));

        let mut bytes = read_mapped(device, &staging_buffer)?;
        staging_buffer.destroy();
        bytes.truncate(len as usize);
        Ok(bytes)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        log::debug!("gpu: released {}", self.role.label());
        self.buffer.destroy();
    }
}

/// Map a `MAP_READ` buffer, wait for the mapping, and copy its contents out.
pub(crate) fn read_mapped(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, EqualizeError> {
    let buffer_slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();

    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        // If the receiver is gone, recv() below reports it.
        let _ = tx.send(result);
    });

    device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|e| EqualizeError::transfer(Operation::Readback, e.to_string()))?
        .map_err(|e| EqualizeError::transfer(Operation::Readback, e.to_string()))?;

    let data = buffer_slice.get_mapped_range();
    let result = data.to_vec();

    drop(data);
    buffer.unmap();

    Ok(result)
}

/// Uniform block every stage receives. Must match `StageParams` in
/// `equalize.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuStageParams {
    pub pixel_count: u32,
    pub max_output: u32,
    pub row_stride: u32,
    pub _padding: u32,
}

/// Create a uniform buffer from parameter data.
pub fn create_uniform_buffer<T: Pod>(device: &wgpu::Device, data: &T, label: &str) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(data),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}
