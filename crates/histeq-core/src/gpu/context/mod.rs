//! GPU context management for the wgpu device, queue and equalisation program.

mod init;
mod program;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use init::{list_platforms, AdapterSummary, DeviceSelection, PlatformInfo};
pub use program::GpuKernel;

use super::buffers::{create_uniform_buffer, read_mapped, GpuBuffer, GpuStageParams};
use crate::device::{BufferRole, ComputeDevice, DispatchTiming};
use crate::error::{EqualizeError, ErrorContext, Operation};
use crate::stages::{Stage, StageParams};

/// Workgroup size of every entry point.
pub(crate) const WORKGROUP_SIZE: u32 = 256;

/// Maximum workgroups per dimension (GPU limit)
pub(crate) const MAX_WORKGROUPS_PER_DIM: u32 = 65535;

/// Bytes for the begin and end pass timestamps.
const TIMESTAMP_BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

/// Query resources for measuring one compute pass on the device.
struct TimestampQueries {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    staging: wgpu::Buffer,
    /// Nanoseconds per tick.
    period: f32,
}

impl TimestampQueries {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("timestamp_query_set"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp_resolve"),
            size: TIMESTAMP_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp_staging"),
            size: TIMESTAMP_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            query_set,
            resolve,
            staging,
            period: queue.get_timestamp_period(),
        }
    }

    fn record_resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.query_set, 0..2, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(&self.resolve, 0, &self.staging, 0, TIMESTAMP_BYTES);
    }

    fn read_elapsed(&self, device: &wgpu::Device) -> Result<Duration, EqualizeError> {
        let bytes = read_mapped(device, &self.staging)?;
        // The copied bytes are not guaranteed to be 8-byte aligned.
        let tick = |i: usize| -> u64 {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_le_bytes(word)
        };
        let elapsed = tick(1).saturating_sub(tick(0));
        Ok(Duration::from_nanos((elapsed as f64 * self.period as f64) as u64))
    }
}

/// GPU context holding the wgpu device, queue and compiled program.
pub struct GpuContext {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    module: wgpu::ShaderModule,
    timestamps: Option<TimestampQueries>,
    adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Check if GPU acceleration is available without fully initializing.
    pub fn is_available() -> bool {
        init::is_available()
    }

    /// Get information about the available GPU device.
    pub fn device_info() -> Option<String> {
        init::device_info()
    }

    /// Create a context on the default adapter.
    pub fn new() -> Result<Self, EqualizeError> {
        Self::with_selection(&DeviceSelection::default())
    }

    /// Create a context on the adapter `selection` names, building the program.
    pub fn with_selection(selection: &DeviceSelection) -> Result<Self, EqualizeError> {
        pollster::block_on(Self::new_async(selection))
    }

    /// Async version of context creation.
    pub async fn new_async(selection: &DeviceSelection) -> Result<Self, EqualizeError> {
        let (device, queue, adapter_info, use_timestamps) =
            init::initialize_device(selection).await?;

        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured wgpu error: {}", err);
        }));

        let module = program::build_program(&device)?;
        let timestamps = use_timestamps.then(|| TimestampQueries::new(&device, &queue));

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            module,
            timestamps,
            adapter_info,
        })
    }

    /// Get the adapter info for this context.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Submit a command encoder and wait for completion.
    pub fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

/// Workgroup grid covering `work_items` invocations.
///
/// Large dispatches use both x and y dimensions; shaders recover the linear
/// index with `x + y * row_stride`.
pub(crate) fn workgroup_grid(work_items: u32) -> Result<(u32, u32), String> {
    let total_workgroups = work_items.div_ceil(WORKGROUP_SIZE);
    if total_workgroups <= MAX_WORKGROUPS_PER_DIM {
        return Ok((total_workgroups, 1));
    }

    // Roughly square grid
    let side = ((total_workgroups as f64).sqrt().ceil() as u32).min(MAX_WORKGROUPS_PER_DIM);
    let workgroups_y = total_workgroups.div_ceil(side);
    if workgroups_y > MAX_WORKGROUPS_PER_DIM {
        return Err(format!(
            "{} work items need {} workgroups, max supported is {}",
            work_items,
            total_workgroups,
            MAX_WORKGROUPS_PER_DIM as u64 * MAX_WORKGROUPS_PER_DIM as u64
        ));
    }
    Ok((side, workgroups_y))
}

impl ComputeDevice for GpuContext {
    type Buffer = GpuBuffer;
    type Kernel = GpuKernel;

    fn name(&self) -> String {
        format!(
            "{} ({:?}, {:?})",
            self.adapter_info.name, self.adapter_info.device_type, self.adapter_info.backend
        )
    }

    fn resolve_kernel(&self, stage: Stage) -> Result<GpuKernel, EqualizeError> {
        program::create_stage_kernel(&self.device, &self.module, stage)
    }

    fn create_buffer(&self, role: BufferRole, size: u64) -> Result<GpuBuffer, EqualizeError> {
        GpuBuffer::new(&self.device, role, size)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, data: &[u8]) -> Result<(), EqualizeError> {
        let len = data.len() as u64;
        if len % wgpu::COPY_BUFFER_ALIGNMENT != 0 || len > buffer.size() {
            return Err(EqualizeError::transfer(
                Operation::Upload,
                format!(
                    "cannot write {} bytes into {} ({} bytes)",
                    len,
                    buffer.role().label(),
                    buffer.size()
                ),
            ));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.write_buffer(&buffer.buffer, 0, data);
        self.submit_and_wait(self.encoder("upload_encoder"));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(EqualizeError::transfer(Operation::Upload, err.to_string()));
        }
        Ok(())
    }

    fn zero_buffer(&self, buffer: &GpuBuffer) -> Result<(), EqualizeError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self.encoder("clear_encoder");
        encoder.clear_buffer(&buffer.buffer, 0, None);
        self.submit_and_wait(encoder);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(EqualizeError::device(Operation::Fill, err.to_string()));
        }
        Ok(())
    }

    fn dispatch(
        &self,
        kernel: &GpuKernel,
        args: &[&GpuBuffer],
        params: &StageParams,
        work_items: u32,
    ) -> Result<DispatchTiming, EqualizeError> {
        let stage = kernel.stage;
        let fail = |detail: String| EqualizeError::Device {
            context: ErrorContext::in_stage(stage, Operation::Dispatch),
            detail,
        };
        if args.len() != stage.arity() {
            return Err(fail(format!(
                "{} expects {} buffers, got {}",
                stage.entry_point(),
                stage.arity(),
                args.len()
            )));
        }

        let (workgroups_x, workgroups_y) = workgroup_grid(work_items).map_err(fail)?;
        let uniform = create_uniform_buffer(
            &self.device,
            &GpuStageParams {
                pixel_count: params.pixel_count,
                max_output: params.max_output,
                row_stride: workgroups_x * WORKGROUP_SIZE,
                _padding: 0,
            },
            "stage_params",
        );

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut entries: Vec<wgpu::BindGroupEntry> = args
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: args.len() as u32,
            resource: uniform.as_entire_binding(),
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(stage.entry_point()),
            layout: &kernel.layout,
            entries: &entries,
        });

        let mut encoder = self.encoder(stage.entry_point());
        {
            let timestamp_writes = self.timestamps.as_ref().map(|t| {
                wgpu::ComputePassTimestampWrites {
                    query_set: &t.query_set,
                    beginning_of_pass_write_index: Some(0),
                    end_of_pass_write_index: Some(1),
                }
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(stage.entry_point()),
                timestamp_writes,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
        }
        if let Some(timestamps) = &self.timestamps {
            timestamps.record_resolve(&mut encoder);
        }

        let submitted = Instant::now();
        self.submit_and_wait(encoder);
        let completed = Instant::now();

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(fail(err.to_string()));
        }

        let device_elapsed = match &self.timestamps {
            Some(timestamps) => Some(
                timestamps
                    .read_elapsed(&self.device)
                    .map_err(|e| e.in_stage(stage))?,
            ),
            None => None,
        };

        Ok(DispatchTiming {
            submitted,
            completed,
            device_elapsed,
        })
    }

    fn read_buffer(&self, buffer: &GpuBuffer, len: u64) -> Result<Vec<u8>, EqualizeError> {
        buffer.download(&self.device, &self.queue, len)
    }
}
