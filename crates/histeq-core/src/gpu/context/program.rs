//! Shader program build and per-stage compute pipelines.

use crate::error::{EqualizeError, ErrorContext, Operation};
use crate::gpu::shaders::Shaders;
use crate::stages::Stage;

/// A stage entry point bound to its compute pipeline and bind group layout.
pub struct GpuKernel {
    pub(crate) stage: Stage,
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) layout: wgpu::BindGroupLayout,
}

impl GpuKernel {
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

/// Compile the equalisation program.
///
/// Validation errors are captured rather than left to the uncaptured-error
/// handler, and come back with the compiler's messages as the build log.
pub fn build_program(device: &wgpu::Device) -> Result<wgpu::ShaderModule, EqualizeError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("equalize"),
        source: wgpu::ShaderSource::Wgsl(Shaders::EQUALIZE.into()),
    });
    let info = pollster::block_on(module.get_compilation_info());
    let scope = pollster::block_on(device.pop_error_scope());

    let log = format_build_log(&info.messages);
    let has_errors = info
        .messages
        .iter()
        .any(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error));

    match scope {
        Some(err) => Err(EqualizeError::Build {
            detail: err.to_string(),
            log,
        }),
        None if has_errors => Err(EqualizeError::Build {
            detail: "shader compilation reported errors".to_string(),
            log,
        }),
        None => {
            if !log.is_empty() {
                log::debug!("shader build log:\n{}", log);
            }
            Ok(module)
        }
    }
}

fn format_build_log(messages: &[wgpu::CompilationMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let kind = match m.message_type {
                wgpu::CompilationMessageType::Error => "error",
                wgpu::CompilationMessageType::Warning => "warning",
                wgpu::CompilationMessageType::Info => "info",
            };
            match &m.location {
                Some(at) => format!(
                    "{}:{}: {}: {}",
                    at.line_number, at.line_position, kind, m.message
                ),
                None => format!("{}: {}", kind, m.message),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Create the compute pipeline for `stage` from the built program.
pub fn create_stage_kernel(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    stage: Stage,
) -> Result<GpuKernel, EqualizeError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let layout = create_stage_layout(device, stage);
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(stage.entry_point()),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = create_compute_pipeline(
        device,
        stage.entry_point(),
        &pipeline_layout,
        module,
        stage.entry_point(),
    );

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(EqualizeError::Device {
            context: ErrorContext::in_stage(stage, Operation::Resolve),
            detail: format!("entry point {}: {}", stage.entry_point(), err),
        });
    }

    Ok(GpuKernel {
        stage,
        pipeline,
        layout,
    })
}

/// Storage bindings in positional order, then the `StageParams` uniform.
fn create_stage_layout(device: &wgpu::Device, stage: Stage) -> wgpu::BindGroupLayout {
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = stage
        .read_only_args()
        .iter()
        .enumerate()
        .map(|(binding, &read_only)| wgpu::BindGroupLayoutEntry {
            binding: binding as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();

    entries.push(wgpu::BindGroupLayoutEntry {
        binding: stage.arity() as u32,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    });

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(stage.entry_point()),
        entries: &entries,
    })
}

/// Helper to create a compute pipeline.
fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}
