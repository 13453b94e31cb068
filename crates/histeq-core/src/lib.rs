//! Histeq Core Library
//!
//! Histogram-equalisation contrast enhancement for 8-bit greyscale images,
//! expressed as four data-parallel stages (scatter, scan, map, gather) that run
//! on a compute device and are sequenced by a blocking orchestrator.

pub mod config;
pub mod cpu;
pub mod decoders;
pub mod device;
pub mod error;
pub mod exporters;
pub mod models;
pub mod pipeline;
pub mod profiling;
pub mod stages;

// GPU backend (optional, enabled with the "gpu" feature)
#[cfg(feature = "gpu")]
pub mod gpu;

// Re-export commonly used types
pub use config::{
    load_config, BackendPreference, ConfigHandle, EqualizeConfig, EqualizeOptions, PowerPreference,
};
pub use cpu::CpuDevice;
pub use decoders::load_grey_image;
pub use device::{BufferRole, ComputeDevice, DispatchTiming};
pub use error::{EqualizeError, ErrorContext, ErrorKind, Operation};
pub use exporters::{default_output_path, save_grey_image};
pub use models::{CumulativeHistogram, Equalization, GreyImage, Histogram, Lut};
pub use pipeline::{Pipeline, RunState};
pub use profiling::{ProfilingCollector, ProfilingReport, ProfilingSample, TimingSource};
pub use stages::{Stage, StageParams, BIN_COUNT, DEFAULT_MAX_OUTPUT, MAX_PIXELS};

#[cfg(feature = "gpu")]
pub use gpu::{
    gpu_info, is_gpu_available, list_platforms, AdapterSummary, DeviceSelection, GpuContext,
    PlatformInfo,
};
