//! The narrow device interface the orchestrator drives.
//!
//! Both backends implement [`ComputeDevice`]: the wgpu backend in
//! [`crate::gpu`] and the rayon backend in [`crate::cpu`].

use std::time::{Duration, Instant};

use crate::error::EqualizeError;
use crate::stages::{Stage, StageParams};

/// What a device buffer holds. Used for labels and usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    InputPixels,
    Histogram,
    Cumulative,
    Lut,
    OutputPixels,
}

impl BufferRole {
    pub fn label(self) -> &'static str {
        match self {
            BufferRole::InputPixels => "input_pixels",
            BufferRole::Histogram => "histogram",
            BufferRole::Cumulative => "cumulative_histogram",
            BufferRole::Lut => "lut",
            BufferRole::OutputPixels => "output_pixels",
        }
    }
}

/// Host-observed timing of one completed dispatch.
#[derive(Debug, Clone, Copy)]
pub struct DispatchTiming {
    /// Just before the work was handed to the device.
    pub submitted: Instant,
    /// After the completion barrier returned.
    pub completed: Instant,
    /// Execution time measured by the device itself, when available.
    pub device_elapsed: Option<Duration>,
}

/// A compute device bound to one context and queue.
///
/// Every method blocks until the device has finished the requested work, so a
/// successful return is a completion barrier.
pub trait ComputeDevice {
    /// Device-resident memory. Dropping it releases the memory.
    type Buffer;
    /// A stage entry point resolved from the compiled program.
    type Kernel;

    /// Human-readable device description.
    fn name(&self) -> String;

    /// Look up the entry point for `stage`.
    fn resolve_kernel(&self, stage: Stage) -> Result<Self::Kernel, EqualizeError>;

    fn create_buffer(&self, role: BufferRole, size: u64) -> Result<Self::Buffer, EqualizeError>;

    /// Copy `data` to the start of `buffer`.
    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), EqualizeError>;

    fn zero_buffer(&self, buffer: &Self::Buffer) -> Result<(), EqualizeError>;

    /// Run `kernel` over `work_items` items with positional `args`.
    fn dispatch(
        &self,
        kernel: &Self::Kernel,
        args: &[&Self::Buffer],
        params: &StageParams,
        work_items: u32,
    ) -> Result<DispatchTiming, EqualizeError>;

    /// Copy the first `len` bytes of `buffer` back to the host.
    fn read_buffer(&self, buffer: &Self::Buffer, len: u64) -> Result<Vec<u8>, EqualizeError>;
}
