//! Rayon backend: the four kernels over buffers of atomic words.
//!
//! Buffers use the same packing as the GPU backend, so the orchestrator moves
//! identical bytes through either device. Each dispatch runs inside the
//! device's thread pool and returns once every work item has finished.

mod kernels;


use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use rayon::ThreadPool;

use crate::device::{BufferRole, ComputeDevice, DispatchTiming};
use crate::error::{EqualizeError, ErrorContext, Operation};
use crate::stages::{Stage, StageParams};

type KernelFn = fn(&[&CpuBuffer], &StageParams, u32) -> Result<(), EqualizeError>;

/// Host memory standing in for a device buffer.
#[derive(Debug)]
pub struct CpuBuffer {
    role: BufferRole,
    words: Vec<AtomicU32>,
}

impl CpuBuffer {
    pub fn role(&self) -> BufferRole {
        self.role
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.words.len() as u64 * 4
    }

    pub(crate) fn words(&self) -> &[AtomicU32] {
        &self.words
    }
}

/// A stage resolved to its kernel function.
#[derive(Clone, Copy)]
pub struct CpuKernel {
    stage: Stage,
    run: KernelFn,
}

impl CpuKernel {
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

/// Compute device backed by a rayon thread pool.
pub struct CpuDevice {
    pool: ThreadPool,
}

impl CpuDevice {
    /// Create a device using rayon's default thread count.
    pub fn new() -> Result<Self, EqualizeError> {
        Self::with_threads(None)
    }

    pub fn with_threads(threads: Option<usize>) -> Result<Self, EqualizeError> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("histeq-cpu-{}", i));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| EqualizeError::device(Operation::Setup, e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ComputeDevice for CpuDevice {
    type Buffer = CpuBuffer;
    type Kernel = CpuKernel;

    fn name(&self) -> String {
        format!("CPU ({} threads)", self.threads())
    }

    fn resolve_kernel(&self, stage: Stage) -> Result<CpuKernel, EqualizeError> {
        Ok(CpuKernel {
            stage,
            run: kernels::for_stage(stage),
        })
    }

    fn create_buffer(&self, role: BufferRole, size: u64) -> Result<CpuBuffer, EqualizeError> {
        if size % 4 != 0 {
            return Err(EqualizeError::device(
                Operation::Allocate,
                format!("{} size {} is not a multiple of 4", role.label(), size),
            ));
        }
        let words = (0..size / 4).map(|_| AtomicU32::new(0)).collect();
        log::debug!("cpu: allocated {} ({} bytes)", role.label(), size);
        Ok(CpuBuffer { role, words })
    }

    fn write_buffer(&self, buffer: &CpuBuffer, data: &[u8]) -> Result<(), EqualizeError> {
        if data.len() % 4 != 0 || data.len() as u64 > buffer.size() {
            return Err(EqualizeError::transfer(
                Operation::Upload,
                format!(
                    "cannot write {} bytes into {} ({} bytes)",
                    data.len(),
                    buffer.role.label(),
                    buffer.size()
                ),
            ));
        }
        for (word, chunk) in buffer.words.iter().zip(data.chunks_exact(4)) {
            word.store(
                u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                Ordering::Relaxed,
            );
        }
        Ok(())
    }

    fn zero_buffer(&self, buffer: &CpuBuffer) -> Result<(), EqualizeError> {
        for word in &buffer.words {
            word.store(0, Ordering::Relaxed);
        }
        Ok(())
    }

    fn dispatch(
        &self,
        kernel: &CpuKernel,
        args: &[&CpuBuffer],
        params: &StageParams,
        work_items: u32,
    ) -> Result<DispatchTiming, EqualizeError> {
        if args.len() != kernel.stage.arity() {
            return Err(EqualizeError::Device {
                context: ErrorContext::in_stage(kernel.stage, Operation::Dispatch),
                detail: format!(
                    "{} expects {} buffers, got {}",
                    kernel.stage.entry_point(),
                    kernel.stage.arity(),
                    args.len()
                ),
            });
        }

        let submitted = Instant::now();
        // install() returns after every work item has joined, and that join
        // orders all relaxed stores before the caller's loads.
        self.pool
            .install(|| (kernel.run)(args, params, work_items))
            .map_err(|e| e.in_stage(kernel.stage))?;
        let completed = Instant::now();

        Ok(DispatchTiming {
            submitted,
            completed,
            device_elapsed: None,
        })
    }

    fn read_buffer(&self, buffer: &CpuBuffer, len: u64) -> Result<Vec<u8>, EqualizeError> {
        if len > buffer.size() {
            return Err(EqualizeError::transfer(
                Operation::Readback,
                format!(
                    "cannot read {} bytes from {} ({} bytes)",
                    len,
                    buffer.role.label(),
                    buffer.size()
                ),
            ));
        }
        Ok(buffer
            .words
            .iter()
            .flat_map(|w| w.load(Ordering::Relaxed).to_le_bytes())
            .take(len as usize)
            .collect())
    }
}
