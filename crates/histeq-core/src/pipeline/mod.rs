//! Pipeline orchestrator
//!
//! Runs the four stages in order on one [`ComputeDevice`]: Bin Counter,
//! Prefix Accumulator, Range Mapper, Pixel Reprojector. Every dispatch is a
//! completion barrier, so a stage never starts before the previous stage's
//! output is fully written. The first error ends the run.
//!
//! Per-run state (buffers, state machine, profiling) lives in one context
//! created by [`Pipeline::run`]. Its buffers are released before `run`
//! returns, on every exit path.


use crate::config::EqualizeOptions;
use crate::device::{BufferRole, ComputeDevice, DispatchTiming};
use crate::error::{EqualizeError, Operation};
use crate::models::{CumulativeHistogram, Equalization, GreyImage, Histogram, Lut};
use crate::profiling::{ProfilingCollector, ProfilingReport};
use crate::stages::{
    decode_table, pack_pixels, packed_len, KernelTable, Stage, StageParams, BIN_COUNT, MAX_PIXELS,
    TABLE_BYTES,
};

/// Progress of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    BuffersAllocated,
    Stage1Done,
    Stage2Done,
    Stage3Done,
    Stage4Done,
    Complete,
    /// Absorbing: a run that failed never resumes.
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed)
    }

    /// State reached once `stage` has finished.
    pub fn after(stage: Stage) -> RunState {
        match stage {
            Stage::BinCounter => RunState::Stage1Done,
            Stage::PrefixAccumulator => RunState::Stage2Done,
            Stage::RangeMapper => RunState::Stage3Done,
            Stage::PixelReprojector => RunState::Stage4Done,
        }
    }

    /// Whether `next` directly follows `self`.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Complete | Failed, _) => false,
            (_, Failed) => true,
            (Idle, BuffersAllocated)
            | (BuffersAllocated, Stage1Done)
            | (Stage1Done, Stage2Done)
            | (Stage2Done, Stage3Done)
            | (Stage3Done, Stage4Done)
            | (Stage4Done, Complete) => true,
            _ => false,
        }
    }
}

/// Equalises images on one device, reusing the resolved kernel table.
pub struct Pipeline<D: ComputeDevice> {
    device: D,
    kernels: KernelTable<D::Kernel>,
    options: EqualizeOptions,
    last_state: RunState,
}

impl<D: ComputeDevice> Pipeline<D> {
    /// Resolve every stage entry point on `device`.
    pub fn new(device: D, options: EqualizeOptions) -> Result<Self, EqualizeError> {
        let kernels = KernelTable::resolve(|stage| {
            device
                .resolve_kernel(stage)
                .map_err(|e| e.in_stage(stage))
        })?;
        log::debug!("resolved {} stage kernels on {}", Stage::ALL.len(), device.name());

        Ok(Self {
            device,
            kernels,
            options,
            last_state: RunState::Idle,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn options(&self) -> &EqualizeOptions {
        &self.options
    }

    /// Final state of the most recent run, `Idle` before the first.
    pub fn last_state(&self) -> RunState {
        self.last_state
    }

    /// Equalise `image`, returning the output and every intermediate table.
    ///
    /// Nothing partial is returned on failure. The error names the stage and
    /// operation that failed.
    pub fn run(&mut self, image: &GreyImage) -> Result<Equalization, EqualizeError> {
        let mut ctx = RunContext::new(self.options.profiling);

        let result = self.execute(image, &mut ctx);
        ctx.release();
        match &result {
            Ok(_) => ctx.advance(RunState::Complete),
            Err(e) => {
                log::warn!("equalisation failed in state {:?}: {}", ctx.state, e);
                ctx.advance(RunState::Failed);
            }
        }
        self.last_state = ctx.state;
        result
    }

    fn execute(
        &self,
        image: &GreyImage,
        ctx: &mut RunContext<D::Buffer>,
    ) -> Result<Equalization, EqualizeError> {
        let pixel_count = validate(image)?;
        let params = StageParams::new(pixel_count, self.options.max_output);

        ctx.attach(RunBuffers::allocate(&self.device, pixel_count)?);

        let run = self
            .count_bins(ctx.buffers()?, image, &params)
            .map_err(|e| e.in_stage(Stage::BinCounter))?;
        let histogram = ctx.complete(Stage::BinCounter, run);

        let run = self
            .accumulate(ctx.buffers()?, &params)
            .map_err(|e| e.in_stage(Stage::PrefixAccumulator))?;
        let cumulative = ctx.complete(Stage::PrefixAccumulator, run);

        let run = self
            .map_range(ctx.buffers()?, &cumulative, &params)
            .map_err(|e| e.in_stage(Stage::RangeMapper))?;
        let lut = ctx.complete(Stage::RangeMapper, run);

        let run = self
            .reproject(ctx.buffers()?, &params)
            .map_err(|e| e.in_stage(Stage::PixelReprojector))?;
        let pixels = ctx.complete(Stage::PixelReprojector, run);

        let result = Equalization {
            output: GreyImage::new(image.width(), image.height(), pixels)?,
            histogram,
            cumulative,
            lut,
            max_output: self.options.max_output,
            profile: ctx.take_report(),
        };
        result
            .verify(image)
            .map_err(|detail| EqualizeError::device(Operation::Verify, detail))?;
        Ok(result)
    }

    fn count_bins(
        &self,
        buffers: &RunBuffers<D::Buffer>,
        image: &GreyImage,
        params: &StageParams,
    ) -> Result<StageRun<Histogram>, EqualizeError> {
        let stage = Stage::BinCounter;
        let packed = pack_pixels(image.pixels());
        self.device.write_buffer(&buffers.input, &packed)?;
        self.device.zero_buffer(&buffers.histogram)?;

        let timing = self.dispatch(stage, &[&buffers.input, &buffers.histogram], params)?;
        let bins = self.read_table(&buffers.histogram)?;

        Ok(StageRun {
            value: Histogram::from_bins(bins),
            timing,
            bytes_to_device: packed.len() as u64,
            bytes_from_device: TABLE_BYTES,
        })
    }

    fn accumulate(
        &self,
        buffers: &RunBuffers<D::Buffer>,
        params: &StageParams,
    ) -> Result<StageRun<CumulativeHistogram>, EqualizeError> {
        let stage = Stage::PrefixAccumulator;
        self.device.zero_buffer(&buffers.cumulative)?;

        let timing = self.dispatch(stage, &[&buffers.histogram, &buffers.cumulative], params)?;
        let bins = self.read_table(&buffers.cumulative)?;

        Ok(StageRun {
            value: CumulativeHistogram::from_bins(bins),
            timing,
            bytes_to_device: 0,
            bytes_from_device: TABLE_BYTES,
        })
    }

    fn map_range(
        &self,
        buffers: &RunBuffers<D::Buffer>,
        cumulative: &CumulativeHistogram,
        params: &StageParams,
    ) -> Result<StageRun<Lut>, EqualizeError> {
        let stage = Stage::RangeMapper;
        if params.pixel_count == 0 {
            return Err(EqualizeError::invalid_input(
                "cannot normalise the histogram of an image with no pixels",
            ));
        }
        // Anything else is a bad table from the previous stage.
        if cumulative.last() != params.pixel_count {
            return Err(EqualizeError::device(
                Operation::Readback,
                format!(
                    "cumulative histogram ends at {}, expected {} pixels",
                    cumulative.last(),
                    params.pixel_count
                ),
            ));
        }
        self.device.zero_buffer(&buffers.lut)?;

        let timing = self.dispatch(stage, &[&buffers.cumulative, &buffers.lut], params)?;
        let words = self.read_table(&buffers.lut)?;
        let lut = Lut::from_words(&words, self.options.max_output).ok_or_else(|| {
            EqualizeError::device(
                Operation::Readback,
                format!("lookup table entry exceeds {}", self.options.max_output),
            )
        })?;

        Ok(StageRun {
            value: lut,
            timing,
            bytes_to_device: 0,
            bytes_from_device: TABLE_BYTES,
        })
    }

    fn reproject(
        &self,
        buffers: &RunBuffers<D::Buffer>,
        params: &StageParams,
    ) -> Result<StageRun<Vec<u8>>, EqualizeError> {
        let stage = Stage::PixelReprojector;
        let timing = self.dispatch(
            stage,
            &[&buffers.input, &buffers.lut, &buffers.output],
            params,
        )?;

        let len = params.pixel_count as u64;
        let pixels = self.device.read_buffer(&buffers.output, len)?;
        if pixels.len() as u64 != len {
            return Err(EqualizeError::transfer(
                Operation::Readback,
                format!("read {} of {} output bytes", pixels.len(), len),
            ));
        }

        Ok(StageRun {
            value: pixels,
            timing,
            bytes_to_device: 0,
            bytes_from_device: len,
        })
    }

    fn dispatch(
        &self,
        stage: Stage,
        args: &[&D::Buffer],
        params: &StageParams,
    ) -> Result<DispatchTiming, EqualizeError> {
        let work_items = stage.work_items(params.pixel_count);
        log::debug!("dispatching {} over {} work items", stage, work_items);
        self.device
            .dispatch(self.kernels.get(stage), args, params, work_items)
    }

    fn read_table(&self, buffer: &D::Buffer) -> Result<[u32; BIN_COUNT], EqualizeError> {
        let bytes = self.device.read_buffer(buffer, TABLE_BYTES)?;
        decode_table(&bytes).ok_or_else(|| {
            EqualizeError::transfer(
                Operation::Readback,
                format!("read {} of {} table bytes", bytes.len(), TABLE_BYTES),
            )
        })
    }
}

/// Reject inputs the device never sees.
fn validate(image: &GreyImage) -> Result<u32, EqualizeError> {
    if image.is_empty() {
        return Err(EqualizeError::invalid_input(format!(
            "image is empty ({}x{})",
            image.width(),
            image.height()
        )));
    }
    if image.pixel_count() > MAX_PIXELS {
        return Err(EqualizeError::invalid_input(format!(
            "image has {} pixels, at most {} are supported",
            image.pixel_count(),
            MAX_PIXELS
        )));
    }
    Ok(image.pixel_count() as u32)
}

/// Device buffers for one run, in the order they are allocated.
struct RunBuffers<B> {
    input: B,
    histogram: B,
    cumulative: B,
    lut: B,
    output: B,
}

impl<B> RunBuffers<B> {
    fn allocate<D>(device: &D, pixel_count: u32) -> Result<Self, EqualizeError>
    where
        D: ComputeDevice<Buffer = B>,
    {
        let pixels = packed_len(pixel_count);
        Ok(Self {
            input: device.create_buffer(BufferRole::InputPixels, pixels)?,
            histogram: device.create_buffer(BufferRole::Histogram, TABLE_BYTES)?,
            cumulative: device.create_buffer(BufferRole::Cumulative, TABLE_BYTES)?,
            lut: device.create_buffer(BufferRole::Lut, TABLE_BYTES)?,
            output: device.create_buffer(BufferRole::OutputPixels, pixels)?,
        })
    }
}

/// What one stage produced, plus its telemetry.
struct StageRun<T> {
    value: T,
    timing: DispatchTiming,
    bytes_to_device: u64,
    bytes_from_device: u64,
}

/// Buffers, state machine and profiling for one invocation of
/// [`Pipeline::run`].
struct RunContext<B> {
    state: RunState,
    buffers: Option<RunBuffers<B>>,
    profiler: Option<ProfilingCollector>,
}

impl<B> RunContext<B> {
    fn new(profiling: bool) -> Self {
        Self {
            state: RunState::Idle,
            buffers: None,
            profiler: profiling.then(ProfilingCollector::new),
        }
    }

    fn attach(&mut self, buffers: RunBuffers<B>) {
        self.buffers = Some(buffers);
        self.advance(RunState::BuffersAllocated);
    }

    fn buffers(&self) -> Result<&RunBuffers<B>, EqualizeError> {
        self.buffers.as_ref().ok_or_else(|| {
            EqualizeError::device(Operation::Allocate, "run buffers are not allocated")
        })
    }

    /// Drop every device buffer of the run.
    fn release(&mut self) {
        if self.buffers.take().is_some() {
            log::debug!("released run buffers");
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        log::debug!("run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn complete<T>(&mut self, stage: Stage, run: StageRun<T>) -> T {
        if let Some(profiler) = &mut self.profiler {
            profiler.record(stage, run.timing, run.bytes_to_device, run.bytes_from_device);
        }
        self.advance(RunState::after(stage));
        run.value
    }

    fn take_report(&mut self) -> ProfilingReport {
        self.profiler
            .take()
            .map(ProfilingCollector::finish)
            .unwrap_or_default()
    }
}
