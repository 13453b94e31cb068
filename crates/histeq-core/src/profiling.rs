//! Per-stage timing and transfer telemetry for one run.

use std::fmt;
use std::time::{Duration, Instant};

use crate::device::DispatchTiming;
use crate::stages::Stage;

/// Where a sample's execution interval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSource {
    /// Device timestamp queries around the dispatch.
    Device,
    /// Host clock around submit and completion.
    Host,
}

/// Telemetry for one executed stage. Offsets are relative to the run's start.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilingSample {
    pub stage: Stage,
    pub submitted: Duration,
    pub started: Duration,
    pub ended: Duration,
    pub bytes_to_device: u64,
    pub bytes_from_device: u64,
    pub source: TimingSource,
}

impl ProfilingSample {
    /// Time spent waiting between submission and the start of execution.
    pub fn queued(&self) -> Duration {
        self.started.saturating_sub(self.submitted)
    }

    pub fn execution(&self) -> Duration {
        self.ended.saturating_sub(self.started)
    }

    pub fn total(&self) -> Duration {
        self.ended.saturating_sub(self.submitted)
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_to_device + self.bytes_from_device
    }
}

impl fmt::Display for ProfilingSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Queued {}us, Executed {}us, Total {}us, Transferred {} bytes ({} to device, {} from device, {:?} clock)",
            self.queued().as_micros(),
            self.execution().as_micros(),
            self.total().as_micros(),
            self.bytes_transferred(),
            self.bytes_to_device,
            self.bytes_from_device,
            self.source
        )
    }
}

/// Appends one sample per stage while a run executes.
#[derive(Debug)]
pub struct ProfilingCollector {
    origin: Instant,
    samples: Vec<ProfilingSample>,
}

impl ProfilingCollector {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(origin: Instant) -> Self {
        Self {
            origin,
            samples: Vec::with_capacity(Stage::ALL.len()),
        }
    }

    /// Record a completed stage.
    ///
    /// Device timestamps only give a duration, so the execution interval is
    /// anchored to the host completion instant and never starts before
    /// submission.
    pub fn record(
        &mut self,
        stage: Stage,
        timing: DispatchTiming,
        bytes_to_device: u64,
        bytes_from_device: u64,
    ) {
        let submitted = timing.submitted.saturating_duration_since(self.origin);
        let ended = timing.completed.saturating_duration_since(self.origin);
        let (started, source) = match timing.device_elapsed {
            Some(elapsed) => (ended.saturating_sub(elapsed).max(submitted), TimingSource::Device),
            None => (submitted, TimingSource::Host),
        };

        debug_assert!(
            self.samples.last().map_or(true, |s| s.stage.index() < stage.index()),
            "stages recorded out of order"
        );

        self.samples.push(ProfilingSample {
            stage,
            submitted,
            started,
            ended,
            bytes_to_device,
            bytes_from_device,
            source,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn finish(self) -> ProfilingReport {
        ProfilingReport {
            samples: self.samples,
        }
    }
}

impl Default for ProfilingCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only telemetry of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilingReport {
    samples: Vec<ProfilingSample>,
}

impl ProfilingReport {
    pub fn samples(&self) -> &[ProfilingSample] {
        &self.samples
    }

    pub fn sample(&self, stage: Stage) -> Option<&ProfilingSample> {
        self.samples.iter().find(|s| s.stage == stage)
    }

    pub fn total_execution(&self) -> Duration {
        self.samples.iter().map(ProfilingSample::execution).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.samples.iter().map(ProfilingSample::bytes_transferred).sum()
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for sample in &self.samples {
            writeln!(f, "{}: {}", sample.stage, sample)?;
        }
        write!(
            f,
            "All stages: Executed {}us, Transferred {} bytes",
            self.total_execution().as_micros(),
            self.total_bytes()
        )
    }
}
