//! The four pipeline stages and the arithmetic they share across backends.
//!
//! Pixels travel to the device packed four per little-endian `u32` word. The
//! histogram, cumulative histogram and lookup table are each [`BIN_COUNT`]
//! `u32` words.

use std::fmt;

/// Number of histogram bins for 8-bit pixels.
pub const BIN_COUNT: usize = 256;

/// Size in bytes of one 256-entry table on the device.
pub const TABLE_BYTES: u64 = (BIN_COUNT * std::mem::size_of::<u32>()) as u64;

/// Output ceiling for 8-bit images.
pub const DEFAULT_MAX_OUTPUT: u8 = u8::MAX;

/// Largest pixel count a run accepts. The Range Mapper's fixed-width
/// rounding needs `2 * total` to fit in a `u32`.
pub const MAX_PIXELS: u64 = (1 << 31) - 1;

/// A stage of the equalisation pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Scatter: one atomic increment per pixel into its bin.
    BinCounter,
    /// Scan: inclusive prefix sum over the bins.
    PrefixAccumulator,
    /// Map: cumulative counts to output values.
    RangeMapper,
    /// Gather: substitute each pixel with its LUT entry.
    PixelReprojector,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::BinCounter,
        Stage::PrefixAccumulator,
        Stage::RangeMapper,
        Stage::PixelReprojector,
    ];

    /// Name of the program entry point implementing this stage.
    pub fn entry_point(self) -> &'static str {
        match self {
            Stage::BinCounter => "histogram_builder",
            Stage::PrefixAccumulator => "cumulative_scan",
            Stage::RangeMapper => "lut_normalize",
            Stage::PixelReprojector => "reproject",
        }
    }

    /// Number of positional buffer arguments the entry point takes.
    pub fn arity(self) -> usize {
        match self {
            Stage::PixelReprojector => 3,
            _ => 2,
        }
    }

    /// Whether each positional argument is only read by the kernel.
    pub fn read_only_args(self) -> &'static [bool] {
        match self {
            Stage::PixelReprojector => &[true, true, false],
            _ => &[true, false],
        }
    }

    /// Number of parallel work items for an image of `pixel_count` pixels.
    ///
    /// Per pixel for the scatter, per bin for the scan and the map, and per
    /// packed word for the gather so that no two work items share an output word.
    pub fn work_items(self, pixel_count: u32) -> u32 {
        match self {
            Stage::BinCounter => pixel_count,
            Stage::PrefixAccumulator | Stage::RangeMapper => BIN_COUNT as u32,
            Stage::PixelReprojector => word_count(pixel_count),
        }
    }

    pub fn index(self) -> usize {
        match self {
            Stage::BinCounter => 0,
            Stage::PrefixAccumulator => 1,
            Stage::RangeMapper => 2,
            Stage::PixelReprojector => 3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BinCounter => "bin counter",
            Stage::PrefixAccumulator => "prefix accumulator",
            Stage::RangeMapper => "range mapper",
            Stage::PixelReprojector => "pixel reprojector",
        };
        f.write_str(name)
    }
}

/// Scalar arguments every stage receives alongside its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageParams {
    pub pixel_count: u32,
    pub max_output: u32,
}

impl StageParams {
    pub fn new(pixel_count: u32, max_output: u8) -> Self {
        Self {
            pixel_count,
            max_output: max_output as u32,
        }
    }
}

/// Resolved kernel handles, one per stage, built once per pipeline.
pub struct KernelTable<K> {
    kernels: [K; 4],
}

impl<K> KernelTable<K> {
    /// Resolve every stage in order, stopping at the first failure.
    pub fn resolve<E>(mut resolve: impl FnMut(Stage) -> Result<K, E>) -> Result<Self, E> {
        let [a, b, c, d] = Stage::ALL;
        Ok(Self {
            kernels: [resolve(a)?, resolve(b)?, resolve(c)?, resolve(d)?],
        })
    }

    pub fn get(&self, stage: Stage) -> &K {
        &self.kernels[stage.index()]
    }
}

/// LUT entry for one bin: `round(cumulative * max_output / total)` with ties
/// rounded up, clamped to `max_output`.
///
/// `total` must be non-zero.
pub fn lut_entry(cumulative: u32, max_output: u32, total: u32) -> u32 {
    debug_assert!(total > 0);
    let total = total as u64;
    let scaled = (cumulative as u64 * max_output as u64 + total / 2) / total;
    scaled.min(max_output as u64) as u32
}

/// Number of `u32` words holding `pixel_count` packed pixels.
pub fn word_count(pixel_count: u32) -> u32 {
    pixel_count.div_ceil(4)
}

/// Device buffer size in bytes for `pixel_count` packed pixels.
pub fn packed_len(pixel_count: u32) -> u64 {
    word_count(pixel_count) as u64 * 4
}

/// Pack pixels for upload, zero-padding the last word.
pub fn pack_pixels(pixels: &[u8]) -> Vec<u8> {
    let mut packed = pixels.to_vec();
    packed.resize(packed_len(pixels.len() as u32) as usize, 0);
    packed
}

/// Pixel `index` out of the packed word that holds it.
pub fn unpack_pixel(word: u32, index: usize) -> u8 {
    (word >> ((index % 4) * 8)) as u8
}

/// Decode a 256-entry table read back from the device.
pub fn decode_table(bytes: &[u8]) -> Option<[u32; BIN_COUNT]> {
    if bytes.len() != TABLE_BYTES as usize {
        return None;
    }
    let mut table = [0u32; BIN_COUNT];
    for (slot, chunk) in table.iter_mut().zip(bytes.chunks_exact(4)) {
        *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Some(table)
}
