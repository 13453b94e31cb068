//! Kernel bodies for the rayon backend.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use super::{CpuBuffer, KernelFn};
use crate::error::{EqualizeError, ErrorContext, Operation};
use crate::stages::{lut_entry, unpack_pixel, Stage, StageParams, BIN_COUNT};

/// Bins per block in the two-pass scan.
const SCAN_BLOCK: usize = 16;

pub(super) fn for_stage(stage: Stage) -> KernelFn {
    match stage {
        Stage::BinCounter => histogram_builder,
        Stage::PrefixAccumulator => cumulative_scan,
        Stage::RangeMapper => lut_normalize,
        Stage::PixelReprojector => reproject,
    }
}

fn bad_args(stage: Stage, detail: String) -> EqualizeError {
    EqualizeError::Device {
        context: ErrorContext::in_stage(stage, Operation::Dispatch),
        detail,
    }
}

fn table<'a>(stage: Stage, buffer: &'a CpuBuffer) -> Result<&'a [AtomicU32], EqualizeError> {
    let words = buffer.words();
    if words.len() != BIN_COUNT {
        return Err(bad_args(
            stage,
            format!(
                "{} holds {} entries, expected {}",
                buffer.role().label(),
                words.len(),
                BIN_COUNT
            ),
        ));
    }
    Ok(words)
}

fn load_table(words: &[AtomicU32]) -> Vec<u32> {
    words.iter().map(|w| w.load(Ordering::Relaxed)).collect()
}

/// Scatter: one work item per pixel, atomically bumping its bin.
fn histogram_builder(
    args: &[&CpuBuffer],
    _params: &StageParams,
    work_items: u32,
) -> Result<(), EqualizeError> {
    let [input, bins] = args else {
        return Err(bad_args(Stage::BinCounter, "expected 2 buffers".into()));
    };
    let bins = table(Stage::BinCounter, bins)?;
    let pixels = input.words();
    if (pixels.len() as u64) * 4 < work_items as u64 {
        return Err(bad_args(
            Stage::BinCounter,
            format!("{} pixels requested from a {}-byte buffer", work_items, input.size()),
        ));
    }

    (0..work_items as usize).into_par_iter().for_each(|p| {
        let value = unpack_pixel(pixels[p / 4].load(Ordering::Relaxed), p);
        bins[value as usize].fetch_add(1, Ordering::Relaxed);
    });
    Ok(())
}

/// Scan: per-block sums, an exclusive scan of those sums, then a per-block
/// inclusive pass seeded with the block's offset.
fn cumulative_scan(
    args: &[&CpuBuffer],
    _params: &StageParams,
    work_items: u32,
) -> Result<(), EqualizeError> {
    let [histogram, cumulative] = args else {
        return Err(bad_args(Stage::PrefixAccumulator, "expected 2 buffers".into()));
    };
    if work_items as usize != BIN_COUNT {
        return Err(bad_args(
            Stage::PrefixAccumulator,
            format!("scan domain is {} bins, got {}", BIN_COUNT, work_items),
        ));
    }
    let input = load_table(table(Stage::PrefixAccumulator, histogram)?);
    let output = table(Stage::PrefixAccumulator, cumulative)?;

    let block_sums: Vec<u32> = input
        .par_chunks(SCAN_BLOCK)
        .map(|block| block.iter().sum())
        .collect();

    let mut offsets = Vec::with_capacity(block_sums.len());
    let mut running = 0u32;
    for sum in block_sums {
        offsets.push(running);
        running += sum;
    }

    output
        .par_chunks(SCAN_BLOCK)
        .zip(input.par_chunks(SCAN_BLOCK))
        .zip(offsets.par_iter())
        .for_each(|((out, block), &offset)| {
            let mut running = offset;
            for (slot, &count) in out.iter().zip(block) {
                running += count;
                slot.store(running, Ordering::Relaxed);
            }
        });
    Ok(())
}

/// Map: one work item per bin.
fn lut_normalize(
    args: &[&CpuBuffer],
    params: &StageParams,
    _work_items: u32,
) -> Result<(), EqualizeError> {
    let [cumulative, lut] = args else {
        return Err(bad_args(Stage::RangeMapper, "expected 2 buffers".into()));
    };
    if params.pixel_count == 0 {
        return Err(EqualizeError::invalid_input(
            "cannot normalise the histogram of an image with no pixels",
        ));
    }
    let cumulative = table(Stage::RangeMapper, cumulative)?;
    let lut = table(Stage::RangeMapper, lut)?;

    lut.par_iter()
        .zip(cumulative.par_iter())
        .for_each(|(entry, count)| {
            let value = lut_entry(
                count.load(Ordering::Relaxed),
                params.max_output,
                params.pixel_count,
            );
            entry.store(value, Ordering::Relaxed);
        });
    Ok(())
}

/// Gather: one work item per packed word of four pixels.
fn reproject(
    args: &[&CpuBuffer],
    _params: &StageParams,
    work_items: u32,
) -> Result<(), EqualizeError> {
    let [input, lut, output] = args else {
        return Err(bad_args(Stage::PixelReprojector, "expected 3 buffers".into()));
    };
    let words = work_items as usize;
    if input.words().len() < words || output.words().len() < words {
        return Err(bad_args(
            Stage::PixelReprojector,
            format!("{} words requested from undersized pixel buffers", words),
        ));
    }
    let lut = load_table(table(Stage::PixelReprojector, lut)?);

    output.words()[..words]
        .par_iter()
        .zip(input.words()[..words].par_iter())
        .for_each(|(out, word)| {
            let word = word.load(Ordering::Relaxed);
            let mut packed = 0u32;
            for lane in 0..4u32 {
                let value = (word >> (lane * 8)) & 0xFF;
                packed |= (lut[value as usize] & 0xFF) << (lane * 8);
            }
            out.store(packed, Ordering::Relaxed);
        });
    Ok(())
}
