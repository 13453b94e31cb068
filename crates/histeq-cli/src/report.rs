//! Text rendering of run results and device listings.

use histeq_core::{Equalization, ProfilingReport, Stage};
use std::fmt::Display;

/// `label = [a, b, c]`
pub fn format_table<T: Display>(label: &str, values: &[T]) -> String {
    let joined = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} = [{}]", label, joined)
}

/// Kernel time and full profiling line for one stage, or a note when the
/// stage was not timed.
pub fn format_stage_timing(profile: &ProfilingReport, stage: Stage) -> String {
    match profile.sample(stage) {
        Some(sample) => format!(
            "{} kernel execution time [ns]: {}\n{}",
            stage,
            sample.execution().as_nanos(),
            sample
        ),
        None => format!("{} kernel execution time: not profiled", stage),
    }
}

/// Execution time and bytes moved across all stages, if the run was profiled.
pub fn format_profile_totals(profile: &ProfilingReport) -> Option<String> {
    if profile.samples().is_empty() {
        return None;
    }
    Some(format!(
        "All stages: Executed {}us, Transferred {} bytes",
        profile.total_execution().as_micros(),
        profile.total_bytes()
    ))
}

/// Everything printed after a successful run, minus the device line.
pub fn format_equalization(result: &Equalization) -> String {
    let sections = [
        (
            format_table("Histogram", result.histogram.bins()),
            Stage::BinCounter,
        ),
        (
            format_table("Cumulative Histogram", result.cumulative.bins()),
            Stage::PrefixAccumulator,
        ),
        (
            format_table("LUT", result.lut.entries()),
            Stage::RangeMapper,
        ),
    ];

    let mut out = String::new();
    for (table, stage) in sections {
        out.push_str(&table);
        out.push('\n');
        out.push_str(&format_stage_timing(&result.profile, stage));
        out.push_str("\n\n");
    }
    out.push_str(&format_stage_timing(
        &result.profile,
        Stage::PixelReprojector,
    ));
    if let Some(totals) = format_profile_totals(&result.profile) {
        out.push_str("\n\n");
        out.push_str(&totals);
    }
    out
}
