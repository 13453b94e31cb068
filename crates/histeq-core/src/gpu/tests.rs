//! Parity tests between CPU and GPU implementations.
//!
//! Tests that need an adapter return early when none is present.

use super::context::workgroup_grid;
use super::*;
use crate::config::EqualizeOptions;
use crate::cpu::CpuDevice;
use crate::device::{BufferRole, ComputeDevice};
use crate::error::ErrorKind;
use crate::models::GreyImage;
use crate::pipeline::{Pipeline, RunState};
use crate::stages::{Stage, StageParams, TABLE_BYTES};

fn gpu_context() -> Option<GpuContext> {
    if !is_gpu_available() {
        eprintln!("GPU not available, skipping GPU test");
        return None;
    }
    Some(GpuContext::new().expect("Failed to create GPU context"))
}

/// Deterministic image with a skewed value distribution.
fn generate_test_image(width: u32, height: u32) -> GreyImage {
    let mut state = 0x2545_f491u32;
    let pixels = (0..width * height)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            ((state % 256) * (state % 97) / 96) as u8
        })
        .collect();
    GreyImage::new(width, height, pixels).unwrap()
}

// ========================================================================
// Availability
// ========================================================================

#[test]
fn test_gpu_available() {
    if !is_gpu_available() {
        eprintln!("GPU not available, skipping GPU tests");
        return;
    }

    let info = gpu_info().expect("Should get GPU info");
    eprintln!("GPU: {}", info);
}

#[test]
fn test_platform_ordinals_are_dense() {
    for (i, platform) in list_platforms().iter().enumerate() {
        assert_eq!(platform.ordinal, i);
        assert!(!platform.devices.is_empty());
        for (j, device) in platform.devices.iter().enumerate() {
            assert_eq!(device.ordinal, j);
        }
    }
}

#[test]
fn test_out_of_range_platform_is_device_error() {
    let selection = DeviceSelection {
        platform: Some(999),
        ..Default::default()
    };
    let err = GpuContext::with_selection(&selection).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(err.to_string().contains("platform 999"));
}

#[test]
fn test_out_of_range_device_is_device_error() {
    if list_platforms().is_empty() {
        return;
    }
    let selection = DeviceSelection {
        platform: Some(0),
        device: Some(999),
        ..Default::default()
    };
    let err = GpuContext::with_selection(&selection).err().unwrap();
    assert!(err.to_string().contains("device 999"));
}

// ========================================================================
// Dispatch grid
// ========================================================================

#[test]
fn test_workgroup_grid_single_row() {
    assert_eq!(workgroup_grid(1).unwrap(), (1, 1));
    assert_eq!(workgroup_grid(256).unwrap(), (1, 1));
    assert_eq!(workgroup_grid(257).unwrap(), (2, 1));
    assert_eq!(workgroup_grid(65535 * 256).unwrap(), (65535, 1));
}

#[test]
fn test_workgroup_grid_covers_large_dispatches() {
    let work_items = u32::MAX / 2;
    let (x, y) = workgroup_grid(work_items).unwrap();
    assert!(x <= 65535 && y <= 65535);
    assert!(x as u64 * y as u64 * 256 >= work_items as u64);
}

// ========================================================================
// Device plumbing
// ========================================================================

#[test]
fn test_upload_download_roundtrip() {
    let Some(ctx) = gpu_context() else { return };

    let data: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
    let buffer = ctx
        .create_buffer(BufferRole::InputPixels, data.len() as u64)
        .unwrap();
    ctx.write_buffer(&buffer, &data).unwrap();

    assert_eq!(ctx.read_buffer(&buffer, data.len() as u64).unwrap(), data);
    // Reads that are not word-sized are truncated on the host.
    assert_eq!(ctx.read_buffer(&buffer, 5).unwrap(), &data[..5]);

    ctx.zero_buffer(&buffer).unwrap();
    assert!(ctx.read_buffer(&buffer, 64).unwrap().iter().all(|&b| b == 0));
}

#[test]
fn test_gpu_dispatch_checks_arity() {
    let Some(ctx) = gpu_context() else { return };

    let kernel = ctx.resolve_kernel(Stage::PixelReprojector).unwrap();
    let buffer = ctx.create_buffer(BufferRole::Lut, TABLE_BYTES).unwrap();
    let err = ctx
        .dispatch(&kernel, &[&buffer], &StageParams::new(4, 255), 1)
        .unwrap_err();
    assert_eq!(err.context().unwrap().stage, Some(Stage::PixelReprojector));
}

// ========================================================================
// CPU/GPU parity
// ========================================================================

#[test]
fn test_pipeline_matches_cpu() {
    let Some(ctx) = gpu_context() else { return };

    let mut gpu = Pipeline::new(ctx, EqualizeOptions::default()).unwrap();
    let mut cpu = Pipeline::new(CpuDevice::new().unwrap(), EqualizeOptions::default()).unwrap();

    for (width, height) in [(1, 1), (5, 1), (2, 2), (63, 17), (640, 480)] {
        let image = generate_test_image(width, height);
        let expected = cpu.run(&image).unwrap();
        let actual = gpu.run(&image).unwrap();

        assert_eq!(actual.histogram, expected.histogram, "{}x{}", width, height);
        assert_eq!(actual.cumulative, expected.cumulative, "{}x{}", width, height);
        assert_eq!(actual.lut, expected.lut, "{}x{}", width, height);
        assert_eq!(actual.output, expected.output, "{}x{}", width, height);
        assert_eq!(gpu.last_state(), RunState::Complete);
    }
}

#[test]
fn test_pipeline_matches_cpu_with_lower_ceiling() {
    let Some(ctx) = gpu_context() else { return };

    let options = EqualizeOptions {
        max_output: 100,
        profiling: false,
    };
    let image = generate_test_image(300, 7);
    let expected = Pipeline::new(CpuDevice::new().unwrap(), options)
        .unwrap()
        .run(&image)
        .unwrap();
    let actual = Pipeline::new(ctx, options).unwrap().run(&image).unwrap();

    assert_eq!(actual.lut, expected.lut);
    assert_eq!(actual.output, expected.output);
    assert!(actual.profile.samples().is_empty());
}

#[test]
fn test_gpu_profiling_records_each_stage() {
    let Some(ctx) = gpu_context() else { return };

    let mut pipeline = Pipeline::new(ctx, EqualizeOptions::default()).unwrap();
    let result = pipeline.run(&generate_test_image(32, 32)).unwrap();

    let stages: Vec<_> = result.profile.samples().iter().map(|s| s.stage).collect();
    assert_eq!(stages, Stage::ALL);
    for sample in result.profile.samples() {
        assert!(sample.started >= sample.submitted);
        assert!(sample.ended >= sample.started);
    }
}
