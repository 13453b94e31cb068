use std::path::{Path, PathBuf};

use histeq_core::{
    default_output_path, load_grey_image, save_grey_image, BackendPreference, ComputeDevice,
    CpuDevice, DeviceSelection, EqualizeConfig, EqualizeError, EqualizeOptions, GpuContext,
    GreyImage, Pipeline,
};

use crate::report::format_equalization;

/// Adapter selection for the GPU backend.
pub fn device_selection(config: &EqualizeConfig) -> DeviceSelection {
    DeviceSelection {
        platform: config.platform,
        device: config.device,
        power_preference: config.power_preference,
        profiling: config.profiling,
    }
}

/// Equalise `input` on the configured backend and write the result.
pub fn cmd_equalize(
    input: &Path,
    output: Option<PathBuf>,
    config: &EqualizeConfig,
) -> Result<(), EqualizeError> {
    let image = load_grey_image(input)?;
    log::info!(
        "loaded {} ({}x{})",
        input.display(),
        image.width(),
        image.height()
    );
    let output = output.unwrap_or_else(|| default_output_path(input));
    let options = config.options();

    match config.backend {
        BackendPreference::Cpu => run_with(cpu_device(config)?, &image, options, &output),
        BackendPreference::Gpu => run_with(
            GpuContext::with_selection(&device_selection(config))?,
            &image,
            options,
            &output,
        ),
        BackendPreference::Auto => match GpuContext::with_selection(&device_selection(config)) {
            Ok(ctx) => run_with(ctx, &image, options, &output),
            // An explicitly requested adapter is never silently replaced.
            Err(err) if config.platform.is_some() || config.device.is_some() => Err(err),
            Err(err) => {
                log::warn!("GPU unavailable ({}); using the CPU backend", err);
                run_with(cpu_device(config)?, &image, options, &output)
            }
        },
    }
}

fn cpu_device(config: &EqualizeConfig) -> Result<CpuDevice, EqualizeError> {
    CpuDevice::with_threads(config.threads)
}

fn run_with<D: ComputeDevice>(
    device: D,
    image: &GreyImage,
    options: EqualizeOptions,
    output: &Path,
) -> Result<(), EqualizeError> {
    println!("Running on {}", device.name());

    let mut pipeline = Pipeline::new(device, options)?;
    let result = pipeline.run(image)?;

    println!();
    println!("{}", format_equalization(&result));

    save_grey_image(&result.output, output)?;
    println!();
    println!("Saved {}", output.display());
    Ok(())
}
