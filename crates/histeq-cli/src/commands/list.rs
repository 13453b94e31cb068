use histeq_core::{list_platforms, ComputeDevice, CpuDevice, PlatformInfo};

/// Print every platform and device ordinal usable with `-p`/`-d`.
pub fn cmd_list() -> Result<(), String> {
    let platforms = list_platforms();
    print!("{}", format_platforms(&platforms));

    let cpu = CpuDevice::new().map_err(|e| e.to_string())?;
    println!("CPU backend (--backend cpu): {}", cpu.name());
    Ok(())
}

pub fn format_platforms(platforms: &[PlatformInfo]) -> String {
    if platforms.is_empty() {
        return "No GPU platforms found.\n".to_string();
    }

    let mut out = String::new();
    for platform in platforms {
        out.push_str(&format!(
            "Platform {}: {}\n",
            platform.ordinal, platform.name
        ));
        for device in &platform.devices {
            out.push_str(&format!(
                "  Device {}: {} ({:?}, driver {})\n",
                device.ordinal,
                device.name,
                device.device_type,
                if device.driver.is_empty() {
                    "unknown"
                } else {
                    device.driver.as_str()
                }
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use histeq_core::gpu::AdapterDeviceType;
    use histeq_core::AdapterSummary;

    #[test]
    fn test_format_no_platforms() {
        assert_eq!(format_platforms(&[]), "No GPU platforms found.\n");
    }

    #[test]
    fn test_format_platforms_with_ordinals() {
        let platforms = [PlatformInfo {
            ordinal: 0,
            name: "Vulkan",
            devices: vec![
                AdapterSummary {
                    ordinal: 0,
                    name: "Discrete".to_string(),
                    device_type: AdapterDeviceType::DiscreteGpu,
                    driver: "1.2".to_string(),
                },
                AdapterSummary {
                    ordinal: 1,
                    name: "Software".to_string(),
                    device_type: AdapterDeviceType::Cpu,
                    driver: String::new(),
                },
            ],
        }];

        let text = format_platforms(&platforms);
        assert!(text.starts_with("Platform 0: Vulkan\n"));
        assert!(text.contains("  Device 0: Discrete ("));
        assert!(text.contains("driver 1.2"));
        assert!(text.contains("  Device 1: Software ("));
        assert!(text.contains("driver unknown"));
    }
}
