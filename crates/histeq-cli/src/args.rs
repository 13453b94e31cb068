//! Command-line arguments and how they layer over the config file.

use clap::Parser;
use histeq_core::{BackendPreference, EqualizeConfig};
use std::path::PathBuf;

/// Input image used when `-f` is not given.
pub const DEFAULT_INPUT: &str = "test.pgm";

#[derive(Parser, Debug)]
#[command(name = "histeq")]
#[command(
    version,
    about = "Histogram equalisation for 8-bit greyscale images",
    long_about = None
)]
pub struct Cli {
    /// Platform ordinal (see -l)
    #[arg(short = 'p', long, value_name = "ID")]
    pub platform: Option<usize>,

    /// Device ordinal within the platform (see -l)
    #[arg(short = 'd', long, value_name = "ID")]
    pub device: Option<usize>,

    /// List platforms and devices, then exit
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Input image (8-bit greyscale PGM, PNG or TIFF)
    #[arg(short = 'f', long = "file", value_name = "PATH", default_value = DEFAULT_INPUT)]
    pub input: PathBuf,

    /// Output image, defaults to <input>_equalized.<ext>
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Compute backend: auto, gpu or cpu
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<BackendPreference>,

    /// Config file (YAML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Largest output pixel value (1-255)
    #[arg(long, value_name = "N")]
    pub max_output: Option<u32>,

    /// Skip per-stage timing
    #[arg(long)]
    pub no_profiling: bool,

    /// Worker threads for the CPU backend
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Log pipeline progress
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply flags on top of a loaded config. Returns warnings for any value
    /// that had to be replaced.
    pub fn apply_to(&self, config: &mut EqualizeConfig) -> Vec<String> {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if self.platform.is_some() {
            config.platform = self.platform;
        }
        if self.device.is_some() {
            config.device = self.device;
        }
        if let Some(max_output) = self.max_output {
            config.max_output = max_output;
        }
        if self.no_profiling {
            config.profiling = false;
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }

        config.sanitize()
    }

    /// Default log filter, overridden by `RUST_LOG`.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("histeq").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.input, PathBuf::from("test.pgm"));
        assert!(!cli.list);
        assert!(cli.platform.is_none() && cli.device.is_none());
        assert!(cli.output.is_none());
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_short_flags() {
        let cli = parse(&[
            "-p", "1", "-d", "2", "-f", "in.pgm", "-o", "out.png", "-l", "-v",
        ]);
        assert_eq!(cli.platform, Some(1));
        assert_eq!(cli.device, Some(2));
        assert_eq!(cli.input, PathBuf::from("in.pgm"));
        assert_eq!(cli.output, Some(PathBuf::from("out.png")));
        assert!(cli.list);
        assert_eq!(cli.log_filter(), "debug");
    }

    #[test]
    fn test_backend_aliases() {
        assert_eq!(
            parse(&["--backend", "cpu"]).backend,
            Some(BackendPreference::Cpu)
        );
        assert_eq!(
            parse(&["--backend", "wgpu"]).backend,
            Some(BackendPreference::Gpu)
        );
        assert!(Cli::try_parse_from(["histeq", "--backend", "fpga"]).is_err());
    }

    #[test]
    fn test_non_numeric_ordinal_rejected() {
        assert!(Cli::try_parse_from(["histeq", "-p", "first"]).is_err());
    }

    #[test]
    fn test_help_is_reported_as_display() {
        let err = Cli::try_parse_from(["histeq", "-h"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    // ========================================================================
    // Layering over the config file
    // ========================================================================

    #[test]
    fn test_flags_override_config() {
        let mut config = EqualizeConfig {
            backend: BackendPreference::Gpu,
            platform: Some(3),
            ..Default::default()
        };
        let cli = parse(&[
            "--backend",
            "cpu",
            "-d",
            "1",
            "--max-output",
            "100",
            "--no-profiling",
        ]);

        assert!(cli.apply_to(&mut config).is_empty());
        assert_eq!(config.backend, BackendPreference::Cpu);
        assert_eq!(config.platform, Some(3));
        assert_eq!(config.device, Some(1));
        assert_eq!(config.max_output, 100);
        assert!(!config.profiling);
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let mut config = EqualizeConfig {
            max_output: 200,
            threads: Some(2),
            ..Default::default()
        };
        parse(&[]).apply_to(&mut config);

        assert_eq!(config.max_output, 200);
        assert_eq!(config.threads, Some(2));
        assert!(config.profiling);
    }

    #[test]
    fn test_out_of_range_flag_is_sanitized() {
        let mut config = EqualizeConfig::default();
        let warnings = parse(&["--max-output", "300", "-j", "0"]).apply_to(&mut config);

        assert_eq!(warnings.len(), 2);
        assert_eq!(config.max_output, 255);
        assert_eq!(config.threads, None);
    }
}
