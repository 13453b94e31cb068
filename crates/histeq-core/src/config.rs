//! Configuration loading.
//!
//! Settings come from an optional YAML file. Every field has a default, so an
//! empty or missing file yields a working configuration. Command-line flags
//! are applied on top by the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::stages::DEFAULT_MAX_OUTPUT;

/// Candidate config file names searched in the working directory.
const CONFIG_FILENAMES: &[&str] = &["histeq.yml", "histeq.yaml"];

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "HISTEQ_CONFIG";

/// Which compute backend to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// GPU when an adapter is present, otherwise the CPU backend.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl BackendPreference {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Auto => "auto",
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        }
    }
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "gpu" | "wgpu" => Ok(Self::Gpu),
            "cpu" | "rayon" => Ok(Self::Cpu),
            _ => Err(format!(
                "Unknown backend: {} (expected auto, gpu or cpu)",
                s
            )),
        }
    }
}

/// Adapter preference when no explicit device ordinal is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

/// Complete configuration file structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EqualizeConfig {
    pub backend: BackendPreference,
    /// Platform ordinal as listed by `histeq -l`.
    pub platform: Option<usize>,
    /// Device ordinal within the platform.
    pub device: Option<usize>,
    pub power_preference: PowerPreference,
    /// Collect per-stage timing.
    pub profiling: bool,
    /// Largest output pixel value.
    pub max_output: u32,
    /// Worker threads for the CPU backend; rayon's default when unset.
    pub threads: Option<usize>,
}

impl Default for EqualizeConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            platform: None,
            device: None,
            power_preference: PowerPreference::HighPerformance,
            profiling: true,
            max_output: DEFAULT_MAX_OUTPUT as u32,
            threads: None,
        }
    }
}

impl EqualizeConfig {
    /// Replace out-of-range values with defaults, describing each change.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.max_output == 0 || self.max_output > DEFAULT_MAX_OUTPUT as u32 {
            warnings.push(format!(
                "max_output {} is outside 1..=255; using {}",
                self.max_output, DEFAULT_MAX_OUTPUT
            ));
            self.max_output = DEFAULT_MAX_OUTPUT as u32;
        }
        if self.threads == Some(0) {
            warnings.push("threads: 0 ignored; using the default thread count".to_string());
            self.threads = None;
        }

        warnings
    }

    /// The per-run subset handed to the orchestrator.
    pub fn options(&self) -> EqualizeOptions {
        EqualizeOptions {
            max_output: u8::try_from(self.max_output).unwrap_or(DEFAULT_MAX_OUTPUT),
            profiling: self.profiling,
        }
    }
}

/// Settings that affect a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqualizeOptions {
    pub max_output: u8,
    pub profiling: bool,
}

impl Default for EqualizeOptions {
    fn default() -> Self {
        Self {
            max_output: DEFAULT_MAX_OUTPUT,
            profiling: true,
        }
    }
}

/// The loaded configuration, the file it came from, and any warnings.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    pub config: EqualizeConfig,
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Load configuration, trying `custom_path` before the standard locations.
pub fn load_config(custom_path: Option<&Path>) -> ConfigHandle {
    let mut warnings = Vec::new();
    if let Some(path) = custom_path {
        if !path.is_file() {
            warnings.push(format!("Config file {} not found", path.display()));
        }
    }

    let mut handle = load_first(&config_candidates(custom_path));
    warnings.append(&mut handle.warnings);
    handle.warnings = warnings;
    handle
}

/// Load the first candidate that exists and parses.
pub fn load_first(candidates: &[PathBuf]) -> ConfigHandle {
    let mut warnings = Vec::new();

    for candidate in candidates {
        if !candidate.is_file() {
            continue;
        }

        match fs::read_to_string(candidate) {
            Ok(contents) => match parse_config(&contents) {
                Ok(mut config) => {
                    warnings.extend(config.sanitize());
                    let source = fs::canonicalize(candidate)
                        .unwrap_or_else(|_| candidate.clone());
                    return ConfigHandle {
                        config,
                        source: Some(source),
                        warnings,
                    };
                }
                Err(err) => warnings.push(format!(
                    "Failed to parse config {}: {}",
                    candidate.display(),
                    err
                )),
            },
            Err(err) => warnings.push(format!(
                "Failed to read config {}: {}",
                candidate.display(),
                err
            )),
        }
    }

    ConfigHandle {
        config: EqualizeConfig::default(),
        source: None,
        warnings,
    }
}

/// Parse YAML. An empty document is the default configuration.
pub fn parse_config(contents: &str) -> Result<EqualizeConfig, serde_yaml::Error> {
    if contents.trim().is_empty() {
        return Ok(EqualizeConfig::default());
    }
    serde_yaml::from_str(contents)
}

fn config_candidates(custom_path: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(path) = custom_path {
        candidates.push(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        candidates.push(PathBuf::from(env_path));
    }

    if let Ok(cwd) = std::env::current_dir() {
        for name in CONFIG_FILENAMES {
            candidates.push(cwd.join(name));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("histeq").join(CONFIG_FILENAMES[0]));
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // ========================================================================
    // Parsing
    // ========================================================================

    #[test]
    fn test_empty_document_is_default() {
        let config = parse_config("").unwrap();
        assert_eq!(config.backend, BackendPreference::Auto);
        assert!(config.profiling);
        assert_eq!(config.max_output, 255);
        assert_eq!(config.options(), EqualizeOptions::default());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = parse_config("backend: cpu\nthreads: 3\n").unwrap();
        assert_eq!(config.backend, BackendPreference::Cpu);
        assert_eq!(config.threads, Some(3));
        assert_eq!(config.power_preference, PowerPreference::HighPerformance);
        assert!(config.platform.is_none());
    }

    #[test]
    fn test_full_document() {
        let yaml = "\
backend: gpu
platform: 1
device: 0
power_preference: low-power
profiling: false
max_output: 200
";
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.backend, BackendPreference::Gpu);
        assert_eq!(config.platform, Some(1));
        assert_eq!(config.device, Some(0));
        assert_eq!(config.power_preference, PowerPreference::LowPower);

        let options = config.options();
        assert_eq!(options.max_output, 200);
        assert!(!options.profiling);
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        assert!(parse_config("backend: opencl\n").is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(
            "GPU".parse::<BackendPreference>(),
            Ok(BackendPreference::Gpu)
        );
        assert_eq!(
            "rayon".parse::<BackendPreference>(),
            Ok(BackendPreference::Cpu)
        );
        assert!("tpu".parse::<BackendPreference>().is_err());
        assert_eq!(BackendPreference::Auto.as_str(), "auto");
    }

    // ========================================================================
    // Sanitising
    // ========================================================================

    #[test]
    fn test_sanitize_zero_max_output() {
        let mut config = parse_config("max_output: 0\nthreads: 0\n").unwrap();
        let warnings = config.sanitize();
        assert_eq!(warnings.len(), 2);
        assert_eq!(config.max_output, 255);
        assert!(config.threads.is_none());
    }

    #[test]
    fn test_sanitize_keeps_valid_values() {
        let mut config = parse_config("max_output: 1\n").unwrap();
        assert!(config.sanitize().is_empty());
        assert_eq!(config.options().max_output, 1);
    }

    // ========================================================================
    // File search
    // ========================================================================

    #[test]
    fn test_load_first_skips_missing_and_broken() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.yml");
        let broken = dir.path().join("broken.yml");
        let good = dir.path().join("good.yml");
        fs::write(&broken, "backend: [not, a, backend]\n").unwrap();
        fs::write(&good, "backend: cpu\nmax_output: 0\n").unwrap();

        let handle = load_first(&[missing, broken, good.clone()]);
        assert_eq!(handle.config.backend, BackendPreference::Cpu);
        assert_eq!(handle.config.max_output, 255);
        assert_eq!(handle.source, Some(fs::canonicalize(&good).unwrap()));
        assert_eq!(handle.warnings.len(), 2);
        assert!(handle.warnings[0].contains("Failed to parse"));
        assert!(handle.warnings[1].contains("max_output"));
    }

    #[test]
    fn test_load_first_without_files_uses_defaults() {
        let dir = tempdir().unwrap();
        let handle = load_first(&[dir.path().join("nope.yml")]);
        assert!(handle.source.is_none());
        assert!(handle.warnings.is_empty());
        assert_eq!(handle.config.backend, BackendPreference::Auto);
    }

    #[test]
    fn test_load_config_explicit_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        fs::write(&path, "profiling: false\n").unwrap();

        let handle = load_config(Some(&path));
        assert!(!handle.config.profiling);
        assert_eq!(handle.source, Some(fs::canonicalize(&path).unwrap()));
    }

    #[test]
    fn test_load_config_reports_missing_explicit_path() {
        let dir = tempdir().unwrap();
        let handle = load_config(Some(&dir.path().join("absent.yml")));
        assert!(handle.warnings[0].contains("not found"));
    }
}
