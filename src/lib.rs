pub mod capture;
pub mod color;
pub mod error;
pub mod pipeline;
pub mod sink;

use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureTarget;
use crate::color::PaletteSpec;

pub use error::{CaptureError, Result};

/// Environment variable prefix, e.g. `AMBIGLOW_CAPTURE__FPS=60`
pub const ENV_PREFIX: &str = "AMBIGLOW";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub sampling: SamplingConfig,
    pub color: ColorConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub adapter: u32,
    pub output: u32,
    pub fps: u32,
    /// Upper bound for one blocking acquire
    pub acquire_timeout_ms: u32,
    /// Consecutive access-lost recoveries before giving up
    pub max_reopen_attempts: u32,
    pub reopen_delay_ms: u64,
    /// Pin the capture thread to this core
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Sample every `stride`-th pixel in both axes
    pub stride: NonZeroU32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Contrast amount in `[-255, 255]`, 0 leaves colors untouched
    pub contrast: f32,
    /// Snap the output to the nearest palette color
    ///
    /// Off by default: sinks receive the contrast-adjusted RMS average.
    pub quantize: bool,
    pub palette: PaletteSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Keep a sampled grid of the last frame
    pub keep_snapshot: bool,
    /// Capacity of channel-backed sinks
    pub sink_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            adapter: 0,
            output: 0,
            fps: 30,
            acquire_timeout_ms: 100,
            max_reopen_attempts: 5,
            reopen_delay_ms: 500,
            pin_core: None,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            stride: NonZeroU32::new(60).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            contrast: 0.0,
            quantize: false,
            palette: PaletteSpec::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keep_snapshot: false,
            sink_capacity: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "ambiglow=info".into(),
        }
    }
}

impl CaptureConfig {
    pub fn target(&self) -> CaptureTarget {
        CaptureTarget::new(self.adapter, self.output)
    }

    /// Sleep between cycles, `1000 / fps` milliseconds
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.acquire_timeout_ms))
    }

    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }
}

impl Config {
    /// Defaults, then `path` (if given), then `AMBIGLOW_*` environment variables
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.fps == 0 || self.capture.fps > 1000 {
            return Err(CaptureError::Configuration(format!(
                "fps must be in 1..=1000, got {}",
                self.capture.fps
            )));
        }
        if !self.color.contrast.is_finite() {
            return Err(CaptureError::Configuration("contrast must be finite".into()));
        }
        self.color.palette.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.capture.frame_period(), Duration::from_millis(33));
        assert_eq!(config.sampling.stride.get(), 60);
        assert!(!config.color.quantize);
        assert_eq!(config.capture.target(), CaptureTarget::new(0, 0));
    }

    #[test]
    fn zero_fps_is_rejected() {
        let mut config = Config::default();
        config.capture.fps = 0;
        assert!(matches!(config.validate(), Err(CaptureError::Configuration(_))));
    }

    #[test]
    fn zero_palette_steps_are_rejected() {
        let mut config = Config::default();
        config.color.palette.value_levels = 0;
        assert!(matches!(config.validate(), Err(CaptureError::Configuration(_))));
    }

    #[test]
    fn nan_contrast_is_rejected() {
        let mut config = Config::default();
        config.color.contrast = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_toml_file() {
        let path =
            std::env::temp_dir().join(format!("ambiglow-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        let toml = "[capture]\noutput = 1\nfps = 60\n\n\
                    [sampling]\nstride = 8\n\n\
                    [color]\ncontrast = 40\nquantize = true\n\n\
                    [color.palette]\nhue_steps = 12";
        writeln!(file, "{toml}").unwrap();
        drop(file);

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.capture.output, 1);
        assert_eq!(config.capture.fps, 60);
        assert_eq!(config.capture.acquire_timeout_ms, 100);
        assert_eq!(config.sampling.stride.get(), 8);
        assert_eq!(config.color.contrast, 40.0);
        assert!(config.color.quantize);
        assert_eq!(config.color.palette.hue_steps, 12);
        assert_eq!(config.color.palette.value_levels, 3);
        assert_eq!(config.logging.filter, "ambiglow=info");
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("ambiglow-definitely-missing.toml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
