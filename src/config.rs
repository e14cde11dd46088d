use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for the video cropper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Export and encoding settings
    pub export: ExportConfig,

    /// Per-frame rendering settings
    pub render: RenderConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.export.validate()?;
        self.render.validate()?;
        Ok(())
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// ffmpeg executable used for decoding and encoding
    pub ffmpeg_path: PathBuf,

    /// ffprobe executable used for asset inspection
    pub ffprobe_path: PathBuf,

    /// Output container extension (mov, mp4, mkv)
    pub container: String,

    /// Video encoder passed to ffmpeg
    pub video_codec: String,

    /// Constant rate factor, lower is better quality
    pub crf: u8,

    /// Encoder speed preset
    pub encoder_preset: String,

    /// Directory for generated output files, system temp dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Progress sampling interval in milliseconds
    pub progress_interval_ms: u64,

    /// Shrink the crop to even dimensions (required by yuv420p encoders)
    pub even_dimensions: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            container: "mov".to_string(),
            video_codec: "libx264".to_string(),
            crf: 12,
            encoder_preset: "slow".to_string(),
            temp_dir: None,
            progress_interval_ms: 200,
            even_dimensions: true,
        }
    }
}

impl ExportConfig {
    /// Directory that receives generated output files
    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Progress sampling interval, never shorter than one millisecond
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    fn validate(&self) -> Result<()> {
        if !matches!(self.container.as_str(), "mov" | "mp4" | "m4v" | "mkv") {
            return Err(ConfigError::InvalidValue {
                key: "export.container".to_string(),
                value: self.container.clone()
            }.into());
        }

        if self.crf > 51 {
            return Err(ConfigError::InvalidValue {
                key: "export.crf".to_string(),
                value: self.crf.to_string()
            }.into());
        }

        if self.progress_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "export.progress_interval_ms".to_string(),
                value: self.progress_interval_ms.to_string()
            }.into());
        }

        if self.video_codec.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "export.video_codec".to_string(),
                value: self.video_codec.clone()
            }.into());
        }

        Ok(())
    }
}

/// Pixel sampling used when mapping destination pixels back into the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

/// Frame rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Sampling filter for rotated or shifted pixels
    pub interpolation: Interpolation,

    /// Number of threads in the shared render pool
    pub render_threads: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::default(),
            render_threads: num_cpus::get(),
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> Result<()> {
        if self.render_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "render.render_threads".to_string(),
                value: self.render_threads.to_string()
            }.into());
        }

        Ok(())
    }
}
