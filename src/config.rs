//! Configuration types for compositing and export

use crate::error::{ComposeError, Result};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lossless output formats for the composed image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// TIFF with alpha channel transparency
    Tiff,
    /// Lossless WebP with alpha channel (requires `webp-support`)
    WebP,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Tiff => write!(f, "tiff"),
            Self::WebP => write!(f, "webp"),
        }
    }
}

/// Resampling filter used when moving between image and mask grids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleFilter {
    Nearest,
    /// Bilinear
    #[default]
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResampleFilter {
    #[must_use]
    pub fn to_filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Configuration for an edit session and its export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Output format of the composed image
    pub output_format: OutputFormat,

    /// Directory composed images are written to
    pub output_dir: PathBuf,

    /// File name prefix for allocated output paths
    pub file_prefix: String,

    /// Filter for the mask applicator's resampling steps
    pub mask_filter: ResampleFilter,

    /// Give up on segmentation after this many milliseconds (None = wait)
    pub segmentation_timeout_ms: Option<u64>,

    /// Initial foreground opacity (0.0-1.0)
    pub default_opacity: f32,

    /// Enable debug mode (additional logging)
    pub debug: bool,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::default(),
            output_dir: default_output_dir(),
            file_prefix: "IMG_".to_string(),
            mask_filter: ResampleFilter::default(),
            segmentation_timeout_ms: None,
            default_opacity: 1.0,
            debug: false,
        }
    }
}

/// `<pictures>/selfie-compose`, falling back to `./output`
#[must_use]
pub fn default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .map(|dir| dir.join("selfie-compose"))
        .unwrap_or_else(|| PathBuf::from("output"))
}

impl ComposeConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use selfie_compose::{ComposeConfig, OutputFormat};
    ///
    /// let config = ComposeConfig::builder()
    ///     .output_format(OutputFormat::Tiff)
    ///     .default_opacity(0.8)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.output_format, OutputFormat::Tiff);
    /// ```
    #[must_use]
    pub fn builder() -> ComposeConfigBuilder {
        ComposeConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Opacity outside 0.0-1.0
    /// - Empty file prefix
    /// - Zero segmentation timeout
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_opacity) {
            return Err(ComposeError::config_value_error(
                "default opacity",
                self.default_opacity,
                "0.0-1.0",
                Some(1.0),
            ));
        }

        if self.file_prefix.is_empty() || self.file_prefix.contains(|c: char| c == '/' || c == '\\') {
            return Err(ComposeError::invalid_config(format!(
                "file prefix '{}' must be a non-empty file name fragment",
                self.file_prefix
            )));
        }

        if self.segmentation_timeout_ms == Some(0) {
            return Err(ComposeError::config_value_error(
                "segmentation timeout (ms)",
                0,
                "1 or more",
                Some(10_000),
            ));
        }

        Ok(())
    }

    /// Segmentation timeout as a `Duration`
    #[must_use]
    pub fn segmentation_timeout(&self) -> Option<std::time::Duration> {
        self.segmentation_timeout_ms
            .map(std::time::Duration::from_millis)
    }

    /// Load and validate a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| ComposeError::file_io_error("read config file", path_ref, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ComposeError::invalid_config(format!(
                "Failed to parse '{}': {}",
                path_ref.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ComposeError::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path_ref, content)
            .map_err(|e| ComposeError::file_io_error("write config file", path_ref, &e))
    }
}

/// Builder for `ComposeConfig`
#[derive(Debug, Default)]
pub struct ComposeConfigBuilder {
    config: ComposeConfig,
}

impl ComposeConfigBuilder {
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    #[must_use]
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn file_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn mask_filter(mut self, filter: ResampleFilter) -> Self {
        self.config.mask_filter = filter;
        self
    }

    #[must_use]
    pub fn segmentation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.segmentation_timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn default_opacity(mut self, opacity: f32) -> Self {
        self.config.default_opacity = opacity;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ComposeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ComposeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.output_format, OutputFormat::Png);
        assert_eq!(config.file_prefix, "IMG_");
        assert_eq!(config.mask_filter, ResampleFilter::Triangle);
        assert!(config.segmentation_timeout().is_none());
    }

    #[test]
    fn test_builder_validation() {
        assert!(ComposeConfig::builder().default_opacity(1.2).build().is_err());
        assert!(ComposeConfig::builder().file_prefix("").build().is_err());
        assert!(ComposeConfig::builder().file_prefix("a/b").build().is_err());
        assert!(ComposeConfig::builder().segmentation_timeout_ms(0).build().is_err());

        let config = ComposeConfig::builder()
            .segmentation_timeout_ms(2500)
            .mask_filter(ResampleFilter::Nearest)
            .build()
            .unwrap();
        assert_eq!(
            config.segmentation_timeout(),
            Some(std::time::Duration::from_millis(2500))
        );
        assert_eq!(config.mask_filter.to_filter_type(), FilterType::Nearest);
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compose.json");
        let config = ComposeConfig::builder()
            .output_dir(dir.path())
            .output_format(OutputFormat::Tiff)
            .build()
            .unwrap();

        config.to_json_file(&path).unwrap();
        let loaded = ComposeConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ComposeConfig =
            serde_json::from_str(r#"{ "output_format": "webp", "mask_filter": "lanczos3" }"#)
                .unwrap();
        assert_eq!(config.output_format, OutputFormat::WebP);
        assert_eq!(config.mask_filter, ResampleFilter::Lanczos3);
        assert_eq!(config.file_prefix, "IMG_");
    }
}
