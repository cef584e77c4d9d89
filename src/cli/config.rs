//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliOutputFormat, CliResampleFilter};
use crate::{
    config::{ComposeConfig, OutputFormat, ResampleFilter},
    services::OutputFormatHandler,
};
use anyhow::{Context, Result};
use clap::ArgMatches;

/// One gesture from the command line, in the order given
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CliGesture {
    /// Pinch by `factor`; `focus` defaults to the canvas centre
    Scale {
        factor: f64,
        focus: Option<(f64, f64)>,
    },
    /// Drag by `(dx, dy)`
    Translate { dx: f64, dy: f64 },
}

/// Convert CLI arguments to a `ComposeConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the configuration: JSON file (if any), then CLI overrides
    pub(crate) fn from_cli(cli: &Cli) -> Result<ComposeConfig> {
        let mut config = match &cli.config {
            Some(path) => ComposeConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => ComposeConfig::default(),
        };

        if let Some(format) = Self::output_format(cli) {
            config.output_format = format;
        }
        if let Some(dir) = &cli.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(filter) = cli.mask_filter {
            config.mask_filter = filter.into();
        }
        if let Some(timeout_ms) = cli.timeout_ms {
            config.segmentation_timeout_ms = Some(timeout_ms);
        }
        if let Some(opacity) = cli.opacity {
            config.default_opacity = opacity;
        }
        config.debug = config.debug || cli.verbose >= 2;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// `--format`, else the extension of `--output`
    pub(crate) fn output_format(cli: &Cli) -> Option<OutputFormat> {
        cli.format.map(OutputFormat::from).or_else(|| {
            cli.output
                .as_ref()
                .and_then(|path| path.extension())
                .and_then(|ext| ext.to_str())
                .and_then(OutputFormatHandler::from_extension)
        })
    }

    /// Restore the command-line order of `--scale` and `--translate`
    ///
    /// The n-th `--focus` belongs to the n-th `--scale`.
    pub(crate) fn gesture_plan(cli: &Cli, matches: &ArgMatches) -> Vec<CliGesture> {
        let indices = |id: &str| -> Vec<usize> {
            matches
                .indices_of(id)
                .map(Iterator::collect)
                .unwrap_or_default()
        };

        let mut plan: Vec<(usize, CliGesture)> = Vec::new();
        for (n, (index, factor)) in indices("scale").into_iter().zip(&cli.scale).enumerate() {
            plan.push((
                index,
                CliGesture::Scale {
                    factor: *factor,
                    focus: cli.focus.get(n).copied(),
                },
            ));
        }
        for (index, (dx, dy)) in indices("translate").into_iter().zip(&cli.translate) {
            plan.push((index, CliGesture::Translate { dx: *dx, dy: *dy }));
        }

        plan.sort_by_key(|(index, _)| *index);
        plan.into_iter().map(|(_, gesture)| gesture).collect()
    }
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => Self::Png,
            CliOutputFormat::Tiff => Self::Tiff,
            CliOutputFormat::Webp => Self::WebP,
        }
    }
}

impl From<CliResampleFilter> for ResampleFilter {
    fn from(filter: CliResampleFilter) -> Self {
        match filter {
            CliResampleFilter::Nearest => Self::Nearest,
            CliResampleFilter::Triangle => Self::Triangle,
            CliResampleFilter::CatmullRom => Self::CatmullRom,
            CliResampleFilter::Lanczos3 => Self::Lanczos3,
        }
    }
}

/// Parse `X,Y`
pub(crate) fn parse_point(value: &str) -> std::result::Result<(f64, f64), String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{}'", value))?;
    let x = x.trim().parse::<f64>().map_err(|e| format!("invalid X '{}': {}", x, e))?;
    let y = y.trim().parse::<f64>().map_err(|e| format!("invalid Y '{}': {}", y, e))?;
    if !x.is_finite() || !y.is_finite() {
        return Err(format!("coordinates must be finite, got '{}'", value));
    }
    Ok((x, y))
}

/// Parse `WxH` with non-zero sides
pub(crate) fn parse_size(value: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH but got '{}'", value))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("invalid width '{}': {}", w, e))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("invalid height '{}': {}", h, e))?;
    if w == 0 || h == 0 {
        return Err(format!("size must be non-zero, got '{}'", value));
    }
    Ok((w, h))
}

/// Parse a positive, finite scale factor
pub(crate) fn parse_factor(value: &str) -> std::result::Result<f64, String> {
    let factor = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid scale factor '{}': {}", value, e))?;
    if factor.is_finite() && factor > 0.0 {
        Ok(factor)
    } else {
        Err(format!("scale factor must be positive, got '{}'", value))
    }
}
