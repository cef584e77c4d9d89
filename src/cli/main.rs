//! Selfie compositing CLI
//!
//! Runs one edit session on a photo: optional segmentation, optional
//! background, replayed gestures, then export.

use super::config::{parse_factor, parse_point, parse_size, CliConfigBuilder, CliGesture};
use crate::{
    background::{BackgroundPicker, DirectoryBackgroundSource},
    config::ComposeConfig,
    segmentation::{MaskFileSegmenter, SegmentationBackend, SegmentationState},
    services::{ImageCollection, ImageIOService},
    session::EditSession,
    tracing_config::{events, init_cli_tracing, spans, TracingFormat, TracingOutput},
};
use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, Instrument};

/// Cut a person out of a photo and place them over a new background
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "selfie-compose")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input photo
    #[arg(value_name = "INPUT", required_unless_present_any = &["list_backgrounds", "list_collection", "clear_collection"])]
    pub input: Option<PathBuf>,

    /// Segmentation mask image (grayscale, any size)
    #[arg(long, value_name = "MASK")]
    pub mask: Option<PathBuf>,

    /// ONNX segmentation model producing a (1, 1, H, W) confidence map
    #[cfg(feature = "tract")]
    #[arg(long, value_name = "MODEL", conflicts_with = "mask")]
    pub model: Option<PathBuf>,

    /// Model input size [default: 320x320]
    #[cfg(feature = "tract")]
    #[arg(long, value_name = "WxH", value_parser = parse_size, requires = "model")]
    pub model_input: Option<(u32, u32)>,

    /// Background image
    #[arg(long, value_name = "BG", conflicts_with = "background_dir")]
    pub background: Option<PathBuf>,

    /// Directory of backgrounds to pick from
    #[arg(long, value_name = "DIR")]
    pub background_dir: Option<PathBuf>,

    /// Entry of --background-dir to use (see --list-backgrounds)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub background_index: usize,

    /// Only consider backgrounds matching this pattern (e.g., "*.jpg")
    #[arg(long, value_name = "GLOB")]
    pub background_pattern: Option<String>,

    /// Pinch the foreground by this factor (repeatable)
    #[arg(long, value_name = "F", value_parser = parse_factor, action = clap::ArgAction::Append)]
    pub scale: Vec<f64>,

    /// Focus point of the matching --scale [default: canvas centre]
    #[arg(long, value_name = "X,Y", value_parser = parse_point, action = clap::ArgAction::Append)]
    pub focus: Vec<(f64, f64)>,

    /// Drag the foreground by this offset (repeatable)
    #[arg(long, value_name = "DX,DY", value_parser = parse_point, allow_hyphen_values = true, action = clap::ArgAction::Append)]
    pub translate: Vec<(f64, f64)>,

    /// Canvas size when no background is set [default: input size]
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub viewport: Option<(u32, u32)>,

    /// Foreground opacity (0.0-1.0)
    #[arg(long, value_name = "A")]
    pub opacity: Option<f32>,

    /// Output file
    #[arg(short, long, value_name = "PATH", conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Directory for timestamped output files
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format [default: from --output extension, else config]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// Resampling filter for the mask
    #[arg(long, value_enum)]
    pub mask_filter: Option<CliResampleFilter>,

    /// Give up on segmentation after this many milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Also write logs to FILE
    #[cfg(feature = "tracing-files")]
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Write logs only to --log-file
    #[cfg(feature = "tracing-files")]
    #[arg(long, requires = "log_file")]
    pub log_file_only: bool,

    /// List the backgrounds in DIR and exit
    #[arg(long, value_name = "DIR")]
    pub list_backgrounds: Option<PathBuf>,

    /// List previously saved compositions and exit
    #[arg(long)]
    pub list_collection: bool,

    /// Delete previously saved compositions and exit
    #[arg(long)]
    pub clear_collection: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Tiff,
    Webp,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    /// Needs the `tracing-json` feature
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliResampleFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

pub async fn main() -> Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).context("Failed to read arguments")?;
    let gestures = CliConfigBuilder::gesture_plan(&cli, &matches);

    let (log_format, log_output) = tracing_setup(&cli)?;
    let _tracing_guard = init_cli_tracing(cli.verbose, log_format, log_output)
        .context("Failed to initialize tracing")?;

    // Handle special flags that don't require an input
    if let Some(dir) = &cli.list_backgrounds {
        return list_backgrounds(dir, cli.background_pattern.as_deref());
    }

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.list_collection {
        return list_collection(&config);
    }

    if cli.clear_collection {
        return clear_collection(&config);
    }

    let input = cli
        .input
        .as_deref()
        .context("An input photo is required")?;

    let backend = create_backend(&cli)?;
    let backend_name = backend.as_ref().map_or("none", |b| b.name()).to_string();
    let span = spans::session(input, &backend_name);

    let start_time = Instant::now();
    let path = match run_session(&cli, config, input, backend, &gestures)
        .instrument(span)
        .await
    {
        Ok(path) => path,
        Err(error) => {
            events::error_with_context(&*error, "edit session");
            return Err(error);
        },
    };

    info!(
        "Composed {} in {:.2}s",
        path.display(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Subscriber format and destination from the logging flags
fn tracing_setup(cli: &Cli) -> Result<(TracingFormat, TracingOutput)> {
    let format = match cli.log_format {
        CliLogFormat::Console => TracingFormat::Console,
        CliLogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        CliLogFormat::Json => TracingFormat::Json,
        #[cfg(not(feature = "tracing-json"))]
        CliLogFormat::Json => {
            anyhow::bail!("--log-format json needs a build with the tracing-json feature")
        },
    };

    #[cfg(feature = "tracing-files")]
    let output = match &cli.log_file {
        Some(path) if cli.log_file_only => TracingOutput::File(path.clone()),
        Some(path) => TracingOutput::Both(path.clone()),
        None => TracingOutput::Console,
    };
    #[cfg(not(feature = "tracing-files"))]
    let output = TracingOutput::Console;

    Ok((format, output))
}

fn create_backend(cli: &Cli) -> Result<Option<Arc<dyn SegmentationBackend>>> {
    if let Some(mask) = &cli.mask {
        return Ok(Some(Arc::new(MaskFileSegmenter::new(mask))));
    }

    #[cfg(feature = "tract")]
    if let Some(model) = &cli.model {
        use crate::segmentation::{PreprocessingConfig, TensorSegmenter, TractBackend};

        let mut backend = TractBackend::new(model);
        if let Some((width, height)) = cli.model_input {
            backend = backend.with_preprocessing(PreprocessingConfig {
                target_size: [width, height],
                ..PreprocessingConfig::default()
            });
        }
        return Ok(Some(Arc::new(
            TensorSegmenter::new(backend).with_name("tract"),
        )));
    }

    Ok(None)
}

async fn run_session(
    cli: &Cli,
    config: ComposeConfig,
    input: &Path,
    backend: Option<Arc<dyn SegmentationBackend>>,
    gestures: &[CliGesture],
) -> Result<PathBuf> {
    let mut session = EditSession::from_path(input, config)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    events::progress(
        &format!(
            "Loaded {} ({}x{})",
            input.display(),
            session.original().width(),
            session.original().height()
        ),
        "📷",
    );

    match backend {
        Some(backend) => segment(&mut session, backend).await?,
        None => events::warning_with_recommendation(
            "No segmentation source given; the original photo is used as foreground",
            "pass --mask MASK.png to cut out the subject",
        ),
    }

    attach_background(cli, &mut session).await?;

    if let Some(opacity) = cli.opacity {
        session.set_opacity(opacity)?;
    }

    let viewport = cli.viewport.unwrap_or_else(|| session.original().dimensions());
    replay_gestures(&mut session, gestures, viewport);

    let mut result = session.compose(viewport).context("Composition failed")?;

    let path = match &cli.output {
        Some(path) => {
            let format = session.config().output_format;
            let _span = spans::export(path, &format.to_string()).entered();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create output directory {}", parent.display())
                })?;
            }
            result
                .save(path, format)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            path.clone()
        },
        None => session
            .write_result(&mut result)
            .context("Failed to write composition")?,
    };

    events::timings(&result.metadata.timings.summary());
    println!("✅ Saved {}", path.display());
    println!(
        "   Canvas: {}x{} | Background: {} | Segmented: {}",
        result.metadata.canvas.0,
        result.metadata.canvas.1,
        if result.metadata.has_background { "yes" } else { "no" },
        if result.metadata.segmented { "yes" } else { "no" },
    );
    println!("   {}", result.metadata.timings.summary());

    session.close();
    Ok(path)
}

async fn segment(session: &mut EditSession, backend: Arc<dyn SegmentationBackend>) -> Result<()> {
    let name = backend.name().to_string();
    session
        .request_segmentation(backend)
        .context("Failed to start segmentation")?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Segmenting with {}...", name));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let state = session
        .wait_for_segmentation()
        .instrument(spans::segmentation_wait(&name))
        .await;

    match state {
        SegmentationState::Succeeded => {
            let ratio = session
                .mask_statistics()
                .map_or(0.0, |stats| stats.foreground_ratio * 100.0);
            spinner.finish_with_message(format!("✂️  Foreground cut out ({:.1}% of the photo)", ratio));
        },
        _ => {
            spinner.finish_with_message("⚠️  Segmentation failed; using the original photo");
            warn!("Segmentation did not succeed, composing the original photo");
        },
    }
    Ok(())
}

async fn attach_background(cli: &Cli, session: &mut EditSession) -> Result<()> {
    if let Some(path) = &cli.background {
        let image = ImageIOService::load_image_async(path)
            .await
            .with_context(|| format!("Failed to load background {}", path.display()))?;
        session.set_background(image)?;
        info!("🖼️  Background: {}", path.display());
        return Ok(());
    }

    let Some(dir) = &cli.background_dir else {
        return Ok(());
    };

    let source = directory_source(dir, cli.background_pattern.as_deref())?;
    let mut picker = BackgroundPicker::new(Arc::new(source))
        .with_context(|| format!("Failed to list backgrounds in {}", dir.display()))?;
    if picker.is_empty() {
        anyhow::bail!("No backgrounds found in {}", dir.display());
    }

    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    picker.set_on_select(move |image| {
        let _ = sender.send(image);
    });

    picker
        .select(cli.background_index)
        .await
        .with_context(|| format!("Failed to select background #{}", cli.background_index))?;

    if let Ok(image) = receiver.try_recv() {
        session.set_background(image)?;
        if let Some(entry) = picker.entries().get(cli.background_index) {
            info!("🖼️  Background: {} ({})", entry.label, entry.id);
        }
    }
    Ok(())
}

fn replay_gestures(session: &mut EditSession, gestures: &[CliGesture], viewport: (u32, u32)) {
    if gestures.is_empty() {
        return;
    }
    let _span = spans::gesture_replay(gestures.len()).entered();

    let canvas = session
        .background()
        .map_or(viewport, |background| background.dimensions());
    let centre = (f64::from(canvas.0) / 2.0, f64::from(canvas.1) / 2.0);

    let sender = session.gesture_sender();
    for gesture in gestures {
        let queued = match *gesture {
            CliGesture::Scale { factor, focus } => {
                let (x, y) = focus.unwrap_or(centre);
                sender.pinch(factor, x, y)
            },
            CliGesture::Translate { dx, dy } => sender.drag((0.0, 0.0), (dx, dy)),
        };
        if !queued {
            warn!("Gesture queue closed, remaining gestures skipped");
            break;
        }
    }

    let summary = session.poll();
    debug!(
        events = summary.gestures_applied,
        transform = ?session.transform(),
        "gestures replayed"
    );
}

fn directory_source(dir: &Path, pattern: Option<&str>) -> Result<DirectoryBackgroundSource> {
    match pattern {
        Some(pattern) => DirectoryBackgroundSource::with_pattern(dir, pattern)
            .with_context(|| format!("Invalid background pattern '{}'", pattern)),
        None => Ok(DirectoryBackgroundSource::new(dir)),
    }
}

/// List backgrounds in a directory with their picker indices
fn list_backgrounds(dir: &Path, pattern: Option<&str>) -> Result<()> {
    let picker = BackgroundPicker::new(Arc::new(directory_source(dir, pattern)?))
        .with_context(|| format!("Failed to list backgrounds in {}", dir.display()))?;

    println!("🖼️  Backgrounds in {}", dir.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if picker.is_empty() {
        println!("No backgrounds found.");
        return Ok(());
    }

    for (index, entry) in picker.entries().iter().enumerate() {
        println!("  [{}] {}", index, entry.label);
        println!("      └─ {}", entry.id);
    }

    println!("\n💡 To use a background:");
    println!(
        "  selfie-compose INPUT --background-dir {} --background-index N",
        dir.display()
    );
    Ok(())
}

/// List saved compositions, newest first
fn list_collection(config: &ComposeConfig) -> Result<()> {
    let collection = ImageCollection::new(&config.output_dir);
    let entries = collection.list();

    println!("📁 Saved compositions in {}", collection.directory().display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if entries.is_empty() {
        println!("No saved compositions found.");
        return Ok(());
    }

    for entry in &entries {
        let modified: chrono::DateTime<chrono::Local> = entry.modified.into();
        println!(
            "  {} ({}, {})",
            entry.path.file_name().map_or_else(
                || entry.path.display().to_string(),
                |name| name.to_string_lossy().into_owned()
            ),
            format_size(entry.size_bytes),
            modified.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!(
        "\n{} file(s), {} total",
        entries.len(),
        format_size(collection.total_size())
    );
    Ok(())
}

fn clear_collection(config: &ComposeConfig) -> Result<()> {
    let collection = ImageCollection::new(&config.output_dir);
    println!("🗑️  Clearing {}...", collection.directory().display());

    let removed = collection
        .clear()
        .context("Failed to clear saved compositions")?;
    if removed == 0 {
        println!("💡 Collection was already empty");
    } else {
        println!("✅ Removed {} composition(s)", removed);
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    let bytes_f = bytes as f64;
    if bytes_f >= MB {
        format!("{:.2} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.1} KB", bytes_f / KB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::OutputFormatHandler;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_special_flags_need_no_input() {
        let cli = Cli::try_parse_from(["selfie-compose", "--list-collection"]).unwrap();
        assert!(cli.list_collection);
        assert!(cli.input.is_none());

        assert!(Cli::try_parse_from(["selfie-compose"]).is_err());
    }

    #[test]
    fn test_negative_translation_parses() {
        let cli =
            Cli::try_parse_from(["selfie-compose", "in.jpg", "--translate", "-20,-5"]).unwrap();
        assert_eq!(cli.translate, vec![(-20.0, -5.0)]);
    }

    #[test]
    fn test_default_logging_is_console() {
        let cli = Cli::try_parse_from(["selfie-compose", "in.jpg"]).unwrap();
        assert_eq!(cli.log_format, CliLogFormat::Console);

        let (format, output) = tracing_setup(&cli).unwrap();
        assert_eq!(format, TracingFormat::Console);
        assert_eq!(output, TracingOutput::Console);
    }

    #[test]
    fn test_compact_log_format() {
        let cli =
            Cli::try_parse_from(["selfie-compose", "in.jpg", "--log-format", "compact"]).unwrap();
        let (format, _) = tracing_setup(&cli).unwrap();
        assert_eq!(format, TracingFormat::Compact);
    }

    #[cfg(feature = "tracing-json")]
    #[test]
    fn test_json_log_format() {
        let cli =
            Cli::try_parse_from(["selfie-compose", "in.jpg", "--log-format", "json"]).unwrap();
        let (format, _) = tracing_setup(&cli).unwrap();
        assert_eq!(format, TracingFormat::Json);
    }

    #[cfg(not(feature = "tracing-json"))]
    #[test]
    fn test_json_log_format_needs_feature() {
        let cli =
            Cli::try_parse_from(["selfie-compose", "in.jpg", "--log-format", "json"]).unwrap();
        let error = tracing_setup(&cli).unwrap_err();
        assert!(error.to_string().contains("tracing-json"));
    }

    #[cfg(feature = "tracing-files")]
    #[test]
    fn test_log_file_destinations() {
        let cli =
            Cli::try_parse_from(["selfie-compose", "in.jpg", "--log-file", "run.log"]).unwrap();
        let (_, output) = tracing_setup(&cli).unwrap();
        assert_eq!(output, TracingOutput::Both(PathBuf::from("run.log")));

        let cli = Cli::try_parse_from([
            "selfie-compose",
            "in.jpg",
            "--log-file",
            "run.log",
            "--log-file-only",
        ])
        .unwrap();
        let (_, output) = tracing_setup(&cli).unwrap();
        assert_eq!(output, TracingOutput::File(PathBuf::from("run.log")));

        assert!(Cli::try_parse_from(["selfie-compose", "in.jpg", "--log-file-only"]).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_output_format_extension_known() {
        for format in [CliOutputFormat::Png, CliOutputFormat::Tiff, CliOutputFormat::Webp] {
            let ext = OutputFormatHandler::get_extension(format.into());
            assert!(!ext.is_empty());
        }
    }
}
