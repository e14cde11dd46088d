use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use video_cropper::{
    composition::CropJob,
    config::Config,
    export::ExportCoordinator,
    geometry::Rect,
    CropError,
};

#[derive(Parser)]
#[command(
    name = "video-cropper",
    version,
    about = "Crop and rotate a video file, keeping its audio",
    long_about = "Video Cropper renders a new video containing only the selected region of the source, optionally rotated clockwise first. All audio tracks are copied unchanged and the duration is preserved."
)]
struct Cli {
    /// Source video file
    #[arg(short, long)]
    input: PathBuf,

    /// Crop rectangle as x,y,width,height in displayed pixels (top-left origin)
    #[arg(long, allow_hyphen_values = true)]
    crop: Rect,

    /// Clockwise rotation in degrees, applied before cropping
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    angle: f64,

    /// Where to move the finished file (defaults to the generated temp path)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .init();

    info!("Starting Video Cropper v{}", env!("CARGO_PKG_VERSION"));
    info!("Input: {:?}", cli.input);
    info!("Crop: {}", cli.crop);
    info!("Angle: {}°", cli.angle);

    let config = match cli.config {
        Some(ref config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };

    let coordinator = Arc::new(ExportCoordinator::with_ffmpeg(config));

    let canceller = Arc::clone(&coordinator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling export...");
            canceller.cancel().await;
        }
    });

    let job = CropJob::new(&cli.input, cli.crop, cli.angle.to_radians());
    let mut last_percent = None;
    let result = coordinator
        .crop(job, |progress| {
            let percent = (progress * 100.0).floor() as u32;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                info!("Progress: {}%", percent);
            }
        })
        .await;

    let temp_output = match result {
        Ok(path) => path,
        Err(CropError::Cancelled) => {
            warn!("Crop cancelled, no output written");
            std::process::exit(130);
        }
        Err(error) => {
            let message = error.user_message();
            return Err(anyhow::Error::new(error).context(message));
        }
    };

    let final_output = match cli.output {
        Some(ref output) => {
            move_file(&temp_output, output)
                .await
                .with_context(|| format!("Failed to move output to {}", output.display()))?;
            output.clone()
        }
        None => temp_output,
    };

    info!("Crop complete! Output saved to: {:?}", final_output);
    Ok(())
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}
