use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::thread::JoinHandle;

use tokio::task;
use tracing::{debug, info, warn};

use crate::composition::{CompositionPlan, TrackId};
use crate::config::{Config, ExportConfig, RenderConfig};
use crate::error::ExportError;
use crate::export::backend::{ExportBackend, ExportContext, ExportJob};
use crate::video::{Frame, FrameCompositor, RenderContext, SourceFrames};

/// Export backend that pipes raw frames through two `ffmpeg` processes.
///
/// The decoder writes un-rotated rgb24 frames of the rendered track to
/// stdout, each frame is composited in process, and the encoder reads the
/// result from stdin while stream-copying every audio track straight from
/// the source file.
pub struct FfmpegExportBackend {
    export: ExportConfig,
    render: RenderConfig,
}

impl FfmpegExportBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            export: config.export.clone(),
            render: config.render.clone(),
        }
    }

    /// Whether the configured ffmpeg executable can be run
    pub fn is_available(&self) -> bool {
        ffmpeg_available(&self.export.ffmpeg_path)
    }

    fn decoder_args(&self, plan: &CompositionPlan) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
            // Raw pixels; orientation is handled by the plan
            "-noautorotate".to_string(),
            "-i".to_string(),
            plan.source().display().to_string(),
            "-map".to_string(),
            format!("0:{}", plan.video_source_index),
            "-r".to_string(),
            plan.frame_rate.to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-".to_string(),
        ]
    }

    fn encoder_args(&self, plan: &CompositionPlan, output: &Path) -> Vec<String> {
        let (width, height) = plan.render_size();
        let mut args: Vec<String> = vec![
            "-v".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            plan.frame_rate.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-i".to_string(),
            plan.source().display().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
        ];

        for index in &plan.audio_source_indices {
            args.push("-map".to_string());
            args.push(format!("1:{}", index));
        }

        args.extend([
            "-c:v".to_string(),
            self.export.video_codec.clone(),
            "-preset".to_string(),
            self.export.encoder_preset.clone(),
            "-crf".to_string(),
            self.export.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);

        if !plan.audio_source_indices.is_empty() {
            args.push("-c:a".to_string());
            args.push("copy".to_string());
        }

        if matches!(self.export.container.as_str(), "mov" | "mp4" | "m4v") {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }

        args.push("-y".to_string());
        args.push(output.display().to_string());
        args
    }
}

#[async_trait::async_trait]
impl ExportBackend for FfmpegExportBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn export(&self, job: ExportJob, context: ExportContext) -> Result<(), ExportError> {
        let ffmpeg = self.export.ffmpeg_path.clone();

        let probe = ffmpeg.clone();
        let available = task::spawn_blocking(move || ffmpeg_available(&probe))
            .await
            .map_err(|e| ExportError::Join { reason: e.to_string() })?;
        if !available {
            return Err(ExportError::Unavailable {
                backend: ffmpeg.display().to_string(),
            });
        }

        let pipeline = Pipeline {
            ffmpeg,
            decoder_args: self.decoder_args(&job.plan),
            encoder_args: self.encoder_args(&job.plan, &job.output_path),
            render: self.render.clone(),
        };

        info!(
            "Exporting {:?} -> {:?} ({}x{}, {} frames)",
            job.plan.source(),
            job.output_path,
            job.plan.render_size().0,
            job.plan.render_size().1,
            job.plan.total_frames()
        );

        task::spawn_blocking(move || pipeline.run(&job.plan, &context))
            .await
            .map_err(|e| ExportError::Join { reason: e.to_string() })?
    }
}

/// Everything the blocking frame pump needs
struct Pipeline {
    ffmpeg: PathBuf,
    decoder_args: Vec<String>,
    encoder_args: Vec<String>,
    render: RenderConfig,
}

impl Pipeline {
    fn run(self, plan: &CompositionPlan, context: &ExportContext) -> Result<(), ExportError> {
        context.check_cancelled()?;

        let compositor = FrameCompositor::new(plan, RenderContext::new(&self.render)?)?;
        context.progress.set_total(plan.total_frames());

        let mut decoder =
            FfmpegProcess::spawn(&self.ffmpeg, "decoder", &self.decoder_args, Stdio::null(), Stdio::piped())?;
        let mut encoder =
            FfmpegProcess::spawn(&self.ffmpeg, "encoder", &self.encoder_args, Stdio::piped(), Stdio::null())?;

        let mut frames = decoder.child.stdout.take().ok_or_else(|| ExportError::Spawn {
            program: decoder.program(),
            reason: "stdout was not captured".to_string(),
        })?;
        let mut sink = encoder.child.stdin.take().ok_or_else(|| ExportError::Spawn {
            program: encoder.program(),
            reason: "stdin was not captured".to_string(),
        })?;

        let pumped = pump_frames(&mut frames, &mut sink, &compositor, plan.primary_video_track(), context);

        match pumped {
            Ok(count) => {
                // Closing stdin lets the encoder finalize the container
                drop(sink);
                drop(frames);
                decoder.finish()?;
                encoder.finish()?;

                if count == 0 {
                    return Err(ExportError::FrameProcessing {
                        reason: "decoder produced no frames".to_string(),
                    });
                }

                debug!("Encoded {} frames", count);
                Ok(())
            }
            Err(ExportError::Io(e)) if e.kind() == ErrorKind::BrokenPipe => {
                // The encoder went away; its own error is the useful one
                decoder.kill();
                drop(sink);
                encoder.finish()?;
                Err(ExportError::Io(e))
            }
            Err(e) => {
                decoder.kill();
                encoder.kill();
                if matches!(e, ExportError::Cancelled) {
                    info!("Export cancelled after {} frames", context.progress.frames_done());
                }
                Err(e)
            }
        }
    }
}

/// Decode, composite and encode until the decoder runs dry.
///
/// Returns the number of frames written. The cancel flag is checked before
/// every frame.
fn pump_frames<R: Read, W: Write>(
    frames: &mut R,
    sink: &mut W,
    compositor: &FrameCompositor,
    track: TrackId,
    context: &ExportContext,
) -> Result<u64, ExportError> {
    let (source_width, source_height) = compositor.source_size();
    let mut source = Frame::new_black(source_width, source_height);
    let mut destination = compositor.new_destination();
    let mut count = 0u64;

    loop {
        context.check_cancelled()?;

        if !read_frame(frames, source.as_rgb_bytes_mut())? {
            break;
        }

        compositor.render(&SourceFrames::single(track, &source), &mut destination)?;
        sink.write_all(destination.as_rgb_bytes())?;

        context.progress.advance();
        count += 1;
    }

    sink.flush()?;
    Ok(count)
}

/// Fill `buffer` with one frame. `Ok(false)` on a clean end of stream.
fn read_frame<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    match filled {
        0 => Ok(false),
        n if n == buffer.len() => Ok(true),
        n => Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("truncated frame: {} of {} bytes", n, buffer.len()),
        )),
    }
}

fn ffmpeg_available(ffmpeg: &Path) -> bool {
    Command::new(ffmpeg)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// A running ffmpeg child whose stderr is drained on a helper thread.
///
/// Dropping it kills and reaps the process if it is still running.
struct FfmpegProcess {
    role: &'static str,
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegProcess {
    fn spawn(
        ffmpeg: &Path,
        role: &'static str,
        args: &[String],
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<Self, ExportError> {
        debug!("Spawning ffmpeg {}: {}", role, args.join(" "));

        let mut child = Command::new(ffmpeg)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::Spawn {
                program: format!("{} ({})", ffmpeg.display(), role),
                reason: e.to_string(),
            })?;

        let stderr = child.stderr.take().map(drain_stderr);
        Ok(Self { role, child, stderr })
    }

    fn program(&self) -> String {
        format!("ffmpeg {}", self.role)
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }

    /// Wait for a clean exit
    fn finish(mut self) -> Result<(), ExportError> {
        let status = self.child.wait()?;
        let stderr = self.collect_stderr();

        if status.success() {
            if !stderr.trim().is_empty() {
                warn!("{}: {}", self.program(), stderr.trim());
            }
            return Ok(());
        }

        Err(ExportError::Process {
            program: self.program(),
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }

    fn kill(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        self.collect_stderr();
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut output = String::new();
        match stderr.read_to_string(&mut output) {
            Ok(_) => output,
            Err(e) => format!("<failed to read ffmpeg stderr: {}>", e),
        }
    })
}
