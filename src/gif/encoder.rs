//! Capability seams between the retry logic and the external tools.
//!
//! [`FfmpegToolchain`] is the production implementation; tests script a fake
//! (see `test_support`) so the controller can be exercised without spawning anything.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;
use crate::ffmpeg::discovery::{get_ffmpeg_path, get_ffprobe_path};
use crate::ffmpeg::ffprobe::{SourceProbe, probe_source};
use crate::ffmpeg::{
    FfmpegRun, build_encode_args, build_palette_args, path_to_string, run_ffmpeg_blocking,
};
use crate::gif::EncodeConfig;
use crate::log_sink::LogSink;

/// Palette derivation pass: sample the source and write a reduced color table image.
pub struct PaletteRequest<'a> {
    pub source: &'a Path,
    pub palette_path: &'a Path,
    pub config: &'a EncodeConfig,
    /// Probed duration, for progress reporting only.
    pub duration_secs: Option<f64>,
    pub timeout: Option<Duration>,
}

/// Quantized encode pass: re-render the source against a derived palette.
pub struct EncodeRequest<'a> {
    pub source: &'a Path,
    pub palette_path: &'a Path,
    pub output_path: &'a Path,
    pub config: &'a EncodeConfig,
    pub duration_secs: Option<f64>,
    pub timeout: Option<Duration>,
}

pub trait Encoder {
    /// Fail fast, before any attempt, when the encoder cannot run at all.
    fn ensure_available(&self) -> Result<(), AppError>;

    /// Returns the tool's captured diagnostics on a clean exit.
    fn generate_palette(
        &self,
        request: &PaletteRequest<'_>,
        sink: &LogSink,
    ) -> Result<String, AppError>;

    /// Returns the tool's captured diagnostics on a clean exit.
    fn apply_palette(
        &self,
        request: &EncodeRequest<'_>,
        sink: &LogSink,
    ) -> Result<String, AppError>;
}

pub trait Prober {
    /// Best effort; never fails.
    fn probe(&self, source: &Path) -> SourceProbe;
}

/// ffmpeg + ffprobe resolved once and invoked as black boxes.
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    ffmpeg: Result<PathBuf, String>,
    ffprobe: Option<PathBuf>,
}

impl FfmpegToolchain {
    /// Resolve through `FFMPEG_PATH`, common install paths and PATH.
    /// A missing ffmpeg is reported later by `ensure_available`; a missing ffprobe only disables probing.
    pub fn discover() -> Self {
        let ffmpeg = get_ffmpeg_path()
            .map(Path::to_path_buf)
            .map_err(|e| e.to_string());
        let ffprobe = match &ffmpeg {
            Ok(_) => get_ffprobe_path().ok(),
            Err(_) => None,
        };
        if ffmpeg.is_ok() && ffprobe.is_none() {
            log::warn!(
                target: "tiny_gif::gif::encoder",
                "ffprobe not found; parameters will be predicted without source metadata"
            );
        }
        Self { ffmpeg, ffprobe }
    }

    pub fn with_paths(ffmpeg: impl Into<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        Self {
            ffmpeg: Ok(ffmpeg.into()),
            ffprobe,
        }
    }

    fn ffmpeg_path(&self) -> Result<&Path, AppError> {
        self.ffmpeg
            .as_deref()
            .map_err(|msg| AppError::FfmpegNotFound(msg.clone()))
    }
}

impl Encoder for FfmpegToolchain {
    fn ensure_available(&self) -> Result<(), AppError> {
        let path = self.ffmpeg_path()?;
        if !path.exists() {
            return Err(AppError::FfmpegNotFound(format!(
                "FFmpeg is not available at {}",
                path.display()
            )));
        }
        Ok(())
    }

    fn generate_palette(
        &self,
        request: &PaletteRequest<'_>,
        sink: &LogSink,
    ) -> Result<String, AppError> {
        let args = build_palette_args(
            &path_to_string(request.source),
            &path_to_string(request.palette_path),
            request.config,
        );
        let mut run = FfmpegRun::new(args);
        run.duration_secs = request.duration_secs;
        run.duration_limit = request.config.palette_sample_seconds();
        run.progress_callback = sink.step_callback("palette");
        run.timeout = request.timeout;
        run_ffmpeg_blocking(self.ffmpeg_path()?, run)
    }

    fn apply_palette(
        &self,
        request: &EncodeRequest<'_>,
        sink: &LogSink,
    ) -> Result<String, AppError> {
        let args = build_encode_args(
            &path_to_string(request.source),
            &path_to_string(request.palette_path),
            &path_to_string(request.output_path),
            request.config,
        );
        let mut run = FfmpegRun::new(args);
        run.duration_secs = request.duration_secs;
        run.progress_callback = sink.step_callback("encode");
        run.timeout = request.timeout;
        run_ffmpeg_blocking(self.ffmpeg_path()?, run)
    }
}

impl Prober for FfmpegToolchain {
    fn probe(&self, source: &Path) -> SourceProbe {
        match &self.ffprobe {
            Some(ffprobe) => probe_source(ffprobe, source),
            None => SourceProbe::default(),
        }
    }
}
