mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;
mod temp;

pub use builder::{
    DITHER_MODE, build_encode_args, build_palette_args, encode_filter_complex, palette_filter,
};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error, tail_lines};
pub use runner::{FfmpegRun, ProgressCallback, run_ffmpeg_blocking};
pub use temp::{AttemptWorkspace, WORKDIR_PREFIX, cleanup_old_temp_dirs, move_file_replacing};

/// Progress payload for per-pass progress events.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegProgressPayload {
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
