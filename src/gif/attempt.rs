//! One palette + encode attempt for a single configuration.
//!
//! Both passes run inside a private working directory that is removed when the
//! attempt ends, whatever the outcome. The encoded artifact is measured there and
//! only then promoted to the destination, so a failed attempt never touches it.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;
use crate::ffmpeg::{AttemptWorkspace, move_file_replacing, tail_lines};
use crate::gif::EncodeConfig;
use crate::gif::encoder::{EncodeRequest, Encoder, PaletteRequest};
use crate::log_sink::LogSink;

/// Lines of tool output kept in an attempt's error message.
const ERROR_TAIL_LINES: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub config: EncodeConfig,
    pub succeeded: bool,
    /// Measured size of this attempt's artifact; only set when `succeeded`.
    pub output_size_bytes: Option<u64>,
    pub error_message: Option<String>,
    /// Whether the artifact replaced the destination (false when an earlier one was smaller).
    pub kept: bool,
}

impl AttemptResult {
    fn failed(config: EncodeConfig, message: String) -> Self {
        Self {
            config,
            succeeded: false,
            output_size_bytes: None,
            error_message: Some(message),
            kept: false,
        }
    }
}

/// Per-attempt settings that do not vary with the configuration.
#[derive(Debug, Clone, Default)]
pub struct AttemptContext<'a> {
    /// Parent for the working directory; OS temp dir when None.
    pub temp_root: Option<&'a Path>,
    pub duration_secs: Option<f64>,
    pub timeout: Option<Duration>,
    /// Smallest artifact already at the destination; a result this size or larger is discarded.
    pub smallest_kept_bytes: Option<u64>,
}

fn describe(err: &AppError) -> String {
    match err {
        AppError::FfmpegFailed { stderr, .. } if !stderr.trim().is_empty() => {
            tail_lines(stderr, ERROR_TAIL_LINES)
        }
        other => other.to_string(),
    }
}

fn output_extension(destination: &Path) -> String {
    destination
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("gif")
        .to_lowercase()
}

/// Run both passes for `config` and report what happened. Never returns an error:
/// every failure becomes `succeeded = false` with a message built from the tool output.
pub fn run_attempt<E: Encoder + ?Sized>(
    encoder: &E,
    source: &Path,
    destination: &Path,
    config: &EncodeConfig,
    ctx: &AttemptContext<'_>,
    sink: &LogSink,
) -> AttemptResult {
    let workspace = match AttemptWorkspace::create(ctx.temp_root) {
        Ok(ws) => ws,
        Err(e) => {
            return AttemptResult::failed(
                *config,
                format!("Could not create working directory: {}", e),
            );
        }
    };
    let result = run_in_workspace(encoder, source, destination, config, ctx, &workspace, sink);
    let workspace_path = workspace.path().to_path_buf();
    if let Err(e) = workspace.close() {
        log::warn!(
            target: "tiny_gif::gif::attempt",
            "Failed to remove working directory {}: {}",
            workspace_path.display(),
            e
        );
    }
    result
}

fn run_in_workspace<E: Encoder + ?Sized>(
    encoder: &E,
    source: &Path,
    destination: &Path,
    config: &EncodeConfig,
    ctx: &AttemptContext<'_>,
    workspace: &AttemptWorkspace,
    sink: &LogSink,
) -> AttemptResult {
    let palette_path = workspace.palette_path();
    let staged_path = workspace.output_path(&output_extension(destination));

    sink.log(&format!(
        "Generating palette (fps={}, width={}, colors={})...",
        config.sampling_fps(),
        config.frame_width(),
        config.max_colors()
    ));
    let palette = encoder.generate_palette(
        &PaletteRequest {
            source,
            palette_path: &palette_path,
            config,
            duration_secs: ctx.duration_secs,
            timeout: ctx.timeout,
        },
        sink,
    );
    match palette {
        Ok(_) if palette_path.is_file() => {}
        Ok(output) => {
            let detail = tail_lines(&output, ERROR_TAIL_LINES);
            let detail = if detail.is_empty() {
                "no palette image was written".to_string()
            } else {
                detail
            };
            return AttemptResult::failed(*config, format!("Palette generation failed: {}", detail));
        }
        Err(e) => {
            return AttemptResult::failed(
                *config,
                format!("Palette generation failed: {}", describe(&e)),
            );
        }
    }

    sink.log("Encoding GIF...");
    let encoded = encoder.apply_palette(
        &EncodeRequest {
            source,
            palette_path: &palette_path,
            output_path: &staged_path,
            config,
            duration_secs: ctx.duration_secs,
            timeout: ctx.timeout,
        },
        sink,
    );
    if let Err(e) = encoded {
        return AttemptResult::failed(*config, format!("GIF encoding failed: {}", describe(&e)));
    }

    let size = match fs::metadata(&staged_path) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            return AttemptResult::failed(
                *config,
                "GIF encoding failed: encoder exited cleanly but wrote no output".to_string(),
            );
        }
    };

    let keep = ctx.smallest_kept_bytes.is_none_or(|smallest| size < smallest);
    if keep && let Err(e) = move_file_replacing(&staged_path, destination) {
        return AttemptResult::failed(
            *config,
            format!("Could not write {}: {}", destination.display(), e),
        );
    }
    if !keep {
        log::debug!(
            target: "tiny_gif::gif::attempt",
            "Discarding {} byte result; destination already holds a smaller one",
            size
        );
    }

    AttemptResult {
        config: *config,
        succeeded: true,
        output_size_bytes: Some(size),
        error_message: None,
        kept: keep,
    }
}
