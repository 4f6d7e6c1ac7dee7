use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};

use crate::batch::{BatchEvent, BatchHandle, BatchJob, ConversionMode, converter_for, spawn_batch};
use crate::error::AppError;
use crate::ffmpeg::discovery::check_tools_available;
use crate::ffmpeg::{FfmpegErrorPayload, cleanup_old_temp_dirs, parse_ffmpeg_error};

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeInfo {
    pub id: ConversionMode,
    pub label: &'static str,
    pub input_extension: &'static str,
    pub output_extension: &'static str,
    pub requires_ffmpeg: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub tools_available: bool,
    pub modes: Vec<ModeInfo>,
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    app_capabilities_with(check_tools_available())
}

fn app_capabilities_with(tools_available: bool) -> AppCapabilitiesResult {
    let modes = ConversionMode::ALL
        .iter()
        .map(|&mode| ModeInfo {
            id: mode,
            label: mode.label(),
            input_extension: mode.input_extension(),
            output_extension: mode.output_extension(),
            requires_ffmpeg: mode.needs_ffmpeg(),
        })
        .collect();
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        tools_available,
        modes,
    }
}

/// Start `job` with the production converter. GIF modes check for ffmpeg and ffprobe
/// once here so a missing install fails the request instead of every file.
pub fn start_batch(job: BatchJob) -> Result<BatchHandle, AppError> {
    if job.mode.needs_ffmpeg() && !check_tools_available() {
        return Err(AppError::FfmpegNotFound(
            "FFmpeg and FFprobe are required for GIF conversion. Install FFmpeg or set FFMPEG_PATH."
                .to_string(),
        ));
    }
    let converter = converter_for(job.mode, job.options.clone());
    spawn_batch(job, converter)
}

/// Event name and JSON payload for one batch event.
pub fn batch_event_message(job_id: u64, event: &BatchEvent) -> (&'static str, Value) {
    match event {
        BatchEvent::Log(message) => ("batch.log", json!({ "jobId": job_id, "message": message })),
        BatchEvent::Step(payload) => (
            "batch.step",
            json!({ "jobId": job_id, "progress": payload.progress, "step": payload.step }),
        ),
        BatchEvent::Progress {
            completed,
            total,
            current,
        } => (
            "batch.progress",
            json!({
                "jobId": job_id,
                "completed": completed,
                "total": total,
                "current": current,
            }),
        ),
        BatchEvent::Finished(summary) => (
            "batch.complete",
            json!({ "jobId": job_id, "summary": summary }),
        ),
    }
}

/// Summary/detail pair shown to the user for `err`.
pub fn error_payload(err: &AppError) -> FfmpegErrorPayload {
    match err {
        AppError::FfmpegFailed { code, stderr } if *code == -1 => FfmpegErrorPayload {
            summary: stderr.clone(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => parse_ffmpeg_error(stderr, Some(*code)),
        _ => {
            let text = err.to_string();
            FfmpegErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

/// Sweep attempt workspaces a crashed run left in `root` (OS temp dir when None).
pub fn cleanup_startup_temp(root: Option<&Path>, max_age: Duration) -> usize {
    cleanup_old_temp_dirs(root, max_age)
}
