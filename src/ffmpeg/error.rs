//! Map FFmpeg exit codes and well-known diagnostics to user-friendly messages.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used for spawn failure.
//! Captured output is kept as detail for debugging.

use serde::Serialize;

/// Payload for error responses. Front-end shows summary; detail is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

/// Diagnostics that say more than the exit code does. Checked in order, case-insensitive.
const KNOWN_DIAGNOSTICS: &[(&str, &str)] = &[
    ("no such file or directory", "Input file could not be opened."),
    ("invalid data found when processing input", "Input is not a readable video."),
    ("does not contain any stream", "Input has no video stream."),
    ("permission denied", "Permission denied while writing output."),
    ("no space left on device", "Disk is full."),
];

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = match known_diagnostic_summary(stderr) {
        Some(msg) => msg,
        None => match exit_code {
            Some(code) => match known_exit_code_summary(code) {
                Some(msg) => msg,
                None => format!("FFmpeg failed (exit code {}).", code),
            },
            None => first_line_truncated(stderr, 120),
        },
    };
    let detail = stderr.trim().to_string();
    FfmpegErrorPayload { summary, detail }
}

fn known_diagnostic_summary(stderr: &str) -> Option<String> {
    let lower = stderr.to_lowercase();
    KNOWN_DIAGNOSTICS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, summary)| summary.to_string())
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
}

const ELLIPSIS: &str = "…";

/// First non-empty line, cut on a char boundary to at most `max_len` bytes including the ellipsis.
fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.len() <= max_len {
        return first.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while cut > 0 && !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}

/// Last few non-empty lines of captured output, newest last. Used for attempt messages.
pub fn tail_lines(output: &str, count: usize) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
