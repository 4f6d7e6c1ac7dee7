//! Best-effort source probing via ffprobe.
//!
//! Probing only feeds parameter prediction, so nothing here fails the pipeline:
//! a missing tool, a non-zero exit or unparseable output all degrade to an
//! empty [`SourceProbe`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Coarse source properties. Any field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProbe {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub duration_seconds: Option<f64>,
}

impl SourceProbe {
    pub fn is_empty(&self) -> bool {
        *self == SourceProbe::default()
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

/// `num/den` to frames per second. A zero denominator is treated as 1.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    let den = if den == 0.0 { 1.0 } else { den };
    Some(num / den).filter(|fps| fps.is_finite())
}

fn parse_duration(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|d| d.is_finite())
}

pub fn build_probe_args(input_path: &str) -> Vec<String> {
    [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,r_frame_rate:format=duration",
        "-of",
        "json",
        input_path,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Structured ffprobe JSON (`-of json`). None when the text is not ffprobe JSON.
pub fn parse_probe_json(json: &str) -> Option<SourceProbe> {
    let output: FfprobeOutput = serde_json::from_str(json).ok()?;
    let stream = output.streams.as_ref().and_then(|s| s.first());
    Some(SourceProbe {
        width: stream.and_then(|s| s.width),
        height: stream.and_then(|s| s.height),
        frame_rate: stream
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_frame_rate),
        duration_seconds: output
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(parse_duration),
    })
}

/// Key-less line output (`-of default=noprint_wrappers=1:nokey=1`), whose line order
/// varies between ffprobe versions. Roles are sniffed per line:
/// a `/` marks the frame-rate ratio, a `.` the duration, and the first two plain
/// integers are width then height.
pub fn parse_probe_lines(output: &str) -> SourceProbe {
    let mut probe = SourceProbe::default();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.contains('/')
            && probe.frame_rate.is_none()
            && let Some(fps) = parse_frame_rate(line)
        {
            probe.frame_rate = Some(fps);
            continue;
        }
        if line.contains('.')
            && probe.duration_seconds.is_none()
            && let Some(duration) = parse_duration(line)
        {
            probe.duration_seconds = Some(duration);
            continue;
        }
        if probe.width.is_none()
            && let Ok(width) = line.parse::<u32>()
        {
            probe.width = Some(width);
            continue;
        }
        if probe.height.is_none()
            && let Ok(height) = line.parse::<u32>()
        {
            probe.height = Some(height);
        }
    }
    probe
}

/// JSON first; anything else goes through the line heuristic.
pub fn parse_probe_output(output: &str) -> SourceProbe {
    parse_probe_json(output).unwrap_or_else(|| parse_probe_lines(output))
}

/// Run ffprobe on a source and return what it could tell. Never fails.
pub fn probe_source(ffprobe: &Path, input_path: &Path) -> SourceProbe {
    let path_str = input_path.to_string_lossy();
    log::debug!(
        target: "tiny_gif::ffmpeg::ffprobe",
        "probe_source: path={}",
        path_str
    );

    let mut cmd = Command::new(ffprobe);
    cmd.args(build_probe_args(&path_str))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW

    let output = match cmd.output() {
        Ok(output) => output,
        Err(e) => {
            log::warn!(
                target: "tiny_gif::ffmpeg::ffprobe",
                "Failed to run ffprobe, using defaults: {}",
                e
            );
            return SourceProbe::default();
        }
    };

    if !output.status.success() {
        log::warn!(
            target: "tiny_gif::ffmpeg::ffprobe",
            "ffprobe failed, using defaults: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return SourceProbe::default();
    }

    let probe = parse_probe_output(&String::from_utf8_lossy(&output.stdout));
    log::debug!(
        target: "tiny_gif::ffmpeg::ffprobe",
        "probe result: {:?}",
        probe
    );
    probe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_extracts_probe() {
        let json = r#"{
            "programs": [],
            "streams": [
                { "width": 1280, "height": 720, "r_frame_rate": "30000/1001" }
            ],
            "format": { "duration": "14.500000" }
        }"#;
        let probe = parse_probe_json(json).unwrap();
        assert_eq!(probe.width, Some(1280));
        assert_eq!(probe.height, Some(720));
        assert!((probe.frame_rate.unwrap() - 29.97).abs() < 0.01);
        assert_eq!(probe.duration_seconds, Some(14.5));
    }

    #[test]
    fn parse_json_without_streams_keeps_duration() {
        let json = r#"{ "streams": [], "format": { "duration": "3.2" } }"#;
        let probe = parse_probe_json(json).unwrap();
        assert_eq!(probe.width, None);
        assert_eq!(probe.duration_seconds, Some(3.2));
    }

    #[test]
    fn lines_in_canonical_order() {
        let probe = parse_probe_lines("640\n360\n25/1\n12.040000\n");
        assert_eq!(probe.width, Some(640));
        assert_eq!(probe.height, Some(360));
        assert_eq!(probe.frame_rate, Some(25.0));
        assert_eq!(probe.duration_seconds, Some(12.04));
    }

    #[test]
    fn lines_in_shuffled_order() {
        let probe = parse_probe_lines("  30/1\n9.5\n1920\n\n1080\n");
        assert_eq!(probe.width, Some(1920));
        assert_eq!(probe.height, Some(1080));
        assert_eq!(probe.frame_rate, Some(30.0));
        assert_eq!(probe.duration_seconds, Some(9.5));
    }

    #[test]
    fn zero_denominator_treated_as_one() {
        let probe = parse_probe_lines("24/0");
        assert_eq!(probe.frame_rate, Some(24.0));
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let probe = parse_probe_lines("N/A\nhello\n320\nabc.def\n240\n");
        assert_eq!(probe.frame_rate, None);
        assert_eq!(probe.duration_seconds, None);
        assert_eq!(probe.width, Some(320));
        assert_eq!(probe.height, Some(240));
    }

    #[test]
    fn empty_output_is_empty_probe() {
        assert!(parse_probe_output("").is_empty());
    }

    #[test]
    fn output_falls_back_to_lines() {
        let probe = parse_probe_output("480\n270\n15/1\n2.000000");
        assert_eq!(probe.width, Some(480));
        assert_eq!(probe.duration_seconds, Some(2.0));
    }

    #[test]
    fn missing_tool_degrades_to_empty_probe() {
        let probe = probe_source(
            Path::new("/definitely/not/ffprobe"),
            Path::new("/tmp/clip.mp4"),
        );
        assert!(probe.is_empty());
    }
}
