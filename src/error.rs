//! App error type for conversions and sidecar commands. Implements Display and Serialize for the front-end.

use std::path::PathBuf;

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("FFmpeg did not finish within {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// Every attempt failed; carries the last diagnostic captured from the encoder.
    #[error("{0}")]
    Conversion(String),

    #[error("Image conversion failed: {0}")]
    Image(String),
}

impl AppError {
    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    /// True for errors that make the whole file (or batch) unprocessable before any attempt runs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::FfmpegNotFound(_) | AppError::InputNotFound(_) | AppError::Io(_)
        )
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::FfmpegFailed {
            code: -1,
            stderr: s,
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

impl From<image::ImageError> for AppError {
    fn from(e: image::ImageError) -> Self {
        AppError::Image(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_text_is_an_ordinary_failure() {
        let e = AppError::from("Aborted");
        assert!(matches!(e, AppError::FfmpegFailed { code: -1, .. }));
    }

    #[test]
    fn from_other_string() {
        let e = AppError::from("palette pass exploded");
        match &e {
            AppError::FfmpegFailed { code, stderr } => {
                assert_eq!(*code, -1);
                assert_eq!(stderr, "palette pass exploded");
            }
            _ => panic!("expected FfmpegFailed"),
        }
    }

    #[test]
    fn conversion_error_displays_last_diagnostic() {
        let e = AppError::Conversion("GIF encoding failed: Invalid data".into());
        assert_eq!(e.to_string(), "GIF encoding failed: Invalid data");
        assert!(!e.is_fatal());
    }

    #[test]
    fn missing_input_is_fatal() {
        let e = AppError::InputNotFound(PathBuf::from("/nope/clip.mp4"));
        assert!(e.is_fatal());
        assert!(e.to_string().contains("/nope/clip.mp4"));
    }

    #[test]
    fn failed_serializes_as_summary_json() {
        let e = AppError::ffmpeg_failed(1, "boom");
        let s = serde_json::to_string(&e).unwrap();
        assert!(s.contains("FFmpeg failed."));
        assert!(s.contains("boom"));
    }
}
