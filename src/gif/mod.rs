mod attempt;
mod controller;
pub mod encoder;
mod predict;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub use attempt::{AttemptContext, AttemptResult, run_attempt};
pub use controller::{ConversionOutcome, convert_to_gif};
pub use encoder::{EncodeRequest, Encoder, FfmpegToolchain, PaletteRequest, Prober};
pub use predict::{
    DEFAULT_DURATION_SECS, EncodeConfig, MAX_SAMPLING_FPS, MIN_COLORS, MIN_FRAME_WIDTH,
    MIN_SAMPLING_FPS, even, fallback_ladder, predict,
};

pub const DEFAULT_MAX_SIZE_MB: f64 = 5.0;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_PALETTE_SAMPLE_SECONDS: f64 = 6.0;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Per-conversion settings. Every field is optional; `effective_*` applies the defaults.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GifOptions {
    pub max_size_mb: Option<f64>,
    pub fast_first: Option<bool>,
    pub max_attempts: Option<u32>,
    /// Limit on how much of the source the palette pass samples. Zero or negative disables it.
    pub palette_sample_seconds: Option<f64>,
    /// Wall-clock limit per external invocation. No limit by default.
    pub invocation_timeout_secs: Option<f64>,
    /// Parent of attempt working directories. OS temp dir by default.
    pub temp_root: Option<PathBuf>,
}

impl GifOptions {
    pub fn effective_max_size_mb(&self) -> f64 {
        self.max_size_mb
            .filter(|mb| mb.is_finite() && *mb > 0.0)
            .unwrap_or(DEFAULT_MAX_SIZE_MB)
    }

    pub fn effective_fast_first(&self) -> bool {
        self.fast_first.unwrap_or(true)
    }

    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn effective_palette_sample_seconds(&self) -> Option<f64> {
        let secs = self
            .palette_sample_seconds
            .unwrap_or(DEFAULT_PALETTE_SAMPLE_SECONDS);
        (secs.is_finite() && secs > 0.0).then_some(secs)
    }

    pub fn effective_invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn effective_temp_root(&self) -> Option<&Path> {
        self.temp_root.as_deref()
    }

    pub fn budget_bytes(&self) -> u64 {
        (self.effective_max_size_mb() * BYTES_PER_MB) as u64
    }
}

/// Bytes as megabytes with two decimals, the unit every size log line uses.
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MB)
}
