//! Parameter prediction and the fixed fallback ladder.
//!
//! The prediction keeps a rough frame budget (a proxy for output size) constant
//! across clip lengths: longer clips get fewer, smaller, less colorful frames.

use serde::Serialize;

use crate::ffmpeg::ffprobe::SourceProbe;

/// Assumed clip length when probing could not tell.
pub const DEFAULT_DURATION_SECS: f64 = 8.0;
pub const MIN_FRAME_WIDTH: u32 = 240;
pub const MIN_SAMPLING_FPS: u32 = 6;
pub const MAX_SAMPLING_FPS: u32 = 12;
pub const MIN_COLORS: u32 = 64;

const MIN_FRAME_BUDGET: f64 = 120.0;
const FRAMES_PER_REFERENCE_BUDGET: f64 = 240.0;
const REFERENCE_BUDGET_MB: f64 = 5.0;
/// First ladder step keeps 85% of the predicted width.
const LADDER_WIDTH_PERCENT: u32 = 85;
const LADDER_FPS_STEP: u32 = 2;

/// (max duration in seconds, width cap, max colors); the last row covers everything longer.
const DURATION_BUCKETS: [(f64, u32, u32); 5] = [
    (6.0, 480, 128),
    (12.0, 400, 128),
    (20.0, 360, 96),
    (35.0, 320, 96),
    (f64::INFINITY, 272, 64),
];

/// One candidate parameter set for a palette + encode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeConfig {
    frame_width: u32,
    sampling_fps: u32,
    max_colors: u32,
    palette_sample_seconds: Option<f64>,
}

impl EncodeConfig {
    /// Width is forced even; the GIF muxer and scale filter need aligned dimensions.
    pub fn new(frame_width: u32, sampling_fps: u32, max_colors: u32) -> Self {
        Self {
            frame_width: even(frame_width),
            sampling_fps,
            max_colors,
            palette_sample_seconds: None,
        }
    }

    /// Limit palette sampling to the first `seconds` of the source. Non-positive means no limit.
    pub fn with_palette_sample_seconds(mut self, seconds: Option<f64>) -> Self {
        self.palette_sample_seconds = seconds.filter(|s| s.is_finite() && *s > 0.0);
        self
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn sampling_fps(&self) -> u32 {
        self.sampling_fps
    }

    pub fn max_colors(&self) -> u32 {
        self.max_colors
    }

    pub fn palette_sample_seconds(&self) -> Option<f64> {
        self.palette_sample_seconds
    }
}

impl std::fmt::Display for EncodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "width={}, fps={}, colors={}",
            self.frame_width, self.sampling_fps, self.max_colors
        )
    }
}

/// Round down to the nearest even number.
pub fn even(value: u32) -> u32 {
    value - value % 2
}

fn width_floor(width: u32) -> u32 {
    even(width).max(MIN_FRAME_WIDTH)
}

/// Best-guess configuration from source duration, probed width, and the size budget.
pub fn predict(probe: &SourceProbe, size_budget_mb: f64) -> EncodeConfig {
    // A probed 0.0 is a real (very short) duration; only absent or garbage values default.
    let duration = probe
        .duration_seconds
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(DEFAULT_DURATION_SECS);

    let budget_mb = if size_budget_mb.is_finite() {
        size_budget_mb
    } else {
        REFERENCE_BUDGET_MB
    };
    let frame_budget = (FRAMES_PER_REFERENCE_BUDGET * budget_mb / REFERENCE_BUDGET_MB)
        .round()
        .max(MIN_FRAME_BUDGET);
    let sampling_fps = (frame_budget / duration.max(1.0))
        .round()
        .clamp(MIN_SAMPLING_FPS as f64, MAX_SAMPLING_FPS as f64) as u32;

    let (width_cap, max_colors) = DURATION_BUCKETS
        .iter()
        .find(|(max_duration, _, _)| duration <= *max_duration)
        .map(|&(_, cap, colors)| (cap, colors))
        .unwrap_or((MIN_FRAME_WIDTH, MIN_COLORS));

    let width = match probe.width.filter(|w| *w > 0) {
        Some(source_width) => width_cap.min(source_width),
        None => width_cap,
    };

    EncodeConfig::new(width_floor(width), sampling_fps, max_colors)
}

/// Fixed degradation path tried in order after the prediction overshoots.
/// Always ends at the floor configuration (240px, 6 fps, 64 colors).
pub fn fallback_ladder(initial: &EncodeConfig) -> Vec<EncodeConfig> {
    let sample = initial.palette_sample_seconds;
    let reduced_width = initial.frame_width * LADDER_WIDTH_PERCENT / 100;
    vec![
        EncodeConfig::new(
            width_floor(reduced_width),
            initial
                .sampling_fps
                .saturating_sub(LADDER_FPS_STEP)
                .max(MIN_SAMPLING_FPS),
            (initial.max_colors / 2).max(MIN_COLORS),
        )
        .with_palette_sample_seconds(sample),
        EncodeConfig::new(MIN_FRAME_WIDTH, MIN_SAMPLING_FPS, MIN_COLORS)
            .with_palette_sample_seconds(sample),
    ]
}
