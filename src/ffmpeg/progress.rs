use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: (\d+):(\d+):([\d.]+)").expect("invalid duration regex"));
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out_time_(?:ms|us)=(\d+)").expect("invalid time regex"));
static END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^progress=end$").expect("invalid end regex"));

/// Parse one line of FFmpeg output (`-progress pipe:1` on stdout, banner on stderr).
/// Returns (progress 0.0-1.0 or None, duration in seconds or None).
///
/// `duration_limit` caps the known duration, so a palette pass sampled with `-t`
/// reports against the sampled span rather than the whole clip.
pub fn parse_ffmpeg_progress(
    output: &str,
    current_duration: Option<f64>,
    duration_limit: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    let cap = |d: f64| match duration_limit {
        Some(limit) if limit > 0.0 => d.min(limit),
        _ => d,
    };

    if let Some(caps) = DURATION_RE.captures(output) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        let duration = hours * 3600.0 + minutes * 60.0 + seconds;
        return (None, Some(cap(duration)));
    }

    if END_RE.is_match(output.trim()) {
        return (Some(1.0), current_duration);
    }

    if let Some(caps) = TIME_RE.captures(output)
        && let Some(dur) = current_duration.map(cap)
        && dur > 0.0
    {
        // FFmpeg reports out_time_ms in microseconds despite the name.
        let current_time_us: i64 = caps[1].parse().unwrap_or(0);
        let current_time = current_time_us as f64 / 1_000_000.0;
        let progress = (current_time / dur).clamp(0.0, 1.0);
        return (Some(progress), Some(dur));
    }

    (None, current_duration)
}
