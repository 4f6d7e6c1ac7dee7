use crate::error::AppError;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";

fn find_in_path(tool: &str) -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let locator = "where";
    #[cfg(not(target_os = "windows"))]
    let locator = "which";

    let output = Command::new(locator).arg(tool).output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Resolve FFmpeg without touching the cache.
/// Order: `FFMPEG_PATH` env (if it exists), common install paths, then PATH.
pub fn locate_ffmpeg() -> Result<PathBuf, AppError> {
    if let Ok(env_path) = std::env::var(FFMPEG_PATH_ENV) {
        let p = PathBuf::from(&env_path);
        if p.exists() {
            log::debug!(
                target: "tiny_gif::ffmpeg::discovery",
                "FFmpeg path from {} env: {}",
                FFMPEG_PATH_ENV,
                p.display()
            );
            return Ok(p);
        }
        log::warn!(
            target: "tiny_gif::ffmpeg::discovery",
            "{} points at a missing file, ignoring: {}",
            FFMPEG_PATH_ENV,
            env_path
        );
    }

    for path in common_paths() {
        if path.exists() {
            log::debug!(
                target: "tiny_gif::ffmpeg::discovery",
                "FFmpeg found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    if let Some(p) = find_in_path("ffmpeg")
        && p.exists()
    {
        log::debug!(
            target: "tiny_gif::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "tiny_gif::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg is not available. Install FFmpeg and make sure 'ffmpeg' and 'ffprobe' are on PATH:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Get FFmpeg path. Cached for process lifetime once found; misses are retried.
pub fn get_ffmpeg_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let path = locate_ffmpeg()?;
    // Another thread may have initialized first; either value is valid.
    let _ = FFMPEG_PATH_CACHE.set(path);
    FFMPEG_PATH_CACHE
        .get()
        .map(PathBuf::as_path)
        .ok_or_else(|| AppError::from("FFmpeg path cache was not initialized"))
}

/// Paths to try for ffprobe given an ffmpeg binary path (suffixed first, then plain).
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let parent = match ffmpeg_path.parent() {
        Some(p) => p,
        None => return vec![],
    };
    let mut candidates = Vec::with_capacity(2);
    // Version suffixes like "-7.1-static" contain dots, so only a trailing ".exe" is stripped.
    let name = ffmpeg_path.file_name().and_then(|s| s.to_str());
    #[cfg(target_os = "windows")]
    let name = name.map(|n| {
        n.len()
            .checked_sub(4)
            .filter(|&cut| n.is_char_boundary(cut) && n[cut..].eq_ignore_ascii_case(".exe"))
            .map_or(n, |cut| &n[..cut])
    });
    if let Some(suffix) = name.and_then(|s| s.strip_prefix("ffmpeg"))
        && !suffix.is_empty()
    {
        #[cfg(target_os = "windows")]
        candidates.push(parent.join(format!("ffprobe{suffix}.exe")));
        #[cfg(not(target_os = "windows"))]
        candidates.push(parent.join(format!("ffprobe{suffix}")));
    }
    #[cfg(target_os = "windows")]
    candidates.push(parent.join("ffprobe.exe"));
    #[cfg(not(target_os = "windows"))]
    candidates.push(parent.join("ffprobe"));
    candidates
}

/// Get ffprobe path: next to ffmpeg first (they ship together), then PATH.
pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    let ffmpeg = get_ffmpeg_path()?;
    if let Some(found) = ffprobe_candidates(ffmpeg).into_iter().find(|c| c.exists()) {
        return Ok(found);
    }
    if let Some(p) = find_in_path("ffprobe")
        && p.exists()
    {
        return Ok(p);
    }
    Err(AppError::FfmpegNotFound(format!(
        "ffprobe not found next to {} or on PATH",
        ffmpeg.display()
    )))
}

fn runs_version(program: &Path) -> bool {
    let mut cmd = Command::new(program);
    cmd.arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    cmd.status().map(|s| s.success()).unwrap_or(false)
}

/// True when both ffmpeg and ffprobe resolve and answer `-version`.
/// Callers run this once before a batch; conversions still re-check on their own.
pub fn check_tools_available() -> bool {
    let Ok(ffmpeg) = get_ffmpeg_path() else {
        return false;
    };
    let Ok(ffprobe) = get_ffprobe_path() else {
        return false;
    };
    runs_version(ffmpeg) && runs_version(&ffprobe)
}
