//! FFmpeg process spawning and progress parsing.
//!
//! Spawns FFmpeg as a child process, parses progress from stdout (pipe:1),
//! keeps a bounded tail of stderr for diagnostics, and optionally reports
//! progress through a callback. Background threads drain both pipes while the
//! calling thread waits for the process, so the call blocks until exit.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::progress::parse_ffmpeg_progress;
use crate::error::AppError;

/// Receives normalized progress in [0,1].
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Sentinel for "duration not yet known". AtomicU64 cannot hold Option<f64>,
/// so we encode duration as f64 bits; u64::MAX means "not yet known".
const NONE_DURATION_BITS: u64 = u64::MAX;

/// Minimum interval between progress callbacks.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;
/// Poll interval while waiting on a process with a deadline.
const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One blocking FFmpeg invocation.
pub struct FfmpegRun {
    pub args: Vec<String>,
    /// Known source duration; lets progress start before FFmpeg prints its banner.
    pub duration_secs: Option<f64>,
    /// Upper bound on the span FFmpeg will actually process (e.g. `-t` sampling).
    pub duration_limit: Option<f64>,
    pub progress_callback: Option<ProgressCallback>,
    pub timeout: Option<Duration>,
}

impl FfmpegRun {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            duration_secs: None,
            duration_limit: None,
            progress_callback: None,
            timeout: None,
        }
    }
}

struct ReadStreamConfig {
    collect_stderr: Option<Arc<Mutex<Vec<u8>>>>,
    duration: Arc<AtomicU64>,
    duration_limit: Option<f64>,
    progress_callback: Option<ProgressCallback>,
}

fn read_stream<R: std::io::Read + Send + 'static>(
    reader: R,
    config: ReadStreamConfig,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let load_duration = || {
            let bits = config.duration.load(Ordering::Relaxed);
            if bits == NONE_DURATION_BITS {
                None
            } else {
                Some(f64::from_bits(bits))
            }
        };
        let mut last_emit = Instant::now();
        let mut last_progress = 0.0_f64;
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let decoded = String::from_utf8_lossy(&line_buf).into_owned();
            let line = decoded.trim_end_matches(['\n', '\r']);
            if let Some(ref buf) = config.collect_stderr {
                let mut guard = buf.lock();
                guard.extend_from_slice(line.as_bytes());
                guard.push(b'\n');
                if guard.len() > MAX_STDERR_BYTES {
                    let excess = guard.len() - MAX_STDERR_BYTES;
                    guard.drain(..excess);
                }
            }
            let (progress, d) = parse_ffmpeg_progress(line, load_duration(), config.duration_limit);
            if let Some(new_dur) = d {
                config.duration.store(new_dur.to_bits(), Ordering::Relaxed);
            }
            if let Some(p) = progress {
                let now = Instant::now();
                let should_emit = now.duration_since(last_emit) >= PROGRESS_EMIT_INTERVAL
                    || (p - last_progress).abs() >= 0.01
                    || p >= 1.0;
                if should_emit {
                    last_emit = now;
                    last_progress = p;
                    if let Some(ref cb) = config.progress_callback {
                        cb(p);
                    }
                }
            }
            line_buf.clear();
        }
    })
}

/// Run FFmpeg (or ffprobe) and block until it exits.
///
/// Returns the captured stderr tail on success so callers can build diagnostics
/// when the tool exits cleanly but produces nothing. A non-zero exit becomes
/// `AppError::FfmpegFailed` carrying that same tail. With `timeout` set the
/// process is killed once the deadline passes and `AppError::TimedOut` is returned.
pub fn run_ffmpeg_blocking(program: &Path, run: FfmpegRun) -> Result<String, AppError> {
    let FfmpegRun {
        args,
        duration_secs,
        duration_limit,
        progress_callback,
        timeout,
    } = run;

    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    let output_arg = args.last();
    log::debug!(
        target: "tiny_gif::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        program.display(),
        input_arg,
        output_arg
    );

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn FFmpeg: {}", e))?;

    let stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::from("Failed to capture stdout"));
        }
    };
    let stderr = match child.stderr.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::from("Failed to capture stderr"));
        }
    };

    let duration = Arc::new(AtomicU64::new(
        duration_secs
            .filter(|&d| d > 0.0)
            .map(f64::to_bits)
            .unwrap_or(NONE_DURATION_BITS),
    ));
    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));

    let stdout_handle = read_stream(
        stdout,
        ReadStreamConfig {
            collect_stderr: None,
            duration: Arc::clone(&duration),
            duration_limit,
            progress_callback,
        },
    );
    let stderr_handle = read_stream(
        stderr,
        ReadStreamConfig {
            collect_stderr: Some(Arc::clone(&stderr_buffer)),
            duration: Arc::clone(&duration),
            duration_limit,
            progress_callback: None,
        },
    );

    let status = match timeout {
        Some(limit) => wait_with_deadline(&mut child, limit),
        None => child.wait().map(Some).map_err(AppError::from),
    };

    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    let stderr_bytes = stderr_buffer.lock().clone();
    let stderr_str = String::from_utf8_lossy(&stderr_bytes).to_string();

    let status = match status? {
        Some(status) => status,
        None => {
            let seconds = timeout.map(|t| t.as_secs()).unwrap_or_default();
            log::warn!(
                target: "tiny_gif::ffmpeg::runner",
                "FFmpeg killed after exceeding {}s timeout",
                seconds
            );
            return Err(AppError::TimedOut { seconds });
        }
    };

    if status.success() {
        log::debug!(
            target: "tiny_gif::ffmpeg::runner",
            "FFmpeg completed successfully"
        );
        Ok(stderr_str)
    } else {
        let code = status.code().unwrap_or(-1);
        let err_preview = stderr_str
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .join("; ");
        log::error!(
            target: "tiny_gif::ffmpeg::runner",
            "FFmpeg failed (code={}): {}",
            code,
            err_preview
        );
        Err(AppError::FfmpegFailed {
            code,
            stderr: stderr_str,
        })
    }
}

/// Returns Ok(None) when the deadline passed and the child was killed.
fn wait_with_deadline(
    child: &mut std::process::Child,
    limit: Duration,
) -> Result<Option<ExitStatus>, AppError> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(TIMEOUT_POLL_INTERVAL);
    }
}
