//! Human-readable status lines and per-pass progress for whoever drives a conversion.
//!
//! A sink must never take a conversion down: a panicking callback is caught and dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::ffmpeg::{FfmpegProgressPayload, ProgressCallback};

pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ProgressEmitter = Arc<dyn Fn(FfmpegProgressPayload) + Send + Sync>;

#[derive(Clone, Default)]
pub struct LogSink {
    on_log: Option<LogCallback>,
    on_progress: Option<ProgressEmitter>,
}

impl LogSink {
    pub fn new(on_log: LogCallback) -> Self {
        Self {
            on_log: Some(on_log),
            on_progress: None,
        }
    }

    /// Only mirrors into the `log` facade.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, on_progress: ProgressEmitter) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn log(&self, message: &str) {
        log::info!(target: "tiny_gif::sink", "{}", message);
        if let Some(cb) = &self.on_log
            && catch_unwind(AssertUnwindSafe(|| cb(message))).is_err()
        {
            log::warn!(target: "tiny_gif::sink", "Log callback panicked; message dropped");
        }
    }

    /// Runner callback that tags raw [0,1] progress with `step`.
    pub fn step_callback(&self, step: &'static str) -> Option<ProgressCallback> {
        let emit = self.on_progress.clone()?;
        Some(Arc::new(move |progress: f64| {
            let payload = FfmpegProgressPayload {
                progress,
                step: Some(step.to_string()),
            };
            let _ = catch_unwind(AssertUnwindSafe(|| emit(payload)));
        }))
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("on_log", &self.on_log.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}
