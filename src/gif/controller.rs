//! Retry controller: predict, try, measure, degrade, settle.
//!
//! The number of executor invocations is bounded by `max_attempts`. The fast attempt
//! uses the predicted configuration; every later attempt walks the fixed ladder.
//! When nothing fits the budget, the smallest artifact produced stays at the destination.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AppError;
use crate::gif::attempt::{AttemptContext, AttemptResult, run_attempt};
use crate::gif::encoder::{Encoder, Prober};
use crate::gif::{EncodeConfig, GifOptions, fallback_ladder, format_mb, predict};
use crate::log_sink::LogSink;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutcome {
    pub destination_path: PathBuf,
    pub final_size_bytes: u64,
    pub met_budget: bool,
    /// Every executor invocation in order.
    pub attempts: Vec<AttemptResult>,
}

struct RetryRun<'a, T: ?Sized> {
    tools: &'a T,
    source: &'a Path,
    destination: &'a Path,
    sink: &'a LogSink,
    ctx: AttemptContext<'a>,
    budget_bytes: u64,
    max_attempts: u32,
    attempts: Vec<AttemptResult>,
    last_error: Option<String>,
}

impl<T: Encoder + ?Sized> RetryRun<'_, T> {
    fn exhausted(&self) -> bool {
        self.attempts.len() as u32 >= self.max_attempts
    }

    /// Run one attempt and return true when it met the budget.
    fn try_config(&mut self, config: &EncodeConfig) -> bool {
        self.sink.log(&format!(
            "Attempt {}/{}: {}",
            self.attempts.len() + 1,
            self.max_attempts,
            config
        ));
        let result = run_attempt(
            self.tools,
            self.source,
            self.destination,
            config,
            &self.ctx,
            self.sink,
        );

        let within = match (result.succeeded, result.output_size_bytes) {
            (true, Some(size)) => {
                self.sink.log(&format!(
                    "Result size: {} MB (limit {} MB)",
                    format_mb(size),
                    format_mb(self.budget_bytes)
                ));
                if result.kept {
                    self.ctx.smallest_kept_bytes = Some(size);
                }
                result.kept && size <= self.budget_bytes
            }
            _ => {
                let message = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Encoding failed.".to_string());
                self.sink.log(&format!("Attempt failed: {}", message));
                self.last_error = Some(message);
                false
            }
        };
        self.attempts.push(result);
        within
    }

    fn accept(self, size: u64, met_budget: bool) -> ConversionOutcome {
        ConversionOutcome {
            destination_path: self.destination.to_path_buf(),
            final_size_bytes: size,
            met_budget,
            attempts: self.attempts,
        }
    }

    fn settle(self) -> Result<ConversionOutcome, AppError> {
        match self.ctx.smallest_kept_bytes {
            Some(size) => {
                self.sink.log(
                    "Warning: Could not reach size target. Keeping the most compressed version.",
                );
                log::warn!(
                    target: "tiny_gif::gif::controller",
                    "{}: best result {} MB exceeds {} MB after {} attempt(s)",
                    self.destination.display(),
                    format_mb(size),
                    format_mb(self.budget_bytes),
                    self.attempts.len()
                );
                Ok(self.accept(size, false))
            }
            None => Err(AppError::Conversion(
                self.last_error
                    .unwrap_or_else(|| "Failed to encode GIF.".to_string()),
            )),
        }
    }
}

/// Convert `source` into a GIF at `destination`, trying to stay within the options' size budget.
///
/// Fails immediately, with no attempt made, when the input is missing, the destination
/// directory cannot be created, or the encoder is unavailable. Otherwise fails only when
/// no attempt produced an artifact, carrying the last attempt's diagnostic.
pub fn convert_to_gif<T: Encoder + Prober + ?Sized>(
    tools: &T,
    source: &Path,
    destination: &Path,
    options: &GifOptions,
    sink: &LogSink,
) -> Result<ConversionOutcome, AppError> {
    if !source.is_file() {
        return Err(AppError::InputNotFound(source.to_path_buf()));
    }
    tools.ensure_available()?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let budget_mb = options.effective_max_size_mb();
    let probe = tools.probe(source);
    log::debug!(
        target: "tiny_gif::gif::controller",
        "Probed {}: {:?}",
        source.display(),
        probe
    );
    let predicted =
        predict(&probe, budget_mb).with_palette_sample_seconds(options.effective_palette_sample_seconds());

    let mut run = RetryRun {
        tools,
        source,
        destination,
        sink,
        ctx: AttemptContext {
            temp_root: options.effective_temp_root(),
            duration_secs: probe.duration_seconds,
            timeout: options.effective_invocation_timeout(),
            smallest_kept_bytes: None,
        },
        budget_bytes: options.budget_bytes(),
        max_attempts: options.effective_max_attempts(),
        attempts: Vec::new(),
        last_error: None,
    };

    if options.effective_fast_first() && !run.exhausted() && run.try_config(&predicted) {
        return Ok(within_budget(run));
    }

    for candidate in fallback_ladder(&predicted) {
        if run.exhausted() {
            break;
        }
        if run.try_config(&candidate) {
            return Ok(within_budget(run));
        }
    }

    run.settle()
}

fn within_budget<T: Encoder + ?Sized>(run: RetryRun<'_, T>) -> ConversionOutcome {
    run.sink.log("Success within size limit.");
    let size = run.ctx.smallest_kept_bytes.unwrap_or_default();
    run.accept(size, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeToolchain, Scripted};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const MB: u64 = 1024 * 1024;

    struct Env {
        dir: tempfile::TempDir,
        source: PathBuf,
        destination: PathBuf,
        options: GifOptions,
    }

    impl Env {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("clip.mp4");
            fs::write(&source, b"source bytes").unwrap();
            let destination = dir.path().join("out").join("clip.gif");
            let options = GifOptions {
                max_size_mb: Some(5.0),
                temp_root: Some(dir.path().join("work")),
                ..Default::default()
            };
            Self {
                dir,
                source,
                destination,
                options,
            }
        }

        fn work_dir_is_empty(&self) -> bool {
            let work = self.dir.path().join("work");
            !work.exists() || fs::read_dir(work).unwrap().next().is_none()
        }

        fn convert(&self, tools: &FakeToolchain, sink: &LogSink) -> Result<ConversionOutcome, AppError> {
            convert_to_gif(tools, &self.source, &self.destination, &self.options, sink)
        }
    }

    fn recording_sink() -> (LogSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let sink = LogSink::new(Arc::new(move |m: &str| seen_cb.lock().push(m.to_string())));
        (sink, seen)
    }

    #[test]
    fn fast_attempt_within_budget_makes_one_call() {
        let env = Env::new();
        let tools = FakeToolchain::new(vec![Scripted::Writes(2 * MB)]);
        let outcome = env.convert(&tools, &LogSink::silent()).unwrap();
        assert!(outcome.met_budget);
        assert_eq!(outcome.final_size_bytes, 2 * MB);
        assert_eq!(outcome.destination_path, env.destination);
        assert_eq!(tools.encode_calls(), 1);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(env.work_dir_is_empty());
    }

    #[test]
    fn oversize_then_fit_takes_two_calls() {
        let env = Env::new();
        let tools = FakeToolchain::new(vec![Scripted::Writes(8 * MB), Scripted::Writes(3 * MB)]);
        let outcome = env.convert(&tools, &LogSink::silent()).unwrap();
        assert!(outcome.met_budget);
        assert_eq!(outcome.final_size_bytes, 3 * MB);
        assert_eq!(fs::metadata(&env.destination).unwrap().len(), 3 * MB);
        assert_eq!(tools.encode_calls(), 2);
    }

    #[test]
    fn second_attempt_uses_first_ladder_step() {
        let env = Env::new();
        let tools = FakeToolchain::with_probe(
            vec![Scripted::Writes(8 * MB), Scripted::Writes(MB)],
            crate::ffmpeg::ffprobe::SourceProbe {
                width: Some(1280),
                height: Some(720),
                frame_rate: Some(30.0),
                duration_seconds: Some(4.0),
            },
        );
        let outcome = env.convert(&tools, &LogSink::silent()).unwrap();
        let predicted = outcome.attempts[0].config;
        let ladder = fallback_ladder(&predicted);
        assert_eq!(outcome.attempts[1].config, ladder[0]);
        assert_eq!(tools.configs(), vec![predicted, ladder[0]]);
    }

    #[test]
    fn every_failure_reports_last_error_and_leaves_nothing() {
        let env = Env::new();
        let tools = FakeToolchain::new(vec![
            Scripted::PaletteFails("first".into()),
            Scripted::EncodeFails("second".into()),
            Scripted::EncodeFails("third".into()),
        ]);
        let err = env.convert(&tools, &LogSink::silent()).unwrap_err();
        match err {
            AppError::Conversion(msg) => assert_eq!(msg, "GIF encoding failed: third"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!env.destination.exists());
        assert_eq!(tools.palette_calls(), 3);
        assert!(env.work_dir_is_empty());
    }

    #[test]
    fn all_oversize_keeps_smallest_and_warns() {
        let env = Env::new();
        let tools = FakeToolchain::new(vec![
            Scripted::Writes(9 * MB),
            Scripted::Writes(7 * MB),
            Scripted::Writes(6 * MB),
        ]);
        let (sink, seen) = recording_sink();
        let outcome = env.convert(&tools, &sink).unwrap();
        assert!(!outcome.met_budget);
        assert_eq!(outcome.final_size_bytes, 6 * MB);
        assert_eq!(fs::metadata(&env.destination).unwrap().len(), 6 * MB);
        assert!(
            seen.lock()
                .iter()
                .any(|l| l.starts_with("Warning: Could not reach size target"))
        );
    }

    #[test]
    fn failed_last_attempt_keeps_earlier_artifact() {
        let env = Env::new();
        let tools = FakeToolchain::new(vec![
            Scripted::Writes(9 * MB),
            Scripted::Writes(7 * MB),
            Scripted::EncodeFails("boom".into()),
        ]);
        let outcome = env.convert(&tools, &LogSink::silent()).unwrap();
        assert!(!outcome.met_budget);
        assert_eq!(outcome.final_size_bytes, 7 * MB);
        assert_eq!(fs::metadata(&env.destination).unwrap().len(), 7 * MB);
    }

    #[test]
    fn larger_later_result_does_not_replace_smaller() {
        let env = Env::new();
        let tools = FakeToolchain::new(vec![
            Scripted::Writes(6 * MB),
            Scripted::Writes(9 * MB),
            Scripted::Writes(8 * MB),
        ]);
        let outcome = env.convert(&tools, &LogSink::silent()).unwrap();
        assert_eq!(outcome.final_size_bytes, 6 * MB);
        assert_eq!(fs::metadata(&env.destination).unwrap().len(), 6 * MB);
    }

    #[test]
    fn attempts_never_exceed_max() {
        for max in 0..6u32 {
            let mut env = Env::new();
            env.options.max_attempts = Some(max);
            let tools = FakeToolchain::new(vec![Scripted::EncodeFails("nope".into()); 8]);
            let _ = env.convert(&tools, &LogSink::silent());
            // The ladder has two steps, so at most three attempts happen with fast-first.
            assert_eq!(tools.palette_calls(), max.min(3) as usize);
        }
    }

    #[test]
    fn zero_attempts_is_a_generic_failure() {
        let mut env = Env::new();
        env.options.max_attempts = Some(0);
        let tools = FakeToolchain::new(vec![]);
        let err = env.convert(&tools, &LogSink::silent()).unwrap_err();
        assert!(matches!(err, AppError::Conversion(msg) if msg == "Failed to encode GIF."));
    }

    #[test]
    fn without_fast_first_only_the_ladder_runs() {
        let mut env = Env::new();
        env.options.fast_first = Some(false);
        let tools = FakeToolchain::new(vec![Scripted::Writes(9 * MB), Scripted::Writes(8 * MB)]);
        let outcome = env.convert(&tools, &LogSink::silent()).unwrap();
        assert_eq!(tools.encode_calls(), 2);
        let predicted = predict(&Default::default(), 5.0).with_palette_sample_seconds(Some(6.0));
        assert_eq!(tools.configs(), fallback_ladder(&predicted));
        assert!(!outcome.met_budget);
    }

    #[test]
    fn missing_input_fails_before_any_attempt() {
        let mut env = Env::new();
        env.source = env.dir.path().join("missing.mp4");
        let tools = FakeToolchain::new(vec![Scripted::Writes(MB)]);
        let err = env.convert(&tools, &LogSink::silent()).unwrap_err();
        assert!(matches!(err, AppError::InputNotFound(_)));
        assert_eq!(tools.palette_calls(), 0);
    }

    #[test]
    fn unavailable_encoder_fails_before_any_attempt() {
        let env = Env::new();
        let tools = FakeToolchain::unavailable();
        let err = env.convert(&tools, &LogSink::silent()).unwrap_err();
        assert!(matches!(err, AppError::FfmpegNotFound(_)));
        assert!(err.is_fatal());
        assert_eq!(tools.palette_calls(), 0);
    }

    #[test]
    fn logs_before_and_after_each_attempt() {
        let env = Env::new();
        let tools = FakeToolchain::new(vec![Scripted::EncodeFails("bad".into()), Scripted::Writes(MB)]);
        let (sink, seen) = recording_sink();
        env.convert(&tools, &sink).unwrap();
        let seen = seen.lock();
        let relevant: Vec<&str> = seen
            .iter()
            .map(String::as_str)
            .filter(|l| {
                l.starts_with("Attempt")
                    || l.starts_with("Result size")
                    || l.starts_with("Success")
            })
            .collect();
        assert_eq!(relevant.len(), 5);
        assert!(relevant[0].starts_with("Attempt 1/3: width="));
        assert_eq!(relevant[1], "Attempt failed: GIF encoding failed: bad");
        assert!(relevant[2].starts_with("Attempt 2/3: "));
        assert_eq!(relevant[3], "Result size: 1.00 MB (limit 5.00 MB)");
        assert_eq!(relevant[4], "Success within size limit.");
    }
}
