//! Job orchestrator: run one conversion mode over a list of files on a background worker.
//!
//! Files run strictly in order, one at a time. Cancellation is cooperative and only
//! observed between files; a conversion already in flight always finishes. A failed file
//! is logged and the batch moves on.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ffmpeg::FfmpegProgressPayload;
use crate::gif::{Encoder, FfmpegToolchain, GifOptions, Prober, convert_to_gif, format_mb};
use crate::log_sink::LogSink;
use crate::raster::{convert_ico_to_png, convert_webp_to_png};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionMode {
    Mp4ToGif,
    MovToGif,
    WebpToPng,
    IcoToPng,
}

impl ConversionMode {
    pub const ALL: [ConversionMode; 4] = [
        ConversionMode::Mp4ToGif,
        ConversionMode::MovToGif,
        ConversionMode::WebpToPng,
        ConversionMode::IcoToPng,
    ];

    /// Lowercase extension, without the dot, that inputs must carry.
    pub fn input_extension(self) -> &'static str {
        match self {
            ConversionMode::Mp4ToGif => "mp4",
            ConversionMode::MovToGif => "mov",
            ConversionMode::WebpToPng => "webp",
            ConversionMode::IcoToPng => "ico",
        }
    }

    pub fn output_extension(self) -> &'static str {
        if self.needs_ffmpeg() { "gif" } else { "png" }
    }

    pub fn needs_ffmpeg(self) -> bool {
        matches!(self, ConversionMode::Mp4ToGif | ConversionMode::MovToGif)
    }

    pub fn label(self) -> &'static str {
        match self {
            ConversionMode::Mp4ToGif => "MP4 -> GIF",
            ConversionMode::MovToGif => "MOV -> GIF",
            ConversionMode::WebpToPng => "WEBP -> PNG",
            ConversionMode::IcoToPng => "ICO -> PNG",
        }
    }

    pub fn accepts(self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(self.input_extension()))
    }
}

/// Converts one file. Implementations log through the sink and never retry across calls.
pub trait FileConverter: Send + Sync {
    fn output_extension(&self) -> &str;

    fn convert_file(&self, source: &Path, destination: &Path, sink: &LogSink) -> Result<(), AppError>;
}

/// Video to size-constrained GIF through the retry controller.
pub struct GifConverter<T> {
    tools: T,
    options: GifOptions,
}

impl<T> GifConverter<T> {
    pub fn new(tools: T, options: GifOptions) -> Self {
        Self { tools, options }
    }
}

impl<T: Encoder + Prober + Send + Sync> FileConverter for GifConverter<T> {
    fn output_extension(&self) -> &str {
        "gif"
    }

    fn convert_file(&self, source: &Path, destination: &Path, sink: &LogSink) -> Result<(), AppError> {
        let outcome = convert_to_gif(&self.tools, source, destination, &self.options, sink)?;
        log::info!(
            target: "tiny_gif::batch",
            "{} -> {} ({} MB, {} attempt(s), within budget: {})",
            source.display(),
            outcome.destination_path.display(),
            format_mb(outcome.final_size_bytes),
            outcome.attempts.len(),
            outcome.met_budget
        );
        Ok(())
    }
}

/// Still image to PNG.
pub struct RasterConverter {
    mode: ConversionMode,
}

impl RasterConverter {
    pub fn new(mode: ConversionMode) -> Self {
        Self { mode }
    }
}

impl FileConverter for RasterConverter {
    fn output_extension(&self) -> &str {
        "png"
    }

    fn convert_file(&self, source: &Path, destination: &Path, sink: &LogSink) -> Result<(), AppError> {
        match self.mode {
            ConversionMode::IcoToPng => convert_ico_to_png(source, destination, sink),
            ConversionMode::WebpToPng => convert_webp_to_png(source, destination, sink),
            other => Err(AppError::Conversion(format!(
                "{} is not a still image conversion",
                other.label()
            ))),
        }
    }
}

/// Production converter for `mode`, resolving ffmpeg when the mode needs it.
pub fn converter_for(mode: ConversionMode, options: GifOptions) -> Box<dyn FileConverter> {
    if mode.needs_ffmpeg() {
        Box::new(GifConverter::new(FfmpegToolchain::discover(), options))
    } else {
        Box::new(RasterConverter::new(mode))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub mode: ConversionMode,
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub options: GifOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub total: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn status_line(&self) -> String {
        let verb = if self.cancelled { "Cancelled" } else { "Finished" };
        format!("{}. {}/{} completed", verb, self.succeeded, self.total)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Log(String),
    /// Per-pass progress of the file currently converting.
    Step(FfmpegProgressPayload),
    Progress {
        completed: usize,
        total: usize,
        current: PathBuf,
    },
    Finished(BatchSummary),
}

pub type BatchEmitter = Arc<dyn Fn(BatchEvent) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Inputs whose extension matches `mode`, in order, plus how many were skipped.
pub fn select_inputs(mode: ConversionMode, inputs: &[PathBuf]) -> (Vec<PathBuf>, usize) {
    let selected: Vec<PathBuf> = inputs.iter().filter(|p| mode.accepts(p)).cloned().collect();
    let skipped = inputs.len() - selected.len();
    (selected, skipped)
}

/// `<output_dir>/<source stem>.<extension>`.
pub fn destination_for(source: &Path, output_dir: &Path, extension: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{}.{}", stem, extension))
}

/// Filter inputs and create the output directory. Both failures abort the whole batch.
/// Returns the files to convert and how many inputs were skipped.
pub fn prepare_job(job: &BatchJob) -> Result<(Vec<PathBuf>, usize), AppError> {
    let (files, skipped) = select_inputs(job.mode, &job.inputs);
    if skipped > 0 {
        log::info!(
            target: "tiny_gif::batch",
            "Skipping {} file(s) that do not match {}",
            skipped,
            job.mode.label()
        );
    }
    if files.is_empty() {
        return Err(AppError::Conversion(format!(
            "No files match the selected type: {}.",
            job.mode.label()
        )));
    }
    fs::create_dir_all(&job.output_dir)?;
    Ok((files, skipped))
}

/// Convert `files` in order until done or cancelled.
pub fn run_batch(
    files: &[PathBuf],
    output_dir: &Path,
    converter: &dyn FileConverter,
    cancel: &CancelFlag,
    emit: BatchEmitter,
) -> BatchSummary {
    let total = files.len();
    let mut summary = BatchSummary {
        attempted: 0,
        succeeded: 0,
        total,
        cancelled: false,
    };

    let log_emit = Arc::clone(&emit);
    let step_emit = Arc::clone(&emit);
    let sink = LogSink::new(Arc::new(move |line: &str| log_emit(BatchEvent::Log(line.to_string()))))
        .with_progress(Arc::new(move |payload: FfmpegProgressPayload| step_emit(BatchEvent::Step(payload))));

    for (idx, source) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        summary.attempted += 1;
        let destination = destination_for(source, output_dir, converter.output_extension());
        sink.log(&format!(
            "Converting: {} -> {}",
            source.display(),
            destination.display()
        ));
        match converter.convert_file(source, &destination, &sink) {
            Ok(()) => {
                summary.succeeded += 1;
                sink.log(&format!("Done: {}", destination.display()));
            }
            Err(e) => {
                log::warn!(target: "tiny_gif::batch", "{}: {}", source.display(), e);
                sink.log(&format!("Error: {}", e));
            }
        }
        emit(BatchEvent::Progress {
            completed: idx + 1,
            total,
            current: source.clone(),
        });
    }

    summary.cancelled = cancel.is_cancelled();
    sink.log(&summary.status_line());
    summary
}

/// A batch running on its worker thread.
pub struct BatchHandle {
    cancel: CancelFlag,
    events: Receiver<BatchEvent>,
    worker: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Stop before the next file. The file in flight still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn events(&self) -> &Receiver<BatchEvent> {
        &self.events
    }

    pub fn join(self) -> Result<BatchSummary, AppError> {
        self.worker
            .join()
            .map_err(|_| AppError::Conversion("Batch worker panicked".to_string()))
    }
}

/// Validate `job` and start it on a dedicated worker thread.
pub fn spawn_batch(job: BatchJob, converter: Box<dyn FileConverter>) -> Result<BatchHandle, AppError> {
    let (files, skipped) = prepare_job(&job)?;
    let cancel = CancelFlag::new();
    let (tx, rx) = mpsc::channel();
    if skipped > 0 {
        let _ = tx.send(BatchEvent::Log(format!(
            "Skipped {} file(s) not matching {}",
            skipped,
            job.mode.label()
        )));
    }

    let worker_cancel = cancel.clone();
    let worker = thread::Builder::new()
        .name("tiny-gif-batch".to_string())
        .spawn(move || {
            let emit: BatchEmitter = Arc::new(move |event: BatchEvent| {
                let _ = tx.send(event);
            });
            let summary = run_batch(
                &files,
                &job.output_dir,
                converter.as_ref(),
                &worker_cancel,
                Arc::clone(&emit),
            );
            emit(BatchEvent::Finished(summary));
            summary
        })?;

    Ok(BatchHandle {
        cancel,
        events: rx,
        worker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeToolchain, Scripted};
    use parking_lot::Mutex;

    /// Records calls and fails on the listed file names.
    struct ScriptedConverter {
        fail_on: Vec<&'static str>,
        cancel_after: Option<(usize, CancelFlag)>,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedConverter {
        fn new() -> Self {
            Self {
                fail_on: Vec::new(),
                cancel_after: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl FileConverter for ScriptedConverter {
        fn output_extension(&self) -> &str {
            "gif"
        }

        fn convert_file(&self, source: &Path, destination: &Path, _sink: &LogSink) -> Result<(), AppError> {
            let mut calls = self.calls.lock();
            calls.push(source.to_path_buf());
            if let Some((k, flag)) = &self.cancel_after
                && calls.len() == *k
            {
                flag.cancel();
            }
            let name = source.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if self.fail_on.contains(&name) {
                return Err(AppError::Conversion(format!("could not convert {}", name)));
            }
            fs::write(destination, b"gif")?;
            Ok(())
        }
    }

    fn collector() -> (BatchEmitter, Arc<Mutex<Vec<BatchEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        (Arc::new(move |e: BatchEvent| sink_events.lock().push(e)), events)
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn logs(events: &[BatchEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Log(l) => Some(l.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn modes_map_extensions() {
        assert_eq!(ConversionMode::MovToGif.input_extension(), "mov");
        assert_eq!(ConversionMode::MovToGif.output_extension(), "gif");
        assert_eq!(ConversionMode::IcoToPng.output_extension(), "png");
        assert!(ConversionMode::Mp4ToGif.accepts(Path::new("/a/Clip.MP4")));
        assert!(!ConversionMode::Mp4ToGif.accepts(Path::new("/a/clip.mov")));
        assert!(!ConversionMode::WebpToPng.accepts(Path::new("/a/webp")));
        let mode: ConversionMode = serde_json::from_str("\"webp-to-png\"").unwrap();
        assert_eq!(mode, ConversionMode::WebpToPng);
    }

    #[test]
    fn select_inputs_keeps_order_and_counts_skips() {
        let inputs = paths(&["b.mp4", "notes.txt", "a.MP4", "c.mov"]);
        let (selected, skipped) = select_inputs(ConversionMode::Mp4ToGif, &inputs);
        assert_eq!(selected, paths(&["b.mp4", "a.MP4"]));
        assert_eq!(skipped, 2);
    }

    #[test]
    fn destination_uses_stem_and_target_extension() {
        assert_eq!(
            destination_for(Path::new("/in/holiday.clip.mov"), Path::new("/out"), "gif"),
            PathBuf::from("/out/holiday.clip.gif")
        );
    }

    #[test]
    fn failures_do_not_abort_the_batch() {
        let out = tempfile::tempdir().unwrap();
        let mut converter = ScriptedConverter::new();
        converter.fail_on = vec!["two.mp4"];
        let (emit, events) = collector();
        let files = paths(&["one.mp4", "two.mp4", "three.mp4"]);

        let summary = run_batch(&files, out.path(), &converter, &CancelFlag::new(), emit);

        assert_eq!(
            summary,
            BatchSummary {
                attempted: 3,
                succeeded: 2,
                total: 3,
                cancelled: false
            }
        );
        assert_eq!(converter.calls.lock().len(), 3);
        let logs = logs(&events.lock());
        assert!(logs.iter().any(|l| l == "Error: could not convert two.mp4"));
        assert_eq!(logs.last().map(String::as_str), Some("Finished. 2/3 completed"));
    }

    #[test]
    fn cancel_after_k_files_processes_exactly_k() {
        let out = tempfile::tempdir().unwrap();
        let cancel = CancelFlag::new();
        let mut converter = ScriptedConverter::new();
        converter.cancel_after = Some((2, cancel.clone()));
        let (emit, events) = collector();
        let files = paths(&["1.mp4", "2.mp4", "3.mp4", "4.mp4", "5.mp4"]);

        let summary = run_batch(&files, out.path(), &converter, &cancel, emit);

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.succeeded, 2);
        assert!(summary.cancelled);
        assert_eq!(*converter.calls.lock(), paths(&["1.mp4", "2.mp4"]));
        assert_eq!(
            logs(&events.lock()).last().map(String::as_str),
            Some("Cancelled. 2/5 completed")
        );
    }

    #[test]
    fn progress_follows_each_file() {
        let out = tempfile::tempdir().unwrap();
        let converter = ScriptedConverter::new();
        let (emit, events) = collector();
        let files = paths(&["a.mp4", "b.mp4"]);
        run_batch(&files, out.path(), &converter, &CancelFlag::new(), emit);

        let progress: Vec<(usize, usize)> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { completed, total, .. } => Some((*completed, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn gif_converter_drives_the_controller() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        fs::write(&source, b"video").unwrap();
        let options = GifOptions {
            temp_root: Some(dir.path().join("work")),
            ..Default::default()
        };
        let converter = GifConverter::new(FakeToolchain::new(vec![Scripted::Writes(4096)]), options);
        let (emit, events) = collector();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();

        let summary = run_batch(&[source], &out, &converter, &CancelFlag::new(), emit);

        assert_eq!(summary.succeeded, 1);
        assert_eq!(fs::metadata(out.join("clip.gif")).unwrap().len(), 4096);
        assert!(logs(&events.lock()).iter().any(|l| l == "Success within size limit."));
    }

    #[test]
    fn prepare_rejects_batches_with_no_matching_files() {
        let out = tempfile::tempdir().unwrap();
        let job = BatchJob {
            mode: ConversionMode::IcoToPng,
            inputs: paths(&["a.png", "b.webp"]),
            output_dir: out.path().join("pngs"),
            options: GifOptions::default(),
        };
        let err = prepare_job(&job).unwrap_err();
        assert_eq!(err.to_string(), "No files match the selected type: ICO -> PNG.");
        assert!(!job.output_dir.exists());
    }

    #[test]
    fn spawned_batch_streams_events_and_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let job: BatchJob = serde_json::from_value(serde_json::json!({
            "mode": "mp4-to-gif",
            "inputs": ["one.mp4", "skip.txt", "two.mp4"],
            "outputDir": dir.path().join("gifs"),
        }))
        .unwrap();
        let handle = spawn_batch(job, Box::new(ScriptedConverter::new())).unwrap();

        let events: Vec<BatchEvent> = handle.events().iter().collect();
        let summary = handle.join().unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(
            events.first(),
            Some(&BatchEvent::Log("Skipped 1 file(s) not matching MP4 -> GIF".to_string()))
        );
        assert_eq!(events.last(), Some(&BatchEvent::Finished(summary)));
        assert!(dir.path().join("gifs").join("one.gif").is_file());
    }
}
