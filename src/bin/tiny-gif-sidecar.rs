use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tiny_gif_core::batch::{BatchJob, CancelFlag};
use tiny_gif_core::error::AppError;
use tiny_gif_core::ffmpeg::FfmpegErrorPayload;
use tiny_gif_core::sidecar_api;

const STARTUP_CLEANUP_MAX_AGE_HOURS: u64 = 24;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: FfmpegErrorPayload,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent<'a> {
    event: &'a str,
    payload: Value,
}

#[derive(Debug, Clone)]
struct ActiveJob {
    job_id: u64,
    cancel_requested: bool,
    cancel: Option<CancelFlag>,
}

#[derive(Clone)]
struct JobState {
    active_job: Arc<Mutex<Option<ActiveJob>>>,
    next_job_id: Arc<AtomicU64>,
}

impl JobState {
    fn new() -> Self {
        Self {
            active_job: Arc::new(Mutex::new(None)),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_job(&self) -> Result<u64, AppError> {
        let mut guard = self.active_job.lock();
        if let Some(existing) = guard.as_ref() {
            return Err(AppError::from(format!(
                "Another batch is already running (jobId={})",
                existing.job_id
            )));
        }
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        *guard = Some(ActiveJob {
            job_id,
            cancel_requested: false,
            cancel: None,
        });
        Ok(job_id)
    }

    /// Attach the running batch's cancel flag. A cancel that arrived first is applied now.
    fn attach_cancel(&self, job_id: u64, flag: CancelFlag) {
        let mut guard = self.active_job.lock();
        if let Some(active) = guard.as_mut()
            && active.job_id == job_id
        {
            if active.cancel_requested {
                flag.cancel();
            }
            active.cancel = Some(flag);
        }
    }

    fn request_cancel(&self, job_id: Option<u64>) -> Result<Value, AppError> {
        let mut guard = self.active_job.lock();
        match (guard.as_mut(), job_id) {
            (None, Some(job_id)) => Err(AppError::from(format!("Unknown jobId: {}", job_id))),
            (None, None) => Ok(json!({ "cancelled": false, "jobId": Value::Null })),
            (Some(active), Some(job_id)) if active.job_id != job_id => {
                Err(AppError::from(format!("Unknown jobId: {}", job_id)))
            }
            (Some(active), _) => {
                active.cancel_requested = true;
                if let Some(flag) = &active.cancel {
                    flag.cancel();
                }
                log::info!(target: "tiny_gif::sidecar", "Cancel requested for job {}", active.job_id);
                Ok(json!({ "cancelled": true, "jobId": active.job_id }))
            }
        }
    }

    fn finish_job(&self, job_id: u64) {
        let mut guard = self.active_job.lock();
        if guard.as_ref().is_some_and(|active| active.job_id == job_id) {
            *guard = None;
        }
    }
}

struct ActiveJobGuard {
    state: JobState,
    job_id: u64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.state.finish_job(self.job_id);
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BatchCancelParams {
    job_id: Option<u64>,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let _ = write_json_line_shared(writer, &RpcEvent { event, payload });
}

fn write_result(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(err) => write_json_line_shared(
            writer,
            &RpcFailure {
                id,
                error: sidecar_api::error_payload(&err),
            },
        ),
    };
    if let Err(err) = written {
        log::error!(target: "tiny_gif::sidecar", "Failed to write response {}: {}", id, err);
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::from(format!("Invalid params payload: {}", e)))
}

fn to_json<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn dispatch_sync(method: &str, params: Value, jobs: &JobState) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_json(sidecar_api::app_capabilities(), "app capabilities"),
        "batch.cancel" => {
            let parsed: BatchCancelParams = params_from_value(params)?;
            jobs.request_cancel(parsed.job_id)
        }
        "batch.start" => Err(AppError::from("batch.start requires async execution")),
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

fn run_batch_request(params: Value, writer: &SharedWriter, jobs: &JobState) -> Result<Value, AppError> {
    let job: BatchJob = params_from_value(params)?;
    let job_id = jobs.begin_job()?;
    let _job_guard = ActiveJobGuard {
        state: jobs.clone(),
        job_id,
    };

    let outcome = sidecar_api::start_batch(job).and_then(|handle| {
        jobs.attach_cancel(job_id, handle.cancel_flag());
        for event in handle.events().iter() {
            let (name, payload) = sidecar_api::batch_event_message(job_id, &event);
            emit_rpc_event(writer, name, payload);
        }
        handle.join()
    });

    match outcome {
        Ok(summary) => Ok(json!({ "jobId": job_id, "summary": summary })),
        Err(err) => {
            let payload = sidecar_api::error_payload(&err);
            emit_rpc_event(
                writer,
                "batch.error",
                json!({ "jobId": job_id, "summary": payload.summary, "detail": payload.detail }),
            );
            Err(err)
        }
    }
}

/// Join workers whose batch already finished so handles don't pile up over a long session.
fn reap_finished(workers: &mut Vec<thread::JoinHandle<()>>) {
    let (done, running): (Vec<_>, Vec<_>) = workers.drain(..).partition(|w| w.is_finished());
    for worker in done {
        if worker.join().is_err() {
            log::error!(target: "tiny_gif::sidecar", "Batch worker panicked");
        }
    }
    *workers = running;
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    sidecar_api::cleanup_startup_temp(
        None,
        Duration::from_secs(STARTUP_CLEANUP_MAX_AGE_HOURS * 3600),
    );

    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let jobs = JobState::new();
    let mut async_workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: FfmpegErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: FfmpegErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        reap_finished(&mut async_workers);
        if request.method == "batch.start" {
            let writer = Arc::clone(&stdout);
            let job_state = jobs.clone();
            let worker = thread::spawn(move || {
                let result = run_batch_request(request.params, &writer, &job_state);
                write_result(&writer, request.id, result);
            });
            async_workers.push(worker);
        } else {
            let result = dispatch_sync(&request.method, request.params, &jobs);
            write_result(&stdout, request.id, result);
        }
    }

    for worker in async_workers {
        let _ = worker.join();
    }
    Ok(())
}
