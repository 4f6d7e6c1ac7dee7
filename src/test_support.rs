//! Scripted stand-in for the external toolchain, shared by unit and integration tests.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::AppError;
use crate::ffmpeg::ffprobe::SourceProbe;
use crate::gif::{EncodeConfig, EncodeRequest, Encoder, PaletteRequest, Prober};
use crate::log_sink::LogSink;

/// Outcome of one scripted attempt, consumed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    /// Both passes succeed and the encode writes an artifact of this many bytes.
    Writes(u64),
    /// Palette pass exits non-zero with this diagnostic.
    PaletteFails(String),
    /// Palette pass exits zero without writing the palette image.
    PaletteMissing,
    /// Palette pass succeeds, encode pass exits non-zero with this diagnostic.
    EncodeFails(String),
}

pub struct FakeToolchain {
    script: Mutex<VecDeque<Scripted>>,
    probe: SourceProbe,
    available: bool,
    palette_calls: AtomicUsize,
    encode_calls: AtomicUsize,
    configs: Mutex<Vec<EncodeConfig>>,
}

impl FakeToolchain {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self::with_probe(script, SourceProbe::default())
    }

    pub fn with_probe(script: Vec<Scripted>, probe: SourceProbe) -> Self {
        Self {
            script: Mutex::new(script.into()),
            probe,
            available: true,
            palette_calls: AtomicUsize::new(0),
            encode_calls: AtomicUsize::new(0),
            configs: Mutex::new(Vec::new()),
        }
    }

    /// Behaves like a machine without ffmpeg.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn palette_calls(&self) -> usize {
        self.palette_calls.load(Ordering::SeqCst)
    }

    pub fn encode_calls(&self) -> usize {
        self.encode_calls.load(Ordering::SeqCst)
    }

    /// Configurations passed to the palette pass, in call order.
    pub fn configs(&self) -> Vec<EncodeConfig> {
        self.configs.lock().clone()
    }

    fn front(&self) -> Option<Scripted> {
        self.script.lock().front().cloned()
    }

    fn pop(&self) -> Option<Scripted> {
        self.script.lock().pop_front()
    }
}

impl Encoder for FakeToolchain {
    fn ensure_available(&self) -> Result<(), AppError> {
        if self.available {
            Ok(())
        } else {
            Err(AppError::FfmpegNotFound("FFmpeg not found (fake)".to_string()))
        }
    }

    fn generate_palette(
        &self,
        request: &PaletteRequest<'_>,
        _sink: &LogSink,
    ) -> Result<String, AppError> {
        self.palette_calls.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().push(*request.config);
        match self.front() {
            Some(Scripted::PaletteFails(msg)) => {
                self.pop();
                Err(AppError::ffmpeg_failed(1, msg))
            }
            Some(Scripted::PaletteMissing) => {
                self.pop();
                Ok(String::new())
            }
            Some(_) => {
                fs::write(request.palette_path, b"\x89PNG fake palette")?;
                Ok(String::new())
            }
            None => Err(AppError::ffmpeg_failed(1, "no scripted outcome left")),
        }
    }

    fn apply_palette(
        &self,
        request: &EncodeRequest<'_>,
        _sink: &LogSink,
    ) -> Result<String, AppError> {
        self.encode_calls.fetch_add(1, Ordering::SeqCst);
        if !request.palette_path.is_file() {
            return Err(AppError::ffmpeg_failed(1, "palette missing"));
        }
        match self.pop() {
            Some(Scripted::Writes(bytes)) => {
                write_sized(request.output_path, bytes)?;
                Ok(String::new())
            }
            Some(Scripted::EncodeFails(msg)) => Err(AppError::ffmpeg_failed(1, msg)),
            _ => Err(AppError::ffmpeg_failed(1, "no scripted outcome left")),
        }
    }
}

impl Prober for FakeToolchain {
    fn probe(&self, _source: &Path) -> SourceProbe {
        self.probe
    }
}

fn write_sized(path: &Path, bytes: u64) -> std::io::Result<()> {
    let file = fs::File::create(path)?;
    file.set_len(bytes)
}
