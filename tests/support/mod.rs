#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = tiny_gif_core::ffmpeg::discovery::get_ffmpeg_path()
            .expect("FFmpeg not found")
            .to_path_buf();
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Work directory for attempt workspaces, so tests can assert it ends up empty.
    pub fn work_root(&self) -> PathBuf {
        self.path("work")
    }

    pub fn work_root_is_empty(&self) -> bool {
        let root = self.work_root();
        !root.exists() || fs::read_dir(root).expect("read work root").next().is_none()
    }

    pub fn with_test_video(&self, input_name: &str, duration_secs: f32, size: &str) -> PathBuf {
        let output_path = self.path(input_name);
        let status = create_test_video(&self.ffmpeg, &output_path, duration_secs, size)
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}

/// Synthetic clip from the lavfi test source, encoded with ffmpeg's built-in MPEG-4 encoder.
pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    size: &str,
) -> std::io::Result<ExitStatus> {
    Command::new(ffmpeg)
        .args([
            "-loglevel",
            "error",
            "-y",
            "-f",
            "lavfi",
            "-i",
            &format!("testsrc=duration={}:size={}:rate=30", duration_secs, size),
            "-c:v",
            "mpeg4",
            "-q:v",
            "5",
            "-pix_fmt",
            "yuv420p",
            output_path.to_string_lossy().as_ref(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

/// GIF files start with a fixed signature.
pub fn assert_is_gif(path: &Path) {
    let bytes = fs::read(path).expect("read gif");
    assert!(bytes.len() > 6, "gif is too small: {} bytes", bytes.len());
    assert!(
        bytes.starts_with(b"GIF89a") || bytes.starts_with(b"GIF87a"),
        "{} does not carry a GIF signature",
        path.display()
    );
}
