use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Prefix for attempt working directories; also what the stale sweep matches on.
pub const WORKDIR_PREFIX: &str = "tiny-gif-";

/// Private working directory for one encode attempt. Removed on drop, on every exit path.
pub struct AttemptWorkspace {
    dir: tempfile::TempDir,
}

impl AttemptWorkspace {
    /// Create under `root`, or the OS temp dir when `root` is None.
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKDIR_PREFIX);
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        log::trace!(
            target: "tiny_gif::ffmpeg::temp",
            "Created attempt workspace {}",
            dir.path().display()
        );
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn palette_path(&self) -> PathBuf {
        self.dir.path().join("palette.png")
    }

    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.dir.path().join(format!("output.{}", extension))
    }

    /// Remove now and report failures; dropping removes silently.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Remove attempt workspaces older than `max_age` under `root` (OS temp dir when None).
/// Only a crashed process leaves these behind. Returns how many were removed.
pub fn cleanup_old_temp_dirs(root: Option<&Path>, max_age: Duration) -> usize {
    let root = root.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!(
                target: "tiny_gif::ffmpeg::temp",
                "Skipping stale workspace sweep of {}: {}",
                root.display(),
                e
            );
            return 0;
        }
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(WORKDIR_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age > max_age && fs::remove_dir_all(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!(
            target: "tiny_gif::ffmpeg::temp",
            "Removed {} stale attempt workspace(s) from {}",
            removed,
            root.display()
        );
    }
    removed
}

/// Move `source` over `dest`. `dest` is either left untouched or fully replaced.
pub fn move_file_replacing(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_rename_error(&e) => copy_replacing(source, dest),
        Err(e) => Err(e),
    }
}

/// Cross-filesystem move: stage a copy next to `dest`, then rename it into place.
/// Once `dest` holds the new bytes, failing to remove `source` is only logged.
fn copy_replacing(source: &Path, dest: &Path) -> io::Result<()> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staged = tempfile::Builder::new()
        .prefix(".tiny-gif-promote-")
        .tempfile_in(dir)?;
    fs::copy(source, staged.path())?;
    staged.persist(dest).map_err(|e| e.error)?;
    if let Err(e) = fs::remove_file(source) {
        log::warn!(
            target: "tiny_gif::ffmpeg::temp",
            "Promoted {} but could not remove {}: {}",
            dest.display(),
            source.display(),
            e
        );
    }
    Ok(())
}

fn is_cross_device_rename_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}
