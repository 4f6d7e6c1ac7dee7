//! Single-shot still image conversions to PNG. No size budget, no retries.

use std::path::Path;

use image::{ImageFormat, ImageReader};

use crate::error::AppError;
use crate::log_sink::LogSink;

/// Decode the largest image in an ICO container and write it as PNG.
pub fn convert_ico_to_png(source: &Path, destination: &Path, sink: &LogSink) -> Result<(), AppError> {
    convert_to_png(source, destination, ImageFormat::Ico, sink)
}

/// Decode a WEBP (first frame when animated) and write it as PNG.
pub fn convert_webp_to_png(source: &Path, destination: &Path, sink: &LogSink) -> Result<(), AppError> {
    convert_to_png(source, destination, ImageFormat::WebP, sink)
}

fn convert_to_png(
    source: &Path,
    destination: &Path,
    format: ImageFormat,
    sink: &LogSink,
) -> Result<(), AppError> {
    if !source.is_file() {
        return Err(AppError::InputNotFound(source.to_path_buf()));
    }
    // The ICO decoder already selects the highest resolution entry.
    let mut reader = ImageReader::open(source)?;
    reader.set_format(format);
    let image = reader.decode()?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    image.save_with_format(destination, ImageFormat::Png)?;
    sink.log(&format!(
        "Saved PNG ({}x{}): {}",
        image.width(),
        image.height(),
        destination.display()
    ));
    Ok(())
}
