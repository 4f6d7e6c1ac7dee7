//! Argument lists for the two GIF passes.
//!
//! Pass 1 derives a palette from the actual frame content; pass 2 re-renders the
//! frames against that palette with error-diffusion dithering. Both passes use the
//! same sampling-rate + Lanczos scale chain so the palette matches what is encoded.

use crate::gif::EncodeConfig;

/// Error diffusion ("Sierra two-row, 4-pixel"); holds up well below 128 colors.
pub const DITHER_MODE: &str = "sierra2_4a";

/// Shared prefix: quiet logs, machine-readable progress on stdout, overwrite outputs.
fn common_prefix() -> Vec<String> {
    [
        "-hide_banner",
        "-nostdin",
        "-v",
        "error",
        "-progress",
        "pipe:1",
        "-y",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn scale_chain(config: &EncodeConfig) -> String {
    format!(
        "fps={},scale={}:-1:flags=lanczos",
        config.sampling_fps(),
        config.frame_width()
    )
}

pub fn palette_filter(config: &EncodeConfig) -> String {
    format!(
        "{},palettegen=stats_mode=full:reserve_transparent=0:max_colors={}",
        scale_chain(config),
        config.max_colors()
    )
}

pub fn encode_filter_complex(config: &EncodeConfig) -> String {
    format!(
        "{}[x];[x][1:v]paletteuse=new=1:dither={}",
        scale_chain(config),
        DITHER_MODE
    )
}

pub fn build_palette_args(input_path: &str, palette_path: &str, config: &EncodeConfig) -> Vec<String> {
    let mut args = common_prefix();
    if let Some(seconds) = config.palette_sample_seconds() {
        args.push("-t".to_string());
        args.push(seconds.to_string());
    }
    args.extend([
        "-i".to_string(),
        input_path.to_string(),
        "-vf".to_string(),
        palette_filter(config),
        palette_path.to_string(),
    ]);
    log::debug!(
        target: "tiny_gif::ffmpeg::builder",
        "Palette pass: {} -> {}",
        config,
        palette_path
    );
    args
}

pub fn build_encode_args(
    input_path: &str,
    palette_path: &str,
    output_path: &str,
    config: &EncodeConfig,
) -> Vec<String> {
    let mut args = common_prefix();
    args.extend([
        "-i".to_string(),
        input_path.to_string(),
        "-i".to_string(),
        palette_path.to_string(),
        "-filter_complex".to_string(),
        encode_filter_complex(config),
        // Full frames only; offsetting saves little and breaks some web decoders.
        "-gifflags".to_string(),
        "-offsetting".to_string(),
        "-loop".to_string(),
        "0".to_string(),
        output_path.to_string(),
    ]);
    log::debug!(
        target: "tiny_gif::ffmpeg::builder",
        "Encode pass: {} -> {}",
        config,
        output_path
    );
    args
}
