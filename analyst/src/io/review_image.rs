//! Size-bounded re-encoding of rendered charts for evaluation.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

/// Fully decode the chart at `path`, returning its dimensions.
pub fn check_chart(path: &Path) -> Result<(u32, u32)> {
    let img = image::open(path).with_context(|| format!("decode chart {}", path.display()))?;
    Ok((img.width(), img.height()))
}

/// Re-encode `src` as an RGB JPEG at `dest` whose longest edge is at most `max_edge`.
///
/// Smaller images are never upscaled. Returns the written dimensions.
pub fn write_review_image(src: &Path, dest: &Path, max_edge: u32, quality: u8) -> Result<(u32, u32)> {
    let img = image::open(src).with_context(|| format!("decode chart {}", src.display()))?;
    let img = if img.width() > max_edge || img.height() > max_edge {
        img.thumbnail(max_edge, max_edge)
    } else {
        img
    };
    let rgb = img.to_rgb8();

    let file = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
    let mut writer = BufWriter::new(file);
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
        .with_context(|| format!("encode {}", dest.display()))?;

    debug!(
        width = rgb.width(),
        height = rgb.height(),
        quality,
        "wrote review image"
    );
    Ok((rgb.width(), rgb.height()))
}
