use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use tracing::debug;

use crate::video::DataFrame;

/// Map a frame's finite values linearly onto 0..=255. No-data samples become black.
pub fn render_gray(frame: &DataFrame) -> GrayImage {
    let (lo, hi) = frame.finite_range().unwrap_or((0.0, 0.0));
    let span = hi - lo;

    GrayImage::from_fn(frame.width, frame.height, |x, y| {
        let v = frame.get(y, x).unwrap_or(f32::NAN);
        if !v.is_finite() {
            return Luma([0]);
        }
        let level = if span > 0.0 { (v - lo) / span * 255.0 } else { 127.0 };
        Luma([level.round().clamp(0.0, 255.0) as u8])
    })
}

/// Write `frame` as `frame_<number>.png` under `dir`.
pub fn save_frame_png(frame: &DataFrame, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!("frame_{:08}.png", frame.frame_number));
    render_gray(frame)
        .save(&path)
        .with_context(|| format!("failed to save frame preview to {}", path.display()))?;

    debug!(?path, frame_number = frame.frame_number, "saved frame preview");
    Ok(path)
}
