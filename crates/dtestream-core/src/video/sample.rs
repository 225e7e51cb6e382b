use crate::metadata::FrameRecord;

/// Largest raw value of a 12-bit sample.
const GRAY12_MAX: f64 = 4095.0;

/// Value written into every sample of a frame without data.
pub const NO_DATA: f32 = f32::INFINITY;

/// Raw sample layout the decoder is asked to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 12-bit samples in little-endian u16 words, normalized by 4095.
    Gray12,
    /// Little-endian f32 samples, already normalized to [0, 1].
    GrayF32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Gray12 => 2,
            SampleFormat::GrayF32 => 4,
        }
    }

    pub fn frame_bytes(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_sample()
    }

    /// ffmpeg `-pix_fmt` name for this layout.
    pub fn pix_fmt(self) -> &'static str {
        match self {
            SampleFormat::Gray12 => "gray12le",
            SampleFormat::GrayF32 => "grayf32le",
        }
    }
}

/// Affine mapping from normalized samples to physical values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub min: f64,
    pub max: f64,
}

impl Scaling {
    pub fn from_record(record: &FrameRecord) -> Self {
        Self {
            min: record.min_value,
            max: record.max_value,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    pub fn apply(&self, normalized: f64) -> f32 {
        (normalized * (self.max - self.min) + self.min) as f32
    }
}

/// Decode one raw frame buffer into physical values, row-major.
///
/// Non-finite scaling yields a frame of [`NO_DATA`] regardless of the buffer.
pub fn decode_samples(buf: &[u8], format: SampleFormat, scaling: Scaling) -> Vec<f32> {
    let len = buf.len() / format.bytes_per_sample();
    if !scaling.is_finite() {
        return vec![NO_DATA; len];
    }

    match format {
        SampleFormat::Gray12 => buf
            .chunks_exact(2)
            .map(|b| scaling.apply(u16::from_le_bytes([b[0], b[1]]) as f64 / GRAY12_MAX))
            .collect(),
        SampleFormat::GrayF32 => buf
            .chunks_exact(4)
            .map(|b| scaling.apply(f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64))
            .collect(),
    }
}

/// Reverse the row order of a row-major `width` x `height` frame in place.
pub fn flip_vertical(values: &mut [f32], width: usize, height: usize) {
    debug_assert_eq!(values.len(), width * height);
    for row in 0..height / 2 {
        let (top, bottom) = values.split_at_mut((height - 1 - row) * width);
        top[row * width..(row + 1) * width].swap_with_slice(&mut bottom[..width]);
    }
}
