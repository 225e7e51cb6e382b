use tracing::{debug, info, warn};

use super::frame::DataFrame;
use super::sample::{self, SampleFormat, Scaling};
use super::source::{FrameByteSource, FrameStream, SpawnRequest};
use crate::error::StreamResult;
use crate::index::FrameIndex;
use crate::memory::MemoryGuard;

/// Fixed decoding parameters of one stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderSettings {
    pub fps: f64,
    pub sample_format: SampleFormat,
    pub width: u32,
    pub height: u32,
    pub vertical_flip: bool,
}

/// Why the current frame sequence stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// All frames up to the end of the known range (or the stream) were delivered.
    Exhausted,
    /// The decoder produced no data at all after the last seek.
    EmptyStream,
    /// Host memory use crossed the guard threshold.
    MemoryPressure,
}

/// Owns the decoder for one stream and turns its output into rescaled frames.
///
/// At most one [`FrameStream`] is alive at any time: every seek terminates the previous
/// one before starting the next, and so does reaching the end of a sequence.
pub struct SeekableFrameDecoder {
    source: Box<dyn FrameByteSource>,
    stream: Option<Box<dyn FrameStream>>,
    locator: String,
    settings: DecoderSettings,
    memory_guard: Option<MemoryGuard>,
    /// Frame number of the next frame to deliver. Changed only by `seek` and `advance`.
    cursor: u32,
    /// Rescale bounds for the frame at `cursor`.
    scaling: Scaling,
    delivered: u32,
    end: Option<EndReason>,
    buf: Vec<u8>,
}

impl SeekableFrameDecoder {
    /// Create an idle decoder. Nothing is spawned until [`seek`](Self::seek).
    pub fn new(
        source: Box<dyn FrameByteSource>,
        locator: impl Into<String>,
        settings: DecoderSettings,
        memory_guard: Option<MemoryGuard>,
    ) -> Self {
        let frame_bytes = settings.sample_format.frame_bytes(settings.width, settings.height);
        Self {
            source,
            stream: None,
            locator: locator.into(),
            settings,
            memory_guard,
            cursor: 0,
            scaling: Scaling { min: 0.0, max: 1.0 },
            delivered: 0,
            end: None,
            buf: vec![0u8; frame_bytes],
        }
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Frames delivered since the last seek.
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    /// Restart decoding at `frame_number`, covering every frame through the end of the index.
    pub fn seek(&mut self, index: &FrameIndex, frame_number: u32) -> StreamResult<()> {
        let record = index.frame_at(frame_number)?;

        self.terminate();

        let request = SpawnRequest {
            locator: self.locator.clone(),
            seek_seconds: record.stream_position() as f64 / self.settings.fps,
            duration_seconds: index.remaining_from(frame_number) as f64 / self.settings.fps,
            sample_format: self.settings.sample_format,
        };
        debug!(frame_number, ?request, "seeking decoder");

        self.stream = Some(self.source.spawn(&request)?);
        self.cursor = frame_number;
        self.scaling = Scaling::from_record(record);
        self.delivered = 0;
        self.end = None;
        Ok(())
    }

    /// Decode the next frame, or None once the sequence has ended.
    pub fn next_frame(&mut self, index: &FrameIndex) -> StreamResult<Option<DataFrame>> {
        if self.end.is_some() || self.stream.is_none() {
            return Ok(None);
        }

        if let Some(guard) = &self.memory_guard {
            if let Some(ratio) = guard.exceeded() {
                warn!(
                    usage_percent = format!("{:.1}%", ratio * 100.0),
                    threshold_percent = format!("{:.1}%", guard.threshold() * 100.0),
                    delivered = self.delivered,
                    "memory usage too high, stopping early; frames already loaded remain valid"
                );
                self.finish(EndReason::MemoryPressure);
                return Ok(None);
            }
        }

        if !index.contains(self.cursor) {
            self.finish(EndReason::Exhausted);
            return Ok(None);
        }

        let read = match self.stream.as_mut() {
            Some(stream) => stream.read_frame(&mut self.buf)?,
            None => 0,
        };
        if read != self.buf.len() {
            if self.delivered == 0 {
                warn!(frame_number = self.cursor, "empty stream, no data found");
                self.finish(EndReason::EmptyStream);
            } else {
                self.finish(EndReason::Exhausted);
            }
            return Ok(None);
        }

        let record = index.frame_at(self.cursor)?;
        let mut values = sample::decode_samples(&self.buf, self.settings.sample_format, self.scaling);
        if self.settings.vertical_flip {
            sample::flip_vertical(
                &mut values,
                self.settings.width as usize,
                self.settings.height as usize,
            );
        }

        let frame = DataFrame {
            frame_number: record.frame_number,
            timestamp: record.timestamp,
            width: self.settings.width,
            height: self.settings.height,
            values,
            extra: record.extra.clone(),
        };
        debug!(
            frame_number = frame.frame_number,
            timestamp = %frame.timestamp,
            no_data = !self.scaling.is_finite(),
            "decoded frame"
        );

        self.delivered += 1;
        self.advance(index);
        Ok(Some(frame))
    }

    /// Move the cursor one frame on and load that frame's rescale bounds.
    fn advance(&mut self, index: &FrameIndex) {
        self.cursor += 1;
        if let Ok(next) = index.frame_at(self.cursor) {
            self.scaling = Scaling::from_record(next);
        }
    }

    fn finish(&mut self, reason: EndReason) {
        info!(?reason, delivered = self.delivered, "frame sequence ended");
        self.end = Some(reason);
        self.terminate();
    }

    /// Stop the running decode, if any.
    pub fn terminate(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.terminate();
        }
    }
}

impl Drop for SeekableFrameDecoder {
    fn drop(&mut self) {
        self.terminate();
    }
}
