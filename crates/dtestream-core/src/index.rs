use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::{StreamError, StreamResult};
use crate::metadata::FrameRecord;

/// Frame records of one stream, addressable by frame number and by time.
///
/// Frame numbers are contiguous starting at the first record's number; timestamps are
/// non-decreasing. Neither is re-validated here.
#[derive(Debug, Clone)]
pub struct FrameIndex {
    frames: Vec<FrameRecord>,
}

impl FrameIndex {
    pub fn new(frames: Vec<FrameRecord>) -> StreamResult<Self> {
        if frames.is_empty() {
            return Err(StreamError::NotFound("no frames in stream".to_string()));
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn first(&self) -> &FrameRecord {
        &self.frames[0]
    }

    pub fn last(&self) -> &FrameRecord {
        &self.frames[self.frames.len() - 1]
    }

    pub fn first_frame_number(&self) -> u32 {
        self.first().frame_number
    }

    pub fn last_frame_number(&self) -> u32 {
        self.first_frame_number() + (self.frames.len() as u32 - 1)
    }

    pub fn contains(&self, frame_number: u32) -> bool {
        (self.first_frame_number()..=self.last_frame_number()).contains(&frame_number)
    }

    pub fn frame_at(&self, frame_number: u32) -> StreamResult<&FrameRecord> {
        if !self.contains(frame_number) {
            return Err(StreamError::OutOfRange {
                frame_number,
                first: self.first_frame_number(),
                last: self.last_frame_number(),
            });
        }
        Ok(&self.frames[(frame_number - self.first_frame_number()) as usize])
    }

    /// Number of frames from `frame_number` through the last one, inclusive.
    pub fn remaining_from(&self, frame_number: u32) -> u32 {
        self.last_frame_number().saturating_sub(frame_number) + 1
    }

    fn number_at(&self, pos: usize) -> u32 {
        self.first_frame_number() + pos as u32
    }

    /// Find the frame at `timestamp`, or the closest one before it.
    ///
    /// Returns None when `timestamp` lies outside the first..=last frame timestamps.
    pub fn locate_by_time(&self, timestamp: NaiveDateTime) -> Option<u32> {
        let min_date = self.first().timestamp;
        let max_date = self.last().timestamp;

        if timestamp < min_date || timestamp > max_date {
            debug!(%timestamp, %min_date, %max_date, "timestamp outside stream range");
            return None;
        }

        // The bisection below never settles on the last position, so a hit on the
        // final timestamp has to be answered up front.
        if timestamp == max_date {
            return Some(self.last_frame_number());
        }

        // Invariant: frames[min_pos].timestamp <= timestamp < frames[max_pos].timestamp
        let mut min_pos = 0;
        let mut max_pos = self.frames.len() - 1;
        let mut chk_pos = (min_pos + max_pos) / 2;

        loop {
            let img_date = self.frames[chk_pos].timestamp;

            if img_date > timestamp {
                max_pos = chk_pos;
            } else if img_date < timestamp {
                min_pos = chk_pos;
            } else {
                return Some(self.number_at(chk_pos));
            }
            chk_pos = (min_pos + max_pos) / 2;

            // Neighbours without an exact hit: keep the earlier one.
            if min_pos == chk_pos {
                return Some(self.number_at(chk_pos));
            }
        }
    }
}
