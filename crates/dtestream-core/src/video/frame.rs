use std::collections::BTreeMap;

use chrono::NaiveDateTime;

/// A single decoded data frame in physical units.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    /// Frame number as listed in the stream metadata.
    pub frame_number: u32,
    /// Nominal capture time.
    pub timestamp: NaiveDateTime,
    pub width: u32,
    pub height: u32,
    /// Row-major samples, `width * height` long. No-data frames hold `f32::INFINITY`.
    pub values: Vec<f32>,
    /// Dataset-specific per-frame fields, e.g. `satellite`.
    pub extra: BTreeMap<String, String>,
}

impl DataFrame {
    pub fn get(&self, row: u32, col: u32) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.values
            .get(row as usize * self.width as usize + col as usize)
            .copied()
    }

    pub fn row(&self, row: u32) -> Option<&[f32]> {
        if row >= self.height {
            return None;
        }
        let w = self.width as usize;
        let start = row as usize * w;
        self.values.get(start..start + w)
    }

    /// True when every sample is the no-data sentinel.
    pub fn is_no_data(&self) -> bool {
        self.values.iter().all(|v| v.is_infinite())
    }

    /// Smallest and largest finite sample, if any.
    pub fn finite_range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}
