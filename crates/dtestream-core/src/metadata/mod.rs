//! Stream descriptors as published by the streaming metadata service.

pub mod client;
mod json;
pub mod overview;
pub mod token;

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::config::DatasetProfile;
use crate::error::StreamResult;

pub use client::MetadataClient;
pub use overview::{Overview, OverviewEntry};
pub use token::load_token;

/// Timestamp layout used by the service for per-frame dates.
pub const FRAME_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Timestamp layout used in metadata request paths.
pub const API_DATE_FORMAT: &str = "%Y%m%dT%H%M";

/// One encoded frame of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// 1-based position of the frame in the full source stream.
    pub frame_number: u32,
    pub timestamp: NaiveDateTime,
    /// Physical value that a normalized sample of 0.0 maps to. Infinite means no data.
    pub min_value: f64,
    /// Physical value that a normalized sample of 1.0 maps to. Infinite means no data.
    pub max_value: f64,
    /// Dataset-specific per-frame fields, e.g. `satellite`.
    pub extra: BTreeMap<String, String>,
}

impl FrameRecord {
    /// 0-based position used to compute the decoder seek offset.
    pub fn stream_position(&self) -> u32 {
        self.frame_number.saturating_sub(1)
    }

    pub fn has_data(&self) -> bool {
        self.min_value.is_finite() && self.max_value.is_finite()
    }
}

/// Geographic extent as start/end pairs. Orientation is preserved so that grids can run
/// north-to-south when the stream does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialExtent {
    pub lon_start: f64,
    pub lon_end: f64,
    pub lat_start: f64,
    pub lat_end: f64,
}

/// Axis-aligned box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl SpatialExtent {
    /// Build from a `[lon0, lat0, lon1, lat1]` box as sent by bbox-style descriptors.
    pub fn from_bbox(bbox: [f64; 4]) -> Self {
        Self {
            lon_start: bbox[0],
            lat_start: bbox[1],
            lon_end: bbox[2],
            lat_end: bbox[3],
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            min_lon: self.lon_start.min(self.lon_end),
            min_lat: self.lat_start.min(self.lat_end),
            max_lon: self.lon_start.max(self.lon_end),
            max_lat: self.lat_start.max(self.lat_end),
        }
    }
}

/// Everything known about one (dataset, variable, time range) query. Immutable once fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    /// Opaque URI handed to the decoder.
    pub stream_locator: String,
    pub width: u32,
    pub height: u32,
    pub extent: Option<SpatialExtent>,
    pub unit: String,
    pub parameter_name: String,
    pub parameter_short_name: String,
    pub level_type: String,
    /// Never empty.
    pub frames: Vec<FrameRecord>,
}

/// What to ask the metadata service for.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamQuery {
    /// Program subset or category, e.g. "Climate DT". Unused by some families.
    pub subset: String,
    /// Variable short name, or continent for Sentinel-3 streams.
    pub variable: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Anything that can resolve a query into a descriptor.
pub trait MetadataSource {
    fn fetch(
        &self,
        profile: &DatasetProfile,
        query: &StreamQuery,
        token: &str,
    ) -> StreamResult<StreamDescriptor>;
}
