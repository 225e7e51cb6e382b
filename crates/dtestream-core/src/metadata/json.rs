use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::debug;

use super::{FrameRecord, SpatialExtent, StreamDescriptor, FRAME_DATE_FORMAT};
use crate::config::DatasetProfile;
use crate::error::{StreamError, StreamResult};

const NON_FINITE_TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

#[derive(Deserialize)]
struct RawDescriptor {
    stream_path: String,
    nx: u32,
    ny: u32,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    parameter_name: String,
    #[serde(default, alias = "parameter_variable")]
    parameter_short_name: String,
    #[serde(default)]
    type_of_level: String,
    lon_start: Option<f64>,
    lon_end: Option<f64>,
    lat_start: Option<f64>,
    lat_end: Option<f64>,
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    images: Vec<RawImage>,
}

#[derive(Deserialize)]
struct RawImage {
    img_number: u32,
    #[serde(alias = "img_start_date")]
    img_date: String,
    #[serde(deserialize_with = "lenient_f64")]
    img_min_value: f64,
    #[serde(deserialize_with = "lenient_f64")]
    img_max_value: f64,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Accepts plain numbers as well as the quoted non-finite tokens produced by
/// [`quote_non_finite`].
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom(format!("number {n} is not an f64"))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s:?}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected number, got {other}"
        ))),
    }
}

/// The service writes `Infinity`, `-Infinity` and `NaN` as bare tokens, which is not JSON.
/// Wrap them in quotes so serde_json accepts the document.
pub(crate) fn quote_non_finite(body: &str) -> Cow<'_, str> {
    if !NON_FINITE_TOKENS.iter().any(|t| body.contains(t)) {
        return Cow::Borrowed(body);
    }

    let mut out = String::with_capacity(body.len() + 32);
    let mut rest = body;
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = NON_FINITE_TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push('"');
            out.push_str(token);
            out.push('"');
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    Cow::Owned(out)
}

impl StreamDescriptor {
    /// Decode a metadata response body.
    pub fn from_json(body: &str, profile: &DatasetProfile) -> StreamResult<Self> {
        let body = quote_non_finite(body);
        let raw: RawDescriptor = serde_json::from_str(&body)
            .map_err(|e| StreamError::InvalidMetadata(e.to_string()))?;

        if raw.images.is_empty() {
            return Err(StreamError::NotFound(
                "metadata lists no frames for the requested range".to_string(),
            ));
        }
        if raw.nx == 0 || raw.ny == 0 {
            return Err(StreamError::InvalidMetadata(format!(
                "invalid frame dimensions {}x{}",
                raw.nx, raw.ny
            )));
        }

        let extent = match (raw.lon_start, raw.lon_end, raw.lat_start, raw.lat_end, &raw.bbox) {
            (Some(lon_start), Some(lon_end), Some(lat_start), Some(lat_end), _) => {
                Some(SpatialExtent {
                    lon_start,
                    lon_end,
                    lat_start,
                    lat_end,
                })
            }
            (_, _, _, _, Some(bbox)) => {
                let corners: [f64; 4] = bbox.as_slice().try_into().map_err(|_| {
                    StreamError::InvalidMetadata(format!(
                        "bbox must have 4 values, got {}",
                        bbox.len()
                    ))
                })?;
                Some(SpatialExtent::from_bbox(corners))
            }
            _ => profile.default_extent,
        };

        let frames = raw
            .images
            .into_iter()
            .map(|img| frame_record(img, profile))
            .collect::<StreamResult<Vec<_>>>()?;

        debug!(
            frames = frames.len(),
            width = raw.nx,
            height = raw.ny,
            has_extent = extent.is_some(),
            "decoded stream descriptor"
        );

        Ok(Self {
            stream_locator: raw.stream_path,
            width: raw.nx,
            height: raw.ny,
            extent,
            unit: raw.unit,
            parameter_name: raw.parameter_name,
            parameter_short_name: raw.parameter_short_name,
            level_type: raw.type_of_level,
            frames,
        })
    }
}

fn frame_record(img: RawImage, profile: &DatasetProfile) -> StreamResult<FrameRecord> {
    let timestamp = NaiveDateTime::parse_from_str(&img.img_date, FRAME_DATE_FORMAT).map_err(|e| {
        StreamError::InvalidMetadata(format!(
            "frame {} has bad date {:?}: {e}",
            img.img_number, img.img_date
        ))
    })?;

    let mut extra = BTreeMap::new();
    for field in profile.extra_frame_fields {
        match img.rest.get(*field) {
            Some(Value::String(s)) => {
                extra.insert(field.to_string(), s.clone());
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                extra.insert(field.to_string(), other.to_string());
            }
        }
    }

    Ok(FrameRecord {
        frame_number: img.img_number,
        timestamp,
        min_value: img.img_min_value,
        max_value: img.img_max_value,
        extra,
    })
}
