use crate::metadata::SpatialExtent;
use crate::video::sample::SampleFormat;

/// How the coordinate grid of a dataset family is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKind {
    /// Evenly spaced longitudes/latitudes spanning the extent.
    Linspace,
    /// The bounding box is handed through as-is.
    Bbox,
}

/// Per-dataset-family knobs. Everything that differs between stream families lives here;
/// the seek and decode logic is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetProfile {
    pub name: &'static str,
    /// Path below `api_base`. Placeholders: `{subset}`, `{variable}`, `{start}`, `{end}`.
    /// Without `{start}`/`{end}` the time range goes into `start_date`/`end_date` query parameters.
    pub metadata_path: &'static str,
    pub requires_vertical_flip: bool,
    pub sample_format: SampleFormat,
    pub grid_kind: GridKind,
    /// Used when the descriptor carries no extent of its own.
    pub default_extent: Option<SpatialExtent>,
    /// Optional per-frame string fields carried through to decoded frames.
    pub extra_frame_fields: &'static [&'static str],
}

pub const CLIMATE: DatasetProfile = DatasetProfile {
    name: "climate",
    metadata_path: "data/metadata/{subset}/{variable}/{start}/{end}",
    requires_vertical_flip: false,
    sample_format: SampleFormat::Gray12,
    grid_kind: GridKind::Linspace,
    default_extent: None,
    extra_frame_fields: &[],
};

pub const EXTREMES: DatasetProfile = DatasetProfile {
    name: "extremes",
    metadata_path: "data/metadata/{subset}/{variable}/{start}/{end}",
    requires_vertical_flip: true,
    sample_format: SampleFormat::Gray12,
    grid_kind: GridKind::Linspace,
    default_extent: None,
    extra_frame_fields: &[],
};

pub const SENTINEL_3: DatasetProfile = DatasetProfile {
    name: "sentinel-3",
    metadata_path: "s3/data/metadata/{variable}",
    requires_vertical_flip: false,
    sample_format: SampleFormat::Gray12,
    grid_kind: GridKind::Bbox,
    default_extent: None,
    extra_frame_fields: &["satellite"],
};

pub const LEGACY: DatasetProfile = DatasetProfile {
    name: "legacy",
    metadata_path: "metadata/data/{variable}/{start}/{end}",
    requires_vertical_flip: true,
    sample_format: SampleFormat::GrayF32,
    grid_kind: GridKind::Linspace,
    default_extent: Some(SpatialExtent {
        lon_start: 0.0,
        lon_end: 359.75,
        lat_start: -90.0,
        lat_end: 90.0,
    }),
    extra_frame_fields: &[],
};

static ALL: [DatasetProfile; 4] = [CLIMATE, EXTREMES, SENTINEL_3, LEGACY];

impl DatasetProfile {
    pub fn by_name(name: &str) -> Option<DatasetProfile> {
        ALL.iter().find(|p| p.name.eq_ignore_ascii_case(name)).cloned()
    }

    /// Pick the profile for a program subset as named by the overview catalog.
    /// Only "Climate DT" streams come upright; every other subset is stored flipped.
    pub fn for_subset(subset: &str) -> DatasetProfile {
        if subset.eq_ignore_ascii_case("climate dt") {
            CLIMATE
        } else {
            EXTREMES
        }
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        ALL.iter().map(|p| p.name)
    }
}
