use crate::metadata::{BoundingBox, SpatialExtent};

/// Coordinates of the samples of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Grid {
    /// One longitude per column and one latitude per row.
    LonLat { lons: Vec<f64>, lats: Vec<f64> },
    /// Only the box is known.
    Bbox(BoundingBox),
}

/// `num` evenly spaced values from `start` to `stop`, both inclusive.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

impl Grid {
    pub fn lon_lat(extent: &SpatialExtent, width: u32, height: u32) -> Self {
        Grid::LonLat {
            lons: linspace(extent.lon_start, extent.lon_end, width as usize),
            lats: linspace(extent.lat_start, extent.lat_end, height as usize),
        }
    }

    /// Coordinate of the sample at (`row`, `col`) as (lon, lat). None for bbox grids.
    pub fn coordinate(&self, row: usize, col: usize) -> Option<(f64, f64)> {
        match self {
            Grid::LonLat { lons, lats } => Some((*lons.get(col)?, *lats.get(row)?)),
            Grid::Bbox(_) => None,
        }
    }
}
