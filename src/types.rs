use chrono::{DateTime, Utc};
use geo::Polygon;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Milliseconds since the Unix epoch, the time unit of the temporal join
pub type Millis = i64;

/// Length of a "year" in the temporal join tolerance (365 days, no leap handling)
pub const MILLIS_PER_YEAR: Millis = 365 * 24 * 60 * 60 * 1000;

/// EPSG code type alias
pub type EpsgCode = u32;

/// Web Mercator, the metric CRS footprints are buffered in
pub const EPSG_WEB_MERCATOR: EpsgCode = 3857;

/// Point of interest in a UTM zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub x: f64,     // easting, meters
    pub y: f64,     // northing, meters
    pub zone: u8,   // UTM zone 1-60
}

impl PointOfInterest {
    pub fn new(x: f64, y: f64, zone: u8) -> Self {
        Self { x, y, zone }
    }
}

/// Affine transform in GDAL ordering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform anchored at `origin` with square pixels of `resolution`
    pub fn north_up(origin: (f64, f64), resolution: f64) -> Self {
        Self {
            top_left_x: origin.0,
            pixel_width: resolution,
            rotation_x: 0.0,
            top_left_y: origin.1,
            rotation_y: 0.0,
            pixel_height: -resolution,
        }
    }

    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.top_left_x, self.top_left_y)
    }

    /// Map coordinates of the centre of pixel (col, row)
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (col, row) of a map coordinate. Rotation terms are ignored.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }

    /// Map extent (min_x, min_y, max_x, max_y) of a width x height raster
    pub fn extent(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + width as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + height as f64 * self.pixel_height;
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Metadata of the canopy-height reference raster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    pub transform: GeoTransform,
    pub crs_wkt: String,
    pub epsg: Option<EpsgCode>,
    pub width: usize,
    pub height: usize,
}

impl ReferenceMetadata {
    pub fn origin(&self) -> (f64, f64) {
        self.transform.origin()
    }

    pub fn resolution(&self) -> f64 {
        self.transform.pixel_width.abs()
    }

    /// Ground extent (x, y) in CRS units
    pub fn extent_size(&self) -> (f64, f64) {
        (
            self.width as f64 * self.transform.pixel_width.abs(),
            self.height as f64 * self.transform.pixel_height.abs(),
        )
    }
}

/// One acquisition in a remote imagery collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageryScene {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Coverage polygon in the scene's own CRS
    pub footprint: Polygon<f64>,
    pub epsg: EpsgCode,
    /// Nominal pixel size in CRS units
    pub resolution: f64,
    pub band_names: Vec<String>,
    /// Backing file for locally stored scenes
    pub path: Option<PathBuf>,
}

impl ImageryScene {
    pub fn start_millis(&self) -> Millis {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> Millis {
        self.end.timestamp_millis()
    }
}

/// Pixel data of a scene: band values plus per-band validity, both (bands, rows, cols)
#[derive(Debug, Clone)]
pub struct SceneRaster {
    pub bands: Array3<u8>,
    pub valid: Array3<bool>,
    pub transform: GeoTransform,
    pub epsg: EpsgCode,
    pub band_names: Vec<String>,
}

impl SceneRaster {
    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.band_names.iter().position(|b| b == name)
    }
}

/// Error types for alignment processing
#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("No matching imagery: {0}")]
    NoMatch(String),

    #[error("Compute quota exceeded: {0}")]
    ComputeQuota(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("LAS error: {0}")]
    Las(#[from] las::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlignError {
    /// Errors that skip one item without aborting a batch
    pub fn is_soft(&self) -> bool {
        matches!(self, AlignError::NoMatch(_) | AlignError::ComputeQuota(_))
    }
}

/// Result type for alignment operations
pub type AlignResult<T> = Result<T, AlignError>;

/// Outcome of processing one item of a batch
#[derive(Debug)]
pub enum ItemOutcome {
    Written(PathBuf),
    Skipped { item: String, reason: AlignError },
    Failed { item: String, error: AlignError },
}

impl ItemOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, ItemOutcome::Written(_))
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        match self {
            ItemOutcome::Written(path) => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemOutcome::Written(path) => write!(f, "{}", path.display()),
            ItemOutcome::Skipped { item, reason } => write!(f, "{} skipped: {}", item, reason),
            ItemOutcome::Failed { item, .. } => write!(f, "{} error", item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_center_north_up() {
        let gt = GeoTransform::north_up((500000.0, 4400000.0), 2.0);
        let (x, y) = gt.pixel_center(0, 0);
        assert_eq!(x, 500001.0);
        assert_eq!(y, 4399999.0);

        let (col, row) = gt.to_pixel(x, y);
        assert_eq!(col, 0.5);
        assert_eq!(row, 0.5);
    }

    #[test]
    fn test_gdal_roundtrip_ordering() {
        let gt = GeoTransform::from_gdal(&[1.0, 2.0, 0.0, 3.0, 0.0, -2.0]);
        assert_eq!(gt.origin(), (1.0, 3.0));
        assert_eq!(gt.to_gdal()[5], -2.0);
    }

    #[test]
    fn test_failed_outcome_display() {
        let outcome = ItemOutcome::Failed {
            item: "12_580020_4445973_2018-04-21.tif".to_string(),
            error: AlignError::ComputeQuota("too large".to_string()),
        };
        assert_eq!(outcome.to_string(), "12_580020_4445973_2018-04-21.tif error");
        assert!(!outcome.is_written());
    }
}
