use crate::core::crs::{zone_to_nad83_utm_epsg, zone_to_wgs84_utm_epsg, CrsTransformer};
use crate::types::{AlignError, AlignResult, EpsgCode, PointOfInterest, EPSG_WEB_MERCATOR};
use gdal::vector::ToGdal;
use geo::{Point, Polygon, Rect};
use serde::{Deserialize, Serialize};

/// Footprint construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FootprintParams {
    /// Half side of the square footprint, meters in the metric CRS
    pub buffer_radius: f64,
}

impl Default for FootprintParams {
    fn default() -> Self {
        Self { buffer_radius: 200.0 }
    }
}

/// Square query polygon around a point of interest
#[derive(Debug, Clone)]
pub struct Footprint {
    pub geometry: Polygon<f64>,
    /// CRS of `geometry` (always the metric buffering CRS)
    pub crs: EpsgCode,
    /// The point of interest in `crs`
    pub center: Point<f64>,
    /// CRS of the point of interest
    pub source_crs: EpsgCode,
    /// CRS the extracted points are reprojected to
    pub output_crs: EpsgCode,
}

impl Footprint {
    /// Geometry as well-known text
    pub fn wkt(&self) -> AlignResult<String> {
        Ok(self.geometry.to_gdal()?.wkt()?)
    }
}

/// Flat-capped buffer of a point: the axis-aligned square of side `2 * radius`
pub fn square_buffer(center: Point<f64>, radius: f64) -> Polygon<f64> {
    Rect::new(
        (center.x() - radius, center.y() - radius),
        (center.x() + radius, center.y() + radius),
    )
    .to_polygon()
}

/// Builds query footprints for the point-cloud service
pub struct FootprintBuilder {
    params: FootprintParams,
}

impl FootprintBuilder {
    pub fn new(params: FootprintParams) -> Self {
        Self { params }
    }

    pub fn buffer_radius(&self) -> f64 {
        self.params.buffer_radius
    }

    /// Project the point to Web Mercator and buffer it there.
    ///
    /// Buffering happens in the metric CRS so the distance is isotropic; the
    /// NAD83 output CRS is computed separately and only used for reprojection.
    pub fn build(&self, point: &PointOfInterest) -> AlignResult<Footprint> {
        let radius = self.params.buffer_radius;
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(AlignError::Configuration(format!(
                "Buffer radius must be positive, got {}",
                radius
            )));
        }

        let source_crs = zone_to_wgs84_utm_epsg(point.zone)?;
        let output_crs = zone_to_nad83_utm_epsg(point.zone)?;

        let to_metric = CrsTransformer::new(source_crs, EPSG_WEB_MERCATOR)?;
        let (cx, cy) = to_metric.transform_point(point.x, point.y)?;
        let center = Point::new(cx, cy);

        log::debug!(
            "Footprint center EPSG:{} ({}, {}) -> EPSG:{} ({:.3}, {:.3})",
            source_crs, point.x, point.y, EPSG_WEB_MERCATOR, cx, cy
        );

        Ok(Footprint {
            geometry: square_buffer(center, radius),
            crs: EPSG_WEB_MERCATOR,
            center,
            source_crs,
            output_crs,
        })
    }
}

impl Default for FootprintBuilder {
    fn default() -> Self {
        Self::new(FootprintParams::default())
    }
}
