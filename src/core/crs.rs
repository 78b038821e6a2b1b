use crate::types::{AlignError, AlignResult, EpsgCode};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use geo::{LineString, Polygon};

/// EPSG code of the WGS84 UTM CRS for a zone (northern hemisphere)
pub fn zone_to_wgs84_utm_epsg(zone: u8) -> AlignResult<EpsgCode> {
    validate_zone(zone)?;
    Ok(32600 + zone as EpsgCode)
}

/// EPSG code of the NAD83 UTM CRS for a zone
pub fn zone_to_nad83_utm_epsg(zone: u8) -> AlignResult<EpsgCode> {
    validate_zone(zone)?;
    Ok(26900 + zone as EpsgCode)
}

fn validate_zone(zone: u8) -> AlignResult<()> {
    if (1..=60).contains(&zone) {
        Ok(())
    } else {
        Err(AlignError::Configuration(format!(
            "UTM zone must be in 1..=60, got {}",
            zone
        )))
    }
}

/// Coordinate transformer between two EPSG-coded CRSs.
///
/// All CRSs handled here are projected with easting/northing axis order,
/// so no axis-mapping strategy is applied.
pub enum CrsTransformer {
    Identity,
    Gdal(CoordTransform),
}

impl CrsTransformer {
    pub fn new(source_epsg: EpsgCode, target_epsg: EpsgCode) -> AlignResult<Self> {
        if source_epsg == target_epsg {
            return Ok(Self::Identity);
        }

        let source = SpatialRef::from_epsg(source_epsg)?;
        let target = SpatialRef::from_epsg(target_epsg)?;
        log::debug!("Coordinate transform EPSG:{} -> EPSG:{}", source_epsg, target_epsg);
        Ok(Self::Gdal(CoordTransform::new(&source, &target)?))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    pub fn transform_in_place(
        &self,
        xs: &mut [f64],
        ys: &mut [f64],
        zs: &mut [f64],
    ) -> AlignResult<()> {
        match self {
            Self::Identity => Ok(()),
            Self::Gdal(t) => {
                t.transform_coords(xs, ys, zs)?;
                Ok(())
            }
        }
    }

    pub fn transform_point(&self, x: f64, y: f64) -> AlignResult<(f64, f64)> {
        let mut xs = [x];
        let mut ys = [y];
        let mut zs = [0.0];
        self.transform_in_place(&mut xs, &mut ys, &mut zs)?;
        Ok((xs[0], ys[0]))
    }

    /// Transforms the exterior ring vertex by vertex. Interiors are dropped.
    pub fn transform_polygon(&self, polygon: &Polygon<f64>) -> AlignResult<Polygon<f64>> {
        if self.is_identity() {
            return Ok(polygon.clone());
        }

        let ring = polygon.exterior();
        let mut xs: Vec<f64> = ring.coords().map(|c| c.x).collect();
        let mut ys: Vec<f64> = ring.coords().map(|c| c.y).collect();
        let mut zs = vec![0.0; xs.len()];
        self.transform_in_place(&mut xs, &mut ys, &mut zs)?;

        let coords: Vec<(f64, f64)> = xs.into_iter().zip(ys).collect();
        Ok(Polygon::new(LineString::from(coords), vec![]))
    }
}
