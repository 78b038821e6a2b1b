use crate::core::quality_mosaic::quality_index;
use crate::core::temporal_match::RankedScene;
use crate::types::{AlignError, AlignResult, EpsgCode, GeoTransform, ReferenceMetadata};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Explicit output grid handed to the compute service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelGrid {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs_wkt: String,
    pub epsg: Option<EpsgCode>,
}

impl PixelGrid {
    /// Grid anchored at the reference origin with the imagery's pixel size.
    ///
    /// Dimensions are `ceil(reference extent / imagery resolution)` per axis,
    /// so the reference footprint is covered without resampling to its own
    /// pixel size.
    pub fn aligned_to(reference: &ReferenceMetadata, resolution: f64) -> AlignResult<Self> {
        if !(resolution > 0.0) || !resolution.is_finite() {
            return Err(AlignError::Configuration(format!(
                "Imagery resolution must be positive, got {}",
                resolution
            )));
        }

        let (extent_x, extent_y) = reference.extent_size();
        let width = grid_dimension(extent_x, resolution);
        let height = grid_dimension(extent_y, resolution);

        Ok(Self {
            width,
            height,
            transform: GeoTransform::north_up(reference.origin(), resolution),
            crs_wkt: reference.crs_wkt.clone(),
            epsg: reference.epsg,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Relative tolerance for treating `extent / resolution` as a whole number
const DIMENSION_EPSILON: f64 = 1e-9;

/// `ceil(extent / resolution)`, ignoring float noise just above a whole number
fn grid_dimension(extent: f64, resolution: f64) -> usize {
    let pixels = extent / resolution;
    let nearest = pixels.round();
    if (pixels - nearest).abs() <= DIMENSION_EPSILON * nearest.max(1.0) {
        nearest as usize
    } else {
        pixels.ceil() as usize
    }
}

/// Quality-mosaic expression evaluated by the compute service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicExpression {
    /// Ensemble, nearest first
    pub scenes: Vec<RankedScene>,
    pub bands: Vec<String>,
}

impl MosaicExpression {
    pub fn quality(&self, index: usize) -> f64 {
        quality_index(self.scenes[index].time_distance)
    }

    /// Output band count including the validity mask
    pub fn output_bands(&self) -> usize {
        self.bands.len() + 1
    }
}

/// Pixel computation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelRequest {
    pub expression: MosaicExpression,
    pub grid: PixelGrid,
}

/// Remote pixel computation.
///
/// Size or complexity limits are reported as `AlignError::ComputeQuota`.
pub trait ComputeService {
    /// `(bands, height, width)` uint8 array on `request.grid`
    fn compute_pixels(&self, request: &PixelRequest) -> AlignResult<Array3<u8>>;
}

/// Creation profile of a written composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterProfile {
    pub transform: GeoTransform,
    pub crs_wkt: String,
    pub width: usize,
    pub height: usize,
    pub count: usize,
    pub dtype: String,
    pub driver: String,
    pub compress: String,
    pub interleave: String,
    pub tiled: bool,
    pub block_x_size: usize,
    pub block_y_size: usize,
}

impl RasterProfile {
    pub fn for_grid(grid: &PixelGrid, count: usize) -> Self {
        Self {
            transform: grid.transform,
            crs_wkt: grid.crs_wkt.clone(),
            width: grid.width,
            height: grid.height,
            count,
            dtype: "uint8".to_string(),
            driver: "GTiff".to_string(),
            compress: "deflate".to_string(),
            interleave: "band".to_string(),
            tiled: true,
            block_x_size: 256,
            block_y_size: 256,
        }
    }
}

/// Composite on the reference-aligned grid
#[derive(Debug, Clone)]
pub struct AlignedRaster {
    pub data: Array3<u8>,
    pub profile: RasterProfile,
}

/// Requests the mosaic on a grid derived from the reference raster
pub struct GridResampler<'a, C: ComputeService + ?Sized> {
    compute: &'a C,
}

impl<'a, C: ComputeService + ?Sized> GridResampler<'a, C> {
    pub fn new(compute: &'a C) -> Self {
        Self { compute }
    }

    pub fn resample(
        &self,
        expression: MosaicExpression,
        reference: &ReferenceMetadata,
        resolution: f64,
    ) -> AlignResult<AlignedRaster> {
        let grid = PixelGrid::aligned_to(reference, resolution)?;
        log::info!(
            "Requesting {}x{} pixels at {} from origin ({}, {})",
            grid.width, grid.height, resolution, grid.transform.top_left_x, grid.transform.top_left_y
        );

        let count = expression.output_bands();
        let request = PixelRequest { expression, grid };
        let data = self.compute.compute_pixels(&request)?;

        let expected = (count, request.grid.height, request.grid.width);
        if data.dim() != expected {
            return Err(AlignError::InvalidData(format!(
                "Compute service returned {:?}, expected {:?}",
                data.dim(),
                expected
            )));
        }

        Ok(AlignedRaster {
            data,
            profile: RasterProfile::for_grid(&request.grid, count),
        })
    }
}
