use crate::core::crs::CrsTransformer;
use crate::core::grid_resample::{ComputeService, PixelGrid, PixelRequest};
use crate::core::quality_mosaic::{CompositeParams, MosaicLayer, QualityMosaic};
use crate::types::{AlignError, AlignResult, ImageryScene, SceneRaster};
use ndarray::Array3;

/// Largest request payload, bytes
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 48 * 1024 * 1024;

/// Largest grid dimension, pixels
pub const DEFAULT_MAX_GRID_DIMENSION: usize = 32768;

/// Supplies pixel data for catalog scenes
pub trait SceneLoader {
    fn load(&self, scene: &ImageryScene) -> AlignResult<SceneRaster>;
}

/// In-process compute service: warps the ensemble onto the requested grid
/// with nearest-neighbour sampling and applies the quality mosaic there.
pub struct LocalCompute<L: SceneLoader> {
    loader: L,
    max_request_bytes: usize,
    max_grid_dimension: usize,
}

impl<L: SceneLoader> LocalCompute<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            max_grid_dimension: DEFAULT_MAX_GRID_DIMENSION,
        }
    }

    pub fn with_limits(mut self, max_request_bytes: usize, max_grid_dimension: usize) -> Self {
        self.max_request_bytes = max_request_bytes;
        self.max_grid_dimension = max_grid_dimension;
        self
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    fn check_quota(&self, request: &PixelRequest) -> AlignResult<()> {
        let grid = &request.grid;
        if grid.width > self.max_grid_dimension || grid.height > self.max_grid_dimension {
            return Err(AlignError::ComputeQuota(format!(
                "Grid dimensions {}x{} exceed the limit of {}",
                grid.width, grid.height, self.max_grid_dimension
            )));
        }

        let bytes = grid.pixel_count() * request.expression.output_bands();
        if bytes > self.max_request_bytes {
            return Err(AlignError::ComputeQuota(format!(
                "Total request size ({} bytes) must be less than or equal to {} bytes",
                bytes, self.max_request_bytes
            )));
        }
        Ok(())
    }
}

impl<L: SceneLoader> ComputeService for LocalCompute<L> {
    fn compute_pixels(&self, request: &PixelRequest) -> AlignResult<Array3<u8>> {
        self.check_quota(request)?;

        let grid = &request.grid;
        let grid_epsg = grid.epsg.ok_or_else(|| {
            AlignError::Configuration("Output grid CRS has no EPSG code".to_string())
        })?;

        let mut warped = Vec::with_capacity(request.expression.scenes.len());
        for ranked in &request.expression.scenes {
            let raster = self.loader.load(&ranked.scene)?;
            log::debug!("Warping {} onto the output grid", ranked.scene.id);
            let (bands, valid) = warp_nearest(&raster, grid, grid_epsg)?;
            warped.push((bands, valid, raster.band_names));
        }

        let layers: Vec<MosaicLayer> = request
            .expression
            .scenes
            .iter()
            .zip(&warped)
            .enumerate()
            .map(|(i, (ranked, (bands, valid, band_names)))| MosaicLayer {
                id: &ranked.scene.id,
                quality: request.expression.quality(i),
                band_names,
                bands: bands.view(),
                valid: valid.view(),
            })
            .collect();

        let mosaic = QualityMosaic::new(CompositeParams {
            bands: request.expression.bands.clone(),
        });
        mosaic.composite(&layers)
    }
}

/// Sample `raster` at every grid pixel centre. Pixels outside the raster
/// are marked invalid in every band.
pub fn warp_nearest(
    raster: &SceneRaster,
    grid: &PixelGrid,
    grid_epsg: u32,
) -> AlignResult<(Array3<u8>, Array3<bool>)> {
    let (n_bands, src_rows, src_cols) = raster.bands.dim();
    let mut bands = Array3::<u8>::zeros((n_bands, grid.height, grid.width));
    let mut valid = Array3::<bool>::from_elem((n_bands, grid.height, grid.width), false);

    let transformer = CrsTransformer::new(grid_epsg, raster.epsg)?;
    let mut xs = vec![0.0; grid.width];
    let mut ys = vec![0.0; grid.width];
    let mut zs = vec![0.0; grid.width];

    for row in 0..grid.height {
        for col in 0..grid.width {
            let (x, y) = grid.transform.pixel_center(col, row);
            xs[col] = x;
            ys[col] = y;
            zs[col] = 0.0;
        }
        transformer.transform_in_place(&mut xs, &mut ys, &mut zs)?;

        for col in 0..grid.width {
            let (fc, fr) = raster.transform.to_pixel(xs[col], ys[col]);
            if !(fc >= 0.0 && fr >= 0.0) {
                continue;
            }
            let (sc, sr) = (fc.floor() as usize, fr.floor() as usize);
            if sc >= src_cols || sr >= src_rows {
                continue;
            }
            for b in 0..n_bands {
                bands[[b, row, col]] = raster.bands[[b, sr, sc]];
                valid[[b, row, col]] = raster.valid[[b, sr, sc]];
            }
        }
    }

    Ok((bands, valid))
}
