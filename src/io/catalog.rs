use crate::core::compute::SceneLoader;
use crate::core::temporal_match::{midnight_utc, ImageryCatalog, SceneQuery};
use crate::types::{AlignError, AlignResult, EpsgCode, GeoTransform, ImageryScene, SceneRaster};
use chrono::NaiveDate;
use gdal::Dataset;
use geo::Rect;
use ndarray::Array3;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Band order of four-band aerial imagery
const IMAGERY_BANDS: [&str; 4] = ["R", "G", "B", "N"];

/// `m_<quad>_<quadrant>_<zone>_<res>_<YYYYMMDD>`, optionally followed by more fields
const SCENE_ID_PATTERN: &str = r"^(m_\d+_(?:ne|nw|se|sw)_\d+_\d+_(\d{8}))(?:_.*)?$";

/// Imagery scenes stored as GeoTIFFs in one directory
pub struct GeoTiffCatalog {
    scenes: Vec<ImageryScene>,
}

impl GeoTiffCatalog {
    /// Index every recognisable scene under `dir` (not recursive)
    pub fn open<P: AsRef<Path>>(dir: P) -> AlignResult<Self> {
        let dir = dir.as_ref();
        log::info!("Indexing imagery catalog: {}", dir.display());

        let pattern = Regex::new(SCENE_ID_PATTERN)
            .map_err(|e| AlignError::Configuration(format!("Bad scene pattern: {}", e)))?;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut scenes = Vec::new();
        for path in paths {
            match Self::index_scene(&pattern, &path) {
                Ok(Some(scene)) => scenes.push(scene),
                Ok(None) => log::debug!("Skipping {}: not a scene name", path.display()),
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        log::info!("{} scene(s) indexed", scenes.len());
        Ok(Self { scenes })
    }

    pub fn scenes(&self) -> &[ImageryScene] {
        &self.scenes
    }

    fn index_scene(pattern: &Regex, path: &Path) -> AlignResult<Option<ImageryScene>> {
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem,
            None => return Ok(None),
        };
        let captures = match pattern.captures(stem) {
            Some(c) => c,
            None => return Ok(None),
        };

        let id = captures[1].to_string();
        let date = NaiveDate::parse_from_str(&captures[2], "%Y%m%d")
            .map_err(|e| AlignError::InvalidData(format!("Bad date in {}: {}", stem, e)))?;
        let start = midnight_utc(date);

        let dataset = Dataset::open(path)?;
        let transform = GeoTransform::from_gdal(&dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();
        let epsg = scene_epsg(&dataset)?;
        let (min_x, min_y, max_x, max_y) = transform.extent(width, height);

        let band_count = dataset.raster_count() as usize;
        let band_names = IMAGERY_BANDS
            .iter()
            .take(band_count)
            .map(|b| b.to_string())
            .collect();

        Ok(Some(ImageryScene {
            id,
            start,
            end: start,
            footprint: Rect::new((min_x, min_y), (max_x, max_y)).to_polygon(),
            epsg,
            resolution: transform.pixel_width.abs(),
            band_names,
            path: Some(path.to_path_buf()),
        }))
    }
}

fn scene_epsg(dataset: &Dataset) -> AlignResult<EpsgCode> {
    let code = dataset.spatial_ref()?.auth_code()?;
    EpsgCode::try_from(code)
        .map_err(|_| AlignError::InvalidData(format!("Invalid EPSG code {}", code)))
}

impl ImageryCatalog for GeoTiffCatalog {
    fn search(&self, query: &SceneQuery) -> AlignResult<Vec<ImageryScene>> {
        self.scenes.search(query)
    }
}

impl SceneLoader for GeoTiffCatalog {
    fn load(&self, scene: &ImageryScene) -> AlignResult<SceneRaster> {
        let path = scene.path.as_ref().ok_or_else(|| {
            AlignError::InvalidData(format!("Scene {} has no local file", scene.id))
        })?;
        read_scene_raster(path, &scene.band_names)
    }
}

/// Read all bands of a GeoTIFF; pixels equal to a band's no-data value are invalid
pub fn read_scene_raster(path: &Path, band_names: &[String]) -> AlignResult<SceneRaster> {
    log::debug!("Loading scene pixels: {}", path.display());

    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let band_count = band_names.len().min(dataset.raster_count() as usize);

    let mut bands = Array3::<u8>::zeros((band_count, height, width));
    let mut valid = Array3::<bool>::from_elem((band_count, height, width), true);

    for b in 0..band_count {
        let rasterband = dataset.rasterband(b as isize + 1)?;
        let nodata = rasterband.no_data_value();
        let buffer = rasterband.read_as::<u8>((0, 0), (width, height), (width, height), None)?;

        for (i, value) in buffer.data.into_iter().enumerate() {
            let (row, col) = (i / width, i % width);
            bands[[b, row, col]] = value;
            if nodata.map_or(false, |nd| nd == value as f64) {
                valid[[b, row, col]] = false;
            }
        }
    }

    Ok(SceneRaster {
        bands,
        valid,
        transform: GeoTransform::from_gdal(&dataset.geo_transform()?),
        epsg: scene_epsg(&dataset)?,
        band_names: band_names[..band_count].to_vec(),
    })
}
