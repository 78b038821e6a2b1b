use chrono::NaiveDate;
use coalign::core::compute::{LocalCompute, SceneLoader};
use coalign::core::grid_resample::{ComputeService, GridResampler, MosaicExpression, PixelRequest};
use coalign::core::quality_mosaic::CompositeParams;
use coalign::core::temporal_match::{midnight_utc, RankedScene, TemporalMatcher};
use coalign::io::reference::ReferenceRaster;
use coalign::types::{
    AlignError, AlignResult, GeoTransform, ImageryScene, ItemOutcome, SceneRaster,
};
use coalign::NaipCompositor;
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use geo::Rect;
use ndarray::Array3;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ORIGIN: (f64, f64) = (579820.0, 4446173.0);
const EPSG: u32 = 26912;

/// Scenes held in memory
struct MemoryLoader(HashMap<String, SceneRaster>);

impl SceneLoader for MemoryLoader {
    fn load(&self, scene: &ImageryScene) -> AlignResult<SceneRaster> {
        self.0
            .get(&scene.id)
            .cloned()
            .ok_or_else(|| AlignError::InvalidData(format!("unknown scene {}", scene.id)))
    }
}

/// Always over quota
struct QuotaExceeded;

impl ComputeService for QuotaExceeded {
    fn compute_pixels(&self, _request: &PixelRequest) -> AlignResult<Array3<u8>> {
        Err(AlignError::ComputeQuota("Computation timed out".to_string()))
    }
}

fn write_reference(dir: &Path, width: usize, height: usize) -> PathBuf {
    let path = dir.join("12_580020_4445973_2018-04-21.tif");
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut dataset = driver
        .create_with_band_type::<f32, _>(&path, width as isize, height as isize, 1)
        .unwrap();
    dataset
        .set_geo_transform(&GeoTransform::north_up(ORIGIN, 1.0).to_gdal())
        .unwrap();
    dataset
        .set_spatial_ref(&SpatialRef::from_epsg(EPSG).unwrap())
        .unwrap();
    let mut band = dataset.rasterband(1).unwrap();
    let buffer = Buffer::new((width, height), vec![12.5f32; width * height]);
    band.write((0, 0), (width, height), &buffer).unwrap();
    path
}

/// Scene covering `width` x `height` metres from `origin` at 0.5 m, all bands = `value`
fn scene(id: &str, date: (i32, u32, u32), origin: (f64, f64), size: (f64, f64), value: u8) -> (ImageryScene, SceneRaster) {
    let start = midnight_utc(NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap());
    let res = 0.5;
    let cols = (size.0 / res) as usize;
    let rows = (size.1 / res) as usize;
    let transform = GeoTransform::north_up(origin, res);
    let (min_x, min_y, max_x, max_y) = transform.extent(cols, rows);
    let band_names: Vec<String> = ["R", "G", "B", "N"].iter().map(|b| b.to_string()).collect();

    let scene = ImageryScene {
        id: id.to_string(),
        start,
        end: start,
        footprint: Rect::new((min_x, min_y), (max_x, max_y)).to_polygon(),
        epsg: EPSG,
        resolution: res,
        band_names: band_names.clone(),
        path: None,
    };
    let raster = SceneRaster {
        bands: Array3::from_elem((4, rows, cols), value),
        valid: Array3::from_elem((4, rows, cols), true),
        transform,
        epsg: EPSG,
        band_names,
    };
    (scene, raster)
}

fn fixture() -> (Vec<ImageryScene>, MemoryLoader) {
    let scenes = vec![
        // nearest, covers only the western 20 m
        scene("m_3811060_nw_12_060_20180724", (2018, 7, 24), ORIGIN, (20.0, 40.0), 100),
        // later the same year, covers everything
        scene("m_3811060_ne_12_060_20181002", (2018, 10, 2), (ORIGIN.0 - 10.0, ORIGIN.1 + 10.0), (100.0, 100.0), 200),
        // previous campaign
        scene("m_3811060_ne_12_060_20160815", (2016, 8, 15), (ORIGIN.0 - 10.0, ORIGIN.1 + 10.0), (100.0, 100.0), 50),
    ];
    let loader = MemoryLoader(
        scenes
            .iter()
            .map(|(s, r)| (s.id.clone(), r.clone()))
            .collect(),
    );
    (scenes.into_iter().map(|(s, _)| s).collect(), loader)
}

#[test]
fn test_composite_written_on_reference_grid() {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let reference_path = write_reference(temp_dir.path(), 40, 40);

    let (catalog, loader) = fixture();
    let compute = LocalCompute::new(loader);
    let compositor = NaipCompositor::new(
        &catalog,
        &compute,
        TemporalMatcher::default(),
        CompositeParams::default(),
    );

    let outcome = compositor.process(&reference_path);
    let output = outcome.output_path().cloned().unwrap_or_else(|| panic!("{}", outcome));
    assert_eq!(
        output,
        temp_dir.path().join("12_580020_4445973_2018-04-21_2018-07-24.tif")
    );

    let dataset = Dataset::open(&output).unwrap();
    assert_eq!(dataset.raster_count(), 5);
    assert_eq!(dataset.raster_size(), (80, 80));
    assert_eq!(
        dataset.geo_transform().unwrap(),
        [ORIGIN.0, 0.5, 0.0, ORIGIN.1, 0.0, -0.5]
    );

    let red = dataset
        .rasterband(1)
        .unwrap()
        .read_as::<u8>((0, 0), (80, 80), (80, 80), None)
        .unwrap();
    let mask = dataset
        .rasterband(5)
        .unwrap()
        .read_as::<u8>((0, 0), (80, 80), (80, 80), None)
        .unwrap();

    // western 20 m from the nearest scene, the rest from the later one
    assert_eq!(red.data[0], 100);
    assert_eq!(red.data[39], 100);
    assert_eq!(red.data[40], 200);
    assert_eq!(red.data[80 * 80 - 1], 200);
    assert!(mask.data.iter().all(|&m| m == 1));

    let reference = ReferenceRaster::open(&reference_path).unwrap();
    assert_eq!(reference.epsg, Some(EPSG));
    assert_eq!(reference.origin(), ORIGIN);
}

#[test]
fn test_missing_imagery_is_skipped() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let reference_path = write_reference(temp_dir.path(), 10, 10);

    let catalog: Vec<ImageryScene> = Vec::new();
    let compute = LocalCompute::new(MemoryLoader(HashMap::new()));
    let compositor = NaipCompositor::new(
        &catalog,
        &compute,
        TemporalMatcher::default(),
        CompositeParams::default(),
    );

    match compositor.process(&reference_path) {
        ItemOutcome::Skipped { reason, .. } => assert!(matches!(reason, AlignError::NoMatch(_))),
        other => panic!("expected skip, got {}", other),
    }
}

#[test]
fn test_quota_error_becomes_failed_item() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let reference_path = write_reference(temp_dir.path(), 10, 10);
    let (catalog, _) = fixture();

    let compositor = NaipCompositor::new(
        &catalog,
        &QuotaExceeded,
        TemporalMatcher::default(),
        CompositeParams::default(),
    );
    let outcome = compositor.process(&reference_path);

    assert_eq!(outcome.to_string(), format!("{} error", reference_path.display()));
    match outcome {
        ItemOutcome::Failed { error, .. } => {
            assert!(matches!(error, AlignError::ComputeQuota(_)));
            assert!(error.is_soft());
        }
        other => panic!("expected failure, got {}", other),
    }
}

#[test]
fn test_local_compute_enforces_request_size() {
    let (catalog, loader) = fixture();
    let compute = LocalCompute::new(loader).with_limits(1000, 32768);
    let reference = coalign::ReferenceMetadata {
        transform: GeoTransform::north_up(ORIGIN, 1.0),
        crs_wkt: String::new(),
        epsg: Some(EPSG),
        width: 40,
        height: 40,
    };
    let expression = MosaicExpression {
        scenes: vec![RankedScene { scene: catalog[0].clone(), time_distance: 1 }],
        bands: CompositeParams::default().bands,
    };

    let result = GridResampler::new(&compute).resample(expression, &reference, 0.5);
    assert!(matches!(result, Err(AlignError::ComputeQuota(_))));
}
