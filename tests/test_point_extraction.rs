use coalign::core::extract::{ExtractionParams, PointCloudExtractor, PointCloudService};
use coalign::core::footprint::{square_buffer, Footprint, FootprintBuilder};
use coalign::core::pipeline::Pipeline;
use coalign::io::laz::{LasFileSource, PointSource, StreamingExecutor, VecSource};
use coalign::types::{AlignError, AlignResult, EpsgCode};
use geo::Point as GeoPoint;
use las::point::Classification;
use las::{Point, Reader};
use tempfile::TempDir;

const CENTER: (f64, f64) = (-12_266_000.0, 4_883_000.0);

fn footprint() -> Footprint {
    let center = GeoPoint::new(CENTER.0, CENTER.1);
    Footprint {
        geometry: square_buffer(center, 200.0),
        crs: 3857,
        center,
        source_crs: 3857,
        output_crs: 3857,
    }
}

fn point(dx: f64, dy: f64, class: u8) -> Point {
    Point {
        x: CENTER.0 + dx,
        y: CENTER.1 + dy,
        z: 1500.0,
        intensity: 100,
        classification: Classification::new(class).unwrap(),
        ..Default::default()
    }
}

/// Records the chunk sizes asked of the inner source
struct CountingSource {
    inner: VecSource,
    requests: Vec<usize>,
}

impl PointSource for CountingSource {
    fn srs_epsg(&self) -> EpsgCode {
        self.inner.srs_epsg()
    }

    fn read_chunk(&mut self, max: usize) -> AlignResult<Option<Vec<Point>>> {
        self.requests.push(max);
        self.inner.read_chunk(max)
    }
}

struct FailingService;

impl PointCloudService for FailingService {
    fn execute_streaming(&mut self, _pipeline: &Pipeline, _chunk_size: usize) -> AlignResult<u64> {
        Err(AlignError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        )))
    }
}

#[test]
fn test_excluded_classes_never_written() {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let output = temp_dir.path().join("12_580020_4445973_2018-04-27_2018-06-02.laz");

    let mut points = Vec::new();
    for i in 0..100 {
        let d = i as f64 - 50.0;
        points.push(point(d, -d, [1, 2, 7, 18, 5][i % 5]));
    }
    // outside the 400 m square
    points.push(point(250.0, 0.0, 2));
    points.push(point(0.0, -201.0, 2));

    let executor = StreamingExecutor::new(VecSource::new(points, 3857));
    let params = ExtractionParams { chunk_size: 7, ..Default::default() };
    let mut extractor = PointCloudExtractor::new(executor, FootprintBuilder::default(), params);

    let path = extractor
        .extract(&footprint(), "https://example.com/ept.json", &output)
        .expect("extraction");
    assert_eq!(path, output);

    let mut reader = Reader::from_path(&path).expect("Failed to open output");
    let written: Vec<Point> = reader.points().collect::<Result<_, _>>().unwrap();
    let classes: Vec<u8> = written.iter().map(|p| u8::from(p.classification)).collect();

    assert_eq!(written.len(), 60);
    assert!(classes.iter().all(|c| *c != 7 && *c != 18));
    assert_eq!(classes.iter().filter(|c| **c == 2).count(), 20);
    assert!(written
        .iter()
        .all(|p| (p.x - CENTER.0).abs() <= 200.0 && (p.y - CENTER.1).abs() <= 200.0));
}

#[test]
fn test_streaming_chunks_are_bounded() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let output = temp_dir.path().join("chunks.laz");

    let points = (0..25).map(|i| point(i as f64, 0.0, 2)).collect();
    let source = CountingSource {
        inner: VecSource::new(points, 3857),
        requests: Vec::new(),
    };
    let mut executor = StreamingExecutor::new(source);

    let pipeline = Pipeline::extraction(
        "https://example.com/ept.json",
        footprint().wkt().unwrap(),
        1.0,
        &Default::default(),
        3857,
        output.to_str().unwrap(),
    )
    .unwrap();

    let written = executor.execute_streaming(&pipeline, 10).unwrap();
    assert_eq!(written, 25);
    // three full or partial chunks, then the exhausted read
    assert_eq!(executor.source().requests, vec![10, 10, 10, 10]);
}

#[test]
fn test_service_failure_is_extraction_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut extractor =
        PointCloudExtractor::new(FailingService, FootprintBuilder::default(), ExtractionParams::default());

    let result = extractor.extract(
        &footprint(),
        "https://example.com/ept.json",
        &temp_dir.path().join("failed.laz"),
    );
    assert!(matches!(result, Err(AlignError::Extraction(_))));
}

#[test]
fn test_zero_chunk_size_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let params = ExtractionParams { chunk_size: 0, ..Default::default() };
    let mut extractor = PointCloudExtractor::new(FailingService, FootprintBuilder::default(), params);

    let result = extractor.extract(&footprint(), "x", &temp_dir.path().join("x.laz"));
    assert!(matches!(result, Err(AlignError::Configuration(_))));
}

#[test]
fn test_local_tile_can_be_reclipped() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let tile = temp_dir.path().join("tile.laz");
    let clipped = temp_dir.path().join("clipped.laz");

    let points = (0..40)
        .map(|i| point(i as f64 * 5.0 - 100.0, 0.0, if i % 4 == 0 { 7 } else { 2 }))
        .collect();
    let mut extractor = PointCloudExtractor::new(
        StreamingExecutor::new(VecSource::new(points, 3857)),
        FootprintBuilder::default(),
        ExtractionParams::default(),
    );
    extractor.extract(&footprint(), "memory", &tile).unwrap();

    // second pass over the written tile with a smaller footprint
    let center = GeoPoint::new(CENTER.0, CENTER.1);
    let small = Footprint {
        geometry: square_buffer(center, 52.0),
        ..footprint()
    };
    let source = LasFileSource::open(&tile, 3857).unwrap();
    let mut extractor = PointCloudExtractor::new(
        StreamingExecutor::new(source),
        FootprintBuilder::default(),
        ExtractionParams::default(),
    );
    extractor.extract(&small, tile.to_str().unwrap(), &clipped).unwrap();

    let mut reader = Reader::from_path(&clipped).unwrap();
    let xs: Vec<f64> = reader.points().map(|p| p.unwrap().x - CENTER.0).collect();
    assert!(!xs.is_empty());
    assert!(xs.iter().all(|x| x.abs() <= 52.0));
    // dx in -50..=50 every 5 m, minus the class 7 points
    assert_eq!(xs.len(), 16);
}

#[test]
fn test_extended_classes_preserved() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let output = temp_dir.path().join("extended.laz");

    let points = vec![point(0.0, 0.0, 2), point(1.0, 1.0, 40), point(2.0, 2.0, 64)];
    let mut extractor = PointCloudExtractor::new(
        StreamingExecutor::new(VecSource::new(points, 3857)),
        FootprintBuilder::default(),
        ExtractionParams::default(),
    );
    extractor.extract(&footprint(), "memory", &output).unwrap();

    let mut reader = Reader::from_path(&output).unwrap();
    assert!(reader.header().point_format().is_extended);
    let classes: Vec<u8> = reader
        .points()
        .map(|p| u8::from(p.unwrap().classification))
        .collect();
    assert_eq!(classes, vec![2, 40, 64]);
}
