use crate::core::crs::CrsTransformer;
use crate::core::extract::PointCloudService;
use crate::core::pipeline::{parse_epsg, ClassFilter, Pipeline};
use crate::types::{AlignError, AlignResult, EpsgCode, EPSG_WEB_MERCATOR};
use geo::{Intersects, Point as GeoPoint, Polygon};
use las::point::Format;
use las::{Builder, Point, Reader, Transform, Vector, Writer};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Scale of written coordinates (centimetres)
const OUTPUT_SCALE: f64 = 0.01;

/// Chunked supplier of points in a known CRS
pub trait PointSource {
    fn srs_epsg(&self) -> EpsgCode;

    /// Up to `max` points, `None` once exhausted
    fn read_chunk(&mut self, max: usize) -> AlignResult<Option<Vec<Point>>>;
}

/// Points from a local LAS/LAZ file
pub struct LasFileSource {
    reader: Reader,
    epsg: EpsgCode,
}

impl LasFileSource {
    pub fn open<P: AsRef<Path>>(path: P, epsg: EpsgCode) -> AlignResult<Self> {
        log::info!("Opening point cloud: {}", path.as_ref().display());
        let reader = Reader::from_path(path.as_ref())?;
        log::debug!("{} points in file", reader.header().number_of_points());
        Ok(Self { reader, epsg })
    }
}

impl PointSource for LasFileSource {
    fn srs_epsg(&self) -> EpsgCode {
        self.epsg
    }

    fn read_chunk(&mut self, max: usize) -> AlignResult<Option<Vec<Point>>> {
        let points = self
            .reader
            .points()
            .take(max)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if points.is_empty() { None } else { Some(points) })
    }
}

/// Points already held in memory
pub struct VecSource {
    points: std::vec::IntoIter<Point>,
    epsg: EpsgCode,
}

impl VecSource {
    pub fn new(points: Vec<Point>, epsg: EpsgCode) -> Self {
        Self {
            points: points.into_iter(),
            epsg,
        }
    }
}

impl PointSource for VecSource {
    fn srs_epsg(&self) -> EpsgCode {
        self.epsg
    }

    fn read_chunk(&mut self, max: usize) -> AlignResult<Option<Vec<Point>>> {
        let chunk: Vec<Point> = self.points.by_ref().take(max).collect();
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }
}

/// Keep points inside the crop polygon whose class is not excluded
pub fn filter_chunk(points: Vec<Point>, crop: &Polygon<f64>, filter: &ClassFilter) -> Vec<Point> {
    points
        .into_iter()
        .filter(|p| filter.retains(u8::from(p.classification)))
        .filter(|p| crop.intersects(&GeoPoint::new(p.x, p.y)))
        .collect()
}

/// Runs extraction pipelines locally against a `PointSource`.
///
/// The reader polygon is interpreted in `query_crs` (Web Mercator by
/// default) and reprojected into the source CRS before cropping.
pub struct StreamingExecutor<P: PointSource> {
    source: P,
    query_crs: EpsgCode,
}

impl<P: PointSource> StreamingExecutor<P> {
    pub fn new(source: P) -> Self {
        Self {
            source,
            query_crs: EPSG_WEB_MERCATOR,
        }
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn with_query_crs(mut self, epsg: EpsgCode) -> Self {
        self.query_crs = epsg;
        self
    }

    fn run(&mut self, pipeline: &Pipeline, chunk_size: usize) -> AlignResult<u64> {
        pipeline.validate()?;
        let (filename, polygon_wkt, resolution) = pipeline
            .read_stage()
            .ok_or_else(|| AlignError::Configuration("Pipeline has no reader".to_string()))?;
        let output_file = pipeline
            .output_file()
            .ok_or_else(|| AlignError::Configuration("Pipeline has no writer".to_string()))?;
        let filter = pipeline.class_filter()?;

        let source_crs = self.source.srs_epsg();
        let target_crs = match pipeline.output_srs() {
            Some(srs) => parse_epsg(srs)?,
            None => source_crs,
        };

        log::debug!(
            "Streaming {} (resolution hint {}) in chunks of {}",
            filename, resolution, chunk_size
        );

        let crop = CrsTransformer::new(self.query_crs, source_crs)?
            .transform_polygon(&parse_polygon(polygon_wkt)?)?;
        let reproject = CrsTransformer::new(source_crs, target_crs)?;

        let mut writer: Option<Writer<BufWriter<File>>> = None;
        let mut written: u64 = 0;
        let mut chunk_index = 0usize;

        while let Some(chunk) = self
            .source
            .read_chunk(chunk_size)
            .map_err(|e| AlignError::Extraction(format!("Reading {} failed: {}", filename, e)))?
        {
            let received = chunk.len();
            let mut points = filter_chunk(chunk, &crop, &filter);
            reproject_points(&reproject, &mut points)?;

            if writer.is_none() {
                if let Some(first) = points.first() {
                    writer = Some(create_writer(output_file, Some(first))?);
                }
            }
            if let Some(w) = writer.as_mut() {
                for point in points.iter().cloned().map(with_gps_time) {
                    w.write_point(point).map_err(|e| {
                        AlignError::Extraction(format!("Writing {} failed: {}", output_file, e))
                    })?;
                }
            }

            log::debug!("Chunk {}: kept {} of {} points", chunk_index, points.len(), received);
            written += points.len() as u64;
            chunk_index += 1;
        }

        let mut writer = match writer {
            Some(w) => w,
            None => create_writer(output_file, None)?,
        };
        writer
            .close()
            .map_err(|e| AlignError::Extraction(format!("Closing {} failed: {}", output_file, e)))?;

        Ok(written)
    }
}

impl<P: PointSource> PointCloudService for StreamingExecutor<P> {
    fn execute_streaming(&mut self, pipeline: &Pipeline, chunk_size: usize) -> AlignResult<u64> {
        if chunk_size == 0 {
            return Err(AlignError::Configuration("Chunk size must be positive".to_string()));
        }
        self.run(pipeline, chunk_size)
    }
}

fn parse_polygon(wkt: &str) -> AlignResult<Polygon<f64>> {
    let geometry = gdal::vector::Geometry::from_wkt(wkt)?;
    match geometry.to_geo()? {
        geo::Geometry::Polygon(polygon) => Ok(polygon),
        other => Err(AlignError::Configuration(format!(
            "Reader polygon is not a polygon: {:?}",
            other
        ))),
    }
}

fn reproject_points(transformer: &CrsTransformer, points: &mut [Point]) -> AlignResult<()> {
    if transformer.is_identity() || points.is_empty() {
        return Ok(());
    }

    let mut xs: Vec<f64> = points.iter().map(|p| p.x).collect();
    let mut ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    let mut zs: Vec<f64> = points.iter().map(|p| p.z).collect();
    transformer.transform_in_place(&mut xs, &mut ys, &mut zs)?;

    for (i, point) in points.iter_mut().enumerate() {
        point.x = xs[i];
        point.y = ys[i];
        point.z = zs[i];
    }
    Ok(())
}

/// Extended formats always carry GPS time
fn with_gps_time(mut point: Point) -> Point {
    if point.gps_time.is_none() {
        point.gps_time = Some(0.0);
    }
    point
}

/// Extended point format for LAS 1.4 output, so classes 32-255 survive
fn output_format(first: Option<&Point>) -> Format {
    let mut format = Format::default();
    if let Some(p) = first {
        format.has_color = p.color.is_some();
        format.has_nir = p.color.is_some() && p.nir.is_some();
        format.has_waveform = p.waveform.is_some();
        format.extra_bytes = p.extra_bytes.len() as u16;
    }
    format.has_gps_time = true;
    format.is_extended = true;
    format.is_compressed = true;
    format
}

/// Compressed writer whose point format and offsets follow `first`
fn create_writer(path: &str, first: Option<&Point>) -> AlignResult<Writer<BufWriter<File>>> {
    let format = output_format(first);
    let offset = first.map_or((0.0, 0.0, 0.0), |p| (p.x.floor(), p.y.floor(), p.z.floor()));

    let mut builder = Builder::from((1, 4));
    builder.point_format = format;
    builder.transforms = Vector {
        x: Transform { scale: OUTPUT_SCALE, offset: offset.0 },
        y: Transform { scale: OUTPUT_SCALE, offset: offset.1 },
        z: Transform { scale: OUTPUT_SCALE, offset: offset.2 },
    };
    let header = builder.into_header()?;

    Writer::from_path(path, header)
        .map_err(|e| AlignError::Extraction(format!("Creating {} failed: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::footprint::square_buffer;
    use las::point::Classification;

    fn point(x: f64, y: f64, class: u8) -> Point {
        Point {
            x,
            y,
            z: 1500.0,
            classification: Classification::new(class).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_chunk_drops_excluded_classes_and_outside_points() {
        let crop = square_buffer(GeoPoint::new(0.0, 0.0), 10.0);
        let points = vec![
            point(0.0, 0.0, 2),
            point(1.0, 1.0, 7),
            point(2.0, 2.0, 18),
            point(3.0, 3.0, 5),
            point(50.0, 0.0, 2),
        ];

        let kept = filter_chunk(points, &crop, &ClassFilter::default());
        let classes: Vec<u8> = kept.iter().map(|p| u8::from(p.classification)).collect();
        assert_eq!(classes, vec![2, 5]);
    }

    #[test]
    fn test_output_format_is_extended() {
        let plain = output_format(Some(&point(0.0, 0.0, 2)));
        assert!(plain.is_extended);
        assert!(plain.has_gps_time);
        assert!(!plain.has_color);
        assert_eq!(plain.to_u8().unwrap(), 6);

        let empty = output_format(None);
        assert_eq!(empty.to_u8().unwrap(), 6);
        assert!(empty.is_compressed);

        let stamped = with_gps_time(point(0.0, 0.0, 2));
        assert_eq!(stamped.gps_time, Some(0.0));
    }

    #[test]
    fn test_vec_source_chunks_are_bounded() {
        let points = (0..25).map(|i| point(i as f64, 0.0, 2)).collect();
        let mut source = VecSource::new(points, 3857);

        let mut sizes = Vec::new();
        while let Some(chunk) = source.read_chunk(10).unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![10, 10, 5]);
    }
}
