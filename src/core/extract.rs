use crate::core::footprint::{Footprint, FootprintBuilder};
use crate::core::pipeline::{ClassFilter, Pipeline, DEFAULT_EXCLUDED_CLASSES};
use crate::types::{AlignError, AlignResult, PointOfInterest};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Points per streamed chunk
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Point-cloud extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    /// Resolution hint passed to the reader
    pub resolution: f64,
    pub exclude_classes: Vec<u8>,
    pub chunk_size: usize,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            exclude_classes: DEFAULT_EXCLUDED_CLASSES.to_vec(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// One lidar acquisition to clip around a point of interest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointCloudRequest {
    pub point: PointOfInterest,
    pub collect_start: NaiveDate,
    pub collect_end: NaiveDate,
    /// Location of the remote point-cloud index (e.g. an `ept.json`)
    pub source_url: String,
}

impl PointCloudRequest {
    /// `{zone}_{x}_{y}_{collect_start}_{collect_end}.laz`
    ///
    /// Only collision-free if the five fields are unique per call.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}.laz",
            self.point.zone,
            self.point.x,
            self.point.y,
            self.collect_start.format("%Y-%m-%d"),
            self.collect_end.format("%Y-%m-%d"),
        )
    }
}

/// Executes a point-cloud pipeline.
///
/// Implementations must stream in chunks of at most `chunk_size` points.
/// Failures while streaming are reported as `AlignError::Extraction`; the
/// output file is undefined after a failure.
pub trait PointCloudService {
    /// Returns the number of points written
    fn execute_streaming(&mut self, pipeline: &Pipeline, chunk_size: usize) -> AlignResult<u64>;
}

/// Clips, filters and reprojects point clouds around points of interest
pub struct PointCloudExtractor<S: PointCloudService> {
    service: S,
    footprints: FootprintBuilder,
    params: ExtractionParams,
}

impl<S: PointCloudService> PointCloudExtractor<S> {
    pub fn new(service: S, footprints: FootprintBuilder, params: ExtractionParams) -> Self {
        Self {
            service,
            footprints,
            params,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Build the footprint for the request and extract into `output_dir`
    pub fn extract_request(
        &mut self,
        request: &PointCloudRequest,
        output_dir: &Path,
    ) -> AlignResult<PathBuf> {
        let footprint = self.footprints.build(&request.point)?;
        let output_path = output_dir.join(request.file_name());
        self.extract(&footprint, &request.source_url, &output_path)
    }

    /// read(footprint) -> class filter -> reproject(output CRS) -> LAZ
    pub fn extract(
        &mut self,
        footprint: &Footprint,
        source_url: &str,
        output_path: &Path,
    ) -> AlignResult<PathBuf> {
        if self.params.chunk_size == 0 {
            return Err(AlignError::Configuration("Chunk size must be positive".to_string()));
        }

        let output_file = output_path.to_str().ok_or_else(|| {
            AlignError::Configuration(format!("Non UTF-8 output path {}", output_path.display()))
        })?;

        let pipeline = Pipeline::extraction(
            source_url,
            footprint.wkt()?,
            self.params.resolution,
            &ClassFilter::new(self.params.exclude_classes.clone()),
            footprint.output_crs,
            output_file,
        )?;

        log::info!("Extracting point cloud from {} to {}", source_url, output_file);
        log::debug!("Pipeline: {}", pipeline.to_json()?);

        let written = self
            .service
            .execute_streaming(&pipeline, self.params.chunk_size)
            .map_err(|e| match e {
                AlignError::Extraction(_) | AlignError::Configuration(_) => e,
                other => AlignError::Extraction(other.to_string()),
            })?;

        log::info!("Wrote {} points to {}", written, output_file);
        Ok(output_path.to_path_buf())
    }
}
