//! Footprint construction, point-cloud extraction, temporal matching and compositing

pub mod crs;
pub mod footprint;
pub mod pipeline;
pub mod extract;
pub mod temporal_match;
pub mod quality_mosaic;
pub mod grid_resample;
pub mod compute;
pub mod composite;

// Re-export main types
pub use crs::{zone_to_nad83_utm_epsg, zone_to_wgs84_utm_epsg, CrsTransformer};
pub use footprint::{Footprint, FootprintBuilder, FootprintParams};
pub use pipeline::{ClassFilter, Pipeline, Stage};
pub use extract::{ExtractionParams, PointCloudExtractor, PointCloudRequest, PointCloudService};
pub use temporal_match::{ImageryCatalog, MatchParams, RankedScene, SceneQuery, TemporalMatch, TemporalMatcher};
pub use quality_mosaic::{quality_index, CompositeParams, MosaicLayer, QualityMosaic};
pub use grid_resample::{AlignedRaster, ComputeService, GridResampler, MosaicExpression, PixelGrid, PixelRequest, RasterProfile};
pub use compute::{LocalCompute, SceneLoader};
pub use composite::NaipCompositor;
