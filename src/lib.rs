//! coalign: spatiotemporal alignment of aerial lidar and aerial imagery
//!
//! Clips lidar point clouds around points of interest, and builds imagery
//! composites from the acquisition nearest in time to a canopy-height
//! raster, on a pixel grid anchored at that raster's origin.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    AlignError, AlignResult, GeoTransform, ImageryScene, ItemOutcome, PointOfInterest,
    ReferenceMetadata, SceneRaster,
};
pub use config::ProcessingConfig;

pub use io::{GeoTiffCatalog, LasFileSource, ReferenceRaster, StreamingExecutor};
pub use core::{
    FootprintBuilder, GridResampler, LocalCompute, NaipCompositor, PointCloudExtractor,
    QualityMosaic, TemporalMatcher,
};
