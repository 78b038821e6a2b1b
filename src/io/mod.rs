//! I/O modules for reference rasters, imagery scenes and point clouds

pub mod reference;
pub mod catalog;
pub mod laz;

pub use reference::{write_composite, ReferenceName, ReferenceRaster};
pub use catalog::GeoTiffCatalog;
pub use laz::{LasFileSource, PointSource, StreamingExecutor, VecSource};
