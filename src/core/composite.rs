use crate::core::grid_resample::{ComputeService, GridResampler, MosaicExpression};
use crate::core::quality_mosaic::CompositeParams;
use crate::core::temporal_match::{ImageryCatalog, TemporalMatcher};
use crate::io::reference::{write_composite, ReferenceName, ReferenceRaster};
use crate::types::{AlignError, AlignResult, ItemOutcome};
use std::path::{Path, PathBuf};

/// Builds the imagery composite matching one canopy-height raster.
///
/// The catalog and compute service are passed in explicitly; nothing is
/// held between calls.
pub struct NaipCompositor<'a, C: ImageryCatalog + ?Sized, S: ComputeService + ?Sized> {
    catalog: &'a C,
    compute: &'a S,
    matcher: TemporalMatcher,
    composite: CompositeParams,
}

impl<'a, C: ImageryCatalog + ?Sized, S: ComputeService + ?Sized> NaipCompositor<'a, C, S> {
    pub fn new(
        catalog: &'a C,
        compute: &'a S,
        matcher: TemporalMatcher,
        composite: CompositeParams,
    ) -> Self {
        Self {
            catalog,
            compute,
            matcher,
            composite,
        }
    }

    /// Process one reference raster. Never fails: missing imagery is a
    /// skip and any other error is reported as a failed item.
    pub fn process<P: AsRef<Path>>(&self, reference_path: P) -> ItemOutcome {
        let reference_path = reference_path.as_ref();
        let item = reference_path.display().to_string();

        match self.try_process(reference_path) {
            Ok(path) => ItemOutcome::Written(path),
            Err(AlignError::NoMatch(msg)) => {
                log::warn!("Skipping {}: {}", item, msg);
                ItemOutcome::Skipped {
                    item,
                    reason: AlignError::NoMatch(msg),
                }
            }
            Err(error) => {
                log::warn!("{} error: {}", item, error);
                ItemOutcome::Failed { item, error }
            }
        }
    }

    /// reference metadata -> temporal match -> aligned mosaic -> GeoTIFF
    pub fn try_process(&self, reference_path: &Path) -> AlignResult<PathBuf> {
        let name = ReferenceName::parse(reference_path)?;
        let reference = ReferenceRaster::open(reference_path)?;
        let epsg = reference.epsg.ok_or_else(|| {
            AlignError::Configuration(format!(
                "Reference raster {} has no EPSG code",
                reference_path.display()
            ))
        })?;

        let matched = self
            .matcher
            .find_nearest(name.date, reference.origin(), epsg, self.catalog)?;
        let acquisition_date = matched.acquisition_date();
        let resolution = matched.nearest.scene.resolution;

        log::info!(
            "Compositing {} scene(s) from {} at {} resolution",
            matched.ensemble.len(),
            matched.year,
            resolution
        );

        let expression = MosaicExpression {
            scenes: matched.ensemble,
            bands: self.composite.bands.clone(),
        };
        let aligned = GridResampler::new(self.compute).resample(expression, &reference, resolution)?;

        let output_path = name.composite_path(&acquisition_date);
        write_composite(&output_path, &aligned)?;
        Ok(output_path)
    }
}
