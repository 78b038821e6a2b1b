use crate::core::extract::ExtractionParams;
use crate::core::footprint::FootprintParams;
use crate::core::quality_mosaic::CompositeParams;
use crate::core::temporal_match::MatchParams;
use crate::types::{AlignError, AlignResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters shared by every item of a batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub footprint: FootprintParams,
    pub extraction: ExtractionParams,
    pub matching: MatchParams,
    pub composite: CompositeParams,
}

impl ProcessingConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> AlignResult<Self> {
        log::info!("Loading configuration: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> AlignResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject shared parameters that would fail every item
    pub fn validate(&self) -> AlignResult<()> {
        let radius = self.footprint.buffer_radius;
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(AlignError::Configuration(format!(
                "Buffer radius must be positive, got {}",
                radius
            )));
        }
        if self.extraction.chunk_size == 0 {
            return Err(AlignError::Configuration("Chunk size must be positive".to_string()));
        }
        if !(self.extraction.resolution > 0.0) {
            return Err(AlignError::Configuration(format!(
                "Reader resolution must be positive, got {}",
                self.extraction.resolution
            )));
        }
        if self.matching.years == 0 {
            return Err(AlignError::Configuration("Search window must be at least one year".to_string()));
        }
        if !(self.matching.search_buffer > 0.0) {
            return Err(AlignError::Configuration(format!(
                "Search buffer must be positive, got {}",
                self.matching.search_buffer
            )));
        }
        if self.composite.bands.is_empty() {
            return Err(AlignError::Configuration("No output bands selected".to_string()));
        }
        Ok(())
    }
}
