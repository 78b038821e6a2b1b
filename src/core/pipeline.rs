//! Typed stages of the point-cloud service's declarative pipeline.
//!
//! Stages serialise to the service's JSON pipeline language, e.g.
//! `{"type": "filters.range", "limits": "Classification![7:7], Classification![18:18]"}`.

use crate::types::{AlignError, AlignResult, EpsgCode};
use serde::{Deserialize, Serialize};

/// Classification codes dropped by default: low point (noise) and high noise
pub const DEFAULT_EXCLUDED_CLASSES: [u8; 2] = [7, 18];

/// Excludes discrete classification codes (each a single code, not a range)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFilter {
    pub excluded: Vec<u8>,
}

impl ClassFilter {
    pub fn new(excluded: Vec<u8>) -> Self {
        Self { excluded }
    }

    pub fn retains(&self, classification: u8) -> bool {
        !self.excluded.contains(&classification)
    }

    /// Range expression understood by `filters.range`
    pub fn limits(&self) -> String {
        self.excluded
            .iter()
            .map(|c| format!("Classification![{}:{}]", c, c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_CLASSES.to_vec())
    }
}

/// One stage of a point-cloud pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stage {
    #[serde(rename = "readers.ept")]
    Read {
        filename: String,
        /// Query polygon as WKT
        polygon: String,
        /// Coarseness hint; the service may return denser data
        resolution: f64,
    },
    #[serde(rename = "filters.range")]
    Filter { limits: String },
    #[serde(rename = "filters.reprojection")]
    Reproject { out_srs: String },
    #[serde(rename = "writers.las")]
    Write { compression: String, filename: String },
}

impl Stage {
    pub fn read(filename: &str, polygon_wkt: String, resolution: f64) -> Self {
        Stage::Read {
            filename: filename.to_string(),
            polygon: polygon_wkt,
            resolution,
        }
    }

    pub fn exclude_classes(filter: &ClassFilter) -> Self {
        Stage::Filter { limits: filter.limits() }
    }

    pub fn reproject(epsg: EpsgCode) -> Self {
        Stage::Reproject { out_srs: format!("EPSG:{}", epsg) }
    }

    pub fn write_laz(filename: &str) -> Self {
        Stage::Write {
            compression: "laszip".to_string(),
            filename: filename.to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Stage::Read { .. } => "read",
            Stage::Filter { .. } => "filter",
            Stage::Reproject { .. } => "reproject",
            Stage::Write { .. } => "write",
        }
    }
}

/// Ordered list of stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(rename = "pipeline")]
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> AlignResult<Self> {
        let pipeline = Self { stages };
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// read -> class filter -> reprojection -> compressed write
    pub fn extraction(
        source_url: &str,
        polygon_wkt: String,
        resolution: f64,
        filter: &ClassFilter,
        output_crs: EpsgCode,
        output_file: &str,
    ) -> AlignResult<Self> {
        Self::new(vec![
            Stage::read(source_url, polygon_wkt, resolution),
            Stage::exclude_classes(filter),
            Stage::reproject(output_crs),
            Stage::write_laz(output_file),
        ])
    }

    /// Reader first, writer last, filters before reprojection in between
    pub fn validate(&self) -> AlignResult<()> {
        let n = self.stages.len();
        if n < 2 {
            return Err(AlignError::Configuration(format!(
                "Pipeline needs at least a reader and a writer, got {} stage(s)",
                n
            )));
        }
        if !matches!(self.stages[0], Stage::Read { .. }) {
            return Err(AlignError::Configuration(format!(
                "First stage must be a reader, got {}",
                self.stages[0].kind()
            )));
        }
        if !matches!(self.stages[n - 1], Stage::Write { .. }) {
            return Err(AlignError::Configuration(format!(
                "Last stage must be a writer, got {}",
                self.stages[n - 1].kind()
            )));
        }

        let mut reprojected = false;
        for stage in &self.stages[1..n - 1] {
            match stage {
                Stage::Filter { .. } if reprojected => {
                    return Err(AlignError::Configuration(
                        "Classification filter must precede reprojection".to_string(),
                    ));
                }
                Stage::Filter { .. } => {}
                Stage::Reproject { .. } if reprojected => {
                    return Err(AlignError::Configuration(
                        "Pipeline reprojects more than once".to_string(),
                    ));
                }
                Stage::Reproject { .. } => reprojected = true,
                other => {
                    return Err(AlignError::Configuration(format!(
                        "Unexpected {} stage in the middle of the pipeline",
                        other.kind()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> AlignResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn read_stage(&self) -> Option<(&str, &str, f64)> {
        self.stages.iter().find_map(|s| match s {
            Stage::Read { filename, polygon, resolution } => {
                Some((filename.as_str(), polygon.as_str(), *resolution))
            }
            _ => None,
        })
    }

    /// Union of all exclusion filters, parsed back from their limits
    pub fn class_filter(&self) -> AlignResult<ClassFilter> {
        let mut excluded = Vec::new();
        for stage in &self.stages {
            if let Stage::Filter { limits } = stage {
                excluded.extend(parse_exclusions(limits)?);
            }
        }
        Ok(ClassFilter::new(excluded))
    }

    pub fn output_srs(&self) -> Option<&str> {
        self.stages.iter().find_map(|s| match s {
            Stage::Reproject { out_srs } => Some(out_srs.as_str()),
            _ => None,
        })
    }

    pub fn output_file(&self) -> Option<&str> {
        self.stages.iter().find_map(|s| match s {
            Stage::Write { filename, .. } => Some(filename.as_str()),
            _ => None,
        })
    }
}

/// Parse `EPSG:nnnn`
pub fn parse_epsg(srs: &str) -> AlignResult<EpsgCode> {
    srs.strip_prefix("EPSG:")
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| AlignError::Configuration(format!("Unsupported SRS '{}'", srs)))
}

fn parse_exclusions(limits: &str) -> AlignResult<Vec<u8>> {
    let mut codes = Vec::new();
    for term in limits.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let range = term
            .strip_prefix("Classification![")
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(|| AlignError::Configuration(format!("Unsupported range '{}'", term)))?;
        let (lo, hi) = range
            .split_once(':')
            .ok_or_else(|| AlignError::Configuration(format!("Unsupported range '{}'", term)))?;
        let lo: u8 = lo.parse().map_err(|_| AlignError::Configuration(format!("Bad class in '{}'", term)))?;
        let hi: u8 = hi.parse().map_err(|_| AlignError::Configuration(format!("Bad class in '{}'", term)))?;
        codes.extend(lo..=hi);
    }
    Ok(codes)
}
