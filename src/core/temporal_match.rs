use crate::core::crs::CrsTransformer;
use crate::types::{
    AlignError, AlignResult, EpsgCode, ImageryScene, Millis, MILLIS_PER_YEAR,
};
use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use geo::{Coord, Intersects, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Vertices of the circular search buffer
const BUFFER_SEGMENTS: usize = 32;

/// Temporal matching parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Search window on either side of the reference date, calendar years
    pub years: u32,
    /// Radius of the search buffer around the reference point, CRS units
    pub search_buffer: f64,
    /// Identifier prefix of primary acquisitions (excludes derived mosaics)
    pub id_prefix: String,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            years: 2,
            search_buffer: 200.0,
            id_prefix: "m_".to_string(),
        }
    }
}

/// Closed time interval in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start: Millis,
    pub end: Millis,
}

impl TimeInterval {
    pub fn instant(t: Millis) -> Self {
        Self { start: t, end: t }
    }

    pub fn of_scene(scene: &ImageryScene) -> Self {
        Self {
            start: scene.start_millis(),
            end: scene.end_millis(),
        }
    }
}

/// Symmetric max-difference join predicate.
///
/// True when either `|left.start - right.end|` or `|left.end - right.start|`
/// is within `tolerance`. Swapping the arguments gives the same answer.
pub fn intervals_match(left: &TimeInterval, right: &TimeInterval, tolerance: Millis) -> bool {
    (left.start - right.end).abs() <= tolerance || (left.end - right.start).abs() <= tolerance
}

/// Distance between the reference instant and a candidate's start
pub fn time_distance(reference: &TimeInterval, candidate: &TimeInterval) -> Millis {
    (candidate.start - reference.start).abs()
}

/// Catalog-side filter: spatial region, date window and identifier prefix
#[derive(Debug, Clone)]
pub struct SceneQuery {
    pub region: Polygon<f64>,
    pub region_epsg: EpsgCode,
    /// Inclusive
    pub start: DateTime<Utc>,
    /// Exclusive
    pub end: DateTime<Utc>,
    pub id_prefix: String,
}

impl SceneQuery {
    /// Does `scene` satisfy every constraint? The region is reprojected
    /// into the scene CRS when they differ.
    pub fn accepts(&self, scene: &ImageryScene) -> AlignResult<bool> {
        if !scene.id.starts_with(&self.id_prefix) {
            return Ok(false);
        }
        if scene.start < self.start || scene.start >= self.end {
            return Ok(false);
        }
        let region = CrsTransformer::new(self.region_epsg, scene.epsg)?.transform_polygon(&self.region)?;
        Ok(region.intersects(&scene.footprint))
    }
}

/// Remote imagery collection
pub trait ImageryCatalog {
    fn search(&self, query: &SceneQuery) -> AlignResult<Vec<ImageryScene>>;
}

impl ImageryCatalog for Vec<ImageryScene> {
    fn search(&self, query: &SceneQuery) -> AlignResult<Vec<ImageryScene>> {
        let mut found = Vec::new();
        for scene in self {
            if query.accepts(scene)? {
                found.push(scene.clone());
            }
        }
        Ok(found)
    }
}

/// A candidate scene with its distance from the reference date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedScene {
    pub scene: ImageryScene,
    pub time_distance: Millis,
}

/// Result of a successful temporal match
#[derive(Debug, Clone)]
pub struct TemporalMatch {
    /// Closest candidate in time
    pub nearest: RankedScene,
    /// Calendar year of the nearest acquisition
    pub year: i32,
    /// Every joined candidate starting in `year`, nearest first
    pub ensemble: Vec<RankedScene>,
}

impl TemporalMatch {
    /// Acquisition date of the nearest scene, `YYYY-MM-DD`
    pub fn acquisition_date(&self) -> String {
        self.nearest.scene.start.format("%Y-%m-%d").to_string()
    }
}

/// Finds the imagery collection event nearest a reference date
pub struct TemporalMatcher {
    params: MatchParams,
}

impl TemporalMatcher {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    /// Join tolerance: `years` * 365 days
    pub fn tolerance(&self) -> Millis {
        self.params.years as Millis * MILLIS_PER_YEAR
    }

    /// Catalog query around `reference_point` for `reference_date ± years`
    pub fn query(
        &self,
        reference_date: NaiveDate,
        reference_point: (f64, f64),
        epsg: EpsgCode,
    ) -> AlignResult<SceneQuery> {
        if self.params.years == 0 {
            return Err(AlignError::Configuration("Search window must be at least one year".to_string()));
        }
        if !(self.params.search_buffer > 0.0) {
            return Err(AlignError::Configuration(format!(
                "Search buffer must be positive, got {}",
                self.params.search_buffer
            )));
        }

        let reference = midnight_utc(reference_date);
        let span = Months::new(12 * self.params.years);
        let start = reference
            .checked_sub_months(span)
            .ok_or_else(|| AlignError::Configuration(format!("Date {} out of range", reference_date)))?;
        let end = reference
            .checked_add_months(span)
            .ok_or_else(|| AlignError::Configuration(format!("Date {} out of range", reference_date)))?;

        Ok(SceneQuery {
            region: circle(reference_point, self.params.search_buffer),
            region_epsg: epsg,
            start,
            end,
            id_prefix: self.params.id_prefix.clone(),
        })
    }

    /// Search the catalog and select the nearest collection year
    pub fn find_nearest<C: ImageryCatalog + ?Sized>(
        &self,
        reference_date: NaiveDate,
        reference_point: (f64, f64),
        epsg: EpsgCode,
        catalog: &C,
    ) -> AlignResult<TemporalMatch> {
        let query = self.query(reference_date, reference_point, epsg)?;
        let candidates = catalog.search(&query)?;
        log::debug!("{} candidate scenes between {} and {}", candidates.len(), query.start, query.end);

        let reference = TimeInterval::instant(midnight_utc(reference_date).timestamp_millis());
        self.select(&reference, candidates).ok_or_else(|| {
            AlignError::NoMatch(format!(
                "No imagery within {} year(s) of {} near ({}, {})",
                self.params.years, reference_date, reference_point.0, reference_point.1
            ))
        })
    }

    /// Join, rank and keep the nearest acquisition's calendar year.
    /// Equal distances are ordered by scene identifier.
    pub fn select(
        &self,
        reference: &TimeInterval,
        candidates: Vec<ImageryScene>,
    ) -> Option<TemporalMatch> {
        let tolerance = self.tolerance();
        let mut ranked: Vec<RankedScene> = candidates
            .into_iter()
            .filter(|scene| intervals_match(reference, &TimeInterval::of_scene(scene), tolerance))
            .map(|scene| RankedScene {
                time_distance: time_distance(reference, &TimeInterval::of_scene(&scene)),
                scene,
            })
            .collect();

        ranked.sort_by(|a, b| {
            a.time_distance
                .cmp(&b.time_distance)
                .then_with(|| a.scene.id.cmp(&b.scene.id))
        });

        let nearest = ranked.first()?.clone();
        let year = nearest.scene.start.year();
        let ensemble: Vec<RankedScene> = ranked
            .into_iter()
            .filter(|r| r.scene.start.year() == year)
            .collect();

        log::info!(
            "Nearest acquisition {} ({} days away), {} scene(s) in {}",
            nearest.scene.id,
            nearest.time_distance / (24 * 60 * 60 * 1000),
            ensemble.len(),
            year
        );

        Some(TemporalMatch {
            nearest,
            year,
            ensemble,
        })
    }
}

impl Default for TemporalMatcher {
    fn default() -> Self {
        Self::new(MatchParams::default())
    }
}

pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Polygonal approximation of a round buffer
fn circle(center: (f64, f64), radius: f64) -> Polygon<f64> {
    let mut coords: Vec<Coord<f64>> = (0..BUFFER_SEGMENTS)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / BUFFER_SEGMENTS as f64;
            Coord {
                x: center.0 + radius * angle.cos(),
                y: center.1 + radius * angle.sin(),
            }
        })
        .collect();
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), vec![])
}
