//! Satellite archive abstraction
//!
//! The acquisition search only needs two things from an archive: list the
//! scenes over a field for a date range, and fetch band grids for one of
//! them. [`ImageSource`] is that seam; STAC-backed and in-memory
//! implementations live outside this crate.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::FieldBoundary;
use crate::raster::Raster;

/// Half-open date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The single calendar day `date`
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date.succ_opt().unwrap_or(date),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// `start/end` interval notation used by STAC `datetime`
    pub fn to_interval(&self) -> String {
        format!(
            "{}T00:00:00Z/{}T00:00:00Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// A scene listed by an archive query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub id: String,
    /// Scene cloud cover in percent
    pub cloud_cover: f64,
    /// Acquisition date
    pub date: NaiveDate,
}

/// Band grids fetched for one scene, clipped to the field's extent.
#[derive(Debug, Clone)]
pub struct FetchedScene {
    /// Band name to grid, all the same shape
    pub bands: Vec<(String, Raster<f64>)>,
    /// 1 inside both the field polygon and the scene footprint, 0 elsewhere
    pub valid_mask: Raster<u8>,
}

impl FetchedScene {
    pub fn band(&self, name: &str) -> Option<&Raster<f64>> {
        self.bands
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, raster)| raster)
    }
}

/// An archive of satellite scenes.
///
/// Implementations are queried one day at a time by the acquisition search
/// and must not be driven concurrently for the same field.
pub trait ImageSource {
    /// Scenes intersecting `area` inside `range` with cloud cover strictly
    /// below `max_cloud_cover`.
    fn query(
        &self,
        area: &FieldBoundary,
        range: DateRange,
        max_cloud_cover: f64,
    ) -> Result<Vec<SceneInfo>>;

    /// Fetch the named bands of `scene`, clipped to `area`'s bounding box.
    fn fetch(&self, scene: &SceneInfo, area: &FieldBoundary, bands: &[&str])
        -> Result<FetchedScene>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_range() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let range = DateRange::day(d);
        assert!(range.contains(d));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
        assert_eq!(
            range.to_interval(),
            "2024-02-29T00:00:00Z/2024-03-01T00:00:00Z"
        );
    }
}
