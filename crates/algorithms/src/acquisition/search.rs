//! Single-year image search
//!
//! Scans calendar days outward from a target date, alternating backward and
//! forward, and keeps the lowest-cloud scene. The scan stops early as soon as
//! a scene is clear enough that nothing later could matter.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fieldprod_core::{DateRange, Error, FieldBoundary, ImageSource, Result, SceneInfo};

/// Parameters for [`find_best_image`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Scenes must have cloud cover strictly below this percentage (default: 20)
    pub max_cloud_cover: f64,
    /// Search radius in days around the target (default: 45)
    pub max_search_days: u32,
    /// A scene below this cloud cover ends the scan immediately (default: 5)
    pub excellent_cloud_cover: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_cloud_cover: 20.0,
            max_search_days: 45,
            excellent_cloud_cover: 5.0,
        }
    }
}

/// The scene selected for one target date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMatch {
    pub scene: SceneInfo,
    pub target_date: NaiveDate,
    /// Absolute distance between the scene date and the target
    pub days_from_target: i64,
    /// How many candidate days were queried before the scan ended
    pub candidates_examined: usize,
}

impl ImageMatch {
    pub fn actual_date(&self) -> NaiveDate {
        self.scene.date
    }

    pub fn cloud_cover(&self) -> f64 {
        self.scene.cloud_cover
    }
}

/// Candidate days in scan order: the target, then for each offset
/// `1..=max_search_days` the day `offset` before followed by the day
/// `offset` after. Days outside chrono's range are skipped.
pub fn candidate_dates(target: NaiveDate, max_search_days: u32) -> impl Iterator<Item = NaiveDate> {
    std::iter::once(target).chain((1..=u64::from(max_search_days)).flat_map(move |offset| {
        let days = Days::new(offset);
        [target.checked_sub_days(days), target.checked_add_days(days)]
            .into_iter()
            .flatten()
    }))
}

/// Find the lowest-cloud scene within `max_search_days` of `target_date`.
///
/// Ties keep the first scene found, so at equal cloud cover the earlier
/// candidate in scan order (the backward date at equal offset) wins.
/// A query error from the source aborts the scan.
pub fn find_best_image<S>(
    source: &S,
    area: &FieldBoundary,
    target_date: NaiveDate,
    params: &SearchParams,
) -> Result<ImageMatch>
where
    S: ImageSource + ?Sized,
{
    if !(params.max_cloud_cover > 0.0) {
        return Err(Error::InvalidParameter {
            name: "max_cloud_cover",
            value: params.max_cloud_cover.to_string(),
            reason: "must be a positive percentage".into(),
        });
    }

    let mut best: Option<SceneInfo> = None;
    let mut examined = 0usize;

    for date in candidate_dates(target_date, params.max_search_days) {
        examined += 1;
        let scenes = source.query(area, DateRange::day(date), params.max_cloud_cover)?;

        let hit = scenes
            .into_iter()
            .filter(|s| s.cloud_cover.is_finite() && s.cloud_cover < params.max_cloud_cover)
            .min_by(|a, b| a.cloud_cover.total_cmp(&b.cloud_cover));

        let Some(hit) = hit else {
            debug!("{date}: no scene below {}% cloud", params.max_cloud_cover);
            continue;
        };
        debug!("{date}: {} at {:.2}% cloud", hit.id, hit.cloud_cover);

        if hit.cloud_cover < params.excellent_cloud_cover {
            info!(
                "Excellent scene {} on {date} ({:.2}% cloud), stopping search",
                hit.id, hit.cloud_cover
            );
            return Ok(build_match(hit, target_date, examined));
        }

        if best.as_ref().map_or(true, |b| hit.cloud_cover < b.cloud_cover) {
            best = Some(hit);
        }
    }

    match best {
        Some(scene) => {
            info!(
                "Selected {} on {} ({:.2}% cloud) for target {target_date}",
                scene.id, scene.date, scene.cloud_cover
            );
            Ok(build_match(scene, target_date, examined))
        }
        None => Err(Error::ImageNotFound {
            target_date,
            max_search_days: params.max_search_days,
            max_cloud_cover: params.max_cloud_cover,
        }),
    }
}

fn build_match(scene: SceneInfo, target_date: NaiveDate, examined: usize) -> ImageMatch {
    ImageMatch {
        days_from_target: (scene.date - target_date).num_days().abs(),
        scene,
        target_date,
        candidates_examined: examined,
    }
}
