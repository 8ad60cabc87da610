//! Multi-year acquisition loop
//!
//! One scene per year around a fixed seasonal date, walking back from the
//! most recent season. Years are acquired strictly one after another; a year
//! with no usable scene is skipped, not fatal.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fieldprod_core::{
    Error, FieldBoundary, ImageSource, Raster, RasterStack, RasterYear, Result, YearMeta,
};

use super::search::{find_best_image, ImageMatch, SearchParams};
use crate::imagery::{apply_mask, apply_scale_offset, ndvi, qa_cloud_mask};

/// Archive band names used to build the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandNames {
    pub red: String,
    pub nir: String,
    /// QA bit-field band; `None` disables cloud masking
    pub qa: Option<String>,
}

impl Default for BandNames {
    /// Landsat Collection 2 Level-2 asset keys
    fn default() -> Self {
        Self {
            red: "red".into(),
            nir: "nir08".into(),
            qa: Some("qa_pixel".into()),
        }
    }
}

/// Acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Years requested (default: 5)
    pub years: usize,
    /// Fewer acquired years than this is fatal (default: 1)
    pub min_years: usize,
    /// Oldest year the archive is searched for (default: 2019)
    pub earliest_year: i32,
    /// Seasonal reference month (default: 8)
    pub season_month: u32,
    /// Seasonal reference day (default: 15)
    pub season_day: u32,
    pub max_cloud_cover: f64,
    pub max_search_days: u32,
    pub excellent_cloud_cover: f64,
    pub bands: BandNames,
    /// DN to reflectance scale (default: 2.75e-5)
    pub scale: f64,
    /// DN to reflectance offset (default: -0.2)
    pub offset: f64,
    /// Value written outside the field polygon (default: -1.0)
    pub fill_value: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        let search = SearchParams::default();
        Self {
            years: 5,
            min_years: 1,
            earliest_year: 2019,
            season_month: 8,
            season_day: 15,
            max_cloud_cover: search.max_cloud_cover,
            max_search_days: search.max_search_days,
            excellent_cloud_cover: search.excellent_cloud_cover,
            bands: BandNames::default(),
            scale: 2.75e-5,
            offset: -0.2,
            fill_value: -1.0,
        }
    }
}

impl AcquisitionConfig {
    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            max_cloud_cover: self.max_cloud_cover,
            max_search_days: self.max_search_days,
            excellent_cloud_cover: self.excellent_cloud_cover,
        }
    }
}

/// A year the loop attempted but could not acquire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedYear {
    pub year: i32,
    pub reason: String,
}

/// Everything the acquisition loop produced.
#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    /// Most-recent-first stack of index grids
    pub stack: RasterStack,
    pub matches: Vec<ImageMatch>,
    pub skipped: Vec<SkippedYear>,
    /// Non-fatal conditions, e.g. fewer years than requested
    pub warnings: Vec<String>,
}

/// The seasonal reference date for `today`.
///
/// When `today` is still before the reference month the season has not
/// happened yet, so last year's date is used.
pub fn growth_season_date(today: NaiveDate, month: u32, day: u32) -> Result<NaiveDate> {
    let year = if today.month() < month {
        today.year() - 1
    } else {
        today.year()
    };
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| Error::InvalidParameter {
        name: "season",
        value: format!("{month:02}-{day:02}"),
        reason: "not a valid calendar date".into(),
    })
}

/// Same month/day in another year; Feb 29 falls back to Feb 28.
fn same_day_in(year: i32, base: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, base.month(), base.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, base.month(), 28))
}

/// Acquire one index grid per year, most recent first, starting at the
/// season of `base_date`.
pub fn acquire_years<S>(
    source: &S,
    field: &FieldBoundary,
    config: &AcquisitionConfig,
    base_date: NaiveDate,
) -> Result<AcquisitionReport>
where
    S: ImageSource + ?Sized,
{
    if config.years == 0 {
        return Err(Error::InvalidParameter {
            name: "years",
            value: "0".into(),
            reason: "at least one year must be requested".into(),
        });
    }

    let base_year = base_date.year();
    let available = usize::try_from(base_year - config.earliest_year + 1).unwrap_or(0);
    let requested = config.years.min(available);
    if requested < config.years {
        warn!(
            "Only {available} years available since {}, reducing request from {}",
            config.earliest_year, config.years
        );
    }

    let max_attempts = (config.years + 3).min(available + 2);
    let search = config.search_params();
    let mut acquired: Vec<RasterYear> = Vec::with_capacity(requested);
    let mut matches = Vec::with_capacity(requested);
    let mut skipped = Vec::new();

    for attempt in 0..max_attempts {
        if acquired.len() >= requested {
            break;
        }
        let year = base_year - attempt as i32;
        if year < config.earliest_year {
            break;
        }
        let Some(target) = same_day_in(year, base_date) else {
            continue;
        };

        info!("Acquiring {year} (target {target})");
        match acquire_one(source, field, config, &search, target) {
            Ok((grid, found)) => {
                let meta = YearMeta::acquired(
                    year,
                    target,
                    found.actual_date(),
                    found.cloud_cover(),
                    found.scene.id.clone(),
                );
                acquired.push(RasterYear::new(meta, grid));
                matches.push(found);
            }
            Err(e) => {
                warn!("Skipping {year}: {e}");
                skipped.push(SkippedYear {
                    year,
                    reason: e.to_string(),
                });
            }
        }
    }

    let count = acquired.len();
    if count == 0 {
        return Err(Error::NoYearsAcquired {
            requested: config.years,
        });
    }
    if count < config.min_years {
        return Err(Error::InsufficientYears {
            acquired: count,
            required: config.min_years,
        });
    }

    let mut warnings = Vec::new();
    if count < config.years {
        let msg = Error::InsufficientYears {
            acquired: count,
            required: config.years,
        }
        .to_string();
        warn!("{msg}; continuing with {count} years");
        warnings.push(msg);
    }

    let stack = RasterStack::cropped_to_common(acquired)?;
    info!(
        "Acquired {count} years, grid {}x{}",
        stack.shape().0,
        stack.shape().1
    );

    Ok(AcquisitionReport {
        stack,
        matches,
        skipped,
        warnings,
    })
}

fn acquire_one<S>(
    source: &S,
    field: &FieldBoundary,
    config: &AcquisitionConfig,
    search: &SearchParams,
    target: NaiveDate,
) -> Result<(Raster<f64>, ImageMatch)>
where
    S: ImageSource + ?Sized,
{
    let found = find_best_image(source, field, target, search)?;

    let bands = &config.bands;
    let mut names: Vec<&str> = vec![bands.red.as_str(), bands.nir.as_str()];
    if let Some(qa) = &bands.qa {
        names.push(qa.as_str());
    }
    let scene = source.fetch(&found.scene, field, &names)?;

    let band = |name: &str| {
        scene
            .band(name)
            .ok_or_else(|| Error::Source(format!("scene {} has no band '{name}'", found.scene.id)))
    };
    let red = apply_scale_offset(band(&bands.red)?, config.scale, config.offset);
    let nir = apply_scale_offset(band(&bands.nir)?, config.scale, config.offset);

    let mut index = ndvi(&nir, &red)?;
    if let Some(qa) = &bands.qa {
        apply_mask(&mut index, &qa_cloud_mask(band(qa)?), f64::NAN)?;
    }
    apply_mask(&mut index, &scene.valid_mask, config.fill_value)?;

    Ok((index, found))
}
