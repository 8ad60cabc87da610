//! Image acquisition from a satellite archive
//!
//! - **search**: lowest-cloud scene around one target date
//! - **yearly**: one index grid per season, most recent first

mod search;
mod yearly;

pub use search::{candidate_dates, find_best_image, ImageMatch, SearchParams};
pub use yearly::{
    acquire_years, growth_season_date, AcquisitionConfig, AcquisitionReport, BandNames,
    SkippedYear,
};
