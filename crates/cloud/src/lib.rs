//! # fieldprod Cloud
//!
//! Satellite archive access over STAC APIs.
//!
//! - [`StacClient`]: async item search, asset download, Planetary Computer signing
//! - [`StacClientBlocking`]: the same behind a current-thread runtime
//! - [`StacArchive`]: an [`fieldprod_core::ImageSource`] over a STAC catalog
//! - [`utm`]: WGS84 to UTM projection of field boundaries

pub mod archive;
pub mod error;
pub mod stac_client;
pub mod stac_models;
pub mod sync_api;
pub mod utm;

pub use archive::{field_mask, StacArchive};
pub use error::{CloudError, Result};
pub use stac_client::{StacCatalog, StacClient, StacClientOptions, LANDSAT_C2_L2};
pub use stac_models::{StacItem, StacItemCollection, StacSearchParams};
pub use sync_api::StacClientBlocking;
pub use utm::Projection;
