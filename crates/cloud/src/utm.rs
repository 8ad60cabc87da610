//! WGS84 to UTM forward projection.
//!
//! Landsat and Sentinel-2 assets are delivered in UTM (EPSG 326xx / 327xx),
//! while field boundaries arrive as longitude/latitude. Only the forward
//! direction is needed: the field ring is projected into the asset's grid,
//! never the other way round. Series expansion after Snyder (1987),
//! USGS Professional Paper 1395, pp. 61-64.

use fieldprod_core::FieldBoundary;

use crate::error::{CloudError, Result};

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = F * (2.0 - F);
const EP2: f64 = E2 / (1.0 - E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Coordinate system of a scene's assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// EPSG:4326, coordinates pass through
    Geographic,
    Utm { zone: u32, north: bool },
}

impl Projection {
    pub fn from_epsg(epsg: u32) -> Result<Self> {
        match epsg {
            4326 => Ok(Self::Geographic),
            32601..=32660 => Ok(Self::Utm {
                zone: epsg - 32600,
                north: true,
            }),
            32701..=32760 => Ok(Self::Utm {
                zone: epsg - 32700,
                north: false,
            }),
            other => Err(CloudError::UnsupportedCrs(other)),
        }
    }

    /// UTM zone containing a WGS84 point (no Norway/Svalbard exceptions).
    pub fn utm_for(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i64).rem_euclid(60) as u32 + 1;
        Self::Utm {
            zone,
            north: lat >= 0.0,
        }
    }

    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            Self::Geographic => (lon, lat),
            Self::Utm { zone, north } => lonlat_to_utm(lon, lat, zone, north),
        }
    }

    /// The field ring in this projection's coordinates.
    pub fn project_field(&self, field: &FieldBoundary) -> FieldBoundary {
        field.map_coords(|lon, lat| self.forward(lon, lat))
    }
}

/// (easting, northing) in metres.
pub fn lonlat_to_utm(lon: f64, lat: f64, zone: u32, north: bool) -> (f64, f64) {
    let phi = lat.to_radians();
    let central = (f64::from(zone) * 6.0 - 183.0).to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let nu = A / (1.0 - E2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = EP2 * cos_phi * cos_phi;
    let a = cos_phi * (lon.to_radians() - central);
    let m = meridian_distance(phi);

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let easting = FALSE_EASTING
        + K0 * nu
            * (a + (1.0 - t + c) * a3 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * EP2) * a5 / 120.0);

    let mut northing = K0
        * (m + nu
            * tan_phi
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * EP2) * a6 / 720.0));
    if !north {
        northing += FALSE_NORTHING_SOUTH;
    }

    (easting, northing)
}

/// Distance along the meridian from the equator to latitude `phi`.
fn meridian_distance(phi: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;
    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}
