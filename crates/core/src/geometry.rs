//! Field boundary geometry
//!
//! A field is a closed polygon ring of (longitude, latitude) vertices. The
//! pipeline treats it as an opaque area handle; the image source uses it to
//! filter scenes and to clip fetched grids.

use geo::Contains;
use geo_types::{Coord, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Check if two bboxes intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// `[west, south, east, north]`, the order STAC expects
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

/// Closed polygon ring bounding a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct FieldBoundary {
    ring: Vec<(f64, f64)>,
}

impl FieldBoundary {
    /// Build a boundary from a ring of (lon, lat) vertices.
    ///
    /// An open ring is closed by repeating the first vertex. At least three
    /// distinct vertices are required and all coordinates must be finite.
    pub fn new(mut ring: Vec<(f64, f64)>) -> Result<Self> {
        if ring.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(Error::InvalidGeometry("non-finite vertex".into()));
        }
        if let (Some(&first), Some(&last)) = (ring.first(), ring.last()) {
            if first != last {
                ring.push(first);
            }
        }
        if ring.len() < 4 {
            return Err(Error::InvalidGeometry(format!(
                "a polygon ring needs at least 3 distinct vertices, got {}",
                ring.len().saturating_sub(1)
            )));
        }
        Ok(Self { ring })
    }

    /// Parse a GeoJSON Polygon, a Feature wrapping one, or a bare
    /// `coordinates` array. Only the outer ring is used.
    pub fn from_geojson(value: &Value) -> Result<Self> {
        let geometry = match value.get("type").and_then(Value::as_str) {
            Some("Feature") => value
                .get("geometry")
                .ok_or_else(|| Error::InvalidGeometry("feature has no geometry".into()))?,
            _ => value,
        };
        let coordinates = match geometry.get("type").and_then(Value::as_str) {
            Some("Polygon") => geometry
                .get("coordinates")
                .ok_or_else(|| Error::InvalidGeometry("polygon has no coordinates".into()))?,
            Some(other) => {
                return Err(Error::InvalidGeometry(format!(
                    "expected Polygon geometry, got {other}"
                )))
            }
            None => geometry,
        };

        let outer = coordinates
            .get(0)
            .and_then(Value::as_array)
            .ok_or_else(|| Error::InvalidGeometry("missing outer ring".into()))?;

        let ring = outer
            .iter()
            .map(|pt| {
                let x = pt.get(0).and_then(Value::as_f64);
                let y = pt.get(1).and_then(Value::as_f64);
                x.zip(y)
                    .ok_or_else(|| Error::InvalidGeometry(format!("bad vertex: {pt}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(ring)
    }

    /// GeoJSON Polygon geometry
    pub fn to_geojson(&self) -> Value {
        let coords: Vec<[f64; 2]> = self.ring.iter().map(|&(x, y)| [x, y]).collect();
        json!({ "type": "Polygon", "coordinates": [coords] })
    }

    /// Vertices, closed (first == last)
    pub fn ring(&self) -> &[(f64, f64)] {
        &self.ring
    }

    pub fn bbox(&self) -> BBox {
        let mut bbox = BBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for &(x, y) in &self.ring {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }

    pub fn polygon(&self) -> Polygon<f64> {
        let coords: Vec<Coord<f64>> = self.ring.iter().map(|&(x, y)| Coord { x, y }).collect();
        Polygon::new(LineString::new(coords), vec![])
    }

    /// The same ring with every vertex passed through `f` (e.g. a
    /// projection into a scene's CRS).
    pub fn map_coords<F: Fn(f64, f64) -> (f64, f64)>(&self, f: F) -> Self {
        Self {
            ring: self.ring.iter().map(|&(x, y)| f(x, y)).collect(),
        }
    }

    /// Whether a point lies strictly inside the ring
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygon().contains(&Point::new(x, y))
    }
}

impl TryFrom<Vec<(f64, f64)>> for FieldBoundary {
    type Error = Error;

    fn try_from(ring: Vec<(f64, f64)>) -> Result<Self> {
        Self::new(ring)
    }
}

impl From<FieldBoundary> for Vec<(f64, f64)> {
    fn from(field: FieldBoundary) -> Self {
        field.ring
    }
}
