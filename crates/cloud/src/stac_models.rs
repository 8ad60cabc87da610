//! STAC Item Search request and response models.
//!
//! Only the subset the acquisition search touches is modelled: bbox,
//! datetime and cloud-cover filters on the way out; id, date, cloud cover,
//! projection and assets on the way back. Everything else is kept as raw
//! JSON in `extra` maps.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use fieldprod_core::SceneInfo;

/// Body of `POST /search`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StacSearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    /// GeoJSON geometry the items must intersect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersects: Option<Value>,

    /// RFC 3339 instant or `start/end` interval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Query extension filters, e.g. `{"eo:cloud_cover": {"lt": 20}}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,

    /// Pagination token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl StacSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[west, south, east, north]` in WGS84
    pub fn bbox(mut self, bbox: [f64; 4]) -> Self {
        self.bbox = Some(bbox.to_vec());
        self
    }

    pub fn intersects(mut self, geometry: Value) -> Self {
        self.intersects = Some(geometry);
        self
    }

    pub fn datetime(mut self, dt: impl Into<String>) -> Self {
        self.datetime = Some(dt.into());
        self
    }

    pub fn collections(mut self, cols: &[&str]) -> Self {
        self.collections = Some(cols.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Only items with `eo:cloud_cover` strictly below `percent`.
    pub fn max_cloud_cover(mut self, percent: f64) -> Self {
        let filter = json!({ "eo:cloud_cover": { "lt": percent } });
        match self.query.as_mut().and_then(Value::as_object_mut) {
            Some(existing) => {
                if let Value::Object(f) = filter {
                    existing.extend(f);
                }
            }
            None => self.query = Some(filter),
        }
        self
    }
}

/// One page of search results (a GeoJSON FeatureCollection).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemCollection {
    #[serde(default)]
    pub features: Vec<StacItem>,

    #[serde(default)]
    pub links: Vec<StacLink>,

    #[serde(rename = "numberMatched", skip_serializing_if = "Option::is_none")]
    pub number_matched: Option<u64>,
}

impl StacItemCollection {
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// One scene.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItem {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    pub properties: StacItemProperties,

    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl StacItem {
    pub fn asset(&self, key: &str) -> Option<&StacAsset> {
        self.assets.get(key)
    }

    /// `eo:cloud_cover`, when present and finite
    pub fn cloud_cover(&self) -> Option<f64> {
        self.properties.eo_cloud_cover.filter(|c| c.is_finite())
    }

    /// Calendar date of the acquisition (UTC).
    pub fn acquisition_date(&self) -> Option<NaiveDate> {
        let raw = self.properties.datetime.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.date_naive())
            .or_else(|| raw.get(..10).and_then(|d| d.parse().ok()))
    }

    /// EPSG code of the item's assets.
    ///
    /// Reads `proj:epsg`, or the newer `proj:code` (`"EPSG:32644"`).
    pub fn epsg(&self) -> Option<u32> {
        let extra = &self.properties.extra;
        if let Some(code) = extra.get("proj:epsg").and_then(Value::as_u64) {
            return u32::try_from(code).ok();
        }
        extra
            .get("proj:code")
            .and_then(Value::as_str)
            .and_then(|c| c.strip_prefix("EPSG:"))
            .and_then(|c| c.parse().ok())
    }

    /// The search-facing summary, or `None` when date or cloud cover is
    /// missing (such items cannot be ranked).
    pub fn scene_info(&self) -> Option<SceneInfo> {
        Some(SceneInfo {
            id: self.id.clone(),
            cloud_cover: self.cloud_cover()?,
            date: self.acquisition_date()?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(rename = "eo:cloud_cover", skip_serializing_if = "Option::is_none")]
    pub eo_cloud_cover: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A downloadable file of an item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacAsset {
    pub href: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// Pagination and relation links.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,

    /// `GET` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Merge `body` into the previous request body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "id": "LC09_L2SP_144048_20240812_02_T1",
      "bbox": [78.1, 15.2, 80.3, 17.4],
      "properties": {
        "datetime": "2024-08-12T05:02:17.123456Z",
        "eo:cloud_cover": 7.41,
        "platform": "landsat-9",
        "proj:epsg": 32644
      },
      "assets": {
        "red": {
          "href": "https://example.com/LC09_SR_B4.TIF",
          "type": "image/tiff; application=geotiff; profile=cloud-optimized",
          "roles": ["data"]
        },
        "qa_pixel": {
          "href": "https://example.com/LC09_QA_PIXEL.TIF",
          "roles": ["cloud", "cloud-shadow"]
        }
      },
      "collection": "landsat-c2-l2"
    },
    {
      "type": "Feature",
      "id": "LC08_NO_CLOUD",
      "properties": { "datetime": "2024-08-11T05:00:00Z", "proj:code": "EPSG:32643" },
      "assets": {}
    }
  ],
  "links": [
    { "rel": "next", "href": "https://example.com/search", "method": "POST",
      "body": { "token": "next:abc" }, "merge": true },
    { "rel": "self", "href": "https://example.com/search" }
  ],
  "numberMatched": 2
}"#;

    fn fixture() -> StacItemCollection {
        serde_json::from_str(FIXTURE).unwrap()
    }

    #[test]
    fn parse_landsat_item() {
        let col = fixture();
        assert_eq!(col.len(), 2);
        assert_eq!(col.number_matched, Some(2));

        let item = &col.features[0];
        assert_eq!(item.collection.as_deref(), Some("landsat-c2-l2"));
        assert_eq!(item.epsg(), Some(32644));
        assert_eq!(item.acquisition_date(), NaiveDate::from_ymd_opt(2024, 8, 12));
        assert!(item.asset("qa_pixel").is_some());
        assert!(item.asset("nir08").is_none());
    }

    #[test]
    fn scene_info_requires_cloud_cover() {
        let col = fixture();
        let scene = col.features[0].scene_info().unwrap();
        assert_eq!(scene.id, "LC09_L2SP_144048_20240812_02_T1");
        assert!((scene.cloud_cover - 7.41).abs() < 1e-12);

        assert!(col.features[1].scene_info().is_none());
        assert_eq!(col.features[1].epsg(), Some(32643));
    }

    #[test]
    fn next_link_is_post_merge() {
        let col = fixture();
        let next = col.next_link().unwrap();
        assert_eq!(next.method.as_deref(), Some("POST"));
        assert_eq!(next.merge, Some(true));
    }

    #[test]
    fn search_body() {
        let params = StacSearchParams::new()
            .bbox([79.28, 16.05, 79.29, 16.06])
            .datetime("2024-08-15T00:00:00Z/2024-08-16T00:00:00Z")
            .collections(&["landsat-c2-l2"])
            .max_cloud_cover(20.0)
            .limit(50);

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["collections"], json!(["landsat-c2-l2"]));
        assert_eq!(json["query"]["eo:cloud_cover"]["lt"], 20.0);
        assert_eq!(json["limit"], 50);
        assert!(json.get("token").is_none());
        assert!(json.get("intersects").is_none());
    }

    #[test]
    fn empty_params_serialize_empty() {
        let json = serde_json::to_value(StacSearchParams::new()).unwrap();
        assert!(json.as_object().unwrap().is_empty());
    }
}
