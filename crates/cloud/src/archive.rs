//! STAC-backed [`ImageSource`].
//!
//! `query` runs an item search for one day and remembers the returned items
//! in a bounded LRU; `fetch` downloads the requested assets of a remembered item, decodes
//! them, crops them to the field's bounding box in the asset CRS and builds
//! the inside-field mask.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::{debug, info, warn};

use fieldprod_core::io::read_geotiff_from_buffer;
use fieldprod_core::{DateRange, FetchedScene, FieldBoundary, ImageSource, Raster, SceneInfo};

use crate::error::{CloudError, Result};
use crate::stac_client::{StacCatalog, StacClientOptions, LANDSAT_C2_L2};
use crate::stac_models::{StacItem, StacSearchParams};
use crate::sync_api::StacClientBlocking;
use crate::utm::Projection;

/// Items kept for `fetch` unless overridden with
/// [`StacArchive::with_item_capacity`]
pub const DEFAULT_ITEM_CAPACITY: usize = 256;

/// A STAC catalog seen as a satellite archive.
pub struct StacArchive {
    client: StacClientBlocking,
    collection: String,
    page_limit: u32,
    /// Most recently returned items, by id
    items: Mutex<LruCache<String, StacItem>>,
}

fn item_cache(capacity: usize) -> LruCache<String, StacItem> {
    LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN))
}

impl StacArchive {
    /// Archive over Landsat Collection 2 Level-2.
    pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
        Ok(Self {
            client: StacClientBlocking::new(catalog, options)?,
            collection: LANDSAT_C2_L2.to_string(),
            page_limit: 100,
            items: Mutex::new(item_cache(DEFAULT_ITEM_CAPACITY)),
        })
    }

    /// Keep at most `capacity` queried items (minimum 1).
    pub fn with_item_capacity(self, capacity: usize) -> Self {
        Self {
            items: Mutex::new(item_cache(capacity)),
            ..self
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Search body for scenes over `area` in `range`.
    pub fn search_params(&self, area: &FieldBoundary, range: DateRange, max_cloud_cover: f64) -> StacSearchParams {
        StacSearchParams::new()
            .intersects(area.to_geojson())
            .datetime(range.to_interval())
            .collections(&[self.collection.as_str()])
            .max_cloud_cover(max_cloud_cover)
            .limit(self.page_limit)
    }

    fn remembered(&self, id: &str) -> Result<StacItem> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| CloudError::Stac("item cache lock poisoned".into()))?;
        items
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::UnknownItem(id.to_string()))
    }

    fn remember(&self, found: Vec<StacItem>) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| CloudError::Stac("item cache lock poisoned".into()))?;
        for item in found {
            items.put(item.id.clone(), item);
        }
        Ok(())
    }

    fn search_scenes(&self, area: &FieldBoundary, range: DateRange, max_cloud_cover: f64) -> Result<Vec<SceneInfo>> {
        let items = self
            .client
            .search_all(&self.search_params(area, range, max_cloud_cover))?;

        let mut scenes = Vec::with_capacity(items.len());
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            match item.scene_info() {
                Some(scene) if range.contains(scene.date) && scene.cloud_cover < max_cloud_cover => {
                    scenes.push(scene);
                    kept.push(item);
                }
                Some(_) => {}
                None => debug!("Ignoring item {} without date or cloud cover", item.id),
            }
        }
        self.remember(kept)?;
        Ok(scenes)
    }

    fn fetch_scene(&self, scene: &SceneInfo, area: &FieldBoundary, bands: &[&str]) -> Result<FetchedScene> {
        let item = self.remembered(&scene.id)?;
        let projection = match item.epsg() {
            Some(epsg) => Projection::from_epsg(epsg)?,
            None => {
                let (lon, lat) = area.ring()[0];
                let guess = Projection::utm_for(lon, lat);
                warn!("Item {} has no projection, assuming {guess:?}", item.id);
                guess
            }
        };
        let field = projection.project_field(area);
        let bbox = field.bbox();

        let mut grids = Vec::with_capacity(bands.len());
        for &band in bands {
            let asset = item.asset(band).ok_or_else(|| CloudError::MissingAsset {
                item: item.id.clone(),
                asset: band.to_string(),
            })?;
            let bytes = self.client.fetch_asset(&asset.href)?;
            let full: Raster<f64> = read_geotiff_from_buffer(&bytes)?;
            let (row0, col0, rows, cols) = full
                .transform()
                .window_for_bbox(&bbox, full.cols(), full.rows())
                .ok_or_else(|| CloudError::OutsideAsset(asset.href.clone()))?;
            debug!("{band}: window {rows}x{cols} at ({row0}, {col0})");
            grids.push((band.to_string(), full.window(row0, col0, rows, cols)?));
        }

        // Bands of one scene share a grid; guard against off-by-one windows
        let rows = grids.iter().map(|(_, g)| g.rows()).min().unwrap_or(0);
        let cols = grids.iter().map(|(_, g)| g.cols()).min().unwrap_or(0);
        let bands = grids
            .into_iter()
            .map(|(name, g)| -> Result<(String, Raster<f64>)> {
                let g = if g.shape() == (rows, cols) { g } else { g.window(0, 0, rows, cols)? };
                Ok((name, g))
            })
            .collect::<Result<Vec<_>>>()?;

        let valid_mask = match bands.first() {
            Some((_, reference)) => field_mask(reference, &field),
            None => Raster::new(rows, cols),
        };
        info!("Fetched {} ({rows}x{cols})", item.id);
        Ok(FetchedScene { bands, valid_mask })
    }
}

/// 1 where the cell centre lies inside `field` (already in the grid's CRS)
/// and the cell holds data, 0 elsewhere.
pub fn field_mask(grid: &Raster<f64>, field: &FieldBoundary) -> Raster<u8> {
    let mut mask = grid.with_same_meta::<u8>();
    let transform = *grid.transform();
    for ((row, col), &v) in grid.data().indexed_iter() {
        let in_footprint = v.is_finite() && v != 0.0 && !grid.is_nodata(v);
        let (x, y) = transform.pixel_to_geo(col, row);
        if in_footprint && field.contains(x, y) {
            mask.data_mut()[[row, col]] = 1;
        }
    }
    mask
}

impl ImageSource for StacArchive {
    fn query(
        &self,
        area: &FieldBoundary,
        range: DateRange,
        max_cloud_cover: f64,
    ) -> fieldprod_core::Result<Vec<SceneInfo>> {
        Ok(self.search_scenes(area, range, max_cloud_cover)?)
    }

    fn fetch(
        &self,
        scene: &SceneInfo,
        area: &FieldBoundary,
        bands: &[&str],
    ) -> fieldprod_core::Result<FetchedScene> {
        Ok(self.fetch_scene(scene, area, bands)?)
    }
}
