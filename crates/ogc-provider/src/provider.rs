//! The provider façade: session ownership and the draw / identify /
//! legend / extent operations.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use image::RgbaImage;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ogc_capabilities::{
    parse_capabilities, Capabilities, LayerProperty, ParseOptions, ServiceHint, TileLayer,
    TileMode,
};
use ogc_common::{
    BoundingBox, BuiltinTransform, CoordTransform, OgcError, OgcResult, TileMatrixSet,
};

use crate::cache::{CacheLoadControl, HttpTileCache};
use crate::extent as extent_calc;
use crate::fetch::{
    FetchCoordinator, ProviderEvent, RequestAuth, TileAttributes, DEFAULT_MAX_RETRY,
    WMS_THRESHOLD,
};
use crate::planner;
use crate::selector;
use crate::session::SessionState;
use crate::uri::SourceUri;

/// Entries kept in the process-wide HTTP cache.
const HTTP_CACHE_CAPACITY: usize = 2048;

/// The HTTP cache is shared by every provider instance in the process.
fn global_cache() -> Arc<HttpTileCache> {
    static CACHE: OnceLock<Arc<HttpTileCache>> = OnceLock::new();
    CACHE
        .get_or_init(|| Arc::new(HttpTileCache::new(HTTP_CACHE_CAPACITY)))
        .clone()
}

/// Outcome of an identify call: one entry per configured sublayer, index-
/// parallel to the session's layer list.
#[derive(Debug)]
pub struct IdentifyResult {
    pub format: String,
    pub layers: Vec<IdentifyLayerResult>,
}

/// Raw feature-information hand-off; decoding the body is the caller's
/// concern.
#[derive(Debug)]
pub enum IdentifyLayerResult {
    NotVisible,
    NotQueryable,
    Raw { content_type: String, body: Bytes },
}

/// A WMS / WMS-C / WMTS raster provider instance.
pub struct RasterProvider {
    uri: SourceUri,
    session: SessionState,
    transform: Arc<dyn CoordTransform>,
    coordinator: FetchCoordinator,
    events: Option<mpsc::Receiver<ProviderEvent>>,
    capabilities: Option<Capabilities>,
    tile_layer: Option<TileLayer>,
    matrix_set: Option<TileMatrixSet>,
    queryable: HashMap<String, bool>,
    layer_extent: Option<BoundingBox>,
    legend: Option<(f64, RgbaImage)>,
    valid: bool,
    last_error_title: String,
    last_error: String,
    last_error_format: String,
}

impl RasterProvider {
    /// Create a provider from an encoded source URI.
    pub fn new(source_uri: &str) -> OgcResult<Self> {
        Self::with_transform(source_uri, Arc::new(BuiltinTransform))
    }

    /// Create a provider with a custom geodetic transform collaborator.
    pub fn with_transform(
        source_uri: &str,
        transform: Arc<dyn CoordTransform>,
    ) -> OgcResult<Self> {
        let uri = SourceUri::parse(source_uri)?;
        let session = uri.clone().into_session();

        let auth = RequestAuth {
            username: session.username.clone(),
            password: session.password.clone(),
            referer: session.referer.clone(),
        };
        let (coordinator, events) = FetchCoordinator::new(
            global_cache(),
            auth,
            session.smooth_pixmap_transform,
            DEFAULT_MAX_RETRY,
        )?;

        Ok(Self {
            uri,
            session,
            transform,
            coordinator,
            events: Some(events),
            capabilities: None,
            tile_layer: None,
            matrix_set: None,
            queryable: HashMap::new(),
            layer_extent: None,
            legend: None,
            valid: true,
            last_error_title: String::new(),
            last_error: String::new(),
            last_error_format: String::new(),
        })
    }

    /// Take the event stream (DataChanged / Status lines). Can be taken
    /// once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ProviderEvent>> {
        self.events.take()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn last_error_title(&self) -> &str {
        &self.last_error_title
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn last_error_format(&self) -> &str {
        &self.last_error_format
    }

    pub fn sub_layers(&self) -> &[String] {
        &self.session.active_layers
    }

    pub fn sub_layer_styles(&self) -> &[String] {
        &self.session.active_styles
    }

    pub fn set_sub_layer_visibility(&mut self, layer: &str, visible: bool) {
        self.session.set_visibility(layer, visible);
    }

    /// The parsed capabilities, if they have been retrieved.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Named WMS layers advertised by the server.
    pub fn supported_layers(&self) -> Vec<&LayerProperty> {
        self.capabilities
            .as_ref()
            .map(|c| c.named_layers())
            .unwrap_or_default()
    }

    /// Tiled layers advertised by the server (WMTS and WMS-C).
    pub fn supported_tile_layers(&self) -> &[TileLayer] {
        self.capabilities
            .as_ref()
            .map(|c| c.capability.tile_layers.as_slice())
            .unwrap_or(&[])
    }

    pub fn supported_matrix_sets(&self) -> Vec<&TileMatrixSet> {
        self.capabilities
            .as_ref()
            .map(|c| c.capability.tile_matrix_sets.values().collect())
            .unwrap_or_default()
    }

    /// Group structure of the layer tree as `order_id -> parent order_id`
    /// plus the display names of the group layers.
    pub fn layer_parents(&self) -> (HashMap<u32, u32>, HashMap<u32, Vec<String>>) {
        match self.capabilities.as_ref() {
            Some(c) => (
                c.capability.layer_parents.clone(),
                c.capability.layer_parent_names.clone(),
            ),
            None => Default::default(),
        }
    }

    fn record_error(&mut self, err: &OgcError) {
        self.last_error_title = err.title().to_string();
        self.last_error = err.to_string();
        self.last_error_format = "text/plain".to_string();
    }

    /// Retrieve and post-process capabilities on first need.
    pub async fn ensure_capabilities(&mut self) -> OgcResult<()> {
        if self.capabilities.is_some() {
            return Ok(());
        }
        self.refresh_capabilities().await
    }

    /// Force a refresh of the capabilities document.
    pub async fn refresh_capabilities(&mut self) -> OgcResult<()> {
        let url = self.uri.capabilities_url();
        info!(url = %url, "retrieving server capabilities");

        let result = async {
            let body = self.coordinator.fetch_capabilities(&url).await?;

            let hint = if self.uri.is_wmts_endpoint() {
                ServiceHint::Wmts
            } else {
                ServiceHint::Auto
            };
            let opts = ParseOptions {
                transform: &*self.transform,
                ignore_axis_orientation: self.session.ignore_axis_orientation,
                invert_axis_orientation: self.session.invert_axis_orientation,
            };
            parse_capabilities(&body, hint, &opts)
        }
        .await;

        match result {
            Ok(caps) => {
                self.install_capabilities(caps)?;
                Ok(())
            }
            Err(err) => {
                self.record_error(&err);
                if err.is_fatal() {
                    self.valid = false;
                }
                Err(err)
            }
        }
    }

    fn install_capabilities(&mut self, caps: Capabilities) -> OgcResult<()> {
        self.queryable = caps
            .named_layers()
            .iter()
            .map(|l| (l.name.clone(), l.queryable))
            .collect();

        if self.session.image_format.is_empty() {
            if let Some(format) = caps.capability.request.get_map.formats.first() {
                self.session.image_format = format.clone();
            }
        }

        if self.session.tiled {
            let identifier = self.session.active_layers.join(",");
            let tile_layer = caps
                .tile_layer(&identifier)
                .cloned()
                .ok_or_else(|| {
                    OgcError::Config(format!("tile layer {} not advertised by server", identifier))
                });
            let tile_layer = match tile_layer {
                Ok(l) => l,
                Err(err) => {
                    self.record_error(&err);
                    self.valid = false;
                    return Err(err);
                }
            };

            let matrix_set = self.resolve_matrix_set(&caps, &tile_layer);
            let matrix_set = match matrix_set {
                Ok(s) => s,
                Err(err) => {
                    self.record_error(&err);
                    self.valid = false;
                    return Err(err);
                }
            };

            // published dimensions the source did not pin ride with their
            // advertised defaults
            for dimension in tile_layer.dimensions.values() {
                self.session
                    .tile_dimension_values
                    .entry(dimension.identifier.clone())
                    .or_insert_with(|| Some(dimension.default_value.clone()));
            }

            if self.session.active_styles.first().is_some_and(|s| s.is_empty()) {
                self.session.active_styles[0] = tile_layer.default_style.clone();
            }

            self.tile_layer = Some(tile_layer);
            self.matrix_set = Some(matrix_set);
        }

        self.capabilities = Some(caps);
        self.layer_extent = None;
        self.valid = true;
        Ok(())
    }

    fn resolve_matrix_set(
        &self,
        caps: &Capabilities,
        tile_layer: &TileLayer,
    ) -> OgcResult<TileMatrixSet> {
        match self.session.tile_matrix_set_id.as_deref() {
            Some(id) if !id.is_empty() => caps
                .capability
                .tile_matrix_sets
                .get(id)
                .cloned()
                .ok_or_else(|| {
                    OgcError::Config(format!("tile matrix set {} not advertised by server", id))
                }),
            // an empty id designates a WMS-C source: pick the linked set
            // matching the image CRS
            _ => tile_layer
                .set_links
                .keys()
                .filter_map(|set_id| caps.capability.tile_matrix_sets.get(set_id))
                .find(|set| {
                    ogc_common::Crs::parse(&set.crs)
                        .map(|crs| crs.equivalent(&self.session.image_crs))
                        .unwrap_or(false)
                })
                .cloned()
                .ok_or_else(|| {
                    OgcError::Config(format!(
                        "no linked tile matrix set matches CRS {}",
                        self.session.image_crs
                    ))
                }),
        }
    }

    fn get_map_base(&self) -> String {
        if self.session.ignore_get_map_url {
            return self.uri.prepared_base_url();
        }
        self.capabilities
            .as_ref()
            .and_then(|c| c.capability.request.get_map.get_url())
            .map(|u| u.to_string())
            .unwrap_or_else(|| self.uri.prepared_base_url())
    }

    fn get_feature_info_base(&self) -> String {
        if self.session.ignore_get_feature_info_url {
            return self.uri.prepared_base_url();
        }
        self.capabilities
            .as_ref()
            .and_then(|c| c.capability.request.get_feature_info.get_url())
            .map(|u| u.to_string())
            .unwrap_or_else(|| self.uri.prepared_base_url())
    }

    fn get_tile_kvp_base(&self) -> Option<String> {
        if self.session.ignore_get_map_url {
            return Some(self.uri.prepared_base_url());
        }
        self.capabilities
            .as_ref()
            .and_then(|c| c.capability.request.get_tile.get_url())
            .map(|u| u.to_string())
    }

    /// The layer extent in the image CRS, computed lazily.
    pub async fn extent(&mut self) -> OgcResult<BoundingBox> {
        if let Some(extent) = self.layer_extent {
            return Ok(extent);
        }
        self.ensure_capabilities().await?;

        let caps = self.capabilities.as_ref().expect("capabilities present");
        let result = extent_calc::calculate_extent(
            caps,
            &self.session,
            self.tile_layer.as_ref(),
            &*self.transform,
        );
        match result {
            Ok(extent) => {
                self.layer_extent = Some(extent);
                Ok(extent)
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Draw the requested view.
    ///
    /// Dispatches the necessary requests, waits up to [`WMS_THRESHOLD`]
    /// for them to land, and returns the (possibly partial) raster. Late
    /// responses keep compositing asynchronously and are announced with
    /// [`ProviderEvent::DataChanged`].
    pub async fn draw(
        &mut self,
        view_extent: BoundingBox,
        pixel_width: u32,
        pixel_height: u32,
    ) -> OgcResult<RgbaImage> {
        self.ensure_capabilities().await?;

        if pixel_width == 0 || pixel_height == 0 {
            return Err(OgcError::Config("draw with zero pixel size".to_string()));
        }

        // identical view: the previous raster is still the answer
        if self
            .coordinator
            .render_matches(&view_extent, pixel_width, pixel_height)
            .await
        {
            if let Some(image) = self.coordinator.snapshot().await {
                return Ok(image);
            }
        }

        let generation = self.coordinator.next_generation();
        self.coordinator
            .begin_render(view_extent, pixel_width, pixel_height, generation)
            .await;

        let tiled_mode =
            self.session.tiled || (self.session.max_width.is_some() && self.session.max_height.is_some());

        if !tiled_mode {
            let caps = self.capabilities.as_ref().expect("capabilities present");
            let (layers, styles) = self.session.visible_layers_and_styles();
            let url = planner::get_map_url(
                &self.get_map_base(),
                &caps.version.clone(),
                caps.dialect,
                &self.session,
                &layers,
                &styles,
                &view_extent,
                pixel_width,
                pixel_height,
            );
            debug!(url = %url, "getmap");
            self.coordinator.dispatch_map(url, generation);
            self.coordinator.wait_for_map(WMS_THRESHOLD).await;
        } else {
            match self
                .dispatch_tiled(&view_extent, pixel_width, pixel_height, generation)
                .await
            {
                Ok(Some(batch)) => {
                    self.coordinator.wait_for_batch(&batch, WMS_THRESHOLD).await;
                    debug!(outstanding = batch.outstanding(), "tile requests in background");
                }
                // tile budget exceeded: the current image stands
                Ok(None) => {}
                Err(err) => {
                    self.record_error(&err);
                    return Err(err);
                }
            }
        }

        self.coordinator
            .snapshot()
            .await
            .ok_or_else(|| OgcError::Content("no cached image".to_string()))
    }

    async fn dispatch_tiled(
        &mut self,
        view_extent: &BoundingBox,
        pixel_width: u32,
        _pixel_height: u32,
        generation: u64,
    ) -> OgcResult<Option<crate::fetch::DrawBatch>> {
        let vres = view_extent.width() / pixel_width as f64;

        let (resolution, matrix, limits, tile_mode) = if self.session.tiled {
            let matrix_set = self
                .matrix_set
                .as_ref()
                .ok_or_else(|| OgcError::Config("tiled session without matrix set".to_string()))?;
            let tile_layer = self
                .tile_layer
                .as_ref()
                .ok_or_else(|| OgcError::Config("tiled session without tile layer".to_string()))?;

            let (resolution, matrix) = selector::select_matrix(matrix_set, vres)
                .ok_or_else(|| OgcError::Config("tile matrix set is empty".to_string()))?;
            let limits = tile_layer
                .limits_for(&matrix_set.identifier, &matrix.identifier)
                .copied();
            (resolution, matrix.clone(), limits, tile_layer.tile_mode)
        } else {
            // the server caps image size: carve the layer extent into a
            // virtual single-level matrix
            let layer_extent = self.extent().await?;
            let matrix = selector::virtual_matrix(
                &layer_extent,
                self.session.max_width.unwrap(),
                self.session.max_height.unwrap(),
                vres,
            );
            (vres, matrix, None, TileMode::Wmsc)
        };

        let plan = match selector::covering_tiles(&matrix, resolution, view_extent, limits.as_ref())
        {
            Ok(plan) => plan,
            Err(OgcError::TileBudget { required, limit }) => {
                warn!(required, limit, "tile budget exceeded, keeping current image");
                self.record_error(&OgcError::TileBudget { required, limit });
                return Ok(None);
            }
            Err(other) => return Err(other),
        };

        debug!(
            matrix = %plan.matrix_id,
            resolution = plan.resolution,
            tiles = plan.tiles.len(),
            "dispatching tile plan"
        );

        let caps = self.capabilities.as_ref().expect("capabilities present");
        let version = caps.version.clone();
        let dialect = caps.dialect;

        let mut requests = Vec::with_capacity(plan.tiles.len());
        match tile_mode {
            TileMode::Wmsc => {
                let swap = planner::axis_swap_for(dialect, &self.session);
                let base = planner::wmsc_tile_url_base(
                    &self.get_map_base(),
                    &version,
                    dialect,
                    &self.session,
                    matrix.tile_width,
                    matrix.tile_height,
                );
                for tile in &plan.tiles {
                    let url = planner::wmsc_tile_url(&base, &tile.rect, swap);
                    requests.push((
                        url,
                        TileAttributes {
                            generation,
                            tile_index: tile.index,
                            map_rect: tile.rect,
                            retry_count: 0,
                        },
                    ));
                }
            }
            TileMode::Wmts => {
                let set_id = self
                    .matrix_set
                    .as_ref()
                    .map(|s| s.identifier.clone())
                    .unwrap_or_default();

                if let Some(kvp_base) = self.get_tile_kvp_base() {
                    let base = planner::wmts_kvp_url_base(
                        &kvp_base,
                        &version,
                        &self.session,
                        &set_id,
                        &matrix.identifier,
                    );
                    for tile in &plan.tiles {
                        let url = planner::wmts_kvp_tile_url(&base, tile.row, tile.col);
                        requests.push((
                            url,
                            TileAttributes {
                                generation,
                                tile_index: tile.index,
                                map_rect: tile.rect,
                                retry_count: 0,
                            },
                        ));
                    }
                } else {
                    let tile_layer = self.tile_layer.as_ref().expect("tile layer present");
                    let template = tile_layer
                        .get_tile_urls
                        .get(&self.session.image_format)
                        .or_else(|| tile_layer.get_tile_urls.values().next())
                        .ok_or_else(|| {
                            OgcError::Capabilities(
                                "no GetTile endpoint or ResourceURL template advertised"
                                    .to_string(),
                            )
                        })?;
                    let base = planner::wmts_rest_url_base(
                        template,
                        &self.session,
                        &set_id,
                        &matrix.identifier,
                    );
                    for tile in &plan.tiles {
                        let url = planner::wmts_rest_tile_url(&base, tile.row, tile.col);
                        requests.push((
                            url,
                            TileAttributes {
                                generation,
                                tile_index: tile.index,
                                map_rect: tile.rect,
                                retry_count: 0,
                            },
                        ));
                    }
                }
            }
        }

        Ok(Some(self.coordinator.dispatch_tiles(requests)))
    }

    /// Feature identification at a map point.
    ///
    /// `context` optionally fixes the query raster (extent, width, height)
    /// the point is located in; without it a minimal 2×2 context is
    /// synthesised around the point.
    pub async fn identify(
        &mut self,
        point: (f64, f64),
        info_format: &str,
        context: Option<(BoundingBox, u32, u32)>,
    ) -> OgcResult<IdentifyResult> {
        self.ensure_capabilities().await?;

        let layer_extent = self.extent().await?;
        if !layer_extent.contains_point(point.0, point.1) {
            return Ok(IdentifyResult {
                format: info_format.to_string(),
                layers: Vec::new(),
            });
        }

        let (mut query_extent, mut width, mut height) = match context {
            Some((extent, width, height)) => {
                if width == 0 || height == 0 {
                    return Err(OgcError::Config(
                        "identify context not fully specified (extent given without width/height)"
                            .to_string(),
                    ));
                }
                (extent, width, height)
            }
            None => {
                // resolution unknown: sample a roughly 1 mm neighbourhood
                let res = if self.session.image_crs.is_geographic() {
                    1e-8
                } else {
                    0.001
                };
                (
                    BoundingBox::new(point.0 - res, point.1 - res, point.0 + res, point.1 + res),
                    2,
                    2,
                )
            }
        };

        let x_res = query_extent.width() / width as f64;
        let y_res = query_extent.height() / height as f64;

        // some servers cannot handle a 1x1 pixel query box
        if width == 1 {
            width = 2;
            query_extent.max_x += x_res;
        }
        if height == 1 {
            height = 2;
            query_extent.max_y += y_res;
        }

        let pixel = (
            ((point.0 - query_extent.min_x) / x_res).floor() as u32,
            ((query_extent.max_y - point.1) / y_res).floor() as u32,
        );

        let caps = self.capabilities.as_ref().expect("capabilities present");
        let version = caps.version.clone();
        let dialect = caps.dialect;
        let base = self.get_feature_info_base();

        let layers: Vec<(String, String)> = self
            .session
            .active_layers
            .iter()
            .cloned()
            .zip(self.session.active_styles.iter().cloned())
            .collect();

        let mut results = Vec::with_capacity(layers.len());
        for (layer, style) in layers {
            if !self.session.is_visible(&layer) {
                results.push(IdentifyLayerResult::NotVisible);
                continue;
            }
            if !self.queryable.get(&layer).copied().unwrap_or(false) {
                results.push(IdentifyLayerResult::NotQueryable);
                continue;
            }

            let url = planner::get_feature_info_url(
                &base,
                &version,
                dialect,
                &self.session,
                &layer,
                &style,
                info_format,
                &query_extent,
                width,
                height,
                pixel,
            );
            debug!(url = %url, "getfeatureinfo");

            match self
                .coordinator
                .fetch_raw(&url, CacheLoadControl::PreferNetwork)
                .await
            {
                Ok((content_type, body)) => {
                    results.push(IdentifyLayerResult::Raw { content_type, body });
                }
                Err(err) => {
                    self.record_error(&err);
                    return Err(err);
                }
            }
        }

        Ok(IdentifyResult {
            format: info_format.to_string(),
            layers: results,
        })
    }

    /// Retrieve the legend graphic for the first active layer.
    ///
    /// Returns `None` when the server advertises no legend source. The
    /// last image is cached per scale; `force_refresh` bypasses the cache.
    pub async fn legend(&mut self, scale: f64, force_refresh: bool) -> OgcResult<Option<RgbaImage>> {
        self.ensure_capabilities().await?;

        if let Some((cached_scale, image)) = &self.legend {
            if !force_refresh && *cached_scale == scale {
                return Ok(Some(image.clone()));
            }
        }

        let caps = self.capabilities.as_ref().expect("capabilities present");
        let advertised = caps
            .capability
            .request
            .get_legend_graphic
            .get_url()
            .map(|u| u.to_string())
            .or_else(|| self.style_legend_url(caps));
        let Some(advertised) = advertised else {
            debug!("no legend source advertised");
            return Ok(None);
        };

        let url = planner::get_legend_graphic_url(
            &advertised,
            &caps.version.clone(),
            &self.session,
            Some(scale),
            None,
        );
        debug!(url = %url, "getlegendgraphic");

        let fetched = self
            .coordinator
            .fetch_raw(&url, CacheLoadControl::PreferNetwork)
            .await;
        let (content_type, body) = match fetched {
            Ok(response) => response,
            Err(err) => {
                self.record_error(&err);
                return Err(err);
            }
        };

        let image = match image::load_from_memory(&body).map(|i| i.to_rgba8()) {
            Ok(image) => image,
            Err(e) => {
                let err = OgcError::Content(format!(
                    "legend image could not be decoded (content-type {}): {}",
                    content_type, e
                ));
                self.record_error(&err);
                return Err(err);
            }
        };

        self.legend = Some((scale, image.clone()));
        Ok(Some(image))
    }

    /// Legend URL advertised on the first active layer's current style.
    fn style_legend_url(&self, caps: &Capabilities) -> Option<String> {
        let layer_name = self.session.active_layers.first()?;
        let style_name = self.session.active_styles.first()?;
        let layer = caps.find_layer(layer_name)?;
        let style = layer
            .styles
            .iter()
            .find(|s| &s.name == style_name)
            .or_else(|| layer.styles.first())?;
        style
            .legend_urls
            .first()
            .map(|l| l.online_resource.clone())
            .filter(|u| !u.is_empty())
    }

    /// Abort everything in flight and drop the cached raster.
    pub async fn shutdown(&mut self) {
        self.coordinator.shutdown().await;
    }
}
