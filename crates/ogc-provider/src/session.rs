//! Per-provider session state.

use std::collections::HashMap;

use ogc_common::Crs;

/// Which DPI parameter spellings a request carries.
///
/// Servers disagree on how a client communicates target resolution; the
/// flags may be combined and every enabled spelling is sent at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpiMode(u8);

impl DpiMode {
    pub const OFF: DpiMode = DpiMode(0);
    /// `DPI=<n>`
    pub const QGIS: DpiMode = DpiMode(1);
    /// `MAP_RESOLUTION=<n>` (UMN MapServer)
    pub const UMN: DpiMode = DpiMode(2);
    /// `FORMAT_OPTIONS=dpi:<n>` (GeoServer)
    pub const GEOSERVER: DpiMode = DpiMode(4);
    pub const ALL: DpiMode = DpiMode(7);

    pub fn from_bits(bits: u8) -> DpiMode {
        DpiMode(bits & Self::ALL.0)
    }

    pub fn contains(&self, other: DpiMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for DpiMode {
    fn default() -> Self {
        DpiMode::ALL
    }
}

/// Mutable session state owned by the provider façade.
///
/// `active_layers` and `active_styles` are parallel lists; the equal-length
/// invariant is enforced at URI parse time and preserved by every mutation.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub active_layers: Vec<String>,
    pub active_styles: Vec<String>,
    pub visibility: HashMap<String, bool>,
    pub image_crs: Crs,
    pub image_format: String,
    pub ignore_axis_orientation: bool,
    pub invert_axis_orientation: bool,
    pub ignore_get_map_url: bool,
    pub ignore_get_feature_info_url: bool,
    pub smooth_pixmap_transform: bool,
    pub dpi: Option<u32>,
    pub dpi_mode: DpiMode,
    pub tiled: bool,
    pub tile_matrix_set_id: Option<String>,
    /// Dimension name -> value; `None` requests the server default.
    pub tile_dimension_values: HashMap<String, Option<String>>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub feature_count: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub referer: Option<String>,
}

impl SessionState {
    /// Layers that are both active and visible, with their styles, joined
    /// for the LAYERS/STYLES parameters.
    pub fn visible_layers_and_styles(&self) -> (Vec<&str>, Vec<&str>) {
        let mut layers = Vec::new();
        let mut styles = Vec::new();
        for (layer, style) in self.active_layers.iter().zip(self.active_styles.iter()) {
            if self.visibility.get(layer).copied().unwrap_or(true) {
                layers.push(layer.as_str());
                styles.push(style.as_str());
            }
        }
        (layers, styles)
    }

    pub fn is_visible(&self, layer: &str) -> bool {
        self.visibility.get(layer).copied().unwrap_or(true)
    }

    pub fn set_visibility(&mut self, layer: &str, visible: bool) {
        self.visibility.insert(layer.to_string(), visible);
    }
}
