//! The uniform in-memory capabilities model.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use ogc_common::{BoundingBox, TileMatrixLimits, TileMatrixSet};

/// Which dialect the capabilities document was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    Wms111,
    Wms130,
    Wmts100,
}

impl Dialect {
    /// WMS 1.3.x applies the CRS axis-order rule; 1.1.1 never does.
    pub fn axis_order_applies(&self) -> bool {
        matches!(self, Dialect::Wms130)
    }

    /// The BBOX CRS parameter key: `SRS` in 1.1.1, `CRS` from 1.3.0 on.
    pub fn crs_key(&self) -> &'static str {
        match self {
            Dialect::Wms111 => "SRS",
            _ => "CRS",
        }
    }
}

/// Parsed capabilities document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub version: String,
    pub dialect: Dialect,
    pub service: ServiceMetadata,
    pub capability: Capability,
}

impl Capabilities {
    /// Locate a named layer anywhere in the inherited layer tree.
    pub fn find_layer(&self, name: &str) -> Option<&LayerProperty> {
        fn walk<'a>(layer: &'a LayerProperty, name: &str) -> Option<&'a LayerProperty> {
            if layer.name == name {
                return Some(layer);
            }
            layer.children.iter().find_map(|c| walk(c, name))
        }
        self.capability.layer.as_ref().and_then(|l| walk(l, name))
    }

    /// All layers with a non-empty name, in document order.
    pub fn named_layers(&self) -> Vec<&LayerProperty> {
        let mut out = Vec::new();
        fn walk<'a>(layer: &'a LayerProperty, out: &mut Vec<&'a LayerProperty>) {
            if !layer.name.is_empty() {
                out.push(layer);
            }
            for child in &layer.children {
                walk(child, out);
            }
        }
        if let Some(root) = &self.capability.layer {
            walk(root, &mut out);
        }
        out
    }

    pub fn tile_layer(&self, identifier: &str) -> Option<&TileLayer> {
        self.capability
            .tile_layers
            .iter()
            .find(|l| l.identifier == identifier)
    }
}

/// Service-level metadata shared by WMS and WMTS documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub title: String,
    pub abstract_: String,
    pub keywords: Vec<String>,
    pub online_resource: String,
    pub contact: ContactInformation,
    pub fees: String,
    pub access_constraints: String,
    /// Advertised layer-count limit (0 = unlimited).
    pub layer_limit: u32,
    /// Advertised pixel limits (0 = unlimited).
    pub max_width: u32,
    pub max_height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactInformation {
    pub person: String,
    pub organization: String,
    pub position: String,
    pub voice_telephone: String,
    pub email: String,
}

/// Operation endpoints and the layer/tile inventories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capability {
    pub request: RequestOps,
    pub exception_formats: Vec<String>,
    /// Root of the WMS layer tree (absent for pure WMTS documents).
    pub layer: Option<LayerProperty>,
    /// Tiled layers: WMTS `Contents` layers and synthesised WMS-C tile sets.
    pub tile_layers: Vec<TileLayer>,
    pub tile_matrix_sets: HashMap<String, TileMatrixSet>,
    /// `order_id -> parent order_id` for group structure, no back-pointers.
    pub layer_parents: HashMap<u32, u32>,
    /// `order_id -> [name, title, abstract]` of group layers.
    pub layer_parent_names: HashMap<u32, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOps {
    pub get_map: OperationType,
    pub get_feature_info: OperationType,
    pub get_legend_graphic: OperationType,
    pub get_tile: OperationType,
}

/// One advertised operation: formats plus DCP endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationType {
    pub formats: Vec<String>,
    pub dcps: Vec<DcpEndpoint>,
    /// WMTS `GetEncoding` constraint values (`KVP`, `RESTful`).
    pub allowed_encodings: HashSet<String>,
}

impl OperationType {
    /// The first advertised HTTP GET endpoint, if any.
    pub fn get_url(&self) -> Option<&str> {
        self.dcps.iter().find_map(|d| d.get_url.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DcpEndpoint {
    pub get_url: Option<String>,
    pub post_url: Option<String>,
}

/// A node of the WMS layer tree.
///
/// Inheritable fields (`styles`, `crs`, `bounding_boxes`,
/// `geographic_bounding_box`) are pre-copied from the parent before the
/// child's own declarations are applied, per WMS 7.2.4.8.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerProperty {
    /// Monotonic document-order id, 1-based.
    pub order_id: u32,
    /// Empty for grouping-only layers.
    pub name: String,
    pub title: String,
    pub abstract_: String,
    pub keywords: Vec<String>,
    pub crs: Vec<String>,
    pub bounding_boxes: Vec<CrsBoundingBox>,
    /// Extent in CRS:84.
    pub geographic_bounding_box: Option<BoundingBox>,
    pub styles: Vec<StyleProperty>,
    pub queryable: bool,
    pub cascaded: u32,
    pub opaque: bool,
    pub no_subsets: bool,
    pub fixed_width: u32,
    pub fixed_height: u32,
    pub children: Vec<LayerProperty>,
}

/// A bounding box tagged with the CRS it is expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrsBoundingBox {
    pub crs: String,
    pub rect: BoundingBox,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StyleProperty {
    pub name: String,
    pub title: String,
    pub abstract_: String,
    pub legend_urls: Vec<LegendUrl>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegendUrl {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub online_resource: String,
}

/// Dispatch style of a tiled layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileMode {
    Wmsc,
    Wmts,
}

/// A tiled layer from WMTS `Contents` or a WMS-C `TileSet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileLayer {
    pub identifier: String,
    pub title: String,
    pub abstract_: String,
    pub tile_mode: TileMode,
    /// Never empty: synthesised from the first linked matrix set's coarsest
    /// matrix when the document omits it, or the whole world as a last
    /// resort.
    pub bounding_box: CrsBoundingBox,
    pub styles: HashMap<String, TileStyle>,
    pub default_style: String,
    pub formats: Vec<String>,
    pub info_formats: Vec<String>,
    pub dimensions: HashMap<String, TileDimension>,
    pub set_links: HashMap<String, MatrixSetLink>,
    /// WMTS REST tile templates by format.
    pub get_tile_urls: HashMap<String, String>,
    /// WMTS REST feature-info templates by format.
    pub get_feature_info_urls: HashMap<String, String>,
}

impl TileLayer {
    pub(crate) fn new(identifier: impl Into<String>, tile_mode: TileMode) -> Self {
        Self {
            identifier: identifier.into(),
            title: String::new(),
            abstract_: String::new(),
            tile_mode,
            bounding_box: CrsBoundingBox {
                crs: String::new(),
                rect: BoundingBox::whole_world(),
            },
            styles: HashMap::new(),
            default_style: String::new(),
            formats: Vec::new(),
            info_formats: Vec::new(),
            dimensions: HashMap::new(),
            set_links: HashMap::new(),
            get_tile_urls: HashMap::new(),
            get_feature_info_urls: HashMap::new(),
        }
    }

    pub fn limits_for(&self, set_id: &str, matrix_id: &str) -> Option<&TileMatrixLimits> {
        self.set_links
            .get(set_id)
            .and_then(|link| link.limits.get(matrix_id))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TileStyle {
    pub identifier: String,
    pub title: String,
    pub abstract_: String,
    pub is_default: bool,
    pub legend_urls: Vec<LegendUrl>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TileDimension {
    pub identifier: String,
    pub title: String,
    pub abstract_: String,
    pub uom: String,
    pub unit_symbol: String,
    pub default_value: String,
    pub current: bool,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixSetLink {
    pub tile_matrix_set: String,
    /// Validated per-matrix row/column limits, keyed by matrix identifier.
    pub limits: HashMap<String, TileMatrixLimits>,
}
