//! Source URI parsing.
//!
//! A provider is configured by an encoded key/value query string, e.g.
//!
//! ```text
//! url=http://example.org/wms&layers=roads&styles=&format=image/png&crs=EPSG:4326
//! ```
//!
//! Multi-valued keys (`layers`, `styles`) repeat; `tileDimensions` joins
//! `name=value` pairs with `;`, an empty value meaning "server default".

use std::collections::HashMap;

use ogc_common::{Crs, OgcError, OgcResult};

use crate::session::{DpiMode, SessionState};

/// Parsed provider source URI.
#[derive(Debug, Clone)]
pub struct SourceUri {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub referer: Option<String>,
    pub layers: Vec<String>,
    pub styles: Vec<String>,
    pub format: String,
    pub crs: Crs,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub tiled: bool,
    pub tile_matrix_set_id: Option<String>,
    pub tile_dimensions: HashMap<String, Option<String>>,
    pub feature_count: u32,
    pub dpi_mode: DpiMode,
    pub ignore_get_map_url: bool,
    pub ignore_get_feature_info_url: bool,
    pub ignore_axis_orientation: bool,
    pub invert_axis_orientation: bool,
    pub smooth_pixmap_transform: bool,
}

impl SourceUri {
    pub fn parse(input: &str) -> OgcResult<Self> {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(input.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        let single = |params: &HashMap<String, Vec<String>>, key: &str| -> Option<String> {
            params.get(key).and_then(|v| v.first()).cloned()
        };
        let flag = |params: &HashMap<String, Vec<String>>, key: &str| params.contains_key(key);

        let url = single(&params, "url")
            .ok_or_else(|| OgcError::Config("source uri is missing 'url'".to_string()))?;

        let layers = params.get("layers").cloned().unwrap_or_default();
        let styles = params.get("styles").cloned().unwrap_or_default();
        if layers.len() != styles.len() {
            return Err(OgcError::Config(format!(
                "'layers' and 'styles' must be parallel lists ({} layers, {} styles)",
                layers.len(),
                styles.len()
            )));
        }

        let crs_param = single(&params, "crs")
            .ok_or_else(|| OgcError::Config("source uri is missing 'crs'".to_string()))?;
        let crs = Crs::parse(&crs_param)?;

        let max_width = single(&params, "maxWidth").and_then(|v| v.parse().ok());
        let max_height = single(&params, "maxHeight").and_then(|v| v.parse().ok());
        // both limits or neither; a lone one cannot drive the virtual grid
        let (max_width, max_height) = match (max_width, max_height) {
            (Some(w), Some(h)) => (Some(w), Some(h)),
            _ => (None, None),
        };

        let tile_matrix_set_id = single(&params, "tileMatrixSet");

        let mut tile_dimensions = HashMap::new();
        if let Some(spec) = single(&params, "tileDimensions") {
            for dim in spec.split(';').filter(|d| !d.is_empty()) {
                match dim.split_once('=') {
                    Some((name, "")) => {
                        tile_dimensions.insert(name.to_string(), None);
                    }
                    Some((name, value)) => {
                        tile_dimensions.insert(name.to_string(), Some(value.to_string()));
                    }
                    None => {
                        tile_dimensions.insert(dim.to_string(), None);
                    }
                }
            }
        }

        // either marker switches the provider into tiled mode; tileMatrixSet
        // may be empty, which designates a WMS-C source
        let tiled = tile_matrix_set_id.is_some() || !tile_dimensions.is_empty();

        let dpi_mode = single(&params, "dpiMode")
            .and_then(|v| v.parse::<u8>().ok())
            .map(DpiMode::from_bits)
            .unwrap_or_default();

        Ok(Self {
            url,
            username: single(&params, "username"),
            password: single(&params, "password"),
            referer: single(&params, "referer"),
            layers,
            styles,
            format: single(&params, "format").unwrap_or_else(|| "image/png".to_string()),
            crs,
            max_width,
            max_height,
            tiled,
            tile_matrix_set_id,
            tile_dimensions,
            feature_count: single(&params, "featureCount")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            dpi_mode,
            ignore_get_map_url: flag(&params, "IgnoreGetMapUrl"),
            ignore_get_feature_info_url: flag(&params, "IgnoreGetFeatureInfoUrl"),
            ignore_axis_orientation: flag(&params, "IgnoreAxisOrientation"),
            invert_axis_orientation: flag(&params, "InvertAxisOrientation"),
            smooth_pixmap_transform: flag(&params, "SmoothPixmapTransform"),
        })
    }

    /// Capabilities endpoint derived from the base URL.
    ///
    /// WMTS endpoints (explicit `SERVICE=WMTS` or a `WMTSCapabilities.xml`
    /// path) are used as-is; WMS endpoints get the standard query appended.
    pub fn capabilities_url(&self) -> String {
        if self.is_wmts_endpoint() {
            return self.url.clone();
        }
        let mut url = self.prepared_base_url();
        url.push_str("SERVICE=WMS&REQUEST=GetCapabilities");
        url
    }

    pub fn is_wmts_endpoint(&self) -> bool {
        self.url.contains("SERVICE=WMTS") || self.url.contains("/WMTSCapabilities.xml")
    }

    /// Base URL terminated so that query parameters can be appended.
    pub fn prepared_base_url(&self) -> String {
        let mut url = self.url.clone();
        if self.is_wmts_endpoint() {
            return url;
        }
        if !url.contains('?') {
            url.push('?');
        } else if !url.ends_with('?') && !url.ends_with('&') {
            url.push('&');
        }
        url
    }

    pub fn into_session(self) -> SessionState {
        let visibility = self.layers.iter().map(|l| (l.clone(), true)).collect();
        SessionState {
            active_layers: self.layers,
            active_styles: self.styles,
            visibility,
            image_crs: self.crs,
            image_format: self.format,
            ignore_axis_orientation: self.ignore_axis_orientation,
            invert_axis_orientation: self.invert_axis_orientation,
            ignore_get_map_url: self.ignore_get_map_url,
            ignore_get_feature_info_url: self.ignore_get_feature_info_url,
            smooth_pixmap_transform: self.smooth_pixmap_transform,
            dpi: None,
            dpi_mode: self.dpi_mode,
            tiled: self.tiled,
            tile_matrix_set_id: self.tile_matrix_set_id,
            tile_dimension_values: self.tile_dimensions,
            max_width: self.max_width,
            max_height: self.max_height,
            feature_count: self.feature_count,
            username: self.username,
            password: self.password,
            referer: self.referer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_uri() {
        let uri = SourceUri::parse(
            "url=http://s/wms&layers=L&styles=&format=image/png&crs=EPSG:4326",
        )
        .unwrap();
        assert_eq!(uri.url, "http://s/wms");
        assert_eq!(uri.layers, vec!["L"]);
        assert_eq!(uri.styles, vec![""]);
        assert_eq!(uri.format, "image/png");
        assert_eq!(uri.crs.auth_id(), "EPSG:4326");
        assert!(!uri.tiled);
        assert_eq!(uri.feature_count, 0);
        assert_eq!(uri.dpi_mode, DpiMode::ALL);
    }

    #[test]
    fn test_parallel_list_mismatch_is_config_error() {
        let err = SourceUri::parse("url=http://s/wms&layers=a&layers=b&styles=&crs=EPSG:4326")
            .unwrap_err();
        assert!(matches!(err, OgcError::Config(_)));
    }

    #[test]
    fn test_multi_valued_layers_keep_order() {
        let uri = SourceUri::parse(
            "url=http://s/wms&layers=a&styles=sa&layers=b&styles=sb&crs=EPSG:4326",
        )
        .unwrap();
        assert_eq!(uri.layers, vec!["a", "b"]);
        assert_eq!(uri.styles, vec!["sa", "sb"]);
    }

    #[test]
    fn test_tile_dimensions_parsing() {
        let uri = SourceUri::parse(
            "url=http://s/wmts&layers=l&styles=s&crs=EPSG:3857&tileMatrixSet=g&tileDimensions=time%3D2024-01-01%3Belevation%3D",
        )
        .unwrap();
        assert!(uri.tiled);
        assert_eq!(
            uri.tile_dimensions.get("time"),
            Some(&Some("2024-01-01".to_string()))
        );
        assert_eq!(uri.tile_dimensions.get("elevation"), Some(&None));
    }

    #[test]
    fn test_flags_and_credentials() {
        let uri = SourceUri::parse(
            "url=http://s/wms&layers=l&styles=&crs=EPSG:4326&username=u&password=p&referer=http%3A%2F%2Fr&IgnoreAxisOrientation=1&SmoothPixmapTransform=1&dpiMode=4&featureCount=10",
        )
        .unwrap();
        assert_eq!(uri.username.as_deref(), Some("u"));
        assert_eq!(uri.password.as_deref(), Some("p"));
        assert_eq!(uri.referer.as_deref(), Some("http://r"));
        assert!(uri.ignore_axis_orientation);
        assert!(!uri.invert_axis_orientation);
        assert!(uri.smooth_pixmap_transform);
        assert_eq!(uri.dpi_mode, DpiMode::GEOSERVER);
        assert_eq!(uri.feature_count, 10);
    }

    #[test]
    fn test_capabilities_url_preparation() {
        let wms = SourceUri::parse("url=http://s/wms&layers=l&styles=&crs=EPSG:4326").unwrap();
        assert_eq!(
            wms.capabilities_url(),
            "http://s/wms?SERVICE=WMS&REQUEST=GetCapabilities"
        );

        let with_query =
            SourceUri::parse("url=http://s/wms%3Fmap%3Dfoo&layers=l&styles=&crs=EPSG:4326")
                .unwrap();
        assert_eq!(
            with_query.capabilities_url(),
            "http://s/wms?map=foo&SERVICE=WMS&REQUEST=GetCapabilities"
        );

        let wmts = SourceUri::parse(
            "url=http://s/1.0.0/WMTSCapabilities.xml&layers=l&styles=&crs=EPSG:3857&tileMatrixSet=g",
        )
        .unwrap();
        assert_eq!(wmts.capabilities_url(), "http://s/1.0.0/WMTSCapabilities.xml");
    }

    #[test]
    fn test_max_size_requires_both_limits() {
        let uri =
            SourceUri::parse("url=http://s/wms&layers=l&styles=&crs=EPSG:4326&maxWidth=512")
                .unwrap();
        assert_eq!(uri.max_width, None);

        let uri = SourceUri::parse(
            "url=http://s/wms&layers=l&styles=&crs=EPSG:4326&maxWidth=512&maxHeight=256",
        )
        .unwrap();
        assert_eq!((uri.max_width, uri.max_height), (Some(512), Some(256)));
    }
}
