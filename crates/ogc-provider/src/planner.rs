//! Request planning: URL assembly for every operation the provider issues.
//!
//! All builders are pure string work so the wire format can be asserted in
//! tests without a server. Query values use a lenient WMS-style encoding
//! that leaves `,`, `:` and `/` literal, as OGC parameter values
//! conventionally appear on the wire.

use ogc_capabilities::Dialect;
use ogc_common::BoundingBox;

use crate::session::{DpiMode, SessionState};

/// The effective axis-swap decision for BBOX emission:
/// `(version >= 1.3 && !ignore && crs inverted) XOR invert`.
pub fn axis_swap_for(dialect: Dialect, session: &SessionState) -> bool {
    let inverted = dialect.axis_order_applies()
        && !session.ignore_axis_orientation
        && session.image_crs.axis_inverted();
    inverted ^ session.invert_axis_orientation
}

/// JPEG cannot carry an alpha channel and some servers reject
/// `TRANSPARENT=TRUE` on jpeg requests; the `image/x-jpegorpng` sentinel is
/// transparent-capable and always asks for it.
pub fn transparent_applicable(format: &str) -> bool {
    let lower = format.to_ascii_lowercase();
    lower == "image/x-jpegorpng" || (!lower.contains("jpeg") && !lower.contains("jpg"))
}

fn encode_value(out: &mut String, value: &str) {
    for b in value.bytes() {
        match b {
            b'a'..=b'z'
            | b'A'..=b'Z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'~'
            | b','
            | b':'
            | b'/'
            | b'{'
            | b'}'
            | b'('
            | b')'
            | b'*'
            | b'!'
            | b'\''
            | b'$' => out.push(b as char),
            _ => {
                out.push('%');
                out.push_str(&format!("{:02X}", b));
            }
        }
    }
}

/// Split a URL into its base part and already-present query pairs.
fn split_query(url: &str) -> (&str, Vec<(&str, &str)>) {
    match url.split_once('?') {
        Some((base, query)) => {
            let pairs = query
                .split('&')
                .filter(|p| !p.is_empty())
                .map(|p| p.split_once('=').unwrap_or((p, "")))
                .collect();
            (base, pairs)
        }
        None => (url, Vec::new()),
    }
}

/// Assemble a URL, overriding any same-named parameters the base already
/// carries, keeping the remaining ones verbatim.
pub(crate) fn build_url(base: &str, items: &[(&str, String)]) -> String {
    let (path, existing) = split_query(base);

    let mut url = String::with_capacity(base.len() + 64);
    url.push_str(path);

    let mut first = true;
    let mut push_pair = |url: &mut String, key: &str, value: &str, encode: bool| {
        url.push(if first { '?' } else { '&' });
        first = false;
        url.push_str(key);
        url.push('=');
        if encode {
            encode_value(url, value);
        } else {
            url.push_str(value);
        }
    };

    for (key, value) in existing {
        if items.iter().any(|(k, _)| *k == key) {
            continue;
        }
        push_pair(&mut url, key, value, false);
    }
    for (key, value) in items {
        push_pair(&mut url, key, value, true);
    }

    url
}

/// Keys already present in a URL's query string.
fn has_query_item(url: &str, key: &str) -> bool {
    split_query(url).1.iter().any(|(k, _)| *k == key)
}

fn push_dpi_items(items: &mut Vec<(&'static str, String)>, session: &SessionState) {
    let Some(dpi) = session.dpi else { return };
    if session.dpi_mode.contains(DpiMode::QGIS) {
        items.push(("DPI", dpi.to_string()));
    }
    if session.dpi_mode.contains(DpiMode::UMN) {
        items.push(("MAP_RESOLUTION", dpi.to_string()));
    }
    if session.dpi_mode.contains(DpiMode::GEOSERVER) {
        items.push(("FORMAT_OPTIONS", format!("dpi:{}", dpi)));
    }
}

/// Non-tiled GetMap request for the full view.
#[allow(clippy::too_many_arguments)]
pub fn get_map_url(
    base: &str,
    version: &str,
    dialect: Dialect,
    session: &SessionState,
    layers: &[&str],
    styles: &[&str],
    view_extent: &BoundingBox,
    width: u32,
    height: u32,
) -> String {
    let swap = axis_swap_for(dialect, session);

    let mut items: Vec<(&'static str, String)> = vec![
        ("SERVICE", "WMS".to_string()),
        ("VERSION", version.to_string()),
        ("REQUEST", "GetMap".to_string()),
        ("BBOX", view_extent.to_query_value(swap)),
        (dialect.crs_key(), session.image_crs.auth_id()),
        ("WIDTH", width.to_string()),
        ("HEIGHT", height.to_string()),
        ("LAYERS", layers.join(",")),
        ("STYLES", styles.join(",")),
        ("FORMAT", session.image_format.clone()),
    ];
    push_dpi_items(&mut items, session);
    if transparent_applicable(&session.image_format) {
        // uppercase TRUE: some servers reject the lowercase spelling
        items.push(("TRANSPARENT", "TRUE".to_string()));
    }

    build_url(base, &items)
}

/// Shared GetMap parameters of a WMS-C (or max-size constrained) tile
/// batch; each tile then appends its own `&BBOX=`.
#[allow(clippy::too_many_arguments)]
pub fn wmsc_tile_url_base(
    base: &str,
    version: &str,
    dialect: Dialect,
    session: &SessionState,
    tile_width: u32,
    tile_height: u32,
) -> String {
    let mut items: Vec<(&'static str, String)> = vec![
        ("SERVICE", "WMS".to_string()),
        ("VERSION", version.to_string()),
        ("REQUEST", "GetMap".to_string()),
        ("WIDTH", tile_width.to_string()),
        ("HEIGHT", tile_height.to_string()),
        ("LAYERS", session.active_layers.join(",")),
        ("STYLES", session.active_styles.join(",")),
        ("FORMAT", session.image_format.clone()),
        (dialect.crs_key(), session.image_crs.auth_id()),
    ];
    if session.tiled {
        items.push(("TILED", "true".to_string()));
    }
    push_dpi_items(&mut items, session);
    if transparent_applicable(&session.image_format) {
        items.push(("TRANSPARENT", "TRUE".to_string()));
    }

    build_url(base, &items)
}

/// Append the per-tile BBOX to a WMS-C base URL.
pub fn wmsc_tile_url(base_url: &str, rect: &BoundingBox, swap: bool) -> String {
    format!("{}&BBOX={}", base_url, rect.to_query_value(swap))
}

/// Shared KVP GetTile parameters; each tile appends `&TILEROW=..&TILECOL=..`.
pub fn wmts_kvp_url_base(
    base: &str,
    version: &str,
    session: &SessionState,
    matrix_set_id: &str,
    matrix_id: &str,
) -> String {
    let items: Vec<(&'static str, String)> = vec![
        ("SERVICE", "WMTS".to_string()),
        ("REQUEST", "GetTile".to_string()),
        ("VERSION", version.to_string()),
        ("LAYER", session.active_layers[0].clone()),
        ("STYLE", session.active_styles[0].clone()),
        ("FORMAT", session.image_format.clone()),
        ("TILEMATRIXSET", matrix_set_id.to_string()),
        ("TILEMATRIX", matrix_id.to_string()),
    ];

    let mut url = build_url(base, &items);
    // published dimensions ride along as plain KVP parameters
    let mut dimensions: Vec<(&String, &Option<String>)> =
        session.tile_dimension_values.iter().collect();
    dimensions.sort_by_key(|(name, _)| name.as_str());
    for (name, value) in dimensions {
        url.push('&');
        url.push_str(name);
        url.push('=');
        encode_value(&mut url, value.as_deref().unwrap_or(""));
    }
    url
}

pub fn wmts_kvp_tile_url(base_url: &str, row: u32, col: u32) -> String {
    format!("{}&TILEROW={}&TILECOL={}", base_url, row, col)
}

fn replace_ci(input: &str, needle: &str, replacement: &str) -> String {
    let lower_input = input.to_ascii_lowercase();
    let lower_needle = needle.to_ascii_lowercase();
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;
    while let Some(found) = lower_input[pos..].find(&lower_needle) {
        let at = pos + found;
        out.push_str(&input[pos..at]);
        out.push_str(replacement);
        pos = at + needle.len();
    }
    out.push_str(&input[pos..]);
    out
}

/// Fill a WMTS REST template up to (but not including) the tile indices.
pub fn wmts_rest_url_base(
    template: &str,
    session: &SessionState,
    matrix_set_id: &str,
    matrix_id: &str,
) -> String {
    let mut url = replace_ci(template, "{style}", &session.active_styles[0]);
    url = replace_ci(&url, "{tilematrixset}", matrix_set_id);
    url = replace_ci(&url, "{tilematrix}", matrix_id);
    for (name, value) in &session.tile_dimension_values {
        url = replace_ci(
            &url,
            &format!("{{{}}}", name),
            value.as_deref().unwrap_or(""),
        );
    }
    url
}

/// Substitute the tile indices into a partially-filled REST template.
pub fn wmts_rest_tile_url(base_url: &str, row: u32, col: u32) -> String {
    let url = replace_ci(base_url, "{tilerow}", &row.to_string());
    replace_ci(&url, "{tilecol}", &col.to_string())
}

/// GetFeatureInfo request for one queryable sublayer.
#[allow(clippy::too_many_arguments)]
pub fn get_feature_info_url(
    base: &str,
    version: &str,
    dialect: Dialect,
    session: &SessionState,
    layer: &str,
    style: &str,
    info_format: &str,
    query_extent: &BoundingBox,
    width: u32,
    height: u32,
    pixel: (u32, u32),
) -> String {
    let swap = axis_swap_for(dialect, session);

    let mut items: Vec<(&'static str, String)> = vec![
        ("SERVICE", "WMS".to_string()),
        ("VERSION", version.to_string()),
        ("REQUEST", "GetFeatureInfo".to_string()),
        ("BBOX", query_extent.to_query_value(swap)),
        (dialect.crs_key(), session.image_crs.auth_id()),
        ("WIDTH", width.to_string()),
        ("HEIGHT", height.to_string()),
        ("LAYERS", layer.to_string()),
        ("STYLES", style.to_string()),
        ("FORMAT", session.image_format.clone()),
        ("QUERY_LAYERS", layer.to_string()),
        ("INFO_FORMAT", info_format.to_string()),
    ];

    // 1.3.0 renamed the pixel coordinates
    if dialect.axis_order_applies() {
        items.push(("I", pixel.0.to_string()));
        items.push(("J", pixel.1.to_string()));
    } else {
        items.push(("X", pixel.0.to_string()));
        items.push(("Y", pixel.1.to_string()));
    }

    if session.feature_count > 0 {
        items.push(("FEATURE_COUNT", session.feature_count.to_string()));
    }

    build_url(base, &items)
}

/// GetLegendGraphic request.
///
/// The advertised legend URL may already fix some parameters; only the
/// missing ones are filled in.
pub fn get_legend_graphic_url(
    advertised: &str,
    version: &str,
    session: &SessionState,
    scale: Option<f64>,
    resolution: Option<u32>,
) -> String {
    let mut items: Vec<(&'static str, String)> = Vec::new();
    let mut add_missing = |key: &'static str, value: String| {
        if !has_query_item(advertised, key) {
            items.push((key, value));
        }
    };

    add_missing("SERVICE", "WMS".to_string());
    add_missing("VERSION", version.to_string());
    // the client cannot know the server's SLD version; 1.1.0 is customary
    add_missing("SLD_VERSION", "1.1.0".to_string());
    add_missing("REQUEST", "GetLegendGraphic".to_string());
    add_missing("FORMAT", session.image_format.clone());
    add_missing("LAYER", session.active_layers[0].clone());
    add_missing("STYLE", session.active_styles[0].clone());

    if let Some(resolution) = resolution {
        if session.dpi_mode.contains(DpiMode::QGIS) {
            items.push(("DPI", resolution.to_string()));
        }
        if session.dpi_mode.contains(DpiMode::UMN) {
            items.push(("MAP_RESOLUTION", resolution.to_string()));
            if let Some(scale) = scale {
                items.push(("SCALE", format!("{:.0}", scale)));
            }
        }
        if session.dpi_mode.contains(DpiMode::GEOSERVER) {
            items.push(("FORMAT_OPTIONS", format!("dpi:{}", resolution)));
            if let Some(scale) = scale {
                items.push(("SCALE", format!("{:.0}", scale)));
            }
        }
    }

    build_url(advertised, &items)
}
