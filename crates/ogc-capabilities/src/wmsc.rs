//! WMS-C `VendorSpecificCapabilities/TileSet` parsing.
//!
//! A TileSet advertises a tiled profile over plain WMS GetMap. Each one is
//! synthesised into a [`TileLayer`] plus a single-purpose
//! [`TileMatrixSet`] whose matrices mirror the advertised resolution list,
//! so the planner can treat WMS-C and WMTS uniformly.

use tracing::{debug, warn};

use ogc_common::{TileMatrix, TileMatrixSet};

use crate::model::*;
use crate::reader::Element;
use crate::wms::rect_from_corner_attrs;

pub(crate) fn parse_tile_set_profile(e: &Element, capability: &mut Capability) {
    let mut layers: Vec<String> = Vec::new();
    let mut styles: Vec<String> = Vec::new();
    let mut formats: Vec<String> = Vec::new();
    let mut tile_width: Option<u32> = None;
    let mut tile_height: Option<u32> = None;
    let mut srs = String::new();
    let mut bounding_box: Option<CrsBoundingBox> = None;
    let mut resolutions: Vec<f64> = Vec::new();

    for child in e.children() {
        match child.name() {
            "Layers" => layers.push(child.text().to_string()),
            "Styles" => styles.push(child.text().to_string()),
            "Width" => tile_width = child.text().parse().ok(),
            "Height" => tile_height = child.text().parse().ok(),
            "SRS" => srs = child.text().to_string(),
            "Format" => formats.push(child.text().to_string()),
            "BoundingBox" => {
                if let Some(rect) = rect_from_corner_attrs(child) {
                    bounding_box = Some(CrsBoundingBox {
                        crs: child
                            .attr_any(&["SRS", "CRS"])
                            .unwrap_or_default()
                            .to_string(),
                        rect,
                    });
                }
            }
            "Resolutions" => {
                resolutions = child
                    .text()
                    .split_whitespace()
                    .filter_map(|r| r.parse().ok())
                    .collect();
            }
            other => debug!(element = other, "tileset element ignored"),
        }
    }

    let (Some(tile_width), Some(tile_height)) = (tile_width, tile_height) else {
        warn!("TileSet without Width/Height skipped");
        return;
    };
    let Some(bounding_box) = bounding_box else {
        warn!("TileSet without BoundingBox skipped");
        return;
    };
    if resolutions.is_empty() {
        warn!("TileSet without Resolutions skipped");
        return;
    }

    let set_id = format!("{}-wmsc-{}", layers.join("_"), capability.tile_layers.len());

    let mut layer = TileLayer::new(layers.join(","), TileMode::Wmsc);
    layer.formats = formats;
    layer.bounding_box = bounding_box.clone();

    let style_id = styles.join(",");
    layer.styles.insert(
        style_id.clone(),
        TileStyle {
            identifier: style_id.clone(),
            ..Default::default()
        },
    );
    layer.default_style = style_id;
    layer.set_links.insert(
        set_id.clone(),
        MatrixSetLink {
            tile_matrix_set: set_id.clone(),
            limits: Default::default(),
        },
    );

    let mut set = TileMatrixSet::new(set_id.clone(), srs);
    for (i, res) in resolutions.iter().copied().enumerate() {
        let matrix_width = (bounding_box.rect.width() / tile_width as f64 / res).ceil() as u32;
        let matrix_height = (bounding_box.rect.height() / tile_height as f64 / res).ceil() as u32;
        // top of a pyramid whose bottom edge sits on the layer's minimum y
        let top_left_y =
            bounding_box.rect.min_y + matrix_height as f64 * tile_height as f64 * res;

        let matrix = TileMatrix {
            identifier: i.to_string(),
            scale_denominator: 0.0,
            top_left: (bounding_box.rect.min_x, top_left_y),
            tile_width,
            tile_height,
            matrix_width,
            matrix_height,
        };
        if !set.insert_matrix(res, matrix) {
            warn!(resolution = res, "duplicate WMS-C resolution skipped");
        }
    }

    capability.tile_layers.push(layer);
    capability.tile_matrix_sets.insert(set_id, set);
}

#[cfg(test)]
mod tests {
    use crate::{parse_capabilities, ParseOptions, ServiceHint};

    const WMSC: &[u8] = br#"<?xml version="1.0"?>
<WMT_MS_Capabilities version="1.1.1">
  <Service><Title>tiled</Title></Service>
  <Capability>
    <Request>
      <GetMap>
        <Format>image/png</Format>
        <DCPType><HTTP><Get><OnlineResource xlink:href="http://s/wms?"/></Get></HTTP></DCPType>
      </GetMap>
    </Request>
    <VendorSpecificCapabilities>
      <TileSet>
        <SRS>EPSG:3857</SRS>
        <BoundingBox SRS="EPSG:3857" minx="0" miny="0" maxx="2560" maxy="2560"/>
        <Resolutions>10 5</Resolutions>
        <Width>256</Width>
        <Height>256</Height>
        <Format>image/png</Format>
        <Layers>base</Layers>
        <Styles></Styles>
      </TileSet>
    </VendorSpecificCapabilities>
    <Layer><Name>base</Name><Title>Base</Title></Layer>
  </Capability>
</WMT_MS_Capabilities>"#;

    #[test]
    fn test_tile_set_synthesis() {
        let caps = parse_capabilities(WMSC, ServiceHint::Wms, &ParseOptions::default()).unwrap();

        assert_eq!(caps.capability.tile_layers.len(), 1);
        let layer = &caps.capability.tile_layers[0];
        assert_eq!(layer.identifier, "base");
        assert_eq!(layer.tile_mode, crate::TileMode::Wmsc);
        assert_eq!(layer.default_style, "");

        let set = caps
            .capability
            .tile_matrix_sets
            .get("base-wmsc-0")
            .expect("synthesised matrix set");
        assert_eq!(set.crs, "EPSG:3857");
        assert_eq!(set.len(), 2);

        // res 10: 2560 map units / 256 px / 10 = 1 tile each way
        let (coarse_res, coarse) = set.coarsest().unwrap();
        assert_eq!(coarse_res, 10.0);
        assert_eq!(coarse.identifier, "0");
        assert_eq!((coarse.matrix_width, coarse.matrix_height), (1, 1));
        // top-left y = ymin + matrix_height * tile_height * res
        assert_eq!(coarse.top_left, (0.0, 2560.0));

        let (fine_res, fine) = set.finest().unwrap();
        assert_eq!(fine_res, 5.0);
        assert_eq!((fine.matrix_width, fine.matrix_height), (2, 2));
        assert_eq!(fine.top_left, (0.0, 2560.0));
    }
}
