//! Layer extent computation.

use tracing::debug;

use ogc_capabilities::{Capabilities, TileLayer};
use ogc_common::{BoundingBox, CoordTransform, Crs, OgcError, OgcResult};

use crate::session::SessionState;

const LATLON_CRS: &str = "CRS:84";

/// Extent of a non-tiled WMS layer in the target CRS.
///
/// An exact bounding box declared for the target CRS wins. Otherwise the
/// geographic bounding box is the starting point, refined by a CRS:84
/// bounding box only when that box is not a superset of it (a superset is
/// most likely inherited from a parent and less specific), and the result
/// is transformed to the target CRS.
pub fn extent_for_non_tiled_layer(
    caps: &Capabilities,
    layer_name: &str,
    target_crs: &Crs,
    transform: &dyn CoordTransform,
) -> OgcResult<BoundingBox> {
    let layer = caps
        .find_layer(layer_name)
        .ok_or_else(|| OgcError::Extent(format!("layer {} not found in capabilities", layer_name)))?;

    for declared in &layer.bounding_boxes {
        if let Ok(crs) = Crs::parse(&declared.crs) {
            if crs.equivalent(target_crs) {
                return Ok(declared.rect);
            }
        }
    }

    let mut extent = layer.geographic_bounding_box.ok_or_else(|| {
        OgcError::Extent(format!("layer {} declares no usable bounding box", layer_name))
    })?;

    for declared in &layer.bounding_boxes {
        if declared.crs == LATLON_CRS {
            if declared.rect.contains(&extent) {
                // less specific, probably inherited from a parent
                continue;
            }
            extent = declared.rect;
            break;
        }
    }

    let latlon = Crs::parse(LATLON_CRS)?;
    let transformed = transform.transform_bbox(&extent, &latlon, target_crs)?;

    if !transformed.is_finite() {
        return Err(OgcError::Extent(format!(
            "transformed extent of layer {} is not finite",
            layer_name
        )));
    }

    Ok(transformed)
}

/// Extent of a tiled layer: its declared bounding box transformed to the
/// image CRS.
pub fn extent_for_tile_layer(
    tile_layer: &TileLayer,
    target_crs: &Crs,
    transform: &dyn CoordTransform,
) -> OgcResult<BoundingBox> {
    let from = Crs::parse(&tile_layer.bounding_box.crs)?;
    let transformed = transform.transform_bbox(&tile_layer.bounding_box.rect, &from, target_crs)?;

    if !transformed.is_finite() {
        return Err(OgcError::Extent(format!(
            "transformed extent of tile layer {} is not finite",
            tile_layer.identifier
        )));
    }

    Ok(transformed)
}

/// The provider's overall extent: a tiled layer's transformed bounding
/// box, or the union of the active sublayers' extents.
pub fn calculate_extent(
    caps: &Capabilities,
    session: &SessionState,
    tile_layer: Option<&TileLayer>,
    transform: &dyn CoordTransform,
) -> OgcResult<BoundingBox> {
    if session.tiled {
        let tile_layer = tile_layer
            .ok_or_else(|| OgcError::Extent("tiled session without a tile layer".to_string()))?;
        return extent_for_tile_layer(tile_layer, &session.image_crs, transform);
    }

    let mut combined: Option<BoundingBox> = None;
    for layer in &session.active_layers {
        match extent_for_non_tiled_layer(caps, layer, &session.image_crs, transform) {
            Ok(extent) => match combined.as_mut() {
                Some(total) => total.combine(&extent),
                None => combined = Some(extent),
            },
            Err(err) => {
                debug!(layer = %layer, %err, "extent for sublayer unavailable, ignoring");
            }
        }
    }

    combined.ok_or_else(|| OgcError::Extent("no active sublayer has a usable extent".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogc_capabilities::{parse_capabilities, ParseOptions, ServiceHint};
    use ogc_common::BuiltinTransform;

    fn caps_with(layer_body: &str) -> Capabilities {
        let xml = format!(
            r#"<?xml version="1.0"?>
<WMT_MS_Capabilities version="1.1.1">
  <Service><Title>t</Title></Service>
  <Capability>
    <Request><GetMap><Format>image/png</Format>
      <DCPType><HTTP><Get><OnlineResource xlink:href="http://s/wms?"/></Get></HTTP></DCPType>
    </GetMap></Request>
    <Layer>{}</Layer>
  </Capability>
</WMT_MS_Capabilities>"#,
            layer_body
        );
        parse_capabilities(xml.as_bytes(), ServiceHint::Wms, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_exact_crs_bounding_box_wins() {
        let caps = caps_with(
            r#"<Name>l</Name>
               <LatLonBoundingBox minx="-180" miny="-90" maxx="180" maxy="90"/>
               <BoundingBox SRS="EPSG:3857" minx="-100" miny="-200" maxx="100" maxy="200"/>"#,
        );
        let extent = extent_for_non_tiled_layer(
            &caps,
            "l",
            &Crs::parse("EPSG:3857").unwrap(),
            &BuiltinTransform,
        )
        .unwrap();
        assert_eq!(extent, BoundingBox::new(-100.0, -200.0, 100.0, 200.0));
    }

    #[test]
    fn test_narrower_latlon_box_refines_geographic_box() {
        let caps = caps_with(
            r#"<Name>l</Name>
               <LatLonBoundingBox minx="-180" miny="-90" maxx="180" maxy="90"/>
               <BoundingBox SRS="CRS:84" minx="0" miny="0" maxx="10" maxy="10"/>"#,
        );
        let extent = extent_for_non_tiled_layer(
            &caps,
            "l",
            &Crs::parse("CRS:84").unwrap(),
            &BuiltinTransform,
        )
        .unwrap();
        // CRS:84 counts as an exact match for the target here
        assert_eq!(extent, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_superset_latlon_box_is_ignored() {
        // target CRS EPSG:3857 so the CRS:84 boxes are refinements, not
        // exact matches; the whole-world box must lose to the geographic
        // bounding box
        let caps = caps_with(
            r#"<Name>l</Name>
               <LatLonBoundingBox minx="-10" miny="-10" maxx="10" maxy="10"/>
               <BoundingBox SRS="CRS:84" minx="-180" miny="-90" maxx="180" maxy="90"/>"#,
        );
        let extent = extent_for_non_tiled_layer(
            &caps,
            "l",
            &Crs::parse("EPSG:3857").unwrap(),
            &BuiltinTransform,
        )
        .unwrap();

        // the ±10 degree box transformed to mercator, not the whole world
        assert!(extent.max_x < 1_200_000.0);
        assert!(extent.max_x > 1_100_000.0);
    }

    #[test]
    fn test_union_of_sublayers() {
        let caps = caps_with(
            r#"<Title>root</Title>
               <Layer><Name>a</Name>
                 <LatLonBoundingBox minx="0" miny="0" maxx="10" maxy="10"/>
               </Layer>
               <Layer><Name>b</Name>
                 <LatLonBoundingBox minx="-20" miny="-5" maxx="5" maxy="5"/>
               </Layer>"#,
        );
        let session_crs = Crs::parse("CRS:84").unwrap();
        let session = SessionState {
            active_layers: vec!["a".to_string(), "b".to_string()],
            active_styles: vec![String::new(), String::new()],
            visibility: Default::default(),
            image_crs: session_crs,
            image_format: "image/png".to_string(),
            ignore_axis_orientation: false,
            invert_axis_orientation: false,
            ignore_get_map_url: false,
            ignore_get_feature_info_url: false,
            smooth_pixmap_transform: false,
            dpi: None,
            dpi_mode: Default::default(),
            tiled: false,
            tile_matrix_set_id: None,
            tile_dimension_values: Default::default(),
            max_width: None,
            max_height: None,
            feature_count: 0,
            username: None,
            password: None,
            referer: None,
        };

        let extent = calculate_extent(&caps, &session, None, &BuiltinTransform).unwrap();
        assert_eq!(extent, BoundingBox::new(-20.0, -5.0, 10.0, 10.0));
    }
}
