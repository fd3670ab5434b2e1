//! WMTS 1.0.0 capabilities parsing.

use tracing::{debug, warn};

use ogc_common::{
    effective_axis_swap, BoundingBox, Crs, OgcResult, TileMatrix, TileMatrixLimits, TileMatrixSet,
};

use crate::model::*;
use crate::reader::Element;
use crate::wms::{parse_keyword_list, LATLON_CRS};
use crate::ParseOptions;

pub(crate) fn parse(
    root: &Element,
    version: String,
    opts: &ParseOptions<'_>,
) -> OgcResult<Capabilities> {
    let mut caps = Capabilities {
        version,
        dialect: Dialect::Wmts100,
        service: ServiceMetadata::default(),
        capability: Capability::default(),
    };

    for child in root.children() {
        match child.name() {
            "ServiceIdentification" => parse_service_identification(child, &mut caps.service),
            "ServiceProvider" => parse_service_provider(child, &mut caps.service),
            "OperationsMetadata" => parse_operations_metadata(child, &mut caps.capability.request),
            "Contents" => parse_contents(child, &mut caps.capability, opts),
            other => debug!(element = other, "skipping WMTS root child"),
        }
    }

    Ok(caps)
}

fn parse_service_identification(e: &Element, service: &mut ServiceMetadata) {
    if let Some(title) = e.child_text("Title") {
        service.title = title.to_string();
    }
    if let Some(abstract_) = e.child_text("Abstract") {
        service.abstract_ = abstract_.to_string();
    }
    if let Some(keywords) = e.child("Keywords") {
        parse_keyword_list(keywords, &mut service.keywords);
    }
    if let Some(fees) = e.child_text("Fees") {
        service.fees = fees.to_string();
    }
    if let Some(constraints) = e.child_text("AccessConstraints") {
        service.access_constraints = constraints.to_string();
    }
}

fn parse_service_provider(e: &Element, service: &mut ServiceMetadata) {
    if let Some(name) = e.child_text("ProviderName") {
        service.contact.organization = name.to_string();
    }
    if let Some(contact) = e.child("ServiceContact") {
        if let Some(person) = contact.child_text("IndividualName") {
            service.contact.person = person.to_string();
        }
        if let Some(position) = contact.child_text("PositionName") {
            service.contact.position = position.to_string();
        }
        if let Some(info) = contact.child("ContactInfo") {
            if let Some(phone) = info.child("Phone").and_then(|p| p.child_text("Voice")) {
                service.contact.voice_telephone = phone.to_string();
            }
            if let Some(address) = info.child("Address") {
                if let Some(email) = address.child_text("ElectronicMailAddress") {
                    service.contact.email = email.to_string();
                }
            }
        }
    }
}

fn parse_operations_metadata(e: &Element, request: &mut RequestOps) {
    for operation in e.children_named("Operation") {
        let op = match operation.attr("name") {
            Some("GetTile") => &mut request.get_tile,
            Some("GetFeatureInfo") => &mut request.get_feature_info,
            Some("GetLegendGraphic") => &mut request.get_legend_graphic,
            Some("GetCapabilities") | None => continue,
            Some(other) => {
                debug!(operation = other, "unhandled WMTS operation");
                continue;
            }
        };

        for dcp in operation.children_named("DCP") {
            let Some(http) = dcp.child("HTTP") else { continue };
            for get in http.children_named("Get") {
                let Some(href) = get.attr("href") else {
                    warn!(operation = ?operation.attr("name"), "GET endpoint without href");
                    continue;
                };
                op.dcps.push(DcpEndpoint {
                    get_url: Some(href.to_string()),
                    post_url: None,
                });

                for constraint in get.children_named("Constraint") {
                    if constraint.attr("name").map(|n| n.ends_with("GetEncoding")) != Some(true) {
                        continue;
                    }
                    if let Some(allowed) = constraint.child("AllowedValues") {
                        for value in allowed.children_named("Value") {
                            op.allowed_encodings.insert(value.text().to_string());
                        }
                    }
                }
            }
        }
    }
}

fn parse_contents(e: &Element, capability: &mut Capability, opts: &ParseOptions<'_>) {
    for set_element in e.children_named("TileMatrixSet") {
        if let Some(set) = parse_tile_matrix_set(set_element, opts) {
            capability.tile_matrix_sets.insert(set.identifier.clone(), set);
        }
    }

    for layer_element in e.children_named("Layer") {
        let layer = parse_tile_layer(layer_element, capability);
        capability.tile_layers.push(layer);
    }

    // every layer must end up with a usable bounding box
    let sets = capability.tile_matrix_sets.clone();
    for layer in &mut capability.tile_layers {
        if layer.bounding_box.crs.is_empty() {
            if let Some(bbox) = detect_tile_layer_bounding_box(layer, &sets) {
                layer.bounding_box = bbox;
            } else {
                warn!(
                    layer = %layer.identifier,
                    "no bounding box detectable; using the whole world"
                );
                layer.bounding_box = CrsBoundingBox {
                    crs: LATLON_CRS.to_string(),
                    rect: BoundingBox::whole_world(),
                };
            }
        }
    }
}

fn parse_tile_matrix_set(e: &Element, opts: &ParseOptions<'_>) -> Option<TileMatrixSet> {
    let identifier = e.child_text("Identifier")?.to_string();
    let supported_crs = e.child_text("SupportedCRS").unwrap_or("").to_string();

    let parsed_crs = match Crs::parse(&supported_crs) {
        Ok(crs) => Some(crs),
        Err(err) => {
            warn!(set = %identifier, %err, "unparsable SupportedCRS");
            None
        }
    };

    let invert = parsed_crs
        .as_ref()
        .map(|crs| {
            effective_axis_swap(crs, opts.ignore_axis_orientation, opts.invert_axis_orientation)
        })
        .unwrap_or(false);
    let meters_per_unit = parsed_crs.as_ref().map(|c| c.meters_per_unit()).unwrap_or(1.0);

    let crs_id = parsed_crs
        .as_ref()
        .map(|c| c.auth_id())
        .unwrap_or(supported_crs);

    let mut set = TileMatrixSet::new(identifier.clone(), crs_id);
    if let Some(title) = e.child_text("Title") {
        set.title = title.to_string();
    }
    set.well_known_scale_set = e.child_text("WellKnownScaleSet").map(|s| s.to_string());

    for matrix_element in e.children_named("TileMatrix") {
        let Some(matrix_id) = matrix_element.child_text("Identifier") else {
            continue;
        };
        let Some(scale_denominator) = matrix_element.child_parse::<f64>("ScaleDenominator")
        else {
            warn!(matrix = matrix_id, "TileMatrix without ScaleDenominator skipped");
            continue;
        };

        let corner: Vec<f64> = matrix_element
            .child_text("TopLeftCorner")
            .unwrap_or("")
            .split_whitespace()
            .filter_map(|v| v.parse().ok())
            .collect();
        if corner.len() != 2 {
            warn!(matrix = matrix_id, "could not parse TopLeftCorner");
            continue;
        }
        let top_left = if invert {
            (corner[1], corner[0])
        } else {
            (corner[0], corner[1])
        };

        let matrix = TileMatrix {
            identifier: matrix_id.to_string(),
            scale_denominator,
            top_left,
            tile_width: matrix_element.child_parse("TileWidth").unwrap_or(0),
            tile_height: matrix_element.child_parse("TileHeight").unwrap_or(0),
            matrix_width: matrix_element.child_parse("MatrixWidth").unwrap_or(0),
            matrix_height: matrix_element.child_parse("MatrixHeight").unwrap_or(0),
        };

        let resolution = scale_denominator * ogc_common::tile::OGC_PIXEL_SIZE_M / meters_per_unit;
        if !set.insert_matrix(resolution, matrix) {
            warn!(
                set = %identifier,
                matrix = matrix_id,
                resolution,
                "duplicate resolution in tile matrix set skipped"
            );
        }
    }

    Some(set)
}

fn parse_tile_layer(e: &Element, capability: &Capability) -> TileLayer {
    let identifier = e.child_text("Identifier").unwrap_or("").to_string();
    let mut layer = TileLayer::new(identifier, TileMode::Wmts);
    layer.title = e.child_text("Title").unwrap_or("").to_string();
    layer.abstract_ = e.child_text("Abstract").unwrap_or("").to_string();
    layer.bounding_box.crs = String::new();

    if let Some(rect) = corner_bbox(e.child("WGS84BoundingBox")) {
        layer.bounding_box = CrsBoundingBox {
            crs: LATLON_CRS.to_string(),
            rect,
        };
    } else if let Some(bbox_element) = e.child("BoundingBox") {
        if let Some(rect) = corner_bbox(Some(bbox_element)) {
            if let Some(crs) = bbox_element.attr_any(&["crs", "srs"]) {
                layer.bounding_box = CrsBoundingBox {
                    crs: crs.to_string(),
                    rect,
                };
            }
        }
    }

    for style_element in e.children_named("Style") {
        let style = parse_style(style_element);
        if style.is_default {
            layer.default_style = style.identifier.clone();
        }
        layer.styles.insert(style.identifier.clone(), style);
    }
    if layer.styles.is_empty() {
        // some servers omit Style entirely; give the planner something to send
        let style = TileStyle {
            identifier: "default".to_string(),
            title: "Generated default style".to_string(),
            abstract_: "Style was missing in capabilities".to_string(),
            is_default: true,
            legend_urls: Vec::new(),
        };
        layer.default_style = style.identifier.clone();
        layer.styles.insert(style.identifier.clone(), style);
    } else if layer.default_style.is_empty() {
        if let Some(first) = e
            .children_named("Style")
            .filter_map(|s| s.child_text("Identifier"))
            .next()
        {
            layer.default_style = first.to_string();
        }
    }

    for format in e.children_named("Format") {
        layer.formats.push(format.text().to_string());
    }
    for info_format in e.children_named("InfoFormat") {
        layer.info_formats.push(info_format.text().to_string());
    }

    for dim_element in e.children_named("Dimension") {
        let Some(dim_id) = dim_element.child_text("Identifier") else {
            continue;
        };
        let dimension = TileDimension {
            identifier: dim_id.to_string(),
            title: dim_element.child_text("Title").unwrap_or("").to_string(),
            abstract_: dim_element.child_text("Abstract").unwrap_or("").to_string(),
            uom: dim_element.child_text("UOM").unwrap_or("").to_string(),
            unit_symbol: dim_element.child_text("unitSymbol").unwrap_or("").to_string(),
            default_value: dim_element.child_text("Default").unwrap_or("").to_string(),
            current: dim_element.child_text("current") == Some("true"),
            values: dim_element
                .children_named("Value")
                .map(|v| v.text().to_string())
                .collect(),
        };
        layer.dimensions.insert(dimension.identifier.clone(), dimension);
    }

    for link_element in e.children_named("TileMatrixSetLink") {
        let Some(set_id) = link_element.child_text("TileMatrixSet") else {
            continue;
        };
        let Some(set) = capability.tile_matrix_sets.get(set_id) else {
            debug!(set = set_id, layer = %layer.identifier, "linked TileMatrixSet not found");
            continue;
        };

        let mut link = MatrixSetLink {
            tile_matrix_set: set_id.to_string(),
            limits: Default::default(),
        };

        for limits_element in link_element.children_named("TileMatrixSetLimits") {
            for limit_element in limits_element.children_named("TileMatrixLimits") {
                let Some(matrix_id) = limit_element.child_text("TileMatrix") else {
                    continue;
                };
                let Some((_, matrix)) = set.matrix_by_identifier(matrix_id) else {
                    debug!(matrix = matrix_id, "TileMatrixLimits for unknown matrix");
                    continue;
                };

                let limits = TileMatrixLimits {
                    min_row: limit_element.child_parse("MinTileRow").unwrap_or(u32::MAX),
                    max_row: limit_element.child_parse("MaxTileRow").unwrap_or(0),
                    min_col: limit_element.child_parse("MinTileCol").unwrap_or(u32::MAX),
                    max_col: limit_element.child_parse("MaxTileCol").unwrap_or(0),
                };

                if limits.valid_for(matrix) {
                    link.limits.insert(matrix_id.to_string(), limits);
                } else {
                    warn!(
                        matrix = matrix_id,
                        ?limits,
                        "TileMatrixLimits outside matrix bounds skipped"
                    );
                }
            }
        }

        layer.set_links.insert(link.tile_matrix_set.clone(), link);
    }

    for resource in e.children_named("ResourceURL") {
        let (Some(format), Some(resource_type), Some(template)) = (
            resource.attr("format"),
            resource.attr("resourceType"),
            resource.attr("template"),
        ) else {
            debug!("ResourceURL missing format/resourceType/template");
            continue;
        };

        match resource_type {
            "tile" => {
                layer
                    .get_tile_urls
                    .insert(format.to_string(), template.to_string());
            }
            "FeatureInfo" => {
                layer
                    .get_feature_info_urls
                    .insert(format.to_string(), template.to_string());
            }
            other => debug!(resource_type = other, "unexpected ResourceURL type"),
        }
    }

    layer
}

fn parse_style(e: &Element) -> TileStyle {
    let mut style = TileStyle {
        identifier: e.child_text("Identifier").unwrap_or("").to_string(),
        title: e.child_text("Title").unwrap_or("").to_string(),
        abstract_: e.child_text("Abstract").unwrap_or("").to_string(),
        is_default: e.attr("isDefault") == Some("true"),
        legend_urls: Vec::new(),
    };

    for legend in e.children_named("LegendURL") {
        style.legend_urls.push(LegendUrl {
            format: legend.attr("format").unwrap_or("").to_string(),
            width: legend.attr_parse("width").unwrap_or(0),
            height: legend.attr_parse("height").unwrap_or(0),
            online_resource: legend.attr("href").unwrap_or("").to_string(),
        });
    }

    style
}

fn corner_bbox(e: Option<&Element>) -> Option<BoundingBox> {
    let e = e?;
    let lower: Vec<f64> = e
        .child_text("LowerCorner")?
        .split_whitespace()
        .filter_map(|v| v.parse().ok())
        .collect();
    let upper: Vec<f64> = e
        .child_text("UpperCorner")?
        .split_whitespace()
        .filter_map(|v| v.parse().ok())
        .collect();
    if lower.len() == 2 && upper.len() == 2 {
        Some(BoundingBox::new(lower[0], lower[1], upper[0], upper[1]))
    } else {
        None
    }
}

/// Synthesise a bounding box from the coarsest matrix of the first linked
/// matrix set.
fn detect_tile_layer_bounding_box(
    layer: &TileLayer,
    sets: &std::collections::HashMap<String, TileMatrixSet>,
) -> Option<CrsBoundingBox> {
    let link = layer.set_links.values().next()?;
    let set = sets.get(&link.tile_matrix_set)?;
    let (resolution, matrix) = set.coarsest()?;

    Some(CrsBoundingBox {
        crs: set.crs.clone(),
        rect: matrix.full_extent(resolution),
    })
}

#[cfg(test)]
mod tests {
    use crate::{parse_capabilities, ParseOptions, ServiceHint, TileMode};

    const WMTS: &[u8] = br#"<?xml version="1.0"?>
<Capabilities xmlns="http://www.opengis.net/wmts/1.0"
    xmlns:ows="http://www.opengis.net/ows/1.1" version="1.0.0">
  <ows:ServiceIdentification>
    <ows:Title>Tiles</ows:Title>
    <ows:ServiceType>OGC WMTS</ows:ServiceType>
  </ows:ServiceIdentification>
  <ows:OperationsMetadata>
    <ows:Operation name="GetTile">
      <ows:DCP><ows:HTTP>
        <ows:Get xlink:href="http://s/wmts?">
          <ows:Constraint name="GetEncoding">
            <ows:AllowedValues><ows:Value>KVP</ows:Value></ows:AllowedValues>
          </ows:Constraint>
        </ows:Get>
      </ows:HTTP></ows:DCP>
    </ows:Operation>
  </ows:OperationsMetadata>
  <Contents>
    <Layer>
      <ows:Title>Ortho</ows:Title>
      <ows:Identifier>ortho</ows:Identifier>
      <Style isDefault="true"><ows:Identifier>normal</ows:Identifier></Style>
      <Format>image/png</Format>
      <InfoFormat>text/xml</InfoFormat>
      <Dimension>
        <ows:Identifier>time</ows:Identifier>
        <Default>2024-01-01</Default>
        <Value>2024-01-01</Value>
        <Value>2024-02-01</Value>
      </Dimension>
      <TileMatrixSetLink>
        <TileMatrixSet>grid</TileMatrixSet>
        <TileMatrixSetLimits>
          <TileMatrixLimits>
            <TileMatrix>0</TileMatrix>
            <MinTileRow>0</MinTileRow><MaxTileRow>0</MaxTileRow>
            <MinTileCol>0</MinTileCol><MaxTileCol>1</MaxTileCol>
          </TileMatrixLimits>
          <TileMatrixLimits>
            <TileMatrix>1</TileMatrix>
            <MinTileRow>0</MinTileRow><MaxTileRow>9</MaxTileRow>
            <MinTileCol>0</MinTileCol><MaxTileCol>9</MaxTileCol>
          </TileMatrixLimits>
        </TileMatrixSetLimits>
      </TileMatrixSetLink>
      <ResourceURL format="image/png" resourceType="tile"
        template="http://s/{style}/{TileMatrixSet}/{TileMatrix}/{TileRow}/{TileCol}.png"/>
    </Layer>
    <TileMatrixSet>
      <ows:Identifier>grid</ows:Identifier>
      <ows:SupportedCRS>urn:ogc:def:crs:EPSG::4326</ows:SupportedCRS>
      <TileMatrix>
        <ows:Identifier>0</ows:Identifier>
        <ScaleDenominator>279541132.0143589</ScaleDenominator>
        <TopLeftCorner>90.0 -180.0</TopLeftCorner>
        <TileWidth>256</TileWidth><TileHeight>256</TileHeight>
        <MatrixWidth>2</MatrixWidth><MatrixHeight>1</MatrixHeight>
      </TileMatrix>
      <TileMatrix>
        <ows:Identifier>1</ows:Identifier>
        <ScaleDenominator>139770566.00717944</ScaleDenominator>
        <TopLeftCorner>90.0 -180.0</TopLeftCorner>
        <TileWidth>256</TileWidth><TileHeight>256</TileHeight>
        <MatrixWidth>4</MatrixWidth><MatrixHeight>2</MatrixHeight>
      </TileMatrix>
    </TileMatrixSet>
  </Contents>
</Capabilities>"#;

    #[test]
    fn test_parse_wmts_contents() {
        let caps = parse_capabilities(WMTS, ServiceHint::Wmts, &ParseOptions::default()).unwrap();

        assert_eq!(caps.version, "1.0.0");
        assert_eq!(
            caps.capability.request.get_tile.get_url(),
            Some("http://s/wmts?")
        );
        assert!(caps
            .capability
            .request
            .get_tile
            .allowed_encodings
            .contains("KVP"));

        let set = caps.capability.tile_matrix_sets.get("grid").unwrap();
        assert_eq!(set.crs, "EPSG:4326");
        assert_eq!(set.len(), 2);

        // EPSG:4326 is axis-inverted: TopLeftCorner "90 -180" becomes (x=-180, y=90)
        let (res0, coarse) = set.coarsest().unwrap();
        assert_eq!(coarse.identifier, "0");
        assert_eq!(coarse.top_left, (-180.0, 90.0));
        // scale * 0.00028 / meters-per-degree = 0.703125 degrees/px
        assert!((res0 - 0.703125).abs() < 1e-9);

        let layer = caps.tile_layer("ortho").unwrap();
        assert_eq!(layer.tile_mode, TileMode::Wmts);
        assert_eq!(layer.default_style, "normal");
        assert_eq!(layer.formats, vec!["image/png"]);
        assert_eq!(layer.dimensions.get("time").unwrap().values.len(), 2);
        assert!(layer.get_tile_urls.contains_key("image/png"));

        let link = layer.set_links.get("grid").unwrap();
        assert_eq!(link.limits.len(), 1, "out-of-bounds limits must be dropped");
        assert!(link.limits.contains_key("0"));

        // bounding box backfilled from the coarsest matrix of the linked set
        assert_eq!(layer.bounding_box.crs, "EPSG:4326");
        let rect = layer.bounding_box.rect;
        assert!((rect.min_x - -180.0).abs() < 1e-6);
        assert!((rect.max_y - 90.0).abs() < 1e-6);
        assert!((rect.max_x - 180.0).abs() < 1e-6);
        assert!((rect.min_y - -90.0).abs() < 1e-6);
    }

    #[test]
    fn test_invert_axis_override_keeps_document_order() {
        let opts = ParseOptions {
            invert_axis_orientation: true,
            ..ParseOptions::default()
        };
        let caps = parse_capabilities(WMTS, ServiceHint::Wmts, &opts).unwrap();
        let set = caps.capability.tile_matrix_sets.get("grid").unwrap();
        // user override cancels the EPSG:4326 inversion: corner read as-is
        assert_eq!(set.coarsest().unwrap().1.top_left, (90.0, -180.0));
    }
}
