//! WMS 1.1.1 / 1.3.0 capabilities parsing.

use tracing::{debug, warn};

use ogc_common::{BoundingBox, Crs, OgcResult};

use crate::model::*;
use crate::reader::Element;
use crate::{wmsc, ParseOptions};

/// CRS in which geographic bounding boxes are kept.
pub(crate) const LATLON_CRS: &str = "CRS:84";

pub(crate) fn parse(
    root: &Element,
    version: String,
    dialect: Dialect,
    opts: &ParseOptions<'_>,
) -> OgcResult<Capabilities> {
    let mut caps = Capabilities {
        version,
        dialect,
        service: ServiceMetadata::default(),
        capability: Capability::default(),
    };

    for child in root.children() {
        match child.name() {
            "Service" => parse_service(child, &mut caps.service),
            "Capability" => parse_capability(child, &mut caps, opts)?,
            other => debug!(element = other, "skipping root child"),
        }
    }

    Ok(caps)
}

fn parse_service(e: &Element, service: &mut ServiceMetadata) {
    for child in e.children() {
        match child.name() {
            "Title" => service.title = child.text().to_string(),
            "Abstract" => service.abstract_ = child.text().to_string(),
            "KeywordList" => parse_keyword_list(child, &mut service.keywords),
            "OnlineResource" => {
                if let Some(href) = child.attr("href") {
                    service.online_resource = href.to_string();
                }
            }
            "ContactInformation" => parse_contact_information(child, &mut service.contact),
            "Fees" => service.fees = child.text().to_string(),
            "AccessConstraints" => service.access_constraints = child.text().to_string(),
            "LayerLimit" => service.layer_limit = child.text().parse().unwrap_or(0),
            "MaxWidth" => service.max_width = child.text().parse().unwrap_or(0),
            "MaxHeight" => service.max_height = child.text().parse().unwrap_or(0),
            _ => {}
        }
    }
}

fn parse_contact_information(e: &Element, contact: &mut ContactInformation) {
    if let Some(primary) = e.child("ContactPersonPrimary") {
        contact.person = primary.child_text("ContactPerson").unwrap_or("").to_string();
        contact.organization = primary
            .child_text("ContactOrganization")
            .unwrap_or("")
            .to_string();
    }
    if let Some(position) = e.child_text("ContactPosition") {
        contact.position = position.to_string();
    }
    if let Some(phone) = e.child_text("ContactVoiceTelephone") {
        contact.voice_telephone = phone.to_string();
    }
    if let Some(email) = e.child_text("ContactElectronicMailAddress") {
        contact.email = email.to_string();
    }
}

pub(crate) fn parse_keyword_list(e: &Element, keywords: &mut Vec<String>) {
    for kw in e.children_named("Keyword") {
        if !kw.text().is_empty() {
            keywords.push(kw.text().to_string());
        }
    }
}

fn parse_capability(
    e: &Element,
    caps: &mut Capabilities,
    opts: &ParseOptions<'_>,
) -> OgcResult<()> {
    for child in e.children() {
        match child.name() {
            "Request" => parse_request(child, &mut caps.capability.request),
            "Exception" => {
                for f in child.children_named("Format") {
                    caps.capability.exception_formats.push(f.text().to_string());
                }
            }
            "Layer" => {
                let mut walk = LayerWalk {
                    counter: 0,
                    parents: std::mem::take(&mut caps.capability.layer_parents),
                    parent_names: std::mem::take(&mut caps.capability.layer_parent_names),
                    opts,
                };
                let layer = parse_layer(child, None, &mut walk);
                caps.capability.layer_parents = walk.parents;
                caps.capability.layer_parent_names = walk.parent_names;
                caps.capability.layer = Some(layer);
            }
            "VendorSpecificCapabilities" => {
                for tile_set in child.children_named("TileSet") {
                    wmsc::parse_tile_set_profile(tile_set, &mut caps.capability);
                }
            }
            "UserDefinedSymbolization" => {}
            other => debug!(element = other, "skipping capability child"),
        }
    }
    Ok(())
}

fn parse_request(e: &Element, request: &mut RequestOps) {
    for child in e.children() {
        let op = match child.name() {
            "GetMap" => &mut request.get_map,
            "GetFeatureInfo" => &mut request.get_feature_info,
            "GetLegendGraphic" | "sld:GetLegendGraphic" => &mut request.get_legend_graphic,
            "GetTile" => &mut request.get_tile,
            _ => continue,
        };
        parse_operation_type(child, op);
    }
}

fn parse_operation_type(e: &Element, op: &mut OperationType) {
    for child in e.children() {
        match child.name() {
            "Format" => op.formats.push(child.text().to_string()),
            "DCPType" => {
                if let Some(http) = child.child("HTTP") {
                    let mut dcp = DcpEndpoint::default();
                    if let Some(get) = http.child("Get") {
                        dcp.get_url = online_resource_href(get);
                    }
                    if let Some(post) = http.child("Post") {
                        dcp.post_url = online_resource_href(post);
                    }
                    if dcp.get_url.is_none() {
                        warn!(operation = e.name(), "DCPType without a GET endpoint");
                    }
                    op.dcps.push(dcp);
                }
            }
            _ => {}
        }
    }
}

fn online_resource_href(e: &Element) -> Option<String> {
    e.child("OnlineResource")
        .and_then(|r| r.attr("href"))
        .map(|h| h.to_string())
}

struct LayerWalk<'a, 'b> {
    counter: u32,
    parents: std::collections::HashMap<u32, u32>,
    parent_names: std::collections::HashMap<u32, Vec<String>>,
    opts: &'a ParseOptions<'b>,
}

/// Recursively parse a `Layer` element.
///
/// The child starts from a copy of the parent's inheritable properties and
/// then applies its own declarations on top, so inheritance is resolved at
/// parse time and the finished tree can be read without chasing parents.
fn parse_layer(e: &Element, parent: Option<&LayerProperty>, walk: &mut LayerWalk<'_, '_>) -> LayerProperty {
    walk.counter += 1;

    let mut layer = LayerProperty {
        order_id: walk.counter,
        queryable: e.attr_parse::<u32>("queryable").unwrap_or(0) != 0,
        cascaded: e.attr_parse("cascaded").unwrap_or(0),
        opaque: e.attr_parse::<u32>("opaque").unwrap_or(0) != 0,
        no_subsets: e.attr_parse::<u32>("noSubsets").unwrap_or(0) != 0,
        fixed_width: e.attr_parse("fixedWidth").unwrap_or(0),
        fixed_height: e.attr_parse("fixedHeight").unwrap_or(0),
        ..Default::default()
    };

    if let Some(parent) = parent {
        // Ref: WMS 7.2.4.8 inheritance of layer properties
        layer.styles = parent.styles.clone();
        layer.crs = parent.crs.clone();
        layer.bounding_boxes = parent.bounding_boxes.clone();
        layer.geographic_bounding_box = parent.geographic_bounding_box;
    }

    for child in e.children() {
        match child.name() {
            "Layer" => {
                let sub = parse_layer(child, Some(&layer), walk);
                walk.parents.insert(sub.order_id, layer.order_id);
                layer.children.push(sub);
            }
            "Name" => layer.name = child.text().to_string(),
            "Title" => layer.title = child.text().to_string(),
            "Abstract" => layer.abstract_ = child.text().to_string(),
            "KeywordList" => parse_keyword_list(child, &mut layer.keywords),
            "SRS" | "CRS" => {
                // may hold several whitespace-separated identifiers
                // (deprecated since 1.1.1 but still seen in the wild)
                for crs in child.text().split_whitespace() {
                    layer.crs.push(crs.to_string());
                }
            }
            "LatLonBoundingBox" => parse_latlon_bounding_box(child, &mut layer, walk.opts),
            "EX_GeographicBoundingBox" => parse_geographic_bounding_box(child, &mut layer),
            "BoundingBox" => parse_bounding_box(child, &mut layer),
            "Style" => layer.styles.push(parse_style(child)),
            _ => {}
        }
    }

    if !layer.children.is_empty() {
        walk.parent_names.insert(
            layer.order_id,
            vec![
                layer.name.clone(),
                layer.title.clone(),
                layer.abstract_.clone(),
            ],
        );
    }

    layer
}

/// `LatLonBoundingBox` (WMS 1.1.1) is the legacy geographic bounding box.
/// A declared non-default CRS is transformed to CRS:84 via the collaborator;
/// on failure the raw rectangle is kept.
fn parse_latlon_bounding_box(e: &Element, layer: &mut LayerProperty, opts: &ParseOptions<'_>) {
    let Some(rect) = rect_from_corner_attrs(e) else {
        return;
    };
    layer.geographic_bounding_box = Some(rect);

    if let Some(srs) = e.attr("SRS") {
        if srs != LATLON_CRS {
            if let (Ok(from), Ok(to)) = (Crs::parse(srs), Crs::parse(LATLON_CRS)) {
                match opts.transform.transform_bbox(&rect, &from, &to) {
                    Ok(transformed) => layer.geographic_bounding_box = Some(transformed),
                    Err(err) => debug!(%err, srs, "LatLonBoundingBox transform failed"),
                }
            }
        }
    }
}

fn parse_geographic_bounding_box(e: &Element, layer: &mut LayerProperty) {
    let west = e.child_parse::<f64>("westBoundLongitude");
    let east = e.child_parse::<f64>("eastBoundLongitude");
    let south = e.child_parse::<f64>("southBoundLatitude");
    let north = e.child_parse::<f64>("northBoundLatitude");

    if let (Some(w), Some(e_), Some(s), Some(n)) = (west, east, south, north) {
        layer.geographic_bounding_box = Some(BoundingBox::new(w, s, e_, n));
    }
}

fn parse_bounding_box(e: &Element, layer: &mut LayerProperty) {
    let Some(rect) = rect_from_corner_attrs(e) else {
        return;
    };
    match e.attr_any(&["CRS", "SRS"]) {
        Some(crs) => layer.bounding_boxes.push(CrsBoundingBox {
            crs: crs.to_string(),
            rect,
        }),
        None => debug!("BoundingBox without CRS/SRS attribute skipped"),
    }
}

pub(crate) fn rect_from_corner_attrs(e: &Element) -> Option<BoundingBox> {
    Some(BoundingBox::new(
        e.attr_parse("minx")?,
        e.attr_parse("miny")?,
        e.attr_parse("maxx")?,
        e.attr_parse("maxy")?,
    ))
}

fn parse_style(e: &Element) -> StyleProperty {
    let mut style = StyleProperty {
        name: e.child_text("Name").unwrap_or("").to_string(),
        title: e.child_text("Title").unwrap_or("").to_string(),
        abstract_: e.child_text("Abstract").unwrap_or("").to_string(),
        legend_urls: Vec::new(),
    };

    for legend in e.children_named("LegendURL") {
        style.legend_urls.push(LegendUrl {
            format: legend.child_text("Format").unwrap_or("").to_string(),
            width: legend.attr_parse("width").unwrap_or(0),
            height: legend.attr_parse("height").unwrap_or(0),
            online_resource: online_resource_href(legend).unwrap_or_default(),
        });
    }

    style
}

#[cfg(test)]
mod tests {
    use crate::{parse_capabilities, ParseOptions, ServiceHint};

    const WMS_111: &[u8] = br#"<?xml version="1.0"?>
<WMT_MS_Capabilities version="1.1.1">
  <Service>
    <Name>OGC:WMS</Name>
    <Title>Test Server</Title>
    <OnlineResource xmlns:xlink="http://www.w3.org/1999/xlink" xlink:href="http://s/wms"/>
  </Service>
  <Capability>
    <Request>
      <GetMap>
        <Format>image/png</Format>
        <Format>image/jpeg</Format>
        <DCPType><HTTP><Get><OnlineResource xlink:href="http://s/wms?"/></Get></HTTP></DCPType>
      </GetMap>
      <GetFeatureInfo>
        <Format>text/plain</Format>
        <DCPType><HTTP><Get><OnlineResource xlink:href="http://s/wms?"/></Get></HTTP></DCPType>
      </GetFeatureInfo>
    </Request>
    <Layer>
      <Title>Root</Title>
      <SRS>EPSG:4326</SRS>
      <LatLonBoundingBox minx="-180" miny="-90" maxx="180" maxy="90"/>
      <BoundingBox SRS="EPSG:4326" minx="-180" miny="-90" maxx="180" maxy="90"/>
      <Style><Name>base</Name><Title>Base</Title></Style>
      <Layer queryable="1">
        <Name>roads</Name>
        <Title>Roads</Title>
        <SRS>EPSG:3857</SRS>
        <BoundingBox SRS="EPSG:3857" minx="-2000" miny="-1000" maxx="2000" maxy="1000"/>
      </Layer>
    </Layer>
  </Capability>
</WMT_MS_Capabilities>"#;

    #[test]
    fn test_parse_wms_111_layers_inherit() {
        let caps =
            parse_capabilities(WMS_111, ServiceHint::Wms, &ParseOptions::default()).unwrap();

        assert_eq!(caps.version, "1.1.1");
        assert_eq!(caps.service.title, "Test Server");
        assert_eq!(
            caps.capability.request.get_map.formats,
            vec!["image/png", "image/jpeg"]
        );
        assert_eq!(
            caps.capability.request.get_map.get_url(),
            Some("http://s/wms?")
        );

        let roads = caps.find_layer("roads").expect("roads layer");
        assert!(roads.queryable);
        // inherited from the root layer, then extended locally
        assert_eq!(roads.crs, vec!["EPSG:4326", "EPSG:3857"]);
        assert_eq!(roads.styles.len(), 1);
        assert_eq!(roads.styles[0].name, "base");
        assert_eq!(roads.bounding_boxes.len(), 2);
        assert_eq!(
            roads.geographic_bounding_box.unwrap(),
            ogc_common::BoundingBox::whole_world()
        );

        // parent map records the nesting without back-pointers
        assert_eq!(
            caps.capability.layer_parents.get(&roads.order_id),
            Some(&1)
        );
    }

    #[test]
    fn test_parse_wms_130_with_prefixes() {
        let xml = br#"<?xml version="1.0"?>
<wms:WMS_Capabilities version="1.3.0" xmlns:wms="http://www.opengis.net/wms">
  <wms:Service><wms:Title>prefixed</wms:Title></wms:Service>
  <wms:Capability>
    <wms:Request>
      <wms:GetMap>
        <wms:Format>image/png</wms:Format>
        <wms:DCPType><wms:HTTP><wms:Get>
          <wms:OnlineResource xlink:href="http://s/wms"/>
        </wms:Get></wms:HTTP></wms:DCPType>
      </wms:GetMap>
    </wms:Request>
    <wms:Layer>
      <wms:Name>top</wms:Name>
      <wms:Title>Top</wms:Title>
      <wms:CRS>EPSG:4326</wms:CRS>
      <wms:EX_GeographicBoundingBox>
        <wms:westBoundLongitude>-10</wms:westBoundLongitude>
        <wms:eastBoundLongitude>10</wms:eastBoundLongitude>
        <wms:southBoundLatitude>-5</wms:southBoundLatitude>
        <wms:northBoundLatitude>5</wms:northBoundLatitude>
      </wms:EX_GeographicBoundingBox>
    </wms:Layer>
  </wms:Capability>
</wms:WMS_Capabilities>"#;

        let caps = parse_capabilities(xml, ServiceHint::Auto, &ParseOptions::default()).unwrap();
        assert_eq!(caps.version, "1.3.0");
        assert_eq!(caps.service.title, "prefixed");

        let top = caps.find_layer("top").unwrap();
        assert_eq!(
            top.geographic_bounding_box.unwrap(),
            ogc_common::BoundingBox::new(-10.0, -5.0, 10.0, 5.0)
        );
    }
}
