//! End-to-end request planning scenarios, asserted at the URL level.

use std::collections::HashMap;

use ogc_capabilities::Dialect;
use ogc_common::{BoundingBox, Crs, TileMatrix, TileMatrixSet};
use ogc_provider::selector::{covering_tiles, select_matrix};
use ogc_provider::session::{DpiMode, SessionState};
use ogc_provider::{planner, MAX_TILES_PER_DRAW};

fn session(crs: &str, format: &str, layers: &[&str], styles: &[&str]) -> SessionState {
    SessionState {
        active_layers: layers.iter().map(|s| s.to_string()).collect(),
        active_styles: styles.iter().map(|s| s.to_string()).collect(),
        visibility: HashMap::new(),
        image_crs: Crs::parse(crs).unwrap(),
        image_format: format.to_string(),
        ignore_axis_orientation: false,
        invert_axis_orientation: false,
        ignore_get_map_url: false,
        ignore_get_feature_info_url: false,
        smooth_pixmap_transform: false,
        dpi: None,
        dpi_mode: DpiMode::ALL,
        tiled: false,
        tile_matrix_set_id: None,
        tile_dimension_values: HashMap::new(),
        max_width: None,
        max_height: None,
        feature_count: 0,
        username: None,
        password: None,
        referer: None,
    }
}

/// WMS 1.1.1 non-tiled basic GetMap.
#[test]
fn scenario_1_wms_111_basic_get_map() {
    let s = session("EPSG:4326", "image/png", &["L"], &[""]);
    let url = planner::get_map_url(
        "http://s/wms",
        "1.1.1",
        Dialect::Wms111,
        &s,
        &["L"],
        &[""],
        &BoundingBox::new(-10.0, -10.0, 10.0, 10.0),
        200,
        200,
    );
    assert_eq!(
        url,
        "http://s/wms?SERVICE=WMS&VERSION=1.1.1&REQUEST=GetMap&BBOX=-10,-10,10,10&SRS=EPSG:4326&WIDTH=200&HEIGHT=200&LAYERS=L&STYLES=&FORMAT=image/png&TRANSPARENT=TRUE"
    );
}

/// WMS 1.3.0 with an axis-inverted CRS: BBOX goes out lat-first.
#[test]
fn scenario_2_wms_130_axis_inverted() {
    let s = session("EPSG:4326", "image/png", &["L"], &[""]);
    let url = planner::get_map_url(
        "http://s/wms",
        "1.3.0",
        Dialect::Wms130,
        &s,
        &["L"],
        &[""],
        &BoundingBox::new(-10.0, -20.0, 10.0, 20.0),
        200,
        200,
    );
    assert!(url.contains("VERSION=1.3.0"));
    assert!(url.contains("CRS=EPSG:4326"));
    assert!(url.contains("BBOX=-20,-10,20,10"));

    // the user override flips the decision back
    let mut s = s;
    s.invert_axis_orientation = true;
    let url = planner::get_map_url(
        "http://s/wms",
        "1.3.0",
        Dialect::Wms130,
        &s,
        &["L"],
        &[""],
        &BoundingBox::new(-10.0, -20.0, 10.0, 20.0),
        200,
        200,
    );
    assert!(url.contains("BBOX=-10,-20,10,20"));
}

/// WMTS KVP GetTile over a two-matrix set.
#[test]
fn scenario_3_wmts_kvp_get_tile() {
    let mut set = TileMatrixSet::new("g", "EPSG:3857");
    for (id, res) in [("coarse", 2.0), ("fine", 1.0)] {
        set.insert_matrix(
            res,
            TileMatrix {
                identifier: id.to_string(),
                scale_denominator: 0.0,
                top_left: (0.0, 1024.0),
                tile_width: 256,
                tile_height: 256,
                matrix_width: 4,
                matrix_height: 4,
            },
        );
    }

    // |1.3 - 1| < |2 - 1.3| so the res=1 matrix wins
    let (res, matrix) = select_matrix(&set, 1.3).unwrap();
    assert_eq!(res, 1.0);
    assert_eq!(matrix.identifier, "fine");

    let view = BoundingBox::new(100.0, 300.0, 700.0, 900.0);
    let plan = covering_tiles(matrix, res, &view, None).unwrap();
    // tiles are 256 map units: cols 0..2, rows 0..2 -> 3x3 block
    assert_eq!(plan.cols, (0, 2));
    assert_eq!(plan.rows, (0, 2));
    assert_eq!(plan.tiles.len(), 9);

    let s = session("EPSG:3857", "image/png", &["ortho"], &["default"]);
    let base = planner::wmts_kvp_url_base("http://s/wmts", "1.0.0", &s, "g", &matrix.identifier);
    let urls: Vec<String> = plan
        .tiles
        .iter()
        .map(|t| planner::wmts_kvp_tile_url(&base, t.row, t.col))
        .collect();

    assert!(urls[0].contains("SERVICE=WMTS"));
    assert!(urls[0].contains("REQUEST=GetTile"));
    assert!(urls[0].contains("TILEMATRIXSET=g"));
    assert!(urls[0].contains("TILEMATRIX=fine"));
    assert!(urls[0].ends_with("&TILEROW=0&TILECOL=0"));
    assert!(urls[8].ends_with("&TILEROW=2&TILECOL=2"));

    // every (row, col) of the block appears exactly once
    let mut seen: Vec<(u32, u32)> = plan.tiles.iter().map(|t| (t.row, t.col)).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 9);
}

/// WMTS REST template substitution.
#[test]
fn scenario_4_wmts_rest_template() {
    let s = session("EPSG:3857", "image/png", &["layer"], &["s"]);
    let base = planner::wmts_rest_url_base(
        "http://s/{style}/{tilematrixset}/{tilematrix}/{tilerow}/{tilecol}.png",
        &s,
        "g",
        "5",
    );
    let url = planner::wmts_rest_tile_url(&base, 3, 7);
    assert_eq!(url, "http://s/s/g/5/3/7.png");
}

/// The per-draw tile budget refuses oversized plans.
#[test]
fn tile_budget_is_enforced() {
    let matrix = TileMatrix {
        identifier: "z".to_string(),
        scale_denominator: 0.0,
        top_left: (0.0, 10_000.0),
        tile_width: 10,
        tile_height: 10,
        matrix_width: 1000,
        matrix_height: 1000,
    };
    let view = BoundingBox::new(0.0, 0.0, 10_000.0, 10_000.0);
    let err = covering_tiles(&matrix, 1.0, &view, None).unwrap_err();
    match err {
        ogc_common::OgcError::TileBudget { required, limit } => {
            assert!(required > MAX_TILES_PER_DRAW);
            assert_eq!(limit, MAX_TILES_PER_DRAW);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

/// The composited tile rectangles of a plan cover the view intersected
/// with the matrix extent.
#[test]
fn plan_rectangles_cover_the_view() {
    let matrix = TileMatrix {
        identifier: "1".to_string(),
        scale_denominator: 0.0,
        top_left: (0.0, 1000.0),
        tile_width: 100,
        tile_height: 100,
        matrix_width: 10,
        matrix_height: 10,
    };
    let view = BoundingBox::new(123.0, 456.0, 678.0, 901.0);
    let plan = covering_tiles(&matrix, 1.0, &view, None).unwrap();

    let mut union = plan.tiles[0].rect;
    for tile in &plan.tiles {
        union.combine(&tile.rect);
    }
    assert!(union.contains(&view));
}
