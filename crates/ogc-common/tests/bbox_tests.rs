//! Integration tests for bounding box and axis-order behavior.

use ogc_common::{effective_axis_swap, BoundingBox, Crs};

#[test]
fn bbox_query_value_matches_wms_wire_format() {
    let view = BoundingBox::new(-10.0, -10.0, 10.0, 10.0);
    assert_eq!(view.to_query_value(false), "-10,-10,10,10");
}

#[test]
fn axis_swap_flips_bbox_pairs() {
    // WMS 1.3.0 with an axis-inverted geographic CRS transmits lat first
    let crs = Crs::parse("EPSG:4326").unwrap();
    let view = BoundingBox::new(-10.0, -20.0, 10.0, 20.0);

    let swap = effective_axis_swap(&crs, false, false);
    assert!(swap);
    assert_eq!(view.to_query_value(swap), "-20,-10,20,10");

    // InvertAxisOrientation restores x-first for misbehaving servers
    let swap = effective_axis_swap(&crs, false, true);
    assert!(!swap);
    assert_eq!(view.to_query_value(swap), "-10,-20,10,20");
}

#[test]
fn union_of_sublayer_extents() {
    let mut combined = BoundingBox::new(0.0, 0.0, 5.0, 5.0);
    for other in [
        BoundingBox::new(-3.0, 1.0, 2.0, 8.0),
        BoundingBox::new(4.0, -2.0, 6.0, 3.0),
    ] {
        combined.combine(&other);
    }
    assert_eq!(combined, BoundingBox::new(-3.0, -2.0, 6.0, 8.0));
}
