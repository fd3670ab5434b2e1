//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// A geographic or projected bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS (EPSG:3857, etc.), coordinates are in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The whole world in CRS:84 coordinates.
    pub fn whole_world() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Compute the intersection of two bounding boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }

        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Check if another bbox lies entirely within this one.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Grow this bbox to also cover `other`.
    pub fn combine(&mut self, other: &BoundingBox) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Swap corners so that min <= max on both axes.
    pub fn normalized(&self) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(self.max_x),
            min_y: self.min_y.min(self.max_y),
            max_x: self.min_x.max(self.max_x),
            max_y: self.min_y.max(self.max_y),
        }
    }

    /// True when no coordinate is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }

    /// Emit the WMS BBOX parameter value.
    ///
    /// With `swap_axes` the coordinate pairs are transmitted y-first, as
    /// WMS 1.3.0 requires for axis-inverted CRSes. Values are printed with
    /// `f64`'s shortest round-trip representation, which never falls back
    /// to scientific notation.
    pub fn to_query_value(&self, swap_axes: bool) -> String {
        if swap_axes {
            format!("{},{},{},{}", self.min_y, self.min_x, self.max_y, self.max_x)
        } else {
            format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine() {
        let mut a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, -5.0, 15.0, 5.0);
        a.combine(&b);
        assert_eq!(a, BoundingBox::new(0.0, -5.0, 15.0, 10.0));
    }

    #[test]
    fn test_contains() {
        let outer = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);
        let inner = BoundingBox::new(-10.0, -10.0, 10.0, 10.0);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn test_query_value_plain_and_swapped() {
        let bbox = BoundingBox::new(-20.0, -10.0, 20.0, 10.0);
        assert_eq!(bbox.to_query_value(false), "-20,-10,20,10");
        assert_eq!(bbox.to_query_value(true), "-10,-20,10,20");
    }

    #[test]
    fn test_query_value_avoids_scientific_notation() {
        let bbox = BoundingBox::new(0.0000001, -20037508.342789244, 0.25, 20037508.342789244);
        let s = bbox.to_query_value(false);
        assert!(!s.contains('e') && !s.contains('E'), "{}", s);
        // values round-trip through parse
        let parts: Vec<f64> = s.split(',').map(|p| p.parse().unwrap()).collect();
        assert_eq!(parts[1], -20037508.342789244);
    }

    #[test]
    fn test_finite() {
        assert!(BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_finite());
        assert!(!BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0).is_finite());
        assert!(!BoundingBox::new(0.0, f64::NEG_INFINITY, 1.0, 1.0).is_finite());
    }
}
