//! Coordinate Reference System identifiers and axis-order utilities.
//!
//! The provider is not a CRS library. It knows just enough about a CRS to
//! plan requests: the authority identifier, whether the canonical axis
//! order is latitude-first, and the meters-per-unit factor used to derive
//! tile matrix resolutions. Geodetic transforms are delegated to the
//! [`CoordTransform`] collaborator; [`BuiltinTransform`] covers the
//! geographic/web-mercator pair that tiled services overwhelmingly use.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BoundingBox, OgcError, OgcResult};

/// Meters per degree of longitude at the equator on the WGS84 ellipsoid.
const METERS_PER_DEGREE: f64 = 111_319.490_793_273_58;

/// Web Mercator extent half-width in meters.
const MERCATOR_MAX: f64 = 20_037_508.342_789_244;

/// EPSG codes of geographic (lat/lon ordered) CRSes the provider knows.
///
/// WMS 1.3.0 transmits latitude first for these. Codes not listed here
/// are treated as projected with x/y order and meter units.
const GEOGRAPHIC_EPSG: &[&str] = &["4326", "4258", "4269", "4230", "4617", "4759"];

/// A parsed CRS identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    authority: String,
    code: String,
}

impl Crs {
    /// Parse a CRS identifier in any of the spellings capabilities
    /// documents use:
    ///
    /// - `EPSG:4326`, `CRS:84` (case-insensitive)
    /// - OGC URNs: `urn:ogc:def:crs:EPSG::4326`, `urn:ogc:def:crs:OGC:1.3:CRS84`
    /// - OGC URIs: `http://www.opengis.net/def/crs/EPSG/0/3857`
    pub fn parse(s: &str) -> OgcResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(OgcError::UnknownCrs(s.to_string()));
        }

        let upper = trimmed.to_ascii_uppercase();

        if let Some(rest) = upper.strip_prefix("URN:OGC:DEF:CRS:") {
            // urn:ogc:def:crs:<authority>:<version>:<code>
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() >= 2 {
                let authority = parts[0];
                let code = parts[parts.len() - 1];
                if !authority.is_empty() && !code.is_empty() {
                    return Ok(Self::normalize(authority, code));
                }
            }
            return Err(OgcError::UnknownCrs(s.to_string()));
        }

        if upper.starts_with("HTTP://") || upper.starts_with("HTTPS://") {
            // http://www.opengis.net/def/crs/<authority>/<version>/<code>
            let parts: Vec<&str> = upper.split('/').filter(|p| !p.is_empty()).collect();
            if let Some(pos) = parts.iter().position(|p| *p == "CRS") {
                if parts.len() >= pos + 4 {
                    return Ok(Self::normalize(parts[pos + 1], parts[pos + 3]));
                }
            }
            return Err(OgcError::UnknownCrs(s.to_string()));
        }

        match upper.split_once(':') {
            Some((authority, code)) if !authority.is_empty() && !code.is_empty() => {
                Ok(Self::normalize(authority, code))
            }
            _ => Err(OgcError::UnknownCrs(s.to_string())),
        }
    }

    fn normalize(authority: &str, code: &str) -> Self {
        // OGC:CRS84 is the ogc-uri spelling of CRS:84
        if authority == "OGC" && code == "CRS84" {
            return Self {
                authority: "CRS".to_string(),
                code: "84".to_string(),
            };
        }
        Self {
            authority: authority.to_string(),
            code: code.to_string(),
        }
    }

    /// The `AUTHORITY:CODE` form, e.g. `EPSG:4326`.
    pub fn auth_id(&self) -> String {
        format!("{}:{}", self.authority, self.code)
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Whether coordinates are degrees on a geodetic datum.
    pub fn is_geographic(&self) -> bool {
        (self.authority == "CRS" && self.code == "84")
            || (self.authority == "EPSG" && GEOGRAPHIC_EPSG.contains(&self.code.as_str()))
    }

    /// Whether WMS 1.3.0 transmits latitude before longitude for this CRS.
    ///
    /// CRS:84 is explicitly lon/lat by definition; geographic EPSG codes
    /// are lat/lon in their canonical axis order.
    pub fn axis_inverted(&self) -> bool {
        self.authority == "EPSG" && GEOGRAPHIC_EPSG.contains(&self.code.as_str())
    }

    /// Conversion factor from one CRS unit to meters, used when deriving
    /// tile resolutions from scale denominators.
    pub fn meters_per_unit(&self) -> f64 {
        if self.is_geographic() {
            METERS_PER_DEGREE
        } else {
            1.0
        }
    }

    /// Whether two identifiers address the same coordinate system for the
    /// purpose of bounding-box reuse (CRS:84 and EPSG:4326 share a datum
    /// and units; only axis order differs, which the provider tracks
    /// separately).
    pub fn equivalent(&self, other: &Crs) -> bool {
        if self == other {
            return true;
        }
        let wgs84 = |c: &Crs| {
            (c.authority == "CRS" && c.code == "84") || (c.authority == "EPSG" && c.code == "4326")
        };
        wgs84(self) && wgs84(other)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

/// The single axis-order decision used everywhere a coordinate pair is
/// written or read in CRS axis order:
///
/// `swap = (!ignore && crs.axis_inverted()) XOR invert`
///
/// `ignore` disables the WMS 1.3.0 axis rule wholesale; `invert` is the
/// user override for servers that get the rule wrong.
pub fn effective_axis_swap(crs: &Crs, ignore: bool, invert: bool) -> bool {
    ((!ignore && crs.axis_inverted()) as u8 ^ invert as u8) != 0
}

/// Geodetic transform collaborator.
///
/// Implementations transform an axis-aligned bounding box between two
/// CRSes, returning the bounding box of the transformed shape.
pub trait CoordTransform: Send + Sync {
    fn transform_bbox(&self, bbox: &BoundingBox, from: &Crs, to: &Crs) -> OgcResult<BoundingBox>;
}

/// Built-in transform covering identity and the geographic/web-mercator
/// pair. Anything else is reported as an extent error so callers can fall
/// back or surface the failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTransform;

impl BuiltinTransform {
    fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
        let lat = lat.clamp(-85.06, 85.06);
        let x = lon / 180.0 * MERCATOR_MAX;
        let y = (lat.to_radians().tan().asinh()) / std::f64::consts::PI * MERCATOR_MAX;
        (x, y)
    }

    fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
        let lon = x / MERCATOR_MAX * 180.0;
        let lat = (y / MERCATOR_MAX * std::f64::consts::PI).sinh().atan().to_degrees();
        (lon, lat)
    }
}

impl CoordTransform for BuiltinTransform {
    fn transform_bbox(&self, bbox: &BoundingBox, from: &Crs, to: &Crs) -> OgcResult<BoundingBox> {
        if from.equivalent(to) {
            return Ok(*bbox);
        }

        let mercator = Crs::parse("EPSG:3857")?;

        if from.is_geographic() && to.equivalent(&mercator) {
            let (min_x, min_y) = Self::lonlat_to_mercator(bbox.min_x, bbox.min_y);
            let (max_x, max_y) = Self::lonlat_to_mercator(bbox.max_x, bbox.max_y);
            return Ok(BoundingBox::new(min_x, min_y, max_x, max_y));
        }

        if from.equivalent(&mercator) && to.is_geographic() {
            let (min_x, min_y) = Self::mercator_to_lonlat(bbox.min_x, bbox.min_y);
            let (max_x, max_y) = Self::mercator_to_lonlat(bbox.max_x, bbox.max_y);
            return Ok(BoundingBox::new(min_x, min_y, max_x, max_y));
        }

        if from.is_geographic() && to.is_geographic() {
            // shared datum assumption for the geographic codes we know
            return Ok(*bbox);
        }

        Err(OgcError::Extent(format!(
            "no transform available from {} to {}",
            from, to
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_urn() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap().auth_id(), "EPSG:4326");
        assert_eq!(Crs::parse("epsg:3857").unwrap().auth_id(), "EPSG:3857");
        assert_eq!(
            Crs::parse("urn:ogc:def:crs:EPSG::4326").unwrap().auth_id(),
            "EPSG:4326"
        );
        assert_eq!(
            Crs::parse("urn:ogc:def:crs:EPSG:6.18.3:3857")
                .unwrap()
                .auth_id(),
            "EPSG:3857"
        );
        assert_eq!(
            Crs::parse("urn:ogc:def:crs:OGC:1.3:CRS84").unwrap().auth_id(),
            "CRS:84"
        );
        assert_eq!(
            Crs::parse("http://www.opengis.net/def/crs/EPSG/0/3857")
                .unwrap()
                .auth_id(),
            "EPSG:3857"
        );
        assert!(Crs::parse("").is_err());
        assert!(Crs::parse("4326").is_err());
    }

    #[test]
    fn test_axis_inversion() {
        assert!(Crs::parse("EPSG:4326").unwrap().axis_inverted());
        assert!(!Crs::parse("CRS:84").unwrap().axis_inverted());
        assert!(!Crs::parse("EPSG:3857").unwrap().axis_inverted());
    }

    #[test]
    fn test_effective_axis_swap() {
        let geo = Crs::parse("EPSG:4326").unwrap();
        let proj = Crs::parse("EPSG:3857").unwrap();

        assert!(effective_axis_swap(&geo, false, false));
        assert!(!effective_axis_swap(&geo, true, false));
        // user override flips the decision either way
        assert!(!effective_axis_swap(&geo, false, true));
        assert!(effective_axis_swap(&proj, false, true));
        assert!(!effective_axis_swap(&proj, false, false));
    }

    #[test]
    fn test_meters_per_unit() {
        assert_eq!(Crs::parse("EPSG:3857").unwrap().meters_per_unit(), 1.0);
        let deg = Crs::parse("EPSG:4326").unwrap().meters_per_unit();
        assert!((deg - 111_319.490_793_273_58).abs() < 1e-6);
    }

    #[test]
    fn test_builtin_transform_roundtrip() {
        let t = BuiltinTransform;
        let geo = Crs::parse("CRS:84").unwrap();
        let merc = Crs::parse("EPSG:3857").unwrap();

        let bbox = BoundingBox::new(-10.0, -20.0, 10.0, 20.0);
        let fwd = t.transform_bbox(&bbox, &geo, &merc).unwrap();
        let back = t.transform_bbox(&fwd, &merc, &geo).unwrap();

        assert!((back.min_x - bbox.min_x).abs() < 1e-9);
        assert!((back.max_y - bbox.max_y).abs() < 1e-9);
    }

    #[test]
    fn test_builtin_transform_identity() {
        let t = BuiltinTransform;
        let a = Crs::parse("EPSG:4326").unwrap();
        let b = Crs::parse("CRS:84").unwrap();
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(t.transform_bbox(&bbox, &a, &b).unwrap(), bbox);
    }

    #[test]
    fn test_builtin_transform_unknown_pair() {
        let t = BuiltinTransform;
        let from = Crs::parse("EPSG:2154").unwrap();
        let to = Crs::parse("EPSG:3857").unwrap();
        assert!(t
            .transform_bbox(&BoundingBox::new(0.0, 0.0, 1.0, 1.0), &from, &to)
            .is_err());
    }
}
