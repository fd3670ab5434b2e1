//! Capabilities document parsing for OGC raster services.
//!
//! A single entry point, [`parse_capabilities`], accepts the three dialects
//! the provider speaks and produces one uniform [`Capabilities`] model:
//!
//! - WMS 1.3.0 (`WMS_Capabilities`, often `wms:`-qualified)
//! - WMS 1.1.1 (`WMT_MS_Capabilities`)
//! - WMTS 1.0.0 (`Capabilities` with `ows:` metadata)
//!
//! WMS-C tiled layers advertised through `VendorSpecificCapabilities` are
//! folded into the same tile-layer model as WMTS layers. Element names are
//! matched after stripping the `wms:` and `ows:` namespace prefixes so one
//! set of rules handles qualified and unqualified documents alike.

pub mod exception;
pub mod model;
mod reader;
mod wms;
mod wmsc;
mod wmts;

pub use exception::{parse_service_exception_report, ServiceException};
pub use model::*;

use ogc_common::{BuiltinTransform, CoordTransform, OgcError, OgcResult};

/// Which service the caller expects the document to describe.
///
/// The root element is authoritative either way; a hint mismatch is only
/// logged, since servers routinely answer a WMS endpoint with a WMTS
/// document and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHint {
    Auto,
    Wms,
    Wmts,
}

/// Parser configuration.
pub struct ParseOptions<'a> {
    /// Geodetic transform collaborator for bounding-box conversion.
    pub transform: &'a dyn CoordTransform,
    /// Disable the WMS 1.3.0 axis-order rule.
    pub ignore_axis_orientation: bool,
    /// User override flipping the axis-order decision.
    pub invert_axis_orientation: bool,
}

impl Default for ParseOptions<'static> {
    fn default() -> Self {
        static TRANSFORM: BuiltinTransform = BuiltinTransform;
        Self {
            transform: &TRANSFORM,
            ignore_axis_orientation: false,
            invert_axis_orientation: false,
        }
    }
}

/// Parse a capabilities document into the uniform model.
pub fn parse_capabilities(
    xml: &[u8],
    hint: ServiceHint,
    opts: &ParseOptions<'_>,
) -> OgcResult<Capabilities> {
    let body = trim_leading_whitespace(xml);
    if body.is_empty() {
        return Err(OgcError::Capabilities(
            "empty capabilities document".to_string(),
        ));
    }
    if looks_like_html(body) {
        return Err(OgcError::Capabilities(format!(
            "server returned an HTML page instead of capabilities: {}",
            reader::snippet(xml)
        )));
    }

    let root = reader::parse_xml_tree(xml)?;

    let caps = match root.name() {
        "WMS_Capabilities" => {
            warn_on_mismatch(hint, ServiceHint::Wms, root.name());
            let version = root.attr("version").unwrap_or("1.3.0").to_string();
            wms::parse(&root, version, Dialect::Wms130, opts)
        }
        "WMT_MS_Capabilities" => {
            warn_on_mismatch(hint, ServiceHint::Wms, root.name());
            let version = root.attr("version").unwrap_or("1.1.1").to_string();
            wms::parse(&root, version, Dialect::Wms111, opts)
        }
        "Capabilities" => {
            warn_on_mismatch(hint, ServiceHint::Wmts, root.name());
            let version = root.attr("version").unwrap_or("1.0.0").to_string();
            wmts::parse(&root, version, opts)
        }
        other => Err(OgcError::Capabilities(format!(
            "unexpected root element <{}>: {}",
            other,
            reader::snippet(xml)
        ))),
    }?;

    Ok(caps)
}

fn warn_on_mismatch(hint: ServiceHint, detected: ServiceHint, root: &str) {
    if hint != ServiceHint::Auto && hint != detected {
        tracing::warn!(
            expected = ?hint,
            root = root,
            "capabilities document does not match the expected service; parsing per root element"
        );
    }
}

fn trim_leading_whitespace(xml: &[u8]) -> &[u8] {
    let start = xml
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(xml.len());
    &xml[start..]
}

fn looks_like_html(body: &[u8]) -> bool {
    let head: Vec<u8> = body.iter().take(32).map(|b| b.to_ascii_lowercase()).collect();
    head.starts_with(b"<html") || head.starts_with(b"<!doctype html")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_rejected() {
        let err = parse_capabilities(b"  \n ", ServiceHint::Auto, &ParseOptions::default())
            .unwrap_err();
        assert!(matches!(err, OgcError::Capabilities(_)));
    }

    #[test]
    fn test_html_error_page_is_rejected() {
        let err = parse_capabilities(
            b"<!DOCTYPE html><html><body>502</body></html>",
            ServiceHint::Wms,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("HTML"));
    }

    #[test]
    fn test_unknown_root_is_rejected() {
        let err = parse_capabilities(
            b"<?xml version=\"1.0\"?><Unrelated/>",
            ServiceHint::Auto,
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unrelated"));
    }
}
