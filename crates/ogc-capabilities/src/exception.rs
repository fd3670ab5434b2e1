//! `ServiceExceptionReport` / `ows:ExceptionReport` parsing.

use ogc_common::{OgcError, OgcResult};

use crate::reader;

/// One exception entry from a service exception report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceException {
    pub code: String,
    pub text: String,
}

impl ServiceException {
    /// Human-readable description of the coded error, with the server's
    /// own text appended.
    pub fn description(&self) -> String {
        let friendly = match self.code.as_str() {
            "InvalidFormat" => "Request contains a format not offered by the server.",
            "InvalidCRS" => {
                "Request contains a CRS not offered by the server for one or more of the Layers in the request."
            }
            // legacy WMS < 1.3.0
            "InvalidSRS" => {
                "Request contains a SRS not offered by the server for one or more of the Layers in the request."
            }
            "LayerNotDefined" => {
                "GetMap request is for a Layer not offered by the server, or GetFeatureInfo request is for a Layer not shown on the map."
            }
            "StyleNotDefined" => "Request is for a Layer in a Style not offered by the server.",
            "LayerNotQueryable" => {
                "GetFeatureInfo request is applied to a Layer which is not declared queryable."
            }
            "InvalidPoint" => "GetFeatureInfo request contains invalid X or Y value.",
            "CurrentUpdateSequence" => {
                "Value of (optional) UpdateSequence parameter in GetCapabilities request is equal to current value of service metadata update sequence number."
            }
            "InvalidUpdateSequence" => {
                "Value of (optional) UpdateSequence parameter in GetCapabilities request is greater than current value of service metadata update sequence number."
            }
            "MissingDimensionValue" => {
                "Request does not include a sample dimension value, and the server did not declare a default value for that dimension."
            }
            "InvalidDimensionValue" => "Request contains an invalid sample dimension value.",
            "OperationNotSupported" => {
                "Request is for an optional operation that is not supported by the server."
            }
            "" => "(No error code was reported)",
            _ => "(Unknown error code)",
        };

        let mut message = if friendly == "(Unknown error code)" {
            format!("{} {}", self.code, friendly)
        } else {
            friendly.to_string()
        };
        if !self.text.is_empty() {
            message.push_str("\nThe server also reported: ");
            message.push_str(&self.text);
        }
        message
    }

    pub fn into_error(self) -> OgcError {
        OgcError::ServiceException {
            text: self.description(),
            code: self.code,
        }
    }
}

/// Parse a service exception body.
///
/// Recognises both the WMS `ServiceExceptionReport` and the OWS
/// `ExceptionReport` that WMTS endpoints return. Anything else is an
/// error, letting callers fall back to unknown-content handling.
pub fn parse_service_exception_report(xml: &[u8]) -> OgcResult<Vec<ServiceException>> {
    let root = reader::parse_xml_tree(xml)?;

    let exceptions: Vec<ServiceException> = match root.name() {
        "ServiceExceptionReport" => root
            .children_named("ServiceException")
            .map(|e| ServiceException {
                code: e.attr("code").unwrap_or("").to_string(),
                text: e.text().to_string(),
            })
            .collect(),
        "ExceptionReport" => root
            .children_named("Exception")
            .map(|e| ServiceException {
                code: e.attr("exceptionCode").unwrap_or("").to_string(),
                text: e
                    .child_text("ExceptionText")
                    .unwrap_or_else(|| e.text())
                    .to_string(),
            })
            .collect(),
        other => {
            return Err(OgcError::Content(format!(
                "not a service exception report: <{}>",
                other
            )))
        }
    };

    Ok(exceptions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wms_exception_report() {
        let xml = br#"<?xml version="1.0"?>
<ServiceExceptionReport version="1.1.1">
  <ServiceException code="LayerNotDefined">Layer 'x' is unknown</ServiceException>
  <ServiceException code="InvalidSRS"/>
</ServiceExceptionReport>"#;

        let exceptions = parse_service_exception_report(xml).unwrap();
        assert_eq!(exceptions.len(), 2);
        assert_eq!(exceptions[0].code, "LayerNotDefined");
        assert!(exceptions[0].description().contains("Layer 'x' is unknown"));
        assert!(exceptions[1].description().contains("SRS"));
    }

    #[test]
    fn test_parse_ows_exception_report() {
        let xml = br#"<?xml version="1.0"?>
<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1" version="1.0.0">
  <ows:Exception exceptionCode="TileOutOfRange">
    <ows:ExceptionText>row out of range</ows:ExceptionText>
  </ows:Exception>
</ows:ExceptionReport>"#;

        let exceptions = parse_service_exception_report(xml).unwrap();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].code, "TileOutOfRange");
        assert_eq!(exceptions[0].text, "row out of range");
    }

    #[test]
    fn test_unknown_code_is_reported_verbatim() {
        let e = ServiceException {
            code: "SomethingWeird".to_string(),
            text: "details".to_string(),
        };
        let description = e.description();
        assert!(description.contains("SomethingWeird"));
        assert!(description.contains("details"));
    }

    #[test]
    fn test_non_exception_document_is_rejected() {
        assert!(parse_service_exception_report(b"<Capabilities/>").is_err());
    }
}
