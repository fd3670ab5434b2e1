//! Lightweight element tree over quick-xml events.
//!
//! Capabilities documents are small and the dialect rules are easiest to
//! express as tree walks, so the event stream is materialised into a
//! namespace-stripped element tree first. The `wms:` and `ows:` prefixes
//! are removed from element names (and `xlink:` from attribute names) so a
//! single rule set matches qualified and unqualified documents.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use ogc_common::{OgcError, OgcResult};

/// How much of a broken document is quoted back in error messages.
const SNIPPET_LEN: usize = 200;

#[derive(Debug, Default)]
pub(crate) struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concatenated, trimmed character data of this element.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Attribute lookup, case-insensitive as servers are sloppy about
    /// attribute casing (`SRS` vs `srs`).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First attribute present out of several candidate names.
    pub fn attr_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.attr(n))
    }

    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter()
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text()).filter(|t| !t.is_empty())
    }

    /// `child_text` parsed into any `FromStr` type.
    pub fn child_parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.child_text(name).and_then(|t| t.parse().ok())
    }

    /// Attribute parsed into any `FromStr` type.
    pub fn attr_parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.attr(name).and_then(|t| t.parse().ok())
    }
}

fn strip_element_prefix(name: &str) -> &str {
    for prefix in ["wms:", "ows:", "wmts:"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest;
        }
    }
    name
}

fn strip_attr_prefix(name: &str) -> &str {
    name.strip_prefix("xlink:").unwrap_or(name)
}

fn element_from(start: &BytesStart<'_>, xml: &[u8], pos: usize) -> OgcResult<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element {
        name: strip_element_prefix(&name).to_string(),
        ..Default::default()
    };

    for attr in start.attributes() {
        let attr = attr.map_err(|e| xml_error(xml, pos, &e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| xml_error(xml, pos, &e.to_string()))?
            .into_owned();
        element
            .attributes
            .push((strip_attr_prefix(&key).to_string(), value));
    }

    Ok(element)
}

/// Parse a whole document into an element tree rooted at its document
/// element. Malformed XML is reported with line/column coordinates and a
/// snippet of the document.
pub(crate) fn parse_xml_tree(xml: &[u8]) -> OgcResult<Element> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let pos = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(element_from(&e, xml, pos)?);
            }
            Ok(Event::Empty(e)) => {
                let element = element_from(&e, xml, pos)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| xml_error(xml, pos, &e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_error(xml, reader.buffer_position(), &e.to_string())),
        }
        buf.clear();
    }

    root.ok_or_else(|| OgcError::Capabilities("document has no root element".to_string()))
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Line/column of a byte offset, 1-based, for error reporting.
fn line_column(xml: &[u8], pos: usize) -> (usize, usize) {
    let pos = pos.min(xml.len());
    let mut line = 1;
    let mut last_newline = 0;
    for (i, b) in xml[..pos].iter().enumerate() {
        if *b == b'\n' {
            line += 1;
            last_newline = i + 1;
        }
    }
    (line, pos - last_newline + 1)
}

fn xml_error(xml: &[u8], pos: usize, message: &str) -> OgcError {
    let (line, column) = line_column(xml, pos);
    OgcError::Xml {
        line,
        column,
        message: format!("{}; response was: {}", message, snippet(xml)),
    }
}

/// Lossy quote of the first bytes of a document for error messages.
pub(crate) fn snippet(xml: &[u8]) -> String {
    let cut = xml.len().min(SNIPPET_LEN);
    let mut s = String::from_utf8_lossy(&xml[..cut]).into_owned();
    if xml.len() > SNIPPET_LEN {
        s.push('…');
    }
    s
}
