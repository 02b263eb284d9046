//! Minimal XML tree used for course descriptors

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::{StoreError, StoreResult};

/// Deepest element nesting accepted in a course document
pub const MAX_DEPTH: usize = 256;

/// Parsed XML element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Parse a document and return its root element
    pub fn parse(xml: &str) -> StoreResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(too_deep());
                    }
                    stack.push(Self::from_start(&e)?);
                }
                Event::Empty(e) => {
                    let node = Self::from_start(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => return Ok(node),
                    }
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| StoreError::InvalidContent("unbalanced end tag".to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => return Ok(node),
                    }
                }
                Event::Text(t) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::Eof => {
                    return Err(StoreError::InvalidContent(
                        "document has no root element".to_string(),
                    ))
                }
                _ => {}
            }
        }
    }

    fn from_start(e: &BytesStart<'_>) -> StoreResult<Self> {
        let tag = utf8(e.name().as_ref())?;
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = utf8(attr.key.as_ref())?;
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            tag,
            attrs,
            children: Vec::new(),
            text: String::new(),
        })
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    /// Render the element (and its subtree) as indented XML
    pub fn render(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.tag);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }

        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>\n");
            return;
        }

        out.push('>');
        if !self.text.is_empty() {
            out.push_str(&escape(self.text.as_str()));
        }
        if !self.children.is_empty() {
            out.push('\n');
            for child in &self.children {
                child.render_into(out, depth + 1);
            }
            out.push_str(&indent);
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push_str(">\n");
    }
}

/// Whether `name` can be used as an element or attribute name
pub fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

pub(crate) fn too_deep() -> StoreError {
    StoreError::InvalidContent(format!("elements nested deeper than {} levels", MAX_DEPTH))
}

fn utf8(bytes: &[u8]) -> StoreResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| StoreError::InvalidContent(format!("invalid UTF-8 in XML name: {}", e)))
}
