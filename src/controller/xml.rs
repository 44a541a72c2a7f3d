//! Owned XML element tree for controller responses.
//!
//! Controller documents are flat: a root element whose children are typed
//! leaves (`str`, `uri`, `ref`, `obj`, ...) keyed by a `name` attribute. The
//! lookups here cover the `./str[@name="..."]` style queries the API needs.

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a document and return its root element.
    pub fn parse(url: &str, text: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(text).map_err(|e| BridgeError::parse(url, e))?;
        Ok(Self::from_node(doc.root_element()))
    }

    fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        Self {
            tag: node.tag_name().name().to_string(),
            attributes: node
                .attributes()
                .map(|a| (a.name().to_string(), a.value().to_string()))
                .collect(),
            children: node
                .children()
                .filter(|n| n.is_element())
                .map(Self::from_node)
                .collect(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Direct children with the given tag.
    pub fn children_tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    /// First direct child matching `./{tag}[@name="{name}"]`.
    pub fn named_child(&self, tag: &str, name: &str) -> Option<&XmlElement> {
        self.children
            .iter()
            .find(|c| c.tag == tag && c.attr("name") == Some(name))
    }

    /// The `val` attribute of `./{tag}[@name="{name}"]`.
    pub fn named_val(&self, tag: &str, name: &str) -> Option<&str> {
        self.named_child(tag, name).and_then(|c| c.attr("val"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABOUT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<obj href="/evox/about">
  <str name="serverName" val="Tracer SC+" />
  <str name="productVersion" val="5.2.1" />
  <str name="hardwareSerialNumber" val="E21A12345" />
  <ref name="other" href="/evox/other" />
</obj>"#;

    #[test]
    fn test_named_lookups() {
        let root = XmlElement::parse("about", ABOUT).unwrap();
        assert_eq!(root.tag, "obj");
        assert_eq!(root.attr("href"), Some("/evox/about"));
        assert_eq!(root.named_val("str", "serverName"), Some("Tracer SC+"));
        assert_eq!(root.named_val("str", "productVersion"), Some("5.2.1"));
        assert_eq!(root.named_val("uri", "serverName"), None);
        assert_eq!(
            root.named_child("ref", "other").and_then(|r| r.attr("href")),
            Some("/evox/other")
        );
        assert_eq!(root.children_tagged("str").count(), 3);
    }

    #[test]
    fn test_malformed_document_is_parse_failure() {
        let err = XmlElement::parse("https://sc/evox/about", "<obj><str></obj>").unwrap_err();
        assert!(matches!(err, BridgeError::ParseFailure { .. }));
    }
}
