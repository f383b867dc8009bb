//! A small mutable XML tree over quick-xml, enough to edit slide parts.

use quick_xml::Reader;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    /// Qualified name, prefix included (`a:t`).
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: &str) {
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((key.to_string(), value.to_string())),
        }
    }

    /// Name without the namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.name == name)
    }

    /// Follows a chain of child names.
    pub fn path(&self, names: &[&str]) -> Option<&Element> {
        names.iter().try_fold(self, |el, name| el.child(name))
    }

    pub fn path_mut(&mut self, names: &[&str]) -> Option<&mut Element> {
        let mut el = self;
        for name in names {
            el = el.child_mut(name)?;
        }
        Some(el)
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Concatenated text content of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    pub fn set_text(&mut self, text: &str) {
        self.children = vec![Node::Text(text.to_string())];
    }

    /// Depth-first search for descendants named `name`.
    pub fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in self.elements() {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }

    /// Calls `f` on every descendant named `name`, outermost first.
    pub fn for_each_mut(&mut self, name: &str, f: &mut dyn FnMut(&mut Element)) {
        for child in self.elements_mut() {
            if child.name == name {
                f(child);
            } else {
                child.for_each_mut(name, f);
            }
        }
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        out.push('\n');
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(&escape(t.as_str())),
                Node::Element(e) => e.write_into(out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn start_element(part: &str, e: &BytesStart) -> Result<Element> {
    let name = String::from_utf8(e.name().as_ref().to_vec())
        .map_err(|err| ServiceError::xml(part, err))?;
    let mut el = Element::new(&name);
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ServiceError::xml(part, err))?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())
            .map_err(|err| ServiceError::xml(part, err))?;
        let raw = std::str::from_utf8(attr.value.as_ref())
            .map_err(|err| ServiceError::xml(part, err))?;
        let value = unescape(raw).map_err(|err| ServiceError::xml(part, err))?;
        el.attrs.push((key, value.into_owned()));
    }
    Ok(el)
}

fn resolve_entity(name: &str) -> Option<String> {
    let predefined = match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    };
    if let Some(s) = predefined {
        return Some(s.to_string());
    }
    let code = name.strip_prefix('#')?;
    let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => code.parse::<u32>().ok()?,
    };
    char::from_u32(value).map(String::from)
}

fn push_text(parent: &mut Element, text: &str) {
    if let Some(Node::Text(last)) = parent.children.last_mut() {
        last.push_str(text);
    } else {
        parent.children.push(Node::Text(text.to_string()));
    }
}

/// Parses a whole part into its root element. `part` names the part in errors.
pub fn parse(part: &str, data: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(start_element(part, &e)?),
            Ok(Event::Empty(e)) => {
                let el = start_element(part, &e)?;
                match stack.last_mut() {
                    Some(parent) => parent.push(el),
                    None => root = Some(el),
                }
            }
            Ok(Event::End(_)) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| ServiceError::xml(part, "unbalanced end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.push(el),
                    None => root = Some(el),
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(parent) = stack.last_mut() {
                    let s = std::str::from_utf8(t.as_ref())
                        .map_err(|err| ServiceError::xml(part, err))?;
                    push_text(parent, s);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(parent) = stack.last_mut() {
                    let s = std::str::from_utf8(t.as_ref())
                        .map_err(|err| ServiceError::xml(part, err))?;
                    push_text(parent, s);
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let Some(parent) = stack.last_mut() {
                    let name = std::str::from_utf8(r.as_ref())
                        .map_err(|err| ServiceError::xml(part, err))?;
                    let resolved = resolve_entity(name).ok_or_else(|| {
                        ServiceError::xml(part, format!("unknown entity `&{};`", name))
                    })?;
                    push_text(parent, &resolved);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ServiceError::xml(part, e)),
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| ServiceError::xml(part, "document has no root element"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_writes_back() {
        let src = r#"<?xml version="1.0"?><p:sld xmlns:p="urn:p"><a:t>Tom &amp; Jerry &#65;</a:t><a:br/></p:sld>"#;
        let root = parse("test.xml", src.as_bytes()).unwrap();
        assert_eq!(root.name, "p:sld");
        assert_eq!(root.attr("xmlns:p"), Some("urn:p"));
        assert_eq!(root.child("a:t").unwrap().text(), "Tom & Jerry A");

        let again = parse("test.xml", root.to_xml().as_bytes()).unwrap();
        assert_eq!(again, root);
    }

    #[test]
    fn path_follows_children() {
        let root = parse("t", b"<a><b><c x=\"1\"/></b></a>").unwrap();
        assert_eq!(root.path(&["b", "c"]).and_then(|c| c.attr("x")), Some("1"));
        assert!(root.path(&["b", "d"]).is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("bad.xml", b"<a><b></a>").is_err());
    }
}
