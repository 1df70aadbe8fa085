use std::fmt::Write as _;

use crate::DeviceAddress;

/// Closed set of attribute values a node may carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Address(DeviceAddress),
    Bytes(Vec<u8>),
}

impl AttrValue {
    fn render(&self) -> String {
        match self {
            AttrValue::Str(s) => s.clone(),
            AttrValue::Int(i) => i.to_string(),
            AttrValue::Address(a) => a.to_string(),
            AttrValue::Bytes(b) => hex::encode(b),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<DeviceAddress> for AttrValue {
    fn from(value: DeviceAddress) -> Self {
        AttrValue::Address(value)
    }
}

/// Insertion-ordered attribute map. Setting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs(Vec<(String, AttrValue)>);

impl Attrs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Children(Vec<Node>),
    Bytes(Vec<u8>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Children(Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: Content,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Attrs::new(),
            content: Content::default(),
        }
    }

    /// Child nodes; empty when the body is raw bytes.
    pub fn children(&self) -> &[Node] {
        match &self.content {
            Content::Children(children) => children,
            Content::Bytes(_) => &[],
        }
    }

    pub fn child_by_tag(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|c| c.tag == tag)
    }

    pub fn children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children().iter().filter(move |c| c.tag == tag)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Content::Bytes(bytes) => Some(bytes),
            Content::Children(_) => None,
        }
    }

    pub fn attr_getter(&self) -> AttrGetter<'_> {
        AttrGetter::new(self)
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        let _ = write!(out, "<{}", self.tag);
        for (key, value) in self.attrs.iter() {
            let _ = write!(out, " {}=\"{}\"", key, value.render());
        }
        match &self.content {
            Content::Children(children) if children.is_empty() => out.push_str("/>"),
            Content::Children(children) => {
                out.push('>');
                for child in children {
                    child.write_xml(out);
                }
                let _ = write!(out, "</{}>", self.tag);
            }
            Content::Bytes(bytes) => {
                out.push('>');
                match std::str::from_utf8(bytes) {
                    Ok(text) if !text.chars().any(char::is_control) => out.push_str(text),
                    _ => out.push_str(&hex::encode(bytes)),
                }
                let _ = write!(out, "</{}>", self.tag);
            }
        }
    }
}

pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            node: Node::new(tag),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.node.attrs.insert(key, value);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.node.content = Content::Children(children.into_iter().collect());
        self
    }

    pub fn bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.node.content = Content::Bytes(bytes.into());
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrError {
    pub key: String,
    pub reason: String,
}

/// Reads typed attributes off a node, collecting failures instead of stopping
/// at the first one. Missing required attributes count as failures.
pub struct AttrGetter<'a> {
    node: &'a Node,
    errors: Vec<AttrError>,
}

impl<'a> AttrGetter<'a> {
    fn new(node: &'a Node) -> Self {
        Self {
            node,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, key: &str, reason: impl Into<String>) {
        self.errors.push(AttrError {
            key: key.to_string(),
            reason: reason.into(),
        });
    }

    fn raw(&mut self, key: &str, required: bool) -> Option<&'a AttrValue> {
        let node = self.node;
        let value = node.attrs.get(key);
        if value.is_none() && required {
            self.fail(key, "missing");
        }
        value
    }

    fn get_string(&mut self, key: &str, required: bool) -> Option<String> {
        match self.raw(key, required)? {
            AttrValue::Str(s) => Some(s.clone()),
            AttrValue::Address(a) => Some(a.to_string()),
            AttrValue::Int(i) => Some(i.to_string()),
            AttrValue::Bytes(_) => {
                self.fail(key, "expected string, got bytes");
                None
            }
        }
    }

    pub fn string(&mut self, key: &str) -> String {
        self.get_string(key, true).unwrap_or_default()
    }

    pub fn optional_string(&mut self, key: &str) -> Option<String> {
        self.get_string(key, false)
    }

    pub fn get_i64(&mut self, key: &str, required: bool) -> Option<i64> {
        match self.raw(key, required)? {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Str(s) => match s.parse() {
                Ok(i) => Some(i),
                Err(e) => {
                    self.fail(key, format!("invalid integer {s:?}: {e}"));
                    None
                }
            },
            _ => {
                self.fail(key, "expected integer");
                None
            }
        }
    }

    pub fn i64(&mut self, key: &str) -> i64 {
        self.get_i64(key, true).unwrap_or_default()
    }

    pub fn optional_address(&mut self, key: &str) -> Option<DeviceAddress> {
        self.get_address(key, false)
    }

    pub fn address(&mut self, key: &str) -> Option<DeviceAddress> {
        self.get_address(key, true)
    }

    fn get_address(&mut self, key: &str, required: bool) -> Option<DeviceAddress> {
        match self.raw(key, required)? {
            AttrValue::Address(a) => Some(a.clone()),
            AttrValue::Str(s) => match s.parse() {
                Ok(a) => Some(a),
                Err(e) => {
                    self.fail(key, format!("{e}"));
                    None
                }
            },
            _ => {
                self.fail(key, "expected address");
                None
            }
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[AttrError] {
        &self.errors
    }
}
