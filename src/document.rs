use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while reading or rewriting a scenario document.
///
/// All of these concern one document only; a batch run logs them and moves on.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Failed to parse document: {0}")]
    Parse(String),

    #[error("Failed to serialize document: {0}")]
    Serialize(String),

    #[error("Expected <{parent}> to have a <{name}> sub-element")]
    MissingElement { parent: String, name: String },

    #[error("Expected <{parent}> not to have more than one sub-element with name {name}")]
    DuplicateElement { parent: String, name: String },

    #[error("Element <{element}> is missing required attribute {attribute}")]
    MissingAttribute { element: String, attribute: String },

    #[error("Element <{element}> has invalid {attribute}=\"{value}\"")]
    InvalidAttribute {
        element: String,
        attribute: String,
        value: String,
    },

    #[error("Document version {found} is newer than the target version {target}")]
    NewerThanTarget { found: u32, target: u32 },

    #[error("Option {option} must be set to translate this document: {reason}")]
    MissingOption { option: String, reason: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("Schema validation failed: {0}")]
    Validation(String),
}

impl DocumentError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        DocumentError::Unsupported(message.into())
    }

    pub fn missing_option(option: &str, reason: impl Into<String>) -> Self {
        DocumentError::MissingOption {
            option: option.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(element: &Element, attribute: &str, value: &str) -> Self {
        DocumentError::InvalidAttribute {
            element: element.name.clone(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }
}

/// A node of the scenario tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    CData(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    fn is_element_named(&self, name: &str) -> bool {
        matches!(self, Node::Element(e) if e.name == name)
    }
}

/// An owned element with ordered attributes and children.
///
/// Names are stored qualified (`om:scenario`, `xsi:schemaLocation`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.children.push(Node::Comment(comment.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without its namespace prefix
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    // ---- attributes ----

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attr(key).is_some()
    }

    /// Sets an attribute, keeping its position when it already exists.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn set_attr_if_absent(&mut self, key: &str, value: impl Into<String>) {
        if !self.has_attr(key) {
            self.set_attr(key, value);
        }
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(k, _)| k == key)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn rename_attr(&mut self, from: &str, to: &str) {
        if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| k == from) {
            slot.0 = to.to_string();
        }
    }

    pub fn required_attr(&self, key: &str) -> Result<&str, DocumentError> {
        self.attr(key).ok_or_else(|| DocumentError::MissingAttribute {
            element: self.name.clone(),
            attribute: key.to_string(),
        })
    }

    /// Parses an optional attribute; a present but malformed value is an error.
    pub fn parse_attr<T: FromStr>(&self, key: &str) -> Result<Option<T>, DocumentError> {
        match self.attr(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| DocumentError::invalid(self, key, raw)),
        }
    }

    pub fn required_parse<T: FromStr>(&self, key: &str) -> Result<T, DocumentError> {
        let raw = self.required_attr(key)?;
        raw.trim()
            .parse::<T>()
            .map_err(|_| DocumentError::invalid(self, key, raw))
    }

    /// Moves all attributes out of `other` into this element.
    pub fn take_attributes_from(&mut self, other: &mut Element) {
        for (k, v) in other.attributes.drain(..) {
            self.set_attr(&k, v);
        }
    }

    // ---- children ----

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    pub fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.child_elements().filter(move |e| e.name == name)
    }

    pub fn elements_named_mut<'a>(
        &'a mut self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut Element> + 'a {
        self.child_elements_mut().filter(move |e| e.name == name)
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.child_elements().filter(|e| e.name == name).count()
    }

    /// Unique child by name, or `None`; more than one is an error.
    pub fn optional_child(&self, name: &str) -> Result<Option<&Element>, DocumentError> {
        if self.count_named(name) > 1 {
            return Err(self.duplicate(name));
        }
        Ok(self.first_child(name))
    }

    pub fn optional_child_mut(&mut self, name: &str) -> Result<Option<&mut Element>, DocumentError> {
        if self.count_named(name) > 1 {
            return Err(self.duplicate(name));
        }
        Ok(self.first_child_mut(name))
    }

    pub fn child(&self, name: &str) -> Result<&Element, DocumentError> {
        let missing = self.missing(name);
        self.optional_child(name)?.ok_or(missing)
    }

    pub fn child_mut(&mut self, name: &str) -> Result<&mut Element, DocumentError> {
        let missing = self.missing(name);
        self.optional_child_mut(name)?.ok_or(missing)
    }

    /// First child with the given name, ignoring any duplicates.
    pub fn first_child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.name == name)
    }

    pub fn first_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.child_elements_mut().find(|e| e.name == name)
    }

    /// Fetches the unique child, appending an empty one when absent.
    pub fn get_or_create_child(&mut self, name: &str) -> Result<&mut Element, DocumentError> {
        if self.count_named(name) > 1 {
            return Err(self.duplicate(name));
        }
        let index = match self.position_of(name) {
            Some(index) => index,
            None => {
                self.children.push(Node::Element(Element::new(name)));
                self.children.len() - 1
            }
        };
        self.element_at_mut(index)
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|n| n.is_element_named(name))
    }

    /// Node index of the first child whose name is in `names`.
    pub fn position_of_any(&self, names: &[&str]) -> Option<usize> {
        self.children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if names.contains(&e.name.as_str())))
    }

    fn element_at_mut(&mut self, index: usize) -> Result<&mut Element, DocumentError> {
        let parent = self.name.clone();
        self.children
            .get_mut(index)
            .and_then(Node::as_element_mut)
            .ok_or(DocumentError::MissingElement {
                parent,
                name: format!("#{}", index),
            })
    }

    pub fn append_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn append_node(&mut self, node: Node) {
        self.children.push(node);
    }

    pub fn insert_child(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, Node::Element(child));
    }

    pub fn prepend_child(&mut self, child: Element) {
        self.insert_child(0, child);
    }

    /// Inserts before the first child named `before`, or appends.
    pub fn insert_before(&mut self, before: &str, child: Element) {
        match self.position_of(before) {
            Some(index) => self.insert_child(index, child),
            None => self.append_child(child),
        }
    }

    /// Inserts before the first child named in `before`, or appends.
    pub fn insert_before_any(&mut self, before: &[&str], child: Element) {
        match self.position_of_any(before) {
            Some(index) => self.insert_child(index, child),
            None => self.append_child(child),
        }
    }

    /// Removes and returns every direct child with the given name.
    pub fn remove_children_named(&mut self, name: &str) -> Vec<Element> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.children.len());
        for node in self.children.drain(..) {
            match node {
                Node::Element(e) if e.name == name => removed.push(e),
                other => kept.push(other),
            }
        }
        self.children = kept;
        removed
    }

    /// Removes the unique child with the given name, if any.
    pub fn take_child(&mut self, name: &str) -> Result<Option<Element>, DocumentError> {
        if self.count_named(name) > 1 {
            return Err(self.duplicate(name));
        }
        Ok(self.remove_children_named(name).into_iter().next())
    }

    pub fn take_required_child(&mut self, name: &str) -> Result<Element, DocumentError> {
        self.take_child(name)?.ok_or_else(|| self.missing(name))
    }

    /// Removes every child node, returning the element children.
    pub fn take_child_elements(&mut self) -> Vec<Element> {
        std::mem::take(&mut self.children)
            .into_iter()
            .filter_map(|n| match n {
                Node::Element(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Consumes the element, keeping only its element children.
    pub fn into_child_elements(mut self) -> Vec<Element> {
        self.take_child_elements()
    }

    pub fn take_children(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.children)
    }

    pub fn retain_children<F: FnMut(&Node) -> bool>(&mut self, f: F) {
        self.children.retain(f);
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    // ---- text ----

    /// Concatenated text of the direct text children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) | Node::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Parses the trimmed text content.
    pub fn parse_text<T: FromStr>(&self) -> Result<T, DocumentError> {
        let text = self.text();
        text.trim()
            .parse::<T>()
            .map_err(|_| DocumentError::invalid(self, "#text", text.trim()))
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.clear_text();
        self.children.push(Node::Text(text.into()));
    }

    pub fn clear_text(&mut self) {
        self.children
            .retain(|n| !matches!(n, Node::Text(_) | Node::CData(_)));
    }

    // ---- recursive helpers ----

    /// Depth-first, document-order search below this element
    pub fn find_descendant(&self, name: &str) -> Option<&Element> {
        for child in self.child_elements() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find_descendant(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_descendant_mut(&mut self, name: &str) -> Option<&mut Element> {
        for child in self.child_elements_mut() {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find_descendant_mut(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn has_descendant(&self, name: &str) -> bool {
        self.find_descendant(name).is_some()
    }

    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect_named(name, &mut found);
        found
    }

    fn collect_named<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            if child.name == name {
                found.push(child);
            }
            child.collect_named(name, found);
        }
    }

    /// Calls `f` on every descendant element with the given name, in document order.
    pub fn for_each_named_mut<F>(&mut self, name: &str, f: &mut F) -> Result<(), DocumentError>
    where
        F: FnMut(&mut Element) -> Result<(), DocumentError>,
    {
        for child in self.child_elements_mut() {
            if child.name == name {
                f(child)?;
            }
            child.for_each_named_mut(name, f)?;
        }
        Ok(())
    }

    /// Calls `f` on this element and every descendant element.
    pub fn visit_mut<F: FnMut(&mut Element)>(&mut self, f: &mut F) {
        f(self);
        for child in self.child_elements_mut() {
            child.visit_mut(f);
        }
    }

    /// Removes every descendant element with the given name; returns how many went.
    pub fn remove_descendants_named(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|n| !n.is_element_named(name));
        let mut removed = before - self.children.len();
        for child in self.child_elements_mut() {
            removed += child.remove_descendants_named(name);
        }
        removed
    }

    /// Detaches every descendant element with the given name, in document order.
    ///
    /// Matches are taken whole; nothing below a match is searched.
    pub fn take_descendants_named(&mut self, name: &str) -> Vec<Element> {
        let mut taken = Vec::new();
        self.collect_taken(name, &mut taken);
        taken
    }

    /// Detaches the first descendant element with the given name.
    pub fn take_first_descendant(&mut self, name: &str) -> Option<Element> {
        for index in 0..self.children.len() {
            if self.children[index].is_element_named(name) {
                return match self.children.remove(index) {
                    Node::Element(e) => Some(e),
                    _ => None,
                };
            }
            if let Node::Element(child) = &mut self.children[index] {
                if let Some(found) = child.take_first_descendant(name) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn collect_taken(&mut self, name: &str, taken: &mut Vec<Element>) {
        let mut kept = Vec::with_capacity(self.children.len());
        for node in self.children.drain(..) {
            match node {
                Node::Element(e) if e.name == name => taken.push(e),
                Node::Element(mut e) => {
                    e.collect_taken(name, taken);
                    kept.push(Node::Element(e));
                }
                other => kept.push(other),
            }
        }
        self.children = kept;
    }

    /// Removes text nodes that contain only whitespace, recursively.
    pub fn strip_whitespace(&mut self) {
        self.children
            .retain(|n| !matches!(n, Node::Text(t) if t.trim().is_empty()));
        for child in self.child_elements_mut() {
            child.strip_whitespace();
        }
    }

    pub(crate) fn missing(&self, name: &str) -> DocumentError {
        DocumentError::MissingElement {
            parent: self.name.clone(),
            name: name.to_string(),
        }
    }

    pub(crate) fn duplicate(&self, name: &str) -> DocumentError {
        DocumentError::DuplicateElement {
            parent: self.name.clone(),
            name: name.to_string(),
        }
    }
}

/// A parsed scenario document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Parses a document; the prolog and anything outside the root is dropped.
    pub fn parse(xml: &str) -> Result<Self, DocumentError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                DocumentError::Parse(format!("at byte {}: {}", reader.buffer_position(), e))
            })?;
            match event {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DocumentError::Parse("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = text
                            .unescape()
                            .map_err(|e| DocumentError::Parse(e.to_string()))?;
                        parent.children.push(Node::Text(text.into_owned()));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let data = String::from_utf8_lossy(&data.into_inner()).into_owned();
                        parent.children.push(Node::CData(data));
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        let comment = String::from_utf8_lossy(&comment).into_owned();
                        parent.children.push(Node::Comment(comment));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(DocumentError::Parse("unexpected end of document".to_string()));
        }
        root.map(Document::new)
            .ok_or_else(|| DocumentError::Parse("document has no root element".to_string()))
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, DocumentError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| DocumentError::Parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| DocumentError::Parse(e.to_string()))?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), DocumentError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(DocumentError::Parse("more than one root element".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scenario schemaVersion="12" name="t&amp;1">
  <!-- note -->
  <interventions>
    <timed><intervention time="0"/></timed>
  </interventions>
  <parameters>@parameters@</parameters>
</scenario>"#;

    #[test]
    fn test_parse_keeps_structure_and_unescapes() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert_eq!(doc.root.name(), "scenario");
        assert_eq!(doc.root.attr("name"), Some("t&1"));
        let interventions = doc.root.child("interventions").unwrap();
        assert_eq!(interventions.child("timed").unwrap().count_named("intervention"), 1);
        assert_eq!(doc.root.child("parameters").unwrap().text(), "@parameters@");
        assert!(doc
            .root
            .children()
            .iter()
            .any(|n| matches!(n, Node::Comment(c) if c.trim() == "note")));
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!(matches!(
            Document::parse("<scenario><a></scenario>"),
            Err(DocumentError::Parse(_))
        ));
        assert!(Document::parse("").is_err());
    }

    #[test]
    fn test_optional_child_rejects_duplicates() {
        let root = Element::new("x")
            .with_child(Element::new("a"))
            .with_child(Element::new("a"));
        assert!(matches!(
            root.optional_child("a"),
            Err(DocumentError::DuplicateElement { .. })
        ));
        assert!(root.optional_child("b").unwrap().is_none());
        assert!(matches!(
            root.child("b"),
            Err(DocumentError::MissingElement { .. })
        ));
    }

    #[test]
    fn test_get_or_create_child_appends_once() {
        let mut root = Element::new("x");
        root.get_or_create_child("a").unwrap().set_attr("k", "1");
        root.get_or_create_child("a").unwrap().set_attr("k", "2");
        assert_eq!(root.count_named("a"), 1);
        assert_eq!(root.child("a").unwrap().attr("k"), Some("2"));
    }

    #[test]
    fn test_attribute_helpers() {
        let mut e = Element::new("mosq").with_attr("rate", "0.5").with_attr("bad", "x");
        assert_eq!(e.parse_attr::<f64>("rate").unwrap(), Some(0.5));
        assert!(e.parse_attr::<f64>("bad").is_err());
        assert_eq!(e.parse_attr::<f64>("absent").unwrap(), None);
        e.rename_attr("rate", "value");
        assert_eq!(e.attributes().next(), Some(("value", "0.5")));
        assert_eq!(e.remove_attr("bad").as_deref(), Some("x"));
        assert!(e.required_attr("bad").is_err());
    }

    #[test]
    fn test_insert_before_falls_back_to_append() {
        let mut root = Element::new("x")
            .with_child(Element::new("a"))
            .with_child(Element::new("c"));
        root.insert_before("c", Element::new("b"));
        root.insert_before("zzz", Element::new("d"));
        let names: Vec<_> = root.child_elements().map(Element::name).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_recursive_helpers() {
        let mut root = Element::new("x").with_child(
            Element::new("y")
                .with_child(Element::new("sources"))
                .with_child(Element::new("z").with_child(Element::new("sources"))),
        );
        assert_eq!(root.descendants_named("sources").len(), 2);
        assert_eq!(root.remove_descendants_named("sources"), 2);
        assert!(!root.has_descendant("sources"));
        assert_eq!(Element::new("om:scenario").local_name(), "scenario");
    }

    #[test]
    fn test_take_descendants_in_document_order() {
        let mut root = Element::new("entoData").with_child(
            Element::new("a")
                .with_child(Element::new("EIRDaily").with_text("1"))
                .with_child(Element::new("b").with_child(Element::new("EIRDaily").with_text("2"))),
        )
        .with_child(Element::new("EIRDaily").with_text("3"));
        let taken: Vec<String> = root
            .take_descendants_named("EIRDaily")
            .iter()
            .map(Element::text)
            .collect();
        assert_eq!(taken, vec!["1", "2", "3"]);
        assert!(!root.has_descendant("EIRDaily"));
    }
}
