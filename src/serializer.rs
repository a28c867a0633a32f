use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::document::{Document, DocumentError, Element, Node};

/// Output settings for translated documents
#[derive(Debug, Clone)]
pub struct SerializerOptions {
    pub indent: usize,
    pub encoding: String,
}

impl SerializerOptions {
    pub fn new() -> Self {
        Self {
            indent: 2,
            encoding: "UTF-8".to_string(),
        }
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Pretty-prints a document: existing whitespace-only text is dropped, then
/// fresh indentation is written.
pub fn to_string(document: &Document, options: &SerializerOptions) -> Result<String, DocumentError> {
    let mut root = document.root.clone();
    root.strip_whitespace();

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', options.indent);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some(options.encoding.as_str()), None)))
        .map_err(|e| DocumentError::Serialize(e.to_string()))?;
    write_element(&mut writer, &root)?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    String::from_utf8(bytes).map_err(|e| DocumentError::Serialize(e.to_string()))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), DocumentError> {
    let mut start = BytesStart::new(element.name());
    for (key, value) in element.attributes() {
        start.push_attribute((key, value));
    }

    if !element.has_children() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    for child in element.children() {
        match child {
            Node::Element(e) => write_element(writer, e)?,
            Node::Text(text) => emit(writer, Event::Text(BytesText::new(text)))?,
            Node::Comment(comment) => emit(writer, Event::Comment(BytesText::from_escaped(comment.as_str())))?,
            Node::CData(data) => emit(writer, Event::CData(BytesCData::new(data.as_str())))?,
        }
    }
    emit(writer, Event::End(BytesEnd::new(element.name())))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), DocumentError> {
    writer
        .write_event(event)
        .map_err(|e| DocumentError::Serialize(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reindents_and_escapes() {
        let doc = Document::parse(
            "<scenario a=\"x&amp;y\">\n\n      <b>   <c/></b><d>text &lt; 1</d></scenario>",
        )
        .unwrap();
        let out = to_string(&doc, &SerializerOptions::new()).unwrap();
        assert_eq!(
            out,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <scenario a=\"x&amp;y\">\n  \
               <b>\n    <c/>\n  </b>\n  \
               <d>text &lt; 1</d>\n\
             </scenario>\n"
        );
    }

    #[test]
    fn test_output_reparses_to_same_tree() {
        let doc = Document::parse("<scenario><!-- c --><x k=\"1\"><y/></x></scenario>").unwrap();
        let out = to_string(&doc, &SerializerOptions::new().with_indent(4)).unwrap();
        let mut reparsed = Document::parse(&out).unwrap();
        reparsed.root.strip_whitespace();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_encoding_label_is_written() {
        let doc = Document::new(Element::new("scenario"));
        let out = to_string(&doc, &SerializerOptions::new().with_encoding("ISO-8859-1")).unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>"));
    }
}
