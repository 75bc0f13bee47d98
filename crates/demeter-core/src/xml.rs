//! Minimal XML element tree over `quick-xml`.
//!
//! Each response page is parsed whole; adapters walk the resulting tree.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;

use crate::error::HarvestError;
use crate::models::Record;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    /// Name without namespace prefix (`title` for `dc:title`).
    pub name: String,
    /// Name as written in the document (`dc:title`).
    pub qname: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First descendant (depth-first, document order) with the given name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants with the given name, in document order.
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.find_all(name, out);
        }
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }
}

/// Flattens child elements into a record of `key -> [text, ...]`.
///
/// Repeated elements accumulate in document order; elements without text
/// are skipped.
pub fn fields_to_record<'a, I, K>(elements: I, key: K) -> Record
where
    I: IntoIterator<Item = &'a Element>,
    K: Fn(&Element) -> String,
{
    let mut record = Record::new();
    for element in elements {
        let text = element.text();
        if text.is_empty() {
            continue;
        }
        let entry = record
            .entry(key(element))
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = entry {
            values.push(Value::String(text.to_string()));
        }
    }
    record
}

/// Parses a document and returns its root element.
pub fn parse(xml: &str) -> Result<Element, HarvestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(open(&start)?),
            Ok(Event::Empty(start)) => {
                let element = open(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| {
                    HarvestError::Protocol("XML closing tag without opening tag".into())
                })?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(text)) => {
                let unescaped = text
                    .unescape()
                    .map_err(|e| HarvestError::Protocol(format!("Bad XML text: {e}")))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(HarvestError::Protocol(format!(
                    "Malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if !stack.is_empty() {
        return Err(HarvestError::Protocol(
            "XML document ended with unclosed elements".into(),
        ));
    }
    root.ok_or_else(|| HarvestError::Protocol("Empty XML document".into()))
}

fn open(start: &BytesStart<'_>) -> Result<Element, HarvestError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let qname = String::from_utf8_lossy(start.name().as_ref()).into_owned();

    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| HarvestError::Protocol(format!("Bad XML attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| HarvestError::Protocol(format!("Bad XML attribute value: {e}")))?
            .into_owned();
        attrs.push((key, value));
    }

    Ok(Element {
        name,
        qname,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), HarvestError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(HarvestError::Protocol(
                "XML document has more than one root element".into(),
            ));
        }
    }
    Ok(())
}
