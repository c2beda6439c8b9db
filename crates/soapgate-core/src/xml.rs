//! XML token helpers.
//!
//! Everything here works on a fully buffered document through a namespace-aware
//! [`NsReader`], so that byte offsets reported by the reader can be used to
//! slice the original input verbatim.

use crate::envelope::is_envelope_namespace;
use crate::error::XmlError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{QName, ResolveResult};
use quick_xml::reader::NsReader;
use std::ops::Range;

/// A start element seen in a token stream, with its byte offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    /// Qualified name as written, e.g. `soap:Body`
    pub qname: String,
    /// Local name, e.g. `Body`
    pub local: String,
    /// Resolved namespace URI; an undeclared prefix is reported as itself
    pub namespace: Option<String>,
    /// Attributes as (qualified name, unescaped value)
    pub attributes: Vec<(String, String)>,
    /// Offset of the opening `<`
    pub offset: usize,
    /// Offset just past the closing `>` of the start tag
    pub content_start: usize,
    /// Self-closing element (`<x/>`)
    pub empty: bool,
}

impl StartTag {
    fn new(
        namespace: Option<String>,
        e: &BytesStart<'_>,
        offset: usize,
        content_start: usize,
        empty: bool,
    ) -> Result<Self, XmlError> {
        let qname = std::str::from_utf8(e.name().as_ref())?.to_string();
        let local = std::str::from_utf8(e.local_name().as_ref())?.to_string();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            qname,
            local,
            namespace,
            attributes,
            offset,
            content_start,
            empty,
        })
    }

    /// Value of the attribute with the given qualified name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn is_envelope_element(&self, local: &str) -> bool {
        self.local.eq_ignore_ascii_case(local) && is_envelope_namespace(self.namespace.as_deref())
    }
}

fn owned_namespace(ns: ResolveResult<'_>) -> Option<String> {
    match ns {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.0).into_owned()),
        ResolveResult::Unknown(prefix) => Some(String::from_utf8_lossy(&prefix).into_owned()),
        ResolveResult::Unbound => None,
    }
}

/// Token seen by [`read_tag`]
enum Tag {
    Start(StartTag),
    End,
    Eof,
}

/// Advance to the next start or end tag, skipping everything else.
fn read_tag(reader: &mut NsReader<&[u8]>) -> Result<Tag, XmlError> {
    loop {
        let offset = reader.buffer_position() as usize;
        let (ns, event) = reader.read_resolved_event()?;
        let ns = owned_namespace(ns);
        let content_start = reader.buffer_position() as usize;
        match event {
            Event::Start(e) => return Ok(Tag::Start(StartTag::new(ns, &e, offset, content_start, false)?)),
            Event::Empty(e) => return Ok(Tag::Start(StartTag::new(ns, &e, offset, content_start, true)?)),
            Event::End(_) => return Ok(Tag::End),
            Event::Eof => return Ok(Tag::Eof),
            _ => {}
        }
    }
}

/// Find the SOAP `Body` start element.
///
/// The local name is matched case-insensitively, the namespace must be one of
/// the SOAP envelope namespaces or absent.
pub fn find_soap_body(reader: &mut NsReader<&[u8]>) -> Result<StartTag, XmlError> {
    loop {
        match read_tag(reader)? {
            Tag::Start(tag) if tag.is_envelope_element("body") => return Ok(tag),
            Tag::Eof => return Err(XmlError::BodyNotFound),
            _ => {}
        }
    }
}

/// Find the next start element; `None` when the enclosing element ends first.
pub fn next_start(reader: &mut NsReader<&[u8]>) -> Result<Option<StartTag>, XmlError> {
    match read_tag(reader)? {
        Tag::Start(tag) => Ok(Some(tag)),
        Tag::End | Tag::Eof => Ok(None),
    }
}

/// Find the first element inside the SOAP body.
pub fn find_body(reader: &mut NsReader<&[u8]>) -> Result<StartTag, XmlError> {
    let body = find_soap_body(reader)?;
    if body.empty {
        return Err(XmlError::NoElement(body.qname));
    }
    next_start(reader)?.ok_or(XmlError::NoElement(body.qname))
}

/// Scan forward, across nesting levels, for the first start element accepted
/// by `pred`.
pub fn find_start(
    reader: &mut NsReader<&[u8]>,
    pred: impl Fn(&StartTag) -> bool,
) -> Result<Option<StartTag>, XmlError> {
    loop {
        match read_tag(reader)? {
            Tag::Start(tag) if pred(&tag) => return Ok(Some(tag)),
            Tag::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Byte range of the content of `tag`, consuming the reader up to and past
/// its end tag.
pub fn inner_span(reader: &mut NsReader<&[u8]>, tag: &StartTag) -> Result<Range<usize>, XmlError> {
    if tag.empty {
        return Ok(tag.content_start..tag.content_start);
    }
    let span = reader.read_to_end(QName(tag.qname.as_bytes()))?;
    Ok(span.start as usize..span.end as usize)
}

/// Byte range of the whole element `tag`, start and end tags included.
pub fn element_span(reader: &mut NsReader<&[u8]>, tag: &StartTag) -> Result<Range<usize>, XmlError> {
    if tag.empty {
        return Ok(tag.offset..tag.content_start);
    }
    reader.read_to_end(QName(tag.qname.as_bytes()))?;
    Ok(tag.offset..reader.buffer_position() as usize)
}

/// Locate the SOAP `Header` element in `input` and return the byte range of
/// its content. The scan stops at the `Body`, so a missing header is `None`.
pub fn find_header(input: &[u8]) -> Result<Option<Range<usize>>, XmlError> {
    let mut reader = NsReader::from_reader(input);
    loop {
        match read_tag(&mut reader)? {
            Tag::Start(tag) if tag.is_envelope_element("header") => {
                return inner_span(&mut reader, &tag).map(Some);
            }
            Tag::Start(tag) if tag.is_envelope_element("body") => return Ok(None),
            Tag::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Split an already serialized element into the text before its closing tag
/// and the closing tag itself.
///
/// One forward scan reads the root name, one backward scan matches the
/// closing tag. A self-closing root is rewritten into an open tag, so the
/// returned head can always be followed by child content.
pub fn split_outer(fragment: &str) -> Option<(String, String)> {
    let open = fragment.find('<')?;
    let name_len = fragment[open + 1..]
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(fragment.len() - open - 1);
    let name = &fragment[open + 1..open + 1 + name_len];
    if name.is_empty() || name.starts_with(['?', '!']) {
        return None;
    }

    let trimmed = fragment.trim_end();
    let closing = format!("</{}>", name);
    if trimmed.ends_with(&closing) {
        let close_start = trimmed.len() - closing.len();
        return Some((fragment[..close_start].to_string(), fragment[close_start..].to_string()));
    }
    if let Some(head) = trimmed.strip_suffix("/>") {
        if !head[open..].contains('>') {
            return Some((format!("{}>", head.trim_end()), closing));
        }
    }
    None
}
