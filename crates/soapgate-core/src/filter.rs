//! Empty-tag filtering.
//!
//! Some legacy SOAP peers reject optional elements sent as `<x/>` or `<x></x>`.
//! [`filter_empty_tags`] drops every element that has no character data in it,
//! after its own empty children have been dropped. The SOAP `Envelope`,
//! `Header` and `Body` elements and the payload element directly inside the
//! body always stay, so an empty input message still reaches the decoder.
//! Comments, processing instructions and all remaining markup are copied byte
//! for byte.

use crate::envelope::is_envelope_namespace;
use crate::error::XmlError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

/// An element whose fate is not decided yet
struct Pending {
    start: Vec<u8>,
    content: Vec<u8>,
    has_text: bool,
    kind: Kind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Root SOAP `Envelope`
    Envelope,
    /// SOAP `Header` inside the envelope
    Header,
    /// SOAP `Body` inside the envelope
    Body,
    /// First-level child of the SOAP body
    Payload,
    Other,
}

impl Kind {
    fn of(envelope_ns: bool, e: &BytesStart<'_>, parent: Option<Kind>) -> Self {
        let local = e.local_name();
        let local = local.as_ref();
        match parent {
            Some(Kind::Body) => Kind::Payload,
            None if envelope_ns && local.eq_ignore_ascii_case(b"envelope") => Kind::Envelope,
            Some(Kind::Envelope) if envelope_ns && local.eq_ignore_ascii_case(b"header") => Kind::Header,
            Some(Kind::Envelope) if envelope_ns && local.eq_ignore_ascii_case(b"body") => Kind::Body,
            _ => Kind::Other,
        }
    }

    fn always_kept(self) -> bool {
        self != Kind::Other
    }
}

/// An undeclared prefix counts as a namespace of its own name
fn in_envelope_namespace(ns: ResolveResult<'_>) -> bool {
    match ns {
        ResolveResult::Bound(ns) => is_envelope_namespace(std::str::from_utf8(ns.0).ok()),
        ResolveResult::Unknown(prefix) => is_envelope_namespace(std::str::from_utf8(&prefix).ok()),
        ResolveResult::Unbound => is_envelope_namespace(None),
    }
}

/// Remove elements without character data from `input`.
///
/// Filtering is idempotent: every element kept either has character data
/// somewhere below it or is always kept, so a second pass finds nothing to
/// remove.
pub fn filter_empty_tags(input: &[u8]) -> Result<Vec<u8>, XmlError> {
    let mut reader = NsReader::from_reader(input);
    let mut out = Vec::with_capacity(input.len());
    let mut stack: Vec<Pending> = Vec::new();

    loop {
        let offset = reader.buffer_position() as usize;
        let (ns, event) = reader.read_resolved_event()?;
        let envelope_ns = in_envelope_namespace(ns);
        let raw = &input[offset..reader.buffer_position() as usize];
        match event {
            Event::Eof => break,
            Event::Start(e) => {
                let kind = Kind::of(envelope_ns, &e, stack.last().map(|p| p.kind));
                stack.push(Pending {
                    start: raw.to_vec(),
                    content: Vec::new(),
                    has_text: false,
                    kind,
                });
            }
            Event::Empty(e) => {
                if Kind::of(envelope_ns, &e, stack.last().map(|p| p.kind)).always_kept() {
                    match stack.last_mut() {
                        Some(parent) => parent.content.extend_from_slice(raw),
                        None => out.extend_from_slice(raw),
                    }
                }
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    out.extend_from_slice(raw);
                    continue;
                };
                let target = match stack.last_mut() {
                    Some(parent) => {
                        parent.has_text |= element.has_text;
                        &mut parent.content
                    }
                    None => &mut out,
                };
                if element.has_text || element.kind.always_kept() {
                    target.extend_from_slice(&element.start);
                    target.extend_from_slice(&element.content);
                    target.extend_from_slice(raw);
                } else {
                    // only comments and processing instructions survive
                    target.extend_from_slice(&element.content);
                }
            }
            Event::Text(_) | Event::CData(_) => match stack.last_mut() {
                Some(parent) => {
                    parent.has_text = true;
                    parent.content.extend_from_slice(raw);
                }
                None => out.extend_from_slice(raw),
            },
            _ => match stack.last_mut() {
                Some(parent) => parent.content.extend_from_slice(raw),
                None => out.extend_from_slice(raw),
            },
        }
    }

    // unclosed elements are left as they were
    for element in stack {
        out.extend_from_slice(&element.start);
        out.extend_from_slice(&element.content);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(input: &str) -> String {
        String::from_utf8(filter_empty_tags(input.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_removes_empty_elements() {
        assert_eq!(filter("<a><b/><c></c><d>1</d></a>"), "<a><d>1</d></a>");
    }

    #[test]
    fn test_removes_nested_empty_elements() {
        assert_eq!(filter("<a><b><c/></b><d>x</d></a>"), "<a><d>x</d></a>");
        assert_eq!(filter("<a><b><c/></b></a>"), "");
    }

    #[test]
    fn test_keeps_whitespace_content() {
        assert_eq!(filter("<a> </a>"), "<a> </a>");
    }

    #[test]
    fn test_preserves_comments_and_instructions() {
        assert_eq!(
            filter("<?xml version=\"1.0\"?><a><!-- note --><b/><c>v</c></a>"),
            "<?xml version=\"1.0\"?><a><!-- note --><c>v</c></a>"
        );
        assert_eq!(filter("<a><!-- only --></a>"), "<!-- only -->");
    }

    #[test]
    fn test_keeps_markup_verbatim() {
        let input = r#"<s:Envelope xmlns:s="urn:s"><s:Body><x:In xmlns:x="urn:x" a='1'>v &amp; w</x:In></s:Body></s:Envelope>"#;
        assert_eq!(filter(input), input);
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "<a><b><c/></b><d>x</d></a>",
            "<a>\n  <b/>\n  <c></c>\n</a>",
            "<r><!-- c --><e></e><f><g/>t</f></r>",
            "<a><![CDATA[]]></a>",
        ];
        for input in inputs {
            let once = filter(input);
            assert_eq!(filter(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn test_never_removes_character_data() {
        let input = "<a><b>one</b><c><d>two</d><e/></c>three</a>";
        let out = filter(input);
        for text in ["one", "two", "three"] {
            assert!(out.contains(text));
        }
    }

    #[test]
    fn test_keeps_envelope_and_payload_root() {
        const ENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";
        let compact = format!(r#"<s:Envelope xmlns:s="{}"><s:Header/><s:Body><Nothing/></s:Body></s:Envelope>"#, ENV);
        assert_eq!(filter(&compact), compact);

        let login = format!(
            r#"<s:Envelope xmlns:s="{}"><s:Body><Login><PLoginNev></PLoginNev><PJelszo/></Login></s:Body></s:Envelope>"#,
            ENV
        );
        assert_eq!(
            filter(&login),
            format!(r#"<s:Envelope xmlns:s="{}"><s:Body><Login></Login></s:Body></s:Envelope>"#, ENV)
        );
        assert_eq!(filter(&filter(&login)), filter(&login));
    }

    #[test]
    fn test_foreign_body_element_is_filtered() {
        assert_eq!(
            filter(r#"<x:Wrap xmlns:x="urn:x"><x:Body><x:A/></x:Body><x:B>1</x:B></x:Wrap>"#),
            r#"<x:Wrap xmlns:x="urn:x"><x:B>1</x:B></x:Wrap>"#
        );
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        assert!(filter_empty_tags(b"<a><b></a>").is_err());
    }
}
