//! Inbound request decoding: action resolution, empty-tag filtering, header
//! hook, and the standard, raw and custom body decoding modes.

use crate::annotation::{Annotation, Annotations};
use crate::backend::{Backend, CallContext, EncodeHeaderFn, HeaderDecoder, InputDecoder};
use crate::error::{GatewayError, GatewayResult};
use crate::message::BoxMessage;
use http::request::Parts;
use http::HeaderMap;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::{NsReader, Reader};
use soapgate_core::xml::{element_span, find_start, inner_span};
use soapgate_core::{filter_empty_tags, find_header, find_soap_body, next_start, XmlError};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SOAP_ACTION_HEADER: &str = "soapaction";
pub const KEEP_EMPTY_TAGS_HEADER: &str = "keep-empty-tags";
pub const KEEP_EMPTY_TAGS_PARAM: &str = "keepEmptyTags";
pub const FORBID_MERGE_HEADER: &str = "forbid-merge";

/// Namespace declarations moved from a raw `_Input` element onto the
/// synthesized `_Output` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NsSplice {
    /// Tag prefix including the colon, e.g. `ns:`; empty for a default namespace
    pub prefix: String,
    /// Declarations to append to the output tag, e.g. ` xmlns:ns="urn:x"`
    pub postfix: String,
}

/// What the decoder learned about a request, needed again to encode the
/// response
pub struct RequestInfo {
    pub action: String,
    pub soap_action: String,
    pub annotation: Annotation,
    /// Only set in raw mode with namespace removal
    pub ns: Option<NsSplice>,
    pub encode_header: Option<EncodeHeaderFn>,
    pub forbid_merge: bool,
}

impl fmt::Debug for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestInfo")
            .field("action", &self.action)
            .field("soap_action", &self.soap_action)
            .field("annotation", &self.annotation)
            .field("ns", &self.ns)
            .field("encode_header", &self.encode_header.is_some())
            .field("forbid_merge", &self.forbid_merge)
            .finish()
    }
}

/// Action named by a `SOAPAction` value: quotes trimmed, everything up to the
/// last `.proto/` and then up to the first `/` removed.
pub fn normalize_action(soap_action: &str) -> String {
    let mut action = soap_action.trim().trim_matches('"');
    if let Some(i) = action.rfind(".proto/") {
        action = &action[i + ".proto/".len()..];
    }
    if let Some((_, rest)) = action.split_once('/') {
        action = rest;
    }
    action.to_string()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn is_true(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// `Keep-Empty-Tags: 1` header or `keepEmptyTags=1` query parameter
pub fn keep_empty_tags(parts: &Parts) -> bool {
    if header_value(&parts.headers, KEEP_EMPTY_TAGS_HEADER).is_some_and(is_true) {
        return true;
    }
    parts.uri.query().is_some_and(|query| {
        query.split('&').any(|pair| match pair.split_once('=') {
            Some((key, value)) => key == KEEP_EMPTY_TAGS_PARAM && is_true(value),
            None => false,
        })
    })
}

/// `Forbid-Merge: <bool>` header
pub fn forbid_merge(headers: &HeaderMap) -> bool {
    header_value(headers, FORBID_MERGE_HEADER).is_some_and(is_true)
}

/// Content of a raw body, unwrapped from its `_Input` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedInput {
    pub content: String,
    pub ns: Option<NsSplice>,
}

/// Unwrap the first element whose local name ends in `_Input`, and then any
/// `_Input` elements that are the sole content of the one just unwrapped.
///
/// Input without such an element comes back unchanged. An `_Input` element
/// found deeper inside the unwrapped content is kept as data, so a second pass
/// only changes content that has one below its top level. With `remove_ns`
/// the outer element's namespace declarations are returned as an
/// [`NsSplice`] and their prefix is removed from the content's tags.
pub fn trim_input(raw: &str, remove_ns: bool) -> TrimmedInput {
    let unchanged = || TrimmedInput { content: raw.to_string(), ns: None };

    let mut reader = NsReader::from_str(raw);
    let tag = match find_start(&mut reader, |t| t.local.ends_with("_Input")) {
        Ok(Some(tag)) => tag,
        Ok(None) => return unchanged(),
        Err(e) => {
            debug!("raw input is not well formed: {}", e);
            return unchanged();
        }
    };
    let mut content = match inner_span(&mut reader, &tag) {
        Ok(span) => &raw[span],
        Err(e) => {
            debug!("raw input element {} is not closed: {}", tag.qname, e);
            return unchanged();
        }
    };
    while let Some(inner) = lone_input_element(content) {
        content = &content[inner];
    }
    if !remove_ns {
        return TrimmedInput { content: content.to_string(), ns: None };
    }

    let prefixed: Vec<_> = tag
        .attributes
        .iter()
        .filter_map(|(key, value)| key.strip_prefix("xmlns:").map(|p| (p, value)))
        .collect();
    let splice = if let Some((first, _)) = prefixed.first() {
        NsSplice {
            prefix: format!("{}:", first),
            postfix: prefixed
                .iter()
                .map(|(p, v)| format!(" xmlns:{}=\"{}\"", p, escape(v.as_str())))
                .collect(),
        }
    } else if let Some(default) = tag.attribute("xmlns") {
        NsSplice {
            prefix: String::new(),
            postfix: format!(" xmlns=\"{}\"", escape(default)),
        }
    } else {
        return TrimmedInput { content: content.to_string(), ns: None };
    };

    let content = strip_tag_prefix(content, &splice.prefix);
    TrimmedInput { content, ns: Some(splice) }
}

/// Content range of `fragment` when it is exactly one `_Input` element,
/// surrounding whitespace aside
fn lone_input_element(fragment: &str) -> Option<Range<usize>> {
    let mut reader = NsReader::from_str(fragment);
    let tag = next_start(&mut reader).ok()??;
    if !tag.local.ends_with("_Input") || !fragment[..tag.offset].trim().is_empty() {
        return None;
    }
    let span = inner_span(&mut reader, &tag).ok()?;
    let end = if tag.empty {
        tag.content_start
    } else {
        reader.buffer_position() as usize
    };
    fragment[end..].trim().is_empty().then_some(span)
}

/// Remove `prefix` from the names of start and end tags in `fragment`
fn strip_tag_prefix(fragment: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return fragment.to_string();
    }
    let mut reader = Reader::from_str(fragment);
    let mut out = String::with_capacity(fragment.len());
    loop {
        let offset = reader.buffer_position() as usize;
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(_) => return fragment.to_string(),
        };
        let raw = &fragment[offset..reader.buffer_position() as usize];
        match event {
            Event::Eof => break,
            Event::Start(_) | Event::Empty(_) => match raw.strip_prefix('<').and_then(|r| r.strip_prefix(prefix)) {
                Some(rest) => {
                    out.push('<');
                    out.push_str(rest);
                }
                None => out.push_str(raw),
            },
            Event::End(_) => match raw.strip_prefix("</").and_then(|r| r.strip_prefix(prefix)) {
                Some(rest) => {
                    out.push_str("</");
                    out.push_str(rest);
                }
                None => out.push_str(raw),
            },
            _ => out.push_str(raw),
        }
    }
    out
}

/// Turns request bodies into backend input values
#[derive(Clone)]
pub struct RequestDecoder {
    annotations: Arc<Annotations>,
    header_decoder: Option<Arc<dyn HeaderDecoder>>,
    input_decoder: Option<Arc<dyn InputDecoder>>,
}

impl RequestDecoder {
    pub fn new(annotations: Arc<Annotations>) -> Self {
        Self {
            annotations,
            header_decoder: None,
            input_decoder: None,
        }
    }

    pub fn with_header_decoder(mut self, decoder: Arc<dyn HeaderDecoder>) -> Self {
        self.header_decoder = Some(decoder);
        self
    }

    pub fn with_input_decoder(mut self, decoder: Arc<dyn InputDecoder>) -> Self {
        self.input_decoder = Some(decoder);
        self
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// Decode a buffered request body into the backend input for its action.
    ///
    /// `ctx` receives whatever the header decoder extracts.
    pub fn decode<B: Backend + ?Sized>(
        &self,
        backend: &B,
        parts: &Parts,
        body: &[u8],
        ctx: &mut CallContext,
    ) -> GatewayResult<(RequestInfo, BoxMessage)> {
        let filtered;
        let body = if keep_empty_tags(parts) {
            body
        } else {
            match filter_empty_tags(body) {
                Ok(out) => {
                    filtered = out;
                    filtered.as_slice()
                }
                Err(e) => {
                    warn!("empty tag filter failed, using body as received: {}", e);
                    body
                }
            }
        };

        let mut reader = NsReader::from_reader(body);
        let body_tag = find_soap_body(&mut reader).map_err(GatewayError::FindBody)?;

        let encode_header = self.decode_header(body, ctx);

        let soap_action = header_value(&parts.headers, SOAP_ACTION_HEADER)
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        let mut action = normalize_action(&soap_action);
        if action.is_empty() && !body_tag.empty {
            // the payload element names the action
            let mut peek = NsReader::from_reader(&body[body_tag.content_start..]);
            if let Ok(Some(payload)) = next_start(&mut peek) {
                action = payload.local;
            }
        }
        let annotation = self.annotations.get(&action);
        debug!(action = %action, soap_action = %soap_action, raw = annotation.raw, "decoding request");

        let mut info = RequestInfo {
            action,
            soap_action,
            annotation,
            ns: None,
            encode_header,
            forbid_merge: forbid_merge(&parts.headers),
        };

        if annotation.raw {
            let span = inner_span(&mut reader, &body_tag).map_err(GatewayError::FindBody)?;
            let raw = std::str::from_utf8(&body[span]).map_err(|e| GatewayError::Decode {
                type_name: info.action.clone(),
                message: e.to_string(),
            })?;
            let trimmed = trim_input(raw, annotation.remove_ns);
            let mut input = lookup_input(backend, &mut info.action)?;
            input.set_raw_xml(trimmed.content).map_err(|e| GatewayError::Decode {
                type_name: input.name().to_string(),
                message: e.to_string(),
            })?;
            info.ns = trimmed.ns;
            return Ok((info, input));
        }

        let payload = next_start(&mut reader).map_err(GatewayError::FindBody)?;
        let mut input = lookup_input(backend, &mut info.action)?;
        let Some(payload) = payload else {
            // an empty body is an input without fields
            if input.fields().is_empty() {
                return Ok((info, input));
            }
            return Err(GatewayError::FindBody(XmlError::NoElement(body_tag.qname)));
        };
        let span = element_span(&mut reader, &payload).map_err(|e| GatewayError::Decode {
            type_name: input.name().to_string(),
            message: e.to_string(),
        })?;
        let element = std::str::from_utf8(&body[span]).map_err(|e| GatewayError::Decode {
            type_name: input.name().to_string(),
            message: e.to_string(),
        })?;

        let decoded = match &self.input_decoder {
            Some(decoder) => decoder.decode_input(&info.action, element, input.as_mut()),
            None => input.decode_xml(element).map_err(Into::into),
        };
        if let Err(e) = decoded {
            debug!(body = %String::from_utf8_lossy(body), "undecodable request");
            return Err(GatewayError::Decode {
                type_name: input.name().to_string(),
                message: e.to_string(),
            });
        }
        Ok((info, input))
    }

    fn decode_header(&self, body: &[u8], ctx: &mut CallContext) -> Option<EncodeHeaderFn> {
        let decoder = self.header_decoder.as_ref()?;
        let span = match find_header(body) {
            Ok(Some(span)) => span,
            Ok(None) => return None,
            Err(e) => {
                warn!("scan for SOAP header: {}", e);
                return None;
            }
        };
        let header = String::from_utf8_lossy(&body[span]);
        match decoder.decode_header(&header, ctx) {
            Ok(encode) => Some(encode),
            Err(e) => {
                warn!("decode SOAP header: {}", e);
                None
            }
        }
    }
}

/// Input value for `action`, retrying with the part after the last `/`.
/// On a fallback hit `action` is updated to the name that matched.
fn lookup_input<B: Backend + ?Sized>(backend: &B, action: &mut String) -> GatewayResult<BoxMessage> {
    if let Some(input) = backend.input(action) {
        return Ok(input);
    }
    if let Some((_, suffix)) = action.rsplit_once('/') {
        if let Some(input) = backend.input(suffix) {
            *action = suffix.to_string();
            return Ok(input);
        }
    }
    Err(GatewayError::NotFound(action.clone()))
}
