//! Response encoding.
//!
//! A response is one SOAP envelope around every message of the backend's
//! response stream. The first two messages are pulled before anything is
//! written ([`Prefetched`]), so the caller can pick the HTTP status and the
//! encoder can tell single from multi-message responses.
//!
//! Multi-message responses whose type declares repeated fields are merged:
//! the scalar fields of the first message are written once, and the repeated
//! fields of every message are collected in per-field spill files, then
//! copied into the document in first-seen order. The merged document equals
//! the encoding of one message holding the concatenation of all repeated
//! fields.

use crate::backend::{BackendError, MessageStream, OutputEncoder};
use crate::decode::{NsSplice, RequestInfo};
use crate::fault::{classify, write_header_block};
use crate::message::{scalar_value, BoxMessage, DynMessage, FieldDescriptor, FieldRole, MessageError};
use crate::spill::SpillSet;
use futures_util::StreamExt;
use quick_xml::escape::escape;
use serde_json::Value;
use soapgate_core::envelope::{BODY_START, ENVELOPE_END, ENVELOPE_START};
use soapgate_core::value::{is_empty_value, write_element};
use soapgate_core::{split_outer, BufferPool};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const DRAIN_CHUNK: usize = 32 * 1024;

/// Errors while encoding one message; logged, never sent to the client
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("output encoder: {0}")]
    Hook(crate::backend::BoxError),

    #[error("spill: {0}")]
    Spill(#[from] io::Error),
}

/// How each output message is written, decided once per response
pub enum OutputStrategy {
    /// Raw XML inside a synthesized `<{action}_Output>`
    Raw { element: String, splice: NsSplice },
    /// A configured [`OutputEncoder`]
    Custom(Arc<dyn OutputEncoder>),
    /// Standard encoding under `<{action}_Output>` in the SOAPAction namespace
    Named { element: String, attrs: String },
    /// Standard encoding under the message's own name
    Plain,
}

impl OutputStrategy {
    pub fn select(info: &RequestInfo, custom: Option<&Arc<dyn OutputEncoder>>, first: &dyn DynMessage) -> Self {
        if info.annotation.raw {
            return OutputStrategy::Raw {
                element: format!("{}_Output", info.action),
                splice: info.ns.clone().unwrap_or_default(),
            };
        }
        if let Some(encoder) = custom {
            return OutputStrategy::Custom(Arc::clone(encoder));
        }
        if first.name().ends_with("_Output") {
            let attrs = match info.soap_action.rfind('/') {
                Some(i) if i > 0 => format!(" xmlns=\"{}\"", escape(&info.soap_action[..=i])),
                _ => String::new(),
            };
            return OutputStrategy::Named {
                element: format!("{}_Output", info.action),
                attrs,
            };
        }
        OutputStrategy::Plain
    }

    /// Only structurally encoded output can be merged
    pub fn allows_merge(&self) -> bool {
        matches!(self, OutputStrategy::Named { .. } | OutputStrategy::Plain)
    }

    pub fn encode(&self, out: &mut Vec<u8>, action: &str, message: &dyn DynMessage) -> Result<(), EncodeError> {
        match self {
            OutputStrategy::Raw { element, splice } => {
                let raw = message.raw_xml().unwrap_or_default();
                out.push(b'<');
                out.extend_from_slice(splice.prefix.as_bytes());
                out.extend_from_slice(element.as_bytes());
                out.extend_from_slice(splice.postfix.as_bytes());
                out.push(b'>');
                out.extend_from_slice(raw.as_bytes());
                out.extend_from_slice(b"</");
                out.extend_from_slice(splice.prefix.as_bytes());
                out.extend_from_slice(element.as_bytes());
                out.push(b'>');
                Ok(())
            }
            OutputStrategy::Custom(encoder) => encoder
                .encode_output(out, action, message)
                .map_err(EncodeError::Hook),
            OutputStrategy::Named { .. } | OutputStrategy::Plain => {
                self.encode_value(out, message.name(), &message.to_value()?);
                Ok(())
            }
        }
    }

    fn encode_value(&self, out: &mut Vec<u8>, name: &str, value: &Value) {
        match self {
            OutputStrategy::Named { element, attrs } => write_element(out, element, attrs, value),
            _ => write_element(out, name, "", value),
        }
    }
}

/// A response stream with its first two items already pulled
pub struct Prefetched {
    first: Option<Result<BoxMessage, BackendError>>,
    second: Option<Result<BoxMessage, BackendError>>,
    /// `None` once the stream has ended
    rest: Option<MessageStream>,
}

impl Prefetched {
    pub async fn pull(mut stream: MessageStream) -> Self {
        let first = stream.next().await;
        let second = match first {
            Some(Ok(_)) => stream.next().await,
            _ => None,
        };
        let rest = match second {
            Some(Ok(_)) => Some(stream),
            _ => None,
        };
        Self { first, second, rest }
    }

    /// The error the stream failed with before yielding any message
    pub fn first_error(&self) -> Option<&BackendError> {
        match &self.first {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Remaining messages after the first
struct Messages {
    pending: Option<Result<BoxMessage, BackendError>>,
    rest: Option<MessageStream>,
}

impl Messages {
    async fn next(&mut self) -> Option<Result<BoxMessage, BackendError>> {
        if let Some(item) = self.pending.take() {
            return Some(item);
        }
        let item = self.rest.as_mut()?.next().await;
        if item.is_none() {
            self.rest = None;
        }
        item
    }
}

/// Writes response envelopes
pub struct ResponseEncoder {
    pool: Arc<BufferPool>,
    output_encoder: Option<Arc<dyn OutputEncoder>>,
    spill_dir: Option<PathBuf>,
    spill_level: i32,
    merge: bool,
}

impl ResponseEncoder {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            output_encoder: None,
            spill_dir: None,
            spill_level: 3,
            merge: true,
        }
    }

    pub fn with_output_encoder(mut self, encoder: Arc<dyn OutputEncoder>) -> Self {
        self.output_encoder = Some(encoder);
        self
    }

    pub fn with_spill(mut self, dir: Option<PathBuf>, level: i32) -> Self {
        self.spill_dir = dir;
        self.spill_level = level;
        self
    }

    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    /// Write the whole response document to `out`.
    ///
    /// Errors of the response stream after its first message, and encode or
    /// spill errors, are logged and end the body early; the document is
    /// still closed. Only write errors on `out` are returned.
    pub async fn encode_response<W>(&self, out: &mut W, prefetched: Prefetched, mut info: RequestInfo) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let Prefetched { first, second, rest } = prefetched;

        let mut head = self.pool.acquire();
        head.extend_from_slice(ENVELOPE_START.as_bytes());
        if let Some(encode) = info.encode_header.take() {
            let err = match &first {
                Some(Err(err)) => Some(err),
                _ => None,
            };
            write_header_block(&mut head, encode, err);
        }
        head.extend_from_slice(BODY_START.as_bytes());

        match first {
            None => {
                debug!(action = %info.action, "empty response stream");
                out.write_all(&head).await?;
            }
            Some(Err(err)) => {
                warn!(action = %info.action, "backend call failed: {}", err);
                classify(&err).write_xml(&mut head);
                out.write_all(&head).await?;
            }
            Some(Ok(first)) => {
                out.write_all(&head).await?;
                let strategy = OutputStrategy::select(&info, self.output_encoder.as_ref(), first.as_ref());
                let merge = self.merge
                    && strategy.allows_merge()
                    && second.is_some()
                    && !info.forbid_merge
                    && !first.repeated_fields().is_empty();
                let messages = Messages { pending: second, rest };
                if merge {
                    self.merge_messages(out, &strategy, &info, first, messages).await?;
                } else {
                    self.write_messages(out, &strategy, &info, first, messages).await?;
                }
            }
        }
        drop(head);

        out.write_all(ENVELOPE_END.as_bytes()).await?;
        out.flush().await
    }

    async fn write_messages<W>(
        &self,
        out: &mut W,
        strategy: &OutputStrategy,
        info: &RequestInfo,
        first: BoxMessage,
        mut messages: Messages,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut next = Some(first);
        let mut count = 0usize;
        while let Some(message) = next.take() {
            let mut buf = self.pool.acquire();
            if let Err(e) = strategy.encode(&mut buf, &info.action, message.as_ref()) {
                warn!(action = %info.action, "encode {}: {}", message.name(), e);
                break;
            }
            buf.push(b'\n');
            out.write_all(&buf).await?;
            count += 1;

            next = match messages.next().await {
                Some(Ok(message)) => Some(message),
                Some(Err(e)) => {
                    warn!(action = %info.action, "receive after {} messages: {}", count, e);
                    None
                }
                None => None,
            };
        }
        debug!(action = %info.action, messages = count, "response written");
        Ok(())
    }

    async fn merge_messages<W>(
        &self,
        out: &mut W,
        strategy: &OutputStrategy,
        info: &RequestInfo,
        first: BoxMessage,
        mut messages: Messages,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let value = match first.to_value() {
            Ok(value) => value,
            Err(e) => {
                warn!(action = %info.action, "encode {}: {}", first.name(), e);
                return Ok(());
            }
        };

        let mut scratch = self.pool.acquire();
        strategy.encode_value(&mut scratch, first.name(), &scalar_value(&value, first.fields()));
        let encoded = String::from_utf8_lossy(&scratch).into_owned();
        let (head, tail) = split_outer(&encoded).unwrap_or_else(|| {
            warn!(action = %info.action, "no outer element in {}", encoded);
            (encoded.clone(), String::new())
        });
        out.write_all(head.as_bytes()).await?;

        let mut spills = SpillSet::new(self.spill_dir.clone(), self.spill_level);
        let mut count = 1usize;
        let mut spilled = spill_message(&mut spills, &mut scratch, &value, first.fields());
        drop(first);
        while spilled.is_ok() {
            let message = match messages.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(action = %info.action, "receive after {} messages: {}", count, e);
                    break;
                }
                None => break,
            };
            count += 1;
            spilled = message
                .to_value()
                .map_err(EncodeError::from)
                .and_then(|value| spill_message(&mut spills, &mut scratch, &value, message.fields()));
        }
        if let Err(e) = spilled {
            warn!(action = %info.action, "merge stopped after {} messages: {}", count, e);
        }
        drop(scratch);

        let mut chunk = vec![0u8; DRAIN_CHUNK];
        for buffer in spills.into_buffers() {
            let field = buffer.field().to_string();
            let mut reader = match blocking(move || buffer.into_reader()).await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(action = %info.action, field = %field, "finish spill: {}", e);
                    continue;
                }
            };
            loop {
                let read = blocking(move || {
                    let n = reader.read(&mut chunk)?;
                    Ok((n, reader, chunk))
                })
                .await;
                let n;
                (n, reader, chunk) = match read {
                    Ok(read) => read,
                    Err(e) => {
                        warn!(action = %info.action, field = %field, "read spill: {}", e);
                        chunk = vec![0u8; DRAIN_CHUNK];
                        break;
                    }
                };
                if n == 0 {
                    break;
                }
                out.write_all(&chunk[..n]).await?;
            }
        }

        out.write_all(tail.as_bytes()).await?;
        debug!(action = %info.action, messages = count, "merged response written");
        Ok(())
    }
}

/// Run spill file I/O on the blocking pool
async fn blocking<T, F>(f: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

/// Append the non-empty repeated fields of one message to their spill buffers
fn spill_message(
    spills: &mut SpillSet,
    scratch: &mut Vec<u8>,
    value: &Value,
    fields: &[FieldDescriptor],
) -> Result<(), EncodeError> {
    for field in fields.iter().filter(|f| f.role == FieldRole::Repeated) {
        let Some(items) = value.get(field.name) else {
            continue;
        };
        if is_empty_value(items) {
            continue;
        }
        scratch.clear();
        write_element(scratch, field.name, "", items);
        spills.append(field.name, scratch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Annotation;
    use crate::backend::{BoxError, EncodeHeaderFn};
    use crate::message::SoapMessage;
    use futures_util::stream;
    use serde::{Deserialize, Serialize};
    use std::io::ErrorKind;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        #[serde(rename = "Id")]
        id: u32,
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct ListOutput {
        #[serde(rename = "Total")]
        total: u32,
        #[serde(rename = "Items")]
        items: Vec<Item>,
        #[serde(rename = "Tags")]
        tags: Vec<String>,
    }

    impl SoapMessage for ListOutput {
        const NAME: &'static str = "List_Output";
        const FIELDS: &'static [FieldDescriptor] = &[
            FieldDescriptor::scalar("Total"),
            FieldDescriptor::repeated("Items"),
            FieldDescriptor::repeated("Tags"),
        ];
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Status {
        #[serde(rename = "Code")]
        code: i32,
        #[serde(rename = "Text")]
        text: String,
    }

    impl SoapMessage for Status {
        const NAME: &'static str = "Status";
        const FIELDS: &'static [FieldDescriptor] = &[FieldDescriptor::scalar("Code"), FieldDescriptor::scalar("Text")];
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct RawOutput {
        #[serde(rename = "Xml")]
        xml: String,
    }

    impl SoapMessage for RawOutput {
        const NAME: &'static str = "Export_Output";
        const FIELDS: &'static [FieldDescriptor] = &[FieldDescriptor::raw_xml("Xml")];
    }

    fn info(action: &str) -> RequestInfo {
        RequestInfo {
            action: action.to_string(),
            soap_action: format!("urn:svc/{}", action),
            annotation: Annotation::default(),
            ns: None,
            encode_header: None,
            forbid_merge: false,
        }
    }

    fn page(start: u32) -> BoxMessage {
        Box::new(ListOutput {
            total: 6,
            items: vec![Item { id: start }, Item { id: start + 1 }],
            tags: Vec::new(),
        })
    }

    fn message_stream(items: Vec<Result<BoxMessage, BackendError>>) -> MessageStream {
        Box::pin(stream::iter(items))
    }

    async fn encode(encoder: &ResponseEncoder, items: Vec<Result<BoxMessage, BackendError>>, info: RequestInfo) -> String {
        let prefetched = Prefetched::pull(message_stream(items)).await;
        let mut out = Vec::new();
        encoder.encode_response(&mut out, prefetched, info).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn body(doc: &str) -> &str {
        let start = doc.find(BODY_START).unwrap() + BODY_START.len();
        let end = doc.rfind(ENVELOPE_END).unwrap();
        &doc[start..end]
    }

    fn encoder() -> ResponseEncoder {
        ResponseEncoder::new(Arc::new(BufferPool::default()))
    }

    #[tokio::test]
    async fn test_single_message_round_trip() {
        let original = Status { code: 7, text: "a < b".to_string() };
        let message: BoxMessage = Box::new(original.clone());
        let doc = encode(&encoder(), vec![Ok(message)], info("Check")).await;
        let element = body(&doc).trim();
        assert!(element.starts_with("<Status>"));
        let decoded: Status = quick_xml::de::from_str(element).unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_named_output_element() {
        let doc = encode(&encoder(), vec![Ok(page(1))], info("List")).await;
        assert_eq!(
            body(&doc).trim(),
            r#"<List_Output xmlns="urn:svc/"><Total>6</Total><Items><Id>1</Id></Items><Items><Id>2</Id></Items></List_Output>"#
        );
    }

    #[tokio::test]
    async fn test_merge_three_pages() {
        let items = vec![Ok(page(1)), Ok(page(3)), Ok(page(5))];
        let doc = encode(&encoder(), items, info("List")).await;
        let element = body(&doc).trim();

        assert_eq!(element.matches("<List_Output").count(), 1);
        assert_eq!(element.matches("<Total>").count(), 1);
        assert_eq!(element.matches("<Items>").count(), 6);

        let merged: ListOutput = quick_xml::de::from_str(element).unwrap();
        let ids: Vec<u32> = merged.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(merged.total, 6);
    }

    #[tokio::test]
    async fn test_merge_field_first_seen_later() {
        let tagged: BoxMessage = Box::new(ListOutput {
            total: 0,
            items: vec![Item { id: 9 }],
            tags: vec!["x".to_string(), "y".to_string()],
        });
        let doc = encode(&encoder(), vec![Ok(page(1)), Ok(tagged)], info("List")).await;
        let element = body(&doc).trim();
        assert!(element.ends_with(
            "<Items><Id>1</Id></Items><Items><Id>2</Id></Items><Items><Id>9</Id></Items><Tags>x</Tags><Tags>y</Tags></List_Output>"
        ));
        // scalars come from the first message only
        assert!(element.contains("<Total>6</Total>"));
    }

    #[tokio::test]
    async fn test_forbid_merge() {
        let mut request = info("List");
        request.forbid_merge = true;
        let doc = encode(&encoder(), vec![Ok(page(1)), Ok(page(3))], request).await;
        assert_eq!(body(&doc).matches("<List_Output").count(), 2);
    }

    #[tokio::test]
    async fn test_merge_disabled() {
        let doc = encode(&encoder().with_merge(false), vec![Ok(page(1)), Ok(page(3))], info("List")).await;
        assert_eq!(body(&doc).matches("<List_Output").count(), 2);
    }

    #[tokio::test]
    async fn test_error_after_first_page_still_closes_document() {
        let items = vec![
            Ok(page(1)),
            Ok(page(3)),
            Err(BackendError::other(io::Error::new(ErrorKind::ConnectionReset, "reset"))),
            Ok(page(5)),
        ];
        let doc = encode(&encoder(), items, info("List")).await;
        let element = body(&doc).trim();
        let merged: ListOutput = quick_xml::de::from_str(element).unwrap();
        assert_eq!(merged.items.len(), 4);
        assert!(doc.ends_with(ENVELOPE_END));
        assert!(!doc.contains("Fault"));
    }

    #[tokio::test]
    async fn test_first_error_is_a_fault() {
        let header: EncodeHeaderFn = Box::new(|out: &mut Vec<u8>, err: Option<&BackendError>| -> Result<(), BoxError> {
            if let Some(err) = err {
                out.extend_from_slice(format!("<Error>{}</Error>", err).as_bytes());
            }
            Ok(())
        });
        let mut request = info("List");
        request.encode_header = Some(header);

        let items = vec![Err(BackendError::DeadlineExceeded)];
        let prefetched = Prefetched::pull(message_stream(items)).await;
        assert!(matches!(prefetched.first_error(), Some(BackendError::DeadlineExceeded)));

        let mut out = Vec::new();
        encoder().encode_response(&mut out, prefetched, request).await.unwrap();
        let doc = String::from_utf8(out).unwrap();
        assert!(doc.contains("<SOAP-ENV:Header><Error>deadline exceeded</Error></SOAP-ENV:Header>"));
        assert!(body(&doc).contains("<faultstring>deadline exceeded</faultstring>"));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let doc = encode(&encoder(), Vec::new(), info("List")).await;
        assert_eq!(body(&doc), "");
        assert!(doc.starts_with(ENVELOPE_START));
    }

    #[tokio::test]
    async fn test_raw_output_with_splice() {
        let mut request = info("Export");
        request.annotation = Annotation { raw: true, remove_ns: true };
        request.ns = Some(NsSplice {
            prefix: "m:".to_string(),
            postfix: r#" xmlns:m="urn:m""#.to_string(),
        });
        let message: BoxMessage = Box::new(RawOutput { xml: "<Id>1</Id>".to_string() });
        let doc = encode(&encoder(), vec![Ok(message)], request).await;
        assert_eq!(body(&doc).trim(), r#"<m:Export_Output xmlns:m="urn:m"><Id>1</Id></m:Export_Output>"#);
    }

    #[tokio::test]
    async fn test_custom_output_encoder() {
        struct Upper;
        impl OutputEncoder for Upper {
            fn encode_output(&self, out: &mut Vec<u8>, action: &str, message: &dyn DynMessage) -> Result<(), BoxError> {
                out.extend_from_slice(format!("<{}>{}</{}>", action, message.name().to_uppercase(), action).as_bytes());
                Ok(())
            }
        }
        let encoder = encoder().with_output_encoder(Arc::new(Upper));
        // custom encoders never merge
        let doc = encode(&encoder, vec![Ok(page(1)), Ok(page(3))], info("List")).await;
        assert_eq!(body(&doc).trim(), "<List>LIST_OUTPUT</List>\n<List>LIST_OUTPUT</List>");
    }

    #[tokio::test]
    async fn test_spill_dir_is_used_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = encoder().with_spill(Some(dir.path().to_path_buf()), 1);
        let doc = encode(&encoder, vec![Ok(page(1)), Ok(page(3))], info("List")).await;
        assert_eq!(body(&doc).matches("<Items>").count(), 4);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_large_merge_drains_spills_in_chunks() {
        let pages: Vec<_> = (0..2000).map(|i| Ok(page(2 * i + 1))).collect();
        let doc = encode(&encoder(), pages, info("List")).await;
        let merged = body(&doc);
        assert!(merged.len() > 2 * DRAIN_CHUNK);
        assert_eq!(merged.matches("<Items>").count(), 4000);
        let first = merged.find("<Id>1</Id>").unwrap();
        let last = merged.find("<Id>4000</Id>").unwrap();
        assert!(first < last);
        assert!(merged.trim_end().ends_with("</List_Output>"));
    }

    #[tokio::test]
    async fn test_unwritable_spill_dir_closes_document() {
        let encoder = encoder().with_spill(Some(PathBuf::from("/nonexistent/soapgate")), 1);
        let doc = encode(&encoder, vec![Ok(page(1)), Ok(page(3))], info("List")).await;
        let element = body(&doc).trim();
        assert!(element.starts_with("<List_Output"));
        assert!(element.ends_with("</List_Output>"));
    }
}
