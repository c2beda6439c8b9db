//! Outbound SOAP client implementation

use crate::error::{ClientError, ClientResult};
use crate::retry::{retry_with_policy, RetryPolicy};
use bytes::Bytes;
use http::{header, response, HeaderValue, Method, Request, Response};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use quick_xml::NsReader;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use soapgate_core::duration::option_millis;
use soapgate_core::envelope::{request_envelope, CONTENT_TYPE};
use soapgate_core::error::error_chain;
use soapgate_core::xml::element_span;
use soapgate_core::{find_body, XmlError};
use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace, warn};

/// Bytes logged from each end of a response
const LOG_EXCERPT: usize = 512;

/// Content codings the client can decode
const ACCEPT_ENCODING: &str = "gzip, zstd";

/// HTTP protocol version preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpProtocol {
    /// HTTP/1.1 only
    Http1,
    /// HTTP/2 with prior knowledge
    Http2,
    /// HTTP/1.1 unless negotiated otherwise (default)
    #[default]
    Auto,
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub http_protocol: HttpProtocol,
    /// Connection pool idle timeout
    #[serde(with = "option_millis")]
    pub pool_idle_timeout: Option<Duration>,
    /// Max idle connections per host
    pub pool_max_idle_per_host: usize,
    /// Cap on a response body, after decompression
    pub max_response_size: usize,
    /// Ask for gzip or zstd compressed responses
    pub accept_compressed: bool,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_protocol: HttpProtocol::Auto,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            max_response_size: 16 << 20,
            accept_compressed: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// One outbound SOAP request
#[derive(Debug, Clone)]
pub struct SoapCall {
    pub url: String,
    /// Sent verbatim as the `SOAPAction` header
    pub action: String,
    /// Content of the SOAP `Header` element
    pub header: String,
    /// Content of the SOAP `Body` element
    pub body: String,
    pub deadline: Option<Instant>,
}

impl SoapCall {
    pub fn new(url: impl Into<String>, action: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            action: action.into(),
            header: String::new(),
            body: body.into(),
            deadline: None,
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// SOAP client with a pooled HTTP transport and retries
pub struct SoapClient {
    client: Client<HttpConnector, Full<Bytes>>,
    config: ClientConfig,
}

impl SoapClient {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let client = Self::build_client(&config);
        Self { client, config }
    }

    pub fn builder() -> SoapClientBuilder {
        SoapClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn build_client(config: &ClientConfig) -> Client<HttpConnector, Full<Bytes>> {
        let mut builder = Client::builder(TokioExecutor::new());

        builder.pool_idle_timeout(config.pool_idle_timeout);
        builder.pool_max_idle_per_host(config.pool_max_idle_per_host);

        match config.http_protocol {
            HttpProtocol::Http2 => {
                builder.http2_only(true);
                builder.http2_adaptive_window(true);
            }
            HttpProtocol::Http1 | HttpProtocol::Auto => {
                builder.http2_only(false);
            }
        }

        builder.build_http()
    }

    /// Call and decode the first element of the response's SOAP body into `T`
    pub async fn call<T: DeserializeOwned>(&self, call: &SoapCall) -> ClientResult<T> {
        let body = self.call_raw(call).await?;
        decode_body(&body).map_err(|e| {
            warn!(response = %String::from_utf8_lossy(&body), "undecodable response: {}", e);
            e
        })
    }

    /// Call and return the whole (decompressed) response document
    pub async fn call_raw(&self, call: &SoapCall) -> ClientResult<Bytes> {
        self.call_with(call, |_| {}, |_| {}).await
    }

    /// Call with hooks: `customize_request` runs on every attempt right
    /// before sending, `inspect_response` once on the response that is read.
    ///
    /// Only transport failures are retried; an HTTP error status is returned
    /// as [`ClientError::Status`] with the response body.
    #[instrument(
        skip(self, call, customize_request, inspect_response),
        fields(soap.action = %call.action, http.url = %call.url)
    )]
    pub async fn call_with<Q, S>(&self, call: &SoapCall, customize_request: Q, inspect_response: S) -> ClientResult<Bytes>
    where
        Q: Fn(&mut Request<Full<Bytes>>),
        S: FnOnce(&response::Parts),
    {
        let exchange = self.exchange(call, &customize_request, inspect_response);
        match call.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline.into(), exchange)
                .await
                .map_err(|_| ClientError::DeadlineExceeded)?,
            None => exchange.await,
        }
    }

    async fn exchange<Q, S>(&self, call: &SoapCall, customize_request: &Q, inspect_response: S) -> ClientResult<Bytes>
    where
        Q: Fn(&mut Request<Full<Bytes>>),
        S: FnOnce(&response::Parts),
    {
        let envelope = Bytes::from(request_envelope(&call.header, &call.body));
        debug!(length = envelope.len(), "POST {}", call.url);
        trace!(xml = %String::from_utf8_lossy(&envelope), "request");

        let remaining = call.deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let budget = self.config.retry.budget(remaining);
        let response = retry_with_policy(&self.config.retry, budget, || {
            let request = self.build_request(call, envelope.clone(), customize_request);
            async move { self.send(request?).await }
        })
        .await?;

        let (parts, body) = response.into_parts();
        inspect_response(&parts);
        let encoding = parts
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_ascii_lowercase());
        let raw = self.read_body(body).await?;
        let body = decompress(raw, encoding.as_deref(), self.config.max_response_size)?;

        if parts.status.as_u16() >= 400 {
            return Err(ClientError::Status {
                status: parts.status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let (head, tail) = split_head_tail(&body, LOG_EXCERPT);
        debug!(status = %parts.status, length = body.len(), head = %head, tail = %tail, "response");
        Ok(body)
    }

    fn build_request<Q>(&self, call: &SoapCall, envelope: Bytes, customize: &Q) -> ClientResult<Request<Full<Bytes>>>
    where
        Q: Fn(&mut Request<Full<Bytes>>),
    {
        let action = HeaderValue::from_str(&call.action)
            .map_err(|e| ClientError::InvalidRequest(format!("SOAPAction {:?}: {}", call.action, e)))?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(&call.url)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, envelope.len())
            .header("soapaction", action);
        if self.config.accept_compressed {
            builder = builder.header(header::ACCEPT_ENCODING, ACCEPT_ENCODING);
        }
        let mut request = builder
            .body(Full::new(envelope))
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        customize(&mut request);
        Ok(request)
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> ClientResult<Response<Incoming>> {
        self.client
            .request(request)
            .await
            .map_err(|e| ClientError::Transport(error_chain(&e)))
    }

    async fn read_body(&self, body: Incoming) -> ClientResult<Bytes> {
        let limit = self.config.max_response_size;
        match Limited::new(body, limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ClientError::ResponseTooLarge(limit)),
            Err(e) => Err(ClientError::ReadBody(e.to_string())),
        }
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SoapClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoapClient").field("config", &self.config).finish()
    }
}

/// Undo a `Content-Encoding`, reading at most `limit` bytes of output
fn decompress(body: Bytes, encoding: Option<&str>, limit: usize) -> ClientResult<Bytes> {
    match encoding {
        None | Some("") | Some("identity") => Ok(body),
        Some("gzip") | Some("x-gzip") => read_capped(flate2::read::GzDecoder::new(&body[..]), limit),
        Some("zstd") => {
            let decoder = zstd::stream::read::Decoder::new(&body[..]).map_err(ClientError::Decompress)?;
            read_capped(decoder, limit)
        }
        Some(other) => Err(ClientError::ReadBody(format!("unsupported content encoding {:?}", other))),
    }
}

fn read_capped(reader: impl Read, limit: usize) -> ClientResult<Bytes> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(ClientError::Decompress)?;
    if out.len() > limit {
        return Err(ClientError::ResponseTooLarge(limit));
    }
    Ok(Bytes::from(out))
}

/// The first element inside the SOAP body of `document`, as text
pub fn body_payload(document: &[u8]) -> ClientResult<&str> {
    let mut reader = NsReader::from_reader(document);
    let start = find_body(&mut reader).map_err(ClientError::FindBody)?;
    let span = element_span(&mut reader, &start).map_err(ClientError::FindBody)?;
    std::str::from_utf8(&document[span]).map_err(|e| ClientError::FindBody(XmlError::Utf8(e)))
}

/// Decode the first element inside the SOAP body of `document`
pub fn decode_body<T: DeserializeOwned>(document: &[u8]) -> ClientResult<T> {
    Ok(quick_xml::de::from_str(body_payload(document)?)?)
}

/// Head and tail excerpts of `bytes`, each at most `length` bytes long
fn split_head_tail(bytes: &[u8], length: usize) -> (Cow<'_, str>, Cow<'_, str>) {
    let n = bytes.len() / 2;
    if n <= length {
        return (String::from_utf8_lossy(&bytes[..n]), String::from_utf8_lossy(&bytes[n..]));
    }
    (
        String::from_utf8_lossy(&bytes[..length]),
        String::from_utf8_lossy(&bytes[bytes.len() - length..]),
    )
}

/// Builder for configuring a SOAP client
#[derive(Debug, Default)]
pub struct SoapClientBuilder {
    config: ClientConfig,
}

impl SoapClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a complete configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn http_protocol(mut self, protocol: HttpProtocol) -> Self {
        self.config.http_protocol = protocol;
        self
    }

    pub fn http2_only(self) -> Self {
        self.http_protocol(HttpProtocol::Http2)
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = Some(timeout);
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    pub fn max_response_size(mut self, size: usize) -> Self {
        self.config.max_response_size = size;
        self
    }

    pub fn accept_compressed(mut self, enable: bool) -> Self {
        self.config.accept_compressed = enable;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn build(self) -> SoapClient {
        SoapClient::with_config(self.config)
    }
}
