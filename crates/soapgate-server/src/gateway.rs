//! SOAP gateway HTTP surface

use crate::annotation::{Annotation, Annotations};
use crate::backend::{Backend, BackendError, BasicAuth, CallContext, HeaderDecoder, InputDecoder, MessageStream, OutputEncoder};
use crate::config::GatewayConfig;
use crate::decode::RequestDecoder;
use crate::encode::{Prefetched, ResponseEncoder};
use crate::error::{GatewayError, GatewayResult};
use crate::fault;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures_util::StreamExt;
use http::{header, Method, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use quick_xml::escape::escape;
use soapgate_core::envelope::CONTENT_TYPE;
use soapgate_core::BufferPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Buffer between the response encoder task and the HTTP body
const RESPONSE_PIPE_SIZE: usize = 64 * 1024;

/// SOAP gateway in front of a [`Backend`]
pub struct SoapGateway<B> {
    backend: B,
    config: GatewayConfig,
    wsdl: String,
    decoder: RequestDecoder,
    encoder: ResponseEncoder,
}

impl<B: Backend> SoapGateway<B> {
    pub fn builder(backend: B) -> SoapGatewayBuilder<B> {
        SoapGatewayBuilder::new(backend)
    }

    /// The WSDL served on GET, service locations included
    pub fn wsdl(&self) -> &str {
        &self.wsdl
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn annotation(&self, action: &str) -> Annotation {
        self.decoder.annotations().get(action)
    }

    /// Get the Axum router
    pub fn router(self) -> Router {
        let path = self.config.path.clone();
        Router::new()
            .route(&path, any(handle::<B>))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(self))
    }

    /// Serve on `addr` until the listener fails
    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("SOAP gateway listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }

    async fn read_body(&self, body: Body) -> GatewayResult<Bytes> {
        let limit = self.config.max_body_size;
        match Limited::new(body, limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(GatewayError::BodyTooLarge(limit)),
            Err(e) => Err(GatewayError::ReadBody(e.to_string())),
        }
    }

    async fn handle_soap(self: Arc<Self>, req: Request) -> GatewayResult<Response> {
        let (parts, body) = req.into_parts();
        let body = self.read_body(body).await?;

        let deadline = Instant::now() + self.config.call_timeout;
        let mut ctx = CallContext {
            auth: BasicAuth::from_headers(&parts.headers),
            deadline: Some(deadline),
            ..Default::default()
        };
        let (mut info, input) = self.decoder.decode(&self.backend, &parts, &body, &mut ctx)?;
        ctx.action = info.action.clone();
        ctx.soap_action = info.soap_action.clone();
        match input.to_value() {
            Ok(value) => debug!(action = %info.action, input = %value, "calling backend"),
            Err(e) => debug!(action = %info.action, "calling backend, input not printable: {}", e),
        }

        let deadline = tokio::time::Instant::from_std(deadline);
        let call = self.backend.call(&info.action, ctx, input);
        let stream = match tokio::time::timeout_at(deadline, call).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                error!(action = %info.action, "backend call failed: {}", err);
                return Ok(fault::soap_error(&err, info.encode_header.take()));
            }
            Err(_) => {
                error!(action = %info.action, "backend call timed out");
                return Ok(fault::soap_error(&BackendError::DeadlineExceeded, info.encode_header.take()));
            }
        };

        let prefetched = Prefetched::pull(with_deadline(stream, deadline)).await;
        let status = prefetched.first_error().map(fault::status_for).unwrap_or(StatusCode::OK);

        let (mut writer, reader) = tokio::io::duplex(RESPONSE_PIPE_SIZE);
        let gateway = Arc::clone(&self);
        tokio::spawn(async move {
            let action = info.action.clone();
            if let Err(e) = gateway.encoder.encode_response(&mut writer, prefetched, info).await {
                warn!(action = %action, "response aborted: {}", e);
            }
        });

        Ok((
            status,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            Body::from_stream(ReaderStream::new(reader)),
        )
            .into_response())
    }

    fn wsdl_response(&self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            self.wsdl.clone(),
        )
            .into_response()
    }
}

async fn handle<B: Backend>(State(gateway): State<Arc<SoapGateway<B>>>, req: Request) -> Response {
    if req.method() == Method::GET {
        return gateway.wsdl_response();
    }
    match gateway.handle_soap(req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// End `stream` with `DeadlineExceeded` once `deadline` passes; the inner
/// stream is dropped then, cancelling the call.
fn with_deadline(stream: MessageStream, deadline: tokio::time::Instant) -> MessageStream {
    futures_util::stream::unfold(Some(stream), move |state| async move {
        let mut stream = state?;
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(item)) => Some((item, Some(stream))),
            Ok(None) => None,
            Err(_) => Some((Err(BackendError::DeadlineExceeded), None)),
        }
    })
    .boxed()
}

/// Insert a `soap:address` line per location before the last `</port>`
pub fn inject_locations(wsdl: &str, locations: &[String]) -> String {
    if locations.is_empty() {
        return wsdl.to_string();
    }
    let Some(at) = wsdl.rfind("</port>") else {
        warn!("WSDL has no port element, locations not added");
        return wsdl.to_string();
    };
    let mut out = String::with_capacity(wsdl.len() + locations.len() * 64);
    out.push_str(&wsdl[..at]);
    for location in locations {
        out.push_str("<soap:address location=\"");
        out.push_str(&escape(location.as_str()));
        out.push_str("\" />\n");
    }
    out.push_str(&wsdl[at..]);
    out
}

/// SOAP gateway builder
pub struct SoapGatewayBuilder<B> {
    backend: B,
    wsdl: String,
    config: GatewayConfig,
    annotations: Option<Annotations>,
    header_decoder: Option<Arc<dyn HeaderDecoder>>,
    input_decoder: Option<Arc<dyn InputDecoder>>,
    output_encoder: Option<Arc<dyn OutputEncoder>>,
    pool: Option<Arc<BufferPool>>,
}

impl<B: Backend> SoapGatewayBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            wsdl: String::new(),
            config: GatewayConfig::default(),
            annotations: None,
            header_decoder: None,
            input_decoder: None,
            output_encoder: None,
            pool: None,
        }
    }

    /// WSDL text to serve; annotations are read from it unless set explicitly
    pub fn wsdl(mut self, wsdl: impl Into<String>) -> Self {
        self.wsdl = wsdl.into();
        self
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a prepared annotation table instead of scanning the WSDL
    pub fn annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    pub fn header_decoder(mut self, decoder: impl HeaderDecoder) -> Self {
        self.header_decoder = Some(Arc::new(decoder));
        self
    }

    pub fn input_decoder(mut self, decoder: impl InputDecoder) -> Self {
        self.input_decoder = Some(Arc::new(decoder));
        self
    }

    pub fn output_encoder(mut self, encoder: impl OutputEncoder) -> Self {
        self.output_encoder = Some(Arc::new(encoder));
        self
    }

    /// Share a buffer pool with other components
    pub fn buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build the gateway
    pub fn build(self) -> SoapGateway<B> {
        let annotations = self
            .annotations
            .unwrap_or_else(|| Annotations::from_wsdl(&self.wsdl));
        debug!("{} annotated actions", annotations.len());

        let mut decoder = RequestDecoder::new(Arc::new(annotations));
        if let Some(d) = self.header_decoder {
            decoder = decoder.with_header_decoder(d);
        }
        if let Some(d) = self.input_decoder {
            decoder = decoder.with_input_decoder(d);
        }

        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(BufferPool::new(self.config.pooled_buffers)));
        let mut encoder = ResponseEncoder::new(pool)
            .with_spill(self.config.spill_dir.clone(), self.config.spill_compression_level)
            .with_merge(self.config.merge);
        if let Some(e) = self.output_encoder {
            encoder = encoder.with_output_encoder(e);
        }

        SoapGateway {
            wsdl: inject_locations(&self.wsdl, &self.config.locations),
            backend: self.backend,
            config: self.config,
            decoder,
            encoder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_locations() {
        let wsdl = "<service><port name=\"a\"></port><port name=\"b\">\n</port></service>";
        let out = inject_locations(wsdl, &["http://gw:8080/?x=1&y=2".to_string()]);
        assert_eq!(
            out,
            "<service><port name=\"a\"></port><port name=\"b\">\n<soap:address location=\"http://gw:8080/?x=1&amp;y=2\" />\n</port></service>"
        );
    }

    #[test]
    fn test_inject_locations_without_port() {
        assert_eq!(inject_locations("<x/>", &["http://a/".to_string()]), "<x/>");
        assert_eq!(inject_locations("<port></port>", &[]), "<port></port>");
    }
}
