//! Client tests against a local HTTP server

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use soapgate_client::{ClientError, RetryPolicy, SoapCall, SoapClient};
use std::convert::Infallible;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const RESPONSE: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">"#,
    r#"<SOAP-ENV:Body><Login_Output><Session>abc</Session></Login_Output></SOAP-ENV:Body></SOAP-ENV:Envelope>"#
);

#[derive(Debug, Deserialize)]
struct LoginOutput {
    #[serde(rename = "Session")]
    session: String,
}

/// A request as the server saw it
#[derive(Debug, Clone)]
struct Recorded {
    action: Option<String>,
    trace: Option<String>,
    accept_encoding: Option<String>,
    body: String,
}

type Seen = Arc<Mutex<Vec<Recorded>>>;

fn header(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.headers().get(name).map(|v| v.to_str().unwrap().to_string())
}

/// Serve `respond` on a local port; returns the endpoint URL and the log of
/// received requests.
async fn spawn_server<F>(respond: F) -> (String, Seen)
where
    F: Fn(&Recorded) -> Response<Full<Bytes>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Seen = Arc::default();
    let respond = Arc::new(respond);

    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let respond = Arc::clone(&respond);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let respond = Arc::clone(&respond);
                    let log = Arc::clone(&log);
                    async move {
                        let recorded = Recorded {
                            action: header(&req, "soapaction"),
                            trace: header(&req, "x-trace"),
                            accept_encoding: header(&req, "accept-encoding"),
                            body: String::new(),
                        };
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        let recorded = Recorded {
                            body: String::from_utf8(body.to_vec()).unwrap(),
                            ..recorded
                        };
                        let response = respond(&recorded);
                        log.lock().unwrap().push(recorded);
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
            });
        }
    });

    (format!("http://{}/soap", addr), seen)
}

fn xml(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/xml; charset=utf-8")
        .body(Full::new(body.into()))
        .unwrap()
}

fn client() -> SoapClient {
    SoapClient::builder()
        .retry_policy(
            RetryPolicy::new()
                .max_attempts(3)
                .initial_backoff(Duration::from_millis(10))
                .jitter(0.0),
        )
        .build()
}

#[tokio::test]
async fn test_call_decodes_body() {
    let (url, seen) = spawn_server(|_| xml(StatusCode::OK, RESPONSE)).await;

    let call = SoapCall::new(&url, "Login", "<Login><PLoginNev>u</PLoginNev></Login>").with_header("<Auth>t</Auth>");
    let out: LoginOutput = client().call(&call).await.unwrap();
    assert_eq!(out.session, "abc");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].action.as_deref(), Some("Login"));
    assert_eq!(seen[0].accept_encoding.as_deref(), Some("gzip, zstd"));
    assert!(seen[0].body.starts_with(r#"<?xml version="1.0" encoding="utf-8"?>"#));
    assert!(seen[0]
        .body
        .contains("<soapenv:Header><Auth>t</Auth></soapenv:Header><soapenv:Body><Login><PLoginNev>u</PLoginNev></Login></soapenv:Body>"));
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    let (url, seen) = spawn_server(|_| xml(StatusCode::INTERNAL_SERVER_ERROR, "backend exploded")).await;

    let err = client().call_raw(&SoapCall::new(&url, "Login", "<Login/>")).await.unwrap_err();
    match err {
        ClientError::Status { status, body } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, "backend exploded");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_gzip_response() {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(RESPONSE.as_bytes()).unwrap();
    let compressed = Bytes::from(encoder.finish().unwrap());

    let (url, _) = spawn_server(move |_| {
        let mut response = xml(StatusCode::OK, compressed.clone());
        response
            .headers_mut()
            .insert("content-encoding", "gzip".parse().unwrap());
        response
    })
    .await;

    let out: LoginOutput = client().call(&SoapCall::new(&url, "Login", "<Login/>")).await.unwrap();
    assert_eq!(out.session, "abc");
}

#[tokio::test]
async fn test_response_too_large() {
    let (url, _) = spawn_server(|_| xml(StatusCode::OK, "x".repeat(4096))).await;

    let client = SoapClient::builder().max_response_size(1024).build();
    let err = client.call_raw(&SoapCall::new(&url, "Big", "<Big/>")).await.unwrap_err();
    assert!(matches!(err, ClientError::ResponseTooLarge(1024)), "{:?}", err);
}

#[tokio::test]
async fn test_not_soap_response() {
    let (url, _) = spawn_server(|_| xml(StatusCode::OK, "<html><p>maintenance</p></html>")).await;

    let err = client()
        .call::<LoginOutput>(&SoapCall::new(&url, "Login", "<Login/>"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::FindBody(_)), "{:?}", err);
}

#[tokio::test]
async fn test_customize_request_and_inspect_response() {
    let (url, seen) = spawn_server(|req| {
        let mut response = xml(StatusCode::OK, RESPONSE);
        if let Some(trace) = &req.trace {
            response.headers_mut().insert("x-trace", trace.parse().unwrap());
        }
        response
    })
    .await;

    let mut echoed = None;
    client()
        .call_with(
            &SoapCall::new(&url, "Login", "<Login/>"),
            |req| {
                req.headers_mut().insert("x-trace", "t-42".parse().unwrap());
            },
            |parts| {
                echoed = parts.headers.get("x-trace").map(|v| v.to_str().unwrap().to_string());
            },
        )
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap()[0].trace.as_deref(), Some("t-42"));
    assert_eq!(echoed.as_deref(), Some("t-42"));
}

#[tokio::test]
async fn test_connection_refused_is_retried_then_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/soap", listener.local_addr().unwrap());
    drop(listener);

    let err = client().call_raw(&SoapCall::new(&url, "Login", "<Login/>")).await.unwrap_err();
    assert!(err.is_retryable(), "{:?}", err);
}

#[tokio::test]
async fn test_deadline_exceeded() {
    // accepts connections but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/soap", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let call = SoapCall::new(&url, "Slow", "<Slow/>").with_timeout(Duration::from_millis(100));
    let err = client().call_raw(&call).await.unwrap_err();
    assert!(matches!(err, ClientError::DeadlineExceeded), "{:?}", err);
}
