//! SOAP envelope constants.

/// SOAP 1.1 envelope namespace
pub const SOAP11_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// SOAP 1.2 envelope namespace
pub const SOAP12_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope/";

/// Prefix used for the envelope elements the gateway writes
pub const ENV_PREFIX: &str = "SOAP-ENV";

/// Content type of every SOAP document the gateway and client send
pub const CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Opening of a response envelope, up to (not including) the header block
pub const ENVELOPE_START: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    "\n",
    r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">"#,
    "\n"
);

pub const HEADER_START: &str = "<SOAP-ENV:Header>";
pub const HEADER_END: &str = "</SOAP-ENV:Header>\n";
pub const BODY_START: &str = "<SOAP-ENV:Body>\n";
pub const ENVELOPE_END: &str = "\n</SOAP-ENV:Body></SOAP-ENV:Envelope>";

/// Outbound request envelope pieces: `REQUEST_HEADER + header + REQUEST_BODY + body + REQUEST_FOOTER`
pub const REQUEST_HEADER: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Header>"#
);
pub const REQUEST_BODY: &str = "</soapenv:Header><soapenv:Body>";
pub const REQUEST_FOOTER: &str = "</soapenv:Body></soapenv:Envelope>";

/// Namespaces (or bare prefixes, when undeclared) accepted on `Body`/`Header`
const ENVELOPE_NAMESPACES: [&str; 5] = [
    ENV_PREFIX,
    SOAP11_ENV_NS,
    SOAP12_ENV_NS,
    "http://schemas.xmlsoap.org/soap/envelope",
    "http://www.w3.org/2003/05/soap-envelope",
];

/// Whether an element namespace is acceptable for the envelope's `Body`/`Header`.
/// `None` means the element has no namespace.
pub fn is_envelope_namespace(ns: Option<&str>) -> bool {
    match ns {
        None | Some("") => true,
        Some(ns) => ENVELOPE_NAMESPACES.contains(&ns),
    }
}

/// Build an outbound request envelope around `header` and `body`.
pub fn request_envelope(header: &str, body: &str) -> String {
    let mut out = String::with_capacity(
        REQUEST_HEADER.len() + header.len() + REQUEST_BODY.len() + body.len() + REQUEST_FOOTER.len(),
    );
    out.push_str(REQUEST_HEADER);
    out.push_str(header);
    out.push_str(REQUEST_BODY);
    out.push_str(body);
    out.push_str(REQUEST_FOOTER);
    out
}
