//! SOAP call command

use super::read_input;
use anyhow::{Context, Result};
use clap::Args;
use soapgate_client::{body_payload, ClientConfig, RetryPolicy, SoapCall, SoapClient};
use std::time::Duration;
use tracing::debug;

#[derive(Args, Debug)]
pub struct CallArgs {
    /// URL of the SOAP endpoint
    pub url: String,

    /// SOAPAction header value
    #[arg(short, long)]
    pub action: String,

    /// Body payload XML string or @file path (default: stdin)
    #[arg(short, long)]
    pub input: Option<String>,

    /// SOAP header content, XML string or @file path
    #[arg(long)]
    pub header: Option<String>,

    /// Timeout in seconds
    #[arg(long, default_value = "60")]
    pub timeout: u64,

    /// Do not retry transport failures
    #[arg(long)]
    pub no_retry: bool,

    /// Print the whole response envelope instead of the body payload
    #[arg(long)]
    pub envelope: bool,
}

pub async fn run(args: CallArgs, mut config: ClientConfig) -> Result<()> {
    let body = read_input(args.input.as_deref())?;
    let header = match args.header.as_deref() {
        Some(header) => read_input(Some(header))?,
        None => String::new(),
    };
    if args.no_retry {
        config.retry = RetryPolicy::never();
    }

    let client = SoapClient::with_config(config);
    let call = SoapCall::new(&args.url, &args.action, body.trim())
        .with_header(header.trim())
        .with_timeout(Duration::from_secs(args.timeout));
    let response = client
        .call_raw(&call)
        .await
        .with_context(|| format!("call {} at {}", args.action, args.url))?;
    debug!(action = %args.action, bytes = response.len(), "received response");

    if args.envelope {
        println!("{}", String::from_utf8_lossy(&response));
    } else {
        println!("{}", body_payload(&response).context("response is not a SOAP envelope")?);
    }
    Ok(())
}
