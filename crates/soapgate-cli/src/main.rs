//! CLI tool for the soapgate SOAP gateway.
//!
//! Provides commands for:
//! - call: Sending one SOAP request with the retrying client
//! - annotations: Printing the per-action annotations of a WSDL
//! - wsdl: Printing a WSDL as the gateway serves it
//! - unpack: Decoding a gzip+base64 embedded WSDL

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::{annotations, call, unpack, wsdl};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "soapgate")]
#[command(about = "CLI tool for the soapgate SOAP gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML file with [gateway] and [client] tables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a SOAP request and print the body payload of the response
    Call(call::CallArgs),
    /// Print the annotation table of a WSDL file as JSON
    Annotations(annotations::AnnotationsArgs),
    /// Print a WSDL with the configured service locations added
    Wsdl(wsdl::WsdlArgs),
    /// Decode a gzip-compressed, base64-encoded WSDL
    Unpack(unpack::UnpackArgs),
}

#[tokio::main]
async fn main() {
    // stdout carries command output
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match config::FileConfig::load(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Call(args) => call::run(args, config.client).await,
            Commands::Annotations(args) => annotations::run(args),
            Commands::Wsdl(args) => wsdl::run(args, config.gateway),
            Commands::Unpack(args) => unpack::run(args),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
