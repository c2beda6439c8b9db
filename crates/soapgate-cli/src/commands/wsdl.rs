//! WSDL rendering command

use super::read_file;
use anyhow::Result;
use clap::Args;
use soapgate_server::gateway::inject_locations;
use soapgate_server::GatewayConfig;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct WsdlArgs {
    /// WSDL file (`-` for stdin)
    pub wsdl: PathBuf,

    /// The file holds a gzip+base64 packed WSDL
    #[arg(long)]
    pub packed: bool,

    /// Service location, in addition to the configured ones
    #[arg(short, long)]
    pub location: Vec<String>,
}

pub fn run(args: WsdlArgs, config: GatewayConfig) -> Result<()> {
    let wsdl = super::unpack::load_wsdl(&read_file(&args.wsdl)?, args.packed)?;
    let mut locations = config.locations;
    locations.extend(args.location);
    print!("{}", inject_locations(&wsdl, &locations));
    Ok(())
}
