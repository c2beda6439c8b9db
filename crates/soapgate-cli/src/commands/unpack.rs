//! Embedded WSDL decoding command

use super::read_file;
use anyhow::{Context, Result};
use clap::Args;
use soapgate_core::ungzb64;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct UnpackArgs {
    /// File with the base64 text (`-` for stdin)
    pub input: PathBuf,
}

pub fn run(args: UnpackArgs) -> Result<()> {
    let packed = read_file(&args.input)?;
    print!("{}", load_wsdl(&packed, true)?);
    Ok(())
}

/// `text` as is, or unpacked from gzip+base64 when `packed`
pub fn load_wsdl(text: &str, packed: bool) -> Result<String> {
    if !packed {
        return Ok(text.to_string());
    }
    let compact: String = text.split_whitespace().collect();
    ungzb64(&compact).context("unpack gzip+base64 WSDL")
}
