//! Annotation table command

use super::read_file;
use anyhow::Result;
use clap::Args;
use soapgate_server::Annotations;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct AnnotationsArgs {
    /// WSDL file (`-` for stdin)
    pub wsdl: PathBuf,

    /// The file holds a gzip+base64 packed WSDL
    #[arg(long)]
    pub packed: bool,
}

pub fn run(args: AnnotationsArgs) -> Result<()> {
    let wsdl = super::unpack::load_wsdl(&read_file(&args.wsdl)?, args.packed)?;
    println!("{}", render(&wsdl)?);
    Ok(())
}

/// Annotations of `wsdl` as pretty JSON, sorted by action
pub fn render(wsdl: &str) -> Result<String> {
    let annotations = Annotations::from_wsdl(wsdl);
    Ok(serde_json::to_string_pretty(&annotations.to_map())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let wsdl = r#"<definitions><documentation>{"Login": {"Raw": true}}</documentation></definitions>"#;
        let value: serde_json::Value = serde_json::from_str(&render(wsdl).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"Login": {"Raw": true, "RemoveNS": false}}));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render("<definitions/>").unwrap(), "{}");
    }
}
