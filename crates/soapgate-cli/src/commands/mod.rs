//! Subcommand implementations

pub mod annotations;
pub mod call;
pub mod unpack;
pub mod wsdl;

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

/// A literal argument, `@path` for a file's contents, or stdin when absent
pub fn read_input(arg: Option<&str>) -> Result<String> {
    match arg {
        Some(arg) => match arg.strip_prefix('@') {
            Some(path) => read_file(Path::new(path)),
            None => Ok(arg.to_string()),
        },
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("read from stdin")?;
            Ok(buffer)
        }
    }
}

/// A file's contents, or stdin for `-`
pub fn read_file(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        return read_input(None);
    }
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
