//! Input parsing for @file and @- syntax.

use std::io::Read;

use anyhow::{Context, Result};

/// Parse an input value that may be a JSON literal, @file, or @- for stdin.
pub fn parse_input_value(value: &str) -> Result<String> {
    if value == "@-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read from stdin")?;
        Ok(buf)
    } else if let Some(path) = value.strip_prefix('@') {
        std::fs::read_to_string(path).with_context(|| format!("failed to read file: {path}"))
    } else {
        Ok(value.to_string())
    }
}

/// Parse an input value as JSON.
pub fn parse_json_value(value: &str) -> Result<serde_json::Value> {
    let text = parse_input_value(value)?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON input: {text}"))
}
