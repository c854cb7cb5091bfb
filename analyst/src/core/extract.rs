//! Extraction of chart code from raw generator output.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub const OPEN_TAG: &str = "<execute_python>";
pub const CLOSE_TAG: &str = "</execute_python>";

static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<execute_python>([\s\S]*?)</execute_python>").expect("code block regex")
});

/// Generator output that does not contain usable chart code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedGeneration {
    #[error("generator output has no {OPEN_TAG}...{CLOSE_TAG} block")]
    MissingBlock,
    #[error("generator output has an empty {OPEN_TAG} block")]
    EmptyBlock,
}

/// Return the trimmed contents of the first delimited code block.
pub fn extract_chart_code(raw: &str) -> Result<String, MalformedGeneration> {
    let captures = CODE_BLOCK_RE
        .captures(raw)
        .ok_or(MalformedGeneration::MissingBlock)?;
    let code = captures
        .get(1)
        .map(|m| m.as_str().trim())
        .unwrap_or_default();
    if code.is_empty() {
        return Err(MalformedGeneration::EmptyBlock);
    }
    Ok(code.to_string())
}
