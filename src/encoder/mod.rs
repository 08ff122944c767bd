//! Payload encoding.
//!
//! Turns a rendered payload into the exact bytes handed to the transport. [`EncodingMode::Raw`]
//! passes bytes through untouched; [`EncodingMode::Structured`] parses the payload as JSON and
//! re-encodes it as a BSON document.
//!
//! Encoding is pure: it holds no state between calls, and identical input always produces
//! identical output. On failure nothing is produced; there is no partial output.
mod bson;

use std::{borrow::Cow, fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("malformed input at line {line}, column {column} (offset {offset}): {message}")]
    MalformedInput {
        offset: usize,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("document of {0} bytes exceeds the BSON size limit")]
    DocumentTooLarge(usize),
}

impl EncodeError {
    fn malformed_at_start(message: impl Into<String>) -> Self {
        EncodeError::MalformedInput {
            offset: 0,
            line: 1,
            column: 1,
            message: message.into(),
        }
    }

    fn from_json(text: &[u8], err: &serde_json::Error) -> Self {
        let (line, column) = (err.line().max(1), err.column());
        let line_start = text
            .split(|b| *b == b'\n')
            .take(line - 1)
            .map(|l| l.len() + 1)
            .sum::<usize>();
        let offset = (line_start + column.saturating_sub(1)).min(text.len());

        EncodeError::MalformedInput {
            offset,
            line,
            column,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid output format '{0}', only 'raw' or 'structured' is acceptable")]
pub struct UnknownMode(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    #[default]
    Raw,
    /// JSON text in, BSON document out.
    Structured,
}

impl FromStr for EncodingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(EncodingMode::Raw),
            "structured" | "bson" => Ok(EncodingMode::Structured),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingMode::Raw => write!(f, "raw"),
            EncodingMode::Structured => write!(f, "structured"),
        }
    }
}

/// Encodes `text` for the wire. Raw mode borrows the input.
pub fn encode(text: &[u8], mode: EncodingMode) -> Result<Cow<'_, [u8]>, EncodeError> {
    match mode {
        EncodingMode::Raw => Ok(Cow::Borrowed(text)),
        EncodingMode::Structured => {
            let value: serde_json::Value =
                serde_json::from_slice(text).map_err(|e| EncodeError::from_json(text, &e))?;
            bson::to_document(&value).map(Cow::Owned)
        }
    }
}
