use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreErrorCode {
    Io,
    MalformedHeader,
    Decompression,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct CoreError {
    pub code: CoreErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn new(code: CoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(CoreErrorCode::MalformedHeader, message)
    }

    pub fn cancelled() -> Self {
        Self::new(CoreErrorCode::Cancelled, "cancelled by progress callback")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == CoreErrorCode::Cancelled
    }

    /// Prefixes the message with where the failure happened.
    pub fn context(self, context: impl AsRef<str>) -> Self {
        Self {
            code: self.code,
            message: format!("{}: {}", context.as_ref(), self.message),
        }
    }

    /// Prefixes the failing file's path; cancellation is passed through unchanged.
    pub fn at_path(self, path: &Path) -> Self {
        if self.is_cancelled() {
            self
        } else {
            self.context(path.display().to_string())
        }
    }
}

/// A short read inside a declared frame means the frame lied about its size.
impl From<io::Error> for CoreError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                Self::malformed(format!("unexpected end of data: {e}"))
            }
            _ => Self::new(CoreErrorCode::Io, e.to_string()),
        }
    }
}
