//! Protocol error types

use thiserror::Error;

/// Errors raised while decoding values that cross the native boundary
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Integer code with no matching variant
    #[error("Unknown {kind} code: {code}")]
    UnknownCode { kind: &'static str, code: i64 },

    /// Name with no matching variant (configuration, CLI)
    #[error("Unknown {kind}: '{name}'")]
    UnknownName { kind: &'static str, name: String },

    /// Image buffer inconsistent with its declared geometry
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Property key not present in the property table
    #[error("Unknown property: '{0}'")]
    UnknownProperty(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
