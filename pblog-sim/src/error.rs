use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to the host by the recording and replay modules
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Invalid value '{value}' for parameter '{key}'")]
    InvalidParameter { key: &'static str, value: String },

    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("Module used before init")]
    NotInitialized,

    #[error("Module has no active session, reset was not called")]
    NotReset,

    #[error("I/O operation failed: {0}")]
    Io(#[from] io::Error),

    #[error("Protobuf error: {0}")]
    Protobuf(#[from] protobuf::Error),

    #[error("Invalid event: {0}")]
    Codec(#[from] pblog_core::CodecError),
}

/// A log does not start with the expected bootstrap records
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Log '{}' has no readable records", .0.display())]
    EmptyLog(PathBuf),

    #[error("Expected bootstrap record '{expected}', found '{found}'")]
    UnexpectedRecord {
        expected: &'static str,
        found: String,
    },

    #[error("Cannot decode scenario info: {0}")]
    ScenarioInfo(protobuf::Error),

    #[error("Topic list is not valid UTF-8")]
    TopicListEncoding,
}
