//! Crate error type.
//!
//! Every fallible operation returns [`Result`]. Native failures carry the
//! last message FreeImage emitted on the calling thread (see
//! [`library`](crate::library)), stream faults are replayed unchanged, and
//! depth violations name the operation and the depths it accepts.

use crate::config::ConfigError;
use crate::stream::StreamOp;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot load FreeImage library {name}: {source}")]
    LibraryNotFound {
        name: String,
        #[source]
        source: libloading::Error,
    },
    #[error("{0} is not available in the loaded FreeImage library")]
    SymbolUnavailable(&'static str),
    #[error("Wrong color depth {depth} in function: {operation}. Supported depths: {}", depth_list(.allowed))]
    WrongDepth {
        depth: u32,
        operation: &'static str,
        allowed: &'static [u32],
    },
    #[error("Unsupported file operation {0}")]
    UnsupportedStreamOperation(StreamOp),
    /// A stream callback failed; the original error is kept as-is.
    #[error(transparent)]
    Stream(io::Error),
    #[error("{operation} failed{}", native_detail(.message))]
    Native {
        operation: &'static str,
        message: Option<String>,
    },
    #[error("unknown image format: {0}")]
    UnknownFormat(String),
    #[error("image session is closed")]
    SessionClosed,
    #[error("page {page} out of range ({count} pages)")]
    PageOutOfRange { page: usize, count: usize },
    #[error("cannot close multi-page bitmap: {0} page(s) still locked")]
    PagesLocked(usize),
    #[error("image is not multi-page")]
    NotMultipage,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True for a depth precondition failure.
    pub fn is_wrong_depth(&self) -> bool {
        matches!(self, Error::WrongDepth { .. })
    }
}

fn depth_list(allowed: &[u32]) -> String {
    allowed
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn native_detail(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}
