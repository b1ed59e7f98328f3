//! chunkwire library
//!
//! File listing and chunked download over a line-framed TCP protocol

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod fs_enum;
pub mod log;
pub mod logger;
pub mod net_async;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod transfer;

pub use error::{Error, ErrorKind, Result};
