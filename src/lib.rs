//! An embedded, append-only, log-structured key/value store in the Bitcask
//! family. A single process owns a directory: writes append to one active
//! file, older files are immutable, and [`merge::MergeWorker`] periodically
//! collapses superseded records into compact merged files.

pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod keydir;
pub mod merge;
pub mod record;

pub use config::Config;
pub use engine::BitcaskEngine;
pub use error::{Error, Result};
pub use merge::MergeWorker;
