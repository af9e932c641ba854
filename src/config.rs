//! Explicit engine configuration. Parsing a config file, environment
//! variables, or CLI flags into this struct is the caller's job; this crate
//! only consumes the resolved values.

use std::path::PathBuf;

/// Knobs for [`crate::engine::BitcaskEngine`] and [`crate::merge::MergeWorker`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the engine owns. Created if missing.
    pub directory: PathBuf,
    /// Rollover threshold, in bytes, for the active file.
    pub max_file_size: u64,
    /// Advisory flush watermark, in bytes, for the merge worker.
    pub file_size_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./datafiles/default"),
            max_file_size: 150,
            file_size_threshold: 1000,
        }
    }
}

impl Config {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into(), ..Self::default() }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_file_size_threshold(mut self, file_size_threshold: u64) -> Self {
        self.file_size_threshold = file_size_threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source() {
        let config = Config::default();
        assert_eq!(config.directory, PathBuf::from("./datafiles/default"));
        assert_eq!(config.max_file_size, 150);
        assert_eq!(config.file_size_threshold, 1000);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = Config::new("/tmp/db").with_max_file_size(64).with_file_size_threshold(512);
        assert_eq!(config.directory, PathBuf::from("/tmp/db"));
        assert_eq!(config.max_file_size, 64);
        assert_eq!(config.file_size_threshold, 512);
    }
}
