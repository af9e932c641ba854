//! The storage engine: the public append/get/delete/clear/rebuild_index
//! surface, the active file, and rollover. See SPEC_FULL.md §4.4.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::{self, classify, DataFile, FileKind, HintFile, ACTIVE_FILE_NAME};
use crate::keydir::KeyDir;
use crate::record::Record;

fn now_seconds() -> i32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i32
}

/// Microsecond-resolution timestamp used for rollover/merge filenames, to
/// avoid collisions under rapid rollover.
pub(crate) fn now_micros() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros()
}

/// An embedded, append-only, log-structured key/value store.
///
/// A single instance owns `directory`: one writable active file, zero or
/// more immutable data files, and zero or more merged-data/hint pairs.
/// Callers must serialize access to a given instance themselves; the engine
/// takes no internal locks beyond the advisory exclusive lock on its own
/// active file (see [`crate::file::DataFile::open_writable`]).
pub struct BitcaskEngine {
    directory: PathBuf,
    active_path: PathBuf,
    active_file: Option<DataFile>,
    key_dir: KeyDir,
    max_file_size: u64,
}

impl BitcaskEngine {
    /// Opens (creating if missing) the directory in `config`, then rebuilds
    /// the key directory from whatever hint and data files are already
    /// there.
    pub fn new(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;
        let active_path = config.directory.join(ACTIVE_FILE_NAME);
        let active_file = DataFile::open_writable(&active_path)?;
        let mut engine = Self {
            directory: config.directory,
            active_path,
            active_file: Some(active_file),
            key_dir: KeyDir::new(),
            max_file_size: config.max_file_size,
        };
        engine.rebuild_index()?;
        log::info!(
            "opened bitcask engine at {} ({} live keys indexed)",
            engine.directory.display(),
            engine.key_dir.len()
        );
        Ok(engine)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub(crate) fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub(crate) fn key_dir(&self) -> &KeyDir {
        &self.key_dir
    }

    pub(crate) fn key_dir_mut(&mut self) -> &mut KeyDir {
        &mut self.key_dir
    }

    fn active_file_ref(&self) -> Result<&DataFile> {
        self.active_file
            .as_ref()
            .ok_or_else(|| Error::PreconditionViolation("engine's directory was removed by clear(true)".to_string()))
    }

    fn active_file_mut(&mut self) -> Result<&mut DataFile> {
        self.active_file
            .as_mut()
            .ok_or_else(|| Error::PreconditionViolation("engine's directory was removed by clear(true)".to_string()))
    }

    /// Appends `key`/`value`, rolling the active file over first if the
    /// write would exceed `max_file_size`, then indexes the write.
    pub fn append(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let record = Record::new(now_seconds(), key, value.to_vec());
        let value_position = self.append_to_active_file(&record)?;
        self.key_dir.update(key.to_string(), self.active_path.clone(), value_position, record.value_size() as u32, record.timestamp);
        Ok(())
    }

    /// Looks up `key`; `Ok(None)` for an unknown or deleted key is not an
    /// error.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.key_dir.get(key) else {
            return Ok(None);
        };
        let value = file::read_at(&entry.file_path, entry.value_position, entry.value_position + entry.value_size as u64)?;
        Ok(Some(value))
    }

    /// Appends a tombstone for `key` and removes it from the key directory.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let record = Record::tombstone(now_seconds(), key);
        self.append_to_active_file(&record)?;
        self.key_dir.delete(key);
        Ok(())
    }

    /// Unlinks every file in the directory, optionally the directory too.
    /// Intended for test hygiene, not production teardown.
    pub fn clear(&mut self, delete_directory: bool) -> Result<()> {
        self.active_file = None;
        for entry in fs::read_dir(&self.directory)? {
            fs::remove_file(entry?.path())?;
        }
        self.key_dir = KeyDir::new();
        if delete_directory {
            fs::remove_dir(&self.directory)?;
        } else {
            self.active_file = Some(DataFile::open_writable(&self.active_path)?);
        }
        Ok(())
    }

    /// Rebuilds the key directory from scratch by replaying every hint file
    /// and every unmerged data file currently in the directory. Must be
    /// called at construction; safe to call again at any other time the
    /// caller is not racing a concurrent `append`/`delete`.
    pub fn rebuild_index(&mut self) -> Result<()> {
        let (data_files, hint_files) = match self.list_rebuild_files() {
            Ok(files) => files,
            Err(err) => {
                log::error!("rebuild_index aborted while listing {}: {err}", self.directory.display());
                return Err(err);
            }
        };
        if let Err(err) = self.key_dir.rebuild(&hint_files, &data_files) {
            log::error!("rebuild_index aborted while replaying records in {}: {err}", self.directory.display());
            return Err(err);
        }
        Ok(())
    }

    fn list_rebuild_files(&self) -> Result<(Vec<DataFile>, Vec<HintFile>)> {
        let mut data_files = Vec::new();
        let mut hint_files = Vec::new();
        for dir_entry in fs::read_dir(&self.directory)? {
            let path = dir_entry?.path();
            if path == self.active_path {
                continue;
            }
            match classify(&path) {
                Some(FileKind::UnmergedData) => data_files.push(DataFile::open_readable(&path)?),
                Some(FileKind::Hint) => hint_files.push(HintFile::open_readable(&path)?),
                // Merged data files are indexed through their paired hint,
                // not read directly.
                Some(FileKind::MergedData) => {}
                None => log::warn!("rebuild_index: skipping unrecognized file {}", path.display()),
            }
        }
        Ok((data_files, hint_files))
    }

    fn append_to_active_file(&mut self, record: &Record) -> Result<u64> {
        let current_size = self.active_file_ref()?.size()?;
        if current_size + record.encoded_len() as u64 > self.max_file_size {
            self.rollover()?;
        }
        self.active_file_mut()?.append_record(record)
    }

    /// Seals the active file by renaming it to an immutable path, rewrites
    /// the key directory's pointers to follow, and opens a fresh active
    /// file. See SPEC_FULL.md §4.4.
    fn rollover(&mut self) -> Result<()> {
        let immutable_path = self.directory.join(format!("{}.data", now_micros()));
        let active_file = self
            .active_file
            .take()
            .ok_or_else(|| Error::PreconditionViolation("engine's directory was removed by clear(true)".to_string()))?;
        active_file.rename_to(&immutable_path)?;
        self.key_dir.update_file_path(&self.active_path, &immutable_path);
        log::info!("rolled over {} to {}", self.active_path.display(), immutable_path.display());
        self.active_file = Some(DataFile::open_writable(&self.active_path)?);
        Ok(())
    }
}
