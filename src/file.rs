//! File abstractions: an open handle in the engine's directory, classified
//! by filename, with streaming iteration and atomic rename/discard.
//!
//! Two shapes live here: [`DataFile`] (active, immutable, or merged data
//! files) and [`HintFile`] (merge sidecars). Both ensure their parent
//! directory exists at open time, following the reference crate's `Log::new`.

use std::fs::{self, File as StdFile, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs4::FileExt;

use crate::error::{Error, Result};
use crate::record::{HintRecord, Record, DATA_HEADER_LEN};

pub const ACTIVE_FILE_NAME: &str = "active.data";
pub const MERGED_PREFIX: &str = "merged-";
pub const DATA_SUFFIX: &str = ".data";
pub const HINT_SUFFIX: &str = ".hint";

/// The three kinds of files the merge worker and index rebuild distinguish
/// by name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Hint,
    MergedData,
    UnmergedData,
}

/// Classifies a path by its filename. Returns `None` for anything that
/// isn't a `.data` or `.hint` file (e.g. a stray file dropped in the
/// directory by something else).
pub fn classify(path: &Path) -> Option<FileKind> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(HINT_SUFFIX) {
        Some(FileKind::Hint)
    } else if name.ends_with(DATA_SUFFIX) && name.starts_with(MERGED_PREFIX) {
        Some(FileKind::MergedData)
    } else if name.ends_with(DATA_SUFFIX) {
        Some(FileKind::UnmergedData)
    } else {
        None
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Filesystem creation time, falling back to modification time on platforms
/// that don't report birth time. Used to order mergeable files oldest-first.
pub fn creation_time(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path)?;
    meta.created().or_else(|_| meta.modified()).map_err(Error::from)
}

/// Reads `end - start` bytes at `start` in `path`, opening a fresh handle.
/// Used for point reads, which are rare enough across file boundaries that a
/// per-call open is an acceptable cost.
pub fn read_at(path: &Path, start: u64, end: u64) -> Result<Vec<u8>> {
    let mut file = StdFile::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// An open data file: the active file, an immutable unmerged file, or a
/// merged file.
pub struct DataFile {
    path: PathBuf,
    file: StdFile,
}

impl DataFile {
    /// Opens `path` for appending, creating it (and its parent directory) if
    /// missing. If `path`'s basename is `active.data`, takes out an
    /// exclusive advisory lock so a second engine instance pointed at the
    /// same directory fails fast rather than corrupting the log.
    pub fn open_writable(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        if path.file_name().and_then(|n| n.to_str()) == Some(ACTIVE_FILE_NAME) {
            file.try_lock_exclusive().map_err(|_| {
                Error::PreconditionViolation(format!(
                    "{} is already locked by another engine instance",
                    path.display()
                ))
            })?;
        }
        Ok(Self { path, file })
    }

    /// Opens `path` read-only.
    pub fn open_readable(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        let file = OpenOptions::new().read(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn kind(&self) -> Option<FileKind> {
        classify(&self.path)
    }

    pub fn created_at(&self) -> Result<SystemTime> {
        creation_time(&self.path)
    }

    /// Appends an encoded record, flushing it to the OS, and returns the
    /// absolute offset of the record's value bytes within this file.
    pub fn append_record(&mut self, record: &Record) -> Result<u64> {
        let offset_before = self.file.seek(SeekFrom::End(0))?;
        let encoded = record.encode();
        {
            let mut writer = BufWriter::with_capacity(encoded.len(), &mut self.file);
            writer.write_all(&encoded)?;
            writer.flush()?;
        }
        self.file.sync_data()?;
        Ok(offset_before + record.value_position_within_record() as u64)
    }

    /// Returns a non-restartable, streaming iterator over this file's
    /// records in file order.
    pub fn iterate(&self) -> Result<DataFileIter> {
        let file = StdFile::open(&self.path)?;
        Ok(DataFileIter { reader: BufReader::new(file) })
    }

    /// Closes this handle and renames the file to `new_path`, which must be
    /// in the same directory. Consumes `self`: callers reopen as needed.
    pub fn rename_to(self, new_path: impl AsRef<Path>) -> Result<PathBuf> {
        let new_path = new_path.as_ref().to_path_buf();
        let DataFile { path, file } = self;
        drop(file);
        fs::rename(&path, &new_path)?;
        Ok(new_path)
    }

    /// Closes this handle and unlinks the file.
    pub fn discard(self) -> Result<()> {
        let DataFile { path, file } = self;
        drop(file);
        fs::remove_file(path)?;
        Ok(())
    }
}

/// Streaming, non-restartable iterator over a [`DataFile`]'s records.
pub struct DataFileIter {
    reader: BufReader<StdFile>,
}

impl Iterator for DataFileIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut header = [0u8; DATA_HEADER_LEN];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        let timestamp = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let key_size = i32::from_le_bytes(header[4..8].try_into().unwrap());
        let value_size = i32::from_le_bytes(header[8..12].try_into().unwrap());
        if key_size < 1 {
            return Some(Err(Error::MalformedRecord(format!("invalid key_size {key_size}"))));
        }
        if value_size < 0 {
            return Some(Err(Error::MalformedRecord(format!("invalid value_size {value_size}"))));
        }
        let mut body = vec![0u8; key_size as usize + value_size as usize];
        if let Err(e) = self.reader.read_exact(&mut body) {
            return Some(Err(Error::MalformedRecord(format!("truncated record body: {e}"))));
        }
        let key = match String::from_utf8(body[..key_size as usize].to_vec()) {
            Ok(key) => key,
            Err(e) => return Some(Err(Error::MalformedRecord(format!("key is not valid utf-8: {e}")))),
        };
        let value = body[key_size as usize..].to_vec();
        Some(Ok(Record { timestamp, key, value }))
    }
}

/// A merge sidecar: one hint record per key present in its paired merged
/// data file.
pub struct HintFile {
    path: PathBuf,
    file: StdFile,
}

impl HintFile {
    pub fn open_writable(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn open_readable(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        let file = OpenOptions::new().read(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The basename-matched merged data file this hint file indexes, e.g.
    /// `merged-123.hint` pairs with `merged-123.data`.
    pub fn merged_file_path(&self) -> PathBuf {
        self.path.with_extension("data")
    }

    /// Derives a hint file path from its paired merged data file's path.
    pub fn path_for_merged_file(merged_data_path: &Path) -> PathBuf {
        merged_data_path.with_extension("hint")
    }

    /// Writes one hint record per entry, in iteration order.
    pub fn write_all<'a>(&mut self, hints: impl IntoIterator<Item = &'a HintRecord>) -> Result<()> {
        let mut writer = BufWriter::new(&mut self.file);
        for hint in hints {
            writer.write_all(&hint.encode())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn iterate(&self) -> Result<HintFileIter> {
        let file = StdFile::open(&self.path)?;
        Ok(HintFileIter { reader: BufReader::new(file) })
    }
}

/// Streaming, non-restartable iterator over a [`HintFile`]'s entries.
pub struct HintFileIter {
    reader: BufReader<StdFile>,
}

impl Iterator for HintFileIter {
    type Item = Result<HintRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        use crate::record::HINT_HEADER_LEN;

        let mut header = [0u8; HINT_HEADER_LEN];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        let timestamp = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let key_size = i32::from_le_bytes(header[4..8].try_into().unwrap());
        let value_size = i32::from_le_bytes(header[8..12].try_into().unwrap());
        let value_position = i32::from_le_bytes(header[12..16].try_into().unwrap());
        if key_size < 1 {
            return Some(Err(Error::MalformedRecord(format!("invalid key_size {key_size}"))));
        }
        if value_size < 0 || value_position < 0 {
            return Some(Err(Error::MalformedRecord("invalid hint metadata".to_string())));
        }
        let mut key_bytes = vec![0u8; key_size as usize];
        if let Err(e) = self.reader.read_exact(&mut key_bytes) {
            return Some(Err(Error::MalformedRecord(format!("truncated hint key: {e}"))));
        }
        let key = match String::from_utf8(key_bytes) {
            Ok(key) => key,
            Err(e) => return Some(Err(Error::MalformedRecord(format!("key is not valid utf-8: {e}")))),
        };
        Some(Ok(HintRecord {
            timestamp,
            key,
            value_size: value_size as u32,
            value_position: value_position as u64,
        }))
    }
}
