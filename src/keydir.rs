//! The key directory: an in-memory map from key to the location of its
//! currently authoritative value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::file::{DataFile, HintFile};

/// Where a key's live value currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub file_path: PathBuf,
    pub value_position: u64,
    pub value_size: u32,
    pub timestamp: i32,
}

/// Maps keys to their authoritative `(file_path, value_position,
/// value_size, timestamp)`. See SPEC_FULL.md §4.3.
#[derive(Debug, Default)]
pub struct KeyDir {
    entries: HashMap<String, Entry>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &mut self,
        key: impl Into<String>,
        file_path: impl Into<PathBuf>,
        value_position: u64,
        value_size: u32,
        timestamp: i32,
    ) {
        self.entries
            .insert(key.into(), Entry { file_path: file_path.into(), value_position, value_size, timestamp });
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn delete(&mut self, key: &str) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// Rewrites every entry pointing at `previous_path` to point at
    /// `new_path` instead. Used after a rename-based rollover or merge,
    /// where the file's contents (and thus value positions) are unchanged.
    pub fn update_file_path(&mut self, previous_path: &Path, new_path: &Path) {
        for entry in self.entries.values_mut() {
            if entry.file_path == previous_path {
                entry.file_path = new_path.to_path_buf();
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuilds the whole map from scratch by replaying hint files, then
    /// unmerged data files. Within each file, entries are replayed in write
    /// order; across files, a record only overwrites an existing entry for
    /// the same key if its timestamp is not strictly older, so that
    /// filesystem-ordering artifacts can't regress a key to a stale value
    /// (SPEC_FULL.md §9.5). A tombstone removes whatever entry for its key
    /// would otherwise have resulted, under the same tie-break.
    pub fn rebuild(&mut self, hint_files: &[HintFile], data_files: &[DataFile]) -> Result<()> {
        let mut staged: HashMap<String, (i32, Option<Entry>)> = HashMap::new();

        fn apply(staged: &mut HashMap<String, (i32, Option<Entry>)>, key: String, timestamp: i32, entry: Option<Entry>) {
            let should_apply = match staged.get(&key) {
                Some((existing_ts, _)) => timestamp >= *existing_ts,
                None => true,
            };
            if should_apply {
                staged.insert(key, (timestamp, entry));
            }
        }

        for hint_file in hint_files {
            let merged_path = hint_file.merged_file_path();
            for hint in hint_file.iterate()? {
                let hint = hint?;
                let entry = Entry {
                    file_path: merged_path.clone(),
                    value_position: hint.value_position,
                    value_size: hint.value_size,
                    timestamp: hint.timestamp,
                };
                apply(&mut staged, hint.key, hint.timestamp, Some(entry));
            }
        }
        for data_file in data_files {
            let path = data_file.path().to_path_buf();
            let mut offset = 0u64;
            for record in data_file.iterate()? {
                let record = record?;
                let value_position = offset + record.value_position_within_record() as u64;
                let entry = if record.is_tombstone() {
                    None
                } else {
                    Some(Entry {
                        file_path: path.clone(),
                        value_position,
                        value_size: record.value_size() as u32,
                        timestamp: record.timestamp,
                    })
                };
                offset += record.encoded_len() as u64;
                apply(&mut staged, record.key, record.timestamp, entry);
            }
        }

        self.entries = staged.into_iter().filter_map(|(key, (_, entry))| entry.map(|e| (key, e))).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[test]
    fn update_then_get() {
        let mut dir = KeyDir::new();
        dir.update("k", PathBuf::from("active.data"), 10, 5, 100);
        let entry = dir.get("k").unwrap();
        assert_eq!(entry.value_position, 10);
        assert_eq!(entry.value_size, 5);
        assert_eq!(entry.timestamp, 100);
    }

    #[test]
    fn delete_removes_entry() {
        let mut dir = KeyDir::new();
        dir.update("k", PathBuf::from("active.data"), 0, 1, 1);
        assert!(dir.delete("k").is_some());
        assert!(dir.get("k").is_none());
    }

    #[test]
    fn update_file_path_rewrites_matching_entries_only() {
        let mut dir = KeyDir::new();
        dir.update("a", PathBuf::from("active.data"), 0, 1, 1);
        dir.update("b", PathBuf::from("other.data"), 0, 1, 1);
        dir.update_file_path(Path::new("active.data"), Path::new("123.data"));
        assert_eq!(dir.get("a").unwrap().file_path, PathBuf::from("123.data"));
        assert_eq!(dir.get("b").unwrap().file_path, PathBuf::from("other.data"));
    }

    #[test]
    fn rebuild_from_data_files_keeps_last_writer() {
        let tmp = tempfile::TempDir::with_prefix("bitcask-keydir").unwrap();
        let path = tmp.path().join("1.data");
        let mut file = DataFile::open_writable(&path).unwrap();
        file.append_record(&Record::new(1, "k", b"old".to_vec())).unwrap();
        file.append_record(&Record::new(2, "k", b"new".to_vec())).unwrap();
        let readable = DataFile::open_readable(&path).unwrap();

        let mut dir = KeyDir::new();
        dir.rebuild(&[], std::slice::from_ref(&readable)).unwrap();
        let entry = dir.get("k").unwrap();
        assert_eq!(entry.timestamp, 2);
        let value = crate::file::read_at(&path, entry.value_position, entry.value_position + entry.value_size as u64).unwrap();
        assert_eq!(value, b"new");
    }

    #[test]
    fn rebuild_drops_tombstoned_keys() {
        let tmp = tempfile::TempDir::with_prefix("bitcask-keydir").unwrap();
        let path = tmp.path().join("1.data");
        let mut file = DataFile::open_writable(&path).unwrap();
        file.append_record(&Record::new(1, "k", b"v".to_vec())).unwrap();
        file.append_record(&Record::tombstone(2, "k")).unwrap();
        let readable = DataFile::open_readable(&path).unwrap();

        let mut dir = KeyDir::new();
        dir.rebuild(&[], std::slice::from_ref(&readable)).unwrap();
        assert!(dir.get("k").is_none());
    }

    #[test]
    fn rebuild_prefers_hints_value_but_data_file_can_still_override_when_newer() {
        let tmp = tempfile::TempDir::with_prefix("bitcask-keydir").unwrap();
        let merged_path = tmp.path().join("merged-1.data");
        let hint_path = tmp.path().join("merged-1.hint");
        {
            let mut merged = DataFile::open_writable(&merged_path).unwrap();
            merged.append_record(&Record::new(1, "k", b"merged-value".to_vec())).unwrap();
        }
        {
            let mut hint_file = HintFile::open_writable(&hint_path).unwrap();
            hint_file
                .write_all(&[crate::record::HintRecord { timestamp: 1, key: "k".into(), value_size: 12, value_position: 12 }])
                .unwrap();
        }
        let newer_path = tmp.path().join("2.data");
        let mut newer_file = DataFile::open_writable(&newer_path).unwrap();
        newer_file.append_record(&Record::new(5, "k", b"newer-value".to_vec())).unwrap();

        let hint_file = HintFile::open_readable(&hint_path).unwrap();
        let newer_file = DataFile::open_readable(&newer_path).unwrap();

        let mut dir = KeyDir::new();
        dir.rebuild(std::slice::from_ref(&hint_file), std::slice::from_ref(&newer_file)).unwrap();
        let entry = dir.get("k").unwrap();
        assert_eq!(entry.file_path, newer_path);
        assert_eq!(entry.timestamp, 5);
    }
}
