//! The merge (compaction) worker: collapses immutable files into
//! size-bounded merged files with paired hint sidecars. See SPEC_FULL.md §4.5.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::engine::{now_micros, BitcaskEngine};
use crate::error::Result;
use crate::file::{classify, DataFile, FileKind, HintFile, MERGED_PREFIX};
use crate::record::{HintRecord, Record};

/// Runs compaction passes against a [`BitcaskEngine`]'s directory.
///
/// Holds no state across calls beyond its configured threshold; callers must
/// ensure no concurrent `append`/`delete`/`get` runs on `engine` for the
/// duration of `do_merge`.
pub struct MergeWorker {
    directory: PathBuf,
    file_size_threshold: u64,
}

impl MergeWorker {
    pub fn new(engine: &BitcaskEngine, file_size_threshold: u64) -> Self {
        Self { directory: engine.directory().to_path_buf(), file_size_threshold }
    }

    /// Runs one full merge pass: scans every mergeable file oldest-first,
    /// collapses per-key history to the newest record, and emits one or more
    /// merged-data/hint pairs. Returns the paths of the merged data files it
    /// produced, in emission order. A directory with no mergeable files
    /// yields an empty result without creating anything.
    pub fn do_merge(&self, engine: &mut BitcaskEngine) -> Result<Vec<PathBuf>> {
        match self.do_merge_inner(engine) {
            Ok(paths) => Ok(paths),
            Err(err) => {
                log::error!("merge aborted in {}: {err}", self.directory.display());
                Err(err)
            }
        }
    }

    fn do_merge_inner(&self, engine: &mut BitcaskEngine) -> Result<Vec<PathBuf>> {
        let mergeable = self.list_mergeable_files(engine)?;
        if mergeable.is_empty() {
            return Ok(Vec::new());
        }
        let total = mergeable.len();
        log::info!("merge starting: {total} mergeable file(s) in {}", self.directory.display());

        let mut merged_paths = Vec::new();
        let mut latest: HashMap<String, Record> = HashMap::new();
        let mut files_being_merged: Vec<DataFile> = Vec::new();

        for (index, file) in mergeable.into_iter().enumerate() {
            for record in file.iterate()? {
                let record = record?;
                latest.insert(record.key.clone(), record);
            }
            files_being_merged.push(file);

            let projected_size: u64 = latest.values().map(|r| r.encoded_len() as u64).sum();
            let is_last_file = index + 1 == total;
            if projected_size >= self.file_size_threshold || is_last_file {
                let merged_path = self.flush(engine, &mut latest, &mut files_being_merged)?;
                merged_paths.push(merged_path);
            }
        }

        log::info!("merge finished: emitted {} merged file(s)", merged_paths.len());
        Ok(merged_paths)
    }

    fn list_mergeable_files(&self, engine: &BitcaskEngine) -> Result<Vec<DataFile>> {
        let mut files: Vec<(SystemTime, DataFile)> = Vec::new();
        for dir_entry in fs::read_dir(&self.directory)? {
            let path = dir_entry?.path();
            if path == engine.active_path() {
                continue;
            }
            match classify(&path) {
                Some(FileKind::UnmergedData) | Some(FileKind::MergedData) => {
                    let file = DataFile::open_readable(&path)?;
                    let created = file.created_at()?;
                    files.push((created, file));
                }
                Some(FileKind::Hint) => {}
                None => log::warn!("merge: skipping unrecognized file {}", path.display()),
            }
        }
        files.sort_by_key(|(created, _)| *created);
        Ok(files.into_iter().map(|(_, file)| file).collect())
    }

    /// Writes `latest`'s live records to a fresh merged-data/hint pair,
    /// fixes up the key directory, unlinks the consumed files, and resets
    /// `latest`/`files_being_merged` for the next round. Tombstones are
    /// dropped from the merged output and removed from the key directory
    /// wherever they still point at a file being merged.
    fn flush(
        &self,
        engine: &mut BitcaskEngine,
        latest: &mut HashMap<String, Record>,
        files_being_merged: &mut Vec<DataFile>,
    ) -> Result<PathBuf> {
        let merged_path = self.directory.join(format!("{MERGED_PREFIX}{}.data", now_micros()));
        let hint_path = HintFile::path_for_merged_file(&merged_path);
        let mut merged_file = DataFile::open_writable(&merged_path)?;
        let mut hint_file = HintFile::open_writable(&hint_path)?;

        let being_merged_paths: Vec<PathBuf> = files_being_merged.iter().map(|f| f.path().to_path_buf()).collect();

        let mut hints = Vec::new();
        let mut written_entries = Vec::new();
        for record in latest.values() {
            if record.is_tombstone() {
                continue;
            }
            let value_position = merged_file.append_record(record)?;
            hints.push(HintRecord::from_record(record, value_position));
            written_entries.push((record.key.clone(), value_position, record.value_size() as u32, record.timestamp));
        }
        hint_file.write_all(&hints)?;

        for (key, value_position, value_size, timestamp) in &written_entries {
            let points_at_merged_input =
                engine.key_dir().get(key).map(|entry| being_merged_paths.contains(&entry.file_path)).unwrap_or(false);
            if points_at_merged_input {
                engine.key_dir_mut().update(key.clone(), merged_path.clone(), *value_position, *value_size, *timestamp);
            }
        }
        for (key, record) in latest.iter() {
            if !record.is_tombstone() {
                continue;
            }
            let points_at_merged_input =
                engine.key_dir().get(key).map(|entry| being_merged_paths.contains(&entry.file_path)).unwrap_or(false);
            if points_at_merged_input {
                engine.key_dir_mut().delete(key);
            }
        }

        for file in files_being_merged.drain(..) {
            file.discard()?;
        }
        latest.clear();

        Ok(merged_path)
    }
}
