use bincode::{
    self,
    config::{Configuration, Fixint, LittleEndian, NoLimit},
    error::{DecodeError, EncodeError},
    Decode, Encode,
};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Defines errors that can arise while writing or reading a trace archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// No trace with this ID is recorded in the archive index.
    #[error("trace {0} is not in the archive index")]
    TraceNotFound(usize),

    /// The archive location exists and is something other than a directory.
    #[error("archive path {0:?} is not a directory")]
    NotADirectory(PathBuf),

    /// Reading or writing a file inside the archive failed.
    #[error("archive I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The JSON index could not be written or parsed.
    #[error("trace index {path:?} is unusable: {source}")]
    Index {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("trace encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("trace decoding failed: {0}")]
    Decode(#[from] DecodeError),

    /// A trace file does not hash to the digest recorded when it was written.
    #[error("trace {id} is corrupted: expected md5 {expected}, found {found}")]
    DigestMismatch {
        id: usize,
        expected: String,
        found: String,
    },
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn index_at(path: &Path) -> impl FnOnce(serde_json::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Index {
        path: path.to_path_buf(),
        source,
    }
}

/// One captured power trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TraceRecord {
    /// Attempt number within the capture run that produced the trace.
    pub attempt: u64,
    pub samples: Vec<f32>,
}

/// Index entry kept in `trace_index.json` for every stored trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceIndexEntry {
    pub file_stem: String,
    pub attempt: u64,
    pub sample_count: usize,
    /// Hex md5 of the encoded trace file.
    pub md5: String,
}

/// A directory of bincode-encoded traces plus a JSON index.
///
/// Traces are append-only. Each is stored as `trace_<id>.trace`; the index
/// maps IDs to file stems and records an md5 digest that is verified on read.
pub struct TraceArchive {
    dir: PathBuf,
    index_file_path: PathBuf,
    entries: Vec<TraceIndexEntry>,
    bincode_config: Configuration<LittleEndian, Fixint, NoLimit>,
}

impl TraceArchive {
    const INDEX_FILENAME: &'static str = "trace_index.json";
    const TRACE_FILE_EXTENSION: &'static str = "trace";

    fn current_bincode_config() -> Configuration<LittleEndian, Fixint, NoLimit> {
        bincode::config::standard()
            .with_little_endian()
            .with_fixed_int_encoding()
    }

    /// Opens the archive at `dir`, creating the directory and an empty index if needed.
    pub fn open(dir: PathBuf) -> Result<Self, ArchiveError> {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(io_at(&dir))?;
        } else if !dir.is_dir() {
            return Err(ArchiveError::NotADirectory(dir));
        }

        let index_file_path = dir.join(Self::INDEX_FILENAME);
        let mut archive = Self {
            dir,
            index_file_path,
            entries: Vec::new(),
            bincode_config: Self::current_bincode_config(),
        };
        archive.load_index()?;
        if !archive.index_file_path.exists() {
            archive.save_index()?;
        }
        Ok(archive)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TraceIndexEntry] {
        &self.entries
    }

    fn trace_path(&self, file_stem: &str) -> PathBuf {
        self.dir
            .join(file_stem)
            .with_extension(Self::TRACE_FILE_EXTENSION)
    }

    fn save_index(&self) -> Result<(), ArchiveError> {
        let file = File::create(&self.index_file_path).map_err(io_at(&self.index_file_path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.entries)
            .map_err(index_at(&self.index_file_path))
    }

    fn load_index(&mut self) -> Result<(), ArchiveError> {
        if !self.index_file_path.is_file() {
            self.entries = Vec::new();
            return Ok(());
        }
        let path = &self.index_file_path;
        let file = File::open(path).map_err(io_at(path))?;
        if file.metadata().map_err(io_at(path))?.len() == 0 {
            self.entries = Vec::new();
            return Ok(());
        }
        self.entries = serde_json::from_reader(BufReader::new(file)).map_err(index_at(path))?;
        Ok(())
    }

    fn write_record(&mut self, record: &TraceRecord) -> Result<usize, ArchiveError> {
        let id = self.entries.len();
        let file_stem = format!("trace_{:08}", id);
        let bytes = bincode::encode_to_vec(record, self.bincode_config)?;
        let path = self.trace_path(&file_stem);
        fs::write(&path, &bytes).map_err(io_at(&path))?;
        self.entries.push(TraceIndexEntry {
            file_stem,
            attempt: record.attempt,
            sample_count: record.samples.len(),
            md5: format!("{:x}", md5::compute(&bytes)),
        });
        Ok(id)
    }

    /// Stores one trace and persists the index.
    pub fn append(&mut self, record: &TraceRecord) -> Result<usize, ArchiveError> {
        let id = self.write_record(record)?;
        self.save_index()?;
        Ok(id)
    }

    /// Stores every trace, persisting the index once at the end.
    pub fn append_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a TraceRecord>,
    ) -> Result<usize, ArchiveError> {
        let mut written = 0;
        for record in records {
            self.write_record(record)?;
            written += 1;
        }
        self.save_index()?;
        Ok(written)
    }

    /// Reads a trace back, checking it against its recorded digest.
    pub fn get(&self, id: usize) -> Result<TraceRecord, ArchiveError> {
        let entry = self.entries.get(id).ok_or(ArchiveError::TraceNotFound(id))?;
        let path = self.trace_path(&entry.file_stem);
        let bytes = fs::read(&path).map_err(io_at(&path))?;
        let found = format!("{:x}", md5::compute(&bytes));
        if found != entry.md5 {
            return Err(ArchiveError::DigestMismatch {
                id,
                expected: entry.md5.clone(),
                found,
            });
        }
        let (record, _length): (TraceRecord, usize) =
            bincode::decode_from_slice(&bytes, self.bincode_config)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(attempt: u64) -> TraceRecord {
        TraceRecord {
            attempt,
            samples: vec![0.25, -0.5, attempt as f32],
        }
    }

    #[test]
    fn new_archive_creates_directory_and_index() -> Result<(), ArchiveError> {
        let base = tempdir().unwrap();
        let dir = base.path().join("traces").join("capture_1");
        let archive = TraceArchive::open(dir.clone())?;
        assert!(dir.is_dir());
        assert!(dir.join("trace_index.json").exists());
        assert!(archive.is_empty());
        Ok(())
    }

    #[test]
    fn traces_persist_across_reopen() -> Result<(), ArchiveError> {
        let base = tempdir().unwrap();
        let dir = base.path().to_path_buf();
        {
            let mut archive = TraceArchive::open(dir.clone())?;
            assert_eq!(archive.append(&record(0))?, 0);
            assert_eq!(archive.append_all(&[record(1), record(2)])?, 2);
            assert_eq!(archive.len(), 3);
        }
        let archive = TraceArchive::open(dir)?;
        assert_eq!(archive.len(), 3);
        assert_eq!(archive.get(2)?, record(2));
        assert_eq!(archive.entries()[1].sample_count, 3);
        assert!(matches!(archive.get(3), Err(ArchiveError::TraceNotFound(3))));
        Ok(())
    }

    #[test]
    fn tampered_trace_fails_its_digest() -> Result<(), ArchiveError> {
        let base = tempdir().unwrap();
        let mut archive = TraceArchive::open(base.path().to_path_buf())?;
        archive.append(&record(5))?;
        let path = base.path().join("trace_00000000.trace");
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            archive.get(0),
            Err(ArchiveError::DigestMismatch { id: 0, .. })
        ));
        Ok(())
    }

    #[test]
    fn archive_path_that_is_a_file_is_rejected() {
        let base = tempdir().unwrap();
        let file_path = base.path().join("not_a_dir");
        fs::write(&file_path, b"x").unwrap();
        assert!(matches!(
            TraceArchive::open(file_path.clone()),
            Err(ArchiveError::NotADirectory(path)) if path == file_path
        ));
    }

    #[test]
    fn failures_keep_the_offending_path_and_cause() {
        let base = tempdir().unwrap();
        let mut archive = TraceArchive::open(base.path().to_path_buf()).unwrap();
        archive.append(&record(1)).unwrap();
        let trace_path = base.path().join("trace_00000000.trace");
        fs::remove_file(&trace_path).unwrap();

        let err = archive.get(0).unwrap_err();
        match &err {
            ArchiveError::Io { path, source } => {
                assert_eq!(path, &trace_path);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected an I/O error, got {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());

        let index_path = base.path().join("trace_index.json");
        fs::write(&index_path, b"{ not json").unwrap();
        match TraceArchive::open(base.path().to_path_buf()).err() {
            Some(ArchiveError::Index { path, .. }) => assert_eq!(path, index_path),
            other => panic!("expected an index error, got {other:?}"),
        }
    }
}
