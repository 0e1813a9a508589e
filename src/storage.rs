//! Persisted label storage.
//!
//! A dataset directory holds `postdata_metadata.json` and `num_files` label
//! files named `postdata_<n>.bin`.  Labels are fixed-width records stored
//! back to back; file `n` holds the global index range
//! `[n * labels_per_file, (n + 1) * labels_per_file)` with
//! `labels_per_file = ceil(num_labels / num_files)`.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::label::{label_width, Commitment, Digest};

/// Name of the metadata record inside a dataset directory.
pub const METADATA_FILE: &str = "postdata_metadata.json";

/// File name of the `index`-th label file.
pub fn label_file_name(index: u32) -> String {
    format!("postdata_{index}.bin")
}

/// Failures while reading or writing a dataset directory.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An operating-system level I/O failure.
    #[error("{context}: {source}")]
    Io {
        /// File and label range being accessed.
        context: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The metadata record is missing fields or inconsistent.
    #[error("malformed metadata {}: {reason}", path.display())]
    Metadata {
        /// Metadata file path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
    /// A label file is shorter or longer than its label range requires.
    #[error("label file {} holds {actual} bytes, expected {expected}", path.display())]
    SizeMismatch {
        /// Label file path.
        path: PathBuf,
        /// Size implied by the metadata.
        expected: u64,
        /// Size found on disk.
        actual: u64,
    },
    /// A read past the end of the dataset was requested.
    #[error("label range [{start}, {end}) exceeds dataset of {num_labels} labels")]
    OutOfRange {
        /// First requested index.
        start: u64,
        /// One past the last requested index.
        end: u64,
        /// Dataset size.
        num_labels: u64,
    },
}

impl StorageError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Metadata written by the initializer next to the label files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
    /// Identity the labels are bound to.
    #[serde(with = "crate::shared::hex_digest")]
    pub commitment: Commitment,
    /// Label width in bits.
    pub bits_per_label: u32,
    /// Labels per space unit.
    pub labels_per_unit: u64,
    /// Dataset size in units.
    pub num_units: u32,
    /// Number of label files.
    pub num_files: u32,
    /// Merkle root over every label, published for verifiers.
    #[serde(with = "crate::shared::hex_digest")]
    pub root: Digest,
}

impl PostMetadata {
    /// Reads the metadata record of `dir`.
    pub fn load(dir: &Path) -> Result<Self, StorageError> {
        let path = dir.join(METADATA_FILE);
        let bytes = fs::read(&path)
            .map_err(|err| StorageError::io(format!("reading {}", path.display()), err))?;
        serde_json::from_slice(&bytes).map_err(|err| StorageError::Metadata {
            path,
            reason: err.to_string(),
        })
    }

    /// Writes the metadata record of `dir` via a temporary file and rename.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(dir)
            .map_err(|err| StorageError::io(format!("creating {}", dir.display()), err))?;
        let path = dir.join(METADATA_FILE);
        let tmp_path = dir.join(format!("{METADATA_FILE}.tmp"));
        let contents = serde_json::to_vec_pretty(self).map_err(|err| StorageError::Metadata {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        fs::write(&tmp_path, contents)
            .map_err(|err| StorageError::io(format!("writing {}", tmp_path.display()), err))?;
        fs::rename(&tmp_path, &path)
            .map_err(|err| StorageError::io(format!("renaming {}", tmp_path.display()), err))?;
        Ok(path)
    }

    /// Removes the metadata record of `dir`.  A missing record is not an error.
    pub fn discard(dir: &Path) -> Result<(), StorageError> {
        remove_if_present(&dir.join(METADATA_FILE))
    }
}

/// Removes label files `from..to` of `dir`, skipping any already gone.
pub fn remove_label_files(dir: &Path, from: u32, to: u32) -> Result<(), StorageError> {
    for index in from..to {
        remove_if_present(&dir.join(label_file_name(index)))?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => {
            Err(StorageError::io(format!("removing {}", path.display()), err))
        }
        _ => Ok(()),
    }
}

/// Placement of labels across files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Bytes per label record.
    pub label_width: usize,
    /// Total labels in the dataset.
    pub num_labels: u64,
    /// Number of label files.
    pub num_files: u32,
    /// Labels held by every file but possibly the last non-empty one.
    pub labels_per_file: u64,
}

impl Layout {
    /// Computes the layout of a dataset.
    pub fn new(bits_per_label: u32, num_labels: u64, num_files: u32) -> Option<Self> {
        if bits_per_label == 0 || num_labels == 0 || num_files == 0 {
            return None;
        }
        let labels_per_file = (num_labels + u64::from(num_files) - 1) / u64::from(num_files);
        Some(Self {
            label_width: label_width(bits_per_label),
            num_labels,
            num_files,
            labels_per_file,
        })
    }

    /// Layout described by a metadata record.
    pub fn from_metadata(dir: &Path, metadata: &PostMetadata) -> Result<Self, StorageError> {
        let malformed = |reason: &str| StorageError::Metadata {
            path: dir.join(METADATA_FILE),
            reason: reason.to_string(),
        };
        let num_labels = metadata
            .labels_per_unit
            .checked_mul(u64::from(metadata.num_units))
            .ok_or_else(|| malformed("labels_per_unit * num_units overflows"))?;
        Self::new(metadata.bits_per_label, num_labels, metadata.num_files)
            .ok_or_else(|| malformed("zero-sized dataset, label width or file count"))
    }

    /// Global index range `[start, end)` stored in file `index`.
    pub fn file_range(&self, index: u32) -> (u64, u64) {
        let start = (u64::from(index) * self.labels_per_file).min(self.num_labels);
        let end = (start + self.labels_per_file).min(self.num_labels);
        (start, end)
    }

    /// Byte length file `index` must have.
    pub fn file_size(&self, index: u32) -> u64 {
        let (start, end) = self.file_range(index);
        (end - start) * self.label_width as u64
    }

    /// Confirms every label file exists with the expected size.
    pub fn check_files(&self, dir: &Path) -> Result<(), StorageError> {
        for index in 0..self.num_files {
            let path = dir.join(label_file_name(index));
            let actual = fs::metadata(&path)
                .map_err(|err| StorageError::io(format!("inspecting {}", path.display()), err))?
                .len();
            let expected = self.file_size(index);
            if actual != expected {
                return Err(StorageError::SizeMismatch {
                    path,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Sequential label reader owning at most one open file handle.
///
/// Scan workers each create their own reader, so handles are never shared
/// and are closed as soon as the worker returns.
#[derive(Debug)]
pub struct LabelReader {
    dir: PathBuf,
    layout: Layout,
    current: Option<(u32, File)>,
}

impl LabelReader {
    /// Reader over the dataset in `dir`.
    pub fn new(dir: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            dir: dir.into(),
            layout,
            current: None,
        }
    }

    /// Replaces the contents of `buf` with the labels `[start, end)`.
    pub fn read_range(&mut self, start: u64, end: u64, buf: &mut Vec<u8>) -> Result<(), StorageError> {
        if start > end || end > self.layout.num_labels {
            return Err(StorageError::OutOfRange {
                start,
                end,
                num_labels: self.layout.num_labels,
            });
        }
        buf.clear();
        let width = self.layout.label_width as u64;
        let mut position = start;
        while position < end {
            let file_index = (position / self.layout.labels_per_file) as u32;
            let (file_start, file_end) = self.layout.file_range(file_index);
            let chunk_end = end.min(file_end);
            let path = self.dir.join(label_file_name(file_index));
            let context = || {
                format!(
                    "reading labels [{position}, {chunk_end}) from {}",
                    path.display()
                )
            };
            let file = self.file(file_index).map_err(|err| StorageError::io(context(), err))?;
            file.seek(SeekFrom::Start((position - file_start) * width))
                .map_err(|err| StorageError::io(context(), err))?;
            let filled = buf.len();
            buf.resize(filled + ((chunk_end - position) * width) as usize, 0);
            file.read_exact(&mut buf[filled..])
                .map_err(|err| StorageError::io(context(), err))?;
            position = chunk_end;
        }
        Ok(())
    }

    fn file(&mut self, index: u32) -> io::Result<&mut File> {
        if self.current.as_ref().map(|(open, _)| *open) != Some(index) {
            let file = File::open(self.dir.join(label_file_name(index)))?;
            self.current = Some((index, file));
        }
        match self.current.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(io::Error::new(io::ErrorKind::Other, "label file not open")),
        }
    }
}

/// Sequential writer splitting labels across files as the layout dictates.
#[derive(Debug)]
pub struct LabelWriter {
    dir: PathBuf,
    layout: Layout,
    written: u64,
    current: Option<(u32, BufWriter<File>)>,
}

impl LabelWriter {
    /// Writer creating label files in `dir`, truncating existing ones.
    pub fn create(dir: impl Into<PathBuf>, layout: Layout) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| StorageError::io(format!("creating {}", dir.display()), err))?;
        Ok(Self {
            dir,
            layout,
            written: 0,
            current: None,
        })
    }

    /// Number of labels written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends one label record.
    pub fn write_label(&mut self, label: &[u8]) -> Result<(), StorageError> {
        if self.written >= self.layout.num_labels {
            return Err(StorageError::OutOfRange {
                start: self.written,
                end: self.written + 1,
                num_labels: self.layout.num_labels,
            });
        }
        let file_index = (self.written / self.layout.labels_per_file) as u32;
        if self.current.as_ref().map(|(open, _)| *open) != Some(file_index) {
            self.flush()?;
            let path = self.dir.join(label_file_name(file_index));
            let file = File::create(&path)
                .map_err(|err| StorageError::io(format!("creating {}", path.display()), err))?;
            self.current = Some((file_index, BufWriter::new(file)));
        }
        let written = self.written;
        if let Some((index, writer)) = self.current.as_mut() {
            writer.write_all(label).map_err(|err| {
                StorageError::io(
                    format!("writing label {written} to {}", label_file_name(*index)),
                    err,
                )
            })?;
        }
        self.written += 1;
        Ok(())
    }

    /// Flushes the open file and creates any trailing empty files.
    pub fn finish(mut self) -> Result<(), StorageError> {
        self.flush()?;
        for index in 0..self.layout.num_files {
            let path = self.dir.join(label_file_name(index));
            if self.layout.file_size(index) == 0 {
                File::create(&path)
                    .map_err(|err| StorageError::io(format!("creating {}", path.display()), err))?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if let Some((index, mut writer)) = self.current.take() {
            writer.flush().map_err(|err| {
                StorageError::io(
                    format!("flushing {}", self.dir.join(label_file_name(index)).display()),
                    err,
                )
            })?;
        }
        Ok(())
    }
}
