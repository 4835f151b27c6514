//! A path-bound reader that yields spectra one at a time from an mzML file,
//! reporting corrupt spectra without giving up on the rest of the file.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

use crate::io::infer_format::{infer_from_path, infer_from_stream, MassSpectrometryFormat};
use crate::io::mzml::{MzMLParserError, MzMLReaderType};
use crate::io::OffsetIndex;
use crate::meta::{FileDescription, MassSpectrometryRun};
use crate::spectrum::{ArrayRetrievalError, Spectrum};

const DEFAULT_BUFFER_CAPACITY: usize = 10000;

/// Why a single spectrum could not be read
#[derive(Debug, Error)]
pub enum Corruption {
    /// The spectrum's XML could not be parsed or lacked a required attribute
    #[error("malformed spectrum: {0}")]
    Framing(#[source] MzMLParserError),
    /// The spectrum's binary arrays could not be decoded
    #[error("undecodable signal: {0}")]
    Signal(#[source] ArrayRetrievalError),
}

/// Errors returned from [`SpectrumReader::next`] and [`Spectrum::signal`]
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("corrupt {context}: {source}")]
    Corrupt {
        context: String,
        #[source]
        source: Corruption,
    },
    #[error("I/O error while reading: {0}")]
    IOError(#[from] io::Error),
}

impl From<ReadError> for io::Error {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::IOError(e) => e,
            ReadError::Corrupt { .. } => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

/// Errors that prevent a [`SpectrumReader`] from being created
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("{0} does not exist")]
    NotFound(PathBuf),
    #[error("{path} is not in a supported format: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },
    #[error("{path} is not a well-formed mzML file: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: MzMLParserError,
    },
    #[error("I/O error opening {path}: {source}")]
    IOError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OpenError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::IOError {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    fn from_parser(path: &Path, source: MzMLParserError) -> Self {
        match source {
            MzMLParserError::IOError(_, e) => Self::from_io(path, e),
            source => Self::Corrupt {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

impl From<OpenError> for io::Error {
    fn from(value: OpenError) -> Self {
        match value {
            OpenError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, value),
            OpenError::UnsupportedFormat { .. } => io::Error::new(io::ErrorKind::Unsupported, value),
            OpenError::Corrupt { .. } => io::Error::new(io::ErrorKind::InvalidData, value),
            OpenError::IOError { source, .. } => source,
        }
    }
}

/// A way to name a spectrum for random access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumKey<'a> {
    /// The zero-based position of the spectrum
    Index(usize),
    /// The native ID of the spectrum
    Id(&'a str),
}

impl From<usize> for SpectrumKey<'_> {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

impl<'a> From<&'a str> for SpectrumKey<'a> {
    fn from(value: &'a str) -> Self {
        Self::Id(value)
    }
}

/// Options for opening a [`SpectrumReader`]
#[derive(Debug, Clone)]
pub struct SpectrumReaderBuilder {
    buffer_capacity: usize,
    eager_index: bool,
}

impl Default for SpectrumReaderBuilder {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            eager_index: false,
        }
    }
}

impl SpectrumReaderBuilder {
    /// The capacity of the read buffer, in bytes
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Build the offset index while opening when the file has no usable
    /// `indexedmzML` trailer, instead of on the first random access
    pub fn eager_index(mut self, eager: bool) -> Self {
        self.eager_index = eager;
        self
    }

    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<SpectrumReader, OpenError> {
        let path = path.as_ref();
        let mut handle = fs::File::open(path).map_err(|e| OpenError::from_io(path, e))?;
        let (format, gzipped) =
            infer_from_stream(&mut handle).map_err(|e| OpenError::from_io(path, e))?;
        if gzipped {
            return Err(OpenError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "gzip-compressed files must be decompressed before reading".into(),
            });
        }
        if format == MassSpectrometryFormat::Unknown {
            let (claimed, _) = infer_from_path(path);
            if claimed != MassSpectrometryFormat::MzML {
                return Err(OpenError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    reason: "no mzML root element found".into(),
                });
            }
            debug!(
                "{} has an mzML extension but was not recognized, parsing it anyway",
                path.display()
            );
        }

        let mut inner = MzMLReaderType::with_buffer_capacity(handle, self.buffer_capacity)
            .map_err(|e| OpenError::from_parser(path, e))?;
        inner
            .read_index(self.eager_index)
            .map_err(|e| OpenError::from_parser(path, e))?;
        Ok(SpectrumReader {
            path: path.to_path_buf(),
            inner,
        })
    }
}

fn spectrum_context(path: &Path, ordinal: usize) -> String {
    format!("spectrum {ordinal} of {}", path.display())
}

fn framing_error(path: &Path, ordinal: usize, err: MzMLParserError) -> ReadError {
    match err {
        MzMLParserError::IOError(_, e) => ReadError::IOError(e),
        err => ReadError::Corrupt {
            context: spectrum_context(path, ordinal),
            source: Corruption::Framing(err),
        },
    }
}

/**
Reads spectra from an mzML or indexedmzML file in file order.

[`SpectrumReader::next`] yields `Ok(Some(spectrum))` for each spectrum,
then `Ok(None)` on every call once the spectrum list is exhausted.

A spectrum whose XML is malformed yields [`ReadError::Corrupt`], is logged,
and is skipped: the following call continues with the next spectrum. A
spectrum whose binary payload is corrupt is still returned, and the error
surfaces from [`Spectrum::signal`].

Reading requires `&mut self`, so a reader is driven by one caller at a
time. The file is closed when the reader is dropped.
*/
#[derive(Debug)]
pub struct SpectrumReader {
    path: PathBuf,
    inner: MzMLReaderType<fs::File>,
}

impl SpectrumReader {
    /// Open the mzML file at `path` with the default options
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenError> {
        SpectrumReaderBuilder::default().open(path)
    }

    pub fn builder() -> SpectrumReaderBuilder {
        SpectrumReaderBuilder::default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next spectrum in file order, or `None` at the end of the file
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Spectrum>, ReadError> {
        let ordinal = self.inner.next_ordinal();
        match self.inner.read_spectrum() {
            Ok(spectrum) => Ok(Some(spectrum)),
            Err(err) if err.is_end_of_data() => Ok(None),
            Err(MzMLParserError::IOError(_, e)) => Err(ReadError::IOError(e)),
            Err(err) => {
                warn!("Skipping {}: {err}", spectrum_context(&self.path, ordinal));
                match self.inner.resynchronize() {
                    Ok(true) => {}
                    Ok(false) => debug!("No spectra follow the skipped spectrum"),
                    Err(MzMLParserError::IOError(_, e)) => return Err(ReadError::IOError(e)),
                    Err(e) => warn!("Failed to resume after corrupt spectrum: {e}"),
                }
                Err(framing_error(&self.path, ordinal, err))
            }
        }
    }

    /// Iterate over the remaining spectra, stopping at the end of the file
    pub fn iter(&mut self) -> SpectrumIter<'_> {
        SpectrumIter { reader: self }
    }

    /// Move the cursor so the next call to [`SpectrumReader::next`] returns the
    /// spectrum named by `key`. Returns `false` and leaves the cursor where it
    /// was when no such spectrum exists.
    pub fn seek<'k, K: Into<SpectrumKey<'k>>>(&mut self, key: K) -> Result<bool, ReadError> {
        let found = match key.into() {
            SpectrumKey::Index(index) => self.inner.seek_to_index(index),
            SpectrumKey::Id(id) => self.inner.seek_to_id(id),
        };
        found.map_err(|e| framing_error(&self.path, self.inner.next_ordinal(), e))
    }

    fn read_at(&mut self, index: usize) -> Result<Option<Spectrum>, ReadError> {
        let Some((_, offset)) = self.index()?.get_index(index) else {
            return Ok(None);
        };
        self.inner
            .read_spectrum_at(offset, index)
            .map(Some)
            .map_err(|e| framing_error(&self.path, index, e))
    }

    /// Read the spectrum with native ID `id` without moving the cursor
    pub fn get_spectrum_by_id(&mut self, id: &str) -> Result<Option<Spectrum>, ReadError> {
        match self.index()?.index_of(id) {
            Some(index) => self.read_at(index),
            None => Ok(None),
        }
    }

    /// Read the spectrum at position `index` without moving the cursor
    pub fn get_spectrum_by_index(&mut self, index: usize) -> Result<Option<Spectrum>, ReadError> {
        self.read_at(index)
    }

    /// Return to the first spectrum
    pub fn reset(&mut self) -> Result<(), ReadError> {
        Ok(self.inner.rewind()?)
    }

    /// The offset index, built by scanning the file if it was not read
    /// from an `indexedmzML` trailer
    pub fn index(&mut self) -> Result<&OffsetIndex, ReadError> {
        let ordinal = self.inner.next_ordinal();
        self.inner
            .ensure_index()
            .map_err(|e| framing_error(&self.path, ordinal, e))
            .map(|_| ())?;
        Ok(&self.inner.spectrum_index)
    }

    /// The number of spectra in the file
    pub fn len(&mut self) -> Result<usize, ReadError> {
        Ok(self.index()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool, ReadError> {
        Ok(self.len()? == 0)
    }

    pub fn run(&self) -> &MassSpectrometryRun {
        self.inner.run_description()
    }

    pub fn file_description(&self) -> &FileDescription {
        self.inner.file_description()
    }

    /// The number of spectra the file declares, which may disagree with
    /// what it contains
    pub fn spectrum_count_hint(&self) -> Option<u64> {
        self.inner.spectrum_count_hint()
    }

    /// The `<fileChecksum>` of an `indexedmzML` file
    pub fn read_checksum(&mut self) -> Result<Option<String>, ReadError> {
        Ok(self.inner.read_checksum()?)
    }

    pub fn into_inner(self) -> MzMLReaderType<fs::File> {
        self.inner
    }
}

/// An iterator over the spectra of a [`SpectrumReader`], created by
/// [`SpectrumReader::iter`]. Corrupt spectra are yielded as errors and
/// iteration continues past them.
#[derive(Debug)]
pub struct SpectrumIter<'a> {
    reader: &'a mut SpectrumReader,
}

impl Iterator for SpectrumIter<'_> {
    type Item = Result<Spectrum, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next().transpose()
    }
}
