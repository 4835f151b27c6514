use std::io;

use log::warn;
use thiserror::Error;

use super::OffsetIndex;
use crate::spectrum::{Spectrum, SpectrumLike};

/// A base trait defining the behaviors of a source of spectra.
///
/// A [`SpectrumSource`] is an [`Iterator`] of [`Spectrum`] that can also be
/// queried out of order through its [`OffsetIndex`].
pub trait SpectrumSource: Iterator<Item = Spectrum> {
    /// Rewind the current position of the source to the first spectrum
    fn reset(&mut self);

    /// Retrieve a spectrum by it's native ID
    fn get_spectrum_by_id(&mut self, id: &str) -> Option<Spectrum>;

    /// Retrieve a spectrum by it's integer index
    fn get_spectrum_by_index(&mut self, index: usize) -> Option<Spectrum>;

    /// Retrieve a spectrum by its scan start time, in minutes. The spectrum
    /// whose start time is closest to `time` is returned.
    ///
    /// Spectra are assumed to be in acquisition order, so this is a binary search.
    fn get_spectrum_by_time(&mut self, time: f64) -> Option<Spectrum> {
        let n = self.len();
        if n == 0 && !self.get_index().init {
            warn!("Attempting to use `get_spectrum_by_time` when the spectrum index has not been initialized.");
            return None;
        }
        let mut lo: usize = 0;
        let mut hi: usize = n;

        let mut best_error: f64 = f64::INFINITY;
        let mut best_match: Option<Spectrum> = None;

        while hi != lo {
            let mid = (hi + lo) / 2;
            let scan = self.get_spectrum_by_index(mid)?;
            let Some(scan_time) = scan.start_time() else {
                warn!("Spectrum {} has no start time, stopping time search", scan.id());
                return best_match;
            };
            let err = (scan_time - time).abs();
            let overshot = scan_time > time;

            if err < best_error {
                best_error = err;
                best_match = Some(scan);
            }
            if hi.saturating_sub(1) == lo {
                return best_match;
            } else if overshot {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        best_match
    }

    /// Retrieve the number of spectra in source file, usually by getting
    /// the length of the index. If the index isn't initialized, this will
    /// be 0.
    fn len(&self) -> usize {
        self.get_index().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Access the spectrum offset index to enumerate all spectra by ID
    fn get_index(&self) -> &OffsetIndex;

    /// Set the spectrum offset index. This method shouldn't be needed if not writing
    /// a new adapter
    fn set_index(&mut self, index: OffsetIndex);

    /// Helper method to support seeking to an ID
    fn _offset_of_id(&self, id: &str) -> Option<u64> {
        self.get_index().get(id)
    }

    /// Helper method to support seeking to an index
    fn _offset_of_index(&self, index: usize) -> Option<u64> {
        self.get_index()
            .get_index(index)
            .map(|(_id, offset)| offset)
    }

    /// Helper method to support seeking to a specific time.
    /// Considerably more complex than seeking by ID or index.
    fn _offset_of_time(&mut self, time: f64) -> Option<u64> {
        match self.get_spectrum_by_time(time) {
            Some(scan) => self._offset_of_index(scan.index()),
            None => None,
        }
    }

    /// Replace the offset index with one previously saved with [`SpectrumSource::write_index_json`]
    #[cfg(feature = "serde")]
    fn read_index_json<R: io::Read>(&mut self, reader: R) -> Result<&Self, serde_json::Error>
    where
        Self: Sized,
    {
        let index = OffsetIndex::from_reader(reader)?;
        self.set_index(index);
        Ok(self)
    }

    /// Save the offset index as JSON so it need not be rebuilt
    #[cfg(feature = "serde")]
    fn write_index_json<W: io::Write>(&self, writer: W) -> Result<&Self, serde_json::Error>
    where
        Self: Sized,
    {
        self.get_index().to_writer(writer)?;
        Ok(self)
    }
}

/// Errors that may occur when reading a spectrum from a [`RandomAccessSpectrumIterator`]
#[derive(Debug, Error)]
pub enum SpectrumAccessError {
    /// An undetermined error failing to locate the requested spectrum
    #[error("The requested spectrum was not found")]
    SpectrumNotFound,
    /// An error resolving a spectrum by it's native ID
    #[error("The requested spectrum native ID {0} was not found")]
    SpectrumIdNotFound(String),
    /// An error resolving a spectrum by it's index
    #[error("The requested spectrum index {0} was not found")]
    SpectrumIndexNotFound(usize),
    /// An I/O error prevented reading the spectrum, even if it could be found.
    #[error("I/O error occurred while reading: {0:?}")]
    IOError(#[source] Option<io::Error>),
}

impl From<SpectrumAccessError> for io::Error {
    fn from(value: SpectrumAccessError) -> Self {
        let s = value.to_string();
        match value {
            SpectrumAccessError::SpectrumNotFound
            | SpectrumAccessError::SpectrumIdNotFound(_)
            | SpectrumAccessError::SpectrumIndexNotFound(_) => {
                io::Error::new(io::ErrorKind::NotFound, s)
            }
            SpectrumAccessError::IOError(e) => match e {
                Some(e) => e,
                None => io::Error::new(io::ErrorKind::Other, s),
            },
        }
    }
}

/// An extension of [`SpectrumSource`] that supports relocatable iteration relative to a
/// specific spectrum coordinate or identifier.
pub trait RandomAccessSpectrumIterator: SpectrumSource {
    /// Start iterating from the spectrum whose native ID matches `id`
    fn start_from_id(&mut self, id: &str) -> Result<&mut Self, SpectrumAccessError>;

    /// Start iterating from the spectrum whose index is `index`
    fn start_from_index(&mut self, index: usize) -> Result<&mut Self, SpectrumAccessError>;

    /// Start iterating from the spectrum starting closest to `time`
    fn start_from_time(&mut self, time: f64) -> Result<&mut Self, SpectrumAccessError>;
}
