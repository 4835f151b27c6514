use std::sync::OnceLock;

use crate::io::{Corruption, ReadError};
use crate::params::{Param, ParamDescribed, ParamList};
use crate::spectrum::bindata::{ArrayRetrievalError, BinaryArrayMap};
use crate::spectrum::scan_properties::{
    Acquisition, Precursor, ScanPolarity, SignalContinuity, SpectrumDescription,
};
use crate::spectrum::signal::{decode_signal, SignalData, SignalState};

/// A trait for providing a uniform delegated access to spectrum metadata
pub trait SpectrumLike: ParamDescribed {
    /// The method to access the spectrum description itself, which supplies
    /// the data for most other methods on this trait.
    fn description(&self) -> &SpectrumDescription;

    /// The native ID of the spectrum, verbatim from the file
    #[inline]
    fn id(&self) -> &str {
        &self.description().id
    }

    /// The zero-based position of the spectrum in its file
    #[inline]
    fn index(&self) -> usize {
        self.description().index
    }

    #[inline]
    fn ms_level(&self) -> u8 {
        self.description().ms_level
    }

    /// The scan start time of the first scan event, in minutes
    #[inline]
    fn start_time(&self) -> Option<f64> {
        self.description().acquisition.start_time()
    }

    #[inline]
    fn acquisition(&self) -> &Acquisition {
        &self.description().acquisition
    }

    /// The precursor of an MSn spectrum. Always absent for MS1 spectra.
    #[inline]
    fn precursor(&self) -> Option<&Precursor> {
        let desc = self.description();
        if desc.ms_level < 2 {
            None
        } else {
            desc.precursor.as_ref()
        }
    }

    #[inline]
    fn polarity(&self) -> ScanPolarity {
        self.description().polarity
    }

    #[inline]
    fn signal_continuity(&self) -> SignalContinuity {
        self.description().signal_continuity
    }

    #[inline]
    fn is_profile(&self) -> bool {
        self.signal_continuity() == SignalContinuity::Profile
    }
}

/// One spectrum read from a file. Its metadata is decoded up front while the
/// signal arrays stay encoded until [`Spectrum::signal`] is first called.
///
/// A `Spectrum` owns all of its data, so it can outlive the reader that
/// produced it and be shared between threads. Concurrent first calls to
/// [`Spectrum::signal`] decode only once.
#[derive(Debug, Default, Clone)]
pub struct Spectrum {
    pub description: SpectrumDescription,
    pub arrays: BinaryArrayMap,
    /// The `defaultArrayLength` attribute, the expected number of points
    pub default_array_length: usize,
    signal: OnceLock<Result<SignalData, ArrayRetrievalError>>,
}

impl Spectrum {
    pub fn new(
        description: SpectrumDescription,
        arrays: BinaryArrayMap,
        default_array_length: usize,
    ) -> Self {
        Self {
            description,
            arrays,
            default_array_length,
            signal: OnceLock::new(),
        }
    }

    pub fn arrays(&self) -> &BinaryArrayMap {
        &self.arrays
    }

    fn decoded(&self) -> &Result<SignalData, ArrayRetrievalError> {
        self.signal
            .get_or_init(|| decode_signal(&self.arrays, self.default_array_length))
    }

    /// Decode the signal arrays on first call, and return the cached result
    /// on every later call.
    ///
    /// A payload that cannot be decoded is reported as [`ReadError::Corrupt`]
    /// every time this is called.
    pub fn signal(&self) -> Result<&SignalData, ReadError> {
        self.decoded().as_ref().map_err(|e| ReadError::Corrupt {
            context: format!("signal of spectrum {}", self.description.id),
            source: Corruption::Signal(e.clone()),
        })
    }

    pub fn signal_state(&self) -> SignalState<'_> {
        match self.signal.get() {
            None => SignalState::Undecoded,
            Some(Ok(data)) => SignalState::Decoded(data),
            Some(Err(e)) => SignalState::Failed(e),
        }
    }

    /// Take ownership of the decoded signal, decoding it if needed
    pub fn into_signal(mut self) -> Result<SignalData, ReadError> {
        let _ = self.decoded();
        let id = std::mem::take(&mut self.description.id);
        match self.signal.take() {
            Some(Ok(data)) => Ok(data),
            Some(Err(e)) => Err(ReadError::Corrupt {
                context: format!("signal of spectrum {}", id),
                source: Corruption::Signal(e),
            }),
            None => Ok(SignalData::default()),
        }
    }
}

impl PartialEq for Spectrum {
    fn eq(&self, other: &Self) -> bool {
        self.description == other.description
            && self.arrays == other.arrays
            && self.default_array_length == other.default_array_length
    }
}

impl ParamDescribed for Spectrum {
    fn params(&self) -> &[Param] {
        &self.description.params
    }

    fn params_mut(&mut self) -> &mut ParamList {
        &mut self.description.params
    }
}

impl SpectrumLike for Spectrum {
    #[inline]
    fn description(&self) -> &SpectrumDescription {
        &self.description
    }
}
