//! `mzstream` reads mass spectra from mzML and indexedmzML files one at a
//! time, without loading the whole file.
//!
//! ```no_run
//! use mzstream::prelude::*;
//! use mzstream::SpectrumReader;
//!
//! # fn main() -> std::io::Result<()> {
//! let mut reader = SpectrumReader::open("./test/data/first_ms2.mzML")?;
//! while let Some(spectrum) = reader.next()? {
//!     if let Some(mz) = spectrum.precursor().and_then(|p| p.selected_mz()) {
//!         println!("{} selected {mz}", spectrum.id());
//!     }
//!     let signal = spectrum.signal()?;
//!     println!("{} has {} points", spectrum.id(), signal.len());
//! }
//! # Ok(())
//! # }
//! ```
pub mod io;
pub mod meta;
pub mod params;
pub mod prelude;
pub mod spectrum;

#[cfg(test)]
pub(crate) mod test_data;

pub use crate::io::mzml::MzMLReader;
pub use crate::io::{OpenError, ReadError, SpectrumReader, SpectrumReaderBuilder};

pub use crate::spectrum::{Precursor, SignalData, Spectrum, SpectrumLike};
