//! The spectrum data model: descriptive metadata, precursor information and
//! the lazily decoded signal.
pub mod bindata;
pub mod scan_properties;
pub mod signal;
pub mod spectrum_types;

pub use crate::spectrum::bindata::{
    ArrayRetrievalError, ArrayType, BinaryArrayMap, BinaryCompressionType, BinaryDataArrayType,
    DataArray,
};
pub use crate::spectrum::scan_properties::*;
pub use crate::spectrum::signal::{SignalData, SignalState};
pub use crate::spectrum::spectrum_types::{Spectrum, SpectrumLike};
