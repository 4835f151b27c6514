//! Reading mzML files: the [`SpectrumReader`] facade, the streaming
//! [`MzMLReaderType`] parser beneath it, and the offset index used for
//! random access.

pub(crate) mod compression;
pub mod infer_format;
pub mod mzml;
mod offset_index;
mod spectrum_reader;
pub mod traits;

pub use crate::io::infer_format::{infer_from_path, infer_from_stream, MassSpectrometryFormat};
pub use crate::io::mzml::{MzMLIndexingError, MzMLParserError, MzMLReader, MzMLReaderType};
pub use crate::io::offset_index::OffsetIndex;
pub use crate::io::spectrum_reader::{
    Corruption, OpenError, ReadError, SpectrumIter, SpectrumKey, SpectrumReader,
    SpectrumReaderBuilder,
};
pub use crate::io::traits::{RandomAccessSpectrumIterator, SpectrumAccessError, SpectrumSource};
