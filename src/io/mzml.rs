//! Implements a parser for the PSI-MS mzML and indexedmzML XML file formats
//! for representing raw and processed mass spectra.

mod reader;
mod reading_shared;

pub(crate) use crate::io::mzml::reader::is_mzml;
pub use crate::io::mzml::reader::{MzMLReader, MzMLReaderType, MzMLSpectrumBuilder};
pub use crate::io::mzml::reading_shared::{
    CVParamParse, FileMetadataBuilder, IndexedMzMLIndexExtractor, MzMLIndexingError,
    MzMLParserError, MzMLParserState, MzMLSAX, ParamGroups, ParserResult, XMLParseBase,
};
