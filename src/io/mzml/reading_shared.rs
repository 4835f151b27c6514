use std::collections::HashMap;
use std::io::{self, prelude::*, SeekFrom};
use std::mem;

use log::warn;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesEnd, BytesStart, BytesText};
use quick_xml::Error as XMLError;

use thiserror::Error;

use crate::io::OffsetIndex;
use crate::meta::{FileDescription, MassSpectrometryRun, SourceFile};
use crate::params::{
    curie_to_num, ControlledVocabulary, Param, ParamDescribed, ParamList, ParamValueParseError,
    Unit,
};
use crate::spectrum::bindata::Bytes;

/// Referenceable parameter groups declared in the header, by id
pub type ParamGroups = HashMap<String, ParamList>;

/**
The different states the [`MzMLReaderType`](super::MzMLReaderType) can enter while parsing
different phases of the document. Most of these only matter when reporting where in the
document an error occurred.
*/
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub enum MzMLParserState {
    Start = 0,
    Resume,

    // Top-level metadata
    CVList,
    FileDescription,
    FileContents,
    SourceFileList,
    SourceFile,

    ReferenceParamGroupList,
    ReferenceParamGroup,

    SoftwareList,
    InstrumentConfigurationList,
    DataProcessingList,

    Run,

    // Spectrum list elements
    Spectrum,
    SpectrumDone,

    SpectrumList,
    SpectrumListDone,

    BinaryDataArrayList,
    BinaryDataArray,
    Binary,

    ScanList,
    Scan,
    ScanWindowList,
    ScanWindow,

    PrecursorList,
    Precursor,
    IsolationWindow,
    SelectedIonList,
    SelectedIon,
    Activation,
    ProductList,
    Product,

    ParserError,
    EOF,
}

/**
All the ways that mzML parsing can go wrong
*/
#[derive(Debug, Error)]
pub enum MzMLParserError {
    #[error("An error occurred outside of normal conditions {0:?}")]
    UnknownError(MzMLParserState),
    #[error("An incomplete spectrum was parsed")]
    IncompleteSpectrum,
    #[error("An incomplete element {0} was encountered in {1:?}")]
    IncompleteElementError(String, MzMLParserState),
    #[error("An XML error {1:?} was encountered in {0:?}")]
    XMLError(MzMLParserState, #[source] XMLError),
    #[error("An IO error {1} was encountered in {0:?}")]
    IOError(MzMLParserState, #[source] io::Error),
    #[error("The <{0}> element is missing its required `{1}` attribute")]
    MissingAttribute(&'static str, &'static str),
    #[error("Could not parse attribute {0}={1:?} in {2:?}")]
    InvalidAttribute(&'static str, String, MzMLParserState),
    #[error("Invalid parameter value in {0:?}: {1}")]
    InvalidParamValue(MzMLParserState, #[source] ParamValueParseError),
    #[error("Reference to undeclared param group {0:?} in {1:?}")]
    UnknownParamGroup(String, MzMLParserState),
    #[error("Spectrum {0} does not state its MS level")]
    MissingMSLevel(String),
    #[error("The document has no <run> element")]
    NoRunFound,
    #[error("The {0} section is over")]
    SectionOver(&'static str),
    #[error("Reached the end of the file")]
    EOF,
}

impl MzMLParserError {
    /// Whether this marks the end of the spectra rather than a failure
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, Self::EOF | Self::SectionOver(_))
    }
}

impl From<MzMLParserError> for io::Error {
    fn from(value: MzMLParserError) -> Self {
        match value {
            MzMLParserError::IOError(_, ref e) => io::Error::new(e.kind(), value),
            MzMLParserError::EOF => io::Error::new(io::ErrorKind::UnexpectedEof, value),
            _ => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

pub type ParserResult = Result<MzMLParserState, MzMLParserError>;

/**
Common XML error handling behaviors
*/
pub trait XMLParseBase {
    fn handle_xml_error(&self, error: XMLError, state: MzMLParserState) -> MzMLParserError {
        MzMLParserError::XMLError(state, error)
    }

    /// Unescape an attribute's value into an owned string
    fn attribute_value(attr: &Attribute, state: MzMLParserState) -> Result<String, MzMLParserError> {
        attr.unescape_value()
            .map(|v| v.to_string())
            .map_err(|e| MzMLParserError::XMLError(state, e))
    }

    /// Parse an attribute's value, reporting it by name on failure
    fn parse_attribute<T: std::str::FromStr>(
        attr: &Attribute,
        name: &'static str,
        state: MzMLParserState,
    ) -> Result<T, MzMLParserError> {
        let value = Self::attribute_value(attr, state)?;
        value
            .trim()
            .parse::<T>()
            .map_err(|_| MzMLParserError::InvalidAttribute(name, value, state))
    }
}

/**
Common `CVParam` parsing behaviors
*/
pub trait CVParamParse: XMLParseBase {
    fn handle_param(
        event: &BytesStart,
        _reader_position: usize,
        state: MzMLParserState,
    ) -> Result<Param, MzMLParserError> {
        let mut param = Param::new();
        let mut unit_name = None;
        let mut unit_accession = None;
        for attr_parsed in event.attributes() {
            match attr_parsed {
                Ok(attr) => match attr.key.as_ref() {
                    b"name" => {
                        param.name = Self::attribute_value(&attr, state)?;
                    }
                    b"value" => {
                        param.value = Self::attribute_value(&attr, state)?;
                    }
                    b"cvRef" => {
                        let cv_id = Self::attribute_value(&attr, state)?;
                        param.controlled_vocabulary = cv_id
                            .parse::<ControlledVocabulary>()
                            .ok()
                            .and_then(|cv| cv.as_option());
                    }
                    b"accession" => {
                        let v = Self::attribute_value(&attr, state)?;
                        let (cv, acc) = curie_to_num(&v);
                        param.accession = acc;
                        if param.controlled_vocabulary.is_none() {
                            param.controlled_vocabulary = cv.and_then(|cv| cv.as_option());
                        }
                    }
                    b"unitName" => {
                        let v = Self::attribute_value(&attr, state)?;
                        unit_name = Some(Unit::from_name(&v));
                    }
                    b"unitAccession" => {
                        let v = Self::attribute_value(&attr, state)?;
                        unit_accession = Some(Unit::from_accession(&v));
                    }
                    _ => {}
                },
                Err(msg) => return Err(MzMLParserError::XMLError(state, msg.into())),
            }
        }
        // The accession is authoritative, the name is a fallback
        param.unit = match (unit_accession, unit_name) {
            (Some(unit), _) if unit != Unit::Unknown => unit,
            (_, Some(unit)) => unit,
            _ => Unit::Unknown,
        };
        Ok(param)
    }

    /// Look up the group a `<referenceableParamGroupRef>` points to
    fn handle_param_group_ref<'g>(
        event: &BytesStart,
        groups: &'g ParamGroups,
        state: MzMLParserState,
    ) -> Result<&'g [Param], MzMLParserError> {
        for attr_parsed in event.attributes() {
            match attr_parsed {
                Ok(attr) => {
                    if attr.key.as_ref() == b"ref" {
                        let group_id = Self::attribute_value(&attr, state)?;
                        return match groups.get(&group_id) {
                            Some(params) => Ok(params),
                            None => Err(MzMLParserError::UnknownParamGroup(group_id, state)),
                        };
                    }
                }
                Err(msg) => return Err(MzMLParserError::XMLError(state, msg.into())),
            }
        }
        Err(MzMLParserError::MissingAttribute(
            "referenceableParamGroupRef",
            "ref",
        ))
    }
}

pub trait MzMLSAX {
    fn start_element(&mut self, event: &BytesStart, state: MzMLParserState) -> ParserResult;

    fn empty_element(
        &mut self,
        event: &BytesStart,
        state: MzMLParserState,
        reader_position: usize,
    ) -> ParserResult;

    fn end_element(&mut self, event: &BytesEnd, state: MzMLParserState) -> ParserResult;

    fn text(&mut self, event: &BytesText, state: MzMLParserState) -> ParserResult;
}

#[derive(Debug, Error)]
pub enum MzMLIndexingError {
    #[error("Offset index not found")]
    OffsetNotFound,
    #[error("Offset index at {0} lies outside of the file")]
    OffsetOutOfBounds(u64),
    #[error("The offset index ended before </indexList>")]
    IncompleteIndex,
    #[error("XML error {0} occurred while reading out mzML index")]
    XMLError(
        #[from]
        #[source]
        XMLError,
    ),
    #[error("IO error {0} occurred while reading out mzML index")]
    IOError(
        #[from]
        #[source]
        io::Error,
    ),
}

impl From<MzMLIndexingError> for io::Error {
    fn from(value: MzMLIndexingError) -> Self {
        match value {
            MzMLIndexingError::IOError(e) => e,
            _ => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

/// How many bytes from the end of the file to search for the trailer elements
pub(crate) const TRAILER_SEARCH_SIZE: u64 = 200;

/// Read the last [`TRAILER_SEARCH_SIZE`] bytes of `reader` and return the first
/// capture group of `pattern` in them, if any. The stream position is not restored.
pub(crate) fn search_trailer<R: Read + Seek>(
    reader: &mut R,
    pattern: &str,
) -> io::Result<Option<String>> {
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(end.saturating_sub(TRAILER_SEARCH_SIZE)))?;
    let mut buf = Bytes::new();
    reader.read_to_end(&mut buf)?;
    let pattern =
        regex::Regex::new(pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let hit = pattern
        .captures(&String::from_utf8_lossy(&buf))
        .and_then(|captures| captures.get(1).map(|m| m.as_str().to_string()));
    Ok(hit)
}

/// A SAX-style parser for the `<indexList>` trailer of an `indexedmzML` document
#[derive(Debug, Default, Clone)]
pub struct IndexedMzMLIndexExtractor {
    pub spectrum_index: OffsetIndex,
    last_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexParserState {
    Start,
    SpectrumIndexList,
    /// Any index other than the spectrum index, e.g. for chromatograms
    OtherIndexList,
    Done,
}

impl XMLParseBase for IndexedMzMLIndexExtractor {}

impl IndexedMzMLIndexExtractor {
    pub fn new() -> IndexedMzMLIndexExtractor {
        IndexedMzMLIndexExtractor {
            spectrum_index: OffsetIndex::new("spectrum".into()),
            last_id: String::new(),
        }
    }

    /// Find the byte offset of `<indexList>` from the `<indexListOffset>`
    /// element near the end of the stream
    pub fn find_offset_from_reader<R: Read + Seek>(
        &self,
        reader: &mut R,
    ) -> io::Result<Option<u64>> {
        let hit = search_trailer(reader, "<indexListOffset>(\\d+)</indexListOffset>")?;
        Ok(hit.and_then(|offset| offset.parse::<u64>().ok()))
    }

    pub fn start_element(
        &mut self,
        event: &BytesStart,
        state: IndexParserState,
    ) -> Result<IndexParserState, XMLError> {
        match event.name().as_ref() {
            b"offset" => {
                for attr_parsed in event.attributes() {
                    let attr = attr_parsed?;
                    if attr.key.as_ref() == b"idRef" {
                        self.last_id = attr.unescape_value()?.to_string();
                    }
                }
            }
            b"index" => {
                for attr_parsed in event.attributes() {
                    let attr = attr_parsed?;
                    if attr.key.as_ref() == b"name" {
                        return match attr.unescape_value()?.as_ref() {
                            "spectrum" => Ok(IndexParserState::SpectrumIndexList),
                            _ => Ok(IndexParserState::OtherIndexList),
                        };
                    }
                }
            }
            _ => {}
        }
        Ok(state)
    }

    pub fn end_element(
        &mut self,
        event: &BytesEnd,
        state: IndexParserState,
    ) -> Result<IndexParserState, XMLError> {
        match event.name().as_ref() {
            b"index" => Ok(IndexParserState::Start),
            b"indexList" => Ok(IndexParserState::Done),
            _ => Ok(state),
        }
    }

    pub fn text(
        &mut self,
        event: &BytesText,
        state: IndexParserState,
    ) -> Result<IndexParserState, XMLError> {
        if state == IndexParserState::SpectrumIndexList {
            let bin = event.unescape()?;
            if let Ok(offset) = bin.trim().parse::<u64>() {
                if !self.last_id.is_empty() {
                    let key = mem::take(&mut self.last_id);
                    self.spectrum_index.insert(key, offset);
                } else {
                    warn!("Out of order text in index")
                }
            }
        }
        Ok(state)
    }
}

/**A SAX-style parser for building up the metadata section prior to the `<spectrumList>` element
of an mzML file.*/
#[derive(Debug, Default)]
pub struct FileMetadataBuilder {
    pub file_description: FileDescription,
    pub reference_param_groups: ParamGroups,
    pub last_group: String,
    pub run: Option<MassSpectrometryRun>,
    pub num_spectra: Option<u64>,
}

impl XMLParseBase for FileMetadataBuilder {}
impl CVParamParse for FileMetadataBuilder {}

impl FileMetadataBuilder {
    fn start_run(&mut self, event: &BytesStart, state: MzMLParserState) -> Result<(), MzMLParserError> {
        let mut run = MassSpectrometryRun::default();
        for attr_parsed in event.attributes() {
            match attr_parsed {
                Ok(attr) => match attr.key.as_ref() {
                    b"id" => run.id = Some(Self::attribute_value(&attr, state)?),
                    b"defaultInstrumentConfigurationRef" => {
                        run.default_instrument_configuration =
                            Some(Self::attribute_value(&attr, state)?)
                    }
                    b"defaultSourceFileRef" => {
                        run.default_source_file = Some(Self::attribute_value(&attr, state)?)
                    }
                    b"startTimeStamp" => {
                        run.start_time = Some(Self::attribute_value(&attr, state)?)
                    }
                    _ => {}
                },
                Err(msg) => return Err(self.handle_xml_error(msg.into(), state)),
            }
        }
        self.run = Some(run);
        Ok(())
    }

    fn start_spectrum_list(
        &mut self,
        event: &BytesStart,
        state: MzMLParserState,
    ) -> Result<(), MzMLParserError> {
        for attr_parsed in event.attributes() {
            match attr_parsed {
                Ok(attr) => {
                    if attr.key.as_ref() == b"count" {
                        self.num_spectra = Some(Self::parse_attribute(&attr, "count", state)?);
                    }
                }
                Err(msg) => return Err(self.handle_xml_error(msg.into(), state)),
            }
        }
        Ok(())
    }

    pub fn start_element(&mut self, event: &BytesStart, state: MzMLParserState) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            b"cvList" => return Ok(MzMLParserState::CVList),
            b"fileDescription" => return Ok(MzMLParserState::FileDescription),
            b"fileContent" => return Ok(MzMLParserState::FileContents),
            b"sourceFileList" => return Ok(MzMLParserState::SourceFileList),
            b"sourceFile" => {
                let mut source_file = SourceFile::default();
                for attr_parsed in event.attributes() {
                    match attr_parsed {
                        Ok(attr) => match attr.key.as_ref() {
                            b"id" => source_file.id = Self::attribute_value(&attr, state)?,
                            b"name" => source_file.name = Self::attribute_value(&attr, state)?,
                            b"location" => {
                                source_file.location = Self::attribute_value(&attr, state)?
                            }
                            _ => {}
                        },
                        Err(msg) => {
                            return Err(self.handle_xml_error(msg.into(), state));
                        }
                    }
                }
                self.file_description.source_files.push(source_file);
                return Ok(MzMLParserState::SourceFile);
            }
            b"referenceableParamGroupList" => {
                return Ok(MzMLParserState::ReferenceParamGroupList);
            }
            b"referenceableParamGroup" => {
                for attr_parsed in event.attributes() {
                    match attr_parsed {
                        Ok(attr) => {
                            if attr.key.as_ref() == b"id" {
                                let key = Self::attribute_value(&attr, state)?;
                                self.reference_param_groups.entry(key.clone()).or_default();
                                self.last_group = key;
                            }
                        }
                        Err(msg) => {
                            return Err(self.handle_xml_error(msg.into(), state));
                        }
                    }
                }
                return Ok(MzMLParserState::ReferenceParamGroup);
            }
            b"softwareList" => return Ok(MzMLParserState::SoftwareList),
            b"instrumentConfigurationList" => {
                return Ok(MzMLParserState::InstrumentConfigurationList)
            }
            b"dataProcessingList" => return Ok(MzMLParserState::DataProcessingList),
            b"run" => {
                self.start_run(event, state)?;
                return Ok(MzMLParserState::Run);
            }
            b"spectrumList" => {
                self.start_spectrum_list(event, state)?;
                return Ok(MzMLParserState::SpectrumList);
            }
            b"chromatogramList" => return Ok(MzMLParserState::SpectrumListDone),
            _ => {}
        }

        Ok(state)
    }

    pub fn fill_param_into(&mut self, param: Param, state: MzMLParserState) {
        match state {
            MzMLParserState::SourceFile => {
                if let Some(sf) = self.file_description.source_files.last_mut() {
                    sf.add_param(param)
                }
            }
            MzMLParserState::FileContents => {
                self.file_description.add_param(param);
            }
            MzMLParserState::ReferenceParamGroup => {
                self.reference_param_groups
                    .entry(self.last_group.clone())
                    .or_default()
                    .push(param);
            }
            _ => {}
        }
    }

    pub fn empty_element(
        &mut self,
        event: &BytesStart,
        state: MzMLParserState,
        reader_position: usize,
    ) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            b"cvParam" | b"userParam" => {
                let param = Self::handle_param(event, reader_position, state)?;
                self.fill_param_into(param, state);
            }
            b"referenceableParamGroupRef" => {
                let group = Self::handle_param_group_ref(event, &self.reference_param_groups, state)
                    .map(|group| group.to_vec());
                match group {
                    Ok(group) => {
                        for param in group {
                            self.fill_param_into(param, state)
                        }
                    }
                    // Header sections are informational, a dangling reference there is not fatal
                    Err(e) => warn!("{e}"),
                }
            }
            b"spectrumList" => {
                self.start_spectrum_list(event, state)?;
                return Ok(MzMLParserState::SpectrumListDone);
            }
            b"run" => {
                self.start_run(event, state)?;
                return Ok(MzMLParserState::SpectrumListDone);
            }
            _ => {}
        }
        Ok(state)
    }

    pub fn end_element(&mut self, event: &BytesEnd, state: MzMLParserState) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            b"cvList" => return Ok(MzMLParserState::Start),
            b"fileDescription" => return Ok(MzMLParserState::Start),
            b"fileContent" => return Ok(MzMLParserState::FileDescription),
            b"sourceFileList" => return Ok(MzMLParserState::FileDescription),
            b"sourceFile" => return Ok(MzMLParserState::SourceFileList),
            b"referenceableParamGroup" => return Ok(MzMLParserState::ReferenceParamGroupList),
            b"referenceableParamGroupList"
            | b"softwareList"
            | b"instrumentConfigurationList"
            | b"dataProcessingList" => return Ok(MzMLParserState::Start),
            // A run without a spectrum list has nothing more to read
            b"run" => return Ok(MzMLParserState::SpectrumListDone),
            _ => {}
        }
        Ok(state)
    }

    pub fn text(&mut self, _event: &BytesText, state: MzMLParserState) -> ParserResult {
        Ok(state)
    }
}
