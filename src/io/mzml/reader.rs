use std::io::{self, prelude::*, BufReader, SeekFrom};
use std::mem;

use log::{debug, trace, warn};
use memchr::memmem;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Error as XMLError, Reader};

use super::reading_shared::{
    search_trailer, CVParamParse, FileMetadataBuilder, IndexParserState,
    IndexedMzMLIndexExtractor, MzMLIndexingError, MzMLParserError, MzMLParserState, MzMLSAX,
    ParamGroups, ParserResult, XMLParseBase,
};
use crate::io::traits::{RandomAccessSpectrumIterator, SpectrumAccessError, SpectrumSource};
use crate::io::OffsetIndex;
use crate::meta::{FileDescription, MassSpectrometryRun};
use crate::params::{Param, ParamDescribed, ParamList, Unit};
use crate::spectrum::bindata::{
    ArrayType, BinaryArrayMap, BinaryCompressionType, BinaryDataArrayType, Bytes, DataArray,
};
use crate::spectrum::scan_properties::{
    Acquisition, Activation, IsolationWindowTerms, Precursor, ScanEvent, ScanPolarity,
    ScanWindow, SelectedIon, SignalContinuity, SpectrumDescription,
};
use crate::spectrum::{Spectrum, SpectrumLike};

const BUFFER_SIZE: usize = 10000;

/// Bytes read per step while scanning forward for the next spectrum
const RESYNC_CHUNK_SIZE: usize = 8192;
/// Bytes carried between steps so a tag split across two reads is still found
const RESYNC_TAIL: usize = 16;

/// An accumulator for the attributes of a spectrum as it is read from an
/// mzML document.
///
/// While this type is public, it is unnecessary for most users. Instead
/// just use [`MzMLReaderType::read_next`].
#[derive(Debug)]
pub struct MzMLSpectrumBuilder<'a> {
    pub params: ParamList,
    pub acquisition: Acquisition,
    pub precursors: Vec<Precursor>,

    pub arrays: BinaryArrayMap,
    pub current_array: DataArray,

    pub index: Option<usize>,
    pub entry_id: Option<String>,
    pub default_array_length: Option<usize>,
    pub ms_level: Option<u8>,
    pub polarity: ScanPolarity,
    pub signal_continuity: SignalContinuity,
    is_ms1_spectrum: bool,
    isolation_window: IsolationWindowTerms,
    param_groups: &'a ParamGroups,
}

impl XMLParseBase for MzMLSpectrumBuilder<'_> {}
impl CVParamParse for MzMLSpectrumBuilder<'_> {}

impl<'a> MzMLSpectrumBuilder<'a> {
    pub fn new(param_groups: &'a ParamGroups) -> MzMLSpectrumBuilder<'a> {
        MzMLSpectrumBuilder {
            params: ParamList::new(),
            acquisition: Acquisition::default(),
            precursors: Vec::new(),
            arrays: BinaryArrayMap::new(),
            current_array: DataArray::new(),
            index: None,
            entry_id: None,
            default_array_length: None,
            ms_level: None,
            polarity: ScanPolarity::Unknown,
            signal_continuity: SignalContinuity::Unknown,
            is_ms1_spectrum: false,
            isolation_window: IsolationWindowTerms::default(),
            param_groups,
        }
    }

    /// Whether a `<spectrum>` start tag has been seen
    pub fn in_spectrum(&self) -> bool {
        self.entry_id.is_some() || self.index.is_some()
    }

    fn warning_context(&self) -> String {
        format!(
            "spectrum entry {} ({})",
            self.index.map(|i| i.to_string()).unwrap_or_default(),
            self.entry_id.as_deref().unwrap_or_default()
        )
    }

    fn scan_mut(&mut self) -> &mut ScanEvent {
        if self.acquisition.scans.is_empty() {
            self.acquisition.scans.push(ScanEvent::default());
        }
        let n = self.acquisition.scans.len();
        &mut self.acquisition.scans[n - 1]
    }

    fn scan_window_mut(&mut self) -> &mut ScanWindow {
        let event = self.scan_mut();
        if event.scan_windows.is_empty() {
            event.scan_windows.push(ScanWindow::default());
        }
        let n = event.scan_windows.len();
        &mut event.scan_windows[n - 1]
    }

    fn precursor_mut(&mut self) -> &mut Precursor {
        if self.precursors.is_empty() {
            self.precursors.push(Precursor::default());
        }
        let n = self.precursors.len();
        &mut self.precursors[n - 1]
    }

    fn selected_ion_mut(&mut self) -> &mut SelectedIon {
        let precursor = self.precursor_mut();
        if precursor.ions.is_empty() {
            precursor.ions.push(SelectedIon::default());
        }
        let n = precursor.ions.len();
        &mut precursor.ions[n - 1]
    }

    fn fill_spectrum(&mut self, param: Param, state: MzMLParserState) -> Result<(), MzMLParserError> {
        match param.name.as_str() {
            "ms level" => {
                let level = param
                    .to_i32()
                    .map_err(|e| MzMLParserError::InvalidParamValue(state, e))?;
                match u8::try_from(level) {
                    Ok(level) if level > 0 => self.ms_level = Some(level),
                    _ => {
                        return Err(MzMLParserError::InvalidAttribute(
                            "ms level",
                            param.value,
                            state,
                        ))
                    }
                }
            }
            "positive scan" => {
                self.polarity = ScanPolarity::Positive;
            }
            "negative scan" => {
                self.polarity = ScanPolarity::Negative;
            }
            "profile spectrum" => {
                self.signal_continuity = SignalContinuity::Profile;
            }
            "centroid spectrum" => {
                self.signal_continuity = SignalContinuity::Centroid;
            }
            "MS1 spectrum" => {
                self.is_ms1_spectrum = true;
                self.params.push(param);
            }
            _ => {
                self.params.push(param);
            }
        };
        Ok(())
    }

    /// Put a parameter into the current [`DataArray`], lifting the terms
    /// that describe its encoding into fields
    fn fill_binary_data_array(&mut self, param: Param) {
        let array = &mut self.current_array;
        let accession = match param.accession {
            Some(acc) if param.is_ms() => acc,
            _ => {
                array.add_param(param);
                return;
            }
        };
        if let Some(compression) = BinaryCompressionType::from_accession(accession) {
            array.compression = compression;
        } else if let Some(dtype) = BinaryDataArrayType::from_accession(accession) {
            array.dtype = dtype;
        } else if let Some(name) = ArrayType::from_accession(accession) {
            array.name = name;
            if param.unit != Unit::Unknown {
                array.unit = param.unit;
            } else {
                array.unit = array.name.default_unit();
            }
        } else if accession == 1000786 {
            // non-standard data array, named by its value
            array.name = ArrayType::nonstandard(&param.value);
            array.unit = param.unit;
        } else {
            array.add_param(param);
        }
    }

    fn fill_selected_ion(&mut self, param: Param, state: MzMLParserState) -> Result<(), MzMLParserError> {
        let invalid = |e| MzMLParserError::InvalidParamValue(state, e);
        match param.name.as_str() {
            "selected ion m/z" => {
                self.selected_ion_mut().mz = Some(param.to_f64().map_err(invalid)?);
            }
            "peak intensity" => {
                self.selected_ion_mut().intensity = Some(param.to_f32().map_err(invalid)?);
            }
            "charge state" => {
                self.selected_ion_mut().charge = Some(param.to_i32().map_err(invalid)?);
            }
            _ => {
                self.selected_ion_mut().add_param(param);
            }
        };
        Ok(())
    }

    /// Collect the isolation window terms, which are reconciled once the
    /// whole `<precursor>` has been read
    fn fill_isolation_window(&mut self, param: Param, state: MzMLParserState) -> Result<(), MzMLParserError> {
        let invalid = |e| MzMLParserError::InvalidParamValue(state, e);
        let window = &mut self.isolation_window;
        match param.name.as_str() {
            "isolation window target m/z" => {
                window.target = Some(param.to_f32().map_err(invalid)?);
            }
            "isolation window lower offset" => {
                window.lower_offset = Some(param.to_f32().map_err(invalid)?);
            }
            "isolation window upper offset" => {
                window.upper_offset = Some(param.to_f32().map_err(invalid)?);
            }
            "isolation window lower limit" => {
                window.lower_limit = Some(param.to_f32().map_err(invalid)?);
            }
            "isolation window upper limit" => {
                window.upper_limit = Some(param.to_f32().map_err(invalid)?);
            }
            _ => {
                self.precursor_mut().add_param(param);
            }
        }
        Ok(())
    }

    fn fill_scan_window(&mut self, param: Param, state: MzMLParserState) -> Result<(), MzMLParserError> {
        let invalid = |e| MzMLParserError::InvalidParamValue(state, e);
        match param.name.as_str() {
            "scan window lower limit" => {
                self.scan_window_mut().lower_bound = param.to_f32().map_err(invalid)?;
            }
            "scan window upper limit" => {
                self.scan_window_mut().upper_bound = param.to_f32().map_err(invalid)?;
            }
            _ => self.scan_mut().add_param(param),
        }
        Ok(())
    }

    fn fill_scan(&mut self, param: Param, state: MzMLParserState) -> Result<(), MzMLParserError> {
        let invalid = |e| MzMLParserError::InvalidParamValue(state, e);
        match param.name.as_str() {
            "scan start time" => {
                let value = param.to_f64().map_err(invalid)?;
                let value = match &param.unit {
                    Unit::Minute => value,
                    Unit::Second => value / 60.0,
                    Unit::Millisecond => value / 60000.0,
                    _ => {
                        warn!(
                            "Could not infer unit for {:?} for {}",
                            param,
                            self.warning_context()
                        );
                        value
                    }
                };
                self.scan_mut().start_time = Some(value);
            }
            "ion injection time" => {
                self.scan_mut().injection_time = Some(param.to_f32().map_err(invalid)?);
            }
            _ => self.scan_mut().add_param(param),
        }
        Ok(())
    }

    fn fill_activation(&mut self, param: Param, state: MzMLParserState) -> Result<(), MzMLParserError> {
        let activation = &mut self.precursor_mut().activation;
        if Activation::is_param_activation(&param) {
            activation.methods.push(param);
            return Ok(());
        }
        match param.name.as_str() {
            "collision energy" | "activation energy" => {
                if activation.energy.is_some() {
                    warn!("Multiple dissociation energies found, keeping the last");
                }
                activation.energy = Some(
                    param
                        .to_f32()
                        .map_err(|e| MzMLParserError::InvalidParamValue(state, e))?,
                );
            }
            _ => activation.add_param(param),
        }
        Ok(())
    }

    pub fn fill_param_into(&mut self, param: Param, state: MzMLParserState) -> Result<(), MzMLParserError> {
        match state {
            MzMLParserState::Spectrum => self.fill_spectrum(param, state)?,
            MzMLParserState::ScanList => self.acquisition.add_param(param),
            MzMLParserState::Scan | MzMLParserState::ScanWindowList => {
                self.fill_scan(param, state)?
            }
            MzMLParserState::ScanWindow => self.fill_scan_window(param, state)?,
            MzMLParserState::IsolationWindow => self.fill_isolation_window(param, state)?,
            MzMLParserState::SelectedIon | MzMLParserState::SelectedIonList => {
                self.fill_selected_ion(param, state)?
            }
            MzMLParserState::Activation => self.fill_activation(param, state)?,
            MzMLParserState::Precursor => self.precursor_mut().add_param(param),
            MzMLParserState::BinaryDataArray => self.fill_binary_data_array(param),
            _ => {}
        };
        Ok(())
    }

    /// Finish the spectrum. `ordinal` is used as the index when the
    /// `<spectrum>` element did not carry one.
    pub fn into_spectrum(self, ordinal: usize) -> Result<Spectrum, MzMLParserError> {
        let id = match self.entry_id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(MzMLParserError::MissingAttribute("spectrum", "id")),
        };
        let ms_level = match self.ms_level {
            Some(level) => level,
            None if self.is_ms1_spectrum => 1,
            None => return Err(MzMLParserError::MissingMSLevel(id)),
        };
        let default_array_length = self
            .default_array_length
            .ok_or(MzMLParserError::MissingAttribute("spectrum", "defaultArrayLength"))?;
        if self.precursors.len() > 1 {
            debug!(
                "{id} lists {} precursors, only the first is kept",
                self.precursors.len()
            );
        }
        let description = SpectrumDescription {
            id,
            index: self.index.unwrap_or(ordinal),
            ms_level,
            polarity: self.polarity,
            signal_continuity: self.signal_continuity,
            params: self.params,
            acquisition: self.acquisition,
            precursor: self.precursors.into_iter().next(),
        };
        Ok(Spectrum::new(description, self.arrays, default_array_length))
    }
}

impl MzMLSAX for MzMLSpectrumBuilder<'_> {
    fn start_element(&mut self, event: &BytesStart, state: MzMLParserState) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            b"spectrum" => {
                for attr_parsed in event.attributes() {
                    match attr_parsed {
                        Ok(attr) => match attr.key.as_ref() {
                            b"id" => {
                                let id = Self::attribute_value(&attr, state)?;
                                trace!("Stored spectrum id = {}", id);
                                self.entry_id = Some(id);
                            }
                            b"index" => {
                                self.index = Some(Self::parse_attribute(&attr, "index", state)?);
                            }
                            b"defaultArrayLength" => {
                                self.default_array_length = Some(Self::parse_attribute(
                                    &attr,
                                    "defaultArrayLength",
                                    state,
                                )?);
                            }
                            _ => {}
                        },
                        Err(msg) => {
                            return Err(self.handle_xml_error(msg.into(), state));
                        }
                    }
                }
                if self.entry_id.is_none() {
                    self.entry_id = Some(String::new());
                }
                return Ok(MzMLParserState::Spectrum);
            }
            b"spectrumList" => {
                return Ok(MzMLParserState::SpectrumList);
            }
            b"chromatogramList" => {
                return Ok(MzMLParserState::SpectrumListDone);
            }
            b"scanList" => {
                return Ok(MzMLParserState::ScanList);
            }
            b"scan" => {
                let mut scan_event = ScanEvent::default();
                for attr_parsed in event.attributes() {
                    match attr_parsed {
                        Ok(attr) => {
                            if attr.key.as_ref() == b"instrumentConfigurationRef" {
                                scan_event.instrument_configuration_id =
                                    Some(Self::attribute_value(&attr, state)?);
                            }
                        }
                        Err(msg) => {
                            return Err(self.handle_xml_error(msg.into(), state));
                        }
                    }
                }
                self.acquisition.scans.push(scan_event);
                return Ok(MzMLParserState::Scan);
            }
            b"scanWindow" => {
                self.scan_mut().scan_windows.push(ScanWindow::default());
                return Ok(MzMLParserState::ScanWindow);
            }
            b"scanWindowList" => {
                return Ok(MzMLParserState::ScanWindowList);
            }
            b"precursorList" => {
                return Ok(MzMLParserState::PrecursorList);
            }
            b"precursor" => {
                let mut precursor = Precursor::default();
                for attr_parsed in event.attributes() {
                    match attr_parsed {
                        Ok(attr) => {
                            if attr.key.as_ref() == b"spectrumRef" {
                                precursor.precursor_id = Some(Self::attribute_value(&attr, state)?);
                            }
                        }
                        Err(msg) => {
                            return Err(self.handle_xml_error(msg.into(), state));
                        }
                    }
                }
                self.precursors.push(precursor);
                self.isolation_window = IsolationWindowTerms::default();
                return Ok(MzMLParserState::Precursor);
            }
            b"isolationWindow" if state == MzMLParserState::Precursor => {
                return Ok(MzMLParserState::IsolationWindow);
            }
            b"selectedIonList" => {
                return Ok(MzMLParserState::SelectedIonList);
            }
            b"selectedIon" => {
                self.precursor_mut().ions.push(SelectedIon::default());
                return Ok(MzMLParserState::SelectedIon);
            }
            b"activation" => {
                return Ok(MzMLParserState::Activation);
            }
            b"productList" => {
                return Ok(MzMLParserState::ProductList);
            }
            b"product" => {
                return Ok(MzMLParserState::Product);
            }
            b"binaryDataArrayList" => {
                return Ok(MzMLParserState::BinaryDataArrayList);
            }
            b"binaryDataArray" => {
                self.current_array = DataArray::new();
                for attr_parsed in event.attributes() {
                    match attr_parsed {
                        Ok(attr) => {
                            if attr.key.as_ref() == b"arrayLength" {
                                self.current_array.item_count =
                                    Some(Self::parse_attribute(&attr, "arrayLength", state)?);
                            }
                        }
                        Err(msg) => {
                            return Err(self.handle_xml_error(msg.into(), state));
                        }
                    }
                }
                return Ok(MzMLParserState::BinaryDataArray);
            }
            b"binary" => {
                return Ok(MzMLParserState::Binary);
            }
            _ => {}
        };
        Ok(state)
    }

    fn empty_element(
        &mut self,
        event: &BytesStart,
        state: MzMLParserState,
        reader_position: usize,
    ) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            b"cvParam" | b"userParam" => {
                let param = Self::handle_param(event, reader_position, state)?;
                self.fill_param_into(param, state)?;
            }
            b"referenceableParamGroupRef" => {
                let group = Self::handle_param_group_ref(event, self.param_groups, state)?;
                for param in group.iter().cloned() {
                    self.fill_param_into(param, state)?;
                }
            }
            b"spectrum" => {
                self.start_element(event, state)?;
                return Ok(MzMLParserState::SpectrumDone);
            }
            b"scan" => {
                self.start_element(event, state)?;
                return Ok(MzMLParserState::ScanList);
            }
            b"spectrumList" => return Ok(MzMLParserState::SpectrumListDone),
            _ => {}
        }
        Ok(state)
    }

    fn end_element(&mut self, event: &BytesEnd, state: MzMLParserState) -> ParserResult {
        let elt_name = event.name();
        match elt_name.as_ref() {
            b"spectrum" => return Ok(MzMLParserState::SpectrumDone),
            b"scanList" => return Ok(MzMLParserState::Spectrum),
            b"scan" => return Ok(MzMLParserState::ScanList),
            b"scanWindow" => return Ok(MzMLParserState::ScanWindowList),
            b"scanWindowList" => return Ok(MzMLParserState::Scan),
            b"precursorList" => return Ok(MzMLParserState::Spectrum),
            b"precursor" => {
                let terms = mem::take(&mut self.isolation_window);
                let spectrum_id = self.entry_id.as_deref().unwrap_or_default();
                if let Some(precursor) = self.precursors.last_mut() {
                    precursor.isolation_window = terms.resolve(spectrum_id, precursor.selected_mz());
                }
                return Ok(MzMLParserState::PrecursorList);
            }
            b"isolationWindow" if state == MzMLParserState::IsolationWindow => {
                return Ok(MzMLParserState::Precursor)
            }
            b"selectedIonList" => return Ok(MzMLParserState::Precursor),
            b"selectedIon" => return Ok(MzMLParserState::SelectedIonList),
            b"activation" => return Ok(MzMLParserState::Precursor),
            b"product" => return Ok(MzMLParserState::ProductList),
            b"productList" => return Ok(MzMLParserState::Spectrum),
            b"binaryDataArrayList" => {
                return Ok(MzMLParserState::Spectrum);
            }
            b"binaryDataArray" => {
                let array = mem::take(&mut self.current_array);
                if array.name == ArrayType::Unknown {
                    debug!("Unnamed data array in {}", self.warning_context());
                }
                self.arrays.add(array);
                return Ok(MzMLParserState::BinaryDataArrayList);
            }
            b"binary" => return Ok(MzMLParserState::BinaryDataArray),
            b"spectrumList" => return Ok(MzMLParserState::SpectrumListDone),
            _ => {}
        };
        Ok(state)
    }

    fn text(&mut self, event: &BytesText, state: MzMLParserState) -> ParserResult {
        if state == MzMLParserState::Binary {
            let bin = event
                .unescape()
                .map_err(|e| MzMLParserError::XMLError(state, e))?;
            self.current_array.data = Bytes::from(bin.as_bytes());
        }
        Ok(state)
    }
}

/**
An mzML parser that streams spectra one at a time from a [`io::Read`] source,
building each [`Spectrum`] with [`MzMLSpectrumBuilder`].

When the readable stream supports [`io::Seek`], the spectrum offset index
can be read or built and spectra fetched by id or index.

The stream must be positioned at the start of the document when the reader
is created.
*/
#[derive(Debug)]
pub struct MzMLReaderType<R: Read> {
    /// The state the parser was in last.
    pub state: MzMLParserState,
    /// The raw reader
    handle: BufReader<R>,
    /// A place to store the last error the parser encountered
    error: Option<Box<MzMLParserError>>,
    /// A spectrum ID to byte offset for fast random access
    pub spectrum_index: OffsetIndex,
    /// The description of the file's contents and the previous data files that were
    /// consumed to produce it.
    pub(crate) file_description: FileDescription,
    /// A cache of repeated paramters
    pub reference_param_groups: ParamGroups,
    pub run: MassSpectrometryRun,
    num_spectra: Option<u64>,

    /// The offset just past the `<spectrumList>` start tag, and the state to
    /// restart from there
    data_start: u64,
    data_state: MzMLParserState,
    /// The index assigned to the next spectrum when it does not carry one
    next_ordinal: usize,

    buffer: Bytes,
}

impl<R: Read> MzMLReaderType<R> {
    /// Create a new [`MzMLReaderType`] instance, wrapping the [`io::Read`] handle
    /// provided with an [`io::BufReader`] and parses the metadata section of the file.
    pub fn new(file: R) -> Result<MzMLReaderType<R>, MzMLParserError> {
        Self::with_buffer_capacity(file, BUFFER_SIZE)
    }

    pub fn with_buffer_capacity(
        file: R,
        capacity: usize,
    ) -> Result<MzMLReaderType<R>, MzMLParserError> {
        let handle = BufReader::with_capacity(capacity, file);
        let mut inst = MzMLReaderType {
            handle,
            state: MzMLParserState::Start,
            error: None,
            buffer: Bytes::new(),
            spectrum_index: OffsetIndex::new("spectrum".to_owned()),
            file_description: FileDescription::default(),
            reference_param_groups: ParamGroups::new(),
            run: MassSpectrometryRun::default(),
            num_spectra: None,
            data_start: 0,
            data_state: MzMLParserState::SpectrumList,
            next_ordinal: 0,
        };
        inst.parse_metadata()?;
        Ok(inst)
    }

    /**Parse the metadata section of the file using [`FileMetadataBuilder`]
     */
    fn parse_metadata(&mut self) -> Result<(), MzMLParserError> {
        let mut reader = Reader::from_reader(&mut self.handle);
        reader.trim_text(true);
        let mut accumulator = FileMetadataBuilder::default();
        loop {
            let step = match reader.read_event_into(&mut self.buffer) {
                Ok(Event::Start(ref e)) => accumulator.start_element(e, self.state),
                Ok(Event::End(ref e)) => accumulator.end_element(e, self.state),
                Ok(Event::Text(ref e)) => accumulator.text(e, self.state),
                Ok(Event::Empty(ref e)) => {
                    accumulator.empty_element(e, self.state, reader.buffer_position())
                }
                Ok(Event::Eof) => Ok(MzMLParserState::EOF),
                Err(err) => Err(MzMLParserError::XMLError(self.state, err)),
                _ => Ok(self.state),
            };
            self.buffer.clear();
            match step {
                Ok(state) => self.state = state,
                Err(message) => {
                    self.state = MzMLParserState::ParserError;
                    self.error = Some(Box::new(message));
                }
            }
            match self.state {
                MzMLParserState::SpectrumList
                | MzMLParserState::SpectrumListDone
                | MzMLParserState::EOF
                | MzMLParserState::ParserError => {
                    break;
                }
                _ => {}
            };
        }
        self.data_start = reader.buffer_position() as u64;
        self.data_state = self.state;
        self.file_description = accumulator.file_description;
        self.reference_param_groups = accumulator.reference_param_groups;
        self.num_spectra = accumulator.num_spectra;

        let found_run = accumulator.run.is_some();
        if let Some(run) = accumulator.run {
            self.run = run;
        }

        match self.state {
            MzMLParserState::ParserError => Err(*self
                .error
                .take()
                .unwrap_or(Box::new(MzMLParserError::UnknownError(self.state)))),
            _ if !found_run => Err(MzMLParserError::NoRunFound),
            MzMLParserState::EOF => Err(MzMLParserError::IncompleteElementError(
                "run".to_string(),
                MzMLParserState::Run,
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn _parse_into(&mut self) -> Result<MzMLSpectrumBuilder<'_>, MzMLParserError> {
        match self.state {
            MzMLParserState::EOF => return Err(MzMLParserError::EOF),
            MzMLParserState::SpectrumListDone => return Err(MzMLParserError::SectionOver("spectrum")),
            _ => {}
        }

        let mut accumulator = MzMLSpectrumBuilder::new(&self.reference_param_groups);
        let mut reader = Reader::from_reader(&mut self.handle);
        reader.trim_text(true);

        macro_rules! err_state {
            ($message:ident) => {{
                self.state = MzMLParserState::ParserError;
                self.error = Some(Box::new($message));
            }};
        }

        loop {
            match reader.read_event_into(&mut self.buffer) {
                Ok(Event::Start(ref e)) => {
                    if log::log_enabled!(log::Level::Trace) {
                        trace!(
                            "Starting mzML element: {}",
                            String::from_utf8_lossy(e.name().as_ref())
                        );
                    }
                    match accumulator.start_element(e, self.state) {
                        Ok(state) => self.state = state,
                        Err(message) => err_state!(message),
                    };
                }
                Ok(Event::End(ref e)) => {
                    match accumulator.end_element(e, self.state) {
                        Ok(state) => self.state = state,
                        Err(message) => err_state!(message),
                    };
                }
                Ok(Event::Text(ref e)) => {
                    match accumulator.text(e, self.state) {
                        Ok(state) => self.state = state,
                        Err(message) => err_state!(message),
                    };
                }
                Ok(Event::Empty(ref e)) => {
                    match accumulator.empty_element(e, self.state, reader.buffer_position()) {
                        Ok(state) => self.state = state,
                        Err(message) => err_state!(message),
                    }
                }
                Ok(Event::Eof) => {
                    trace!("Reached EOF");
                    if accumulator.in_spectrum() {
                        let message = MzMLParserError::IncompleteSpectrum;
                        err_state!(message);
                    } else {
                        self.state = MzMLParserState::EOF;
                    }
                }
                // This parser may start inside the spectrum list, so closing
                // tags of elements opened before it are expected
                Err(XMLError::EndEventMismatch { expected, found }) if expected.is_empty() => {
                    trace!("Closing element {found} opened by an earlier parser");
                    if found == "spectrumList" {
                        self.state = MzMLParserState::SpectrumListDone;
                    }
                }
                Err(err) => {
                    let message = MzMLParserError::XMLError(self.state, err);
                    err_state!(message);
                }
                _ => {}
            };
            self.buffer.clear();
            match self.state {
                MzMLParserState::SpectrumDone
                | MzMLParserState::SpectrumListDone
                | MzMLParserState::EOF
                | MzMLParserState::ParserError => {
                    break;
                }
                _ => {}
            };
        }
        match self.state {
            MzMLParserState::SpectrumDone => Ok(accumulator),
            MzMLParserState::ParserError => Err(*self
                .error
                .take()
                .unwrap_or(Box::new(MzMLParserError::UnknownError(self.state)))),
            MzMLParserState::SpectrumListDone => Err(MzMLParserError::SectionOver("spectrum")),
            MzMLParserState::EOF => Err(MzMLParserError::EOF),
            _ => Err(MzMLParserError::IncompleteSpectrum),
        }
    }

    /// Parse the next spectrum. End of data is reported as
    /// [`MzMLParserError::EOF`] or [`MzMLParserError::SectionOver`].
    pub fn read_spectrum(&mut self) -> Result<Spectrum, MzMLParserError> {
        match self.state {
            MzMLParserState::SpectrumDone => {
                self.state = MzMLParserState::Resume;
            }
            MzMLParserState::ParserError => {
                debug!("Starting parsing from error: {:?}", self.error);
                self.state = MzMLParserState::Resume;
            }
            _ => {}
        }
        let ordinal = self.next_ordinal;
        let result = self
            ._parse_into()
            .and_then(|accumulator| accumulator.into_spectrum(ordinal));
        match &result {
            Ok(spectrum) => self.next_ordinal = spectrum.index() + 1,
            Err(err) if !err.is_end_of_data() => self.next_ordinal = ordinal + 1,
            Err(_) => {}
        }
        result
    }

    /// Read the next spectrum, or `None` at the end of the spectrum list
    pub fn read_next_spectrum(&mut self) -> Result<Option<Spectrum>, MzMLParserError> {
        match self.read_spectrum() {
            Ok(spectrum) => Ok(Some(spectrum)),
            Err(err) if err.is_end_of_data() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Read the next spectrum directly. Used to implement iteration, which
    /// stops at the first error.
    pub fn read_next(&mut self) -> Option<Spectrum> {
        match self.read_next_spectrum() {
            Ok(spectrum) => spectrum,
            Err(err) => {
                warn!("Failed to read next spectrum: {err}");
                None
            }
        }
    }

    pub fn file_description(&self) -> &FileDescription {
        &self.file_description
    }

    pub fn run_description(&self) -> &MassSpectrometryRun {
        &self.run
    }

    /// The index the next spectrum read in sequence gets when it does not
    /// carry its own
    pub fn next_ordinal(&self) -> usize {
        self.next_ordinal
    }

    /// The `count` attribute of `<spectrumList>`
    pub fn spectrum_count_hint(&self) -> Option<u64> {
        self.num_spectra
    }
}

impl<R: Read> Iterator for MzMLReaderType<R> {
    type Item = Spectrum;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next()
    }
}

/// When the underlying stream supports random access, this type can read the index at the end of
/// an `indexedmzML` document and use the offset map to jump directly to a specific spectrum
impl<R: Read + Seek> MzMLReaderType<R> {
    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.handle.seek(pos)
    }

    pub fn stream_position(&mut self) -> io::Result<u64> {
        self.handle.stream_position()
    }

    fn io_error(&self, err: io::Error) -> MzMLParserError {
        MzMLParserError::IOError(self.state, err)
    }

    /// Check whether the next element in the stream is `next_tag`, without
    /// moving the stream
    pub fn check_stream(&mut self, next_tag: &str) -> Result<bool, MzMLParserError> {
        Ok(self.peek_start_tag()?.is_some_and(|(name, _)| name == next_tag))
    }

    /// The name and `id` attribute of the element starting at the current position
    fn peek_start_tag(&mut self) -> Result<Option<(String, Option<String>)>, MzMLParserError> {
        let position = self.stream_position().map_err(|e| self.io_error(e))?;
        let mut reader = Reader::from_reader(&mut self.handle);
        reader.trim_text(true);
        let found = match reader.read_event_into(&mut self.buffer) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let id = e
                    .try_get_attribute("id")
                    .ok()
                    .flatten()
                    .and_then(|attr| attr.unescape_value().ok().map(|v| v.to_string()));
                trace!("From {position}, the next element started was {name}");
                Ok(Some((name, id)))
            }
            Ok(e) => {
                trace!("From {position}, the next was {e:?}");
                Ok(None)
            }
            Err(err) => Err(MzMLParserError::XMLError(self.state, err)),
        };
        self.buffer.clear();
        self.seek(SeekFrom::Start(position))
            .map_err(|e| self.io_error(e))?;
        found
    }

    /// Read the checksum from the end of an `indexedmzML` document
    pub fn read_checksum(&mut self) -> io::Result<Option<String>> {
        let current_position = self.handle.stream_position()?;
        let hit = search_trailer(&mut self.handle, "<fileChecksum>([0-9a-zA-Z]+)</fileChecksum>");
        self.handle.seek(SeekFrom::Start(current_position))?;
        hit
    }

    /// Read the offset index at the end of an `<indexedmzML>` document,
    /// though this index may be malformed in some older files.
    pub fn read_index_from_end(&mut self) -> Result<u64, MzMLIndexingError> {
        let mut indexer = IndexedMzMLIndexExtractor::new();
        let current_position = self.handle.stream_position()?;
        let offset = indexer.find_offset_from_reader(&mut self.handle);
        let result = match offset {
            Ok(Some(offset)) => self.read_index_at(&mut indexer, offset),
            Ok(None) => Err(MzMLIndexingError::OffsetNotFound),
            Err(err) => Err(err.into()),
        };
        self.buffer.clear();
        self.handle.seek(SeekFrom::Start(current_position))?;
        result?;
        self.spectrum_index = indexer.spectrum_index;
        self.spectrum_index.init = true;
        Ok(self.spectrum_index.len() as u64)
    }

    fn read_index_at(
        &mut self,
        indexer: &mut IndexedMzMLIndexExtractor,
        offset: u64,
    ) -> Result<(), MzMLIndexingError> {
        let end = self.handle.seek(SeekFrom::End(0))?;
        if offset >= end {
            return Err(MzMLIndexingError::OffsetOutOfBounds(offset));
        }
        self.handle.seek(SeekFrom::Start(offset))?;

        let mut indexer_state = IndexParserState::Start;
        let mut reader = Reader::from_reader(&mut self.handle);
        reader.trim_text(true);
        // The index lives outside of any element this reader has seen open
        reader.check_end_names(false);
        loop {
            indexer_state = match reader.read_event_into(&mut self.buffer) {
                Ok(Event::Start(ref e)) => indexer.start_element(e, indexer_state)?,
                Ok(Event::End(ref e)) => indexer.end_element(e, indexer_state)?,
                Ok(Event::Text(ref e)) => indexer.text(e, indexer_state)?,
                Ok(Event::Eof) => break,
                Err(err) => return Err(MzMLIndexingError::XMLError(err)),
                _ => indexer_state,
            };
            self.buffer.clear();
            if indexer_state == IndexParserState::Done {
                return Ok(());
            }
        }
        Err(MzMLIndexingError::IncompleteIndex)
    }

    /// Check that the index points at the spectra it names, sampling the first
    /// entry and one further in where byte drift would show.
    pub fn verify_index(&mut self) -> Result<bool, MzMLParserError> {
        let n = self.spectrum_index.len();
        trace!("Verifying offset index of length {n}");
        if n == 0 {
            return Ok(self.num_spectra.unwrap_or(0) == 0);
        }
        let position = self.stream_position().map_err(|e| self.io_error(e))?;
        let mut valid = true;
        for i in [0, (n / 2).min(100), n - 1] {
            let Some((id, offset)) = self.spectrum_index.get_index(i) else {
                continue;
            };
            let id = id.to_string();
            self.seek(SeekFrom::Start(offset))
                .map_err(|e| self.io_error(e))?;
            let found = match self.peek_start_tag() {
                Ok(found) => found,
                Err(MzMLParserError::XMLError(_, _)) => None,
                Err(e) => return Err(e),
            };
            if found != Some(("spectrum".to_string(), Some(id.clone()))) {
                debug!("Offset {offset} for {id} does not start that spectrum, found {found:?}");
                valid = false;
                break;
            }
        }
        self.seek(SeekFrom::Start(position))
            .map_err(|e| self.io_error(e))?;
        Ok(valid)
    }

    /// Read the `indexedmzML` trailer index, discarding it if it does not match
    /// the document. When no usable index is found and `build` is set, build
    /// one by scanning the file.
    pub fn read_index(&mut self, build: bool) -> Result<(), MzMLParserError> {
        match self.read_index_from_end() {
            Ok(n) => {
                if self.verify_index()? {
                    trace!("Read offset index with {n} entries");
                    return Ok(());
                }
                warn!("The offset index does not match the document, it will be rebuilt");
                self.spectrum_index.clear();
            }
            Err(MzMLIndexingError::OffsetNotFound) => {
                debug!("No offset index found at the end of the file");
            }
            Err(MzMLIndexingError::IOError(e)) => return Err(self.io_error(e)),
            Err(err) => {
                warn!("Failed to read the offset index, it will be rebuilt: {err}");
                self.spectrum_index.clear();
            }
        }
        if build {
            self.build_index()?;
        }
        Ok(())
    }

    /// Build the index if it has not been read or built yet
    pub fn ensure_index(&mut self) -> Result<&OffsetIndex, MzMLParserError> {
        if !self.spectrum_index.init {
            self.build_index()?;
        }
        Ok(&self.spectrum_index)
    }

    /// Builds an offset index to each `<spectrum>` XML element
    /// by doing a fast pre-scan of the XML file.
    pub fn build_index(&mut self) -> Result<u64, MzMLParserError> {
        let start = self.stream_position().map_err(|e| self.io_error(e))?;
        trace!("Starting to build offset index by traversing the file, storing last position as {start}");
        self.seek(SeekFrom::Start(0)).map_err(|e| self.io_error(e))?;
        self.spectrum_index.clear();
        let mut reader = Reader::from_reader(&mut self.handle);
        reader.trim_text(true);
        loop {
            match reader.read_event_into(&mut self.buffer) {
                Ok(ref event @ (Event::Start(ref e) | Event::Empty(ref e))) => {
                    if e.name().as_ref() == b"spectrum" {
                        // The buffer position is past the tag, less its `<` and `>`,
                        // and the `/` of an empty element
                        let delimiters = if matches!(event, Event::Empty(_)) { 3 } else { 2 };
                        let offset = (reader.buffer_position() - e.len() - delimiters) as u64;
                        match e.try_get_attribute("id") {
                            Ok(Some(attr)) => match attr.unescape_value() {
                                Ok(id) => {
                                    self.spectrum_index.insert(&*id, offset);
                                }
                                Err(err) => warn!("Skipping spectrum id at {offset} in index: {err}"),
                            },
                            _ => warn!("Skipping spectrum without an id at {offset} in index"),
                        }
                    }
                }
                Ok(Event::End(ref e)) => {
                    if e.name().as_ref() == b"spectrumList" {
                        break;
                    }
                }
                Ok(Event::Eof) => {
                    break;
                }
                Err(err) => {
                    warn!("Stopping index scan on XML error: {err}");
                    break;
                }
                _ => {}
            };
            self.buffer.clear();
        }
        self.buffer.clear();
        let offset = reader.buffer_position() as u64;
        trace!("Ended indexing scan at offset {offset}. Restoring starting position {start}");
        self.seek(SeekFrom::Start(start)).map_err(|e| self.io_error(e))?;
        self.spectrum_index.init = true;
        if self.spectrum_index.is_empty() {
            warn!("An index was built but no entries were found")
        }
        Ok(self.spectrum_index.len() as u64)
    }

    /// Parse the spectrum starting at `offset`, leaving the stream where it was
    pub fn read_spectrum_at(&mut self, offset: u64, ordinal: usize) -> Result<Spectrum, MzMLParserError> {
        let start = self.stream_position().map_err(|e| self.io_error(e))?;
        let (state, next_ordinal) = (self.state, self.next_ordinal);
        self.seek(SeekFrom::Start(offset)).map_err(|e| self.io_error(e))?;
        self.state = MzMLParserState::Resume;
        self.next_ordinal = ordinal;
        let result = self.read_spectrum();
        self.seek(SeekFrom::Start(start)).map_err(|e| self.io_error(e))?;
        self.state = state;
        self.next_ordinal = next_ordinal;
        result
    }

    /// Move the cursor to the spectrum at `position` in the index
    pub fn seek_to_index(&mut self, position: usize) -> Result<bool, MzMLParserError> {
        let Some((_, offset)) = self.ensure_index()?.get_index(position) else {
            return Ok(false);
        };
        self.seek(SeekFrom::Start(offset)).map_err(|e| self.io_error(e))?;
        self.state = MzMLParserState::Resume;
        self.next_ordinal = position;
        Ok(true)
    }

    /// Move the cursor to the spectrum with native ID `id`
    pub fn seek_to_id(&mut self, id: &str) -> Result<bool, MzMLParserError> {
        match self.ensure_index()?.index_of(id) {
            Some(position) => self.seek_to_index(position),
            None => Ok(false),
        }
    }

    /// Return to the first spectrum
    pub fn rewind(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(self.data_start))?;
        self.state = self.data_state;
        self.next_ordinal = 0;
        self.error = None;
        Ok(())
    }

    /// After a malformed spectrum, scan forward to the next `<spectrum>` start
    /// tag or the end of the spectrum list. Returns whether a spectrum was found.
    pub fn resynchronize(&mut self) -> Result<bool, MzMLParserError> {
        let start_finder = memmem::Finder::new(b"<spectrum");
        let end_finder = memmem::Finder::new(b"</spectrumList");
        let mut window_start = self.stream_position().map_err(|e| self.io_error(e))?;
        let mut window = Bytes::new();
        let mut chunk = vec![0u8; RESYNC_CHUNK_SIZE];
        loop {
            let n = self.handle.read(&mut chunk).map_err(|e| self.io_error(e))?;
            window.extend_from_slice(&chunk[..n]);
            let next_start = start_finder.find_iter(&window).find(|i| {
                window
                    .get(i + 9)
                    .is_some_and(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/')
            });
            let list_end = end_finder.find(&window);
            let hit = match (next_start, list_end) {
                (Some(i), Some(j)) if j < i => Some((j, false)),
                (Some(i), _) => Some((i, true)),
                (None, Some(j)) => Some((j, false)),
                (None, None) => None,
            };
            if let Some((i, is_spectrum)) = hit {
                let offset = window_start + i as u64;
                trace!("Resynchronized at {offset}");
                self.seek(SeekFrom::Start(offset)).map_err(|e| self.io_error(e))?;
                self.state = if is_spectrum {
                    MzMLParserState::Resume
                } else {
                    MzMLParserState::SpectrumListDone
                };
                return Ok(is_spectrum);
            }
            if n == 0 {
                self.state = MzMLParserState::EOF;
                return Ok(false);
            }
            if window.len() > RESYNC_TAIL {
                let drop = window.len() - RESYNC_TAIL;
                window.drain(..drop);
                window_start += drop as u64;
            }
        }
    }
}

/// Spectra can be fetched by ID or index when the underlying file stream
/// supports [`io::Seek`].
impl<R: Read + Seek> SpectrumSource for MzMLReaderType<R> {
    /// Retrieve a spectrum by it's native ID
    fn get_spectrum_by_id(&mut self, id: &str) -> Option<Spectrum> {
        let position = self.ensure_index().ok()?.index_of(id)?;
        self.get_spectrum_by_index(position)
    }

    /// Retrieve a spectrum by it's integer index
    fn get_spectrum_by_index(&mut self, index: usize) -> Option<Spectrum> {
        let (_id, offset) = self.ensure_index().ok()?.get_index(index)?;
        match self.read_spectrum_at(offset, index) {
            Ok(spectrum) => Some(spectrum),
            Err(err) => {
                warn!("Failed to read spectrum {index}: {err}");
                None
            }
        }
    }

    /// Return the data stream to the first spectrum
    fn reset(&mut self) {
        if let Err(err) = self.rewind() {
            warn!("Failed to reset file stream: {err}");
            self.state = MzMLParserState::ParserError;
        }
    }

    fn get_index(&self) -> &OffsetIndex {
        if !self.spectrum_index.init {
            warn!("Attempting to use an uninitialized offset index on MzMLReaderType")
        }
        &self.spectrum_index
    }

    fn set_index(&mut self, index: OffsetIndex) {
        self.spectrum_index = index
    }
}

/// The iterator can also be updated to move to a different location in the
/// stream efficiently.
impl<R: Read + Seek> RandomAccessSpectrumIterator for MzMLReaderType<R> {
    fn start_from_id(&mut self, id: &str) -> Result<&mut Self, SpectrumAccessError> {
        match self.seek_to_id(id) {
            Ok(true) => Ok(self),
            Ok(false) => Err(SpectrumAccessError::SpectrumIdNotFound(id.to_string())),
            Err(err) => Err(SpectrumAccessError::IOError(Some(err.into()))),
        }
    }

    fn start_from_index(&mut self, index: usize) -> Result<&mut Self, SpectrumAccessError> {
        match self.seek_to_index(index) {
            Ok(true) => Ok(self),
            Ok(false) => Err(SpectrumAccessError::SpectrumIndexNotFound(index)),
            Err(err) => Err(SpectrumAccessError::IOError(Some(err.into()))),
        }
    }

    fn start_from_time(&mut self, time: f64) -> Result<&mut Self, SpectrumAccessError> {
        match self.get_spectrum_by_time(time) {
            Some(spectrum) => self.start_from_index(spectrum.index()),
            None => Err(SpectrumAccessError::SpectrumNotFound),
        }
    }
}

/// The name [`MzMLReaderType`] is usually referred to by. It reads from any
/// `Read` source, and random access additionally needs `Seek`.
pub type MzMLReader<R> = MzMLReaderType<R>;

pub(crate) fn is_mzml(buf: &[u8]) -> bool {
    let mut reader = Reader::from_reader(buf);
    let mut buffer = Vec::new();
    loop {
        match reader.read_event_into(&mut buffer) {
            Ok(Event::Start(ref e)) => {
                let elt_name = e.name();
                match elt_name.as_ref() {
                    b"mzML" => return true,
                    b"indexedmzML" => return true,
                    _ => return false,
                }
            }
            Ok(Event::Eof) => return false,
            Ok(_) => {}
            Err(_) => return false,
        }
        buffer.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::traits::SpectrumSource;
    use crate::spectrum::SignalState;
    use crate::test_data::{render_mzml, Defect, FixturePrecursor, FixtureSpectrum};

    fn reader_for(doc: String) -> Result<MzMLReader<io::Cursor<Vec<u8>>>, MzMLParserError> {
        MzMLReader::new(io::Cursor::new(doc.into_bytes()))
    }

    fn three_spectra() -> Vec<FixtureSpectrum> {
        vec![
            FixtureSpectrum::ms1("scan=1", &[(300.0, 30.0), (100.0, 10.0), (200.0, 20.0)]),
            FixtureSpectrum::msn(
                "scan=2",
                &[(150.5, 5.0), (250.25, 7.5)],
                FixturePrecursor::new(Some(445.12)).with_window(445.12, 0.8, 0.8),
            ),
            FixtureSpectrum::ms1("scan=3", &[(101.0, 1.0)]).zlib(),
        ]
    }

    #[test_log::test]
    fn test_metadata() -> io::Result<()> {
        let reader = reader_for(render_mzml(&three_spectra(), false))?;
        assert_eq!(reader.spectrum_count_hint(), Some(3));
        assert_eq!(reader.run_description().id.as_deref(), Some("fixture_run"));
        assert_eq!(
            reader.run_description().start_time.as_deref(),
            Some("2024-03-01T10:00:00Z")
        );
        let desc = reader.file_description();
        assert_eq!(desc.source_files.len(), 1);
        assert_eq!(
            desc.source_files[0].id_format().map(|p| p.name.as_str()),
            Some("Thermo nativeID format")
        );
        assert!(desc.get_param_by_name("MS1 spectrum").is_some());
        assert!(reader.reference_param_groups.contains_key("CommonParams"));
        Ok(())
    }

    #[test_log::test]
    fn test_sequential_read() -> io::Result<()> {
        let mut reader = reader_for(render_mzml(&three_spectra(), false))?;
        let spectra: Vec<Spectrum> = reader.by_ref().collect();
        assert_eq!(spectra.len(), 3);
        let ids: Vec<_> = spectra.iter().map(|s| s.id()).collect();
        assert_eq!(ids, ["scan=1", "scan=2", "scan=3"]);

        let first = &spectra[0];
        assert_eq!(first.ms_level(), 1);
        assert_eq!(first.polarity(), ScanPolarity::Positive);
        assert_eq!(first.signal_continuity(), SignalContinuity::Centroid);
        assert!(first.precursor().is_none());
        assert!((first.start_time().unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(first.signal_state(), SignalState::Undecoded);
        let signal = first.signal()?;
        assert_eq!(signal.mzs, vec![100.0, 200.0, 300.0]);
        assert_eq!(signal.intensities, vec![10.0, 20.0, 30.0]);

        let second = &spectra[1];
        assert_eq!(second.ms_level(), 2);
        let precursor = second.precursor().unwrap();
        assert_eq!(precursor.selected_mz(), Some(445.12));
        assert_eq!(precursor.selected_charge(), Some(2));
        assert_eq!(precursor.precursor_id(), Some("scan=1"));
        assert_eq!(precursor.activation().energy, Some(35.0));
        assert!(precursor.activation().method().is_some());
        let window = precursor.isolation_window().unwrap();
        assert!((window.lower_bound - 444.32).abs() < 1e-3);
        assert!((window.upper_bound - 445.92).abs() < 1e-3);

        assert_eq!(spectra[2].signal()?.mzs, vec![101.0]);

        assert!(reader.read_next_spectrum()?.is_none());
        assert!(reader.read_next_spectrum()?.is_none());
        Ok(())
    }

    #[test_log::test]
    fn test_window_from_offsets_uses_selected_ion() -> io::Result<()> {
        let spectra = vec![FixtureSpectrum::msn(
            "scan=9",
            &[(200.0, 1.0)],
            FixturePrecursor::new(Some(600.5)).with_offsets(1.0, 1.0),
        )];
        let mut reader = reader_for(render_mzml(&spectra, false))?;
        let spectrum = reader.read_next_spectrum()?.unwrap();
        let window = spectrum.precursor().unwrap().isolation_window().unwrap();
        assert_eq!(window.target, 600.5);
        assert_eq!(window.lower_bound, 599.5);

        let spectra = vec![FixtureSpectrum::msn(
            "scan=10",
            &[(200.0, 1.0)],
            FixturePrecursor::new(None).with_offsets(1.0, 1.0),
        )];
        let mut reader = reader_for(render_mzml(&spectra, false))?;
        let spectrum = reader.read_next_spectrum()?.unwrap();
        let precursor = spectrum.precursor().unwrap();
        assert!(precursor.selected_mz().is_none());
        assert!(precursor.isolation_window().is_none());
        Ok(())
    }

    #[test]
    fn test_selected_ion_mobility() -> io::Result<()> {
        let spectra = vec![
            FixtureSpectrum::msn(
                "scan=2",
                &[(300.0, 5.0)],
                FixturePrecursor::new(Some(622.03)).with_ion_mobility(1.0425),
            ),
            FixtureSpectrum::msn("scan=3", &[(300.0, 5.0)], FixturePrecursor::new(Some(622.03))),
        ];
        let mut reader = reader_for(render_mzml(&spectra, false))?;
        let spectrum = reader.read_next_spectrum()?.unwrap();
        let precursor = spectrum.precursor().unwrap();
        assert_eq!(precursor.selected_ion_mobility(), Some(1.0425));
        assert_eq!(precursor.selected_mz(), Some(622.03));

        let spectrum = reader.read_next_spectrum()?.unwrap();
        assert_eq!(spectrum.precursor().unwrap().selected_ion_mobility(), None);
        Ok(())
    }

    #[test_log::test]
    fn test_build_and_read_index() -> io::Result<()> {
        let doc = render_mzml(&three_spectra(), true);
        let mut reader = reader_for(doc.clone())?;
        assert_eq!(reader.read_index_from_end()?, 3);
        let trailer = reader.spectrum_index.clone();
        assert!(reader.verify_index()?);

        let mut reader = reader_for(doc)?;
        assert_eq!(reader.build_index()?, 3);
        assert_eq!(reader.spectrum_index, trailer);
        assert_eq!(
            reader.read_checksum()?.as_deref(),
            Some(crate::test_data::FIXTURE_CHECKSUM)
        );

        let mut reader = reader_for(render_mzml(&three_spectra(), false))?;
        assert!(matches!(
            reader.read_index_from_end(),
            Err(MzMLIndexingError::OffsetNotFound)
        ));
        assert_eq!(reader.read_checksum()?, None);
        Ok(())
    }

    #[test_log::test]
    fn test_drifted_index_is_rebuilt() -> io::Result<()> {
        let doc = render_mzml(&three_spectra(), true);
        // Push the first offset past the end of the document
        let doc = doc.replacen("idRef=\"scan=1\">", "idRef=\"scan=1\">9", 1);
        let mut reader = reader_for(doc)?;
        reader.read_index_from_end()?;
        assert!(!reader.verify_index()?);

        reader.read_index(true)?;
        assert!(reader.verify_index()?);
        assert_eq!(reader.get_spectrum_by_index(2).unwrap().id(), "scan=3");
        Ok(())
    }

    #[test_log::test]
    fn test_random_access() -> io::Result<()> {
        let mut reader = reader_for(render_mzml(&three_spectra(), true))?;
        reader.read_index(false)?;
        assert_eq!(reader.len(), 3);

        let first = reader.read_next_spectrum()?.unwrap();
        assert_eq!(first.id(), "scan=1");

        let third = reader.get_spectrum_by_id("scan=3").unwrap();
        assert_eq!(third.index(), 2);
        assert!(reader.get_spectrum_by_id("scan=7").is_none());

        // Random access does not move the cursor
        assert_eq!(reader.read_next_spectrum()?.unwrap().id(), "scan=2");

        reader.start_from_id("scan=1")?;
        assert_eq!(reader.read_next_spectrum()?.unwrap().id(), "scan=1");
        assert!(matches!(
            reader.start_from_index(10),
            Err(SpectrumAccessError::SpectrumIndexNotFound(10))
        ));
        reader.start_from_index(2)?;
        assert_eq!(reader.read_next_spectrum()?.unwrap().id(), "scan=3");
        assert!(reader.read_next_spectrum()?.is_none());

        reader.reset();
        let ids: Vec<_> = reader.map(|s| s.id().to_string()).collect();
        assert_eq!(ids, ["scan=1", "scan=2", "scan=3"]);
        Ok(())
    }

    #[test_log::test]
    fn test_by_time() -> io::Result<()> {
        let mut reader = reader_for(render_mzml(&three_spectra(), true))?;
        reader.read_index(false)?;
        // fixture spectra are 30 seconds apart, starting at 30 seconds
        let spectrum = reader.get_spectrum_by_time(1.05).unwrap();
        assert_eq!(spectrum.id(), "scan=2");
        reader.start_from_time(1.6)?;
        assert_eq!(reader.read_next_spectrum()?.unwrap().id(), "scan=3");
        Ok(())
    }

    #[test_log::test]
    fn test_framing_error_and_resync() -> io::Result<()> {
        let mut spectra = three_spectra();
        spectra[1].defect = Some(Defect::BadMsLevel);
        let mut reader = reader_for(render_mzml(&spectra, false))?;
        assert_eq!(reader.read_spectrum()?.id(), "scan=1");
        let err = reader.read_spectrum().unwrap_err();
        assert!(matches!(err, MzMLParserError::InvalidParamValue(..)));
        assert!(reader.resynchronize()?);
        let third = reader.read_spectrum()?;
        assert_eq!(third.id(), "scan=3");
        assert_eq!(third.index(), 2);
        assert!(!reader.resynchronize()?);
        assert!(reader.read_next_spectrum()?.is_none());
        Ok(())
    }

    #[test_log::test]
    fn test_missing_attributes() -> io::Result<()> {
        let mut spectra = three_spectra();
        spectra[0].defect = Some(Defect::MissingId);
        spectra[2].defect = Some(Defect::MissingMsLevel);
        let mut reader = reader_for(render_mzml(&spectra, false))?;
        assert!(matches!(
            reader.read_spectrum(),
            Err(MzMLParserError::MissingAttribute("spectrum", "id"))
        ));
        assert_eq!(reader.read_spectrum()?.id(), "scan=2");
        assert!(matches!(
            reader.read_spectrum(),
            Err(MzMLParserError::MissingMSLevel(_))
        ));
        assert!(reader.read_next_spectrum()?.is_none());
        Ok(())
    }

    #[test_log::test]
    fn test_truncated_document() -> io::Result<()> {
        let doc = render_mzml(&three_spectra(), false);
        let start = doc.find("<spectrum index=\"2\"").unwrap();
        let cut = start + doc[start..].find("<scanList").unwrap();
        let mut reader = reader_for(doc[..cut].to_string())?;
        assert_eq!(reader.read_spectrum()?.id(), "scan=1");
        assert_eq!(reader.read_spectrum()?.id(), "scan=2");
        assert!(matches!(
            reader.read_spectrum(),
            Err(MzMLParserError::IncompleteSpectrum)
        ));
        assert!(!reader.resynchronize()?);
        assert!(reader.read_next_spectrum()?.is_none());
        Ok(())
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(
            reader_for(String::new()),
            Err(MzMLParserError::NoRunFound)
        ));
        let doc = render_mzml(&three_spectra(), false);
        let cut = doc.find("<spectrumList").unwrap();
        assert!(matches!(
            reader_for(doc[..cut].to_string()),
            Err(MzMLParserError::IncompleteElementError(..))
        ));
    }

    #[test]
    fn test_empty_run() -> io::Result<()> {
        let doc = render_mzml(&[], false);
        let mut reader = reader_for(doc)?;
        assert_eq!(reader.spectrum_count_hint(), Some(0));
        assert!(reader.read_next_spectrum()?.is_none());
        assert_eq!(reader.build_index()?, 0);

        let mut doc = render_mzml(&[], false);
        let start = doc.find("<spectrumList").unwrap();
        let end = doc.find("</spectrumList>").unwrap() + "</spectrumList>".len();
        doc.replace_range(start..end, "");
        let mut reader = reader_for(doc)?;
        assert_eq!(reader.spectrum_count_hint(), None);
        assert!(reader.read_next_spectrum()?.is_none());
        Ok(())
    }

    #[test]
    fn test_is_mzml() {
        assert!(is_mzml(render_mzml(&three_spectra(), true).as_bytes()));
        assert!(is_mzml(b"<?xml version=\"1.0\"?>\n<mzML version=\"1.1.0\">"));
        assert!(!is_mzml(b"BEGIN IONS\nTITLE=scan=1\n"));
        assert!(!is_mzml(b"<?xml version=\"1.0\"?>\n<mzXML>"));
    }
}
