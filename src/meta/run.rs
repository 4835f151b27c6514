/// The `<run>` element's attributes, the defaults shared by every spectrum
/// in the file.
#[derive(Debug, Default, PartialEq, Hash, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MassSpectrometryRun {
    pub id: Option<String>,
    pub default_instrument_configuration: Option<String>,
    pub default_source_file: Option<String>,
    /// The acquisition timestamp, verbatim from the `startTimeStamp` attribute
    pub start_time: Option<String>,
}

impl MassSpectrometryRun {
    pub fn new(
        id: Option<String>,
        default_instrument_configuration: Option<String>,
        default_source_file: Option<String>,
        start_time: Option<String>,
    ) -> Self {
        Self {
            id,
            default_instrument_configuration,
            default_source_file,
            start_time,
        }
    }
}
