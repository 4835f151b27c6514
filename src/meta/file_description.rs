use crate::impl_param_described;
use crate::params::{Param, ParamDescribed, ParamList};

/// A file the data were converted or derived from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceFile {
    pub name: String,
    pub location: String,
    pub id: String,
    pub params: ParamList,
}

impl SourceFile {
    /// The native ID format term, e.g. "Thermo nativeID format"
    pub fn id_format(&self) -> Option<&Param> {
        self.params.iter().find(|p| p.name.ends_with("nativeID format"))
    }

    /// The file format term, e.g. "Thermo RAW format"
    pub fn file_format(&self) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.name.ends_with(" format") && !p.name.ends_with("nativeID format"))
    }
}

/// The `<fileDescription>` section: what kinds of spectra the file holds
/// and where they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileDescription {
    pub contents: ParamList,
    pub source_files: Vec<SourceFile>,
}

impl_param_described!(SourceFile);

impl ParamDescribed for FileDescription {
    fn params(&self) -> &[Param] {
        &self.contents
    }

    fn params_mut(&mut self) -> &mut ParamList {
        &mut self.contents
    }
}
