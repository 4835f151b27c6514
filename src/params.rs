//! Controlled vocabulary parameters, the open-ended metadata carriers of mzML.
//!
//! Terms the reader understands are lifted into dedicated fields of the
//! spectrum data model. Everything else is kept as a [`Param`] so that no
//! information from the source file is lost.
use std::fmt::Display;
use std::num::{ParseFloatError, ParseIntError};
use std::str::ParseBoolError;
use std::str::FromStr;

use thiserror::Error;

/// Split a `CV:0000000` style accession into its vocabulary and number
pub fn curie_to_num(curie: &str) -> (Option<ControlledVocabulary>, Option<u32>) {
    let mut parts = curie.splitn(2, ':');
    let prefix = parts
        .next()
        .and_then(|v| v.parse::<ControlledVocabulary>().ok())
        .and_then(|cv| cv.as_option());
    match parts.next().map(|k| k.parse::<u32>()) {
        Some(Ok(v)) => (prefix, Some(v)),
        _ => (prefix, None),
    }
}

/// The ways a parameter's textual value may fail to convert
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParamValueParseError {
    #[error("Failed to parse \"{1}\" for {0} as a floating point number")]
    FailedToExtractFloat(String, String, #[source] ParseFloatError),
    #[error("Failed to parse \"{1}\" for {0} as an integer")]
    FailedToExtractInt(String, String, #[source] ParseIntError),
    #[error("Failed to parse \"{1}\" for {0} as a boolean")]
    FailedToExtractBool(String, String, #[source] ParseBoolError),
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlledVocabulary {
    MS,
    UO,
    EFO,
    OBI,
    HANCESTRO,
    BFO,
    NCIT,
    BTO,
    PRIDE,
    Unknown,
}

impl ControlledVocabulary {
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::MS => "MS",
            Self::UO => "UO",
            Self::EFO => "EFO",
            Self::OBI => "OBI",
            Self::HANCESTRO => "HANCESTRO",
            Self::BFO => "BFO",
            Self::NCIT => "NCIT",
            Self::BTO => "BTO",
            Self::PRIDE => "PRIDE",
            Self::Unknown => "?",
        }
    }

    pub fn as_option(&self) -> Option<Self> {
        match self {
            Self::Unknown => None,
            _ => Some(*self),
        }
    }
}

impl FromStr for ControlledVocabulary {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MS" | "PSI-MS" => Ok(Self::MS),
            "UO" => Ok(Self::UO),
            "EFO" => Ok(Self::EFO),
            "OBI" => Ok(Self::OBI),
            "HANCESTRO" => Ok(Self::HANCESTRO),
            "BFO" => Ok(Self::BFO),
            "NCIT" => Ok(Self::NCIT),
            "BTO" => Ok(Self::BTO),
            "PRIDE" => Ok(Self::PRIDE),
            _ => Ok(Self::Unknown),
        }
    }
}

impl Display for ControlledVocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Units that a term's value might have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Unit {
    // Mass
    MZ,
    Mass,

    // Time
    Minute,
    Second,
    Millisecond,

    // Intensity
    DetectorCounts,
    PercentBasePeak,
    CountsPerSecond,

    // Collision Energy
    Electronvolt,
    PercentElectronVolt,

    #[default]
    Unknown,
}

impl Unit {
    pub fn from_name(name: &str) -> Unit {
        match name {
            "millisecond" => Self::Millisecond,
            "second" => Self::Second,
            "minute" => Self::Minute,

            "m/z" => Self::MZ,
            "dalton" => Self::Mass,

            "number of detector counts" => Self::DetectorCounts,
            "percent of base peak" => Self::PercentBasePeak,
            "counts per second" => Self::CountsPerSecond,

            "electronvolt" => Self::Electronvolt,
            "percent" => Self::PercentElectronVolt,
            _ => Unit::Unknown,
        }
    }

    pub fn from_accession(acc: &str) -> Unit {
        match acc {
            "UO:0000028" => Self::Millisecond,
            "UO:0000010" => Self::Second,
            "UO:0000031" => Self::Minute,

            "MS:1000040" => Self::MZ,
            "UO:0000221" => Self::Mass,

            "MS:1000131" => Self::DetectorCounts,
            "MS:1000132" => Self::PercentBasePeak,
            "MS:1000814" => Self::CountsPerSecond,

            "UO:0000266" => Self::Electronvolt,
            "UO:0000187" => Self::PercentElectronVolt,
            _ => Unit::Unknown,
        }
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A `<cvParam>` or `<userParam>`. User parameters have no accession.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Param {
    pub name: String,
    pub value: String,
    pub accession: Option<u32>,
    pub controlled_vocabulary: Option<ControlledVocabulary>,
    pub unit: Unit,
}

impl Param {
    pub fn new() -> Param {
        Param::default()
    }

    pub fn new_key_value<K: Into<String>, V: Into<String>>(name: K, value: V) -> Param {
        Param {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn is_controlled(&self) -> bool {
        self.accession.is_some()
    }

    /// Whether this is a term from the PSI-MS vocabulary
    pub fn is_ms(&self) -> bool {
        self.accession.is_some() && self.controlled_vocabulary == Some(ControlledVocabulary::MS)
    }

    pub fn curie(&self) -> Option<String> {
        match (self.controlled_vocabulary, self.accession) {
            (Some(cv), Some(acc)) => Some(format!("{}:{:07}", cv.prefix(), acc)),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Result<f64, ParamValueParseError> {
        self.value.trim().parse::<f64>().map_err(|e| {
            ParamValueParseError::FailedToExtractFloat(self.name.clone(), self.value.clone(), e)
        })
    }

    pub fn to_f32(&self) -> Result<f32, ParamValueParseError> {
        self.value.trim().parse::<f32>().map_err(|e| {
            ParamValueParseError::FailedToExtractFloat(self.name.clone(), self.value.clone(), e)
        })
    }

    pub fn to_i32(&self) -> Result<i32, ParamValueParseError> {
        self.value.trim().parse::<i32>().map_err(|e| {
            ParamValueParseError::FailedToExtractInt(self.name.clone(), self.value.clone(), e)
        })
    }

    pub fn to_i64(&self) -> Result<i64, ParamValueParseError> {
        self.value.trim().parse::<i64>().map_err(|e| {
            ParamValueParseError::FailedToExtractInt(self.name.clone(), self.value.clone(), e)
        })
    }

    /// Accepts `true` and `false` in any case
    pub fn to_bool(&self) -> Result<bool, ParamValueParseError> {
        self.value
            .trim()
            .to_ascii_lowercase()
            .parse::<bool>()
            .map_err(|e| {
                ParamValueParseError::FailedToExtractBool(self.name.clone(), self.value.clone(), e)
            })
    }
}

pub type ParamList = Vec<Param>;

/// Types that carry an open list of [`Param`]
pub trait ParamDescribed {
    fn params(&self) -> &[Param];
    fn params_mut(&mut self) -> &mut ParamList;

    fn add_param(&mut self, param: Param) {
        self.params_mut().push(param);
    }

    fn get_param_by_name(&self, name: &str) -> Option<&Param> {
        self.params().iter().find(|p| p.name == name)
    }

    fn get_param_by_accession(&self, accession: &str) -> Option<&Param> {
        let (cv, acc_num) = curie_to_num(accession);
        self.params()
            .iter()
            .find(|p| p.accession == acc_num && p.controlled_vocabulary == cv)
    }
}

#[macro_export]
macro_rules! impl_param_described {
    ($($t:ty), +) => {$(

        impl $crate::params::ParamDescribed for $t {
            fn params(&self) -> &[$crate::params::Param] {
                &self.params
            }

            fn params_mut(&mut self) -> &mut $crate::params::ParamList {
                &mut self.params
            }
        }
    )+};
}
