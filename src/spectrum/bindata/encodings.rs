use std::fmt::Display;
use std::io;

use thiserror::{self, Error};

use crate::params::Unit;

pub type Bytes = Vec<u8>;

/// The kinds of data arrays a `<binaryDataArray>` may hold, identified by
/// their PSI-MS term.
#[derive(Debug, Clone, PartialEq, Hash, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArrayType {
    #[default]
    Unknown,
    MZArray,
    IntensityArray,
    ChargeArray,
    SignalToNoiseArray,
    TimeArray,
    WavelengthArray,
    IonMobilityArray,
    BaselineArray,
    ResolutionArray,
    NonStandardDataArray {
        name: Box<String>,
    },
}

impl Display for ArrayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl ArrayType {
    /// The data type values of this array are converted to when read.
    ///
    /// The m/z array is read as `Float64`, the charge array as `Int32`
    /// and everything else as `Float32`.
    pub const fn preferred_dtype(&self) -> BinaryDataArrayType {
        match self {
            ArrayType::MZArray => BinaryDataArrayType::Float64,
            ArrayType::IntensityArray => BinaryDataArrayType::Float32,
            ArrayType::ChargeArray => BinaryDataArrayType::Int32,
            _ => BinaryDataArrayType::Float32,
        }
    }

    pub fn nonstandard<S: ToString>(name: S) -> ArrayType {
        ArrayType::NonStandardDataArray {
            name: name.to_string().into(),
        }
    }

    /// The unit an array is assumed to be in when the file does not say
    pub const fn default_unit(&self) -> Unit {
        match self {
            ArrayType::MZArray => Unit::MZ,
            ArrayType::IntensityArray => Unit::DetectorCounts,
            ArrayType::TimeArray => Unit::Minute,
            _ => Unit::Unknown,
        }
    }

    /// Look up an array type from an `MS` accession number
    pub const fn from_accession(accession: u32) -> Option<ArrayType> {
        let array_type = match accession {
            1000514 => ArrayType::MZArray,
            1000515 => ArrayType::IntensityArray,
            1000516 => ArrayType::ChargeArray,
            1000517 => ArrayType::SignalToNoiseArray,
            1000595 => ArrayType::TimeArray,
            1000617 => ArrayType::WavelengthArray,
            1002893 => ArrayType::IonMobilityArray,
            1002530 => ArrayType::BaselineArray,
            1002529 => ArrayType::ResolutionArray,
            _ => return None,
        };
        Some(array_type)
    }
}

/// The primitive value types of a binary data array
#[derive(Debug, Clone, Copy, PartialEq, Hash, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryDataArrayType {
    #[default]
    Unknown,
    Float64,
    Float32,
    Int64,
    Int32,
    ASCII,
}

impl Display for BinaryDataArrayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl BinaryDataArrayType {
    /// Get the size in bytes of a single value of this type
    pub const fn size_of(&self) -> usize {
        match self {
            BinaryDataArrayType::Unknown | BinaryDataArrayType::ASCII => 1,
            BinaryDataArrayType::Float32 | BinaryDataArrayType::Int32 => 4,
            BinaryDataArrayType::Float64 | BinaryDataArrayType::Int64 => 8,
        }
    }

    pub const fn accession(&self) -> Option<u32> {
        match self {
            Self::Float32 => Some(1000521),
            Self::Float64 => Some(1000523),
            Self::Int32 => Some(1000519),
            Self::Int64 => Some(1000522),
            Self::ASCII => Some(1001479),
            Self::Unknown => None,
        }
    }

    pub const fn from_accession(accession: u32) -> Option<Self> {
        match accession {
            1000521 => Some(Self::Float32),
            1000523 => Some(Self::Float64),
            1000519 => Some(Self::Int32),
            1000522 => Some(Self::Int64),
            1001479 => Some(Self::ASCII),
            _ => None,
        }
    }
}

/// The encodings a `<binary>` payload might be stored in. Every state
/// other than `Decoded` is base64 encoded on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryCompressionType {
    #[default]
    NoCompression,
    Zlib,
    NumpressLinear,
    NumpressSLOF,
    NumpressPIC,
    NumpressLinearZlib,
    NumpressSLOFZlib,
    NumpressPICZlib,
    Decoded,
}

impl BinaryCompressionType {
    /// Generate a user-understandable message about why decoding failed
    pub fn unsupported_msg(&self, context: Option<&str>) -> String {
        match context {
            Some(ctx) => format!("Cannot decode array compressed with {:?} ({})", self, ctx),
            None => format!("Cannot decode array compressed with {:?}", self),
        }
    }

    pub const fn accession(&self) -> Option<u32> {
        let acc = match self {
            BinaryCompressionType::NoCompression => 1000576,
            BinaryCompressionType::Zlib => 1000574,
            BinaryCompressionType::NumpressLinear => 1002312,
            BinaryCompressionType::NumpressSLOF => 1002314,
            BinaryCompressionType::NumpressPIC => 1002313,
            BinaryCompressionType::NumpressLinearZlib => 1002746,
            BinaryCompressionType::NumpressSLOFZlib => 1002748,
            BinaryCompressionType::NumpressPICZlib => 1002747,
            BinaryCompressionType::Decoded => return None,
        };
        Some(acc)
    }

    pub const fn from_accession(accession: u32) -> Option<Self> {
        let method = match accession {
            1000576 => Self::NoCompression,
            1000574 => Self::Zlib,
            1002312 => Self::NumpressLinear,
            1002314 => Self::NumpressSLOF,
            1002313 => Self::NumpressPIC,
            1002746 => Self::NumpressLinearZlib,
            1002748 => Self::NumpressSLOFZlib,
            1002747 => Self::NumpressPICZlib,
            _ => return None,
        };
        Some(method)
    }
}

impl Display for BinaryCompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The failure modes of turning an encoded `<binary>` payload into a typed
/// array.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArrayRetrievalError {
    #[error("Array type {0:?} not found")]
    NotFound(ArrayType),
    #[error("Failed to decode base64 payload: {0}")]
    InvalidBase64(String),
    #[error("An error occurred while decompressing: {0}")]
    DecompressionError(String),
    #[error("The requested data type does not match the number of bytes available in the buffer")]
    DataTypeSizeMismatch,
    #[error("{array} has {found} values but {expected} were declared")]
    LengthMismatch {
        array: ArrayType,
        expected: usize,
        found: usize,
    },
}

impl From<bytemuck::PodCastError> for ArrayRetrievalError {
    fn from(_value: bytemuck::PodCastError) -> Self {
        Self::DataTypeSizeMismatch
    }
}

impl From<ArrayRetrievalError> for io::Error {
    fn from(value: ArrayRetrievalError) -> Self {
        match value {
            ArrayRetrievalError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, value),
            ArrayRetrievalError::DecompressionError(e) => {
                io::Error::new(io::ErrorKind::InvalidData, e)
            }
            _ => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

#[cfg(feature = "numpress")]
impl From<numpress::Error> for ArrayRetrievalError {
    fn from(value: numpress::Error) -> Self {
        ArrayRetrievalError::DecompressionError(value.to_string())
    }
}
