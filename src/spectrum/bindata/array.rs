use std::borrow::Cow;
use std::fmt::{self, Formatter};
use std::io::prelude::*;

use base64_simd;
use flate2::write::ZlibDecoder;

use crate::params::{ParamList, Unit};

use super::encodings::{ArrayRetrievalError, ArrayType, BinaryCompressionType, BinaryDataArrayType, Bytes};

/// The still-encoded contents of a `<binaryDataArray>`, together with the
/// terms that say how to decode it.
///
/// The payload is kept as base64 text until [`DataArray::decode`] is called,
/// so holding a `DataArray` costs no more than the text it was read from.
#[derive(Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataArray {
    pub data: Bytes,
    pub dtype: BinaryDataArrayType,
    pub compression: BinaryCompressionType,
    pub name: ArrayType,
    pub params: Option<Box<ParamList>>,
    pub unit: Unit,
    /// The `arrayLength` attribute, when present
    pub item_count: Option<usize>,
}

impl fmt::Debug for DataArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataArray")
            .field("name", &self.name)
            .field("data", &self.data.len())
            .field("dtype", &self.dtype)
            .field("compression", &self.compression)
            .field("params", &self.params)
            .field("unit", &self.unit)
            .field("item_count", &self.item_count)
            .finish()
    }
}

macro_rules! read_le {
    ($bytes:expr, $t:ty, $width:literal) => {
        $bytes
            .chunks_exact($width)
            .map(|chunk| -> Result<$t, ArrayRetrievalError> {
                let raw: [u8; $width] = bytemuck::try_pod_read_unaligned(chunk)?;
                Ok(<$t>::from_le_bytes(raw))
            })
    };
}

impl DataArray {
    pub fn new() -> DataArray {
        DataArray::default()
    }

    pub fn from_name(name: &ArrayType) -> DataArray {
        DataArray {
            dtype: name.preferred_dtype(),
            unit: name.default_unit(),
            name: name.clone(),
            ..Default::default()
        }
    }

    pub fn wrap(name: &ArrayType, dtype: BinaryDataArrayType, data: Bytes) -> DataArray {
        DataArray {
            dtype,
            name: name.clone(),
            data,
            unit: name.default_unit(),
            ..Default::default()
        }
    }

    pub fn add_param(&mut self, param: crate::params::Param) {
        self.params.get_or_insert_with(Default::default).push(param);
    }

    pub fn decompress_zlib(bytestring: &[u8]) -> Result<Bytes, ArrayRetrievalError> {
        let mut decompressor = ZlibDecoder::new(Bytes::new());
        decompressor
            .write_all(bytestring)
            .and_then(|_| decompressor.finish())
            .map_err(|e| ArrayRetrievalError::DecompressionError(e.to_string()))
    }

    #[cfg(feature = "numpress")]
    pub fn decompress_numpress_linear(data: &[u8]) -> Result<Vec<f64>, ArrayRetrievalError> {
        Ok(numpress::numpress_decompress(data)?)
    }

    #[cfg(feature = "numpress")]
    pub fn decompress_numpress_slof(data: &[u8]) -> Result<Vec<f64>, ArrayRetrievalError> {
        let mut buf = Vec::new();
        numpress::decode_slof(data, &mut buf)?;
        Ok(buf)
    }

    /// Numpress always yields `f64`, re-encode them in the array's declared width
    #[cfg(feature = "numpress")]
    fn numpress_to_bytes(&self, values: Vec<f64>) -> Result<Bytes, ArrayRetrievalError> {
        match self.dtype {
            BinaryDataArrayType::Float64 => {
                Ok(values.into_iter().flat_map(|v| v.to_le_bytes()).collect())
            }
            BinaryDataArrayType::Float32 => Ok(values
                .into_iter()
                .flat_map(|v| (v as f32).to_le_bytes())
                .collect()),
            _ => Err(ArrayRetrievalError::DecompressionError(
                self.compression
                    .unsupported_msg(Some(format!("Not compatible with {:?}", self.dtype).as_str())),
            )),
        }
    }

    fn base64_decode(&self) -> Result<Bytes, ArrayRetrievalError> {
        let text: Vec<u8> = self
            .data
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64_simd::STANDARD
            .decode_type::<Bytes>(&text)
            .map_err(|e| ArrayRetrievalError::InvalidBase64(e.to_string()))
    }

    /// Base64-decode and decompress the payload into little endian bytes of
    /// width `self.dtype`.
    pub fn decode(&self) -> Result<Cow<'_, [u8]>, ArrayRetrievalError> {
        if self.data.is_empty() {
            return Ok(Cow::Borrowed(&[]));
        }

        match self.compression {
            BinaryCompressionType::Decoded => Ok(Cow::Borrowed(self.data.as_slice())),
            BinaryCompressionType::NoCompression => Ok(Cow::Owned(self.base64_decode()?)),
            BinaryCompressionType::Zlib => {
                let bytestring = self.base64_decode()?;
                Ok(Cow::Owned(Self::decompress_zlib(&bytestring)?))
            }
            #[cfg(feature = "numpress")]
            BinaryCompressionType::NumpressLinear => {
                let bytestring = self.base64_decode()?;
                let decoded = Self::decompress_numpress_linear(&bytestring)?;
                Ok(Cow::Owned(self.numpress_to_bytes(decoded)?))
            }
            #[cfg(feature = "numpress")]
            BinaryCompressionType::NumpressSLOF => {
                let bytestring = self.base64_decode()?;
                let decoded = Self::decompress_numpress_slof(&bytestring)?;
                Ok(Cow::Owned(self.numpress_to_bytes(decoded)?))
            }
            #[cfg(feature = "numpress")]
            BinaryCompressionType::NumpressLinearZlib => {
                let bytestring = Self::decompress_zlib(&self.base64_decode()?)?;
                let decoded = Self::decompress_numpress_linear(&bytestring)?;
                Ok(Cow::Owned(self.numpress_to_bytes(decoded)?))
            }
            #[cfg(feature = "numpress")]
            BinaryCompressionType::NumpressSLOFZlib => {
                let bytestring = Self::decompress_zlib(&self.base64_decode()?)?;
                let decoded = Self::decompress_numpress_slof(&bytestring)?;
                Ok(Cow::Owned(self.numpress_to_bytes(decoded)?))
            }
            mode => Err(ArrayRetrievalError::DecompressionError(
                mode.unsupported_msg(None),
            )),
        }
    }

    /// Decode the payload in place, returning the new compression state
    pub fn decode_and_store(&mut self) -> Result<BinaryCompressionType, ArrayRetrievalError> {
        if let Cow::Owned(buffer) = self.decode()? {
            self.data = buffer;
            self.compression = BinaryCompressionType::Decoded;
        } else if self.data.is_empty() {
            self.compression = BinaryCompressionType::Decoded;
        }
        Ok(self.compression)
    }

    /// The number of values after decoding
    pub fn data_len(&self) -> Result<usize, ArrayRetrievalError> {
        let bytes = self.decode()?;
        let width = self.dtype.size_of();
        if bytes.len() % width != 0 {
            return Err(ArrayRetrievalError::DataTypeSizeMismatch);
        }
        Ok(bytes.len() / width)
    }

    pub fn to_f64(&self) -> Result<Vec<f64>, ArrayRetrievalError> {
        let bytes = self.decode()?;
        self.check_width(&bytes)?;
        match self.dtype {
            BinaryDataArrayType::Float64 => read_le!(bytes, f64, 8).collect(),
            BinaryDataArrayType::Float32 => {
                read_le!(bytes, f32, 4).map(|v| v.map(|v| v as f64)).collect()
            }
            BinaryDataArrayType::Int64 => {
                read_le!(bytes, i64, 8).map(|v| v.map(|v| v as f64)).collect()
            }
            BinaryDataArrayType::Int32 => {
                read_le!(bytes, i32, 4).map(|v| v.map(|v| v as f64)).collect()
            }
            _ => Err(ArrayRetrievalError::DataTypeSizeMismatch),
        }
    }

    pub fn to_f32(&self) -> Result<Vec<f32>, ArrayRetrievalError> {
        let bytes = self.decode()?;
        self.check_width(&bytes)?;
        match self.dtype {
            BinaryDataArrayType::Float64 => {
                read_le!(bytes, f64, 8).map(|v| v.map(|v| v as f32)).collect()
            }
            BinaryDataArrayType::Float32 => read_le!(bytes, f32, 4).collect(),
            BinaryDataArrayType::Int64 => {
                read_le!(bytes, i64, 8).map(|v| v.map(|v| v as f32)).collect()
            }
            BinaryDataArrayType::Int32 => {
                read_le!(bytes, i32, 4).map(|v| v.map(|v| v as f32)).collect()
            }
            _ => Err(ArrayRetrievalError::DataTypeSizeMismatch),
        }
    }

    fn check_width(&self, bytes: &[u8]) -> Result<(), ArrayRetrievalError> {
        if bytes.len() % self.dtype.size_of() != 0 {
            Err(ArrayRetrievalError::DataTypeSizeMismatch)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    fn encode_f64(values: &[f64], zlib: bool) -> Bytes {
        let raw: Bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let raw = if zlib {
            let mut enc = ZlibEncoder::new(Bytes::new(), Compression::default());
            enc.write_all(&raw).unwrap();
            enc.finish().unwrap()
        } else {
            raw
        };
        base64_simd::STANDARD.encode_to_string(&raw).into_bytes()
    }

    #[test]
    fn test_decode_zlib() {
        let values: Vec<f64> = (0..500).map(|i| 100.0 + i as f64 * 0.25).collect();
        let mut da = DataArray::wrap(
            &ArrayType::MZArray,
            BinaryDataArrayType::Float64,
            encode_f64(&values, true),
        );
        da.compression = BinaryCompressionType::Zlib;
        assert_eq!(da.data_len().unwrap(), 500);
        assert_eq!(da.to_f64().unwrap(), values);

        assert_eq!(da.decode_and_store().unwrap(), BinaryCompressionType::Decoded);
        assert_eq!(da.to_f64().unwrap(), values);
        let narrowed = da.to_f32().unwrap();
        assert_eq!(narrowed[4], 101.0f32);
    }

    #[test]
    fn test_decode_empty() {
        let mut da = DataArray::wrap(&ArrayType::MZArray, BinaryDataArrayType::Float64, Vec::new());
        da.compression = BinaryCompressionType::Zlib;
        assert_eq!(da.data_len().unwrap(), 0);
        assert!(da.to_f64().unwrap().is_empty());
    }

    #[test]
    fn test_decode_integer_widths() {
        let raw: Bytes = [3i32, -1, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
        let da = DataArray::wrap(
            &ArrayType::ChargeArray,
            BinaryDataArrayType::Int32,
            base64_simd::STANDARD.encode_to_string(&raw).into_bytes(),
        );
        assert_eq!(da.to_f64().unwrap(), vec![3.0, -1.0, 7.0]);
    }

    #[cfg(feature = "numpress")]
    fn zlib_compress(raw: &[u8]) -> Bytes {
        let mut enc = ZlibEncoder::new(Bytes::new(), Compression::default());
        enc.write_all(raw).unwrap();
        enc.finish().unwrap()
    }

    #[cfg(feature = "numpress")]
    fn numpress_array(
        name: ArrayType,
        dtype: BinaryDataArrayType,
        compression: BinaryCompressionType,
        raw: &[u8],
    ) -> DataArray {
        let mut da = DataArray::wrap(
            &name,
            dtype,
            base64_simd::STANDARD.encode_to_string(raw).into_bytes(),
        );
        da.compression = compression;
        da
    }

    #[cfg(feature = "numpress")]
    #[test]
    fn test_decode_numpress_linear() {
        let mzs: Vec<f64> = (0..250).map(|i| 150.0 + i as f64 * 3.3371).collect();
        let scaling = numpress::optimal_scaling(&mzs);
        let packed = numpress::numpress_compress(&mzs, scaling).unwrap();

        for (compression, raw) in [
            (BinaryCompressionType::NumpressLinear, packed.clone()),
            (BinaryCompressionType::NumpressLinearZlib, zlib_compress(&packed)),
        ] {
            let da = numpress_array(ArrayType::MZArray, BinaryDataArrayType::Float64, compression, &raw);
            let decoded = da.to_f64().unwrap();
            assert_eq!(decoded.len(), mzs.len(), "{compression}");
            for (a, b) in decoded.iter().zip(mzs.iter()) {
                assert!((a - b).abs() < 1e-4, "{compression}: {a} != {b}");
            }
            let narrowed = da.to_f32().unwrap();
            assert!((narrowed[10] - mzs[10] as f32).abs() < 1e-3);
        }
    }

    #[cfg(feature = "numpress")]
    #[test]
    fn test_decode_numpress_slof() {
        let intensities: Vec<f64> = (0..250)
            .map(|i| ((i * 7919) % 1000) as f64 * 37.5)
            .collect();
        let scaling = numpress::optimal_slof_fixed_point(&intensities);
        let mut packed = Bytes::new();
        numpress::encode_slof(&intensities, &mut packed, scaling).unwrap();

        for (compression, raw) in [
            (BinaryCompressionType::NumpressSLOF, packed.clone()),
            (BinaryCompressionType::NumpressSLOFZlib, zlib_compress(&packed)),
        ] {
            let da = numpress_array(
                ArrayType::IntensityArray,
                BinaryDataArrayType::Float32,
                compression,
                &raw,
            );
            assert_eq!(da.data_len().unwrap(), intensities.len());
            let decoded = da.to_f32().unwrap();
            for (a, b) in decoded.iter().zip(intensities.iter()) {
                let tolerance = (*b as f32) * 1e-3 + 1e-2;
                assert!((a - *b as f32).abs() <= tolerance, "{compression}: {a} != {b}");
            }
            let widened = da.to_f64().unwrap();
            assert!((widened[3] - intensities[3]).abs() <= intensities[3] * 1e-3 + 1e-2);
        }
    }

    #[test]
    fn test_decode_failures() {
        let mut da = DataArray::wrap(
            &ArrayType::MZArray,
            BinaryDataArrayType::Float64,
            b"@@not base64@@".to_vec(),
        );
        assert!(matches!(da.decode(), Err(ArrayRetrievalError::InvalidBase64(_))));

        // A valid base64 string that is not a zlib stream
        da.data = encode_f64(&[1.0, 2.0], false);
        da.compression = BinaryCompressionType::Zlib;
        assert!(matches!(
            da.decode(),
            Err(ArrayRetrievalError::DecompressionError(_))
        ));

        // Truncated mid-value
        da.compression = BinaryCompressionType::NoCompression;
        let raw: Bytes = [1.0f64, 2.0].iter().flat_map(|v| v.to_le_bytes()).take(12).collect();
        da.data = base64_simd::STANDARD.encode_to_string(&raw).into_bytes();
        assert_eq!(da.to_f64(), Err(ArrayRetrievalError::DataTypeSizeMismatch));
    }
}
