//! The decoded signal of a spectrum and the decoding step that produces it.
use crate::spectrum::bindata::{ArrayRetrievalError, ArrayType, BinaryArrayMap, DataArray};

/// Paired m/z and intensity arrays, in ascending m/z order
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalData {
    pub mzs: Vec<f64>,
    pub intensities: Vec<f32>,
}

impl SignalData {
    /// Pair up two arrays, sorting both by m/z if they are not already sorted.
    ///
    /// Fails if the arrays differ in length.
    pub fn new(mzs: Vec<f64>, intensities: Vec<f32>) -> Result<Self, ArrayRetrievalError> {
        if mzs.len() != intensities.len() {
            return Err(ArrayRetrievalError::LengthMismatch {
                array: ArrayType::IntensityArray,
                expected: mzs.len(),
                found: intensities.len(),
            });
        }
        let mut this = Self { mzs, intensities };
        this.sort();
        Ok(this)
    }

    fn is_sorted(&self) -> bool {
        self.mzs.windows(2).all(|w| w[0] <= w[1])
    }

    fn sort(&mut self) {
        if self.is_sorted() {
            return;
        }
        let mut order: Vec<usize> = (0..self.mzs.len()).collect();
        order.sort_by(|a, b| self.mzs[*a].total_cmp(&self.mzs[*b]));
        self.mzs = order.iter().map(|i| self.mzs[*i]).collect();
        self.intensities = order.iter().map(|i| self.intensities[*i]).collect();
    }

    pub fn len(&self) -> usize {
        self.mzs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mzs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.mzs.iter().copied().zip(self.intensities.iter().copied())
    }

    /// The most intense point, if any
    pub fn base_peak(&self) -> Option<(f64, f32)> {
        self.iter().max_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn total_ion_current(&self) -> f32 {
        self.intensities.iter().sum()
    }
}

/// Where a spectrum's signal is in its one-time decoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalState<'a> {
    Undecoded,
    Decoded(&'a SignalData),
    Failed(&'a ArrayRetrievalError),
}

impl SignalState<'_> {
    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

fn decode_checked<T>(
    array: &DataArray,
    default_array_length: usize,
    decode: impl Fn(&DataArray) -> Result<Vec<T>, ArrayRetrievalError>,
) -> Result<Vec<T>, ArrayRetrievalError> {
    let values = decode(array)?;
    let expected = array.item_count.unwrap_or(default_array_length);
    if values.len() != expected {
        return Err(ArrayRetrievalError::LengthMismatch {
            array: array.name.clone(),
            expected,
            found: values.len(),
        });
    }
    Ok(values)
}

/// Decode the m/z and intensity arrays of `arrays` into [`SignalData`].
///
/// Each array must hold as many values as its `arrayLength`, or failing that
/// `default_array_length`. A spectrum declaring zero points may omit both arrays.
pub fn decode_signal(
    arrays: &BinaryArrayMap,
    default_array_length: usize,
) -> Result<SignalData, ArrayRetrievalError> {
    let mz_array = arrays.get(&ArrayType::MZArray);
    let intensity_array = arrays.get(&ArrayType::IntensityArray);
    match (mz_array, intensity_array) {
        (None, None) if default_array_length == 0 => Ok(SignalData::default()),
        (Some(mz_array), Some(intensity_array)) => {
            let mzs = decode_checked(mz_array, default_array_length, DataArray::to_f64)?;
            let intensities =
                decode_checked(intensity_array, default_array_length, DataArray::to_f32)?;
            SignalData::new(mzs, intensities)
        }
        (None, _) => Err(ArrayRetrievalError::NotFound(ArrayType::MZArray)),
        (_, None) => Err(ArrayRetrievalError::NotFound(ArrayType::IntensityArray)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::bindata::{BinaryCompressionType, BinaryDataArrayType};

    fn array_of<T: Copy>(
        name: ArrayType,
        dtype: BinaryDataArrayType,
        values: &[T],
        to_le: fn(T) -> Vec<u8>,
    ) -> DataArray {
        let raw: Vec<u8> = values.iter().flat_map(|v| to_le(*v)).collect();
        let mut da = DataArray::wrap(
            &name,
            dtype,
            base64_simd::STANDARD.encode_to_string(&raw).into_bytes(),
        );
        da.compression = BinaryCompressionType::NoCompression;
        da
    }

    fn make_map(mzs: &[f64], intensities: &[f32]) -> BinaryArrayMap {
        let mut map = BinaryArrayMap::new();
        map.add(array_of(
            ArrayType::MZArray,
            BinaryDataArrayType::Float64,
            mzs,
            |v| v.to_le_bytes().to_vec(),
        ));
        map.add(array_of(
            ArrayType::IntensityArray,
            BinaryDataArrayType::Float32,
            intensities,
            |v| v.to_le_bytes().to_vec(),
        ));
        map
    }

    #[test]
    fn test_decode_signal_sorts() {
        let map = make_map(&[300.0, 100.0, 200.0], &[3.0, 1.0, 2.0]);
        let signal = decode_signal(&map, 3).unwrap();
        assert_eq!(signal.mzs, vec![100.0, 200.0, 300.0]);
        assert_eq!(signal.intensities, vec![1.0, 2.0, 3.0]);
        assert_eq!(signal.base_peak(), Some((300.0, 3.0)));
        assert_eq!(signal.total_ion_current(), 6.0);
    }

    #[test]
    fn test_decode_signal_length_checks() {
        let map = make_map(&[100.0, 200.0], &[1.0, 2.0]);
        assert!(matches!(
            decode_signal(&map, 5),
            Err(ArrayRetrievalError::LengthMismatch { expected: 5, found: 2, .. })
        ));

        let map = make_map(&[100.0, 200.0], &[1.0]);
        assert!(decode_signal(&map, 2).is_err());

        let empty = BinaryArrayMap::new();
        assert!(decode_signal(&empty, 0).unwrap().is_empty());
        assert_eq!(
            decode_signal(&empty, 3),
            Err(ArrayRetrievalError::NotFound(ArrayType::MZArray))
        );
    }

    #[test]
    fn test_explicit_array_length_wins() {
        let mut map = make_map(&[100.0, 200.0], &[1.0, 2.0]);
        for (_, array) in map.byte_buffer_map.iter_mut() {
            array.item_count = Some(2);
        }
        assert_eq!(decode_signal(&map, 10).unwrap().len(), 2);
    }
}
