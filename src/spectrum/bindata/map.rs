use std::collections::hash_map::Iter;
use std::collections::HashMap;

use super::array::DataArray;
use super::encodings::{ArrayRetrievalError, ArrayType};

/// The `<binaryDataArrayList>` of one spectrum, keyed by array kind
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BinaryArrayMap {
    pub byte_buffer_map: HashMap<ArrayType, DataArray>,
}

impl BinaryArrayMap {
    pub fn new() -> BinaryArrayMap {
        BinaryArrayMap {
            ..Default::default()
        }
    }

    /// Get the number of arrays in the map
    pub fn len(&self) -> usize {
        self.byte_buffer_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.byte_buffer_map.is_empty()
    }

    pub fn iter(&self) -> Iter<ArrayType, DataArray> {
        self.byte_buffer_map.iter()
    }

    /// Add a [`DataArray`] to the map by its [`ArrayType`] name
    pub fn add(&mut self, array: DataArray) {
        self.byte_buffer_map.insert(array.name.clone(), array);
    }

    pub fn get(&self, array_type: &ArrayType) -> Option<&DataArray> {
        self.byte_buffer_map.get(array_type)
    }

    pub fn get_mut(&mut self, array_type: &ArrayType) -> Option<&mut DataArray> {
        self.byte_buffer_map.get_mut(array_type)
    }

    pub fn has_array(&self, array_type: &ArrayType) -> bool {
        self.byte_buffer_map.contains_key(array_type)
    }

    pub fn clear(&mut self) {
        self.byte_buffer_map.clear();
    }

    /// Decode every array in place
    pub fn decode_all_arrays(&mut self) -> Result<(), ArrayRetrievalError> {
        for value in self.byte_buffer_map.values_mut() {
            value.decode_and_store()?;
        }
        Ok(())
    }

    /// Decode the m/z array as `f64`
    pub fn mzs(&self) -> Result<Vec<f64>, ArrayRetrievalError> {
        self.get(&ArrayType::MZArray)
            .ok_or(ArrayRetrievalError::NotFound(ArrayType::MZArray))?
            .to_f64()
    }

    /// Decode the intensity array as `f32`
    pub fn intensities(&self) -> Result<Vec<f32>, ArrayRetrievalError> {
        self.get(&ArrayType::IntensityArray)
            .ok_or(ArrayRetrievalError::NotFound(ArrayType::IntensityArray))?
            .to_f32()
    }
}
