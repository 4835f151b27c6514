#[allow(unused)]
use std::io::prelude::*;

use indexmap::map::{Iter, Keys};
use indexmap::IndexMap;

/**
An ordered mapping from spectrum native ID to the byte offset of its
`<spectrum>` element in the source file.

The position of an entry is the spectrum's index, so the same map answers
both lookups by ID and by ordinal.
*/
#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OffsetIndex {
    /// The name of the index, as given by `<index name="...">`
    pub name: String,

    /// The mapping from ID to byte offset, ordered by occurrence
    #[cfg_attr(feature = "serde", serde(with = "indexmap::map::serde_seq"))]
    pub offsets: IndexMap<Box<str>, u64>,

    /// Whether the index was filled in, by reading it from the file or by
    /// scanning for it. An initialized index may still be empty.
    pub init: bool,
}

impl OffsetIndex {
    pub fn new(name: String) -> OffsetIndex {
        OffsetIndex {
            name,
            ..Default::default()
        }
    }

    /// Get the offset of the specified key
    #[inline]
    pub fn get(&self, key: &str) -> Option<u64> {
        self.offsets.get(key).copied()
    }

    /// Get the associated key and offset for the specified index position
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<(&str, u64)> {
        self.offsets
            .get_index(index)
            .map(|(key, offset)| (key.as_ref(), *offset))
    }

    /// Get the position in the index for a specific key
    #[inline]
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.offsets.get_index_of(key)
    }

    /// Insert `key` into the index with an offset value
    #[inline]
    pub fn insert<T: Into<Box<str>>>(&mut self, key: T, offset: u64) -> Option<u64> {
        self.offsets.insert(key.into(), offset)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn keys(&self) -> Keys<'_, Box<str>, u64> {
        self.offsets.keys()
    }

    /// Drop all entries and mark the index as uninitialized
    pub fn clear(&mut self) {
        self.offsets.clear();
        self.init = false;
    }

    pub fn iter(&self) -> Iter<'_, Box<str>, u64> {
        self.offsets.iter()
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.offsets.contains_key(key)
    }

    #[cfg(feature = "serde")]
    /// Write the index out in JSON format to `writer`
    pub fn to_writer<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer(writer, self)
    }

    #[cfg(feature = "serde")]
    /// Read an index in JSON format from `reader`
    pub fn from_reader<R: Read>(reader: R) -> serde_json::Result<Self> {
        serde_json::from_reader(reader)
    }
}
