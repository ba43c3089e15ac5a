//! Rows of the store and dataset logs.

use std::collections::BTreeMap;

use crate::class::Class;
use crate::ops::Conversion;

/// A single image in the store
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Log index, strictly increasing and never reused
    pub index: i64,
    /// File name inside the store's image directory (e.g. "3f2a...c1.png")
    pub file: String,
    pub class: Class,
    /// One flag per registered conversion; true once applied to `file`
    pub flags: BTreeMap<Conversion, bool>,
}

impl ImageRecord {
    /// Has `conversion` already been applied to this file?
    pub fn is_converted(&self, conversion: Conversion) -> bool {
        self.flags.get(&conversion).copied().unwrap_or(false)
    }

    /// The conversions from `requested`, in order, not yet applied to this file
    pub fn pending(&self, requested: &[Conversion]) -> Vec<Conversion> {
        let mut pending: Vec<Conversion> = Vec::with_capacity(requested.len());
        for &c in requested {
            if !self.is_converted(c) && !pending.contains(&c) {
                pending.push(c);
            }
        }
        pending
    }
}

/// A row of a dataset log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub index: i64,
    /// File name inside the dataset's image directory
    pub file: String,
    pub class: Class,
}

/// Flags for a freshly imported image: every conversion false
pub fn unconverted_flags() -> BTreeMap<Conversion, bool> {
    Conversion::ALL.into_iter().map(|c| (c, false)).collect()
}
