//! Array-level transforms applied while building a feature array.

use ndarray::{Array1, ArrayD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A named, pure array-to-array transform
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transform {
    /// Scale pixel values into [0, 1]
    #[serde(rename = "Scale Pixels")]
    ScalePixels,
    /// Collapse to one dimension (row-major)
    #[serde(rename = "Flatten")]
    Flatten,
}

impl Transform {
    pub const ALL: [Transform; 2] = [Transform::ScalePixels, Transform::Flatten];

    /// Stable string key
    pub fn key(self) -> &'static str {
        match self {
            Transform::ScalePixels => "Scale Pixels",
            Transform::Flatten => "Flatten",
        }
    }

    /// Apply the transform, always producing a new array
    pub fn apply(self, arr: &ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Transform::ScalePixels => scale_pixels(arr),
            Transform::Flatten => flatten(arr),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Transform::ALL
            .into_iter()
            .find(|t| t.key() == s)
            .ok_or_else(|| Error::UnknownTransform(s.to_string()))
    }
}

/// Values already in [0, 1] are copied unchanged; anything larger is treated as
/// 8-bit and divided by 255.
fn scale_pixels(arr: &ArrayD<f32>) -> ArrayD<f32> {
    let max = arr.iter().copied().fold(0.0_f32, f32::max);
    if max > 1.0 {
        arr.mapv(|v| v / 255.0)
    } else {
        arr.to_owned()
    }
}

fn flatten(arr: &ArrayD<f32>) -> ArrayD<f32> {
    arr.iter().copied().collect::<Array1<f32>>().into_dyn()
}
