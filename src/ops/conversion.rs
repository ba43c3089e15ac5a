//! File-level image conversions.
//!
//! A conversion rewrites an image file. Without a destination it works in place on
//! the file it is given (possibly renaming it); with a destination it writes the
//! result there and leaves the input untouched.

use image::{imageops::FilterType, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Width images are scaled to by [`Conversion::SizeScaled`]
pub const SCALED_WIDTH: u32 = 400;
/// Height images are scaled to by [`Conversion::SizeScaled`]
pub const SCALED_HEIGHT: u32 = 300;

/// A named, file-to-file conversion
///
/// The string key is what appears as a flag column in the store log and in the
/// `Conversions` list of a process manifest.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Conversion {
    /// Re-encode as PNG, changing the extension to `.png`
    #[serde(rename = "PNG")]
    Png,
    /// Single-channel 8-bit grayscale
    #[serde(rename = "Grayscale")]
    Grayscale,
    /// Exact resize to 400x300
    #[serde(rename = "Size Scaled")]
    SizeScaled,
}

impl Conversion {
    /// Every registered conversion, in flag column order
    pub const ALL: [Conversion; 3] = [Conversion::Png, Conversion::Grayscale, Conversion::SizeScaled];

    /// Stable string key
    pub fn key(self) -> &'static str {
        match self {
            Conversion::Png => "PNG",
            Conversion::Grayscale => "Grayscale",
            Conversion::SizeScaled => "Size Scaled",
        }
    }

    /// Apply this conversion to the image at `path`.
    ///
    /// With `dest == None` the file is rewritten in place (PNG conversion writes a
    /// `.png` sibling and removes the original). Returns the path of the result.
    pub fn apply(self, path: &Path, dest: Option<&Path>) -> Result<PathBuf> {
        if !path.exists() {
            return Err(Error::data_unavailable(path));
        }

        match self {
            Conversion::Png => convert_to_png(path, dest),
            Conversion::Grayscale => make_grayscale(path, dest),
            Conversion::SizeScaled => scale_image(path, dest),
        }
    }

    /// Apply several conversions in order, each one working on the previous output.
    ///
    /// Only the first step honours `dest`; later steps run in place on that result.
    pub fn apply_all(conversions: &[Conversion], path: &Path, dest: Option<&Path>) -> Result<PathBuf> {
        let mut current = path.to_path_buf();
        let mut dest = dest;

        for conversion in conversions {
            current = conversion.apply(&current, dest.take())?;
        }

        // Nothing applied but a destination was requested: still honour it
        if let Some(dest) = dest {
            fs::copy(path, dest)?;
            return Ok(dest.to_path_buf());
        }

        Ok(current)
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Conversion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Conversion::ALL
            .into_iter()
            .find(|c| c.key() == s)
            .ok_or_else(|| Error::UnknownConversion(s.to_string()))
    }
}

fn convert_to_png(path: &Path, dest: Option<&Path>) -> Result<PathBuf> {
    let new_path = match dest {
        Some(dest) => dest.to_path_buf(),
        None => path.with_extension("png"),
    };

    let img = image::open(path)?;
    img.save_with_format(&new_path, ImageFormat::Png)?;

    if dest.is_none() && new_path != path {
        fs::remove_file(path)?;
    }

    Ok(new_path)
}

fn make_grayscale(path: &Path, dest: Option<&Path>) -> Result<PathBuf> {
    let img = image::open(path)?;
    let gray = image::DynamicImage::ImageLuma8(img.to_luma8());

    let new_path = dest.unwrap_or(path).to_path_buf();
    gray.save(&new_path)?;
    Ok(new_path)
}

fn scale_image(path: &Path, dest: Option<&Path>) -> Result<PathBuf> {
    let img = image::open(path)?;
    let scaled = img.resize_exact(SCALED_WIDTH, SCALED_HEIGHT, FilterType::Lanczos3);

    let new_path = dest.unwrap_or(path).to_path_buf();
    scaled.save(&new_path)?;
    Ok(new_path)
}
