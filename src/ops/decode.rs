//! Decoding image files into arrays.

use image::DynamicImage;
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Decode an image file into an array of raw pixel values.
///
/// Single-channel images (8 or 16 bit) become `[height, width]`; everything else
/// becomes `[height, width, channels]` with the channel count of the decoded pixel
/// type. Values keep their stored range (0-255, 0-65535, or as stored for float).
pub fn load_image_array(path: &Path) -> Result<ArrayD<f32>> {
    if !path.exists() {
        return Err(Error::data_unavailable(path));
    }

    let img = image::open(path)?;
    let (width, height) = (img.width() as usize, img.height() as usize);

    let (channels, values): (usize, Vec<f32>) = match img {
        DynamicImage::ImageLuma8(buf) => (1, widen(buf.into_raw())),
        DynamicImage::ImageLumaA8(buf) => (2, widen(buf.into_raw())),
        DynamicImage::ImageRgb8(buf) => (3, widen(buf.into_raw())),
        DynamicImage::ImageRgba8(buf) => (4, widen(buf.into_raw())),
        DynamicImage::ImageLuma16(buf) => (1, widen(buf.into_raw())),
        DynamicImage::ImageLumaA16(buf) => (2, widen(buf.into_raw())),
        DynamicImage::ImageRgb16(buf) => (3, widen(buf.into_raw())),
        DynamicImage::ImageRgba16(buf) => (4, widen(buf.into_raw())),
        DynamicImage::ImageRgb32F(buf) => (3, buf.into_raw()),
        DynamicImage::ImageRgba32F(buf) => (4, buf.into_raw()),
        other => (4, widen(other.to_rgba8().into_raw())),
    };

    let shape = match channels {
        1 => vec![height, width],
        c => vec![height, width, c],
    };
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
}

fn widen<T: Into<f32>>(data: Vec<T>) -> Vec<f32> {
    data.into_iter().map(Into::into).collect()
}

/// Owned-path variant for the worker pool
pub(crate) fn load_owned(path: PathBuf) -> Result<ArrayD<f32>> {
    load_image_array(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_gray_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.png");
        GrayImage::from_fn(5, 3, |x, _| Luma([x as u8 * 10])).save(&path).unwrap();

        let arr = load_image_array(&path).unwrap();
        assert_eq!(arr.shape(), &[3, 5]);
        assert_eq!(arr[[2, 4]], 40.0);
    }

    #[test]
    fn test_rgb_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.png");
        RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])).save(&path).unwrap();

        let arr = load_image_array(&path).unwrap();
        assert_eq!(arr.shape(), &[2, 4, 3]);
        assert_eq!(arr[[1, 3, 2]], 3.0);
    }

    #[test]
    fn test_gray16_keeps_shape_and_depth() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep.png");
        ImageBuffer::<Luma<u16>, Vec<u16>>::from_fn(4, 3, |x, y| Luma([1000 * x as u16 + y as u16]))
            .save(&path)
            .unwrap();

        let arr = load_image_array(&path).unwrap();
        assert_eq!(arr.shape(), &[3, 4]);
        assert_eq!(arr[[2, 3]], 3002.0);
    }

    #[test]
    fn test_rgb16_keeps_three_channels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep_rgb.png");
        ImageBuffer::<Rgb<u16>, Vec<u16>>::from_pixel(2, 2, Rgb([500, 40000, 7]))
            .save(&path)
            .unwrap();

        let arr = load_image_array(&path).unwrap();
        assert_eq!(arr.shape(), &[2, 2, 3]);
        assert_eq!(arr[[1, 1, 1]], 40000.0);
    }

    #[test]
    fn test_missing_file_is_data_unavailable() {
        let err = load_image_array(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, Error::DataUnavailable(_)));
    }
}
