//! Image operations
//!
//! - File-to-file conversions applied to stored images (conversion.rs)
//! - Array-to-array transforms applied when building features (transform.rs)
//! - Decoding image files into arrays (decode.rs)

pub mod conversion;
pub mod decode;
pub mod transform;

pub use conversion::Conversion;
pub use decode::load_image_array;
pub use transform::Transform;
