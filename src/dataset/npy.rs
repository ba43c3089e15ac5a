//! Minimal NumPy `.npy` (format 1.0) reader and writer.
//!
//! Only what the pipeline produces is supported: little-endian `<f4` feature
//! arrays and `<i8` label arrays in C order. Writes go to a temporary sibling
//! that is renamed into place, so a reader never sees a half-written array.

use ndarray::{ArrayD, IxDyn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const MAGIC: &[u8] = b"\x93NUMPY";
/// Header (magic, version, length and dict) is padded to this alignment
const ALIGN: usize = 64;

/// Element types stored in `.npy` files
pub trait NpyElement: Copy {
    const DESCR: &'static str;
    const SIZE: usize;

    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

impl NpyElement for f32 {
    const DESCR: &'static str = "<f4";
    const SIZE: usize = 4;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl NpyElement for i64 {
    const DESCR: &'static str = "<i8";
    const SIZE: usize = 8;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        i64::from_le_bytes(buf)
    }
}

fn shape_tuple(shape: &[usize]) -> String {
    match shape {
        [n] => format!("({},)", n),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Encode an array as `.npy` bytes
pub fn encode<T: NpyElement>(arr: &ArrayD<T>) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        T::DESCR,
        shape_tuple(arr.shape())
    );
    // magic(6) + version(2) + header length(2) + header + trailing newline
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + arr.len() * T::SIZE);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    // iter() walks in logical (C) order regardless of memory layout
    for &v in arr.iter() {
        v.write_le(&mut out);
    }
    out
}

/// Decode `.npy` bytes written by [`encode`]
pub fn decode<T: NpyElement>(bytes: &[u8]) -> Result<ArrayD<T>> {
    if bytes.len() < 10 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::array_format("missing .npy magic"));
    }
    if bytes[6] != 1 {
        return Err(Error::array_format(format!("unsupported .npy version {}", bytes[6])));
    }

    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = 10 + header_len;
    if bytes.len() < data_start {
        return Err(Error::array_format("truncated header"));
    }
    let header = std::str::from_utf8(&bytes[10..data_start])
        .map_err(|_| Error::array_format("header is not UTF-8"))?;

    if !header.contains(&format!("'descr': '{}'", T::DESCR)) {
        return Err(Error::array_format(format!("expected dtype {}", T::DESCR)));
    }
    if header.contains("'fortran_order': True") {
        return Err(Error::array_format("Fortran order is not supported"));
    }
    let shape = parse_shape(header)?;

    let count: usize = shape.iter().product();
    let data = &bytes[data_start..];
    if data.len() != count * T::SIZE {
        return Err(Error::array_format(format!(
            "expected {} bytes of data, found {}",
            count * T::SIZE,
            data.len()
        )));
    }

    let values = data.chunks_exact(T::SIZE).map(T::read_le).collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
}

fn parse_shape(header: &str) -> Result<Vec<usize>> {
    let start = header
        .find("'shape': (")
        .ok_or_else(|| Error::array_format("header has no shape"))?
        + "'shape': (".len();
    let end = header[start..]
        .find(')')
        .ok_or_else(|| Error::array_format("unterminated shape"))?
        + start;

    header[start..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| Error::array_format(format!("bad dimension {:?}", s)))
        })
        .collect()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write an array to `path`, replacing any existing file atomically
pub fn write<T: NpyElement>(path: &Path, arr: &ArrayD<T>) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, encode(arr))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read<T: NpyElement>(path: &Path) -> Result<ArrayD<T>> {
    if !path.exists() {
        return Err(Error::data_unavailable(path));
    }
    decode(&fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_header_is_aligned() {
        let bytes = encode(&array![[1.0_f32, 2.0], [3.0, 4.0]].into_dyn());
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % ALIGN, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 16);
    }

    #[test]
    fn test_header_text() {
        let bytes = encode(&array![1_i64, 2, 3].into_dyn());
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let text = String::from_utf8_lossy(&bytes[10..10 + header_len]);
        assert!(text.starts_with("{'descr': '<i8', 'fortran_order': False, 'shape': (3,), }"));
    }

    #[test]
    fn test_file_round_trip_3d() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("X.npy");
        let arr = ArrayD::from_shape_vec(IxDyn(&[2, 3, 4]), (0..24).map(|v| v as f32 * 0.5).collect())
            .unwrap();

        write(&path, &arr).unwrap();
        let restored: ArrayD<f32> = read(&path).unwrap();

        assert_eq!(restored, arr);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_wrong_dtype_rejected() {
        let bytes = encode(&array![1_i64].into_dyn());
        assert!(matches!(decode::<f32>(&bytes), Err(Error::ArrayFormat(_))));
    }

    #[test]
    fn test_empty_array() {
        let arr = ArrayD::<f32>::zeros(IxDyn(&[0]));
        let restored: ArrayD<f32> = decode(&encode(&arr)).unwrap();
        assert_eq!(restored.shape(), &[0]);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read::<f32>(&dir.path().join("X.npy")).unwrap_err();
        assert!(matches!(err, Error::DataUnavailable(_)));
    }
}
