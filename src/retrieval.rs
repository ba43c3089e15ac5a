//! Getting source images into a blob directory.
//!
//! Retrieval copies local files or downloads URLs into a directory under a freshly
//! generated name. A source that cannot be resolved (bad extension, content that
//! does not sniff as the claimed format, unreachable URL) yields `None`; callers
//! drop it and carry on with the rest of the batch.

use image::ImageFormat;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::Result;

/// Extensions accepted as images
pub const IMAGE_FORMATS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "tiff", "tif", "bmp"];

/// Where an import source comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Path,
    Url,
}

/// Resolve one source into `dir`, returning the stored file name.
pub fn retrieve(kind: SourceKind, dir: &Path, source: &str) -> Result<Option<String>> {
    match kind {
        SourceKind::Path => copy_to(dir, Path::new(source)),
        SourceKind::Url => download_to(dir, source),
    }
}

/// Image extension of a file name, lowercased, if it is an accepted one
pub fn image_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_string_lossy().to_lowercase();
    IMAGE_FORMATS.contains(&ext.as_str()).then_some(ext)
}

/// Does the file content match the format its extension claims?
fn content_matches(path: &Path, extension: &str) -> bool {
    let Ok(bytes) = fs::read(path) else {
        return false;
    };
    let Some(expected) = ImageFormat::from_extension(extension) else {
        return false;
    };
    matches!(image::guess_format(&bytes), Ok(found) if found == expected)
}

/// Generate a unique stored file name with the given extension
fn generate_file_name(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), extension)
}

/// Copy a local image into `dir`.
pub fn copy_to(dir: &Path, path: &Path) -> Result<Option<String>> {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

    let Some(extension) = image_extension(&name) else {
        warn!("Skipping {}: not an image extension", path.display());
        return Ok(None);
    };
    if !path.is_file() || !content_matches(path, &extension) {
        warn!("Skipping {}: missing or not a valid {} file", path.display(), extension);
        return Ok(None);
    }

    let file_name = generate_file_name(&extension);
    let new_path = dir.join(&file_name);
    if let Err(e) = fs::copy(path, &new_path) {
        warn!("Skipping {}: copy failed: {}", path.display(), e);
        discard(&new_path);
        return Ok(None);
    }
    debug!("Copied {} -> {}", path.display(), file_name);
    Ok(Some(file_name))
}

/// Download an image URL into `dir`.
pub fn download_to(dir: &Path, url: &str) -> Result<Option<String>> {
    let name = url.rsplit('/').next().unwrap_or_default().to_lowercase();
    let name = name.split(['?', '#']).next().unwrap_or_default();

    let Some(extension) = image_extension(name) else {
        warn!("Skipping {}: not an image URL", url);
        return Ok(None);
    };

    let bytes = match reqwest::blocking::get(url).and_then(|r| r.error_for_status()).and_then(|r| r.bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Skipping {}: download failed: {}", url, e);
            return Ok(None);
        }
    };

    let file_name = generate_file_name(&extension);
    let new_path = dir.join(&file_name);
    if let Err(e) = fs::write(&new_path, &bytes) {
        warn!("Skipping {}: could not store download: {}", url, e);
        discard(&new_path);
        return Ok(None);
    }

    if content_matches(&new_path, &extension) {
        debug!("Downloaded {} -> {}", url, file_name);
        Ok(Some(file_name))
    } else {
        warn!("Skipping {}: content is not a valid {} file", url, extension);
        discard(&new_path);
        Ok(None)
    }
}

/// Remove a partially written file, if any
fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

/// Every file with an image extension under `dir`, recursively, sorted.
pub fn scan_folder(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| image_extension(&n.to_string_lossy()))
                .is_some()
        })
        .collect();

    found.sort();
    found
}
