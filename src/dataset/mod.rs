//! Datasets derived from the store
//!
//! A dataset is a directory `datasets/dataset-<id>/` holding:
//! - `images/`      private copies of its images (never shared with the store)
//! - `log.db`       `Index`, `File`, `Class` per image
//! - `process.json` the process manifest
//! - `X.npy`, `Y.npy` feature and label arrays once built
//!
//! Ids are the smallest index not currently used by a dataset directory, so an id
//! is reused after its dataset is deleted. Allocation assumes a single writer.

pub mod manifest;
pub mod npy;

use ndarray::{Array1, ArrayD, Axis, Ix1, IxDyn};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::class::Class;
use crate::error::{Error, Result};
use crate::ops::{decode, Conversion, Transform};
use crate::parallel::WorkerPool;
use crate::retrieval::SourceKind;
use crate::store::log::DatasetLog;
use crate::store::{self, DatasetRow, Store};

pub use manifest::ProcessManifest;

const DATASET_PREFIX: &str = "dataset-";
/// Image directory inside a dataset
pub const IMAGES_DIR: &str = "images";
/// Feature array file
pub const X_FILE: &str = "X.npy";
/// Label array file
pub const Y_FILE: &str = "Y.npy";

/// Handle to an existing dataset directory
#[derive(Debug, Clone)]
pub struct Dataset {
    id: u32,
    dir: PathBuf,
    pool: WorkerPool,
}

impl Dataset {
    /// Derive a new dataset from the store images named in `files`.
    ///
    /// Each image is copied into the dataset and the conversions in `conversions`
    /// that the store has not already applied to it are applied to the copy. The
    /// store itself is not modified. If anything fails the new dataset directory is
    /// removed again.
    pub fn derive(store: &Store, files: &[String], conversions: &[Conversion]) -> Result<Dataset> {
        let dataset = Self::create(store, conversions)?;

        match dataset.copy_from_store(store, files, conversions) {
            Ok(count) => {
                info!("Created dataset-{} with {} images", dataset.id, count);
                Ok(dataset)
            }
            Err(e) => {
                warn!("Deriving dataset-{} failed: {}", dataset.id, e);
                fs::remove_dir_all(&dataset.dir)?;
                Err(e)
            }
        }
    }

    /// Create a dataset from sources outside the store (e.g. a held-out test set).
    ///
    /// Sources are retrieved straight into the dataset and every conversion in
    /// `conversions` is applied. Unresolvable sources are dropped.
    pub fn import(
        store: &Store,
        sources: &[String],
        labels: Option<&[Class]>,
        from_urls: bool,
        conversions: &[Conversion],
    ) -> Result<Dataset> {
        let labels = store::resolve_labels(sources.len(), labels)?;
        let dataset = Self::create(store, conversions)?;

        match dataset.import_sources(sources, labels, from_urls, conversions) {
            Ok(count) => {
                info!("Imported {} images into dataset-{}", count, dataset.id);
                Ok(dataset)
            }
            Err(e) => {
                warn!("Importing into dataset-{} failed: {}", dataset.id, e);
                fs::remove_dir_all(&dataset.dir)?;
                Err(e)
            }
        }
    }

    /// Open an existing dataset
    pub fn open(store: &Store, id: u32) -> Result<Dataset> {
        let dir = dataset_dir(&store.datasets_dir(), id);
        if !dir.is_dir() {
            return Err(Error::DatasetNotFound(id));
        }
        Ok(Dataset {
            id,
            dir,
            pool: store.pool().clone(),
        })
    }

    /// Ids of all existing datasets, ascending
    pub fn list(store: &Store) -> Result<Vec<u32>> {
        Ok(existing_ids(&store.datasets_dir())?.into_iter().collect())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn images_dir(&self) -> PathBuf {
        self.dir.join(IMAGES_DIR)
    }

    pub fn x_path(&self) -> PathBuf {
        self.dir.join(X_FILE)
    }

    pub fn y_path(&self) -> PathBuf {
        self.dir.join(Y_FILE)
    }

    /// Rows of the dataset log in order
    pub fn rows(&self) -> Result<Vec<DatasetRow>> {
        DatasetLog::open(&self.dir)?.scan()
    }

    /// The process manifest as stored
    pub fn process(&self) -> Result<ProcessManifest> {
        ProcessManifest::load(&self.dir)
    }

    /// Decode every image, apply `transforms` in order and write `X`.
    ///
    /// Fails with [`Error::DataUnavailable`] if any image is missing; nothing is
    /// written in that case and a previous `X` stays as it was. On success the
    /// manifest's transforms are replaced by `transforms`. Returns the shape of `X`.
    pub fn make_feature_array(&self, transforms: &[Transform]) -> Result<Vec<usize>> {
        let images_dir = self.images_dir();
        let paths: Vec<PathBuf> = DatasetLog::open(&self.dir)?
            .files()?
            .into_iter()
            .map(|f| images_dir.join(f))
            .collect();

        let features = build_features(&self.pool, paths, transforms)?;
        npy::write(&self.x_path(), &features)?;
        ProcessManifest::update(&self.dir, |m| m.transforms = transforms.to_vec())?;

        info!("Built X for dataset-{} with shape {:?}", self.id, features.shape());
        Ok(features.shape().to_vec())
    }

    /// Encode every label and write `Y`.
    ///
    /// With `bundled` every class except `NotGraph` becomes 1 and `NotGraph` 0;
    /// otherwise the multi-class codes are kept. Returns the number of labels.
    pub fn make_label_array(&self, bundled: bool) -> Result<usize> {
        let labels: Array1<i64> = self
            .rows()?
            .iter()
            .map(|r| r.class.label_code(bundled))
            .collect();

        npy::write(&self.y_path(), &labels.clone().into_dyn())?;
        ProcessManifest::update(&self.dir, |m| m.bundled = Some(bundled))?;

        info!("Built Y for dataset-{} ({} labels, bundled: {})", self.id, labels.len(), bundled);
        Ok(labels.len())
    }

    /// Build `X` then `Y`.
    ///
    /// `Y` is only written once `X` succeeded. If the label step fails after a
    /// successful feature step, both arrays are removed and the manifest's
    /// transforms and bundling reset, so no unmatched pair is left behind.
    pub fn build_data(&self, transforms: &[Transform], bundled: bool) -> Result<()> {
        self.make_feature_array(transforms)?;

        if let Err(e) = self.make_label_array(bundled) {
            warn!("Label build for dataset-{} failed, removing X: {}", self.id, e);
            self.invalidate()?;
            return Err(e);
        }
        Ok(())
    }

    /// Load the built feature array
    pub fn load_features(&self) -> Result<ArrayD<f32>> {
        npy::read(&self.x_path())
    }

    /// Load the built label array
    pub fn load_labels(&self) -> Result<Array1<i64>> {
        Ok(npy::read::<i64>(&self.y_path())?.into_dimensionality::<Ix1>()?)
    }

    /// Remove the dataset directory and everything in it
    pub fn delete(self) -> Result<()> {
        fs::remove_dir_all(&self.dir)?;
        info!("Deleted dataset-{}", self.id);
        Ok(())
    }

    /// Allocate the next free id and lay out an empty dataset
    fn create(store: &Store, conversions: &[Conversion]) -> Result<Dataset> {
        let datasets_dir = store.datasets_dir();
        let id = next_free_id(&datasets_dir)?;
        let dir = dataset_dir(&datasets_dir, id);

        // create_dir (not _all) so a concurrent creator of the same id fails here
        fs::create_dir(&dir)?;
        fs::create_dir(dir.join(IMAGES_DIR))?;
        ProcessManifest::new(conversions.to_vec()).save(&dir)?;
        DatasetLog::open(&dir)?;

        debug!("Allocated dataset-{} at {}", id, dir.display());
        Ok(Dataset {
            id,
            dir,
            pool: store.pool().clone(),
        })
    }

    fn copy_from_store(&self, store: &Store, files: &[String], conversions: &[Conversion]) -> Result<usize> {
        let records: Vec<_> = store
            .records()?
            .into_iter()
            .filter(|r| files.contains(&r.file))
            .collect();

        if records.len() < files.len() {
            warn!(
                "{} requested files are not in the store",
                files.len() - records.len()
            );
        }

        let store_images = store.images_dir();
        let own_images = self.images_dir();
        let jobs: Vec<(PathBuf, PathBuf, Vec<Conversion>)> = records
            .iter()
            .map(|r| {
                (
                    store_images.join(&r.file),
                    own_images.join(&r.file),
                    store.pending_conversions(r, conversions),
                )
            })
            .collect();

        let new_files = self.pool.map_packed(copy_and_convert, jobs)?;

        let rows: Vec<(Option<i64>, String, Class)> = records
            .iter()
            .zip(new_files)
            .map(|(r, file)| (Some(r.index), file, r.class))
            .collect();
        DatasetLog::open(&self.dir)?.append(&rows)?;
        Ok(rows.len())
    }

    fn import_sources(
        &self,
        sources: &[String],
        labels: Vec<Class>,
        from_urls: bool,
        conversions: &[Conversion],
    ) -> Result<usize> {
        let kind = if from_urls { SourceKind::Url } else { SourceKind::Path };
        let images_dir = self.images_dir();

        let retrieved: Vec<(String, Class)> =
            store::retrieve_all(&self.pool, kind, &images_dir, sources)?
                .into_iter()
                .zip(labels)
                .filter_map(|(file, class)| file.map(|f| (f, class)))
                .collect();

        let jobs: Vec<(PathBuf, Vec<Conversion>)> = retrieved
            .iter()
            .map(|(file, _)| (images_dir.join(file), conversions.to_vec()))
            .collect();
        let new_files = self.pool.map_packed(store::convert_file, jobs)?;

        let rows: Vec<(Option<i64>, String, Class)> = retrieved
            .into_iter()
            .zip(new_files)
            .map(|((_, class), file)| (None, file, class))
            .collect();
        DatasetLog::open(&self.dir)?.append(&rows)?;
        Ok(rows.len())
    }

    /// Drop both arrays and the manifest fields describing them
    fn invalidate(&self) -> Result<()> {
        for path in [self.x_path(), self.y_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        ProcessManifest::update(&self.dir, |m| {
            m.transforms.clear();
            m.bundled = None;
        })?;
        Ok(())
    }
}

fn dataset_dir(datasets_dir: &Path, id: u32) -> PathBuf {
    datasets_dir.join(format!("{}{}", DATASET_PREFIX, id))
}

/// Ids of the `dataset-<n>` directories currently present
fn existing_ids(datasets_dir: &Path) -> Result<BTreeSet<u32>> {
    let mut ids = BTreeSet::new();
    for entry in fs::read_dir(datasets_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(id) = name
            .strip_prefix(DATASET_PREFIX)
            .and_then(|n| n.parse::<u32>().ok())
        {
            ids.insert(id);
        }
    }
    Ok(ids)
}

/// Smallest non-negative id not in use
fn next_free_id(datasets_dir: &Path) -> Result<u32> {
    let used = existing_ids(datasets_dir)?;
    Ok((0..).find(|i| !used.contains(i)).unwrap_or_default())
}

/// Copy a store image into a dataset and convert the copy
fn copy_and_convert(src: PathBuf, dest: PathBuf, conversions: Vec<Conversion>) -> Result<String> {
    if !src.exists() {
        return Err(Error::data_unavailable(&src));
    }
    fs::copy(&src, &dest)?;
    store::convert_file(dest, conversions)
}

/// Decode images, apply transforms in order and stack into one array.
///
/// Each transform is one pass of the pool over all images. Every transformed
/// image must have the same shape; the result has one leading row per image.
pub(crate) fn build_features(
    pool: &WorkerPool,
    paths: Vec<PathBuf>,
    transforms: &[Transform],
) -> Result<ArrayD<f32>> {
    let mut arrays = pool.map(decode::load_owned, paths)?;
    for &transform in transforms {
        arrays = pool.map(move |a: ArrayD<f32>| Ok(transform.apply(&a)), arrays)?;
    }
    stack_rows(&arrays)
}

fn stack_rows(arrays: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    let Some(first) = arrays.first() else {
        return Ok(ArrayD::zeros(IxDyn(&[0])));
    };

    let expected = first.shape();
    if let Some(bad) = arrays.iter().find(|a| a.shape() != expected) {
        return Err(Error::ShapeMismatch {
            expected: expected.to_vec(),
            found: bad.shape().to_vec(),
        });
    }

    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}
