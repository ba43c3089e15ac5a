//! The canonical image store
//!
//! Layout under the data root:
//! - `images/`   every imported image, named by a generated id
//! - `datasets/` one `dataset-<n>` directory per derived dataset
//! - `log.db`    one row per image with its label and conversion flags

pub mod data;
pub mod log;

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::class::Class;
use crate::error::{Error, Result};
use crate::ops::Conversion;
use crate::parallel::WorkerPool;
use crate::retrieval::{self, SourceKind};

pub use data::{DatasetRow, ImageRecord};
use log::{StoreLog, LOG_FILE};

/// Image blob directory name under the data root
pub const IMAGES_DIR: &str = "images";
/// Dataset directory name under the data root
pub const DATASETS_DIR: &str = "datasets";

/// Handle to an initialized data root
pub struct Store {
    root: PathBuf,
    log: StoreLog,
    pool: WorkerPool,
}

impl Store {
    /// Create the store layout under `root` if needed and open it.
    ///
    /// Calling this on an existing store is a no-op apart from opening it.
    pub fn init(root: impl AsRef<Path>, pool: WorkerPool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join(IMAGES_DIR))?;
        fs::create_dir_all(root.join(DATASETS_DIR))?;
        let log = StoreLog::open(&root.join(LOG_FILE))?;

        info!("Store ready at {} ({} images)", root.display(), log.count()?);
        Ok(Store { root, log, pool })
    }

    /// Open a store that [`init`](Self::init) already created under `root`.
    ///
    /// Unlike `init` this never creates anything, so a mistyped root is an error
    /// instead of a new empty store.
    pub fn open(root: impl AsRef<Path>, pool: WorkerPool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let db_path = root.join(LOG_FILE);

        if !db_path.is_file() || !root.join(IMAGES_DIR).is_dir() || !root.join(DATASETS_DIR).is_dir() {
            return Err(Error::invalid_input(format!(
                "no store at {}, run init first",
                root.display()
            )));
        }

        let log = StoreLog::open(&db_path)?;
        debug!("Opened store at {} ({} images)", root.display(), log.count()?);
        Ok(Store { root, log, pool })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join(DATASETS_DIR)
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn image_count(&self) -> Result<i64> {
        self.log.count()
    }

    /// All records in index order
    pub fn records(&self) -> Result<Vec<ImageRecord>> {
        self.log.scan()
    }

    pub fn record(&self, file: &str) -> Result<Option<ImageRecord>> {
        self.log.get(file)
    }

    /// Import images, returning the records that were added.
    ///
    /// `labels`, when given, must have one entry per source; otherwise every image
    /// gets [`Class::DEFAULT`]. Sources that cannot be retrieved are dropped.
    pub fn import(
        &mut self,
        sources: &[String],
        labels: Option<&[Class]>,
        from_urls: bool,
    ) -> Result<Vec<ImageRecord>> {
        let labels = resolve_labels(sources.len(), labels)?;
        let kind = if from_urls { SourceKind::Url } else { SourceKind::Path };

        let stored = retrieve_all(&self.pool, kind, &self.images_dir(), sources)?;
        let rows: Vec<(String, Class)> = stored
            .into_iter()
            .zip(labels)
            .filter_map(|(file, class)| file.map(|f| (f, class)))
            .collect();

        let dropped = sources.len() - rows.len();
        if dropped > 0 {
            warn!("Dropped {} of {} sources that could not be retrieved", dropped, sources.len());
        }

        let records = self.log.append(&rows)?;
        info!("Imported {} images into the store", records.len());
        Ok(records)
    }

    /// Import every image found under `dir` with the same label
    pub fn import_folder(&mut self, dir: &Path, label: Class) -> Result<Vec<ImageRecord>> {
        let sources: Vec<String> = retrieval::scan_folder(dir)
            .into_iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        info!("Found {} images under {}", sources.len(), dir.display());

        let labels = vec![label; sources.len()];
        self.import(&sources, Some(&labels), false)
    }

    /// Conversions from `conversions` not yet applied to `record`, in the order given
    pub fn pending_conversions(&self, record: &ImageRecord, conversions: &[Conversion]) -> Vec<Conversion> {
        record.pending(conversions)
    }

    /// Change the label of a stored image
    pub fn set_label(&self, file: &str, class: Class) -> Result<()> {
        if self.log.set_class(file, class)? {
            Ok(())
        } else {
            Err(Error::invalid_input(format!("no image {} in the store", file)))
        }
    }

    /// Destructively apply `conversions` to the stored files named in `files`.
    ///
    /// Each record only gets the conversions whose flag is still false, in the order
    /// given; records with nothing left are not touched. Every record is first
    /// converted into a staged sibling file. Only when all of them succeeded are the
    /// staged files moved over the originals and the log updated, so a failure
    /// leaves both the files and the log as they were. Returns the number of
    /// records converted.
    pub fn convert_images(&mut self, files: &[String], conversions: &[Conversion]) -> Result<usize> {
        let images_dir = self.images_dir();

        let work: Vec<(i64, String, Vec<Conversion>)> = self
            .log
            .scan()?
            .into_iter()
            .filter(|r| files.contains(&r.file))
            .map(|r| {
                let pending = self.pending_conversions(&r, conversions);
                (r.index, r.file, pending)
            })
            .filter(|(_, _, pending)| !pending.is_empty())
            .collect();

        if work.is_empty() {
            debug!("Nothing left to convert");
            return Ok(0);
        }

        let jobs: Vec<(PathBuf, Vec<Conversion>)> = work
            .iter()
            .map(|(_, file, pending)| (images_dir.join(file), pending.clone()))
            .collect();
        let results = self.pool.map(
            |(path, pending): (PathBuf, Vec<Conversion>)| Ok(Staged::convert(path, pending)),
            jobs,
        )?;

        let mut staged = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(s) => staged.push(s),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            warn!("Conversion failed, discarding {} staged files: {}", staged.len(), e);
            staged.iter().for_each(Staged::discard);
            return Err(e);
        }

        let converted = staged.iter().map(Staged::commit).collect::<Result<Vec<_>>>()?;

        let updates: Vec<(i64, String, Vec<Conversion>)> = work
            .into_iter()
            .zip(converted)
            .map(|((index, _, applied), new_file)| (index, new_file, applied))
            .collect();
        self.log.mark_converted(&updates)?;

        info!("Converted {} images", updates.len());
        Ok(updates.len())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Converted output of one stored file, waiting to replace it
#[derive(Debug)]
struct Staged {
    original: PathBuf,
    staged: PathBuf,
    target: PathBuf,
}

impl Staged {
    /// Convert `path` into a sibling file, leaving `path` itself untouched
    fn convert(path: PathBuf, conversions: Vec<Conversion>) -> Result<Staged> {
        if !path.exists() {
            return Err(Error::data_unavailable(&path));
        }

        // The staged name carries the final extension so every step decodes and
        // encodes the format the result will have
        let extension = if conversions.contains(&Conversion::Png) {
            "png".to_string()
        } else {
            path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default()
        };
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let staged = path.with_file_name(format!("{}.staged.{}", stem, extension));
        let target = path.with_extension(&extension);

        if let Err(e) = Conversion::apply_all(&conversions, &path, Some(&staged)) {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }

        Ok(Staged {
            original: path,
            staged,
            target,
        })
    }

    /// Move the staged file into place, returning the new file name
    fn commit(&self) -> Result<String> {
        fs::rename(&self.staged, &self.target)?;
        if self.target != self.original {
            fs::remove_file(&self.original)?;
        }
        file_name_of(&self.target)
    }

    fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.staged) {
            warn!("Could not remove staged file {}: {}", self.staged.display(), e);
        }
    }
}

/// Apply conversions in place to a file, returning the resulting file name
pub(crate) fn convert_file(path: PathBuf, conversions: Vec<Conversion>) -> Result<String> {
    let out = Conversion::apply_all(&conversions, &path, None)?;
    file_name_of(&out)
}

pub(crate) fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::invalid_input(format!("no file name in {}", path.display())))
}

pub(crate) fn resolve_labels(count: usize, labels: Option<&[Class]>) -> Result<Vec<Class>> {
    match labels {
        Some(labels) if labels.len() != count => Err(Error::invalid_input(format!(
            "{} labels given for {} sources",
            labels.len(),
            count
        ))),
        Some(labels) => Ok(labels.to_vec()),
        None => Ok(vec![Class::DEFAULT; count]),
    }
}

/// Retrieve every source into `dir` on the pool, `None` for dropped sources
pub(crate) fn retrieve_all(
    pool: &WorkerPool,
    kind: SourceKind,
    dir: &Path,
    sources: &[String],
) -> Result<Vec<Option<String>>> {
    let dir = dir.to_path_buf();
    pool.map(
        move |source: String| retrieval::retrieve(kind, &dir, &source),
        sources.to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn fixture_images(dir: &Path, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("src{}.jpg", i));
                RgbImage::from_pixel(20 + i as u32, 10, Rgb([i as u8 * 40, 0, 0]))
                    .save(&path)
                    .unwrap();
                path.to_string_lossy().to_string()
            })
            .collect()
    }

    fn new_store(root: &Path) -> Store {
        Store::init(root, WorkerPool::new(2).unwrap()).unwrap()
    }

    #[test]
    fn test_init_creates_layout_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");

        let store = new_store(&root);
        assert!(root.join(IMAGES_DIR).is_dir());
        assert!(root.join(DATASETS_DIR).is_dir());
        assert!(root.join(LOG_FILE).is_file());
        drop(store);

        let again = new_store(&root);
        assert_eq!(again.image_count().unwrap(), 0);
    }

    #[test]
    fn test_import_assigns_defaults_and_drops_failures() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());

        let mut sources = fixture_images(src.path(), 2);
        sources.insert(1, src.path().join("missing.png").to_string_lossy().to_string());

        let records = store.import(&sources, None, false).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.class == Class::Unlabeled));
        assert!(records.iter().all(|r| r.flags.values().all(|f| !f)));
        assert!(records[0].index < records[1].index);
        for r in &records {
            assert!(store.images_dir().join(&r.file).exists());
        }
    }

    #[test]
    fn test_import_keeps_labels_aligned_when_dropping() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());

        let good = fixture_images(src.path(), 2);
        let sources = vec![
            good[0].clone(),
            src.path().join("missing.png").to_string_lossy().to_string(),
            good[1].clone(),
        ];
        let labels = [Class::PieChart, Class::Map, Class::NotGraph];

        let records = store.import(&sources, Some(&labels), false).unwrap();
        let classes: Vec<Class> = records.iter().map(|r| r.class).collect();
        assert_eq!(classes, vec![Class::PieChart, Class::NotGraph]);
    }

    #[test]
    fn test_import_rejects_label_count_mismatch() {
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());
        let err = store
            .import(&["a.png".to_string()], Some(&[Class::Map, Class::Map]), false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_convert_is_idempotent() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());
        store.import(&fixture_images(src.path(), 3), None, false).unwrap();
        let files: Vec<String> = store.records().unwrap().into_iter().map(|r| r.file).collect();

        let converted = store.convert_images(&files, &Conversion::ALL).unwrap();
        assert_eq!(converted, 3);
        let after_first = store.records().unwrap();
        assert!(after_first.iter().all(|r| r.file.ends_with(".png")));
        assert!(after_first.iter().all(|r| r.flags.values().all(|f| *f)));

        let bytes_before: Vec<Vec<u8>> = after_first
            .iter()
            .map(|r| fs::read(store.images_dir().join(&r.file)).unwrap())
            .collect();

        let new_files: Vec<String> = after_first.iter().map(|r| r.file.clone()).collect();
        assert_eq!(store.convert_images(&new_files, &Conversion::ALL).unwrap(), 0);

        let after_second = store.records().unwrap();
        assert_eq!(after_first, after_second);
        for (r, before) in after_second.iter().zip(bytes_before) {
            assert_eq!(fs::read(store.images_dir().join(&r.file)).unwrap(), before);
        }
    }

    #[test]
    fn test_convert_only_targets_requested_files() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());
        let records = store.import(&fixture_images(src.path(), 2), None, false).unwrap();

        store
            .convert_images(&[records[0].file.clone()], &[Conversion::Grayscale])
            .unwrap();

        let after = store.records().unwrap();
        assert!(after[0].is_converted(Conversion::Grayscale));
        assert!(!after[1].is_converted(Conversion::Grayscale));
        assert_eq!(after[0].file, records[0].file);
    }

    #[test]
    fn test_failed_conversion_leaves_log_unchanged() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());
        let records = store.import(&fixture_images(src.path(), 2), None, false).unwrap();
        fs::remove_file(store.images_dir().join(&records[1].file)).unwrap();

        let files: Vec<String> = records.iter().map(|r| r.file.clone()).collect();
        let err = store.convert_images(&files, &[Conversion::Png]).unwrap_err();

        assert!(matches!(err, Error::DataUnavailable(_)));
        assert_eq!(store.records().unwrap(), records);
        // The surviving image is still there under its logged name, nothing staged left over
        assert!(store.images_dir().join(&records[0].file).exists());
        assert_eq!(fs::read_dir(store.images_dir()).unwrap().count(), 1);

        // and can still be converted on its own
        assert_eq!(store.convert_images(&files[..1], &[Conversion::Png]).unwrap(), 1);
        let converted = store.records().unwrap().remove(0);
        assert!(converted.file.ends_with(".png"));
        assert!(store.images_dir().join(&converted.file).exists());
        assert!(!store.images_dir().join(&records[0].file).exists());
    }

    #[test]
    fn test_failed_multi_step_conversion_keeps_every_logged_file() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());
        let records = store.import(&fixture_images(src.path(), 3), None, false).unwrap();
        fs::remove_file(store.images_dir().join(&records[2].file)).unwrap();

        let files: Vec<String> = records.iter().map(|r| r.file.clone()).collect();
        assert!(store.convert_images(&files, &Conversion::ALL).is_err());

        for record in store.records().unwrap().iter().take(2) {
            assert!(!record.is_converted(Conversion::Png));
            assert!(store.images_dir().join(&record.file).exists());
            assert_eq!(
                image::open(store.images_dir().join(&record.file)).unwrap().color(),
                image::ColorType::Rgb8
            );
        }
    }

    #[test]
    fn test_open_requires_init() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("typo");

        let err = Store::open(&root, WorkerPool::new(1).unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!root.exists());

        drop(new_store(&root));
        assert!(Store::open(&root, WorkerPool::new(1).unwrap()).is_ok());
    }

    #[test]
    fn test_set_label() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());
        let records = store.import(&fixture_images(src.path(), 1), None, false).unwrap();

        store.set_label(&records[0].file, Class::BoxPlot).unwrap();
        assert_eq!(store.record(&records[0].file).unwrap().unwrap().class, Class::BoxPlot);
        assert!(store.set_label("nope.png", Class::Map).is_err());
    }

    #[test]
    fn test_import_folder() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut store = new_store(root.path());
        fixture_images(src.path(), 3);

        let records = store.import_folder(src.path(), Class::LineGraph).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.class == Class::LineGraph));
    }
}
