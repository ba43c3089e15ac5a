//! Exported model bundles
//!
//! A trained model is only usable on images prepared the same way as its training
//! data, so it is exported together with the process manifest of that dataset.

use ndarray::ArrayD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::{self, Dataset, ProcessManifest};
use crate::error::{Error, Result};
use crate::ops::Conversion;
use crate::parallel::WorkerPool;
use crate::store;

/// A model paired with the manifest of the dataset it was trained on
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelBundle<M> {
    #[serde(rename = "Process")]
    pub process: ProcessManifest,
    #[serde(rename = "Model")]
    pub model: M,
}

impl<M: Serialize + DeserializeOwned> ModelBundle<M> {
    pub fn new(process: ProcessManifest, model: M) -> Self {
        Self { process, model }
    }

    /// Bundle `model` with the manifest of `dataset` and write it to `path` as JSON.
    ///
    /// The dataset must have been built, otherwise the manifest does not say how
    /// its features were made.
    pub fn export(dataset: &Dataset, model: M, path: &Path) -> Result<Self> {
        let process = dataset.process()?;
        if process.bundled.is_none() {
            return Err(Error::invalid_input(format!(
                "dataset-{} has no built arrays to export a model for",
                dataset.id()
            )));
        }

        let bundle = Self::new(process, model);
        bundle.save(path)?;
        info!("Exported model bundle for dataset-{} to {}", dataset.id(), path.display());
        Ok(bundle)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::data_unavailable(path));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Prepare new images exactly as the training features were prepared.
    ///
    /// Conversions run non-destructively: converted copies go to `scratch_dir` and
    /// the images at `paths` are left as they are. Rows follow the order of `paths`.
    pub fn features_for(
        &self,
        paths: &[PathBuf],
        scratch_dir: &Path,
        pool: &WorkerPool,
    ) -> Result<ArrayD<f32>> {
        fs::create_dir_all(scratch_dir)?;

        let jobs = paths
            .iter()
            .enumerate()
            .map(|(i, src)| -> Result<(PathBuf, PathBuf, Vec<Conversion>)> {
                let dest = scratch_dir.join(scratch_name(i, src, &self.process.conversions)?);
                Ok((src.clone(), dest, self.process.conversions.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let prepared = pool.map_packed(convert_copy, jobs)?;
        dataset::build_features(pool, prepared, &self.process.transforms)
    }
}

/// Scratch file name for the `i`-th input. A leading PNG conversion writes PNG
/// data, so the name must say so for the next decode to pick the right format.
fn scratch_name(i: usize, src: &Path, conversions: &[Conversion]) -> Result<String> {
    let name = store::file_name_of(src)?;
    let name = match conversions.first() {
        Some(Conversion::Png) => Path::new(&name)
            .with_extension("png")
            .to_string_lossy()
            .to_string(),
        _ => name,
    };
    Ok(format!("{}-{}", i, name))
}

fn convert_copy(src: PathBuf, dest: PathBuf, conversions: Vec<Conversion>) -> Result<PathBuf> {
    if !src.exists() {
        return Err(Error::data_unavailable(&src));
    }
    Conversion::apply_all(&conversions, &src, Some(&dest))
}
