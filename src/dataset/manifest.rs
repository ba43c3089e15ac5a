//! Process manifest of a dataset
//!
//! Records how a dataset's arrays were produced so the same feature construction
//! can be replayed against new images. Stored as `process.json`:
//! `{"Conversions": [...], "Transforms": [...], "Bundled": bool|null}`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::ops::{Conversion, Transform};

/// File name of the manifest inside a dataset directory
pub const MANIFEST_FILE: &str = "process.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessManifest {
    /// Conversions applied when the images were copied into the dataset
    #[serde(rename = "Conversions")]
    pub conversions: Vec<Conversion>,

    /// Transforms applied by the last feature build
    #[serde(rename = "Transforms")]
    pub transforms: Vec<Transform>,

    /// Whether labels were bundled into binary classes; `None` until labels are built
    #[serde(rename = "Bundled")]
    pub bundled: Option<bool>,
}

impl ProcessManifest {
    /// Manifest of a freshly created dataset
    pub fn new(conversions: Vec<Conversion>) -> Self {
        Self {
            conversions,
            transforms: Vec::new(),
            bundled: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read the manifest of the dataset rooted at `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(dir.join(MANIFEST_FILE))?)
    }

    /// Write the whole manifest, replacing any previous one
    pub fn save(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    /// Load, modify and rewrite the manifest in `dir`
    pub fn update(dir: &Path, f: impl FnOnce(&mut ProcessManifest)) -> Result<ProcessManifest> {
        let mut manifest = Self::load(dir)?;
        f(&mut manifest);
        manifest.save(dir)?;
        Ok(manifest)
    }
}
