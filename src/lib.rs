//! Versioned labeled-image store and reproducible dataset builder.
//!
//! Images are imported into a [`Store`] that remembers each image's label and which
//! conversions have been applied to it. [`Dataset`]s are derived from the store as
//! private copies, turned into `X`/`Y` arrays, and record how that was done in a
//! [`ProcessManifest`] so the same preparation can be replayed on new images.

pub mod bundle;
pub mod class;
pub mod config;
pub mod dataset;
pub mod error;
pub mod ops;
pub mod parallel;
pub mod retrieval;
pub mod store;

pub use bundle::ModelBundle;
pub use class::Class;
pub use config::Config;
pub use dataset::{Dataset, ProcessManifest};
pub use error::{Error, Result};
pub use ops::{Conversion, Transform};
pub use parallel::WorkerPool;
pub use store::{DatasetRow, ImageRecord, Store};
