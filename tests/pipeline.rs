//! End-to-end run: import, curate, derive, build, export and replay.

use chart_pipeline::{Class, Conversion, Dataset, Error, ModelBundle, Store, Transform, WorkerPool};
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_charts(dir: &Path) -> Vec<String> {
    let mut sources = Vec::new();

    let bar = dir.join("bar.jpg");
    RgbImage::from_fn(40, 30, |x, _| if x % 10 < 5 { Rgb([200, 30, 30]) } else { Rgb([255, 255, 255]) })
        .save(&bar)
        .unwrap();
    sources.push(bar);

    let photo = dir.join("photo.png");
    RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8 * 3, y as u8 * 4, 90])).save(&photo).unwrap();
    sources.push(photo);

    let pie = dir.join("pie.bmp");
    GrayImage::from_fn(20, 20, |x, y| Luma([if x + y < 20 { 10 } else { 240 }])).save(&pie).unwrap();
    sources.push(pie);

    sources.iter().map(|p| p.to_string_lossy().to_string()).collect()
}

#[test]
fn test_full_pipeline() {
    let src = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let sources = write_charts(src.path());

    // Store setup and import, with one source that cannot be resolved
    let mut store = Store::init(root.path(), WorkerPool::new(4).unwrap()).unwrap();
    let mut with_missing = sources.clone();
    with_missing.push(src.path().join("lost.png").to_string_lossy().to_string());
    let labels = [Class::BarGraph, Class::NotGraph, Class::PieChart, Class::Map];
    let imported = store.import(&with_missing, Some(&labels), false).unwrap();
    assert_eq!(imported.len(), 3);
    assert_eq!(store.image_count().unwrap(), 3);

    // Destructive PNG conversion on the store, then a dataset asking for more
    let files: Vec<String> = imported.iter().map(|r| r.file.clone()).collect();
    assert_eq!(store.convert_images(&files, &[Conversion::Png]).unwrap(), 3);
    let stored: Vec<String> = store.records().unwrap().into_iter().map(|r| r.file).collect();
    assert!(stored.iter().all(|f| f.ends_with(".png")));

    let dataset = Dataset::derive(&store, &stored, &Conversion::ALL).unwrap();
    assert_eq!(dataset.id(), 0);

    // Store images untouched by the dataset's grayscale and resize
    let first = image::open(store.images_dir().join(&stored[0])).unwrap();
    assert_eq!((first.width(), first.height()), (40, 30));

    dataset
        .build_data(&[Transform::ScalePixels, Transform::Flatten], true)
        .unwrap();
    let x = dataset.load_features().unwrap();
    let y = dataset.load_labels().unwrap();
    assert_eq!(x.shape(), &[3, 400 * 300]);
    assert_eq!(y.to_vec(), vec![1, 0, 1]);

    let rows = dataset.rows().unwrap();
    let indices: Vec<i64> = rows.iter().map(|r| r.index).collect();
    let store_indices: Vec<i64> = store.records().unwrap().iter().map(|r| r.index).collect();
    assert_eq!(indices, store_indices);

    let manifest = dataset.process().unwrap();
    assert_eq!(manifest.conversions, Conversion::ALL.to_vec());
    assert_eq!(manifest.transforms, vec![Transform::ScalePixels, Transform::Flatten]);
    assert_eq!(manifest.bundled, Some(true));

    // Export, reload, and replay the preparation on the original sources
    let bundle_path = root.path().join("model.json");
    ModelBundle::export(&dataset, vec![0.25_f32; 4], &bundle_path).unwrap();
    let bundle: ModelBundle<Vec<f32>> = ModelBundle::load(&bundle_path).unwrap();

    let scratch = TempDir::new().unwrap();
    let new_images: Vec<PathBuf> = sources.iter().map(PathBuf::from).collect();
    let features = bundle.features_for(&new_images, scratch.path(), store.pool()).unwrap();
    assert_eq!(features.shape(), x.shape());
    assert!(new_images.iter().all(|p| p.exists()));

    // Relabel and rebuild unbundled
    store.set_label(&stored[2], Class::TreeDiagram).unwrap();
    let second = Dataset::derive(&store, &stored, &[Conversion::Grayscale]).unwrap();
    assert_eq!(second.id(), 1);
    second.make_label_array(false).unwrap();
    assert_eq!(second.load_labels().unwrap().to_vec(), vec![15, 0, 2]);
    assert_eq!(dataset.load_labels().unwrap().to_vec(), vec![1, 0, 1]);

    // Listing and deletion
    assert_eq!(Dataset::list(&store).unwrap(), vec![0, 1]);
    dataset.delete().unwrap();
    assert!(matches!(Dataset::open(&store, 0), Err(Error::DatasetNotFound(0))));
    assert_eq!(Dataset::derive(&store, &[], &[]).unwrap().id(), 0);
    assert_eq!(store.image_count().unwrap(), 3);
}

#[test]
fn test_reopened_store_keeps_state() {
    let src = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let sources = write_charts(src.path());

    {
        let mut store = Store::init(root.path(), WorkerPool::new(2).unwrap()).unwrap();
        store.import(&sources, None, false).unwrap();
        let files: Vec<String> = store.records().unwrap().into_iter().map(|r| r.file).collect();
        store.convert_images(&files, &[Conversion::Grayscale]).unwrap();
        Dataset::derive(&store, &files, &[]).unwrap();
    }

    let store = Store::init(root.path(), WorkerPool::new(1).unwrap()).unwrap();
    let records = store.records().unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.is_converted(Conversion::Grayscale)));
    assert!(records.iter().all(|r| r.class == Class::Unlabeled));

    let dataset = Dataset::open(&store, 0).unwrap();
    dataset.make_label_array(false).unwrap();
    assert_eq!(dataset.load_labels().unwrap().to_vec(), vec![-1, -1, -1]);

    let log = fs::metadata(store.root().join("log.db")).unwrap();
    assert!(log.len() > 0);
}
