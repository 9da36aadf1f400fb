use log::{debug, info, warn};
use serde::Serialize;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::LinkMode;
use crate::conversion::label_file_content;
use crate::dataset::Materializer;
use crate::error::{DatasetError, Result};
use crate::resolve::ClassCatalog;
use crate::types::{AnnotationRecord, ImagePlan, OutputDirs, ProcessingStats, Split, IMG_FORMATS};
use crate::utils::{ensure_output_directory, label_path_for_image, reset_output_directory};

pub const DATA_CONFIG_YAML_FILENAME: &str = "dataset.yaml";

/// Read the annotation export.
///
/// `.jsonl` and `.ndjson` files hold one record per line, anything else is
/// read as a single JSON array.
pub fn read_annotation_records(path: &Path) -> Result<Vec<AnnotationRecord>> {
    let json_error = |source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path)?);

    let json_lines = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("ndjson"));

    let records = if json_lines {
        serde_json::Deserializer::from_reader(reader)
            .into_iter::<AnnotationRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(json_error)?
    } else {
        serde_json::from_reader(reader).map_err(json_error)?
    };

    info!("Fetched {} annotation records from {}", records.len(), path.display());
    Ok(records)
}

/// Set up `images/{train,val,test}` and `labels/{train,val,test}` under `root_dir`.
///
/// With `clean` the split directories are emptied first; otherwise existing
/// files are kept so a rerun only fills in what is missing.
pub fn setup_output_directories(root_dir: &Path, clean: bool) -> std::io::Result<OutputDirs> {
    let output_dirs = OutputDirs::new(root_dir);
    for split in Split::ALL {
        for dir in [output_dirs.images_dir(split), output_dirs.labels_dir(split)] {
            if clean {
                reset_output_directory(dir)?;
            } else {
                ensure_output_directory(dir)?;
            }
        }
    }
    Ok(output_dirs)
}

/// Data configuration read by the YOLO trainer, plus the statistics of the
/// run that produced it.
///
/// Only the class list and split paths go into `dataset.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetManifest {
    pub names: Vec<String>,
    pub nc: usize,
    pub train: PathBuf,
    pub val: PathBuf,
    pub test: PathBuf,
    #[serde(skip)]
    pub stats: ProcessingStats,
}

impl DatasetManifest {
    pub fn new(catalog: &ClassCatalog, output_dirs: &OutputDirs, stats: ProcessingStats) -> Self {
        Self {
            names: catalog.names().map(str::to_string).collect(),
            nc: catalog.len(),
            train: output_dirs.train_images_dir.clone(),
            val: output_dirs.val_images_dir.clone(),
            test: output_dirs.test_images_dir.clone(),
            stats,
        }
    }
}

/// Write `dataset.yaml` at the dataset root, with absolute split paths.
///
/// Returns the written path and the manifest carrying `stats`.
pub fn create_dataset_yaml(
    output_dirs: &OutputDirs,
    catalog: &ClassCatalog,
    stats: ProcessingStats,
) -> Result<(PathBuf, DatasetManifest)> {
    let absolute_root = fs::canonicalize(&output_dirs.root_dir)?;
    let manifest = DatasetManifest::new(catalog, &OutputDirs::new(&absolute_root), stats);

    let dataset_yaml_path = absolute_root.join(DATA_CONFIG_YAML_FILENAME);
    let mut dataset_yaml = BufWriter::new(File::create(&dataset_yaml_path)?);
    serde_yaml::to_writer(&mut dataset_yaml, &manifest)?;
    dataset_yaml.flush()?;

    Ok((dataset_yaml_path, manifest))
}

/// Links source images from an upload tree into the dataset directories.
#[derive(Debug, Clone)]
pub struct FsMaterializer {
    images_root: PathBuf,
    output_dirs: OutputDirs,
    link_mode: LinkMode,
}

impl FsMaterializer {
    pub fn new(images_root: impl Into<PathBuf>, output_dirs: OutputDirs, link_mode: LinkMode) -> Self {
        Self {
            images_root: images_root.into(),
            output_dirs,
            link_mode,
        }
    }

    /// Source image location: `<root>/<upload_id>/<file>` first, then `<root>/<file>`.
    pub fn find_source_image(&self, upload_id: i64, file_name: &str) -> Option<PathBuf> {
        let file_name = sanitize_filename::sanitize(file_name);
        [
            self.images_root.join(upload_id.to_string()).join(&file_name),
            self.images_root.join(&file_name),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file())
    }

    fn place_image(&self, source: &Path, destination: &Path) -> std::io::Result<()> {
        match self.link_mode {
            LinkMode::Copy => fs::copy(source, destination).map(|_| ()),
            LinkMode::Symlink => symlink_file(&fs::canonicalize(source)?, destination),
        }
    }

    /// Remove `<image_id>.*` images and `<image_id>.txt` labels from every split
    /// other than `keep`, so an image moved by a changed config is not left behind.
    fn remove_from_other_splits(
        &self,
        image_id: i64,
        keep: Split,
        source_ext: Option<&OsStr>,
    ) -> std::io::Result<()> {
        let stem = image_id.to_string();
        let mut extensions: Vec<String> = IMG_FORMATS
            .iter()
            .flat_map(|ext| [ext.to_string(), ext.to_ascii_uppercase()])
            .collect();
        if let Some(ext) = source_ext {
            extensions.push(ext.to_string_lossy().into_owned());
        }

        for split in Split::ALL.into_iter().filter(|&split| split != keep) {
            let images_dir = self.output_dirs.images_dir(split);
            let stale = extensions
                .iter()
                .map(|ext| images_dir.join(format!("{}.{}", stem, ext)))
                .chain(std::iter::once(self.output_dirs.labels_dir(split).join(format!("{}.txt", stem))));
            for path in stale {
                // remove_file also takes dangling links
                match fs::remove_file(&path) {
                    Ok(()) => debug!("Removed {} left in the {} split", path.display(), split),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

impl Materializer for FsMaterializer {
    fn link_image(&self, plan: &ImagePlan) -> Result<Option<PathBuf>> {
        let Some(source) = self.find_source_image(plan.upload_id, &plan.file_name) else {
            warn!(
                "Could not find source image for ID: {}, filename: {}",
                plan.image_id, plan.file_name
            );
            return Ok(None);
        };

        let mut destination = self
            .output_dirs
            .images_dir(plan.split)
            .join(plan.image_id.to_string());
        if let Some(ext) = source.extension() {
            if !IMG_FORMATS
                .iter()
                .any(|known| ext.to_string_lossy().eq_ignore_ascii_case(known))
            {
                warn!("Unexpected image extension for {}", source.display());
            }
            destination.set_extension(ext);
        }

        self.remove_from_other_splits(plan.image_id, plan.split, source.extension())?;

        // symlink_metadata also sees dangling links left by an earlier run
        if destination.symlink_metadata().is_ok() {
            debug!("Destination already exists: {}", destination.display());
        } else {
            self.place_image(&source, &destination)?;
        }
        Ok(Some(destination))
    }

    fn write_labels(&self, image_path: &Path, label_lines: &[String]) -> Result<PathBuf> {
        let label_path = label_path_for_image(image_path);
        let mut writer = BufWriter::new(File::create(&label_path)?);
        writer.write_all(label_file_content(label_lines).as_bytes())?;
        writer.flush()?;
        Ok(label_path)
    }
}

#[cfg(unix)]
fn symlink_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, destination)
}

#[cfg(windows)]
fn symlink_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(source, destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SplitReason;

    fn plan(image_id: i64, upload_id: i64, file_name: &str, split: Split) -> ImagePlan {
        ImagePlan {
            image_id,
            upload_id,
            file_name: file_name.to_string(),
            split,
            reason: SplitReason::RandomDraw,
            annotation_count: 1,
            label_lines: vec!["0 0.500000 0.500000 0.100000 0.100000".to_string()],
        }
    }

    #[test]
    fn test_read_json_array_and_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let row = r#"{"Id": 1, "ImageId": 2, "UploadId": 3, "FileName": "a.jpg", "EPPOCode": "ZEAMX", "cotyledon": 0, "MinX": 0, "MinY": 0, "MaxX": 5, "MaxY": 5, "Width": 10, "Height": 10, "GrownWeed": 0}"#;

        let array_path = temp_dir.path().join("export.json");
        fs::write(&array_path, format!("[{}, {}]", row, row)).unwrap();
        assert_eq!(read_annotation_records(&array_path).unwrap().len(), 2);

        let lines_path = temp_dir.path().join("export.jsonl");
        fs::write(&lines_path, format!("{}\n{}\n{}\n", row, row, row)).unwrap();
        assert_eq!(read_annotation_records(&lines_path).unwrap().len(), 3);
    }

    #[test]
    fn test_read_rejects_non_numeric_coordinate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("export.json");
        fs::write(
            &path,
            r#"[{"Id": 1, "ImageId": 2, "UploadId": 3, "FileName": "a.jpg", "EPPOCode": "ZEAMX", "cotyledon": 0, "MinX": "left", "MinY": 0, "MaxX": 5, "MaxY": 5, "Width": 10, "Height": 10, "GrownWeed": 0}]"#,
        )
        .unwrap();

        assert!(matches!(
            read_annotation_records(&path),
            Err(DatasetError::Json { .. })
        ));
    }

    #[test]
    fn test_create_dataset_yaml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output_dirs = setup_output_directories(temp_dir.path(), false).unwrap();
        let catalog = ClassCatalog::new(["PPPMM", "PPPDD", "PSEZ"]);

        let mut stats = ProcessingStats::new();
        stats.psez_skipped = 2;
        stats.record_materialized(Split::Val, 4);

        let (yaml_path, manifest) = create_dataset_yaml(&output_dirs, &catalog, stats.clone()).unwrap();
        let yaml_content = fs::read_to_string(yaml_path).unwrap();

        assert!(yaml_content.contains("names:\n- PPPMM\n- PPPDD\n- PSEZ\n"));
        assert!(yaml_content.contains("nc: 3"));
        assert!(yaml_content.contains("images/train"));
        assert!(yaml_content.contains("images/val"));
        assert!(yaml_content.contains("images/test"));
        assert!(!yaml_content.contains("psez_skipped"));

        assert_eq!(manifest.stats, stats);
        assert_eq!(manifest.stats.split(Split::Val).annotations, 4);
        assert!(manifest.val.is_absolute());
    }

    #[test]
    fn test_find_source_image_prefers_upload_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("uploads");
        fs::create_dir_all(root.join("12")).unwrap();
        fs::write(root.join("12/a.jpg"), b"upload").unwrap();
        fs::write(root.join("a.jpg"), b"flat").unwrap();
        fs::write(root.join("b.jpg"), b"flat").unwrap();

        let output_dirs = OutputDirs::new(temp_dir.path().join("data"));
        let materializer = FsMaterializer::new(&root, output_dirs, LinkMode::Copy);

        assert_eq!(materializer.find_source_image(12, "a.jpg"), Some(root.join("12/a.jpg")));
        assert_eq!(materializer.find_source_image(12, "b.jpg"), Some(root.join("b.jpg")));
        assert_eq!(materializer.find_source_image(12, "c.jpg"), None);
    }

    #[test]
    fn test_materialize_copy_and_labels() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("uploads");
        fs::create_dir_all(root.join("3")).unwrap();
        fs::write(root.join("3/field.JPG"), b"jpeg bytes").unwrap();

        let output_dirs = setup_output_directories(&temp_dir.path().join("data"), false).unwrap();
        let materializer = FsMaterializer::new(&root, output_dirs.clone(), LinkMode::Copy);

        let plan = plan(42, 3, "field.JPG", Split::Val);
        let image_path = materializer.link_image(&plan).unwrap().unwrap();
        assert_eq!(image_path, output_dirs.val_images_dir.join("42.JPG"));
        assert_eq!(fs::read(&image_path).unwrap(), b"jpeg bytes");

        let label_path = materializer.write_labels(&image_path, &plan.label_lines).unwrap();
        assert_eq!(label_path, output_dirs.val_labels_dir.join("42.txt"));
        assert_eq!(
            fs::read_to_string(label_path).unwrap(),
            "0 0.500000 0.500000 0.100000 0.100000\n"
        );
    }

    #[test]
    fn test_missing_source_is_not_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output_dirs = setup_output_directories(&temp_dir.path().join("data"), false).unwrap();
        let materializer =
            FsMaterializer::new(temp_dir.path().join("uploads"), output_dirs, LinkMode::Symlink);

        assert_eq!(materializer.link_image(&plan(1, 1, "gone.jpg", Split::Train)).unwrap(), None);
    }

    #[test]
    fn test_moved_image_leaves_previous_split() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("uploads");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.jpg"), b"jpg").unwrap();

        let output_dirs = setup_output_directories(&temp_dir.path().join("data"), false).unwrap();
        let materializer = FsMaterializer::new(&root, output_dirs.clone(), LinkMode::Copy);

        let first = plan(5, 9, "a.jpg", Split::Train);
        let image_path = materializer.link_image(&first).unwrap().unwrap();
        materializer.write_labels(&image_path, &first.label_lines).unwrap();
        // Same image under another extension from an older export
        fs::write(output_dirs.val_images_dir.join("5.JPG"), b"old").unwrap();
        fs::write(output_dirs.val_images_dir.join("50.jpg"), b"other").unwrap();

        let moved = plan(5, 9, "a.jpg", Split::Test);
        let image_path = materializer.link_image(&moved).unwrap().unwrap();
        materializer.write_labels(&image_path, &moved.label_lines).unwrap();

        assert!(output_dirs.test_images_dir.join("5.jpg").exists());
        assert!(output_dirs.test_labels_dir.join("5.txt").exists());
        assert!(!output_dirs.train_images_dir.join("5.jpg").exists());
        assert!(!output_dirs.train_labels_dir.join("5.txt").exists());
        assert!(!output_dirs.val_images_dir.join("5.JPG").exists());
        assert!(output_dirs.val_images_dir.join("50.jpg").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("uploads");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.png"), b"png").unwrap();

        let output_dirs = setup_output_directories(&temp_dir.path().join("data"), false).unwrap();
        let materializer = FsMaterializer::new(&root, output_dirs, LinkMode::Symlink);
        let plan = plan(5, 9, "a.png", Split::Train);

        let first = materializer.link_image(&plan).unwrap().unwrap();
        let second = materializer.link_image(&plan).unwrap().unwrap();
        assert_eq!(first, second);
        assert!(fs::symlink_metadata(&first).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&first).unwrap(), b"png");
    }
}
