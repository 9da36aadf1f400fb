use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;

use crate::error::{DatasetError, Result};

// Image file extensions accepted when linking source images
pub const IMG_FORMATS: &[&str] = &[
    "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp", "pfm",
];

/// One bounding box as exported by the annotation query.
///
/// Field names follow the database columns; snake_case aliases are accepted
/// so hand-written fixtures stay readable.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AnnotationRecord {
    #[serde(rename = "Id", alias = "id")]
    pub id: i64,
    #[serde(rename = "ImageId", alias = "image_id")]
    pub image_id: i64,
    #[serde(rename = "UploadId", alias = "upload_id")]
    pub upload_id: i64,
    #[serde(rename = "FileName", alias = "file_name")]
    pub file_name: String,
    #[serde(rename = "EPPOCode", alias = "class_code")]
    pub class_code: Option<String>,
    #[serde(rename = "cotyledon", alias = "cotyledon_id")]
    pub cotyledon_id: Option<i32>,
    #[serde(rename = "MinX", alias = "min_x")]
    pub min_x: f64,
    #[serde(rename = "MinY", alias = "min_y")]
    pub min_y: f64,
    #[serde(rename = "MaxX", alias = "max_x")]
    pub max_x: f64,
    #[serde(rename = "MaxY", alias = "max_y")]
    pub max_y: f64,
    #[serde(rename = "Width", alias = "image_width")]
    pub image_width: u32,
    #[serde(rename = "Height", alias = "image_height")]
    pub image_height: u32,
    #[serde(
        rename = "GrownWeed",
        alias = "upload_is_grown_weed",
        deserialize_with = "deserialize_flag"
    )]
    pub upload_is_grown_weed: bool,
    #[serde(
        rename = "Approved",
        alias = "approved",
        default,
        deserialize_with = "deserialize_optional_flag"
    )]
    pub approved: Option<bool>,
    #[serde(
        rename = "UseForTraining",
        alias = "use_for_training",
        default,
        deserialize_with = "deserialize_optional_flag"
    )]
    pub use_for_training: Option<bool>,
}

impl AnnotationRecord {
    /// Box corners as `(min_x, min_y, max_x, max_y)`
    pub fn bbox(&self) -> (f64, f64, f64, f64) {
        (self.min_x, self.min_y, self.max_x, self.max_y)
    }

    /// Reject records the encoder cannot turn into a sane label line.
    pub fn validate(&self) -> Result<()> {
        let malformed = |reason: String| DatasetError::MalformedRecord {
            id: self.id,
            reason,
        };

        if self.image_width == 0 || self.image_height == 0 {
            return Err(malformed(format!(
                "image {} has zero size {}x{}",
                self.image_id, self.image_width, self.image_height
            )));
        }
        let (min_x, min_y, max_x, max_y) = self.bbox();
        if ![min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) {
            return Err(malformed("non-finite box coordinate".to_string()));
        }
        if min_x > max_x || min_y > max_y {
            return Err(malformed(format!(
                "inverted box ({}, {}, {}, {})",
                min_x, min_y, max_x, max_y
            )));
        }
        Ok(())
    }
}

// The export writes bit columns either as JSON booleans or as 0/1
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl From<Flag> for bool {
    fn from(flag: Flag) -> Self {
        match flag {
            Flag::Bool(value) => value,
            Flag::Int(value) => value != 0,
        }
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Flag::deserialize(deserializer).map(bool::from)
}

fn deserialize_optional_flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Flag>::deserialize(deserializer).map(|flag| flag.map(bool::from))
}

/// All records of one image, in export order. Never empty.
#[derive(Debug, Clone)]
pub struct ImageGroup {
    pub image_id: i64,
    records: Vec<AnnotationRecord>,
}

impl ImageGroup {
    /// Returns `None` for an empty record list.
    pub fn new(image_id: i64, records: Vec<AnnotationRecord>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { image_id, records })
        }
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<AnnotationRecord> {
        self.records
    }

    /// The first record carries the image-level columns for the whole group.
    pub fn representative(&self) -> &AnnotationRecord {
        &self.records[0]
    }

    pub fn upload_id(&self) -> i64 {
        self.representative().upload_id
    }

    pub fn file_name(&self) -> &str {
        &self.representative().file_name
    }

    pub fn is_grown_weed(&self) -> bool {
        self.representative().upload_is_grown_weed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Dataset partition an image is placed in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    /// Order used for the weighted draw and for output directories.
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule decided the split of an image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SplitReason {
    FixedUpload,
    FixedImage,
    GrownWeed,
    RandomDraw,
}

/// Everything the materializer needs for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlan {
    pub image_id: i64,
    pub upload_id: i64,
    pub file_name: String,
    pub split: Split,
    pub reason: SplitReason,
    /// Records left after PSEZ resolution, resolved or not
    pub annotation_count: usize,
    pub label_lines: Vec<String>,
}

// Paths to the per-split output directories
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub root_dir: PathBuf,
    pub train_images_dir: PathBuf,
    pub val_images_dir: PathBuf,
    pub test_images_dir: PathBuf,
    pub train_labels_dir: PathBuf,
    pub val_labels_dir: PathBuf,
    pub test_labels_dir: PathBuf,
}

impl OutputDirs {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        let images_dir = root_dir.join("images");
        let labels_dir = root_dir.join("labels");
        Self {
            train_images_dir: images_dir.join("train"),
            val_images_dir: images_dir.join("val"),
            test_images_dir: images_dir.join("test"),
            train_labels_dir: labels_dir.join("train"),
            val_labels_dir: labels_dir.join("val"),
            test_labels_dir: labels_dir.join("test"),
            root_dir,
        }
    }

    pub fn images_dir(&self, split: Split) -> &PathBuf {
        match split {
            Split::Train => &self.train_images_dir,
            Split::Val => &self.val_images_dir,
            Split::Test => &self.test_images_dir,
        }
    }

    pub fn labels_dir(&self, split: Split) -> &PathBuf {
        match split {
            Split::Train => &self.train_labels_dir,
            Split::Val => &self.val_labels_dir,
            Split::Test => &self.test_labels_dir,
        }
    }
}

/// Image and label-line counts for one split.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SplitCounts {
    pub images: usize,
    pub annotations: usize,
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub annotations_in: usize,
    pub held_back_annotations: usize,
    pub psez_skipped: usize,
    pub annotations_retained: usize,
    pub unresolved_annotations: usize,
    pub images_planned: usize,
    pub skipped_missing_image: usize,
    pub train: SplitCounts,
    pub val: SplitCounts,
    pub test: SplitCounts,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn split(&self, split: Split) -> &SplitCounts {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    fn split_mut(&mut self, split: Split) -> &mut SplitCounts {
        match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
            Split::Test => &mut self.test,
        }
    }

    pub fn record_materialized(&mut self, split: Split, label_lines: usize) {
        let counts = self.split_mut(split);
        counts.images += 1;
        counts.annotations += label_lines;
    }

    pub fn increment_skipped_missing_image(&mut self) {
        self.skipped_missing_image += 1;
    }

    pub fn images_materialized(&self) -> usize {
        self.train.images + self.val.images + self.test.images
    }

    pub fn print_summary(&self) {
        log::info!("=== Processing Summary ===");
        log::info!("Annotations fetched: {}", self.annotations_in);
        log::info!("Held back annotations removed: {}", self.held_back_annotations);
        log::info!("PSEZ skipped: {}", self.psez_skipped);
        log::info!("Annotations retained: {}", self.annotations_retained);
        log::info!("Unresolved class codes: {}", self.unresolved_annotations);
        log::info!("Images planned: {}", self.images_planned);
        for split in Split::ALL {
            let counts = self.split(split);
            log::info!(
                "{}: {} images, {} labels",
                split,
                counts.images,
                counts.annotations
            );
        }

        if self.skipped_missing_image > 0 {
            log::warn!(
                "Skipped {} images because the source image was not found",
                self.skipped_missing_image
            );
        }
    }
}
