//! RoboWeedMaps annotations to YOLO dataset builder
//!
//! This library turns an annotation export into a YOLO object-detection
//! dataset: PSEZ filtering, class resolution, train/val/test assignment and
//! normalized label files.

pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod io;
pub mod resolve;
pub mod split;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use config::{Args, DatasetConfig, LinkMode, SplitIds};
pub use dataset::{DatasetPipeline, Materializer};
pub use error::{DatasetError, Result};
pub use io::{
    create_dataset_yaml, read_annotation_records, setup_output_directories, DatasetManifest,
    FsMaterializer,
};
pub use resolve::{ClassCatalog, ClassResolution, ClassResolver, PsezFilter};
pub use split::SplitAssigner;
pub use types::{AnnotationRecord, ImageGroup, ImagePlan, OutputDirs, ProcessingStats, Split};
