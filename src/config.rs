use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DatasetError, Result};
use crate::types::Split;

/// Command-line arguments for building a YOLO dataset from an annotation export.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// JSON (or JSON Lines) export of the training annotation query
    #[arg(short = 'a', long = "annotations")]
    pub annotations: PathBuf,

    /// Root directory of the uploaded source images
    #[arg(short = 'i', long = "images_root")]
    pub images_root: PathBuf,

    /// Directory the dataset is written to
    #[arg(short = 'o', long = "output_dir", default_value = "data")]
    pub output_dir: PathBuf,

    /// YAML dataset configuration; built-in defaults are used when omitted
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Seed for the random split draw (overrides the config file)
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Train, val and test weights for the random split draw
    #[arg(long = "bucket_prob", value_delimiter = ',', value_parser = validate_weight)]
    pub bucket_prob: Option<Vec<f64>>,

    /// How source images are placed in the dataset
    #[arg(long = "link_mode", value_enum, default_value = "symlink")]
    pub link_mode: LinkMode,

    /// Remove existing image and label directories before building
    #[arg(long = "clean")]
    pub clean: bool,
}

// How the materializer places source images in a split directory
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LinkMode {
    Symlink,
    Copy,
}

// Validate that a split weight is a finite, non-negative number
fn validate_weight(s: &str) -> std::result::Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if val.is_finite() && val >= 0.0 => Ok(val),
        _ => Err("WEIGHT must be a non-negative number".to_string()),
    }
}

pub const DEFAULT_CLASSES: &[&str] = &[
    "PPPMM", // Dicot
    "PPPDD", // Monocot
    "VICFX", // Faba bean
    "PIBSA", // Field pea
    "ZEAMX", // Maize
    "SOLTU", // Potato
    "SPQOL", // Spinach
    "BEAVA", // Sugar beet
    "CIRAR", // Creeping thistle
    "BRSOL", // White cabbage
    "FAGES", // Buckwheat
    "1LUPG", // Lupinus
    "PSEZ",  // Plant stem emergence zone, not an EPPO code
];

pub const DEFAULT_PSEZ_CODE: &str = "PSEZ";

// Crops a PSEZ box has to sit inside to be kept
pub const DEFAULT_HOST_CROPS: &[&str] = &["ZEAMX", "BEAVA", "BRSOL"];

pub const DEFAULT_DICOT_CODE: &str = "PPPMM";
pub const DEFAULT_MONOCOT_CODE: &str = "PPPDD";

pub const DEFAULT_BUCKET_PROB: [f64; 3] = [0.80, 0.20, 0.0];

pub const DEFAULT_SEED: u64 = 42;

// OpenDR evaluation images
pub const DEFAULT_HELD_BACK_IMAGE_IDS: &[i64] = &[
    831621, 971110, 971112, 984201, 1028464, 1028465, 1028466, 1030259, 1030260, 1030261, 1030262,
    1030263, 1030275, 1038335, 1038338, 1038340, 1038348, 1046441, 1059091, 1074250, 1266069, 1473,
    1517, 19837, 45622, 78778, 78875, 79120, 79380, 80002, 199258, 200798, 201079, 209084, 210169,
    211563, 221553, 200955, 201061, 201180, 201662, 205943, 200519, 19980, 211360, 219383, 223811,
    237549, 238292, 238343, 238383, 238454, 238505, 263806, 264662, 276765, 269462, 269691, 454059,
    457756, 616407, 698894, 700239, 705775, 719534, 719787, 724635, 728245, 728516, 728623, 730457,
    731186, 719223, 720530, 723601, 724594, 724964, 727433, 727578, 728021, 728160, 728682, 729222,
    729406, 729424, 729799, 729949, 731542, 731753, 731797, 732787, 750833, 1039580, 1039975,
    1046361, 1048482, 1051783, 1325024, 1327434, 1351743, 1424694, 1424985, 1438760, 1441727,
    1449518, 727983, 677352, 666085, 704127, 680718, 701640, 1131874, 1131927, 1131968, 1131908,
    1131949, 1131951, 1131970, 1131884, 1448140, 1448159, 1448191, 1449134, 1448215, 1448241,
    1448277, 1448310, 1448355, 1448380, 1448426, 1448442, 1448815,
];

// Oekotek 2020-10-09 uploads, grown plants
pub const DEFAULT_FIXED_TRAIN_UPLOAD_IDS: &[i64] = &[773, 775, 776, 777, 778, 779];

// Originals of the images copied into test/debug upload 355
pub const DEFAULT_FIXED_TEST_IMAGE_IDS: &[i64] = &[
    3, 4, 849, 462, 3411, 3412, 3414, 3417, 3420, 3567, 3569, 3574, 3576, 3579, 4137, 4140, 9758,
    20542, 20544, 20546, 20547, 20549, 22013, 22551, 22552, 23562, 23617, 67060, 67062, 67066,
    67374, 76818, 77634, 78653, 78654, 78655, 95304, 95496, 238939, 238941, 238942, 376823, 376824,
    376825, 828075, 850670,
];

/// One id set per split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitIds {
    pub train: HashSet<i64>,
    pub val: HashSet<i64>,
    pub test: HashSet<i64>,
}

impl SplitIds {
    /// The first split, in train/val/test order, whose set holds `id`.
    pub fn find(&self, id: i64) -> Option<Split> {
        Split::ALL.into_iter().find(|split| self.get(*split).contains(&id))
    }

    pub fn get(&self, split: Split) -> &HashSet<i64> {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }
}

/// Immutable settings for one dataset build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Ordered class codes; the position is the YOLO class index
    pub classes: Vec<String>,
    pub psez_code: String,
    pub host_crops: Vec<String>,
    pub dicot_code: String,
    pub monocot_code: String,
    pub held_back_image_ids: HashSet<i64>,
    pub fixed_uploads: SplitIds,
    pub fixed_images: SplitIds,
    pub bucket_prob: [f64; 3],
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            classes: DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect(),
            psez_code: DEFAULT_PSEZ_CODE.to_string(),
            host_crops: DEFAULT_HOST_CROPS.iter().map(|c| c.to_string()).collect(),
            dicot_code: DEFAULT_DICOT_CODE.to_string(),
            monocot_code: DEFAULT_MONOCOT_CODE.to_string(),
            held_back_image_ids: DEFAULT_HELD_BACK_IMAGE_IDS.iter().copied().collect(),
            fixed_uploads: SplitIds {
                train: DEFAULT_FIXED_TRAIN_UPLOAD_IDS.iter().copied().collect(),
                ..SplitIds::default()
            },
            fixed_images: SplitIds {
                test: DEFAULT_FIXED_TEST_IMAGE_IDS.iter().copied().collect(),
                ..SplitIds::default()
            },
            bucket_prob: DEFAULT_BUCKET_PROB,
            seed: DEFAULT_SEED,
        }
    }
}

impl DatasetConfig {
    /// Load a YAML config file; keys left out keep their defaults.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: DatasetConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the config for a CLI invocation: file (or defaults), then flags.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_yaml(path)?,
            None => Self::default(),
        };
        if let Some(seed) = args.seed {
            config.seed = seed;
        }
        if let Some(prob) = &args.bucket_prob {
            config.bucket_prob = <[f64; 3]>::try_from(prob.as_slice()).map_err(|_| {
                DatasetError::InvalidConfig(format!(
                    "bucket_prob needs 3 weights, got {}",
                    prob.len()
                ))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(DatasetError::InvalidConfig(
                "the class list is empty".to_string(),
            ));
        }
        if self.bucket_prob.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DatasetError::InvalidConfig(format!(
                "bucket_prob weights must be finite and non-negative: {:?}",
                self.bucket_prob
            )));
        }
        if self.bucket_prob.iter().sum::<f64>() <= 0.0 {
            return Err(DatasetError::InvalidConfig(
                "bucket_prob weights sum to zero".to_string(),
            ));
        }
        Ok(())
    }
}
