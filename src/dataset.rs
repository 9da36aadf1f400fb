use indexmap::IndexMap;
use log::{debug, info};
use rand::Rng;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::DatasetConfig;
use crate::conversion::convert_to_yolo_format;
use crate::error::Result;
use crate::resolve::{ClassCatalog, ClassResolver, PsezFilter};
use crate::split::SplitAssigner;
use crate::types::{AnnotationRecord, ImageGroup, ImagePlan, ProcessingStats};
use crate::utils::create_progress_bar;

/// Places planned images and their label files somewhere.
///
/// Implementations must tolerate being run again over the same plans.
pub trait Materializer: Sync {
    /// Link or copy the source image into its split directory.
    ///
    /// Returns `Ok(None)` when the source image cannot be found.
    fn link_image(&self, plan: &ImagePlan) -> Result<Option<PathBuf>>;

    /// Write the label file that sits next to `image_path`.
    fn write_labels(&self, image_path: &Path, label_lines: &[String]) -> Result<PathBuf>;
}

/// Drop every record whose image is held back.
pub fn filter_held_back(
    records: Vec<AnnotationRecord>,
    held_back_image_ids: &HashSet<i64>,
) -> Vec<AnnotationRecord> {
    let before_len = records.len();
    let records: Vec<_> = records
        .into_iter()
        .filter(|record| !held_back_image_ids.contains(&record.image_id))
        .collect();
    info!("Filter out the held back images: {} -> {}", before_len, records.len());
    records
}

/// Group records by image id, keeping the order images are first seen in.
pub fn group_by_image(records: Vec<AnnotationRecord>) -> Vec<ImageGroup> {
    let mut grouped: IndexMap<i64, Vec<AnnotationRecord>> = IndexMap::new();
    for record in records {
        grouped.entry(record.image_id).or_default().push(record);
    }
    info!("Total number of images: {}", grouped.len());

    grouped
        .into_iter()
        .filter_map(|(image_id, records)| ImageGroup::new(image_id, records))
        .collect()
}

/// The annotation-to-dataset pipeline for one configuration.
#[derive(Debug, Clone)]
pub struct DatasetPipeline {
    held_back_image_ids: HashSet<i64>,
    resolver: ClassResolver,
    psez_filter: PsezFilter,
    assigner: SplitAssigner,
}

impl DatasetPipeline {
    pub fn new(config: &DatasetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            held_back_image_ids: config.held_back_image_ids.clone(),
            resolver: ClassResolver::from_config(config),
            psez_filter: PsezFilter::from_config(config),
            assigner: SplitAssigner::from_config(config)?,
        })
    }

    pub fn catalog(&self) -> &ClassCatalog {
        self.resolver.catalog()
    }

    /// Decide the split and label lines of every image.
    ///
    /// Nothing is written. Any malformed record that survives the held-back
    /// filter fails the whole plan before a single image is considered.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        records: Vec<AnnotationRecord>,
        rng: &mut R,
    ) -> Result<(Vec<ImagePlan>, ProcessingStats)> {
        let mut stats = ProcessingStats::new();
        stats.annotations_in = records.len();

        let records = filter_held_back(records, &self.held_back_image_ids);
        stats.held_back_annotations = stats.annotations_in - records.len();

        for record in &records {
            record.validate()?;
        }

        let mut plans = Vec::new();
        for group in group_by_image(records) {
            let image_id = group.image_id;
            let outcome = self.psez_filter.apply(group);
            stats.psez_skipped += outcome.skipped;
            stats.annotations_retained += outcome.kept.len();

            // Images that only held unmatched PSEZ boxes disappear entirely
            let Some(group) = ImageGroup::new(image_id, outcome.kept) else {
                debug!("Image {} has no annotations left after PSEZ filtering", image_id);
                continue;
            };

            let (split, reason) = self.assigner.assign(&group, rng);
            let (label_lines, unresolved) = convert_to_yolo_format(group.records(), &self.resolver);
            stats.unresolved_annotations += unresolved;

            debug!("ImageId: {} -> {} ({:?})", image_id, split, reason);
            plans.push(ImagePlan {
                image_id,
                upload_id: group.upload_id(),
                file_name: group.file_name().to_string(),
                split,
                reason,
                annotation_count: group.len(),
                label_lines,
            });
        }

        info!("Total number of annotations: {}", stats.annotations_retained);
        info!("PSEZ skipped: {}", stats.psez_skipped);
        stats.images_planned = plans.len();
        Ok((plans, stats))
    }

    /// Plan the dataset and hand every image to `materializer`.
    ///
    /// Images whose source cannot be found are counted and skipped. The first
    /// materializer error aborts the run.
    pub fn run<R, M>(
        &self,
        records: Vec<AnnotationRecord>,
        materializer: &M,
        rng: &mut R,
    ) -> Result<ProcessingStats>
    where
        R: Rng + ?Sized,
        M: Materializer + ?Sized,
    {
        let (plans, mut stats) = self.plan(records, rng)?;

        info!("Make image files and labels");
        let pb = create_progress_bar(plans.len() as u64, "Images");
        let outcomes = plans
            .par_iter()
            .map(|plan| {
                let linked = materialize_plan(plan, materializer);
                pb.inc(1);
                linked.map(|linked| (plan, linked))
            })
            .collect::<Result<Vec<_>>>()?;
        pb.finish_with_message("Image processing complete");

        for (plan, linked) in outcomes {
            if linked {
                stats.record_materialized(plan.split, plan.label_lines.len());
            } else {
                stats.increment_skipped_missing_image();
            }
        }

        Ok(stats)
    }
}

// Returns whether the image was found and written
fn materialize_plan<M: Materializer + ?Sized>(plan: &ImagePlan, materializer: &M) -> Result<bool> {
    match materializer.link_image(plan)? {
        Some(image_path) => {
            materializer.write_labels(&image_path, &plan.label_lines)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
