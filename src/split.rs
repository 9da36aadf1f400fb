use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::config::{DatasetConfig, SplitIds};
use crate::error::{DatasetError, Result};
use crate::types::{ImageGroup, Split, SplitReason};

/// Decides the train/val/test split of an image.
///
/// Rules are checked in order: fixed uploads, fixed images, grown weed
/// uploads (always train), and finally a weighted random draw.
#[derive(Debug, Clone)]
pub struct SplitAssigner {
    fixed_uploads: SplitIds,
    fixed_images: SplitIds,
    weights: WeightedIndex<f64>,
}

impl SplitAssigner {
    /// `bucket_prob` holds the train, val and test weights; they need not sum to 1.
    pub fn new(fixed_uploads: SplitIds, fixed_images: SplitIds, bucket_prob: [f64; 3]) -> Result<Self> {
        let weights = WeightedIndex::new(bucket_prob).map_err(|e| {
            DatasetError::InvalidConfig(format!("bucket_prob {:?}: {}", bucket_prob, e))
        })?;
        Ok(Self {
            fixed_uploads,
            fixed_images,
            weights,
        })
    }

    pub fn from_config(config: &DatasetConfig) -> Result<Self> {
        Self::new(
            config.fixed_uploads.clone(),
            config.fixed_images.clone(),
            config.bucket_prob,
        )
    }

    /// Split for one image group.
    ///
    /// Only groups that fall through to the random draw consume a value from `rng`.
    pub fn assign<R: Rng + ?Sized>(&self, group: &ImageGroup, rng: &mut R) -> (Split, SplitReason) {
        self.assign_ids(group.upload_id(), group.image_id, group.is_grown_weed(), rng)
    }

    pub fn assign_ids<R: Rng + ?Sized>(
        &self,
        upload_id: i64,
        image_id: i64,
        grown_weed: bool,
        rng: &mut R,
    ) -> (Split, SplitReason) {
        if let Some(split) = self.fixed_uploads.find(upload_id) {
            return (split, SplitReason::FixedUpload);
        }
        if let Some(split) = self.fixed_images.find(image_id) {
            return (split, SplitReason::FixedImage);
        }
        // Grown plants teach plant features but must stay out of evaluation
        if grown_weed {
            return (Split::Train, SplitReason::GrownWeed);
        }
        (Split::ALL[self.weights.sample(rng)], SplitReason::RandomDraw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids(train: &[i64], val: &[i64], test: &[i64]) -> SplitIds {
        SplitIds {
            train: train.iter().copied().collect(),
            val: val.iter().copied().collect(),
            test: test.iter().copied().collect(),
        }
    }

    #[test]
    fn test_fixed_upload_beats_everything() {
        let assigner = SplitAssigner::new(
            ids(&[773], &[], &[]),
            ids(&[], &[], &[5]),
            [0.0, 0.0, 1.0],
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        for grown in [false, true] {
            assert_eq!(
                assigner.assign_ids(773, 5, grown, &mut rng),
                (Split::Train, SplitReason::FixedUpload)
            );
        }
    }

    #[test]
    fn test_upload_sets_checked_in_split_order() {
        let assigner =
            SplitAssigner::new(ids(&[], &[9], &[9]), SplitIds::default(), [1.0, 0.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(assigner.assign_ids(9, 1, false, &mut rng).0, Split::Val);
    }

    #[test]
    fn test_fixed_image_beats_grown_weed() {
        let assigner =
            SplitAssigner::new(SplitIds::default(), ids(&[], &[], &[849]), [1.0, 0.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            assigner.assign_ids(1, 849, true, &mut rng),
            (Split::Test, SplitReason::FixedImage)
        );
    }

    #[test]
    fn test_grown_weed_goes_to_train() {
        let assigner =
            SplitAssigner::new(SplitIds::default(), SplitIds::default(), [0.0, 0.0, 1.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            assigner.assign_ids(1, 2, true, &mut rng),
            (Split::Train, SplitReason::GrownWeed)
        );
        assert_eq!(
            assigner.assign_ids(1, 2, false, &mut rng),
            (Split::Test, SplitReason::RandomDraw)
        );
    }

    #[test]
    fn test_weights_need_not_be_normalized() {
        let assigner =
            SplitAssigner::new(SplitIds::default(), SplitIds::default(), [0.0, 5.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for image_id in 0..50 {
            assert_eq!(assigner.assign_ids(1, image_id, false, &mut rng).0, Split::Val);
        }
    }

    #[test]
    fn test_zero_weights_are_rejected() {
        let result = SplitAssigner::new(SplitIds::default(), SplitIds::default(), [0.0, 0.0, 0.0]);
        assert!(matches!(result, Err(DatasetError::InvalidConfig(_))));
    }

    #[test]
    fn test_random_draw_ratio_and_reproducibility() {
        let assigner =
            SplitAssigner::new(SplitIds::default(), SplitIds::default(), [0.8, 0.2, 0.0]).unwrap();

        let draw = |seed: u64| -> Vec<Split> {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..1000)
                .map(|image_id| assigner.assign_ids(1, image_id, false, &mut rng).0)
                .collect()
        };

        let first = draw(1234);
        assert_eq!(first, draw(1234));

        let train = first.iter().filter(|s| **s == Split::Train).count();
        let test = first.iter().filter(|s| **s == Split::Test).count();
        assert!((720..=880).contains(&train), "train count {}", train);
        assert_eq!(test, 0);
    }
}
