use tracing::info;

use crate::{BowResult, DescriptorStore, Vocabulary};

/// Bag-of-Words representation of an image or descriptor set.
///
/// Index: word id in the vocabulary.
///
/// Value: number of descriptors quantized to that word, divided by the
/// L2 norm of the whole vector.
pub type BoW = Vec<f32>;

/// Provides method(s) for normalizing bow vectors and computing their similarity score.
pub trait BoWTrait {
    /// Compute L1 score between two bow. (Used in Galvez (Eq 2)).
    fn l1(&self, other: &Self) -> f32;
    /// Same score with the L2 distance, suited to L2-normalized vectors.
    fn l2(&self, other: &Self) -> f32;
    fn norm_l2(&self) -> f32;
    /// Scale to unit L2 norm. A zero vector is left as is.
    fn normalize_l2(&mut self);
}

impl BoWTrait for BoW {
    fn l1(&self, other: &Self) -> f32 {
        1. - 0.5
            * (self
                .iter()
                .zip(other)
                .fold(0., |a, (b, c)| a + (b - c).abs()))
    }

    fn l2(&self, other: &Self) -> f32 {
        1. - 0.5
            * self
                .iter()
                .zip(other)
                .fold(0., |a, (b, c)| a + (b - c) * (b - c))
                .sqrt()
    }

    fn norm_l2(&self) -> f32 {
        self.iter().map(|w| w * w).sum::<f32>().sqrt()
    }

    fn normalize_l2(&mut self) {
        let norm = self.norm_l2();
        if norm > 0. {
            let inv_norm = 1. / norm;
            for w in self.iter_mut() {
                *w *= inv_norm;
            }
        }
    }
}

/// Histogram of every stored example, in store order.
///
/// Each row is normalized by its own norm; examples without descriptors give zero rows.
pub fn encode(store: &DescriptorStore, voc: &Vocabulary) -> BowResult<Vec<BoW>> {
    info!(
        "Extracting bag-of-words features for {} visual words...",
        voc.len()
    );
    store
        .examples()
        .map(|e| voc.transform(&e.descriptors))
        .collect()
}
