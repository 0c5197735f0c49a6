use serde::{Deserialize, Serialize};

use crate::classifier::Scores;
use crate::*;

/// Predicted gesture and the margin of every class.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Decision values, in the order of [`GestureModel::classes`].
    pub scores: Scores,
}

/// A classifier together with the vocabulary its training histograms came from.
///
/// The two are only valid as a pair, so the model owns both and encodes new
/// descriptor sets itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GestureModel {
    vocabulary: Vocabulary,
    classifier: Classifier,
}

impl GestureModel {
    pub(crate) fn new(vocabulary: Vocabulary, classifier: Classifier) -> Self {
        Self {
            vocabulary,
            classifier,
        }
    }

    /// Classify a histogram encoded with [`GestureModel::vocabulary`].
    pub fn predict(&self, histogram: &[f32]) -> BowResult<Prediction> {
        if histogram.len() != self.vocabulary.len() {
            return Err(BowErr::HistogramLength {
                expected: self.vocabulary.len(),
                found: histogram.len(),
            });
        }
        let scores = self.classifier.decision(histogram);
        Ok(Prediction {
            label: self.classifier.best(&scores),
            scores,
        })
    }

    /// Encode a new frame's descriptors and classify them.
    pub fn predict_descriptors(&self, descriptors: &[Desc]) -> BowResult<Prediction> {
        let histogram = self.vocabulary.transform(descriptors)?;
        self.predict(&histogram)
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn classes(&self) -> &[Label] {
        self.classifier.classes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn model() -> (GestureModel, DescriptorStore) {
        let mut store = DescriptorStore::new();
        for i in 0..3 {
            let o = i as f32 * 0.1;
            store.add(vec![vec![o, 0.], vec![o, 0.2]], 1);
            store.add(vec![vec![5. + o, 5.], vec![5., 5. + o]], 2);
        }
        let voc = Vocabulary::from_store(&store, 2, 3, &mut StdRng::seed_from_u64(11)).unwrap();
        let rows = encode(&store, &voc).unwrap();
        let clf = Classifier::fit(&ClassifierKind::linear(), &rows, &store.labels()).unwrap();
        (GestureModel::new(voc, clf), store)
    }

    #[test]
    fn predicts_training_descriptors() {
        let (model, store) = model();
        for e in store.examples() {
            let p = model.predict_descriptors(&e.descriptors).unwrap();
            assert_eq!(p.label, e.label);
            assert_eq!(p.scores.len(), model.classes().len());
        }
    }

    #[test]
    fn rejects_histogram_of_other_length() {
        let (model, _) = model();
        assert!(matches!(
            model.predict(&[1., 0., 0.]),
            Err(BowErr::HistogramLength {
                expected: 2,
                found: 3
            })
        ));
    }
}
