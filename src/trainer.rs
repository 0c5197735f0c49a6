use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info};

use crate::*;

/// Quality figures of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub num_examples: usize,
    pub num_words: usize,
    /// Mean distance of the training descriptors to their word.
    pub distortion: f32,
    /// Fraction of examples predicted correctly by a classifier fitted without them.
    pub loo_accuracy: f32,
}

/// Batch learning half of training: vocabulary, histograms, classifier.
pub struct Trainer {
    config: TrainerConfig,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> BowResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { config, rng })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Cluster every stored descriptor into `num_words` words.
    pub fn build_vocabulary(&mut self, store: &DescriptorStore) -> BowResult<Vocabulary> {
        Vocabulary::from_store(
            store,
            self.config.num_words,
            self.config.num_iter,
            &mut self.rng,
        )
    }

    /// Leave-one-out accuracy of the configured classifier on `data`.
    pub fn leave_one_out(&self, data: &[BoW], labels: &[Label]) -> BowResult<f32> {
        leave_one_out(&self.config.classifier, data, labels)
    }

    /// Run the whole batch pipeline on the store.
    ///
    /// The final classifier is fitted on every example whatever the
    /// leave-one-out score; the score is only reported.
    pub fn fit(&mut self, store: &DescriptorStore) -> BowResult<(GestureModel, TrainingReport)> {
        let max = self.config.num_gestures as Label;
        if let Some(e) = store.examples().find(|e| e.label < 1 || e.label > max) {
            return Err(BowErr::Config(format!(
                "example {} has label {}, expected 1..={}",
                e.index, e.label, max
            )));
        }

        let vocabulary = self.build_vocabulary(store)?;
        let data = encode(store, &vocabulary)?;
        let labels = store.labels();

        info!(
            "Training {:?} classifier on {} examples...",
            self.config.classifier,
            data.len()
        );
        let loo_accuracy = self.leave_one_out(&data, &labels)?;
        info!("Leave-one-out accuracy {}", loo_accuracy);

        let classifier = Classifier::fit(&self.config.classifier, &data, &labels)?;
        let report = TrainingReport {
            num_examples: data.len(),
            num_words: vocabulary.len(),
            distortion: vocabulary.distortion(),
            loo_accuracy,
        };
        Ok((GestureModel::new(vocabulary, classifier), report))
    }
}

/// Refit without each example in turn and score the prediction for it.
///
/// Costs one full fit per example, meant for the small sets gestures are trained on.
pub fn leave_one_out(kind: &ClassifierKind, data: &[BoW], labels: &[Label]) -> BowResult<f32> {
    if data.len() != labels.len() {
        return Err(BowErr::ClassifierFit(format!(
            "{} samples but {} labels",
            data.len(),
            labels.len()
        )));
    }
    if data.is_empty() {
        return Err(BowErr::ClassifierFit("no training samples".into()));
    }
    let mut correct = 0usize;
    for i in 0..data.len() {
        let train: Vec<BoW> = data[..i].iter().chain(&data[i + 1..]).cloned().collect();
        let train_labels: Vec<Label> = labels[..i].iter().chain(&labels[i + 1..]).copied().collect();
        let clf = Classifier::fit(kind, &train, &train_labels)?;
        let hit = clf.predict(&data[i]) == labels[i];
        debug!("held out {}: {}", i, if hit { "correct" } else { "wrong" });
        if hit {
            correct += 1;
        }
    }
    Ok(correct as f32 / data.len() as f32)
}
