use crate::{DescriptorSet, Label};

/// One accepted frame: its descriptors, its gesture and its position in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub index: usize,
    pub descriptors: DescriptorSet,
    pub label: Label,
}

/// Append-only collection of labeled descriptor sets for one training run.
///
/// Insertion order is the row order of the histograms and labels handed to the
/// classifier, so examples are never removed or reordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorStore {
    examples: Vec<TrainingExample>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an example and return its index. Empty sets are accepted.
    pub fn add(&mut self, descriptors: DescriptorSet, label: Label) -> usize {
        let index = self.examples.len();
        self.examples.push(TrainingExample {
            index,
            descriptors,
            label,
        });
        index
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> impl Iterator<Item = &TrainingExample> {
        self.examples.iter()
    }

    pub fn get(&self, index: usize) -> Option<&TrainingExample> {
        self.examples.get(index)
    }

    /// Labels in insertion order.
    pub fn labels(&self) -> Vec<Label> {
        self.examples.iter().map(|e| e.label).collect()
    }

    /// Total number of descriptors over all examples.
    pub fn num_descriptors(&self) -> usize {
        self.examples.iter().map(|e| e.descriptors.len()).sum()
    }

    /// Number of examples carrying `label`.
    pub fn count_label(&self, label: Label) -> usize {
        self.examples.iter().filter(|e| e.label == label).count()
    }
}
