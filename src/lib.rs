use std::path::PathBuf;
use thiserror::Error;

/// Run configuration shared by every stage of training.
pub mod config;
pub use config::{ClassifierKind, DescriptorKind, KernelFn, MaskPolarity, TrainerConfig};

/// Append-only store of labeled descriptor sets.
pub mod store;
pub use store::{DescriptorStore, TrainingExample};

/// Visual vocabulary built with k-means over all stored descriptors.
pub mod vocab;
pub use vocab::Vocabulary;

/// Bag-of-words histograms and their similarity measures.
pub mod bow;
pub use bow::{encode, BoW, BoWTrait};

/// Interfaces of the hand tracker and feature extractor collaborators.
pub mod collab;
pub use collab::{
    Contour, CropRegion, Defect, Described, Extractor, HandShape, Keypoint, Point, Tracker,
};

/// Live capture driven by the acquisition gating state machine.
pub mod acquire;
pub use acquire::{
    Acquisition, Capture, CaptureEnd, CaptureState, DefectCounts, FrameOutcome, FrameSource, Gate,
    Operator, Signal, Tick,
};

/// Batch ingestion of gesture-labeled image directories.
pub mod ingest;
pub use ingest::{binarize, Batch, ImageTree};

/// One-vs-rest margin classifiers over histograms.
pub mod classifier;
pub use classifier::{Classifier, Scores};

/// Vocabulary, encoding and classifier fitting with leave-one-out validation.
pub mod trainer;
pub use trainer::{Trainer, TrainingReport};

/// Trained model applied to new histograms.
pub mod predict;
pub use predict::{GestureModel, Prediction};

/// Feature extraction backed by opencv.
pub mod opencv_utils;
#[cfg(feature = "opencv")]
pub use opencv_utils::*;

/// A single local feature descriptor.
///
/// Every descriptor of a training run has the same length, fixed by the
/// extractor configuration.
pub type Desc = Vec<f32>;

/// All descriptors extracted from one accepted frame. May be empty.
pub type DescriptorSet = Vec<Desc>;

/// Gesture label in `1..=num_gestures`.
pub type Label = u32;

pub type BowResult<T> = std::result::Result<T, BowErr>;

#[derive(Error, Debug)]
pub enum BowErr {
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[error("Image Error")]
    Image(#[from] image::ImageError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("No descriptors were collected, cannot build a vocabulary")]
    EmptyDescriptorPool,
    #[error("Vocabulary of {words} words needs at least as many descriptors, got {available}")]
    TooFewDescriptors { words: usize, available: usize },
    #[error("Descriptor dimension {found} at {index}, expected {expected}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        index: usize,
    },
    #[error("Histogram has length {found}, classifier was trained on {expected} words")]
    HistogramLength { expected: usize, found: usize },
    #[error("Classifier fit failed: {0}")]
    ClassifierFit(String),
    #[error("No mask image for {0:?}")]
    MissingMask(PathBuf),
    #[cfg(feature = "opencv")]
    #[error("Opencv Error")]
    OpenCvInternal(#[from] opencv::Error),
    #[cfg(feature = "opencv")]
    #[error("Opencv Descriptor decode error")]
    OpenCvDecode,
}
