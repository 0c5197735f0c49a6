use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::*;

mod kernel;
mod linear;

use kernel::KernelMachine;
use linear::LinearMachine;

/// Decision value of every class, in the order of [`Classifier::classes`].
pub type Scores = SmallVec<[f32; 8]>;

/// Binary margin machine of one class against all others.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
enum Machine {
    Linear(LinearMachine),
    Kernel(KernelMachine),
}

impl Machine {
    fn margin(&self, x: &[f32]) -> f32 {
        match self {
            Machine::Linear(m) => m.margin(x),
            Machine::Kernel(m) => m.margin(x),
        }
    }
}

/// Multi-class classifier over bag-of-words histograms, one machine per class.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Classifier {
    kind: ClassifierKind,
    classes: Vec<Label>,
    machines: Vec<Machine>,
    num_features: usize,
}

impl Classifier {
    /// Fit one-vs-rest machines on `data` rows labeled by `labels`.
    ///
    /// Fails unless there is one label per row, all rows have the same
    /// length and at least two distinct labels are present.
    pub fn fit(kind: &ClassifierKind, data: &[BoW], labels: &[Label]) -> BowResult<Self> {
        if data.len() != labels.len() {
            return Err(BowErr::ClassifierFit(format!(
                "{} samples but {} labels",
                data.len(),
                labels.len()
            )));
        }
        let num_features = match data.first() {
            Some(row) => row.len(),
            None => return Err(BowErr::ClassifierFit("no training samples".into())),
        };
        if let Some(row) = data.iter().find(|r| r.len() != num_features) {
            return Err(BowErr::ClassifierFit(format!(
                "samples of length {} and {}",
                num_features,
                row.len()
            )));
        }

        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(BowErr::ClassifierFit(format!(
                "needs samples of at least 2 classes, got {} class(es)",
                classes.len()
            )));
        }

        let gram = match kind {
            ClassifierKind::Kernel { kernel, .. } => kernel::gram(data, kernel),
            ClassifierKind::Linear { .. } => Vec::new(),
        };

        let machines = classes
            .iter()
            .map(|&class| {
                let y: Vec<f64> = labels
                    .iter()
                    .map(|&l| if l == class { 1. } else { -1. })
                    .collect();
                match *kind {
                    ClassifierKind::Linear { c, tol, max_iter } => Machine::Linear(
                        LinearMachine::fit(data, &y, c as f64, tol as f64, max_iter),
                    ),
                    ClassifierKind::Kernel {
                        kernel,
                        c,
                        tol,
                        max_iter,
                    } => Machine::Kernel(KernelMachine::fit(
                        data, &gram, &y, kernel, c as f64, tol as f64, max_iter,
                    )),
                }
            })
            .collect();
        debug!(
            "Fitted {} one-vs-rest machines on {} samples",
            classes.len(),
            data.len()
        );

        Ok(Self {
            kind: *kind,
            classes,
            machines,
            num_features,
        })
    }

    /// Margin of `x` for every class.
    pub fn decision(&self, x: &[f32]) -> Scores {
        self.machines.iter().map(|m| m.margin(x)).collect()
    }

    /// Class with the largest margin. Ties go to the smaller label.
    pub fn predict(&self, x: &[f32]) -> Label {
        let scores = self.decision(x);
        self.best(&scores)
    }

    pub(crate) fn best(&self, scores: &[f32]) -> Label {
        let mut best = 0;
        for (i, &s) in scores.iter().enumerate() {
            if s > scores[best] {
                best = i;
            }
        }
        self.classes[best]
    }

    /// Labels seen during fitting, ascending.
    pub fn classes(&self) -> &[Label] {
        &self.classes
    }

    /// Length of the histograms the classifier was fitted on.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn kind(&self) -> &ClassifierKind {
        &self.kind
    }
}
