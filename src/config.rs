use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{BowErr, BowResult};

/// Descriptor family requested from the feature extractor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Orb,
    Brisk,
}

/// Kernel of the one-vs-rest kernel machine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum KernelFn {
    /// `(gamma * <x, y> + coef0) ^ degree`
    Poly { degree: u32, gamma: f32, coef0: f32 },
    /// `exp(-gamma * |x - y|^2)`
    Rbf { gamma: f32 },
    /// `tanh(gamma * <x, y> + coef0)`
    Sigmoid { gamma: f32, coef0: f32 },
}

impl KernelFn {
    pub fn eval(&self, x: &[f32], y: &[f32]) -> f32 {
        match *self {
            KernelFn::Poly {
                degree,
                gamma,
                coef0,
            } => (gamma * dot(x, y) + coef0).powi(degree as i32),
            KernelFn::Rbf { gamma } => {
                let d2: f32 = x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum();
                (-gamma * d2).exp()
            }
            KernelFn::Sigmoid { gamma, coef0 } => (gamma * dot(x, y) + coef0).tanh(),
        }
    }
}

#[inline]
pub(crate) fn dot(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// Classifier strategy, fixed for the whole run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum ClassifierKind {
    /// Linear margin classifier (L2-regularized squared hinge loss).
    Linear { c: f32, tol: f32, max_iter: usize },
    /// Kernel margin classifier solved with SMO.
    Kernel {
        kernel: KernelFn,
        c: f32,
        tol: f32,
        max_iter: usize,
    },
}

impl ClassifierKind {
    pub fn linear() -> Self {
        ClassifierKind::Linear {
            c: 1.0,
            tol: 0.1,
            max_iter: 1000,
        }
    }

    /// Quadratic polynomial kernel with `gamma = 2`.
    pub fn poly() -> Self {
        Self::kernel(KernelFn::Poly {
            degree: 2,
            gamma: 2.0,
            coef0: 0.0,
        })
    }

    pub fn kernel(kernel: KernelFn) -> Self {
        ClassifierKind::Kernel {
            kernel,
            c: 1.0,
            tol: 1e-3,
            max_iter: 100_000,
        }
    }

    fn validate(&self) -> BowResult<()> {
        let (c, tol, max_iter) = match *self {
            ClassifierKind::Linear { c, tol, max_iter } => (c, tol, max_iter),
            ClassifierKind::Kernel {
                kernel,
                c,
                tol,
                max_iter,
            } => {
                let gamma = match kernel {
                    KernelFn::Poly { gamma, .. }
                    | KernelFn::Rbf { gamma }
                    | KernelFn::Sigmoid { gamma, .. } => gamma,
                };
                if !(gamma > 0.) {
                    return Err(BowErr::Config(format!("kernel gamma must be positive, got {}", gamma)));
                }
                (c, tol, max_iter)
            }
        };
        if !(c > 0.) || !(tol > 0.) || max_iter == 0 {
            return Err(BowErr::Config(format!(
                "classifier needs c > 0, tol > 0 and max_iter > 0, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Signed mask flag of batch ingestion.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskPolarity {
    /// Masks are not used.
    None,
    /// Mask foreground is white.
    Foreground,
    /// Mask foreground is black.
    Inverted,
}

impl MaskPolarity {
    /// `0` disables masks, positive values keep white, negative values invert.
    pub fn from_flag(flag: i32) -> Self {
        match flag {
            0 => MaskPolarity::None,
            f if f > 0 => MaskPolarity::Foreground,
            _ => MaskPolarity::Inverted,
        }
    }
}

/// Everything a training run needs, injected once at construction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainerConfig {
    pub num_gestures: usize,
    pub frames_per_gesture: usize,
    pub min_descriptors_per_frame: usize,
    /// Vocabulary size.
    pub num_words: usize,
    pub descriptor_kind: DescriptorKind,
    pub classifier: ClassifierKind,
    /// Number of k-means runs; the run with the lowest distortion wins.
    pub num_iter: usize,
    /// Seed for k-means initialization. `None` draws from entropy.
    pub seed: Option<u64>,
    /// Frames whose contour has more convexity defects are not a single hand.
    pub max_defects: usize,
    /// Crop margin around the hand contour, as a fraction of the frame size.
    pub crop_margin: f32,
    /// Radius of the square dilation applied to batch masks.
    pub mask_dilation: u8,
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_gestures: 3,
            frames_per_gesture: 100,
            min_descriptors_per_frame: 5,
            num_words: 100,
            descriptor_kind: DescriptorKind::Orb,
            classifier: ClassifierKind::linear(),
            num_iter: 10,
            seed: None,
            max_defects: 4,
            crop_margin: 0.05,
            mask_dilation: 3,
            snapshot_dir: None,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> BowResult<()> {
        let positive = [
            ("num_gestures", self.num_gestures),
            ("frames_per_gesture", self.frames_per_gesture),
            ("num_words", self.num_words),
            ("num_iter", self.num_iter),
        ];
        for (name, v) in positive.iter() {
            if *v == 0 {
                return Err(BowErr::Config(format!("{} must be positive", name)));
            }
        }
        if !(0.0..0.5).contains(&self.crop_margin) {
            return Err(BowErr::Config(format!(
                "crop_margin must be in [0, 0.5), got {}",
                self.crop_margin
            )));
        }
        self.classifier.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TrainerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_words_rejected() {
        let cfg = TrainerConfig {
            num_words: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(BowErr::Config(_))));
    }

    #[test]
    fn non_positive_gamma_rejected() {
        let cfg = TrainerConfig {
            classifier: ClassifierKind::kernel(KernelFn::Rbf { gamma: 0. }),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mask_flag_sign() {
        assert_eq!(MaskPolarity::from_flag(0), MaskPolarity::None);
        assert_eq!(MaskPolarity::from_flag(1), MaskPolarity::Foreground);
        assert_eq!(MaskPolarity::from_flag(-3), MaskPolarity::Inverted);
    }

    #[test]
    fn poly_kernel_matches_formula() {
        let k = KernelFn::Poly {
            degree: 2,
            gamma: 2.,
            coef0: 0.,
        };
        // (2 * 0.5)^2
        assert!((k.eval(&[1., 0.], &[0.5, 3.]) - 1.).abs() < 1e-6);
        let rbf = KernelFn::Rbf { gamma: 1. };
        assert!((rbf.eval(&[1., 2.], &[1., 2.]) - 1.).abs() < 1e-6);
    }
}
