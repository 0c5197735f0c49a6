use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::*;

/// Upper bound on Lloyd steps within one k-means run.
const MAX_LLOYD_STEPS: usize = 300;

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Visual vocabulary: `k` centroids ("words") of the descriptors seen during training.
///
/// 1. Created once per training run from the pooled descriptors of a [`DescriptorStore`].
/// 2. Used to transform a descriptor set into its bag-of-words histogram.
///
/// A classifier is only meaningful for histograms produced by the vocabulary it
/// was trained against, see [`GestureModel`](crate::GestureModel).
pub struct Vocabulary {
    words: Vec<Desc>,
    dim: usize,
    cluster_size: Vec<usize>,
    distortion: f32,
}

/// Vocabulary API
impl Vocabulary {
    /// Transform a set of descriptors into its L2-normalized bag-of-words histogram.
    ///
    /// Every descriptor votes for its nearest word. An empty set gives the all-zero histogram.
    pub fn transform(&self, features: &[Desc]) -> BowResult<BoW> {
        let mut bow: BoW = vec![0.; self.words.len()];
        for (i, feature) in features.iter().enumerate() {
            if feature.len() != self.dim {
                return Err(BowErr::DimensionMismatch {
                    expected: self.dim,
                    found: feature.len(),
                    index: i,
                });
            }
            let (word, _) = self.quantize(feature);
            bow[word] += 1.;
        }
        bow.normalize_l2();
        Ok(bow)
    }

    /// Nearest word of a descriptor and the Euclidean distance to it.
    pub fn quantize(&self, feature: &[f32]) -> (usize, f32) {
        let (word, d2) = nearest(&self.words, feature);
        (word, d2.sqrt())
    }

    /// Build a vocabulary of `k` words from a collection of descriptors.
    ///
    /// K-means is run `runs` times from random initial words and the result
    /// with the lowest distortion is kept.
    pub fn create<R: Rng>(features: &[Desc], k: usize, runs: usize, rng: &mut R) -> BowResult<Self> {
        let pool: Vec<&[f32]> = features.iter().map(|f| f.as_slice()).collect();
        let dim = pool_dim(pool.iter().copied().enumerate())?;
        Self::cluster(&pool, dim, k, runs, rng)
    }

    /// Build a vocabulary from every descriptor of every example in the store.
    pub fn from_store<R: Rng>(
        store: &DescriptorStore,
        k: usize,
        runs: usize,
        rng: &mut R,
    ) -> BowResult<Self> {
        let dim = pool_dim(
            store
                .examples()
                .flat_map(|e| e.descriptors.iter().map(move |d| (e.index, d.as_slice()))),
        )?;
        let pool: Vec<&[f32]> = store
            .examples()
            .flat_map(|e| e.descriptors.iter().map(|d| d.as_slice()))
            .collect();
        Self::cluster(&pool, dim, k, runs, rng)
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Descriptor dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn words(&self) -> &[Desc] {
        &self.words
    }

    /// Mean distance of the training descriptors to their nearest word.
    pub fn distortion(&self) -> f32 {
        self.distortion
    }
}

/////////////////////                Helpers                 ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

/// Dimensionality shared by all descriptors of the pool.
fn pool_dim<'a>(mut pool: impl Iterator<Item = (usize, &'a [f32])>) -> BowResult<usize> {
    let dim = match pool.next() {
        Some((_, d)) => d.len(),
        None => return Err(BowErr::EmptyDescriptorPool),
    };
    if dim == 0 {
        return Err(BowErr::Config("descriptors have no components".into()));
    }
    for (index, d) in pool {
        if d.len() != dim {
            return Err(BowErr::DimensionMismatch {
                expected: dim,
                found: d.len(),
                index,
            });
        }
    }
    Ok(dim)
}

/// Index of the closest word and the squared distance to it. Ties go to the lower index.
#[inline]
fn nearest<W: AsRef<[f32]>>(words: &[W], feature: &[f32]) -> (usize, f32) {
    let mut best: (usize, f32) = (0, f32::INFINITY);
    for (j, w) in words.iter().enumerate() {
        let d = sq_dist(w.as_ref(), feature);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

#[inline]
/// Squared Euclidean distance between two descriptors.
fn sq_dist(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).fold(0., |a, (b, c)| a + (b - c) * (b - c))
}

struct Clustering {
    words: Vec<Desc>,
    cluster_size: Vec<usize>,
    distortion: f32,
}

impl Vocabulary {
    fn cluster<R: Rng>(
        features: &[&[f32]],
        dim: usize,
        k: usize,
        runs: usize,
        rng: &mut R,
    ) -> BowResult<Self> {
        if k == 0 {
            return Err(BowErr::Config("vocabulary needs at least one word".into()));
        }
        if features.len() < k {
            return Err(BowErr::TooFewDescriptors {
                words: k,
                available: features.len(),
            });
        }
        info!(
            "Running k-means clustering of {} descriptors into {} words, {} runs",
            features.len(),
            k,
            runs
        );

        let mut best: Option<Clustering> = None;
        for run in 0..runs.max(1) {
            let c = Self::kmeans(features, dim, k, rng);
            debug!("k-means run {}: distortion {}", run, c.distortion);
            if best.as_ref().map_or(true, |b| c.distortion < b.distortion) {
                best = Some(c);
            }
        }
        let best = best.ok_or(BowErr::EmptyDescriptorPool)?;
        info!("Vocabulary distortion {}", best.distortion);

        Ok(Self {
            words: best.words,
            dim,
            cluster_size: best.cluster_size,
            distortion: best.distortion,
        })
    }

    /// One Lloyd's k-means run from random initial words.
    fn kmeans<R: Rng>(features: &[&[f32]], dim: usize, k: usize, rng: &mut R) -> Clustering {
        let mut clusters = Self::initialize_clusters(features, k, rng);
        let mut groups: Vec<usize> = Vec::new();

        for _ in 0..MAX_LLOYD_STEPS {
            let new_groups: Vec<usize> = features.iter().map(|f| nearest(&clusters, f).0).collect();
            if groups == new_groups {
                break; // converged
            }

            // update clusters; a word that lost all its members stays where it was
            let mut sums = vec![vec![0f32; dim]; k];
            let mut counts = vec![0usize; k];
            for (f, &g) in features.iter().zip(&new_groups) {
                counts[g] += 1;
                for (s, v) in sums[g].iter_mut().zip(f.iter()) {
                    *s += v;
                }
            }
            for ((c, s), &n) in clusters.iter_mut().zip(sums).zip(&counts) {
                if n > 0 {
                    let inv = 1. / n as f32;
                    *c = s.into_iter().map(|v| v * inv).collect();
                }
            }
            groups = new_groups;
        }

        let mut cluster_size = vec![0; k];
        let mut total = 0f64;
        for f in features {
            let (g, d2) = nearest(&clusters, f);
            cluster_size[g] += 1;
            total += (d2 as f64).sqrt();
        }
        Clustering {
            words: clusters,
            cluster_size,
            distortion: (total / features.len() as f64) as f32,
        }
    }

    /// Initialize clusters for kmeans with `k` distinct random descriptors.
    fn initialize_clusters<R: Rng>(features: &[&[f32]], k: usize, rng: &mut R) -> Vec<Desc> {
        features
            .choose_multiple(rng, k)
            .map(|f| f.to_vec())
            .collect()
    }
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sum = self.cluster_size.iter().sum::<usize>();
        f.debug_struct("Vocabulary")
            .field("Words", &self.words.len())
            .field("Descriptor Dimension", &self.dim)
            .field("Total Training Features", &sum)
            .field(
                "Min Word Cluster Size",
                &self.cluster_size.iter().min().copied().unwrap_or(0),
            )
            .field(
                "Max Word Cluster Size",
                &self.cluster_size.iter().max().copied().unwrap_or(0),
            )
            .field("Distortion", &self.distortion)
            .finish()
    }
}
