use std::collections::HashMap;

use anyhow::{Context, Result};
use derive_more::{AsRef, Deref, Display, From, Into};
use linfa::prelude::*;
use linfa_clustering::Dbscan;
use linfa_nn::{
    CommonNearestNeighbour,
    distance::{Distance, L2Dist},
};
use ndarray::{ArrayView, Dimension, prelude::*};
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

use super::error::DedupError;

/// Density-based clustering, behind the narrowest interface the rest of the
/// pipeline needs.
///
/// Implementations return groups of positions into `vectors`. Every returned
/// group has at least `min_neighbors` members; positions not in any group are
/// noise and are simply absent.
pub trait DensityClusterer {
    fn cluster(
        &self,
        vectors: &[&[f32]],
        radius: DbscanEpsilon,
        min_neighbors: ClusterSize,
        metric: Metric,
    ) -> Result<Vec<Vec<usize>>>;
}

/// DBSCAN as provided by `linfa-clustering`.
///
/// Neighbour queries use a linear scan so that non-metric distances such as
/// cosine are answered exactly.
/// See: https://rust-ml.github.io/book/4_dbscan.html
#[derive(Debug, Clone, Copy, Default)]
pub struct LinfaDbscan;

impl DensityClusterer for LinfaDbscan {
    fn cluster(
        &self,
        vectors: &[&[f32]],
        radius: DbscanEpsilon,
        min_neighbors: ClusterSize,
        metric: Metric,
    ) -> Result<Vec<Vec<usize>>> {
        if vectors.len() < *min_neighbors {
            return Ok(vec![]);
        }

        let observations = as_ndarray(vectors).with_context(|| "LinfaDbscan::cluster()")?;
        let tolerance = radius.as_tolerance();
        let cluster_assignments = match metric {
            Metric::Euclidean => dbscan(&observations, min_neighbors, tolerance, L2Dist),
            Metric::Cosine => dbscan(&observations, min_neighbors, tolerance, CosineDist),
        }
        .with_context(|| format!("LinfaDbscan::cluster(), metric: {}", metric))?;

        let mut clusters = Clusters::default();
        for (point_idx, cluster_id) in cluster_assignments.iter().enumerate() {
            clusters.add_cluster_assignment(
                point_idx,
                cluster_id.to_owned().unwrap_or(usize::MAX).into(),
            );
        }
        Ok(clusters.into_groups(min_neighbors))
    }
}

fn dbscan<D: Distance<f32>>(
    observations: &Array2<f32>,
    min_points: ClusterSize,
    tolerance: f32,
    dist_fn: D,
) -> Result<Array1<Option<usize>>> {
    Dbscan::params_with(min_points.into(), dist_fn, CommonNearestNeighbour::LinearSearch)
        .tolerance(tolerance)
        .transform(observations)
        .map_err(|e| e.into())
}

/// Convert a slice of equal-length vectors into an Array2 suitable for
/// transformation by the linfa DBSCAN algorithm.
fn as_ndarray(vectors: &[&[f32]]) -> Result<Array2<f32>> {
    let shape: Shape = (vectors.len(), vectors.first().map_or(0, |v| v.len())).into();
    let flattened = vectors
        .iter()
        .flat_map(|v| v.iter().copied())
        .collect::<Vec<f32>>();
    Array2::from_shape_vec(shape.0, flattened)
        .with_context(|| format!("as_ndarray, shape: {}", shape))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into, Display)]
#[display("{{ rows:{} columns:{} }}", self.0.0, self.0.1)]
struct Shape((usize, usize));

// ========================================================================
// Metrics

/// Pairwise distance used to decide whether two embeddings are neighbours.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    IntoStaticStr,
    EnumString,
    strum::Display,
)]
#[serde(try_from = "String", into = "&'static str")]
#[strum(serialize_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Cosine,
}

impl Metric {
    /// Parse a metric name, reporting unknown names as a configuration error.
    pub fn from_name(name: &str) -> Result<Self, DedupError> {
        name.parse()
            .map_err(|_| DedupError::UnknownMetric(name.to_owned()))
    }

    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let pairs = a.iter().copied().zip(b.iter().copied());
        match self {
            Metric::Euclidean => euclidean_distance(pairs),
            Metric::Cosine => cosine_distance(pairs),
        }
    }
}

impl TryFrom<String> for Metric {
    type Error = DedupError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::from_name(&value)
    }
}

fn euclidean_distance(pairs: impl Iterator<Item = (f32, f32)>) -> f32 {
    pairs.map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

/// `1 - cos(a, b)`. A zero-norm vector is at distance 1 from everything.
fn cosine_distance(pairs: impl Iterator<Item = (f32, f32)>) -> f32 {
    let (dot, norm_a, norm_b) = pairs.fold((0.0f32, 0.0f32, 0.0f32), |acc, (x, y)| {
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).max(0.0)
}

/// Cosine distance for linfa's nearest-neighbour machinery.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CosineDist;

impl Distance<f32> for CosineDist {
    fn distance<D: Dimension>(&self, a: ArrayView<f32, D>, b: ArrayView<f32, D>) -> f32 {
        cosine_distance(a.iter().copied().zip(b.iter().copied()))
    }
}

// ========================================================================
// Cluster bookkeeping

/// Container for a mapping of cluster IDs to cluster members.
#[derive(Debug, Clone, PartialEq, From, Into, Default)]
struct Clusters(HashMap<ClusterId, Vec<usize>>);
impl Clusters {
    /// Associate a member of a feature tensor, identified by (row) index, to a cluster
    /// identified by the given [`ClusterId`]
    fn add_cluster_assignment(&mut self, member_idx: usize, cluster_id: ClusterId) {
        self.0.entry(cluster_id).or_default().push(member_idx)
    }

    /// Signal clusters ordered by cluster id. A border point already claimed by
    /// an earlier cluster can leave a later one short, so those are dropped.
    fn into_groups(self, min_size: ClusterSize) -> Vec<Vec<usize>> {
        let mut signal = self
            .0
            .into_iter()
            .filter(|(id, members)| id.is_signal() && members.len() >= *min_size)
            .collect::<Vec<_>>();
        signal.sort_by_key(|(id, _)| *id);
        signal.into_iter().map(|(_, members)| members).collect()
    }
}

/// Simple newtype wrapper around a ClusterID.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, From, Into, Default, Deref, Display,
)]
pub struct ClusterId(usize);

impl ClusterId {
    /// The cluster id assigned to the "noise" cluster by DBSCAN
    pub const NOISE: Self = ClusterId(usize::MAX);

    pub fn is_noise(&self) -> bool {
        *self == Self::NOISE
    }

    pub fn is_signal(&self) -> bool {
        !self.is_noise()
    }
}

// ========================================================================
// Hyperparameters

/// Newtype for cluster sizes which enforces the invariant that they're >= 2.
#[derive(
    Debug, Copy, Clone, Hash, PartialEq, Eq, Into, AsRef, Deref, Serialize, Deserialize, Display,
)]
pub struct ClusterSize(usize);
impl ClusterSize {
    pub const MIN: ClusterSize = ClusterSize(2);
    pub const MAX: ClusterSize = ClusterSize(usize::MAX);

    /// Create a new instance given a `usize`, and panic if
    /// the following invariants are violated:
    /// - `size >= ClusterSize::MIN`
    /// - `size <= ClusterSize::MAX`
    fn new_unchecked(size: usize) -> Self {
        assert!(
            (Self::MIN.0 <= size) && (size <= Self::MAX.0),
            "Invalid value {}; must be {} ≤ N ≤ {}.",
            size,
            Self::MIN,
            Self::MAX
        );
        Self(size)
    }

    /// Attempt to create a new instance given a `usize`, and check
    /// invariants:
    /// - `size >= ClusterSize::MIN`
    /// - `size <= ClusterSize::MAX`
    pub fn try_new(size: usize) -> Result<Self, DedupError> {
        if (size < ClusterSize::MIN.0) || (ClusterSize::MAX.0 < size) {
            Err(DedupError::invalid(
                "min_samples",
                format!("{}; must be {} ≤ N ≤ {}", size, Self::MIN, Self::MAX),
            ))
        } else {
            Ok(Self::new_unchecked(size))
        }
    }
}

impl TryFrom<usize> for ClusterSize {
    type Error = DedupError;

    fn try_from(value: usize) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

/// Newtype for epsilon (the DBSCAN radius) which enforces the invariant that it's >= 0.0.
#[derive(
    Debug, Copy, Clone, PartialEq, PartialOrd, Into, AsRef, Deref, Serialize, Deserialize, Display,
)]
pub struct DbscanEpsilon(f32);
impl DbscanEpsilon {
    pub const MIN: DbscanEpsilon = DbscanEpsilon(0.0);

    /// Panics if invariants (notably, epsilon >= 0.0) are violated.
    fn new_unchecked(value: f32) -> Self {
        assert!(
            value >= Self::MIN.0,
            "invalid value {}; must be >= {}",
            value,
            Self::MIN
        );
        Self(value)
    }

    /// Attempt to create a new value from the given `f32`, ensuring
    /// invariants (notably, epsilon >= 0.0) are observed. NaN is rejected.
    pub fn try_new(epsilon: f32) -> Result<Self, DedupError> {
        match epsilon {
            _ if epsilon >= Self::MIN.0 && epsilon.is_finite() => Ok(Self::new_unchecked(epsilon)),
            _ => Err(DedupError::invalid(
                "eps",
                format!("{}; must be a finite value >= {}", epsilon, Self::MIN),
            )),
        }
    }

    /// The radius used when re-splitting an oversized group.
    pub fn halved(self) -> Self {
        Self(self.0 / 2.0)
    }

    /// Multiply by a non-negative factor.
    pub fn scaled(self, factor: f32) -> Self {
        Self::new_unchecked(self.0 * factor)
    }

    /// linfa rejects a zero tolerance. Machine epsilon keeps "identical points
    /// only" semantics and still survives squaring in the L2 reduced distance.
    fn as_tolerance(self) -> f32 {
        self.0.max(f32::EPSILON)
    }
}

impl TryFrom<f32> for DbscanEpsilon {
    type Error = DedupError;

    fn try_from(value: f32) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}
