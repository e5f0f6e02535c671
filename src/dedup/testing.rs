//! Fixtures shared by the unit tests of the pipeline stages.

use std::{collections::HashSet, sync::Mutex};

use anyhow::Result;

use super::{
    grouper::{ClusterSize, DbscanEpsilon, DensityClusterer, LinfaDbscan, Metric},
    model::{IdGroups, Record, RecordId},
};
use crate::config::{ClusterParams, ValidParams};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub size: usize,
    pub radius: f32,
}

/// Delegates to another clusterer and remembers every call.
pub(crate) struct RecordingClusterer<C = LinfaDbscan> {
    inner: C,
    calls: Mutex<Vec<Call>>,
}

impl RecordingClusterer {
    pub fn new() -> Self {
        Self::wrapping(LinfaDbscan)
    }
}

impl<C> RecordingClusterer<C> {
    pub fn wrapping(inner: C) -> Self {
        Self {
            inner,
            calls: Mutex::new(vec![]),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl<C: DensityClusterer> DensityClusterer for RecordingClusterer<C> {
    fn cluster(
        &self,
        vectors: &[&[f32]],
        radius: DbscanEpsilon,
        min_neighbors: ClusterSize,
        metric: Metric,
    ) -> Result<Vec<Vec<usize>>> {
        self.calls.lock().unwrap().push(Call {
            size: vectors.len(),
            radius: *radius,
        });
        self.inner.cluster(vectors, radius, min_neighbors, metric)
    }
}

/// Puts every position into one group, whatever the radius.
pub(crate) struct SingleBlob;

impl DensityClusterer for SingleBlob {
    fn cluster(
        &self,
        vectors: &[&[f32]],
        _radius: DbscanEpsilon,
        min_neighbors: ClusterSize,
        _metric: Metric,
    ) -> Result<Vec<Vec<usize>>> {
        if vectors.len() < *min_neighbors {
            return Ok(vec![]);
        }
        Ok(vec![(0..vectors.len()).collect()])
    }
}

/// `count` records hugging unit axis `axis`, each nudged a little along the
/// next axis. Near-identical under both metrics.
pub(crate) fn jittered(prefix: &str, count: usize, axis: usize, dim: usize) -> Vec<Record> {
    (0..count)
        .map(|k| {
            let mut v = vec![0.0; dim];
            v[axis] = 1.0;
            v[(axis + 1) % dim] += 0.001 * k as f32;
            Record::new(format!("{prefix}{k}").as_str(), v)
        })
        .collect()
}

/// One record per unit axis, starting at `first_axis`: pairwise sqrt(2) apart
/// in Euclidean terms and orthogonal in cosine terms.
pub(crate) fn isolated(prefix: &str, count: usize, first_axis: usize, dim: usize) -> Vec<Record> {
    (0..count)
        .map(|k| {
            let mut v = vec![0.0; dim];
            v[first_axis + k] = 1.0;
            Record::new(format!("{prefix}{k}").as_str(), v)
        })
        .collect()
}

pub(crate) fn params(edit: impl FnOnce(&mut ClusterParams)) -> ValidParams {
    let mut p = ClusterParams::default();
    edit(&mut p);
    p.validate().unwrap()
}

/// Panics unless no id appears in two groups.
pub(crate) fn assert_disjoint(groups: &IdGroups) {
    let mut seen: HashSet<&RecordId> = HashSet::new();
    for group in groups {
        for id in group {
            assert!(seen.insert(id), "id {} appears in more than one group", id);
        }
    }
}

/// Group contents with both levels sorted, for order-insensitive comparison.
pub(crate) fn normalized(groups: &IdGroups) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = groups
        .iter()
        .map(|g| {
            let mut ids: Vec<String> = g.iter().map(|id| id.to_string()).collect();
            ids.sort();
            ids
        })
        .collect();
    out.sort();
    out
}
