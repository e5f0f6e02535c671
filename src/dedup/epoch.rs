use std::collections::HashSet;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    bucket::{PassStats, bucketed_pass},
    grouper::DensityClusterer,
    model::{IdGroup, IdGroups, WorkingSet},
};
use crate::config::ValidParams;

/// What happened in one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub radius: f32,
    pub working_set_before: usize,
    pub working_set_after: usize,
    pub groups: usize,
    pub ids_grouped: usize,
    pub pass: PassStats,
}

/// Groups accumulated over every epoch of one driver run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterRun {
    pub groups: IdGroups,
    pub epochs: Vec<EpochStats>,
}

impl ClusterRun {
    /// Records still ungrouped when the driver stopped.
    pub fn residual(&self) -> usize {
        self.epochs.last().map_or(0, |e| e.working_set_after)
    }
}

/// Run exactly `params.epochs` bucketed passes.
///
/// After every pass the grouped ids leave the working set and the rest is
/// reshuffled with `rng`, so bucket boundaries fall elsewhere next time. A
/// pass over an empty working set is a no-op; there is no early stop.
pub fn run_epochs<C, R>(
    clusterer: &C,
    mut working_set: WorkingSet,
    params: &ValidParams,
    rng: &mut R,
) -> Result<ClusterRun>
where
    C: DensityClusterer + Sync + ?Sized,
    R: Rng + ?Sized,
{
    let mut run = ClusterRun::default();
    for epoch in 0..params.epochs {
        let radius = params.radius_for_epoch(epoch);
        let working_set_before = working_set.len();
        info!(
            "Running DBSCAN clustering epoch: {}/{}, total samples: {}, eps: {}",
            epoch + 1,
            params.epochs,
            working_set_before,
            radius
        );

        let mut pass = bucketed_pass(clusterer, &working_set, radius, params)
            .with_context(|| format!("epoch {}/{}", epoch + 1, params.epochs))?;
        pass.groups = disjoint(pass.groups, *params.min_samples);

        let ids_grouped = working_set.remove_ids(&pass.groups.id_set());
        working_set.shuffle(rng);

        debug!(
            "epoch {} grouped {} ids into {} groups, {} remain",
            epoch + 1,
            ids_grouped,
            pass.groups.len(),
            working_set.len()
        );
        run.epochs.push(EpochStats {
            epoch,
            radius: *radius,
            working_set_before,
            working_set_after: working_set.len(),
            groups: pass.groups.len(),
            ids_grouped,
            pass: pass.stats,
        });
        run.groups.append(&mut pass.groups);
    }
    Ok(run)
}

/// Keep only the first group claiming each id. A group that falls below
/// `min_size` as a result is dropped.
fn disjoint(groups: IdGroups, min_size: usize) -> IdGroups {
    let before = groups.num_ids();
    let mut seen = HashSet::new();
    let kept: IdGroups = groups
        .into_iter()
        .map(|group| -> IdGroup {
            group
                .into_iter()
                .filter(|id| seen.insert(id.clone()))
                .collect()
        })
        .filter(|group| group.len() >= min_size)
        .collect();
    if kept.num_ids() != before {
        warn!(
            "Clusterer returned overlapping groups, {} ids dropped",
            before - kept.num_ids()
        );
    }
    kept
}
