use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::grouper::{DbscanEpsilon, DensityClusterer};
use crate::config::ValidParams;

/// What became of one oversized group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitOutcome {
    /// Subgroups within the size bound, as positions into the input members.
    pub accepted: Vec<Vec<usize>>,
    /// Subgroups that were still oversized and got thrown away.
    pub discarded: usize,
    /// Members that ended up in no accepted subgroup.
    pub ids_dropped: usize,
}

/// Re-cluster one oversized group with half the radius.
///
/// Only one re-split is attempted: a subgroup that is still larger than
/// `max_samples` is discarded, and members left as noise by the tighter radius
/// are lost. Both outcomes are counted, not reported as errors.
pub fn split_oversized<C>(
    clusterer: &C,
    members: &[&[f32]],
    radius: DbscanEpsilon,
    params: &ValidParams,
) -> Result<SplitOutcome>
where
    C: DensityClusterer + ?Sized,
{
    let tighter = radius.halved();
    let subgroups = clusterer
        .cluster(members, tighter, params.min_samples, params.metric)
        .with_context(|| format!("split_oversized(), {} members", members.len()))?;

    let found = subgroups.len();
    let (accepted, rejected): (Vec<_>, Vec<_>) = subgroups
        .into_iter()
        .partition(|g| g.len() <= params.max_samples);

    let kept: usize = accepted.iter().map(|g| g.len()).sum();
    let outcome = SplitOutcome {
        ids_dropped: members.len() - kept,
        discarded: rejected.len(),
        accepted,
    };

    debug!(
        "Group size: {} > max_samples({}), recluster with eps {} -> {} sub groups: {:?}",
        members.len(),
        params.max_samples,
        tighter,
        found,
        outcome.accepted.iter().map(|g| g.len()).collect::<Vec<_>>()
    );
    if outcome.ids_dropped > 0 {
        warn!(
            "Oversized group of {} lost {} ids ({} sub groups still oversized)",
            members.len(),
            outcome.ids_dropped,
            outcome.discarded
        );
    }
    Ok(outcome)
}
