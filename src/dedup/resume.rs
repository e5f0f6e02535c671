use std::path::Path;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{info, warn};

use super::{
    epoch::{EpochStats, run_epochs},
    error::DedupError,
    grouper::DensityClusterer,
    model::{IdGroups, WorkingSet},
    result::RunResult,
};
use crate::config::ValidParams;

/// How to treat a result file left by an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Refuse to run if a result already exists.
    Fresh,
    /// Ignore any earlier result and overwrite it.
    Force,
    /// Keep the earlier groups, cluster only ids not in them, and merge.
    Resume,
}

impl RunMode {
    pub fn from_flags(force: bool, resume: bool) -> Result<Self, DedupError> {
        match (force, resume) {
            (true, true) => Err(DedupError::ConflictingRunModes),
            (true, false) => Ok(Self::Force),
            (false, true) => Ok(Self::Resume),
            (false, false) => Ok(Self::Fresh),
        }
    }
}

/// Groups from an earlier run that must survive this one.
///
/// Empty when there is no result at `save_path` or when forcing. Without
/// either flag an existing result is a configuration error.
pub fn load_prior_groups(mode: RunMode, save_path: &Path) -> Result<IdGroups> {
    if !save_path.exists() {
        return Ok(IdGroups::default());
    }
    match mode {
        RunMode::Fresh => Err(DedupError::ResultExists(save_path.to_path_buf()).into()),
        RunMode::Force => {
            warn!("Force to run clustering, save result to {}", save_path.display());
            Ok(IdGroups::default())
        }
        RunMode::Resume => {
            warn!("Resume clustering, save result to {}", save_path.display());
            Ok(RunResult::read(save_path)
                .with_context(|| "load_prior_groups()")?
                .groups)
        }
    }
}

/// New groups followed by the untouched prior groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merged {
    pub groups: IdGroups,
    pub new_groups: usize,
    /// Records dropped up front because a prior group already holds them.
    pub excluded: usize,
    pub epochs: Vec<EpochStats>,
}

/// Exclude every id of `prior` from the working set, run the epoch driver on
/// what is left, and append `prior` unmodified to the new groups.
pub fn cluster_with_prior<C, R>(
    clusterer: &C,
    mut working_set: WorkingSet,
    mut prior: IdGroups,
    params: &ValidParams,
    rng: &mut R,
) -> Result<Merged>
where
    C: DensityClusterer + Sync + ?Sized,
    R: Rng + ?Sized,
{
    let excluded = {
        let prior_ids = prior.id_set();
        if prior_ids.is_empty() {
            0
        } else {
            let removed = working_set.remove_ids(&prior_ids);
            info!(
                "Remove {} embedding in {} exists groups ({} ids), remain: {}",
                removed,
                prior.len(),
                prior_ids.len(),
                working_set.len()
            );
            removed
        }
    };

    let mut run = run_epochs(clusterer, working_set, params, rng)?;
    let new_groups = run.groups.len();
    let mut groups = std::mem::take(&mut run.groups);
    groups.append(&mut prior);

    Ok(Merged {
        groups,
        new_groups,
        excluded,
        epochs: run.epochs,
    })
}
