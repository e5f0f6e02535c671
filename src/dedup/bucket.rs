use std::ops::Range;

use anyhow::{Context, Result};
use derive_more::{Add, AddAssign};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    grouper::{DbscanEpsilon, DensityClusterer},
    model::{IdGroup, IdGroups, Record, WorkingSet},
    splitter::split_oversized,
};
use crate::config::ValidParams;

/// Counters for one bucketed pass. Adding two gives the counters of both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Add, AddAssign, Serialize, Deserialize)]
pub struct PassStats {
    pub buckets: usize,
    /// Groups within the size bound straight out of DBSCAN.
    pub direct_groups: usize,
    /// Groups that had to go through the oversize splitter.
    pub oversized_groups: usize,
    /// Subgroups the splitter produced and kept.
    pub split_groups: usize,
    /// Subgroups the splitter threw away as still oversized.
    pub split_discarded: usize,
    /// Ids that were in an oversized group but in no kept subgroup.
    pub ids_dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutput {
    pub groups: IdGroups,
    pub stats: PassStats,
}

/// Split `len` items into `ceil(len / bucket_size)` contiguous ranges of
/// near-equal size. The first `len % k` ranges hold one extra item, so 12
/// items with a bucket size of 5 give 4/4/4.
pub fn bucket_ranges(len: usize, bucket_size: usize) -> Vec<Range<usize>> {
    if len == 0 || bucket_size == 0 {
        return vec![];
    }
    let total_buckets = len.div_ceil(bucket_size);
    let base = len / total_buckets;
    let extra = len % total_buckets;

    let mut start = 0;
    (0..total_buckets)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// One bucketed pass over the working set at `radius`.
///
/// Buckets never see each other: near-duplicates split across two buckets
/// stay apart in this pass. With `params.parallel` the buckets are processed
/// on the rayon pool; the output order is the same either way.
pub fn bucketed_pass<C>(
    clusterer: &C,
    working_set: &WorkingSet,
    radius: DbscanEpsilon,
    params: &ValidParams,
) -> Result<PassOutput>
where
    C: DensityClusterer + Sync + ?Sized,
{
    let records = working_set.records();
    let ranges = bucket_ranges(records.len(), params.bucket_size);
    let total_buckets = ranges.len();

    let run = |(i, range): (usize, &Range<usize>)| {
        info!("Processing bucket {}/{}", i + 1, total_buckets);
        group_bucket(clusterer, &records[range.clone()], radius, params)
            .with_context(|| format!("bucket {}/{}", i + 1, total_buckets))
    };
    let outputs: Vec<PassOutput> = if params.parallel {
        ranges.par_iter().enumerate().map(run).collect::<Result<_>>()?
    } else {
        ranges.iter().enumerate().map(run).collect::<Result<_>>()?
    };

    Ok(outputs
        .into_iter()
        .fold(PassOutput::default(), |mut acc, mut out| {
            acc.groups.append(&mut out.groups);
            acc.stats += out.stats;
            acc
        }))
}

fn group_bucket<C>(
    clusterer: &C,
    bucket: &[Record],
    radius: DbscanEpsilon,
    params: &ValidParams,
) -> Result<PassOutput>
where
    C: DensityClusterer + ?Sized,
{
    let vectors: Vec<&[f32]> = bucket.iter().map(|r| r.embedding.as_slice()).collect();
    let index_groups = clusterer.cluster(&vectors, radius, params.min_samples, params.metric)?;

    let mut sizes: Vec<usize> = index_groups.iter().map(|g| g.len()).collect();
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    info!("bucket groups: {}. {:?}", index_groups.len(), sizes);

    let to_ids = |members: &[&Record], positions: &[usize]| -> IdGroup {
        positions.iter().map(|&p| members[p].id.clone()).collect()
    };
    let bucket_refs: Vec<&Record> = bucket.iter().collect();

    let mut out = PassOutput {
        stats: PassStats {
            buckets: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    for index_group in index_groups {
        if index_group.len() <= params.max_samples {
            out.groups.push(to_ids(&bucket_refs, &index_group));
            out.stats.direct_groups += 1;
            continue;
        }

        let members: Vec<&Record> = index_group.iter().map(|&i| bucket_refs[i]).collect();
        let member_vectors: Vec<&[f32]> = index_group.iter().map(|&i| vectors[i]).collect();
        let outcome = split_oversized(clusterer, &member_vectors, radius, params)?;

        out.stats.oversized_groups += 1;
        out.stats.split_groups += outcome.accepted.len();
        out.stats.split_discarded += outcome.discarded;
        out.stats.ids_dropped += outcome.ids_dropped;
        out.groups.extend(
            outcome
                .accepted
                .iter()
                .map(|positions| to_ids(&members, positions)),
        );
    }
    Ok(out)
}
