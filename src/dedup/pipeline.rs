use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::info;

use super::{
    epoch::EpochStats,
    grouper::DensityClusterer,
    model::WorkingSet,
    result::RunResult,
    resume::{RunMode, cluster_with_prior, load_prior_groups},
    table::read_embedding_table,
};
use crate::config::{ValidParams, default_result_path};

/// Everything one `run` needs, already validated.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub embedding_path: PathBuf,
    pub save_path: PathBuf,
    pub mode: RunMode,
    pub params: ValidParams,
}

impl RunRequest {
    /// Resolve the run mode and the result path. Fails before any file is
    /// touched when `force` and `resume` are both set.
    pub fn new(
        embedding_path: &Path,
        save_path: Option<&Path>,
        force: bool,
        resume: bool,
        params: ValidParams,
    ) -> Result<Self> {
        let mode = RunMode::from_flags(force, resume)?;
        let save_path = save_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_result_path(embedding_path));
        Ok(Self {
            embedding_path: embedding_path.to_path_buf(),
            save_path,
            mode,
            params,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: RunResult,
    pub new_groups: usize,
    pub excluded: usize,
    pub epochs: Vec<EpochStats>,
}

/// Load the table, cluster it, merge with any prior result and write the
/// result file. The shuffle is seeded from `params.seed` when set.
pub fn run<C>(clusterer: &C, request: &RunRequest) -> Result<RunReport>
where
    C: DensityClusterer + Sync + ?Sized,
{
    let mut rng = match request.params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    run_with_rng(clusterer, request, &mut rng)
}

pub fn run_with_rng<C, R>(clusterer: &C, request: &RunRequest, rng: &mut R) -> Result<RunReport>
where
    C: DensityClusterer + Sync + ?Sized,
    R: Rng + ?Sized,
{
    let prior = load_prior_groups(request.mode, &request.save_path)?;

    let records = read_embedding_table(&request.embedding_path)?;
    let total_samples = records.len();
    let working_set = WorkingSet::try_new(records)
        .with_context(|| format!("loading {}", request.embedding_path.display()))?;
    info!(
        "Total samples: {}, embedding size: {}",
        total_samples,
        working_set.dimension().unwrap_or(0)
    );

    let merged = cluster_with_prior(clusterer, working_set, prior, &request.params, rng)?;
    let result = RunResult::new(merged.groups, &request.params, total_samples);
    info!(
        "Total samples: {}, cluster group count: {}, samples in clusters: {}",
        total_samples,
        result.groups.len(),
        result.groups.num_ids()
    );

    result.write(&request.save_path)?;
    info!("Save cluster result to {}", request.save_path.display());

    Ok(RunReport {
        result,
        new_groups: merged.new_groups,
        excluded: merged.excluded,
        epochs: merged.epochs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{
        error::DedupError,
        grouper::{LinfaDbscan, Metric},
        model::Record,
        table::write_embedding_table,
        testing::{assert_disjoint, isolated, jittered, normalized, params},
    };

    fn table(dir: &Path, records: &[Record]) -> PathBuf {
        let path = dir.join("emb.parquet");
        write_embedding_table(&path, records).unwrap();
        path
    }

    fn request(path: &Path, force: bool, resume: bool, p: ValidParams) -> RunRequest {
        RunRequest::new(path, None, force, resume, p).unwrap()
    }

    #[test]
    fn test_default_save_path() {
        let r = request(Path::new("/data/emb.parquet"), false, false, params(|_| {}));
        assert_eq!(r.save_path, PathBuf::from("/data/emb.cluster.json"));
        assert_eq!(r.mode, RunMode::Fresh);
    }

    #[test]
    fn test_force_and_resume_rejected_before_work() {
        let err = RunRequest::new(
            Path::new("/does/not/exist.parquet"),
            None,
            true,
            true,
            params(|_| {}),
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<DedupError>(),
            Some(&DedupError::ConflictingRunModes)
        );
    }

    #[test]
    fn test_cosine_run_finds_two_groups() {
        // Two sets of five vectors, one along each axis, under cosine.
        let dir = tempfile::tempdir().unwrap();
        let mut records: Vec<Record> = (0..5)
            .map(|k| Record::new(format!("x{k}").as_str(), vec![1.0 + k as f32, 0.01 * k as f32]))
            .collect();
        records.extend(
            (0..5).map(|k| Record::new(format!("y{k}").as_str(), vec![0.01 * k as f32, 2.0 + k as f32])),
        );
        let path = table(dir.path(), &records);
        let p = params(|p| {
            p.metric = Metric::Cosine;
            p.eps = 0.1;
            p.min_samples = 3;
            p.max_samples = 10;
            p.epochs = 1;
            p.seed = Some(4);
        });

        let report = run(&LinfaDbscan, &request(&path, false, false, p)).unwrap();
        assert_eq!(
            normalized(&report.result.groups),
            vec![
                vec!["x0", "x1", "x2", "x3", "x4"],
                vec!["y0", "y1", "y2", "y3", "y4"]
            ]
        );
        let written = RunResult::read(&dir.path().join("emb.cluster.json")).unwrap();
        assert_eq!(written, report.result);
        let meta = written.meta.unwrap();
        assert_eq!(meta.metric, Metric::Cosine);
        assert_eq!(meta.total_groups, 2);
        assert_eq!(meta.total_samples_in_groups, 10);
    }

    #[test]
    fn test_identical_oversized_blob_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<Record> = (0..30)
            .map(|k| Record::new(format!("d{k}").as_str(), vec![0.3, 0.3, 0.3]))
            .collect();
        let path = table(dir.path(), &records);
        let p = params(|p| {
            p.max_samples = 20;
            p.seed = Some(0);
        });
        let report = run(&LinfaDbscan, &request(&path, false, false, p)).unwrap();
        assert!(report.result.groups.is_empty());
        assert_eq!(report.epochs[0].pass.ids_dropped, 30);
        assert_eq!(report.result.meta.unwrap().total_samples, 30);
    }

    #[test]
    fn test_existing_result_needs_a_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = table(dir.path(), &jittered("a", 4, 0, 6));
        let p = params(|p| p.seed = Some(1));
        run(&LinfaDbscan, &request(&path, false, false, p)).unwrap();

        let err = run(&LinfaDbscan, &request(&path, false, false, p)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DedupError>(),
            Some(DedupError::ResultExists(_))
        ));
        let forced = run(&LinfaDbscan, &request(&path, true, false, p)).unwrap();
        assert_eq!(forced.excluded, 0);
        assert_eq!(forced.new_groups, 1);
    }

    #[test]
    fn test_resume_picks_up_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = jittered("a", 4, 0, 12);
        records.extend(isolated("n", 4, 4, 12));
        let path = table(dir.path(), &records);
        let p = params(|p| p.seed = Some(2));
        let first = run(&LinfaDbscan, &request(&path, false, false, p)).unwrap();
        assert_eq!(first.result.groups.len(), 1);

        // Same table again: nothing new to group.
        let again = run(&LinfaDbscan, &request(&path, false, true, p)).unwrap();
        assert_eq!(again.result.groups, first.result.groups);

        // New near-duplicates arrive.
        records.extend(jittered("b", 5, 2, 12));
        write_embedding_table(&path, &records).unwrap();
        let resumed = run(&LinfaDbscan, &request(&path, false, true, p)).unwrap();
        assert_eq!(resumed.excluded, 4);
        assert_eq!(resumed.new_groups, 1);
        assert_eq!(
            normalized(&resumed.result.groups),
            vec![
                vec!["a0", "a1", "a2", "a3"],
                vec!["b0", "b1", "b2", "b3", "b4"]
            ]
        );
        assert_eq!(resumed.result.groups.last(), first.result.groups.last());
        assert_disjoint(&resumed.result.groups);
        assert_eq!(resumed.result.meta.unwrap().total_samples, 13);
    }

    #[test]
    fn test_empty_table_gives_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = table(dir.path(), &[]);
        let report = run(&LinfaDbscan, &request(&path, false, false, params(|_| {}))).unwrap();
        assert!(report.result.groups.is_empty());
        assert_eq!(report.epochs.len(), 5);
    }
}
