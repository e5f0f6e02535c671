use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{grouper::Metric, model::IdGroups};
use crate::config::ValidParams;

/// Parameters and counts recorded next to the groups.
///
/// Every field has a default so that result files written with fewer fields
/// still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMeta {
    pub metric: Metric,
    pub eps: f32,
    pub eps_decay: f32,
    pub min_samples: usize,
    pub max_samples: usize,
    pub epochs: usize,
    pub bucket_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Rows in the input table, including ids excluded because of a resume.
    pub total_samples: usize,
    pub total_groups: usize,
    pub total_samples_in_groups: usize,
}

/// The terminal artifact of a run: the groups plus how they were made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub groups: IdGroups,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RunMeta>,
}

impl RunResult {
    pub fn new(groups: IdGroups, params: &ValidParams, total_samples: usize) -> Self {
        let meta = RunMeta {
            metric: params.metric,
            eps: *params.eps,
            eps_decay: params.eps_decay,
            min_samples: *params.min_samples,
            max_samples: params.max_samples,
            epochs: params.epochs,
            bucket_size: params.bucket_size,
            seed: params.seed,
            total_samples,
            total_groups: groups.len(),
            total_samples_in_groups: groups.num_ids(),
        };
        Self {
            groups,
            meta: Some(meta),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing cluster result {}", path.display()))
    }

    /// Write as indented JSON. The document goes to a temporary file next to
    /// `path` first and is then renamed over it, so an existing result is
    /// never left half-written.
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temporary file in {}", dir.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)
                .with_context(|| "RunResult::write()")?;
            writeln!(writer)?;
            writer.flush()?;
        }
        tmp.persist(path)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
