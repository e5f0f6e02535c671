mod paths;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use paths::{ConfigPath, UserConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dedup::{
    error::DedupError,
    grouper::{ClusterSize, DbscanEpsilon, Metric},
};

/// File name of the optional parameter defaults under the user config dir.
pub const PARAMS_FILE_NAME: &str = "cluster.toml";

/// Extension given to a result file derived from an embedding table path.
pub const RESULT_EXTENSION: &str = "cluster.json";

/// Every tunable of a clustering run, as read from TOML or the command line.
///
/// Nothing here is checked; call [`ClusterParams::validate`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterParams {
    pub metric: Metric,
    /// DBSCAN radius for the first epoch.
    pub eps: f32,
    /// Per-epoch multiplier on `eps`: epoch `e` uses `eps * eps_decay^e`.
    pub eps_decay: f32,
    pub min_samples: usize,
    /// Groups larger than this are re-split with half the radius.
    pub max_samples: usize,
    pub epochs: usize,
    /// Upper bound on records handed to one DBSCAN call.
    pub bucket_size: usize,
    /// Seed for the between-epoch shuffle. `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Process the buckets of a pass on the rayon pool.
    pub parallel: bool,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            metric: Metric::Euclidean,
            eps: 0.5,
            eps_decay: 0.995,
            min_samples: 3,
            max_samples: 20,
            epochs: 5,
            bucket_size: 20000,
            seed: None,
            parallel: false,
        }
    }
}

/// Command-line values layered on top of [`ClusterParams`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamOverrides {
    pub metric: Option<Metric>,
    pub eps: Option<f32>,
    pub eps_decay: Option<f32>,
    pub min_samples: Option<usize>,
    pub max_samples: Option<usize>,
    pub epochs: Option<usize>,
    pub bucket_size: Option<usize>,
    pub seed: Option<u64>,
    pub parallel: bool,
}

impl ClusterParams {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).with_context(|| "ClusterParams::from_toml_str()")
    }

    /// Load defaults from `explicit`, or from the user config file when it
    /// exists. Falls back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match user_params_path() {
                Ok(p) if p.is_file() => p,
                _ => return Ok(Self::default()),
            },
        };
        debug!("Loading cluster parameters from {}", path.display());
        let body = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&body).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn with_overrides(mut self, o: &ParamOverrides) -> Self {
        if let Some(v) = o.metric {
            self.metric = v;
        }
        if let Some(v) = o.eps {
            self.eps = v;
        }
        if let Some(v) = o.eps_decay {
            self.eps_decay = v;
        }
        if let Some(v) = o.min_samples {
            self.min_samples = v;
        }
        if let Some(v) = o.max_samples {
            self.max_samples = v;
        }
        if let Some(v) = o.epochs {
            self.epochs = v;
        }
        if let Some(v) = o.bucket_size {
            self.bucket_size = v;
        }
        if o.seed.is_some() {
            self.seed = o.seed;
        }
        self.parallel |= o.parallel;
        self
    }

    pub fn validate(&self) -> Result<ValidParams, DedupError> {
        let eps = DbscanEpsilon::try_new(self.eps)?;
        let min_samples = ClusterSize::try_new(self.min_samples)?;
        if !(self.eps_decay > 0.0 && self.eps_decay <= 1.0) {
            return Err(DedupError::invalid(
                "eps_decay",
                format!("{}; must be in (0, 1]", self.eps_decay),
            ));
        }
        if self.max_samples < *min_samples {
            return Err(DedupError::invalid(
                "max_samples",
                format!("{}; must be >= min_samples ({})", self.max_samples, min_samples),
            ));
        }
        if self.epochs == 0 {
            return Err(DedupError::invalid("epochs", "must be at least 1"));
        }
        if self.bucket_size == 0 {
            return Err(DedupError::invalid("bucket_size", "must be at least 1"));
        }
        Ok(ValidParams {
            metric: self.metric,
            eps,
            eps_decay: self.eps_decay,
            min_samples,
            max_samples: self.max_samples,
            epochs: self.epochs,
            bucket_size: self.bucket_size,
            seed: self.seed,
            parallel: self.parallel,
        })
    }
}

/// Parameters that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidParams {
    pub metric: Metric,
    pub eps: DbscanEpsilon,
    pub eps_decay: f32,
    pub min_samples: ClusterSize,
    pub max_samples: usize,
    pub epochs: usize,
    pub bucket_size: usize,
    pub seed: Option<u64>,
    pub parallel: bool,
}

impl ValidParams {
    /// Radius of the bucketed pass in `epoch` (0-based).
    pub fn radius_for_epoch(&self, epoch: usize) -> DbscanEpsilon {
        let exponent = i32::try_from(epoch).unwrap_or(i32::MAX);
        self.eps.scaled(self.eps_decay.powi(exponent))
    }
}

#[cfg(test)]
impl Default for ValidParams {
    fn default() -> Self {
        ClusterParams::default()
            .validate()
            .expect("built-in defaults are valid")
    }
}

/// `~/.config/cdd/cluster.toml`
pub fn user_params_path() -> Result<PathBuf> {
    UserConfig::get_file_path(PARAMS_FILE_NAME)
}

/// Where the result for `embedding_path` goes when no path is given:
/// `data.parquet` becomes `data.cluster.json`.
pub fn default_result_path(embedding_path: &Path) -> PathBuf {
    embedding_path.with_extension(RESULT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let p = ValidParams::default();
        assert_eq!(p.metric, Metric::Euclidean);
        assert_eq!(*p.eps, 0.5);
        assert_eq!(*p.min_samples, 3);
        assert_eq!(p.max_samples, 20);
        assert_eq!(p.epochs, 5);
        assert_eq!(p.bucket_size, 20000);
        assert!(!p.parallel);
    }

    #[test]
    fn test_toml_and_overrides() {
        let params = ClusterParams::from_toml_str(
            r#"
            metric = "cosine"
            eps = 0.2
            epochs = 2
            "#,
        )
        .unwrap();
        assert_eq!(params.metric, Metric::Cosine);
        assert_eq!(params.eps, 0.2);
        assert_eq!(params.max_samples, 20);

        let params = params.with_overrides(&ParamOverrides {
            eps: Some(0.3),
            seed: Some(42),
            ..Default::default()
        });
        assert_eq!(params.eps, 0.3);
        assert_eq!(params.epochs, 2);
        assert_eq!(params.seed, Some(42));
    }

    #[test]
    fn test_toml_rejects_unknown_metric() {
        let err = ClusterParams::from_toml_str(r#"metric = "manhattan""#).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown metric"));
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(ClusterParams::from_toml_str("epoch = 3").is_err());
    }

    #[test]
    fn test_validation_errors() {
        let bad = |p: ClusterParams| p.validate().unwrap_err();
        let base = ClusterParams::default();

        assert!(matches!(
            bad(ClusterParams { eps: -0.1, ..base.clone() }),
            DedupError::InvalidParameter { name: "eps", .. }
        ));
        assert!(matches!(
            bad(ClusterParams { min_samples: 1, ..base.clone() }),
            DedupError::InvalidParameter { name: "min_samples", .. }
        ));
        assert!(matches!(
            bad(ClusterParams { max_samples: 2, ..base.clone() }),
            DedupError::InvalidParameter { name: "max_samples", .. }
        ));
        assert!(matches!(
            bad(ClusterParams { epochs: 0, ..base.clone() }),
            DedupError::InvalidParameter { name: "epochs", .. }
        ));
        assert!(matches!(
            bad(ClusterParams { bucket_size: 0, ..base.clone() }),
            DedupError::InvalidParameter { name: "bucket_size", .. }
        ));
        assert!(matches!(
            bad(ClusterParams { eps_decay: 1.5, ..base }),
            DedupError::InvalidParameter { name: "eps_decay", .. }
        ));
    }

    #[test]
    fn test_radius_for_epoch() {
        let p = ClusterParams {
            eps: 1.0,
            eps_decay: 0.5,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(*p.radius_for_epoch(0), 1.0);
        assert_eq!(*p.radius_for_epoch(2), 0.25);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PARAMS_FILE_NAME);
        std::fs::write(&path, "bucket_size = 100\nparallel = true\n").unwrap();
        let params = ClusterParams::load(Some(&path)).unwrap();
        assert_eq!(params.bucket_size, 100);
        assert!(params.parallel);

        assert!(ClusterParams::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_default_result_path() {
        assert_eq!(
            default_result_path(Path::new("/data/convs.parquet")),
            PathBuf::from("/data/convs.cluster.json")
        );
    }
}
