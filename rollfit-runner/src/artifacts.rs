//! Artifact store: persisted result tables and fitted models.
//!
//! Every artifact is addressed by a string key. The key helpers below are the
//! only place that knows the naming convention; the backtest writes through
//! them and the ensembler reads through them.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use rollfit_core::domain::Month;
use rollfit_core::model::Estimator;
use rollfit_core::window::WindowSpec;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::result::{ResultError, ResultTable};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("invalid artifact key '{0}'")]
    InvalidKey(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result table error: {0}")]
    Results(#[from] ResultError),

    #[error("artifact store lock poisoned")]
    Poisoned,
}

/// Storage for result tables and model blobs.
pub trait ArtifactStore: Send + Sync {
    fn store_results(&self, key: &str, table: &ResultTable) -> Result<(), ArtifactError>;

    fn load_results(&self, key: &str) -> Result<ResultTable, ArtifactError>;

    fn store_model(&self, key: &str, bytes: &[u8]) -> Result<(), ArtifactError>;

    fn load_model(&self, key: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// Serialize any fitted value (a model or a list of models) under `key`.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn ArtifactStore,
    key: &str,
    value: &T,
) -> Result<(), ArtifactError> {
    store.store_model(key, &serde_json::to_vec(value)?)
}

pub fn load_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
) -> Result<T, ArtifactError> {
    Ok(serde_json::from_slice(&store.load_model(key)?)?)
}

pub fn save_estimator<E: Estimator>(
    store: &dyn ArtifactStore,
    key: &str,
    model: &E,
) -> Result<(), ArtifactError> {
    save_json(store, key, model)
}

pub fn load_estimator<E: Estimator>(
    store: &dyn ArtifactStore,
    key: &str,
) -> Result<E, ArtifactError> {
    load_json(store, key)
}

// ─── Key convention ─────────────────────────────────────────────────

/// How the persisted models of a run were configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    #[default]
    NotTuned,
    TunedRandomCv,
    TunedTimeSeriesSplit,
}

impl ModelFamily {
    /// Key prefix: `not_tuned/`, `tuned/random_cv_` or `tuned/time_series_split_`.
    pub fn prefix(&self) -> &'static str {
        match self {
            ModelFamily::NotTuned => "not_tuned/",
            ModelFamily::TunedRandomCv => "tuned/random_cv_",
            ModelFamily::TunedTimeSeriesSplit => "tuned/time_series_split_",
        }
    }
}

/// `all` or the sample size.
pub fn sample_label(sample: Option<usize>) -> String {
    sample.map_or_else(|| "all".to_string(), |n| n.to_string())
}

/// Key of the model fitted for `month`.
pub fn model_key(
    family: ModelFamily,
    window: WindowSpec,
    sample: Option<usize>,
    month: Month,
) -> String {
    format!(
        "{}winsize{}_sample{}_{}.json",
        family.prefix(),
        window,
        sample_label(sample),
        month
    )
}

/// Key of the single model fitted in random-split mode.
pub fn random_split_key(family: ModelFamily, sample: Option<usize>) -> String {
    format!("{}randomsplit_sample{}.json", family.prefix(), sample_label(sample))
}

/// Key of a persisted ensemble (the list of its constituent models).
pub fn ensemble_key(
    family: ModelFamily,
    window_sizes: &[u32],
    weights_label: &str,
    sample: Option<usize>,
    month: Month,
) -> String {
    let sizes: Vec<String> = window_sizes.iter().map(u32::to_string).collect();
    format!(
        "{}winsize{}_{}_sample{}_{}.json",
        family.prefix(),
        sizes.join("-"),
        weights_label,
        sample_label(sample),
        month
    )
}

/// Key of the untuned error table of one window size in an experiment.
pub fn error_table_key(experiment: &str, window_size: u32) -> String {
    format!("exp{experiment}{window_size}_notuning")
}

// ─── Filesystem store ───────────────────────────────────────────────

/// Keys map to paths under `root`. Result tables get a `.csv` extension;
/// model keys are used as-is. Parent directories are created on write.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|source| ArtifactError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn results_path(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        self.path_for(&format!("{key}.csv"))
    }

    fn prepare_parent(path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn store_results(&self, key: &str, table: &ResultTable) -> Result<(), ArtifactError> {
        let path = self.results_path(key)?;
        Self::prepare_parent(&path)?;
        table.write_to(&path)?;
        Ok(())
    }

    fn load_results(&self, key: &str) -> Result<ResultTable, ArtifactError> {
        let path = self.results_path(key)?;
        if !path.exists() {
            return Err(ArtifactError::NotFound(key.to_string()));
        }
        Ok(ResultTable::read_from(&path)?)
    }

    fn store_model(&self, key: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        let path = self.path_for(key)?;
        Self::prepare_parent(&path)?;
        std::fs::write(&path, bytes).map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn load_model(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(key)?;
        std::fs::read(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ArtifactError::NotFound(key.to_string()),
            _ => ArtifactError::Io {
                path: path.display().to_string(),
                source,
            },
        })
    }
}

// ─── In-memory store ────────────────────────────────────────────────

/// Keeps every artifact in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    results: Mutex<HashMap<String, ResultTable>>,
    models: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted keys of every stored model.
    pub fn model_keys(&self) -> Result<Vec<String>, ArtifactError> {
        let models = self.models.lock().map_err(|_| ArtifactError::Poisoned)?;
        let mut keys: Vec<String> = models.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Sorted keys of every stored result table.
    pub fn result_keys(&self) -> Result<Vec<String>, ArtifactError> {
        let results = self.results.lock().map_err(|_| ArtifactError::Poisoned)?;
        let mut keys: Vec<String> = results.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn store_results(&self, key: &str, table: &ResultTable) -> Result<(), ArtifactError> {
        let mut results = self.results.lock().map_err(|_| ArtifactError::Poisoned)?;
        results.insert(key.to_string(), table.clone());
        Ok(())
    }

    fn load_results(&self, key: &str) -> Result<ResultTable, ArtifactError> {
        let results = self.results.lock().map_err(|_| ArtifactError::Poisoned)?;
        results
            .get(key)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(key.to_string()))
    }

    fn store_model(&self, key: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        let mut models = self.models.lock().map_err(|_| ArtifactError::Poisoned)?;
        models.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load_model(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let models = self.models.lock().map_err(|_| ArtifactError::Poisoned)?;
        models
            .get(key)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResultRow;
    use rollfit_core::metrics::ErrorMetric;
    use rollfit_core::model::ParamName;

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    fn table() -> ResultTable {
        let mut row = ResultRow::empty(m("2021-04"));
        row.metrics.insert(ErrorMetric::Mae, 3.5);
        ResultTable::new([ErrorMetric::Mae], Vec::<ParamName>::new(), vec![row])
    }

    #[test]
    fn key_convention() {
        assert_eq!(
            model_key(ModelFamily::NotTuned, WindowSpec::Rolling(12), None, m("2020-06")),
            "not_tuned/winsize12_sampleall_2020-06.json"
        );
        assert_eq!(
            model_key(
                ModelFamily::TunedTimeSeriesSplit,
                WindowSpec::Expanding,
                Some(5000),
                m("2020-06")
            ),
            "tuned/time_series_split_winsizeexpanding_sample5000_2020-06.json"
        );
        assert_eq!(
            ensemble_key(ModelFamily::NotTuned, &[1, 3, 6], "unequalw", None, m("2021-01")),
            "not_tuned/winsize1-3-6_unequalw_sampleall_2021-01.json"
        );
        assert_eq!(error_table_key("2", 6), "exp26_notuning");
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryArtifactStore::new();
        store.store_results("exp11_notuning", &table()).unwrap();
        assert_eq!(store.load_results("exp11_notuning").unwrap(), table());
        store.store_model("a/b.json", b"{}").unwrap();
        assert_eq!(store.load_model("a/b.json").unwrap(), b"{}".to_vec());
        assert_eq!(store.model_keys().unwrap(), vec!["a/b.json".to_string()]);
        assert!(matches!(
            store.load_model("missing"),
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[test]
    fn fs_store_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let key = model_key(ModelFamily::NotTuned, WindowSpec::Rolling(3), None, m("2020-01"));
        store.store_model(&key, b"[1,2]").unwrap();
        assert!(dir.path().join("not_tuned").join("winsize3_sampleall_2020-01.json").exists());
        assert_eq!(store.load_model(&key).unwrap(), b"[1,2]".to_vec());

        store.store_results("tables/exp13_notuning", &table()).unwrap();
        assert!(dir.path().join("tables/exp13_notuning.csv").exists());
        assert_eq!(store.load_results("tables/exp13_notuning").unwrap(), table());
    }

    #[test]
    fn fs_store_reports_missing_and_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load_results("nope"),
            Err(ArtifactError::NotFound(_))
        ));
        assert!(matches!(
            store.load_model("nope.json"),
            Err(ArtifactError::NotFound(_))
        ));
        assert!(matches!(
            store.store_model("../escape.json", b""),
            Err(ArtifactError::InvalidKey(_))
        ));
        assert!(matches!(
            store.store_model("/abs.json", b""),
            Err(ArtifactError::InvalidKey(_))
        ));
    }

    #[test]
    fn json_helpers_round_trip_values() {
        let store = MemoryArtifactStore::new();
        save_json(&store, "v.json", &vec![1.5_f64, 2.5]).unwrap();
        let back: Vec<f64> = load_json(&store, "v.json").unwrap();
        assert_eq!(back, vec![1.5, 2.5]);
    }
}
