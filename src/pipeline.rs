use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cleaner::{clean_transactions, CleaningReport};
use crate::config::PipelineConfig;
use crate::enricher::{enrich_transactions, DepartmentNames, ProductCatalog};
use crate::error::PesticideError;
use crate::geography::{load_department_geometries, DepartmentGeometry};
use crate::loader::{load_communes, load_products, load_transactions};

/// Which files fed a pipeline run and what cleaning removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded_files: Vec<PathBuf>,
    pub missing_files: Vec<PathBuf>,
    pub cleaning: CleaningReport,
}

/// Everything the views need, produced once per input manifest.
#[derive(Debug, Clone)]
pub struct PesticideData {
    /// Canonical transactions.
    pub transactions: DataFrame,
    /// Canonical transactions plus `nom produit` / `fonctions`.
    pub enriched: DataFrame,
    pub departments: DepartmentNames,
    pub products: ProductCatalog,
    pub geometries: Vec<DepartmentGeometry>,
    pub report: LoadReport,
    pub cache_key: String,
    pub loaded_at: DateTime<Utc>,
}

/// Loader → Cleaner → Enricher, in one call.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PesticideData, PesticideError> {
    let started = Instant::now();
    let cache_key = manifest_key(config)?;

    let batch = load_transactions(config)?;
    let communes = load_communes(config)?;
    let products = load_products(config)?;
    let geometries = load_department_geometries(&config.geometry_path)?;

    let (transactions, cleaning) = clean_transactions(&batch.frame)?;
    let departments = DepartmentNames::from_communes(&communes)?;
    let catalog = ProductCatalog::from_reference(&products)?;
    let enriched = enrich_transactions(&transactions, &catalog)?;

    info!(
        rows = transactions.height(),
        departments = departments.len(),
        products = catalog.len(),
        geometries = geometries.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pipeline complete"
    );

    Ok(PesticideData {
        transactions,
        enriched,
        departments,
        products: catalog,
        geometries,
        report: LoadReport {
            loaded_files: batch.loaded,
            missing_files: batch.missing,
            cleaning,
        },
        cache_key,
        loaded_at: Utc::now(),
    })
}

/// SHA-256 over path, size and modification time of every input.
///
/// Absent files contribute a fixed marker, so a file appearing or
/// disappearing changes the key as well.
pub fn manifest_key(config: &PipelineConfig) -> Result<String, PesticideError> {
    let mut hasher = Sha256::new();
    let transaction_paths: Vec<PathBuf> = config
        .transaction_files()
        .into_iter()
        .map(|f| f.path)
        .collect();
    let paths = transaction_paths
        .iter()
        .map(PathBuf::as_path)
        .chain(config.reference_paths());

    for path in paths {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(file_fingerprint(path)?.as_bytes());
        hasher.update([b'\n']);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn file_fingerprint(path: &Path) -> Result<String, PesticideError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok("missing".to_string()),
        Err(e) => return Err(e.into()),
    };
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    Ok(format!("{}:{}", metadata.len(), modified))
}

/// Memoizes [`run_pipeline`] on the input manifest.
///
/// A call with unchanged inputs hands back the same `Arc`; any change to a
/// file's presence, size or modification time triggers a fresh run.
#[derive(Debug, Default)]
pub struct PipelineCache {
    slot: Mutex<Option<Arc<PesticideData>>>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, config: &PipelineConfig) -> Result<Arc<PesticideData>, PesticideError> {
        let key = manifest_key(config)?;
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(data) = slot.as_ref().filter(|d| d.cache_key == key) {
            debug!(key = %key, "pipeline cache hit");
            return Ok(Arc::clone(data));
        }

        info!(key = %key, "pipeline cache miss; loading");
        let data = Arc::new(run_pipeline(config)?);
        *slot = Some(Arc::clone(&data));
        Ok(data)
    }

    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    pub fn cached_key(&self) -> Option<String> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|d| d.cache_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_key_tracks_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_base_dir(dir.path());

        let empty = manifest_key(&config).unwrap();
        assert_eq!(empty, manifest_key(&config).unwrap());
        assert_eq!(empty.len(), 64);

        fs::create_dir_all(dir.path().join("csv")).unwrap();
        fs::write(&config.communes_path, "code_departement,nom_departement\n").unwrap();
        let with_communes = manifest_key(&config).unwrap();
        assert_ne!(empty, with_communes);

        fs::write(&config.communes_path, "code_departement,nom_departement\n01,Ain\n").unwrap();
        assert_ne!(with_communes, manifest_key(&config).unwrap());
    }

    #[test]
    fn cache_starts_empty() {
        let cache = PipelineCache::new();
        assert_eq!(cache.cached_key(), None);
        cache.clear();
        assert_eq!(cache.cached_key(), None);
    }
}
