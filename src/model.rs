use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pyo3::prelude::*;
use pyo3_polars::PyDataFrame;

use crate::aggregation::{self, DatasetSummary, PostalOrder, RankingMetric, YearRange};
use crate::config::PipelineConfig;
use crate::enricher::DepartmentNames;
use crate::error::PesticideError;
use crate::geography::geometries_to_frame;
use crate::pipeline::{PesticideData, PipelineCache};

#[pyclass]
pub struct PesticideModel {
    config: PipelineConfig,
    cache: PipelineCache,
}

#[pymethods]
impl PesticideModel {
    /// Without `base_path` the layout comes from `PESTICIDES_*` environment
    /// variables (and `.env`), defaulting to the working directory.
    #[new]
    #[pyo3(signature = (base_path=None))]
    fn new(base_path: Option<String>) -> PyResult<Self> {
        let config = match base_path {
            Some(base) => PipelineConfig::with_base_dir(PathBuf::from(base)),
            None => PipelineConfig::from_env()?,
        };
        Ok(Self {
            config,
            cache: PipelineCache::new(),
        })
    }

    // ── Data loading ────────────────────────────────────────────────────────

    /// Run the pipeline, or reuse the previous run when no input changed.
    /// Returns the cache key of the data now held.
    fn load(&self) -> PyResult<String> {
        Ok(self.data()?.cache_key.clone())
    }

    /// Drop the cached run; the next call reloads every file.
    fn clear_cache(&self) {
        self.cache.clear();
    }

    // ── Properties ──────────────────────────────────────────────────────────

    #[getter]
    fn cache_key(&self) -> Option<String> {
        self.cache.cached_key()
    }

    #[getter]
    fn loaded_at(&self) -> PyResult<DateTime<Utc>> {
        Ok(self.data()?.loaded_at)
    }

    #[getter]
    fn missing_files(&self) -> PyResult<Vec<String>> {
        let data = self.data()?;
        Ok(data
            .report
            .missing_files
            .iter()
            .map(|p| p.display().to_string())
            .collect())
    }

    /// Rejected row counts keyed by reason.
    #[getter]
    fn rejected_rows(&self) -> PyResult<BTreeMap<String, usize>> {
        let data = self.data()?;
        Ok(data
            .report
            .cleaning
            .rejected
            .iter()
            .map(|(reason, count)| (reason.to_string(), *count))
            .collect())
    }

    #[getter]
    fn transactions_df(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.data()?.transactions.clone()))
    }

    #[getter]
    fn enriched_df(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.data()?.enriched.clone()))
    }

    #[getter]
    fn geometries_df(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(geometries_to_frame(&self.data()?.geometries)?))
    }

    #[getter]
    fn department_names(&self) -> PyResult<BTreeMap<String, String>> {
        Ok(self.data()?.departments.to_map())
    }

    /// `"<code> - <name>"` labels for a department picker.
    #[getter]
    fn department_options(&self) -> PyResult<Vec<String>> {
        Ok(self.data()?.departments.selection_options())
    }

    // ── Views ───────────────────────────────────────────────────────────────

    fn summary(&self) -> PyResult<DatasetSummary> {
        Ok(aggregation::summarize(&self.data()?.transactions)?)
    }

    /// Total quantity per postal code; `descending` ranks by quantity instead
    /// of ordering by code.
    #[pyo3(signature = (descending=false))]
    fn quantity_by_postal_code(&self, descending: bool) -> PyResult<PyDataFrame> {
        let order = if descending {
            PostalOrder::ByQuantityDesc
        } else {
            PostalOrder::ByCode
        };
        let df = aggregation::quantity_by_postal_code(&self.data()?.transactions, order)?;
        Ok(PyDataFrame(df))
    }

    fn postal_code_diversity(&self) -> PyResult<PyDataFrame> {
        let df = aggregation::postal_code_diversity(&self.data()?.transactions)?;
        Ok(PyDataFrame(df))
    }

    /// One row per department geometry with centroid, total and RGB shade.
    fn department_color_scale(&self) -> PyResult<PyDataFrame> {
        let data = self.data()?;
        let shades = aggregation::department_color_scale(&data.transactions, &data.geometries)?;
        Ok(PyDataFrame(aggregation::shades_to_frame(&shades)?))
    }

    /// `department` is a code (`"29"`) or a picker label (`"29 - Finistère"`).
    fn quantity_by_year(&self, department: &str) -> PyResult<PyDataFrame> {
        let code = DepartmentNames::code_from_option(department);
        let df = aggregation::quantity_by_year(&self.data()?.transactions, code)?;
        Ok(PyDataFrame(df))
    }

    /// Top `n` products by `metric`: `total_quantity`, `average_quantity`
    /// or `transaction_count`.
    #[pyo3(signature = (metric="total_quantity", n=10))]
    fn top_products(&self, metric: &str, n: usize) -> PyResult<PyDataFrame> {
        let metric: RankingMetric = metric.parse()?;
        let df = aggregation::top_products(&self.data()?.enriched, metric, n)?;
        Ok(PyDataFrame(df))
    }

    #[pyo3(signature = (department, start_year, end_year, limit=aggregation::DEFAULT_BREAKDOWN_LIMIT))]
    fn product_year_breakdown(
        &self,
        department: &str,
        start_year: u16,
        end_year: u16,
        limit: usize,
    ) -> PyResult<PyDataFrame> {
        let code = DepartmentNames::code_from_option(department);
        let range = YearRange::new(start_year, end_year, &self.config.years)?;
        let breakdown =
            aggregation::product_year_breakdown(&self.data()?.enriched, code, range, limit)?;
        Ok(PyDataFrame(breakdown.to_frame()?))
    }

    #[pyo3(signature = (threshold=aggregation::DEFAULT_FUNCTION_THRESHOLD))]
    fn function_counts(&self, threshold: i64) -> PyResult<PyDataFrame> {
        let df = aggregation::function_counts(&self.data()?.enriched, threshold)?;
        Ok(PyDataFrame(df))
    }
}

#[pymethods]
impl DatasetSummary {
    #[getter]
    fn year_range(&self) -> Option<String> {
        self.year_range_label()
    }

    fn __repr__(&self) -> String {
        format!(
            "DatasetSummary(products={}, quantity={}, transactions={}, postal_codes={}, years={})",
            self.distinct_products,
            self.total_quantity,
            self.transactions,
            self.distinct_postal_codes,
            self.year_range_label().unwrap_or_else(|| "-".to_string())
        )
    }
}

// ── Private helpers ─────────────────────────────────────────────────────────

impl PesticideModel {
    fn data(&self) -> Result<Arc<PesticideData>, PesticideError> {
        self.cache.get_or_load(&self.config)
    }
}
