pub mod aggregation;
pub mod cleaner;
pub mod config;
pub mod enricher;
pub mod error;
pub mod geography;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod schema;

#[cfg(feature = "python")]
mod model;

pub use error::PesticideError;
pub use pipeline::{run_pipeline, PesticideData, PipelineCache};

#[cfg(feature = "python")]
mod python {
    use pyo3::prelude::*;
    use pyo3::types::PyModule;

    use crate::aggregation::DatasetSummary;
    use crate::model::PesticideModel;
    use crate::schema;

    /// Export schema constants as Python submodules
    fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
        // Transaction
        let transaction = PyModule::new(m.py(), "transaction")?;
        transaction.add("PACKAGING", schema::transaction::PACKAGING)?;
        transaction.add("POSTAL_CODE", schema::transaction::POSTAL_CODE)?;
        transaction.add("QUANTITY", schema::transaction::QUANTITY)?;
        transaction.add("AMM", schema::transaction::AMM)?;
        transaction.add("YEAR", schema::transaction::YEAR)?;
        transaction.add("DEPARTMENT_CODE", schema::transaction::DEPARTMENT_CODE)?;
        m.add_submodule(&transaction)?;

        // Product
        let product = PyModule::new(m.py(), "product")?;
        product.add("AMM_NUMBER", schema::product::AMM_NUMBER)?;
        product.add("NAME", schema::product::NAME)?;
        product.add("FUNCTIONS", schema::product::FUNCTIONS)?;
        m.add_submodule(&product)?;

        // Geometry
        let geometry = PyModule::new(m.py(), "geometry")?;
        geometry.add("CODE", schema::geometry::CODE)?;
        geometry.add("NAME", schema::geometry::NAME)?;
        geometry.add("LONGITUDE", schema::geometry::LONGITUDE)?;
        geometry.add("LATITUDE", schema::geometry::LATITUDE)?;
        m.add_submodule(&geometry)?;

        // View
        let view = PyModule::new(m.py(), "view")?;
        view.add("DISTINCT_PRODUCTS", schema::view::DISTINCT_PRODUCTS)?;
        view.add("TRANSACTION_COUNT", schema::view::TRANSACTION_COUNT)?;
        view.add("NORMALIZED_QUANTITY", schema::view::NORMALIZED_QUANTITY)?;
        view.add("RED", schema::view::RED)?;
        view.add("GREEN", schema::view::GREEN)?;
        view.add("BLUE", schema::view::BLUE)?;
        view.add("TOTAL", schema::view::TOTAL)?;
        view.add("COUNT", schema::view::COUNT)?;
        m.add_submodule(&view)?;

        // RankingMetric
        let ranking_metric = PyModule::new(m.py(), "ranking_metric")?;
        ranking_metric.add("TOTAL_QUANTITY", schema::ranking_metric::TOTAL_QUANTITY)?;
        ranking_metric.add("AVERAGE_QUANTITY", schema::ranking_metric::AVERAGE_QUANTITY)?;
        ranking_metric.add("TRANSACTION_COUNT", schema::ranking_metric::TRANSACTION_COUNT)?;
        m.add_submodule(&ranking_metric)?;

        Ok(())
    }

    /// Route `tracing` output to stderr; `RUST_LOG` wins over `directive`.
    #[pyfunction]
    #[pyo3(signature = (directive=crate::logging::DEFAULT_DIRECTIVE))]
    fn init_logging(directive: &str) -> PyResult<()> {
        Ok(crate::logging::init_logging(directive)?)
    }

    #[pymodule]
    fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_class::<PesticideModel>()?;
        m.add_class::<DatasetSummary>()?;
        m.add_function(wrap_pyfunction!(init_logging, m)?)?;
        add_schema_exports(m)?;
        Ok(())
    }
}
