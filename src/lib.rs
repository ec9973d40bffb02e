//! Temporal feature compiler and churn label generator for monthly entity
//! snapshots.

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod labels;
pub mod logging;
pub mod period;
pub mod pipeline;
pub mod schema;
pub mod store;
pub mod training;

#[cfg(feature = "python")]
mod python;

pub use catalog::{Catalog, ColumnInfo, TableLayout};
pub use classifier::{ClassifierConfig, ColumnClassifier, ColumnRole, ColumnRoles};
pub use config::{ExperimentConfig, Step};
pub use error::{ChurnError, Result};
pub use features::{FeatureCompiler, FeaturePlan, Stage, StageOutcome};
pub use labels::{LabelConfig, LabelGenerator, TernaryLabel, UnknownPolicy};
pub use pipeline::{Pipeline, RunReport, TrainingReport};
pub use store::{MemoryStore, ParquetStore, Statement, TableStore};

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::types::PyModule;

/// Export column-name constants as Python submodules
#[cfg(feature = "python")]
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Keys
    let keys = PyModule::new(m.py(), "keys")?;
    keys.add("ENTITY", schema::keys::ENTITY)?;
    keys.add("PERIOD", schema::keys::PERIOD)?;
    keys.add("TABLE", schema::keys::TABLE)?;
    m.add_submodule(&keys)?;

    // Labels
    let labels = PyModule::new(m.py(), "labels")?;
    labels.add("TERNARY", schema::labels::TERNARY)?;
    labels.add("BINARY", schema::labels::BINARY)?;
    labels.add("BINARY_BAJA2", schema::labels::BINARY_BAJA2)?;
    labels.add("WEIGHT", schema::labels::WEIGHT)?;
    labels.add("CONTINUA", schema::labels::CONTINUA)?;
    labels.add("BAJA_1", schema::labels::BAJA_1)?;
    labels.add("BAJA_2", schema::labels::BAJA_2)?;
    m.add_submodule(&labels)?;

    Ok(())
}

#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PyPipeline>()?;
    add_schema_exports(m)?;
    Ok(())
}
