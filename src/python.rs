use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3_polars::PyDataFrame;

use crate::config::{ExperimentConfig, Step};
use crate::error::ChurnError;
use crate::pipeline::Pipeline;
use crate::store::{ParquetStore, TableStore};
use crate::training::{self, TrainingSet};

/// Python handle on one configured experiment.
#[pyclass(name = "ChurnPipeline")]
pub struct PyPipeline {
    inner: Pipeline<ParquetStore>,
}

type Partition = (PyDataFrame, Vec<Option<i32>>, Vec<f64>);

fn into_partition(set: TrainingSet) -> Partition {
    (PyDataFrame(set.features), set.target, set.weight)
}

#[pymethods]
impl PyPipeline {
    #[new]
    fn new(config_path: &str, experiment: &str) -> PyResult<Self> {
        let config = ExperimentConfig::load(config_path, experiment)?;
        Ok(Self {
            inner: Pipeline::from_config(config)?,
        })
    }

    #[getter]
    fn run_id(&self) -> String {
        self.inner.run_id().to_string()
    }

    /// Run the configured steps. Returns the names of the completed steps.
    #[pyo3(signature = (until=None))]
    fn run(&mut self, until: Option<&str>) -> PyResult<Vec<String>> {
        let until = until
            .map(|s| s.parse::<Step>())
            .transpose()
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let report = self.inner.run(until)?;
        Ok(report.completed.iter().map(ToString::to_string).collect())
    }

    /// The working table as it stands.
    fn table(&self) -> PyResult<PyDataFrame> {
        let table = &self.inner.config().layout.table;
        Ok(PyDataFrame(self.inner.store().read(table)?))
    }

    /// `(train, validation, test)`; each partition is `(features, target,
    /// weight)` or `None` when the month is not configured.
    fn split(&self) -> PyResult<(Partition, Option<Partition>, Option<Partition>)> {
        let config = self.inner.config();
        let split = config
            .split
            .as_ref()
            .ok_or_else(|| ChurnError::General("No split configured".into()))?;
        let handoff = training::split(
            self.inner.store().scan(&config.layout.table)?,
            &config.layout.period,
            split,
        )?;
        Ok((
            into_partition(handoff.train),
            handoff.validation.map(into_partition),
            handoff.test.map(into_partition),
        ))
    }
}
