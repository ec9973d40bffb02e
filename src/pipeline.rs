//! Pipeline orchestrator.
//!
//! Runs the configured steps against one table store. The catalog is
//! introspected once per run and then replaced by the schema each executed
//! statement returns.
use std::fs;
use std::path::Path;
use std::time::Instant;

use polars::prelude::*;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::{ExperimentConfig, Step};
use crate::error::{ChurnError, Result};
use crate::features::{FeatureCompiler, StageOutcome};
use crate::ingest;
use crate::labels::LabelGenerator;
use crate::period;
use crate::store::{ParquetStore, Statement, TableStore};
use crate::training::{self, HyperparameterSearch, SearchOutcome, TreeTrainer};

/// What one `run` did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub completed: Vec<Step>,
    pub outcomes: Vec<StageOutcome>,
}

/// Result of driving the training collaborators.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub outcome: SearchOutcome,
    /// Test-month scores, when a test month is configured.
    pub scores: Option<Vec<f64>>,
}

pub struct Pipeline<S: TableStore> {
    config: ExperimentConfig,
    store: S,
    catalog: Option<Catalog>,
    run_id: Uuid,
}

impl Pipeline<ParquetStore> {
    /// Create the configured directories and open the parquet store.
    pub fn from_config(config: ExperimentConfig) -> Result<Self> {
        config.ensure_dirs()?;
        let store = ParquetStore::open(config.store_dir()?)?;
        Ok(Self::new(config, store))
    }
}

impl<S: TableStore> Pipeline<S> {
    pub fn new(config: ExperimentConfig, store: S) -> Self {
        Self {
            config,
            store,
            catalog: None,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Current catalog, introspecting the table on first use.
    fn current_catalog(&mut self) -> Result<Catalog> {
        if let Some(catalog) = &self.catalog {
            return Ok(catalog.clone());
        }
        let catalog = self.store.describe(&self.config.layout.table)?;
        info!(columns = catalog.len(), "catalog introspected");
        self.catalog = Some(catalog.clone());
        Ok(catalog)
    }

    /// Run the configured steps, stopping after `until` when given.
    pub fn run(&mut self, until: Option<Step>) -> Result<RunReport> {
        let span = info_span!("run", run_id = %self.run_id, table = %self.config.layout.table);
        let _enter = span.enter();

        let steps = self.config.steps_until(until);
        info!(?steps, "run started");
        let started = Instant::now();

        let mut report = RunReport {
            run_id: self.run_id,
            completed: Vec::new(),
            outcomes: Vec::new(),
        };
        for step in steps {
            let step_started = Instant::now();
            info!(%step, "step started");

            let result = match step {
                Step::LoadRaws => self.load_raws(),
                Step::Labels => self.labels(),
                Step::Features => self.features().map(|o| report.outcomes.extend(o)),
                Step::DeleteRaws => self.delete_raws().map(|_| ()),
            };
            if let Err(e) = result {
                error!(%step, error = %e, "step failed");
                return Err(e);
            }

            info!(
                %step,
                elapsed_ms = step_started.elapsed().as_millis() as u64,
                "step finished"
            );
            report.completed.push(step);
        }

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "run finished");
        Ok(report)
    }

    // ── Steps ───────────────────────────────────────────────────────────────

    pub fn load_raws(&mut self) -> Result<()> {
        let paths = self.config.raw_paths()?;
        if paths.is_empty() {
            return Err(ChurnError::General("No raw files configured".into()));
        }
        let catalog = ingest::load_raws(&mut self.store, &self.config.layout, &paths)?;
        self.catalog = Some(catalog);
        Ok(())
    }

    pub fn labels(&mut self) -> Result<()> {
        let layout = self.config.layout.clone();
        let generator = LabelGenerator::new(&layout.entity, &layout.period, self.config.labels.clone());
        let mut catalog = self.current_catalog()?;

        let periods = self
            .store
            .scan(&layout.table)?
            .select([col(layout.period.as_str())])
            .collect()?;
        period::validate_column(&periods, &layout.period)?;

        if let Some(plan) = generator.ternary_plan(self.store.scan(&layout.table)?, &catalog)? {
            catalog = self
                .store
                .execute(Statement::create_or_replace(layout.table.clone(), plan))?;
            self.catalog = Some(catalog.clone());
        }
        if let Some(plan) = generator.binary_plan(self.store.scan(&layout.table)?, &catalog)? {
            catalog = self
                .store
                .execute(Statement::create_or_replace(layout.table.clone(), plan))?;
            self.catalog = Some(catalog.clone());
        }

        let counts = generator
            .counts_plan(self.store.scan(&layout.table)?, &catalog)?
            .collect()?;
        info!("class counts per period:\n{counts}");
        Ok(())
    }

    pub fn features(&mut self) -> Result<Vec<StageOutcome>> {
        let compiler = FeatureCompiler::new(self.config.layout.clone(), &self.config.classifier);
        let mut catalog = self.current_catalog()?;
        let outcomes = compiler.run(&mut self.store, &self.config.features, &mut catalog);
        // Stages that completed before a failure have already replaced the table.
        self.catalog = Some(catalog);
        let outcomes = outcomes?;

        let added: usize = outcomes.iter().map(|o| o.added().len()).sum();
        info!(stages = outcomes.len(), added, "features compiled");
        Ok(outcomes)
    }

    /// Delete the local raw files. Returns how many were removed.
    pub fn delete_raws(&self) -> Result<usize> {
        let mut deleted = 0;
        for path in self.config.raw_paths()? {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "raw file deleted");
                    deleted += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "could not delete raw file"),
            }
        }
        Ok(deleted)
    }

    // ── Training hand-off ───────────────────────────────────────────────────

    /// Split the final table and drive the training collaborators.
    pub fn hand_off(
        &self,
        search: &dyn HyperparameterSearch,
        trainer: &dyn TreeTrainer,
        artifact: &Path,
    ) -> Result<TrainingReport> {
        let split = self
            .config
            .split
            .as_ref()
            .ok_or_else(|| ChurnError::General("No split configured".into()))?;
        let handoff = training::split(
            self.store.scan(&self.config.layout.table)?,
            &self.config.layout.period,
            split,
        )?;

        let outcome = search.search(&handoff.train)?;
        info!(best_rounds = outcome.best_rounds, params = ?outcome.params, "hyperparameter search finished");

        let scorer = trainer.train(&handoff.train, &outcome, artifact)?;
        let scores = handoff
            .test
            .as_ref()
            .map(|test| scorer.score(&test.features))
            .transpose()?;
        if let Some(scores) = &scores {
            info!(rows = scores.len(), artifact = %artifact.display(), "test month scored");
        }

        Ok(TrainingReport { outcome, scores })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::labels;
    use crate::store::MemoryStore;
    use crate::training::{Scorer, TrainingSet};
    use std::collections::BTreeMap;

    const RAW: &str = "numero_de_cliente,foto_mes,mcuentas_saldo,ccuentas_saldo\n\
        1,202101,10,1\n1,202102,20,2\n1,202103,30,0\n\
        2,202101,5,1\n2,202102,6,1\n2,202103,7,1\n2,202104,8,1\n";

    fn config(root: &Path, steps: &str) -> ExperimentConfig {
        let yaml = format!(
            r#"
EXP:
  paths: {{ logs: {root}/logs, datasets: {root}/datasets, store: {root}/store }}
  files: {{ raw: [crudo.csv] }}
  steps: {steps}
  features:
    stages:
      - {{ kind: lag, order: 1 }}
      - {{ kind: ratio }}
  split: {{ train: [202101, 202102], test: 202103 }}
"#,
            root = root.display()
        );
        let config = ExperimentConfig::from_yaml(&yaml, "EXP").unwrap();
        config.ensure_dirs().unwrap();
        fs::write(config.datasets_dir().unwrap().join("crudo.csv"), RAW).unwrap();
        config
    }

    #[test]
    fn runs_steps_and_threads_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            config(dir.path(), "[load_raws, labels, features]"),
            MemoryStore::new(),
        );
        let report = pipeline.run(None).unwrap();

        assert_eq!(report.completed, vec![Step::LoadRaws, Step::Labels, Step::Features]);
        let catalog = pipeline.catalog().unwrap().clone();
        assert_eq!(catalog, pipeline.store().describe("df_init").unwrap());
        for name in labels::ALL {
            assert!(catalog.contains(name), "{name} missing");
        }
        assert!(catalog.contains("mcuentas_saldo_lag_1"));
        assert!(catalog.contains("mcuentas_saldo_ccuentas_saldo_ratio"));
    }

    #[test]
    fn until_stops_after_the_named_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            config(dir.path(), "[load_raws, labels, features]"),
            MemoryStore::new(),
        );
        let report = pipeline.run(Some(Step::Labels)).unwrap();
        assert_eq!(report.completed, vec![Step::LoadRaws, Step::Labels]);
        assert!(!pipeline.catalog().unwrap().contains("mcuentas_saldo_lag_1"));
    }

    #[test]
    fn delete_raws_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path(), "[delete_raws]"), MemoryStore::new());
        assert_eq!(pipeline.delete_raws().unwrap(), 1);
        assert_eq!(pipeline.delete_raws().unwrap(), 0);
    }

    #[test]
    fn labels_without_a_table_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config(dir.path(), "[labels]"), MemoryStore::new());
        assert!(matches!(pipeline.run(None), Err(ChurnError::TableNotFound(_))));
    }

    struct FixedSearch;

    impl HyperparameterSearch for FixedSearch {
        fn search(&self, train: &TrainingSet) -> Result<SearchOutcome> {
            let mut params = BTreeMap::new();
            params.insert("learning_rate".to_string(), 0.05);
            Ok(SearchOutcome {
                params,
                best_rounds: train.len(),
            })
        }
    }

    struct BaseRate(f64);

    impl Scorer for BaseRate {
        fn score(&self, features: &DataFrame) -> Result<Vec<f64>> {
            Ok(vec![self.0; features.height()])
        }
    }

    struct BaseRateTrainer;

    impl TreeTrainer for BaseRateTrainer {
        fn train(
            &self,
            train: &TrainingSet,
            _outcome: &SearchOutcome,
            _artifact: &Path,
        ) -> Result<Box<dyn Scorer>> {
            let rate = train.positives() as f64 / train.len().max(1) as f64;
            Ok(Box::new(BaseRate(rate)))
        }
    }

    #[test]
    fn hand_off_drives_collaborators() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            config(dir.path(), "[load_raws, labels, features]"),
            MemoryStore::new(),
        );
        pipeline.run(None).unwrap();

        let report = pipeline
            .hand_off(&FixedSearch, &BaseRateTrainer, &dir.path().join("model.txt"))
            .unwrap();
        assert_eq!(report.outcome.best_rounds, 4);
        // One BAJA+2 among the four training rows.
        assert_eq!(report.scores, Some(vec![0.25, 0.25]));
    }
}
