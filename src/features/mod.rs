//! Temporal feature compiler.
//!
//! A [`FeaturePlan`] is an ordered list of [`Stage`] descriptors. Each stage
//! compiles to named derivations over the current catalog, the idempotency
//! guard drops what already exists, and the remainder is applied as one
//! `CREATE OR REPLACE TABLE` statement.

mod derivation;
mod scalars;
mod temporal;

use std::fmt;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::catalog::{Catalog, TableLayout};
use crate::classifier::{ClassifierConfig, ColumnClassifier, ColumnRoles};
use crate::error::{ChurnError, Result};
use crate::store::{Statement, TableStore};

pub use derivation::{CompiledStage, Derivation};
pub use scalars::{product_groups, Members, ProductGroup};
pub use temporal::Rolling;

pub const DEFAULT_PERCENTILE_BUCKETS: u32 = 20;

fn default_buckets() -> u32 {
    DEFAULT_PERCENTILE_BUCKETS
}

/// One derivation kind with its typed parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stage {
    DerivedScalars,
    Percentile {
        #[serde(default = "default_buckets")]
        buckets: u32,
    },
    Ratio,
    /// Lags of orders `1..=order`.
    Lag { order: u32 },
    /// Deltas of orders `1..=order`, against existing lag columns.
    Delta { order: u32 },
    Slope {
        window: u32,
        #[serde(default)]
        max_targets: Option<usize>,
    },
    MinMax { window: u32 },
    /// Lag and delta at specific horizons only.
    Horizon { horizons: Vec<u32> },
    Mean { window: u32 },
}

impl Stage {
    /// Position in the fixed execution order.
    pub fn rank(&self) -> u8 {
        match self {
            Stage::DerivedScalars => 0,
            Stage::Percentile { .. } => 1,
            Stage::Ratio => 2,
            Stage::Lag { .. } => 3,
            Stage::Delta { .. } => 4,
            Stage::Slope { .. } => 5,
            Stage::MinMax { .. } => 6,
            Stage::Horizon { .. } => 7,
            Stage::Mean { .. } => 8,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::DerivedScalars => write!(f, "derived_scalars"),
            Stage::Percentile { buckets } => write!(f, "percentile({buckets})"),
            Stage::Ratio => write!(f, "ratio"),
            Stage::Lag { order } => write!(f, "lag({order})"),
            Stage::Delta { order } => write!(f, "delta({order})"),
            Stage::Slope { window, .. } => write!(f, "slope({window})"),
            Stage::MinMax { window } => write!(f, "min_max({window})"),
            Stage::Horizon { horizons } => write!(f, "horizon({horizons:?})"),
            Stage::Mean { window } => write!(f, "mean({window})"),
        }
    }
}

/// Stages to run; an absent stage is skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeaturePlan {
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl FeaturePlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Stages in execution order, whatever order they were declared in.
    pub fn ordered(&self) -> Vec<Stage> {
        let mut stages = self.stages.clone();
        stages.sort_by_key(Stage::rank);
        stages
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Applied { stage: Stage, added: Vec<String> },
    Skipped { stage: Stage },
}

impl StageOutcome {
    pub fn added(&self) -> &[String] {
        match self {
            StageOutcome::Applied { added, .. } => added,
            StageOutcome::Skipped { .. } => &[],
        }
    }
}

/// Derived-column name for `source` under `marker` with an optional parameter.
pub fn derived_name(source: &str, marker: &str, param: Option<u32>) -> String {
    match param {
        Some(p) => format!("{source}{marker}_{p}"),
        None => format!("{source}{marker}"),
    }
}

pub struct FeatureCompiler {
    layout: TableLayout,
    classifier: ColumnClassifier,
}

impl FeatureCompiler {
    pub fn new(layout: TableLayout, classifier: &ClassifierConfig) -> Self {
        let classifier = ColumnClassifier::new(&layout.entity, &layout.period, classifier);
        Self { layout, classifier }
    }

    pub fn roles(&self, catalog: &Catalog) -> ColumnRoles {
        self.classifier.classify(catalog)
    }

    /// Candidate derivations for `stage`, before the idempotency guard.
    pub fn compile(&self, stage: &Stage, catalog: &Catalog) -> CompiledStage {
        let roles = self.roles(catalog);
        let entity = self.layout.entity.as_str();
        let period = self.layout.period.as_str();
        let targets = &roles.lag_delta_targets;

        let mut scratch = Vec::new();
        let layers = match stage {
            Stage::DerivedScalars => vec![scalars::derivations(catalog, period)],
            Stage::Percentile { buckets } => vec![roles
                .percentile_targets
                .iter()
                .map(|t| temporal::percentile(t, *buckets, period))
                .collect()],
            Stage::Ratio => vec![roles
                .ratio_pairs
                .iter()
                .map(|(m, c)| temporal::ratio(m, c))
                .collect()],
            Stage::Lag { order } => vec![(1..=*order)
                .flat_map(|k| targets.iter().map(move |t| temporal::lag(t, k, entity)))
                .collect()],
            Stage::Delta { order } => vec![(1..=*order)
                .flat_map(|k| targets.iter().map(move |t| temporal::delta(t, k)))
                .collect()],
            Stage::Slope {
                window,
                max_targets,
            } => {
                let limit = max_targets.unwrap_or(targets.len());
                scratch.push(temporal::slope_covariate(entity, period));
                vec![targets
                    .iter()
                    .take(limit)
                    .map(|t| temporal::slope(t, *window, entity, period))
                    .collect()]
            }
            Stage::MinMax { window } => vec![targets
                .iter()
                .flat_map(|t| {
                    [
                        temporal::rolling(t, Rolling::Min, *window, entity),
                        temporal::rolling(t, Rolling::Max, *window, entity),
                    ]
                })
                .collect()],
            Stage::Horizon { horizons } => vec![
                horizons
                    .iter()
                    .flat_map(|h| targets.iter().map(move |t| temporal::lag(t, *h, entity)))
                    .collect(),
                horizons
                    .iter()
                    .flat_map(|h| targets.iter().map(move |t| temporal::delta(t, *h)))
                    .collect(),
            ],
            Stage::Mean { window } => vec![targets
                .iter()
                .map(|t| temporal::rolling(t, Rolling::Mean, *window, entity))
                .collect()],
        };

        CompiledStage {
            stage: stage.clone(),
            scratch,
            layers,
        }
    }

    /// Apply the guard to `compiled` and build the rewrite plan over `source`.
    ///
    /// Returns `None` when every candidate column already exists.
    pub fn plan(
        &self,
        mut compiled: CompiledStage,
        catalog: &Catalog,
        source: LazyFrame,
    ) -> Option<(LazyFrame, Vec<String>)> {
        let ordered = matches!(compiled.stage, Stage::Lag { .. } | Stage::Delta { .. });
        let pending = compiled.pending(catalog);
        if pending.iter().all(Vec::is_empty) {
            return None;
        }

        if let Some(order) = pending.iter().flatten().filter_map(|d| d.order).min() {
            if ordered && order > 1 {
                info!(resume_from = order, "resuming partially applied stage");
            }
        }

        let mut added = Vec::new();
        let mut plan = source.sort(
            [self.layout.entity.as_str(), self.layout.period.as_str()],
            SortMultipleOptions::default().with_maintain_order(true),
        );
        let scratch = !compiled.scratch.is_empty();
        if scratch {
            plan = plan.with_columns(
                compiled
                    .scratch
                    .into_iter()
                    .map(|d| d.expr.alias(d.name.as_str()))
                    .collect::<Vec<_>>(),
            );
        }
        for layer in pending.into_iter().filter(|l| !l.is_empty()) {
            let exprs: Vec<Expr> = layer
                .into_iter()
                .map(|d| {
                    added.push(d.name.clone());
                    d.expr.alias(d.name.as_str())
                })
                .collect();
            plan = plan.with_columns(exprs);
        }
        if scratch {
            let mut output = catalog.projection();
            output.extend(added.iter().map(|name| col(name.as_str())));
            plan = plan.select(output);
        }
        Some((plan, added))
    }

    /// Run one stage against the store, keeping `catalog` current.
    #[instrument(skip_all, fields(stage = %stage))]
    pub fn apply_stage<S: TableStore>(
        &self,
        store: &mut S,
        stage: &Stage,
        catalog: &mut Catalog,
    ) -> Result<StageOutcome> {
        let compiled = self.compile(stage, catalog);
        let source = store
            .scan(&self.layout.table)
            .map_err(|e| ChurnError::in_stage(stage.to_string(), e))?;

        let Some((plan, added)) = self.plan(compiled, catalog, source) else {
            info!("stage already applied; skipping");
            return Ok(StageOutcome::Skipped {
                stage: stage.clone(),
            });
        };

        let statement = Statement::create_or_replace(self.layout.table.clone(), plan);
        *catalog = store
            .execute(statement)
            .map_err(|e| ChurnError::in_stage(stage.to_string(), e))?;

        info!(added = added.len(), columns = catalog.len(), "stage applied");
        Ok(StageOutcome::Applied {
            stage: stage.clone(),
            added,
        })
    }

    /// Run every stage of `plan` in execution order.
    pub fn run<S: TableStore>(
        &self,
        store: &mut S,
        plan: &FeaturePlan,
        catalog: &mut Catalog,
    ) -> Result<Vec<StageOutcome>> {
        let stages = plan.ordered();
        if stages.is_empty() {
            warn!("feature plan has no stages");
        }
        stages
            .iter()
            .map(|stage| self.apply_stage(store, stage, catalog))
            .collect()
    }
}
