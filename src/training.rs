//! Training hand-off.
//!
//! Splits the labelled feature table by period into the matrices a tree
//! learner consumes, and defines the contracts of the collaborators that
//! search hyperparameters, train and score. Model internals live outside
//! this crate.
use std::collections::BTreeMap;
use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ChurnError, Result};
use crate::schema::labels;

/// Months assigned to each partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub train: Vec<i64>,
    #[serde(default)]
    pub validation: Option<i64>,
    #[serde(default)]
    pub test: Option<i64>,
}

/// Feature matrix plus target, weight and ternary label vectors.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub features: DataFrame,
    pub target: Vec<Option<i32>>,
    pub weight: Vec<f64>,
    pub ternary: Vec<Option<String>>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.features.height()
    }

    pub fn is_empty(&self) -> bool {
        self.features.height() == 0
    }

    pub fn positives(&self) -> usize {
        self.target.iter().filter(|t| **t == Some(1)).count()
    }

    /// Build from the rows of `df`, dropping label columns from the features.
    pub fn from_frame(df: DataFrame) -> Result<Self> {
        for name in [labels::TERNARY, labels::BINARY, labels::WEIGHT] {
            if df.column(name).is_err() {
                return Err(ChurnError::ColumnNotFound(name.to_string()));
            }
        }

        let target = df
            .column(labels::BINARY)?
            .cast(&DataType::Int32)?
            .i32()?
            .into_iter()
            .collect();
        let weight = df
            .column(labels::WEIGHT)?
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|w| w.unwrap_or(labels::WEIGHT_DEFAULT))
            .collect();
        let ternary = df
            .column(labels::TERNARY)?
            .str()?
            .into_iter()
            .map(|l| l.map(str::to_string))
            .collect();

        let keep: Vec<Expr> = df
            .get_column_names_str()
            .into_iter()
            .filter(|n| !labels::ALL.contains(n))
            .map(|n| col(n))
            .collect();
        let features = df.lazy().select(keep).collect()?;

        Ok(Self {
            features,
            target,
            weight,
            ternary,
        })
    }
}

/// Train, validation and test partitions.
#[derive(Debug, Clone)]
pub struct HandOff {
    pub train: TrainingSet,
    pub validation: Option<TrainingSet>,
    pub test: Option<TrainingSet>,
}

fn in_months(period: &str, months: &[i64]) -> Expr {
    months
        .iter()
        .map(|m| col(period).eq(lit(*m)))
        .reduce(|a, b| a.or(b))
        .unwrap_or_else(|| lit(false))
}

fn partition(table: &LazyFrame, period: &str, months: &[i64], drop_unlabelled: bool) -> Result<TrainingSet> {
    let mut rows = table.clone().filter(in_months(period, months));
    if drop_unlabelled {
        rows = rows.filter(col(labels::BINARY).is_not_null());
    }
    TrainingSet::from_frame(rows.collect()?)
}

/// Split the labelled table by month.
///
/// Training rows whose binary target is null are dropped; validation and
/// test rows are kept as they are.
pub fn split(table: LazyFrame, period: &str, config: &SplitConfig) -> Result<HandOff> {
    if config.train.is_empty() {
        return Err(ChurnError::General("No training months configured".into()));
    }

    let train = partition(&table, period, &config.train, true)?;
    if train.is_empty() {
        warn!(months = ?config.train, "training partition is empty");
    }
    let validation = config
        .validation
        .map(|m| partition(&table, period, &[m], false))
        .transpose()?;
    let test = config
        .test
        .map(|m| partition(&table, period, &[m], false))
        .transpose()?;

    info!(
        train_rows = train.len(),
        train_positives = train.positives(),
        validation_rows = validation.as_ref().map_or(0, TrainingSet::len),
        test_rows = test.as_ref().map_or(0, TrainingSet::len),
        "hand-off split"
    );
    Ok(HandOff {
        train,
        validation,
        test,
    })
}

// ── Collaborator contracts ──────────────────────────────────────────────────

/// Best parameters found by a hyperparameter search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub params: BTreeMap<String, f64>,
    pub best_rounds: usize,
}

pub trait HyperparameterSearch {
    fn search(&self, train: &TrainingSet) -> Result<SearchOutcome>;
}

pub trait Scorer {
    /// One churn probability per row of `features`.
    fn score(&self, features: &DataFrame) -> Result<Vec<f64>>;
}

pub trait TreeTrainer {
    /// Fit on `train` and persist the model under `artifact`.
    fn train(
        &self,
        train: &TrainingSet,
        outcome: &SearchOutcome,
        artifact: &Path,
    ) -> Result<Box<dyn Scorer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled() -> DataFrame {
        df!(
            "numero_de_cliente" => [1i64, 2, 1, 2, 1, 2],
            "foto_mes" => [202101i64, 202101, 202102, 202102, 202103, 202103],
            "msaldo" => [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0],
            "clase_ternaria" => [Some("CONTINUA"), Some("BAJA+2"), Some("CONTINUA"), Some("BAJA+1"), None, None],
            "clase_binaria" => [Some(0i32), Some(1), Some(0), Some(1), None, None],
            "clase_binaria2" => [0i32, 1, 0, 0, 0, 0],
            "clase_peso" => [1.0f64, 1.00002, 1.0, 1.00001, 1.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn split_by_month_drops_label_columns() {
        let config = SplitConfig {
            train: vec![202101, 202102],
            validation: None,
            test: Some(202103),
        };
        let handoff = split(labelled().lazy(), "foto_mes", &config).unwrap();

        assert_eq!(handoff.train.len(), 4);
        assert_eq!(handoff.train.positives(), 2);
        assert_eq!(handoff.train.weight, vec![1.0, 1.00002, 1.0, 1.00001]);
        let names: Vec<&str> = handoff.train.features.get_column_names_str();
        assert_eq!(names, ["numero_de_cliente", "foto_mes", "msaldo"]);

        let test = handoff.test.unwrap();
        assert_eq!(test.len(), 2);
        assert_eq!(test.target, vec![None, None]);
        assert!(handoff.validation.is_none());
    }

    #[test]
    fn unlabelled_rows_leave_the_training_partition() {
        let config = SplitConfig {
            train: vec![202102, 202103],
            ..Default::default()
        };
        let handoff = split(labelled().lazy(), "foto_mes", &config).unwrap();
        assert_eq!(handoff.train.len(), 2);
        assert_eq!(
            handoff.train.ternary,
            vec![Some("CONTINUA".to_string()), Some("BAJA+1".to_string())]
        );
    }

    #[test]
    fn missing_labels_are_reported() {
        let df = df!("foto_mes" => [202101i64]).unwrap();
        let config = SplitConfig {
            train: vec![202101],
            ..Default::default()
        };
        assert!(matches!(
            split(df.lazy(), "foto_mes", &config),
            Err(ChurnError::ColumnNotFound(_)) | Err(ChurnError::Polars(_))
        ));
    }
}
