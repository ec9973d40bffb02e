//! Churn label generation.
//!
//! For every entity/period row decides whether the entity is still present
//! one and two periods later, then derives the binary target, the BAJA+2
//! flag and the sample weight from that ternary label.
use std::fmt;
use std::str::FromStr;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::catalog::Catalog;
use crate::error::{ChurnError, Result};
use crate::period;
use crate::schema::labels;

const PERIOD_IDX: &str = "__period_idx";
const NEXT_1: &str = "__p1";
const NEXT_2: &str = "__p2";
const MAX_IDX: &str = "__maxp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TernaryLabel {
    #[serde(rename = "CONTINUA")]
    Continua,
    #[serde(rename = "BAJA+1")]
    Baja1,
    #[serde(rename = "BAJA+2")]
    Baja2,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl TernaryLabel {
    /// Stored value in the ternary column; UNKNOWN is stored as null.
    pub fn as_value(self) -> Option<&'static str> {
        match self {
            TernaryLabel::Continua => Some(labels::CONTINUA),
            TernaryLabel::Baja1 => Some(labels::BAJA_1),
            TernaryLabel::Baja2 => Some(labels::BAJA_2),
            TernaryLabel::Unknown => None,
        }
    }

    /// Label of a row at period index `idx`, given the indices of the
    /// entity's next two rows and the dataset's last period index.
    pub fn classify(idx: i64, next: Option<i64>, next2: Option<i64>, max_idx: i64) -> Self {
        if idx < max_idx && next.map_or(true, |p1| p1 > idx + 1) {
            TernaryLabel::Baja1
        } else if idx < max_idx - 1
            && next == Some(idx + 1)
            && next2.map_or(true, |p2| p2 > idx + 2)
        {
            TernaryLabel::Baja2
        } else if idx <= max_idx - 2 {
            TernaryLabel::Continua
        } else {
            TernaryLabel::Unknown
        }
    }

    /// Labels for one entity's ascending period indices.
    pub fn sequence(indices: &[i64], max_idx: i64) -> Vec<Self> {
        (0..indices.len())
            .map(|i| {
                Self::classify(
                    indices[i],
                    indices.get(i + 1).copied(),
                    indices.get(i + 2).copied(),
                    max_idx,
                )
            })
            .collect()
    }
}

impl fmt::Display for TernaryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_value().unwrap_or("UNKNOWN"))
    }
}

impl FromStr for TernaryLabel {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            labels::CONTINUA => Ok(TernaryLabel::Continua),
            labels::BAJA_1 => Ok(TernaryLabel::Baja1),
            labels::BAJA_2 => Ok(TernaryLabel::Baja2),
            "UNKNOWN" => Ok(TernaryLabel::Unknown),
            other => Err(ChurnError::General(format!("Unknown ternary label: {other}"))),
        }
    }
}

/// How UNKNOWN rows are encoded in the binary target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    /// UNKNOWN counts as churn (`0 if CONTINUA else 1`).
    #[default]
    Positive,
    Negative,
    /// Leave the binary target null so downstream filters drop the row.
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub baja2: f64,
    pub baja1: f64,
    pub other: f64,
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self {
            baja2: labels::WEIGHT_BAJA_2,
            baja1: labels::WEIGHT_BAJA_1,
            other: labels::WEIGHT_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_positives")]
    pub positives: Vec<TernaryLabel>,
    #[serde(default)]
    pub unknown: UnknownPolicy,
    #[serde(default)]
    pub weights: ClassWeights,
}

fn default_positives() -> Vec<TernaryLabel> {
    vec![TernaryLabel::Baja1, TernaryLabel::Baja2]
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            positives: default_positives(),
            unknown: UnknownPolicy::default(),
            weights: ClassWeights::default(),
        }
    }
}

impl LabelConfig {
    /// Binary target for one label, `None` when the policy leaves it null.
    pub fn binary(&self, label: TernaryLabel) -> Option<i32> {
        if label == TernaryLabel::Unknown {
            return match self.unknown {
                UnknownPolicy::Positive => Some(1),
                UnknownPolicy::Negative => Some(0),
                UnknownPolicy::Null => None,
            };
        }
        Some(i32::from(self.positives.contains(&label)))
    }

    pub fn weight(&self, label: TernaryLabel) -> f64 {
        match label {
            TernaryLabel::Baja2 => self.weights.baja2,
            TernaryLabel::Baja1 => self.weights.baja1,
            _ => self.weights.other,
        }
    }
}

// ── Plan builders ───────────────────────────────────────────────────────────

/// Builds the label statements for one table layout.
#[derive(Debug, Clone)]
pub struct LabelGenerator {
    entity: String,
    period: String,
    config: LabelConfig,
}

impl LabelGenerator {
    pub fn new(entity: &str, period: &str, config: LabelConfig) -> Self {
        Self {
            entity: entity.to_string(),
            period: period.to_string(),
            config,
        }
    }

    fn require(&self, catalog: &Catalog) -> Result<()> {
        for name in [&self.entity, &self.period] {
            if !catalog.contains(name) {
                return Err(ChurnError::ColumnNotFound(name.clone()));
            }
        }
        Ok(())
    }

    /// Plan appending the ternary label, or `None` if it is already present.
    #[instrument(skip_all)]
    pub fn ternary_plan(&self, source: LazyFrame, catalog: &Catalog) -> Result<Option<LazyFrame>> {
        if catalog.contains(labels::TERNARY) {
            info!("{} already present; skipping", labels::TERNARY);
            return Ok(None);
        }
        self.require(catalog)?;

        let idx = col(PERIOD_IDX);
        let p1 = col(NEXT_1);
        let p2 = col(NEXT_2);
        let maxp = col(MAX_IDX);

        let label = when(
            idx.clone()
                .lt(maxp.clone())
                .and(p1.clone().is_null().or(p1.clone().gt(idx.clone() + lit(1i64)))),
        )
        .then(lit(labels::BAJA_1))
        .when(
            idx.clone()
                .lt(maxp.clone() - lit(1i64))
                .and(p1.eq(idx.clone() + lit(1i64)))
                .and(p2.clone().is_null().or(p2.gt(idx.clone() + lit(2i64)))),
        )
        .then(lit(labels::BAJA_2))
        .when(idx.lt_eq(maxp - lit(2i64)))
        .then(lit(labels::CONTINUA))
        .otherwise(lit(NULL).cast(DataType::String))
        .alias(labels::TERNARY);

        let mut output = catalog.projection();
        output.push(label);

        let entity = col(self.entity.as_str());
        let plan = source
            .sort(
                [self.entity.as_str(), self.period.as_str()],
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .with_columns([period::index_expr(&self.period).alias(PERIOD_IDX)])
            .with_columns([
                col(PERIOD_IDX)
                    .shift(lit(-1i64))
                    .over([entity.clone()])
                    .alias(NEXT_1),
                col(PERIOD_IDX)
                    .shift(lit(-2i64))
                    .over([entity])
                    .alias(NEXT_2),
                col(PERIOD_IDX).max().alias(MAX_IDX),
            ])
            .select(output);

        Ok(Some(plan))
    }

    /// Plan appending binary target, BAJA+2 flag and weight.
    #[instrument(skip_all)]
    pub fn binary_plan(&self, source: LazyFrame, catalog: &Catalog) -> Result<Option<LazyFrame>> {
        if !catalog.contains(labels::TERNARY) {
            return Err(ChurnError::ColumnNotFound(labels::TERNARY.to_string()));
        }

        let mut exprs = Vec::new();
        if !catalog.contains(labels::BINARY) {
            exprs.push(self.binary_expr().alias(labels::BINARY));
        }
        if !catalog.contains(labels::BINARY_BAJA2) {
            exprs.push(
                when(col(labels::TERNARY).eq(lit(labels::BAJA_2)))
                    .then(lit(1i32))
                    .otherwise(lit(0i32))
                    .alias(labels::BINARY_BAJA2),
            );
        }
        if !catalog.contains(labels::WEIGHT) {
            exprs.push(self.weight_expr().alias(labels::WEIGHT));
        }

        if exprs.is_empty() {
            info!("binary target and weights already present; skipping");
            return Ok(None);
        }
        Ok(Some(source.with_columns(exprs)))
    }

    /// Ternary column mapped through `value` for each stored label.
    fn by_label(&self, value: impl Fn(TernaryLabel) -> Expr) -> Expr {
        let ternary = col(labels::TERNARY);
        when(ternary.clone().is_null())
            .then(value(TernaryLabel::Unknown))
            .when(ternary.clone().eq(lit(labels::BAJA_1)))
            .then(value(TernaryLabel::Baja1))
            .when(ternary.eq(lit(labels::BAJA_2)))
            .then(value(TernaryLabel::Baja2))
            .otherwise(value(TernaryLabel::Continua))
    }

    fn binary_expr(&self) -> Expr {
        self.by_label(|label| match self.config.binary(label) {
            Some(v) => lit(v),
            None => lit(NULL).cast(DataType::Int32),
        })
    }

    fn weight_expr(&self) -> Expr {
        self.by_label(|label| lit(self.config.weight(label)))
    }

    /// Per-period class distribution for logging.
    pub fn counts_plan(&self, source: LazyFrame, catalog: &Catalog) -> Result<LazyFrame> {
        if !catalog.contains(labels::TERNARY) {
            return Err(ChurnError::ColumnNotFound(labels::TERNARY.to_string()));
        }
        let count_eq = |value: &str, alias: &str| {
            col(labels::TERNARY)
                .eq(lit(value))
                .cast(DataType::Int64)
                .sum()
                .alias(alias)
        };
        let mut aggs = vec![
            count_eq(labels::BAJA_1, "baja1"),
            count_eq(labels::BAJA_2, "baja2"),
            count_eq(labels::CONTINUA, "continua"),
            col(labels::TERNARY)
                .is_null()
                .cast(DataType::Int64)
                .sum()
                .alias("unknown"),
        ];
        if catalog.contains(labels::BINARY) {
            aggs.push(
                col(labels::BINARY)
                    .eq(lit(1i32))
                    .cast(DataType::Int64)
                    .sum()
                    .alias("binary_positive"),
            );
        }

        Ok(source
            .group_by([col(self.period.as_str())])
            .agg(aggs)
            .sort([self.period.as_str()], SortMultipleOptions::default()))
    }
}
