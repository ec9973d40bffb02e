//! Window expressions over the entity partition.
//!
//! Every expression here assumes the frame is sorted by (entity, period).

use polars::prelude::*;

use super::{derived_name, Derivation};
use crate::period;
use crate::schema::marker;

fn float(name: &str) -> Expr {
    col(name).cast(DataType::Float64)
}

/// `W` preceding rows plus the current one.
fn trailing(window: u32, min_periods: usize) -> RollingOptionsFixedWindow {
    RollingOptionsFixedWindow {
        window_size: window as usize + 1,
        min_periods,
        ..Default::default()
    }
}

pub fn lag(target: &str, k: u32, entity: &str) -> Derivation {
    let expr = col(target).shift(lit(k as i64)).over([col(entity)]);
    Derivation::new(derived_name(target, marker::LAG, Some(k)), expr, &[target]).with_order(k)
}

/// `float(t) - float(t_lag_k)`, reading the existing lag column.
pub fn delta(target: &str, k: u32) -> Derivation {
    let lag_name = derived_name(target, marker::LAG, Some(k));
    let expr = float(target) - float(&lag_name);
    Derivation::new(
        derived_name(target, marker::DELTA, Some(k)),
        expr,
        &[target, lag_name.as_str()],
    )
    .with_order(k)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rolling {
    Min,
    Max,
    Mean,
}

impl Rolling {
    pub fn marker(self) -> &'static str {
        match self {
            Rolling::Min => marker::MIN,
            Rolling::Max => marker::MAX,
            Rolling::Mean => marker::MEAN,
        }
    }
}

/// Trailing rolling min, max or mean.
pub fn rolling(target: &str, kind: Rolling, window: u32, entity: &str) -> Derivation {
    let options = trailing(window, 1);
    let value = float(target);
    let expr = match kind {
        Rolling::Min => value.rolling_min(options),
        Rolling::Max => value.rolling_max(options),
        Rolling::Mean => value.rolling_mean(options),
    }
    .over([col(entity)]);
    Derivation::new(derived_name(target, kind.marker(), Some(window)), expr, &[target])
}

/// Scratch column holding the period index relative to the entity's first
/// period. Read by [`slope`].
pub const SLOPE_X: &str = "__slope_x";

pub fn slope_covariate(entity: &str, period_col: &str) -> Derivation {
    let idx = period::index_expr(period_col);
    let expr = (idx.clone() - idx.min().over([col(entity)])).cast(DataType::Float64);
    Derivation::new(SLOPE_X, expr, &[period_col])
}

/// OLS slope of the value against the period index over the window.
///
/// Reads [`SLOPE_X`], which must be computed in an earlier `with_columns`.
/// The covariate is masked wherever the value is null, so every mean runs
/// over the same non-null points. Fewer than two points or a flat covariate
/// give null.
pub fn slope(target: &str, window: u32, entity: &str, period_col: &str) -> Derivation {
    let y = float(target);
    let x = when(y.clone().is_null())
        .then(lit(NULL).cast(DataType::Float64))
        .otherwise(col(SLOPE_X));

    let mean = |e: Expr| e.rolling_mean(trailing(window, 2)).over([col(entity)]);
    let mean_x = mean(x.clone());
    let mean_y = mean(y.clone());
    let mean_xy = mean(x.clone() * y);
    let mean_xx = mean(x.clone() * x);

    let covariance = mean_xy - mean_x.clone() * mean_y;
    let variance = mean_xx - mean_x.clone() * mean_x;
    let expr = when(variance.clone().gt(lit(1e-12)))
        .then(covariance / variance)
        .otherwise(lit(NULL).cast(DataType::Float64));

    Derivation::new(
        derived_name(target, marker::SLOPE, Some(window)),
        expr,
        &[target, period_col],
    )
}

/// `a / b`, with 0 when `b` is 0 and null when `b` is null.
pub fn ratio(monetary: &str, count: &str) -> Derivation {
    let expr = when(float(count).eq(lit(0.0)))
        .then(lit(0.0))
        .otherwise(float(monetary) / float(count));
    Derivation::new(
        format!("{monetary}_{count}{}", marker::RATIO),
        expr,
        &[monetary, count],
    )
}

/// Per-period `NTILE(buckets)` over the non-null values, ascending.
///
/// The first `total % buckets` groups take one extra row. Ties keep row order.
pub fn percentile(target: &str, buckets: u32, period_col: &str) -> Derivation {
    let value = float(target);
    let by_period = [col(period_col)];
    let n = lit(buckets as i64);

    let rank = value
        .clone()
        .rank(
            RankOptions {
                method: RankMethod::Ordinal,
                descending: false,
            },
            None,
        )
        .over(by_period.clone())
        .cast(DataType::Int64);
    let total = value.clone().count().over(by_period).cast(DataType::Int64);

    let size = total.clone().floor_div(n.clone());
    let extra = total % n;
    let large = extra.clone() * (size.clone() + lit(1i64));
    let divisor = when(size.clone().eq(lit(0i64)))
        .then(lit(1i64))
        .otherwise(size.clone());

    let in_large = (rank.clone() - lit(1i64)).floor_div(size + lit(1i64)) + lit(1i64);
    let in_small = extra + (rank.clone() - lit(1i64) - large.clone()).floor_div(divisor) + lit(1i64);

    let expr = when(value.is_null())
        .then(lit(NULL).cast(DataType::Int64))
        .when(rank.lt_eq(large))
        .then(in_large)
        .otherwise(in_small);

    Derivation::new(
        derived_name(target, marker::PERCENTILE, Some(buckets)),
        expr,
        &[target],
    )
}
