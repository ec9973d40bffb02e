use chrono::NaiveDate;
use polars::prelude::*;

use crate::error::{ChurnError, Result};

/// A calendar month encoded as `YYYYMM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(i64);

impl Period {
    pub fn new(encoded: i64) -> Result<Self> {
        let year = encoded / 100;
        let month = encoded % 100;
        let valid = i32::try_from(year)
            .ok()
            .zip(u32::try_from(month).ok())
            .and_then(|(y, m)| NaiveDate::from_ymd_opt(y, m, 1))
            .is_some();
        if !valid {
            return Err(ChurnError::InvalidPeriod(encoded));
        }
        Ok(Self(encoded))
    }

    pub fn encoded(self) -> i64 {
        self.0
    }

    pub fn month(self) -> i64 {
        self.0 % 100
    }

    /// Strictly increasing month counter, continuous across year boundaries.
    pub fn index(self) -> i64 {
        (self.0 / 100) * 12 + self.0 % 100
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `period_index` as an expression over a `YYYYMM` column.
pub fn index_expr(period: &str) -> Expr {
    let p = col(period).cast(DataType::Int64);
    p.clone().floor_div(lit(100i64)) * lit(12i64) + p % lit(100i64)
}

/// Month-within-year of a `YYYYMM` column.
pub fn month_expr(period: &str) -> Expr {
    col(period).cast(DataType::Int64) % lit(100i64)
}

/// Checks every distinct period in `df` decodes to a real calendar month.
pub fn validate_column(df: &DataFrame, period: &str) -> Result<Vec<Period>> {
    let values = df
        .column(period)
        .map_err(|_| ChurnError::ColumnNotFound(period.to_string()))?
        .cast(&DataType::Int64)?;
    let mut periods = Vec::new();
    for v in values.i64()?.into_iter() {
        let Some(v) = v else {
            return Err(ChurnError::General(format!("Null value in period column '{period}'")));
        };
        let p = Period::new(v)?;
        if !periods.contains(&p) {
            periods.push(p);
        }
    }
    periods.sort();
    Ok(periods)
}
