use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{info, instrument, warn};

use crate::catalog::{Catalog, TableLayout};
use crate::error::{ChurnError, Result};
use crate::period;
use crate::store::{Statement, TableStore};

/// Rows inspected for CSV schema inference.
const INFER_SCHEMA_ROWS: usize = 10_000;

/// Read one raw CSV file. Trims whitespace from column names.
pub fn read_raw(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(ChurnError::General(format!(
            "Raw file not found: {}",
            path.display()
        )));
    }
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed.as_slice())?;
    Ok(df)
}

/// Union of the raw files, one row per (entity, period), first file wins.
pub fn union_raws(frames: Vec<DataFrame>, layout: &TableLayout) -> Result<LazyFrame> {
    if frames.is_empty() {
        return Err(ChurnError::General("No raw files to load".into()));
    }
    let lazy: Vec<LazyFrame> = frames.into_iter().map(IntoLazy::lazy).collect();
    let union = concat(
        lazy,
        UnionArgs {
            to_supertypes: true,
            ..Default::default()
        },
    )?;

    let key = [col(layout.entity.as_str()), col(layout.period.as_str())];
    Ok(union.filter(
        col(layout.period.as_str())
            .cum_count(false)
            .over(key)
            .eq(lit(1u32)),
    ))
}

/// Load the raw files into the working table, replacing it.
#[instrument(skip_all, fields(table = %layout.table, files = paths.len()))]
pub fn load_raws<S: TableStore>(
    store: &mut S,
    layout: &TableLayout,
    paths: &[PathBuf],
) -> Result<Catalog> {
    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        let df = read_raw(path)?;
        info!(path = %path.display(), rows = df.height(), cols = df.width(), "raw file read");
        frames.push(df);
    }

    let df = union_raws(frames, layout)?.collect()?;
    let periods = period::validate_column(&df, &layout.period)?;
    if periods.is_empty() {
        warn!("raw files contain no rows");
    }
    info!(
        rows = df.height(),
        periods = periods.len(),
        first = periods.first().map(ToString::to_string).unwrap_or_default(),
        last = periods.last().map(ToString::to_string).unwrap_or_default(),
        "raw files unioned"
    );

    store.execute(Statement::create_or_replace(layout.table.clone(), df.lazy()))
}
