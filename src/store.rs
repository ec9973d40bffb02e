//! Embedded analytical store.
//!
//! Tables are polars frames. The only mutating statement is
//! `CREATE OR REPLACE TABLE <table> AS <plan>`, expressed as a [`Statement`]
//! carrying a lazy plan. Each `execute` materializes the plan and swaps the
//! table in one step, so readers only ever see complete tables.
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{ChurnError, Result};

/// `CREATE OR REPLACE TABLE table AS plan`.
pub struct Statement {
    pub table: String,
    pub plan: LazyFrame,
}

impl Statement {
    pub fn create_or_replace(table: impl Into<String>, plan: LazyFrame) -> Self {
        Self {
            table: table.into(),
            plan,
        }
    }
}

pub trait TableStore {
    /// Schema introspection (`DESCRIBE table`).
    fn describe(&self, table: &str) -> Result<Catalog>;

    /// Lazy scan over the current version of `table`.
    fn scan(&self, table: &str) -> Result<LazyFrame>;

    /// Run the statement and return the catalog of the new table.
    fn execute(&mut self, statement: Statement) -> Result<Catalog>;

    fn exists(&self, table: &str) -> bool;

    fn drop_table(&mut self, table: &str) -> Result<()>;

    /// Materialize the current table.
    fn read(&self, table: &str) -> Result<DataFrame> {
        Ok(self.scan(table)?.collect()?)
    }
}

// ── In-memory store ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: HashMap<String, DataFrame>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, df: DataFrame) -> Self {
        self.tables.insert(table.to_string(), df);
        self
    }
}

impl TableStore for MemoryStore {
    fn describe(&self, table: &str) -> Result<Catalog> {
        let df = self
            .tables
            .get(table)
            .ok_or_else(|| ChurnError::TableNotFound(table.to_string()))?;
        Ok(Catalog::from_schema(df.schema()))
    }

    fn scan(&self, table: &str) -> Result<LazyFrame> {
        self.tables
            .get(table)
            .map(|df| df.clone().lazy())
            .ok_or_else(|| ChurnError::TableNotFound(table.to_string()))
    }

    fn execute(&mut self, statement: Statement) -> Result<Catalog> {
        let df = statement.plan.collect()?;
        let catalog = Catalog::from_schema(df.schema());
        debug!(table = %statement.table, rows = df.height(), cols = df.width(), "table replaced");
        self.tables.insert(statement.table, df);
        Ok(catalog)
    }

    fn exists(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn drop_table(&mut self, table: &str) -> Result<()> {
        self.tables.remove(table);
        Ok(())
    }
}

// ── Parquet-backed store ────────────────────────────────────────────────────

/// One parquet file per table under a root directory.
///
/// Every call opens and closes its own file handles; nothing is held between
/// stages.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.parquet"))
    }

    fn load(&self, table: &str) -> Result<DataFrame> {
        let path = self.table_path(table);
        if !path.exists() {
            return Err(ChurnError::TableNotFound(table.to_string()));
        }
        let file = File::open(&path)?;
        Ok(ParquetReader::new(file).finish()?)
    }
}

impl TableStore for ParquetStore {
    fn describe(&self, table: &str) -> Result<Catalog> {
        let df = self.load(table)?;
        Ok(Catalog::from_schema(df.schema()))
    }

    fn scan(&self, table: &str) -> Result<LazyFrame> {
        Ok(self.load(table)?.lazy())
    }

    fn execute(&mut self, statement: Statement) -> Result<Catalog> {
        let mut df = statement.plan.collect()?;
        let target = self.table_path(&statement.table);
        let staging = target.with_extension("parquet.tmp");

        {
            let mut file = File::create(&staging)?;
            ParquetWriter::new(&mut file).finish(&mut df)?;
        }
        fs::rename(&staging, &target)?;

        debug!(
            table = %statement.table,
            path = %target.display(),
            rows = df.height(),
            cols = df.width(),
            "table replaced"
        );
        Ok(Catalog::from_schema(df.schema()))
    }

    fn exists(&self, table: &str) -> bool {
        self.table_path(table).exists()
    }

    fn drop_table(&mut self, table: &str) -> Result<()> {
        let path = self.table_path(table);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        df!(
            "numero_de_cliente" => [1i64, 1, 2],
            "foto_mes" => [202101i64, 202102, 202101],
            "mcuentas_saldo" => [1.0f64, 2.0, 3.0],
        )
        .unwrap()
    }

    #[test]
    fn memory_store_replaces_tables() {
        let mut store = MemoryStore::new().with_table("df_init", sample());
        let plan = store
            .scan("df_init")
            .unwrap()
            .with_columns([(col("mcuentas_saldo") * lit(2.0)).alias("doble")]);
        let catalog = store
            .execute(Statement::create_or_replace("df_init", plan))
            .unwrap();
        assert!(catalog.contains("doble"));
        assert_eq!(store.describe("df_init").unwrap(), catalog);
    }

    #[test]
    fn missing_table_is_an_error() {
        let store = MemoryStore::new();
        assert!(matches!(store.describe("nope"), Err(ChurnError::TableNotFound(_))));
    }

    #[test]
    fn parquet_store_round_trips_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::open(dir.path()).unwrap();
        assert!(!store.exists("df_init"));

        store
            .execute(Statement::create_or_replace("df_init", sample().lazy()))
            .unwrap();
        assert!(store.exists("df_init"));
        assert!(!dir.path().join("df_init.parquet.tmp").exists());

        let df = store.read("df_init").unwrap();
        assert!(df.equals_missing(&sample()));

        store.drop_table("df_init").unwrap();
        assert!(!store.exists("df_init"));
    }
}
