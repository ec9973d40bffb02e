use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::keys;

/// Which table the pipeline works on and how its rows are keyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_entity")]
    pub entity: String,
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_table() -> String {
    keys::TABLE.to_string()
}

fn default_entity() -> String {
    keys::ENTITY.to_string()
}

fn default_period() -> String {
    keys::PERIOD.to_string()
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            table: default_table(),
            entity: default_entity(),
            period: default_period(),
        }
    }
}

/// One entry of a table's column catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: DataType,
}

/// Snapshot of a table's schema (`DESCRIBE`), in column order.
///
/// Introspected once per run and then kept current from the schema of each
/// statement the pipeline executes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    columns: Vec<ColumnInfo>,
}

impl Catalog {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    pub fn from_schema(schema: &Schema) -> Self {
        let columns = schema
            .iter()
            .map(|(name, dtype)| ColumnInfo {
                name: name.to_string(),
                dtype: dtype.clone(),
            })
            .collect();
        Self { columns }
    }

    /// Build a catalog from plain names, every column typed Float64.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let columns = names
            .iter()
            .map(|n| ColumnInfo {
                name: n.as_ref().to_string(),
                dtype: DataType::Float64,
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Projection of every catalog column, in order.
    pub fn projection(&self) -> Vec<Expr> {
        self.names().map(col).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_schema_keeps_order_and_types() {
        let df = df!(
            "numero_de_cliente" => [1i64, 2],
            "foto_mes" => [202101i64, 202101],
            "mcuentas_saldo" => [10.5f64, 3.0],
            "Visa_status" => ["a", "b"],
        )
        .unwrap();

        let catalog = Catalog::from_schema(df.schema());
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(
            names,
            ["numero_de_cliente", "foto_mes", "mcuentas_saldo", "Visa_status"]
        );
        assert_eq!(catalog.columns()[2].dtype, DataType::Float64);
        assert_eq!(catalog.columns()[3].dtype, DataType::String);
        assert!(catalog.contains("foto_mes"));
        assert!(!catalog.contains("mes"));
    }
}
