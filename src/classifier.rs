use std::collections::HashSet;

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ColumnInfo};
use crate::schema::{business, keys, labels, marker, prefix, scalars};

/// Semantic role of a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Excluded,
    Derived,
    Monetary,
    Count,
    Flag,
    Categorical,
    Residual,
}

/// Options for the column classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Extra names removed before bucketing.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Also derive temporal features from the transactional-flag bucket.
    #[serde(default)]
    pub include_flags: bool,
}

/// Role buckets consumed by the feature compiler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnRoles {
    pub lag_delta_targets: Vec<String>,
    /// Ordered `(monetary, count)` pairs sharing a suffix.
    pub ratio_pairs: Vec<(String, String)>,
    pub percentile_targets: Vec<String>,
    pub categorical: Vec<String>,
}

/// Returns the marker when `name` is a derived feature column.
///
/// A derived name ends with one of the suffix markers, optionally followed by
/// `_<digits>` (`mcuentas_saldo_lag_2`, `msaldo_csaldo_ratio`).
pub fn derived_marker(name: &str) -> Option<&'static str> {
    let stem = match name.rsplit_once('_') {
        Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => name,
    };
    marker::ALL.iter().copied().find(|m| stem.ends_with(m))
}

pub fn is_derived(name: &str) -> bool {
    derived_marker(name).is_some()
}

/// Buckets catalog columns by naming convention.
#[derive(Debug, Clone)]
pub struct ColumnClassifier {
    excluded: HashSet<String>,
    include_flags: bool,
}

impl ColumnClassifier {
    pub fn new(entity: &str, period: &str, config: &ClassifierConfig) -> Self {
        let mut excluded: HashSet<String> = [keys::ENTITY, keys::PERIOD, scalars::MONTH]
            .iter()
            .chain(labels::ALL.iter())
            .chain(business::EXCLUDED.iter())
            .map(|s| s.to_string())
            .collect();
        excluded.insert(entity.to_string());
        excluded.insert(period.to_string());
        excluded.extend(config.exclude.iter().cloned());

        Self {
            excluded,
            include_flags: config.include_flags,
        }
    }

    pub fn role(&self, column: &ColumnInfo) -> ColumnRole {
        let name = column.name.as_str();
        if self.excluded.contains(name) {
            return ColumnRole::Excluded;
        }
        if is_derived(name) {
            return ColumnRole::Derived;
        }
        match name.chars().next() {
            Some(prefix::MONETARY) => ColumnRole::Monetary,
            Some(prefix::COUNT) => ColumnRole::Count,
            Some(prefix::FLAG) => ColumnRole::Flag,
            _ if column.dtype == DataType::String => ColumnRole::Categorical,
            _ => ColumnRole::Residual,
        }
    }

    pub fn classify(&self, catalog: &Catalog) -> ColumnRoles {
        let mut monetary = Vec::new();
        let mut count = Vec::new();
        let mut flags = Vec::new();
        let mut residual = Vec::new();
        let mut categorical = Vec::new();

        for column in catalog.columns() {
            match self.role(column) {
                ColumnRole::Excluded | ColumnRole::Derived => {}
                ColumnRole::Monetary => monetary.push(column.name.clone()),
                ColumnRole::Count => count.push(column.name.clone()),
                ColumnRole::Flag => flags.push(column.name.clone()),
                ColumnRole::Categorical => {
                    categorical.push(column.name.clone());
                    residual.push(column.name.clone());
                }
                ColumnRole::Residual => residual.push(column.name.clone()),
            }
        }

        // Catalog order across buckets.
        let lag_delta_targets = catalog
            .names()
            .filter(|n| {
                let n = n.to_string();
                monetary.contains(&n)
                    || count.contains(&n)
                    || residual.contains(&n)
                    || (self.include_flags && flags.contains(&n))
            })
            .map(str::to_string)
            .collect();

        let ratio_pairs = count
            .iter()
            .filter_map(|c| {
                let suffix = strip_first(c);
                monetary
                    .iter()
                    .find(|m| strip_first(m) == suffix)
                    .map(|m| (m.clone(), c.clone()))
            })
            .collect();

        let percentile_targets = catalog
            .names()
            .filter(|n| {
                let n = n.to_string();
                monetary.contains(&n) || (residual.contains(&n) && n.contains(prefix::MONETARY))
            })
            .map(str::to_string)
            .collect();

        ColumnRoles {
            lag_delta_targets,
            ratio_pairs,
            percentile_targets,
            categorical,
        }
    }
}

fn strip_first(name: &str) -> &str {
    let mut chars = name.chars();
    chars.next();
    chars.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ColumnClassifier {
        ColumnClassifier::new(keys::ENTITY, keys::PERIOD, &ClassifierConfig::default())
    }

    #[test]
    fn recognizes_derived_names() {
        assert_eq!(derived_marker("mcuentas_saldo_lag_2"), Some("_lag"));
        assert_eq!(derived_marker("mcuentas_saldo_delta_12"), Some("_delta"));
        assert_eq!(derived_marker("msaldo_csaldo_ratio"), Some("_ratio"));
        assert_eq!(derived_marker("mpayroll_percentil_20"), Some("_percentil"));
        assert_eq!(derived_marker("mpayroll_max_3"), Some("_max"));
        assert_eq!(derived_marker("mcuentas_saldo"), None);
        assert_eq!(derived_marker("cproductos"), None);
        assert_eq!(derived_marker("Master_Finiciomora"), None);
    }

    #[test]
    fn saldo_pair_scenario() {
        let catalog = Catalog::from_names(&[
            "numero_de_cliente",
            "foto_mes",
            "clase_ternaria",
            "msaldo",
            "csaldo",
        ]);
        let roles = classifier().classify(&catalog);

        assert_eq!(
            roles.ratio_pairs,
            vec![("msaldo".to_string(), "csaldo".to_string())]
        );
        assert_eq!(roles.lag_delta_targets, vec!["msaldo", "csaldo"]);
        assert_eq!(roles.percentile_targets, vec!["msaldo"]);
    }

    #[test]
    fn flags_are_not_temporal_targets_by_default() {
        let catalog = Catalog::from_names(&["tcallcenter", "mcaja_ahorro", "Visa_status"]);
        let roles = classifier().classify(&catalog);
        assert_eq!(roles.lag_delta_targets, vec!["mcaja_ahorro", "Visa_status"]);

        let with_flags = ColumnClassifier::new(
            keys::ENTITY,
            keys::PERIOD,
            &ClassifierConfig {
                include_flags: true,
                ..Default::default()
            },
        );
        let roles = with_flags.classify(&catalog);
        assert_eq!(
            roles.lag_delta_targets,
            vec!["tcallcenter", "mcaja_ahorro", "Visa_status"]
        );
    }

    #[test]
    fn first_monetary_match_wins_and_unmatched_counts_are_dropped() {
        let catalog = Catalog::from_names(&["mprestamos", "nprestamos", "cprestamos", "cseguros"]);
        let roles = classifier().classify(&catalog);
        assert_eq!(
            roles.ratio_pairs,
            vec![("mprestamos".to_string(), "cprestamos".to_string())]
        );
    }

    #[test]
    fn percentile_targets_include_residuals_containing_m() {
        let catalog = Catalog::from_names(&["Master_mconsumototal", "Visa_status", "mrentabilidad"]);
        let roles = classifier().classify(&catalog);
        assert_eq!(
            roles.percentile_targets,
            vec!["Master_mconsumototal", "mrentabilidad"]
        );
    }

    #[test]
    fn string_residuals_are_reported_as_categorical() {
        let catalog = Catalog::new(vec![
            ColumnInfo {
                name: "Visa_status".into(),
                dtype: DataType::String,
            },
            ColumnInfo {
                name: "Visa_delinquency".into(),
                dtype: DataType::Int64,
            },
        ]);
        let roles = classifier().classify(&catalog);
        assert_eq!(roles.categorical, vec!["Visa_status"]);
        assert_eq!(roles.lag_delta_targets, vec!["Visa_status", "Visa_delinquency"]);
    }

    #[test]
    fn reclassification_never_selects_derived_columns() {
        let mut names = vec![
            "numero_de_cliente".to_string(),
            "foto_mes".to_string(),
            "msaldo".to_string(),
            "csaldo".to_string(),
            "Visa_mpagado".to_string(),
        ];
        let first = classifier().classify(&Catalog::from_names(&names));

        for t in &first.lag_delta_targets {
            for k in 1..=2 {
                names.push(format!("{t}_lag_{k}"));
                names.push(format!("{t}_delta_{k}"));
            }
            names.push(format!("{t}_slope_3"));
            names.push(format!("{t}_max_3"));
            names.push(format!("{t}_min_3"));
            names.push(format!("{t}_mean_6"));
        }
        for (m, c) in &first.ratio_pairs {
            names.push(format!("{m}_{c}_ratio"));
        }
        for t in &first.percentile_targets {
            names.push(format!("{t}_percentil_20"));
        }

        let second = classifier().classify(&Catalog::from_names(&names));
        assert_eq!(first, second);
        for t in second
            .lag_delta_targets
            .iter()
            .chain(second.percentile_targets.iter())
        {
            assert!(!is_derived(t), "{t} re-selected as a source");
        }
    }

    #[test]
    fn empty_catalog_yields_empty_roles() {
        let roles = classifier().classify(&Catalog::default());
        assert_eq!(roles, ColumnRoles::default());
    }
}
