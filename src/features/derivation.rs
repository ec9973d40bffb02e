use std::collections::HashSet;

use polars::prelude::Expr;
use tracing::warn;

use super::Stage;
use crate::catalog::Catalog;

/// One named derived column and the columns it reads.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub name: String,
    pub expr: Expr,
    pub sources: Vec<String>,
    /// Lag/delta order, for resume reporting.
    pub order: Option<u32>,
}

impl Derivation {
    pub fn new(name: impl Into<String>, expr: Expr, sources: &[&str]) -> Self {
        Self {
            name: name.into(),
            expr,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            order: None,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }
}

/// Candidate derivations of one stage.
///
/// Layers are applied in sequence within the same statement, so a later
/// layer may read columns produced by an earlier one. `scratch` columns are
/// computed ahead of the first layer and projected away after the last.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub stage: Stage,
    pub scratch: Vec<Derivation>,
    pub layers: Vec<Vec<Derivation>>,
}

impl CompiledStage {
    /// Idempotency guard: keeps the derivations whose column does not exist
    /// yet and whose sources are available.
    pub fn pending(&mut self, catalog: &Catalog) -> Vec<Vec<Derivation>> {
        let mut available: HashSet<String> = catalog.names().map(str::to_string).collect();
        let stage = &self.stage;

        std::mem::take(&mut self.layers)
            .into_iter()
            .map(|mut layer| {
                dedup_names(&mut layer);
                let kept: Vec<Derivation> = layer
                    .into_iter()
                    .filter(|d| !available.contains(&d.name))
                    .filter(|d| match d.sources.iter().find(|s| !available.contains(*s)) {
                        Some(missing) => {
                            warn!(%stage, column = %d.name, %missing, "source column missing; skipping");
                            false
                        }
                        None => true,
                    })
                    .collect();
                available.extend(kept.iter().map(|d| d.name.clone()));
                kept
            })
            .collect()
    }
}

/// Distinct names, first occurrence wins.
fn dedup_names(layer: &mut Vec<Derivation>) {
    let mut seen = HashSet::new();
    layer.retain(|d| seen.insert(d.name.clone()));
}
