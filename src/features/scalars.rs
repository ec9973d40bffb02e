use polars::prelude::*;

use super::Derivation;
use crate::catalog::Catalog;
use crate::classifier::is_derived;
use crate::period;
use crate::schema::{business, prefix, scalars};

// ── Product groups ──────────────────────────────────────────────────────────

/// How a product group picks its member columns.
#[derive(Debug, Clone, Copy)]
pub enum Members {
    Named(&'static [&'static str]),
    /// Monetary columns whose name contains the fragment.
    MonetaryContaining(&'static str),
    /// Every column carrying the prefix.
    Prefixed(char),
    Containing(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct ProductGroup {
    pub name: &'static str,
    pub members: Members,
}

impl ProductGroup {
    pub fn column(&self) -> String {
        format!("{}{}", scalars::GROUP_PREFIX, self.name)
    }

    /// Member columns present in `catalog`, in catalog order.
    pub fn resolve(&self, catalog: &Catalog) -> Vec<String> {
        catalog
            .names()
            .filter(|n| !is_derived(n) && !n.starts_with(scalars::GROUP_PREFIX))
            .filter(|n| match self.members {
                Members::Named(names) => names.contains(n),
                Members::MonetaryContaining(fragment) => {
                    n.starts_with(prefix::MONETARY) && n.contains(fragment)
                }
                Members::Prefixed(p) => n.starts_with(p),
                Members::Containing(fragment) => n.contains(fragment),
            })
            .map(str::to_string)
            .collect()
    }
}

const PRODUCT_GROUPS: [ProductGroup; 8] = [
    ProductGroup {
        name: "master_visa_productos",
        members: Members::Named(&[
            "Master_msaldototal",
            "Master_mconsumototal",
            "Master_mpagado",
            "Master_mlimitecompra",
            "Visa_msaldototal",
            "Visa_mconsumototal",
            "Visa_mpagado",
            "Visa_mlimitecompra",
        ]),
    },
    ProductGroup {
        name: "cuentas_productos",
        members: Members::Named(&[
            "mcuenta_corriente",
            "mcaja_ahorro",
            "mcaja_ahorro_dolares",
            "mcuentas_saldo",
            "mcuenta_corriente_adicional",
            "mcaja_ahorro_adicional",
        ]),
    },
    ProductGroup {
        name: "tarjetas_productos",
        members: Members::MonetaryContaining("tarjeta"),
    },
    ProductGroup {
        name: "prestamos_productos",
        members: Members::MonetaryContaining("prest"),
    },
    ProductGroup {
        name: "inversiones_productos",
        members: Members::Named(&[
            "mplazo_fijo_pesos",
            "mplazo_fijo_dolares",
            "minversion1_pesos",
            "minversion1_dolares",
            "minversion2",
        ]),
    },
    ProductGroup {
        name: "digitales_productos",
        members: Members::Prefixed(prefix::FLAG),
    },
    ProductGroup {
        name: "servicios_productos",
        members: Members::Named(&[
            "mpagodeservicios",
            "mpagomiscuentas",
            "mcuenta_debitos_automaticos",
            "mforex_buy",
            "mforex_sell",
            "mtransferencias_recibidas",
            "mtransferencias_emitidas",
            "mextraccion_autoservicio",
            "mcheques_depositados",
            "mcheques_emitidos",
            "mcajeros_propios_descuentos",
        ]),
    },
    ProductGroup {
        name: "seguros_productos",
        members: Members::Containing("segur"),
    },
];

pub fn product_groups() -> &'static [ProductGroup] {
    &PRODUCT_GROUPS
}

/// Number of members holding a positive balance.
fn holdings(members: &[String]) -> Option<Expr> {
    members
        .iter()
        .map(|m| {
            when(col(m.as_str()).cast(DataType::Float64).gt(lit(0.0)))
                .then(lit(1i32))
                .otherwise(lit(0i32))
        })
        .reduce(|a, b| a + b)
}

// ── Scalar derivations ──────────────────────────────────────────────────────

fn month(period_col: &str) -> Derivation {
    Derivation::new(scalars::MONTH, period::month_expr(period_col), &[period_col])
}

fn normalized_transactions() -> Derivation {
    let trx = col(business::TRX_QUARTER).cast(DataType::Float64);
    let tenure = col(business::TENURE).cast(DataType::Int64);

    let expr = scalars::TENURE_MULTIPLIERS
        .iter()
        .rev()
        .fold(trx.clone(), |rest, &(tier, factor)| {
            when(tenure.clone().eq(lit(tier)))
                .then(trx.clone() * lit(factor))
                .otherwise(rest)
        });

    Derivation::new(
        scalars::TRX_NORMALIZED,
        expr,
        &[business::TRX_QUARTER, business::TENURE],
    )
}

fn payroll_over_age() -> Derivation {
    let age = col(business::AGE).cast(DataType::Float64);
    let expr = when(age.clone().eq(lit(0.0)))
        .then(lit(NULL).cast(DataType::Float64))
        .otherwise(col(business::PAYROLL).cast(DataType::Float64) / age);
    Derivation::new(
        scalars::PAYROLL_OVER_AGE,
        expr,
        &[business::PAYROLL, business::AGE],
    )
}

/// Month number, normalized transactions, payroll per year of age and the
/// product-group holdings.
pub fn derivations(catalog: &Catalog, period_col: &str) -> Vec<Derivation> {
    let mut out = vec![month(period_col), normalized_transactions(), payroll_over_age()];

    for group in product_groups() {
        let members = group.resolve(catalog);
        if let Some(expr) = holdings(&members) {
            let sources: Vec<&str> = members.iter().map(String::as_str).collect();
            out.push(Derivation::new(group.column(), expr, &sources));
        }
    }
    out
}
