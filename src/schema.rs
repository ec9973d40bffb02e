//! Column-name constants for the churn dataset.
//! Single source of truth for the classifier, the compiler and the label step.

// ── Key columns ─────────────────────────────────────────────────────────────
pub mod keys {
    pub const ENTITY: &str = "numero_de_cliente";
    pub const PERIOD: &str = "foto_mes";
    pub const TABLE: &str = "df_init";
}

// ── Label columns ───────────────────────────────────────────────────────────
pub mod labels {
    pub const TERNARY: &str = "clase_ternaria";
    pub const BINARY: &str = "clase_binaria";
    pub const BINARY_BAJA2: &str = "clase_binaria2";
    pub const WEIGHT: &str = "clase_peso";

    pub const ALL: [&str; 4] = [TERNARY, BINARY, BINARY_BAJA2, WEIGHT];

    pub const CONTINUA: &str = "CONTINUA";
    pub const BAJA_1: &str = "BAJA+1";
    pub const BAJA_2: &str = "BAJA+2";

    pub const WEIGHT_BAJA_2: f64 = 1.00002;
    pub const WEIGHT_BAJA_1: f64 = 1.00001;
    pub const WEIGHT_DEFAULT: f64 = 1.0;
}

// ── Business fields ─────────────────────────────────────────────────────────
pub mod business {
    pub const ACTIVE_QUARTER: &str = "active_quarter";
    pub const AGE: &str = "cliente_edad";
    pub const TENURE: &str = "cliente_antiguedad";
    pub const TRX_QUARTER: &str = "ctrx_quarter";
    pub const PAYROLL: &str = "mpayroll";

    /// Never used as feature sources.
    pub const EXCLUDED: [&str; 7] = [
        ACTIVE_QUARTER,
        AGE,
        TENURE,
        "Visa_fultimo_cierre",
        "Master_fultimo_cierre",
        "Visa_Fvencimiento",
        "Master_Fvencimiento",
    ];
}

// ── Derived scalar features ─────────────────────────────────────────────────
pub mod scalars {
    pub const MONTH: &str = "mes";
    pub const TRX_NORMALIZED: &str = "ctrx_quarter_normalizado";
    pub const PAYROLL_OVER_AGE: &str = "mpayroll_sobre_edad";
    pub const GROUP_PREFIX: &str = "suma_de_";

    /// Tenure tier → multiplier for the transaction-count normalization.
    pub const TENURE_MULTIPLIERS: [(i64, f64); 3] = [(1, 5.0), (2, 2.0), (3, 1.2)];
}

// ── Naming prefixes ─────────────────────────────────────────────────────────
pub mod prefix {
    pub const MONETARY: char = 'm';
    pub const COUNT: char = 'c';
    pub const FLAG: char = 't';
}

// ── Derived-feature suffix markers ──────────────────────────────────────────
pub mod marker {
    pub const LAG: &str = "_lag";
    pub const DELTA: &str = "_delta";
    pub const SLOPE: &str = "_slope";
    pub const MAX: &str = "_max";
    pub const MIN: &str = "_min";
    pub const RATIO: &str = "_ratio";
    pub const MEAN: &str = "_mean";
    pub const PERCENTILE: &str = "_percentil";

    pub const ALL: [&str; 8] = [LAG, DELTA, SLOPE, MAX, MIN, RATIO, MEAN, PERCENTILE];
}
