use std::fs;
use std::path::Path;

use churn_features::classifier::is_derived;
use churn_features::schema::labels;
use churn_features::training;
use churn_features::{
    ExperimentConfig, FeatureCompiler, ParquetStore, Pipeline, StageOutcome, Step, TableStore,
};

fn write_raws(dir: &Path) {
    // Entity 1 leaves after 202103; entity 2 skips 202102; entity 3 stays.
    let first = "numero_de_cliente,foto_mes,mcuentas_saldo,ccuentas_saldo,mprestamos_personales,tcallcenter\n\
        1,202101,100,2,0,1\n1,202102,120,0,50,0\n\
        2,202101,10,1,0,0\n\
        3,202101,5,1,0,0\n3,202102,6,1,0,1\n";
    let second = "numero_de_cliente,foto_mes,mcuentas_saldo,ccuentas_saldo,mprestamos_personales,tcallcenter\n\
        1,202102,999,9,9,9\n1,202103,90,3,10,0\n\
        2,202103,12,2,0,0\n2,202104,14,2,0,1\n\
        3,202103,7,1,0,0\n3,202104,8,2,0,0\n3,202105,9,1,0,0\n";
    fs::write(dir.join("competencia_01_crudo.csv"), first).unwrap();
    fs::write(dir.join("competencia_02_crudo.csv"), second).unwrap();
}

fn config(root: &Path) -> ExperimentConfig {
    let yaml = format!(
        r#"
CHALLENGE:
  study_name: "_test"
  paths: {{ logs: {root}/logs, datasets: {root}/datasets, store: {root}/store }}
  files: {{ raw: [competencia_01_crudo.csv, competencia_02_crudo.csv] }}
  steps: [load_raws, labels, features, delete_raws]
  labels: {{ positives: [BAJA+1, BAJA+2], unknown: positive }}
  features:
    stages:
      - {{ kind: mean, window: 2 }}
      - {{ kind: lag, order: 2 }}
      - {{ kind: delta, order: 2 }}
      - {{ kind: derived_scalars }}
      - {{ kind: ratio }}
      - {{ kind: percentile, buckets: 4 }}
      - {{ kind: slope, window: 2 }}
      - {{ kind: min_max, window: 2 }}
      - {{ kind: horizon, horizons: [3] }}
  split: {{ train: [202101, 202102], validation: 202103, test: 202105 }}
"#,
        root = root.display()
    );
    let path = root.join("config.yaml");
    fs::write(&path, yaml).unwrap();
    ExperimentConfig::load(&path, "CHALLENGE").unwrap()
}

fn labels_of(store: &ParquetStore) -> Vec<(i64, i64, Option<String>)> {
    let df = store.read("df_init").unwrap();
    let entities = df.column("numero_de_cliente").unwrap().i64().unwrap();
    let periods = df.column("foto_mes").unwrap().i64().unwrap();
    let ternary = df.column(labels::TERNARY).unwrap().str().unwrap();
    entities
        .into_iter()
        .zip(periods.into_iter())
        .zip(ternary.into_iter())
        .map(|((e, p), l)| (e.unwrap(), p.unwrap(), l.map(str::to_string)))
        .collect()
}

#[test]
fn end_to_end_on_parquet_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    config.ensure_dirs().unwrap();
    write_raws(&config.datasets_dir().unwrap());

    let mut pipeline = Pipeline::from_config(config.clone()).unwrap();
    let report = pipeline.run(None).unwrap();
    assert_eq!(
        report.completed,
        vec![Step::LoadRaws, Step::Labels, Step::Features, Step::DeleteRaws]
    );
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o, StageOutcome::Applied { .. })));

    // Raw files are gone, the table survives in the store.
    assert!(config.raw_paths().unwrap().iter().all(|p| !p.exists()));
    assert!(dir.path().join("store").join("df_init.parquet").exists());

    let store = ParquetStore::open(config.store_dir().unwrap()).unwrap();
    let rows = labels_of(&store);
    // Duplicate (1, 202102) from the second file is dropped.
    assert_eq!(rows.len(), 11);

    let label = |e: i64, p: i64| {
        rows.iter()
            .find(|(re, rp, _)| *re == e && *rp == p)
            .and_then(|(_, _, l)| l.clone())
    };
    assert_eq!(label(1, 202101).as_deref(), Some("CONTINUA"));
    assert_eq!(label(1, 202102).as_deref(), Some("BAJA+2"));
    assert_eq!(label(1, 202103).as_deref(), Some("BAJA+1"));
    assert_eq!(label(2, 202101).as_deref(), Some("BAJA+1"));
    assert_eq!(label(3, 202103).as_deref(), Some("CONTINUA"));
    assert_eq!(label(3, 202104), None);
    assert_eq!(label(3, 202105), None);

    let df = store.read("df_init").unwrap();
    let saldo: Vec<Option<f64>> = df
        .column("mcuentas_saldo")
        .unwrap()
        .cast(&polars::prelude::DataType::Float64)
        .unwrap()
        .f64()
        .unwrap()
        .into_iter()
        .take(3)
        .collect();
    assert_eq!(saldo, vec![Some(100.0), Some(120.0), Some(90.0)]);

    let catalog = store.describe("df_init").unwrap();
    for name in [
        "mes",
        "suma_de_prestamos_productos",
        "suma_de_digitales_productos",
        "mcuentas_saldo_lag_2",
        "mcuentas_saldo_delta_2",
        "mcuentas_saldo_ccuentas_saldo_ratio",
        "mcuentas_saldo_percentil_4",
        "mcuentas_saldo_slope_2",
        "mcuentas_saldo_min_2",
        "mcuentas_saldo_max_2",
        "mcuentas_saldo_lag_3",
        "mcuentas_saldo_delta_3",
        "mcuentas_saldo_mean_2",
        labels::BINARY,
        labels::BINARY_BAJA2,
        labels::WEIGHT,
    ] {
        assert!(catalog.contains(name), "{name} missing");
    }

    let compiler = FeatureCompiler::new(config.layout.clone(), &config.classifier);
    let roles = compiler.roles(&catalog);
    for t in roles
        .lag_delta_targets
        .iter()
        .chain(roles.percentile_targets.iter())
    {
        assert!(!is_derived(t), "{t} selected as a source");
    }
}

#[test]
fn rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    config.ensure_dirs().unwrap();
    write_raws(&config.datasets_dir().unwrap());

    let mut first = Pipeline::from_config(config.clone()).unwrap();
    first.run(Some(Step::Features)).unwrap();
    let store = ParquetStore::open(config.store_dir().unwrap()).unwrap();
    let once = store.read("df_init").unwrap();

    let mut second = Pipeline::from_config(config.clone()).unwrap();
    assert_ne!(first.run_id(), second.run_id());
    second.labels().unwrap();
    let outcomes = second.features().unwrap();
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, StageOutcome::Skipped { .. })));
    assert!(store.read("df_init").unwrap().equals_missing(&once));
}

#[test]
fn split_hands_off_train_and_test_months() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    config.ensure_dirs().unwrap();
    write_raws(&config.datasets_dir().unwrap());

    let mut pipeline = Pipeline::from_config(config.clone()).unwrap();
    pipeline.run(Some(Step::Features)).unwrap();

    let handoff = training::split(
        pipeline.store().scan("df_init").unwrap(),
        "foto_mes",
        config.split.as_ref().unwrap(),
    )
    .unwrap();
    assert_eq!(handoff.train.len(), 5);
    assert_eq!(handoff.train.positives(), 2);
    assert_eq!(handoff.validation.as_ref().unwrap().len(), 3);
    assert_eq!(handoff.test.as_ref().unwrap().len(), 1);
    assert!(handoff
        .train
        .features
        .get_column_names_str()
        .iter()
        .all(|n| !labels::ALL.contains(n)));
}
