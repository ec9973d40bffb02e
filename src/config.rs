//! YAML experiment configuration.
//!
//! The file maps experiment names to sections; one run reads one section.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::TableLayout;
use crate::classifier::ClassifierConfig;
use crate::error::{ChurnError, Result};
use crate::features::FeaturePlan;
use crate::labels::LabelConfig;
use crate::training::SplitConfig;

/// One orchestrator step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    LoadRaws,
    Labels,
    Features,
    DeleteRaws,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::LoadRaws => "load_raws",
            Step::Labels => "labels",
            Step::Features => "features",
            Step::DeleteRaws => "delete_raws",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Step {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "load_raws" => Ok(Step::LoadRaws),
            "labels" => Ok(Step::Labels),
            "features" => Ok(Step::Features),
            "delete_raws" => Ok(Step::DeleteRaws),
            other => Err(ChurnError::General(format!("Unknown step: {other}"))),
        }
    }
}

fn default_steps() -> Vec<Step> {
    vec![Step::LoadRaws, Step::Labels, Step::Features]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Paths {
    #[serde(default)]
    pub logs: Option<PathBuf>,
    #[serde(default)]
    pub datasets: Option<PathBuf>,
    #[serde(default)]
    pub store: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Files {
    #[serde(default)]
    pub raw: Vec<String>,
}

/// One experiment section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub study_name: Option<String>,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub files: Files,
    #[serde(flatten)]
    pub layout: TableLayout,
    #[serde(default = "default_steps")]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub features: FeaturePlan,
    #[serde(default)]
    pub split: Option<SplitConfig>,
}

impl ExperimentConfig {
    /// Load the `experiment` section of the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>, experiment: &str) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_yaml(&text, experiment)?;
        debug!(path = %path.display(), experiment, "configuration loaded");
        Ok(config)
    }

    pub fn from_yaml(text: &str, experiment: &str) -> Result<Self> {
        let root: serde_yaml::Mapping = serde_yaml::from_str(text)?;
        let section = root
            .get(experiment)
            .cloned()
            .ok_or_else(|| ChurnError::MissingSection(experiment.to_string()))?;
        let config: Self = serde_yaml::from_value(section)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("logs", &self.paths.logs),
            ("datasets", &self.paths.datasets),
            ("store", &self.paths.store),
        ] {
            if value.is_none() {
                return Err(ChurnError::MissingPath(name.to_string()));
            }
        }
        Ok(())
    }

    fn required(&self, name: &str, value: &Option<PathBuf>) -> Result<PathBuf> {
        value
            .clone()
            .ok_or_else(|| ChurnError::MissingPath(name.to_string()))
    }

    pub fn logs_dir(&self) -> Result<PathBuf> {
        self.required("logs", &self.paths.logs)
    }

    pub fn datasets_dir(&self) -> Result<PathBuf> {
        self.required("datasets", &self.paths.datasets)
    }

    pub fn store_dir(&self) -> Result<PathBuf> {
        self.required("store", &self.paths.store)
    }

    /// Raw files resolved against the datasets directory.
    pub fn raw_paths(&self) -> Result<Vec<PathBuf>> {
        let datasets = self.datasets_dir()?;
        Ok(self.files.raw.iter().map(|f| datasets.join(f)).collect())
    }

    /// Steps to run, truncated after `until` when given.
    pub fn steps_until(&self, until: Option<Step>) -> Vec<Step> {
        match until {
            Some(last) => match self.steps.iter().position(|s| *s == last) {
                Some(i) => self.steps[..=i].to_vec(),
                None => self.steps.clone(),
            },
            None => self.steps.clone(),
        }
    }

    /// Create the configured directories. Empty paths are skipped.
    pub fn ensure_dirs(&self) -> Result<()> {
        for (name, value) in [
            ("logs", &self.paths.logs),
            ("datasets", &self.paths.datasets),
            ("store", &self.paths.store),
        ] {
            match value {
                Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)?,
                _ => warn!(path = name, "empty path; directory not created"),
            }
        }
        Ok(())
    }
}
