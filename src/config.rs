use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use crate::lines::change_filter::ChangeTolerance;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub change_filter: ChangeFilterConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    pub sports: Vec<SportConfig>,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub dry_run: bool,
    pub database_path: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub picks_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub fetched_results_dir: PathBuf,
    pub evaluated_dir: PathBuf,
    pub prompt_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeFilterConfig {
    #[serde(default = "default_dimension_columns")]
    pub dimension_columns: Vec<String>,
    #[serde(default)]
    pub default_epsilon: f64,
    /// Per-metric overrides of `default_epsilon`.
    #[serde(default)]
    pub epsilon: HashMap<String, f64>,
}

impl Default for ChangeFilterConfig {
    fn default() -> Self {
        Self {
            dimension_columns: default_dimension_columns(),
            default_epsilon: 0.0,
            epsilon: HashMap::new(),
        }
    }
}

impl ChangeFilterConfig {
    pub fn tolerance(&self) -> ChangeTolerance {
        ChangeTolerance {
            default_epsilon: self.default_epsilon,
            per_metric: self.epsilon.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_max_games")]
    pub max_games: usize,
    /// Only games starting within this many hours of the run. Unset means no window.
    #[serde(default)]
    pub hours_ahead: Option<i64>,
    #[serde(default = "default_group_columns")]
    pub group_columns: Vec<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_games: default_max_games(),
            hours_ahead: None,
            group_columns: default_group_columns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportConfig {
    pub name: String,
    pub models: Vec<String>,
    /// Metrics whose movement makes a snapshot worth keeping.
    pub change_metrics: Vec<String>,
    /// Metrics summarised as first/avg/last for the prompt.
    pub aggregate_metrics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub csv_export: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { csv_export: true }
    }
}

fn default_timezone() -> String { "America/Los_Angeles".to_string() }
fn default_max_games() -> usize { 30 }
fn default_true() -> bool { true }

fn default_dimension_columns() -> Vec<String> {
    ["game_id", "home_team", "away_team"].iter().map(|s| s.to_string()).collect()
}

fn default_group_columns() -> Vec<String> {
    ["game_id", "home_team", "away_team", "start_time"].iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub config_path: String,
    /// Overrides `system.dry_run` when set.
    pub dry_run: Option<bool>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.timezone()?;
        Ok(config)
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.system
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Invalid timezone {:?}: {}", self.system.timezone, e))
    }

    pub fn sport(&self, name: &str) -> Option<&SportConfig> {
        self.sports.iter().find(|s| s.name == name)
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            config_path: std::env::var("BETTING_CONFIG")
                .unwrap_or_else(|_| "config.toml".to_string()),
            dry_run: std::env::var("DRY_RUN").ok().and_then(|v| v.parse().ok()),
        })
    }
}
