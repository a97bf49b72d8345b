//! Configuration types and parsing for dimload.yml

use crate::checksum::compute_checksum;
use crate::entity::{EntityDescriptor, EntityKind};
use crate::error::{CoreError, CoreResult};
use crate::names::{EntityName, RuleName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "dimload.yml";

/// Main configuration from dimload.yml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Pipeline name recorded on every run
    pub name: String,

    /// Warehouse database holding dimension and fact tables
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Meta database holding runs, checkpoints and quality results
    #[serde(default)]
    pub meta: MetaConfig,

    /// Default load mode when the CLI does not override it
    #[serde(default)]
    pub load_mode: LoadMode,

    /// Checkpoint defaults
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Source entity descriptors
    pub entities: Vec<EntityDescriptor>,

    /// Quality gate rules and threshold
    #[serde(default)]
    pub quality: QualityConfig,
}

/// Warehouse connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    /// DuckDB file path or `:memory:`
    #[serde(default = "default_warehouse_path")]
    pub path: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
        }
    }
}

fn default_warehouse_path() -> String {
    "warehouse.duckdb".to_string()
}

/// Meta database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaConfig {
    #[serde(default = "default_meta_path")]
    pub path: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            path: default_meta_path(),
        }
    }
}

fn default_meta_path() -> String {
    "target/meta.duckdb".to_string()
}

/// Extraction mode for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Ignore checkpoints and process the whole source
    Full,
    /// Process only records after the committed checkpoint
    #[default]
    Incremental,
}

impl LoadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadMode::Full => "full",
            LoadMode::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoadMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(LoadMode::Full),
            "incremental" => Ok(LoadMode::Incremental),
            other => Err(CoreError::ConfigInvalid {
                message: format!("unknown load mode '{other}'"),
            }),
        }
    }
}

/// Checkpoint defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Lower bound used when an entity has no committed checkpoint
    #[serde(default = "default_checkpoint_timestamp")]
    pub default_timestamp: DateTime<Utc>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            default_timestamp: default_checkpoint_timestamp(),
        }
    }
}

fn default_checkpoint_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// How per-rule scores combine into the batch score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Lowest rule score wins (fail-closed)
    #[default]
    Minimum,
    /// Weight-averaged rule scores
    WeightedAverage,
}

/// Rule severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Counts toward the gate
    #[default]
    Error,
    /// Reported only
    Warn,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warn => "warn",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-record predicate of a quality rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum RuleCheck {
    NotNull,
    Unique,
    NonNegative,
    Positive,
    MinValue { value: f64 },
    MaxValue { value: f64 },
    AcceptedValues { values: Vec<String> },
    Regex { pattern: String },
}

impl RuleCheck {
    pub fn name(&self) -> &'static str {
        match self {
            RuleCheck::NotNull => "not_null",
            RuleCheck::Unique => "unique",
            RuleCheck::NonNegative => "non_negative",
            RuleCheck::Positive => "positive",
            RuleCheck::MinValue { .. } => "min_value",
            RuleCheck::MaxValue { .. } => "max_value",
            RuleCheck::AcceptedValues { .. } => "accepted_values",
            RuleCheck::Regex { .. } => "regex",
        }
    }
}

/// One configured quality rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRuleConfig {
    pub name: RuleName,

    pub entity: EntityName,

    pub field: String,

    #[serde(flatten)]
    pub check: RuleCheck,

    #[serde(default)]
    pub severity: Severity,

    /// Weight under `weighted_average` aggregation
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Quality gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityConfig {
    /// Batches scoring below this are rejected
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    #[serde(default)]
    pub aggregation: Aggregation,

    #[serde(default)]
    pub rules: Vec<QualityRuleConfig>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            aggregation: Aggregation::default(),
            rules: Vec::new(),
        }
    }
}

fn default_min_score() -> f64 {
    95.0
}

impl QualityConfig {
    /// Rules that apply to one entity, in configuration order
    pub fn rules_for(&self, entity: &str) -> Vec<&QualityRuleConfig> {
        self.rules.iter().filter(|r| r.entity == entity).collect()
    }
}

impl Config {
    /// Load and validate configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Load `dimload.yml` from a directory
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        Self::load(&dir.join(CONFIG_FILE_NAME))
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> CoreResult<Self> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| CoreError::ConfigParseError {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-entity validation on top of each descriptor's own checks
    pub fn validate(&self) -> CoreResult<()> {
        let mut names = HashSet::new();
        for entity in &self.entities {
            if !names.insert(entity.name.as_str()) {
                return Err(CoreError::ConfigInvalid {
                    message: format!("duplicate entity '{}'", entity.name),
                });
            }
            entity.validate()?;

            if self.load_mode == LoadMode::Incremental && entity.watermark_field.is_none() {
                return Err(CoreError::ConfigInvalid {
                    message: format!(
                        "entity '{}' needs a watermark_field for incremental loads",
                        entity.name
                    ),
                });
            }

            for reference in &entity.references {
                match self.entity(&reference.dimension) {
                    Some(target) if target.kind == EntityKind::Dimension => {}
                    Some(_) => {
                        return Err(CoreError::ConfigInvalid {
                            message: format!(
                                "entity '{}' references '{}', which is not a dimension",
                                entity.name, reference.dimension
                            ),
                        })
                    }
                    None => {
                        return Err(CoreError::ConfigInvalid {
                            message: format!(
                                "entity '{}' references unknown dimension '{}'",
                                entity.name, reference.dimension
                            ),
                        })
                    }
                }
            }
        }

        if !(0.0..=100.0).contains(&self.quality.min_score) {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "quality.min_score must be between 0 and 100, found {}",
                    self.quality.min_score
                ),
            });
        }

        let mut rule_names = HashSet::new();
        for rule in &self.quality.rules {
            if !rule_names.insert(rule.name.as_str()) {
                return Err(CoreError::ConfigInvalid {
                    message: format!("duplicate quality rule '{}'", rule.name),
                });
            }
            let Some(entity) = self.entity(&rule.entity) else {
                return Err(CoreError::ConfigInvalid {
                    message: format!(
                        "quality rule '{}' targets unknown entity '{}'",
                        rule.name, rule.entity
                    ),
                });
            };
            if !entity.has_attribute(&rule.field) {
                return Err(CoreError::ConfigInvalid {
                    message: format!(
                        "quality rule '{}' checks unknown field '{}.{}'",
                        rule.name, rule.entity, rule.field
                    ),
                });
            }
            if rule.weight <= 0.0 {
                return Err(CoreError::ConfigInvalid {
                    message: format!("quality rule '{}' must have a positive weight", rule.name),
                });
            }
        }

        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Look up an entity, failing with [`CoreError::EntityNotFound`]
    pub fn require_entity(&self, name: &str) -> CoreResult<&EntityDescriptor> {
        self.entity(name).ok_or_else(|| CoreError::EntityNotFound {
            name: name.to_string(),
        })
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.iter().filter(|e| e.is_dimension())
    }

    pub fn facts(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.iter().filter(|e| e.is_fact())
    }

    /// Fingerprint recorded on each run row
    pub fn checksum(&self) -> CoreResult<String> {
        let canonical = serde_json::to_string(self)?;
        Ok(compute_checksum(&canonical))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
