//! Batch scoring and the quality gate verdict

use crate::error::QualityResult;
use crate::rules::CompiledRule;
use dl_core::{
    Aggregation, EntityDescriptor, EntityName, NormalizedRecord, QualityConfig, RuleName,
    Severity,
};
use serde::Serialize;

/// Result of one rule against one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityCheckResult {
    pub rule: RuleName,
    pub entity: EntityName,
    /// Warehouse table the batch is headed for
    pub table: String,
    pub field: String,
    pub check: String,
    pub severity: Severity,
    pub weight: f64,
    pub records_checked: usize,
    pub records_failed: usize,
    /// 0 to 100
    pub score: f64,
    pub passed: bool,
    /// Check name, field and sample failing source keys
    pub details: serde_json::Value,
}

impl QualityCheckResult {
    /// Whether this result takes part in the gate aggregate
    pub fn gates(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Every rule result for a batch plus the aggregate verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub entity: EntityName,
    pub results: Vec<QualityCheckResult>,
    pub score: f64,
    pub min_score: f64,
}

impl QualityReport {
    /// True when the batch may proceed to the merge or load phase
    pub fn passed(&self) -> bool {
        self.score >= self.min_score
    }

    pub fn failed_rules(&self) -> impl Iterator<Item = &QualityCheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Combine rule scores into the batch score.
///
/// Only error-severity results count. With none, the batch scores 100.
pub fn aggregate_score(results: &[QualityCheckResult], aggregation: Aggregation) -> f64 {
    let gating: Vec<&QualityCheckResult> = results.iter().filter(|r| r.gates()).collect();
    if gating.is_empty() {
        return 100.0;
    }
    match aggregation {
        Aggregation::Minimum => gating.iter().map(|r| r.score).fold(100.0, f64::min),
        Aggregation::WeightedAverage => {
            let total_weight: f64 = gating.iter().map(|r| r.weight).sum();
            let weighted: f64 = gating.iter().map(|r| r.score * r.weight).sum();
            weighted / total_weight
        }
    }
}

/// Scores batches of one entity against its configured rules
#[derive(Debug, Clone)]
pub struct QualityScorer {
    entity: EntityName,
    table: String,
    rules: Vec<CompiledRule>,
    min_score: f64,
    aggregation: Aggregation,
}

impl QualityScorer {
    pub fn new(entity: &EntityDescriptor, config: &QualityConfig) -> QualityResult<Self> {
        let rules = config
            .rules_for(&entity.name)
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<QualityResult<Vec<_>>>()?;
        Ok(Self {
            entity: entity.name.clone(),
            table: entity.table.clone(),
            rules,
            min_score: config.min_score,
            aggregation: config.aggregation,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate every rule in configuration order
    pub fn score(&self, batch: &[NormalizedRecord]) -> QualityReport {
        let results: Vec<QualityCheckResult> = self
            .rules
            .iter()
            .map(|rule| {
                let outcome = rule.evaluate(batch);
                let config = &rule.config;
                QualityCheckResult {
                    rule: config.name.clone(),
                    entity: self.entity.clone(),
                    table: self.table.clone(),
                    field: config.field.clone(),
                    check: config.check.name().to_string(),
                    severity: config.severity,
                    weight: config.weight,
                    records_checked: outcome.records_checked,
                    records_failed: outcome.records_failed,
                    score: outcome.score(),
                    passed: outcome.records_failed == 0,
                    details: serde_json::json!({
                        "check": config.check.name(),
                        "field": config.field,
                        "sample_failures": outcome.sample_failures,
                    }),
                }
            })
            .collect();

        let score = aggregate_score(&results, self.aggregation);
        for result in results.iter().filter(|r| !r.passed) {
            log::debug!(
                "Rule {} on {}: {}/{} records failed (score {:.2})",
                result.rule,
                self.entity,
                result.records_failed,
                result.records_checked,
                result.score
            );
        }

        QualityReport {
            entity: self.entity.clone(),
            results,
            score,
            min_score: self.min_score,
        }
    }
}

#[cfg(test)]
#[path = "scorer_test.rs"]
mod tests;
