//! Ordered collection of rules evaluated against one snapshot.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::alert::Candidate;
use crate::config::{EngineConfig, LadderPolicy};
use crate::error::{ConfigValidationError, RuleEvaluationError};
use crate::regime::Regime;
use crate::snapshot::IndicatorSnapshot;

use super::RuleSpec;

/// Result of evaluating every enabled rule.
#[derive(Debug, Clone, Default)]
pub struct RegistryOutcome {
    /// In registry order.
    pub candidates: Vec<Candidate>,
    /// Rules that were skipped this cycle.
    pub failures: Vec<RuleEvaluationError>,
}

/// Rule registry.
///
/// Rules are pure functions of the same immutable snapshot, so they are
/// evaluated in parallel; results are collected back in registry order.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: Vec<RuleSpec>,
    ladder_policy: LadderPolicy,
}

impl RuleRegistry {
    /// Build a registry, rejecting duplicate ids and malformed rules.
    pub fn new(
        rules: Vec<RuleSpec>,
        ladder_policy: LadderPolicy,
    ) -> Result<Self, ConfigValidationError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigValidationError::DuplicateRuleId(rule.id.clone()));
            }
        }
        Ok(Self {
            rules,
            ladder_policy,
        })
    }

    /// Registry over an already validated configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            rules: config.rules().to_vec(),
            ladder_policy: config.ladder_policy(),
        }
    }

    pub fn rules(&self) -> &[RuleSpec] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&RuleSpec> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every enabled rule. A failing rule is skipped and reported;
    /// it never prevents evaluation of the others.
    pub fn evaluate_all(&self, snapshot: &IndicatorSnapshot, regime: Regime) -> RegistryOutcome {
        let results: Vec<Result<Vec<Candidate>, RuleEvaluationError>> = self
            .rules
            .par_iter()
            .filter(|rule| rule.enabled)
            .map(|rule| rule.evaluate(snapshot, regime, self.ladder_policy))
            .collect();

        let mut outcome = RegistryOutcome::default();
        for result in results {
            match result {
                Ok(candidates) => {
                    for c in &candidates {
                        debug!(
                            rule = %c.rule_id,
                            key = %c.cooldown_key(),
                            severity = %c.severity,
                            "rule triggered"
                        );
                    }
                    outcome.candidates.extend(candidates);
                }
                Err(err) => {
                    warn!(rule = err.rule_id(), error = %err, "rule skipped");
                    outcome.failures.push(err);
                }
            }
        }
        outcome
    }
}
