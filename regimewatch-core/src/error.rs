//! Error taxonomy for the evaluation engine.
//!
//! Metric and rule errors are recovered locally (the rule is skipped and
//! reported). Configuration, store and dispatch errors abort the caller.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::alert::Severity;
use crate::snapshot::Metric;

/// A snapshot lacks a value the classifier or a rule needs.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("missing metric {metric} for '{symbol}'")]
pub struct MissingMetricError {
    pub symbol: String,
    pub metric: Metric,
}

impl MissingMetricError {
    pub fn new(symbol: impl Into<String>, metric: Metric) -> Self {
        Self {
            symbol: symbol.into(),
            metric,
        }
    }
}

/// A single rule could not be evaluated. Never fatal to the cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleEvaluationError {
    #[error("rule {rule_id}: {source}")]
    MissingMetric {
        rule_id: String,
        source: MissingMetricError,
    },

    #[error("rule {rule_id}: {reason}")]
    Degenerate { rule_id: String, reason: String },
}

impl RuleEvaluationError {
    /// Id of the rule that failed.
    pub fn rule_id(&self) -> &str {
        match self {
            Self::MissingMetric { rule_id, .. } | Self::Degenerate { rule_id, .. } => rule_id,
        }
    }
}

/// Malformed threshold or cooldown configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("cannot read config {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rule id must not be empty")]
    EmptyRuleId,

    #[error("duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    #[error("override references unknown rule '{0}'")]
    UnknownRule(String),

    #[error("cooldown for {severity} must not be negative (got {minutes} min)")]
    NegativeCooldown { severity: Severity, minutes: i64 },

    #[error("cooldown for {severity} is out of range (got {minutes} min)")]
    CooldownOutOfRange { severity: Severity, minutes: i64 },

    #[error("{context}: threshold must be finite")]
    NonFiniteThreshold { context: String },

    #[error("rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("override for {rule_id}: {reason}")]
    InvalidOverride { rule_id: String, reason: String },
}

/// Cooldown persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persisted document exists but cannot be trusted. The cycle must
    /// abort rather than treat every cooldown as expired.
    #[error("cooldown store {location} is corrupt: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("cooldown store I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another writer replaced the document since it was loaded.
    #[error("cooldown store {location} was modified by another writer")]
    Conflict { location: String },

    #[error("cannot encode cooldown state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Updated cooldown state could not be persisted after dispatch.
///
/// The alerts decided in this cycle are withheld: reporting them without a
/// durable cooldown record would re-fire them on the next run.
#[derive(Debug, Error)]
#[error("failed to persist cooldown state, {withheld} alert(s) withheld: {source}")]
pub struct DispatchError {
    pub withheld: usize,
    pub source: StoreError,
}

/// Cycle-aborting failures surfaced by [`crate::cycle::AlertEngine`].
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("regime classification failed: {0}")]
    Regime(#[from] MissingMetricError),

    #[error("cooldown store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
