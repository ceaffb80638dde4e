//! Engine configuration.
//!
//! `WatchConfig` is the serializable TOML shape: regime thresholds, cooldown
//! durations, ladder policy, per-rule overrides and extra rule definitions.
//! Every field has a default, so an empty file is valid.
//!
//! `EngineConfig` is the validated, immutable result of `WatchConfig::build`.
//! It is constructed once at startup and passed by reference to the
//! classifier, registry and dispatcher.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::alert::Severity;
use crate::error::ConfigValidationError;
use crate::rules::catalog::default_rules;
use crate::rules::RuleSpec;

/// Boundary values for the regime classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeThresholds {
    /// HYG 5-day return (%) at or below which credit stress is flagged.
    pub hyg_5d_threshold: f64,
    /// Dollar index 5-day return (%) at or above which liquidity is tightening.
    pub dxy_5d_threshold: f64,
    /// VIX level at or above which rising volatility is flagged.
    pub vix_level_threshold: f64,
    /// SPY 1-day return (%) at or below which, with TLT down, combined stress is flagged.
    pub spy_tlt_combined_threshold: f64,
    /// Enables the SPY-below-200dma-with-rising-rates check.
    pub structural_weakness: bool,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            hyg_5d_threshold: -3.0,
            dxy_5d_threshold: 2.0,
            vix_level_threshold: 30.0,
            spy_tlt_combined_threshold: -2.5,
            structural_weakness: true,
        }
    }
}

impl RegimeThresholds {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        let fields = [
            ("regime.hyg_5d_threshold", self.hyg_5d_threshold),
            ("regime.dxy_5d_threshold", self.dxy_5d_threshold),
            ("regime.vix_level_threshold", self.vix_level_threshold),
            ("regime.spy_tlt_combined_threshold", self.spy_tlt_combined_threshold),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ConfigValidationError::NonFiniteThreshold {
                    context: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Cooldown duration per severity, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownPolicy {
    pub critical_minutes: i64,
    pub high_minutes: i64,
    pub medium_minutes: i64,
    pub low_minutes: i64,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            critical_minutes: 45,
            high_minutes: 90,
            medium_minutes: 240,
            low_minutes: 1440,
        }
    }
}

impl CooldownPolicy {
    pub fn minutes(&self, severity: Severity) -> i64 {
        match severity {
            Severity::Critical => self.critical_minutes,
            Severity::High => self.high_minutes,
            Severity::Medium => self.medium_minutes,
            Severity::Low => self.low_minutes,
        }
    }

    /// Saturates at `Duration::MAX`; `build` rejects values that would.
    pub fn duration(&self, severity: Severity) -> Duration {
        Duration::try_minutes(self.minutes(severity)).unwrap_or(Duration::MAX)
    }

    /// Whether `Critical ≤ High ≤ Medium ≤ Low` holds. Not enforced.
    pub fn is_monotonic(&self) -> bool {
        self.critical_minutes <= self.high_minutes
            && self.high_minutes <= self.medium_minutes
            && self.medium_minutes <= self.low_minutes
    }

    fn validate(&self) -> Result<(), ConfigValidationError> {
        for severity in Severity::DESCENDING {
            let minutes = self.minutes(severity);
            if minutes < 0 {
                return Err(ConfigValidationError::NegativeCooldown { severity, minutes });
            }
            if Duration::try_minutes(minutes).is_none() {
                return Err(ConfigValidationError::CooldownOutOfRange { severity, minutes });
            }
        }
        if !self.is_monotonic() {
            warn!(
                critical = self.critical_minutes,
                high = self.high_minutes,
                medium = self.medium_minutes,
                low = self.low_minutes,
                "cooldowns are not ordered critical <= high <= medium <= low"
            );
        }
        Ok(())
    }
}

/// Which tiers of a ladder produce candidates when several are met at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderPolicy {
    /// Only the deepest met tier.
    #[default]
    DeepestOnly,
    /// Every met tier, deepest first; each is gated by its own cooldown.
    AllMet,
}

/// Per-rule adjustments applied on top of the built-in catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Replaces the threshold of a single-condition rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Replaces every threshold of a multi-condition rule or ladder, in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Vec<f64>>,
}

impl RuleOverride {
    fn apply(&self, rule: &mut RuleSpec) -> Result<(), ConfigValidationError> {
        let invalid = |reason: String| ConfigValidationError::InvalidOverride {
            rule_id: rule.id.clone(),
            reason,
        };

        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        if let Some(severity) = self.severity {
            if rule.kind.is_ladder() {
                return Err(invalid("ladder severities are set per tier".into()));
            }
            rule.severity = severity;
            rule.kind.replace_conditional_severity(severity);
        }

        match (self.threshold, &self.thresholds) {
            (Some(_), Some(_)) => {
                return Err(invalid("set either `threshold` or `thresholds`, not both".into()))
            }
            (Some(value), None) => {
                let mut slots = rule.kind.thresholds_mut();
                if slots.len() != 1 {
                    let n = slots.len();
                    return Err(invalid(format!(
                        "rule has {n} thresholds, use `thresholds`"
                    )));
                }
                *slots[0] = value;
            }
            (None, Some(values)) => {
                let mut slots = rule.kind.thresholds_mut();
                if slots.len() != values.len() {
                    let n = slots.len();
                    return Err(invalid(format!(
                        "expected {n} thresholds, got {}",
                        values.len()
                    )));
                }
                for (slot, value) in slots.iter_mut().zip(values) {
                    **slot = *value;
                }
            }
            (None, None) => {}
        }
        Ok(())
    }
}

/// Serializable configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub ladder_policy: LadderPolicy,
    pub regime: RegimeThresholds,
    pub cooldowns: CooldownPolicy,
    /// Keyed by built-in rule id.
    pub rules: BTreeMap<String, RuleOverride>,
    /// Additional rules appended after the built-in catalogue.
    pub extra_rules: Vec<RuleSpec>,
}

impl WatchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigValidationError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigValidationError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigValidationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides to the catalogue and validate everything.
    pub fn build(self) -> Result<EngineConfig, ConfigValidationError> {
        self.regime.validate()?;
        self.cooldowns.validate()?;

        let mut rules = default_rules();
        for (id, ov) in &self.rules {
            let rule = rules
                .iter_mut()
                .find(|r| &r.id == id)
                .ok_or_else(|| ConfigValidationError::UnknownRule(id.clone()))?;
            ov.apply(rule)?;
        }
        rules.extend(self.extra_rules);

        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.id.clone()) {
                return Err(ConfigValidationError::DuplicateRuleId(rule.id.clone()));
            }
        }

        Ok(EngineConfig {
            regime: self.regime,
            cooldowns: self.cooldowns,
            ladder_policy: self.ladder_policy,
            rules,
        })
    }
}

/// Validated, immutable engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    regime: RegimeThresholds,
    cooldowns: CooldownPolicy,
    ladder_policy: LadderPolicy,
    rules: Vec<RuleSpec>,
}

impl Default for EngineConfig {
    /// Built-in thresholds and catalogue.
    fn default() -> Self {
        Self {
            regime: RegimeThresholds::default(),
            cooldowns: CooldownPolicy::default(),
            ladder_policy: LadderPolicy::default(),
            rules: default_rules(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML file; `None` means built-in defaults.
    pub fn from_path(path: Option<&Path>) -> Result<Self, ConfigValidationError> {
        match path {
            Some(path) => WatchConfig::load(path)?.build(),
            None => Ok(Self::default()),
        }
    }

    pub fn regime(&self) -> &RegimeThresholds {
        &self.regime
    }

    pub fn cooldowns(&self) -> &CooldownPolicy {
        &self.cooldowns
    }

    pub fn ladder_policy(&self) -> LadderPolicy {
        self.ladder_policy
    }

    pub fn rules(&self) -> &[RuleSpec] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&RuleSpec> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Rules that evaluate a tier ladder, including regime-conditional ones.
    pub fn ladder_rules(&self) -> impl Iterator<Item = &RuleSpec> {
        self.rules.iter().filter(|r| r.kind.is_ladder())
    }
}
