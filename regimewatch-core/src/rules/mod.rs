//! Rule descriptions and their interpreter.
//!
//! Rules are data, not code: a closed set of tagged variants (`RuleKind`)
//! over a closed set of metric references (`MetricRef`). New rules are added
//! through configuration; the interpreter in this module is the only place
//! that knows how to evaluate them.

pub mod catalog;
pub mod registry;

use serde::{Deserialize, Serialize};

use crate::alert::{Candidate, Category, Payload, Severity, TierRef};
use crate::config::LadderPolicy;
use crate::error::{ConfigValidationError, MissingMetricError, RuleEvaluationError};
use crate::regime::Regime;
use crate::snapshot::{IndicatorSnapshot, Window};

pub use registry::{RegistryOutcome, RuleRegistry};

/// A value read (or derived) from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricRef {
    /// Current level (price, index value).
    Level { symbol: String },
    /// Percent return over a window.
    Return { symbol: String, window: Window },
    /// Magnitude of the percent return over a window.
    AbsReturn { symbol: String, window: Window },
    /// `symbol` return minus `benchmark` return over the same window.
    RelativeReturn {
        symbol: String,
        benchmark: String,
        window: Window,
    },
    /// Percent distance from the 52-week high.
    DrawdownFromHigh { symbol: String },
}

impl MetricRef {
    pub fn level(symbol: &str) -> Self {
        Self::Level {
            symbol: symbol.to_string(),
        }
    }

    pub fn ret(symbol: &str, window: Window) -> Self {
        Self::Return {
            symbol: symbol.to_string(),
            window,
        }
    }

    pub fn abs_ret(symbol: &str, window: Window) -> Self {
        Self::AbsReturn {
            symbol: symbol.to_string(),
            window,
        }
    }

    pub fn relative(symbol: &str, benchmark: &str, window: Window) -> Self {
        Self::RelativeReturn {
            symbol: symbol.to_string(),
            benchmark: benchmark.to_string(),
            window,
        }
    }

    pub fn drawdown(symbol: &str) -> Self {
        Self::DrawdownFromHigh {
            symbol: symbol.to_string(),
        }
    }

    /// Payload key for this metric, e.g. `HYG.5d` or `QQQ-SPY.1d`.
    pub fn label(&self) -> String {
        match self {
            MetricRef::Level { symbol } => format!("{symbol}.level"),
            MetricRef::Return { symbol, window } => format!("{symbol}.{}", window.as_str()),
            MetricRef::AbsReturn { symbol, window } => format!("|{symbol}.{}|", window.as_str()),
            MetricRef::RelativeReturn {
                symbol,
                benchmark,
                window,
            } => format!("{symbol}-{benchmark}.{}", window.as_str()),
            MetricRef::DrawdownFromHigh { symbol } => format!("{symbol}.drawdown"),
        }
    }

    pub fn read(&self, snapshot: &IndicatorSnapshot) -> Result<f64, MissingMetricError> {
        match self {
            MetricRef::Level { symbol } => snapshot.level(symbol),
            MetricRef::Return { symbol, window } => snapshot.return_pct(symbol, *window),
            MetricRef::AbsReturn { symbol, window } => {
                snapshot.return_pct(symbol, *window).map(f64::abs)
            }
            MetricRef::RelativeReturn {
                symbol,
                benchmark,
                window,
            } => {
                Ok(snapshot.return_pct(symbol, *window)? - snapshot.return_pct(benchmark, *window)?)
            }
            MetricRef::DrawdownFromHigh { symbol } => snapshot.drawdown_from_high_pct(symbol),
        }
    }
}

/// Threshold comparison. `AtMost`/`AtLeast` are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<=")]
    AtMost,
    #[serde(rename = ">=")]
    AtLeast,
    #[serde(rename = "<")]
    Below,
    #[serde(rename = ">")]
    Above,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::AtMost => value <= threshold,
            Comparison::AtLeast => value >= threshold,
            Comparison::Below => value < threshold,
            Comparison::Above => value > threshold,
        }
    }

    /// Whether `b` is strictly further into the triggering direction than `a`.
    fn is_deeper(&self, a: f64, b: f64) -> bool {
        match self {
            Comparison::AtMost | Comparison::Below => b < a,
            Comparison::AtLeast | Comparison::Above => b > a,
        }
    }
}

/// One `metric op threshold` test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: MetricRef,
    pub op: Comparison,
    pub threshold: f64,
}

impl Condition {
    pub fn new(metric: MetricRef, op: Comparison, threshold: f64) -> Self {
        Self {
            metric,
            op,
            threshold,
        }
    }
}

/// One rung of a tier ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub threshold: f64,
    /// Falls back to the rule's severity when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Cooldown key suffix. Defaults to the threshold, e.g. `-4`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Tier {
    pub fn new(threshold: f64, severity: Severity) -> Self {
        Self {
            threshold,
            severity: Some(severity),
            label: None,
        }
    }

    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{}", self.threshold))
    }
}

/// Closed set of rule shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    Threshold { condition: Condition },
    AllOf { conditions: Vec<Condition> },
    /// Tiers ordered shallow to deep along `op`.
    TierLadder {
        metric: MetricRef,
        op: Comparison,
        tiers: Vec<Tier>,
    },
    /// Active only in `active_in`, optionally at a different severity.
    RegimeConditional {
        active_in: Regime,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<Severity>,
        rule: Box<RuleKind>,
    },
}

impl RuleKind {
    /// The thresholds a config override may replace, in declaration order.
    pub(crate) fn thresholds_mut(&mut self) -> Vec<&mut f64> {
        match self {
            RuleKind::Threshold { condition } => vec![&mut condition.threshold],
            RuleKind::AllOf { conditions } => {
                conditions.iter_mut().map(|c| &mut c.threshold).collect()
            }
            RuleKind::TierLadder { tiers, .. } => {
                tiers.iter_mut().map(|t| &mut t.threshold).collect()
            }
            RuleKind::RegimeConditional { rule, .. } => rule.thresholds_mut(),
        }
    }

    pub(crate) fn is_ladder(&self) -> bool {
        match self {
            RuleKind::TierLadder { .. } => true,
            RuleKind::RegimeConditional { rule, .. } => rule.is_ladder(),
            _ => false,
        }
    }

    /// Replace every regime-specific severity set inside this kind, so a rule-level
    /// severity override is not shadowed by it.
    pub(crate) fn replace_conditional_severity(&mut self, severity: Severity) {
        if let RuleKind::RegimeConditional {
            severity: inner,
            rule,
            ..
        } = self
        {
            if inner.is_some() {
                *inner = Some(severity);
            }
            rule.replace_conditional_severity(severity);
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A named rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub kind: RuleKind,
}

impl RuleSpec {
    pub fn new(
        id: &str,
        category: Category,
        severity: Severity,
        description: &str,
        kind: RuleKind,
    ) -> Self {
        Self {
            id: id.to_string(),
            category,
            severity,
            description: description.to_string(),
            enabled: true,
            kind,
        }
    }

    /// Structural checks: non-empty id, finite thresholds, well-formed ladders.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.id.trim().is_empty() {
            return Err(ConfigValidationError::EmptyRuleId);
        }
        validate_kind(&self.id, &self.kind)
    }

    /// Evaluate against one snapshot. Returns zero or more candidates
    /// (more than one only for ladders under [`LadderPolicy::AllMet`]).
    pub fn evaluate(
        &self,
        snapshot: &IndicatorSnapshot,
        regime: Regime,
        policy: LadderPolicy,
    ) -> Result<Vec<Candidate>, RuleEvaluationError> {
        let firings = eval_kind(&self.kind, self.severity, snapshot, regime, policy).map_err(
            |source| RuleEvaluationError::MissingMetric {
                rule_id: self.id.clone(),
                source,
            },
        )?;

        let mut candidates = Vec::with_capacity(firings.len());
        for firing in firings {
            if firing.payload.values().any(|v| !v.is_finite()) {
                return Err(RuleEvaluationError::Degenerate {
                    rule_id: self.id.clone(),
                    reason: "derived metric is not finite".into(),
                });
            }
            candidates.push(Candidate {
                rule_id: self.id.clone(),
                tier: firing.tier,
                severity: firing.severity,
                category: self.category,
                description: self.description.clone(),
                payload: firing.payload,
                ladder: firing.ladder,
            });
        }
        Ok(candidates)
    }
}

struct Firing {
    severity: Severity,
    tier: Option<TierRef>,
    ladder: Vec<String>,
    payload: Payload,
}

fn eval_kind(
    kind: &RuleKind,
    severity: Severity,
    snapshot: &IndicatorSnapshot,
    regime: Regime,
    policy: LadderPolicy,
) -> Result<Vec<Firing>, MissingMetricError> {
    match kind {
        RuleKind::Threshold { condition } => {
            let value = condition.metric.read(snapshot)?;
            if !condition.op.holds(value, condition.threshold) {
                return Ok(Vec::new());
            }
            let mut payload = Payload::new();
            payload.insert(condition.metric.label(), value);
            payload.insert("threshold".into(), condition.threshold);
            Ok(vec![Firing {
                severity,
                tier: None,
                ladder: Vec::new(),
                payload,
            }])
        }
        RuleKind::AllOf { conditions } => {
            // Read everything first so a missing metric is reported even
            // when an earlier condition already fails.
            let values = conditions
                .iter()
                .map(|c| c.metric.read(snapshot))
                .collect::<Result<Vec<_>, _>>()?;
            let all_hold = conditions
                .iter()
                .zip(&values)
                .all(|(c, v)| c.op.holds(*v, c.threshold));
            if !all_hold {
                return Ok(Vec::new());
            }
            let payload = conditions
                .iter()
                .zip(values)
                .map(|(c, v)| (c.metric.label(), v))
                .collect();
            Ok(vec![Firing {
                severity,
                tier: None,
                ladder: Vec::new(),
                payload,
            }])
        }
        RuleKind::TierLadder { metric, op, tiers } => {
            let value = metric.read(snapshot)?;
            let labels: Vec<String> = tiers.iter().map(Tier::label).collect();
            let met: Vec<usize> = (0..tiers.len())
                .filter(|&i| op.holds(value, tiers[i].threshold))
                .collect();
            let selected: Vec<usize> = match policy {
                LadderPolicy::DeepestOnly => met.last().copied().into_iter().collect(),
                LadderPolicy::AllMet => met.into_iter().rev().collect(),
            };
            Ok(selected
                .into_iter()
                .map(|i| {
                    let tier = &tiers[i];
                    let mut payload = Payload::new();
                    payload.insert(metric.label(), value);
                    payload.insert("threshold".into(), tier.threshold);
                    Firing {
                        severity: tier.severity.unwrap_or(severity),
                        tier: Some(TierRef {
                            index: i,
                            label: labels[i].clone(),
                        }),
                        ladder: labels.clone(),
                        payload,
                    }
                })
                .collect())
        }
        RuleKind::RegimeConditional {
            active_in,
            severity: override_severity,
            rule,
        } => {
            if *active_in != regime {
                return Ok(Vec::new());
            }
            eval_kind(
                rule,
                override_severity.unwrap_or(severity),
                snapshot,
                regime,
                policy,
            )
        }
    }
}

fn validate_kind(rule_id: &str, kind: &RuleKind) -> Result<(), ConfigValidationError> {
    let invalid = |reason: &str| ConfigValidationError::InvalidRule {
        rule_id: rule_id.to_string(),
        reason: reason.to_string(),
    };
    let finite = |value: f64| {
        if value.is_finite() {
            Ok(())
        } else {
            Err(ConfigValidationError::NonFiniteThreshold {
                context: format!("rule {rule_id}"),
            })
        }
    };

    match kind {
        RuleKind::Threshold { condition } => finite(condition.threshold),
        RuleKind::AllOf { conditions } => {
            if conditions.is_empty() {
                return Err(invalid("all_of needs at least one condition"));
            }
            conditions.iter().try_for_each(|c| finite(c.threshold))
        }
        RuleKind::TierLadder { op, tiers, .. } => {
            if tiers.is_empty() {
                return Err(invalid("tier ladder needs at least one tier"));
            }
            tiers.iter().try_for_each(|t| finite(t.threshold))?;
            if tiers.windows(2).any(|w| !op.is_deeper(w[0].threshold, w[1].threshold)) {
                return Err(invalid("tier thresholds must get strictly deeper"));
            }
            let mut labels: Vec<String> = tiers.iter().map(Tier::label).collect();
            labels.sort();
            labels.dedup();
            if labels.len() != tiers.len() {
                return Err(invalid("tier labels must be unique"));
            }
            Ok(())
        }
        RuleKind::RegimeConditional { rule, .. } => validate_kind(rule_id, rule),
    }
}
