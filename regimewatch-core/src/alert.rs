//! Alert types: severity, category, candidates and emitted alerts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Most urgent first.
    pub const DESCENDING: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Informational classification tag. Does not affect evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Stress,
    Opportunity,
    Leadership,
    Sentiment,
}

/// Durable cooldown key: `rule_id` or `rule_id:tier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CooldownKey(String);

impl CooldownKey {
    pub fn for_rule(rule_id: &str, tier: Option<&str>) -> Self {
        match tier {
            Some(tier) => Self(format!("{rule_id}:{tier}")),
            None => Self(rule_id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CooldownKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a firing within a tier ladder. Index 0 is the shallowest tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRef {
    pub index: usize,
    pub label: String,
}

/// How a ladder firing relates to the ladder's most recently fired tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierTransition {
    /// No tier of this ladder has fired before.
    First,
    Deeper,
    Same,
    /// Re-crossing into a shallower tier after a deeper one fired.
    Shallower,
}

/// Named values that caused a firing, for downstream rendering.
pub type Payload = BTreeMap<String, f64>;

/// A rule condition found true this cycle, not yet gated by cooldown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierRef>,
    pub severity: Severity,
    pub category: Category,
    pub description: String,
    pub payload: Payload,
    /// Labels of every tier in the ladder, shallow to deep. Empty for plain rules.
    #[serde(skip)]
    pub ladder: Vec<String>,
}

impl Candidate {
    pub fn cooldown_key(&self) -> CooldownKey {
        CooldownKey::for_rule(&self.rule_id, self.tier.as_ref().map(|t| t.label.as_str()))
    }
}

/// A candidate that passed cooldown gating and is reported outward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedAlert {
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierRef>,
    pub severity: Severity,
    pub category: Category,
    pub description: String,
    pub payload: Payload,
    pub fired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_transition: Option<TierTransition>,
}

impl EmittedAlert {
    pub fn from_candidate(
        candidate: Candidate,
        fired_at: DateTime<Utc>,
        tier_transition: Option<TierTransition>,
    ) -> Self {
        Self {
            rule_id: candidate.rule_id,
            tier: candidate.tier,
            severity: candidate.severity,
            category: candidate.category,
            description: candidate.description,
            payload: candidate.payload,
            fired_at,
            tier_transition,
        }
    }

    pub fn cooldown_key(&self) -> CooldownKey {
        CooldownKey::for_rule(&self.rule_id, self.tier.as_ref().map(|t| t.label.as_str()))
    }
}
