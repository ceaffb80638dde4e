//! Built-in rule catalogue.
//!
//! Ids are stable across releases: they are persisted as cooldown keys.

use crate::alert::{Category, Severity};
use crate::regime::Regime;
use crate::snapshot::symbols::{BTC, DXY, GLD, HYG, IWM, QQQ, SPY, TLT, VIX};
use crate::snapshot::Window;

use super::{Comparison, Condition, MetricRef, RuleKind, RuleSpec, Tier};

pub const SPY_DRAWDOWN: &str = "SPY_DRAWDOWN";

fn threshold(metric: MetricRef, op: Comparison, value: f64) -> RuleKind {
    RuleKind::Threshold {
        condition: Condition::new(metric, op, value),
    }
}

/// The default rule set, most severe first.
pub fn default_rules() -> Vec<RuleSpec> {
    use Comparison::{AtLeast, AtMost, Below};
    use Window::{FiveDay, OneDay};

    vec![
        RuleSpec::new(
            "CREDIT_STRESS_INTRADAY",
            Category::Stress,
            Severity::Critical,
            "High yield bonds dropping sharply intraday",
            threshold(MetricRef::ret(HYG, OneDay), AtMost, -1.5),
        ),
        RuleSpec::new(
            "COMBINED_STRESS",
            Category::Stress,
            Severity::Critical,
            "Both equities and bonds selling off together",
            RuleKind::AllOf {
                conditions: vec![
                    Condition::new(MetricRef::ret(SPY, OneDay), AtMost, -2.5),
                    Condition::new(MetricRef::ret(TLT, OneDay), Below, 0.0),
                ],
            },
        ),
        RuleSpec::new(
            "CREDIT_STRESS_5D",
            Category::Stress,
            Severity::High,
            "Sustained high yield weakness over 5 days",
            threshold(MetricRef::ret(HYG, FiveDay), AtMost, -3.0),
        ),
        RuleSpec::new(
            "LIQUIDITY_STRESS_INTRADAY",
            Category::Stress,
            Severity::High,
            "Dollar spiking sharply (liquidity tightening)",
            threshold(MetricRef::ret(DXY, OneDay), AtLeast, 1.0),
        ),
        RuleSpec::new(
            "LIQUIDITY_STRESS_5D",
            Category::Stress,
            Severity::High,
            "Sustained dollar strength over 5 days",
            threshold(MetricRef::ret(DXY, FiveDay), AtLeast, 2.0),
        ),
        RuleSpec::new(
            "VOLATILITY_ELEVATED",
            Category::Stress,
            Severity::High,
            "VIX at elevated fear levels",
            threshold(MetricRef::level(VIX), AtLeast, 30.0),
        ),
        RuleSpec::new(
            "VOLATILITY_SPIKE",
            Category::Stress,
            Severity::High,
            "VIX spiking sharply intraday",
            threshold(MetricRef::ret(VIX, OneDay), AtLeast, 8.0),
        ),
        RuleSpec::new(
            "GROWTH_WEAKNESS",
            Category::Leadership,
            Severity::Medium,
            "Growth/tech underperforming broad market",
            threshold(MetricRef::relative(QQQ, SPY, OneDay), AtMost, -1.5),
        ),
        RuleSpec::new(
            "SMALLCAP_WEAKNESS",
            Category::Leadership,
            Severity::Medium,
            "Small caps underperforming (risk-off signal)",
            threshold(MetricRef::relative(IWM, SPY, OneDay), AtMost, -2.0),
        ),
        RuleSpec::new(
            "DEFENSIVE_HEDGE_BID",
            Category::Sentiment,
            Severity::Medium,
            "Flight to safety into gold and treasuries",
            RuleKind::AllOf {
                conditions: vec![
                    Condition::new(MetricRef::ret(GLD, OneDay), AtLeast, 1.5),
                    Condition::new(MetricRef::ret(TLT, OneDay), AtLeast, 1.5),
                ],
            },
        ),
        RuleSpec::new(
            "RISK_APPETITE_POSITIVE",
            Category::Sentiment,
            Severity::Low,
            "Positive risk appetite with growth leading",
            RuleKind::RegimeConditional {
                active_in: Regime::Normal,
                severity: None,
                rule: Box::new(RuleKind::AllOf {
                    conditions: vec![
                        Condition::new(MetricRef::ret(SPY, OneDay), AtLeast, 1.5),
                        Condition::new(MetricRef::relative(QQQ, SPY, OneDay), AtLeast, 0.0),
                    ],
                }),
            },
        ),
        RuleSpec::new(
            "BTC_MAJOR_MOVE",
            Category::Sentiment,
            Severity::Low,
            "Major Bitcoin move (risk sentiment proxy)",
            threshold(MetricRef::abs_ret(BTC, OneDay), AtLeast, 8.0),
        ),
        RuleSpec::new(
            SPY_DRAWDOWN,
            Category::Opportunity,
            Severity::Medium,
            "SPY drawdown from 52-week high",
            RuleKind::TierLadder {
                metric: MetricRef::drawdown(SPY),
                op: AtMost,
                tiers: vec![
                    Tier::new(-2.0, Severity::Medium),
                    Tier::new(-4.0, Severity::Medium),
                    Tier::new(-6.0, Severity::Medium),
                    Tier::new(-10.0, Severity::High),
                    Tier::new(-15.0, Severity::High),
                    Tier::new(-20.0, Severity::High),
                ],
            },
        ),
    ]
}
