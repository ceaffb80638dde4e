//! Market regime classifier (NORMAL vs DEFENSIVE).
//!
//! DEFENSIVE if any condition of a fixed disjunction holds. Every condition
//! is evaluated so the result names all of the triggers, not just the first.
//! Boundaries are inclusive wherever the threshold reads `≤`/`≥`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegimeThresholds;
use crate::error::MissingMetricError;
use crate::snapshot::symbols::{DXY, HYG, SPY, TLT, TNX, VIX};
use crate::snapshot::{IndicatorSnapshot, Window};

/// Market regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Normal,
    Defensive,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Normal => "NORMAL",
            Regime::Defensive => "DEFENSIVE",
        }
    }

    /// Suggested posture for the daily report.
    pub fn guidance(&self) -> &'static str {
        match self {
            Regime::Normal => "Standard operations - follow normal position sizing rules",
            Regime::Defensive => "Defensive posture - reduce risk, tighten stops, avoid new longs",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DEFENSIVE trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeCondition {
    /// HYG 5-day return at or below threshold.
    CreditStress,
    /// Dollar index 5-day return at or above threshold.
    LiquidityTightening,
    /// VIX at or above threshold and above its previous level.
    VolatilityRising,
    /// SPY 1-day return at or below threshold while TLT is also down.
    CombinedStress,
    /// SPY below its 200-day average while 10Y yields rise.
    StructuralWeakness,
}

impl RegimeCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeCondition::CreditStress => "credit_stress",
            RegimeCondition::LiquidityTightening => "liquidity_tightening",
            RegimeCondition::VolatilityRising => "volatility_rising",
            RegimeCondition::CombinedStress => "combined_stress",
            RegimeCondition::StructuralWeakness => "structural_weakness",
        }
    }
}

impl fmt::Display for RegimeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A satisfied condition together with the values that satisfied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTrigger {
    pub condition: RegimeCondition,
    pub observed: BTreeMap<String, f64>,
}

impl RegimeTrigger {
    fn new(condition: RegimeCondition, observed: &[(&str, f64)]) -> Self {
        Self {
            condition,
            observed: observed.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }
}

/// Regime plus the conditions that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeResult {
    pub regime: Regime,
    pub triggering_conditions: Vec<RegimeTrigger>,
    pub summary: String,
}

impl RegimeResult {
    pub fn is_defensive(&self) -> bool {
        self.regime == Regime::Defensive
    }

    pub fn condition_names(&self) -> Vec<&'static str> {
        self.triggering_conditions
            .iter()
            .map(|t| t.condition.as_str())
            .collect()
    }
}

/// Stateless classifier. Each call is independent; there is no hysteresis.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RegimeThresholds {
        &self.thresholds
    }

    /// Classify a snapshot.
    ///
    /// HYG 5d, DXY 5d, VIX level, SPY 1d and TLT 1d are required; the
    /// structural-weakness check is skipped when its inputs are absent.
    pub fn classify(
        &self,
        snapshot: &IndicatorSnapshot,
    ) -> Result<RegimeResult, MissingMetricError> {
        let t = &self.thresholds;

        let hyg_5d = snapshot.return_pct(HYG, Window::FiveDay)?;
        let dxy_5d = snapshot.return_pct(DXY, Window::FiveDay)?;
        let vix = snapshot.level(VIX)?;
        let spy_1d = snapshot.return_pct(SPY, Window::OneDay)?;
        let tlt_1d = snapshot.return_pct(TLT, Window::OneDay)?;

        let mut triggers = Vec::new();

        if hyg_5d <= t.hyg_5d_threshold {
            triggers.push(RegimeTrigger::new(
                RegimeCondition::CreditStress,
                &[("HYG.5d", hyg_5d)],
            ));
        }

        if dxy_5d >= t.dxy_5d_threshold {
            triggers.push(RegimeTrigger::new(
                RegimeCondition::LiquidityTightening,
                &[("DXY.5d", dxy_5d)],
            ));
        }

        if vix >= t.vix_level_threshold {
            match snapshot.previous_level(VIX) {
                Ok(prev) if vix > prev => triggers.push(RegimeTrigger::new(
                    RegimeCondition::VolatilityRising,
                    &[("VIX.level", vix), ("VIX.previous", prev)],
                )),
                Ok(_) => {}
                Err(_) => {
                    debug!(vix, "no previous VIX level, elevated level alone triggers");
                    triggers.push(RegimeTrigger::new(
                        RegimeCondition::VolatilityRising,
                        &[("VIX.level", vix)],
                    ));
                }
            }
        }

        if spy_1d <= t.spy_tlt_combined_threshold && tlt_1d < 0.0 {
            triggers.push(RegimeTrigger::new(
                RegimeCondition::CombinedStress,
                &[("SPY.1d", spy_1d), ("TLT.1d", tlt_1d)],
            ));
        }

        if t.structural_weakness {
            match (snapshot.below_sma_200(SPY), snapshot.return_pct(TNX, Window::OneDay)) {
                (Ok(true), Ok(tnx_1d)) if tnx_1d > 0.0 => {
                    triggers.push(RegimeTrigger::new(
                        RegimeCondition::StructuralWeakness,
                        &[("TNX.1d", tnx_1d)],
                    ));
                }
                (Ok(_), Ok(_)) => {}
                (Err(e), _) | (_, Err(e)) => {
                    debug!(error = %e, "structural weakness check skipped");
                }
            }
        }

        let (regime, summary) = if triggers.is_empty() {
            (
                Regime::Normal,
                "NORMAL regime - no significant stress signals detected".to_string(),
            )
        } else {
            (
                Regime::Defensive,
                format!(
                    "DEFENSIVE regime - {} warning signal(s) active",
                    triggers.len()
                ),
            )
        };

        Ok(RegimeResult {
            regime,
            triggering_conditions: triggers,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Metric, SymbolMetrics};
    use chrono::{TimeZone, Utc};

    struct Inputs {
        hyg_5d: f64,
        dxy_5d: f64,
        vix: f64,
        vix_prev: Option<f64>,
        spy_1d: f64,
        tlt_1d: f64,
    }

    impl Default for Inputs {
        fn default() -> Self {
            Self {
                hyg_5d: 0.3,
                dxy_5d: 0.1,
                vix: 15.0,
                vix_prev: Some(15.5),
                spy_1d: 0.4,
                tlt_1d: 0.2,
            }
        }
    }

    fn snapshot(i: Inputs) -> IndicatorSnapshot {
        let mut vix = SymbolMetrics::at_level(i.vix);
        if let Some(prev) = i.vix_prev {
            vix = vix.with_previous_level(prev);
        }
        IndicatorSnapshot::new(
            Utc.with_ymd_and_hms(2024, 8, 5, 20, 0, 0).unwrap(),
            [
                (HYG, SymbolMetrics::at_level(76.0).with_return(Window::FiveDay, i.hyg_5d)),
                (DXY, SymbolMetrics::at_level(104.0).with_return(Window::FiveDay, i.dxy_5d)),
                (VIX, vix),
                (SPY, SymbolMetrics::at_level(520.0).with_return(Window::OneDay, i.spy_1d)),
                (TLT, SymbolMetrics::at_level(95.0).with_return(Window::OneDay, i.tlt_1d)),
            ],
        )
    }

    fn classify(i: Inputs) -> RegimeResult {
        RegimeClassifier::new(RegimeThresholds::default())
            .classify(&snapshot(i))
            .unwrap()
    }

    #[test]
    fn neutral_is_normal() {
        let r = classify(Inputs::default());
        assert_eq!(r.regime, Regime::Normal);
        assert!(r.triggering_conditions.is_empty());
    }

    #[test]
    fn hyg_exactly_at_threshold_is_credit_stress() {
        let r = classify(Inputs {
            hyg_5d: -3.0,
            ..Default::default()
        });
        assert_eq!(r.regime, Regime::Defensive);
        assert_eq!(r.condition_names(), vec!["credit_stress"]);
    }

    #[test]
    fn dxy_exactly_at_threshold_triggers() {
        let r = classify(Inputs {
            dxy_5d: 2.0,
            ..Default::default()
        });
        assert_eq!(r.condition_names(), vec!["liquidity_tightening"]);
    }

    #[test]
    fn vix_elevated_but_falling_is_not_a_trigger() {
        let r = classify(Inputs {
            vix: 32.0,
            vix_prev: Some(35.0),
            ..Default::default()
        });
        assert_eq!(r.regime, Regime::Normal);
    }

    #[test]
    fn vix_at_threshold_and_rising_triggers() {
        let r = classify(Inputs {
            vix: 30.0,
            vix_prev: Some(28.0),
            ..Default::default()
        });
        assert_eq!(r.condition_names(), vec!["volatility_rising"]);
    }

    #[test]
    fn vix_without_reference_uses_level_alone() {
        let r = classify(Inputs {
            vix: 31.0,
            vix_prev: None,
            ..Default::default()
        });
        assert_eq!(r.condition_names(), vec!["volatility_rising"]);
    }

    #[test]
    fn combined_stress_needs_tlt_strictly_negative() {
        let flat_tlt = classify(Inputs {
            spy_1d: -2.5,
            tlt_1d: 0.0,
            ..Default::default()
        });
        assert_eq!(flat_tlt.regime, Regime::Normal);

        let r = classify(Inputs {
            spy_1d: -2.5,
            tlt_1d: -0.1,
            ..Default::default()
        });
        assert_eq!(r.condition_names(), vec!["combined_stress"]);
    }

    #[test]
    fn reports_every_trigger() {
        let r = classify(Inputs {
            hyg_5d: -4.0,
            dxy_5d: 2.5,
            spy_1d: -3.0,
            tlt_1d: -0.5,
            ..Default::default()
        });
        assert_eq!(
            r.condition_names(),
            vec!["credit_stress", "liquidity_tightening", "combined_stress"]
        );
        assert_eq!(r.summary, "DEFENSIVE regime - 3 warning signal(s) active");
    }

    #[test]
    fn structural_weakness_when_data_present() {
        let mut snap_metrics: Vec<(String, SymbolMetrics)> = {
            let s = snapshot(Inputs::default());
            s.symbols().map(|k| (k.to_string(), s.get(k).unwrap().clone())).collect()
        };
        for (sym, m) in snap_metrics.iter_mut() {
            if sym == SPY {
                m.sma_200 = Some(530.0);
            }
        }
        snap_metrics.push((
            TNX.to_string(),
            SymbolMetrics::at_level(4.3).with_return(Window::OneDay, 1.1),
        ));
        let snap = IndicatorSnapshot::new(Utc::now(), snap_metrics);

        let r = RegimeClassifier::new(RegimeThresholds::default()).classify(&snap).unwrap();
        assert_eq!(r.condition_names(), vec!["structural_weakness"]);

        let disabled = RegimeThresholds {
            structural_weakness: false,
            ..RegimeThresholds::default()
        };
        let r = RegimeClassifier::new(disabled).classify(&snap).unwrap();
        assert_eq!(r.regime, Regime::Normal);
    }

    #[test]
    fn missing_required_metric_is_fatal() {
        let snap = IndicatorSnapshot::new(
            Utc::now(),
            [(SPY, SymbolMetrics::at_level(500.0).with_return(Window::OneDay, 0.1))],
        );
        let err = RegimeClassifier::new(RegimeThresholds::default())
            .classify(&snap)
            .unwrap_err();
        assert_eq!(err.symbol, HYG);
        assert_eq!(err.metric, Metric::Return(Window::FiveDay));
    }
}
