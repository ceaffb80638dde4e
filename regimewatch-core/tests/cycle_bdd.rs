//! BDD tests for the alert cycle.
//!
//! These tests drive `AlertEngine` end to end:
//! - Regime classification at threshold boundaries
//! - Drawdown ladders and per-tier cooldowns
//! - Cooldown persistence through the JSON file store
//! - Fault handling for corrupt and unwritable stores
//! - Daily report and configuration overrides

use std::collections::BTreeMap;
use std::fs;

use chrono::{DateTime, Duration, TimeZone, Utc};
use regimewatch_core::snapshot::symbols;
use regimewatch_core::{
    AlertEngine, CooldownBackend, CycleError, EngineConfig, IndicatorSnapshot, JsonFileStore,
    LadderPolicy, MemoryStore, Regime, Severity, StoreError, SymbolMetrics, TierTransition,
    WatchConfig, Window,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 15, 15, 30, 0).unwrap()
}

/// Every tracked symbol present, nothing near any threshold.
fn neutral() -> BTreeMap<String, SymbolMetrics> {
    symbols::ALL
        .iter()
        .map(|s| {
            let m = if *s == symbols::VIX {
                SymbolMetrics::at_level(15.0)
                    .with_previous_level(15.5)
                    .with_return(Window::OneDay, -0.5)
                    .with_return(Window::FiveDay, -1.0)
            } else {
                SymbolMetrics::at_level(100.0)
                    .with_previous_level(99.9)
                    .with_return(Window::OneDay, 0.1)
                    .with_return(Window::FiveDay, 0.2)
                    .with_high_52w(100.5)
                    .with_low_52w(80.0)
                    .with_sma_200(90.0)
            };
            (s.to_string(), m)
        })
        .collect()
}

fn snapshot_with(edit: impl FnOnce(&mut BTreeMap<String, SymbolMetrics>)) -> IndicatorSnapshot {
    let mut metrics = neutral();
    edit(&mut metrics);
    IndicatorSnapshot::new(t0(), metrics)
}

fn spy_drawdown(pct: f64) -> IndicatorSnapshot {
    snapshot_with(|m| {
        if let Some(spy) = m.get_mut(symbols::SPY) {
            spy.high_52w = Some(100.0);
            spy.level = 100.0 + pct;
        }
    })
}

fn engine() -> AlertEngine {
    AlertEngine::new(&EngineConfig::default())
}

#[test]
fn bdd_scenario_neutral_market_is_quiet() {
    // GIVEN a neutral snapshot and an empty store
    let store = MemoryStore::new();

    // WHEN a cycle runs
    let report = engine()
        .run_alert_cycle(&snapshot_with(|_| {}), &store, t0())
        .unwrap();

    // THEN the regime is NORMAL with no triggers and nothing is emitted
    assert_eq!(report.regime.regime, Regime::Normal);
    assert!(report.regime.triggering_conditions.is_empty());
    assert!(report.emitted.is_empty());
    assert!(report.rule_failures.is_empty());
}

#[test]
fn bdd_scenario_hyg_exactly_at_threshold_is_credit_stress() {
    // GIVEN HYG down exactly 3.0% over 5 days and everything else neutral
    let snap = snapshot_with(|m| {
        if let Some(hyg) = m.get_mut(symbols::HYG) {
            hyg.change_5d_pct = Some(-3.0);
        }
    });

    // WHEN the regime is classified
    let result = engine().classifier().classify(&snap).unwrap();

    // THEN the regime is DEFENSIVE on credit stress alone
    assert_eq!(result.regime, Regime::Defensive);
    assert_eq!(result.condition_names(), vec!["credit_stress"]);
}

#[test]
fn bdd_scenario_spy_drawdown_emits_deepest_tier_only() {
    // GIVEN SPY 4.1% below its 52-week high and no prior firings
    let store = MemoryStore::new();

    // WHEN a cycle runs under the default ladder policy
    let report = engine()
        .run_alert_cycle(&spy_drawdown(-4.1), &store, t0())
        .unwrap();

    // THEN exactly one alert is emitted, at the -4 tier
    assert_eq!(report.emitted.len(), 1);
    let alert = &report.emitted[0];
    assert_eq!(alert.cooldown_key().as_str(), "SPY_DRAWDOWN:-4");
    assert_eq!(alert.severity, Severity::Medium);
    assert_eq!(alert.tier_transition, Some(TierTransition::First));

    // AND the -2 tier is neither emitted nor recorded
    let state = store.load().unwrap();
    assert!(state.get_last_fired(&"SPY_DRAWDOWN:-2".into()).is_none());
    assert_eq!(state.get_last_fired(&"SPY_DRAWDOWN:-4".into()), Some(t0()));
}

#[test]
fn bdd_scenario_deeper_tier_is_not_blocked_by_shallower_cooldown() {
    // GIVEN the -4 tier fired at T
    let engine = engine();
    let store = MemoryStore::new();
    engine
        .run_alert_cycle(&spy_drawdown(-4.1), &store, t0())
        .unwrap();

    // WHEN SPY falls through -6% one minute later
    let later = t0() + Duration::minutes(1);
    let report = engine
        .run_alert_cycle(&spy_drawdown(-6.2), &store, later)
        .unwrap();

    // THEN the -6 tier is emitted and marked as a deeper move
    assert_eq!(report.emitted.len(), 1);
    assert_eq!(report.emitted[0].cooldown_key().as_str(), "SPY_DRAWDOWN:-6");
    assert_eq!(report.emitted[0].tier_transition, Some(TierTransition::Deeper));
}

#[test]
fn bdd_scenario_all_met_policy_emits_every_eligible_tier() {
    // GIVEN a configuration that emits every met tier
    let config = WatchConfig {
        ladder_policy: LadderPolicy::AllMet,
        ..WatchConfig::default()
    }
    .build()
    .unwrap();
    let engine = AlertEngine::new(&config);
    let store = MemoryStore::new();

    // WHEN SPY is 4.1% off its high
    let report = engine
        .run_alert_cycle(&spy_drawdown(-4.1), &store, t0())
        .unwrap();

    // THEN both the -4 and -2 tiers are emitted, deepest first
    let keys: Vec<_> = report
        .emitted
        .iter()
        .map(|a| a.cooldown_key().to_string())
        .collect();
    assert_eq!(keys, vec!["SPY_DRAWDOWN:-4", "SPY_DRAWDOWN:-2"]);

    // AND a repeat within the cooldown suppresses both
    let again = engine
        .run_alert_cycle(&spy_drawdown(-4.1), &store, t0() + Duration::minutes(30))
        .unwrap();
    assert!(again.emitted.is_empty());
    assert_eq!(again.suppressed.len(), 2);
}

#[test]
fn bdd_scenario_shallower_recross_is_distinguishable() {
    // GIVEN the -6 tier fired at T
    let engine = engine();
    let store = MemoryStore::new();
    engine
        .run_alert_cycle(&spy_drawdown(-6.5), &store, t0())
        .unwrap();

    // WHEN SPY recovers to -4.5% an hour later
    let report = engine
        .run_alert_cycle(&spy_drawdown(-4.5), &store, t0() + Duration::hours(1))
        .unwrap();

    // THEN the -4 tier fires, annotated as a shallower re-cross
    assert_eq!(report.emitted.len(), 1);
    assert_eq!(report.emitted[0].cooldown_key().as_str(), "SPY_DRAWDOWN:-4");
    assert_eq!(report.emitted[0].tier_transition, Some(TierTransition::Shallower));
}

#[test]
fn bdd_scenario_cooldowns_persist_through_json_file() {
    // GIVEN a VIX spike and a file-backed store
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json");
    let store = JsonFileStore::new(&path);
    let spike = snapshot_with(|m| {
        if let Some(vix) = m.get_mut(symbols::VIX) {
            vix.change_1d_pct = Some(9.0);
        }
    });

    // WHEN a cycle runs
    let engine = engine();
    let first = engine.run_alert_cycle(&spike, &store, t0()).unwrap();

    // THEN the alert is emitted and recorded on disk
    assert_eq!(first.emitted.len(), 1);
    assert_eq!(first.emitted[0].rule_id, "VOLATILITY_SPIKE");
    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["version"], 1);
    assert!(doc["last_alerts"]["VOLATILITY_SPIKE"].is_string());

    // WHEN a fresh process runs again inside the 90 minute cooldown
    let second = AlertEngine::new(&EngineConfig::default())
        .run_alert_cycle(&spike, &JsonFileStore::new(&path), t0() + Duration::minutes(89))
        .unwrap();

    // THEN it is suppressed
    assert!(second.emitted.is_empty());
    assert_eq!(second.suppressed[0].remaining_secs, 60);

    // AND it fires again once the cooldown has elapsed
    let third = engine
        .run_alert_cycle(&spike, &store, t0() + Duration::minutes(90))
        .unwrap();
    assert_eq!(third.emitted.len(), 1);
}

#[test]
fn bdd_scenario_corrupt_store_aborts_cycle() {
    // GIVEN a store document that is not valid JSON
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state.json");
    fs::write(&path, "{\"version\": 1, \"last_alerts\": {\"A\": ").unwrap();

    // WHEN a cycle runs on a snapshot that would trigger alerts
    let result = engine().run_alert_cycle(&spy_drawdown(-12.0), &JsonFileStore::new(&path), t0());

    // THEN the cycle aborts with a corrupt-store error and nothing is written
    assert!(matches!(
        result,
        Err(CycleError::Store(StoreError::Corrupt { .. }))
    ));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "{\"version\": 1, \"last_alerts\": {\"A\": "
    );
}

#[test]
fn bdd_scenario_unwritable_store_withholds_alerts() {
    // GIVEN a store that rejects writes
    let store = MemoryStore::new();
    store.fail_saves(true);

    // WHEN a cycle decides to emit
    let result = engine().run_alert_cycle(&spy_drawdown(-4.1), &store, t0());

    // THEN the cycle fails and reports how many alerts were withheld
    match result {
        Err(CycleError::Dispatch(err)) => assert_eq!(err.withheld, 1),
        other => panic!("expected dispatch error, got {other:?}"),
    }

    // AND once the store recovers the same alert is still eligible
    store.fail_saves(false);
    let report = engine()
        .run_alert_cycle(&spy_drawdown(-4.1), &store, t0() + Duration::minutes(1))
        .unwrap();
    assert_eq!(report.emitted.len(), 1);
}

#[test]
fn bdd_scenario_missing_symbol_skips_only_dependent_rules() {
    // GIVEN gold is missing from the snapshot and HYG is falling sharply
    let store = MemoryStore::new();
    let snap = snapshot_with(|m| {
        m.remove(symbols::GLD);
        if let Some(hyg) = m.get_mut(symbols::HYG) {
            hyg.change_1d_pct = Some(-1.6);
        }
    });

    // WHEN a cycle runs
    let report = engine().run_alert_cycle(&snap, &store, t0()).unwrap();

    // THEN the gold rule is reported as skipped and the others still fire
    assert_eq!(report.rule_failures.len(), 1);
    assert_eq!(report.rule_failures[0].rule_id, "DEFENSIVE_HEDGE_BID");
    assert_eq!(report.emitted.len(), 1);
    assert_eq!(report.emitted[0].rule_id, "CREDIT_STRESS_INTRADAY");
    assert_eq!(report.emitted[0].severity, Severity::Critical);

    // AND the state was persisted regardless
    assert!(store.document().is_some());
}

#[test]
fn bdd_scenario_missing_regime_input_is_fatal() {
    // GIVEN a snapshot without the dollar index
    let store = MemoryStore::new();
    let snap = snapshot_with(|m| {
        m.remove(symbols::DXY);
    });

    // WHEN a cycle runs
    let result = engine().run_alert_cycle(&snap, &store, t0());

    // THEN classification fails and the store is untouched
    match result {
        Err(CycleError::Regime(err)) => assert_eq!(err.symbol, symbols::DXY),
        other => panic!("expected regime error, got {other:?}"),
    }
    assert!(store.document().is_none());
}

#[test]
fn bdd_scenario_defensive_regime_silences_risk_appetite() {
    // GIVEN a strong up day with growth leading
    let rally = |hyg_5d: f64| {
        snapshot_with(move |m| {
            for (sym, metrics) in m.iter_mut() {
                if sym == symbols::SPY {
                    metrics.change_1d_pct = Some(1.8);
                }
                if sym == symbols::QQQ {
                    metrics.change_1d_pct = Some(2.4);
                }
                if sym == symbols::HYG {
                    metrics.change_5d_pct = Some(hyg_5d);
                }
            }
        })
    };

    // WHEN the regime is NORMAL
    let report = engine().daily_report(&rally(0.5)).unwrap();

    // THEN risk appetite is reported
    assert!(report.candidates.iter().any(|c| c.rule_id == "RISK_APPETITE_POSITIVE"));

    // WHEN credit stress makes the regime DEFENSIVE
    let report = engine().daily_report(&rally(-3.5)).unwrap();

    // THEN the risk-appetite rule stays silent
    assert_eq!(report.regime.regime, Regime::Defensive);
    assert!(!report.candidates.iter().any(|c| c.rule_id == "RISK_APPETITE_POSITIVE"));
}

#[test]
fn bdd_scenario_daily_report_ignores_cooldowns() {
    // GIVEN a drawdown alert already emitted and on cooldown
    let engine = engine();
    let store = MemoryStore::new();
    let snap = spy_drawdown(-4.1);
    engine.run_alert_cycle(&snap, &store, t0()).unwrap();
    let before = store.document();

    // WHEN the daily report is built for the same snapshot
    let report = engine.daily_report(&snap).unwrap();

    // THEN the rule still appears and the store is unchanged
    assert_eq!(report.regime.regime, Regime::Normal);
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].rule_id, "SPY_DRAWDOWN");
    assert_eq!(report.guidance, Regime::Normal.guidance());
    assert_eq!(store.document(), before);
}

#[test]
fn bdd_scenario_config_override_raises_threshold() {
    // GIVEN a config raising the VIX spike threshold to 15%
    let config = WatchConfig::from_toml_str(
        r#"
        [rules.VOLATILITY_SPIKE]
        threshold = 15.0
        "#,
    )
    .unwrap()
    .build()
    .unwrap();
    let spike = snapshot_with(|m| {
        if let Some(vix) = m.get_mut(symbols::VIX) {
            vix.change_1d_pct = Some(12.0);
        }
    });

    // WHEN a 12% spike is evaluated
    let report = AlertEngine::new(&config)
        .run_alert_cycle(&spike, &MemoryStore::new(), t0())
        .unwrap();

    // THEN nothing fires, where the defaults would have alerted
    assert!(report.emitted.is_empty());
    let default_report = engine()
        .run_alert_cycle(&spike, &MemoryStore::new(), t0())
        .unwrap();
    assert_eq!(default_report.emitted.len(), 1);
}
