//! One evaluation cycle: classify, evaluate, gate, persist.
//!
//! The cooldown state is loaded once before dispatch and saved once after
//! it, whether or not individual rules failed. Alerts are only returned
//! once the save has succeeded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::alert::{Candidate, EmittedAlert};
use crate::config::EngineConfig;
use crate::cooldown::CooldownBackend;
use crate::dispatch::{AlertDispatcher, SuppressedAlert};
use crate::error::{CycleError, DispatchError, RuleEvaluationError};
use crate::regime::{RegimeClassifier, RegimeResult};
use crate::rules::RuleRegistry;
use crate::snapshot::IndicatorSnapshot;

/// A rule skipped during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFailure {
    pub rule_id: String,
    pub reason: String,
}

impl From<&RuleEvaluationError> for RuleFailure {
    fn from(err: &RuleEvaluationError) -> Self {
        Self {
            rule_id: err.rule_id().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result of [`AlertEngine::run_alert_cycle`].
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub snapshot_timestamp: DateTime<Utc>,
    pub ran_at: DateTime<Utc>,
    pub regime: RegimeResult,
    /// Most severe first.
    pub emitted: Vec<EmittedAlert>,
    pub suppressed: Vec<SuppressedAlert>,
    pub rule_failures: Vec<RuleFailure>,
}

/// Result of [`AlertEngine::daily_report`]. Cooldowns are not consulted.
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub timestamp: DateTime<Utc>,
    pub regime: RegimeResult,
    pub guidance: String,
    /// Every triggered rule, most severe first.
    pub candidates: Vec<Candidate>,
    pub rule_failures: Vec<RuleFailure>,
}

/// Classifier, registry and dispatcher built from one configuration.
#[derive(Debug, Clone)]
pub struct AlertEngine {
    classifier: RegimeClassifier,
    registry: RuleRegistry,
    dispatcher: AlertDispatcher,
}

impl AlertEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            classifier: RegimeClassifier::new(config.regime().clone()),
            registry: RuleRegistry::from_config(config),
            dispatcher: AlertDispatcher::new(*config.cooldowns()),
        }
    }

    pub fn classifier(&self) -> &RegimeClassifier {
        &self.classifier
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Run one alerting cycle at `now` against `store`.
    ///
    /// A corrupt store aborts before anything is dispatched. A failed save
    /// returns [`DispatchError`] and withholds the alerts decided this cycle.
    pub fn run_alert_cycle(
        &self,
        snapshot: &IndicatorSnapshot,
        store: &dyn CooldownBackend,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, CycleError> {
        let regime = self.classifier.classify(snapshot)?;
        info!(
            regime = %regime.regime,
            conditions = ?regime.condition_names(),
            "regime classified"
        );

        let mut state = store.load()?;
        let evaluated = self.registry.evaluate_all(snapshot, regime.regime);
        let rule_failures: Vec<RuleFailure> =
            evaluated.failures.iter().map(RuleFailure::from).collect();

        let outcome = self.dispatcher.dispatch(evaluated.candidates, &mut state, now);

        if let Err(source) = store.save(&state) {
            warn!(
                store = %store.location(),
                withheld = outcome.emitted.len(),
                error = %source,
                "cooldown state not persisted"
            );
            return Err(DispatchError {
                withheld: outcome.emitted.len(),
                source,
            }
            .into());
        }

        info!(
            emitted = outcome.emitted.len(),
            suppressed = outcome.suppressed.len(),
            failed_rules = rule_failures.len(),
            "alert cycle complete"
        );

        Ok(CycleReport {
            snapshot_timestamp: snapshot.timestamp(),
            ran_at: now,
            regime,
            emitted: outcome.emitted,
            suppressed: outcome.suppressed,
            rule_failures,
        })
    }

    /// Regime plus every rule currently triggered, ignoring cooldowns.
    /// Touches no cooldown state.
    pub fn daily_report(&self, snapshot: &IndicatorSnapshot) -> Result<DailyReport, CycleError> {
        let regime = self.classifier.classify(snapshot)?;
        let evaluated = self.registry.evaluate_all(snapshot, regime.regime);

        let mut candidates = evaluated.candidates;
        candidates.sort_by(|a, b| b.severity.cmp(&a.severity));

        info!(
            regime = %regime.regime,
            triggered = candidates.len(),
            "daily report built"
        );

        Ok(DailyReport {
            timestamp: snapshot.timestamp(),
            guidance: regime.regime.guidance().to_string(),
            regime,
            candidates,
            rule_failures: evaluated.failures.iter().map(RuleFailure::from).collect(),
        })
    }
}
