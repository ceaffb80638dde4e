//! RegimeWatch Core — market regime classification and alert gating.
//!
//! This crate provides:
//! - Immutable indicator snapshots with derived metrics
//! - NORMAL/DEFENSIVE regime classification
//! - A data-driven rule registry (thresholds, conjunctions, tier ladders)
//! - Per-key cooldown state with a JSON file backend
//! - Cooldown-gated alert dispatch ordered by severity
//! - TOML configuration with per-rule overrides
//!
//! The crate never fetches market data or formats messages; snapshots come
//! in and structured alerts go out.

pub mod alert;
pub mod config;
pub mod cooldown;
pub mod cycle;
pub mod dispatch;
pub mod error;
pub mod regime;
pub mod rules;
pub mod snapshot;

pub use alert::{
    Candidate, Category, CooldownKey, EmittedAlert, Payload, Severity, TierRef, TierTransition,
};
pub use config::{
    CooldownPolicy, EngineConfig, LadderPolicy, RegimeThresholds, RuleOverride, WatchConfig,
};
pub use cooldown::{CooldownBackend, CooldownState, CooldownStatus, JsonFileStore, MemoryStore};
pub use cycle::{AlertEngine, CycleReport, DailyReport, RuleFailure};
pub use dispatch::{AlertDispatcher, DispatchOutcome, SuppressedAlert};
pub use error::{
    ConfigValidationError, CycleError, DispatchError, MissingMetricError, RuleEvaluationError,
    StoreError,
};
pub use regime::{Regime, RegimeClassifier, RegimeCondition, RegimeResult, RegimeTrigger};
pub use rules::catalog::default_rules;
pub use rules::{Comparison, Condition, MetricRef, RuleKind, RuleRegistry, RuleSpec, Tier};
pub use snapshot::{IndicatorSnapshot, Metric, SymbolMetrics, Window};
