//! Cooldown gating for candidate alerts.
//!
//! Dispatch is sequential: each emission is recorded in the state before the
//! next candidate is checked, so a later candidate with the same key in the
//! same cycle sees it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::alert::{Candidate, CooldownKey, EmittedAlert, Severity, TierTransition};
use crate::config::CooldownPolicy;
use crate::cooldown::CooldownState;

/// A candidate held back by its cooldown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuppressedAlert {
    pub rule_id: String,
    pub key: CooldownKey,
    pub severity: Severity,
    pub last_fired: Option<DateTime<Utc>>,
    pub remaining_secs: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Most severe first; registry order within a severity.
    pub emitted: Vec<EmittedAlert>,
    /// In registry order.
    pub suppressed: Vec<SuppressedAlert>,
}

#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    policy: CooldownPolicy,
}

impl AlertDispatcher {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    /// Gate `candidates` against `state`, recording every emission at `now`.
    pub fn dispatch(
        &self,
        candidates: Vec<Candidate>,
        state: &mut CooldownState,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut emitted_keys = HashSet::new();

        for candidate in candidates {
            let key = candidate.cooldown_key();
            let cooldown = self.policy.duration(candidate.severity);
            let last = state.get_last_fired(&key);

            let ready = match last {
                Some(at) => now - at >= cooldown,
                None => true,
            };
            if !ready || emitted_keys.contains(&key) {
                let remaining = match last {
                    Some(at) => (cooldown - (now - at)).num_seconds().max(0),
                    None => cooldown.num_seconds(),
                };
                debug!(key = %key, remaining_secs = remaining, "alert suppressed by cooldown");
                outcome.suppressed.push(SuppressedAlert {
                    rule_id: candidate.rule_id,
                    key,
                    severity: candidate.severity,
                    last_fired: last,
                    remaining_secs: remaining,
                });
                continue;
            }

            let transition = tier_transition(&candidate, state, &emitted_keys);
            state.record_fired(key.clone(), now);
            info!(key = %key, severity = %candidate.severity, "alert emitted");
            emitted_keys.insert(key);
            outcome
                .emitted
                .push(EmittedAlert::from_candidate(candidate, now, transition));
        }

        // stable: registry order survives within a severity
        outcome.emitted.sort_by(|a, b| b.severity.cmp(&a.severity));
        outcome
    }
}

/// Relation of a ladder candidate to the ladder's most recently fired tier.
/// Tiers emitted earlier in the same dispatch are not counted.
fn tier_transition(
    candidate: &Candidate,
    state: &CooldownState,
    emitted_this_cycle: &HashSet<CooldownKey>,
) -> Option<TierTransition> {
    let tier = candidate.tier.as_ref()?;

    let latest = candidate
        .ladder
        .iter()
        .enumerate()
        .filter_map(|(index, label)| {
            let key = CooldownKey::for_rule(&candidate.rule_id, Some(label));
            if emitted_this_cycle.contains(&key) {
                return None;
            }
            state.get_last_fired(&key).map(|at| (at, index))
        })
        .max();

    Some(match latest {
        None => TierTransition::First,
        Some((_, previous)) if tier.index > previous => TierTransition::Deeper,
        Some((_, previous)) if tier.index == previous => TierTransition::Same,
        Some(_) => TierTransition::Shallower,
    })
}
