use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::rule_engine::CandidateAction;

#[derive(Debug, Clone, Copy)]
pub struct EmissionGateConfig {
  pub cooldown_minutes: i64,
  pub dedup_hours: i64,
}

impl Default for EmissionGateConfig {
  fn default() -> Self {
    Self {
      cooldown_minutes: 60,
      dedup_hours: 24,
    }
  }
}

impl EmissionGateConfig {
  pub fn cooldown_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(self.cooldown_minutes)
  }

  pub fn dedup_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(self.dedup_hours)
  }
}

#[derive(Debug)]
pub struct GateOutcome {
  pub emitted: Vec<CandidateAction>,
  pub suppressed_all: bool,
  /// Candidates withheld by the cool-down; zero unless `suppressed_all`.
  pub suppressed_count: usize,
  /// Candidates dropped because their type already appeared recently.
  pub dropped_duplicates: usize,
}

/// Filters one evaluation cycle's candidates for a single (client, campaign).
///
/// Cool-down suppresses the entire cycle when a `proposed` recommendation was
/// created inside the window; this stops a storm of simultaneous candidates.
/// Per-type dedup then drops individual candidates whose type already appeared
/// recently in any status, so dismissed or expired advice does not reappear
/// immediately.
pub fn gate_candidates(
  candidates: Vec<CandidateAction>,
  last_proposed_at: Option<DateTime<Utc>>,
  recent_types: &HashSet<String>,
  now: DateTime<Utc>,
  config: &EmissionGateConfig,
) -> GateOutcome {
  if candidates.is_empty() {
    return GateOutcome {
      emitted: Vec::new(),
      suppressed_all: false,
      suppressed_count: 0,
      dropped_duplicates: 0,
    };
  }

  if let Some(created_at) = last_proposed_at {
    if created_at >= config.cooldown_cutoff(now) {
      return GateOutcome {
        emitted: Vec::new(),
        suppressed_all: true,
        suppressed_count: candidates.len(),
        dropped_duplicates: 0,
      };
    }
  }

  let mut emitted = Vec::new();
  let mut dropped = 0usize;
  for candidate in candidates {
    if recent_types.contains(candidate.action_type()) {
      dropped += 1;
    } else {
      emitted.push(candidate);
    }
  }

  GateOutcome {
    emitted,
    suppressed_all: false,
    suppressed_count: 0,
    dropped_duplicates: dropped,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metrics_window::MetricSummary;
  use crate::rule_engine::{evaluate_rules, RuleThresholds};
  use chrono::TimeZone;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap()
  }

  fn scale_up_candidates() -> Vec<CandidateAction> {
    let summary = MetricSummary {
      spend: 200.0,
      revenue: 600.0,
      clicks: 0,
      impressions: 0,
      conversions: 0,
      avg_frequency: 0.0,
    };
    evaluate_rules(&summary, &RuleThresholds::default())
  }

  #[test]
  fn cooldown_suppresses_whole_cycle() {
    let candidates = scale_up_candidates();
    assert_eq!(candidates.len(), 1);

    // Proposed 5 minutes ago with a 60 minute cool-down.
    let last = Some(now() - Duration::minutes(5));
    let outcome = gate_candidates(
      candidates,
      last,
      &HashSet::new(),
      now(),
      &EmissionGateConfig::default(),
    );
    assert!(outcome.suppressed_all);
    assert!(outcome.emitted.is_empty());
    // The two counters stay distinct: cool-down suppression is not dedup.
    assert_eq!(outcome.suppressed_count, 1);
    assert_eq!(outcome.dropped_duplicates, 0);
  }

  #[test]
  fn stale_proposal_does_not_trigger_cooldown() {
    let last = Some(now() - Duration::minutes(61));
    let outcome = gate_candidates(
      scale_up_candidates(),
      last,
      &HashSet::new(),
      now(),
      &EmissionGateConfig::default(),
    );
    assert!(!outcome.suppressed_all);
    assert_eq!(outcome.emitted.len(), 1);
    assert_eq!(outcome.emitted[0].action_type(), "scale_up");
    assert_eq!(outcome.emitted[0].priority, 80);
  }

  #[test]
  fn per_type_dedup_drops_only_matching_candidates() {
    let mut recent = HashSet::new();
    recent.insert("scale_up".to_string());

    let outcome = gate_candidates(
      scale_up_candidates(),
      None,
      &recent,
      now(),
      &EmissionGateConfig::default(),
    );
    assert!(!outcome.suppressed_all);
    assert!(outcome.emitted.is_empty());
    assert_eq!(outcome.suppressed_count, 0);
    assert_eq!(outcome.dropped_duplicates, 1);

    // A different recent type leaves the candidate untouched.
    let mut recent = HashSet::new();
    recent.insert("cap_frequency".to_string());
    let outcome = gate_candidates(
      scale_up_candidates(),
      None,
      &recent,
      now(),
      &EmissionGateConfig::default(),
    );
    assert_eq!(outcome.emitted.len(), 1);
    assert_eq!(outcome.dropped_duplicates, 0);
  }

  #[test]
  fn empty_cycle_reports_nothing_suppressed() {
    let outcome = gate_candidates(
      Vec::new(),
      Some(now()),
      &HashSet::new(),
      now(),
      &EmissionGateConfig::default(),
    );
    assert!(!outcome.suppressed_all);
    assert!(outcome.emitted.is_empty());
    assert_eq!(outcome.suppressed_count, 0);
    assert_eq!(outcome.dropped_duplicates, 0);
  }
}
