use crate::metrics_window::MetricSummary;
use crate::recommendation::{ActionPayload, EffectWindow, ExpectedEffect, Urgency};

/// Threshold set for the fixed rules. The widened `volatile()` set exists for
/// the demo simulator; production callers inject `default()` or their own.
#[derive(Debug, Clone)]
pub struct RuleThresholds {
  pub scale_up_min_spend: f64,
  pub scale_up_min_roas: f64,
  pub scale_up_pct: f64,
  pub scale_up_priority: i32,

  pub scale_down_min_spend: f64,
  pub scale_down_max_roas: f64,
  pub scale_down_pct: f64,
  pub scale_down_priority: i32,

  pub rotate_min_impressions: i64,
  pub rotate_max_ctr: f64,
  pub rotate_variants: u32,
  pub rotate_priority: i32,

  pub cap_min_frequency: f64,
  pub cap_max_freq: f64,
  pub cap_priority: i32,
}

impl Default for RuleThresholds {
  fn default() -> Self {
    Self {
      scale_up_min_spend: 50.0,
      scale_up_min_roas: 2.5,
      scale_up_pct: 20.0,
      scale_up_priority: 80,

      scale_down_min_spend: 100.0,
      scale_down_max_roas: 1.0,
      scale_down_pct: 15.0,
      scale_down_priority: 75,

      rotate_min_impressions: 4000,
      rotate_max_ctr: 0.010,
      rotate_variants: 2,
      rotate_priority: 60,

      cap_min_frequency: 3.5,
      cap_max_freq: 3.0,
      cap_priority: 55,
    }
  }
}

impl RuleThresholds {
  pub fn volatile() -> Self {
    Self {
      scale_up_min_roas: 1.8,
      scale_up_pct: 30.0,
      scale_up_priority: 85,

      scale_down_max_roas: 1.2,
      scale_down_pct: 20.0,
      scale_down_priority: 80,

      rotate_max_ctr: 0.015,
      rotate_variants: 3,
      rotate_priority: 65,

      cap_min_frequency: 3.0,
      cap_max_freq: 2.8,

      ..Self::default()
    }
  }

  pub fn for_mode(volatility_mode: bool) -> Self {
    if volatility_mode {
      Self::volatile()
    } else {
      Self::default()
    }
  }
}

#[derive(Debug, Clone)]
pub struct CandidateAction {
  pub payload: ActionPayload,
  pub reason: String,
  pub priority: i32,
  pub confidence: f64,
  pub urgency: Urgency,
  pub expected: ExpectedEffect,
}

impl CandidateAction {
  pub fn action_type(&self) -> &'static str {
    self.payload.action_type()
  }
}

/// Applies the fixed threshold rules to one campaign's 7-day summary.
/// Deterministic; more than one rule may fire. Output is ordered by
/// descending priority.
pub fn evaluate_rules(summary: &MetricSummary, thresholds: &RuleThresholds) -> Vec<CandidateAction> {
  let mut out = Vec::new();
  let roas = summary.roas();
  let ctr = summary.ctr();

  if summary.spend > thresholds.scale_up_min_spend && roas >= thresholds.scale_up_min_roas {
    out.push(CandidateAction {
      payload: ActionPayload::ScaleUp {
        pct: thresholds.scale_up_pct,
      },
      reason: format!(
        "7d ROAS {:.2} at ${:.2} spend supports a {:.0}% budget increase",
        roas, summary.spend, thresholds.scale_up_pct
      ),
      priority: thresholds.scale_up_priority,
      confidence: 0.7,
      urgency: Urgency::Med,
      expected: ExpectedEffect {
        kpi: "roas".to_string(),
        delta_abs: None,
        delta_rel: Some(10.0),
        window: EffectWindow::T7,
      },
    });
  }

  if summary.spend > thresholds.scale_down_min_spend && roas > 0.0 && roas < thresholds.scale_down_max_roas {
    out.push(CandidateAction {
      payload: ActionPayload::ScaleDown {
        pct: thresholds.scale_down_pct,
      },
      reason: format!(
        "7d ROAS {:.2} below break-even at ${:.2} spend; cut budget {:.0}%",
        roas, summary.spend, thresholds.scale_down_pct
      ),
      priority: thresholds.scale_down_priority,
      confidence: 0.7,
      urgency: Urgency::High,
      expected: ExpectedEffect {
        kpi: "roas".to_string(),
        delta_abs: None,
        delta_rel: Some(15.0),
        window: EffectWindow::T7,
      },
    });
  }

  if summary.impressions > thresholds.rotate_min_impressions && ctr < thresholds.rotate_max_ctr {
    out.push(CandidateAction {
      payload: ActionPayload::RotateCreatives {
        variants: thresholds.rotate_variants,
      },
      reason: format!(
        "CTR {:.2}% over {} impressions; test {} fresh creative variants",
        ctr * 100.0,
        summary.impressions,
        thresholds.rotate_variants
      ),
      priority: thresholds.rotate_priority,
      confidence: 0.6,
      urgency: Urgency::Med,
      expected: ExpectedEffect {
        kpi: "ctr".to_string(),
        delta_abs: None,
        delta_rel: Some(20.0),
        window: EffectWindow::T14,
      },
    });
  }

  if summary.avg_frequency >= thresholds.cap_min_frequency {
    out.push(CandidateAction {
      payload: ActionPayload::CapFrequency {
        max_freq: thresholds.cap_max_freq,
      },
      reason: format!(
        "Average frequency {:.1} signals fatigue; cap at {:.1}",
        summary.avg_frequency, thresholds.cap_max_freq
      ),
      priority: thresholds.cap_priority,
      confidence: 0.6,
      urgency: Urgency::Low,
      expected: ExpectedEffect {
        kpi: "frequency".to_string(),
        delta_abs: Some(thresholds.cap_max_freq - summary.avg_frequency),
        delta_rel: None,
        window: EffectWindow::T7,
      },
    });
  }

  out.sort_by(|a, b| b.priority.cmp(&a.priority));
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn summary(spend: f64, revenue: f64, clicks: i64, impressions: i64, frequency: f64) -> MetricSummary {
    MetricSummary {
      spend,
      revenue,
      clicks,
      impressions,
      conversions: 0,
      avg_frequency: frequency,
    }
  }

  fn types(candidates: &[CandidateAction]) -> Vec<&'static str> {
    candidates.iter().map(|c| c.action_type()).collect()
  }

  #[test]
  fn scale_up_fires_on_strong_roas() {
    let s = summary(200.0, 600.0, 100, 20000, 1.0);
    let candidates = evaluate_rules(&s, &RuleThresholds::default());
    assert_eq!(types(&candidates), vec!["scale_up"]);
    assert_eq!(candidates[0].priority, 80);
    assert_eq!(candidates[0].payload, ActionPayload::ScaleUp { pct: 20.0 });
  }

  #[test]
  fn scale_up_bounds_are_exact() {
    // spend must be strictly above 50.
    let s = summary(50.0, 200.0, 0, 0, 0.0);
    assert!(evaluate_rules(&s, &RuleThresholds::default()).is_empty());
    // ROAS 2.5 is inclusive.
    let s = summary(100.0, 250.0, 0, 0, 0.0);
    assert_eq!(types(&evaluate_rules(&s, &RuleThresholds::default())), vec!["scale_up"]);
  }

  #[test]
  fn zero_spend_never_divides() {
    let s = summary(0.0, 500.0, 10, 100, 0.0);
    assert!(evaluate_rules(&s, &RuleThresholds::default()).is_empty());
  }

  #[test]
  fn scale_down_needs_positive_roas_below_cutoff() {
    let s = summary(150.0, 90.0, 0, 0, 0.0);
    let candidates = evaluate_rules(&s, &RuleThresholds::default());
    assert_eq!(types(&candidates), vec!["scale_down"]);
    assert_eq!(candidates[0].priority, 75);

    // ROAS exactly 1.0 does not fire.
    let s = summary(150.0, 150.0, 0, 0, 0.0);
    assert!(evaluate_rules(&s, &RuleThresholds::default()).is_empty());
    // Zero revenue means ROAS 0, which is excluded.
    let s = summary(150.0, 0.0, 0, 0, 0.0);
    assert!(evaluate_rules(&s, &RuleThresholds::default()).is_empty());
  }

  #[test]
  fn rotate_creatives_fires_on_low_ctr() {
    let s = summary(0.0, 0.0, 30, 5000, 0.0);
    let candidates = evaluate_rules(&s, &RuleThresholds::default());
    assert_eq!(types(&candidates), vec!["rotate_creatives"]);
    assert_eq!(candidates[0].payload, ActionPayload::RotateCreatives { variants: 2 });

    // CTR exactly 0.010 does not fire.
    let s = summary(0.0, 0.0, 50, 5000, 0.0);
    assert!(evaluate_rules(&s, &RuleThresholds::default()).is_empty());
  }

  #[test]
  fn cap_frequency_fires_at_threshold() {
    let s = summary(0.0, 0.0, 0, 0, 3.5);
    let candidates = evaluate_rules(&s, &RuleThresholds::default());
    assert_eq!(types(&candidates), vec!["cap_frequency"]);
    assert_eq!(candidates[0].priority, 55);
    assert_eq!(candidates[0].payload, ActionPayload::CapFrequency { max_freq: 3.0 });

    let s = summary(0.0, 0.0, 0, 0, 3.49);
    assert!(evaluate_rules(&s, &RuleThresholds::default()).is_empty());
  }

  #[test]
  fn volatile_mode_widens_thresholds_and_payloads() {
    let thresholds = RuleThresholds::volatile();

    let s = summary(60.0, 120.0, 0, 0, 0.0); // ROAS 2.0
    let candidates = evaluate_rules(&s, &thresholds);
    assert_eq!(types(&candidates), vec!["scale_up"]);
    assert_eq!(candidates[0].payload, ActionPayload::ScaleUp { pct: 30.0 });
    assert_eq!(candidates[0].priority, 85);

    let s = summary(0.0, 0.0, 0, 0, 3.0);
    let candidates = evaluate_rules(&s, &thresholds);
    assert_eq!(types(&candidates), vec!["cap_frequency"]);
    assert_eq!(candidates[0].payload, ActionPayload::CapFrequency { max_freq: 2.8 });
    assert_eq!(candidates[0].priority, 55);
  }

  #[test]
  fn volatile_underperformer_scenario_fires_three_rules() {
    // ROAS 0.5, CTR 0.008, frequency 4.0 in volatility mode.
    let s = summary(120.0, 60.0, 400, 50000, 4.0);
    let candidates = evaluate_rules(&s, &RuleThresholds::volatile());

    let found = types(&candidates);
    assert_eq!(found, vec!["scale_down", "rotate_creatives", "cap_frequency"]);
    assert!(!found.contains(&"scale_up"));
  }

  #[test]
  fn spend_floor_for_scale_down_is_strict() {
    // At exactly the floor the rule stays quiet even with poor ROAS. An
    // earlier worked scenario fired scale_down at spend exactly 100, which
    // contradicted the rule's strictly-greater floor; the exclusive floor
    // was kept deliberately. Loosening this to >= widens which campaigns
    // get downscaled.
    let s = summary(100.0, 50.0, 400, 50000, 4.0);
    let found = types(&evaluate_rules(&s, &RuleThresholds::volatile()));
    assert_eq!(found, vec!["rotate_creatives", "cap_frequency"]);
  }

  #[test]
  fn candidates_are_ordered_by_descending_priority() {
    let s = summary(150.0, 90.0, 400, 50000, 4.0);
    let candidates = evaluate_rules(&s, &RuleThresholds::volatile());
    let priorities: Vec<i32> = candidates.iter().map(|c| c.priority).collect();
    let mut sorted = priorities.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(priorities, sorted);
  }
}
