use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::metrics_window::roas;
use crate::recommendation::EffectWindow;

#[derive(Debug, Clone, Copy)]
pub struct PeriodTotals {
  pub spend_usd: f64,
  pub revenue_usd: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct EffectComputed {
  pub baseline_roas: f64,
  pub outcome_roas: f64,
  pub delta_abs: f64,
  pub delta_rel_pct: f64,
}

/// Inclusive date ranges compared around the first successful apply at `applied_dt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementPeriods {
  pub baseline_start: NaiveDate,
  pub baseline_end: NaiveDate,
  pub outcome_start: NaiveDate,
  pub outcome_end: NaiveDate,
}

/// The baseline is always the 7 days preceding the apply, regardless of the
/// outcome window length. Longer horizons are compared against the same short
/// pre-period; kept as-is for compatibility with historical effect rows.
pub fn measurement_periods(applied_dt: NaiveDate, window: EffectWindow) -> MeasurementPeriods {
  MeasurementPeriods {
    baseline_start: applied_dt - Duration::days(7),
    baseline_end: applied_dt - Duration::days(1),
    outcome_start: applied_dt,
    outcome_end: applied_dt + Duration::days(window.days() - 1),
  }
}

pub fn window_elapsed(applied_at: DateTime<Utc>, now: DateTime<Utc>, window: EffectWindow) -> bool {
  now - applied_at >= Duration::days(window.days())
}

pub fn compute_effect(baseline: PeriodTotals, outcome: PeriodTotals) -> EffectComputed {
  let baseline_roas = roas(baseline.revenue_usd, baseline.spend_usd);
  let outcome_roas = roas(outcome.revenue_usd, outcome.spend_usd);
  let delta_abs = outcome_roas - baseline_roas;

  let delta_rel_pct = if baseline_roas > 0.0 {
    delta_abs / baseline_roas * 100.0
  } else if outcome_roas > 0.0 {
    100.0
  } else {
    0.0
  };

  EffectComputed {
    baseline_roas,
    outcome_roas,
    delta_abs,
    delta_rel_pct,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn totals(spend: f64, revenue: f64) -> PeriodTotals {
    PeriodTotals {
      spend_usd: spend,
      revenue_usd: revenue,
    }
  }

  #[test]
  fn computes_absolute_and_relative_deltas() {
    // Baseline ROAS 2.0, outcome ROAS 3.0.
    let effect = compute_effect(totals(100.0, 200.0), totals(100.0, 300.0));
    assert!((effect.baseline_roas - 2.0).abs() < 1e-9);
    assert!((effect.outcome_roas - 3.0).abs() < 1e-9);
    assert!((effect.delta_abs - 1.0).abs() < 1e-9);
    assert!((effect.delta_rel_pct - 50.0).abs() < 1e-9);
  }

  #[test]
  fn zero_baseline_with_positive_outcome_is_full_gain() {
    let effect = compute_effect(totals(0.0, 0.0), totals(100.0, 150.0));
    assert_eq!(effect.baseline_roas, 0.0);
    assert_eq!(effect.delta_rel_pct, 100.0);
  }

  #[test]
  fn zero_everywhere_is_flat() {
    let effect = compute_effect(totals(0.0, 0.0), totals(0.0, 0.0));
    assert_eq!(effect.delta_abs, 0.0);
    assert_eq!(effect.delta_rel_pct, 0.0);
  }

  #[test]
  fn regression_yields_negative_deltas() {
    let effect = compute_effect(totals(100.0, 400.0), totals(100.0, 100.0));
    assert!((effect.delta_abs + 3.0).abs() < 1e-9);
    assert!((effect.delta_rel_pct + 75.0).abs() < 1e-9);
  }

  #[test]
  fn baseline_is_seven_days_for_every_window() {
    let applied = NaiveDate::from_ymd_opt(2026, 5, 20).unwrap();

    for window in [EffectWindow::T7, EffectWindow::T14, EffectWindow::T30] {
      let periods = measurement_periods(applied, window);
      assert_eq!(periods.baseline_start, NaiveDate::from_ymd_opt(2026, 5, 13).unwrap());
      assert_eq!(periods.baseline_end, NaiveDate::from_ymd_opt(2026, 5, 19).unwrap());
      assert_eq!(periods.outcome_start, applied);
      assert_eq!(
        periods.outcome_end,
        applied + Duration::days(window.days() - 1)
      );
    }

    let t30 = measurement_periods(applied, EffectWindow::T30);
    assert_eq!(t30.outcome_end, NaiveDate::from_ymd_opt(2026, 6, 18).unwrap());
  }

  #[test]
  fn window_elapsed_requires_full_horizon() {
    let applied = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();

    let too_soon = applied + Duration::days(6);
    assert!(!window_elapsed(applied, too_soon, EffectWindow::T7));

    let exactly = applied + Duration::days(7);
    assert!(window_elapsed(applied, exactly, EffectWindow::T7));

    let later = applied + Duration::days(20);
    assert!(window_elapsed(applied, later, EffectWindow::T14));
    assert!(!window_elapsed(applied, later, EffectWindow::T30));
  }
}
