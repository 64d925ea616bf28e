use chrono::NaiveDate;

/// One day of aggregated campaign performance, as stored by the import layer.
#[derive(Debug, Clone)]
pub struct DailyMetricRow {
  pub dt: NaiveDate,
  pub impressions: i64,
  pub clicks: i64,
  pub spend_usd: f64,
  pub conversions: i64,
  pub revenue_usd: f64,
  pub frequency: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricSummary {
  pub spend: f64,
  pub revenue: f64,
  pub clicks: i64,
  pub impressions: i64,
  pub conversions: i64,
  pub avg_frequency: f64,
}

impl MetricSummary {
  pub fn roas(&self) -> f64 {
    roas(self.revenue, self.spend)
  }

  pub fn ctr(&self) -> f64 {
    ctr(self.clicks, self.impressions)
  }
}

pub fn roas(revenue: f64, spend: f64) -> f64 {
  if spend > 0.0 {
    revenue / spend
  } else {
    0.0
  }
}

pub fn ctr(clicks: i64, impressions: i64) -> f64 {
  if impressions > 0 {
    (clicks as f64) / (impressions as f64)
  } else {
    0.0
  }
}

pub fn summarize(rows: &[DailyMetricRow]) -> MetricSummary {
  let mut summary = MetricSummary::default();
  if rows.is_empty() {
    return summary;
  }

  let mut frequency_sum = 0.0;
  for r in rows {
    summary.spend += r.spend_usd;
    summary.revenue += r.revenue_usd;
    summary.clicks += r.clicks;
    summary.impressions += r.impressions;
    summary.conversions += r.conversions;
    frequency_sum += r.frequency;
  }
  summary.avg_frequency = frequency_sum / (rows.len() as f64);
  summary
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(dt: NaiveDate, spend: f64, revenue: f64) -> DailyMetricRow {
    DailyMetricRow {
      dt,
      impressions: 1000,
      clicks: 20,
      spend_usd: spend,
      conversions: 2,
      revenue_usd: revenue,
      frequency: 2.0,
    }
  }

  #[test]
  fn roas_and_ctr_are_zero_on_zero_denominator() {
    assert_eq!(roas(100.0, 0.0), 0.0);
    assert_eq!(ctr(50, 0), 0.0);

    let summary = MetricSummary {
      spend: 0.0,
      revenue: 100.0,
      clicks: 5,
      impressions: 0,
      conversions: 0,
      avg_frequency: 0.0,
    };
    assert_eq!(summary.roas(), 0.0);
    assert_eq!(summary.ctr(), 0.0);
  }

  #[test]
  fn summarize_sums_and_averages_across_days() {
    let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    let rows: Vec<DailyMetricRow> = (0..7)
      .map(|i| row(start + chrono::Duration::days(i), 10.0, 30.0))
      .collect();

    let summary = summarize(&rows);
    assert_eq!(summary.spend, 70.0);
    assert_eq!(summary.revenue, 210.0);
    assert_eq!(summary.clicks, 140);
    assert_eq!(summary.impressions, 7000);
    assert_eq!(summary.conversions, 14);
    assert!((summary.avg_frequency - 2.0).abs() < 1e-9);
    assert!((summary.roas() - 3.0).abs() < 1e-9);
  }

  #[test]
  fn summarize_of_empty_input_is_all_zero() {
    let summary = summarize(&[]);
    assert_eq!(summary.spend, 0.0);
    assert_eq!(summary.avg_frequency, 0.0);
    assert_eq!(summary.roas(), 0.0);
  }
}
