use chrono::{Duration, Utc};
use vercel_runtime::Error;

use adpilot_rust::db::{emit_gated_recommendations, fetch_campaign, fetch_campaign_daily_metrics, get_pool};
use adpilot_rust::emission_gate::EmissionGateConfig;
use adpilot_rust::metrics_window::summarize;
use adpilot_rust::rule_engine::{evaluate_rules, RuleThresholds};

fn arg_value(args: &[String], name: &str) -> Option<String> {
  let idx = args.iter().position(|a| a == name)?;
  args.get(idx + 1).cloned()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  let args: Vec<String> = std::env::args().collect();

  let client_id = arg_value(&args, "--client-id").unwrap_or_default();
  let campaign_id = arg_value(&args, "--campaign-id").unwrap_or_default();
  let volatile = args.iter().any(|a| a == "--volatile");

  if client_id.is_empty() || campaign_id.is_empty() {
    eprintln!("Missing required --client-id / --campaign-id");
    eprintln!("Example: cargo run --bin local_evaluate_once -- --client-id cl-1 --campaign-id cmp-1 --volatile");
    std::process::exit(2);
  }

  let pool = get_pool().await?;

  let campaign = match fetch_campaign(pool, &campaign_id).await? {
    Some(campaign) => campaign,
    None => {
      eprintln!("Campaign not found: {campaign_id}");
      std::process::exit(1);
    }
  };

  if campaign.client_id != client_id {
    eprintln!("Campaign {campaign_id} belongs to client {}, not {client_id}", campaign.client_id);
    std::process::exit(1);
  }

  let now = Utc::now();
  let end_dt = now.date_naive();
  let start_dt = end_dt - Duration::days(6);

  let rows = fetch_campaign_daily_metrics(pool, &campaign.id, start_dt, end_dt).await?;
  let summary = summarize(&rows);
  println!(
    "summary spend={:.2} revenue={:.2} roas={:.2} ctr={:.4} avg_frequency={:.2} days={}",
    summary.spend,
    summary.revenue,
    summary.roas(),
    summary.ctr(),
    summary.avg_frequency,
    rows.len()
  );

  let candidates = evaluate_rules(&summary, &RuleThresholds::for_mode(volatile));
  for candidate in &candidates {
    println!(
      "candidate type={} priority={} reason={:?}",
      candidate.action_type(),
      candidate.priority,
      candidate.reason
    );
  }

  let outcome = emit_gated_recommendations(
    pool,
    &campaign.client_id,
    &campaign.id,
    &campaign.channel,
    candidates,
    &EmissionGateConfig::default(),
    now,
  )
  .await?;

  println!(
    "ok=true emitted={} suppressed={} suppressed_count={} dropped_duplicates={}",
    outcome.emitted.len(),
    outcome.suppressed_all,
    outcome.suppressed_count,
    outcome.dropped_duplicates
  );

  Ok(())
}
