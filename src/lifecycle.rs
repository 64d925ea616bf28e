use chrono::{DateTime, Utc};
use sha2::Digest;
use sqlx::MySqlPool;
use vercel_runtime::Error;

use crate::db::{fetch_recommendation, record_action_and_transition, RecommendationRow};
use crate::recommendation::RecommendationStatus;

fn hex_digest(input: &str) -> String {
  let hash = sha2::Sha256::digest(input.as_bytes());
  format!("{:x}", hash)
}

pub fn apply_idempotency_key(recommendation_id: i64, payload_json: &str) -> String {
  hex_digest(&format!("apply:{recommendation_id}:{payload_json}"))
}

pub fn dismiss_idempotency_key(recommendation_id: i64, reason: &str) -> String {
  hex_digest(&format!("dismiss:{recommendation_id}:{reason}"))
}

pub fn snooze_idempotency_key(recommendation_id: i64, until: DateTime<Utc>, note: &str) -> String {
  hex_digest(&format!(
    "snooze:{recommendation_id}:{}:{note}",
    until.timestamp_millis()
  ))
}

/// Stand-in for the real ad-platform call; the surrounding system only
/// simulates platform writes. Runs before the transaction so a failure
/// leaves the recommendation untouched.
pub fn simulate_platform_apply(
  campaign_id: Option<&str>,
  payload: &serde_json::Value,
) -> Result<serde_json::Value, String> {
  if payload.get("simulate_failure").and_then(|v| v.as_bool()) == Some(true) {
    return Err("ad platform rejected the change".to_string());
  }
  Ok(serde_json::json!({
    "platform": "simulated",
    "accepted": true,
    "campaign_id": campaign_id,
  }))
}

#[derive(Debug, Clone)]
pub enum LifecycleOutcome {
  NotFound,
  DownstreamFailed { message: String },
  Ok {
    status: String,
    duplicate: bool,
    valid_until: Option<DateTime<Utc>>,
  },
}

fn terminal_noop(rec: &RecommendationRow) -> Option<LifecycleOutcome> {
  let status = RecommendationStatus::parse(&rec.status)?;
  if status.is_terminal() {
    // Retried actions against settled recommendations resolve to success.
    Some(LifecycleOutcome::Ok {
      status: rec.status.clone(),
      duplicate: true,
      valid_until: rec.valid_until,
    })
  } else {
    None
  }
}

fn request_snapshot(
  action: &str,
  actor_id: &str,
  correlation_id: Option<&str>,
  extra: serde_json::Value,
) -> String {
  serde_json::json!({
    "action": action,
    "actor_id": actor_id,
    "correlation_id": correlation_id,
    "params": extra,
  })
  .to_string()
}

pub async fn apply_recommendation(
  pool: &MySqlPool,
  recommendation_id: i64,
  actor_id: &str,
  payload: Option<serde_json::Value>,
  correlation_id: Option<&str>,
) -> Result<LifecycleOutcome, Error> {
  let rec = match fetch_recommendation(pool, recommendation_id).await? {
    Some(rec) => rec,
    None => return Ok(LifecycleOutcome::NotFound),
  };
  if let Some(outcome) = terminal_noop(&rec) {
    return Ok(outcome);
  }

  let payload = payload.unwrap_or(serde_json::Value::Null);
  let payload_json = payload.to_string();

  let platform_response = match simulate_platform_apply(rec.campaign_id.as_deref(), &payload) {
    Ok(response) => response,
    Err(message) => return Ok(LifecycleOutcome::DownstreamFailed { message }),
  };

  let key = apply_idempotency_key(recommendation_id, &payload_json);
  let request_json = request_snapshot("apply", actor_id, correlation_id, payload);
  let response_json = platform_response.to_string();
  let write = record_action_and_transition(
    pool,
    recommendation_id,
    "apply",
    actor_id,
    &key,
    &request_json,
    Some(response_json.as_str()),
    Some(RecommendationStatus::Applied.as_str()),
    None,
  )
  .await?;

  Ok(LifecycleOutcome::Ok {
    status: RecommendationStatus::Applied.as_str().to_string(),
    duplicate: write.duplicate,
    valid_until: rec.valid_until,
  })
}

pub async fn dismiss_recommendation(
  pool: &MySqlPool,
  recommendation_id: i64,
  actor_id: &str,
  reason: Option<&str>,
  correlation_id: Option<&str>,
) -> Result<LifecycleOutcome, Error> {
  let rec = match fetch_recommendation(pool, recommendation_id).await? {
    Some(rec) => rec,
    None => return Ok(LifecycleOutcome::NotFound),
  };
  if let Some(outcome) = terminal_noop(&rec) {
    return Ok(outcome);
  }

  let reason = reason.unwrap_or("");
  let key = dismiss_idempotency_key(recommendation_id, reason);
  let request_json = request_snapshot(
    "dismiss",
    actor_id,
    correlation_id,
    serde_json::json!({"reason": reason}),
  );
  let write = record_action_and_transition(
    pool,
    recommendation_id,
    "dismiss",
    actor_id,
    &key,
    &request_json,
    None,
    Some(RecommendationStatus::Dismissed.as_str()),
    None,
  )
  .await?;

  Ok(LifecycleOutcome::Ok {
    status: RecommendationStatus::Dismissed.as_str().to_string(),
    duplicate: write.duplicate,
    valid_until: rec.valid_until,
  })
}

/// Snooze is a self-loop: only `valid_until` advances, status stays as-is.
pub async fn snooze_recommendation(
  pool: &MySqlPool,
  recommendation_id: i64,
  actor_id: &str,
  until: DateTime<Utc>,
  note: Option<&str>,
  correlation_id: Option<&str>,
) -> Result<LifecycleOutcome, Error> {
  let rec = match fetch_recommendation(pool, recommendation_id).await? {
    Some(rec) => rec,
    None => return Ok(LifecycleOutcome::NotFound),
  };

  let note = note.unwrap_or("");
  let key = snooze_idempotency_key(recommendation_id, until, note);
  let request_json = request_snapshot(
    "snooze",
    actor_id,
    correlation_id,
    serde_json::json!({"until": until.to_rfc3339(), "note": note}),
  );
  let write = record_action_and_transition(
    pool,
    recommendation_id,
    "snooze",
    actor_id,
    &key,
    &request_json,
    None,
    None,
    Some(until),
  )
  .await?;

  Ok(LifecycleOutcome::Ok {
    status: rec.status,
    duplicate: write.duplicate,
    valid_until: Some(until),
  })
}
