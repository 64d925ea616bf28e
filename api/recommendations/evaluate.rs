use bytes::Bytes;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use adpilot_rust::db::{emit_gated_recommendations, fetch_campaign, fetch_campaign_daily_metrics, get_pool};
use adpilot_rust::emission_gate::EmissionGateConfig;
use adpilot_rust::metrics_window::summarize;
use adpilot_rust::rule_engine::{evaluate_rules, RuleThresholds};

fn bearer_token(header_value: Option<&str>) -> Option<&str> {
  let value = header_value?;
  value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

fn has_tidb_url() -> bool {
  std::env::var("TIDB_DATABASE_URL")
    .or_else(|_| std::env::var("DATABASE_URL"))
    .map(|v| !v.is_empty())
    .unwrap_or(false)
}

/// The campaign row holds the canonical client scope. The request value must
/// agree with it; otherwise a typo'd or foreign client_id would shard the
/// gate's cool-down/dedup history into disjoint buckets.
fn client_scope_matches(requested: &str, canonical: &str) -> bool {
  requested == canonical
}

#[derive(Deserialize)]
struct EvaluateRequest {
  client_id: String,
  campaign_id: String,
  #[serde(default)]
  volatility_mode: bool,
  #[serde(default)]
  cooldown_minutes: Option<i64>,
  #[serde(default)]
  correlation_id: Option<String>,
}

async fn handle_evaluate(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return json_response(
      StatusCode::METHOD_NOT_ALLOWED,
      serde_json::json!({"ok": false, "error": "method_not_allowed"}),
    );
  }

  let expected = std::env::var("RUST_INTERNAL_TOKEN").unwrap_or_default();
  let provided = bearer_token(headers.get("authorization").and_then(|v| v.to_str().ok())).unwrap_or("");

  if expected.is_empty() || provided != expected {
    return json_response(
      StatusCode::UNAUTHORIZED,
      serde_json::json!({"ok": false, "error": "unauthorized"}),
    );
  }

  let parsed: EvaluateRequest = match serde_json::from_slice(&body) {
    Ok(parsed) => parsed,
    Err(e) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("invalid json body: {e}")}),
      );
    }
  };

  if parsed.client_id.is_empty() || parsed.campaign_id.is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "client_id and campaign_id are required"}),
    );
  }

  if !has_tidb_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let pool = get_pool().await?;

  let campaign = match fetch_campaign(pool, &parsed.campaign_id).await? {
    Some(campaign) => campaign,
    None => {
      return json_response(
        StatusCode::NOT_FOUND,
        serde_json::json!({"ok": false, "error": "not_found", "message": "campaign not found"}),
      );
    }
  };

  if !client_scope_matches(&parsed.client_id, &campaign.client_id) {
    return json_response(
      StatusCode::NOT_FOUND,
      serde_json::json!({"ok": false, "error": "not_found", "message": "campaign not found for client"}),
    );
  }

  let now = Utc::now();
  let end_dt = now.date_naive();
  let start_dt = end_dt - Duration::days(6);

  let rows = fetch_campaign_daily_metrics(pool, &campaign.id, start_dt, end_dt).await?;
  let summary = summarize(&rows);

  let thresholds = RuleThresholds::for_mode(parsed.volatility_mode);
  let candidates = evaluate_rules(&summary, &thresholds);

  let mut gate_config = EmissionGateConfig::default();
  if let Some(minutes) = parsed.cooldown_minutes {
    if minutes > 0 {
      gate_config.cooldown_minutes = minutes;
    }
  }

  let outcome = emit_gated_recommendations(
    pool,
    &campaign.client_id,
    &campaign.id,
    &campaign.channel,
    candidates,
    &gate_config,
    now,
  )
  .await?;

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "emitted": outcome.emitted.len(),
      "suppressed": outcome.suppressed_all,
      "suppressed_count": outcome.suppressed_count,
      "dropped_duplicates": outcome.dropped_duplicates,
      "correlation_id": parsed.correlation_id,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_evaluate(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let headers = HeaderMap::new();
    let response = handle_evaluate(&Method::POST, &headers, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_non_post_methods() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let headers = HeaderMap::new();
    let response = handle_evaluate(&Method::GET, &headers, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[tokio::test]
  async fn rejects_missing_identifiers() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());

    let body = Bytes::from(r#"{"client_id":"","campaign_id":"cmp-1"}"#);
    let response = handle_evaluate(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[test]
  fn gate_scope_follows_the_campaign_row() {
    assert!(client_scope_matches("cl-1", "cl-1"));
    // A second automation (or a typo) naming another client for the same
    // campaign must not open a fresh cool-down/dedup bucket.
    assert!(!client_scope_matches("cl-2", "cl-1"));
    assert!(!client_scope_matches("CL-1", "cl-1"));
  }
}
