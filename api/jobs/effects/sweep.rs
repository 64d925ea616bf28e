use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use adpilot_rust::db::{
  fetch_applied_needing_effect, fetch_first_apply_at, fetch_period_totals, get_pool,
  upsert_recommendation_effect,
};
use adpilot_rust::effect_engine::{compute_effect, measurement_periods, window_elapsed};
use adpilot_rust::recommendation::EffectWindow;

const EFFECT_KPI: &str = "roas";
const EFFECT_SOURCE: &str = "campaign_daily_metrics";
const DEFAULT_BATCH_SIZE: i64 = 50;

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

#[derive(Deserialize)]
struct SweepRequest {
  window: String,
  #[serde(default)]
  batch_size: Option<i64>,
}

async fn handle_sweep(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
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

  let parsed: SweepRequest = match serde_json::from_slice(&body) {
    Ok(parsed) => parsed,
    Err(e) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("invalid json body: {e}")}),
      );
    }
  };

  let window = match EffectWindow::parse(&parsed.window) {
    Some(window) => window,
    None => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": "window must be one of T7, T14, T30"}),
      );
    }
  };

  if !has_tidb_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let pool = get_pool().await?;
  let now = Utc::now();
  let batch_size = parsed.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);

  let eligible = fetch_applied_needing_effect(pool, window.as_str(), batch_size).await?;

  let mut measured = 0usize;
  let mut skipped_pending = 0usize;
  for (recommendation_id, campaign_id) in eligible {
    let applied_at = match fetch_first_apply_at(pool, recommendation_id).await? {
      Some(applied_at) => applied_at,
      // Applied status without an apply action; nothing to anchor a window on.
      None => continue,
    };

    if !window_elapsed(applied_at, now, window) {
      skipped_pending += 1;
      continue;
    }

    let periods = measurement_periods(applied_at.date_naive(), window);
    let baseline =
      fetch_period_totals(pool, &campaign_id, periods.baseline_start, periods.baseline_end).await?;
    let outcome =
      fetch_period_totals(pool, &campaign_id, periods.outcome_start, periods.outcome_end).await?;

    let effect = compute_effect(baseline, outcome);
    upsert_recommendation_effect(
      pool,
      recommendation_id,
      window.as_str(),
      EFFECT_KPI,
      effect.delta_abs,
      effect.delta_rel_pct,
      effect.baseline_roas,
      effect.outcome_roas,
      now,
      EFFECT_SOURCE,
    )
    .await?;

    measured += 1;
  }

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "window": window.as_str(),
      "measured": measured,
      "skipped_pending": skipped_pending,
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_sweep(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}
