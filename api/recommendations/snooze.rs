use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use adpilot_rust::db::get_pool;
use adpilot_rust::lifecycle::{snooze_recommendation, LifecycleOutcome};

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
struct SnoozeRequest {
  recommendation_id: i64,
  actor_id: String,
  until: String,
  #[serde(default)]
  note: Option<String>,
  #[serde(default)]
  correlation_id: Option<String>,
}

fn parse_until(value: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(value)
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

async fn handle_snooze(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
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

  let parsed: SnoozeRequest = match serde_json::from_slice(&body) {
    Ok(parsed) => parsed,
    Err(e) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("invalid json body: {e}")}),
      );
    }
  };

  if parsed.actor_id.is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "actor_id is required"}),
    );
  }

  let until = match parse_until(&parsed.until) {
    Some(until) => until,
    None => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": "until must be an ISO-8601 timestamp"}),
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
  let outcome = snooze_recommendation(
    pool,
    parsed.recommendation_id,
    &parsed.actor_id,
    until,
    parsed.note.as_deref(),
    parsed.correlation_id.as_deref(),
  )
  .await?;

  match outcome {
    LifecycleOutcome::NotFound => json_response(
      StatusCode::NOT_FOUND,
      serde_json::json!({"ok": false, "error": "not_found", "message": "recommendation not found"}),
    ),
    LifecycleOutcome::DownstreamFailed { message } => json_response(
      StatusCode::BAD_GATEWAY,
      serde_json::json!({"ok": false, "error": "downstream_failure", "message": message}),
    ),
    LifecycleOutcome::Ok {
      status,
      duplicate,
      valid_until,
    } => json_response(
      StatusCode::OK,
      serde_json::json!({
        "ok": true,
        "status": status,
        "duplicate": duplicate,
        "valid_until": valid_until.map(|dt| dt.to_rfc3339()),
      }),
    ),
  }
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_snooze(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}
