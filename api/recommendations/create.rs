use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use adpilot_rust::db::{get_pool, insert_recommendation, NewRecommendation};
use adpilot_rust::recommendation::{ActionPayload, EntityLevel};

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
struct CreateItem {
  client_id: String,
  channel: String,
  #[serde(default)]
  campaign_id: Option<String>,
  #[serde(default = "default_entity_level")]
  entity_level: String,
  #[serde(default)]
  entity_id: Option<String>,
  action_type: String,
  #[serde(default)]
  payload: serde_json::Value,
  reason: String,
  #[serde(default)]
  priority: i32,
}

fn default_entity_level() -> String {
  "campaign".to_string()
}

#[derive(Deserialize)]
struct CreateRequest {
  items: Vec<CreateItem>,
}

fn item_to_row(item: &CreateItem) -> Result<NewRecommendation, String> {
  let payload = ActionPayload::decode(&item.action_type, &item.payload)
    .ok_or_else(|| format!("unknown action_type or malformed payload: {}", item.action_type))?;

  let level = EntityLevel::parse(&item.entity_level);
  let entity_id = item.entity_id.as_deref();
  let (ad_set_id, ad_id, creative_id) = match level.entity_id_column() {
    Some("ad_set_id") => (entity_id.map(str::to_string), None, None),
    Some("ad_id") => (None, entity_id.map(str::to_string), None),
    Some("creative_id") => (None, None, entity_id.map(str::to_string)),
    _ => (None, None, None),
  };

  Ok(NewRecommendation {
    client_id: item.client_id.clone(),
    campaign_id: item.campaign_id.clone(),
    channel: item.channel.clone(),
    entity_level: level.as_str().to_string(),
    ad_set_id,
    ad_id,
    creative_id,
    action_type: payload.action_type().to_string(),
    payload_json: payload.to_json().to_string(),
    reason: item.reason.clone(),
    explanation: None,
    expected_kpi: None,
    expected_delta_abs: None,
    expected_delta_rel: None,
    expected_window: None,
    confidence: 0.5,
    urgency: "med".to_string(),
    priority: item.priority,
    freshness_at: Some(Utc::now()),
    created_by: "human".to_string(),
  })
}

async fn handle_create(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
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

  let parsed: CreateRequest = match serde_json::from_slice(&body) {
    Ok(parsed) => parsed,
    Err(e) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("invalid json body: {e}")}),
      );
    }
  };

  if parsed.items.is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "items must not be empty"}),
    );
  }

  // Validate the whole batch before touching the store.
  let mut rows = Vec::with_capacity(parsed.items.len());
  for (idx, item) in parsed.items.iter().enumerate() {
    if item.client_id.is_empty() || item.channel.is_empty() || item.reason.is_empty() {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("items[{idx}]: client_id, channel and reason are required")}),
      );
    }
    match item_to_row(item) {
      Ok(row) => rows.push(row),
      Err(message) => {
        return json_response(
          StatusCode::BAD_REQUEST,
          serde_json::json!({"ok": false, "error": "bad_request", "message": format!("items[{idx}]: {message}")}),
        );
      }
    }
  }

  if !has_tidb_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let pool = get_pool().await?;
  for row in &rows {
    insert_recommendation(pool, row).await?;
  }

  json_response(
    StatusCode::OK,
    serde_json::json!({"ok": true, "created": rows.len()}),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_create(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  fn auth_headers() -> HeaderMap {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    headers
  }

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let headers = HeaderMap::new();
    let response = handle_create(&Method::POST, &headers, Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_unknown_action_type() {
    let headers = auth_headers();
    let body = Bytes::from(
      r#"{"items":[{"client_id":"cl-1","channel":"meta","action_type":"explode","payload":{},"reason":"r"}]}"#,
    );
    let response = handle_create(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn rejects_payload_not_matching_action_type() {
    let headers = auth_headers();
    let body = Bytes::from(
      r#"{"items":[{"client_id":"cl-1","channel":"meta","action_type":"scale_up","payload":{"variants":2},"reason":"r"}]}"#,
    );
    let response = handle_create(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn rejects_empty_items() {
    let headers = auth_headers();
    let body = Bytes::from(r#"{"items":[]}"#);
    let response = handle_create(&Method::POST, &headers, body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[test]
  fn sub_entity_ids_land_in_mapped_columns() {
    let item = CreateItem {
      client_id: "cl-1".to_string(),
      channel: "meta".to_string(),
      campaign_id: Some("cmp-1".to_string()),
      entity_level: "creative".to_string(),
      entity_id: Some("cr-9".to_string()),
      action_type: "rotate_creatives".to_string(),
      payload: serde_json::json!({"variants": 3}),
      reason: "manual rotation".to_string(),
      priority: 50,
    };

    let row = item_to_row(&item).unwrap();
    assert_eq!(row.entity_level, "creative");
    assert_eq!(row.creative_id.as_deref(), Some("cr-9"));
    assert!(row.ad_set_id.is_none());
    assert!(row.ad_id.is_none());
    assert_eq!(row.created_by, "human");
  }

  #[test]
  fn unknown_entity_level_defaults_to_campaign() {
    let item = CreateItem {
      client_id: "cl-1".to_string(),
      channel: "google".to_string(),
      campaign_id: Some("cmp-2".to_string()),
      entity_level: "budget_group".to_string(),
      entity_id: Some("ignored".to_string()),
      action_type: "pause".to_string(),
      payload: serde_json::Value::Null,
      reason: "manual pause".to_string(),
      priority: 90,
    };

    let row = item_to_row(&item).unwrap();
    assert_eq!(row.entity_level, "campaign");
    assert!(row.ad_set_id.is_none() && row.ad_id.is_none() && row.creative_id.is_none());
  }
}
