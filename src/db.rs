use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use tokio::sync::OnceCell;
use vercel_runtime::Error;

use crate::effect_engine::PeriodTotals;
use crate::emission_gate::{gate_candidates, EmissionGateConfig, GateOutcome};
use crate::metrics_window::DailyMetricRow;
use crate::recommendation::ExpectedEffect;
use crate::rule_engine::CandidateAction;

static POOL: OnceCell<MySqlPool> = OnceCell::const_new();

async fn ensure_schema(pool: &MySqlPool) -> Result<(), Error> {
  // Keep schema creation idempotent; the engine may cold-start concurrently.
  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS campaigns (
        id VARCHAR(128) PRIMARY KEY,
        client_id VARCHAR(128) NOT NULL,
        channel VARCHAR(32) NOT NULL,
        status VARCHAR(16) NOT NULL DEFAULT 'active',
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        KEY idx_campaigns_client (client_id, status)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS campaign_daily_metrics (
        campaign_id VARCHAR(128) NOT NULL,
        dt DATE NOT NULL,
        impressions BIGINT NOT NULL DEFAULT 0,
        clicks BIGINT NOT NULL DEFAULT 0,
        spend_usd DECIMAL(12,4) NOT NULL DEFAULT 0,
        conversions BIGINT NOT NULL DEFAULT 0,
        revenue_usd DECIMAL(12,4) NOT NULL DEFAULT 0,
        frequency DOUBLE NOT NULL DEFAULT 0,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        PRIMARY KEY (campaign_id, dt)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS recommendations (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        client_id VARCHAR(128) NOT NULL,
        campaign_id VARCHAR(128) NULL,
        channel VARCHAR(32) NOT NULL,
        entity_level VARCHAR(16) NOT NULL DEFAULT 'campaign',
        ad_set_id VARCHAR(128) NULL,
        ad_id VARCHAR(128) NULL,
        creative_id VARCHAR(128) NULL,
        action_type VARCHAR(32) NOT NULL,
        payload_json TEXT NOT NULL,
        reason TEXT NOT NULL,
        explanation TEXT NULL,
        expected_kpi VARCHAR(32) NULL,
        expected_delta_abs DOUBLE NULL,
        expected_delta_rel DOUBLE NULL,
        expected_window VARCHAR(8) NULL,
        confidence DOUBLE NOT NULL DEFAULT 0.5,
        urgency VARCHAR(8) NOT NULL DEFAULT 'med',
        priority INT NOT NULL DEFAULT 0,
        status VARCHAR(16) NOT NULL DEFAULT 'proposed',
        valid_until TIMESTAMP(3) NULL,
        freshness_at TIMESTAMP(3) NULL,
        created_by VARCHAR(16) NOT NULL DEFAULT 'rule',
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        KEY idx_recommendations_scope (client_id, campaign_id, created_at),
        KEY idx_recommendations_status (status, created_at)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS recommendation_actions (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        recommendation_id BIGINT NOT NULL,
        action_kind VARCHAR(16) NOT NULL,
        actor_id VARCHAR(128) NOT NULL,
        idempotency_key CHAR(64) NOT NULL,
        request_json TEXT NOT NULL,
        response_json TEXT NULL,
        result VARCHAR(8) NOT NULL DEFAULT 'ok',
        error_message TEXT NULL,
        rollback_hint TEXT NULL,
        applied_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_recommendation_actions_idem (idempotency_key),
        KEY idx_recommendation_actions_rec (recommendation_id, applied_at)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS recommendation_effects (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        recommendation_id BIGINT NOT NULL,
        window_tag VARCHAR(8) NOT NULL,
        kpi VARCHAR(32) NOT NULL,
        observed_delta_abs DOUBLE NOT NULL,
        observed_delta_rel_pct DOUBLE NOT NULL,
        baseline_value DOUBLE NOT NULL,
        outcome_value DOUBLE NOT NULL,
        measured_at TIMESTAMP(3) NOT NULL,
        source VARCHAR(64) NOT NULL,
        UNIQUE KEY uq_recommendation_effects_window (recommendation_id, window_tag)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn get_pool() -> Result<&'static MySqlPool, Error> {
  POOL
    .get_or_try_init(|| async {
      let url = std::env::var("TIDB_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| -> Error {
          Box::new(std::io::Error::other(
            "Missing TIDB_DATABASE_URL (or DATABASE_URL)",
          ))
        })?;

      let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .map_err(|e| -> Error { Box::new(e) })?;

      ensure_schema(&pool).await?;
      Ok::<_, Error>(pool)
    })
    .await
}

#[derive(Debug, Clone)]
pub struct CampaignRow {
  pub id: String,
  pub client_id: String,
  pub channel: String,
  pub status: String,
}

pub async fn fetch_campaign(pool: &MySqlPool, campaign_id: &str) -> Result<Option<CampaignRow>, Error> {
  let row = sqlx::query_as::<_, (String, String, String, String)>(
    r#"
      SELECT id, client_id, channel, status
      FROM campaigns
      WHERE id = ?
      LIMIT 1;
    "#,
  )
  .bind(campaign_id)
  .fetch_optional(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(row.map(|(id, client_id, channel, status)| CampaignRow {
    id,
    client_id,
    channel,
    status,
  }))
}

pub async fn fetch_campaign_daily_metrics(
  pool: &MySqlPool,
  campaign_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<Vec<DailyMetricRow>, Error> {
  let rows = sqlx::query_as::<_, (NaiveDate, i64, i64, f64, i64, f64, f64)>(
    r#"
      SELECT dt,
             impressions,
             clicks,
             CAST(spend_usd AS DOUBLE) AS spend_usd,
             conversions,
             CAST(revenue_usd AS DOUBLE) AS revenue_usd,
             frequency
      FROM campaign_daily_metrics
      WHERE campaign_id = ?
        AND dt BETWEEN ? AND ?
      ORDER BY dt ASC;
    "#,
  )
  .bind(campaign_id)
  .bind(start_dt)
  .bind(end_dt)
  .fetch_all(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(
    rows
      .into_iter()
      .map(
        |(dt, impressions, clicks, spend_usd, conversions, revenue_usd, frequency)| DailyMetricRow {
          dt,
          impressions,
          clicks,
          spend_usd,
          conversions,
          revenue_usd,
          frequency,
        },
      )
      .collect(),
  )
}

pub async fn fetch_period_totals(
  pool: &MySqlPool,
  campaign_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<PeriodTotals, Error> {
  let (spend_usd, revenue_usd): (f64, f64) = sqlx::query_as(
    r#"
      SELECT COALESCE(SUM(CAST(spend_usd AS DOUBLE)), 0) AS spend_usd,
             COALESCE(SUM(CAST(revenue_usd AS DOUBLE)), 0) AS revenue_usd
      FROM campaign_daily_metrics
      WHERE campaign_id = ?
        AND dt BETWEEN ? AND ?;
    "#,
  )
  .bind(campaign_id)
  .bind(start_dt)
  .bind(end_dt)
  .fetch_one(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(PeriodTotals {
    spend_usd,
    revenue_usd,
  })
}

#[derive(Debug, Clone)]
pub struct RecommendationRow {
  pub id: i64,
  pub client_id: String,
  pub campaign_id: Option<String>,
  pub action_type: String,
  pub payload_json: String,
  pub status: String,
  pub valid_until: Option<DateTime<Utc>>,
}

pub async fn fetch_recommendation(
  pool: &MySqlPool,
  recommendation_id: i64,
) -> Result<Option<RecommendationRow>, Error> {
  let row = sqlx::query_as::<_, (i64, String, Option<String>, String, String, String, Option<DateTime<Utc>>)>(
    r#"
      SELECT id, client_id, campaign_id, action_type, payload_json, status, valid_until
      FROM recommendations
      WHERE id = ?
      LIMIT 1;
    "#,
  )
  .bind(recommendation_id)
  .fetch_optional(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(row.map(
    |(id, client_id, campaign_id, action_type, payload_json, status, valid_until)| RecommendationRow {
      id,
      client_id,
      campaign_id,
      action_type,
      payload_json,
      status,
      valid_until,
    },
  ))
}

/// Everything needed to insert one recommendation row. Manual creation and
/// the rule path both funnel through this shape.
#[derive(Debug, Clone)]
pub struct NewRecommendation {
  pub client_id: String,
  pub campaign_id: Option<String>,
  pub channel: String,
  pub entity_level: String,
  pub ad_set_id: Option<String>,
  pub ad_id: Option<String>,
  pub creative_id: Option<String>,
  pub action_type: String,
  pub payload_json: String,
  pub reason: String,
  pub explanation: Option<String>,
  pub expected_kpi: Option<String>,
  pub expected_delta_abs: Option<f64>,
  pub expected_delta_rel: Option<f64>,
  pub expected_window: Option<String>,
  pub confidence: f64,
  pub urgency: String,
  pub priority: i32,
  pub freshness_at: Option<DateTime<Utc>>,
  pub created_by: String,
}

impl NewRecommendation {
  pub fn from_candidate(
    client_id: &str,
    campaign_id: &str,
    channel: &str,
    candidate: &CandidateAction,
    freshness_at: DateTime<Utc>,
  ) -> Self {
    let ExpectedEffect {
      kpi,
      delta_abs,
      delta_rel,
      window,
    } = candidate.expected.clone();

    Self {
      client_id: client_id.to_string(),
      campaign_id: Some(campaign_id.to_string()),
      channel: channel.to_string(),
      entity_level: "campaign".to_string(),
      ad_set_id: None,
      ad_id: None,
      creative_id: None,
      action_type: candidate.action_type().to_string(),
      payload_json: candidate.payload.to_json().to_string(),
      reason: candidate.reason.clone(),
      explanation: None,
      expected_kpi: Some(kpi),
      expected_delta_abs: delta_abs,
      expected_delta_rel: delta_rel,
      expected_window: Some(window.as_str().to_string()),
      confidence: candidate.confidence,
      urgency: candidate.urgency.as_str().to_string(),
      priority: candidate.priority,
      freshness_at: Some(freshness_at),
      created_by: "rule".to_string(),
    }
  }
}

async fn insert_recommendation_tx(
  tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
  rec: &NewRecommendation,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    r#"
      INSERT INTO recommendations
        (client_id, campaign_id, channel, entity_level, ad_set_id, ad_id, creative_id,
         action_type, payload_json, reason, explanation,
         expected_kpi, expected_delta_abs, expected_delta_rel, expected_window,
         confidence, urgency, priority, status, freshness_at, created_by)
      VALUES
        (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'proposed', ?, ?);
    "#,
  )
  .bind(&rec.client_id)
  .bind(rec.campaign_id.as_deref())
  .bind(&rec.channel)
  .bind(&rec.entity_level)
  .bind(rec.ad_set_id.as_deref())
  .bind(rec.ad_id.as_deref())
  .bind(rec.creative_id.as_deref())
  .bind(&rec.action_type)
  .bind(&rec.payload_json)
  .bind(&rec.reason)
  .bind(rec.explanation.as_deref())
  .bind(rec.expected_kpi.as_deref())
  .bind(rec.expected_delta_abs)
  .bind(rec.expected_delta_rel)
  .bind(rec.expected_window.as_deref())
  .bind(rec.confidence)
  .bind(&rec.urgency)
  .bind(rec.priority)
  .bind(rec.freshness_at)
  .bind(&rec.created_by)
  .execute(&mut **tx)
  .await?;

  Ok(())
}

pub async fn insert_recommendation(pool: &MySqlPool, rec: &NewRecommendation) -> Result<(), Error> {
  let mut tx = pool.begin().await.map_err(|e| -> Error { Box::new(e) })?;
  insert_recommendation_tx(&mut tx, rec)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;
  tx.commit().await.map_err(|e| -> Error { Box::new(e) })?;
  Ok(())
}

/// Runs the cool-down/dedup checks and the inserts for one evaluation cycle
/// inside a single transaction. The recent-rows read is locked so two
/// concurrent cycles for the same campaign cannot both pass the gate.
pub async fn emit_gated_recommendations(
  pool: &MySqlPool,
  client_id: &str,
  campaign_id: &str,
  channel: &str,
  candidates: Vec<CandidateAction>,
  config: &EmissionGateConfig,
  now: DateTime<Utc>,
) -> Result<GateOutcome, Error> {
  let mut tx = pool.begin().await.map_err(|e| -> Error { Box::new(e) })?;

  // Serializes concurrent cycles for the same campaign; the MAX() read alone
  // locks nothing when no recent row exists.
  sqlx::query(
    r#"
      SELECT id FROM campaigns WHERE id = ? FOR UPDATE;
    "#,
  )
  .bind(campaign_id)
  .execute(&mut *tx)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  let last_proposed_at: Option<DateTime<Utc>> = sqlx::query_scalar(
    r#"
      SELECT MAX(created_at)
      FROM recommendations
      WHERE client_id = ? AND campaign_id = ?
        AND status = 'proposed'
        AND created_at >= ?;
    "#,
  )
  .bind(client_id)
  .bind(campaign_id)
  .bind(config.cooldown_cutoff(now))
  .fetch_one(&mut *tx)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  let recent_types: Vec<String> = sqlx::query_scalar(
    r#"
      SELECT DISTINCT action_type
      FROM recommendations
      WHERE client_id = ? AND campaign_id = ?
        AND created_at >= ?;
    "#,
  )
  .bind(client_id)
  .bind(campaign_id)
  .bind(config.dedup_cutoff(now))
  .fetch_all(&mut *tx)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  let recent_types = recent_types.into_iter().collect();
  let outcome = gate_candidates(candidates, last_proposed_at, &recent_types, now, config);

  for candidate in &outcome.emitted {
    let rec = NewRecommendation::from_candidate(client_id, campaign_id, channel, candidate, now);
    insert_recommendation_tx(&mut tx, &rec)
      .await
      .map_err(|e| -> Error { Box::new(e) })?;
  }

  tx.commit().await.map_err(|e| -> Error { Box::new(e) })?;
  Ok(outcome)
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionWrite {
  pub duplicate: bool,
}

/// Inserts the audit row and mutates the recommendation in one transaction.
/// A unique-key collision on the idempotency key means a concurrent or
/// retried duplicate already performed the transition; nothing is written and
/// the caller resolves it as success.
#[allow(clippy::too_many_arguments)]
pub async fn record_action_and_transition(
  pool: &MySqlPool,
  recommendation_id: i64,
  action_kind: &str,
  actor_id: &str,
  idempotency_key: &str,
  request_json: &str,
  response_json: Option<&str>,
  new_status: Option<&str>,
  valid_until: Option<DateTime<Utc>>,
) -> Result<TransitionWrite, Error> {
  let mut tx = pool.begin().await.map_err(|e| -> Error { Box::new(e) })?;

  let insert_result = sqlx::query(
    r#"
      INSERT INTO recommendation_actions
        (recommendation_id, action_kind, actor_id, idempotency_key, request_json, response_json, result)
      VALUES
        (?, ?, ?, ?, ?, ?, 'ok');
    "#,
  )
  .bind(recommendation_id)
  .bind(action_kind)
  .bind(actor_id)
  .bind(idempotency_key)
  .bind(request_json)
  .bind(response_json)
  .execute(&mut *tx)
  .await;

  if let Err(err) = insert_result {
    if err.as_database_error().is_some_and(|e| e.is_unique_violation()) {
      tx.rollback().await.map_err(|e| -> Error { Box::new(e) })?;
      return Ok(TransitionWrite { duplicate: true });
    }
    tx.rollback().await.map_err(|e| -> Error { Box::new(e) })?;
    return Err(Box::new(err));
  }

  if let Some(status) = new_status {
    sqlx::query(
      r#"
        UPDATE recommendations
        SET status = ?, updated_at = CURRENT_TIMESTAMP(3)
        WHERE id = ?;
      "#,
    )
    .bind(status)
    .bind(recommendation_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;
  }

  if let Some(until) = valid_until {
    sqlx::query(
      r#"
        UPDATE recommendations
        SET valid_until = ?, updated_at = CURRENT_TIMESTAMP(3)
        WHERE id = ?;
      "#,
    )
    .bind(until)
    .bind(recommendation_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;
  }

  tx.commit().await.map_err(|e| -> Error { Box::new(e) })?;
  Ok(TransitionWrite { duplicate: false })
}

pub async fn fetch_first_apply_at(
  pool: &MySqlPool,
  recommendation_id: i64,
) -> Result<Option<DateTime<Utc>>, Error> {
  let applied_at: Option<DateTime<Utc>> = sqlx::query_scalar(
    r#"
      SELECT MIN(applied_at)
      FROM recommendation_actions
      WHERE recommendation_id = ?
        AND action_kind = 'apply'
        AND result = 'ok';
    "#,
  )
  .bind(recommendation_id)
  .fetch_one(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(applied_at)
}

/// Applied recommendations that still lack an effect row for this window.
/// Bounded batch; a partially completed sweep leaves the rest to the next one.
pub async fn fetch_applied_needing_effect(
  pool: &MySqlPool,
  window_tag: &str,
  limit: i64,
) -> Result<Vec<(i64, String)>, Error> {
  let limit = limit.clamp(1, 500);
  let rows = sqlx::query_as::<_, (i64, String)>(
    r#"
      SELECT r.id, r.campaign_id
      FROM recommendations r
      WHERE r.status = 'applied'
        AND r.campaign_id IS NOT NULL
        AND NOT EXISTS (
          SELECT 1
          FROM recommendation_effects e
          WHERE e.recommendation_id = r.id
            AND e.window_tag = ?
        )
      ORDER BY r.updated_at ASC
      LIMIT ?;
    "#,
  )
  .bind(window_tag)
  .bind(limit)
  .fetch_all(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(rows)
}

/// One effect row per (recommendation, window); re-measurement overwrites.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_recommendation_effect(
  pool: &MySqlPool,
  recommendation_id: i64,
  window_tag: &str,
  kpi: &str,
  observed_delta_abs: f64,
  observed_delta_rel_pct: f64,
  baseline_value: f64,
  outcome_value: f64,
  measured_at: DateTime<Utc>,
  source: &str,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      INSERT INTO recommendation_effects
        (recommendation_id, window_tag, kpi, observed_delta_abs, observed_delta_rel_pct,
         baseline_value, outcome_value, measured_at, source)
      VALUES
        (?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON DUPLICATE KEY UPDATE
        kpi = VALUES(kpi),
        observed_delta_abs = VALUES(observed_delta_abs),
        observed_delta_rel_pct = VALUES(observed_delta_rel_pct),
        baseline_value = VALUES(baseline_value),
        outcome_value = VALUES(outcome_value),
        measured_at = VALUES(measured_at),
        source = VALUES(source);
    "#,
  )
  .bind(recommendation_id)
  .bind(window_tag)
  .bind(kpi)
  .bind(observed_delta_abs)
  .bind(observed_delta_rel_pct)
  .bind(baseline_value)
  .bind(outcome_value)
  .bind(measured_at)
  .bind(source)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}
