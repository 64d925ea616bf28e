use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationStatus {
  Proposed,
  Applied,
  Dismissed,
  Expired,
  Failed,
}

impl RecommendationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RecommendationStatus::Proposed => "proposed",
      RecommendationStatus::Applied => "applied",
      RecommendationStatus::Dismissed => "dismissed",
      RecommendationStatus::Expired => "expired",
      RecommendationStatus::Failed => "failed",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "proposed" => Some(RecommendationStatus::Proposed),
      "applied" => Some(RecommendationStatus::Applied),
      "dismissed" => Some(RecommendationStatus::Dismissed),
      "expired" => Some(RecommendationStatus::Expired),
      "failed" => Some(RecommendationStatus::Failed),
      _ => None,
    }
  }

  // Terminal states absorb further apply/dismiss attempts as idempotent no-ops.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RecommendationStatus::Applied | RecommendationStatus::Dismissed | RecommendationStatus::Expired
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
  Low,
  Med,
  High,
}

impl Urgency {
  pub fn as_str(&self) -> &'static str {
    match self {
      Urgency::Low => "low",
      Urgency::Med => "med",
      Urgency::High => "high",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLevel {
  Campaign,
  AdSet,
  Ad,
  Creative,
}

impl EntityLevel {
  pub fn parse(value: &str) -> Self {
    match value {
      "adset" => EntityLevel::AdSet,
      "ad" => EntityLevel::Ad,
      "creative" => EntityLevel::Creative,
      _ => EntityLevel::Campaign,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      EntityLevel::Campaign => "campaign",
      EntityLevel::AdSet => "adset",
      EntityLevel::Ad => "ad",
      EntityLevel::Creative => "creative",
    }
  }

  /// Which sub-entity column an external entity id lands in. Campaign-level
  /// recommendations carry the id in `campaign_id` instead.
  pub fn entity_id_column(&self) -> Option<&'static str> {
    match self {
      EntityLevel::Campaign => None,
      EntityLevel::AdSet => Some("ad_set_id"),
      EntityLevel::Ad => Some("ad_id"),
      EntityLevel::Creative => Some("creative_id"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectWindow {
  T7,
  T14,
  T30,
}

impl EffectWindow {
  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "T7" | "t7" => Some(EffectWindow::T7),
      "T14" | "t14" => Some(EffectWindow::T14),
      "T30" | "t30" => Some(EffectWindow::T30),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      EffectWindow::T7 => "T7",
      EffectWindow::T14 => "T14",
      EffectWindow::T30 => "T30",
    }
  }

  pub fn days(&self) -> i64 {
    match self {
      EffectWindow::T7 => 7,
      EffectWindow::T14 => 14,
      EffectWindow::T30 => 30,
    }
  }
}

/// Typed action parameters, selected by the `type` discriminator. Stored as
/// JSON in `recommendations.payload_json` and decoded at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
  Pause,
  ScaleUp { pct: f64 },
  ScaleDown { pct: f64 },
  RotateCreatives { variants: u32 },
  CapFrequency { max_freq: f64 },
}

impl ActionPayload {
  pub fn action_type(&self) -> &'static str {
    match self {
      ActionPayload::Pause => "pause",
      ActionPayload::ScaleUp { .. } => "scale_up",
      ActionPayload::ScaleDown { .. } => "scale_down",
      ActionPayload::RotateCreatives { .. } => "rotate_creatives",
      ActionPayload::CapFrequency { .. } => "cap_frequency",
    }
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
  }

  /// Decodes untyped parameters arriving at the boundary (manual creation)
  /// into the variant named by `action_type`.
  pub fn decode(action_type: &str, params: &serde_json::Value) -> Option<Self> {
    let mut tagged = match params {
      serde_json::Value::Object(map) => map.clone(),
      serde_json::Value::Null => serde_json::Map::new(),
      _ => return None,
    };
    tagged.insert(
      "type".to_string(),
      serde_json::Value::String(action_type.to_string()),
    );
    serde_json::from_value(serde_json::Value::Object(tagged)).ok()
  }
}

/// Expected-effect descriptor attached to each candidate at creation time.
#[derive(Debug, Clone)]
pub struct ExpectedEffect {
  pub kpi: String,
  pub delta_abs: Option<f64>,
  pub delta_rel: Option<f64>,
  pub window: EffectWindow,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_round_trips_and_terminal_flags() {
    for s in ["proposed", "applied", "dismissed", "expired", "failed"] {
      let parsed = RecommendationStatus::parse(s).unwrap();
      assert_eq!(parsed.as_str(), s);
    }
    assert!(RecommendationStatus::Applied.is_terminal());
    assert!(RecommendationStatus::Dismissed.is_terminal());
    assert!(RecommendationStatus::Expired.is_terminal());
    assert!(!RecommendationStatus::Proposed.is_terminal());
    assert!(!RecommendationStatus::Failed.is_terminal());
    assert!(RecommendationStatus::parse("unknown").is_none());
  }

  #[test]
  fn entity_level_maps_to_sub_entity_columns() {
    assert_eq!(EntityLevel::parse("adset").entity_id_column(), Some("ad_set_id"));
    assert_eq!(EntityLevel::parse("ad").entity_id_column(), Some("ad_id"));
    assert_eq!(EntityLevel::parse("creative").entity_id_column(), Some("creative_id"));
    assert_eq!(EntityLevel::parse("campaign").entity_id_column(), None);
    // Unknown levels fall back to campaign.
    assert_eq!(EntityLevel::parse("whatever").entity_id_column(), None);
  }

  #[test]
  fn effect_window_parses_and_knows_its_length() {
    assert_eq!(EffectWindow::parse("T7"), Some(EffectWindow::T7));
    assert_eq!(EffectWindow::parse("t14"), Some(EffectWindow::T14));
    assert_eq!(EffectWindow::parse("T30").unwrap().days(), 30);
    assert!(EffectWindow::parse("T90").is_none());
    assert_eq!(EffectWindow::T7.days(), 7);
    assert_eq!(EffectWindow::T14.as_str(), "T14");
  }

  #[test]
  fn payload_serializes_with_type_tag() {
    let payload = ActionPayload::ScaleUp { pct: 20.0 };
    let json = payload.to_json();
    assert_eq!(json["type"], "scale_up");
    assert_eq!(json["pct"], 20.0);
  }

  #[test]
  fn payload_decodes_from_untyped_params() {
    let params = serde_json::json!({"max_freq": 3.0});
    let decoded = ActionPayload::decode("cap_frequency", &params).unwrap();
    assert_eq!(decoded, ActionPayload::CapFrequency { max_freq: 3.0 });

    let decoded = ActionPayload::decode("pause", &serde_json::Value::Null).unwrap();
    assert_eq!(decoded, ActionPayload::Pause);

    assert!(ActionPayload::decode("scale_up", &serde_json::json!({"wrong": 1})).is_none());
    assert!(ActionPayload::decode("unknown_type", &serde_json::json!({})).is_none());
  }
}
