use crate::config::{append_service_log, AppConfig};
use crate::types::*;
use serde_json::Value;
use std::{thread::sleep, time::Duration};

// ── Service seam ───────────────────────────────────────────────────────

/// The authoritative match-data service. Everything this subsystem knows
/// about a match comes back through these three reads/writes; the HTTP
/// implementation lives below and tests substitute scripted ones.
pub trait MatchService: Send + Sync {
  fn match_state(&self, match_id: u64) -> Result<LiveMatchState, String>;
  fn division_matches(&self, division_id: u64) -> Result<Vec<BracketMatch>, String>;
  fn propose(&self, match_id: u64, delta: &StateDelta) -> Result<(), String>;
}

// ── HTTP client ────────────────────────────────────────────────────────

pub struct HttpMatchService {
  base_url: String,
  token: String,
}

impl HttpMatchService {
  pub fn from_config(config: &AppConfig) -> Self {
    HttpMatchService {
      base_url: config.match_service_url.trim().trim_end_matches('/').to_string(),
      token: config.match_service_token.trim().to_string(),
    }
  }

  fn url(&self, path: &str) -> Result<String, String> {
    if self.base_url.is_empty() {
      return Err("Match service url is not set (Settings or MATCH_SERVICE_URL).".to_string());
    }
    Ok(format!("{}{}", self.base_url, path))
  }

  fn request_json(&self, path: &str, body: Option<Value>) -> Result<Value, String> {
    let url = self.url(path)?;
    let verb = if body.is_some() { "POST" } else { "GET" };
    append_service_log("Match service request", &format!("{verb} {url}"));

    let client = reqwest::blocking::Client::new();
    let mut last_send_err = String::new();
    let mut resp = None;
    for attempt in 0..SERVICE_RETRY_ATTEMPTS {
      if attempt > 0 {
        sleep(Duration::from_millis(500 * u64::from(attempt)));
      }
      let mut request = match &body {
        Some(payload) => client.post(&url).json(payload),
        None => client.get(&url),
      };
      if !self.token.is_empty() {
        request = request.header("Authorization", format!("Bearer {}", self.token));
      }
      match request.send() {
        Ok(r) => {
          resp = Some(r);
          break;
        }
        Err(e) => {
          last_send_err = format!("Match service request failed (attempt {}): {e}", attempt + 1);
          append_service_log("Match service error", &last_send_err);
        }
      }
    }
    let resp = resp.ok_or_else(|| last_send_err.clone())?;
    let status = resp.status();
    let text = resp.text().map_err(|e| {
      append_service_log("Match service error", &format!("read failed: {e}"));
      format!("Match service read failed: {e}")
    })?;
    append_service_log("Match service response", &format!("status: {status}\nbody:\n{text}"));
    if !status.is_success() {
      return Err(format!("Match service error {status}: {text}"));
    }
    if text.trim().is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| {
      append_service_log("Match service error", &format!("parse failed: {e}"));
      format!("Match service parse failed: {e}")
    })
  }
}

impl MatchService for HttpMatchService {
  fn match_state(&self, match_id: u64) -> Result<LiveMatchState, String> {
    let value = self.request_json(&format!("/matches/{match_id}"), None)?;
    let record: MatchRecord = serde_json::from_value(value)
      .map_err(|e| format!("Match service returned an unreadable match: {e}"))?;
    Ok(record_to_live_state(&record))
  }

  fn division_matches(&self, division_id: u64) -> Result<Vec<BracketMatch>, String> {
    let value = self.request_json(&format!("/divisions/{division_id}/matches"), None)?;
    let records = decode_division_matches(value)?;
    Ok(
      records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| record_to_bracket_match(record, index))
        .collect(),
    )
  }

  fn propose(&self, match_id: u64, delta: &StateDelta) -> Result<(), String> {
    let payload = serde_json::to_value(delta).map_err(|e| e.to_string())?;
    self.request_json(&format!("/matches/{match_id}/score"), Some(payload))?;
    Ok(())
  }
}

// ── Wire decoding ──────────────────────────────────────────────────────

pub fn decode_division_matches(value: Value) -> Result<Vec<MatchRecord>, String> {
  // The service has shipped both a bare array and a wrapped object; accept
  // either.
  if value.is_array() {
    return serde_json::from_value(value)
      .map_err(|e| format!("Match service returned unreadable matches: {e}"));
  }
  let response: DivisionMatchesResponse = serde_json::from_value(value)
    .map_err(|e| format!("Match service returned unreadable matches: {e}"))?;
  Ok(response.matches.unwrap_or_default())
}

pub fn record_to_bracket_match(record: &MatchRecord, fallback_slot: usize) -> Option<BracketMatch> {
  let id = record.id.as_ref().and_then(value_to_u64)?;
  let round = match record.round {
    Some(round) if round >= 1 => round as u32,
    _ => return None,
  };
  let slot = record
    .slot
    .and_then(|slot| usize::try_from(slot).ok())
    .unwrap_or(fallback_slot);
  let participant_a_id = record.participant_a_id.as_ref().and_then(value_to_u64);
  let participant_b_id = record.participant_b_id.as_ref().and_then(value_to_u64);
  let win_a = record.win_a.unwrap_or(false);
  let win_b = record.win_b.unwrap_or(false);
  let winner = if win_a {
    Winner::A
  } else if win_b {
    Winner::B
  } else {
    Winner::None
  };
  let is_bye = record
    .is_bye
    .unwrap_or(participant_a_id.is_some() != participant_b_id.is_some());
  Some(BracketMatch {
    key: MatchKey::Real { id },
    round,
    slot,
    participant_a_id,
    participant_b_id,
    name_a: record.name_a.clone().filter(|name| !name.trim().is_empty()),
    name_b: record.name_b.clone().filter(|name| !name.trim().is_empty()),
    score_a: record.score_a.as_ref().and_then(value_to_u32).unwrap_or(0),
    score_b: record.score_b.as_ref().and_then(value_to_u32).unwrap_or(0),
    winner,
    is_bye,
  })
}

pub fn record_to_live_state(record: &MatchRecord) -> LiveMatchState {
  LiveMatchState {
    score_a: record.score_a.as_ref().and_then(value_to_u32).unwrap_or(0),
    score_b: record.score_b.as_ref().and_then(value_to_u32).unwrap_or(0),
    penalties_a: record.penalties_a.as_ref().and_then(value_to_u32).unwrap_or(0),
    penalties_b: record.penalties_b.as_ref().and_then(value_to_u32).unwrap_or(0),
    penalty_level_a: record.penalty_level_a.clone(),
    penalty_level_b: record.penalty_level_b.clone(),
    senshu_a: record.senshu_a.unwrap_or(false),
    senshu_b: record.senshu_b.unwrap_or(false),
    win_a: record.win_a.unwrap_or(false),
    win_b: record.win_b.unwrap_or(false),
    timer_seconds: record.timer_seconds.as_ref().and_then(value_to_u32).unwrap_or(0),
    timer_running: record.timer_running.unwrap_or(false),
  }
}

// ── Value coercions ────────────────────────────────────────────────────

pub fn value_to_i64(value: &Value) -> Option<i64> {
  match value {
    Value::Number(num) => num.as_i64(),
    Value::String(raw) => raw.parse::<i64>().ok(),
    _ => None,
  }
}

pub fn value_to_u64(value: &Value) -> Option<u64> {
  value_to_i64(value).and_then(|num| u64::try_from(num).ok())
}

pub fn value_to_u32(value: &Value) -> Option<u32> {
  value_to_i64(value).and_then(|num| u32::try_from(num).ok())
}
