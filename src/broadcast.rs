use crate::config::AppConfig;
use serde_json::json;
use tracing::info;

// ── Broadcast hand-off ─────────────────────────────────────────────────

// The streaming component is owned elsewhere; the board only flips it on
// and off for a match. Failures come back as status strings for the view,
// never as anything fatal.

pub fn start_broadcast(config: &AppConfig, match_id: u64) -> Result<(), String> {
  invoke_broadcast(config, match_id, "start")
}

pub fn stop_broadcast(config: &AppConfig, match_id: u64) -> Result<(), String> {
  invoke_broadcast(config, match_id, "stop")
}

fn invoke_broadcast(config: &AppConfig, match_id: u64, action: &str) -> Result<(), String> {
  let url = config.broadcast_url.trim();
  if url.is_empty() {
    return Err("Broadcast url is not set (Settings or BROADCAST_URL).".to_string());
  }
  let client = reqwest::blocking::Client::new();
  let resp = client
    .post(url)
    .json(&json!({ "matchId": match_id, "action": action }))
    .send()
    .map_err(|e| format!("Broadcast request failed: {e}"))?;
  let status = resp.status();
  if !status.is_success() {
    let body = resp.text().unwrap_or_default();
    return Err(format!("Broadcast error {status}: {body}"));
  }
  info!("broadcast {action} for match {match_id}");
  Ok(())
}
