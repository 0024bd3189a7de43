use chrono::Local;
use serde::{Deserialize, Serialize};
use std::{
  env,
  fs,
  io::Write,
  path::PathBuf,
  time::{SystemTime, UNIX_EPOCH},
};

// ── Config types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
  pub match_service_url: String,
  pub match_service_token: String,
  pub division_ids: Vec<u64>,
  pub board_polling: bool,
  pub board_addr: String,
  pub viewer_dir: String,
  pub broadcast_url: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      match_service_url: String::new(),
      match_service_token: String::new(),
      division_ids: Vec::new(),
      board_polling: true,
      board_addr: "127.0.0.1:17990".to_string(),
      viewer_dir: "viewer".to_string(),
      broadcast_url: String::new(),
    }
  }
}

// ── Paths ──────────────────────────────────────────────────────────────

pub fn repo_root() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn resolve_repo_path(raw: &str) -> PathBuf {
  let path = PathBuf::from(raw);
  if path.is_absolute() {
    path
  } else {
    repo_root().join(path)
  }
}

pub fn config_path() -> PathBuf {
  repo_root().join("config.json")
}

// ── Environment ────────────────────────────────────────────────────────

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

pub fn env_flag_true_default(key: &str, default: bool) -> bool {
  match env::var(key) {
    Ok(value) => {
      let value = value.trim().to_ascii_lowercase();
      matches!(value.as_str(), "1" | "true" | "yes" | "on")
    }
    Err(_) => default,
  }
}

pub fn apply_env_defaults(mut config: AppConfig) -> AppConfig {
  if config.match_service_url.trim().is_empty() {
    if let Some(value) = env_default("MATCH_SERVICE_URL") {
      config.match_service_url = value;
    }
  }
  if config.match_service_token.trim().is_empty() {
    if let Some(value) = env_default("MATCH_SERVICE_TOKEN") {
      config.match_service_token = value;
    }
  }
  if config.broadcast_url.trim().is_empty() {
    if let Some(value) = env_default("BROADCAST_URL") {
      config.broadcast_url = value;
    }
  }
  if let Some(value) = env_default("BOARD_ADDR") {
    config.board_addr = value;
  }
  config
}

pub fn load_config_inner() -> Result<AppConfig, String> {
  let path = config_path();
  if !path.is_file() {
    return Ok(apply_env_defaults(AppConfig::default()));
  }
  let data = fs::read_to_string(&path).map_err(|e| format!("read config {}: {e}", path.display()))?;
  let config =
    serde_json::from_str::<AppConfig>(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?;
  Ok(apply_env_defaults(config))
}

pub fn save_config_inner(config: AppConfig) -> Result<AppConfig, String> {
  let path = config_path();
  let payload = serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?;
  fs::write(&path, payload).map_err(|e| format!("write config {}: {e}", path.display()))?;
  Ok(config)
}

pub fn load_env_file() {
  let env_path = repo_root().join(".env");
  if !env_path.is_file() {
    return;
  }
  let contents = match fs::read_to_string(&env_path) {
    Ok(data) => data,
    Err(_) => return,
  };
  for line in contents.lines() {
    if let Some((key, value)) = parse_env_line(line) {
      if env::var_os(&key).is_none() {
        env::set_var(key, value);
      }
    }
  }
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return None;
  }
  let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
  let (key, raw_value) = trimmed.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let mut value = raw_value.trim();
  if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if let Some(idx) = value.find('#') {
    value = value[..idx].trim_end();
  }
  Some((key.to_string(), value.to_string()))
}

pub fn log_env_warnings() {
  let config = load_config_inner().unwrap_or_else(|_| AppConfig::default());
  let mut warnings = Vec::new();

  if config.match_service_url.trim().is_empty() && env_default("MATCH_SERVICE_URL").is_none() {
    warnings.push("MATCH_SERVICE_URL not set and no service url in config — match reads will fail");
  }
  if config.division_ids.is_empty() {
    warnings.push("no division ids configured — background board polling is idle");
  }

  for msg in warnings {
    tracing::warn!("{}", msg);
  }
}

// ── Time ───────────────────────────────────────────────────────────────

pub fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

// ── Match service request log ──────────────────────────────────────────

pub fn service_log_path() -> PathBuf {
  repo_root().join("logs").join("match_service.log")
}

pub fn append_service_log(label: &str, payload: &str) {
  let dir = repo_root().join("logs");
  if fs::create_dir_all(&dir).is_err() {
    return;
  }
  let path = service_log_path();
  let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
  let entry = format!("[{timestamp}] {label}\n{payload}\n\n");
  if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(&path) {
    let _ = file.write_all(entry.as_bytes());
  }
}
