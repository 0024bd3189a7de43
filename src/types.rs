use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::SystemTime,
};

// ── Constants ──────────────────────────────────────────────────────────

pub const SPECTATOR_POLL_INTERVAL_MS: u64 = 1_500;
pub const BOARD_POLL_INTERVAL_MS: u64 = 20_000;
pub const BOARD_IDLE_REFRESH_MS: u64 = 60_000;
pub const SERVICE_RETRY_ATTEMPTS: u32 = 3;

// ── Shared state type aliases ──────────────────────────────────────────

pub type SharedBoardStore = Arc<Mutex<HashMap<u64, DivisionBoardState>>>;

// ── Match identity ─────────────────────────────────────────────────────

/// Identity of one bracket position: either a match the service knows about,
/// or a slot implied by the tournament structure with no data behind it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum MatchKey {
    Real { id: u64 },
    Placeholder { round: u32, slot: usize },
}

impl MatchKey {
    pub fn real_id(&self) -> Option<u64> {
        match self {
            MatchKey::Real { id } => Some(*id),
            MatchKey::Placeholder { .. } => None,
        }
    }
}

// ── Domain types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Winner {
    A,
    B,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMatch {
    pub key: MatchKey,
    pub round: u32,
    pub slot: usize,
    pub participant_a_id: Option<u64>,
    pub participant_b_id: Option<u64>,
    pub name_a: Option<String>,
    pub name_b: Option<String>,
    pub score_a: u32,
    pub score_b: u32,
    pub winner: Winner,
    pub is_bye: bool,
}

impl BracketMatch {
    pub fn placeholder(round: u32, slot: usize) -> Self {
        BracketMatch {
            key: MatchKey::Placeholder { round, slot },
            round,
            slot,
            participant_a_id: None,
            participant_b_id: None,
            name_a: None,
            name_b: None,
            score_a: 0,
            score_b: 0,
            winner: Winner::None,
            is_bye: false,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.key, MatchKey::Placeholder { .. })
    }

    pub fn contains_participant(&self, participant_id: u64) -> bool {
        self.participant_a_id == Some(participant_id)
            || self.participant_b_id == Some(participant_id)
    }

    pub fn winner_participant_id(&self) -> Option<u64> {
        match self.winner {
            Winner::A => self.participant_a_id,
            Winner::B => self.participant_b_id,
            Winner::None => None,
        }
    }

    pub fn winner_name(&self) -> Option<String> {
        match self.winner {
            Winner::A => self.name_a.clone(),
            Winner::B => self.name_b.clone(),
            Winner::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchSide {
    A,
    B,
}

/// One scorekeeper action against a single match. The authoritative service
/// applies the delta and decides any win flags; the client never infers them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "field")]
pub enum StateDelta {
    Score { side: MatchSide, delta: i32 },
    Penalty { side: MatchSide, delta: i32 },
    Timer { delta_seconds: i64 },
}

/// Full live state of one match as the service reports it. The local copy is
/// never a source of truth; every reconciliation replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveMatchState {
    pub score_a: u32,
    pub score_b: u32,
    pub penalties_a: u32,
    pub penalties_b: u32,
    pub penalty_level_a: Option<String>,
    pub penalty_level_b: Option<String>,
    pub senshu_a: bool,
    pub senshu_b: bool,
    pub win_a: bool,
    pub win_b: bool,
    pub timer_seconds: u32,
    pub timer_running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Live,
    Degraded,
}

// ── Division board state ───────────────────────────────────────────────

#[derive(Default)]
pub struct DivisionBoardState {
    pub matches: Option<Vec<BracketMatch>>,
    pub last_fetch: Option<SystemTime>,
    pub last_error: Option<String>,
    pub fetch_in_flight: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub tree: Option<crate::compose::BracketTree>,
    pub last_error: Option<String>,
    pub last_fetch_ms: Option<u64>,
}

// ── Match service wire records ─────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchRecord {
    pub id: Option<Value>,
    pub round: Option<i64>,
    pub slot: Option<i64>,
    pub participant_a_id: Option<Value>,
    pub participant_b_id: Option<Value>,
    pub name_a: Option<String>,
    pub name_b: Option<String>,
    pub score_a: Option<Value>,
    pub score_b: Option<Value>,
    pub penalties_a: Option<Value>,
    pub penalties_b: Option<Value>,
    pub penalty_level_a: Option<String>,
    pub penalty_level_b: Option<String>,
    pub senshu_a: Option<bool>,
    pub senshu_b: Option<bool>,
    pub win_a: Option<bool>,
    pub win_b: Option<bool>,
    pub timer_seconds: Option<Value>,
    pub timer_running: Option<bool>,
    pub is_bye: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DivisionMatchesResponse {
    pub matches: Option<Vec<MatchRecord>>,
}

// ── Board server ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BoardServerState {
    pub board_store: SharedBoardStore,
    pub service: Arc<crate::matchdata::HttpMatchService>,
}

/// Measured on-screen box reported by an interactive viewer for one match
/// element, used to recompute connector geometry after a layout pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasuredBox {
    pub key: MatchKey,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub side: crate::geometry::Side,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorRequest {
    pub boxes: Vec<MeasuredBox>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub action: String,
}
