use crate::types::{BracketMatch, MatchKey};
use serde::Serialize;
use std::collections::HashMap;

// ── Advancement edges ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancementEdge {
  pub from: MatchKey,
  pub to: MatchKey,
}

/// Partial map from a match to the next-round match it feeds. Absent entries
/// mean the winner has no known destination yet, which is a normal state.
pub type AdvancementMap = HashMap<MatchKey, MatchKey>;

/// Derive advancement edges across consecutive rounds.
///
/// Two strategies, per slot:
/// - identity-based, when a match has a decided winner: the first next-round
///   match (in document order) holding the winner's participant id is the
///   target. Duplicate candidates are a data inconsistency; the first one
///   wins silently.
/// - slot-based, for structural pre-rendering: row `i` feeds row `i / 2`, but
///   only while one end of the edge is still a placeholder. Once both ends
///   are real, identity is the only authority.
pub fn advancement_edges(rounds: &[Vec<BracketMatch>]) -> AdvancementMap {
  let mut map = AdvancementMap::new();
  for pair in rounds.windows(2) {
    let (current, next) = (&pair[0], &pair[1]);
    for (index, source) in current.iter().enumerate() {
      if let Some(winner_id) = source.winner_participant_id() {
        if let Some(target) = next.iter().find(|m| m.contains_participant(winner_id)) {
          map.insert(source.key, target.key);
          continue;
        }
      }
      if let Some(target) = next.get(index / 2) {
        if source.is_placeholder() || target.is_placeholder() {
          map.insert(source.key, target.key);
        }
      }
    }
  }
  map
}

pub fn edge_list(map: &AdvancementMap) -> Vec<AdvancementEdge> {
  let mut edges: Vec<AdvancementEdge> = map
    .iter()
    .map(|(from, to)| AdvancementEdge { from: *from, to: *to })
    .collect();
  edges.sort_by_key(|edge| match edge.from {
    MatchKey::Real { id } => (0, id, 0, 0),
    MatchKey::Placeholder { round, slot } => (1, 0, round, slot as u32),
  });
  edges
}
