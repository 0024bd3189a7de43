use crate::advancement::{advancement_edges, edge_list, AdvancementEdge};
use crate::geometry::Side;
use crate::structure::rounds_for;
use crate::types::{BracketMatch, Winner};
use serde::Serialize;
use std::collections::HashMap;

// ── Composed tree ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStats {
  pub round: u32,
  pub total: usize,
  pub completed: usize,
  pub byes: usize,
}

/// The renderable bracket: round 1 split into a left and a right branch,
/// rounds 2 onward stacked in the center column, converging on the champion.
/// One tree feeds both the interactive board and the print document.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketTree {
  pub left: Vec<BracketMatch>,
  pub right: Vec<BracketMatch>,
  pub center: Vec<Vec<BracketMatch>>,
  pub edges: Vec<AdvancementEdge>,
  pub stats: Vec<RoundStats>,
  pub champion: Option<String>,
}

impl BracketTree {
  pub fn is_empty(&self) -> bool {
    self.left.is_empty() && self.right.is_empty() && self.center.is_empty()
  }

  /// Every match box with its branch tag, in layout order.
  pub fn boxes(&self) -> Vec<(&BracketMatch, Side)> {
    let mut out = Vec::new();
    for m in &self.left {
      out.push((m, Side::Left));
    }
    for round in &self.center {
      for m in round {
        out.push((m, Side::Center));
      }
    }
    for m in &self.right {
      out.push((m, Side::Right));
    }
    out
  }
}

// ── Composition ────────────────────────────────────────────────────────

/// Count distinct entrants present in round 1 of the authoritative match
/// list. The division service does not report a headcount, so the board
/// derives one from the data it does have.
pub fn participant_count(matches: &[BracketMatch]) -> i64 {
  let mut ids = Vec::new();
  let mut anonymous = 0i64;
  for m in matches.iter().filter(|m| m.round == 1) {
    for id in [m.participant_a_id, m.participant_b_id].into_iter().flatten() {
      if !ids.contains(&id) {
        ids.push(id);
      }
    }
    // Named slots without ids still occupy a bracket position.
    if m.participant_a_id.is_none() && m.name_a.is_some() {
      anonymous += 1;
    }
    if m.participant_b_id.is_none() && m.name_b.is_some() {
      anonymous += 1;
    }
  }
  ids.len() as i64 + anonymous
}

/// Merge the structural skeleton for `participants` entrants with whatever
/// real matches the service reported. A real match replaces the placeholder
/// at its (round, slot) position the instant it exists; everything else
/// stays a placeholder.
pub fn compose_division(participants: i64, real: &[BracketMatch]) -> BracketTree {
  let specs = rounds_for(participants);
  let structural_rounds = specs.len() as u32;
  let max_real_round = real.iter().map(|m| m.round).max().unwrap_or(0);
  let round_count = structural_rounds.max(max_real_round);
  if round_count == 0 {
    return BracketTree::default();
  }

  let mut by_position: HashMap<(u32, usize), &BracketMatch> = HashMap::new();
  let mut overflow: Vec<&BracketMatch> = Vec::new();
  for m in real {
    if let Some(previous) = by_position.insert((m.round, m.slot), m) {
      overflow.push(previous);
    }
  }

  let mut rounds: Vec<Vec<BracketMatch>> = Vec::with_capacity(round_count as usize);
  for round in 1..=round_count {
    let spec = specs.get(round as usize - 1);
    let display = spec.map(|s| s.match_count + s.byes).unwrap_or(0);
    let contested = spec.map(|s| s.match_count).unwrap_or(0);
    let mut rows = Vec::with_capacity(display);
    for slot in 0..display {
      match by_position.remove(&(round, slot)) {
        Some(real_match) => rows.push(real_match.clone()),
        None => {
          let mut placeholder = BracketMatch::placeholder(round, slot);
          placeholder.is_bye = slot >= contested;
          rows.push(placeholder);
        }
      }
    }
    // Rows the structure did not predict (inconsistent service data) are
    // still shown, after the structural ones.
    let mut extras: Vec<BracketMatch> = by_position
      .iter()
      .filter(|((r, _), _)| *r == round)
      .map(|(_, m)| (*m).clone())
      .collect();
    extras.sort_by_key(|m| m.slot);
    for extra in &extras {
      by_position.remove(&(round, extra.slot));
    }
    rows.extend(extras);
    rows.extend(
      overflow
        .iter()
        .filter(|m| m.round == round)
        .map(|m| (*m).clone()),
    );
    rounds.push(rows);
  }

  let edges = edge_list(&advancement_edges(&rounds));

  let stats = rounds
    .iter()
    .enumerate()
    .map(|(index, rows)| {
      let round = index as u32 + 1;
      let spec = specs.get(index);
      RoundStats {
        round,
        total: spec.map(|s| s.match_count).unwrap_or(rows.len()),
        completed: rows
          .iter()
          .filter(|m| !m.is_placeholder() && !m.is_bye && m.winner != Winner::None)
          .count(),
        byes: spec.map(|s| s.byes).unwrap_or(0),
      }
    })
    .collect();

  let champion = match rounds.last() {
    Some(rows) if rows.len() == 1 => rows[0].winner_name(),
    _ => None,
  };

  let mut rounds_iter = rounds.into_iter();
  let first = rounds_iter.next().unwrap_or_default();
  let split = (first.len() + 1) / 2;
  let mut left = first;
  let right = left.split_off(split);
  let center: Vec<Vec<BracketMatch>> = rounds_iter.collect();

  BracketTree {
    left,
    right,
    center,
    edges,
    stats,
    champion,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{MatchKey, Winner};

  fn real_match(
    id: u64,
    round: u32,
    slot: usize,
    a: Option<u64>,
    b: Option<u64>,
    winner: Winner,
  ) -> BracketMatch {
    BracketMatch {
      key: MatchKey::Real { id },
      round,
      slot,
      participant_a_id: a,
      participant_b_id: b,
      name_a: a.map(|v| format!("P{v}")),
      name_b: b.map(|v| format!("P{v}")),
      score_a: 0,
      score_b: 0,
      winner,
      is_bye: a.is_some() != b.is_some(),
    }
  }

  #[test]
  fn test_empty_division_composes_empty_tree() {
    let tree = compose_division(0, &[]);
    assert!(tree.is_empty());
    assert!(tree.champion.is_none());
    assert!(tree.edges.is_empty());
  }

  #[test]
  fn test_five_participant_layout() {
    let real = vec![
      real_match(10, 1, 0, Some(1), Some(2), Winner::A),
      real_match(11, 1, 1, Some(3), Some(4), Winner::None),
      real_match(12, 1, 2, Some(5), None, Winner::A),
    ];
    let tree = compose_division(5, &real);

    // Round 1: two contested rows plus the bye row, split 2 left / 1 right.
    assert_eq!(tree.left.len(), 2);
    assert_eq!(tree.right.len(), 1);
    assert!(tree.right[0].is_bye);

    // Center: round 2 shows two rows (one contested, one carried bye), the
    // final shows one.
    assert_eq!(tree.center.len(), 2);
    assert_eq!(tree.center[0].len(), 2);
    assert_eq!(tree.center[1].len(), 1);
    assert!(tree.center.iter().flatten().all(|m| m.is_placeholder()));

    // Nothing decided past round 1 yet.
    assert!(tree.champion.is_none());
    assert_eq!(tree.stats[0], RoundStats { round: 1, total: 2, completed: 1, byes: 1 });
  }

  #[test]
  fn test_real_match_replaces_placeholder() {
    let real = vec![real_match(20, 2, 0, Some(1), Some(3), Winner::None)];
    let tree = compose_division(4, &real);
    assert_eq!(tree.center[0][0].key, MatchKey::Real { id: 20 });
    assert!(tree.left.iter().all(|m| m.is_placeholder()));
  }

  #[test]
  fn test_champion_requires_final_winner() {
    let undecided = vec![
      real_match(10, 1, 0, Some(1), Some(2), Winner::A),
      real_match(11, 1, 1, Some(3), Some(4), Winner::B),
      real_match(20, 2, 0, Some(1), Some(4), Winner::None),
    ];
    let tree = compose_division(4, &undecided);
    assert!(tree.champion.is_none());

    let decided = vec![
      real_match(10, 1, 0, Some(1), Some(2), Winner::A),
      real_match(11, 1, 1, Some(3), Some(4), Winner::B),
      real_match(20, 2, 0, Some(1), Some(4), Winner::B),
    ];
    let tree = compose_division(4, &decided);
    assert_eq!(tree.champion.as_deref(), Some("P4"));
  }

  #[test]
  fn test_edges_connect_decided_round_one_to_final() {
    let real = vec![
      real_match(10, 1, 0, Some(1), Some(2), Winner::A),
      real_match(11, 1, 1, Some(3), Some(4), Winner::B),
      real_match(20, 2, 0, Some(1), Some(4), Winner::None),
    ];
    let tree = compose_division(4, &real);
    let targets: Vec<_> = tree
      .edges
      .iter()
      .filter(|edge| matches!(edge.from, MatchKey::Real { .. }))
      .map(|edge| edge.to)
      .collect();
    assert_eq!(targets, vec![MatchKey::Real { id: 20 }, MatchKey::Real { id: 20 }]);
  }

  #[test]
  fn test_boxes_carry_branch_sides() {
    let tree = compose_division(8, &[]);
    let boxes = tree.boxes();
    assert_eq!(boxes.len(), 4 + 2 + 1);
    assert_eq!(boxes.iter().filter(|(_, side)| *side == Side::Left).count(), 2);
    assert_eq!(boxes.iter().filter(|(_, side)| *side == Side::Right).count(), 2);
    assert_eq!(boxes.iter().filter(|(_, side)| *side == Side::Center).count(), 3);
  }

  #[test]
  fn test_participant_count_from_round_one() {
    let real = vec![
      real_match(10, 1, 0, Some(1), Some(2), Winner::None),
      real_match(11, 1, 1, Some(3), Some(4), Winner::None),
      real_match(12, 1, 2, Some(5), None, Winner::A),
    ];
    assert_eq!(participant_count(&real), 5);
    assert_eq!(participant_count(&[]), 0);
  }
}
