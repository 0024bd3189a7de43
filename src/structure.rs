use crate::types::BracketMatch;
use serde::Serialize;

// ── Round structure ────────────────────────────────────────────────────

/// Shape of one single-elimination round. `match_count` is the number of
/// contested matches; `byes` is the odd leftover that advances unopposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSpec {
  pub round: u32,
  pub match_count: usize,
  pub byes: usize,
}

impl RoundSpec {
  /// Rows a rendered bracket shows for this round, bye slots included.
  pub fn display_count(&self) -> usize {
    self.match_count + self.byes
  }
}

/// Derive the round sequence for `participants` entrants. Anything below two
/// entrants (negative counts included) yields no rounds at all.
pub fn rounds_for(participants: i64) -> Vec<RoundSpec> {
  let mut remaining = participants.max(0) as usize;
  let mut out = Vec::new();
  let mut round = 1u32;
  while remaining > 1 {
    let match_count = remaining / 2;
    let byes = remaining % 2;
    out.push(RoundSpec { round, match_count, byes });
    remaining = match_count + byes;
    round += 1;
  }
  out
}

pub fn total_matches(rounds: &[RoundSpec]) -> usize {
  rounds.iter().map(|spec| spec.match_count).sum()
}

/// Pre-render slots for a bracket with no authoritative data yet: one
/// placeholder per display row, trailing bye rows flagged. Built from the
/// same recurrence as `rounds_for`, so repeated calls agree exactly.
pub fn placeholder_rounds(participants: i64) -> Vec<Vec<BracketMatch>> {
  rounds_for(participants)
    .iter()
    .map(|spec| {
      (0..spec.display_count())
        .map(|slot| {
          let mut slot_match = BracketMatch::placeholder(spec.round, slot);
          slot_match.is_bye = slot >= spec.match_count;
          slot_match
        })
        .collect()
    })
    .collect()
}
