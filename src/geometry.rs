use crate::advancement::AdvancementMap;
use crate::types::MatchKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Geometry primitives ────────────────────────────────────────────────

pub type Unit = euclid::UnknownUnit;
pub type Point = euclid::Point2D<f64, Unit>;
pub type Rect = euclid::Rect<f64, Unit>;

pub fn point(x: f64, y: f64) -> Point {
  euclid::point2(x, y)
}

pub fn rect(x: f64, y: f64, width: f64, height: f64) -> Rect {
  Rect::new(euclid::point2(x, y), euclid::size2(width, height))
}

// ── Connector routing ──────────────────────────────────────────────────

/// Horizontal offset added to every connector coordinate when routing for
/// the print medium. The print surface's layout engine places boxes about
/// ten layout units left of where the interactive surface does; this
/// constant compensates. Tune it here, nowhere else.
pub const PRINT_OFFSET_X: f64 = 10.0;

/// Fraction of the horizontal gap at which a right-angle connector bends.
pub const BEND_RATIO: f64 = 0.7;

const ALIGN_EPSILON: f64 = 0.5;

/// Which branch of the two-sided tree a match box sits on. Left-branch boxes
/// emit from their right edge toward the center; right-branch boxes mirror
/// that; center boxes follow the left-branch rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
  Left,
  Right,
  Center,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
  pub from: MatchKey,
  pub to: MatchKey,
  pub points: Vec<[f64; 2]>,
}

/// Route one connector between a source and target box. 2 points when the
/// rows are vertically aligned, otherwise a 4-point right-angle polyline
/// bending at `BEND_RATIO` of the horizontal distance toward the target.
pub fn route(side: Side, source: &Rect, target: &Rect) -> Vec<Point> {
  let (start, end) = match side {
    Side::Right => (
      point(source.min_x(), source.center().y),
      point(target.max_x(), target.center().y),
    ),
    Side::Left | Side::Center => (
      point(source.max_x(), source.center().y),
      point(target.min_x(), target.center().y),
    ),
  };
  route_between(start, end)
}

fn route_between(start: Point, end: Point) -> Vec<Point> {
  if (start.y - end.y).abs() <= ALIGN_EPSILON {
    return vec![start, end];
  }
  let bend_x = start.x + (end.x - start.x) * BEND_RATIO;
  vec![
    start,
    point(bend_x, start.y),
    point(bend_x, end.y),
    end,
  ]
}

/// Route every advancement edge for which both endpoints have a laid-out
/// box. Edges with an unmeasured endpoint get no connector; the partial
/// advancement map already guarantees no connector for an unresolved match.
pub fn connectors(
  edges: &AdvancementMap,
  boxes: &HashMap<MatchKey, (Rect, Side)>,
  offset_x: f64,
) -> Vec<Connector> {
  let mut out = Vec::new();
  for (from, to) in edges {
    let Some((source, side)) = boxes.get(from) else {
      continue;
    };
    let Some((target, _)) = boxes.get(to) else {
      continue;
    };
    let points = route(*side, source, target)
      .into_iter()
      .map(|p| [p.x + offset_x, p.y])
      .collect();
    out.push(Connector { from: *from, to: *to, points });
  }
  out.sort_by_key(|connector| match connector.from {
    MatchKey::Real { id } => (0, id, 0, 0),
    MatchKey::Placeholder { round, slot } => (1, 0, round, slot as u32),
  });
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_aligned_rows_route_straight() {
    let source = rect(0.0, 10.0, 100.0, 40.0);
    let target = rect(200.0, 10.0, 100.0, 40.0);
    let points = route(Side::Left, &source, &target);
    assert_eq!(points, vec![point(100.0, 30.0), point(200.0, 30.0)]);
  }

  #[test]
  fn test_offset_rows_route_right_angle() {
    let source = rect(0.0, 0.0, 100.0, 40.0);
    let target = rect(200.0, 80.0, 100.0, 40.0);
    let points = route(Side::Left, &source, &target);
    // Bend sits at 70% of the 100-unit gap.
    assert_eq!(
      points,
      vec![
        point(100.0, 20.0),
        point(170.0, 20.0),
        point(170.0, 100.0),
        point(200.0, 100.0),
      ]
    );
  }

  #[test]
  fn test_right_side_is_mirrored() {
    let source = rect(400.0, 0.0, 100.0, 40.0);
    let target = rect(100.0, 80.0, 100.0, 40.0);
    let points = route(Side::Right, &source, &target);
    assert_eq!(points[0], point(400.0, 20.0));
    assert_eq!(*points.last().unwrap(), point(200.0, 100.0));
    // Bend still lands 70% of the way toward the target.
    assert_eq!(points[1].x, 400.0 + (200.0 - 400.0) * BEND_RATIO);
  }

  #[test]
  fn test_center_follows_left_rule() {
    let source = rect(0.0, 0.0, 100.0, 40.0);
    let target = rect(200.0, 80.0, 100.0, 40.0);
    assert_eq!(route(Side::Center, &source, &target), route(Side::Left, &source, &target));
  }

  #[test]
  fn test_no_connector_without_target_box() {
    let mut edges = AdvancementMap::new();
    edges.insert(
      MatchKey::Real { id: 1 },
      MatchKey::Placeholder { round: 2, slot: 0 },
    );
    let mut boxes = HashMap::new();
    boxes.insert(
      MatchKey::Real { id: 1 },
      (rect(0.0, 0.0, 100.0, 40.0), Side::Left),
    );
    // Target was never laid out, so nothing must be drawn.
    assert!(connectors(&edges, &boxes, 0.0).is_empty());
  }

  #[test]
  fn test_match_without_edge_gets_no_connector() {
    let edges = AdvancementMap::new();
    let mut boxes = HashMap::new();
    boxes.insert(
      MatchKey::Real { id: 1 },
      (rect(0.0, 0.0, 100.0, 40.0), Side::Left),
    );
    assert!(connectors(&edges, &boxes, 0.0).is_empty());
  }

  #[test]
  fn test_print_offset_shifts_x_only() {
    let mut edges = AdvancementMap::new();
    edges.insert(MatchKey::Real { id: 1 }, MatchKey::Real { id: 2 });
    let mut boxes = HashMap::new();
    boxes.insert(MatchKey::Real { id: 1 }, (rect(0.0, 10.0, 100.0, 40.0), Side::Left));
    boxes.insert(MatchKey::Real { id: 2 }, (rect(200.0, 10.0, 100.0, 40.0), Side::Left));
    let plain = connectors(&edges, &boxes, 0.0);
    let shifted = connectors(&edges, &boxes, PRINT_OFFSET_X);
    for (a, b) in plain[0].points.iter().zip(shifted[0].points.iter()) {
      assert_eq!(b[0], a[0] + PRINT_OFFSET_X);
      assert_eq!(b[1], a[1]);
    }
  }
}
