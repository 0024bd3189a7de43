use crate::compose::BracketTree;
use crate::geometry::{connectors, rect, Connector, Rect, Side, PRINT_OFFSET_X};
use crate::types::{BracketMatch, MatchKey, Winner};
use std::collections::HashMap;
use std::fmt::Write as _;

// ── Print layout ───────────────────────────────────────────────────────

pub const BOX_WIDTH: f64 = 180.0;
pub const BOX_HEIGHT: f64 = 48.0;
const COLUMN_GAP: f64 = 120.0;
const ROW_GAP: f64 = 16.0;
const ROUND_GAP: f64 = 28.0;
const MARGIN: f64 = 24.0;

struct PlacedBox<'a> {
  m: &'a BracketMatch,
  rect: Rect,
  side: Side,
}

/// Fixed grid for the print medium: left branch, center column with rounds
/// 2+ stacked top to bottom, right branch. This is the print surface's own
/// layout pass; connector geometry runs strictly after it returns.
fn layout_tree(tree: &BracketTree) -> Vec<PlacedBox<'_>> {
  let left_x = MARGIN;
  let center_x = MARGIN + BOX_WIDTH + COLUMN_GAP;
  let right_x = MARGIN + 2.0 * (BOX_WIDTH + COLUMN_GAP);

  let mut placed = Vec::new();
  for (row, m) in tree.left.iter().enumerate() {
    placed.push(PlacedBox {
      m,
      rect: rect(left_x, MARGIN + row as f64 * (BOX_HEIGHT + ROW_GAP), BOX_WIDTH, BOX_HEIGHT),
      side: Side::Left,
    });
  }
  for (row, m) in tree.right.iter().enumerate() {
    placed.push(PlacedBox {
      m,
      rect: rect(right_x, MARGIN + row as f64 * (BOX_HEIGHT + ROW_GAP), BOX_WIDTH, BOX_HEIGHT),
      side: Side::Right,
    });
  }
  let mut y = MARGIN;
  for round in &tree.center {
    for m in round {
      placed.push(PlacedBox {
        m,
        rect: rect(center_x, y, BOX_WIDTH, BOX_HEIGHT),
        side: Side::Center,
      });
      y += BOX_HEIGHT + ROW_GAP;
    }
    y += ROUND_GAP;
  }
  placed
}

// ── Document assembly ──────────────────────────────────────────────────

/// Serialize the composed tree into a self-contained SVG document. The
/// print surface renders in an isolated context, so everything it needs —
/// boxes, labels, connectors — is embedded here; nothing references the
/// interactive board.
pub fn print_document(tree: &BracketTree, title: &str) -> String {
  let placed = layout_tree(tree);

  let edge_map: HashMap<MatchKey, MatchKey> =
    tree.edges.iter().map(|edge| (edge.from, edge.to)).collect();
  let boxes: HashMap<MatchKey, (Rect, Side)> = placed
    .iter()
    .map(|p| (p.m.key, (p.rect, p.side)))
    .collect();
  let lines = connectors(&edge_map, &boxes, PRINT_OFFSET_X);

  let width = placed
    .iter()
    .map(|p| p.rect.max_x())
    .fold(0.0f64, f64::max)
    + MARGIN
    + PRINT_OFFSET_X;
  let height = placed
    .iter()
    .map(|p| p.rect.max_y())
    .fold(0.0f64, f64::max)
    + 2.0 * BOX_HEIGHT;

  let mut svg = String::new();
  let _ = write!(
    svg,
    "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width:.0}\" height=\"{height:.0}\" \
     viewBox=\"0 0 {width:.0} {height:.0}\" font-family=\"sans-serif\" font-size=\"12\">\n"
  );
  let _ = write!(
    svg,
    "<text x=\"{MARGIN}\" y=\"16\" font-size=\"15\" font-weight=\"bold\">{}</text>\n",
    xml_escape(title)
  );

  for connector in &lines {
    let _ = write!(svg, "{}\n", connector_element(connector));
  }
  for p in &placed {
    let _ = write!(svg, "{}\n", box_element(p));
  }

  let champion_y = height - BOX_HEIGHT / 2.0;
  let champion_x = MARGIN + BOX_WIDTH + COLUMN_GAP;
  let champion = tree.champion.as_deref().unwrap_or("undetermined");
  let _ = write!(
    svg,
    "<text x=\"{champion_x}\" y=\"{champion_y:.0}\" font-size=\"14\" font-weight=\"bold\">\
     Champion: {}</text>\n",
    xml_escape(champion)
  );

  svg.push_str("</svg>\n");
  svg
}

fn connector_element(connector: &Connector) -> String {
  let points = connector
    .points
    .iter()
    .map(|[x, y]| format!("{x:.1},{y:.1}"))
    .collect::<Vec<_>>()
    .join(" ");
  format!("<polyline class=\"connector\" points=\"{points}\" fill=\"none\" stroke=\"#777\" stroke-width=\"1.5\"/>")
}

fn box_element(p: &PlacedBox<'_>) -> String {
  let x = p.rect.min_x();
  let y = p.rect.min_y();
  let name_a = slot_label(p.m.name_a.as_deref(), p.m, true);
  let name_b = slot_label(p.m.name_b.as_deref(), p.m, false);
  let weight_a = if p.m.winner == Winner::A { " font-weight=\"bold\"" } else { "" };
  let weight_b = if p.m.winner == Winner::B { " font-weight=\"bold\"" } else { "" };
  let stroke = if p.m.is_placeholder() { "#bbb" } else { "#333" };

  let mut out = String::new();
  let _ = write!(
    out,
    "<rect class=\"match\" x=\"{x:.1}\" y=\"{y:.1}\" width=\"{BOX_WIDTH}\" height=\"{BOX_HEIGHT}\" \
     fill=\"#fff\" stroke=\"{stroke}\" rx=\"3\"/>"
  );
  let _ = write!(
    out,
    "<text x=\"{:.1}\" y=\"{:.1}\"{weight_a}>{}</text>",
    x + 8.0,
    y + 18.0,
    xml_escape(&name_a)
  );
  let _ = write!(
    out,
    "<text x=\"{:.1}\" y=\"{:.1}\"{weight_b}>{}</text>",
    x + 8.0,
    y + 38.0,
    xml_escape(&name_b)
  );
  if !p.m.is_placeholder() && !p.m.is_bye {
    let _ = write!(
      out,
      "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\">{}</text>\
       <text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\">{}</text>",
      x + BOX_WIDTH - 8.0,
      y + 18.0,
      p.m.score_a,
      x + BOX_WIDTH - 8.0,
      y + 38.0,
      p.m.score_b
    );
  }
  out
}

fn slot_label(name: Option<&str>, m: &BracketMatch, side_a: bool) -> String {
  if let Some(name) = name {
    return name.to_string();
  }
  let has_id = if side_a { m.participant_a_id } else { m.participant_b_id };
  if let Some(id) = has_id {
    return format!("Participant {id}");
  }
  if m.is_bye {
    "(bye)".to_string()
  } else {
    "TBD".to_string()
  }
}

fn xml_escape(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  for ch in raw.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&apos;"),
      _ => out.push(ch),
    }
  }
  out
}
