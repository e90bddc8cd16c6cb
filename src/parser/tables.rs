use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use super::blocks::{BlockBody, TableRow};
use super::dom::{self, Dom, DomNode};

/// Header cells longer than this are treated as data.
const HEADER_CELL_MAX_CHARS: usize = 40;
const HEADER_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

static DASH_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+[—–-]\s+").unwrap());

/// Live cell nodes per row, `thead`/`tbody`/`tfoot` flattened, nested tables ignored.
pub fn cell_nodes<'a>(dom: &Dom, table: DomNode<'a>) -> Vec<Vec<DomNode<'a>>> {
    let mut rows = Vec::new();
    for child in table.children() {
        match dom::tag_name(child) {
            Some("tr") => push_row(dom, child, &mut rows),
            Some("thead" | "tbody" | "tfoot") => {
                for tr in child.children() {
                    if dom::tag_name(tr) == Some("tr") {
                        push_row(dom, tr, &mut rows);
                    }
                }
            }
            _ => {}
        }
    }
    rows
}

fn push_row<'a>(dom: &Dom, tr: DomNode<'a>, rows: &mut Vec<Vec<DomNode<'a>>>) {
    if dom.is_pruned(tr) {
        return;
    }
    let cells: Vec<_> = tr
        .children()
        .filter(|c| matches!(dom::tag_name(*c), Some("td" | "th")))
        .collect();
    if !cells.is_empty() {
        rows.push(cells);
    }
}

/// First row is a header when it has several columns, all short and unpunctuated.
pub fn looks_like_header(row: &[String]) -> bool {
    row.len() > 1
        && row.iter().all(|cell| {
            cell.chars().count() <= HEADER_CELL_MAX_CHARS && !cell.contains(HEADER_PUNCTUATION)
        })
}

/// Builds a `table` block from cell texts. Rows with no text are dropped.
pub fn build(rows: Vec<Vec<String>>) -> Option<BlockBody> {
    let mut rows: Vec<Vec<String>> = rows
        .into_iter()
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .collect();
    if rows.is_empty() {
        return None;
    }

    let header = if looks_like_header(&rows[0]) {
        rows.remove(0)
    } else {
        Vec::new()
    };
    let unique: HashSet<&String> = header.iter().collect();
    let keyed = !header.is_empty()
        && unique.len() == header.len()
        && header.iter().all(|h| !h.is_empty());

    let rows = rows
        .into_iter()
        .map(|cells| {
            if keyed && cells.len() == header.len() {
                TableRow::Keyed(header.iter().cloned().zip(cells).collect::<BTreeMap<_, _>>())
            } else {
                TableRow::Cells(cells)
            }
        })
        .collect::<Vec<_>>();

    if rows.is_empty() && header.is_empty() {
        return None;
    }
    Some(BlockBody::Table { header, rows })
}

/// Splits a lone cell into paragraph texts: by line, then by spaced dashes,
/// then on the first colon.
pub fn split_cell(lines: &[String]) -> Vec<String> {
    if lines.len() > 1 {
        return lines.to_vec();
    }
    let Some(line) = lines.first() else {
        return Vec::new();
    };

    let dashed: Vec<String> = DASH_SPLIT_RE
        .split(line)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if dashed.len() > 1 {
        return dashed;
    }

    if let Some((head, tail)) = line.split_once(": ") {
        let (head, tail) = (head.trim(), tail.trim());
        if !head.is_empty() && !tail.is_empty() {
            return vec![head.to_string(), tail.to_string()];
        }
    }
    vec![line.clone()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn header_detected_and_rows_keyed() {
        let table = build(vec![
            row(&["Field", "Type"]),
            row(&["name", "string"]),
            row(&["age", "number", "extra"]),
        ])
        .unwrap();
        let BlockBody::Table { header, rows } = table else {
            panic!("expected table");
        };
        assert_eq!(header, vec!["Field", "Type"]);
        assert!(matches!(&rows[0], TableRow::Keyed(m) if m["Field"] == "name" && m["Type"] == "string"));
        assert!(matches!(&rows[1], TableRow::Cells(c) if c.len() == 3));
    }

    #[test]
    fn punctuated_first_row_is_data() {
        let table = build(vec![row(&["Open the app.", "Then save"]), row(&["a", "b"])]).unwrap();
        let BlockBody::Table { header, rows } = table else {
            panic!("expected table");
        };
        assert!(header.is_empty());
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn single_column_never_has_header() {
        assert!(!looks_like_header(&row(&["Name"])));
        let long = "x".repeat(HEADER_CELL_MAX_CHARS + 1);
        assert!(!looks_like_header(&row(&["a", &long])));
    }

    #[test]
    fn duplicate_header_names_keep_arrays() {
        let table = build(vec![row(&["Col", "Col"]), row(&["1", "2"])]).unwrap();
        let BlockBody::Table { rows, .. } = table else {
            panic!("expected table");
        };
        assert!(matches!(&rows[0], TableRow::Cells(_)));
    }

    #[test]
    fn empty_table_is_dropped() {
        assert!(build(vec![row(&["", ""])]).is_none());
    }

    #[test]
    fn lone_cell_split() {
        assert_eq!(split_cell(&row(&["one", "two"])), vec!["one", "two"]);
        assert_eq!(
            split_cell(&row(&["Лид — потенциальный клиент"])),
            vec!["Лид", "потенциальный клиент"]
        );
        assert_eq!(split_cell(&row(&["Note: keep backups"])), vec!["Note", "keep backups"]);
        assert_eq!(split_cell(&row(&["plain-text cell"])), vec!["plain-text cell"]);
    }
}
