//! Callout and table-of-contents extraction, run on the pruned snapshot
//! before structural parsing.

use std::collections::HashSet;
use std::sync::LazyLock;

use ego_tree::NodeId;
use regex::Regex;
use scraper::Selector;
use tracing::debug;

use super::blocks::{SpecialBlock, SpecialItem, SpecialKind};
use super::dom::{self, Dom, DomNode};

static LABELS: LazyLock<Vec<(SpecialKind, Regex)>> = LazyLock::new(|| {
    [
        (
            SpecialKind::TableOfContents,
            r"(?i)^(?:в этой статье|in this article|содержание|оглавление|table of contents)\s*:?$",
        ),
        (SpecialKind::Example, r"(?i)^(?:примеры?|examples?)\s*:?$"),
        (SpecialKind::Important, r"(?i)^(?:важно|important)\s*[:!]?$"),
        (SpecialKind::Note, r"(?i)^(?:примечание|note|обратите внимание)\s*:?$"),
        (SpecialKind::Warning, r"(?i)^(?:внимание|warning|предупреждение)\s*[:!]?$"),
    ]
    .into_iter()
    .map(|(kind, re)| (kind, Regex::new(re).unwrap()))
    .collect()
});

static INLINE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(важно|important|примечание|note|обратите внимание|внимание|warning|предупреждение|пример|example)\s*[:!]\s*(\S.*)$").unwrap()
});
static BEGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\[(]?\s*(?:begin|start|начало)\s+(warning|example|important)\s*[\])]?$").unwrap()
});
static END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\[(]?\s*(?:end|конец)\s+(warning|example|important)\s*[\])]?$").unwrap()
});

static CANDIDATES: LazyLock<Selector> =
    LazyLock::new(|| dom::selector("h1, h2, h3, h4, h5, h6, p, div, section"));
const CANDIDATE_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6", "p", "div", "section"];
static MARKERS: LazyLock<Selector> = LazyLock::new(|| dom::selector("p, div, span"));

/// Labels and delimiters are short; longer candidates are not read in full.
const LABEL_TEXT_LIMIT: usize = 256;

const BLOCK_CHILDREN: &[&str] = &[
    "p", "div", "ul", "ol", "table", "pre", "h1", "h2", "h3", "h4", "h5", "h6", "section",
];

/// Extracts special blocks and prunes the nodes they consumed.
pub fn extract(dom: &mut Dom) -> Vec<SpecialBlock> {
    let (mut blocks, consumed) = delimited(dom);
    dom.prune_all(consumed);

    let (labelled, consumed) = labelled(dom);
    dom.prune_all(consumed);
    blocks.extend(labelled);

    if !blocks.is_empty() {
        debug!("special blocks: {}", blocks.len());
    }
    blocks
}

fn kind_from_word(word: &str) -> SpecialKind {
    match word.to_lowercase().as_str() {
        "warning" | "внимание" | "предупреждение" => SpecialKind::Warning,
        "example" | "пример" => SpecialKind::Example,
        "примечание" | "note" | "обратите внимание" => SpecialKind::Note,
        _ => SpecialKind::Important,
    }
}

fn label_kind(text: &str) -> Option<SpecialKind> {
    LABELS
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(kind, _)| *kind)
}

// ── Delimiter-bounded ──

fn delimited(dom: &Dom) -> (Vec<SpecialBlock>, Vec<NodeId>) {
    let mut blocks = Vec::new();
    let mut claimed: HashSet<NodeId> = HashSet::new();

    for marker in dom.select(&MARKERS) {
        let marker = *marker;
        if is_claimed(&claimed, marker) {
            continue;
        }
        let Some(text) = dom.short_text(marker, LABEL_TEXT_LIMIT) else {
            continue;
        };
        let Some(caps) = BEGIN_RE.captures(&text) else {
            continue;
        };
        let kind = kind_from_word(&caps[1]);

        let mut span = vec![marker.id()];
        let mut parts = Vec::new();
        let mut closed = false;
        for sib in marker.next_siblings() {
            if dom.is_pruned(sib) {
                continue;
            }
            let sib_text = dom.text(sib);
            span.push(sib.id());
            if let Some(end) = END_RE.captures(&sib_text) {
                if kind_from_word(&end[1]) == kind {
                    closed = true;
                    break;
                }
            }
            if !sib_text.is_empty() {
                parts.push(sib_text);
            }
        }
        if !closed {
            continue;
        }

        claimed.extend(span.iter().copied());
        if !parts.is_empty() {
            blocks.push(SpecialBlock {
                kind,
                heading: None,
                content: Vec::new(),
                text: Some(parts.join("\n")),
            });
        }
    }
    (blocks, claimed.into_iter().collect())
}

// ── Label-triggered ──

fn labelled(dom: &Dom) -> (Vec<SpecialBlock>, Vec<NodeId>) {
    let mut blocks = Vec::new();
    let mut consumed: HashSet<NodeId> = HashSet::new();

    for el in dom.select(&CANDIDATES) {
        let node = *el;
        if is_claimed(&consumed, node) {
            continue;
        }
        let name = el.value().name();
        let inline_candidate = name == "p" || (name == "div" && !dom.contains_tag(node, BLOCK_CHILDREN));
        let text = match dom.short_text(node, LABEL_TEXT_LIMIT) {
            Some(text) => text,
            None if inline_candidate => dom.text(node),
            None => continue,
        };
        if text.is_empty() || has_child_with_text(dom, node, &text) {
            continue;
        }

        if let Some(kind) = label_kind(&text) {
            let level = dom::heading_level(el.value().name()).unwrap_or(6);
            let toc = kind == SpecialKind::TableOfContents;
            let (mut content, mut nodes) = collect_following(dom, node, level, toc);
            if content.is_empty() {
                if let Some(parent) = node.parent() {
                    (content, nodes) = collect_following(dom, parent, level, toc);
                }
            }
            if content.is_empty() {
                continue;
            }
            if toc {
                consumed.insert(node.id());
                consumed.extend(nodes);
            }
            blocks.push(SpecialBlock {
                kind,
                heading: Some(text),
                content,
                text: None,
            });
            continue;
        }

        if !inline_candidate {
            continue;
        }
        if let Some(caps) = INLINE_LABEL_RE.captures(&text) {
            let label = caps[1].trim().to_string();
            blocks.push(SpecialBlock {
                kind: kind_from_word(&label),
                heading: Some(label),
                content: vec![SpecialItem {
                    tag: name.to_string(),
                    text: caps[2].trim().to_string(),
                }],
                text: None,
            });
            consumed.insert(node.id());
        }
    }
    (blocks, consumed.into_iter().collect())
}

fn is_claimed(claimed: &HashSet<NodeId>, node: DomNode<'_>) -> bool {
    !claimed.is_empty()
        && (claimed.contains(&node.id()) || node.ancestors().any(|a| claimed.contains(&a.id())))
}

/// A wrapper whose only text is a candidate child's text defers to that child.
fn has_child_with_text(dom: &Dom, node: DomNode<'_>, text: &str) -> bool {
    node.children()
        .filter(|c| dom::tag_name(*c).is_some_and(|n| CANDIDATE_TAGS.contains(&n)))
        .filter(|c| !dom.is_pruned(*c))
        .any(|c| dom.text(c) == text)
}

/// Sibling content after `start` up to the next heading of level `<= level`.
/// With `single_list`, collection ends after the first list.
fn collect_following(
    dom: &Dom,
    start: DomNode<'_>,
    level: u8,
    single_list: bool,
) -> (Vec<SpecialItem>, Vec<NodeId>) {
    let mut items = Vec::new();
    let mut nodes = Vec::new();
    for sib in start.next_siblings() {
        if dom.is_pruned(sib) {
            continue;
        }
        let Some(name) = dom::tag_name(sib) else {
            let text = dom.text(sib);
            if !text.is_empty() {
                items.push(SpecialItem { tag: "text".into(), text });
                nodes.push(sib.id());
            }
            continue;
        };
        if dom::heading_level(name).is_some_and(|l| l <= level) {
            break;
        }
        match name {
            "ul" | "ol" => {
                for li in sib.children() {
                    if dom::tag_name(li) != Some("li") || dom.is_pruned(li) {
                        continue;
                    }
                    let text = dom.text(li);
                    if !text.is_empty() {
                        items.push(SpecialItem { tag: "li".into(), text });
                    }
                }
                if single_list {
                    nodes.push(sib.id());
                    break;
                }
            }
            _ => {
                let text = dom.text(sib);
                if !text.is_empty() {
                    items.push(SpecialItem { tag: name.to_string(), text });
                }
            }
        }
        nodes.push(sib.id());
    }
    (items, nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn items(block: &SpecialBlock) -> Vec<(&str, &str)> {
        block
            .content
            .iter()
            .map(|i| (i.tag.as_str(), i.text.as_str()))
            .collect()
    }

    #[test]
    fn toc_heading_consumes_its_list() {
        let mut dom = Dom::parse(
            "<body><h1>Title</h1><p>Body</p><h2>В этой статье</h2><ul><li>A</li><li>B</li></ul></body>",
        );
        let blocks = extract(&mut dom);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, SpecialKind::TableOfContents);
        assert_eq!(blocks[0].heading.as_deref(), Some("В этой статье"));
        assert_eq!(items(&blocks[0]), vec![("li", "A"), ("li", "B")]);
        assert_eq!(dom.text(*dom.body()), "Title Body");
    }

    #[test]
    fn example_heading_is_additive_and_stops_at_same_level() {
        let mut dom = Dom::parse(
            "<body><h2>Примеры</h2><p>First example</p><h3>Sub</h3><p>More</p>\
             <h2>Next</h2><p>Unrelated</p></body>",
        );
        let blocks = extract(&mut dom);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, SpecialKind::Example);
        assert_eq!(
            items(&blocks[0]),
            vec![("p", "First example"), ("h3", "Sub"), ("p", "More")]
        );
        assert!(dom.text(*dom.body()).contains("First example"));
    }

    #[test]
    fn paragraph_trigger_stops_at_any_heading() {
        let mut dom = Dom::parse(
            "<body><p>Important</p><p>Back up first</p><h4>Other</h4><p>Skip</p></body>",
        );
        let blocks = extract(&mut dom);
        assert_eq!(items(&blocks[0]), vec![("p", "Back up first")]);
    }

    #[test]
    fn wrapped_label_scans_parent_siblings() {
        let mut dom = Dom::parse(
            "<body><div class=\"toc-title\"><span>Содержание</span></div><ol><li>One</li></ol><p>Body text</p></body>",
        );
        let blocks = extract(&mut dom);
        assert_eq!(blocks.len(), 1);
        assert_eq!(items(&blocks[0]), vec![("li", "One")]);
        assert_eq!(dom.text(*dom.body()), "Body text");
    }

    #[test]
    fn delimited_warning() {
        let mut dom = Dom::parse(
            "<body><p>Intro text</p><p>begin warning</p><p>Do not delete the app.</p>\
             <p>It cannot be restored.</p><p>end warning</p><p>Outro</p></body>",
        );
        let blocks = extract(&mut dom);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, SpecialKind::Warning);
        assert_eq!(
            blocks[0].text.as_deref(),
            Some("Do not delete the app.\nIt cannot be restored.")
        );
        assert_eq!(dom.text(*dom.body()), "Intro text Outro");
    }

    #[test]
    fn unterminated_marker_is_left_alone() {
        let mut dom = Dom::parse("<body><p>begin example</p><p>code here</p></body>");
        assert!(extract(&mut dom).is_empty());
        assert!(dom.text(*dom.body()).contains("code here"));
    }

    #[test]
    fn inline_label_splits_on_colon() {
        let mut dom = Dom::parse("<body><div><p>Важно: сохраните изменения перед выходом</p></div></body>");
        let blocks = extract(&mut dom);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, SpecialKind::Important);
        assert_eq!(blocks[0].heading.as_deref(), Some("Важно"));
        assert_eq!(items(&blocks[0]), vec![("p", "сохраните изменения перед выходом")]);
        assert_eq!(dom.text(*dom.body()), "");
    }
}
