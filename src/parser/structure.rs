//! Structural walk: live DOM → ordered `BlockBody` list.

use std::collections::HashSet;
use std::sync::LazyLock;

use ego_tree::NodeId;
use regex::Regex;
use scraper::node::Node;
use url::Url;

use super::blocks::{collapse_whitespace, BlockBody, HeaderKind, Inline, Link, ListItem};
use super::boilerplate::is_disclosure_widget;
use super::dom::{self, Dom, DomNode};
use super::tables;

/// Synthetic header level for disclosure widget labels.
pub const DISCLOSURE_HEADER_LEVEL: u8 = 4;

const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "br", "cite", "code", "data", "del", "dfn", "em", "font", "i",
    "ins", "kbd", "label", "mark", "q", "s", "samp", "small", "span", "strike", "strong", "sub",
    "sup", "time", "u", "var", "wbr",
];
const BLOCK_DESCENDANTS: &[&str] = &[
    "p", "div", "ul", "ol", "table", "pre", "h1", "h2", "h3", "h4", "h5", "h6", "section",
    "article", "blockquote", "figure", "details",
];
const IGNORED_TAGS: &[&str] = &[
    "hr", "br", "button", "input", "select", "textarea", "option", "svg", "canvas", "video",
    "audio", "map", "head", "meta", "link", "title", "script", "style",
];

static TAB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)^(?:вкладка|tab)\s*[«"“„']\s*[^»"”“']+?\s*[»"”“']"#).unwrap());
static STYLED_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:h|heading|header|title)[-_]?([1-6])$").unwrap());
static CODE_CONTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)(?:code-?example|code-?block|code-?sample|highlight|codehilite|sourcecode|listing)(?:$|\s)").unwrap()
});
static LANGUAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(?:language|lang)-([\w+#.-]+)").unwrap());
static DISCLOSURE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)title|header|heading|toggle|summary|label|trigger|head").unwrap()
});
static DISCLOSURE_BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)content|body|panel|collapse|inner").unwrap());
static DECORATIVE_IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[-_.])(icon|ico|logo|spacer|pixel|blank|bullet|arrow|sprite|divider|separator|badge|avatar)(?:[-_.\d]|$)").unwrap()
});

/// Walks the subtree under `root` and returns main-flow blocks in DOM order.
pub fn walk<'d>(dom: &'d Dom, root: DomNode<'d>, base: Option<&'d Url>) -> Vec<BlockBody> {
    let mut walker = Walker {
        dom,
        base,
        out: Vec::new(),
        consumed: HashSet::new(),
        tasks: vec![Task::Children(root.first_child())],
    };
    walker.run();
    walker.out
}

/// Pending work; the stack replaces recursion so nesting depth is unbounded.
enum Task<'d> {
    /// Resume a container's children at this sibling.
    Children(Option<DomNode<'d>>),
    Element(DomNode<'d>),
}

enum Step<'a> {
    Visit(DomNode<'a>),
    Space,
}

struct Walker<'d> {
    dom: &'d Dom,
    base: Option<&'d Url>,
    out: Vec<BlockBody>,
    consumed: HashSet<NodeId>,
    tasks: Vec<Task<'d>>,
}

impl<'d> Walker<'d> {
    fn skip(&self, node: DomNode<'_>) -> bool {
        self.consumed.contains(&node.id())
            || self.dom.is_pruned(node)
            || !matches!(node.value(), Node::Text(_) | Node::Element(_))
    }

    fn is_inline(&self, node: DomNode<'_>) -> bool {
        match node.value() {
            Node::Text(_) => true,
            Node::Element(el) => {
                INLINE_TAGS.contains(&el.name()) && !self.dom.contains_tag(node, BLOCK_DESCENDANTS)
            }
            _ => false,
        }
    }

    fn run(&mut self) {
        while let Some(task) = self.tasks.pop() {
            match task {
                Task::Children(next) => self.children(next),
                Task::Element(node) => {
                    if !self.skip(node) {
                        self.element(node);
                    }
                }
            }
        }
    }

    fn container(&mut self, node: DomNode<'d>) {
        self.tasks.push(Task::Children(node.first_child()));
    }

    /// Collects loose inline siblings up to the next block child, which runs
    /// before the remaining siblings.
    fn children(&mut self, mut next: Option<DomNode<'d>>) {
        let mut pending = Vec::new();
        while let Some(child) = next {
            next = child.next_sibling();
            if self.skip(child) {
                continue;
            }
            if self.is_inline(child) {
                pending.push(child);
                continue;
            }
            self.flush(&mut pending);
            self.tasks.push(Task::Children(next));
            self.tasks.push(Task::Element(child));
            return;
        }
        self.flush(&mut pending);
    }

    /// Turns a run of loose inline nodes into a paragraph (or a lone code block).
    fn flush(&mut self, pending: &mut Vec<DomNode<'_>>) {
        let nodes: Vec<_> = pending
            .drain(..)
            .filter(|n| {
                !self.dom.text(*n).is_empty()
                    || dom::tag_name(*n) == Some("img")
                    || self.dom.contains_tag(*n, &["img"])
            })
            .collect();
        if nodes.is_empty() {
            return;
        }
        if let [only] = nodes.as_slice() {
            if dom::tag_name(*only) == Some("code") {
                self.code(*only);
                return;
            }
        }
        self.paragraph(&nodes);
        self.images_in(&nodes);
    }

    fn element(&mut self, node: DomNode<'d>) {
        let Some(name) = dom::tag_name(node) else {
            return;
        };
        if let Some(level) = dom::heading_level(name) {
            self.header(node, level);
            return;
        }
        match name {
            "p" => match styled_heading_level(node) {
                Some(level) => self.header(node, level),
                None => {
                    self.paragraph(&[node]);
                    self.images_in(&[node]);
                }
            },
            "pre" | "code" => self.code(node),
            "ul" => self.list(node, false),
            "ol" => self.list(node, true),
            "table" => self.table(node),
            "img" => self.image(node),
            "details" => {
                if !self.disclosure(node) {
                    self.container(node);
                }
            }
            _ if IGNORED_TAGS.contains(&name) => {}
            _ => {
                let class = dom::class_attr(node);
                if CODE_CONTAINER_RE.is_match(class) {
                    self.code_container(node);
                } else if !(is_disclosure_widget(node) && self.disclosure(node)) {
                    self.container(node);
                }
            }
        }
    }

    // ── Headers ──

    fn header(&mut self, node: DomNode<'_>, level: u8) {
        let text = clean_heading(&self.dom.text(node));
        if text.is_empty() {
            return;
        }
        let kind = TAB_RE.is_match(&text).then_some(HeaderKind::Tab);
        self.out.push(BlockBody::Header {
            level,
            text,
            id: String::new(),
            kind,
        });
    }

    /// Dropdown/disclosure widget → synthetic header + body paragraph.
    /// Returns false when no label can be found.
    fn disclosure(&mut self, node: DomNode<'_>) -> bool {
        let children: Vec<DomNode<'_>> = node
            .children()
            .filter(|c| !self.skip(*c) && !self.dom.text(*c).is_empty())
            .collect();
        let label_idx = children
            .iter()
            .position(|c| is_disclosure_label(*c))
            .or_else(|| {
                let elements = children.iter().filter(|c| c.value().is_element()).count();
                (elements >= 2)
                    .then(|| children.iter().position(|c| c.value().is_element()))
                    .flatten()
            });
        let Some(idx) = label_idx else {
            return false;
        };
        let label = clean_heading(&self.dom.text(children[idx]));
        if label.is_empty() {
            return false;
        }

        let (mut body, mut body_children) = self.inline_content(&children[idx + 1..]);
        if body.is_empty() {
            if let Some(panel) = node
                .next_siblings()
                .find(|s| !self.skip(*s) && s.value().is_element())
            {
                if DISCLOSURE_BODY_RE.is_match(dom::class_attr(panel)) {
                    (body, body_children) = self.inline_content(&[panel]);
                    self.consumed.insert(panel.id());
                }
            }
        }

        self.out.push(BlockBody::Header {
            level: DISCLOSURE_HEADER_LEVEL,
            text: label,
            id: String::new(),
            kind: None,
        });
        if !body.is_empty() {
            self.out.push(BlockBody::Paragraph {
                text: body,
                children: body_children,
            });
        }
        true
    }

    // ── Paragraphs & inline content ──

    fn paragraph(&mut self, nodes: &[DomNode<'_>]) {
        let (text, children) = self.inline_content(nodes);
        if !text.is_empty() {
            self.out.push(BlockBody::Paragraph { text, children });
        }
    }

    /// Flattened text plus inline runs; the runs are only kept when they contain a link.
    fn inline_content(&self, nodes: &[DomNode<'_>]) -> (String, Vec<Inline>) {
        let mut buf = String::new();
        let mut runs = Vec::new();
        for node in nodes {
            self.gather(*node, &mut buf, &mut runs);
        }
        if !buf.is_empty() {
            runs.push(Inline::Text(std::mem::take(&mut buf)));
        }

        let text = collapse_whitespace(&runs.iter().map(Inline::text).collect::<String>());
        if !runs.iter().any(|r| matches!(r, Inline::Link(_))) {
            return (text, Vec::new());
        }
        (text, tidy_runs(runs))
    }

    fn gather(&self, node: DomNode<'_>, buf: &mut String, runs: &mut Vec<Inline>) {
        let mut stack = vec![Step::Visit(node)];
        while let Some(step) = stack.pop() {
            let node = match step {
                Step::Visit(node) => node,
                Step::Space => {
                    buf.push(' ');
                    continue;
                }
            };
            if !self.skip(node) {
                self.gather_one(node, buf, runs, &mut stack);
            }
        }
    }

    fn gather_one<'a>(
        &self,
        node: DomNode<'a>,
        buf: &mut String,
        runs: &mut Vec<Inline>,
        stack: &mut Vec<Step<'a>>,
    ) {
        match node.value() {
            Node::Text(text) => buf.push_str(text),
            Node::Element(el) => match el.name() {
                "br" => buf.push(' '),
                "img" => {}
                "a" => {
                    let text = self.dom.text(node);
                    match el.attr("href").filter(|h| is_followable(h)) {
                        Some(href) if !text.is_empty() => {
                            if !buf.is_empty() {
                                runs.push(Inline::Text(std::mem::take(buf)));
                            }
                            runs.push(Inline::Link(Link {
                                text,
                                target: self.resolve(href),
                            }));
                        }
                        _ => {
                            buf.push(' ');
                            buf.push_str(&text);
                            buf.push(' ');
                        }
                    }
                }
                name => {
                    if !INLINE_TAGS.contains(&name) {
                        buf.push(' ');
                        stack.push(Step::Space);
                    }
                    stack.extend(node.children().rev().map(Step::Visit));
                }
            },
            _ => {}
        }
    }

    fn resolve(&self, href: &str) -> String {
        self.base
            .and_then(|base| base.join(href.trim()).ok())
            .map(String::from)
            .unwrap_or_else(|| href.trim().to_string())
    }

    // ── Code ──

    fn code(&mut self, node: DomNode<'_>) {
        let code = trim_code(&self.dom.raw_text(node));
        if code.is_empty() {
            return;
        }
        self.out.push(BlockBody::CodeBlock {
            language: code_language(node),
            code,
        });
    }

    fn code_container(&mut self, node: DomNode<'_>) {
        let pre = node
            .descendants()
            .find(|d| dom::tag_name(*d) == Some("pre") && !self.dom.is_pruned(*d));
        let source = pre.unwrap_or(node);
        let code = trim_code(&self.dom.raw_text(source));
        if code.is_empty() {
            return;
        }
        let language = code_language(source).or_else(|| code_language(node));
        self.out.push(BlockBody::CodeBlock { language, code });
    }

    // ── Lists ──

    fn list(&mut self, node: DomNode<'d>, ordered: bool) {
        let mut items = Vec::new();
        let mut nested = Vec::new();
        for li in node.children() {
            if self.skip(li) || dom::tag_name(li) != Some("li") {
                continue;
            }
            let mut parts = Vec::new();
            for child in li.children() {
                match dom::tag_name(child) {
                    Some("ul" | "ol") => nested.push(child),
                    _ => parts.push(child),
                }
            }
            if let Some(item) = self.list_item(&parts) {
                items.push(item);
            }
        }
        if !items.is_empty() {
            self.out.push(BlockBody::List { ordered, items });
        }
        self.tasks.extend(nested.into_iter().rev().map(Task::Element));
    }

    fn list_item(&self, parts: &[DomNode<'_>]) -> Option<ListItem> {
        let (text, mut children) = self.inline_content(parts);
        if text.is_empty() {
            return None;
        }
        if children.is_empty() {
            let text = strip_item_punctuation(&text);
            return (!text.is_empty()).then_some(ListItem::Text(text));
        }
        match children.last_mut() {
            Some(Inline::Text(t)) => {
                *t = strip_item_punctuation(t);
                if t.is_empty() {
                    children.pop();
                }
            }
            Some(Inline::Link(l)) => l.text = strip_item_punctuation(&l.text),
            None => {}
        }
        Some(ListItem::Rich { children })
    }

    // ── Tables ──

    fn table(&mut self, node: DomNode<'_>) {
        let cells = tables::cell_nodes(self.dom, node);
        if let [row] = cells.as_slice() {
            if let [cell] = row.as_slice() {
                self.lone_cell(*cell);
                return;
            }
        }
        let rows = cells
            .iter()
            .map(|row| row.iter().map(|c| self.dom.text(*c)).collect())
            .collect();
        if let Some(table) = tables::build(rows) {
            self.out.push(table);
        }
    }

    /// A 1×1 layout table: paragraph(s) instead of a table.
    fn lone_cell(&mut self, cell: DomNode<'_>) {
        let (_, children) = self.inline_content(&[cell]);
        if !children.is_empty() {
            self.paragraph(&[cell]);
            return;
        }
        for text in tables::split_cell(&self.dom.lines(cell)) {
            self.out.push(BlockBody::Paragraph {
                text,
                children: Vec::new(),
            });
        }
    }

    // ── Images ──

    fn image(&mut self, node: DomNode<'_>) {
        let src = dom::attr(node, "src")
            .or_else(|| dom::attr(node, "data-src"))
            .map(str::trim)
            .unwrap_or_default();
        if src.is_empty() {
            return;
        }
        let alt = collapse_whitespace(dom::attr(node, "alt").unwrap_or_default());
        if alt.is_empty() && is_decorative(src) {
            return;
        }
        let src = self.resolve(src);
        self.out.push(BlockBody::Image { src, alt });
    }

    fn images_in(&mut self, nodes: &[DomNode<'_>]) {
        for node in nodes {
            for d in node.descendants() {
                if dom::tag_name(d) == Some("img") && !self.dom.is_pruned(d) {
                    self.image(d);
                }
            }
        }
    }
}

fn is_followable(href: &str) -> bool {
    let href = href.trim().to_ascii_lowercase();
    !(href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:"))
}

/// Drops whitespace-only runs and trims the outer edges.
fn tidy_runs(runs: Vec<Inline>) -> Vec<Inline> {
    let mut out: Vec<Inline> = runs
        .into_iter()
        .filter_map(|run| match run {
            Inline::Text(t) => {
                let squeezed = squeeze(&t);
                (!squeezed.trim().is_empty()).then_some(Inline::Text(squeezed))
            }
            link => Some(link),
        })
        .collect();
    if let Some(Inline::Text(t)) = out.first_mut() {
        *t = t.trim_start().to_string();
    }
    if let Some(Inline::Text(t)) = out.last_mut() {
        *t = t.trim_end().to_string();
    }
    out
}

/// Collapses whitespace runs to one space, keeping edge spaces.
fn squeeze(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn strip_item_punctuation(s: &str) -> String {
    s.trim_end()
        .trim_end_matches([';', '.'])
        .trim_end()
        .to_string()
}

fn clean_heading(s: &str) -> String {
    s.trim_end_matches(|c: char| c == '¶' || c == '#' || c.is_whitespace())
        .trim()
        .to_string()
}

fn styled_heading_level(node: DomNode<'_>) -> Option<u8> {
    dom::class_attr(node).split_whitespace().find_map(|token| {
        if let Some(caps) = STYLED_HEADING_RE.captures(token) {
            return caps[1].parse().ok();
        }
        matches!(
            token.to_ascii_lowercase().as_str(),
            "heading" | "subheading" | "title" | "subtitle"
        )
        .then_some(3)
    })
}

fn is_disclosure_label(node: DomNode<'_>) -> bool {
    matches!(dom::tag_name(node), Some("summary" | "button"))
        || DISCLOSURE_LABEL_RE.is_match(dom::class_attr(node))
}

fn code_language(node: DomNode<'_>) -> Option<String> {
    let candidates = std::iter::once(node).chain(
        node.descendants()
            .filter(|d| matches!(dom::tag_name(*d), Some("code" | "pre")))
            .take(2),
    );
    for n in candidates {
        for key in ["data-lang", "data-language"] {
            if let Some(lang) = dom::attr(n, key).map(str::trim).filter(|l| !l.is_empty()) {
                return Some(lang.to_ascii_lowercase());
            }
        }
        if let Some(caps) = LANGUAGE_RE.captures(dom::class_attr(n)) {
            return Some(caps[1].to_ascii_lowercase());
        }
    }
    None
}

/// Removes blank leading/trailing lines and trailing spaces; keeps indentation.
fn trim_code(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n").trim_end().to_string(),
        _ => String::new(),
    }
}

fn is_decorative(src: &str) -> bool {
    if src.starts_with("data:") {
        return true;
    }
    let file = src
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('/')
        .next()
        .unwrap_or_default();
    DECORATIVE_IMG_RE.is_match(file)
}
