//! Immutable parsed-HTML snapshot with a prune set.
//!
//! The tree itself is never mutated. Stages that "remove" elements record
//! the ids of the whole removed subtree in `pruned`; every traversal skips them.

use std::collections::HashSet;
use std::sync::LazyLock;

use ego_tree::iter::Edge;
use ego_tree::{NodeId, NodeRef};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

pub type DomNode<'a> = NodeRef<'a, Node>;

/// Elements whose boundaries separate words (and lines, in `lines`).
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "details", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "li", "main", "nav", "ol",
    "p", "pre", "section", "summary", "table", "td", "th", "tr", "ul",
];

pub struct Dom {
    html: Html,
    pruned: HashSet<NodeId>,
}

impl Dom {
    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
            pruned: HashSet::new(),
        }
    }

    /// Prunes each node together with its whole subtree.
    pub fn prune_all(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            let Some(root) = self.html.tree.get(id) else {
                continue;
            };
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                // Already-pruned subtrees are complete.
                if self.pruned.insert(node.id()) {
                    stack.extend(node.children());
                }
            }
        }
    }

    /// Prunes every live element matching `selector`; returns how many.
    pub fn prune_matching(&mut self, selector: &Selector) -> usize {
        let ids: Vec<NodeId> = self
            .html
            .select(selector)
            .filter(|el| !self.is_pruned(**el))
            .map(|el| (*el).id())
            .collect();
        let n = ids.len();
        self.prune_all(ids);
        n
    }

    /// True when the node or any ancestor was pruned.
    pub fn is_pruned(&self, node: DomNode<'_>) -> bool {
        self.pruned.contains(&node.id())
    }

    /// Live elements matching `selector`, in document order.
    pub fn select<'a, 'b>(
        &'a self,
        selector: &'b Selector,
    ) -> impl Iterator<Item = ElementRef<'a>> + 'b
    where
        'a: 'b,
    {
        self.html.select(selector).filter(move |el| !self.is_pruned(**el))
    }

    /// First live match of the selectors, tried in order.
    pub fn first_match<'a>(&'a self, selectors: &'a [Selector]) -> Option<ElementRef<'a>> {
        selectors.iter().find_map(|sel| self.select(sel).next())
    }

    pub fn body(&self) -> ElementRef<'_> {
        static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));
        self.html
            .select(&BODY)
            .next()
            .unwrap_or_else(|| self.html.root_element())
    }

    /// Whitespace-collapsed text of a subtree, skipping pruned nodes.
    pub fn text(&self, node: DomNode<'_>) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        collapse(&out)
    }

    /// Text with original whitespace kept (code), `<br>` as newline.
    pub fn raw_text(&self, node: DomNode<'_>) -> String {
        let mut out = String::new();
        self.collect_raw(node, &mut out);
        out
    }

    /// Text split into lines at block-level element boundaries; each line
    /// collapsed, empty lines dropped.
    pub fn lines(&self, node: DomNode<'_>) -> Vec<String> {
        let mut out = String::new();
        self.collect_lines(node, &mut out);
        out.lines().map(collapse).filter(|l| !l.is_empty()).collect()
    }

    /// Whether the subtree contains a live element matching one of `tags`.
    pub fn contains_tag(&self, node: DomNode<'_>, tags: &[&str]) -> bool {
        node.descendants().skip(1).any(|d| {
            d.value()
                .as_element()
                .is_some_and(|el| tags.contains(&el.name()))
                && !self.pruned.contains(&d.id())
        })
    }

    /// Open/close edges of the live part of a subtree, in document order.
    pub fn live_edges<'a>(&'a self, node: DomNode<'a>) -> impl Iterator<Item = Edge<'a, Node>> + 'a {
        let mut skipping: Option<NodeId> = None;
        node.traverse().filter(move |edge| match (skipping, edge) {
            (Some(id), Edge::Close(n)) if n.id() == id => {
                skipping = None;
                false
            }
            (Some(_), _) => false,
            (None, Edge::Open(n)) if self.pruned.contains(&n.id()) => {
                skipping = Some(n.id());
                false
            }
            (None, _) => true,
        })
    }

    /// Like `text`, but gives up once the subtree holds more than `limit`
    /// bytes of text or `limit` nodes.
    pub fn short_text(&self, node: DomNode<'_>, limit: usize) -> Option<String> {
        let mut out = String::new();
        let mut nodes = 0;
        for edge in self.live_edges(node) {
            match edge {
                Edge::Open(n) => {
                    nodes += 1;
                    if nodes > limit {
                        return None;
                    }
                    match n.value() {
                    Node::Text(text) => {
                        out.push_str(text);
                        if out.len() > limit {
                            return None;
                        }
                    }
                        Node::Element(el) if is_spaced(el.name()) => out.push(' '),
                        _ => {}
                    }
                }
                Edge::Close(n) => {
                    if tag_name(n).is_some_and(is_spaced) {
                        out.push(' ');
                    }
                }
            }
        }
        Some(collapse(&out))
    }

    fn collect_text(&self, node: DomNode<'_>, out: &mut String) {
        for edge in self.live_edges(node) {
            match edge {
                Edge::Open(n) => match n.value() {
                    Node::Text(text) => out.push_str(text),
                    Node::Element(el) if is_spaced(el.name()) => out.push(' '),
                    _ => {}
                },
                Edge::Close(n) => {
                    if tag_name(n).is_some_and(is_spaced) {
                        out.push(' ');
                    }
                }
            }
        }
    }

    fn collect_raw(&self, node: DomNode<'_>, out: &mut String) {
        for edge in self.live_edges(node) {
            let Edge::Open(n) = edge else {
                continue;
            };
            match n.value() {
                Node::Text(text) => out.push_str(text),
                Node::Element(el) if el.name() == "br" => out.push('\n'),
                _ => {}
            }
        }
    }

    fn collect_lines(&self, node: DomNode<'_>, out: &mut String) {
        for edge in self.live_edges(node) {
            match edge {
                Edge::Open(n) => match n.value() {
                    Node::Text(text) => out.push_str(text),
                    Node::Element(el) if is_spaced(el.name()) => out.push('\n'),
                    _ => {}
                },
                Edge::Close(n) => {
                    if tag_name(n).is_some_and(|name| BLOCK_TAGS.contains(&name)) {
                        out.push('\n');
                    }
                }
            }
        }
    }
}

fn is_spaced(name: &str) -> bool {
    name == "br" || BLOCK_TAGS.contains(&name)
}

pub fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tag_name<'a>(node: DomNode<'a>) -> Option<&'a str> {
    node.value().as_element().map(|el| el.name())
}

pub fn attr<'a>(node: DomNode<'a>, name: &str) -> Option<&'a str> {
    node.value().as_element().and_then(|el| el.attr(name))
}

/// Space-joined class attribute, empty when absent.
pub fn class_attr<'a>(node: DomNode<'a>) -> &'a str {
    attr(node, "class").unwrap_or_default()
}

pub fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

pub fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pruned_subtrees_are_invisible() {
        let mut dom = Dom::parse("<body><p>keep <span class=x>drop</span> me</p></body>");
        assert_eq!(dom.prune_matching(&selector(".x")), 1);
        let p = dom.select(&selector("p")).next().unwrap();
        assert_eq!(dom.text(*p), "keep me");
        assert!(dom.select(&selector(".x")).next().is_none());
    }

    #[test]
    fn pruning_covers_descendants() {
        let mut dom = Dom::parse("<body><div class=x><p><span>inner</span></p></div><p>kept</p></body>");
        dom.prune_matching(&selector(".x"));
        let span = dom.html.select(&selector("span")).next().unwrap();
        assert!(dom.is_pruned(*span));
        assert_eq!(dom.short_text(*dom.body(), 256).as_deref(), Some("kept"));
        assert_eq!(dom.short_text(*dom.body(), 2), None);
    }

    #[test]
    fn lines_follow_block_boundaries() {
        let dom = Dom::parse("<div><p>one</p><p>two <b>bold</b></p>three<br>four</div>");
        let div = dom.select(&selector("div")).next().unwrap();
        assert_eq!(dom.lines(*div), vec!["one", "two bold", "three", "four"]);
    }

    #[test]
    fn raw_text_keeps_indentation() {
        let dom = Dom::parse("<pre><code>fn main() {\n    run();\n}</code></pre>");
        let pre = dom.select(&selector("pre")).next().unwrap();
        assert_eq!(dom.raw_text(*pre), "fn main() {\n    run();\n}");
    }
}
