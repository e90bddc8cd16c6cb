use std::sync::LazyLock;

use ego_tree::iter::Edge;
use ego_tree::NodeId;
use regex::Regex;
use scraper::node::Node;
use scraper::Selector;
use tracing::trace;

use super::dom::{self, Dom, DomNode};

/// Site chrome, widgets and non-content elements.
const CHROME_SELECTORS: &[&str] = &[
    "script",
    "style",
    "template",
    "noscript",
    "iframe",
    "embed",
    "object",
    "nav",
    "header",
    "footer",
    "aside",
    "form",
    "[role=navigation]",
    "[role=banner]",
    "[role=contentinfo]",
    "[role=search]",
    ".navbar",
    ".menu",
    ".navigation",
    ".sidebar",
    ".header",
    ".footer",
    ".breadcrumb",
    ".breadcrumbs",
    ".cookie",
    ".cookies",
    ".modal",
    ".popup",
    ".social",
    ".share",
    ".sharing",
    ".feedback",
    ".rating",
    ".article-rating",
    ".subscribe",
    "img[width=\"1\"][height=\"1\"]",
    "img[width=\"0\"]",
];

/// Classes that mark disclosure widgets whose toggle buttons carry the label.
static DISCLOSURE_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s_-])(dropdown|spoiler|accordion|collaps(?:e|ible)|expander|toggle)(?:$|[\s_-])").unwrap()
});
static COPYRIGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:©|\(c\)\s|copyright\b)").unwrap());

static CHROME: LazyLock<Vec<Selector>> =
    LazyLock::new(|| CHROME_SELECTORS.iter().map(|s| dom::selector(s)).collect());
static BUTTONS: LazyLock<Selector> = LazyLock::new(|| dom::selector("button"));

/// Elements that stay even when they carry no text.
const KEEP_EMPTY: &[&str] = &["img", "br", "hr", "td", "th", "tr", "html", "head", "body"];

/// Prunes page chrome from the snapshot. Returns the number of pruned roots.
pub fn strip(dom: &mut Dom) -> usize {
    let mut pruned = 0;
    for sel in CHROME.iter() {
        pruned += dom.prune_matching(sel);
    }

    let buttons: Vec<NodeId> = dom
        .select(&BUTTONS)
        .filter(|b| !is_disclosure_toggle(**b))
        .map(|b| (*b).id())
        .collect();
    pruned += buttons.len();
    dom.prune_all(buttons);

    let copyright = copyright_elements(dom);
    pruned += copyright.len();
    dom.prune_all(copyright);

    let empty = empty_elements(dom);
    pruned += empty.len();
    dom.prune_all(empty);

    trace!("boilerplate: pruned {} subtrees", pruned);
    pruned
}

/// Buttons inside `<summary>` or a dropdown-like widget are the widget label.
fn is_disclosure_toggle(node: DomNode<'_>) -> bool {
    node.ancestors().take(3).any(|a| {
        dom::tag_name(a) == Some("summary") || DISCLOSURE_CLASS_RE.is_match(dom::class_attr(a))
    })
}

pub fn is_disclosure_widget(node: DomNode<'_>) -> bool {
    dom::tag_name(node) == Some("details") || DISCLOSURE_CLASS_RE.is_match(dom::class_attr(node))
}

/// Innermost elements whose own text starts with a copyright mark.
fn copyright_elements(dom: &Dom) -> Vec<NodeId> {
    let mut out = Vec::new();
    for node in dom.body().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        if !COPYRIGHT_RE.is_match(text) {
            continue;
        }
        if let Some(parent) = node.parent() {
            if !dom.is_pruned(parent) && dom::tag_name(parent) != Some("body") {
                out.push(parent.id());
            }
        }
    }
    out
}

/// Elements with no text and no images below them, found in one post-order pass.
fn empty_elements(dom: &Dom) -> Vec<NodeId> {
    struct Open {
        id: NodeId,
        text: bool,
        media: bool,
    }

    let body = dom.body().id();
    let mut out = Vec::new();
    let mut stack: Vec<Open> = Vec::new();
    for edge in dom.live_edges(*dom.body()) {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(_) => stack.push(Open {
                    id: node.id(),
                    text: false,
                    media: false,
                }),
                Node::Text(text) if !text.trim().is_empty() => {
                    if let Some(top) = stack.last_mut() {
                        top.text = true;
                    }
                }
                _ => {}
            },
            Edge::Close(node) => {
                let Some(name) = dom::tag_name(node) else {
                    continue;
                };
                let Some(open) = stack.pop() else {
                    continue;
                };
                if open.id != body && !KEEP_EMPTY.contains(&name) && !open.text && !open.media {
                    out.push(open.id);
                }
                if let Some(parent) = stack.last_mut() {
                    parent.text |= open.text;
                    parent.media |= open.media || matches!(name, "img" | "svg");
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_text(html: &str) -> String {
        let mut dom = Dom::parse(html);
        strip(&mut dom);
        dom.text(*dom.body())
    }

    #[test]
    fn removes_chrome() {
        let text = live_text(
            "<body><nav>Home Docs</nav><header>Logo</header><main><p>Content here</p></main>\
             <div class=\"cookie\">We use cookies</div><footer>Contacts</footer>\
             <script>track()</script></body>",
        );
        assert_eq!(text, "Content here");
    }

    #[test]
    fn removes_copyright_line() {
        let text = live_text("<body><p>Real text</p><p>© 2024 ELMA365. All rights reserved</p></body>");
        assert_eq!(text, "Real text");
    }

    #[test]
    fn keeps_disclosure_toggle_buttons() {
        let text = live_text(
            "<body><div class=\"dropdown\"><button>Show details</button><div>Hidden body</div></div>\
             <button>Print</button></body>",
        );
        assert_eq!(text, "Show details Hidden body");
    }

    #[test]
    fn empty_elements_pruned_but_images_kept() {
        let mut dom = Dom::parse("<body><div><span></span></div><p><img src=\"a.png\"></p></body>");
        let n = strip(&mut dom);
        assert_eq!(n, 2);
        let img = dom.select(&dom::selector("img")).count();
        assert_eq!(img, 1);
    }

    #[test]
    fn deeply_nested_empty_wrappers_are_pruned() {
        let depth = 3000;
        let html = format!(
            "<body>{}{}<p>Text</p></body>",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        let mut dom = Dom::parse(&html);
        assert_eq!(strip(&mut dom), depth);
        assert_eq!(dom.text(*dom.body()), "Text");
    }
}
