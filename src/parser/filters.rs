use std::sync::LazyLock;

use regex::Regex;

use super::blocks::{BlockBody, ListItem, SpecialBlock};

/// Header/paragraph/list text shorter than this is noise.
pub const MIN_TEXT_CHARS: usize = 3;
/// Stoplist and link-density rules only apply below this length.
const SHORT_BLOCK_CHARS: usize = 200;
const NAV_MIN_LINKS: usize = 3;
const NAV_LINK_RATIO: f64 = 0.8;
const BREADCRUMB_MAX_CHARS: usize = 120;

const STOPLIST: &[&str] = &[
    "была ли эта статья полезной",
    "была ли статья полезной",
    "was this article helpful",
    "was this page helpful",
    "оцените статью",
    "rate this article",
    "нашли ошибку",
    "found a mistake",
    "found a typo",
    "все права защищены",
    "all rights reserved",
    "подпишитесь на",
    "subscribe to our",
    "поделиться статьей",
    "share this",
    "вернуться наверх",
    "back to top",
    "предыдущая статья",
    "следующая статья",
    "previous article",
    "next article",
    "распечатать статью",
    "print this page",
    "мы используем cookie",
    "we use cookies",
];

static COPYRIGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:©|\(c\)\s|copyright\b)").unwrap());
static BREADCRUMB_SEP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s[›»|→>/]\s").unwrap());

/// Drops main-flow blocks that look like chrome rather than content.
pub fn drop_noise(blocks: Vec<BlockBody>) -> Vec<BlockBody> {
    blocks.into_iter().filter(|b| !is_noise(b)).collect()
}

pub fn is_noise(block: &BlockBody) -> bool {
    if !matches!(
        block,
        BlockBody::Header { .. } | BlockBody::Paragraph { .. } | BlockBody::List { .. }
    ) {
        return false;
    }
    let text = block.text();
    let chars = text.chars().count();
    if chars < MIN_TEXT_CHARS || COPYRIGHT_RE.is_match(&text) {
        return true;
    }
    if chars >= SHORT_BLOCK_CHARS {
        return false;
    }

    let lower = text.to_lowercase();
    if STOPLIST.iter().any(|phrase| lower.contains(phrase)) {
        return true;
    }

    let links = block.links();
    if links.len() >= NAV_MIN_LINKS {
        let link_chars: usize = links.iter().map(|l| l.text.chars().count()).sum();
        if link_chars as f64 / chars as f64 >= NAV_LINK_RATIO {
            return true;
        }
    }

    chars <= BREADCRUMB_MAX_CHARS && BREADCRUMB_SEP_RE.find_iter(&text).count() >= 2
}

/// Structural validation: every surviving block carries content.
pub fn validate(blocks: Vec<BlockBody>) -> Vec<BlockBody> {
    blocks.into_iter().filter_map(validate_one).collect()
}

fn validate_one(block: BlockBody) -> Option<BlockBody> {
    match block {
        BlockBody::List { ordered, items } => {
            let items: Vec<ListItem> = items
                .into_iter()
                .filter(|i| !i.text().trim().is_empty())
                .collect();
            (!items.is_empty()).then_some(BlockBody::List { ordered, items })
        }
        BlockBody::SpecialBlock(special) => {
            let content = special
                .content
                .into_iter()
                .filter(|i| !i.text.trim().is_empty())
                .collect::<Vec<_>>();
            let text = special.text.filter(|t| !t.trim().is_empty());
            (!content.is_empty() || text.is_some()).then_some(BlockBody::SpecialBlock(SpecialBlock {
                content,
                text,
                ..special
            }))
        }
        other => has_content(&other).then_some(other),
    }
}

fn has_content(block: &BlockBody) -> bool {
    match block {
        BlockBody::Header { text, .. } | BlockBody::Paragraph { text, .. } => !text.trim().is_empty(),
        BlockBody::Table { rows, .. } => !rows.is_empty(),
        BlockBody::CodeBlock { code, .. } => !code.trim().is_empty(),
        BlockBody::Image { src, .. } => !src.trim().is_empty(),
        BlockBody::List { items, .. } => !items.is_empty(),
        BlockBody::SpecialBlock(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::blocks::{Inline, Link, SpecialItem, SpecialKind, TableRow};

    fn para(text: &str) -> BlockBody {
        BlockBody::Paragraph {
            text: text.into(),
            children: Vec::new(),
        }
    }

    #[test]
    fn short_and_copyright_text_is_noise() {
        assert!(is_noise(&para("OK")));
        assert!(is_noise(&para("© 2024 Company")));
        assert!(!is_noise(&para("Body")));
    }

    #[test]
    fn stoplist_only_for_short_blocks() {
        assert!(is_noise(&para("Была ли статья полезной?")));
        let long = format!("{} we use cookies in the session store.", "Details. ".repeat(30));
        assert!(!is_noise(&para(&long)));
    }

    #[test]
    fn link_dense_paragraph_is_navigation() {
        let link = |t: &str| Inline::Link(Link { text: t.into(), target: "/help/x.html".into() });
        let block = BlockBody::Paragraph {
            text: "Processes Apps Portals".into(),
            children: vec![link("Processes"), Inline::Text(" ".into()), link("Apps"), Inline::Text(" ".into()), link("Portals")],
        };
        assert!(is_noise(&block));
    }

    #[test]
    fn breadcrumb_trail_is_noise() {
        assert!(is_noise(&para("Главная › Платформа › Процессы")));
        assert!(!is_noise(&para("Use a / b split")));
    }

    #[test]
    fn code_is_never_noise() {
        assert!(!is_noise(&BlockBody::CodeBlock { language: None, code: "x".into() }));
    }

    #[test]
    fn validation_drops_empty_blocks() {
        let blocks = vec![
            para("  "),
            BlockBody::List { ordered: false, items: vec![ListItem::Text(" ".into())] },
            BlockBody::Table { header: vec!["a".into(), "b".into()], rows: Vec::<TableRow>::new() },
            BlockBody::Image { src: "".into(), alt: "x".into() },
            BlockBody::SpecialBlock(SpecialBlock {
                kind: SpecialKind::Note,
                heading: Some("Note".into()),
                content: vec![SpecialItem { tag: "p".into(), text: "".into() }],
                text: None,
            }),
            para("kept"),
        ];
        assert_eq!(validate(blocks), vec![para("kept")]);
    }
}
