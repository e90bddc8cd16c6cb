use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One normalized content block: the typed body plus derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub body: BlockBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_role: Option<SemanticRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockBody {
    Header {
        level: u8,
        text: String,
        #[serde(default)]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<HeaderKind>,
    },
    Paragraph {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<Inline>,
    },
    List {
        ordered: bool,
        items: Vec<ListItem>,
    },
    Table {
        #[serde(default)]
        header: Vec<String>,
        rows: Vec<TableRow>,
    },
    CodeBlock {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        code: String,
    },
    Image {
        src: String,
        #[serde(default)]
        alt: String,
    },
    SpecialBlock(SpecialBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderKind {
    Tab,
}

/// Inline paragraph/list content: plain text runs interleaved with links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inline {
    Text(String),
    Link(Link),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListItem {
    Text(String),
    Rich { children: Vec<Inline> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableRow {
    Keyed(BTreeMap<String, String>),
    Cells(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialBlock {
    pub kind: SpecialKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<SpecialItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialItem {
    pub tag: String,
    pub text: String,
}

/// Callout kinds, serialized with the site's own labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialKind {
    #[serde(rename = "В этой статье")]
    TableOfContents,
    #[serde(rename = "Пример")]
    Example,
    #[serde(rename = "Важно")]
    Important,
    #[serde(rename = "Примечание")]
    Note,
    #[serde(rename = "Внимание")]
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticRole {
    Section,
    ListItem,
    Toc,
    Example,
    Important,
    Warning,
    Definition,
    Configuration,
    Capability,
}

impl Inline {
    pub fn text(&self) -> &str {
        match self {
            Inline::Text(t) => t,
            Inline::Link(l) => &l.text,
        }
    }
}

impl ListItem {
    pub fn text(&self) -> String {
        match self {
            ListItem::Text(t) => t.clone(),
            ListItem::Rich { children } => flatten_inlines(children),
        }
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        let children: &[Inline] = match self {
            ListItem::Text(_) => &[],
            ListItem::Rich { children } => children,
        };
        children.iter().filter_map(|c| match c {
            Inline::Link(l) => Some(l),
            Inline::Text(_) => None,
        })
    }
}

impl TableRow {
    pub fn cells(&self) -> Vec<&str> {
        match self {
            TableRow::Keyed(map) => map.values().map(String::as_str).collect(),
            TableRow::Cells(cells) => cells.iter().map(String::as_str).collect(),
        }
    }
}

impl SpecialBlock {
    /// Body text: either the delimited text or the collected items, one per line.
    pub fn body_text(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => self
                .content
                .iter()
                .map(|i| i.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl BlockBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            BlockBody::Header { .. } => "header",
            BlockBody::Paragraph { .. } => "paragraph",
            BlockBody::List { .. } => "list",
            BlockBody::Table { .. } => "table",
            BlockBody::CodeBlock { .. } => "code_block",
            BlockBody::Image { .. } => "image",
            BlockBody::SpecialBlock(_) => "special_block",
        }
    }

    /// Flattened readable text, used for filtering, token counts and search.
    pub fn text(&self) -> String {
        match self {
            BlockBody::Header { text, .. } => text.clone(),
            BlockBody::Paragraph { text, .. } => text.clone(),
            BlockBody::List { items, .. } => items
                .iter()
                .map(ListItem::text)
                .collect::<Vec<_>>()
                .join("\n"),
            BlockBody::Table { header, rows } => {
                let mut lines = Vec::with_capacity(rows.len() + 1);
                if !header.is_empty() {
                    lines.push(header.join(" | "));
                }
                for row in rows {
                    lines.push(row.cells().join(" | "));
                }
                lines.join("\n")
            }
            BlockBody::CodeBlock { code, .. } => code.clone(),
            BlockBody::Image { alt, .. } => alt.clone(),
            BlockBody::SpecialBlock(special) => match &special.heading {
                Some(h) => format!("{}\n{}", h, special.body_text()),
                None => special.body_text(),
            },
        }
    }

    /// Links carried by paragraph children and list item children.
    pub fn links(&self) -> Vec<&Link> {
        match self {
            BlockBody::Paragraph { children, .. } => children
                .iter()
                .filter_map(|c| match c {
                    Inline::Link(l) => Some(l),
                    Inline::Text(_) => None,
                })
                .collect(),
            BlockBody::List { items, .. } => items.iter().flat_map(ListItem::links).collect(),
            _ => Vec::new(),
        }
    }
}

impl Block {
    #[cfg(test)]
    pub fn new(body: BlockBody) -> Self {
        Self {
            body,
            semantic_role: None,
            token_count: None,
        }
    }

    pub fn text(&self) -> String {
        self.body.text()
    }
}

/// Joins inline runs into one whitespace-normalized string.
pub fn flatten_inlines(children: &[Inline]) -> String {
    let joined: String = children.iter().map(Inline::text).collect();
    collapse_whitespace(&joined)
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
