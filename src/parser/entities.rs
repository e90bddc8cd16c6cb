//! Block → entity projection for the searchable index.

use serde_json::{json, Value};

use super::blocks::{Block, BlockBody, ListItem};

/// Paragraphs shorter than this are not indexed.
pub const MIN_PARAGRAPH_CHARS: usize = 200;
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub kind: &'static str,
    pub data: Value,
}

/// One entity per eligible block, payloads carrying position and provenance.
/// Entities are keyed to a document when stored.
pub fn extract_entities(blocks: &[Block], breadcrumbs: &[String], url: &str) -> Vec<NewEntity> {
    blocks
        .iter()
        .enumerate()
        .filter_map(|(index, block)| {
            let mut data = payload(block)?;
            if let Value::Object(map) = &mut data {
                map.insert("block_index".into(), json!(index));
                map.insert("breadcrumbs".into(), json!(breadcrumbs));
                map.insert("url".into(), json!(url));
            }
            Some(NewEntity {
                kind: block.body.type_name(),
                data,
            })
        })
        .collect()
}

fn payload(block: &Block) -> Option<Value> {
    let value = match &block.body {
        BlockBody::Header { level, text, id, kind } => json!({
            "level": level,
            "text": text,
            "anchor": id,
            "kind": kind,
        }),
        BlockBody::List { ordered, items } => {
            let texts: Vec<String> = items.iter().map(ListItem::text).collect();
            json!({
                "ordered": ordered,
                "items_count": texts.len(),
                "text": preview(&texts.join("\n")),
                "items": texts,
            })
        }
        BlockBody::CodeBlock { language, code } => json!({
            "language": language,
            "code": code,
            "text": preview(code),
        }),
        BlockBody::SpecialBlock(special) => json!({
            "kind": special.kind,
            "heading": special.heading,
            "content": special.content,
            "text": preview(&special.body_text()),
        }),
        BlockBody::Image { src, alt } => json!({
            "src": src,
            "alt": alt,
        }),
        BlockBody::Paragraph { text, .. } if text.chars().count() >= MIN_PARAGRAPH_CHARS => json!({
            "text": text,
            "semantic_role": block.semantic_role,
        }),
        BlockBody::Paragraph { .. } | BlockBody::Table { .. } => return None,
    };
    Some(value)
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::blocks::{SemanticRole, SpecialBlock, SpecialItem, SpecialKind};

    fn blocks() -> Vec<Block> {
        vec![
            Block::new(BlockBody::Header { level: 2, text: "Setup".into(), id: "setup".into(), kind: None }),
            Block::new(BlockBody::Paragraph { text: "short".into(), children: vec![] }),
            Block {
                body: BlockBody::Paragraph { text: "Long ".repeat(50), children: vec![] },
                semantic_role: Some(SemanticRole::Capability),
                token_count: None,
            },
            Block::new(BlockBody::CodeBlock { language: Some("js".into()), code: "run()".into() }),
            Block::new(BlockBody::Table { header: vec![], rows: vec![] }),
            Block::new(BlockBody::SpecialBlock(SpecialBlock {
                kind: SpecialKind::TableOfContents,
                heading: Some("В этой статье".into()),
                content: vec![SpecialItem { tag: "li".into(), text: "A".into() }],
                text: None,
            })),
        ]
    }

    #[test]
    fn eligible_blocks_only() {
        let crumbs = vec!["CRM".to_string()];
        let entities = extract_entities(&blocks(), &crumbs, "https://e.com/help/crm/lead.html");
        let kinds: Vec<_> = entities.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["header", "paragraph", "code_block", "special_block"]);
        assert_eq!(entities[1].data["block_index"], 2);
        assert_eq!(entities[1].data["semantic_role"], "capability");
        assert_eq!(entities[0].data["anchor"], "setup");
        assert_eq!(entities[2].data["language"], "js");
        assert_eq!(entities[3].data["kind"], "В этой статье");
        assert!(entities.iter().all(|e| e.data["breadcrumbs"][0] == "CRM"));
    }

    #[test]
    fn no_blocks_no_entities() {
        assert!(extract_entities(&[], &[], "u").is_empty());
    }
}
