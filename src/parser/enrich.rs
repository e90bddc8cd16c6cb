use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tiktoken_rs::CoreBPE;
use tracing::warn;

use super::blocks::{Block, BlockBody, SemanticRole, SpecialKind};

static TOKENIZER: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!("cl100k_base unavailable, counting whitespace tokens: {}", e);
        None
    }
});

static DEFINITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[^.!?]{1,80}?\s(?:—|–|-|это|является|представляет собой|называется|is an?|is the|refers to|means)\s").unwrap()
});
static CONFIGURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:настро\w*|параметр\w*|конфигур\w*|включите|укажите|выберите|задайте|configure\w*|settings?|parameters?|enable|specify)\b").unwrap()
});
static CAPABILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:позволяет|можно|может|могут|возможность|поддерживает|allows?|enables?|can|supports?)\b").unwrap()
});

/// Wraps bodies into blocks with roles, token counts and unique header ids.
pub fn enrich(bodies: Vec<BlockBody>) -> Vec<Block> {
    let mut ids = HeaderIds::default();
    bodies
        .into_iter()
        .map(|mut body| {
            if let BlockBody::Header { text, id, .. } = &mut body {
                *id = ids.next(text);
            }
            let semantic_role = semantic_role(&body);
            let token_count = Some(count_tokens(&body.text()));
            Block {
                body,
                semantic_role,
                token_count,
            }
        })
        .collect()
}

pub fn semantic_role(body: &BlockBody) -> Option<SemanticRole> {
    match body {
        BlockBody::Header { .. } => Some(SemanticRole::Section),
        BlockBody::List { .. } => Some(SemanticRole::ListItem),
        BlockBody::SpecialBlock(special) => Some(match special.kind {
            SpecialKind::TableOfContents => SemanticRole::Toc,
            SpecialKind::Example => SemanticRole::Example,
            SpecialKind::Warning => SemanticRole::Warning,
            SpecialKind::Important | SpecialKind::Note => SemanticRole::Important,
        }),
        BlockBody::Paragraph { text, .. } => {
            if DEFINITION_RE.is_match(text) {
                Some(SemanticRole::Definition)
            } else if CONFIGURATION_RE.is_match(text) {
                Some(SemanticRole::Configuration)
            } else if CAPABILITY_RE.is_match(text) {
                Some(SemanticRole::Capability)
            } else {
                None
            }
        }
        BlockBody::Table { .. } | BlockBody::CodeBlock { .. } | BlockBody::Image { .. } => None,
    }
}

pub fn count_tokens(text: &str) -> usize {
    match TOKENIZER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.split_whitespace().count(),
    }
}

/// ASCII-folded, lowercase, non-alphanumeric runs → `-`.
pub fn slugify(text: &str) -> String {
    deunicode::deunicode(text)
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Default)]
struct HeaderIds {
    used: HashSet<String>,
}

impl HeaderIds {
    fn next(&mut self, text: &str) -> String {
        let mut base = slugify(text);
        if base.is_empty() {
            base = "section".to_string();
        }
        let mut candidate = base.clone();
        let mut n = 0;
        while self.used.contains(&candidate) {
            n += 1;
            candidate = format!("{}-{}", base, n);
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(text: &str) -> BlockBody {
        BlockBody::Header {
            level: 2,
            text: text.into(),
            id: String::new(),
            kind: None,
        }
    }

    fn para(text: &str) -> BlockBody {
        BlockBody::Paragraph {
            text: text.into(),
            children: Vec::new(),
        }
    }

    fn ids(blocks: &[Block]) -> Vec<&str> {
        blocks
            .iter()
            .filter_map(|b| match &b.body {
                BlockBody::Header { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn duplicate_headers_get_suffixes() {
        let blocks = enrich(vec![header("Overview"), header("Overview"), header("Overview 1"), header("!!!")]);
        assert_eq!(ids(&blocks), vec!["overview", "overview-1", "overview-1-1", "section"]);
    }

    #[test]
    fn slugs_are_ascii_folded() {
        assert_eq!(slugify("Café Überblick"), "cafe-uberblick");
        assert_eq!(slugify("Права доступа: роли"), "prava-dostupa-roli");
        assert!(slugify("Настройка «бизнес-процессов»").is_ascii());
    }

    #[test]
    fn paragraph_roles() {
        assert_eq!(semantic_role(&para("Лид — это потенциальный клиент компании.")), Some(SemanticRole::Definition));
        assert_eq!(semantic_role(&para("Чтобы включить уведомления, укажите адрес.")), Some(SemanticRole::Configuration));
        assert_eq!(semantic_role(&para("Модуль позволяет отправлять письма.")), Some(SemanticRole::Capability));
        assert_eq!(semantic_role(&para("Пользователь открывает форму.")), None);
    }

    #[test]
    fn every_block_gets_token_count() {
        let blocks = enrich(vec![para("Open the settings page"), header("Setup")]);
        assert!(blocks.iter().all(|b| b.token_count.is_some_and(|n| n > 0)));
        assert_eq!(blocks[1].semantic_role, Some(SemanticRole::Section));
    }
}
