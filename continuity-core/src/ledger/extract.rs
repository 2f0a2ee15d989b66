//! Model-driven entity extraction from finished chapters.

use super::entity::{json_to_string, AttributeChange, EntityCategory};
use super::ordered::OrderedMap;
use super::store::EntityLedger;
use crate::error::UpstreamError;
use crate::services::{extract_fenced, TextGenerator};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Characters of chapter text sent to the model.
pub const DEFAULT_EXCERPT_CHARS: usize = 2000;

/// One entity as reported by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntity {
    pub category: EntityCategory,
    pub name: String,
    pub attributes: OrderedMap<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractionDocument {
    #[serde(rename = "实体", default)]
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(rename = "类别", default)]
    category: String,
    #[serde(rename = "名称", default)]
    name: String,
    #[serde(rename = "属性", default)]
    attributes: OrderedMap<serde_json::Value>,
}

/// Asks a text generator which entities a chapter establishes.
pub struct EntityExtractor<G> {
    generator: G,
    excerpt_chars: usize,
}

impl<G: TextGenerator> EntityExtractor<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    /// Entities in `text`, or none if the model call or its output fails.
    pub async fn extract(&self, text: &str) -> Vec<ExtractedEntity> {
        match self.try_extract(text).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!("Entity extraction failed, recording nothing: {e}");
                Vec::new()
            }
        }
    }

    /// Entities in `text`, reporting any failure.
    pub async fn try_extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, UpstreamError> {
        let excerpt: String = text.chars().take(self.excerpt_chars).collect();
        let response = self.generator.generate(&extraction_prompt(&excerpt)).await?;
        debug!("Extraction response: {response}");
        parse_entities(&response)
    }
}

fn extraction_prompt(excerpt: &str) -> String {
    format!(
        "请从以下小说章节中提取关键实体及其属性，用于后续章节的设定一致性检查。\n\n\
         实体类别只能是：人物、道具、场景、技能、其他。\n\
         属性只记录正文明确写出的客观设定（如身份、职位、外貌、颜色、状态、位置），不要推测。\n\n\
         【章节内容】\n{excerpt}\n\n\
         请只输出 JSON，格式如下：\n\
         {{\"实体\": [{{\"类别\": \"人物\", \"名称\": \"杨尘\", \"属性\": {{\"职位\": \"术研院主事\"}}}}]}}"
    )
}

/// Parse the model's JSON answer into entities.
///
/// Code fences and prose around the JSON object are ignored. Entries
/// without a name are dropped; unknown categories become `Other`.
pub fn parse_entities(response: &str) -> Result<Vec<ExtractedEntity>, UpstreamError> {
    let body = extract_fenced(response);
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => return Err(UpstreamError::Parse("no JSON object in extraction response".to_string())),
    };

    let document: ExtractionDocument =
        serde_json::from_str(json).map_err(|e| UpstreamError::Parse(e.to_string()))?;

    Ok(document
        .entities
        .into_iter()
        .filter(|raw| !raw.name.trim().is_empty())
        .map(|raw| ExtractedEntity {
            category: EntityCategory::from_label_lossy(&raw.category),
            name: raw.name.trim().to_string(),
            attributes: raw
                .attributes
                .into_iter()
                .map(|(k, v)| (k, json_to_string(v)))
                .collect(),
        })
        .collect())
}

/// Extract a chapter's entities and record them in the ledger.
///
/// Returns the attribute changes this chapter caused.
pub async fn analyze_chapter<G: TextGenerator>(
    ledger: &mut EntityLedger,
    extractor: &EntityExtractor<G>,
    text: &str,
    chapter: u32,
) -> Vec<AttributeChange> {
    let entities = extractor.extract(text).await;
    let mut changes = Vec::new();

    for entity in &entities {
        changes.extend(ledger.add_entity(
            entity.category,
            &entity.name,
            entity.attributes.iter(),
            chapter,
        ));
    }

    info!(
        "Chapter {chapter}: recorded {} entities, {} attribute changes",
        entities.len(),
        changes.len()
    );
    changes
}
