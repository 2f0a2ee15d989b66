//! Entity records for the attribute ledger.

use super::ordered::OrderedMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Categories of tracked entities.
///
/// The declaration order is the category order of the ledger file and of
/// every rendered lock list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityCategory {
    /// A person or any other acting character.
    Character,
    /// An item, artifact, or object.
    Item,
    /// A place, set, or environment.
    Scene,
    /// An ability, technique, or power.
    Skill,
    /// Anything else worth keeping consistent.
    #[default]
    Other,
}

impl EntityCategory {
    /// All categories, in ledger order.
    pub const ALL: [EntityCategory; 5] = [
        EntityCategory::Character,
        EntityCategory::Item,
        EntityCategory::Scene,
        EntityCategory::Skill,
        EntityCategory::Other,
    ];

    /// The label used in the ledger file and in rendered text.
    pub fn label(&self) -> &'static str {
        match self {
            EntityCategory::Character => "人物",
            EntityCategory::Item => "道具",
            EntityCategory::Scene => "场景",
            EntityCategory::Skill => "技能",
            EntityCategory::Other => "其他",
        }
    }

    /// Parse a category from its file label or its English name.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|category| {
            category.label() == label || format!("{category:?}").eq_ignore_ascii_case(label)
        })
    }

    /// Parse a category, treating anything unrecognized as `Other`.
    pub fn from_label_lossy(label: &str) -> Self {
        Self::from_label(label).unwrap_or(EntityCategory::Other)
    }
}

/// One recorded overwrite of an attribute with a different value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    #[serde(rename = "属性")]
    pub attribute: String,
    #[serde(rename = "旧值", deserialize_with = "lenient_string")]
    pub old_value: String,
    #[serde(rename = "新值", deserialize_with = "lenient_string")]
    pub new_value: String,
    #[serde(rename = "章节")]
    pub chapter: u32,
}

/// A history record flattened together with the entity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeConflict {
    pub category: EntityCategory,
    pub name: String,
    pub attribute: String,
    pub old_value: String,
    pub new_value: String,
    pub chapter: u32,
}

impl AttributeConflict {
    /// One-line description used in logs and CLI output.
    pub fn describe(&self) -> String {
        format!(
            "{}.{}.{}: '{}' -> '{}' (第{}章)",
            self.category.label(),
            self.name,
            self.attribute,
            self.old_value,
            self.new_value,
            self.chapter
        )
    }
}

/// A tracked entity with its current attributes and change history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(skip)]
    pub category: EntityCategory,
    #[serde(skip)]
    pub name: String,
    /// Current attribute values, in first-written order.
    #[serde(rename = "属性", default, deserialize_with = "lenient_attributes")]
    pub attributes: OrderedMap<String>,
    #[serde(rename = "首次出现章节", default)]
    pub first_seen_chapter: u32,
    #[serde(rename = "最后更新章节", default)]
    pub last_updated_chapter: u32,
    /// Append-only record of value changes.
    #[serde(rename = "历史记录", default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttributeChange>,
}

impl Entity {
    /// Create an entity first seen in `chapter`.
    pub fn new(category: EntityCategory, name: impl Into<String>, chapter: u32) -> Self {
        Self {
            category,
            name: name.into(),
            attributes: OrderedMap::new(),
            first_seen_chapter: chapter,
            last_updated_chapter: chapter,
            history: Vec::new(),
        }
    }

    /// Set an attribute, recording history when an existing value changes.
    ///
    /// Returns the recorded change, if any. Writing the value an attribute
    /// already holds records nothing.
    pub fn set_attribute(
        &mut self,
        attribute: &str,
        value: impl Into<String>,
        chapter: u32,
    ) -> Option<AttributeChange> {
        let value = value.into();
        let change = match self.attributes.get(attribute) {
            Some(old) if *old != value => Some(AttributeChange {
                attribute: attribute.to_string(),
                old_value: old.clone(),
                new_value: value.clone(),
                chapter,
            }),
            _ => None,
        };

        if let Some(ref change) = change {
            self.history.push(change.clone());
        }
        self.attributes.insert(attribute, value);
        change
    }

    pub fn attribute(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }

    /// Render as `name: attr=val, attr=val`.
    pub fn render_attributes(&self) -> String {
        let attrs: Vec<String> = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}: {}", self.name, attrs.join(", "))
    }

    /// History flattened into conflict records.
    pub fn conflicts(&self) -> impl Iterator<Item = AttributeConflict> + '_ {
        self.history.iter().map(move |change| AttributeConflict {
            category: self.category,
            name: self.name.clone(),
            attribute: change.attribute.clone(),
            old_value: change.old_value.clone(),
            new_value: change.new_value.clone(),
            chapter: change.chapter,
        })
    }
}

/// Accept any JSON scalar where a string is expected.
///
/// Hand-edited files and model-written extractions sometimes store numbers
/// or booleans as attribute values.
pub(crate) fn json_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    serde_json::Value::deserialize(deserializer).map(json_to_string)
}

fn lenient_attributes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<OrderedMap<String>, D::Error> {
    let raw = OrderedMap::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, json_to_string(v))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_labels_round_trip() {
        for category in EntityCategory::ALL {
            assert_eq!(EntityCategory::from_label(category.label()), Some(category));
        }
        assert_eq!(
            EntityCategory::from_label("character"),
            Some(EntityCategory::Character)
        );
        assert_eq!(EntityCategory::from_label_lossy("法宝"), EntityCategory::Other);
    }

    #[test]
    fn test_same_value_records_no_history() {
        let mut entity = Entity::new(EntityCategory::Item, "光罩", 1);
        assert!(entity.set_attribute("颜色", "淡黄色", 1).is_none());
        assert!(entity.set_attribute("颜色", "淡黄色", 2).is_none());
        assert!(entity.history.is_empty());

        let change = entity.set_attribute("颜色", "淡蓝色", 3).unwrap();
        assert_eq!(change.old_value, "淡黄色");
        assert_eq!(change.new_value, "淡蓝色");
        assert_eq!(change.chapter, 3);
        assert_eq!(entity.history.len(), 1);
        assert_eq!(entity.attribute("颜色"), Some("淡蓝色"));
    }

    #[test]
    fn test_render_attributes_keeps_write_order() {
        let mut entity = Entity::new(EntityCategory::Character, "杨尘", 1);
        entity.set_attribute("职位", "术研院主事", 1);
        entity.set_attribute("状态", "健康", 1);
        entity.set_attribute("职位", "术研院主事", 2);

        assert_eq!(entity.render_attributes(), "杨尘: 职位=术研院主事, 状态=健康");
    }

    #[test]
    fn test_lenient_values_on_load() {
        let json = r#"{"属性": {"等级": 3, "完好": true, "备注": null}, "首次出现章节": 2}"#;
        let entity: Entity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.attribute("等级"), Some("3"));
        assert_eq!(entity.attribute("完好"), Some("true"));
        assert_eq!(entity.attribute("备注"), Some(""));
        assert_eq!(entity.first_seen_chapter, 2);
        assert!(entity.history.is_empty());
    }
}
