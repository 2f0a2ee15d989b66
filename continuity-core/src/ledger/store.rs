//! The entity attribute ledger.

use super::entity::{AttributeChange, AttributeConflict, Entity, EntityCategory};
use super::ordered::OrderedMap;
use crate::chapter::ChapterRange;
use crate::error::StorageError;
use crate::project::ProjectPaths;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// On-disk shape: category label -> entity name -> entity body.
type LedgerDocument = OrderedMap<OrderedMap<Entity>>;

const BANNER: &str = "============================================================";

/// Categorized entities with current attributes and change history.
///
/// Every mutation rewrites the whole backing file. Save failures are logged
/// and swallowed so the in-memory ledger stays authoritative; call
/// [`EntityLedger::save`] directly when a failure must be surfaced.
#[derive(Debug, Clone, Default)]
pub struct EntityLedger {
    path: Option<PathBuf>,
    /// Entities in insertion order.
    entities: Vec<Entity>,
    /// (category, name) -> position in `entities`.
    index: HashMap<(EntityCategory, String), usize>,
}

impl EntityLedger {
    /// Create an empty ledger with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the ledger stored at `path`.
    ///
    /// A missing, unreadable, or corrupt file yields an empty ledger that
    /// will overwrite it on the next save. This never fails.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(ledger) => ledger,
            Err(e) => {
                if path.exists() {
                    warn!("Entity ledger unreadable, starting empty: {e}");
                } else {
                    debug!("No entity ledger at {}, starting empty", path.display());
                }
                Self {
                    path: Some(path),
                    ..Self::default()
                }
            }
        }
    }

    /// Open the ledger of a project.
    pub fn for_project(paths: &ProjectPaths) -> Self {
        Self::open(paths.entity_file())
    }

    /// Load the ledger at `path`, reporting any failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        let document: LedgerDocument =
            serde_json::from_str(&content).map_err(|e| StorageError::json(path, e))?;

        let mut ledger = Self::from_document(document);
        ledger.path = Some(path.to_path_buf());
        Ok(ledger)
    }

    fn from_document(document: LedgerDocument) -> Self {
        let mut ledger = Self::default();

        for (label, entities) in document {
            let category = EntityCategory::from_label_lossy(&label);
            if EntityCategory::from_label(&label).is_none() {
                warn!("Unknown entity category '{label}', filing under {}", category.label());
            }

            for (name, mut entity) in entities {
                let key = (category, name.clone());
                if ledger.index.contains_key(&key) {
                    warn!(
                        "Duplicate entity {}.{name} in ledger file, keeping the first",
                        category.label()
                    );
                    continue;
                }
                entity.category = category;
                entity.name = name;
                ledger.index.insert(key, ledger.entities.len());
                ledger.entities.push(entity);
            }
        }

        ledger
    }

    fn to_document(&self) -> LedgerDocument {
        EntityCategory::ALL
            .into_iter()
            .map(|category| {
                let entities: OrderedMap<Entity> = self
                    .get_entities_by_category(category)
                    .into_iter()
                    .map(|entity| (entity.name.clone(), entity.clone()))
                    .collect();
                (category.label(), entities)
            })
            .collect()
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the whole ledger to its backing file.
    pub fn save(&self) -> Result<(), StorageError> {
        let path = self.path.as_ref().ok_or(StorageError::Detached)?;
        self.export_to(path)
    }

    /// Write the whole ledger to an arbitrary file.
    pub fn export_to(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&self.to_document())
            .map_err(|e| StorageError::json(path, e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| StorageError::io(path, e))
    }

    /// Save after a mutation, logging instead of failing.
    fn persist(&self) {
        if self.path.is_none() {
            return;
        }
        match self.save() {
            Ok(()) => debug!("Entity ledger saved"),
            Err(e) => error!("Failed to save entity ledger: {e}"),
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Add or update an entity's attributes as of `chapter`.
    ///
    /// Creates the entity on first sight. Each attribute that already holds
    /// a different value gets a history record; the new value always wins.
    /// The ledger is saved afterwards. Returns the changes recorded by this
    /// call.
    pub fn add_entity<K, V>(
        &mut self,
        category: EntityCategory,
        name: &str,
        attributes: impl IntoIterator<Item = (K, V)>,
        chapter: u32,
    ) -> Vec<AttributeChange>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let key = (category, name.to_string());
        let position = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.entities.push(Entity::new(category, name, chapter));
                let i = self.entities.len() - 1;
                self.index.insert(key, i);
                i
            }
        };

        let entity = &mut self.entities[position];
        let mut changes = Vec::new();
        for (attribute, value) in attributes {
            if let Some(change) = entity.set_attribute(attribute.as_ref(), value, chapter) {
                warn!(
                    "Attribute conflict: {}.{}.{} changed from '{}' to '{}' (chapter {})",
                    category.label(),
                    name,
                    change.attribute,
                    change.old_value,
                    change.new_value,
                    chapter
                );
                changes.push(change);
            }
        }
        entity.last_updated_chapter = chapter;

        self.persist();
        changes
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_entity(&self, category: EntityCategory, name: &str) -> Option<&Entity> {
        self.index
            .get(&(category, name.to_string()))
            .map(|&i| &self.entities[i])
    }

    pub fn get_entity_attributes(
        &self,
        category: EntityCategory,
        name: &str,
    ) -> Option<&OrderedMap<String>> {
        self.get_entity(category, name).map(|e| &e.attributes)
    }

    pub fn get_attribute_value(
        &self,
        category: EntityCategory,
        name: &str,
        attribute: &str,
    ) -> Option<&str> {
        self.get_entity(category, name)
            .and_then(|e| e.attribute(attribute))
    }

    /// All entities, in insertion order.
    pub fn get_all_entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entities of one category, in insertion order.
    pub fn get_entities_by_category(&self, category: EntityCategory) -> Vec<&Entity> {
        self.entities
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Every recorded attribute change, grouped by category then entity.
    pub fn check_attribute_conflicts(&self) -> Vec<AttributeConflict> {
        EntityCategory::ALL
            .into_iter()
            .flat_map(|category| self.get_entities_by_category(category))
            .flat_map(Entity::conflicts)
            .collect()
    }

    /// Attribute changes recorded within a chapter range.
    pub fn conflicts_in_range(&self, range: ChapterRange) -> Vec<AttributeConflict> {
        self.check_attribute_conflicts()
            .into_iter()
            .filter(|c| range.contains(c.chapter))
            .collect()
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Render the lock list handed to the generation step.
    ///
    /// Categories, entities and attributes appear in the order they were
    /// first written, so repeated renders are byte-identical.
    pub fn generate_lock_list(&self) -> String {
        let mut lines = vec![
            BANNER.to_string(),
            "【实体属性锁定清单】（严禁随意更改以下属性）".to_string(),
            BANNER.to_string(),
        ];

        for category in EntityCategory::ALL {
            let entities: Vec<&Entity> = self
                .get_entities_by_category(category)
                .into_iter()
                .filter(|e| !e.attributes.is_empty())
                .collect();
            if entities.is_empty() {
                continue;
            }

            lines.push(format!("\n【{}】", category.label()));
            for entity in entities {
                lines.push(format!("  • {}", entity.render_attributes()));
            }
        }

        lines.push(format!("\n{BANNER}"));
        lines.push("【重要约束】".to_string());
        lines.push("1. 上述属性为已确定的设定，严禁随意修改".to_string());
        lines.push("2. 如需修改属性，必须有合理的剧情推动和明确描述".to_string());
        lines.push("3. 禁止出现属性前后矛盾的情况".to_string());
        lines.push("4. 人物身份、职位等关键属性必须保持一致".to_string());
        lines.push(BANNER.to_string());

        lines.join("\n")
    }

    /// Lock list plus the standing writing requirements.
    pub fn constraint_prompt(&self) -> String {
        format!(
            "\n{}\n\n\
             【写作时的额外要求】\n\
             1. 在描述上述实体时，必须使用锁定的属性值\n\
             2. 如果需要修改属性，必须在正文中明确说明原因\n\
             3. 禁止出现属性前后矛盾的情况\n\
             4. 人物身份、职位等关键信息必须与锁定列表一致\n",
            self.generate_lock_list()
        )
    }

    /// Append tracked character attributes to a character-state text.
    pub fn merge_character_state(&self, character_state: &str) -> String {
        let characters: Vec<&Entity> = self
            .get_entities_by_category(EntityCategory::Character)
            .into_iter()
            .filter(|e| !e.attributes.is_empty())
            .collect();
        if characters.is_empty() {
            return character_state.to_string();
        }

        debug!("Merging {} tracked characters into character state", characters.len());
        let mut merged = format!("{character_state}\n\n【实体属性补充】");
        for entity in characters {
            merged.push('\n');
            merged.push_str(&entity.render_attributes());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attrs<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Iterator<Item = (&'a str, &'a str)> {
        pairs.iter().copied()
    }

    #[test]
    fn test_latest_value_wins() {
        let mut ledger = EntityLedger::new();
        for (chapter, value) in [(1, "淡黄色"), (2, "淡蓝色"), (3, "淡蓝色"), (4, "金色")] {
            ledger.add_entity(EntityCategory::Item, "光罩", attrs(&[("颜色", value)]), chapter);
            assert_eq!(
                ledger.get_attribute_value(EntityCategory::Item, "光罩", "颜色"),
                Some(value)
            );
        }

        let entity = ledger.get_entity(EntityCategory::Item, "光罩").unwrap();
        // four writes, two actual changes
        assert_eq!(entity.history.len(), 2);
        assert_eq!(entity.first_seen_chapter, 1);
        assert_eq!(entity.last_updated_chapter, 4);
    }

    #[test]
    fn test_role_change_scenario() {
        let mut ledger = EntityLedger::new();
        ledger.add_entity(EntityCategory::Character, "X", attrs(&[("role", "A")]), 1);
        let changes = ledger.add_entity(EntityCategory::Character, "X", attrs(&[("role", "B")]), 5);

        let expected = AttributeChange {
            attribute: "role".to_string(),
            old_value: "A".to_string(),
            new_value: "B".to_string(),
            chapter: 5,
        };
        assert_eq!(changes, vec![expected.clone()]);
        assert_eq!(
            ledger.get_entity(EntityCategory::Character, "X").unwrap().history,
            vec![expected]
        );

        let lock_list = ledger.generate_lock_list();
        assert!(lock_list.contains("role=B"));
        assert!(!lock_list.contains("role=A"));
    }

    #[test]
    fn test_touch_without_change_updates_last_chapter() {
        let mut ledger = EntityLedger::new();
        ledger.add_entity(EntityCategory::Scene, "百草堂", attrs(&[("状态", "完好")]), 2);
        ledger.add_entity(EntityCategory::Scene, "百草堂", attrs(&[("状态", "完好")]), 9);

        let entity = ledger.get_entity(EntityCategory::Scene, "百草堂").unwrap();
        assert_eq!(entity.first_seen_chapter, 2);
        assert_eq!(entity.last_updated_chapter, 9);
        assert!(entity.history.is_empty());
    }

    #[test]
    fn test_lock_list_follows_first_seen_order() {
        let mut ledger = EntityLedger::new();
        ledger.add_entity(EntityCategory::Item, "玉佩", attrs(&[("颜色", "碧绿")]), 1);
        ledger.add_entity(EntityCategory::Character, "周屹", attrs(&[("职位", "长老")]), 1);
        ledger.add_entity(
            EntityCategory::Character,
            "林婉",
            attrs(&[("状态", "重伤"), ("身份", "弟子")]),
            2,
        );
        ledger.add_entity(EntityCategory::Character, "周屹", attrs(&[("年龄", "六十")]), 3);

        let lock_list = ledger.generate_lock_list();
        let pos = |needle: &str| lock_list.find(needle).unwrap();

        // category order is fixed, entity and attribute order is first-seen
        assert!(pos("【人物】") < pos("【道具】"));
        assert!(pos("周屹: 职位=长老, 年龄=六十") < pos("林婉: 状态=重伤, 身份=弟子"));
        assert!(!lock_list.contains("【场景】"));

        for value in ["碧绿", "长老", "六十", "重伤", "弟子"] {
            assert_eq!(lock_list.matches(value).count(), 1, "{value} should appear once");
        }
        assert_eq!(lock_list, ledger.generate_lock_list());
    }

    #[test]
    fn test_conflicts_flatten_and_filter_by_range() {
        let mut ledger = EntityLedger::new();
        ledger.add_entity(EntityCategory::Item, "光罩", attrs(&[("颜色", "淡黄色")]), 1);
        ledger.add_entity(EntityCategory::Character, "杨尘", attrs(&[("职位", "术研院主事")]), 1);
        ledger.add_entity(EntityCategory::Item, "光罩", attrs(&[("颜色", "淡蓝色")]), 4);
        ledger.add_entity(EntityCategory::Character, "杨尘", attrs(&[("职位", "城防军队长")]), 7);

        let all = ledger.check_attribute_conflicts();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].category, EntityCategory::Character);
        assert_eq!(all[0].describe(), "人物.杨尘.职位: '术研院主事' -> '城防军队长' (第7章)");
        assert_eq!(all, ledger.check_attribute_conflicts());

        let early = ledger.conflicts_in_range(ChapterRange::new(1, 5).unwrap());
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].name, "光罩");
    }

    #[test]
    fn test_reload_preserves_state_and_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entity_attributes.json");

        let mut ledger = EntityLedger::open(&path);
        ledger.add_entity(EntityCategory::Character, "周屹", attrs(&[("职位", "长老")]), 1);
        ledger.add_entity(EntityCategory::Character, "林婉", attrs(&[("身份", "弟子")]), 1);
        ledger.add_entity(EntityCategory::Character, "周屹", attrs(&[("职位", "掌门")]), 3);

        let reloaded = EntityLedger::open(&path);
        assert_eq!(reloaded.entity_count(), 2);
        assert_eq!(
            reloaded.get_attribute_value(EntityCategory::Character, "周屹", "职位"),
            Some("掌门")
        );
        assert_eq!(reloaded.check_attribute_conflicts(), ledger.check_attribute_conflicts());
        assert_eq!(reloaded.generate_lock_list(), ledger.generate_lock_list());
    }

    #[test]
    fn test_file_uses_category_labels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entity_attributes.json");

        let mut ledger = EntityLedger::open(&path);
        ledger.add_entity(EntityCategory::Skill, "御风诀", attrs(&[("等级", "三层")]), 2);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["技能"]["御风诀"]["属性"]["等级"], "三层");
        assert_eq!(raw["技能"]["御风诀"]["首次出现章节"], 2);
        // all five categories are always present
        for category in EntityCategory::ALL {
            assert!(raw.get(category.label()).is_some());
        }
    }

    #[test]
    fn test_corrupt_file_yields_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entity_attributes.json");
        fs::write(&path, "{\"人物\": {\"杨尘\": ").unwrap();

        let ledger = EntityLedger::open(&path);
        assert!(ledger.is_empty());
        assert!(EntityLedger::load(&path).is_err());
    }

    #[test]
    fn test_save_failure_keeps_memory_state() {
        let dir = TempDir::new().unwrap();
        // a directory where the file should be makes every write fail
        let path = dir.path().join("ledger_dir");
        fs::create_dir(&path).unwrap();

        let mut ledger = EntityLedger::open(&path);
        ledger.add_entity(EntityCategory::Item, "玉佩", attrs(&[("颜色", "碧绿")]), 1);

        assert_eq!(
            ledger.get_attribute_value(EntityCategory::Item, "玉佩", "颜色"),
            Some("碧绿")
        );
        assert!(matches!(ledger.save(), Err(StorageError::Io { .. })));
        assert!(matches!(EntityLedger::new().save(), Err(StorageError::Detached)));
    }

    #[test]
    fn test_merge_character_state() {
        let mut ledger = EntityLedger::new();
        assert_eq!(ledger.merge_character_state("原始状态"), "原始状态");

        ledger.add_entity(EntityCategory::Character, "杨尘", attrs(&[("职位", "术研院主事")]), 1);
        ledger.add_entity(EntityCategory::Item, "光罩", attrs(&[("颜色", "淡黄色")]), 1);
        let merged = ledger.merge_character_state("原始状态");

        assert!(merged.starts_with("原始状态"));
        assert!(merged.contains("【实体属性补充】\n杨尘: 职位=术研院主事"));
        assert!(!merged.contains("光罩"));
    }
}
