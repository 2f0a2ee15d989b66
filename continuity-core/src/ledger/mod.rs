//! The entity attribute ledger.
//!
//! Tracks every named character, item, scene and skill with its current
//! attributes, records each change of value, and renders the lock list that
//! constrains the next chapter's generation.

mod entity;
mod extract;
mod ordered;
mod store;

pub use entity::{AttributeChange, AttributeConflict, Entity, EntityCategory};
pub use extract::{analyze_chapter, parse_entities, EntityExtractor, ExtractedEntity};
pub use ordered::OrderedMap;
pub use store::EntityLedger;
