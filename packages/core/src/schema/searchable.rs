//! Category-aware searchable-text projection.
//!
//! Defines, per entity category, which fields concatenate into the text that
//! gets embedded for semantic search. Missing or empty fields contribute
//! nothing; the result is the surviving parts joined by single spaces.

use crate::models::EntityRecord;
use serde_json::Value;

/// Extract the text projection of an entity for embedding.
///
/// Always includes `name` when present. Category-specific extras:
/// - spells: description and effects at higher levels
/// - creatures: description, creature type, action names, special-ability
///   names
/// - equipment (weapons/armor/magicitems): description, item type/category,
///   rarity, property names
/// - rule-like (rules/rulesections/conditions): description and extended
///   content
/// - anything else: description only
pub fn searchable_text(category: &str, entity: &EntityRecord) -> String {
    let mut parts: Vec<String> = Vec::new();

    push_text(&mut parts, entity, "name");

    match category {
        "spells" => {
            push_text(&mut parts, entity, "desc");
            push_text(&mut parts, entity, "higher_level");
        }
        "creatures" => {
            push_text(&mut parts, entity, "desc");
            push_text(&mut parts, entity, "creature_type");
            push_names(&mut parts, entity, "actions");
            push_names(&mut parts, entity, "special_abilities");
        }
        "weapons" | "armor" | "magicitems" => {
            push_text(&mut parts, entity, "desc");
            push_text(&mut parts, entity, "item_type");
            push_text(&mut parts, entity, "category");
            push_text(&mut parts, entity, "rarity");
            push_names(&mut parts, entity, "properties");
        }
        "rules" | "rulesections" | "conditions" => {
            push_text(&mut parts, entity, "desc");
            push_text(&mut parts, entity, "content");
        }
        _ => {
            push_text(&mut parts, entity, "desc");
        }
    }

    parts.join(" ")
}

fn push_text(parts: &mut Vec<String>, entity: &EntityRecord, field: &str) {
    if let Some(text) = entity.text_field(field) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }
}

/// Collect the `name` of each element of an array field, or the elements
/// themselves when they are plain strings (equipment property lists).
fn push_names(parts: &mut Vec<String>, entity: &EntityRecord, field: &str) {
    let Some(Value::Array(items)) = entity.get(field) else {
        return;
    };

    for item in items {
        let text = match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj.get("name").and_then(Value::as_str),
            _ => None,
        };
        if let Some(text) = text {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
    }
}
