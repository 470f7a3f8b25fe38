//! The universal entity record.
//!
//! # Examples
//!
//! ```rust
//! use lorespace_core::models::EntityRecord;
//! use serde_json::json;
//!
//! let fireball = EntityRecord::from_value(json!({
//!     "slug": "fireball",
//!     "name": "Fireball",
//!     "level": 3,
//!     "school": "Evocation",
//!     "document": "srd",
//! }))
//! .unwrap();
//!
//! assert_eq!(fireball.slug(), Some("fireball"));
//! assert_eq!(fireball.name(), Some("Fireball"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reserved field carrying the similarity score attached by semantic search.
pub const SIMILARITY_SCORE_FIELD: &str = "similarity_score";

/// Validation errors for entity records
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Entity record must be a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field '{0}' must be a non-empty string")]
    EmptyField(&'static str),
}

/// One normalized item of an entity category, as a flat field-name → value
/// map.
///
/// Invariants enforced at store time:
/// - `slug`: stable URL-safe identifier, unique within its category
/// - `name`: non-empty human-readable label
/// - `document` (optional): source publication, used for provenance filtering
///
/// The full map is persisted verbatim by both cache engines; indexed fields
/// are additionally projected into backend columns for filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EntityRecord(Map<String, Value>);

impl EntityRecord {
    /// Create an empty record (normally only useful with [`set`](Self::set))
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(ValidationError::NotAnObject),
        }
    }

    /// The stable identifier, if present and a string
    pub fn slug(&self) -> Option<&str> {
        self.text_field("slug")
    }

    /// The human-readable label, if present and a string
    pub fn name(&self) -> Option<&str> {
        self.text_field("name")
    }

    /// The source publication, if present and a string
    pub fn document(&self) -> Option<&str> {
        self.text_field("document")
    }

    /// Raw field access
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// A string field, treating empty strings as absent
    pub fn text_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Set a field, replacing any existing value
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Check the store-time invariants (non-empty `slug` and `name`)
    pub fn validate_for_store(&self) -> Result<(), ValidationError> {
        match self.get("slug") {
            None => return Err(ValidationError::MissingField("slug")),
            Some(v) if v.as_str().map_or(true, str::is_empty) => {
                return Err(ValidationError::EmptyField("slug"))
            }
            Some(_) => {}
        }
        match self.get("name") {
            None => return Err(ValidationError::MissingField("name")),
            Some(v) if v.as_str().map_or(true, str::is_empty) => {
                return Err(ValidationError::EmptyField("name"))
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying map
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Consume into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for EntityRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_requires_object() {
        assert!(EntityRecord::from_value(json!({"slug": "x"})).is_ok());
        assert!(EntityRecord::from_value(json!(["slug"])).is_err());
        assert!(EntityRecord::from_value(json!("slug")).is_err());
    }

    #[test]
    fn test_accessors() {
        let record = EntityRecord::from_value(json!({
            "slug": "ancient-red-dragon",
            "name": "Ancient Red Dragon",
            "document": "srd",
            "challenge_rating": "24",
        }))
        .unwrap();

        assert_eq!(record.slug(), Some("ancient-red-dragon"));
        assert_eq!(record.name(), Some("Ancient Red Dragon"));
        assert_eq!(record.document(), Some("srd"));
        assert_eq!(record.get("challenge_rating"), Some(&json!("24")));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn test_empty_strings_treated_as_absent() {
        let record = EntityRecord::from_value(json!({"slug": "", "name": "X"})).unwrap();
        assert_eq!(record.slug(), None);
    }

    #[test]
    fn test_validate_for_store() {
        let ok = EntityRecord::from_value(json!({"slug": "goblin", "name": "Goblin"})).unwrap();
        assert!(ok.validate_for_store().is_ok());

        let no_slug = EntityRecord::from_value(json!({"name": "Goblin"})).unwrap();
        assert!(no_slug.validate_for_store().is_err());

        let empty_name =
            EntityRecord::from_value(json!({"slug": "goblin", "name": ""})).unwrap();
        assert!(empty_name.validate_for_store().is_err());
    }

    #[test]
    fn test_round_trip_preserves_payload() {
        let value = json!({
            "slug": "fireball",
            "name": "Fireball",
            "higher_level": {"desc": "more dice"},
            "classes": ["wizard", "sorcerer"],
        });
        let record = EntityRecord::from_value(value.clone()).unwrap();
        assert_eq!(record.into_value(), value);
    }
}
