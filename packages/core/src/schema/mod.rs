//! Entity Category Schema Registry
//!
//! A closed, static table declaring which scalar fields are indexed for each
//! entity category and their types. The registry governs both backend table
//! layout and the allow-list of fields a caller may filter by; adding a
//! category means adding one registry entry, not new branches in storage
//! code.
//!
//! Every category implicitly also indexes `document` (and, in the relational
//! engine, `name`); those never appear in the declared lists below.

mod searchable;

pub use searchable::searchable_text;

/// Scalar type of an indexed field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
}

/// The provenance field, implicitly indexed for every category
pub const DOCUMENT_FIELD: &str = "document";

/// All registered entity categories, in registry order
pub const CATEGORIES: &[&str] = &[
    "spells",
    "creatures",
    "weapons",
    "armor",
    "magicitems",
    "classes",
    "races",
    "backgrounds",
    "feats",
    "conditions",
    "rules",
    "rulesections",
];

/// Indexed scalar fields for a category, in declaration order.
///
/// Returns `None` for categories absent from the registry; the relational
/// engine treats that as a hard error, the vector engine falls back to the
/// default schema (just `document`).
pub fn indexed_fields(category: &str) -> Option<&'static [(&'static str, FieldType)]> {
    use FieldType::{Boolean, Integer, Real, Text};

    match category {
        "spells" => Some(&[
            ("level", Integer),
            ("school", Text),
            ("concentration", Boolean),
            ("ritual", Boolean),
        ]),
        "creatures" => Some(&[
            ("challenge_rating", Text),
            ("challenge_rating_decimal", Real),
            ("creature_type", Text),
            ("size", Text),
        ]),
        "weapons" => Some(&[
            ("category", Text),
            ("damage_type", Text),
            ("is_martial", Boolean),
        ]),
        "armor" => Some(&[
            ("category", Text),
            ("base_ac", Integer),
            ("stealth_disadvantage", Boolean),
        ]),
        "magicitems" => Some(&[
            ("item_type", Text),
            ("rarity", Text),
            ("requires_attunement", Text),
        ]),
        "classes" => Some(&[("hit_dice", Text)]),
        "races" => Some(&[("is_subrace", Boolean)]),
        "backgrounds" => Some(&[]),
        "feats" => Some(&[("has_prerequisite", Boolean)]),
        "conditions" => Some(&[]),
        "rules" => Some(&[]),
        "rulesections" => Some(&[("parent", Text)]),
        _ => None,
    }
}

/// Whether a category is present in the registry
pub fn is_known_category(category: &str) -> bool {
    indexed_fields(category).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_has_an_entry() {
        for category in CATEGORIES {
            assert!(
                is_known_category(category),
                "category '{}' missing from registry",
                category
            );
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        assert!(indexed_fields("not_a_real_category").is_none());
        assert!(!is_known_category("not_a_real_category"));
    }

    #[test]
    fn test_categories_without_extra_fields_return_empty_list() {
        assert!(indexed_fields("conditions").unwrap().is_empty());
        assert!(indexed_fields("backgrounds").unwrap().is_empty());
    }

    #[test]
    fn test_declared_fields_never_shadow_implicit_ones() {
        for category in CATEGORIES {
            for (field, _) in indexed_fields(category).unwrap() {
                assert_ne!(*field, DOCUMENT_FIELD);
                assert_ne!(*field, "name");
                assert_ne!(*field, "slug");
            }
        }
    }

    #[test]
    fn test_spells_fields() {
        let fields = indexed_fields("spells").unwrap();
        assert_eq!(fields[0], ("level", FieldType::Integer));
        assert_eq!(fields[1], ("school", FieldType::Text));
    }
}
