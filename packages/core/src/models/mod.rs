//! Entity Data Structures
//!
//! The single [`EntityRecord`] type represents one normalized item of any
//! entity category (a spell, a creature, a weapon, ...) as a flat JSON map.
//! Category-specific shape lives in the schema registry, not in the type
//! system; the record itself only guarantees the universal invariants
//! (`slug`, `name`).

mod entity;

pub use entity::{EntityRecord, ValidationError, SIMILARITY_SCORE_FIELD};
