//! Per-category repository constructors.
//!
//! Each constructor pairs a category with the fields only the upstream API
//! can filter on. Everything else about lookup behavior is uniform and lives
//! in [`EntityRepository`].

use super::{CategorySpec, EntityRepository};
use crate::cache::EntityCache;
use crate::upstream::UpstreamClient;
use std::sync::Arc;

fn repository(
    category: &'static str,
    upstream_only: &'static [&'static str],
    cache: Arc<dyn EntityCache>,
    client: Arc<dyn UpstreamClient>,
) -> EntityRepository {
    EntityRepository::new(CategorySpec { category, upstream_only }, cache, client)
}

/// Spells. Class membership (`dnd_class`) and spell-list filtering exist
/// only upstream.
pub fn spells(cache: Arc<dyn EntityCache>, client: Arc<dyn UpstreamClient>) -> EntityRepository {
    repository("spells", &["dnd_class", "spell_list"], cache, client)
}

/// Creatures. Armor-class filtering exists only upstream.
pub fn creatures(cache: Arc<dyn EntityCache>, client: Arc<dyn UpstreamClient>) -> EntityRepository {
    repository("creatures", &["armor_class"], cache, client)
}

pub fn weapons(cache: Arc<dyn EntityCache>, client: Arc<dyn UpstreamClient>) -> EntityRepository {
    repository("weapons", &[], cache, client)
}

pub fn armor(cache: Arc<dyn EntityCache>, client: Arc<dyn UpstreamClient>) -> EntityRepository {
    repository("armor", &[], cache, client)
}

pub fn magic_items(
    cache: Arc<dyn EntityCache>,
    client: Arc<dyn UpstreamClient>,
) -> EntityRepository {
    repository("magicitems", &[], cache, client)
}

pub fn classes(cache: Arc<dyn EntityCache>, client: Arc<dyn UpstreamClient>) -> EntityRepository {
    repository("classes", &[], cache, client)
}

pub fn races(cache: Arc<dyn EntityCache>, client: Arc<dyn UpstreamClient>) -> EntityRepository {
    repository("races", &[], cache, client)
}

pub fn backgrounds(
    cache: Arc<dyn EntityCache>,
    client: Arc<dyn UpstreamClient>,
) -> EntityRepository {
    repository("backgrounds", &[], cache, client)
}

pub fn feats(cache: Arc<dyn EntityCache>, client: Arc<dyn UpstreamClient>) -> EntityRepository {
    repository("feats", &[], cache, client)
}

pub fn conditions(
    cache: Arc<dyn EntityCache>,
    client: Arc<dyn UpstreamClient>,
) -> EntityRepository {
    repository("conditions", &[], cache, client)
}

pub fn rules(cache: Arc<dyn EntityCache>, client: Arc<dyn UpstreamClient>) -> EntityRepository {
    repository("rules", &[], cache, client)
}

pub fn rule_sections(
    cache: Arc<dyn EntityCache>,
    client: Arc<dyn UpstreamClient>,
) -> EntityRepository {
    repository("rulesections", &[], cache, client)
}
