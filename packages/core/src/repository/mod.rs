//! Entity Repositories - Cache-Aside Lookups
//!
//! One repository per entity category, all sharing the same lookup shape:
//!
//! 1. Receive filters, an optional free-text query, an optional `document`
//!    scope, and an optional `limit`
//! 2. Route by semantic intent: a query goes to the cache's semantic search
//!    when the backend has it, else to a structured `name` approximation
//! 3. Partition filters into cache-filterable, upstream-forwarded, and
//!    client-side-only predicates (`document` is always cache-only)
//! 4. Serve from cache when it has anything
//! 5. On miss, fetch upstream with filters translated through the client's
//!    declared dialect
//! 6. Store non-empty results back so the next identical lookup hits
//! 7. Truncate to `limit`
//!
//! Cache failures anywhere in this flow degrade (log, act as if the cache
//! were empty); upstream failures propagate unchanged.

mod catalog;

pub use catalog::*;

use crate::cache::filter::{FilterMap, FilterValue};
use crate::cache::{EntityCache, DEFAULT_SEMANTIC_LIMIT};
use crate::models::EntityRecord;
use crate::schema::DOCUMENT_FIELD;
use crate::upstream::{UpstreamClient, UpstreamError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Repository lookup errors. Only upstream failures surface; the cache is
/// never allowed to fail a lookup.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Comparison operator of a lookup filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Contains,
    Gte,
    Lte,
}

/// One lookup predicate
#[derive(Debug, Clone)]
pub struct LookupFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl LookupFilter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), op: FilterOp::Eq, value }
    }

    pub fn contains(field: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), op: FilterOp::Contains, value }
    }

    pub fn gte(field: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), op: FilterOp::Gte, value }
    }

    pub fn lte(field: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), op: FilterOp::Lte, value }
    }
}

/// Provenance scope: one source publication or several
#[derive(Debug, Clone)]
pub enum DocumentScope {
    One(String),
    Many(Vec<String>),
}

/// A repository lookup
#[derive(Debug, Clone, Default)]
pub struct LookupRequest {
    /// Field predicates, AND-combined
    pub filters: Vec<LookupFilter>,
    /// Free-text semantic query
    pub query: Option<String>,
    /// Source-publication scope (cache-only; never forwarded upstream)
    pub document: Option<DocumentScope>,
    /// Result cap
    pub limit: Option<usize>,
}

/// Per-category lookup configuration
#[derive(Debug, Clone)]
pub struct CategorySpec {
    /// Entity category this repository serves
    pub category: &'static str,
    /// Fields only the upstream API understands; excluded from cache queries
    /// and forwarded on every fetch
    pub upstream_only: &'static [&'static str],
}

/// Partitioned view of a lookup's filters
struct Partition<'a> {
    /// Exact-match filters the cache indexes
    cache: FilterMap,
    /// Predicates neither backend expresses exactly; applied after fetch
    client_side: Vec<&'a LookupFilter>,
    /// Everything forwarded upstream on a miss (all non-document filters)
    upstream: Vec<&'a LookupFilter>,
}

/// Cache-aside repository for one entity category
pub struct EntityRepository {
    spec: CategorySpec,
    cache: Arc<dyn EntityCache>,
    client: Arc<dyn UpstreamClient>,
}

impl EntityRepository {
    pub fn new(
        spec: CategorySpec,
        cache: Arc<dyn EntityCache>,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self { spec, cache, client }
    }

    pub fn category(&self) -> &str {
        self.spec.category
    }

    /// Run a lookup through the cache-aside state machine.
    pub async fn search(
        &self,
        request: &LookupRequest,
    ) -> Result<Vec<EntityRecord>, RepositoryError> {
        let partition = self.partition(request);
        let query = request
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());

        let cached = self.cache_lookup(query, &partition, request.limit).await;
        let cached = apply_client_side(cached, &partition.client_side);
        if !cached.is_empty() {
            return Ok(truncate(cached, request.limit));
        }

        // Cache miss: the upstream source is authoritative, and its failures
        // are the caller's problem
        let params = self.upstream_params(query, &partition.upstream);
        let fetched = self
            .client
            .fetch(self.spec.category, &params)
            .await?;

        if fetched.is_empty() {
            // Never overwrite an empty cache with an empty write
            return Ok(Vec::new());
        }

        let mut tagged = fetched;
        for entity in &mut tagged {
            entity.set("source_api", Value::from(self.client.source_name()));
        }

        if let Err(e) = self.cache.store_entities(&tagged, self.spec.category).await {
            tracing::warn!(
                "Failed to cache {} fetched '{}' records: {}",
                tagged.len(),
                self.spec.category,
                e
            );
        }

        let results = apply_client_side(tagged, &partition.client_side);
        Ok(truncate(results, request.limit))
    }

    /// Cache phase of the lookup. Every failure path here degrades to an
    /// empty result so the upstream fetch can take over.
    async fn cache_lookup(
        &self,
        query: Option<&str>,
        partition: &Partition<'_>,
        limit: Option<usize>,
    ) -> Vec<EntityRecord> {
        match query {
            Some(query) if self.cache.supports_semantic_search() => {
                let limit = limit.unwrap_or(DEFAULT_SEMANTIC_LIMIT);
                match self
                    .cache
                    .semantic_search(self.spec.category, query, limit, &partition.cache)
                    .await
                {
                    Ok(entities) => entities,
                    Err(e) => {
                        tracing::warn!(
                            "Semantic cache lookup failed for '{}': {}",
                            self.spec.category,
                            e
                        );
                        Vec::new()
                    }
                }
            }
            Some(query) => {
                // Best-effort structured approximation on backends without
                // semantic capability: treat the query as a name match
                let mut filters = partition.cache.clone();
                filters.insert("name".to_string(), FilterValue::Text(query.to_string()));
                match self.cache.get_entities(self.spec.category, &filters).await {
                    Ok(entities) => entities,
                    Err(e) => {
                        tracing::warn!(
                            "Cache lookup failed for '{}': {}",
                            self.spec.category,
                            e
                        );
                        Vec::new()
                    }
                }
            }
            None => match self
                .cache
                .get_entities(self.spec.category, &partition.cache)
                .await
            {
                Ok(entities) => entities,
                Err(e) => {
                    tracing::warn!("Cache lookup failed for '{}': {}", self.spec.category, e);
                    Vec::new()
                }
            },
        }
    }

    /// Split a request's predicates per the category spec and the cache
    /// schema. `document` never leaves the cache partition.
    fn partition<'a>(&self, request: &'a LookupRequest) -> Partition<'a> {
        let indexed = crate::cache::filter::allowed_fields(self.spec.category).unwrap_or_default();

        let mut cache = FilterMap::new();
        let mut client_side = Vec::new();
        let mut upstream = Vec::new();

        if let Some(scope) = &request.document {
            let value = match scope {
                DocumentScope::One(document) => FilterValue::Text(document.clone()),
                DocumentScope::Many(documents) => FilterValue::TextList(documents.clone()),
            };
            cache.insert(DOCUMENT_FIELD.to_string(), value);
        }

        for lookup_filter in &request.filters {
            let field = lookup_filter.field.as_str();

            if self.spec.upstream_only.contains(&field) {
                upstream.push(lookup_filter);
                continue;
            }

            match lookup_filter.op {
                FilterOp::Eq => {
                    upstream.push(lookup_filter);
                    if indexed.contains(&field) {
                        if let Some(value) = FilterValue::from_json(&lookup_filter.value) {
                            cache.insert(field.to_string(), value);
                        }
                    }
                }
                // The cache only does equality; ranges and substrings are
                // re-checked client-side after a broader fetch
                FilterOp::Contains | FilterOp::Gte | FilterOp::Lte => {
                    upstream.push(lookup_filter);
                    client_side.push(lookup_filter);
                }
            }
        }

        Partition { cache, client_side, upstream }
    }

    /// Translate the upstream partition through the client's dialect.
    fn upstream_params(
        &self,
        query: Option<&str>,
        upstream: &[&LookupFilter],
    ) -> Vec<(String, String)> {
        let dialect = self.client.dialect();
        let mut params: Vec<(String, String)> = dialect
            .injected_params
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        if let (Some(query), Some(search_param)) = (query, dialect.search_param) {
            params.push((search_param.to_string(), query.to_string()));
        }

        for lookup_filter in upstream {
            let value = value_text(&lookup_filter.value);
            let param = match lookup_filter.op {
                FilterOp::Eq => dialect.equality_param(&lookup_filter.field, &value),
                FilterOp::Contains => dialect.contains_param(&lookup_filter.field, &value),
                FilterOp::Gte => dialect.gte_param(&lookup_filter.field, &value),
                FilterOp::Lte => dialect.lte_param(&lookup_filter.field, &value),
            };
            params.push(param);
        }

        params
    }
}

/// Apply the client-side-only predicates to a result set.
fn apply_client_side(
    entities: Vec<EntityRecord>,
    client_side: &[&LookupFilter],
) -> Vec<EntityRecord> {
    if client_side.is_empty() {
        return entities;
    }

    entities
        .into_iter()
        .filter(|entity| client_side.iter().all(|f| predicate_holds(entity, f)))
        .collect()
}

fn predicate_holds(entity: &EntityRecord, lookup_filter: &LookupFilter) -> bool {
    let actual = entity.get(&lookup_filter.field);
    match lookup_filter.op {
        FilterOp::Eq => actual == Some(&lookup_filter.value),
        FilterOp::Contains => match (actual.and_then(Value::as_str), lookup_filter.value.as_str())
        {
            (Some(actual), Some(needle)) => {
                actual.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
        FilterOp::Gte => match (actual.and_then(Value::as_f64), lookup_filter.value.as_f64()) {
            (Some(actual), Some(bound)) => actual >= bound,
            _ => false,
        },
        FilterOp::Lte => match (actual.and_then(Value::as_f64), lookup_filter.value.as_f64()) {
            (Some(actual), Some(bound)) => actual <= bound,
            _ => false,
        },
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(mut entities: Vec<EntityRecord>, limit: Option<usize>) -> Vec<EntityRecord> {
    if let Some(limit) = limit {
        entities.truncate(limit);
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> EntityRecord {
        EntityRecord::from_value(value).unwrap()
    }

    #[test]
    fn test_predicate_contains_is_case_insensitive() {
        let entity = record(json!({"slug": "x", "name": "Fireball"}));
        assert!(predicate_holds(
            &entity,
            &LookupFilter::contains("name", json!("fire"))
        ));
        assert!(!predicate_holds(
            &entity,
            &LookupFilter::contains("name", json!("frost"))
        ));
    }

    #[test]
    fn test_predicate_ranges() {
        let entity = record(json!({"slug": "x", "name": "X", "challenge_rating_decimal": 2.0}));
        assert!(predicate_holds(
            &entity,
            &LookupFilter::gte("challenge_rating_decimal", json!(1))
        ));
        assert!(!predicate_holds(
            &entity,
            &LookupFilter::lte("challenge_rating_decimal", json!(1))
        ));
        // Missing fields never satisfy a range predicate
        assert!(!predicate_holds(
            &entity,
            &LookupFilter::gte("level", json!(1))
        ));
    }

    #[test]
    fn test_truncate() {
        let entities = vec![
            record(json!({"slug": "a", "name": "A"})),
            record(json!({"slug": "b", "name": "B"})),
        ];
        assert_eq!(truncate(entities.clone(), Some(1)).len(), 1);
        assert_eq!(truncate(entities, None).len(), 2);
    }
}
