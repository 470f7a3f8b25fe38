//! In-memory upstream client.
//!
//! Serves a fixed record set while honoring the declared filter dialect, and
//! counts fetches so cache-aside behavior can be asserted. Used by the test
//! suites; also handy for offline demos seeded from a JSON dump.

use super::{FilterDialect, UpstreamClient, UpstreamError};
use crate::models::EntityRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Upstream client backed by in-memory records
pub struct FixtureClient {
    records: HashMap<String, Vec<EntityRecord>>,
    dialect: FilterDialect,
    fetch_count: AtomicUsize,
    fail_next: AtomicBool,
    last_params: Mutex<Vec<(String, String)>>,
}

impl FixtureClient {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            dialect: FilterDialect::open5e(),
            fetch_count: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            last_params: Mutex::new(Vec::new()),
        }
    }

    /// Seed records for a category (builder style)
    pub fn with_records(mut self, category: &str, records: Vec<EntityRecord>) -> Self {
        self.records.insert(category.to_string(), records);
        self
    }

    /// Override the declared dialect (builder style)
    pub fn with_dialect(mut self, dialect: FilterDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Number of fetches performed so far
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Make every subsequent fetch fail with a network error
    pub fn fail_with_network_error(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Parameters of the most recent fetch
    pub fn last_params(&self) -> Vec<(String, String)> {
        self.last_params
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn matches(&self, record: &EntityRecord, key: &str, value: &str) -> bool {
        if Some(key) == self.dialect.search_param {
            let haystack = format!(
                "{} {}",
                record.name().unwrap_or_default(),
                record.text_field("desc").unwrap_or_default()
            );
            return haystack.to_lowercase().contains(&value.to_lowercase());
        }

        if !self.dialect.contains_suffix.is_empty() {
            if let Some(field) = key.strip_suffix(self.dialect.contains_suffix) {
                return record
                    .text_field(field)
                    .map(|s| s.to_lowercase().contains(&value.to_lowercase()))
                    .unwrap_or(false);
            }
        }
        if !self.dialect.gte_suffix.is_empty() {
            if let Some(field) = key.strip_suffix(self.dialect.gte_suffix) {
                return numeric(record, field).zip(value.parse::<f64>().ok())
                    .map(|(actual, bound)| actual >= bound)
                    .unwrap_or(false);
            }
        }
        if !self.dialect.lte_suffix.is_empty() {
            if let Some(field) = key.strip_suffix(self.dialect.lte_suffix) {
                return numeric(record, field).zip(value.parse::<f64>().ok())
                    .map(|(actual, bound)| actual <= bound)
                    .unwrap_or(false);
            }
        }

        // Plain equality on the field's string form
        match record.get(key) {
            Some(Value::String(s)) => s.eq_ignore_ascii_case(value),
            Some(Value::Number(n)) => n.to_string() == value,
            Some(Value::Bool(b)) => b.to_string() == value,
            _ => false,
        }
    }
}

impl Default for FixtureClient {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric(record: &EntityRecord, field: &str) -> Option<f64> {
    record.get(field).and_then(Value::as_f64)
}

#[async_trait]
impl UpstreamClient for FixtureClient {
    fn source_name(&self) -> &str {
        "fixture"
    }

    fn dialect(&self) -> &FilterDialect {
        &self.dialect
    }

    async fn fetch(
        &self,
        category: &str,
        params: &[(String, String)],
    ) -> Result<Vec<EntityRecord>, UpstreamError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap_or_else(|p| p.into_inner()) = params.to_vec();

        if self.fail_next.load(Ordering::SeqCst) {
            return Err(UpstreamError::Network {
                source_api: self.source_name().to_string(),
                message: "connection refused".to_string(),
            });
        }

        let records = self.records.get(category).cloned().unwrap_or_default();
        Ok(records
            .into_iter()
            .filter(|record| {
                params
                    .iter()
                    .all(|(key, value)| self.matches(record, key, value))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spell(slug: &str, name: &str, level: i64) -> EntityRecord {
        EntityRecord::from_value(json!({
            "slug": slug,
            "name": name,
            "level": level,
            "desc": "arcane energies",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_equality_and_range_params() {
        let client = FixtureClient::new().with_records(
            "spells",
            vec![
                spell("fireball", "Fireball", 3),
                spell("wish", "Wish", 9),
            ],
        );

        let eq = client
            .fetch("spells", &[("level".to_string(), "3".to_string())])
            .await
            .unwrap();
        assert_eq!(eq.len(), 1);
        assert_eq!(eq[0].slug(), Some("fireball"));

        let gte = client
            .fetch("spells", &[("level__gte".to_string(), "5".to_string())])
            .await
            .unwrap();
        assert_eq!(gte.len(), 1);
        assert_eq!(gte[0].slug(), Some("wish"));

        assert_eq!(client.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_search_param_matches_name_and_desc() {
        let client =
            FixtureClient::new().with_records("spells", vec![spell("fireball", "Fireball", 3)]);

        let hits = client
            .fetch("spells", &[("search".to_string(), "fire".to_string())])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = client
            .fetch("spells", &[("search".to_string(), "necrotic".to_string())])
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn test_network_failure() {
        let client = FixtureClient::new();
        client.fail_with_network_error();
        let err = client.fetch("spells", &[]).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Network { .. }));
    }
}
