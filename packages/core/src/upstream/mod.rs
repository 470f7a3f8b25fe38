//! Upstream Source Boundary
//!
//! The cache layer treats the per-source HTTP clients as external
//! collaborators: anything that can fetch normalized entity records for a
//! category behind the [`UpstreamClient`] trait. Each client also declares
//! its [`FilterDialect`] - the query grammar its API speaks - so the
//! repository layer maps lookup filters uniformly instead of special-casing
//! client types.
//!
//! Upstream failures are never swallowed by the layers above: there is no
//! other source of truth to fall back to.

mod fixture;

pub use fixture::FixtureClient;

use crate::models::EntityRecord;
use async_trait::async_trait;
use thiserror::Error;

/// Upstream fetch errors
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Connection-level failure (DNS, refused, timeout)
    #[error("Network error contacting {source_api}: {message}")]
    Network { source_api: String, message: String },

    /// Non-2xx response
    #[error("{source_api} returned HTTP status {status}")]
    Status { source_api: String, status: u16 },

    /// Response body could not be decoded into entity records
    #[error("Failed to decode response from {source_api}: {message}")]
    Decode { source_api: String, message: String },
}

/// The query-parameter grammar an upstream API speaks.
///
/// Declared by each client so repositories can translate lookup filters
/// without knowing which concrete client they hold.
#[derive(Debug, Clone)]
pub struct FilterDialect {
    /// Free-text search parameter name, if the API has one
    pub search_param: Option<&'static str>,
    /// Suffix turning a field into a substring match (e.g. `__icontains`)
    pub contains_suffix: &'static str,
    /// Suffix for "at least" range bounds (e.g. `__gte`)
    pub gte_suffix: &'static str,
    /// Suffix for "at most" range bounds (e.g. `__lte`)
    pub lte_suffix: &'static str,
    /// Whether the API expects lowercased filter values
    pub lowercase_values: bool,
    /// Parameters this source always requires (injected on every fetch)
    pub injected_params: &'static [(&'static str, &'static str)],
}

impl FilterDialect {
    /// The Django-style double-underscore grammar used by Open5e
    pub fn open5e() -> Self {
        Self {
            search_param: Some("search"),
            contains_suffix: "__icontains",
            gte_suffix: "__gte",
            lte_suffix: "__lte",
            lowercase_values: false,
            injected_params: &[],
        }
    }

    /// The flat grammar of the 5e SRD API: no operator suffixes, values
    /// lowercased, name search via the `name` parameter
    pub fn srd_api() -> Self {
        Self {
            search_param: Some("name"),
            contains_suffix: "",
            gte_suffix: "",
            lte_suffix: "",
            lowercase_values: true,
            injected_params: &[],
        }
    }

    /// Equality parameter for a field
    pub fn equality_param(&self, field: &str, value: &str) -> (String, String) {
        (field.to_string(), self.value(value))
    }

    /// Substring-match parameter for a field
    pub fn contains_param(&self, field: &str, value: &str) -> (String, String) {
        (format!("{}{}", field, self.contains_suffix), self.value(value))
    }

    /// Lower-bound parameter for a field
    pub fn gte_param(&self, field: &str, value: &str) -> (String, String) {
        (format!("{}{}", field, self.gte_suffix), self.value(value))
    }

    /// Upper-bound parameter for a field
    pub fn lte_param(&self, field: &str, value: &str) -> (String, String) {
        (format!("{}{}", field, self.lte_suffix), self.value(value))
    }

    fn value(&self, value: &str) -> String {
        if self.lowercase_values {
            value.to_lowercase()
        } else {
            value.to_string()
        }
    }
}

/// An upstream content API, reduced to its boundary: fetch normalized entity
/// records for a category given already-translated query parameters.
///
/// Implementations must be `Send + Sync`; repositories hold them behind an
/// `Arc` and may call concurrently.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Stable identifier of the source (stamped into stored entities as
    /// `source_api`)
    fn source_name(&self) -> &str;

    /// The query grammar this source speaks
    fn dialect(&self) -> &FilterDialect;

    /// Fetch all records of a category matching the given parameters.
    async fn fetch(
        &self,
        category: &str,
        params: &[(String, String)],
    ) -> Result<Vec<EntityRecord>, UpstreamError>;
}
