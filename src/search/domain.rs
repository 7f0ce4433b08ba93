use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// How hits of one index are decoded and checked against the search term.
///
/// The search service matches loosely (typo tolerance, prefix matching), so
/// `is_valid` is the client-side guarantee that a kept hit actually relates to
/// the term. There is no default: each index decides which fields count.
pub trait HitDomain<H>: Send + Sync {
    /// Decode one raw hit of `index`
    fn decode(&self, index: &str, raw: Value) -> Result<H, String>;

    /// Whether `hit` matches `lowercased_term`
    fn is_valid(&self, hit: &H, lowercased_term: &str) -> bool;
}

/// Index identifier to domain lookup, supplied by the caller
pub struct DomainRegistry<H> {
    domains: HashMap<String, Arc<dyn HitDomain<H>>>,
}

impl<H> DomainRegistry<H> {
    pub fn new() -> Self {
        Self {
            domains: HashMap::new(),
        }
    }

    /// Register `domain` for `index`, replacing any previous registration
    pub fn register(mut self, index: impl Into<String>, domain: Arc<dyn HitDomain<H>>) -> Self {
        self.domains.insert(index.into(), domain);
        self
    }

    pub fn get(&self, index: &str) -> Option<&Arc<dyn HitDomain<H>>> {
        self.domains.get(index)
    }

    pub fn contains(&self, index: &str) -> bool {
        self.domains.contains_key(index)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl<H> Default for DomainRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Clone for DomainRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            domains: self.domains.clone(),
        }
    }
}

/// Case-insensitive containment of `lowercased_term` in any of `fields`
pub fn fields_contain<'a, I>(lowercased_term: &str, fields: I) -> bool
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    fields
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(lowercased_term))
}
