//! Authorization collaborator seam.
//!
//! The policy engine lives outside this crate. The dispatcher only needs a pure
//! filter from candidate resource ids to the ids the caller may act on.

use crate::error::{Result, VigilError};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Filters resource ids down to those permitted for `action`.
pub trait Authorizer: Send + Sync + 'static {
    fn filter(&self, action: &str, resource_ids: &BTreeSet<String>) -> BTreeSet<String>;
}

/// Permits everything. Used when the caller was authorized upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn filter(&self, _action: &str, resource_ids: &BTreeSet<String>) -> BTreeSet<String> {
        resource_ids.clone()
    }
}

impl<F> Authorizer for F
where
    F: Fn(&str, &BTreeSet<String>) -> BTreeSet<String> + Send + Sync + 'static,
{
    fn filter(&self, action: &str, resource_ids: &BTreeSet<String>) -> BTreeSet<String> {
        self(action, resource_ids)
    }
}

/// Static allow-list per action; `"*"` in a list permits every id.
///
/// On disk it is a JSON object mapping each action to its permitted ids:
///
/// ```text
/// {"cluster:read": ["*"], "active-response:command": ["001", "002"]}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ActionPolicy {
    allowed: HashMap<String, BTreeSet<String>>,
}

impl ActionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, action: impl Into<String>, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed
            .entry(action.into())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Read a policy file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| VigilError::io_with_path(e, path))?;
        serde_json::from_str(&raw).map_err(|e| VigilError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })
    }
}

impl Authorizer for ActionPolicy {
    fn filter(&self, action: &str, resource_ids: &BTreeSet<String>) -> BTreeSet<String> {
        match self.allowed.get(action) {
            Some(allowed) if allowed.contains("*") => resource_ids.clone(),
            Some(allowed) => resource_ids.intersection(allowed).cloned().collect(),
            None => BTreeSet::new(),
        }
    }
}
