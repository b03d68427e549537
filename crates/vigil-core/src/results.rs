//! Partial-failure result model.
//!
//! [`AffectedItemsResult`] is the return type of every distributed function. It
//! records which targets succeeded, which failed and why (grouped by error
//! code), and renders the summary message a caller shows to users.

use crate::error::{ErrorKey, VigilError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Failed ids sharing one error key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedGroup {
    pub error: ErrorKey,
    pub id: BTreeSet<String>,
}

/// Outcome of one top-level operation.
///
/// Totals are always derived from the collections, never stored. Failed groups
/// keep first-seen order; lookup by error key is O(1) through `index`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ResultWire", into = "ResultWire")]
pub struct AffectedItemsResult {
    affected_items: Vec<Value>,
    failed: Vec<FailedGroup>,
    index: HashMap<ErrorKey, usize>,
    deny_duplicates: bool,
    all_msg: String,
    some_msg: String,
    none_msg: String,
}

impl AffectedItemsResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a result with its three summary templates.
    pub fn with_messages(
        all_msg: impl Into<String>,
        some_msg: impl Into<String>,
        none_msg: impl Into<String>,
    ) -> Self {
        Self {
            all_msg: all_msg.into(),
            some_msg: some_msg.into(),
            none_msg: none_msg.into(),
            ..Self::default()
        }
    }

    /// Skip affected items equal to one already recorded.
    pub fn deny_duplicates(mut self) -> Self {
        self.deny_duplicates = true;
        self
    }

    pub fn add_affected(&mut self, item: impl Into<Value>) {
        let item = item.into();
        if self.deny_duplicates && self.affected_items.contains(&item) {
            return;
        }
        self.affected_items.push(item);
    }

    /// Record `id` as failed with `error`, grouped by the error's code.
    pub fn add_failed(&mut self, id: impl Into<String>, error: &VigilError) {
        self.add_failed_key(id, error.key());
    }

    pub fn add_failed_key(&mut self, id: impl Into<String>, key: ErrorKey) {
        match self.index.get(&key) {
            Some(&pos) => {
                self.failed[pos].id.insert(id.into());
            }
            None => {
                self.index.insert(key.clone(), self.failed.len());
                self.failed.push(FailedGroup {
                    error: key,
                    id: BTreeSet::from([id.into()]),
                });
            }
        }
    }

    /// Fold `other` into this result.
    ///
    /// Affected items are appended in the order given; failed sets are
    /// unioned per error key. Summary templates are kept unless this result
    /// has none.
    pub fn extend(&mut self, other: AffectedItemsResult) {
        for item in other.affected_items {
            self.add_affected(item);
        }
        for group in other.failed {
            for id in group.id {
                self.add_failed_key(id, group.error.clone());
            }
        }
        if self.all_msg.is_empty() && self.some_msg.is_empty() && self.none_msg.is_empty() {
            self.all_msg = other.all_msg;
            self.some_msg = other.some_msg;
            self.none_msg = other.none_msg;
        }
    }

    /// Consuming form of [`extend`](Self::extend).
    pub fn merge(mut self, other: AffectedItemsResult) -> Self {
        self.extend(other);
        self
    }

    /// Drop affected items equal to an earlier one.
    pub fn remove_affected_duplicates(&mut self) {
        let mut kept: Vec<Value> = Vec::with_capacity(self.affected_items.len());
        for item in self.affected_items.drain(..) {
            if !kept.contains(&item) {
                kept.push(item);
            }
        }
        self.affected_items = kept;
    }

    pub fn affected_items(&self) -> &[Value] {
        &self.affected_items
    }

    pub fn failed_items(&self) -> &[FailedGroup] {
        &self.failed
    }

    /// Ids that failed with the error identified by `key`.
    pub fn failed_ids(&self, key: &ErrorKey) -> Option<&BTreeSet<String>> {
        self.index.get(key).map(|&pos| &self.failed[pos].id)
    }

    pub fn total_affected_items(&self) -> usize {
        self.affected_items.len()
    }

    pub fn total_failed_items(&self) -> usize {
        self.failed.iter().map(|g| g.id.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.affected_items.is_empty() && self.failed.is_empty()
    }

    /// Pick the summary template: all, none, or some.
    pub fn message(&self) -> &str {
        if self.total_failed_items() == 0 {
            &self.all_msg
        } else if self.total_affected_items() == 0 {
            &self.none_msg
        } else {
            &self.some_msg
        }
    }

    pub fn render(&self) -> RenderedResult {
        RenderedResult {
            message: self.message().to_string(),
            data: RenderedData {
                affected_items: self.affected_items.clone(),
                failed_items: self
                    .failed
                    .iter()
                    .map(|group| RenderedFailure {
                        error: RenderedError {
                            code: group.error.code,
                            message: group.error.message.clone(),
                        },
                        id: group.id.iter().cloned().collect(),
                    })
                    .collect(),
                total_affected_items: self.total_affected_items(),
                total_failed_items: self.total_failed_items(),
            },
        }
    }
}

/// Caller-facing shape of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedResult {
    pub message: String,
    pub data: RenderedData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedData {
    pub affected_items: Vec<Value>,
    pub failed_items: Vec<RenderedFailure>,
    pub total_affected_items: usize,
    pub total_failed_items: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedFailure {
    pub error: RenderedError,
    pub id: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedError {
    pub code: i32,
    pub message: String,
}

/// Node-to-node form: keeps the error kind that rendering drops.
#[derive(Serialize, Deserialize)]
struct ResultWire {
    affected_items: Vec<Value>,
    failed_items: Vec<FailedGroup>,
    #[serde(default)]
    deny_duplicates: bool,
    #[serde(default)]
    all_msg: String,
    #[serde(default)]
    some_msg: String,
    #[serde(default)]
    none_msg: String,
}

impl From<ResultWire> for AffectedItemsResult {
    fn from(wire: ResultWire) -> Self {
        let mut result = AffectedItemsResult {
            affected_items: wire.affected_items,
            deny_duplicates: wire.deny_duplicates,
            all_msg: wire.all_msg,
            some_msg: wire.some_msg,
            none_msg: wire.none_msg,
            ..AffectedItemsResult::default()
        };
        for group in wire.failed_items {
            for id in group.id {
                result.add_failed_key(id, group.error.clone());
            }
        }
        result
    }
}

impl From<AffectedItemsResult> for ResultWire {
    fn from(result: AffectedItemsResult) -> Self {
        ResultWire {
            affected_items: result.affected_items,
            failed_items: result.failed,
            deny_duplicates: result.deny_duplicates,
            all_msg: result.all_msg,
            some_msg: result.some_msg,
            none_msg: result.none_msg,
        }
    }
}
