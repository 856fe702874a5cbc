//! Run-wide variable store.
//!
//! Owned by the coordinator; executors only see it through message round-trips.
//! Writes fail closed when the store is full, values are truncated to a cap and
//! a periodic sweep evicts entries older than the TTL.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VariableError {
    #[error("variable name must not be empty")]
    EmptyName,

    #[error("variable store is full ({limit} entries), cannot add '{key}'")]
    Full { key: String, limit: usize },

    #[error("variable snapshot is corrupt: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Size and lifetime limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLimits {
    pub max_vars: usize,
    /// Maximum value length in characters
    pub max_value_len: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for VariableLimits {
    fn default() -> Self {
        Self {
            max_vars: 50,
            max_value_len: 1000,
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// A stored value and the time it was last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub value: String,
    #[serde(rename = "_timestamp", with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Outcome of an accepted write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOutcome {
    pub replaced: bool,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<String>,
    pub truncated: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.truncated.is_empty()
    }
}

/// Durable layout: name -> `{ value, _timestamp }`.
pub type VariableSnapshot = BTreeMap<String, Variable>;

#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    limits: VariableLimits,
    entries: BTreeMap<String, Variable>,
}

impl VariableStore {
    pub fn new(limits: VariableLimits) -> Self {
        Self {
            limits,
            entries: BTreeMap::new(),
        }
    }

    pub fn limits(&self) -> VariableLimits {
        self.limits
    }

    /// Replaces the limits. Existing oversized values are left for the next sweep.
    pub fn set_limits(&mut self, limits: VariableLimits) {
        self.limits = limits;
    }

    /// Upserts a value. Returns `false` when the store is full and `key` is new.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        self.try_set_at(key, value, Utc::now()).is_ok()
    }

    pub fn try_set(&mut self, key: &str, value: &str) -> Result<SetOutcome, VariableError> {
        self.try_set_at(key, value, Utc::now())
    }

    pub fn try_set_at(
        &mut self,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<SetOutcome, VariableError> {
        if key.is_empty() {
            return Err(VariableError::EmptyName);
        }
        let replaced = self.entries.contains_key(key);
        if !replaced && self.entries.len() >= self.limits.max_vars {
            warn!(key, limit = self.limits.max_vars, "variable store full");
            return Err(VariableError::Full {
                key: key.to_string(),
                limit: self.limits.max_vars,
            });
        }

        let (value, truncated) = truncate_chars(value, self.limits.max_value_len);
        if truncated {
            warn!(key, max = self.limits.max_value_len, "variable value truncated");
        }
        self.entries.insert(
            key.to_string(),
            Variable {
                value,
                updated_at: now,
            },
        );
        Ok(SetOutcome {
            replaced,
            truncated,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.value.as_str())
    }

    pub fn entry(&self, key: &str) -> Option<&Variable> {
        self.entries.get(key)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Plain name -> value view used for substitution.
    pub fn all(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sweep(&mut self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Drops entries older than the TTL and re-truncates oversized values.
    pub fn sweep_at(&mut self, now: DateTime<Utc>) -> SweepReport {
        let ttl = chrono::Duration::milliseconds(self.limits.ttl.as_millis() as i64);
        let max_len = self.limits.max_value_len;
        let mut report = SweepReport::default();

        self.entries.retain(|key, var| {
            if now.signed_duration_since(var.updated_at) > ttl {
                report.expired.push(key.clone());
                return false;
            }
            let (value, truncated) = truncate_chars(&var.value, max_len);
            if truncated {
                var.value = value;
                report.truncated.push(key.clone());
            }
            true
        });

        if !report.expired.is_empty() {
            info!(count = report.expired.len(), "removed expired variables");
        }
        if !report.truncated.is_empty() {
            debug!(keys = ?report.truncated, "truncated oversized variables");
        }
        report
    }

    pub fn snapshot(&self) -> VariableSnapshot {
        self.entries.clone()
    }

    /// Rebuilds a store from a persisted snapshot, applying the current limits.
    /// Entries beyond `max_vars` are dropped, newest kept.
    pub fn from_snapshot(limits: VariableLimits, snapshot: VariableSnapshot) -> Self {
        let mut entries: Vec<(String, Variable)> = snapshot.into_iter().collect();
        if entries.len() > limits.max_vars {
            entries.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at));
            warn!(
                dropped = entries.len() - limits.max_vars,
                "restored variables exceed limit"
            );
            entries.truncate(limits.max_vars);
        }
        let entries = entries
            .into_iter()
            .map(|(key, mut var)| {
                var.value = truncate_chars(&var.value, limits.max_value_len).0;
                (key, var)
            })
            .collect();
        Self { limits, entries }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, VariableError> {
        Ok(serde_json::to_vec(&self.entries)?)
    }

    pub fn from_json(limits: VariableLimits, bytes: &[u8]) -> Result<Self, VariableError> {
        let snapshot: VariableSnapshot = serde_json::from_slice(bytes)?;
        Ok(Self::from_snapshot(limits, snapshot))
    }
}

fn truncate_chars(value: &str, max: usize) -> (String, bool) {
    match value.char_indices().nth(max) {
        Some((cut, _)) => (value[..cut].to_string(), true),
        None => (value.to_string(), false),
    }
}
