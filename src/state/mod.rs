//! Per-package loop state.
//!
//! Each package owns one [`PackageState`]: a cache of edit-tool results, the
//! ordered history of executed calls (used to bound repeats), the publish
//! gate, and the modification log that survives across attempts. The
//! [`StateRegistry`] hands out one lock per package so disjoint packages can
//! be processed concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::patch::DiffEntry;

/// Canonical identity of a tool call: `"{tool}::{json}"` with object keys
/// sorted at every depth and no insignificant whitespace.
pub fn args_key(tool: &str, args: &Value) -> String {
    format!("{}::{}", tool, canonical_json(args))
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// One successful edit, kept for the next attempt's prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationRecord {
    pub file_path: String,
    pub diff_entries: Vec<DiffEntry>,
    pub timestamp: DateTime<Utc>,
}

impl ModificationRecord {
    pub fn new(file_path: impl Into<String>, diff_entries: Vec<DiffEntry>) -> Self {
        Self {
            file_path: file_path.into(),
            diff_entries,
            timestamp: Utc::now(),
        }
    }
}

/// Mutable state for one package.
#[derive(Debug, Clone)]
pub struct PackageState {
    max_repeat: usize,
    cache: HashMap<String, String>,
    history: Vec<String>,
    modifications: Vec<ModificationRecord>,
    upload_status: bool,
}

impl PackageState {
    pub fn new(max_repeat: usize) -> Self {
        Self {
            max_repeat,
            cache: HashMap::new(),
            history: Vec::new(),
            modifications: Vec::new(),
            upload_status: false,
        }
    }

    pub fn max_repeat(&self) -> usize {
        self.max_repeat
    }

    /// How many times `key` has been recorded this attempt.
    pub fn repeat_count(&self, key: &str) -> usize {
        self.history.iter().filter(|k| k.as_str() == key).count()
    }

    /// Whether another call with `key` is allowed under the repeat bound.
    pub fn check_repeat(&self, key: &str) -> bool {
        self.repeat_count(key) < self.max_repeat
    }

    pub fn record_history(&mut self, key: impl Into<String>) {
        self.history.push(key.into());
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn check_cache(&self, key: &str) -> Option<&str> {
        self.cache.get(key).map(String::as_str)
    }

    pub fn write_cache(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.cache.insert(key.into(), text.into());
    }

    /// Clears cache and history for a new attempt. Modifications and the
    /// publish gate are kept.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.history.clear();
    }

    pub fn record_modification(&mut self, record: ModificationRecord) {
        self.modifications.push(record);
    }

    pub fn modifications(&self) -> &[ModificationRecord] {
        &self.modifications
    }

    pub fn upload_status(&self) -> bool {
        self.upload_status
    }

    pub fn mark_uploaded(&mut self) {
        self.upload_status = true;
    }
}

/// Shared handle to one package's state.
pub type SharedPackageState = Arc<Mutex<PackageState>>;

/// Package-name keyed registry of [`PackageState`]s.
#[derive(Debug)]
pub struct StateRegistry {
    max_repeat: usize,
    packages: Mutex<HashMap<String, SharedPackageState>>,
}

impl StateRegistry {
    pub fn new(max_repeat: usize) -> Self {
        Self {
            max_repeat,
            packages: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the state for `package`, creating it on first use.
    pub async fn package(&self, package: &str) -> SharedPackageState {
        let mut packages = self.packages.lock().await;
        packages
            .entry(package.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PackageState::new(self.max_repeat))))
            .clone()
    }

    /// Replaces any state for `package` with a fresh one. Used once per run
    /// when a package starts processing.
    pub async fn start_package(&self, package: &str) -> SharedPackageState {
        let fresh = Arc::new(Mutex::new(PackageState::new(self.max_repeat)));
        self.packages
            .lock()
            .await
            .insert(package.to_string(), fresh.clone());
        fresh
    }
}
