//! Layered configuration store.
//!
//! Three tiers with strict precedence: runtime (CLI) > user overrides >
//! system defaults. The system and user tiers come from JSON files with
//! the same dotted-path schema; the runtime tier is set through
//! [`ConfigStore::set_override`]. A legacy flat key may alias a JSON
//! path through the mapping table, with optional value converters.
//!
//! The store is a value type: the orchestrator creates one and shares a
//! read-only handle; tests build disposable stores. All access goes
//! through one store-wide `RwLock` (reads vastly outnumber writes).

mod mapping;

pub use mapping::{glob_match, Converter, KeyMapping, MappingTable, Preset, ValidationRule};

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key set aside to request a preset at initialization time.
pub const PRESET_KEY: &str = "_preset";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse system config {path}")]
    ParseSystem {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse mapping file {path}")]
    ParseMapping {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no system config file path is set")]
    NoSystemPath,
}

/// Which tier supplied a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Runtime,
    User,
    System,
    Unset,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueSource::Runtime => "runtime",
            ValueSource::User => "user",
            ValueSource::System => "system",
            ValueSource::Unset => "none",
        };
        f.write_str(s)
    }
}

/// Export format for the merged view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    /// Accepted for compatibility; written as JSON with a warning.
    Yaml,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(ExportFormat::Json),
            "yaml" => Some(ExportFormat::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Full system tree, retained for export and in-place rewrite.
    system_tree: Value,
    /// Flattened dotted-path view of the system tier (user merged in).
    system: BTreeMap<String, String>,
    /// Flattened user overrides.
    user: BTreeMap<String, String>,
    /// Runtime (CLI) overrides, keyed exactly as given.
    runtime: BTreeMap<String, String>,
    mapping: MappingTable,
    /// JSON path back to flat key.
    reverse: BTreeMap<String, String>,
    system_path: Option<PathBuf>,
    user_path: Option<PathBuf>,
}

/// The layered key/value store.
#[derive(Debug, Default)]
pub struct ConfigStore {
    inner: RwLock<Inner>,
}

impl ConfigStore {
    /// An empty store with no tiers loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load system defaults and user overrides, then apply CLI
    /// overrides and any `_preset` request.
    ///
    /// A missing system file logs a warning and leaves the tier empty;
    /// a malformed system file is an initialization error. User file
    /// problems are never fatal.
    pub fn initialize(
        system_path: &Path,
        user_path: &Path,
        cli_overrides: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let store = Self::new();
        {
            let mut inner = store.inner.write().unwrap();
            inner.system_path = Some(system_path.to_path_buf());
            inner.user_path = Some(user_path.to_path_buf());
            load_tiers(&mut inner)?;
            for (key, value) in cli_overrides {
                inner.runtime.insert(key.clone(), value.clone());
            }
        }
        let preset = store.get_string(PRESET_KEY, "");
        if !preset.is_empty() {
            store.apply_preset(&preset);
        }
        Ok(store)
    }

    /// Install a parameter mapping table loaded elsewhere.
    pub fn set_mapping(&self, mapping: MappingTable) {
        let mut inner = self.inner.write().unwrap();
        inner.reverse = mapping.reverse_map();
        inner.mapping = mapping;
    }

    /// Load the parameter mapping table from a JSON file.
    pub fn load_mappings(&self, path: &Path) -> Result<(), ConfigError> {
        let table = MappingTable::from_json_file(path)?;
        info!(path = %path.display(), entries = table.mappings.len(), "loaded parameter mappings");
        self.set_mapping(table);
        Ok(())
    }

    /// String getter with tier precedence; `default` when unset.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        let inner = self.inner.read().unwrap();
        lookup(&inner, key)
            .map(|(v, _)| v)
            .unwrap_or_else(|| default.to_string())
    }

    /// Integer getter; parse failure falls back to `default`.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        let raw = self.get_string(key, &default.to_string());
        raw.trim().parse().unwrap_or(default)
    }

    /// Float getter; parse failure falls back to `default`.
    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        let raw = self.get_string(key, &default.to_string());
        raw.trim().parse().unwrap_or(default)
    }

    /// Tolerant boolean getter: {true, 1, yes, on} / {false, 0, no, off}.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        let raw = self.get_string(key, if default { "true" } else { "false" });
        match raw.trim() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        }
    }

    /// Read a float array stored as `key.0`, `key.1`, ... elements.
    pub fn get_float_array(&self, key: &str) -> Vec<f64> {
        let mut out = Vec::new();
        for index in 0.. {
            let element = self.get_string(&format!("{key}.{index}"), "");
            if element.is_empty() {
                break;
            }
            match element.trim().parse() {
                Ok(v) => out.push(v),
                Err(_) => break,
            }
        }
        out
    }

    /// Set a runtime-tier override. Only the runtime tier mutates.
    pub fn set_override(&self, key: &str, value: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.runtime.insert(key.to_string(), value.to_string());
    }

    /// Remove a runtime-tier override.
    pub fn clear_override(&self, key: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.runtime.remove(key);
    }

    /// Whether any tier holds a value for `key`.
    pub fn has_key(&self, key: &str) -> bool {
        let inner = self.inner.read().unwrap();
        lookup(&inner, key).is_some()
    }

    /// Which tier supplies the effective value for `key`.
    pub fn value_source(&self, key: &str) -> ValueSource {
        let inner = self.inner.read().unwrap();
        lookup(&inner, key)
            .map(|(_, src)| src)
            .unwrap_or(ValueSource::Unset)
    }

    /// Resolve a flat key to its JSON tree path.
    pub fn json_path_for(&self, flat_key: &str) -> String {
        let inner = self.inner.read().unwrap();
        inner.mapping.json_path(flat_key).to_string()
    }

    /// Resolve a JSON tree path back to its flat key, if mapped.
    pub fn flat_key_for(&self, json_path: &str) -> Option<String> {
        let inner = self.inner.read().unwrap();
        inner.reverse.get(json_path).cloned()
    }

    /// Inject a preset's settings atop the user tier. Returns `false`
    /// and logs when the preset is unknown.
    pub fn apply_preset(&self, name: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(preset) = inner.mapping.preset(name).cloned() else {
            warn!(preset = name, "preset not found");
            return false;
        };
        info!(preset = name, "applying preset");
        for (flat_key, value) in &preset.settings {
            let raw = json_scalar_to_string(value);
            let entry = inner.mapping.entry(flat_key);
            let converted = match entry.and_then(|m| m.to_json) {
                Some(conv) => conv.to_json(&raw),
                None => raw,
            };
            let path = inner.mapping.json_path(flat_key).to_string();
            inner.user.insert(path, converted);
        }
        true
    }

    /// Check every mapped key with validation metadata against its
    /// effective value. Returns all findings, not just the first.
    pub fn validate(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let mut errors = Vec::new();
        for (flat_key, entry) in &inner.mapping.mappings {
            let Some(rule) = &entry.validation else {
                continue;
            };
            if let Some((value, _)) = lookup(&inner, flat_key) {
                rule.check(flat_key, &value, &mut errors);
            }
        }
        errors
    }

    /// Merged view of all three tiers as one JSON tree.
    pub fn effective_tree(&self) -> Value {
        let inner = self.inner.read().unwrap();
        let mut tree = inner.system_tree.clone();
        for (path, value) in &inner.user {
            set_in_tree(&mut tree, path, Value::String(value.clone()));
        }
        for (key, value) in &inner.runtime {
            let entry = inner.mapping.entry(key);
            let converted = match entry.and_then(|m| m.to_json) {
                Some(conv) => conv.to_json(value),
                None => value.clone(),
            };
            let path = inner.mapping.json_path(key).to_string();
            set_in_tree(&mut tree, &path, Value::String(converted));
        }
        tree
    }

    /// Write the merged view to a file.
    pub fn export_effective(&self, path: &Path, format: ExportFormat) -> Result<(), ConfigError> {
        if format == ExportFormat::Yaml {
            warn!("yaml export not supported; writing json instead");
        }
        let tree = self.effective_tree();
        let text = serde_json::to_string_pretty(&tree).unwrap_or_default();
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Update one value in the retained system tree (used by the
    /// calibrator before rewriting the system file).
    pub fn set_tree_value(&self, json_path: &str, value: Value) {
        let mut inner = self.inner.write().unwrap();
        set_in_tree(&mut inner.system_tree, json_path, value.clone());
        // Keep the flattened view in step.
        let mut flat = BTreeMap::new();
        flatten_value(json_path, &value, &mut flat);
        for (k, v) in flat {
            inner.system.insert(k, v);
        }
    }

    /// Serialize the retained system tree to a file.
    pub fn write_system_file(&self, path: &Path) -> Result<(), ConfigError> {
        let inner = self.inner.read().unwrap();
        let text = serde_json::to_string_pretty(&inner.system_tree).unwrap_or_default();
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Path of the loaded system config file, if any.
    pub fn system_file_path(&self) -> Option<PathBuf> {
        self.inner.read().unwrap().system_path.clone()
    }

    /// Re-read both config files, preserving the runtime tier.
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("reloading configuration");
        {
            let mut inner = self.inner.write().unwrap();
            inner.system_tree = Value::Null;
            inner.system.clear();
            inner.user.clear();
            load_tiers(&mut inner)?;
        }
        let preset = self.get_string(PRESET_KEY, "");
        if !preset.is_empty() {
            self.apply_preset(&preset);
        }
        Ok(())
    }
}

/// Expand a leading `~/` using `$HOME`.
pub fn expand_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}{rest}");
        }
    }
    path.to_string()
}

fn load_tiers(inner: &mut Inner) -> Result<(), ConfigError> {
    if let Some(system_path) = inner.system_path.clone() {
        if system_path.exists() {
            let text = std::fs::read_to_string(&system_path).map_err(|source| ConfigError::Io {
                path: system_path.clone(),
                source,
            })?;
            let tree: Value =
                serde_json::from_str(&text).map_err(|source| ConfigError::ParseSystem {
                    path: system_path.clone(),
                    source,
                })?;
            flatten_value("", &tree, &mut inner.system);
            inner.system_tree = tree;
            info!(path = %system_path.display(), "loaded system defaults");
        } else {
            warn!(path = %system_path.display(), "system configuration file not found");
            inner.system_tree = Value::Object(Default::default());
        }
    }

    if let Some(user_path) = inner.user_path.clone() {
        if user_path.exists() {
            match std::fs::read_to_string(&user_path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
            {
                Ok(tree) => {
                    flatten_value("", &tree, &mut inner.user);
                    info!(path = %user_path.display(), "loaded user settings");
                }
                Err(err) => {
                    // Corrupt user settings fall back to system defaults.
                    warn!(path = %user_path.display(), %err, "failed to parse user settings");
                }
            }
        } else {
            debug!(path = %user_path.display(), "no user settings file");
        }
    }
    Ok(())
}

fn lookup(inner: &Inner, key: &str) -> Option<(String, ValueSource)> {
    if let Some(v) = inner.runtime.get(key) {
        return Some((v.clone(), ValueSource::Runtime));
    }
    let entry = inner.mapping.entry(key);
    let path = inner.mapping.json_path(key);
    let convert = |raw: &str| match entry.and_then(|m| m.from_json) {
        Some(conv) => conv.from_json(raw),
        None => raw.to_string(),
    };
    if let Some(v) = inner.user.get(path) {
        return Some((convert(v), ValueSource::User));
    }
    if let Some(v) = inner.system.get(path) {
        return Some((convert(v), ValueSource::System));
    }
    None
}

/// Flatten a JSON tree into dotted-path string entries. Array elements
/// become numeric path segments; nulls are skipped.
fn flatten_value(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let child = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_value(&child, v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_value(&format!("{prefix}.{i}"), v, out);
            }
        }
        Value::Null => {}
        other => {
            out.insert(prefix.to_string(), json_scalar_to_string(other));
        }
    }
}

fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Set a dotted path in a JSON tree, creating intermediate objects.
/// Numeric segments index into existing arrays.
fn set_in_tree(tree: &mut Value, dotted: &str, value: Value) {
    let segments: Vec<&str> = dotted.split('.').collect();
    let mut node = tree;
    let mut pending = Some(value);
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let array_index = segment.parse::<usize>().ok().filter(|_| node.is_array());
        node = match array_index {
            Some(index) => {
                let items = node.as_array_mut().expect("checked array");
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                if last {
                    items[index] = pending.take().expect("value consumed once");
                    return;
                }
                &mut items[index]
            }
            None => {
                if !node.is_object() {
                    *node = Value::Object(Default::default());
                }
                let map = node.as_object_mut().expect("checked object");
                if last {
                    map.insert(segment.to_string(), pending.take().expect("value consumed once"));
                    return;
                }
                map.entry(segment.to_string())
                    .or_insert(Value::Object(Default::default()))
            }
        };
    }
}
